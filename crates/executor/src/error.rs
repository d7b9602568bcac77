//! Error types for the executor manager.

use alloy::primitives::B256;
use bundler_types::{ChainClientError, ReceiptSchemaError};
use thiserror::Error;

/// Errors surfaced by executor manager operations.
#[derive(Debug, Error)]
pub enum ExecutorManagerError {
    /// `bundle_now` was triggered while the mempool had nothing to offer.
    #[error("no ops to bundle")]
    NoOpsToBundle,

    /// An entry-point dispatch produced no transaction hash.
    #[error("no tx hash")]
    NoTransactionHash,

    /// A mined transaction's receipt carried no `UserOperationEvent` for the
    /// op being reconstructed.
    #[error("no UserOperationEvent in logs for user operation {0}")]
    MissingUserOperationEvent(B256),

    /// An entry-point event log could not be decoded.
    #[error("failed to decode entry point event: {0}")]
    EventDecode(#[from] alloy::sol_types::Error),

    /// A log or receipt failed wire-schema validation.
    #[error(transparent)]
    Schema(#[from] ReceiptSchemaError),

    /// The RPC seam failed.
    #[error(transparent)]
    Chain(#[from] ChainClientError),

    /// A collaborator call failed.
    #[error("collaborator call failed: {0}")]
    Collaborator(eyre::Report),
}

impl From<eyre::Report> for ExecutorManagerError {
    fn from(err: eyre::Report) -> Self {
        Self::Collaborator(err)
    }
}
