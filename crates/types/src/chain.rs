//! The EVM RPC seam.
//!
//! The executor manager only ever talks to the chain through [`ChainClient`];
//! the concrete transport (and its retry policy) lives elsewhere.

use alloy::{
    primitives::{Address, Bloom, Bytes, TxHash, B256},
    rpc::types::{Filter, Log},
};
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, time::Duration};
use thiserror::Error;

/// Errors surfaced by the RPC seam.
#[derive(Debug, Error)]
pub enum ChainClientError {
    /// The receipt is not available yet. Callers treat this as a retry
    /// signal; every other error propagates.
    #[error("transaction receipt not found: {0}")]
    ReceiptNotFound(TxHash),

    /// Any other transport or RPC failure.
    #[error("{0}")]
    Other(eyre::Report),
}

impl From<eyre::Report> for ChainClientError {
    fn from(err: eyre::Report) -> Self {
        Self::Other(err)
    }
}

/// A new-block notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockInfo {
    /// Block number.
    pub number: u64,
    /// Block hash.
    pub hash: B256,
}

/// The slice of a mined transaction needed to back-fill receipt data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MinedTransaction {
    /// Transaction hash.
    pub hash: TxHash,
    /// Effective gas price fallback for receipts that omit it.
    pub gas_price: Option<u128>,
}

/// A transaction receipt as returned by the RPC, before wire-schema
/// validation.
///
/// Topology fields are optional here because nodes return partial receipts
/// for transactions still settling; the receipt reconstructor treats any gap
/// as "pending".
#[derive(Clone, Debug)]
pub struct TransactionReceiptData {
    /// Hash of the mined transaction.
    pub transaction_hash: TxHash,
    /// Index within the block.
    pub transaction_index: Option<u64>,
    /// Containing block hash.
    pub block_hash: Option<B256>,
    /// Containing block number.
    pub block_number: Option<u64>,
    /// Sender of the transaction.
    pub from: Address,
    /// Recipient of the transaction.
    pub to: Option<Address>,
    /// Running gas total for the block.
    pub cumulative_gas_used: u128,
    /// Gas used by this transaction.
    pub gas_used: u128,
    /// Effective gas price, absent on some pre-1559 RPCs.
    pub effective_gas_price: Option<u128>,
    /// Deployed contract, for creation transactions.
    pub contract_address: Option<Address>,
    /// Whether the transaction succeeded.
    pub success: bool,
    /// Bloom filter over the logs.
    pub logs_bloom: Bloom,
    /// Logs emitted by the transaction.
    pub logs: Vec<Log>,
}

/// Execution outcome of one user operation inside an included bundle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperationDetails {
    /// Whether the op's execution phase succeeded.
    pub status: UserOperationExecutionStatus,
    /// Whether the op deployed its smart account.
    pub account_deployed: bool,
    /// Raw revert payload when `status` is reverted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revert_reason: Option<Bytes>,
}

/// Per-op execution status inside an included bundle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserOperationExecutionStatus {
    /// Execution succeeded.
    ///
    /// NOTE: `"succesful"` (sic) is the spelling fixed by the upstream
    /// producer's contract. Do not correct it.
    #[serde(rename = "succesful")]
    Succesful,
    /// Execution reverted (the op is still included and charged).
    #[serde(rename = "reverted")]
    Reverted,
}

/// On-chain state of a broadcast bundle.
#[derive(Clone, Debug)]
pub enum BundleStatus {
    /// Not mined (or not visible to the queried node).
    NotFound,
    /// Mined and executed.
    Included {
        /// Outcome per bundled op, keyed by op hash.
        user_operation_details: HashMap<B256, UserOperationDetails>,
    },
    /// Mined but reverted at the entry point.
    Reverted {
        /// The revert matched the out-of-gas code AA95.
        is_aa95: bool,
        /// Decoded revert reason, when one could be extracted.
        reason: Option<String>,
    },
}

/// Stream of new-block notifications. Dropping it unsubscribes.
pub type BlockStream = BoxStream<'static, Result<BlockInfo, ChainClientError>>;

/// Stream of block numbers. Dropping it unsubscribes.
pub type BlockNumberStream = BoxStream<'static, Result<u64, ChainClientError>>;

/// Read access to the EVM network.
///
/// Subscription streams surface transport errors as `Err` items so the
/// subscriber can log them and keep the subscription alive; the transport is
/// expected to retry underneath.
#[cfg_attr(feature = "test-utils", mockall::automock)]
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Latest block number.
    async fn get_block_number(&self) -> Result<u64, ChainClientError>;

    /// Logs matching `filter`.
    async fn get_logs(&self, filter: &Filter) -> Result<Vec<Log>, ChainClientError>;

    /// Receipt of a mined transaction.
    ///
    /// Returns [`ChainClientError::ReceiptNotFound`] while the transaction
    /// is not (yet) mined.
    async fn get_transaction_receipt(
        &self,
        hash: TxHash,
    ) -> Result<TransactionReceiptData, ChainClientError>;

    /// The transaction itself, if known to the node.
    async fn get_transaction(
        &self,
        hash: TxHash,
    ) -> Result<Option<MinedTransaction>, ChainClientError>;

    /// Classify a broadcast bundle against `entry_point`.
    async fn get_bundle_status(
        &self,
        entry_point: Address,
        hash: TxHash,
    ) -> Result<BundleStatus, ChainClientError>;

    /// Subscribe to new blocks at the given polling interval.
    ///
    /// Only blocks arriving after the subscription are delivered (missed
    /// blocks are not replayed) and transaction bodies are not included.
    async fn watch_blocks(
        &self,
        polling_interval: Duration,
    ) -> Result<BlockStream, ChainClientError>;

    /// Subscribe to block numbers at the given polling interval.
    async fn watch_block_number(
        &self,
        polling_interval: Duration,
    ) -> Result<BlockNumberStream, ChainClientError>;
}
