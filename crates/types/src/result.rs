//! Tagged outcomes returned by the low-level bundle executor.

use crate::{transaction::TransactionInfo, userop::UserOperationInfo};
use alloy::primitives::{Address, B256};
use std::sync::Arc;

/// Per-operation outcome of dispatching a bundle.
///
/// The executor returns one result per op it attempted; ops it filtered out
/// before broadcasting produce no result at all.
#[derive(Clone, Debug)]
pub enum BundleResult {
    /// The op is in flight inside `transaction_info`.
    Success {
        /// The bundled operation.
        user_operation: UserOperationInfo,
        /// The broadcast carrying it. Shared by every success of the bundle.
        transaction_info: Arc<TransactionInfo>,
    },
    /// The op was rejected and will not be retried.
    Failure {
        /// Hash of the rejected operation.
        user_op_hash: B256,
        /// The rejected operation.
        user_operation: UserOperationInfo,
        /// Free-form rejection reason, usually carrying an `AAxx` code.
        reason: String,
    },
    /// The op should be returned to the mempool and bundled again later.
    Resubmit {
        /// Hash of the operation.
        user_op_hash: B256,
        /// The operation to re-insert.
        user_operation: UserOperationInfo,
        /// The entry point to re-insert it under.
        entry_point: Address,
        /// Why the executor punted.
        reason: String,
    },
}

/// Outcome of asking the executor to replace a tracked transaction.
#[derive(Clone, Debug)]
pub enum ReplaceResult {
    /// The replacement could not be broadcast.
    Failed,
    /// The original transaction may already have landed; keep observing.
    PotentiallyAlreadyIncluded,
    /// A replacement was broadcast.
    Replaced {
        /// The successor transaction. Its op set may be a subset of the
        /// original's.
        transaction_info: Arc<TransactionInfo>,
    },
}
