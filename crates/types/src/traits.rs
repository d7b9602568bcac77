//! Trait seams to the executor manager's collaborators.
//!
//! Implementations live in their own crates (or in the host process); the
//! manager only depends on these contracts. All of them must be safe to call
//! concurrently.

use crate::{
    result::{BundleResult, ReplaceResult},
    transaction::{SubmittedUserOperation, TransactionInfo},
    userop::UserOperationInfo,
};
use alloy::primitives::{Address, Bytes, TxHash, B256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// The in-process store of pending, processing, and submitted user
/// operations.
#[cfg_attr(feature = "test-utils", mockall::automock)]
#[async_trait]
pub trait Mempool: Send + Sync {
    /// Move a batch of pending ops into the processing state.
    ///
    /// The batch's summed gas stays under `max_gas`; nothing is returned
    /// unless at least `min_count` ops are available.
    async fn process(&self, max_gas: u64, min_count: usize)
        -> eyre::Result<Vec<UserOperationInfo>>;

    /// Snapshot of every submitted op and the broadcast carrying it.
    async fn dump_submitted_ops(&self) -> eyre::Result<Vec<SubmittedUserOperation>>;

    /// Transition an op from processing to submitted, bound to `tx_info`.
    async fn mark_submitted(
        &self,
        op_hash: B256,
        tx_info: Arc<TransactionInfo>,
    ) -> eyre::Result<()>;

    /// Drop an op from the processing state.
    async fn remove_processing(&self, op_hash: B256) -> eyre::Result<()>;

    /// Drop an op from the submitted state.
    async fn remove_submitted(&self, op_hash: B256) -> eyre::Result<()>;

    /// Re-bind a submitted op to the replacement broadcast.
    async fn replace_submitted(
        &self,
        op: UserOperationInfo,
        new_tx_info: Arc<TransactionInfo>,
    ) -> eyre::Result<()>;

    /// Insert an op into the pending pool of `entry_point`.
    async fn add(&self, op: UserOperationInfo, entry_point: Address) -> eyre::Result<()>;
}

/// The low-level bundle sender: transaction construction, signing, nonce
/// management, broadcast.
#[cfg_attr(feature = "test-utils", mockall::automock)]
#[async_trait]
pub trait BundleExecutor: Send + Sync {
    /// Broadcast `ops` as one bundle against `entry_point`.
    async fn bundle(
        &self,
        entry_point: Address,
        ops: Vec<UserOperationInfo>,
    ) -> eyre::Result<Vec<BundleResult>>;

    /// Broadcast compressed `ops` as one bundle against `entry_point`.
    async fn bundle_compressed(
        &self,
        entry_point: Address,
        ops: Vec<UserOperationInfo>,
    ) -> eyre::Result<Vec<BundleResult>>;

    /// Broadcast a replacement for `tx_info` at the same sender and nonce.
    async fn replace_transaction(
        &self,
        tx_info: Arc<TransactionInfo>,
    ) -> eyre::Result<ReplaceResult>;

    /// Release `executor` for the next bundle.
    async fn mark_wallet_processed(&self, executor: Address) -> eyre::Result<()>;
}

/// A gas price estimate from the oracle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasPriceEstimate {
    /// Current EIP-1559 fee cap in wei.
    pub max_fee_per_gas: u128,
    /// Current priority fee in wei.
    pub max_priority_fee_per_gas: u128,
}

/// The gas-price oracle.
#[cfg_attr(feature = "test-utils", mockall::automock)]
#[async_trait]
pub trait GasPriceOracle: Send + Sync {
    /// Fees a transaction should carry to be included promptly.
    async fn get_gas_price(&self) -> eyre::Result<GasPriceEstimate>;
}

/// The reputation ledger for senders, factories, and paymasters.
#[cfg_attr(feature = "test-utils", mockall::automock)]
#[async_trait]
pub trait ReputationManager: Send + Sync {
    /// Credit the entities behind an op that made it on chain.
    async fn update_user_operation_included_status(
        &self,
        op: &UserOperationInfo,
        entry_point: Address,
        account_deployed: bool,
    ) -> eyre::Result<()>;
}

/// User-visible lifecycle states surfaced through the monitor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    /// In flight inside a broadcast bundle.
    Submitted,
    /// Mined.
    Included,
    /// Dropped without inclusion.
    Rejected,
}

/// The status monitor queried by `eth_getUserOperationByHash`-style lookups.
#[cfg_attr(feature = "test-utils", mockall::automock)]
pub trait Monitor: Send + Sync {
    /// Record the op's current status and, when known, the transaction
    /// carrying it.
    fn set_user_operation_status(
        &self,
        op_hash: B256,
        status: OperationStatus,
        transaction_hash: Option<TxHash>,
    );
}

/// Sink for user-operation lifecycle events.
///
/// Emission is fire-and-forget; implementations deal with their own delivery
/// failures.
#[cfg_attr(feature = "test-utils", mockall::automock)]
#[async_trait]
pub trait EventManager: Send + Sync {
    /// The op was rejected by the executor before broadcast.
    async fn emit_dropped(&self, op_hash: B256, reason: &str, aa_code: Option<String>);

    /// The op was mined and executed successfully.
    async fn emit_included_on_chain(&self, op_hash: B256, transaction_hash: TxHash);

    /// The op was mined but its execution phase reverted.
    async fn emit_execution_reverted_on_chain(
        &self,
        op_hash: B256,
        transaction_hash: TxHash,
        revert_reason: Option<Bytes>,
    );

    /// The op's bundle reverted on chain and the op was dropped.
    async fn emit_failed_on_chain(&self, op_hash: B256, transaction_hash: TxHash);

    /// The op was included by a competing bundler.
    async fn emit_frontran_on_chain(&self, op_hash: B256, transaction_hash: TxHash);
}
