//! Broadcast transactions actively tracked by the executor.

use crate::{now_ms, userop::UserOperationInfo};
use alloy::primitives::{Address, Bytes, TxHash, B256};
use parking_lot::Mutex;
use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc,
};

/// The EVM request backing a broadcast bundle.
///
/// Mutable while the transaction is tracked: the replacement policy bumps
/// `gas` and `nonce` on recoverable reverts before dispatching a replacement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionRequest {
    /// The executor wallet signing the bundle.
    pub from: Address,
    /// The entry point receiving the bundle.
    pub to: Address,
    /// Gas limit.
    pub gas: u64,
    /// Executor wallet nonce.
    pub nonce: u64,
    /// EIP-1559 fee cap in wei.
    pub max_fee_per_gas: u128,
    /// EIP-1559 priority fee in wei.
    pub max_priority_fee_per_gas: u128,
    /// Encoded `handleOps` calldata.
    pub data: Bytes,
}

/// An actively tracked broadcast, owned by the executor.
///
/// Shared as `Arc<TransactionInfo>` between the mempool's submitted set and
/// the block handler. The request is behind a mutex because the AA95 path
/// mutates gas and nonce in place; the mutation is ordered before the
/// replacement dispatch by removing the ops from the submitted set first.
#[derive(Debug)]
pub struct TransactionInfo {
    /// Hash of the current broadcast.
    pub transaction_hash: TxHash,
    /// Hashes of prior broadcasts superseded by replacements, oldest first.
    ///
    /// Never contains `transaction_hash`.
    pub previous_transaction_hashes: Vec<TxHash>,
    /// The underlying EVM request.
    pub transaction_request: Mutex<TransactionRequest>,
    /// The user operations bundled in this transaction.
    pub user_operation_infos: Vec<UserOperationInfo>,
    /// The executor wallet that signed the broadcast.
    pub executor: Address,
    /// Selects the v0.6 entry-point ABI variant.
    pub is_version_06: bool,
    /// Unix-ms timestamp of the last replacement (submission time initially).
    pub last_replaced: u64,
    /// How many replacement attempts reported the transaction as potentially
    /// already included. Bounded at [`TransactionInfo::POTENTIALLY_INCLUDED_LIMIT`].
    pub times_potentially_included: AtomicU32,
}

impl TransactionInfo {
    /// Observations of `potentially_already_included` tolerated before the
    /// op set is abandoned.
    pub const POTENTIALLY_INCLUDED_LIMIT: u32 = 3;

    /// Track a freshly broadcast transaction.
    pub fn new(
        transaction_hash: TxHash,
        transaction_request: TransactionRequest,
        user_operation_infos: Vec<UserOperationInfo>,
        executor: Address,
        is_version_06: bool,
    ) -> Self {
        Self {
            transaction_hash,
            previous_transaction_hashes: Vec::new(),
            transaction_request: Mutex::new(transaction_request),
            user_operation_infos,
            executor,
            is_version_06,
            last_replaced: now_ms(),
            times_potentially_included: AtomicU32::new(0),
        }
    }

    /// Track the successor of a replaced transaction.
    ///
    /// The replaced hash joins the history; the history never contains the
    /// new hash.
    pub fn replacing(
        previous: &TransactionInfo,
        transaction_hash: TxHash,
        transaction_request: TransactionRequest,
        user_operation_infos: Vec<UserOperationInfo>,
    ) -> Self {
        let mut previous_transaction_hashes = previous.previous_transaction_hashes.clone();
        previous_transaction_hashes.push(previous.transaction_hash);
        previous_transaction_hashes.retain(|hash| *hash != transaction_hash);
        Self {
            transaction_hash,
            previous_transaction_hashes,
            transaction_request: Mutex::new(transaction_request),
            user_operation_infos,
            executor: previous.executor,
            is_version_06: previous.is_version_06,
            last_replaced: now_ms(),
            times_potentially_included: AtomicU32::new(
                previous.times_potentially_included.load(Ordering::Acquire),
            ),
        }
    }

    /// The current hash followed by every superseded hash.
    ///
    /// Status resolution probes all of these: a replaced broadcast may still
    /// be the one that lands.
    pub fn candidate_hashes(&self) -> Vec<TxHash> {
        let mut hashes = Vec::with_capacity(1 + self.previous_transaction_hashes.len());
        hashes.push(self.transaction_hash);
        hashes.extend(self.previous_transaction_hashes.iter().copied());
        hashes
    }

    /// Hashes of the user operations bundled in this transaction.
    pub fn op_hashes(&self) -> impl Iterator<Item = B256> + '_ {
        self.user_operation_infos.iter().map(|op| op.hash)
    }
}

/// A user operation bound to the broadcast carrying it, as stored in the
/// mempool's submitted set.
#[derive(Clone, Debug)]
pub struct SubmittedUserOperation {
    /// The tracked operation.
    pub user_operation: UserOperationInfo,
    /// The broadcast it rode in on.
    pub transaction_info: Arc<TransactionInfo>,
}
