//! Shared types for the bundler: user operations, tracked transactions, the
//! tagged results exchanged with the low-level executor, the receipt wire
//! shape, and the trait seams to every collaborator the executor manager
//! talks to (mempool, executor, gas oracle, reputation, monitor, events,
//! EVM RPC).

#![warn(missing_debug_implementations, missing_docs, unreachable_pub, rustdoc::all)]
#![deny(unused_must_use, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

use std::time::{SystemTime, UNIX_EPOCH};

pub mod chain;
pub mod entrypoint;
pub mod receipt;
pub mod result;
pub mod traits;
pub mod transaction;
pub mod userop;

pub use chain::{
    BlockInfo, BlockNumberStream, BlockStream, BundleStatus, ChainClient, ChainClientError,
    MinedTransaction, TransactionReceiptData, UserOperationDetails, UserOperationExecutionStatus,
};
pub use entrypoint::{UserOperationEvent, UserOperationRevertReason};
pub use receipt::{BundleTransactionReceipt, ReceiptLog, ReceiptSchemaError, UserOperationReceipt};
pub use result::{BundleResult, ReplaceResult};
pub use traits::{
    BundleExecutor, EventManager, GasPriceEstimate, GasPriceOracle, Mempool, Monitor,
    OperationStatus, ReputationManager,
};
pub use transaction::{SubmittedUserOperation, TransactionInfo, TransactionRequest};
pub use userop::{aa_error_code, UserOperation, UserOperationInfo};

#[cfg(feature = "test-utils")]
pub use chain::MockChainClient;
#[cfg(feature = "test-utils")]
pub use traits::{
    MockBundleExecutor, MockEventManager, MockGasPriceOracle, MockMempool, MockMonitor,
    MockReputationManager,
};

/// Current unix-epoch time in milliseconds.
///
/// Submission and replacement timestamps are millisecond-based throughout.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
