//! Test fixtures shared across the executor manager tests.

use crate::{BundlingMode, ExecutorManager, ExecutorManagerConfig, ExecutorMetrics};
use alloy::{
    primitives::{Address, Bytes, LogData, B256, U256},
    rpc::types::Log,
    sol_types::SolEvent,
};
use bundler_types::{
    now_ms, BlockNumberStream, BlockStream, MockBundleExecutor, MockChainClient, MockEventManager,
    MockGasPriceOracle, MockMempool, MockMonitor, MockReputationManager, SubmittedUserOperation,
    TransactionInfo, TransactionReceiptData, TransactionRequest, UserOperation, UserOperationEvent,
    UserOperationInfo, UserOperationRevertReason,
};
use futures::StreamExt;
use std::{sync::Arc, time::Duration};

mod status_tests;

pub(crate) fn entry_point() -> Address {
    Address::repeat_byte(0xe0)
}

pub(crate) fn executor_wallet() -> Address {
    Address::repeat_byte(0xe1)
}

pub(crate) fn test_config() -> ExecutorManagerConfig {
    ExecutorManagerConfig {
        entry_points: vec![entry_point()],
        polling_interval: Duration::from_millis(10),
        bundle_mode: BundlingMode::Manual,
        bundler_frequency: Duration::from_millis(100),
        max_gas_limit_per_bundle: 10_000_000,
        aa95_resubmit_multiplier: 125,
        rpc_max_block_range: None,
    }
}

/// Every collaborator mocked, with no expectations set.
pub(crate) struct Mocks {
    pub(crate) chain: MockChainClient,
    pub(crate) mempool: MockMempool,
    pub(crate) executor: MockBundleExecutor,
    pub(crate) gas_oracle: MockGasPriceOracle,
    pub(crate) reputation: MockReputationManager,
    pub(crate) monitor: MockMonitor,
    pub(crate) events: MockEventManager,
}

impl Mocks {
    pub(crate) fn new() -> Self {
        Self {
            chain: MockChainClient::new(),
            mempool: MockMempool::new(),
            executor: MockBundleExecutor::new(),
            gas_oracle: MockGasPriceOracle::new(),
            reputation: MockReputationManager::new(),
            monitor: MockMonitor::new(),
            events: MockEventManager::new(),
        }
    }
}

pub(crate) fn manager(
    config: ExecutorManagerConfig,
    mocks: Mocks,
    metrics: ExecutorMetrics,
) -> ExecutorManager {
    ExecutorManager::new(
        config,
        Arc::new(mocks.chain),
        Arc::new(mocks.mempool),
        Arc::new(mocks.executor),
        Arc::new(mocks.gas_oracle),
        Arc::new(mocks.reputation),
        Arc::new(mocks.monitor),
        Arc::new(mocks.events),
        metrics,
    )
}

pub(crate) fn user_operation() -> UserOperation {
    UserOperation {
        sender: Address::repeat_byte(0x0a),
        nonce: U256::ZERO,
        init_code: Bytes::new(),
        call_data: Bytes::new(),
        call_gas_limit: U256::from(100_000u64),
        verification_gas_limit: U256::from(100_000u64),
        pre_verification_gas: U256::from(50_000u64),
        max_fee_per_gas: U256::from(10u64),
        max_priority_fee_per_gas: U256::from(1u64),
        paymaster_and_data: Bytes::new(),
        signature: Bytes::new(),
    }
}

pub(crate) fn op_info(byte: u8) -> UserOperationInfo {
    UserOperationInfo {
        user_operation: user_operation(),
        hash: B256::repeat_byte(byte),
        entry_point: entry_point(),
        first_submitted: now_ms(),
        is_compressed: false,
    }
}

pub(crate) fn request(gas: u64, nonce: u64, max_fee: u128, max_priority: u128) -> TransactionRequest {
    TransactionRequest {
        from: executor_wallet(),
        to: entry_point(),
        gas,
        nonce,
        max_fee_per_gas: max_fee,
        max_priority_fee_per_gas: max_priority,
        data: Bytes::new(),
    }
}

pub(crate) fn tx_info(hash_byte: u8, ops: Vec<UserOperationInfo>) -> Arc<TransactionInfo> {
    Arc::new(TransactionInfo::new(
        B256::repeat_byte(hash_byte),
        request(1_000_000, 0, 10, 1),
        ops,
        executor_wallet(),
        true,
    ))
}

pub(crate) fn submitted(
    op: &UserOperationInfo,
    tx: &Arc<TransactionInfo>,
) -> SubmittedUserOperation {
    SubmittedUserOperation {
        user_operation: op.clone(),
        transaction_info: Arc::clone(tx),
    }
}

/// A block stream that never yields; keeps the watcher alive.
pub(crate) fn pending_block_stream() -> BlockStream {
    futures::stream::pending().boxed()
}

/// Block numbers followed by silence.
pub(crate) fn block_number_stream(numbers: Vec<u64>) -> BlockNumberStream {
    futures::stream::iter(numbers.into_iter().map(Ok))
        .chain(futures::stream::pending())
        .boxed()
}

/// Block numbers driven by the test through a channel.
pub(crate) fn channelled_block_numbers(
    receiver: tokio::sync::mpsc::UnboundedReceiver<u64>,
) -> BlockNumberStream {
    futures::stream::unfold(receiver, |mut receiver| async move {
        receiver.recv().await.map(|number| (Ok(number), receiver))
    })
    .boxed()
}

pub(crate) fn bundle_tx_hash() -> B256 {
    B256::repeat_byte(0xcc)
}

/// A fully attributed RPC log inside the bundle transaction.
pub(crate) fn rpc_log(address: Address, data: LogData, log_index: u64) -> Log {
    Log {
        inner: alloy::primitives::Log { address, data },
        block_hash: Some(B256::repeat_byte(0xbb)),
        block_number: Some(100),
        block_timestamp: None,
        transaction_hash: Some(bundle_tx_hash()),
        transaction_index: Some(1),
        log_index: Some(log_index),
        removed: false,
    }
}

pub(crate) fn user_op_event_log(
    op_hash: B256,
    paymaster: Address,
    success: bool,
    log_index: u64,
) -> Log {
    let event = UserOperationEvent {
        userOpHash: op_hash,
        sender: Address::repeat_byte(0x0a),
        paymaster,
        nonce: U256::from(7u64),
        success,
        actualGasCost: U256::from(120_000u64),
        actualGasUsed: U256::from(90_000u64),
    };
    rpc_log(entry_point(), event.encode_log_data(), log_index)
}

pub(crate) fn revert_reason_log(op_hash: B256, reason: &'static [u8], log_index: u64) -> Log {
    let event = UserOperationRevertReason {
        userOpHash: op_hash,
        sender: Address::repeat_byte(0x0a),
        nonce: U256::from(7u64),
        revertReason: Bytes::from_static(reason),
    };
    rpc_log(entry_point(), event.encode_log_data(), log_index)
}

/// Some third-party log emitted during op execution.
pub(crate) fn application_log(log_index: u64) -> Log {
    rpc_log(
        Address::repeat_byte(0x33),
        LogData::new_unchecked(vec![B256::repeat_byte(0x44)], Bytes::from_static(&[0xde, 0xad])),
        log_index,
    )
}

pub(crate) fn receipt_data(logs: Vec<Log>) -> TransactionReceiptData {
    TransactionReceiptData {
        transaction_hash: bundle_tx_hash(),
        transaction_index: Some(1),
        block_hash: Some(B256::repeat_byte(0xbb)),
        block_number: Some(100),
        from: executor_wallet(),
        to: Some(entry_point()),
        cumulative_gas_used: 1_000_000,
        gas_used: 500_000,
        effective_gas_price: Some(42),
        contract_address: None,
        success: true,
        logs_bloom: Default::default(),
        logs,
    }
}
