//! The executor manager: bundling loop, mode controller, block subscription,
//! and the per-block tick driving status refresh and replacements.

use crate::{
    config::{BundlingMode, ExecutorManagerConfig},
    error::ExecutorManagerError,
    metrics::ExecutorMetrics,
};
use alloy::primitives::{Address, TxHash, B256};
use bundler_types::{
    aa_error_code, now_ms, BundleExecutor, BundleResult, ChainClient, EventManager,
    GasPriceEstimate, GasPriceOracle, Mempool, Monitor, OperationStatus, ReputationManager,
    UserOperationInfo,
};
use futures::{future::join_all, StreamExt};
use parking_lot::Mutex;
use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Gas cap for each batch pulled during an auto-mode tick.
///
/// Manually triggered bundles use the configured `max_gas_limit_per_bundle`
/// instead.
const BUNDLE_GAS_CAP: u64 = 5_000_000;

/// How long a broadcast may sit unmined before it is replaced as stuck.
pub(crate) const STUCK_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Drives bundling and tracks every broadcast until a terminal transition.
///
/// Cheap to clone; clones share the same manager. Long-lived activities (the
/// auto-mode timer, the block watcher, frontrun watchers) run as spawned
/// tasks holding a clone.
#[derive(Clone)]
pub struct ExecutorManager {
    pub(crate) inner: Arc<ManagerInner>,
}

pub(crate) struct ManagerInner {
    pub(crate) config: ExecutorManagerConfig,
    pub(crate) chain: Arc<dyn ChainClient>,
    pub(crate) mempool: Arc<dyn Mempool>,
    pub(crate) executor: Arc<dyn BundleExecutor>,
    pub(crate) gas_oracle: Arc<dyn GasPriceOracle>,
    pub(crate) reputation: Arc<dyn ReputationManager>,
    pub(crate) monitor: Arc<dyn Monitor>,
    pub(crate) events: Arc<dyn EventManager>,
    pub(crate) metrics: ExecutorMetrics,
    /// Bundling mode and the timer task backing auto mode.
    ///
    /// Invariant: the timer is live iff the mode is [`BundlingMode::Auto`].
    pub(crate) mode: Mutex<ModeState>,
    /// The live block-watcher task, if any.
    pub(crate) block_watcher: Mutex<Option<JoinHandle<()>>>,
    /// Coalesces overlapping block notifications into one tick.
    pub(crate) currently_handling_block: AtomicBool,
    /// Op hashes with a live frontrun watcher.
    pub(crate) frontrun_watchers: Mutex<HashSet<B256>>,
}

pub(crate) struct ModeState {
    pub(crate) mode: BundlingMode,
    pub(crate) timer: Option<JoinHandle<()>>,
}

impl ExecutorManager {
    /// Create the manager and, when configured for auto mode, start the
    /// bundling timer.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ExecutorManagerConfig,
        chain: Arc<dyn ChainClient>,
        mempool: Arc<dyn Mempool>,
        executor: Arc<dyn BundleExecutor>,
        gas_oracle: Arc<dyn GasPriceOracle>,
        reputation: Arc<dyn ReputationManager>,
        monitor: Arc<dyn Monitor>,
        events: Arc<dyn EventManager>,
        metrics: ExecutorMetrics,
    ) -> Self {
        let bundle_mode = config.bundle_mode;
        let manager = Self {
            inner: Arc::new(ManagerInner {
                config,
                chain,
                mempool,
                executor,
                gas_oracle,
                reputation,
                monitor,
                events,
                metrics,
                mode: Mutex::new(ModeState { mode: BundlingMode::Manual, timer: None }),
                block_watcher: Mutex::new(None),
                currently_handling_block: AtomicBool::new(false),
                frontrun_watchers: Mutex::new(HashSet::new()),
            }),
        };

        if bundle_mode == BundlingMode::Auto {
            let mut mode = manager.inner.mode.lock();
            mode.mode = BundlingMode::Auto;
            mode.timer = Some(manager.spawn_bundle_timer());
        }

        manager
    }

    /// Switch between periodic auto-bundling and manual triggering.
    ///
    /// Idempotent when the mode already matches. Switching away from auto
    /// joins the cancelled timer before returning.
    pub async fn set_bundling_mode(&self, new_mode: BundlingMode) {
        let cancelled = {
            let mut mode = self.inner.mode.lock();
            if mode.mode == new_mode {
                return;
            }
            mode.mode = new_mode;
            match new_mode {
                BundlingMode::Manual => mode.timer.take(),
                BundlingMode::Auto => {
                    mode.timer = Some(self.spawn_bundle_timer());
                    None
                }
            }
        };

        if let Some(timer) = cancelled {
            timer.abort();
            let _ = timer.await;
        }
        info!(target: "executor::manager", mode = ?new_mode, "switched bundling mode");
    }

    /// The current bundling mode.
    pub fn bundling_mode(&self) -> BundlingMode {
        self.inner.mode.lock().mode
    }

    /// Stop the bundling timer and the block watcher.
    ///
    /// In-flight executor dispatches run to completion; frontrun watchers
    /// drain on their own.
    pub async fn shutdown(&self) {
        let timer = {
            let mut mode = self.inner.mode.lock();
            mode.mode = BundlingMode::Manual;
            mode.timer.take()
        };
        if let Some(timer) = timer {
            timer.abort();
            let _ = timer.await;
        }
        self.stop_watching_blocks();
    }

    fn spawn_bundle_timer(&self) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(manager.inner.config.bundler_frequency);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                // a tick cannot start while the previous one is in flight
                interval.tick().await;
                manager.bundle().await;
            }
        })
    }

    /// One bundling tick: drain the mempool and dispatch every batch.
    ///
    /// Each batch the mempool returns is an independent bundle; all batches
    /// of the tick dispatch in parallel.
    pub(crate) async fn bundle(&self) {
        let mut batches = Vec::new();
        loop {
            match self.inner.mempool.process(BUNDLE_GAS_CAP, 1).await {
                Ok(ops) if ops.is_empty() => break,
                Ok(ops) => batches.push(ops),
                Err(err) => {
                    warn!(target: "executor::manager", ?err, "failed to pull ops from mempool");
                    break;
                }
            }
        }
        if batches.is_empty() {
            return;
        }

        join_all(batches.into_iter().map(|ops| self.bundle_batch(ops))).await;
    }

    /// Partition one batch by entry point and dispatch each partition.
    async fn bundle_batch(&self, ops: Vec<UserOperationInfo>) {
        let mut by_entry_point = group_by_entry_point(ops);

        let mut dispatches = Vec::new();
        for entry_point in &self.inner.config.entry_points {
            match by_entry_point.remove(entry_point) {
                Some(ops) => dispatches.push(self.send_to_executor(*entry_point, ops)),
                None => {
                    warn!(target: "executor::manager", %entry_point, "no ops for entry point")
                }
            }
        }
        for (entry_point, ops) in by_entry_point {
            warn!(
                target: "executor::manager",
                %entry_point,
                ops = ops.len(),
                "dropping ops for unconfigured entry point",
            );
        }

        for result in join_all(dispatches).await {
            if let Err(err) = result {
                warn!(target: "executor::manager", ?err, "bundle dispatch failed");
            }
        }
    }

    /// One-shot bundling trigger for manual mode.
    ///
    /// Returns the hashes of every broadcast transaction. Fails when the
    /// mempool has nothing to offer, or when any entry point yields no
    /// transaction hash.
    pub async fn bundle_now(&self) -> Result<Vec<TxHash>, ExecutorManagerError> {
        let ops = self
            .inner
            .mempool
            .process(self.inner.config.max_gas_limit_per_bundle, 1)
            .await?;
        if ops.is_empty() {
            return Err(ExecutorManagerError::NoOpsToBundle);
        }

        let mut transaction_hashes = Vec::new();
        for (entry_point, ops) in group_by_entry_point(ops) {
            let hashes = self.send_to_executor(entry_point, ops).await?;
            if hashes.is_empty() {
                return Err(ExecutorManagerError::NoTransactionHash);
            }
            transaction_hashes.extend(hashes);
        }
        Ok(transaction_hashes)
    }

    /// Dispatch ops for one entry point, splitting the compressed and
    /// uncompressed paths, and record every per-op outcome.
    pub(crate) async fn send_to_executor(
        &self,
        entry_point: Address,
        ops: Vec<UserOperationInfo>,
    ) -> Result<Vec<TxHash>, ExecutorManagerError> {
        let op_count = ops.len();
        let (compressed, uncompressed): (Vec<_>, Vec<_>) =
            ops.into_iter().partition(|op| op.is_compressed);

        let mut results = Vec::with_capacity(op_count);
        if !uncompressed.is_empty() {
            let bundle = self.inner.executor.bundle(entry_point, uncompressed).await?;
            self.record_bundle_submitted(&bundle);
            results.extend(bundle);
        }
        if !compressed.is_empty() {
            let bundle = self.inner.executor.bundle_compressed(entry_point, compressed).await?;
            self.record_bundle_submitted(&bundle);
            results.extend(bundle);
        }

        if results.len() < op_count {
            let filtered = (op_count - results.len()) as u64;
            self.inner
                .metrics
                .user_operations_submitted
                .with_label_values(&["filtered"])
                .inc_by(filtered);
            info!(target: "executor::manager", filtered, %entry_point, "ops filtered during bundling");
        }

        let mut transaction_hashes = Vec::new();
        for result in results {
            match result {
                BundleResult::Success { user_operation, transaction_info } => {
                    let transaction_hash = transaction_info.transaction_hash;
                    self.inner
                        .mempool
                        .mark_submitted(user_operation.hash, Arc::clone(&transaction_info))
                        .await?;
                    self.inner.monitor.set_user_operation_status(
                        user_operation.hash,
                        OperationStatus::Submitted,
                        Some(transaction_hash),
                    );
                    self.start_watching_blocks();
                    self.inner
                        .metrics
                        .user_operations_submitted
                        .with_label_values(&["success"])
                        .inc();
                    debug!(
                        target: "executor::manager",
                        op = %user_operation.hash,
                        tx = %transaction_hash,
                        "user operation submitted",
                    );
                    transaction_hashes.push(transaction_hash);
                }
                BundleResult::Failure { user_op_hash, reason, .. } => {
                    self.inner.mempool.remove_processing(user_op_hash).await?;
                    let aa_code = aa_error_code(&reason).map(str::to_owned);
                    self.inner.events.emit_dropped(user_op_hash, &reason, aa_code).await;
                    self.inner.monitor.set_user_operation_status(
                        user_op_hash,
                        OperationStatus::Rejected,
                        None,
                    );
                    warn!(
                        target: "executor::manager",
                        op = %user_op_hash,
                        %reason,
                        "user operation rejected by executor",
                    );
                    self.inner
                        .metrics
                        .user_operations_submitted
                        .with_label_values(&["failed"])
                        .inc();
                }
                BundleResult::Resubmit { user_op_hash, user_operation, entry_point, reason } => {
                    debug!(
                        target: "executor::manager",
                        op = %user_op_hash,
                        %reason,
                        "returning user operation to the mempool",
                    );
                    self.inner.mempool.remove_processing(user_op_hash).await?;
                    self.inner.mempool.add(user_operation, entry_point).await?;
                    self.inner.metrics.user_operations_resubmitted.inc();
                }
            }
        }
        Ok(transaction_hashes)
    }

    fn record_bundle_submitted(&self, results: &[BundleResult]) {
        let status = if results.iter().all(|result| matches!(result, BundleResult::Success { .. }))
        {
            "success"
        } else {
            "failed"
        };
        self.inner.metrics.bundles_submitted.with_label_values(&[status]).inc();
    }

    /// Subscribe to new blocks. No-op while a watcher is live.
    ///
    /// Subscription errors are logged and left to the transport's retry
    /// policy; they never tear the watcher down.
    pub fn start_watching_blocks(&self) {
        let mut watcher = self.inner.block_watcher.lock();
        if watcher.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let manager = self.clone();
        *watcher = Some(tokio::spawn(async move {
            let polling_interval = manager.inner.config.polling_interval;
            let mut blocks = match manager.inner.chain.watch_blocks(polling_interval).await {
                Ok(stream) => stream,
                Err(err) => {
                    error!(target: "executor::manager", ?err, "failed to subscribe to blocks");
                    return;
                }
            };
            while let Some(notification) = blocks.next().await {
                match notification {
                    Ok(block) => {
                        debug!(target: "executor::manager", number = block.number, "new block");
                        manager.handle_block().await;
                    }
                    Err(err) => {
                        warn!(target: "executor::manager", ?err, "block subscription error")
                    }
                }
            }
        }));
    }

    /// Tear down the block watcher, if any. Dropping the stream
    /// unsubscribes.
    pub fn stop_watching_blocks(&self) {
        if let Some(handle) = self.inner.block_watcher.lock().take() {
            handle.abort();
        }
    }

    /// Whether a block watcher is currently live.
    pub fn is_watching_blocks(&self) -> bool {
        self.inner
            .block_watcher
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// One per-block tick: refresh every tracked transaction, then drive
    /// replacement decisions for whatever is still pending.
    ///
    /// Overlapping notifications coalesce: a tick already in flight makes
    /// this a no-op. Missed notifications are harmless since every tick
    /// re-reads authoritative mempool state. No error escapes the tick.
    pub(crate) async fn handle_block(&self) {
        if self.inner.currently_handling_block.swap(true, Ordering::AcqRel) {
            return;
        }
        // release the guard on every exit path, including cancellation
        let inner = Arc::clone(&self.inner);
        let _flag = scopeguard::guard((), move |()| {
            inner.currently_handling_block.store(false, Ordering::Release);
        });

        let submitted = match self.inner.mempool.dump_submitted_ops().await {
            Ok(submitted) => submitted,
            Err(err) => {
                warn!(target: "executor::manager", ?err, "failed to read submitted ops");
                return;
            }
        };
        if submitted.is_empty() {
            // reopened on the next successful submission
            self.stop_watching_blocks();
            return;
        }

        // refresh every distinct transaction across all entry points
        let mut refreshes = Vec::new();
        for entry_point in &self.inner.config.entry_points {
            let mut seen = HashSet::new();
            for submitted_op in
                submitted.iter().filter(|op| op.user_operation.entry_point == *entry_point)
            {
                if seen.insert(submitted_op.transaction_info.transaction_hash) {
                    refreshes.push(self.refresh_transaction_status(
                        *entry_point,
                        Arc::clone(&submitted_op.transaction_info),
                    ));
                }
            }
        }
        for result in join_all(refreshes).await {
            if let Err(err) = result {
                warn!(target: "executor::status", ?err, "failed to refresh transaction status");
            }
        }

        match self.inner.gas_oracle.get_gas_price().await {
            Ok(gas_price) => {
                if let Err(err) = self.replace_underpriced(&gas_price).await {
                    warn!(target: "executor::manager", ?err, "gas price replacement pass failed");
                }
            }
            Err(err) => {
                warn!(
                    target: "executor::manager",
                    ?err,
                    "failed to read gas price, skipping gas price replacements",
                );
            }
        }

        if let Err(err) = self.replace_stuck().await {
            warn!(target: "executor::manager", ?err, "stuck replacement pass failed");
        }
    }

    /// Replace every tracked transaction priced below the oracle's current
    /// estimate.
    ///
    /// A transaction qualifies when either fee field is strictly below the
    /// oracle value; matching fees do not trigger a replacement.
    async fn replace_underpriced(&self, gas_price: &GasPriceEstimate) -> eyre::Result<()> {
        let submitted = self.inner.mempool.dump_submitted_ops().await?;
        let mut seen = HashSet::new();
        for submitted_op in submitted {
            let tx_info = submitted_op.transaction_info;
            if !seen.insert(tx_info.transaction_hash) {
                continue;
            }
            let underpriced = {
                let request = tx_info.transaction_request.lock();
                request.max_fee_per_gas < gas_price.max_fee_per_gas
                    || request.max_priority_fee_per_gas < gas_price.max_priority_fee_per_gas
            };
            if underpriced {
                debug!(
                    target: "executor::manager",
                    tx = %tx_info.transaction_hash,
                    "transaction underpriced against oracle",
                );
                self.replace_transaction(tx_info, "gas_price").await;
            }
        }
        Ok(())
    }

    /// Replace every tracked transaction unmined for longer than
    /// [`STUCK_TIMEOUT`].
    async fn replace_stuck(&self) -> eyre::Result<()> {
        let submitted = self.inner.mempool.dump_submitted_ops().await?;
        let now = now_ms();
        let mut seen = HashSet::new();
        for submitted_op in submitted {
            let tx_info = submitted_op.transaction_info;
            if !seen.insert(tx_info.transaction_hash) {
                continue;
            }
            if now.saturating_sub(tx_info.last_replaced) >= STUCK_TIMEOUT.as_millis() as u64 {
                warn!(
                    target: "executor::manager",
                    tx = %tx_info.transaction_hash,
                    "transaction stuck, replacing",
                );
                self.replace_transaction(tx_info, "stuck").await;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for ExecutorManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorManager")
            .field("config", &self.inner.config)
            .field("mode", &self.inner.mode.lock().mode)
            .finish_non_exhaustive()
    }
}

fn group_by_entry_point(
    ops: Vec<UserOperationInfo>,
) -> HashMap<Address, Vec<UserOperationInfo>> {
    let mut by_entry_point: HashMap<Address, Vec<UserOperationInfo>> = HashMap::new();
    for op in ops {
        by_entry_point.entry(op.entry_point).or_default().push(op);
    }
    by_entry_point
}
