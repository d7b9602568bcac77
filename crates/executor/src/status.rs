//! Transaction status resolution and the AA25 frontrun watcher.

use crate::{error::ExecutorManagerError, manager::ExecutorManager};
use alloy::primitives::{Address, TxHash, B256};
use bundler_types::{
    now_ms, BundleStatus, OperationStatus, TransactionInfo, UserOperationDetails,
    UserOperationExecutionStatus, UserOperationInfo,
};
use futures::{future::join_all, StreamExt};
use std::{collections::HashMap, sync::Arc};
use tracing::{debug, error, info, warn};

impl ExecutorManager {
    /// Resolve the on-chain state of `tx_info` and apply the outcome.
    ///
    /// Every hash the transaction ever broadcast under is probed; an
    /// included result wins over a reverted one regardless of resolution
    /// order.
    pub(crate) async fn refresh_transaction_status(
        &self,
        entry_point: Address,
        tx_info: Arc<TransactionInfo>,
    ) -> Result<(), ExecutorManagerError> {
        let candidates = tx_info.candidate_hashes();
        let statuses = join_all(
            candidates.iter().map(|hash| self.inner.chain.get_bundle_status(entry_point, *hash)),
        )
        .await;

        let mut included = None;
        let mut reverted = None;
        for (hash, status) in candidates.iter().zip(statuses) {
            match status? {
                BundleStatus::NotFound => {}
                BundleStatus::Included { user_operation_details } => {
                    if included.is_none() {
                        included = Some((*hash, user_operation_details));
                    }
                }
                BundleStatus::Reverted { is_aa95, reason } => {
                    if reverted.is_none() {
                        reverted = Some((*hash, is_aa95, reason));
                    }
                }
            }
        }

        if let Some((transaction_hash, details)) = included {
            return self.transaction_included(entry_point, &tx_info, transaction_hash, details).await;
        }

        let Some((transaction_hash, is_aa95, reason)) = reverted else {
            for op in &tx_info.user_operation_infos {
                debug!(
                    target: "executor::status",
                    op = %op.hash,
                    tx = %tx_info.transaction_hash,
                    "user operation still pending",
                );
            }
            return Ok(());
        };

        let ops = &tx_info.user_operation_infos;
        self.inner
            .metrics
            .user_operations_on_chain
            .with_label_values(&["reverted"])
            .inc_by(ops.len() as u64);

        if is_aa95 {
            // bump gas and advance the nonce before the replacement is
            // dispatched; removing the ops first keeps concurrent refreshes
            // away from the mutated request
            {
                let mut request = tx_info.transaction_request.lock();
                request.gas = request.gas * self.inner.config.aa95_resubmit_multiplier / 100;
                request.nonce += 1;
            }
            for op in ops {
                self.inner.mempool.remove_submitted(op.hash).await?;
            }
            info!(
                target: "executor::status",
                tx = %transaction_hash,
                "bundle ran out of gas on chain, resubmitting with bumped gas",
            );
            self.replace_transaction(Arc::clone(&tx_info), "AA95").await;
            return Ok(());
        }

        if reason.as_deref().is_some_and(|reason| reason.contains("AA25")) {
            // possibly frontrun by another bundler; the watcher decides over
            // the next blocks and owns the terminal transition
            for op in ops {
                self.watch_for_frontrun(op.clone(), transaction_hash);
            }
            return Ok(());
        }

        for op in ops {
            self.inner.mempool.remove_submitted(op.hash).await?;
            self.inner.monitor.set_user_operation_status(
                op.hash,
                OperationStatus::Rejected,
                Some(transaction_hash),
            );
            self.inner.events.emit_failed_on_chain(op.hash, transaction_hash).await;
            warn!(
                target: "executor::status",
                op = %op.hash,
                tx = %transaction_hash,
                reason = reason.as_deref().unwrap_or("unknown"),
                "user operation failed on chain",
            );
        }
        self.inner.executor.mark_wallet_processed(tx_info.executor).await?;
        Ok(())
    }

    async fn transaction_included(
        &self,
        entry_point: Address,
        tx_info: &TransactionInfo,
        transaction_hash: TxHash,
        details: HashMap<B256, UserOperationDetails>,
    ) -> Result<(), ExecutorManagerError> {
        let ops = &tx_info.user_operation_infos;
        self.inner
            .metrics
            .user_operations_on_chain
            .with_label_values(&["included"])
            .inc_by(ops.len() as u64);

        for op in ops {
            let inclusion_duration = now_ms().saturating_sub(op.first_submitted) as f64 / 1000.0;
            self.inner.metrics.user_operation_inclusion_duration.observe(inclusion_duration);

            self.inner.mempool.remove_submitted(op.hash).await?;

            let detail = details.get(&op.hash);
            let account_deployed = detail.is_some_and(|detail| detail.account_deployed);
            self.inner
                .reputation
                .update_user_operation_included_status(op, entry_point, account_deployed)
                .await?;

            match detail.map(|detail| detail.status) {
                Some(UserOperationExecutionStatus::Succesful) => {
                    info!(
                        target: "executor::status",
                        op = %op.hash,
                        tx = %transaction_hash,
                        "user operation included",
                    );
                    self.inner.events.emit_included_on_chain(op.hash, transaction_hash).await;
                }
                Some(UserOperationExecutionStatus::Reverted) => {
                    let revert_reason = detail.and_then(|detail| detail.revert_reason.clone());
                    info!(
                        target: "executor::status",
                        op = %op.hash,
                        tx = %transaction_hash,
                        "user operation reverted during execution",
                    );
                    self.inner
                        .events
                        .emit_execution_reverted_on_chain(op.hash, transaction_hash, revert_reason)
                        .await;
                }
                None => {
                    warn!(
                        target: "executor::status",
                        op = %op.hash,
                        tx = %transaction_hash,
                        "included bundle is missing details for op",
                    );
                }
            }

            self.inner.monitor.set_user_operation_status(
                op.hash,
                OperationStatus::Included,
                Some(transaction_hash),
            );
        }

        self.inner.executor.mark_wallet_processed(tx_info.executor).await?;
        Ok(())
    }

    /// Watch subsequent blocks to decide whether an AA25 revert means the op
    /// was included by a competing bundler.
    ///
    /// At most one watcher runs per op hash; each fires exactly once and
    /// unsubscribes by dropping its stream.
    pub(crate) fn watch_for_frontrun(&self, op: UserOperationInfo, reverted_tx: TxHash) {
        if !self.inner.frontrun_watchers.lock().insert(op.hash) {
            return;
        }

        let manager = self.clone();
        tokio::spawn(async move {
            manager.resolve_frontrun(&op, reverted_tx).await;
            manager.inner.frontrun_watchers.lock().remove(&op.hash);
        });
    }

    async fn resolve_frontrun(&self, op: &UserOperationInfo, reverted_tx: TxHash) {
        let anchor = match self.inner.chain.get_block_number().await {
            Ok(number) => number,
            Err(err) => {
                warn!(
                    target: "executor::status",
                    op = %op.hash,
                    ?err,
                    "failed to read anchor block for frontrun check",
                );
                0
            }
        };

        let mut block_numbers = match self
            .inner
            .chain
            .watch_block_number(self.inner.config.polling_interval)
            .await
        {
            Ok(stream) => stream,
            Err(err) => {
                error!(
                    target: "executor::status",
                    op = %op.hash,
                    ?err,
                    "failed to subscribe to block numbers for frontrun check",
                );
                return;
            }
        };

        while let Some(notification) = block_numbers.next().await {
            let current = match notification {
                Ok(number) => number,
                Err(err) => {
                    warn!(target: "executor::status", ?err, "block number subscription error");
                    continue;
                }
            };
            // give the chain one block of slack before deciding
            if current <= anchor + 1 {
                continue;
            }

            match self.get_user_operation_receipt(op.hash).await {
                Ok(Some(receipt)) => {
                    let frontrun_tx = receipt.receipt.transaction_hash;
                    info!(
                        target: "executor::status",
                        op = %op.hash,
                        tx = %frontrun_tx,
                        "user operation was frontrun by another bundler",
                    );
                    if let Err(err) = self.inner.mempool.remove_submitted(op.hash).await {
                        warn!(target: "executor::status", op = %op.hash, ?err, "failed to remove frontrun op");
                    }
                    self.inner.monitor.set_user_operation_status(
                        op.hash,
                        OperationStatus::Included,
                        Some(frontrun_tx),
                    );
                    self.inner.events.emit_frontran_on_chain(op.hash, frontrun_tx).await;
                }
                Ok(None) => {
                    warn!(
                        target: "executor::status",
                        op = %op.hash,
                        tx = %reverted_tx,
                        "user operation failed on chain and was not frontrun",
                    );
                    if let Err(err) = self.inner.mempool.remove_submitted(op.hash).await {
                        warn!(target: "executor::status", op = %op.hash, ?err, "failed to remove failed op");
                    }
                    self.inner.monitor.set_user_operation_status(
                        op.hash,
                        OperationStatus::Rejected,
                        None,
                    );
                    self.inner.events.emit_failed_on_chain(op.hash, reverted_tx).await;
                }
                Err(err) => {
                    error!(
                        target: "executor::status",
                        op = %op.hash,
                        ?err,
                        "failed to look up receipt for frontrun check",
                    );
                }
            }
            // fires exactly once; dropping the stream unsubscribes
            break;
        }
    }
}
