//! The replacement policy: what happens after asking the executor to
//! replace a tracked transaction.

use crate::manager::ExecutorManager;
use bundler_types::{ReplaceResult, TransactionInfo};
use std::{
    collections::HashSet,
    sync::{atomic::Ordering, Arc},
};
use tracing::{debug, warn};

impl ExecutorManager {
    /// Ask the executor to replace `tx_info` and reconcile the mempool with
    /// the outcome.
    ///
    /// `reason` labels the trigger (`"gas_price"`, `"stuck"`, `"AA95"`) for
    /// the replacement metric. Failures are terminal for the op set; a
    /// potentially-already-included transaction stays under observation
    /// until the bound of
    /// [`TransactionInfo::POTENTIALLY_INCLUDED_LIMIT`] is hit.
    pub(crate) async fn replace_transaction(&self, tx_info: Arc<TransactionInfo>, reason: &str) {
        let result = self.inner.executor.replace_transaction(Arc::clone(&tx_info)).await;

        let status = match &result {
            Ok(ReplaceResult::Failed) | Err(_) => "failed",
            Ok(ReplaceResult::PotentiallyAlreadyIncluded) => "potentially_already_included",
            Ok(ReplaceResult::Replaced { .. }) => "replaced",
        };
        self.inner.metrics.replaced_transactions.with_label_values(&[reason, status]).inc();

        match result {
            Err(err) => {
                warn!(
                    target: "executor::replace",
                    tx = %tx_info.transaction_hash,
                    reason,
                    ?err,
                    "transaction replacement errored",
                );
                self.abandon_ops(&tx_info).await;
            }
            Ok(ReplaceResult::Failed) => {
                warn!(
                    target: "executor::replace",
                    tx = %tx_info.transaction_hash,
                    reason,
                    "failed to replace transaction",
                );
                self.abandon_ops(&tx_info).await;
            }
            Ok(ReplaceResult::PotentiallyAlreadyIncluded) => {
                let occurrences =
                    tx_info.times_potentially_included.fetch_add(1, Ordering::AcqRel) + 1;
                if occurrences >= TransactionInfo::POTENTIALLY_INCLUDED_LIMIT {
                    warn!(
                        target: "executor::replace",
                        tx = %tx_info.transaction_hash,
                        occurrences,
                        "giving up on transaction that may already be included",
                    );
                    self.abandon_ops(&tx_info).await;
                    if let Err(err) =
                        self.inner.executor.mark_wallet_processed(tx_info.executor).await
                    {
                        warn!(target: "executor::replace", ?err, "failed to release executor wallet");
                    }
                } else {
                    debug!(
                        target: "executor::replace",
                        tx = %tx_info.transaction_hash,
                        occurrences,
                        "transaction potentially already included, keeping under observation",
                    );
                }
            }
            Ok(ReplaceResult::Replaced { transaction_info: new_tx_info }) => {
                let replacement_hashes: HashSet<_> = new_tx_info.op_hashes().collect();
                for op in &tx_info.user_operation_infos {
                    if replacement_hashes.contains(&op.hash) {
                        if let Err(err) = self
                            .inner
                            .mempool
                            .replace_submitted(op.clone(), Arc::clone(&new_tx_info))
                            .await
                        {
                            warn!(
                                target: "executor::replace",
                                op = %op.hash,
                                ?err,
                                "failed to re-bind op to replacement transaction",
                            );
                        }
                    } else {
                        if let Err(err) = self.inner.mempool.remove_submitted(op.hash).await {
                            warn!(
                                target: "executor::replace",
                                op = %op.hash,
                                ?err,
                                "failed to remove op dropped by replacement",
                            );
                        }
                        warn!(
                            target: "executor::replace",
                            op = %op.hash,
                            "user operation dropped by replacement transaction",
                        );
                    }
                }
                debug!(
                    target: "executor::replace",
                    old = %tx_info.transaction_hash,
                    new = %new_tx_info.transaction_hash,
                    reason,
                    "replaced transaction",
                );
            }
        }
    }

    /// Remove every op of `tx_info` from the submitted set.
    async fn abandon_ops(&self, tx_info: &TransactionInfo) {
        for op in &tx_info.user_operation_infos {
            if let Err(err) = self.inner.mempool.remove_submitted(op.hash).await {
                warn!(
                    target: "executor::replace",
                    op = %op.hash,
                    ?err,
                    "failed to remove abandoned op",
                );
            }
        }
    }
}
