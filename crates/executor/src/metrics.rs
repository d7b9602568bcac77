//! Prometheus metrics for the executor manager.

use prometheus::{
    register_histogram_with_registry, register_int_counter_vec_with_registry,
    register_int_counter_with_registry, Histogram, IntCounter, IntCounterVec, Registry,
};

/// Inclusion latency buckets, in seconds.
const INCLUSION_DURATION_SEC_BUCKETS: &[f64] =
    &[0.5, 1., 2.5, 5., 10., 20., 30., 60., 120., 300., 600.];

/// Metrics emitted by [`ExecutorManager`](crate::ExecutorManager).
///
/// Cheap to clone; clones share the underlying collectors.
#[derive(Clone, Debug)]
pub struct ExecutorMetrics {
    /// Bundles handed to the executor, by outcome.
    pub bundles_submitted: IntCounterVec,
    /// User operations handed to the executor, by outcome.
    pub user_operations_submitted: IntCounterVec,
    /// User operations returned to the mempool for another attempt.
    pub user_operations_resubmitted: IntCounter,
    /// User operations whose bundle reached the chain, by outcome.
    pub user_operations_on_chain: IntCounterVec,
    /// Seconds from first submission to on-chain inclusion.
    pub user_operation_inclusion_duration: Histogram,
    /// Replacement attempts, by trigger and outcome.
    pub replaced_transactions: IntCounterVec,
}

impl ExecutorMetrics {
    /// Register the executor metrics with `registry`.
    pub fn new(registry: &Registry) -> Self {
        Self {
            bundles_submitted: register_int_counter_vec_with_registry!(
                "bundles_submitted",
                "Number of bundles handed to the executor, by outcome",
                &["status"],
                registry
            )
            .unwrap(),
            user_operations_submitted: register_int_counter_vec_with_registry!(
                "user_operations_submitted",
                "Number of user operations handed to the executor, by outcome",
                &["status"],
                registry
            )
            .unwrap(),
            user_operations_resubmitted: register_int_counter_with_registry!(
                "user_operations_resubmitted",
                "Number of user operations returned to the mempool for another attempt",
                registry
            )
            .unwrap(),
            user_operations_on_chain: register_int_counter_vec_with_registry!(
                "user_operations_on_chain",
                "Number of user operations whose bundle reached the chain, by outcome",
                &["status"],
                registry
            )
            .unwrap(),
            user_operation_inclusion_duration: register_histogram_with_registry!(
                "user_operation_inclusion_duration",
                "Seconds from first submission to on-chain inclusion",
                INCLUSION_DURATION_SEC_BUCKETS.to_vec(),
                registry
            )
            .unwrap(),
            replaced_transactions: register_int_counter_vec_with_registry!(
                "replaced_transactions",
                "Number of replacement attempts, by trigger and outcome",
                &["reason", "status"],
                registry
            )
            .unwrap(),
        }
    }
}

impl Default for ExecutorMetrics {
    fn default() -> Self {
        Self::new(&Registry::new())
    }
}
