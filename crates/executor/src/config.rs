//! Executor manager configuration.

use alloy::primitives::Address;
use serde::Deserialize;
use std::time::Duration;

/// Whether bundling runs on a timer or waits for explicit triggers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BundlingMode {
    /// Bundle on a fixed frequency.
    Auto,
    /// Bundle only on [`bundle_now`](crate::ExecutorManager::bundle_now).
    Manual,
}

/// Configuration for [`ExecutorManager`](crate::ExecutorManager).
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutorManagerConfig {
    /// Entry points the manager bundles for.
    pub entry_points: Vec<Address>,
    /// Polling interval for block subscriptions.
    #[serde(default = "default_polling_interval", with = "humantime_serde")]
    pub polling_interval: Duration,
    /// Initial bundling mode.
    #[serde(default = "default_bundle_mode")]
    pub bundle_mode: BundlingMode,
    /// Tick frequency while in auto mode.
    #[serde(default = "default_bundler_frequency", with = "humantime_serde")]
    pub bundler_frequency: Duration,
    /// Gas cap for manually triggered bundles.
    #[serde(default = "default_max_gas_limit_per_bundle")]
    pub max_gas_limit_per_bundle: u64,
    /// Percent applied to a transaction's gas limit when resubmitting after
    /// an AA95 revert (125 bumps by 25%).
    #[serde(default = "default_aa95_resubmit_multiplier")]
    pub aa95_resubmit_multiplier: u64,
    /// Widest block range the RPC allows in a `getLogs` query, if limited.
    #[serde(default)]
    pub rpc_max_block_range: Option<u64>,
}

fn default_polling_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_bundle_mode() -> BundlingMode {
    BundlingMode::Auto
}

fn default_bundler_frequency() -> Duration {
    Duration::from_secs(1)
}

fn default_max_gas_limit_per_bundle() -> u64 {
    20_000_000
}

fn default_aa95_resubmit_multiplier() -> u64 {
    125
}
