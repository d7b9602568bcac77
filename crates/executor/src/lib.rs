//! The executor manager: scheduling, bundling, submission tracking, and
//! replacement for ERC-4337 user operations.
//!
//! The manager pulls processable ops from the mempool, groups them into
//! bundles per entry point, and hands them to the low-level executor for
//! broadcast. From the first successful broadcast it watches new blocks;
//! every block tick re-resolves the state of each tracked transaction and
//! drives replace-by-fee decisions for anything still pending (underpriced,
//! stuck, recoverable reverts, suspected frontruns).

#![warn(missing_debug_implementations, missing_docs, unreachable_pub, rustdoc::all)]
#![deny(unused_must_use, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

mod config;
mod error;
mod manager;
mod metrics;
mod receipt;
mod replace;
mod status;

pub use config::{BundlingMode, ExecutorManagerConfig};
pub use error::ExecutorManagerError;
pub use manager::ExecutorManager;
pub use metrics::ExecutorMetrics;

#[cfg(test)]
mod tests;
