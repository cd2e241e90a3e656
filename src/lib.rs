#![doc = include_str!("../README.md")]
#![deny(missing_docs)]

pub mod amount;
pub mod chains;
pub mod confirmation;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod model;
pub mod monitor;
pub mod pipeline;
pub mod storage;
#[cfg(feature = "testing")]
pub mod testing;
pub mod wallet_filter;

/// Package version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
