//! Prometheus exporter for the macOS Caching Server.
//!
//! Two metric families are served from one `/metrics` endpoint:
//!
//! - fixed series refreshed by the [`poller`] from the Caching Server's
//!   configuration and live-status stores, and
//! - dynamic series extracted from tailed log files by the `logmetrics`
//!   engine and converted on every scrape by [`metrics::MetricsBridge`].

pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod poller;
pub mod sources;

pub use error::{Error, Result};
