//! Periodic refresh of the configuration and live-status stores.

mod service;

pub use service::{CachingPoller, DEFAULT_POLL_INTERVAL};
