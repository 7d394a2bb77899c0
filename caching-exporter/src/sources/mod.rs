//! Caching Server state sources.
//!
//! - [`ConfigSource`] decodes the static configuration store (`Config.plist`).
//! - [`LiveStateSource`] refreshes and decodes the live-status store
//!   (`LastState.plist`), which only exists while the service runs.

mod config_state;
mod live_state;

pub use config_state::{CONFIG_PLIST_PATH, ConfigSource, ConfigState, SavedCacheDetails};
pub use live_state::{
    DEFAULT_STATUS_TIMEOUT, LAST_STATE_PLIST_PATH, LiveState, LiveStateSource, SERVERADMIN_PATH,
    STATUS_ARGS, StatusCommand,
};

use std::path::Path;

use serde::de::DeserializeOwned;

use crate::error::{Error, Result};

/// Decode a plist document read from `path`.
fn decode_plist<T: DeserializeOwned>(path: &Path, bytes: &[u8]) -> Result<T> {
    plist::from_bytes(bytes).map_err(|source| Error::Plist {
        path: path.to_path_buf(),
        source,
    })
}
