//! Configuration store (`Config.plist`).

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use super::decode_plist;
use crate::error::{Error, Result};

/// Default location of the Caching Server configuration store.
pub const CONFIG_PLIST_PATH: &str = "/Library/Server/Caching/Config/Config.plist";

/// Bytes cached per content category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SavedCacheDetails {
    #[serde(rename = "iOS Software")]
    pub ios_software: i64,
    #[serde(rename = "Mac Software")]
    pub mac_software: i64,
    #[serde(rename = "iCloud")]
    pub icloud: i64,
    #[serde(rename = "Books")]
    pub books: i64,
    #[serde(rename = "iTunes U")]
    pub itunes_u: i64,
    #[serde(rename = "Movies")]
    pub movies: i64,
    #[serde(rename = "Music")]
    pub music: i64,
    #[serde(rename = "Other")]
    pub other: i64,
}

impl SavedCacheDetails {
    /// Every category with its value, labelled the way the store names it.
    pub fn categories(&self) -> [(&'static str, i64); 8] {
        [
            ("iOS Software", self.ios_software),
            ("Mac Software", self.mac_software),
            ("iCloud", self.icloud),
            ("Books", self.books),
            ("iTunes U", self.itunes_u),
            ("Movies", self.movies),
            ("Music", self.music),
            ("Other", self.other),
        ]
    }
}

/// Fields of `Config.plist` the exporter publishes. Missing keys read as 0.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ConfigState {
    pub last_reg_or_flush: Option<plist::Date>,
    pub saved_cache_size: i64,
    pub reserved_volume_space: i64,
    pub saved_cache_details: SavedCacheDetails,
}

impl ConfigState {
    /// Time of the last registration or cache flush, if recorded.
    pub fn last_refresh(&self) -> Option<DateTime<Utc>> {
        self.last_reg_or_flush
            .map(|date| DateTime::<Utc>::from(std::time::SystemTime::from(date)))
    }
}

/// Reads [`ConfigState`] from a fixed path. No retries: the poller tries
/// again on its next tick.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    path: PathBuf,
}

impl ConfigSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn read(&self) -> Result<ConfigState> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|source| Error::SourceRead {
                path: self.path.clone(),
                source,
            })?;
        let state: ConfigState = decode_plist(&self.path, &bytes)?;
        debug!(
            path = %self.path.display(),
            saved_cache_size = state.saved_cache_size,
            last_refresh = ?state.last_refresh(),
            "Read configuration store"
        );
        Ok(state)
    }
}

impl Default for ConfigSource {
    fn default() -> Self {
        Self::new(CONFIG_PLIST_PATH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>LastRegOrFlush</key>
    <date>2018-03-04T05:06:07Z</date>
    <key>SavedCacheSize</key>
    <integer>1000</integer>
    <key>ReservedVolumeSpace</key>
    <integer>200</integer>
    <key>CacheLimit</key>
    <integer>0</integer>
    <key>SavedCacheDetails</key>
    <dict>
        <key>Books</key>
        <integer>50</integer>
        <key>iOS Software</key>
        <integer>300</integer>
        <key>iTunes U</key>
        <integer>7</integer>
    </dict>
</dict>
</plist>
"#;

    #[tokio::test]
    async fn test_read_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Config.plist");
        std::fs::write(&path, CONFIG).unwrap();

        let state = ConfigSource::new(&path).read().await.unwrap();
        assert_eq!(state.saved_cache_size, 1000);
        assert_eq!(state.reserved_volume_space, 200);
        assert_eq!(state.saved_cache_details.books, 50);
        assert_eq!(state.saved_cache_details.ios_software, 300);
        assert_eq!(state.saved_cache_details.itunes_u, 7);
        assert_eq!(state.saved_cache_details.music, 0);
        assert_eq!(
            state.last_refresh().unwrap().to_rfc3339(),
            "2018-03-04T05:06:07+00:00"
        );
    }

    #[tokio::test]
    async fn test_missing_fields_default_to_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Config.plist");
        std::fs::write(
            &path,
            r#"<?xml version="1.0" encoding="UTF-8"?>
<plist version="1.0"><dict></dict></plist>"#,
        )
        .unwrap();

        let state = ConfigSource::new(&path).read().await.unwrap();
        assert_eq!(state, ConfigState::default());
        assert!(state.last_refresh().is_none());
    }

    #[tokio::test]
    async fn test_read_errors() {
        let dir = tempfile::tempdir().unwrap();

        let missing = ConfigSource::new(dir.path().join("missing.plist"));
        assert!(matches!(
            missing.read().await,
            Err(Error::SourceRead { .. })
        ));

        let garbage = dir.path().join("garbage.plist");
        std::fs::write(&garbage, "definitely not a plist").unwrap();
        assert!(matches!(
            ConfigSource::new(&garbage).read().await,
            Err(Error::Plist { .. })
        ));
    }

    #[test]
    fn test_categories_cover_all_labels() {
        let details = SavedCacheDetails {
            movies: 4,
            ..Default::default()
        };
        let categories = details.categories();
        assert_eq!(categories.len(), 8);
        assert!(categories.contains(&("Movies", 4)));
        assert!(categories.contains(&("iTunes U", 0)));
    }
}
