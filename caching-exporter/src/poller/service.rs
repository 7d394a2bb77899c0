//! The dual-source poller.
//!
//! One long-lived task. Every tick it reads the configuration store, then
//! refreshes the live-status store, and publishes each into its own series.
//! A failing source only skips its own publish for that tick.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::metrics::{CONFIG_STORE, CachingMetrics, HealthRegistry, LIVE_STATE};
use crate::sources::{ConfigSource, LiveStateSource};

/// Default time between two polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

pub struct CachingPoller {
    config_source: ConfigSource,
    live_source: LiveStateSource,
    metrics: CachingMetrics,
    health: Arc<HealthRegistry>,
    interval: Duration,
}

impl CachingPoller {
    pub fn new(
        config_source: ConfigSource,
        live_source: LiveStateSource,
        metrics: CachingMetrics,
        health: Arc<HealthRegistry>,
    ) -> Self {
        Self {
            config_source,
            live_source,
            metrics,
            health,
            interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Poll until cancelled.
    ///
    /// Returns an error only when the status command cannot be launched.
    pub async fn run(&self, cancel_token: CancellationToken) -> Result<()> {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval_secs = self.interval.as_secs(),
            config = %self.config_source.path().display(),
            live_state = %self.live_source.path().display(),
            "Caching poller started"
        );

        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => {
                    info!("Caching poller stopping");
                    return Ok(());
                }
                _ = ticker.tick() => {}
            }

            if let Err(e) = self.poll_once().await {
                error!(error = %e, "Caching poller stopped on fatal error");
                return Err(e);
            }
        }
    }

    /// Refresh both sources once.
    pub async fn poll_once(&self) -> Result<()> {
        self.refresh_config().await;
        self.refresh_live().await
    }

    async fn refresh_config(&self) {
        match self.config_source.read().await {
            Ok(state) => {
                self.metrics.apply_config(&state);
                self.health.record_healthy(CONFIG_STORE);
            }
            Err(e) => {
                warn!(error = %e, "Failed to read configuration store; keeping previous values");
                self.health.record_degraded(CONFIG_STORE, e.to_string());
            }
        }
    }

    async fn refresh_live(&self) -> Result<()> {
        match self.live_source.refresh().await {
            Ok(state) => {
                debug!(active = state.active, peers = state.peers.len(), "Refreshed live status");
                self.metrics.apply_live(&state);
                self.health.record_healthy(LIVE_STATE);
                Ok(())
            }
            Err(e) if e.is_fatal() => {
                self.health.record_degraded(LIVE_STATE, e.to_string());
                Err(e)
            }
            Err(e) => {
                warn!(error = %e, "Failed to read live-status store; keeping previous values");
                self.health.record_degraded(LIVE_STATE, e.to_string());
                Ok(())
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::metrics::HealthStatus;
    use crate::sources::StatusCommand;
    use std::path::Path;

    const CONFIG: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<plist version="1.0"><dict>
    <key>SavedCacheSize</key><integer>1000</integer>
    <key>ReservedVolumeSpace</key><integer>200</integer>
    <key>SavedCacheDetails</key><dict><key>Books</key><integer>50</integer></dict>
</dict></plist>"#;

    const ACTIVE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<plist version="1.0"><dict>
    <key>Active</key><true/>
    <key>Peers</key><array><string>a</string><string>b</string></array>
    <key>TotalBytesRequested</key><integer>4096</integer>
</dict></plist>"#;

    fn poller(dir: &Path, program: &str) -> (CachingPoller, CachingMetrics, Arc<HealthRegistry>) {
        poller_with_command(dir, StatusCommand::new(program, vec![]))
    }

    fn poller_with_command(
        dir: &Path,
        command: StatusCommand,
    ) -> (CachingPoller, CachingMetrics, Arc<HealthRegistry>) {
        let metrics = CachingMetrics::new().unwrap();
        let health = Arc::new(HealthRegistry::new());
        let poller = CachingPoller::new(
            ConfigSource::new(dir.join("Config.plist")),
            LiveStateSource::new(dir.join("LastState.plist"), command),
            metrics.clone(),
            health.clone(),
        )
        .with_interval(Duration::from_millis(20));
        (poller, metrics, health)
    }

    fn value(metrics: &CachingMetrics, name: &str) -> f64 {
        let family = metrics
            .gather()
            .into_iter()
            .find(|f| f.get_name() == name)
            .unwrap();
        let sample = &family.get_metric()[0];
        if sample.has_counter() {
            sample.get_counter().get_value()
        } else {
            sample.get_gauge().get_value()
        }
    }

    #[tokio::test]
    async fn test_poll_publishes_both_sources() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Config.plist"), CONFIG).unwrap();
        std::fs::write(dir.path().join("LastState.plist"), ACTIVE).unwrap();

        let (poller, metrics, health) = poller(dir.path(), "true");
        poller.poll_once().await.unwrap();

        assert_eq!(value(&metrics, "caching_saved_cache_size"), 1000.0);
        assert_eq!(value(&metrics, "caching_reserved_volume_space"), 200.0);
        assert_eq!(value(&metrics, "caching_status_active"), 1.0);
        assert_eq!(value(&metrics, "caching_peers_total"), 2.0);
        assert_eq!(value(&metrics, "caching_bytes_requested_total"), 4096.0);
        assert!(health.snapshot().is_healthy());
    }

    #[tokio::test]
    async fn test_broken_config_does_not_stop_live_refresh() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("LastState.plist"), ACTIVE).unwrap();

        let (poller, metrics, health) = poller(dir.path(), "true");
        poller.poll_once().await.unwrap();

        assert_eq!(value(&metrics, "caching_status_active"), 1.0);
        let snapshot = health.snapshot();
        assert_eq!(snapshot.components[CONFIG_STORE].status, HealthStatus::Degraded);
        assert_eq!(snapshot.components[LIVE_STATE].status, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn test_failed_status_command_is_inactive() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Config.plist"), CONFIG).unwrap();
        std::fs::write(dir.path().join("LastState.plist"), ACTIVE).unwrap();

        let (poller, metrics, _) = poller(dir.path(), "false");
        poller.poll_once().await.unwrap();

        assert_eq!(value(&metrics, "caching_status_active"), 0.0);
        assert_eq!(value(&metrics, "caching_peers_total"), 0.0);
        assert_eq!(value(&metrics, "caching_saved_cache_size"), 1000.0);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let (poller, _, _) = poller(dir.path(), "true");
        let cancel = CancellationToken::new();

        let handle = {
            let cancel = cancel.clone();
            tokio::spawn(async move { poller.run(cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(60)).await;
        cancel.cancel();

        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_run_fails_when_command_cannot_launch() {
        let dir = tempfile::tempdir().unwrap();
        let (poller, _, health) = poller(dir.path(), "/nonexistent/serveradmin");

        let err = poller.run(CancellationToken::new()).await.unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(
            health.snapshot().components[LIVE_STATE].status,
            HealthStatus::Degraded
        );
    }

    #[tokio::test]
    async fn test_corrupt_live_store_does_not_stop_config_publish() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Config.plist"), CONFIG).unwrap();
        std::fs::write(dir.path().join("LastState.plist"), "<plist><dict><key>Active").unwrap();

        let (poller, metrics, health) = poller(dir.path(), "true");
        poller.poll_once().await.unwrap();

        assert_eq!(value(&metrics, "caching_saved_cache_size"), 1000.0);
        assert_eq!(value(&metrics, "caching_status_active"), 0.0);
        let snapshot = health.snapshot();
        assert_eq!(snapshot.components[CONFIG_STORE].status, HealthStatus::Healthy);
        assert_eq!(snapshot.components[LIVE_STATE].status, HealthStatus::Degraded);
    }

    #[tokio::test]
    async fn test_failing_sources_still_wait_for_each_tick() {
        let dir = tempfile::tempdir().unwrap();
        // No Config.plist; LastState.plist is corrupt.
        std::fs::write(dir.path().join("LastState.plist"), "not a plist").unwrap();

        // The status command records one line per poll.
        let runs = dir.path().join("runs");
        let command = StatusCommand::new(
            "sh",
            vec![
                "-c".to_string(),
                format!("echo poll >> '{}'", runs.display()),
            ],
        );
        let (poller, _, health) = poller_with_command(dir.path(), command);
        let poller = poller.with_interval(Duration::from_millis(50));

        let cancel = CancellationToken::new();
        let handle = {
            let cancel = cancel.clone();
            tokio::spawn(async move { poller.run(cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();
        assert!(handle.await.unwrap().is_ok());

        let polls = std::fs::read_to_string(&runs).unwrap().lines().count();
        assert!(polls >= 1, "poller never ran");
        assert!(polls <= 5, "poller ran {polls} times in 200ms at a 50ms interval");

        let snapshot = health.snapshot();
        assert_eq!(snapshot.components[CONFIG_STORE].status, HealthStatus::Degraded);
        assert_eq!(snapshot.components[LIVE_STATE].status, HealthStatus::Degraded);
    }
}
