//! Engine: programs + store + tailers.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::metric::MetricKind;
use crate::program::{Program, load_programs};
use crate::store::MetricStore;
use crate::tailer::{FileTailer, MAX_LINES_PER_READ};

/// Default delay between two reads of a tailed file.
pub const DEFAULT_TAIL_INTERVAL: Duration = Duration::from_secs(1);

/// Engine options.
#[derive(Debug, Clone)]
pub struct Options {
    /// Directory holding the program files.
    pub progs: PathBuf,
    /// Log files to tail.
    pub log_paths: Vec<PathBuf>,
    /// Delay between two reads of a tailed file.
    pub tail_interval: Duration,
}

impl Options {
    pub fn new(progs: impl Into<PathBuf>, log_paths: Vec<PathBuf>) -> Self {
        Self {
            progs: progs.into(),
            log_paths,
            tail_interval: DEFAULT_TAIL_INTERVAL,
        }
    }

    pub fn with_tail_interval(mut self, interval: Duration) -> Self {
        self.tail_interval = interval;
        self
    }
}

/// The log-processing engine.
pub struct Engine {
    programs: Vec<Program>,
    store: Arc<MetricStore>,
    log_paths: Vec<PathBuf>,
    tail_interval: Duration,
}

impl Engine {
    /// Load programs and declare their metrics.
    pub fn new(options: Options) -> Result<Self> {
        if options.log_paths.is_empty() {
            return Err(Error::NoLogs);
        }

        let programs = load_programs(&options.progs)?;
        let store = Arc::new(MetricStore::new());
        for program in &programs {
            for rule in &program.rules {
                store.declare(&rule.name, rule.kind.clone(), rule.labels.clone())?;
            }
        }

        info!(
            programs = programs.len(),
            metrics = store.len(),
            logs = options.log_paths.len(),
            "Loaded metric programs"
        );

        Ok(Self {
            programs,
            store,
            log_paths: options.log_paths,
            tail_interval: options.tail_interval,
        })
    }

    pub fn store(&self) -> &Arc<MetricStore> {
        &self.store
    }

    /// Run one log line through every rule of every program.
    pub fn process_line(&self, line: &str) {
        for program in &self.programs {
            for rule in &program.rules {
                let Some(hit) = rule.apply(line) else {
                    continue;
                };
                let Some(datum) = self.store.datum(&rule.name, hit.values) else {
                    continue;
                };
                match rule.kind {
                    MetricKind::Counter => datum.add(hit.amount),
                    MetricKind::Gauge => datum.set(hit.amount),
                    MetricKind::Other(_) => {}
                }
                trace!(program = %program.name, metric = %rule.name, "Line matched");
            }
        }
    }

    /// Spawn one tailing task per log path. Tasks stop when `cancel_token`
    /// is cancelled.
    pub fn start_tailing(self: &Arc<Self>, cancel_token: CancellationToken) -> Vec<JoinHandle<()>> {
        self.log_paths
            .iter()
            .cloned()
            .map(|path| {
                // Position is taken now, not when the task first runs.
                let tailer = FileTailer::new(path);
                let engine = Arc::clone(self);
                let cancel_token = cancel_token.clone();
                tokio::spawn(async move { engine.tail(tailer, cancel_token).await })
            })
            .collect()
    }

    async fn tail(&self, tailer: FileTailer, cancel_token: CancellationToken) {
        let path = tailer.path().to_path_buf();
        info!(path = %path.display(), "Tailing log file");
        let mut tailer = tailer;

        loop {
            tokio::select! {
                biased;
                _ = cancel_token.cancelled() => {
                    debug!(path = %path.display(), "Tailer shutting down");
                    break;
                }
                _ = tokio::time::sleep(self.tail_interval) => {}
            }

            match self.drain(tailer).await {
                Some(current) => tailer = current,
                None => break,
            }
        }
    }

    /// Process everything appended since the last read. Full batches are
    /// followed by another read right away so a busy log never falls behind.
    /// Returns `None` if the blocking read task itself failed.
    async fn drain(&self, mut tailer: FileTailer) -> Option<FileTailer> {
        let path = tailer.path().to_path_buf();
        loop {
            let read = tokio::task::spawn_blocking(move || {
                let lines = tailer.read_new_lines();
                (tailer, lines)
            })
            .await;

            let (current, lines) = match read {
                Ok(read) => read,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Tailer task failed");
                    return None;
                }
            };
            tailer = current;

            match lines {
                Ok(lines) => {
                    for line in &lines {
                        self.process_line(line);
                    }
                    if lines.len() < MAX_LINES_PER_READ {
                        return Some(tailer);
                    }
                    trace!(path = %path.display(), lines = lines.len(), "Full batch read; reading again");
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to read log file");
                    return Some(tailer);
                }
            }
        }
    }

    /// Serialize the whole store as a JSON array of metrics into `writer`
    /// and close it.
    pub async fn write_metrics<W>(&self, mut writer: W) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let snapshot = self.store.snapshot();
        let bytes = serde_json::to_vec(&snapshot)?;
        writer.write_all(&bytes).await?;
        writer.shutdown().await?;
        Ok(())
    }
}
