//! Command-line configuration.
//!
//! Every flag can also be set through a `CACHING_EXPORTER_*` environment
//! variable (a `.env` file is honoured at startup).

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::api::ApiServerConfig;
use crate::error::{Error, Result};
use crate::sources::{
    CONFIG_PLIST_PATH, ConfigSource, LAST_STATE_PLIST_PATH, LiveStateSource, SERVERADMIN_PATH,
    STATUS_ARGS, StatusCommand,
};

/// Raw command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Prometheus exporter for macOS Caching Server", long_about = None)]
pub struct Args {
    /// Port to serve metrics on
    #[arg(long, env = "CACHING_EXPORTER_PORT", default_value = "3903")]
    pub port: String,

    /// Comma-separated list of log files to tail
    #[arg(long, env = "CACHING_EXPORTER_LOGS", default_value = "")]
    pub logs: String,

    /// Directory containing log-processing programs
    #[arg(long, env = "CACHING_EXPORTER_PROGS", default_value = "")]
    pub progs: String,

    /// Address to bind the HTTP server to
    #[arg(long, env = "CACHING_EXPORTER_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Seconds between two polls of the Caching Server state
    #[arg(long, env = "CACHING_EXPORTER_POLL_INTERVAL", default_value_t = 30)]
    pub poll_interval: u64,

    /// Path of the Caching Server configuration store
    #[arg(long, env = "CACHING_EXPORTER_CONFIG_PLIST", default_value = CONFIG_PLIST_PATH)]
    pub config_plist: PathBuf,

    /// Path of the Caching Server live-status store
    #[arg(long, env = "CACHING_EXPORTER_LAST_STATE_PLIST", default_value = LAST_STATE_PLIST_PATH)]
    pub last_state_plist: PathBuf,

    /// Path of the serveradmin utility
    #[arg(long, env = "CACHING_EXPORTER_SERVERADMIN", default_value = SERVERADMIN_PATH)]
    pub serveradmin: PathBuf,

    /// Seconds the status command may run before it is killed
    #[arg(long, env = "CACHING_EXPORTER_COMMAND_TIMEOUT", default_value_t = 60)]
    pub command_timeout: u64,

    /// Seconds a scrape may wait for the log-metrics snapshot
    #[arg(long, env = "CACHING_EXPORTER_SCRAPE_TIMEOUT", default_value_t = 10)]
    pub scrape_timeout: u64,

    /// Milliseconds between two reads of each tailed log
    #[arg(long, env = "CACHING_EXPORTER_TAIL_INTERVAL", default_value_t = 1000)]
    pub tail_interval: u64,

    /// Directory for rolling log files (console only when unset)
    #[arg(long, env = "CACHING_EXPORTER_LOG_DIR")]
    pub log_dir: Option<PathBuf>,
}

/// Validated exporter configuration.
#[derive(Debug, Clone)]
pub struct ExporterConfig {
    pub bind_address: IpAddr,
    pub port: u16,
    pub logs: Vec<PathBuf>,
    pub progs: PathBuf,
    pub poll_interval: Duration,
    pub config_plist: PathBuf,
    pub last_state_plist: PathBuf,
    pub serveradmin: PathBuf,
    pub command_timeout: Duration,
    pub scrape_timeout: Duration,
    pub tail_interval: Duration,
    pub log_dir: Option<PathBuf>,
}

impl ExporterConfig {
    pub fn from_args(args: Args) -> Result<Self> {
        let logs: Vec<PathBuf> = args
            .logs
            .split(',')
            .map(str::trim)
            .filter(|path| !path.is_empty())
            .map(PathBuf::from)
            .collect();
        if logs.is_empty() {
            return Err(Error::config("no log files given (--logs)"));
        }

        let progs = args.progs.trim();
        if progs.is_empty() {
            return Err(Error::config("no program directory given (--progs)"));
        }

        let port = args
            .port
            .trim()
            .parse::<u16>()
            .map_err(|e| Error::config(format!("invalid port {:?}: {}", args.port, e)))?;

        let bind_address = args.bind_address.trim().parse::<IpAddr>().map_err(|e| {
            Error::config(format!("invalid bind address {:?}: {}", args.bind_address, e))
        })?;

        for (flag, value) in [
            ("--poll-interval", args.poll_interval),
            ("--command-timeout", args.command_timeout),
            ("--scrape-timeout", args.scrape_timeout),
            ("--tail-interval", args.tail_interval),
        ] {
            if value == 0 {
                return Err(Error::config(format!("{} must be greater than zero", flag)));
            }
        }

        Ok(Self {
            bind_address,
            port,
            logs,
            progs: PathBuf::from(progs),
            poll_interval: Duration::from_secs(args.poll_interval),
            config_plist: args.config_plist,
            last_state_plist: args.last_state_plist,
            serveradmin: args.serveradmin,
            command_timeout: Duration::from_secs(args.command_timeout),
            scrape_timeout: Duration::from_secs(args.scrape_timeout),
            tail_interval: Duration::from_millis(args.tail_interval),
            log_dir: args.log_dir,
        })
    }

    pub fn server_config(&self) -> ApiServerConfig {
        ApiServerConfig {
            bind_address: self.bind_address,
            port: self.port,
        }
    }

    pub fn engine_options(&self) -> logmetrics::Options {
        logmetrics::Options::new(self.progs.clone(), self.logs.clone())
            .with_tail_interval(self.tail_interval)
    }

    pub fn config_source(&self) -> ConfigSource {
        ConfigSource::new(self.config_plist.clone())
    }

    pub fn live_state_source(&self) -> LiveStateSource {
        let command = StatusCommand::new(
            self.serveradmin.clone(),
            STATUS_ARGS.iter().map(|arg| arg.to_string()).collect(),
        )
        .with_timeout(self.command_timeout);
        LiveStateSource::new(self.last_state_plist.clone(), command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<ExporterConfig> {
        let mut argv = vec!["caching-exporter"];
        argv.extend_from_slice(args);
        ExporterConfig::from_args(Args::try_parse_from(argv).unwrap())
    }

    #[test]
    fn test_defaults() {
        let config = parse(&["--logs", "/var/log/a.log", "--progs", "/etc/progs"]).unwrap();
        assert_eq!(config.port, 3903);
        assert_eq!(config.server_config().socket_addr().to_string(), "0.0.0.0:3903");
        assert_eq!(config.logs, vec![PathBuf::from("/var/log/a.log")]);
        assert_eq!(config.progs, PathBuf::from("/etc/progs"));
        assert_eq!(config.poll_interval, Duration::from_secs(30));
        assert_eq!(config.command_timeout, Duration::from_secs(60));
        assert_eq!(config.scrape_timeout, Duration::from_secs(10));
        assert_eq!(config.tail_interval, Duration::from_millis(1000));
        assert_eq!(config.config_plist, PathBuf::from(CONFIG_PLIST_PATH));
        assert_eq!(config.last_state_plist, PathBuf::from(LAST_STATE_PLIST_PATH));
        assert!(config.log_dir.is_none());

        let live = config.live_state_source();
        assert_eq!(live.path(), PathBuf::from(LAST_STATE_PLIST_PATH).as_path());
    }

    #[test]
    fn test_logs_are_split_and_empties_dropped() {
        let config = parse(&["--logs", "a.log,, b.log ,", "--progs", "progs"]).unwrap();
        assert_eq!(
            config.logs,
            vec![PathBuf::from("a.log"), PathBuf::from("b.log")]
        );
    }

    #[test]
    fn test_missing_logs_or_progs_is_an_error() {
        assert!(matches!(
            parse(&["--progs", "progs"]),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(
            parse(&["--logs", ",,", "--progs", "progs"]),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(
            parse(&["--logs", "a.log"]),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_invalid_values() {
        assert!(parse(&["--logs", "a", "--progs", "p", "--port", "http"]).is_err());
        assert!(parse(&["--logs", "a", "--progs", "p", "--port", "70000"]).is_err());
        assert!(parse(&["--logs", "a", "--progs", "p", "--bind-address", "nope"]).is_err());
        assert!(parse(&["--logs", "a", "--progs", "p", "--poll-interval", "0"]).is_err());
    }

    #[test]
    fn test_overrides() {
        let config = parse(&[
            "--logs",
            "a.log",
            "--progs",
            "p",
            "--port",
            "9100",
            "--bind-address",
            "127.0.0.1",
            "--poll-interval",
            "5",
            "--tail-interval",
            "250",
            "--log-dir",
            "/tmp/logs",
        ])
        .unwrap();
        assert_eq!(config.server_config().socket_addr().to_string(), "127.0.0.1:9100");
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.tail_interval, Duration::from_millis(250));
        assert_eq!(config.log_dir, Some(PathBuf::from("/tmp/logs")));
        assert_eq!(config.engine_options().tail_interval, Duration::from_millis(250));
    }
}
