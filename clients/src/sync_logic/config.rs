use anyhow::{Context, Result};
use clap::Parser;
use lib_opsfeed::{select_endpoint, EnvironmentSignals, SyncSettings};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File looked up in the working directory when `--config-path` is absent.
pub const LOCAL_CONFIG_FILE: &str = "sync_client.json5";

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[clap(about = "Hospital operations event-stream sync client", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "OPSFEED_CONFIG_PATH", help = "Path to the JSON5 configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "OPSFEED_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "OPSFEED_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "OPSFEED_ENDPOINT", help = "Explicit event-stream URL. Overrides host/port selection.")]
    pub endpoint: Option<String>,

    #[clap(long, env = "OPSFEED_HOST", help = "Host the dashboard is served from.")]
    pub host: Option<String>,

    #[clap(long, env = "OPSFEED_PORT", help = "Port the dashboard is served from.")]
    pub port: Option<u16>,

    #[clap(long, env = "OPSFEED_SECURE", help = "Whether the dashboard is served over TLS (true/false).")]
    pub secure: Option<bool>,

    #[clap(long, env = "OPSFEED_BACKEND_PORT", help = "Backend port for direct development connections.")]
    pub backend_port: Option<u16>,

    #[clap(long, env = "OPSFEED_REPLAY", help = "Replay a recorded stream from this file instead of connecting.")]
    pub replay: Option<PathBuf>,

    #[clap(long, env = "OPSFEED_REPLAY_PACE_MS", help = "Pause in milliseconds between replayed frames.")]
    pub replay_pace_ms: Option<u64>,

    #[clap(long, env = "OPSFEED_RECONNECT_INTERVAL_MS", help = "Fixed delay in milliseconds between reconnect attempts.")]
    pub reconnect_interval_ms: Option<u64>,

    #[clap(long, env = "OPSFEED_MAX_RECONNECT_ATTEMPTS", help = "Consecutive failures tolerated before giving up.")]
    pub max_reconnect_attempts: Option<u32>,

    #[clap(long, env = "OPSFEED_THROTTLE_WINDOW_MS", help = "Minimum spacing in milliseconds between applied updates per hospital.")]
    pub throttle_window_ms: Option<u64>,

    #[clap(long, env = "OPSFEED_DEDUP_CAPACITY", help = "Event ids remembered for deduplication.")]
    pub dedup_capacity: Option<usize>,

    #[clap(long, env = "OPSFEED_DEDUP_TTL_MS", help = "Lifetime in milliseconds of a remembered event id (0 = until evicted).")]
    pub dedup_ttl_ms: Option<u64>,

    #[clap(long, env = "OPSFEED_MAX_TRANSFER_EVENTS", help = "Transfer events kept in the cache.")]
    pub max_transfer_events: Option<usize>,

    #[clap(long, env = "OPSFEED_IDLE_TIMEOUT_MS", help = "Socket inactivity timeout in milliseconds (0 = disabled).")]
    pub idle_timeout_ms: Option<u64>,

    #[clap(long, env = "OPSFEED_CONNECT_TIMEOUT_MS", help = "Socket handshake timeout in milliseconds (0 = disabled).")]
    pub connect_timeout_ms: Option<u64>,

    #[clap(long, env = "OPSFEED_MONITOR_INTERVAL_SECONDS", help = "Interval in seconds between cache reports.")]
    pub monitor_interval_seconds: Option<u64>,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            endpoint: other.endpoint.or(self.endpoint),
            host: other.host.or(self.host),
            port: other.port.or(self.port),
            secure: other.secure.or(self.secure),
            backend_port: other.backend_port.or(self.backend_port),
            replay: other.replay.or(self.replay),
            replay_pace_ms: other.replay_pace_ms.or(self.replay_pace_ms),
            reconnect_interval_ms: other.reconnect_interval_ms.or(self.reconnect_interval_ms),
            max_reconnect_attempts: other.max_reconnect_attempts.or(self.max_reconnect_attempts),
            throttle_window_ms: other.throttle_window_ms.or(self.throttle_window_ms),
            dedup_capacity: other.dedup_capacity.or(self.dedup_capacity),
            dedup_ttl_ms: other.dedup_ttl_ms.or(self.dedup_ttl_ms),
            max_transfer_events: other.max_transfer_events.or(self.max_transfer_events),
            idle_timeout_ms: other.idle_timeout_ms.or(self.idle_timeout_ms),
            connect_timeout_ms: other.connect_timeout_ms.or(self.connect_timeout_ms),
            monitor_interval_seconds: other.monitor_interval_seconds.or(self.monitor_interval_seconds),
        }
    }

    fn defaults() -> Config {
        let settings = SyncSettings::default();
        Config {
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            host: Some("localhost".to_string()),
            secure: Some(false),
            replay_pace_ms: Some(0),
            reconnect_interval_ms: Some(settings.reconnect_interval.as_millis() as u64),
            max_reconnect_attempts: Some(settings.max_reconnect_attempts),
            throttle_window_ms: Some(settings.throttle_window.as_millis() as u64),
            dedup_capacity: Some(settings.dedup_capacity),
            dedup_ttl_ms: Some(settings.dedup_ttl.map_or(0, |d| d.as_millis() as u64)),
            max_transfer_events: Some(settings.max_transfer_events),
            idle_timeout_ms: Some(settings.idle_timeout.map_or(0, |d| d.as_millis() as u64)),
            connect_timeout_ms: Some(settings.connect_timeout.map_or(0, |d| d.as_millis() as u64)),
            monitor_interval_seconds: Some(30),
            ..Default::default()
        }
    }

    /// Pipeline settings. Unset fields keep the library defaults; zero
    /// disables the optional lifetimes.
    pub fn sync_settings(&self) -> SyncSettings {
        let defaults = SyncSettings::default();
        let optional = |ms: Option<u64>, fallback: Option<Duration>| match ms {
            Some(0) => None,
            Some(ms) => Some(Duration::from_millis(ms)),
            None => fallback,
        };
        SyncSettings {
            reconnect_interval: self
                .reconnect_interval_ms
                .map_or(defaults.reconnect_interval, Duration::from_millis),
            max_reconnect_attempts: self
                .max_reconnect_attempts
                .unwrap_or(defaults.max_reconnect_attempts),
            throttle_window: self
                .throttle_window_ms
                .map_or(defaults.throttle_window, Duration::from_millis),
            dedup_capacity: self.dedup_capacity.unwrap_or(defaults.dedup_capacity),
            dedup_ttl: optional(self.dedup_ttl_ms, defaults.dedup_ttl),
            max_transfer_events: self
                .max_transfer_events
                .unwrap_or(defaults.max_transfer_events),
            idle_timeout: optional(self.idle_timeout_ms, defaults.idle_timeout),
            connect_timeout: optional(self.connect_timeout_ms, defaults.connect_timeout),
        }
    }

    pub fn environment(&self) -> EnvironmentSignals {
        EnvironmentSignals {
            host: self.host.clone().unwrap_or_else(|| "localhost".to_string()),
            port: self.port,
            secure: self.secure.unwrap_or(false),
            backend_port: self.backend_port,
        }
    }

    /// The replay file in replay mode, else the explicit endpoint, else the
    /// one derived from host and port.
    pub fn resolve_endpoint(&self) -> String {
        if let Some(replay) = &self.replay {
            return replay.to_string_lossy().to_string();
        }
        match &self.endpoint {
            Some(endpoint) => endpoint.clone(),
            None => select_endpoint(&self.environment()),
        }
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| PathBuf::from("./logs"))
    }

    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }

    pub fn replay_pace(&self) -> Duration {
        Duration::from_millis(self.replay_pace_ms.unwrap_or(0))
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_seconds.unwrap_or(30).max(1))
    }
}

/// Config file to read: the explicit path, else `./sync_client.json5` when it
/// exists, else the per-user config directory.
pub fn config_file_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    let local = PathBuf::from(LOCAL_CONFIG_FILE);
    if local.exists() {
        return local;
    }
    dirs::config_dir()
        .map(|dir| dir.join("opsfeed").join(LOCAL_CONFIG_FILE))
        .unwrap_or(local)
}

pub fn read_config_file(path: &Path) -> Result<Config> {
    let config_str = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    serde_json5::from_str::<Config>(&config_str)
        .with_context(|| format!("Failed to parse config file {}", path.display()))
}

/// Defaults < config file < environment and CLI.
pub fn load_config_from(cli_args: Config) -> Result<Config> {
    let config_file_path = config_file_path(cli_args.config_path.as_deref());
    let mut current_config = Config::defaults();

    if config_file_path.exists() {
        current_config = current_config.merge(read_config_file(&config_file_path)?);
    } else if cli_args.config_path.is_some() {
        anyhow::bail!("Config file not found at {}", config_file_path.display());
    }

    Ok(current_config.merge(cli_args))
}

pub fn load_config() -> Result<Config> {
    // clap::Parser handles env vars and CLI args together.
    load_config_from(Config::parse())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_cli_overrides_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "{{ // comments are fine in json5\n host: 'ops.example.org', port: 443, secure: true, maxReconnectAttempts: 9, }}"
        )
        .unwrap();

        let cli = Config::parse_from([
            "sync_client",
            "--config-path",
            file.path().to_str().unwrap(),
            "--max-reconnect-attempts",
            "2",
        ]);
        let config = load_config_from(cli).unwrap();

        assert_eq!(config.host.as_deref(), Some("ops.example.org"));
        assert_eq!(config.max_reconnect_attempts, Some(2));
        assert_eq!(config.log_level.as_deref(), Some("info"));
        assert_eq!(config.resolve_endpoint(), "wss://ops.example.org/api/ws");
    }

    #[test]
    fn test_missing_explicit_config_is_an_error() {
        let cli = Config {
            config_path: Some(PathBuf::from("/definitely/not/here.json5")),
            ..Default::default()
        };
        assert!(load_config_from(cli).is_err());
    }

    #[test]
    fn test_invalid_config_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{{ port: 'not a number' }}").unwrap();
        assert!(read_config_file(file.path()).is_err());
    }

    #[test]
    fn test_settings_mapping() {
        let config = Config {
            reconnect_interval_ms: Some(500),
            dedup_ttl_ms: Some(0),
            idle_timeout_ms: Some(15_000),
            connect_timeout_ms: Some(0),
            ..Config::defaults()
        };
        let settings = config.sync_settings();
        assert_eq!(settings.reconnect_interval, Duration::from_millis(500));
        assert_eq!(settings.dedup_ttl, None);
        assert_eq!(settings.idle_timeout, Some(Duration::from_secs(15)));
        assert_eq!(settings.connect_timeout, None);
        assert_eq!(settings.max_reconnect_attempts, 5);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_endpoint_precedence() {
        let base = Config::defaults();
        assert_eq!(base.resolve_endpoint(), "ws://localhost:8000/ws");

        let explicit = Config {
            endpoint: Some("wss://feed.example.org/stream".into()),
            ..base.clone()
        };
        assert_eq!(explicit.resolve_endpoint(), "wss://feed.example.org/stream");

        let replay = Config {
            replay: Some(PathBuf::from("/tmp/feed.ndjson")),
            ..explicit
        };
        assert_eq!(replay.resolve_endpoint(), "/tmp/feed.ndjson");
    }
}
