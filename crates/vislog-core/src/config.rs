//! Configuration for recording streams and their sinks.
//!
//! A [`RecordingConfig`] is read once, when a stream is built, and never
//! consulted again. It can come from code, from the `VISLOG` environment
//! variable, or from a YAML file.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VislogError};

/// Environment variable holding the process-wide enable switch.
pub const ENV_VAR: &str = "VISLOG";

/// Port a companion viewer listens on when none is given.
pub const DEFAULT_PORT: u16 = 9876;

pub const DEFAULT_HOST: &str = "127.0.0.1";

/// What a connect sink does when its queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backpressure {
    /// Block the logging thread until the worker makes room.
    #[default]
    Block,
    /// Evict the oldest queued message and report an overflow.
    DropOldest,
}

/// What building a spawn sink does when the viewer cannot be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnavailablePolicy {
    /// Fail stream construction.
    #[default]
    Fatal,
    /// Report the failure to the sink error observer and keep going without the sink.
    DropAndContinue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectOptions {
    /// Messages buffered while the connection is slow or down.
    pub queue_capacity: usize,
    pub backpressure: Backpressure,
    pub flush_timeout_ms: u64,
    pub reconnect_min_ms: u64,
    pub reconnect_max_ms: u64,
    /// How long closing waits for queued messages to drain.
    pub close_timeout_ms: u64,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            backpressure: Backpressure::Block,
            flush_timeout_ms: 2_000,
            reconnect_min_ms: 100,
            reconnect_max_ms: 5_000,
            close_timeout_ms: 5_000,
        }
    }
}

impl ConnectOptions {
    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    /// Delay before reconnect attempt `attempt` (0-based), doubling up to the cap.
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.min(16);
        let ms = self
            .reconnect_min_ms
            .saturating_mul(factor)
            .min(self.reconnect_max_ms.max(self.reconnect_min_ms));
        Duration::from_millis(ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpawnOptions {
    /// Viewer executable, looked up on `PATH` when not absolute.
    pub executable: String,
    pub port: u16,
    pub wait_timeout_ms: u64,
    pub extra_args: Vec<String>,
    pub on_unavailable: UnavailablePolicy,
}

impl Default for SpawnOptions {
    fn default() -> Self {
        Self {
            executable: "vislog".to_string(),
            port: DEFAULT_PORT,
            wait_timeout_ms: 5_000,
            extra_args: Vec::new(),
            on_unavailable: UnavailablePolicy::Fatal,
        }
    }
}

impl SpawnOptions {
    pub fn target(&self) -> TargetAddress {
        TargetAddress {
            scheme: "tcp".to_string(),
            host: DEFAULT_HOST.to_string(),
            port: self.port,
            path: None,
        }
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }
}

/// Configuration of one recording stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// When false every stream method is a no-op that reports success.
    pub enabled: bool,
    /// Stamp non-static messages with the `log_time` and `log_tick` timelines.
    pub log_time: bool,
    pub connect: ConnectOptions,
    pub spawn: SpawnOptions,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_time: false,
            connect: ConnectOptions::default(),
            spawn: SpawnOptions::default(),
        }
    }
}

impl RecordingConfig {
    /// Defaults, with `enabled` taken from the `VISLOG` environment variable.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_value(std::env::var(ENV_VAR).ok().as_deref());
        config
    }

    /// Apply a value of the `VISLOG` variable. `None` leaves the config as is.
    pub fn apply_env_value(&mut self, value: Option<&str>) {
        if let Some(value) = value {
            self.enabled = parse_enabled(value);
        }
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn save_yaml(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_yaml::to_string(self)?)?;
        Ok(())
    }
}

fn parse_enabled(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "0" | "false" | "off" | "no"
    )
}

/// A sink target of the form `scheme://host:port[/path]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetAddress {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub path: Option<String>,
}

impl Default for TargetAddress {
    fn default() -> Self {
        Self {
            scheme: "tcp".to_string(),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            path: None,
        }
    }
}

impl TargetAddress {
    /// Parse `scheme://host:port[/path]`. The scheme and port are optional;
    /// a bare `host:port` is accepted too.
    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = |reason: &str| VislogError::Other(format!("invalid address {raw:?}: {reason}"));

        let (scheme, rest) = match raw.split_once("://") {
            Some((scheme, rest)) if !scheme.is_empty() => (scheme.to_string(), rest),
            Some(_) => return Err(invalid("empty scheme")),
            None => ("tcp".to_string(), raw),
        };
        let (authority, path) = match rest.split_once('/') {
            Some((authority, path)) if !path.is_empty() => (authority, Some(path.to_string())),
            Some((authority, _)) => (authority, None),
            None => (rest, None),
        };
        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| invalid("bad port"))?;
                (host, port)
            }
            None => (authority, DEFAULT_PORT),
        };
        if host.is_empty() {
            return Err(invalid("empty host"));
        }

        Ok(Self {
            scheme,
            host: host.to_string(),
            port,
            path,
        })
    }

    /// `host:port`, suitable for socket APIs.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for TargetAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)?;
        if let Some(path) = &self.path {
            write!(f, "/{path}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RecordingConfig::default();
        assert!(config.enabled);
        assert!(!config.log_time);
        assert_eq!(config.connect.backpressure, Backpressure::Block);
        assert_eq!(config.spawn.port, DEFAULT_PORT);
    }

    #[test]
    fn test_env_value() {
        let mut config = RecordingConfig::default();
        config.apply_env_value(None);
        assert!(config.enabled);
        config.apply_env_value(Some("off"));
        assert!(!config.enabled);
        config.apply_env_value(Some("1"));
        assert!(config.enabled);
        config.apply_env_value(Some(" FALSE "));
        assert!(!config.enabled);
    }

    #[test]
    fn test_yaml_partial_config() {
        let yaml = "enabled: false\nconnect:\n  backpressure: drop_oldest\n  queue_capacity: 8\n";
        let config = RecordingConfig::from_yaml_str(yaml).unwrap();
        assert!(!config.enabled);
        assert_eq!(config.connect.backpressure, Backpressure::DropOldest);
        assert_eq!(config.connect.queue_capacity, 8);
        assert_eq!(config.connect.flush_timeout_ms, 2_000);
    }

    #[test]
    fn test_yaml_file_roundtrip() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("vislog.yaml");
        let mut config = RecordingConfig::default();
        config.log_time = true;
        config.spawn.on_unavailable = UnavailablePolicy::DropAndContinue;
        config.save_yaml(&path).unwrap();
        assert_eq!(RecordingConfig::from_yaml_file(&path).unwrap(), config);
    }

    #[test]
    fn test_reconnect_delay_is_capped() {
        let opts = ConnectOptions::default();
        assert_eq!(opts.reconnect_delay(0), Duration::from_millis(100));
        assert_eq!(opts.reconnect_delay(1), Duration::from_millis(200));
        assert_eq!(opts.reconnect_delay(30), Duration::from_millis(5_000));
    }

    #[test]
    fn test_parse_target() {
        let t = TargetAddress::parse("tcp://10.0.0.2:9000/proxy").unwrap();
        assert_eq!(t.host, "10.0.0.2");
        assert_eq!(t.port, 9000);
        assert_eq!(t.path.as_deref(), Some("proxy"));
        assert_eq!(t.to_string(), "tcp://10.0.0.2:9000/proxy");

        let t = TargetAddress::parse("localhost:1234").unwrap();
        assert_eq!(t.scheme, "tcp");
        assert_eq!(t.socket_addr(), "localhost:1234");

        let t = TargetAddress::parse("vislog://viewer").unwrap();
        assert_eq!(t.port, DEFAULT_PORT);

        assert!(TargetAddress::parse("tcp://:80").is_err());
        assert!(TargetAddress::parse("tcp://host:notaport").is_err());
        assert_eq!(TargetAddress::default().socket_addr(), "127.0.0.1:9876");
    }
}
