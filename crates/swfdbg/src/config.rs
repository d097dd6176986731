//! Session configuration.
//!
//! Every key is optional; a missing file section falls back to the defaults
//! below, which match what players expect from a desktop debugger.
//!
//! ```toml
//! response_timeout_ms = 750
//! getvar_response_timeout_ms = 1500
//!
//! [transport]
//! idle_timeout_ms = 30000
//!
//! [connect]
//! accept_timeout_ms = 120000
//!
//! [logging]
//! level = "swfdbg.session=debug,info"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use swfdbg_wire::{connect::ConnectConfig, TransportConfig};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Default wait for a reply to a simple request.
    #[serde(default = "SessionConfig::default_response_timeout_ms")]
    pub response_timeout_ms: u64,

    /// Wait for replies that describe program context (frames, unit info,
    /// actions).
    #[serde(default = "SessionConfig::default_context_response_timeout_ms")]
    pub context_response_timeout_ms: u64,

    /// Wait for variable fetches. Also sent to the player as its getter
    /// timeout.
    #[serde(default = "SessionConfig::default_getvar_response_timeout_ms")]
    pub getvar_response_timeout_ms: u64,

    /// Wait for assignments. Also sent to the player as its setter timeout.
    #[serde(default = "SessionConfig::default_setvar_response_timeout_ms")]
    pub setvar_response_timeout_ms: u64,

    /// Wait for raw SWF/SWD blobs.
    #[serde(default = "SessionConfig::default_swf_swd_load_timeout_ms")]
    pub swf_swd_load_timeout_ms: u64,

    /// How long `suspend` keeps asking the player to stop.
    #[serde(default = "SessionConfig::default_suspend_wait_ms")]
    pub suspend_wait_ms: u64,

    /// Whether member fetches run getters in the player.
    #[serde(default = "SessionConfig::default_invoke_getters")]
    pub invoke_getters: bool,

    /// Delay before a populate request that timed out is retried.
    #[serde(default = "SessionConfig::default_populate_retry_ms")]
    pub populate_retry_ms: u64,

    /// Attempts per program unit before the populate queue gives up on it.
    #[serde(default = "SessionConfig::default_populate_attempts")]
    pub populate_attempts: u32,

    #[serde(default)]
    pub transport: TransportSection,

    #[serde(default)]
    pub connect: ConnectSection,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl SessionConfig {
    fn default_response_timeout_ms() -> u64 {
        750
    }

    fn default_context_response_timeout_ms() -> u64 {
        1_000
    }

    fn default_getvar_response_timeout_ms() -> u64 {
        1_500
    }

    fn default_setvar_response_timeout_ms() -> u64 {
        5_000
    }

    fn default_swf_swd_load_timeout_ms() -> u64 {
        5_000
    }

    fn default_suspend_wait_ms() -> u64 {
        7_000
    }

    fn default_invoke_getters() -> bool {
        true
    }

    fn default_populate_retry_ms() -> u64 {
        250
    }

    fn default_populate_attempts() -> u32 {
        8
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::load_from_str(&text)
    }

    pub fn load_from_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn context_response_timeout(&self) -> Duration {
        Duration::from_millis(self.context_response_timeout_ms)
    }

    pub fn getvar_response_timeout(&self) -> Duration {
        Duration::from_millis(self.getvar_response_timeout_ms)
    }

    pub fn setvar_response_timeout(&self) -> Duration {
        Duration::from_millis(self.setvar_response_timeout_ms)
    }

    pub fn swf_swd_load_timeout(&self) -> Duration {
        Duration::from_millis(self.swf_swd_load_timeout_ms)
    }

    pub fn suspend_wait(&self) -> Duration {
        Duration::from_millis(self.suspend_wait_ms)
    }

    pub fn populate_retry(&self) -> Duration {
        Duration::from_millis(self.populate_retry_ms)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            response_timeout_ms: Self::default_response_timeout_ms(),
            context_response_timeout_ms: Self::default_context_response_timeout_ms(),
            getvar_response_timeout_ms: Self::default_getvar_response_timeout_ms(),
            setvar_response_timeout_ms: Self::default_setvar_response_timeout_ms(),
            swf_swd_load_timeout_ms: Self::default_swf_swd_load_timeout_ms(),
            suspend_wait_ms: Self::default_suspend_wait_ms(),
            invoke_getters: Self::default_invoke_getters(),
            populate_retry_ms: Self::default_populate_retry_ms(),
            populate_attempts: Self::default_populate_attempts(),
            transport: TransportSection::default(),
            connect: ConnectSection::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportSection {
    /// Read silence after which the heartbeat probes the peer. Unset
    /// disables the heartbeat.
    #[serde(default)]
    pub idle_timeout_ms: Option<u64>,

    /// How long a heartbeat probe may block before the pipe is declared
    /// broken.
    #[serde(default = "TransportSection::default_heartbeat_ceiling_ms")]
    pub heartbeat_ceiling_ms: u64,

    /// Largest frame accepted or sent.
    #[serde(default = "TransportSection::default_max_message_len")]
    pub max_message_len: usize,
}

impl TransportSection {
    fn default_heartbeat_ceiling_ms() -> u64 {
        10_000
    }

    fn default_max_message_len() -> usize {
        64 * 1024 * 1024
    }

    pub fn to_transport_config(&self) -> TransportConfig {
        TransportConfig {
            idle_timeout: self.idle_timeout_ms.map(Duration::from_millis),
            heartbeat_ceiling: Duration::from_millis(self.heartbeat_ceiling_ms),
            max_message_len: self.max_message_len,
        }
    }
}

impl Default for TransportSection {
    fn default() -> Self {
        Self {
            idle_timeout_ms: None,
            heartbeat_ceiling_ms: Self::default_heartbeat_ceiling_ms(),
            max_message_len: Self::default_max_message_len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectSection {
    #[serde(default = "ConnectSection::default_accept_timeout_ms")]
    pub accept_timeout_ms: u64,

    #[serde(default = "ConnectSection::default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "ConnectSection::default_connect_retry_interval_ms")]
    pub connect_retry_interval_ms: u64,
}

impl ConnectSection {
    fn default_accept_timeout_ms() -> u64 {
        120_000
    }

    fn default_connect_timeout_ms() -> u64 {
        120_000
    }

    fn default_connect_retry_interval_ms() -> u64 {
        250
    }

    pub fn to_connect_config(&self) -> ConnectConfig {
        ConnectConfig {
            accept_timeout: Duration::from_millis(self.accept_timeout_ms),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            connect_retry_interval: Duration::from_millis(self.connect_retry_interval_ms),
        }
    }
}

impl Default for ConnectSection {
    fn default() -> Self {
        Self {
            accept_timeout_ms: Self::default_accept_timeout_ms(),
            connect_timeout_ms: Self::default_connect_timeout_ms(),
            connect_retry_interval_ms: Self::default_connect_retry_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// A simple level (`info`, `debug`, ...) or a full `EnvFilter` directive
    /// string.
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,

    /// Emit logs as JSON lines.
    #[serde(default)]
    pub json: bool,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_owned()
    }

    fn normalize_level_directives(input: &str) -> String {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Self::default_level();
        }

        match trimmed.to_ascii_lowercase().as_str() {
            "trace" => "trace".to_owned(),
            "debug" => "debug".to_owned(),
            "info" => "info".to_owned(),
            "warn" | "warning" => "warn".to_owned(),
            "error" => "error".to_owned(),
            _ => trimmed.to_owned(),
        }
    }

    fn config_env_filter(&self) -> tracing_subscriber::EnvFilter {
        let directives = Self::normalize_level_directives(&self.level);
        tracing_subscriber::EnvFilter::try_new(directives).unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::default()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
        })
    }

    /// The effective filter: the configured level with `RUST_LOG` merged on
    /// top when it is set.
    pub fn env_filter(&self) -> tracing_subscriber::EnvFilter {
        let env_directives = std::env::var("RUST_LOG")
            .ok()
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty());

        let config_directives = Self::normalize_level_directives(&self.level);

        match env_directives {
            Some(env_directives) => {
                let combined = format!("{config_directives},{env_directives}");
                tracing_subscriber::EnvFilter::try_new(combined)
                    .or_else(|_| tracing_subscriber::EnvFilter::try_new(env_directives))
                    .unwrap_or_else(|_| self.config_env_filter())
            }
            None => self.config_env_filter(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            json: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse toml config: {0}")]
    Toml(String),
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        // The Display form quotes the offending source line; keep only the
        // message so config values stay out of logs.
        ConfigError::Toml(err.message().to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_file_uses_defaults() {
        let config = SessionConfig::load_from_str("").unwrap();
        assert_eq!(config, SessionConfig::default());
        assert_eq!(config.response_timeout(), Duration::from_millis(750));
        assert_eq!(config.transport.to_transport_config().idle_timeout, None);
    }

    #[test]
    fn sections_override_individual_keys() {
        let config = SessionConfig::load_from_str(
            r#"
            getvar_response_timeout_ms = 3000
            invoke_getters = false

            [transport]
            idle_timeout_ms = 500

            [connect]
            connect_retry_interval_ms = 10

            [logging]
            level = "Warning"
            json = true
            "#,
        )
        .unwrap();

        assert_eq!(config.getvar_response_timeout(), Duration::from_secs(3));
        assert!(!config.invoke_getters);
        assert_eq!(config.setvar_response_timeout_ms, 5_000);

        let transport = config.transport.to_transport_config();
        assert_eq!(transport.idle_timeout, Some(Duration::from_millis(500)));
        assert_eq!(transport.heartbeat_ceiling, Duration::from_secs(10));

        let connect = config.connect.to_connect_config();
        assert_eq!(connect.connect_retry_interval, Duration::from_millis(10));
        assert_eq!(connect.accept_timeout, Duration::from_secs(120));

        assert!(config.logging.json);
        assert_eq!(LoggingConfig::normalize_level_directives(&config.logging.level), "warn");
    }

    #[test]
    fn parse_errors_do_not_echo_values() {
        let err = SessionConfig::load_from_str("invoke_getters = \"sekrit\"").unwrap_err();
        let ConfigError::Toml(message) = err else {
            panic!("expected toml error");
        };
        assert!(!message.contains("invoke_getters = "), "{message}");
    }

    #[test]
    fn load_from_path_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("swfdbg.toml");
        let err = SessionConfig::load_from_path(&missing).unwrap_err();
        assert!(matches!(err, ConfigError::Io { ref path, .. } if path.ends_with("swfdbg.toml")));

        std::fs::write(&missing, "suspend_wait_ms = 100\n").unwrap();
        let config = SessionConfig::load_from_path(&missing).unwrap();
        assert_eq!(config.suspend_wait(), Duration::from_millis(100));
    }
}
