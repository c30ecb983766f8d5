//! Client configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via TSQUERY_CONFIG or --config)
//! 3. Environment variables

use crate::connection::{ConnectionConfig, FloodRate};
use crate::error::ClientError;
use crate::reconnect::ReconnectStrategy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tsquery_protocol::DEFAULT_PORT;

/// Client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server endpoint and transport settings.
    pub server: ServerConfig,
    /// Reconnect behaviour.
    pub reconnect: ReconnectConfig,
    /// Query credentials, sent after every connect.
    pub login: Option<LoginConfig>,
    /// Virtual server selected after login.
    pub server_id: Option<u32>,
    /// Nickname set after the virtual server is selected.
    pub nickname: Option<String>,
}

impl ClientConfig {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("TSQUERY_CONFIG") {
            Ok(path) => Self::from_file(&path)?,
            Err(_) => Self::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: ClientConfig = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Ok(())
    }

    /// Applies `TSQUERY_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(host) = var("TSQUERY_HOST") {
            self.server.host = host;
        }
        if let Some(port) = var("TSQUERY_PORT").and_then(|v| v.parse().ok()) {
            self.server.port = port;
        }
        if let Some(rate) = var("TSQUERY_FLOOD_RATE").and_then(|v| FloodSetting::parse(&v)) {
            self.server.flood_rate = rate;
        }
        if let Some(kind) = var("TSQUERY_RECONNECT").and_then(|v| ReconnectKind::parse(&v)) {
            self.reconnect.strategy = kind;
        }

        if let Some(username) = var("TSQUERY_USER") {
            self.login.get_or_insert_with(LoginConfig::default).username = username;
        }
        if let Some(password) = var("TSQUERY_PASSWORD") {
            if let Some(login) = self.login.as_mut() {
                login.password = password;
            }
        }

        if let Some(sid) = var("TSQUERY_SERVER_ID").and_then(|v| v.parse().ok()) {
            self.server_id = Some(sid);
        }
        if let Some(nickname) = var("TSQUERY_NICKNAME") {
            self.nickname = Some(nickname);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.host.trim().is_empty() {
            return Err(ConfigError::ValidationError("server.host is empty".into()));
        }
        if self.server.port == 0 {
            return Err(ConfigError::ValidationError("server.port must not be 0".into()));
        }
        if let Some(login) = &self.login {
            if login.username.is_empty() {
                return Err(ConfigError::ValidationError(
                    "login.username is required when login is set".into(),
                ));
            }
        }
        Ok(())
    }

    /// Builds the connection configuration.
    pub fn to_connection_config(&self) -> ConnectionConfig {
        let server = &self.server;
        ConnectionConfig::new(server.host.clone(), server.port)
            .with_connect_timeout(Duration::from_secs(server.connect_timeout_secs))
            .with_request_timeout(Duration::from_secs(server.request_timeout_secs))
            .with_flood_rate(server.flood_rate.to_flood_rate())
            .with_keepalive_interval(match server.keepalive_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            })
            .with_reconnect(self.reconnect.to_strategy())
    }
}

/// Server endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    /// Keepalive period in seconds (0 disables it).
    pub keepalive_secs: u64,
    pub flood_rate: FloodSetting,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            connect_timeout_secs: 10,
            request_timeout_secs: 30,
            keepalive_secs: 60,
            flood_rate: FloodSetting::Default,
        }
    }
}

/// Flood rate as written in the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FloodSetting {
    #[default]
    Default,
    Unlimited,
    Custom { interval_ms: u64 },
}

impl FloodSetting {
    /// Parses `default`, `unlimited` or an interval in milliseconds.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "default" => Some(Self::Default),
            "unlimited" => Some(Self::Unlimited),
            other => other
                .parse()
                .ok()
                .map(|interval_ms| Self::Custom { interval_ms }),
        }
    }

    pub fn to_flood_rate(self) -> FloodRate {
        match self {
            Self::Default => FloodRate::Default,
            Self::Unlimited => FloodRate::Unlimited,
            Self::Custom { interval_ms } => FloodRate::Custom(Duration::from_millis(interval_ms)),
        }
    }
}

/// Reconnect strategy selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconnectKind {
    UserControlled,
    #[default]
    Disconnect,
    Constant,
    Linear,
    Exponential,
}

impl ReconnectKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "user_controlled" => Some(Self::UserControlled),
            "disconnect" => Some(Self::Disconnect),
            "constant" => Some(Self::Constant),
            "linear" => Some(Self::Linear),
            "exponential" => Some(Self::Exponential),
            _ => None,
        }
    }
}

/// Reconnect configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub strategy: ReconnectKind,
    pub initial_delay_ms: u64,
    /// Increment per attempt for the linear strategy.
    pub step_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            strategy: ReconnectKind::Disconnect,
            initial_delay_ms: 1000,
            step_ms: 1000,
            max_delay_ms: 60_000,
        }
    }
}

impl ReconnectConfig {
    pub fn to_strategy(&self) -> ReconnectStrategy {
        let initial = Duration::from_millis(self.initial_delay_ms);
        let max = Duration::from_millis(self.max_delay_ms);
        match self.strategy {
            ReconnectKind::UserControlled => ReconnectStrategy::UserControlled,
            ReconnectKind::Disconnect => ReconnectStrategy::Disconnect,
            ReconnectKind::Constant => ReconnectStrategy::constant(initial),
            ReconnectKind::Linear => {
                ReconnectStrategy::linear(initial, Duration::from_millis(self.step_ms), max)
            }
            ReconnectKind::Exponential => ReconnectStrategy::exponential(initial, max),
        }
    }
}

/// Query login credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoginConfig {
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for ClientError {
    fn from(err: ConfigError) -> Self {
        ClientError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.server.port, 10011);
        assert!(config.login.is_none());
        assert!(config.validate().is_ok());

        let conn = config.to_connection_config();
        assert_eq!(conn.flood_rate.interval(), Duration::from_millis(350));
        assert_eq!(conn.keepalive_interval, Some(Duration::from_secs(60)));
        assert!(matches!(conn.reconnect, ReconnectStrategy::Disconnect));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tsquery.yaml");
        std::fs::write(
            &path,
            r#"
server:
  host: ts.example.com
  flood_rate: unlimited
  keepalive_secs: 0
reconnect:
  strategy: exponential
  initial_delay_ms: 500
login:
  username: serveradmin
  password: secret
server_id: 2
"#,
        )
        .unwrap();

        let config = ClientConfig::from_file(&path).unwrap();
        assert_eq!(config.server.host, "ts.example.com");
        assert_eq!(config.server.port, 10011);
        assert_eq!(config.server_id, Some(2));
        assert_eq!(config.login.as_ref().unwrap().password, "secret");

        let conn = config.to_connection_config();
        assert_eq!(conn.flood_rate, FloodRate::Unlimited);
        assert_eq!(conn.keepalive_interval, None);
        assert_eq!(conn.reconnect.name(), "exponential");
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("saved.yaml");
        let mut config = ClientConfig::default();
        config.server.flood_rate = FloodSetting::Custom { interval_ms: 100 };
        config.nickname = Some("bot".into());
        config.save(&path).unwrap();

        let loaded = ClientConfig::from_file(&path).unwrap();
        assert_eq!(loaded.server.flood_rate, FloodSetting::Custom { interval_ms: 100 });
        assert_eq!(loaded.nickname.as_deref(), Some("bot"));
    }

    #[test]
    fn test_missing_file() {
        let err = ClientConfig::from_file("/nonexistent/tsquery.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::IoError(..)));
        assert!(err.to_string().contains("failed to read config file"));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("TSQUERY_HOST", "10.0.0.5"),
            ("TSQUERY_PORT", "10022"),
            ("TSQUERY_FLOOD_RATE", "250"),
            ("TSQUERY_RECONNECT", "user-controlled"),
            ("TSQUERY_USER", "admin"),
            ("TSQUERY_SERVER_ID", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let mut config = ClientConfig::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.server.host, "10.0.0.5");
        assert_eq!(config.server.port, 10022);
        assert_eq!(config.server.flood_rate, FloodSetting::Custom { interval_ms: 250 });
        assert_eq!(config.reconnect.strategy, ReconnectKind::UserControlled);
        assert_eq!(config.login.as_ref().unwrap().username, "admin");
        assert_eq!(config.server_id, None);
    }

    #[test]
    fn test_validation() {
        let mut config = ClientConfig::default();
        config.server.port = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));

        let mut config = ClientConfig::default();
        config.login = Some(LoginConfig::default());
        let err: ClientError = config.validate().unwrap_err().into();
        assert!(matches!(err, ClientError::Config(_)));
    }
}
