//! Configuration types.

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize, Serializer};

use crate::error::ConfigError;

/// Placeholder written wherever a password would otherwise be exposed.
const REDACTED: &str = "********";

/// Top-level configuration file (`config.json`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub global: GlobalConfig,
    #[serde(default)]
    pub users: Vec<UserAccount>,
}

/// Process-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Listen address of the control surface.
    #[serde(default = "default_server")]
    pub server: String,
    /// Maximum number of concurrent study workers.
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_server() -> String {
    "0.0.0.0:10086".to_string()
}

fn default_limit() -> usize {
    3
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            server: default_server(),
            limit: default_limit(),
        }
    }
}

/// One platform account to study with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAccount {
    pub base_url: String,
    #[serde(default)]
    pub school_id: i64,
    pub username: String,
    #[serde(serialize_with = "expose_password")]
    pub password: SecretString,
    /// Course name filters. Empty means every enrolled course.
    #[serde(default)]
    pub course_names: Vec<String>,
}

fn expose_password<S: Serializer>(password: &SecretString, ser: S) -> Result<S::Ok, S::Error> {
    ser.serialize_str(password.expose_secret())
}

impl UserAccount {
    pub fn new(base_url: impl Into<String>, username: impl Into<String>, password: &str) -> Self {
        Self {
            base_url: base_url.into(),
            school_id: 0,
            username: username.into(),
            password: SecretString::from(password.to_string()),
            course_names: Vec::new(),
        }
    }

    pub fn with_course_names(mut self, names: Vec<String>) -> Self {
        self.course_names = names;
        self
    }
}

impl AppConfig {
    /// Read and validate a JSON config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        tracing::info!(
            path = %path.display(),
            users = config.users.len(),
            limit = config.global.limit,
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Write the config as pretty JSON, passwords included.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path, data)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.global.limit == 0 {
            return Err(ConfigError::InvalidValue {
                key: "global.limit".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if let Some(idx) = self.users.iter().position(|u| u.username.trim().is_empty()) {
            return Err(ConfigError::InvalidValue {
                key: format!("users[{idx}].username"),
                message: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// JSON view with every password replaced, for the control surface.
    pub fn redacted(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or_default();
        if let Some(users) = value.get_mut("users").and_then(|u| u.as_array_mut()) {
            for user in users {
                if let Some(obj) = user.as_object_mut() {
                    obj.insert("password".to_string(), REDACTED.into());
                }
            }
        }
        value
    }

    /// Put back the stored password of every user that still carries the
    /// redaction placeholder from [`AppConfig::redacted`].
    pub fn restore_redacted_passwords(&mut self, previous: &AppConfig) {
        for user in &mut self.users {
            if user.password.expose_secret() != REDACTED {
                continue;
            }
            if let Some(prev) = previous.users.iter().find(|p| p.username == user.username) {
                user.password = prev.password.clone();
            }
        }
    }
}

/// Timing and retry policy of a single study session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Delay between two remote progress queries.
    pub poll_interval: Duration,
    /// Delay after a successful heartbeat.
    pub heartbeat_interval: Duration,
    /// Delay before retrying a heartbeat after a transport error.
    pub retry_delay: Duration,
    /// Maximum node restarts after watcher failure (None = unbounded).
    pub max_restarts: Option<u32>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(10),
            retry_delay: Duration::from_secs(2),
            max_restarts: None,
        }
    }
}

impl SessionConfig {
    /// Defaults overridden by `COURSE_PILOT_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by the values `lookup` finds. Unparsable values
    /// keep the default.
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let secs = |key: &str| {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs)
        };
        Self {
            poll_interval: secs("COURSE_PILOT_POLL_SECS").unwrap_or(defaults.poll_interval),
            heartbeat_interval: secs("COURSE_PILOT_HEARTBEAT_SECS")
                .unwrap_or(defaults.heartbeat_interval),
            retry_delay: secs("COURSE_PILOT_RETRY_SECS").unwrap_or(defaults.retry_delay),
            max_restarts: lookup("COURSE_PILOT_MAX_RESTARTS")
                .and_then(|v| v.trim().parse().ok())
                .or(defaults.max_restarts),
        }
    }
}

/// Where the control plane keeps its files.
#[derive(Debug, Clone)]
pub struct ControlConfig {
    /// Config file rewritten by `/save-config`.
    pub config_path: PathBuf,
    /// Optional stop marker file mirrored by the cancellation signal.
    pub stop_marker: Option<PathBuf>,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("./config.json"),
            stop_marker: Some(PathBuf::from("./stop_flag")),
        }
    }
}
