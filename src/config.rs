//! Controller configuration
//!
//! Loaded from an optional TOML file; command-line flags are applied on top.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ControllerError, ControllerResult};
use crate::types::DEFAULT_PORT;

/// Top-level controller configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Endpoint names whose addresses make up the replica set
    pub endpoints: Vec<String>,
    /// Replica set name used when initiating
    pub set_name: String,
    /// Port assumed for names without one
    pub default_port: u16,
    /// Keep reconciling instead of running a single pass
    pub watch: bool,
    /// Delay between passes in watch mode
    pub poll_interval_secs: u64,
    /// Allow forced reconfiguration when no healthy primary exists
    pub force_reconfigure: bool,
    pub timeouts: TimeoutConfig,
    pub backoff: BackoffConfig,
    pub auth: Option<AuthConfig>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            set_name: "rs".to_string(),
            default_port: DEFAULT_PORT,
            watch: false,
            poll_interval_secs: 5,
            force_reconfigure: false,
            timeouts: TimeoutConfig::default(),
            backoff: BackoffConfig::default(),
            auth: None,
        }
    }
}

/// Per-call timeouts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// DNS lookup of one endpoint name
    pub resolve_ms: u64,
    /// One administrative call against one member
    pub call_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            resolve_ms: 2_000,
            call_ms: 5_000,
        }
    }
}

/// Retry delay growth after failed passes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub initial_ms: u64,
    pub max_ms: u64,
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_ms: 1_000,
            max_ms: 60_000,
            multiplier: 2.0,
        }
    }
}

/// Credentials for the admin connection
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthConfig {
    pub username: String,
    pub password: String,
    /// Authentication database, `admin` when unset
    pub source: Option<String>,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("source", &self.source)
            .finish()
    }
}

impl ControllerConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> ControllerResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            ControllerError::Configuration(format!("Failed to read {}: {}", path.display(), e))
        })?;

        toml::from_str(&content).map_err(|e| {
            ControllerError::Configuration(format!("Failed to parse {}: {}", path.display(), e))
        })
    }

    /// Check the configuration for values the engine cannot work with
    pub fn validate(&self) -> ControllerResult<()> {
        if self.endpoints.is_empty() {
            return Err(ControllerError::Configuration("at least one endpoint name is required".to_string()));
        }
        if self.endpoints.iter().any(|e| e.trim().is_empty()) {
            return Err(ControllerError::Configuration("endpoint names cannot be empty".to_string()));
        }
        if self.set_name.is_empty() {
            return Err(ControllerError::Configuration("replica set name cannot be empty".to_string()));
        }
        if self.default_port == 0 {
            return Err(ControllerError::Configuration("default port cannot be 0".to_string()));
        }
        if self.poll_interval_secs == 0 {
            return Err(ControllerError::Configuration("poll interval must be at least one second".to_string()));
        }
        if self.timeouts.resolve_ms == 0 || self.timeouts.call_ms == 0 {
            return Err(ControllerError::Configuration("timeouts must be positive".to_string()));
        }
        if self.backoff.multiplier < 1.0 || !self.backoff.multiplier.is_finite() {
            return Err(ControllerError::Configuration("backoff multiplier must be at least 1".to_string()));
        }
        if self.backoff.initial_ms == 0 || self.backoff.initial_ms > self.backoff.max_ms {
            return Err(ControllerError::Configuration(
                "backoff initial delay must be positive and not exceed the maximum".to_string(),
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.resolve_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.call_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn valid() -> ControllerConfig {
        ControllerConfig {
            endpoints: vec!["mongo".to_string()],
            ..ControllerConfig::default()
        }
    }

    #[test]
    fn test_defaults_follow_original_controller() {
        let config = ControllerConfig::default();
        assert_eq!(config.set_name, "rs");
        assert_eq!(config.default_port, 27017);
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
        assert!(!config.force_reconfigure);
    }

    #[test]
    fn test_validate() {
        assert!(valid().validate().is_ok());
        assert!(ControllerConfig::default().validate().is_err());

        let mut config = valid();
        config.backoff.multiplier = 0.5;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.backoff.initial_ms = config.backoff.max_ms + 1;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.poll_interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file_partial() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
endpoints = ["tasks.mongo"]
set_name = "rs0"
watch = true

[backoff]
max_ms = 30000

[auth]
username = "admin"
password = "secret"
"#
        )
        .unwrap();

        let config = ControllerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.endpoints, vec!["tasks.mongo".to_string()]);
        assert_eq!(config.set_name, "rs0");
        assert!(config.watch);
        assert_eq!(config.backoff.max_ms, 30_000);
        assert_eq!(config.backoff.initial_ms, 1_000);
        assert_eq!(config.timeouts, TimeoutConfig::default());
        assert_eq!(config.auth.as_ref().map(|a| a.username.as_str()), Some("admin"));
        assert!(!format!("{:?}", config.auth).contains("secret"));
    }

    #[test]
    fn test_from_file_missing() {
        let err = ControllerConfig::from_file("/nonexistent/controller.toml").unwrap_err();
        assert!(matches!(err, ControllerError::Configuration(_)));
    }
}
