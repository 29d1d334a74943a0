//! Configuration loading traits and types.
//!
//! TOML configuration for tensorpool clients: a `[shared]` table common to
//! every process and a `[client]` table with the control-plane timings.
//!
//! # Usage
//!
//! ```rust,no_run
//! use tensorpool_common::config::{ConfigLoader, ConfigError, TensorPoolConfig};
//! use std::path::Path;
//!
//! fn main() -> Result<(), ConfigError> {
//!     let config = TensorPoolConfig::load(Path::new("tensorpool.toml"))?;
//!     config.validate()?;
//!     println!("client {}", config.client.client_id);
//!     Ok(())
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Error type for configuration loading operations.
///
/// This enum represents all possible errors that can occur when loading
/// configuration files.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at specified path.
    #[error("Configuration file not found")]
    FileNotFound,

    /// TOML parsing failed.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Log level for application logging.
///
/// Represents the verbosity level of logging output.
/// Uses lowercase serde values for TOML compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Most verbose, detailed tracing information.
    Trace,
    /// Debug information useful during development.
    Debug,
    /// General information about application operation.
    #[default]
    Info,
    /// Warning messages for potentially problematic situations.
    Warn,
    /// Error messages for serious problems.
    Error,
}

/// Common configuration fields shared across all tensorpool processes.
///
/// This struct should be embedded in application-specific configuration
/// structs to provide consistent base configuration.
///
/// # TOML Example
///
/// ```toml
/// [shared]
/// log_level = "debug"
/// service_name = "camera-producer-01"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedConfig {
    /// Logging verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Application instance identifier.
    pub service_name: String,
}

impl SharedConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if:
    /// - `service_name` is empty
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.is_empty() {
            return Err(ConfigError::ValidationError(
                "service_name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Client runtime timings and identity.
///
/// All durations are nanoseconds of `CLOCK_MONOTONIC`. Every field has a
/// default so an empty `[client]` table is valid.
///
/// # TOML Example
///
/// ```toml
/// [client]
/// client_id = 42
/// attach_timeout_ns = 5_000_000_000
/// lease_keepalive_interval_ns = 1_000_000_000
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    /// Identifier sent in attach, keepalive and QoS messages.
    #[serde(default = "default_client_id")]
    pub client_id: u32,

    /// Deadline for an attach response.
    #[serde(default = "default_attach_timeout_ns")]
    pub attach_timeout_ns: u64,

    /// Interval between attach request retransmissions.
    #[serde(default = "default_attach_retry_interval_ns")]
    pub attach_retry_interval_ns: u64,

    /// Deadline for a detach response.
    #[serde(default = "default_detach_timeout_ns")]
    pub detach_timeout_ns: u64,

    /// Interval between lease keepalives.
    #[serde(default = "default_lease_keepalive_interval_ns")]
    pub lease_keepalive_interval_ns: u64,

    /// Interval between producer announces.
    #[serde(default = "default_announce_interval_ns")]
    pub announce_interval_ns: u64,

    /// Maximum age of an announce a consumer still applies.
    #[serde(default = "default_announce_freshness_ns")]
    pub announce_freshness_ns: u64,

    /// Interval between QoS reports.
    #[serde(default = "default_qos_interval_ns")]
    pub qos_interval_ns: u64,

    /// Fragments handled per channel per `do_work` call.
    #[serde(default = "default_control_poll_limit")]
    pub control_poll_limit: usize,
}

const MS: u64 = 1_000_000;

fn default_client_id() -> u32 {
    1
}
fn default_attach_timeout_ns() -> u64 {
    5_000 * MS
}
fn default_attach_retry_interval_ns() -> u64 {
    250 * MS
}
fn default_detach_timeout_ns() -> u64 {
    1_000 * MS
}
fn default_lease_keepalive_interval_ns() -> u64 {
    1_000 * MS
}
fn default_announce_interval_ns() -> u64 {
    1_000 * MS
}
fn default_announce_freshness_ns() -> u64 {
    3_000 * MS
}
fn default_qos_interval_ns() -> u64 {
    1_000 * MS
}
fn default_control_poll_limit() -> usize {
    10
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_id: default_client_id(),
            attach_timeout_ns: default_attach_timeout_ns(),
            attach_retry_interval_ns: default_attach_retry_interval_ns(),
            detach_timeout_ns: default_detach_timeout_ns(),
            lease_keepalive_interval_ns: default_lease_keepalive_interval_ns(),
            announce_interval_ns: default_announce_interval_ns(),
            announce_freshness_ns: default_announce_freshness_ns(),
            qos_interval_ns: default_qos_interval_ns(),
            control_poll_limit: default_control_poll_limit(),
        }
    }
}

impl ClientConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if:
    /// - any interval, timeout or the poll limit is zero
    /// - `attach_retry_interval_ns` exceeds `attach_timeout_ns`
    pub fn validate(&self) -> Result<(), ConfigError> {
        let intervals = [
            ("attach_timeout_ns", self.attach_timeout_ns),
            ("attach_retry_interval_ns", self.attach_retry_interval_ns),
            ("detach_timeout_ns", self.detach_timeout_ns),
            ("lease_keepalive_interval_ns", self.lease_keepalive_interval_ns),
            ("announce_interval_ns", self.announce_interval_ns),
            ("announce_freshness_ns", self.announce_freshness_ns),
            ("qos_interval_ns", self.qos_interval_ns),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::ValidationError(format!(
                "{name} must be greater than zero"
            )));
        }
        if self.control_poll_limit == 0 {
            return Err(ConfigError::ValidationError(
                "control_poll_limit must be greater than zero".to_string(),
            ));
        }
        if self.attach_retry_interval_ns > self.attach_timeout_ns {
            return Err(ConfigError::ValidationError(
                "attach_retry_interval_ns cannot exceed attach_timeout_ns".to_string(),
            ));
        }
        Ok(())
    }
}

/// Root of a tensorpool configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TensorPoolConfig {
    /// Process-wide settings.
    pub shared: SharedConfig,

    /// Client runtime settings.
    #[serde(default)]
    pub client: ClientConfig,
}

impl TensorPoolConfig {
    /// Validate both tables.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;
        self.client.validate()
    }
}

/// Trait for loading configuration from TOML files.
///
/// This trait provides a default implementation that works with any type
/// implementing `serde::de::DeserializeOwned`.
///
/// # Contract
///
/// - Returns `ConfigError::FileNotFound` if the file does not exist
/// - Returns `ConfigError::ParseError` if TOML syntax is invalid
/// - Returns `ConfigError::ValidationError` if semantic validation fails
///
/// # Example
///
/// ```rust,no_run
/// use tensorpool_common::config::{ConfigLoader, SharedConfig, ConfigError};
/// use serde::Deserialize;
/// use std::path::Path;
///
/// #[derive(Debug, Deserialize)]
/// struct AppConfig {
///     shared: SharedConfig,
/// }
///
/// fn main() -> Result<(), ConfigError> {
///     let config = AppConfig::load(Path::new("config.toml"))?;
///     Ok(())
/// }
/// ```
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Load configuration from a TOML file.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the TOML configuration file
    ///
    /// # Returns
    ///
    /// * `Ok(Self)` - Successfully loaded and parsed configuration
    /// * `Err(ConfigError)` - Loading or parsing failed
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound
            } else {
                ConfigError::ParseError(e.to_string())
            }
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

// Blanket implementation for all types that implement DeserializeOwned.
// This allows any serde-deserializable struct to use ConfigLoader.
impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_log_level_default() {
        assert_eq!(LogLevel::default(), LogLevel::Info);
    }

    #[test]
    fn test_log_level_serialization() {
        // Test serialization within a struct (TOML requires a table)
        #[derive(Serialize)]
        struct TestWrapper {
            level: LogLevel,
        }

        let wrapper = TestWrapper {
            level: LogLevel::Trace,
        };
        assert!(toml::to_string(&wrapper).unwrap().contains("trace"));

        let wrapper = TestWrapper {
            level: LogLevel::Debug,
        };
        assert!(toml::to_string(&wrapper).unwrap().contains("debug"));

        let wrapper = TestWrapper {
            level: LogLevel::Info,
        };
        assert!(toml::to_string(&wrapper).unwrap().contains("info"));

        let wrapper = TestWrapper {
            level: LogLevel::Warn,
        };
        assert!(toml::to_string(&wrapper).unwrap().contains("warn"));

        let wrapper = TestWrapper {
            level: LogLevel::Error,
        };
        assert!(toml::to_string(&wrapper).unwrap().contains("error"));
    }

    #[test]
    fn test_log_level_deserialization() {
        // Test deserialization within a struct (TOML requires a table)
        #[derive(Debug, Deserialize, PartialEq)]
        struct TestWrapper {
            level: LogLevel,
        }

        assert_eq!(
            toml::from_str::<TestWrapper>("level = \"trace\"")
                .unwrap()
                .level,
            LogLevel::Trace
        );
        assert_eq!(
            toml::from_str::<TestWrapper>("level = \"debug\"")
                .unwrap()
                .level,
            LogLevel::Debug
        );
        assert_eq!(
            toml::from_str::<TestWrapper>("level = \"info\"")
                .unwrap()
                .level,
            LogLevel::Info
        );
        assert_eq!(
            toml::from_str::<TestWrapper>("level = \"warn\"")
                .unwrap()
                .level,
            LogLevel::Warn
        );
        assert_eq!(
            toml::from_str::<TestWrapper>("level = \"error\"")
                .unwrap()
                .level,
            LogLevel::Error
        );
    }

    #[test]
    fn test_shared_config_validation_success() {
        let config = SharedConfig {
            log_level: LogLevel::Info,
            service_name: "test-service".to_string(),
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_shared_config_validation_empty_service_name() {
        let config = SharedConfig {
            log_level: LogLevel::Info,
            service_name: "".to_string(),
        };
        let result = config.validate();
        assert!(result.is_err());
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_config_loader_file_not_found() {
        #[allow(dead_code)]
        #[derive(Debug, Deserialize)]
        struct TestConfig {
            value: String,
        }

        let result = TestConfig::load(Path::new("/nonexistent/path/config.toml"));
        assert!(matches!(result, Err(ConfigError::FileNotFound)));
    }

    #[test]
    fn test_config_loader_parse_error() {
        #[allow(dead_code)]
        #[derive(Debug, Deserialize)]
        struct TestConfig {
            value: String,
        }

        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "invalid toml {{{{").unwrap();

        let result = TestConfig::load(file.path());
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_config_loader_success() {
        #[derive(Debug, Deserialize)]
        struct TestConfig {
            shared: SharedConfig,
            port: u16,
        }

        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"port = 8080

[shared]
log_level = "debug"
service_name = "test-service"
"#
        )
        .unwrap();
        file.flush().unwrap();

        let config = TestConfig::load(file.path()).unwrap();
        assert_eq!(config.shared.log_level, LogLevel::Debug);
        assert_eq!(config.shared.service_name, "test-service");
        assert_eq!(config.port, 8080);
    }

    #[test]
    fn test_shared_config_default_log_level() {
        #[derive(Debug, Deserialize)]
        struct TestConfig {
            shared: SharedConfig,
        }

        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[shared]
service_name = "test-service"
"#
        )
        .unwrap();
        file.flush().unwrap();

        let config = TestConfig::load(file.path()).unwrap();
        assert_eq!(config.shared.log_level, LogLevel::Info); // Default
    }

    #[test]
    fn test_client_config_defaults_are_valid() {
        let config = ClientConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.attach_retry_interval_ns < config.attach_timeout_ns);
    }

    #[test]
    fn test_client_config_rejects_zero_interval() {
        let config = ClientConfig {
            qos_interval_ns: 0,
            ..ClientConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(msg)) if msg.contains("qos_interval_ns")
        ));
    }

    #[test]
    fn test_client_config_rejects_retry_longer_than_timeout() {
        let config = ClientConfig {
            attach_timeout_ns: 100,
            attach_retry_interval_ns: 200,
            ..ClientConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_tensorpool_config_empty_client_table() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[shared]
service_name = "consumer-a"
"#
        )
        .unwrap();
        file.flush().unwrap();

        let config = TensorPoolConfig::load(file.path()).unwrap();
        assert_eq!(config.client, ClientConfig::default());
        assert!(config.validate().is_ok());
    }
}
