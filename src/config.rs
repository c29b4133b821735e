//! Configuration system for the IoT Core publisher
//!
//! Every parameter the device needs (identity, broker, credential files and
//! publish pacing) is loaded from a TOML file, optionally overridden from the
//! command line, and validated before any file or network access happens.

use crate::publisher::{FailurePolicy, PayloadEncoding};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Default MQTT bridge endpoint
pub const DEFAULT_BROKER_URL: &str = "mqtts://mqtt.googleapis.com:8883";

/// Main publisher configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublisherConfig {
    pub device: DeviceSection,
    #[serde(default)]
    pub mqtt: MqttSection,
    pub credentials: CredentialsSection,
    #[serde(default)]
    pub publish: PublishSection,
}

/// Device identity as registered in the cloud registry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceSection {
    /// Cloud project identifier, also used as the token audience
    pub project_id: String,
    /// Cloud region hosting the registry (e.g. "us-central1")
    pub region: String,
    /// Device registry identifier
    pub registry_id: String,
    /// Device identifier inside the registry
    pub device_id: String,
}

/// MQTT section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    /// Broker URL; `mqtts://` enables TLS, `mqtt://` is plaintext
    #[serde(default = "default_broker_url")]
    pub broker_url: String,
    /// Keep-alive period in seconds (default: 10)
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    /// Ask the broker to keep session state between connections
    #[serde(default)]
    pub clean_session: bool,
    /// How long to wait for the broker's CONNACK (default: 30)
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for MqttSection {
    fn default() -> Self {
        Self {
            broker_url: default_broker_url(),
            keep_alive_secs: default_keep_alive_secs(),
            clean_session: false,
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

/// Credential files
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CredentialsSection {
    /// Root CA certificate used as the TLS trust anchor (PEM or DER)
    pub root_ca_path: PathBuf,
    /// PEM encoded RSA private key registered for the device
    pub private_key_path: PathBuf,
}

/// Publish loop settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublishSection {
    /// Number of messages to publish (default: 10)
    #[serde(default = "default_message_count")]
    pub message_count: u32,
    /// Delay after each publish in milliseconds (default: 1000)
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Publish with the retain flag set (default: true)
    #[serde(default = "default_retain")]
    pub retain: bool,
    /// Text encoding of the payload
    #[serde(default)]
    pub encoding: PayloadEncoding,
    /// What to do when a single publish fails
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

impl Default for PublishSection {
    fn default() -> Self {
        Self {
            message_count: default_message_count(),
            interval_ms: default_interval_ms(),
            retain: default_retain(),
            encoding: PayloadEncoding::default(),
            failure_policy: FailurePolicy::default(),
        }
    }
}

fn default_broker_url() -> String {
    DEFAULT_BROKER_URL.to_string()
}

fn default_keep_alive_secs() -> u64 {
    10
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_message_count() -> u32 {
    10
}

fn default_interval_ms() -> u64 {
    1000
}

fn default_retain() -> bool {
    true
}

/// Values supplied on the command line or through the environment
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigOverrides {
    pub root_ca_path: Option<PathBuf>,
    pub private_key_path: Option<PathBuf>,
    pub message_count: Option<u32>,
    pub failure_policy: Option<FailurePolicy>,
}

/// Broker endpoint resolved from `mqtt.broker_url`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid {field}: {value}")]
    InvalidIdentifier { field: &'static str, value: String },
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl PublisherConfig {
    /// Load configuration from a TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text and validate it
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: PublisherConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate every field that later steps rely on
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_identifier("project_id", &self.device.project_id)?;
        validate_identifier("region", &self.device.region)?;
        validate_identifier("registry_id", &self.device.registry_id)?;
        validate_identifier("device_id", &self.device.device_id)?;

        self.broker_address()?;

        if self.mqtt.keep_alive_secs < 5 {
            return Err(ConfigError::InvalidConfig(format!(
                "keep_alive_secs must be at least 5, got {}",
                self.mqtt.keep_alive_secs
            )));
        }
        if self.mqtt.connect_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "connect_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.credentials.root_ca_path.as_os_str().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "credentials.root_ca_path must not be empty".to_string(),
            ));
        }
        if self.credentials.private_key_path.as_os_str().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "credentials.private_key_path must not be empty".to_string(),
            ));
        }

        if self.publish.message_count == 0 {
            return Err(ConfigError::InvalidConfig(
                "publish.message_count must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Apply command line overrides and re-validate
    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) -> Result<(), ConfigError> {
        if let Some(path) = overrides.root_ca_path {
            self.credentials.root_ca_path = path;
        }
        if let Some(path) = overrides.private_key_path {
            self.credentials.private_key_path = path;
        }
        if let Some(count) = overrides.message_count {
            self.publish.message_count = count;
        }
        if let Some(policy) = overrides.failure_policy {
            self.publish.failure_policy = policy;
        }
        self.validate()
    }

    /// Resolve host, port and TLS flag from the broker URL
    pub fn broker_address(&self) -> Result<BrokerAddress, ConfigError> {
        parse_broker_url(&self.mqtt.broker_url)
    }

    /// MQTT client id expected by the IoT Core bridge
    pub fn client_id(&self) -> String {
        let d = &self.device;
        format!(
            "projects/{}/locations/{}/registries/{}/devices/{}",
            d.project_id, d.region, d.registry_id, d.device_id
        )
    }

    /// Telemetry topic for this device
    pub fn events_topic(&self) -> String {
        format!("/devices/{}/events", self.device.device_id)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.mqtt.keep_alive_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.mqtt.connect_timeout_secs)
    }

    pub fn publish_interval(&self) -> Duration {
        Duration::from_millis(self.publish.interval_ms)
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[device]
project_id = "test-project"
region = "us-central1"
registry_id = "test-registry"
device_id = "test-device"

[credentials]
root_ca_path = "tests/fixtures/root_ca.pem"
private_key_path = "tests/fixtures/rsa_private.pem"
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}

fn parse_broker_url(broker_url: &str) -> Result<BrokerAddress, ConfigError> {
    let url =
        Url::parse(broker_url).map_err(|_| ConfigError::InvalidBrokerUrl(broker_url.to_string()))?;

    let tls = match url.scheme() {
        "mqtts" | "ssl" => true,
        "mqtt" | "tcp" => false,
        _ => return Err(ConfigError::InvalidBrokerUrl(broker_url.to_string())),
    };

    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| ConfigError::InvalidBrokerUrl(broker_url.to_string()))?;
    let port = url.port().unwrap_or(if tls { 8883 } else { 1883 });

    Ok(BrokerAddress {
        host: host.to_string(),
        port,
        tls,
    })
}

/// Registry identifiers may only contain `[A-Za-z0-9._+~%-]`
fn validate_identifier(field: &'static str, value: &str) -> Result<(), ConfigError> {
    let valid_chars = value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '+' | '~' | '%' | '-'));

    if value.is_empty() || !valid_chars {
        return Err(ConfigError::InvalidIdentifier {
            field,
            value: value.to_string(),
        });
    }

    Ok(())
}
