//! Pure connection state management for the MQTT session
//!
//! This module contains pure functions for connection state, error types and
//! translating session settings into rumqttc options.

use crate::certificate::RootCertificate;
use crate::transport::{ConnectRequest, SessionSettings};
use rumqttc::{MqttOptions, TlsConfiguration, Transport as RumqttcTransport};
use rustls::ClientConfig;
use std::sync::Arc;
use thiserror::Error;

/// Request channel capacity between `AsyncClient` and its event loop
pub const REQUEST_CHANNEL_CAPACITY: usize = 10;

/// Connection state for the MQTT session
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// Session created, connect not called yet
    Idle,
    /// Waiting for CONNACK
    Connecting,
    /// Broker accepted the session; publishing is allowed
    Connected,
    /// CONNACK carried a failure return code
    Refused(String),
    /// Disconnected with reason
    Disconnected(String),
}

impl ConnectionState {
    pub fn can_publish(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// Why the session ended, if it has
    pub fn reason(&self) -> Option<&str> {
        match self {
            ConnectionState::Refused(reason) | ConnectionState::Disconnected(reason) => {
                Some(reason)
            }
            ConnectionState::Idle | ConnectionState::Connecting | ConnectionState::Connected => {
                None
            }
        }
    }
}

/// MQTT transport errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Broker refused the connection: {0}")]
    ConnectionRefused(String),
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),
    #[error("ConnAck timeout - no connection confirmation received")]
    ConnectTimeout,
    #[error("Publishing failed: {0}")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Disconnect failed: {0}")]
    DisconnectFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("TLS configuration error: {0}")]
    Tls(String),
    #[error("Not connected - current state: {state:?}")]
    NotConnected { state: ConnectionState },
    #[error("Session already connected or connecting")]
    AlreadyConnected,
}

/// Pure function to configure MQTT 3.1.1 options from settings and credentials
pub fn configure_mqtt_options(
    settings: &SessionSettings,
    request: &ConnectRequest,
) -> Result<MqttOptions, MqttError> {
    let mut mqtt_options = MqttOptions::new(
        request.client_id.clone(),
        settings.broker.host.clone(),
        settings.broker.port,
    );

    mqtt_options.set_keep_alive(settings.keep_alive);
    mqtt_options.set_clean_session(settings.clean_session);

    // The bridge ignores the username; the JWT goes in the password field
    mqtt_options.set_credentials("", request.token.as_str());

    if settings.broker.tls {
        let tls_config = build_tls_config(&settings.root_certificate)?;
        mqtt_options.set_transport(RumqttcTransport::tls_with_config(
            TlsConfiguration::Rustls(Arc::new(tls_config)),
        ));
    } else {
        tracing::warn!(
            host = %settings.broker.host,
            "TLS disabled for broker connection; the device token is sent in clear text"
        );
    }

    Ok(mqtt_options)
}

/// TLS 1.2 only, trusting nothing but the configured root certificate
pub fn build_tls_config(root: &RootCertificate) -> Result<ClientConfig, MqttError> {
    let roots = root
        .root_store()
        .map_err(|e| MqttError::Tls(e.to_string()))?;

    Ok(
        ClientConfig::builder_with_protocol_versions(&[&rustls::version::TLS12])
            .with_root_certificates(roots)
            .with_no_client_auth(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{FixedClock, TokenMinter};
    use crate::config::BrokerAddress;
    use std::time::Duration;

    const ROOT_CA: &[u8] = include_bytes!("../../../tests/fixtures/root_ca.pem");
    const PRIVATE_KEY: &[u8] = include_bytes!("../../../tests/fixtures/rsa_private.pem");

    fn test_settings(tls: bool) -> SessionSettings {
        SessionSettings {
            broker: BrokerAddress {
                host: "mqtt.example.com".to_string(),
                port: 8883,
                tls,
            },
            root_certificate: RootCertificate::from_bytes("root_ca.pem", ROOT_CA).unwrap(),
            keep_alive: Duration::from_secs(10),
            clean_session: false,
            connect_timeout: Duration::from_secs(5),
        }
    }

    fn test_request() -> ConnectRequest {
        let minter = TokenMinter::with_clock(
            "test-project",
            FixedClock::at_epoch_secs(1_700_000_000).unwrap(),
        );
        ConnectRequest {
            client_id: "projects/p/locations/r/registries/g/devices/d".to_string(),
            token: minter.mint(PRIVATE_KEY).unwrap(),
        }
    }

    #[test]
    fn test_configure_mqtt_options() {
        let request = test_request();
        let options = configure_mqtt_options(&test_settings(true), &request).unwrap();

        assert_eq!(options.client_id(), request.client_id);
        assert_eq!(
            options.broker_address(),
            ("mqtt.example.com".to_string(), 8883)
        );
        assert_eq!(options.keep_alive(), Duration::from_secs(10));
        assert!(!options.clean_session());

        let (username, password) = options.credentials().unwrap();
        assert_eq!(username, "");
        assert_eq!(password, request.token.as_str());
    }

    #[test]
    fn test_tls_transport_selected_for_mqtts() {
        let options = configure_mqtt_options(&test_settings(true), &test_request()).unwrap();
        assert!(matches!(options.transport(), RumqttcTransport::Tls(_)));
    }

    #[test]
    fn test_plain_transport_for_mqtt() {
        let options = configure_mqtt_options(&test_settings(false), &test_request()).unwrap();
        assert!(matches!(options.transport(), RumqttcTransport::Tcp));
    }

    #[test]
    fn test_build_tls_config() {
        let root = RootCertificate::from_bytes("root_ca.pem", ROOT_CA).unwrap();
        assert!(build_tls_config(&root).is_ok());
    }

    #[test]
    fn test_connection_state_can_publish() {
        assert!(ConnectionState::Connected.can_publish());
        assert!(!ConnectionState::Idle.can_publish());
        assert!(!ConnectionState::Connecting.can_publish());
        assert!(!ConnectionState::Refused("NotAuthorized".to_string()).can_publish());
        assert!(!ConnectionState::Disconnected("test".to_string()).can_publish());
    }

    #[test]
    fn test_connection_state_reason() {
        assert_eq!(
            ConnectionState::Refused("NotAuthorized".to_string()).reason(),
            Some("NotAuthorized")
        );
        assert_eq!(
            ConnectionState::Disconnected("I/O: reset".to_string()).reason(),
            Some("I/O: reset")
        );
        assert_eq!(ConnectionState::Connected.reason(), None);
    }

    #[test]
    fn test_wrapped_errors_display_their_source() {
        let connect = MqttError::ConnectionFailed("I/O: Connection refused (os error 111)".into());
        assert_eq!(
            connect.to_string(),
            "Connection failed: I/O: Connection refused (os error 111)"
        );

        let publish = MqttError::PublishFailed("request channel closed".into());
        assert_eq!(
            publish.to_string(),
            "Publishing failed: request channel closed"
        );
    }

    #[test]
    fn test_mqtt_error_display() {
        let errors = vec![
            MqttError::ConnectionFailed("test".to_string().into()),
            MqttError::ConnectionRefused("BadUserNamePassword".to_string()),
            MqttError::ConnectionClosed("test".to_string()),
            MqttError::ConnectTimeout,
            MqttError::PublishFailed("test".to_string().into()),
            MqttError::Tls("test".to_string()),
            MqttError::NotConnected {
                state: ConnectionState::Idle,
            },
            MqttError::AlreadyConnected,
        ];

        for error in errors {
            assert!(!error.to_string().is_empty());
        }
    }
}
