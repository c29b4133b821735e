//! Transport layer for device telemetry
//!
//! This module provides the transport abstraction the publish workflow runs
//! against, and the MQTT implementation used in production.

use crate::auth::AuthToken;
use crate::certificate::RootCertificate;
use crate::config::{BrokerAddress, PublisherConfig};
use crate::error::PublisherResult;
use bytes::Bytes;
use rumqttc::QoS;
use std::time::Duration;
use tokio::sync::mpsc;

pub mod events;
pub mod mqtt;

pub use events::{observe_session_events, EventTally, SessionEvent};
pub use mqtt::ConnectionState;

/// Transport trait for device sessions
///
/// Connect and publish failures are reported as `Err` values; callers never
/// have to poll connection state to find out that an operation failed.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Open the session and wait for the broker to accept it
    async fn connect(&mut self, request: ConnectRequest) -> Result<(), Self::Error>;

    /// Hand one message to the transport
    async fn publish(&self, message: OutgoingMessage) -> Result<PublishReceipt, Self::Error>;

    /// Close the session; calling it again is a no-op
    async fn disconnect(&mut self) -> Result<(), Self::Error>;

    /// Check if transport is currently connected
    fn is_connected(&self) -> bool;

    /// Get current connection state
    fn connection_state(&self) -> ConnectionState;

    /// Take the receiving end of the session event channel (only once)
    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<SessionEvent>>;
}

/// Builds transports once the trust anchors are known
pub trait TransportFactory {
    type Transport: Transport;

    fn create(&self, settings: SessionSettings) -> PublisherResult<Self::Transport>;
}

/// Everything needed to open a session except the credentials
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub broker: BrokerAddress,
    pub root_certificate: RootCertificate,
    pub keep_alive: Duration,
    pub clean_session: bool,
    pub connect_timeout: Duration,
}

impl SessionSettings {
    pub fn from_config(
        config: &PublisherConfig,
        root_certificate: RootCertificate,
    ) -> PublisherResult<Self> {
        Ok(Self {
            broker: config.broker_address()?,
            root_certificate,
            keep_alive: config.keep_alive(),
            clean_session: config.mqtt.clean_session,
            connect_timeout: config.connect_timeout(),
        })
    }
}

/// Connect-time credentials; the broker ignores the username
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    pub client_id: String,
    pub token: AuthToken,
}

/// One message handed to [`Transport::publish`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
}

/// Returned when the transport accepted a message for sending
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishReceipt {
    /// Payload size in bytes
    pub bytes: usize,
}
