//! MQTT 3.1.1 session for the IoT Core device bridge
//!
//! This module separates pure functions from I/O operations for better
//! testability.
//!
//! # Architecture
//!
//! - [`connection`] - Pure connection state, errors and rumqttc/rustls configuration
//! - [`event_router`] - Pure routing of rumqttc events to state transitions
//! - [`client`] - Impure I/O operations and coordination
//!
//! # Usage
//!
//! ```rust,no_run
//! use iotcore_publisher::auth::TokenMinter;
//! use iotcore_publisher::certificate::RootCertificate;
//! use iotcore_publisher::config::PublisherConfig;
//! use iotcore_publisher::transport::mqtt::MqttSession;
//! use iotcore_publisher::transport::{ConnectRequest, SessionSettings};
//! use std::path::Path;
//!
//! # tokio_test::block_on(async {
//! let config = PublisherConfig::load_from_file(Path::new("iotcore.toml"))?;
//! let root = RootCertificate::load(&config.credentials.root_ca_path)?;
//! let token = TokenMinter::new(config.device.project_id.clone())
//!     .mint_from_file(&config.credentials.private_key_path)?;
//!
//! let mut session = MqttSession::new(SessionSettings::from_config(&config, root)?);
//! session
//!     .connect(ConnectRequest { client_id: config.client_id(), token })
//!     .await?;
//! session.disconnect().await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod event_router;

pub use client::{MqttSession, MqttSessionFactory};
pub use connection::{build_tls_config, configure_mqtt_options, ConnectionState, MqttError};
pub use event_router::{EventRoute, EventRouter};
