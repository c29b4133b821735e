//! IoT Core Publisher
//!
//! A device-side telemetry publisher for the Cloud IoT Core MQTT bridge.
//!
//! # Overview
//!
//! One run of the publisher:
//! - loads the root CA certificate used as the TLS trust anchor
//! - mints an RS256 JWT (`iat`, `exp = iat + 3600`, `aud = project id`)
//! - connects over MQTT 3.1.1 / TLS 1.2 with the token as password
//! - publishes numbered messages at QoS 0 with `retain = true`, one second apart
//! - disconnects
//!
//! # Quick Start
//!
//! ```rust
//! use iotcore_publisher::auth::{FixedClock, TokenMinter};
//! use iotcore_publisher::publisher::build_payload;
//!
//! let clock = FixedClock::at_epoch_secs(1_700_000_000).unwrap();
//! let minter = TokenMinter::with_clock("my-project", clock);
//! let pem = include_bytes!(concat!(
//!     env!("CARGO_MANIFEST_DIR"),
//!     "/tests/fixtures/rsa_private.pem"
//! ));
//!
//! let token = minter.mint(pem)?;
//! assert_eq!(token.claims().exp - token.claims().iat, 3600);
//! assert_eq!(token.claims().aud, "my-project");
//! assert_eq!(build_payload(3), "Data packet #3 to GCP IoT Core.");
//! # Ok::<(), iotcore_publisher::PublisherError>(())
//! ```

pub mod auth;
pub mod certificate;
pub mod config;
pub mod error;
pub mod observability;
pub mod publisher;
pub mod testing;
pub mod transport;
pub mod workflow;

pub use auth::{AuthToken, Claims, TokenMinter};
pub use certificate::RootCertificate;
pub use config::{ConfigError, ConfigOverrides, PublisherConfig};
pub use error::{PublisherError, PublisherResult};
pub use publisher::{build_payload, FailurePolicy, PayloadEncoding, PublishPlan, PublishReport};
pub use transport::mqtt::{MqttSession, MqttSessionFactory};
pub use transport::{Transport, TransportFactory};
pub use workflow::RunReport;
