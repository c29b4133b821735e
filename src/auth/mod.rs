//! Device authentication
//!
//! The IoT Core MQTT bridge does not use usernames; a device proves its
//! identity with a short-lived JWT signed by its registered private key and
//! presented as the MQTT password.

pub mod clock;
pub mod token;

pub use clock::{Clock, FixedClock, SystemClock};
pub use token::{AuthToken, Claims, TokenMinter, TOKEN_LIFETIME_SECS};
