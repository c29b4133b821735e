//! Observability for the IoT Core publisher
//!
//! Structured logging via `tracing`; there is no metrics or health endpoint.

pub mod logging;

pub use logging::{init_default_logging, init_logging, LogFormat};

// Span macros for structured logging
pub use logging::{lifecycle_span, publish_span, session_span};
