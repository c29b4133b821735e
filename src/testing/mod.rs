//! Testing utilities and mock implementations
//!
//! Mocks for exercising the publish workflow without a broker.

pub mod mocks;

pub use mocks::*;
