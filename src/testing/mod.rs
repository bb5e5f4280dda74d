//! Testing utilities and mock implementations
//!
//! Mocks for the admin and messaging clients so the driver can be exercised without a
//! Pulsar cluster.

pub mod mocks;

pub use mocks::*;
