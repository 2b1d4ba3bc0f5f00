//! Server library surface for the `beacon` binary and integration tests.

pub mod config;
pub mod handlers;
pub mod metrics;
