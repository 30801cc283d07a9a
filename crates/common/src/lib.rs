//! Common types shared between the telemetry core and the gateway host.

pub mod protocol;
pub mod service;

pub use service::{ExtraConfig, ServiceConfig};
