//! Ambient runtime pieces: validated configuration, tracing setup, and
//! processor telemetry.

pub mod config;
pub mod telemetry;
