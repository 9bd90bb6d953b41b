//! # Field Node Library
//!
//! Lifecycle core for a battery-powered, duty-cycled LoRaWAN sensing node.
//!
//! This library provides the persistent settings store, the uplink
//! scheduler, the state retained across deep sleep, wake-cause
//! classification and the lifecycle state machine that ties them together.
//! Hardware is reached only through the traits in [`device`].

pub mod config;
pub mod device;
pub mod error;
pub mod lifecycle;
pub mod payload;
pub mod retained;
pub mod sampling;
pub mod scheduler;
pub mod serial;
pub mod settings;
pub mod signals;
pub mod telemetry;
pub mod wake;
