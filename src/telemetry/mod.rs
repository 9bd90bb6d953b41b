//! # Telemetry Module
//!
//! Records every transmitted uplink to daily CSV files with rotation.
//!
//! This module handles:
//! - Formatting uplinks as CSV lines with local timestamps
//! - Starting a new file per local date
//! - Retaining only the last N files

pub mod uplink_log;

pub use uplink_log::{UplinkLog, UplinkRecord, CSV_HEADER};
