//! # Lifecycle Module
//!
//! The orchestrator of a wake cycle.
//!
//! This module handles:
//! - Device states and their transitions
//! - Deciding on each wake whether to work or sleep again
//! - Executing console commands between steps

pub mod commands;
pub mod machine;
pub mod state;

pub use commands::{Command, MAX_LINE_LEN};
pub use machine::{CommandPort, Node};
pub use state::{CycleOutcome, DeviceState, PowerDownReason};
