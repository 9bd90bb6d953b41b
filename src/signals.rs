//! # Interrupt Signals
//!
//! One-way flags raised by interrupt handlers and taken by the main loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Single-producer, single-consumer flag.
///
/// The handler only calls [`Signal::raise`]; the main loop consumes the flag
/// with [`Signal::take`] once per iteration.
#[derive(Debug, Clone, Default)]
pub struct Signal {
    flag: Arc<AtomicBool>,
}

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Consume the flag, returning whether it was raised.
    pub fn take(&self) -> bool {
        self.flag.swap(false, Ordering::AcqRel)
    }

    pub fn is_raised(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Flags shared with the motion and button handlers.
#[derive(Debug, Clone, Default)]
pub struct InterruptSignals {
    pub motion: Signal,
    pub button: Signal,
}

impl InterruptSignals {
    pub fn new() -> Self {
        Self::default()
    }
}
