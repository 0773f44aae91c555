//! Single-flight gate.
//!
//! A [`SingleFlight`] admits at most one holder at a time. Admission hands
//! out an owned [`FlightTicket`]; the gate reopens when the ticket drops, so a
//! task that panics or is cancelled still releases it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A gate that admits one operation at a time.
#[derive(Debug, Clone, Default)]
pub struct SingleFlight {
    busy: Arc<AtomicBool>,
}

impl SingleFlight {
    /// Creates an open gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the gate, or returns `None` if it is already held.
    pub fn try_begin(&self) -> Option<FlightTicket> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlightTicket {
                busy: Arc::clone(&self.busy),
            })
    }
}

/// Proof of admission; releases the gate on drop.
#[derive(Debug)]
#[must_use = "the gate reopens as soon as the ticket is dropped"]
pub struct FlightTicket {
    busy: Arc<AtomicBool>,
}

impl Drop for FlightTicket {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}
