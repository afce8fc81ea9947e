//! In-flight request gauge, published as `load` in announcements.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct LoadGauge {
    in_flight: Arc<AtomicU64>,
}

impl LoadGauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Count one request until the ticket is dropped.
    pub fn enter(&self) -> LoadTicket {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        LoadTicket {
            in_flight: self.in_flight.clone(),
        }
    }
}

pub struct LoadTicket {
    in_flight: Arc<AtomicU64>,
}

impl Drop for LoadTicket {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}
