//! Local workload inventory — which services this node hosts right now.
//!
//! The workload supervisor owns the real list; the router only reads it, to
//! build announcements and to find the port a forwarded request targets.

use std::sync::{Arc, RwLock};

use undock_core::config::LocalService;

pub trait ServiceInventory: Send + Sync {
    /// Current list of locally hosted services.
    fn services(&self) -> Vec<LocalService>;

    fn find(&self, service_id: &str) -> Option<LocalService> {
        self.services().into_iter().find(|s| s.id == service_id)
    }
}

/// Inventory held in memory and replaced wholesale by whoever supervises the
/// workloads. Clones share state.
#[derive(Clone, Default)]
pub struct StaticInventory {
    services: Arc<RwLock<Vec<LocalService>>>,
}

impl StaticInventory {
    pub fn new(services: Vec<LocalService>) -> Self {
        Self {
            services: Arc::new(RwLock::new(services)),
        }
    }

    pub fn set(&self, services: Vec<LocalService>) {
        *self.services.write().unwrap_or_else(|e| e.into_inner()) = services;
    }
}

impl ServiceInventory for StaticInventory {
    fn services(&self) -> Vec<LocalService> {
        self.services
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}
