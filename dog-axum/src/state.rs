use std::sync::Arc;

use dog_core::{TenancySettings, TenantGate, TenantResolver};

/// Shared state for the routes dog-axum mounts itself (health, readiness).
#[derive(Clone)]
pub struct DogAxumState {
    pub gate: Arc<TenantGate>,
}

impl DogAxumState {
    pub fn new(gate: TenantGate) -> Self {
        Self {
            gate: Arc::new(gate),
        }
    }

    pub fn from_settings(resolver: Arc<dyn TenantResolver>, settings: &TenancySettings) -> Self {
        Self::new(TenantGate::new(resolver, settings))
    }
}
