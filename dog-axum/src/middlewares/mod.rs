pub mod tenant_gate;

pub use tenant_gate::{TenantGateLayer, TenantGateService};
