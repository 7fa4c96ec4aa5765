//! Library template created with FerrisUp

//! dog-core: framework-agnostic tenant isolation core for DogRS.
//!
//! Transport adapters (dog-axum) run the [`TenantGate`] before any handler,
//! storage adapters (dog-postgres) bind the resulting tenant into each
//! unit of work.

pub mod config;
pub mod errors;
pub mod gate;
pub mod resolver;
pub mod tenant;

pub use config::{DogConfig, DogConfigSnapshot, TenancySettings};
pub use errors::{DogError, ErrorKind, TenancyError};
pub use gate::{PublicPaths, ResolverFailurePolicy, TenantGate};
pub use resolver::{InMemoryTenantCatalog, TenantExistence, TenantResolver};
pub use tenant::{validate_tenant_identifier, RequestContext, TenantId};
