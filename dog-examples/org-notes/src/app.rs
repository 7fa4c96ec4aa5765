use std::sync::Arc;

use anyhow::Result;
use dog_axum::{axum, AxumApp};
use dog_core::{DogConfig, DogConfigSnapshot, TenancySettings};
use dog_postgres::{
    IsolationPolicy, PgTenantResolver, RequestPrincipal, SessionVariable, TableName,
    TenantOwnedTable, TenantSession,
};
use sqlx::PgPool;

use crate::services;

/// Bundled schema, applied by `org-notes provision`.
pub const SCHEMA: &str = include_str!("../sql/schema.sql");

/// Defaults, then `DOG__*` environment overrides.
pub fn load_config() -> DogConfig {
    let mut cfg = DogConfig::with_defaults();
    cfg.set("database.app_role", "org_notes_app");
    cfg.load_env("DOG__");
    cfg
}

pub fn build(pool: PgPool, config: &DogConfigSnapshot) -> Result<AxumApp> {
    let settings = config.tenancy()?;
    let resolver = Arc::new(PgTenantResolver::new(pool.clone(), catalog_table(config)?));
    let session = TenantSession::from_settings(pool, &settings)?;

    Ok(axum(resolver, &settings)
        .use_router("/notes", services::notes::router(session))
        .use_router("/webhooks", services::webhooks::router()))
}

pub fn isolation_policy(settings: &TenancySettings) -> Result<IsolationPolicy> {
    Ok(IsolationPolicy::new(SessionVariable::from_settings(settings)?)
        .table(TenantOwnedTable::parse("notes", "org_id")?))
}

fn catalog_table(config: &DogConfigSnapshot) -> Result<TableName> {
    TableName::parse(config.get("database.catalog_table").unwrap_or("organizations"))
}

/// Read/write on `public`, except the tenant catalog, which requests only
/// look up.
pub fn request_principal(config: &DogConfigSnapshot) -> Result<RequestPrincipal> {
    Ok(
        RequestPrincipal::new(config.get("database.app_role").unwrap_or("org_notes_app"))?
            .app_schema("public")?
            .catalog_table(catalog_table(config)?),
    )
}
