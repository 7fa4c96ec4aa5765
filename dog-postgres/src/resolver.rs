use anyhow::Result;
use async_trait::async_trait;
use dog_core::{TenantExistence, TenantId, TenantResolver};
use sqlx::PgPool;

use crate::sql::TableName;

/// Tenant resolver backed by the tenant catalog table.
///
/// The catalog is looked up before any tenant is bound, so it must not be
/// subject to the tenant isolation policy itself.
#[derive(Clone, Debug)]
pub struct PgTenantResolver {
    pool: PgPool,
    catalog: TableName,
    lookup: String,
}

impl PgTenantResolver {
    pub fn new(pool: PgPool, catalog: TableName) -> Self {
        let lookup = format!(
            "SELECT EXISTS (SELECT 1 FROM {} WHERE id = $1)",
            catalog.quoted()
        );
        Self {
            pool,
            catalog,
            lookup,
        }
    }

    pub fn catalog(&self) -> &TableName {
        &self.catalog
    }
}

#[async_trait]
impl TenantResolver for PgTenantResolver {
    async fn resolve(&self, tenant: &TenantId) -> Result<TenantExistence> {
        let exists: bool = sqlx::query_scalar(&self.lookup)
            .bind(*tenant.as_uuid())
            .fetch_one(&self.pool)
            .await?;

        Ok(if exists {
            TenantExistence::Exists
        } else {
            TenantExistence::NotFound
        })
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
