use std::collections::HashSet;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;

use crate::tenant::TenantId;

/// Outcome of a tenant catalog lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TenantExistence {
    Exists,
    NotFound,
}

/// Confirms that a syntactically valid identifier names a real, active tenant.
///
/// An `Err` means the catalog could not be consulted (storage outage),
/// which the gate handles according to its `ResolverFailurePolicy`.
/// "Not found" must be reported as `Ok(TenantExistence::NotFound)`.
#[async_trait]
pub trait TenantResolver: Send + Sync {
    async fn resolve(&self, tenant: &TenantId) -> Result<TenantExistence>;

    /// Cheap reachability probe for readiness checks.
    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// In-process tenant catalog, for tests and single-node demos.
#[derive(Debug, Default)]
pub struct InMemoryTenantCatalog {
    tenants: RwLock<HashSet<TenantId>>,
}

impl InMemoryTenantCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tenants<I>(tenants: I) -> Self
    where
        I: IntoIterator<Item = TenantId>,
    {
        Self {
            tenants: RwLock::new(tenants.into_iter().collect()),
        }
    }

    pub fn insert(&self, tenant: TenantId) {
        self.tenants
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(tenant);
    }

    pub fn remove(&self, tenant: &TenantId) -> bool {
        self.tenants
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(tenant)
    }

    pub fn contains(&self, tenant: &TenantId) -> bool {
        self.tenants
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(tenant)
    }
}

#[async_trait]
impl TenantResolver for InMemoryTenantCatalog {
    async fn resolve(&self, tenant: &TenantId) -> Result<TenantExistence> {
        Ok(if self.contains(tenant) {
            TenantExistence::Exists
        } else {
            TenantExistence::NotFound
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u8) -> TenantId {
        TenantId::parse(&format!("00000000-0000-4000-8000-0000000000{n:02x}")).unwrap()
    }

    #[tokio::test]
    async fn resolves_registered_tenants_only() {
        let catalog = InMemoryTenantCatalog::with_tenants([id(1)]);

        assert_eq!(catalog.resolve(&id(1)).await.unwrap(), TenantExistence::Exists);
        assert_eq!(catalog.resolve(&id(2)).await.unwrap(), TenantExistence::NotFound);

        catalog.insert(id(2));
        assert!(catalog.remove(&id(1)));
        assert_eq!(catalog.resolve(&id(1)).await.unwrap(), TenantExistence::NotFound);
        assert_eq!(catalog.resolve(&id(2)).await.unwrap(), TenantExistence::Exists);
    }
}
