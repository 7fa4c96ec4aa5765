use std::time::Duration;

use anyhow::{anyhow, Result};
use dog_core::DogConfigSnapshot;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Connection pool settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
    pub idle_timeout_secs: Option<u64>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
            acquire_timeout_secs: 30,
            idle_timeout_secs: None,
        }
    }
}

impl PoolConfig {
    /// Reads `database.max_connections`, `database.min_connections`,
    /// `database.acquire_timeout_secs` and `database.idle_timeout_secs`.
    pub fn from_snapshot(snap: &DogConfigSnapshot) -> Result<Self> {
        let defaults = Self::default();
        let cfg = Self {
            max_connections: snap
                .get_parsed("database.max_connections")?
                .unwrap_or(defaults.max_connections),
            min_connections: snap
                .get_parsed("database.min_connections")?
                .unwrap_or(defaults.min_connections),
            acquire_timeout_secs: snap
                .get_parsed("database.acquire_timeout_secs")?
                .unwrap_or(defaults.acquire_timeout_secs),
            idle_timeout_secs: snap.get_parsed("database.idle_timeout_secs")?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 || self.max_connections < self.min_connections {
            return Err(anyhow!(
                "max_connections must be > 0 and >= min_connections ({} < {})",
                self.max_connections,
                self.min_connections
            ));
        }
        Ok(())
    }

    pub fn options(&self) -> PgPoolOptions {
        let mut opts = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .min_connections(self.min_connections)
            .acquire_timeout(Duration::from_secs(self.acquire_timeout_secs));
        if let Some(idle) = self.idle_timeout_secs {
            opts = opts.idle_timeout(Duration::from_secs(idle));
        }
        opts
    }
}

pub async fn connect(database_url: &str, config: &PoolConfig) -> Result<PgPool> {
    config.validate()?;
    let pool = config.options().connect(database_url).await?;
    tracing::debug!(max_connections = config.max_connections, "postgres pool ready");
    Ok(pool)
}

/// A pool that connects on first use.
pub fn connect_lazy(database_url: &str, config: &PoolConfig) -> Result<PgPool> {
    config.validate()?;
    Ok(config.options().connect_lazy(database_url)?)
}
