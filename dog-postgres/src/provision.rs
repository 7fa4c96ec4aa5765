use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use sqlx::PgPool;

/// Serialises concurrent provisioning runs against the same database.
const PROVISION_LOCK: i64 = 0x646f_675f_7267;

/// Run `statements` in one transaction, holding an advisory lock.
pub async fn apply_statements(admin: &PgPool, statements: &[String]) -> Result<()> {
    let mut tx = admin.begin().await?;

    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(PROVISION_LOCK)
        .execute(&mut *tx)
        .await?;

    for (i, stmt) in statements.iter().enumerate() {
        tracing::debug!(step = i, statement = %stmt, "provisioning");
        sqlx::raw_sql(stmt)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("provisioning step {i} failed: {stmt}"))?;
    }

    tx.commit().await?;
    Ok(())
}

/// Load a schema file and run it as a single provisioning step.
pub async fn load_schema_from_file(admin: &PgPool, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let schema = fs::read_to_string(path)
        .with_context(|| format!("failed to read schema file {}", path.display()))?;

    apply_statements(admin, &[schema]).await?;
    tracing::info!(path = %path.display(), "schema loaded");
    Ok(())
}
