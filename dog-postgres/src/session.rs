//! Per-unit-of-work tenant binding.
//!
//! Every storage call made on behalf of a request goes through
//! [`TenantSession::run`]: open a transaction, bind the tenant with a
//! transaction-local `set_config`, run the caller's work, then commit or
//! roll back. The binding dies with the transaction, so a pooled connection
//! never carries one tenant's binding into the next checkout.

use std::fmt;
use std::time::{Duration, Instant};

use anyhow::Result;
use dog_core::config::validate_session_variable;
use dog_core::{RequestContext, TenancyError, TenancySettings, TenantId};
use futures::future::BoxFuture;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};

use crate::error::{classify, classify_sqlx, tenancy_error};

const SLOW_UNIT_OF_WORK: Duration = Duration::from_millis(100);

/// Name of the connection-scoped variable the binder writes and the
/// isolation policy reads.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionVariable(String);

impl SessionVariable {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        validate_session_variable(&name)?;
        Ok(Self(name))
    }

    pub fn from_settings(settings: &TenancySettings) -> Result<Self> {
        Self::new(settings.session_variable.clone())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionVariable {
    fn default() -> Self {
        Self("app.org_id".to_string())
    }
}

impl fmt::Display for SessionVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Bind `tenant` for the rest of the current transaction.
///
/// Binding the same tenant twice is a no-op in effect.
pub async fn bind(conn: &mut PgConnection, variable: &SessionVariable, tenant: &TenantId) -> Result<()> {
    set_local(conn, variable, &tenant.to_canonical()).await
}

/// Bind an unvalidated value. Only the harness and tests need this.
///
/// An empty value is refused here: after a transaction-local binding ends
/// the engine reports the variable as `''`, which the policy treats as
/// "no tenant", so binding `''` would look like never binding at all.
/// Anything else goes to the engine and is judged by the policy's cast.
pub async fn bind_raw(conn: &mut PgConnection, variable: &SessionVariable, raw: &str) -> Result<()> {
    if raw.is_empty() {
        tracing::error!(variable = %variable, "refusing to bind an empty tenant value");
        return Err(TenancyError::IsolationCastError(
            "refusing to bind an empty tenant value".to_string(),
        )
        .into_anyhow());
    }
    set_local(conn, variable, raw).await
}

/// The value currently bound, `None` when unset or reset.
pub async fn current_binding(conn: &mut PgConnection, variable: &SessionVariable) -> Result<Option<String>> {
    let value: Option<String> = sqlx::query_scalar("SELECT current_setting($1, true)")
        .bind(variable.as_str())
        .fetch_one(&mut *conn)
        .await
        .map_err(classify_sqlx)?;
    Ok(value.filter(|v| !v.is_empty()))
}

async fn set_local(conn: &mut PgConnection, variable: &SessionVariable, value: &str) -> Result<()> {
    sqlx::query("SELECT set_config($1, $2, true)")
        .bind(variable.as_str())
        .bind(value)
        .execute(&mut *conn)
        .await
        .map_err(classify_sqlx)?;
    Ok(())
}

/// Runs units of work bound to one tenant.
#[derive(Clone, Debug)]
pub struct TenantSession {
    pool: PgPool,
    variable: SessionVariable,
}

impl TenantSession {
    pub fn new(pool: PgPool, variable: SessionVariable) -> Self {
        Self { pool, variable }
    }

    pub fn from_settings(pool: PgPool, settings: &TenancySettings) -> Result<Self> {
        Ok(Self::new(pool, SessionVariable::from_settings(settings)?))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn variable(&self) -> &SessionVariable {
        &self.variable
    }

    /// Run `f` in a transaction bound to `tenant`.
    ///
    /// Commits when `f` succeeds, rolls back otherwise. Engine errors that
    /// mean isolation stopped the work come back as [`TenancyError`]s.
    pub async fn run<F, T>(&self, tenant: &TenantId, f: F) -> Result<T>
    where
        F: for<'c> FnOnce(&'c mut Transaction<'_, Postgres>) -> BoxFuture<'c, Result<T>> + Send,
        T: Send,
    {
        let start = Instant::now();
        let mut tx = self.pool.begin().await.map_err(classify_sqlx)?;

        bind(&mut tx, &self.variable, tenant).await?;

        let result = match f(&mut tx).await.map_err(classify) {
            Ok(value) => {
                tx.commit().await.map_err(classify_sqlx)?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::warn!(tenant = %tenant, error = %rollback, "rollback failed");
                }
                if let Some(tenancy) = tenancy_error(&e) {
                    tracing::debug!(tenant = %tenant, reason = tenancy.reason(), "unit of work aborted");
                }
                Err(e)
            }
        };

        let elapsed = start.elapsed();
        if elapsed > SLOW_UNIT_OF_WORK {
            tracing::warn!(
                tenant = %tenant,
                duration_ms = elapsed.as_millis() as u64,
                "slow tenant unit of work"
            );
        }

        result
    }

    /// Like [`run`](Self::run), for the context the request gate produced.
    ///
    /// An unbound context (allow-listed route) never reaches storage.
    pub async fn run_for<F, T>(&self, ctx: &RequestContext, f: F) -> Result<T>
    where
        F: for<'c> FnOnce(&'c mut Transaction<'_, Postgres>) -> BoxFuture<'c, Result<T>> + Send,
        T: Send,
    {
        match ctx.tenant() {
            Some(tenant) => self.run(tenant, f).await,
            None => {
                tracing::error!("storage access attempted without a bound tenant");
                Err(TenancyError::IsolationCastError(
                    "request context is not bound to a tenant".to_string(),
                )
                .into_anyhow())
            }
        }
    }
}
