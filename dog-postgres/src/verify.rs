//! Live isolation checks against a provisioned database.
//!
//! Run as the request principal. Every transaction the harness opens is
//! rolled back, so it is safe to point at a database with real data.

use std::fmt;

use anyhow::Result;
use dog_core::{TenancyError, TenantId};
use sqlx::{Connection, PgConnection, PgPool, Postgres, Transaction};

use crate::error::{classify_sqlx, tenancy_error};
use crate::policy::{IsolationPolicy, TenantOwnedTable};
use crate::principal::check_request_principal;
use crate::session::{bind, bind_raw, current_binding};
use crate::sql::quote_ident;

const MALFORMED_BINDING: &str = "not-a-tenant-id";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckStatus {
    Passed,
    Failed(String),
    Skipped(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    pub name: String,
    pub status: CheckStatus,
}

#[derive(Debug, Clone, Default)]
pub struct IsolationReport {
    checks: Vec<CheckOutcome>,
}

impl IsolationReport {
    pub fn checks(&self) -> &[CheckOutcome] {
        &self.checks
    }

    pub fn passed(&self) -> bool {
        self.failures().next().is_none()
    }

    pub fn failures(&self) -> impl Iterator<Item = &CheckOutcome> {
        self.checks
            .iter()
            .filter(|c| matches!(c.status, CheckStatus::Failed(_)))
    }

    pub fn status_of(&self, name: &str) -> Option<&CheckStatus> {
        self.checks.iter().find(|c| c.name == name).map(|c| &c.status)
    }

    fn record(&mut self, name: String, outcome: Result<CheckStatus>) {
        let status = outcome.unwrap_or_else(|e| CheckStatus::Failed(format!("{e:#}")));
        match &status {
            CheckStatus::Passed => tracing::debug!(check = %name, "isolation check passed"),
            CheckStatus::Skipped(why) => tracing::info!(check = %name, %why, "isolation check skipped"),
            CheckStatus::Failed(why) => tracing::error!(check = %name, %why, "isolation check failed"),
        }
        self.checks.push(CheckOutcome { name, status });
    }
}

impl fmt::Display for IsolationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for check in &self.checks {
            match &check.status {
                CheckStatus::Passed => writeln!(f, "[PASS] {}", check.name)?,
                CheckStatus::Failed(why) => writeln!(f, "[FAIL] {}: {}", check.name, why)?,
                CheckStatus::Skipped(why) => writeln!(f, "[SKIP] {}: {}", check.name, why)?,
            }
        }
        Ok(())
    }
}

/// Exercises the policy with two tenants, `own` and `other`.
pub struct IsolationHarness {
    pool: PgPool,
    policy: IsolationPolicy,
}

impl IsolationHarness {
    pub fn new(pool: PgPool, policy: IsolationPolicy) -> Self {
        Self { pool, policy }
    }

    pub async fn run(&self, own: &TenantId, other: &TenantId) -> IsolationReport {
        let mut report = IsolationReport::default();

        report.record(
            "request principal".to_string(),
            check_request_principal(&self.pool)
                .await
                .map(|_| CheckStatus::Passed),
        );
        report.record("empty binding refused".to_string(), self.empty_binding().await);
        report.record(
            "no residual binding".to_string(),
            self.no_residual_binding(own).await,
        );

        let postures = self.policy.inspect(&self.pool).await;
        for (i, t) in self.policy.tables().iter().enumerate() {
            let name = |check: &str| format!("{check} ({})", t.table);

            let posture = match &postures {
                Ok(all) => match all.get(i) {
                    Some(p) if p.is_isolated() => Ok(CheckStatus::Passed),
                    Some(p) => Ok(CheckStatus::Failed(p.problems().join(", "))),
                    None => Ok(CheckStatus::Failed("not inspected".to_string())),
                },
                Err(e) => Ok(CheckStatus::Failed(format!("{e:#}"))),
            };
            report.record(name("table posture"), posture);
            report.record(name("unbound reads nothing"), self.unbound_reads_nothing(t).await);
            report.record(name("malformed binding aborts"), self.malformed_binding(t).await);
            report.record(name("cross-tenant read"), self.cross_tenant_read(t, own, other).await);
            report.record(name("cross-tenant write"), self.cross_tenant_write(t, own, other).await);
            report.record(name("re-homing rejected"), self.rehoming_rejected(t, own, other).await);
            report.record(name("idempotent binding"), self.idempotent_binding(t, own).await);
        }

        report
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>> {
        self.pool.begin().await.map_err(classify_sqlx)
    }

    async fn empty_binding(&self) -> Result<CheckStatus> {
        let mut tx = self.begin().await?;
        let outcome = bind_raw(&mut tx, self.policy.variable(), "").await;
        tx.rollback().await?;

        Ok(match outcome {
            Err(e) if is_cast_error(&e) => CheckStatus::Passed,
            Err(e) => CheckStatus::Failed(format!("unexpected error: {e:#}")),
            Ok(()) => CheckStatus::Failed("empty value was bound".to_string()),
        })
    }

    async fn no_residual_binding(&self, own: &TenantId) -> Result<CheckStatus> {
        let variable = self.policy.variable();
        let mut conn = self.pool.acquire().await?;

        let mut tx = conn.begin().await?;
        bind(&mut tx, variable, own).await?;
        tx.rollback().await?;

        let mut tx = conn.begin().await?;
        let leftover = current_binding(&mut tx, variable).await?;
        let visible = match self.policy.tables().first() {
            Some(t) => count(&mut tx, t, None).await?,
            None => 0,
        };
        tx.rollback().await?;

        Ok(match (leftover, visible) {
            (None, 0) => CheckStatus::Passed,
            (Some(v), _) => CheckStatus::Failed(format!("connection still bound to {v}")),
            (None, n) => CheckStatus::Failed(format!("{n} rows visible after the binding ended")),
        })
    }

    async fn unbound_reads_nothing(&self, t: &TenantOwnedTable) -> Result<CheckStatus> {
        let mut tx = self.begin().await?;
        let visible = count(&mut tx, t, None).await;
        tx.rollback().await?;

        Ok(match visible? {
            0 => CheckStatus::Passed,
            n => CheckStatus::Failed(format!("{n} rows visible without a tenant")),
        })
    }

    async fn malformed_binding(&self, t: &TenantOwnedTable) -> Result<CheckStatus> {
        let mut tx = self.begin().await?;
        bind_raw(&mut tx, self.policy.variable(), MALFORMED_BINDING).await?;
        let visible = count(&mut tx, t, None).await;
        tx.rollback().await?;

        Ok(match visible {
            Err(e) if is_cast_error(&e) => CheckStatus::Passed,
            Err(e) => CheckStatus::Failed(format!("unexpected error: {e:#}")),
            // The cast runs per row, so an empty table never trips it.
            Ok(0) => CheckStatus::Skipped("table is empty".to_string()),
            Ok(n) => CheckStatus::Failed(format!("malformed binding read {n} rows")),
        })
    }

    async fn cross_tenant_read(
        &self,
        t: &TenantOwnedTable,
        own: &TenantId,
        other: &TenantId,
    ) -> Result<CheckStatus> {
        let mut tx = self.begin().await?;
        bind(&mut tx, self.policy.variable(), own).await?;
        let foreign = count(&mut tx, t, Some(other)).await;
        let not_own = count_not_owned_by(&mut tx, t, own).await;
        tx.rollback().await?;

        Ok(match (foreign?, not_own?) {
            (0, 0) => CheckStatus::Passed,
            (f, n) => CheckStatus::Failed(format!(
                "{f} rows of the other tenant and {n} foreign rows visible"
            )),
        })
    }

    async fn cross_tenant_write(
        &self,
        t: &TenantOwnedTable,
        own: &TenantId,
        other: &TenantId,
    ) -> Result<CheckStatus> {
        let table = t.table.quoted();
        let column = quote_ident(&t.tenant_column);

        let mut tx = self.begin().await?;
        bind(&mut tx, self.policy.variable(), own).await?;
        let touched = async {
            let updated = sqlx::query(&format!(
                "UPDATE {table} SET {column} = {column} WHERE {column} = $1"
            ))
            .bind(*other.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(classify_sqlx)?
            .rows_affected();
            let deleted = sqlx::query(&format!("DELETE FROM {table} WHERE {column} = $1"))
                .bind(*other.as_uuid())
                .execute(&mut *tx)
                .await
                .map_err(classify_sqlx)?
                .rows_affected();
            Ok::<_, anyhow::Error>((updated, deleted))
        }
        .await;
        tx.rollback().await?;

        let (updated, deleted) = touched?;
        Ok(if updated == 0 && deleted == 0 {
            CheckStatus::Passed
        } else {
            CheckStatus::Failed(format!(
                "touched the other tenant's rows ({updated} updated, {deleted} deleted)"
            ))
        })
    }

    async fn rehoming_rejected(
        &self,
        t: &TenantOwnedTable,
        own: &TenantId,
        other: &TenantId,
    ) -> Result<CheckStatus> {
        let mut tx = self.begin().await?;
        bind(&mut tx, self.policy.variable(), own).await?;

        let owned = match count(&mut tx, t, None).await {
            Ok(n) => n,
            Err(e) => {
                tx.rollback().await?;
                return Err(e);
            }
        };
        if owned == 0 {
            tx.rollback().await?;
            return Ok(CheckStatus::Skipped("tenant owns no rows".to_string()));
        }

        let moved = sqlx::query(&format!(
            "UPDATE {} SET {} = $1",
            t.table.quoted(),
            quote_ident(&t.tenant_column)
        ))
        .bind(*other.as_uuid())
        .execute(&mut *tx)
        .await
        .map_err(classify_sqlx);
        tx.rollback().await?;

        Ok(match moved {
            Err(e) if is_policy_violation(&e) => CheckStatus::Passed,
            Err(e) => CheckStatus::Failed(format!("unexpected error: {e:#}")),
            Ok(done) => CheckStatus::Failed(format!(
                "{} rows moved to another tenant",
                done.rows_affected()
            )),
        })
    }

    async fn idempotent_binding(&self, t: &TenantOwnedTable, own: &TenantId) -> Result<CheckStatus> {
        let variable = self.policy.variable();
        let mut tx = self.begin().await?;

        bind(&mut tx, variable, own).await?;
        let first = count(&mut tx, t, None).await?;
        bind(&mut tx, variable, own).await?;
        let second = count(&mut tx, t, None).await?;
        let bound = current_binding(&mut tx, variable).await?;
        tx.rollback().await?;

        let expected = own.to_canonical();
        Ok(if first == second && bound.as_deref() == Some(expected.as_str()) {
            CheckStatus::Passed
        } else {
            CheckStatus::Failed(format!(
                "rebinding changed the view ({first} -> {second} rows, bound {bound:?})"
            ))
        })
    }
}

async fn count(
    conn: &mut PgConnection,
    t: &TenantOwnedTable,
    tenant: Option<&TenantId>,
) -> Result<i64> {
    let table = t.table.quoted();
    let n = match tenant {
        None => {
            sqlx::query_scalar::<_, i64>(&format!("SELECT count(*) FROM {table}"))
                .fetch_one(&mut *conn)
                .await
        }
        Some(tenant) => {
            sqlx::query_scalar::<_, i64>(&format!(
                "SELECT count(*) FROM {table} WHERE {} = $1",
                quote_ident(&t.tenant_column)
            ))
            .bind(*tenant.as_uuid())
            .fetch_one(&mut *conn)
            .await
        }
    };
    n.map_err(classify_sqlx)
}

async fn count_not_owned_by(
    conn: &mut PgConnection,
    t: &TenantOwnedTable,
    tenant: &TenantId,
) -> Result<i64> {
    sqlx::query_scalar::<_, i64>(&format!(
        "SELECT count(*) FROM {} WHERE {} IS DISTINCT FROM $1",
        t.table.quoted(),
        quote_ident(&t.tenant_column)
    ))
    .bind(*tenant.as_uuid())
    .fetch_one(&mut *conn)
    .await
    .map_err(classify_sqlx)
}

fn is_cast_error(e: &anyhow::Error) -> bool {
    matches!(tenancy_error(e), Some(TenancyError::IsolationCastError(_)))
}

fn is_policy_violation(e: &anyhow::Error) -> bool {
    matches!(tenancy_error(e), Some(TenancyError::PolicyViolation(_)))
}
