//! Row-level security policies for tenant-owned tables.
//!
//! Each table gets RLS enabled and forced (so the owner is filtered too)
//! and one `FOR ALL` policy whose `USING` and `WITH CHECK` clauses compare
//! the tenant column with the session binding. An unset or reset binding
//! reads as `''`, which `NULLIF` turns into NULL, so it matches no rows.
//! Anything else that is not a uuid makes the cast fail and aborts the
//! statement.

use anyhow::Result;
use sqlx::PgPool;

use crate::provision::apply_statements;
use crate::session::SessionVariable;
use crate::sql::{quote_ident, quote_literal, validate_identifier, TableName};

pub const POLICY_NAME: &str = "tenant_isolation";

/// A table whose rows each belong to exactly one tenant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantOwnedTable {
    pub table: TableName,
    pub tenant_column: String,
}

impl TenantOwnedTable {
    pub fn new(table: TableName, tenant_column: &str) -> Result<Self> {
        validate_identifier(tenant_column)?;
        Ok(Self {
            table,
            tenant_column: tenant_column.to_string(),
        })
    }

    /// `notes` keyed by `org_id`.
    pub fn parse(table: &str, tenant_column: &str) -> Result<Self> {
        Self::new(TableName::parse(table)?, tenant_column)
    }
}

#[derive(Debug, Clone)]
pub struct IsolationPolicy {
    variable: SessionVariable,
    tables: Vec<TenantOwnedTable>,
}

impl IsolationPolicy {
    pub fn new(variable: SessionVariable) -> Self {
        Self {
            variable,
            tables: Vec::new(),
        }
    }

    pub fn table(mut self, table: TenantOwnedTable) -> Self {
        self.tables.push(table);
        self
    }

    pub fn variable(&self) -> &SessionVariable {
        &self.variable
    }

    pub fn tables(&self) -> &[TenantOwnedTable] {
        &self.tables
    }

    /// The row predicate for `column`.
    pub fn predicate(&self, column: &str) -> String {
        format!(
            "{} = NULLIF(current_setting({}, true), '')::uuid",
            quote_ident(column),
            quote_literal(self.variable.as_str())
        )
    }

    /// Idempotent DDL for every table, in order.
    pub fn statements(&self) -> Vec<String> {
        let policy = quote_ident(POLICY_NAME);
        let mut out = Vec::with_capacity(self.tables.len() * 4);

        for t in &self.tables {
            let table = t.table.quoted();
            let predicate = self.predicate(&t.tenant_column);

            out.push(format!("ALTER TABLE {table} ENABLE ROW LEVEL SECURITY"));
            out.push(format!("ALTER TABLE {table} FORCE ROW LEVEL SECURITY"));
            out.push(format!("DROP POLICY IF EXISTS {policy} ON {table}"));
            out.push(format!(
                "CREATE POLICY {policy} ON {table} AS PERMISSIVE FOR ALL \
                 USING ({predicate}) WITH CHECK ({predicate})"
            ));
        }

        out
    }

    /// Apply with an administrative pool, in one transaction.
    pub async fn apply(&self, admin: &PgPool) -> Result<()> {
        apply_statements(admin, &self.statements()).await?;
        tracing::info!(
            tables = self.tables.len(),
            variable = %self.variable,
            "tenant isolation policy applied"
        );
        Ok(())
    }

    /// What the catalog says about each table.
    pub async fn inspect(&self, pool: &PgPool) -> Result<Vec<TablePosture>> {
        let mut out = Vec::with_capacity(self.tables.len());

        for t in &self.tables {
            let flags: Option<(bool, bool)> = sqlx::query_as(
                "SELECT c.relrowsecurity, c.relforcerowsecurity \
                 FROM pg_catalog.pg_class c \
                 JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace \
                 WHERE n.nspname = $1 AND c.relname = $2",
            )
            .bind(&t.table.schema)
            .bind(&t.table.name)
            .fetch_optional(pool)
            .await?;

            let policy: Option<(String, Option<String>, Option<String>)> = sqlx::query_as(
                "SELECT cmd, qual, with_check FROM pg_catalog.pg_policies \
                 WHERE schemaname = $1 AND tablename = $2 AND policyname = $3",
            )
            .bind(&t.table.schema)
            .bind(&t.table.name)
            .bind(POLICY_NAME)
            .fetch_optional(pool)
            .await?;

            out.push(TablePosture::from_catalog(
                t.table.clone(),
                flags,
                policy,
                self.variable.as_str(),
            ));
        }

        Ok(out)
    }
}

/// Isolation state of one table as read from the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TablePosture {
    pub table: TableName,
    pub exists: bool,
    pub rls_enabled: bool,
    pub rls_forced: bool,
    pub policy_present: bool,
    /// The policy covers every command and both clauses read the variable
    /// the binder writes.
    pub policy_reads_variable: bool,
}

impl TablePosture {
    fn from_catalog(
        table: TableName,
        flags: Option<(bool, bool)>,
        policy: Option<(String, Option<String>, Option<String>)>,
        variable: &str,
    ) -> Self {
        let (exists, rls_enabled, rls_forced) = match flags {
            Some((enabled, forced)) => (true, enabled, forced),
            None => (false, false, false),
        };
        let reads = |clause: &Option<String>| {
            clause
                .as_deref()
                .is_some_and(|expr| expr.contains(&format!("'{variable}'")))
        };
        let policy_reads_variable = policy
            .as_ref()
            .is_some_and(|(cmd, qual, check)| cmd == "ALL" && reads(qual) && reads(check));

        Self {
            table,
            exists,
            rls_enabled,
            rls_forced,
            policy_present: policy.is_some(),
            policy_reads_variable,
        }
    }

    pub fn is_isolated(&self) -> bool {
        self.exists && self.rls_enabled && self.rls_forced && self.policy_reads_variable
    }

    /// Human-readable list of what is missing.
    pub fn problems(&self) -> Vec<&'static str> {
        if !self.exists {
            return vec!["table does not exist"];
        }
        let mut out = Vec::new();
        if !self.rls_enabled {
            out.push("row level security disabled");
        }
        if !self.rls_forced {
            out.push("row level security not forced");
        }
        if !self.policy_present {
            out.push("isolation policy missing");
        } else if !self.policy_reads_variable {
            out.push("isolation policy does not read the session variable");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notes_policy() -> IsolationPolicy {
        IsolationPolicy::new(SessionVariable::default())
            .table(TenantOwnedTable::parse("notes", "org_id").unwrap())
    }

    #[test]
    fn predicate_treats_reset_binding_as_no_tenant() {
        assert_eq!(
            notes_policy().predicate("org_id"),
            "\"org_id\" = NULLIF(current_setting('app.org_id', true), '')::uuid"
        );
    }

    #[test]
    fn statements_enable_force_and_replace_the_policy() {
        let stmts = notes_policy().statements();

        assert_eq!(stmts.len(), 4);
        assert_eq!(stmts[0], "ALTER TABLE \"public\".\"notes\" ENABLE ROW LEVEL SECURITY");
        assert_eq!(stmts[1], "ALTER TABLE \"public\".\"notes\" FORCE ROW LEVEL SECURITY");
        assert_eq!(
            stmts[2],
            "DROP POLICY IF EXISTS \"tenant_isolation\" ON \"public\".\"notes\""
        );
        assert!(stmts[3].contains("FOR ALL"));
        assert_eq!(stmts[3].matches("current_setting('app.org_id', true)").count(), 2);
        assert!(stmts[3].contains("WITH CHECK"));
    }

    #[test]
    fn bad_column_names_are_rejected() {
        assert!(TenantOwnedTable::parse("notes", "org id").is_err());
        assert!(TenantOwnedTable::parse("no\"tes", "org_id").is_err());
    }

    #[test]
    fn posture_flags_a_policy_on_the_wrong_variable() {
        let table = TableName::parse("notes").unwrap();
        let qual = Some(
            "(org_id = (NULLIF(current_setting('app.tenant'::text, true), ''::text))::uuid)"
                .to_string(),
        );
        let posture = TablePosture::from_catalog(
            table,
            Some((true, true)),
            Some(("ALL".to_string(), qual.clone(), qual)),
            "app.org_id",
        );

        assert!(posture.policy_present);
        assert!(!posture.is_isolated());
        assert_eq!(
            posture.problems(),
            vec!["isolation policy does not read the session variable"]
        );
    }

    #[test]
    fn posture_of_an_isolated_table() {
        let qual = Some(
            "(org_id = (NULLIF(current_setting('app.org_id'::text, true), ''::text))::uuid)"
                .to_string(),
        );
        let posture = TablePosture::from_catalog(
            TableName::parse("notes").unwrap(),
            Some((true, true)),
            Some(("ALL".to_string(), qual.clone(), qual)),
            "app.org_id",
        );
        assert!(posture.is_isolated());
        assert!(posture.problems().is_empty());

        let missing = TablePosture::from_catalog(
            TableName::parse("ghost").unwrap(),
            None,
            None,
            "app.org_id",
        );
        assert_eq!(missing.problems(), vec!["table does not exist"]);
    }
}
