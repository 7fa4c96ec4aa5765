//! The unprivileged role request traffic connects as.
//!
//! Row-level security does not apply to superusers or to roles with
//! `BYPASSRLS`, so the role used for requests must have neither. Only the
//! provisioning path uses an administrative role.

use anyhow::Result;
use dog_core::TenancyError;
use sqlx::PgPool;

use crate::provision::apply_statements;
use crate::sql::{quote_ident, quote_literal, validate_identifier, TableName};

/// Role used for request traffic, with the schemas it may touch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestPrincipal {
    pub role: String,
    /// Schemas with tenant data: full read/write.
    pub app_schemas: Vec<String>,
    /// Append-only or reporting schemas: read only.
    pub audit_schemas: Vec<String>,
    /// Tables only ever looked up on the request path (the tenant catalog).
    /// Read only, even when they live in an app schema.
    pub catalog_tables: Vec<TableName>,
}

impl RequestPrincipal {
    pub fn new(role: &str) -> Result<Self> {
        validate_identifier(role)?;
        Ok(Self {
            role: role.to_string(),
            app_schemas: Vec::new(),
            audit_schemas: Vec::new(),
            catalog_tables: Vec::new(),
        })
    }

    pub fn app_schema(mut self, schema: &str) -> Result<Self> {
        validate_identifier(schema)?;
        self.app_schemas.push(schema.to_string());
        Ok(self)
    }

    pub fn audit_schema(mut self, schema: &str) -> Result<Self> {
        validate_identifier(schema)?;
        self.audit_schemas.push(schema.to_string());
        Ok(self)
    }

    pub fn catalog_table(mut self, table: TableName) -> Self {
        self.catalog_tables.push(table);
        self
    }

    /// Idempotent provisioning statements. Credentials are left to the
    /// operator.
    pub fn statements(&self) -> Vec<String> {
        let role = quote_ident(&self.role);
        let mut out = vec![
            format!(
                "DO $$ BEGIN \
                 IF NOT EXISTS (SELECT 1 FROM pg_catalog.pg_roles WHERE rolname = {}) THEN \
                 CREATE ROLE {role} LOGIN NOSUPERUSER NOBYPASSRLS NOCREATEROLE NOCREATEDB; \
                 END IF; \
                 END $$",
                quote_literal(&self.role)
            ),
            // Re-asserted on every run.
            format!("ALTER ROLE {role} NOSUPERUSER NOBYPASSRLS NOCREATEROLE NOCREATEDB NOREPLICATION"),
        ];

        for schema in &self.app_schemas {
            let schema = quote_ident(schema);
            out.push(format!("GRANT USAGE ON SCHEMA {schema} TO {role}"));
            out.push(format!(
                "GRANT SELECT, INSERT, UPDATE, DELETE ON ALL TABLES IN SCHEMA {schema} TO {role}"
            ));
            out.push(format!(
                "GRANT USAGE, SELECT ON ALL SEQUENCES IN SCHEMA {schema} TO {role}"
            ));
            out.push(format!(
                "ALTER DEFAULT PRIVILEGES IN SCHEMA {schema} \
                 GRANT SELECT, INSERT, UPDATE, DELETE ON TABLES TO {role}"
            ));
            out.push(format!(
                "ALTER DEFAULT PRIVILEGES IN SCHEMA {schema} \
                 GRANT USAGE, SELECT ON SEQUENCES TO {role}"
            ));
        }

        for schema in &self.audit_schemas {
            let schema = quote_ident(schema);
            out.push(format!("GRANT USAGE ON SCHEMA {schema} TO {role}"));
            out.push(format!("GRANT SELECT ON ALL TABLES IN SCHEMA {schema} TO {role}"));
            out.push(format!(
                "ALTER DEFAULT PRIVILEGES IN SCHEMA {schema} GRANT SELECT ON TABLES TO {role}"
            ));
        }

        // After the schema-wide grants, which would otherwise hand out DML.
        for table in &self.catalog_tables {
            let table = table.quoted();
            out.push(format!(
                "REVOKE INSERT, UPDATE, DELETE, TRUNCATE ON {table} FROM {role}"
            ));
            out.push(format!("GRANT SELECT ON {table} TO {role}"));
        }

        out
    }

    pub async fn provision(&self, admin: &PgPool) -> Result<()> {
        apply_statements(admin, &self.statements()).await?;
        tracing::info!(role = %self.role, "request principal provisioned");
        Ok(())
    }
}

/// Attributes of the role a pool connects as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrincipalPosture {
    pub role: String,
    pub superuser: bool,
    pub bypass_rls: bool,
}

impl PrincipalPosture {
    pub fn can_bypass_isolation(&self) -> bool {
        self.superuser || self.bypass_rls
    }
}

pub async fn inspect_principal(pool: &PgPool) -> Result<PrincipalPosture> {
    let (role, superuser, bypass_rls): (String, bool, bool) = sqlx::query_as(
        "SELECT rolname::text, rolsuper, rolbypassrls \
         FROM pg_catalog.pg_roles WHERE rolname = current_user",
    )
    .fetch_one(pool)
    .await?;

    Ok(PrincipalPosture {
        role,
        superuser,
        bypass_rls,
    })
}

/// Refuse a pool whose role could read across tenants.
pub async fn check_request_principal(pool: &PgPool) -> Result<PrincipalPosture> {
    let posture = inspect_principal(pool).await?;

    if posture.can_bypass_isolation() {
        tracing::error!(
            role = %posture.role,
            superuser = posture.superuser,
            bypass_rls = posture.bypass_rls,
            "request principal bypasses row level security"
        );
        return Err(TenancyError::PrivilegedPrincipal {
            role: posture.role,
        }
        .into_anyhow());
    }

    tracing::debug!(role = %posture.role, "request principal is subject to row level security");
    Ok(posture)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal() -> RequestPrincipal {
        RequestPrincipal::new("org_app")
            .and_then(|p| p.app_schema("public"))
            .and_then(|p| p.audit_schema("audit"))
            .unwrap()
    }

    #[test]
    fn role_is_created_without_bypass_attributes() {
        let stmts = principal().statements();

        assert!(stmts[0].contains("WHERE rolname = 'org_app'"));
        assert!(stmts[0].contains("CREATE ROLE \"org_app\" LOGIN NOSUPERUSER NOBYPASSRLS"));
        assert!(stmts[1].starts_with("ALTER ROLE \"org_app\" NOSUPERUSER NOBYPASSRLS"));
        assert!(stmts.iter().all(|s| !s.contains("PASSWORD")));
    }

    #[test]
    fn audit_schemas_are_read_only() {
        let stmts = principal().statements();
        let audit: Vec<_> = stmts.iter().filter(|s| s.contains("\"audit\"")).collect();

        assert_eq!(audit.len(), 3);
        assert!(audit.iter().all(|s| !s.contains("INSERT") && !s.contains("DELETE")));
        assert!(stmts
            .iter()
            .any(|s| s.contains("INSERT, UPDATE, DELETE ON ALL TABLES IN SCHEMA \"public\"")));
    }

    #[test]
    fn future_sequences_get_the_same_grant_as_existing_ones() {
        let stmts = principal().statements();

        assert!(stmts
            .iter()
            .any(|s| s.contains("GRANT USAGE, SELECT ON ALL SEQUENCES IN SCHEMA \"public\"")));
        assert!(stmts.iter().any(|s| s.starts_with("ALTER DEFAULT PRIVILEGES IN SCHEMA \"public\"")
            && s.ends_with("GRANT USAGE, SELECT ON SEQUENCES TO \"org_app\"")));
    }

    #[test]
    fn catalog_tables_are_read_only_after_schema_grants() {
        let stmts = principal()
            .catalog_table(TableName::parse("organizations").unwrap())
            .statements();

        let revoke = stmts
            .iter()
            .position(|s| {
                s == "REVOKE INSERT, UPDATE, DELETE, TRUNCATE ON \"public\".\"organizations\" FROM \"org_app\""
            })
            .expect("catalog DML is revoked");
        let grant_dml = stmts
            .iter()
            .position(|s| s.contains("INSERT, UPDATE, DELETE ON ALL TABLES IN SCHEMA \"public\""))
            .unwrap();
        assert!(revoke > grant_dml);
        assert_eq!(
            stmts[revoke + 1],
            "GRANT SELECT ON \"public\".\"organizations\" TO \"org_app\""
        );
    }

    #[test]
    fn invalid_names_are_rejected() {
        assert!(RequestPrincipal::new("org-app").is_err());
        assert!(RequestPrincipal::new("org_app")
            .and_then(|p| p.app_schema("public; drop"))
            .is_err());
    }

    #[test]
    fn superuser_or_bypass_rls_can_bypass_isolation() {
        let mut posture = PrincipalPosture {
            role: "org_app".into(),
            superuser: false,
            bypass_rls: false,
        };
        assert!(!posture.can_bypass_isolation());
        posture.bypass_rls = true;
        assert!(posture.can_bypass_isolation());
        posture.bypass_rls = false;
        posture.superuser = true;
        assert!(posture.can_bypass_isolation());
    }
}
