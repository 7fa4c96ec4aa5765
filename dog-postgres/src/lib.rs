//! # dog-postgres
//!
//! Storage-side tenant isolation for DogRS on PostgreSQL.
//!
//! ```rust,no_run
//! use dog_core::TenantId;
//! use dog_postgres::{SessionVariable, TenantSession};
//!
//! # async fn demo(pool: sqlx::PgPool) -> anyhow::Result<()> {
//! let session = TenantSession::new(pool, SessionVariable::default());
//! let tenant = TenantId::parse("00000000-0000-4000-8000-000000000001")?;
//!
//! let notes: i64 = session
//!     .run(&tenant, |tx| {
//!         Box::pin(async move {
//!             let n = sqlx::query_scalar("SELECT count(*) FROM notes")
//!                 .fetch_one(&mut **tx)
//!                 .await?;
//!             Ok(n)
//!         })
//!     })
//!     .await?;
//! # let _ = notes;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod policy;
pub mod pool;
pub mod principal;
pub mod provision;
pub mod resolver;
pub mod session;
pub mod sql;
pub mod verify;

pub use error::{classify, classify_sqlx, tenancy_error};
pub use policy::{IsolationPolicy, TablePosture, TenantOwnedTable, POLICY_NAME};
pub use pool::{connect, connect_lazy, PoolConfig};
pub use principal::{check_request_principal, inspect_principal, PrincipalPosture, RequestPrincipal};
pub use provision::{apply_statements, load_schema_from_file};
pub use resolver::PgTenantResolver;
pub use session::{bind, bind_raw, current_binding, SessionVariable, TenantSession};
pub use sql::TableName;
pub use verify::{CheckOutcome, CheckStatus, IsolationHarness, IsolationReport};
