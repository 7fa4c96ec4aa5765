use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use dog_core::{DogConfigSnapshot, TenantId};
use dog_postgres::{
    apply_statements, check_request_principal, connect, load_schema_from_file, IsolationHarness,
    PoolConfig,
};
use tracing_subscriber::EnvFilter;

/// Tenant-isolated notes service
#[derive(Parser)]
#[command(name = "org-notes")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the HTTP API as the request principal
    Serve,

    /// Create schema, request principal and isolation policy (admin connection)
    Provision {
        /// Schema file to load instead of the bundled one
        #[arg(long)]
        schema: Option<PathBuf>,
    },

    /// Check isolation against a live database; exits non-zero on failure
    Verify {
        /// Tenant the checks bind to
        #[arg(long, env = "ORG_NOTES_VERIFY_OWN")]
        own: String,

        /// Tenant whose rows must stay invisible
        #[arg(long, env = "ORG_NOTES_VERIFY_OTHER")]
        other: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = org_notes::load_config().snapshot();

    match cli.command {
        Command::Serve => serve(&config).await,
        Command::Provision { schema } => provision(&config, schema).await,
        Command::Verify { own, other } => verify(&config, &own, &other).await,
    }
}

async fn serve(config: &DogConfigSnapshot) -> Result<()> {
    let url = config.require("database.url")?;
    if config.get("database.admin_url") == Some(url) {
        bail!("database.url must not be the administrative connection");
    }

    let pool = connect(url, &PoolConfig::from_snapshot(config)?).await?;
    let principal = check_request_principal(&pool).await?;
    tracing::info!(role = %principal.role, "request principal verified");

    let app = org_notes::build(pool, config)?;

    let host = config.get("http.host").unwrap_or("127.0.0.1");
    let port: u16 = config.get_parsed("http.port")?.unwrap_or(3030);
    let addr = format!("{host}:{port}");

    println!("[org-notes] listening on http://{addr}");

    app.listen(addr).await?;

    Ok(())
}

async fn provision(config: &DogConfigSnapshot, schema: Option<PathBuf>) -> Result<()> {
    let admin_url = config.require("database.admin_url")?;
    let admin = connect(admin_url, &PoolConfig::default()).await?;

    match schema {
        Some(path) => load_schema_from_file(&admin, path).await?,
        None => apply_statements(&admin, &[org_notes::SCHEMA.to_string()]).await?,
    }

    let principal = org_notes::request_principal(config)?;
    principal.provision(&admin).await?;
    org_notes::isolation_policy(&config.tenancy()?)?
        .apply(&admin)
        .await?;

    println!("[org-notes] provisioned; set a password for `{}` before serving", principal.role);
    Ok(())
}

async fn verify(config: &DogConfigSnapshot, own: &str, other: &str) -> Result<()> {
    let own = TenantId::parse(own)?;
    let other = TenantId::parse(other)?;
    if own == other {
        bail!("--own and --other must be different tenants");
    }

    let url = config.require("database.url")?;
    let pool = connect(url, &PoolConfig::from_snapshot(config)?).await?;
    let policy = org_notes::isolation_policy(&config.tenancy()?)?;

    let report = IsolationHarness::new(pool, policy).run(&own, &other).await;
    print!("{report}");

    if !report.passed() {
        bail!("{} isolation check(s) failed", report.failures().count());
    }
    Ok(())
}
