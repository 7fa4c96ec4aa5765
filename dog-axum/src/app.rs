use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::Router;
use dog_core::{DogError, TenancySettings, TenantResolver};
use tokio::net::{TcpListener, ToSocketAddrs};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::middlewares::TenantGateLayer;
use crate::{DogAxumError, DogAxumState};

/// Router builder for tenant-scoped HTTP apps.
///
/// Every route mounted here sits behind the tenant gate; only paths on the
/// configured allow-list (`tenancy.public_paths`) skip it. `/health` and
/// `/ready` are mounted by default.
pub struct AxumApp {
    pub state: DogAxumState,
    pub router: Router<()>,
}

impl Clone for AxumApp {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            router: self.router.clone(),
        }
    }
}

impl AxumApp {
    pub fn new(state: DogAxumState) -> Self {
        let router = Router::new()
            .route("/health", get(health))
            .route("/ready", get(ready))
            .with_state(state.clone());

        Self { state, router }
    }

    pub fn use_router(mut self, path: &str, router: Router<()>) -> Self {
        self.router = self.router.nest(path, router);
        self
    }

    /// Merge routes that already carry their full paths.
    pub fn merge(mut self, router: Router<()>) -> Self {
        self.router = self.router.merge(router);
        self
    }

    /// The finished router: gate innermost, then tracing, then request ids.
    pub fn into_router(self) -> Router<()> {
        let gate = Arc::clone(&self.state.gate);

        self.router
            .layer(TenantGateLayer::new(gate))
            .layer(TraceLayer::new_for_http())
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    pub async fn listen<A>(self, addr: A) -> anyhow::Result<()>
    where
        A: ToSocketAddrs,
    {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(addr = ?listener.local_addr().ok(), "listening");
        axum::serve(listener, self.into_router()).await?;
        Ok(())
    }
}

pub fn axum(resolver: Arc<dyn TenantResolver>, settings: &TenancySettings) -> AxumApp {
    AxumApp::new(DogAxumState::from_settings(resolver, settings))
}

async fn health() -> &'static str {
    "ok"
}

async fn ready(State(state): State<DogAxumState>) -> Result<&'static str, DogAxumError> {
    state.gate.resolver().ping().await.map_err(|e| {
        tracing::warn!(error = %e, "readiness probe failed");
        DogError::unavailable("Tenant catalog unreachable")
    })?;
    Ok("ready")
}
