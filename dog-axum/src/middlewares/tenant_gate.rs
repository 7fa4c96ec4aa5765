use std::sync::Arc;

use axum::{
    body::Body,
    extract::Request,
    response::{IntoResponse, Response},
};
use dog_core::TenantGate;
use tower::{Layer, Service};

use crate::DogAxumError;

/// Middleware that runs the tenant gate before any handler.
///
/// Admitted requests get a `RequestContext` in their extensions (bound to
/// the tenant, or unbound on allow-listed paths). Rejected requests never
/// reach the inner service and are answered with the gate's error.
#[derive(Clone)]
pub struct TenantGateLayer {
    gate: Arc<TenantGate>,
}

impl TenantGateLayer {
    pub fn new(gate: Arc<TenantGate>) -> Self {
        Self { gate }
    }
}

impl<S> Layer<S> for TenantGateLayer {
    type Service = TenantGateService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TenantGateService {
            inner,
            gate: Arc::clone(&self.gate),
        }
    }
}

#[derive(Clone)]
pub struct TenantGateService<S> {
    inner: S,
    gate: Arc<TenantGate>,
}

impl<S> Service<Request<Body>> for TenantGateService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = std::pin::Pin<Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut std::task::Context<'_>) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        // The clone is not driven to readiness; keep the one that was.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let gate = Arc::clone(&self.gate);

        Box::pin(async move {
            let path = req.uri().path().to_string();

            // Non-UTF-8 bytes decode to U+FFFD, which can never parse as a
            // tenant id, so they surface as MalformedIdentifier.
            let header = req
                .headers()
                .get(gate.header())
                .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned());

            match gate.admit_request(&path, header.as_deref()).await {
                Ok(ctx) => {
                    req.extensions_mut().insert(ctx);
                    inner.call(req).await
                }
                Err(e) => Ok(DogAxumError::from(e).into_response()),
            }
        })
    }
}
