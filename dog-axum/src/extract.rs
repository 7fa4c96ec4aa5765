use axum::{extract::FromRequestParts, http::request::Parts};
use dog_core::{DogError, RequestContext, TenantId};

use crate::DogAxumError;

/// The tenant the gate admitted this request for.
///
/// Only usable behind the gate on a non-allow-listed path. Reaching a
/// handler that asks for it without a bound context is a wiring bug and
/// answers 500 rather than guessing a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentTenant(pub TenantId);

impl<S> FromRequestParts<S> for CurrentTenant
where
    S: Send + Sync,
{
    type Rejection = DogAxumError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match parts.extensions.get::<RequestContext>().and_then(|ctx| ctx.tenant()) {
            Some(tenant) => Ok(CurrentTenant(*tenant)),
            None => {
                tracing::error!(
                    path = parts.uri.path(),
                    "tenant-scoped handler reached without a bound request context"
                );
                Err(DogError::general_error("Request is not bound to a tenant").into())
            }
        }
    }
}

impl CurrentTenant {
    pub fn context(&self) -> RequestContext {
        RequestContext::for_tenant(self.0)
    }
}
