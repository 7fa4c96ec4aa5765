//! Request gate: the transport-agnostic decision of whether a request may
//! proceed, and on behalf of which tenant.
//!
//! Order of checks for every non-allow-listed path:
//! 1. header absent            → `MissingTenant`
//! 2. header not a tenant id   → `MalformedIdentifier`
//! 3. sentinel fixture tenant  → admitted without a lookup
//! 4. catalog lookup           → `UnknownTenant` when not found
//!
//! The gate never mutates anything; its only output is a [`RequestContext`].

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::anyhow;
use tracing::{debug, error, info, warn};

use crate::config::TenancySettings;
use crate::errors::TenancyError;
use crate::resolver::{TenantExistence, TenantResolver};
use crate::tenant::{RequestContext, TenantId};

/// What to do when the tenant catalog cannot be consulted.
///
/// `FailOpen` admits the (syntactically valid) tenant so that a catalog
/// outage does not take every request down with it. The storage policy
/// still confines the request to the claimed tenant, but a non-existent
/// tenant id gets through. `FailClosed` rejects with `ResolverUnavailable`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolverFailurePolicy {
    FailOpen,
    FailClosed,
}

impl ResolverFailurePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolverFailurePolicy::FailOpen => "fail-open",
            ResolverFailurePolicy::FailClosed => "fail-closed",
        }
    }
}

impl fmt::Display for ResolverFailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResolverFailurePolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "fail-open" => Ok(ResolverFailurePolicy::FailOpen),
            "fail-closed" => Ok(ResolverFailurePolicy::FailClosed),
            other => Err(anyhow!(
                "unknown resolver failure policy `{other}` (expected `fail-open` or `fail-closed`)"
            )),
        }
    }
}

/// Explicit allow-list of infrastructure paths that bypass the gate.
///
/// Entries ending in `/` are prefixes (`/webhooks/` covers `/webhooks/billing`),
/// all others must match exactly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublicPaths {
    exact: Vec<String>,
    prefixes: Vec<String>,
}

impl PublicPaths {
    /// Parse a comma-separated list.
    pub fn parse(list: &str) -> Self {
        let mut out = Self::default();
        for entry in list.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            out.push(entry);
        }
        out
    }

    pub fn push(&mut self, entry: &str) {
        if entry.ends_with('/') {
            self.prefixes.push(entry.to_string());
        } else {
            self.exact.push(entry.to_string());
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        // Dot segments never match, so `/webhooks/../notes` cannot ride the prefix.
        if path.split('/').any(|seg| seg == ".." || seg == ".") {
            return false;
        }

        self.exact.iter().any(|p| p == path)
            || self
                .prefixes
                .iter()
                .any(|p| path.starts_with(p.as_str()) || path == p.trim_end_matches('/'))
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.prefixes.is_empty()
    }
}

pub struct TenantGate {
    header: String,
    resolver: Arc<dyn TenantResolver>,
    sentinel: Option<TenantId>,
    public_paths: PublicPaths,
    on_resolver_unavailable: ResolverFailurePolicy,
}

impl TenantGate {
    pub fn new(resolver: Arc<dyn TenantResolver>, settings: &TenancySettings) -> Self {
        Self {
            header: settings.header.clone(),
            resolver,
            sentinel: settings.sentinel,
            public_paths: settings.public_paths.clone(),
            on_resolver_unavailable: settings.on_resolver_unavailable,
        }
    }

    /// Name of the inbound tenant header.
    pub fn header(&self) -> &str {
        &self.header
    }

    pub fn resolver(&self) -> &Arc<dyn TenantResolver> {
        &self.resolver
    }

    pub fn on_resolver_unavailable(&self) -> ResolverFailurePolicy {
        self.on_resolver_unavailable
    }

    pub fn is_public(&self, path: &str) -> bool {
        self.public_paths.matches(path)
    }

    /// Full gate decision for one request.
    ///
    /// Allow-listed paths get an unbound context; everything else must carry
    /// a valid, known tenant.
    pub async fn admit_request(
        &self,
        path: &str,
        raw_header: Option<&str>,
    ) -> Result<RequestContext, TenancyError> {
        if self.is_public(path) {
            debug!(path, "allow-listed path, skipping tenant gate");
            return Ok(RequestContext::unbound());
        }

        self.admit(raw_header).await.inspect_err(|e| {
            if e.is_client_fault() {
                info!(path, reason = e.reason(), error = %e, "tenant gate rejected request");
            }
        })
    }

    /// Validate and resolve the tenant header value.
    pub async fn admit(&self, raw_header: Option<&str>) -> Result<RequestContext, TenancyError> {
        let raw = raw_header.ok_or_else(|| TenancyError::MissingTenant {
            header: self.header.clone(),
        })?;

        let tenant = TenantId::parse(raw)?;

        if self.sentinel == Some(tenant) {
            debug!(tenant_id = %tenant, "sentinel fixture tenant, skipping existence check");
            return Ok(RequestContext::for_tenant(tenant));
        }

        match self.resolver.resolve(&tenant).await {
            Ok(TenantExistence::Exists) => {
                debug!(tenant_id = %tenant, "tenant admitted");
                Ok(RequestContext::for_tenant(tenant))
            }
            Ok(TenantExistence::NotFound) => Err(TenancyError::UnknownTenant(tenant)),
            Err(e) => match self.on_resolver_unavailable {
                ResolverFailurePolicy::FailOpen => {
                    warn!(
                        tenant_id = %tenant,
                        error = %e,
                        "tenant resolver unavailable; admitting unverified tenant (fail-open)"
                    );
                    Ok(RequestContext::for_tenant(tenant))
                }
                ResolverFailurePolicy::FailClosed => {
                    error!(
                        tenant_id = %tenant,
                        error = %e,
                        "tenant resolver unavailable; rejecting request (fail-closed)"
                    );
                    Err(TenancyError::ResolverUnavailable(e.to_string()))
                }
            },
        }
    }
}

impl fmt::Debug for TenantGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantGate")
            .field("header", &self.header)
            .field("sentinel", &self.sentinel)
            .field("public_paths", &self.public_paths)
            .field("on_resolver_unavailable", &self.on_resolver_unavailable)
            .finish_non_exhaustive()
    }
}
