//! Core multi-tenant types for DogRS.
//!
//! A tenant ("organization") is named by a [`TenantId`]: a 128-bit value
//! whose only accepted textual form is the canonical, hyphenated UUID.
//! Everything tenant-scoped downstream of the request gate works with a
//! [`RequestContext`], never with raw header strings.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::TenancyError;

/// Length of the canonical hyphenated form, e.g. `00000000-0000-4000-8000-000000000001`.
const CANONICAL_LEN: usize = 36;

/// A validated tenant identifier.
///
/// Construction goes through [`TenantId::parse`] (or [`validate_tenant_identifier`]),
/// so holding a `TenantId` means the value is a well-formed UUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(Uuid);

impl TenantId {
    /// Parse a raw value into a canonical tenant identifier.
    ///
    /// Only the 36-character hyphenated form is accepted. Upper-case hex is
    /// fine and is canonicalised to lower case; the empty string, the simple
    /// 32-digit form, braced and URN forms are all `MalformedIdentifier`.
    pub fn parse(raw: &str) -> Result<Self, TenancyError> {
        if raw.is_empty() {
            return Err(TenancyError::MalformedIdentifier(
                "tenant identifier is empty".to_string(),
            ));
        }

        if raw.len() != CANONICAL_LEN {
            return Err(TenancyError::MalformedIdentifier(format!(
                "tenant identifier must be a {CANONICAL_LEN}-character hyphenated UUID"
            )));
        }

        Uuid::try_parse(raw)
            .map(Self)
            .map_err(|e| TenancyError::MalformedIdentifier(e.to_string()))
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Canonical lower-case hyphenated string, the form bound into storage sessions.
    pub fn to_canonical(&self) -> String {
        self.0.hyphenated().to_string()
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for TenantId {
    type Err = TenancyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for TenantId {
    type Error = TenancyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TenantId> for String {
    fn from(id: TenantId) -> Self {
        id.to_canonical()
    }
}

/// Validate a raw header/parameter value.
///
/// A missing value is reported the same way as an empty one: the caller
/// (the request gate) distinguishes "header absent" itself before calling this.
pub fn validate_tenant_identifier(raw: Option<&str>) -> Result<TenantId, TenancyError> {
    match raw {
        Some(value) => TenantId::parse(value),
        None => Err(TenancyError::MalformedIdentifier(
            "tenant identifier is missing".to_string(),
        )),
    }
}

/// Context carried with every request once it has passed the gate.
///
/// It holds exactly one optional tenant. Requests on allow-listed
/// infrastructure paths carry an unbound context.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    tenant: Option<TenantId>,
}

impl RequestContext {
    pub fn unbound() -> Self {
        Self { tenant: None }
    }

    pub fn for_tenant(tenant: TenantId) -> Self {
        Self {
            tenant: Some(tenant),
        }
    }

    pub fn tenant(&self) -> Option<&TenantId> {
        self.tenant.as_ref()
    }

    pub fn is_bound(&self) -> bool {
        self.tenant.is_some()
    }
}
