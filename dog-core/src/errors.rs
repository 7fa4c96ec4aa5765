//! # Errors
//!
//! Two layers:
//! - [`DogError`]: the Feathers-style, transport-facing error (name, message,
//!   code, className, data). It lives inside `anyhow::Error` and the server
//!   crate decides how to serialize it.
//! - [`TenancyError`]: the tenant-isolation taxonomy. Each variant has a
//!   stable machine-readable `reason` that ends up in `DogError::data`.

use std::fmt;

use anyhow::Error as AnyError;
use serde_json::{json, Value};
use thiserror::Error;

use crate::tenant::TenantId;

/// Feathers-ish error class names + status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    BadRequest,   // 400
    Forbidden,    // 403
    GeneralError, // 500
    Unavailable,  // 503
}

impl ErrorKind {
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorKind::BadRequest => 400,
            ErrorKind::Forbidden => 403,
            ErrorKind::GeneralError => 500,
            ErrorKind::Unavailable => 503,
        }
    }

    /// Feathers error `name` (e.g. "BadRequest")
    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::BadRequest => "BadRequest",
            ErrorKind::Forbidden => "Forbidden",
            ErrorKind::GeneralError => "GeneralError",
            ErrorKind::Unavailable => "Unavailable",
        }
    }

    /// Feathers error `className` (commonly kebab-cased)
    pub fn class_name(&self) -> &'static str {
        match self {
            ErrorKind::BadRequest => "bad-request",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::GeneralError => "general-error",
            ErrorKind::Unavailable => "unavailable",
        }
    }
}

/// A structured DogRS error that can live inside `anyhow::Error`.
#[derive(Debug)]
pub struct DogError {
    pub kind: ErrorKind,
    pub message: String,
    pub data: Option<Value>,
    pub source: Option<AnyError>,
}

impl DogError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            data: None,
            source: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_source(mut self, source: AnyError) -> Self {
        self.source = Some(source);
        self
    }

    pub fn code(&self) -> u16 {
        self.kind.status_code()
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn class_name(&self) -> &'static str {
        self.kind.class_name()
    }

    /// The tenancy `reason` code, if this error was produced from a [`TenancyError`].
    pub fn reason(&self) -> Option<&str> {
        self.data
            .as_ref()
            .and_then(|d| d.get("reason"))
            .and_then(|r| r.as_str())
    }

    /// Convert into `anyhow::Error` so it flows through `?` chains.
    pub fn into_anyhow(self) -> AnyError {
        AnyError::new(self)
    }

    /// Turn any error into a DogError:
    /// - a DogError anywhere in the chain is kept (lossless)
    /// - a TenancyError is converted with its reason
    /// - anything else becomes a GeneralError
    pub fn normalize(err: AnyError) -> DogError {
        let err = match err.downcast::<DogError>() {
            Ok(dog) => return dog,
            Err(other) => other,
        };
        if let Some(tenancy) = err.chain().find_map(|e| e.downcast_ref::<TenancyError>()) {
            return DogError::from(tenancy.clone());
        }
        DogError::new(ErrorKind::GeneralError, err.to_string()).with_source(err)
    }

    /// A "safe" version suitable for returning to clients: the inner
    /// `source` (driver messages, SQL) is dropped.
    pub fn sanitize_for_client(&self) -> DogError {
        DogError {
            kind: self.kind,
            message: self.message.clone(),
            data: self.data.clone(),
            source: None,
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, msg)
    }
    pub fn general_error(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::GeneralError, msg)
    }
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unavailable, msg)
    }

    /// Feathers-ish JSON payload.
    pub fn to_json(&self) -> Value {
        let mut base = json!({
            "name": self.name(),
            "message": self.message,
            "code": self.code(),
            "className": self.class_name(),
        });

        if let Some(d) = &self.data {
            base["data"] = d.clone();
        }
        base
    }
}

impl fmt::Display for DogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.name(), self.code(), self.message)
    }
}

impl std::error::Error for DogError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Tenant isolation failures.
///
/// The first three are client faults detected by the request gate before
/// any business logic runs. The rest come from infrastructure or storage.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TenancyError {
    #[error("Missing tenant header `{header}`")]
    MissingTenant { header: String },

    #[error("Malformed tenant identifier: {0}")]
    MalformedIdentifier(String),

    #[error("Unknown tenant: {0}")]
    UnknownTenant(TenantId),

    #[error("Tenant resolver unavailable: {0}")]
    ResolverUnavailable(String),

    /// The storage engine could not cast the session binding to a tenant id,
    /// or the binder refused to bind. Always aborts the unit of work.
    #[error("Tenant binding rejected by isolation policy: {0}")]
    IsolationCastError(String),

    #[error("Write rejected by tenant isolation policy: {0}")]
    PolicyViolation(String),

    #[error("Storage principal `{role}` can bypass tenant isolation")]
    PrivilegedPrincipal { role: String },
}

impl TenancyError {
    /// Stable machine-readable code, sent to clients as `data.reason`.
    pub fn reason(&self) -> &'static str {
        match self {
            TenancyError::MissingTenant { .. } => "MissingTenant",
            TenancyError::MalformedIdentifier(_) => "MalformedIdentifier",
            TenancyError::UnknownTenant(_) => "UnknownTenant",
            TenancyError::ResolverUnavailable(_) => "ResolverUnavailable",
            TenancyError::IsolationCastError(_) => "IsolationCastError",
            TenancyError::PolicyViolation(_) => "PolicyViolation",
            TenancyError::PrivilegedPrincipal { .. } => "PrivilegedPrincipal",
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            TenancyError::MissingTenant { .. } | TenancyError::MalformedIdentifier(_) => {
                ErrorKind::BadRequest
            }
            TenancyError::UnknownTenant(_) | TenancyError::PolicyViolation(_) => {
                ErrorKind::Forbidden
            }
            TenancyError::ResolverUnavailable(_) => ErrorKind::Unavailable,
            TenancyError::IsolationCastError(_) | TenancyError::PrivilegedPrincipal { .. } => {
                ErrorKind::GeneralError
            }
        }
    }

    /// Client-caused rejections, all produced by the gate.
    pub fn is_client_fault(&self) -> bool {
        matches!(
            self,
            TenancyError::MissingTenant { .. }
                | TenancyError::MalformedIdentifier(_)
                | TenancyError::UnknownTenant(_)
        )
    }

    pub fn into_anyhow(self) -> AnyError {
        AnyError::new(self)
    }
}

impl From<TenancyError> for DogError {
    fn from(err: TenancyError) -> Self {
        // Server-side faults keep the detail out of the client message.
        let message = match &err {
            TenancyError::IsolationCastError(_) | TenancyError::PrivilegedPrincipal { .. } => {
                "Tenant isolation failure".to_string()
            }
            other => other.to_string(),
        };
        DogError::new(err.kind(), message)
            .with_data(json!({ "reason": err.reason() }))
            .with_source(AnyError::new(err))
    }
}
