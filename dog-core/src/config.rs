//! # DogRS Configuration
//!
//! A minimal string key/value store (`set` / `get`) with an environment
//! overlay, plus [`TenancySettings`]: the typed view the request gate and
//! the storage binder read from it.
//!
//! ```rust
//! use dog_core::DogConfig;
//!
//! let mut cfg = DogConfig::with_defaults();
//! cfg.set("tenancy.header", "x-org-id");
//!
//! let settings = cfg.snapshot().tenancy().unwrap();
//! assert_eq!(settings.header, "x-org-id");
//! ```
//!
//! Environment overrides use a prefix and `__` as the segment separator:
//!
//! ```bash
//! export DOG__TENANCY__RESOLVER__ON_UNAVAILABLE=fail-closed   # tenancy.resolver.on_unavailable
//! ```

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Result};

use crate::gate::{PublicPaths, ResolverFailurePolicy};
use crate::tenant::TenantId;

pub const TENANT_HEADER: &str = "tenancy.header";
pub const SESSION_VARIABLE: &str = "tenancy.session_variable";
pub const SENTINEL_ORG_ID: &str = "tenancy.sentinel_org_id";
pub const PUBLIC_PATHS: &str = "tenancy.public_paths";
pub const ON_RESOLVER_UNAVAILABLE: &str = "tenancy.resolver.on_unavailable";

/// Fixture/demo tenant that skips the existence lookup.
pub const DEFAULT_SENTINEL_ORG_ID: &str = "00000000-0000-4000-8000-000000000000";

const DEFAULTS: &[(&str, &str)] = &[
    (TENANT_HEADER, "x-org-id"),
    (SESSION_VARIABLE, "app.org_id"),
    (SENTINEL_ORG_ID, DEFAULT_SENTINEL_ORG_ID),
    (PUBLIC_PATHS, "/health,/ready,/webhooks/"),
    (ON_RESOLVER_UNAVAILABLE, "fail-open"),
    ("database.max_connections", "10"),
    ("database.catalog_table", "organizations"),
    ("http.host", "127.0.0.1"),
    ("http.port", "3030"),
];

#[derive(Debug, Default)]
pub struct DogConfig {
    values: HashMap<String, String>,
}

impl DogConfig {
    /// Create an empty config store.
    pub fn new() -> Self {
        Self {
            values: HashMap::new(),
        }
    }

    /// A store pre-filled with the tenancy, database and http defaults.
    pub fn with_defaults() -> Self {
        let mut cfg = Self::new();
        for (k, v) in DEFAULTS {
            cfg.set(*k, *v);
        }
        cfg
    }

    pub fn set<K, V>(&mut self, key: K, value: V)
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|s| s.as_str())
    }

    pub fn has(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Overlay environment variables starting with `prefix`.
    ///
    /// `DOG__DATABASE__URL` → `database.url` (for prefix `DOG__`).
    pub fn load_env(&mut self, prefix: &str) {
        self.load_vars(prefix, std::env::vars());
    }

    fn load_vars<I>(&mut self, prefix: &str, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            if let Some(stripped) = key.strip_prefix(prefix) {
                let normalized = stripped.to_lowercase().replace("__", ".");
                self.set(normalized, value);
            }
        }
    }

    pub fn snapshot(&self) -> DogConfigSnapshot {
        DogConfigSnapshot::new(self.values.clone())
    }
}

#[derive(Debug, Clone, Default)]
pub struct DogConfigSnapshot {
    map: HashMap<String, String>,
}

impl DogConfigSnapshot {
    pub(crate) fn new(map: HashMap<String, String>) -> Self {
        Self { map }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(|s| s.as_str())
    }

    /// Parse a key into `T`. An absent key is `Ok(None)`; a value that does
    /// not parse (including one out of range for `T`) is an error.
    pub fn get_parsed<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        self.get(key)
            .map(|v| {
                v.trim()
                    .parse::<T>()
                    .map_err(|e| anyhow!("invalid value `{v}` for configuration key `{key}`: {e}"))
            })
            .transpose()
    }

    /// Look up a key that has no sensible default.
    pub fn require(&self, key: &str) -> Result<&str> {
        self.get(key)
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| anyhow!("missing required configuration key `{key}`"))
    }

    pub fn tenancy(&self) -> Result<TenancySettings> {
        TenancySettings::from_snapshot(self)
    }
}

/// Typed tenancy settings shared by the gate (HTTP side) and the binder
/// and policy (storage side).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenancySettings {
    pub header: String,
    /// Name of the connection-scoped variable. The binder writes it and the
    /// storage policy reads it, so both must be built from this one value.
    pub session_variable: String,
    pub sentinel: Option<TenantId>,
    pub public_paths: PublicPaths,
    pub on_resolver_unavailable: ResolverFailurePolicy,
}

impl TenancySettings {
    pub fn from_snapshot(snap: &DogConfigSnapshot) -> Result<Self> {
        let header = snap
            .get(TENANT_HEADER)
            .unwrap_or("x-org-id")
            .trim()
            .to_ascii_lowercase();
        if header.is_empty() {
            return Err(anyhow!("`{TENANT_HEADER}` must not be empty"));
        }

        let session_variable = snap
            .get(SESSION_VARIABLE)
            .unwrap_or("app.org_id")
            .trim()
            .to_string();
        validate_session_variable(&session_variable)?;

        let sentinel = match snap.get(SENTINEL_ORG_ID).map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(
                TenantId::parse(raw)
                    .map_err(|e| anyhow!("`{SENTINEL_ORG_ID}` is not a tenant identifier: {e}"))?,
            ),
        };

        let public_paths = PublicPaths::parse(snap.get(PUBLIC_PATHS).unwrap_or(""));

        let on_resolver_unavailable = snap
            .get(ON_RESOLVER_UNAVAILABLE)
            .unwrap_or("fail-open")
            .parse::<ResolverFailurePolicy>()?;

        Ok(Self {
            header,
            session_variable,
            sentinel,
            public_paths,
            on_resolver_unavailable,
        })
    }
}

impl Default for TenancySettings {
    fn default() -> Self {
        Self {
            header: "x-org-id".to_string(),
            session_variable: "app.org_id".to_string(),
            sentinel: TenantId::parse(DEFAULT_SENTINEL_ORG_ID).ok(),
            public_paths: PublicPaths::parse("/health,/ready,/webhooks/"),
            on_resolver_unavailable: ResolverFailurePolicy::FailOpen,
        }
    }
}

/// Custom session variables must be `namespace.name`, lower-case identifiers.
pub fn validate_session_variable(name: &str) -> Result<()> {
    let is_ident = |s: &str| {
        let mut chars = s.chars();
        matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c == '_')
            && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    };

    match name.split_once('.') {
        Some((ns, key)) if is_ident(ns) && is_ident(key) => Ok(()),
        _ => Err(anyhow!(
            "session variable `{name}` must look like `namespace.name` (lower-case identifiers)"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_produce_valid_settings() {
        let settings = DogConfig::with_defaults().snapshot().tenancy().unwrap();
        assert_eq!(settings, TenancySettings::default());
    }

    #[test]
    fn env_overlay_normalizes_keys() {
        let mut cfg = DogConfig::with_defaults();
        cfg.load_vars(
            "DOG__",
            vec![
                (
                    "DOG__TENANCY__RESOLVER__ON_UNAVAILABLE".to_string(),
                    "fail-closed".to_string(),
                ),
                ("DOG__TENANCY__SESSION_VARIABLE".to_string(), "tenant.current".to_string()),
                ("OTHER__THING".to_string(), "ignored".to_string()),
            ],
        );

        let settings = cfg.snapshot().tenancy().unwrap();
        assert_eq!(settings.on_resolver_unavailable, ResolverFailurePolicy::FailClosed);
        assert_eq!(settings.session_variable, "tenant.current");
        assert!(!cfg.has("other.thing"));
    }

    #[test]
    fn empty_sentinel_disables_the_bypass() {
        let mut cfg = DogConfig::with_defaults();
        cfg.set(SENTINEL_ORG_ID, "");
        assert_eq!(cfg.snapshot().tenancy().unwrap().sentinel, None);
    }

    #[test]
    fn malformed_sentinel_is_a_config_error() {
        let mut cfg = DogConfig::with_defaults();
        cfg.set(SENTINEL_ORG_ID, "demo");
        assert!(cfg.snapshot().tenancy().is_err());
    }

    #[test]
    fn session_variable_must_be_namespaced() {
        assert!(validate_session_variable("app.org_id").is_ok());
        assert!(validate_session_variable("org_id").is_err());
        assert!(validate_session_variable("app.org-id").is_err());
        assert!(validate_session_variable("app.org_id'; drop").is_err());
        assert!(validate_session_variable("App.Org").is_err());
    }

    #[test]
    fn unknown_failure_policy_is_rejected() {
        let mut cfg = DogConfig::with_defaults();
        cfg.set(ON_RESOLVER_UNAVAILABLE, "sometimes");
        assert!(cfg.snapshot().tenancy().is_err());
    }

    #[test]
    fn require_reports_missing_keys() {
        let snap = DogConfig::with_defaults().snapshot();
        assert!(snap.require("database.url").is_err());
        assert_eq!(snap.require("http.port").unwrap(), "3030");
    }

    #[test]
    fn parsed_values_report_bad_input_instead_of_truncating() {
        let mut cfg = DogConfig::with_defaults();
        cfg.set("database.max_connections", "4294967297");
        cfg.set("database.min_connections", "two");
        let snap = cfg.snapshot();

        assert_eq!(snap.get_parsed::<u16>("http.port").unwrap(), Some(3030));
        assert_eq!(snap.get_parsed::<u32>("database.idle_timeout_secs").unwrap(), None);

        let err = snap.get_parsed::<u32>("database.max_connections").unwrap_err();
        assert!(err.to_string().contains("database.max_connections"));
        assert!(snap.get_parsed::<u32>("database.min_connections").is_err());
    }
}
