//! Environment-driven configuration (§6.4).
//!
//! The original Python implementation rebinds any uppercase module
//! attribute it finds a same-named environment variable for — a reflection
//! loop over `globals()`. Design Notes calls that out for re-architecture:
//! here every field is parsed explicitly, with its own default and its own
//! failure mode, instead of one generic loop over whatever happens to be
//! uppercase.

use std::env;

use secrecy::Secret;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{var}: invalid value {value:?}: {reason}")]
    InvalidValue {
        var: &'static str,
        value: String,
        reason: String,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// How the process should reconcile its schema against the database at
/// startup (§6.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbStartupPolicy {
    /// Validate the existing schema; drop and recreate it if it doesn't match.
    ValidateOrRecreate,
    /// Run migrations only if tables are missing.
    CreateIfMissing,
    /// Do nothing; the schema is assumed to already be correct.
    Off,
}

impl DbStartupPolicy {
    fn parse(raw: &str) -> Result<Self> {
        match raw {
            "validateOrRecreate" => Ok(Self::ValidateOrRecreate),
            "createIfMissing" => Ok(Self::CreateIfMissing),
            "off" => Ok(Self::Off),
            other => Err(Error::InvalidValue {
                var: "HOMECAST_DB_STARTUP_POLICY",
                value: other.to_string(),
                reason: "expected one of validateOrRecreate, createIfMissing, off".into(),
            }),
        }
    }
}

/// Fully resolved relay configuration.
pub struct RelayConfig {
    /// Port the HTTP/WS server binds to.
    pub bind_port: u16,
    /// Postgres connection string for the shared relational store.
    pub database_url: String,
    /// Allowed CORS origins for the HTTP surface.
    pub cors_allow_list: Vec<String>,
    /// Bus connection URL; empty means local-only mode (no cross-instance routing).
    pub bus_url: String,
    /// Prefix used to name per-slot bus topics (`{prefix}-{slotName}`).
    pub topic_prefix: String,
    /// Force all requests through the bus path, skipping the local
    /// short-circuit, for testing cross-instance routing on a single process.
    pub force_bus: bool,
    /// HMAC secret used to sign and verify bearer tokens.
    pub token_secret: Secret<String>,
    /// JWT algorithm name (informational; the auth gate currently only
    /// implements HS256, matching the algorithm this field is expected to name).
    pub token_algorithm: String,
    /// Bearer token time-to-live, in hours.
    pub token_ttl_hours: i64,
    /// Startup reconciliation policy for the database schema.
    pub db_startup_policy: DbStartupPolicy,
}

impl RelayConfig {
    /// Load configuration from environment variables, applying defaults for
    /// anything unset.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            bind_port: parse_env_or("HOMECAST_PORT", 8080)?,
            database_url: env::var("HOMECAST_DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost/homecast".into()),
            cors_allow_list: env::var("HOMECAST_CORS_ORIGINS")
                .ok()
                .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_else(default_cors_origins),
            bus_url: env::var("HOMECAST_BUS_URL").unwrap_or_default(),
            topic_prefix: env::var("HOMECAST_TOPIC_PREFIX").unwrap_or_else(|_| "homecast-instance".into()),
            force_bus: parse_env_bool("HOMECAST_FORCE_BUS", false),
            token_secret: Secret::new(
                env::var("HOMECAST_JWT_SECRET").unwrap_or_else(|_| "change-me-in-production".into()),
            ),
            token_algorithm: env::var("HOMECAST_JWT_ALGORITHM").unwrap_or_else(|_| "HS256".into()),
            token_ttl_hours: parse_env_or("HOMECAST_JWT_TTL_HOURS", 24 * 7)?,
            db_startup_policy: match env::var("HOMECAST_DB_STARTUP_POLICY") {
                Ok(raw) => DbStartupPolicy::parse(&raw)?,
                Err(_) => DbStartupPolicy::ValidateOrRecreate,
            },
        })
    }

    /// `true` when a bus URL is configured and cross-instance routing is possible.
    pub fn bus_enabled(&self) -> bool {
        !self.bus_url.is_empty()
    }
}

fn default_cors_origins() -> Vec<String> {
    vec!["http://localhost:3000".to_string()]
}

fn parse_env_bool(var: &'static str, default: bool) -> bool {
    match env::var(var) {
        Ok(v) => matches!(v.to_lowercase().as_str(), "true" | "1" | "t"),
        Err(_) => default,
    }
}

fn parse_env_or<T>(var: &'static str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(var) {
        Ok(raw) => raw.parse::<T>().map_err(|e| Error::InvalidValue {
            var,
            value: raw,
            reason: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_startup_policy_parses_known_values() {
        assert_eq!(DbStartupPolicy::parse("off").unwrap(), DbStartupPolicy::Off);
        assert_eq!(
            DbStartupPolicy::parse("createIfMissing").unwrap(),
            DbStartupPolicy::CreateIfMissing
        );
        assert!(DbStartupPolicy::parse("nonsense").is_err());
    }

    #[test]
    fn bus_enabled_reflects_url() {
        let cfg = RelayConfig {
            bind_port: 8080,
            database_url: String::new(),
            cors_allow_list: vec![],
            bus_url: String::new(),
            topic_prefix: "x".into(),
            force_bus: false,
            token_secret: Secret::new(String::new()),
            token_algorithm: "HS256".into(),
            token_ttl_hours: 1,
            db_startup_policy: DbStartupPolicy::Off,
        };
        assert!(!cfg.bus_enabled());
    }
}
