//! Cache credential resolution.
//!
//! # Contract
//! - Config YAML stores only the env var NAME of the credential
//!   (`/cache/auth_env`, default `VWR_CACHE_AUTH`).
//! - Callers resolve once at startup and hand the result to the cache
//!   constructor; nothing else reads the variable.
//! - `Debug` redacts the value. Errors name the variable, never the value.

use serde_json::Value;

use crate::ConfigError;

pub const DEFAULT_CACHE_AUTH_ENV: &str = "VWR_CACHE_AUTH";

/// Credential for the frontier cache. **Redacted in `Debug` output.**
#[derive(Clone)]
pub struct CacheCredential {
    /// Env var the value came from.
    pub source_var: String,
    secret: String,
}

impl CacheCredential {
    pub fn expose(&self) -> &str {
        &self.secret
    }
}

impl std::fmt::Debug for CacheCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheCredential")
            .field("source_var", &self.source_var)
            .field("secret", &"<REDACTED>")
            .finish()
    }
}

/// Name of the env var holding the cache credential.
pub fn cache_auth_env_name(config_json: &Value) -> String {
    config_json
        .pointer("/cache/auth_env")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_CACHE_AUTH_ENV)
        .to_string()
}

/// Resolve the cache credential through `env`. Missing or blank fails closed.
pub fn resolve_cache_credential<F>(config_json: &Value, env: F) -> Result<CacheCredential, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let var = cache_auth_env_name(config_json);
    match env(&var) {
        Some(v) if !v.trim().is_empty() => Ok(CacheCredential {
            source_var: var,
            secret: v,
        }),
        _ => Err(ConfigError::Missing {
            name: "cache_credential",
            env: var,
            pointer: "/cache/auth_env",
        }),
    }
}
