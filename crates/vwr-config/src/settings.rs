//! Runtime settings for one reconciliation deployment.
//!
//! Every value has an environment variable and a YAML pointer. The
//! environment wins, so a container can override a checked-in layer without
//! editing it. Required values fail closed with `CONFIG_MISSING`.

use std::net::SocketAddr;
use std::time::Duration;

use serde_json::Value;

pub const ENV_EVENT_ID: &str = "VWR_EVENT_ID";
pub const ENV_EXPIRY_PERIOD: &str = "VWR_QUEUE_POSITION_EXPIRY_PERIOD";
pub const ENV_CACHE_URL: &str = "VWR_CACHE_URL";
pub const ENV_DATABASE_URL: &str = "VWR_DATABASE_URL";
pub const ENV_INTERVAL: &str = "VWR_RECONCILE_INTERVAL_SECS";
pub const ENV_DAEMON_ADDR: &str = "VWR_DAEMON_ADDR";

pub const DEFAULT_INTERVAL_SECS: u64 = 60;
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("CONFIG_MISSING: required value '{name}' (env {env} or yaml {pointer}) is not set")]
    Missing {
        name: &'static str,
        env: String,
        pointer: &'static str,
    },

    #[error("CONFIG_INVALID: '{name}' {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Fully resolved settings. Contains endpoint identifiers only; the cache
/// credential is resolved separately by [`crate::secrets`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub event_id: String,
    pub expiry_period: Duration,
    pub cache_url: String,
    pub ledger_url: String,
    pub ledger_max_connections: u32,
    pub interval: Duration,
    pub daemon_addr: Option<SocketAddr>,
}

struct Source<'a, F> {
    config: &'a Value,
    env: F,
}

impl<F> Source<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn lookup(&self, env: &str, pointer: &str) -> Option<String> {
        if let Some(v) = (self.env)(env) {
            let t = v.trim();
            if !t.is_empty() {
                return Some(t.to_string());
            }
        }
        match self.config.pointer(pointer)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    fn required(
        &self,
        name: &'static str,
        env: &'static str,
        pointer: &'static str,
    ) -> Result<String, ConfigError> {
        self.lookup(env, pointer)
            .ok_or_else(|| ConfigError::Missing {
                name,
                env: env.to_string(),
                pointer,
            })
    }

    fn positive_secs(&self, name: &'static str, raw: &str) -> Result<Duration, ConfigError> {
        match raw.parse::<u64>() {
            Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
            _ => Err(ConfigError::Invalid {
                name,
                reason: format!("must be a positive whole number of seconds, got '{raw}'"),
            }),
        }
    }
}

impl Settings {
    /// Resolve from the process environment over `config_json`.
    pub fn from_env(config_json: &Value) -> Result<Self, ConfigError> {
        Self::resolve(config_json, |name| std::env::var(name).ok())
    }

    /// Resolve with an explicit env lookup (tests pass a map).
    pub fn resolve<F>(config_json: &Value, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let src = Source {
            config: config_json,
            env,
        };

        let event_id = src.required("event_id", ENV_EVENT_ID, "/event/id")?;

        let expiry_raw = src.required(
            "expiry_period",
            ENV_EXPIRY_PERIOD,
            "/reconcile/expiry_period_secs",
        )?;
        let expiry_period = src.positive_secs("expiry_period", &expiry_raw)?;

        let cache_url = src.required("cache_url", ENV_CACHE_URL, "/cache/url")?;
        let ledger_url = src.required("ledger_url", ENV_DATABASE_URL, "/ledger/url")?;

        let interval = match src.lookup(ENV_INTERVAL, "/reconcile/interval_secs") {
            Some(raw) => src.positive_secs("interval", &raw)?,
            None => Duration::from_secs(DEFAULT_INTERVAL_SECS),
        };

        let ledger_max_connections = match config_json
            .pointer("/ledger/max_connections")
            .and_then(Value::as_u64)
        {
            Some(0) => {
                return Err(ConfigError::Invalid {
                    name: "ledger_max_connections",
                    reason: "must be > 0".to_string(),
                })
            }
            Some(n) => u32::try_from(n).map_err(|_| ConfigError::Invalid {
                name: "ledger_max_connections",
                reason: format!("{n} is out of range"),
            })?,
            None => DEFAULT_MAX_CONNECTIONS,
        };

        let daemon_addr = match src.lookup(ENV_DAEMON_ADDR, "/daemon/addr") {
            Some(raw) => Some(raw.parse::<SocketAddr>().map_err(|e| ConfigError::Invalid {
                name: "daemon_addr",
                reason: e.to_string(),
            })?),
            None => None,
        };

        Ok(Settings {
            event_id,
            expiry_period,
            cache_url,
            ledger_url,
            ledger_max_connections,
            interval,
            daemon_addr,
        })
    }
}
