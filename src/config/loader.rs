//! Configuration loading from the process environment.
//!
//! Every setting is read exactly once here. The loader is written against a
//! lookup function so tests can build configs from a plain map.

use std::collections::HashMap;
use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use axum::http::{HeaderName, HeaderValue};
use thiserror::Error;

use crate::config::schema::{
    BackendConfig, HealthCheckConfig, ListenerConfig, ObservabilityConfig, OverloadConfig,
    PublicConfig, RouterConfig, SecurityConfig, TimeoutConfig,
};
use crate::routing::origin::Origin;

/// Fatal startup error. The process exits before binding any socket.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(String),

    #[error("invalid value for {name}: {reason}")]
    Invalid { name: String, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(name: &str, reason: impl Display) -> Self {
        ConfigError::Invalid {
            name: name.to_string(),
            reason: reason.to_string(),
        }
    }
}

const DEFAULT_PUBLIC_URL: &str = "http://127.0.0.1:10002";

impl RouterConfig {
    /// Load configuration from environment variables, honouring a `.env` file.
    pub fn from_env() -> Result<Self, ConfigError> {
        // A missing .env file is normal.
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from a map of variables. Mostly useful in tests.
    pub fn from_map(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        Self::from_lookup(|key| vars.get(key).cloned())
    }

    /// Build a config from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup };

        let backends = BackendConfig {
            identity: vars.backend("IDENTITY_URL")?,
            writer: vars.backend("WRITER_URL")?,
            static_assets: vars.backend("STATIC_URL")?,
            verifier: match vars.get("VERIFIER_URL") {
                Some(_) => Some(vars.backend("VERIFIER_URL")?),
                None => None,
            },
        };

        let router_public = match vars.get("PUBLIC_URL") {
            Some(raw) => Origin::resolve("PUBLIC_URL", &raw)?,
            None => Origin::resolve("PUBLIC_URL", DEFAULT_PUBLIC_URL)?,
        };
        let verifier_public = match vars.get("PUBLIC_VERIFIER_URL") {
            Some(raw) => Origin::resolve("PUBLIC_VERIFIER_URL", &raw)?,
            None => router_public.clone(),
        };

        let listener = ListenerConfig {
            host: vars.get("HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: vars.parse("PORT", 10002)?,
        };

        let max_body_bytes: u64 = vars.parse("MAX_BODY_BYTES", 10 * 1024)?;
        if max_body_bytes == 0 {
            return Err(ConfigError::invalid("MAX_BODY_BYTES", "must be greater than 0"));
        }

        let security = SecurityConfig {
            max_body_bytes,
            hsts: vars.flag("HSTS", true)?,
            hsts_max_age_secs: vars.parse("HSTS_MAX_AGE_SECS", 31_536_000)?,
            frame_options: match vars.raw("FRAME_OPTIONS") {
                Some(v) if v.trim().is_empty() => None,
                Some(v) => {
                    let v = v.trim();
                    HeaderValue::from_str(v).map_err(|e| ConfigError::invalid("FRAME_OPTIONS", e))?;
                    Some(v.to_string())
                }
                None => Some("DENY".to_string()),
            },
            content_type_nosniff: vars.flag("CONTENT_TYPE_NOSNIFF", true)?,
            force_https: vars.flag("FORCE_HTTPS", false)?,
            legacy_headers: parse_header_pairs(
                "LEGACY_RESPONSE_HEADERS",
                vars.get("LEGACY_RESPONSE_HEADERS").as_deref().unwrap_or(""),
            )?,
        };

        let overload = OverloadConfig {
            max_lag: Duration::from_millis(vars.parse("MAX_LAG_MS", 70)?),
            sample_interval: Duration::from_millis(vars.parse("LAG_SAMPLE_INTERVAL_MS", 500)?),
        };
        if overload.enabled() && overload.sample_interval.is_zero() {
            return Err(ConfigError::invalid("LAG_SAMPLE_INTERVAL_MS", "must be greater than 0"));
        }

        let health_path = vars
            .get("HEARTBEAT_PATH")
            .unwrap_or_else(|| "/__heartbeat__".to_string());
        if !health_path.starts_with('/') {
            return Err(ConfigError::invalid("HEARTBEAT_PATH", "must start with '/'"));
        }
        let health_check = HealthCheckConfig {
            path: health_path,
            interval: Duration::from_secs(vars.parse("HEALTH_CHECK_INTERVAL_SECS", 10)?),
            timeout: Duration::from_secs(vars.parse("HEALTH_CHECK_TIMEOUT_SECS", 5)?),
        };
        if health_check.interval.is_zero() {
            return Err(ConfigError::invalid("HEALTH_CHECK_INTERVAL_SECS", "must be greater than 0"));
        }

        let timeouts = TimeoutConfig {
            connect: Duration::from_secs(vars.parse("UPSTREAM_CONNECT_TIMEOUT_SECS", 5)?),
            upstream: Duration::from_secs(vars.parse("UPSTREAM_TIMEOUT_SECS", 30)?),
            drain: Duration::from_secs(vars.parse("DRAIN_TIMEOUT_SECS", 10)?),
        };

        let observability = ObservabilityConfig {
            metrics_address: vars.get("METRICS_ADDRESS"),
        };

        Ok(Self {
            listener,
            backends,
            public: PublicConfig {
                router: router_public,
                verifier: verifier_public,
            },
            security,
            overload,
            health_check,
            timeouts,
            observability,
            fake_verification: vars.flag("FAKE_VERIFICATION", false)?,
        })
    }
}

struct Vars<F> {
    lookup: F,
}

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn raw(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
    }

    /// A set, non-blank variable.
    fn get(&self, key: &str) -> Option<String> {
        self.raw(key).filter(|v| !v.trim().is_empty())
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.get(key) {
            Some(raw) => raw.trim().parse().map_err(|e| ConfigError::invalid(key, e)),
            None => Ok(default),
        }
    }

    fn flag(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                other => Err(ConfigError::invalid(key, format!("'{other}' is not a boolean"))),
            },
        }
    }

    /// A required backend URL. The outbound connector speaks plain HTTP only.
    fn backend(&self, key: &str) -> Result<Origin, ConfigError> {
        let raw = self.get(key).ok_or_else(|| ConfigError::Missing(key.to_string()))?;
        let origin = Origin::resolve(key, &raw)?;
        if origin.is_https() {
            return Err(ConfigError::invalid(key, "backends must be reachable over http"));
        }
        Ok(origin)
    }
}

/// Parse `Name: value|Name: value` into header pairs.
fn parse_header_pairs(
    key: &str,
    raw: &str,
) -> Result<Vec<(HeaderName, HeaderValue)>, ConfigError> {
    raw.split('|')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (name, value) = entry
                .split_once(':')
                .ok_or_else(|| ConfigError::invalid(key, format!("'{entry}' is not 'Name: value'")))?;
            let name = HeaderName::from_bytes(name.trim().as_bytes())
                .map_err(|e| ConfigError::invalid(key, e))?;
            let value = HeaderValue::from_str(value.trim()).map_err(|e| ConfigError::invalid(key, e))?;
            Ok((name, value))
        })
        .collect()
}
