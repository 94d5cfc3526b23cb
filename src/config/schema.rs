//! Configuration schema definitions.
//!
//! `RouterConfig` is the single immutable value built at startup. Backend
//! locations are already resolved into [`Origin`]s by the time a config
//! exists, so nothing downstream ever re-parses a URL.

use std::time::Duration;

use axum::http::{HeaderName, HeaderValue};
use serde::Serialize;

use crate::routing::origin::Origin;

/// Root configuration for the router.
#[derive(Debug, Clone, Serialize)]
pub struct RouterConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Resolved backend origins.
    pub backends: BackendConfig,

    /// Public-facing identities used for host-based routing.
    pub public: PublicConfig,

    /// Request and transport security policy.
    pub security: SecurityConfig,

    /// Overload shedding.
    pub overload: OverloadConfig,

    /// Dependency health polling and the heartbeat endpoint.
    pub health_check: HealthCheckConfig,

    /// Forwarder and drain timeouts.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Install the `/wsapi/fake_verification` passthrough. Test deployments only.
    pub fake_verification: bool,
}

/// Listener configuration.
#[derive(Debug, Clone, Serialize)]
pub struct ListenerConfig {
    pub host: String,
    pub port: u16,
}

impl ListenerConfig {
    /// `host:port` suitable for `TcpListener::bind`.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// The four upstream services the router can dispatch to.
#[derive(Debug, Clone, Serialize)]
pub struct BackendConfig {
    /// Identity service; handles API reads.
    pub identity: Origin,

    /// Database writer; handles API writes.
    pub writer: Origin,

    /// Static assets; receives everything no other rule claims.
    pub static_assets: Origin,

    /// Assertion verifier, when deployed.
    pub verifier: Option<Origin>,
}

/// Public URLs the router and verifier are reachable at.
#[derive(Debug, Clone, Serialize)]
pub struct PublicConfig {
    pub router: Origin,
    pub verifier: Origin,
}

/// Security policy applied by the limit and header stages.
#[derive(Debug, Clone, Serialize)]
pub struct SecurityConfig {
    /// Maximum request body size in bytes.
    pub max_body_bytes: u64,

    /// Emit `Strict-Transport-Security`.
    pub hsts: bool,

    /// `max-age` for HSTS, in seconds.
    pub hsts_max_age_secs: u64,

    /// `X-Frame-Options` value; `None` disables the header.
    pub frame_options: Option<String>,

    /// Emit `X-Content-Type-Options: nosniff`.
    pub content_type_nosniff: bool,

    /// Redirect requests that arrived over plain http (per `X-Forwarded-Proto`).
    pub force_https: bool,

    /// Extra response headers for old clients.
    #[serde(serialize_with = "serialize_header_pairs")]
    pub legacy_headers: Vec<(HeaderName, HeaderValue)>,
}

/// Overload shedding settings.
#[derive(Debug, Clone, Serialize)]
pub struct OverloadConfig {
    /// Lag above which requests are shed. Zero disables shedding.
    pub max_lag: Duration,

    /// How often the lag sampler wakes.
    pub sample_interval: Duration,
}

impl OverloadConfig {
    pub fn enabled(&self) -> bool {
        !self.max_lag.is_zero()
    }
}

/// Health check configuration.
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheckConfig {
    /// Path of our own heartbeat, and the path probed on each dependency.
    pub path: String,

    /// Delay between probe cycles.
    pub interval: Duration,

    /// Per-probe timeout.
    pub timeout: Duration,
}

/// Timeout configuration.
#[derive(Debug, Clone, Serialize)]
pub struct TimeoutConfig {
    /// Upstream TCP connect timeout.
    pub connect: Duration,

    /// Time allowed for an upstream to produce response headers.
    pub upstream: Duration,

    /// Bound on the shutdown drain.
    pub drain: Duration,
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize)]
pub struct ObservabilityConfig {
    /// Prometheus listener address; `None` disables the exporter.
    pub metrics_address: Option<String>,
}

fn serialize_header_pairs<S>(
    pairs: &[(HeaderName, HeaderValue)],
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.collect_seq(pairs.iter().map(|(name, value)| {
        format!("{}: {}", name, value.to_str().unwrap_or("<binary>"))
    }))
}
