//! Backend origin resolution.
//!
//! An [`Origin`] is the scheme/host/port triple of a backend, with any path,
//! query or fragment stripped. Origins are resolved once at startup and then
//! shared read-only by every request handler.

use std::fmt;
use std::sync::Arc;

use axum::http::uri::{Authority, Scheme};
use serde::{Serialize, Serializer};
use url::Url;

use crate::config::loader::ConfigError;

/// A canonical backend origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    scheme: Scheme,
    host: String,
    port: u16,
    authority: Authority,
}

impl Origin {
    /// Resolve a raw URL into an origin.
    ///
    /// `name` identifies the setting in error messages.
    pub fn resolve(name: &str, raw: &str) -> Result<Self, ConfigError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ConfigError::Missing(name.to_string()));
        }

        let url = Url::parse(raw).map_err(|e| ConfigError::invalid(name, e))?;

        let scheme = match url.scheme() {
            "http" => Scheme::HTTP,
            "https" => Scheme::HTTPS,
            other => {
                return Err(ConfigError::invalid(name, format!("unsupported scheme '{other}'")));
            }
        };

        // The url crate lower-cases registered names and brackets IPv6.
        let host = match url.host_str() {
            Some(h) if !h.is_empty() => h.to_string(),
            _ => return Err(ConfigError::invalid(name, "URL has no host")),
        };

        let port = url
            .port_or_known_default()
            .ok_or_else(|| ConfigError::invalid(name, "URL has no port"))?;

        let authority = match url.port() {
            Some(p) => format!("{host}:{p}"),
            None => host.clone(),
        };
        let authority = Authority::try_from(authority.as_str())
            .map_err(|e| ConfigError::invalid(name, e))?;

        Ok(Self {
            scheme,
            host,
            port,
            authority,
        })
    }

    pub fn scheme(&self) -> &Scheme {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host[:port]`, with the port omitted when it is the scheme default.
    ///
    /// This is the value written into the `Host` header of forwarded requests.
    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    pub fn is_https(&self) -> bool {
        self.scheme == Scheme::HTTPS
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.authority)
    }
}

impl Serialize for Origin {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Which backend a forward goes to. Used for logs and metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Identity,
    Writer,
    Static,
    Verifier,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Identity => "identity",
            Role::Writer => "writer",
            Role::Static => "static",
            Role::Verifier => "verifier",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A forwarding target: an origin tagged with its role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upstream {
    pub role: Role,
    pub origin: Origin,
}

impl Upstream {
    pub fn new(role: Role, origin: Origin) -> Arc<Self> {
        Arc::new(Self { role, origin })
    }
}
