//! Transport security and response header policy.
//!
//! # Responsibilities
//! - Redirect plain-http requests to https (when forced)
//! - Add security response headers (per-header toggles)
//! - Add configured headers for legacy clients
//!
//! # Design Decisions
//! - Headers already set by an upstream are never overwritten
//! - Header values are validated when the config is loaded

use axum::body::Body;
use axum::http::{
    header::{LOCATION, STRICT_TRANSPORT_SECURITY, X_CONTENT_TYPE_OPTIONS, X_FRAME_OPTIONS},
    HeaderMap, HeaderName, HeaderValue, Request, Response, StatusCode,
};

use crate::config::SecurityConfig;
use crate::http::pipeline::{Flow, RequestContext, Stage};
use crate::routing::matcher::request_host;

const X_FORWARDED_PROTO: &str = "x-forwarded-proto";

/// Secure-transport posture: https redirect plus security headers.
pub struct TransportSecurityStage {
    force_https: bool,
    headers: Vec<(HeaderName, HeaderValue)>,
}

impl TransportSecurityStage {
    pub fn new(config: &SecurityConfig) -> Self {
        let mut headers = Vec::new();

        if config.hsts {
            let value = format!("max-age={}", config.hsts_max_age_secs);
            if let Ok(value) = HeaderValue::from_str(&value) {
                headers.push((STRICT_TRANSPORT_SECURITY, value));
            }
        }
        if let Some(value) = config
            .frame_options
            .as_deref()
            .and_then(|v| HeaderValue::from_str(v).ok())
        {
            headers.push((X_FRAME_OPTIONS, value));
        }
        if config.content_type_nosniff {
            headers.push((X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff")));
        }

        Self {
            force_https: config.force_https,
            headers,
        }
    }

    fn https_redirect(&self, req: &Request<Body>) -> Option<Response<Body>> {
        let proto = req.headers().get(X_FORWARDED_PROTO)?.to_str().ok()?;
        if !proto.trim().eq_ignore_ascii_case("http") {
            return None;
        }

        let host = request_host(req)?;
        let path_and_query = req.uri().path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
        let location = HeaderValue::from_str(&format!("https://{host}{path_and_query}")).ok()?;

        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::MOVED_PERMANENTLY;
        response.headers_mut().insert(LOCATION, location);
        Some(response)
    }
}

impl Stage for TransportSecurityStage {
    fn name(&self) -> &'static str {
        "transport_security"
    }

    fn on_request(&self, req: &mut Request<Body>, _cx: &mut RequestContext) -> Flow {
        if self.force_https {
            if let Some(response) = self.https_redirect(req) {
                return Flow::Respond(response);
            }
        }
        Flow::Continue
    }

    fn on_response(&self, res: &mut Response<Body>, _cx: &RequestContext) {
        add_missing(res.headers_mut(), &self.headers);
    }
}

/// Fixed extra response headers for old clients.
pub struct LegacyHeadersStage {
    headers: Vec<(HeaderName, HeaderValue)>,
}

impl LegacyHeadersStage {
    pub fn new(headers: Vec<(HeaderName, HeaderValue)>) -> Self {
        Self { headers }
    }
}

impl Stage for LegacyHeadersStage {
    fn name(&self) -> &'static str {
        "legacy_headers"
    }

    fn on_request(&self, _req: &mut Request<Body>, _cx: &mut RequestContext) -> Flow {
        Flow::Continue
    }

    fn on_response(&self, res: &mut Response<Body>, _cx: &RequestContext) {
        add_missing(res.headers_mut(), &self.headers);
    }
}

fn add_missing(target: &mut HeaderMap, headers: &[(HeaderName, HeaderValue)]) {
    for (name, value) in headers {
        if !target.contains_key(name) {
            target.insert(name.clone(), value.clone());
        }
    }
}
