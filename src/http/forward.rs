//! Request forwarding to a single upstream origin.
//!
//! # Responsibilities
//! - Rebuild the request URI against the target origin
//! - Rewrite `Host`; leave every other header and the body untouched
//! - Stream the upstream response straight back
//! - Classify failures so the caller can answer the client
//!
//! # Design Decisions
//! - Bodies are never buffered; `axum::body::Body` flows through hyper-util
//! - The upstream timeout covers the wait for response headers only
//! - A forward is attempted once; there is no retry to a second origin

use std::error::Error as StdError;
use std::time::Duration;

use axum::{
    body::Body,
    http::{
        header::{CONNECTION, HOST},
        uri::PathAndQuery,
        HeaderValue, Request, Response, StatusCode, Uri, Version,
    },
    response::IntoResponse,
};
use http_body_util::LengthLimitError;
use hyper::body::Body as HttpBody;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use thiserror::Error;

use crate::routing::origin::Origin;

/// Why a forward failed.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("upstream unreachable: {0}")]
    Unreachable(#[source] hyper_util::client::legacy::Error),

    #[error("upstream did not respond within {0:?}")]
    Timeout(Duration),

    #[error("upstream exchange failed: {0}")]
    Upstream(#[source] hyper_util::client::legacy::Error),

    #[error("request body exceeded the configured limit")]
    BodyTooLarge,

    #[error("could not build upstream request: {0}")]
    Rewrite(String),
}

impl ForwardError {
    pub fn status(&self) -> StatusCode {
        match self {
            ForwardError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ForwardError::BodyTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ForwardError::Unreachable(_) | ForwardError::Upstream(_) | ForwardError::Rewrite(_) => {
                StatusCode::BAD_GATEWAY
            }
        }
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ForwardError::Unreachable(_) => "unreachable",
            ForwardError::Timeout(_) => "timeout",
            ForwardError::Upstream(_) => "upstream",
            ForwardError::BodyTooLarge => "body_too_large",
            ForwardError::Rewrite(_) => "rewrite",
        }
    }

    /// The response sent to the client in place of the upstream's.
    pub fn to_response(&self) -> Response<Body> {
        let mut response = match self {
            ForwardError::BodyTooLarge => {
                (self.status(), "Request body too large").into_response()
            }
            ForwardError::Timeout(_) => (self.status(), "Upstream timed out").into_response(),
            _ => (self.status(), "Upstream request failed").into_response(),
        };
        if matches!(self, ForwardError::BodyTooLarge) {
            // The rest of the body was never read; don't reuse the connection.
            response
                .headers_mut()
                .insert(CONNECTION, HeaderValue::from_static("close"));
        }
        response
    }
}

impl IntoResponse for ForwardError {
    fn into_response(self) -> axum::response::Response {
        self.to_response()
    }
}

/// Result of one forward attempt, kept for the response-side stages.
#[derive(Debug)]
pub enum ForwardOutcome {
    Success {
        status: StatusCode,
        /// Body length when the upstream declared it.
        content_length: Option<u64>,
    },
    Failure(ForwardError),
}

impl ForwardOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ForwardOutcome::Success { .. })
    }
}

/// Proxies requests to origins over a shared connection pool.
#[derive(Clone)]
pub struct Forwarder {
    client: Client<HttpConnector, Body>,
    timeout: Duration,
}

impl Forwarder {
    pub fn new(connect_timeout: Duration, upstream_timeout: Duration) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(connect_timeout));
        connector.set_nodelay(true);

        let client = Client::builder(TokioExecutor::new()).build(connector);

        Self {
            client,
            timeout: upstream_timeout,
        }
    }

    /// Forward `request` to `origin` and return the upstream response.
    ///
    /// Dropping the returned future aborts the upstream exchange.
    pub async fn forward(
        &self,
        origin: &Origin,
        request: Request<Body>,
    ) -> Result<Response<Body>, ForwardError> {
        let request = rewrite(origin, request)?;

        let response = match tokio::time::timeout(self.timeout, self.client.request(request)).await
        {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(classify(e)),
            Err(_) => return Err(ForwardError::Timeout(self.timeout)),
        };

        Ok(response.map(Body::new))
    }
}

/// Point `request` at `origin`, keeping method, path, query, headers and body.
pub(crate) fn rewrite(origin: &Origin, request: Request<Body>) -> Result<Request<Body>, ForwardError> {
    let (mut parts, body) = request.into_parts();

    let path_and_query = parts
        .uri
        .path_and_query()
        .cloned()
        .unwrap_or_else(|| PathAndQuery::from_static("/"));

    parts.uri = Uri::builder()
        .scheme(origin.scheme().clone())
        .authority(origin.authority().clone())
        .path_and_query(path_and_query)
        .build()
        .map_err(|e| ForwardError::Rewrite(e.to_string()))?;

    // The pooled connector speaks HTTP/1.1 regardless of the inbound protocol.
    parts.version = Version::HTTP_11;

    let host = HeaderValue::from_str(origin.authority().as_str())
        .map_err(|e| ForwardError::Rewrite(e.to_string()))?;
    parts.headers.insert(HOST, host);

    Ok(Request::from_parts(parts, body))
}

/// Declared length of a response body, if known up front.
pub(crate) fn content_length(response: &Response<Body>) -> Option<u64> {
    HttpBody::size_hint(response.body()).exact()
}

fn classify(err: hyper_util::client::legacy::Error) -> ForwardError {
    if exceeded_body_limit(&err) {
        ForwardError::BodyTooLarge
    } else if err.is_connect() {
        ForwardError::Unreachable(err)
    } else {
        ForwardError::Upstream(err)
    }
}

fn exceeded_body_limit(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if e.is::<LengthLimitError>() {
            return true;
        }
        current = e.source();
    }
    false
}
