//! The router's own heartbeat endpoint.
//!
//! Answered as the first pipeline stage, before access logging, so load
//! balancer polling never reaches the logs or the dispatch rules.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header::CACHE_CONTROL, HeaderValue, Method, Request, Response, StatusCode};
use axum::response::IntoResponse;

use crate::health::state::HealthState;
use crate::http::pipeline::{Flow, RequestContext, Stage};

pub struct HeartbeatStage {
    path: String,
    state: Arc<HealthState>,
}

impl HeartbeatStage {
    pub fn new(path: impl Into<String>, state: Arc<HealthState>) -> Self {
        Self {
            path: path.into(),
            state,
        }
    }

    fn respond(&self) -> Response<Body> {
        let mut response = if self.state.is_healthy() {
            (StatusCode::OK, "ok").into_response()
        } else {
            (StatusCode::SERVICE_UNAVAILABLE, "bad").into_response()
        };
        response
            .headers_mut()
            .insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        response
    }
}

impl Stage for HeartbeatStage {
    fn name(&self) -> &'static str {
        "heartbeat"
    }

    fn on_request(&self, req: &mut Request<Body>, _cx: &mut RequestContext) -> Flow {
        let is_probe = matches!(*req.method(), Method::GET | Method::HEAD);
        if is_probe && req.uri().path() == self.path {
            Flow::Respond(self.respond())
        } else {
            Flow::Continue
        }
    }
}
