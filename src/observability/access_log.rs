//! Access logging stage.
//!
//! Heartbeat and shed requests are answered by earlier stages, so they never
//! reach this one and never appear in the access log.

use axum::body::Body;
use axum::http::{Request, Response};

use crate::http::pipeline::{Flow, RequestContext, Stage};

pub struct AccessLogStage;

impl Stage for AccessLogStage {
    fn name(&self) -> &'static str {
        "access_log"
    }

    fn on_request(&self, _req: &mut Request<Body>, _cx: &mut RequestContext) -> Flow {
        Flow::Continue
    }

    fn on_response(&self, res: &mut Response<Body>, cx: &RequestContext) {
        let upstream = cx.upstream.map(|role| role.as_str()).unwrap_or("-");
        tracing::info!(
            request_id = %cx.request_id,
            method = %cx.method,
            path = %cx.path,
            status = res.status().as_u16(),
            upstream,
            duration_ms = u64::try_from(cx.started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Request completed"
        );
    }
}
