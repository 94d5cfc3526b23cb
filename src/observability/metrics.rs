//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define router metrics (requests, latency, upstream outcomes, shedding)
//! - Expose a Prometheus-compatible scrape endpoint (optional)
//! - Provide the request and response metrics pipeline stages
//!
//! # Metrics
//! - `router_requests_total` (counter): requests received, by method
//! - `router_request_duration_seconds` (histogram): latency by method, status
//! - `router_upstream_responses_total` (counter): by upstream, status
//! - `router_forward_errors_total` (counter): by upstream, failure kind
//! - `router_overload_rejections_total` (counter): shed requests
//! - `router_dependency_healthy` (gauge): 1=healthy, 0=unhealthy
//! - `router_event_loop_lag_seconds` (gauge): dampened scheduler lag
//!
//! Recording is a no-op until [`init_metrics`] installs the exporter.

use std::net::SocketAddr;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::http::forward::ForwardOutcome;
use crate::http::pipeline::{Flow, RequestContext, Stage};
use crate::routing::Role;

/// Metric names.
pub mod names {
    pub const REQUESTS_TOTAL: &str = "router_requests_total";
    pub const REQUEST_DURATION_SECONDS: &str = "router_request_duration_seconds";
    pub const UPSTREAM_RESPONSES_TOTAL: &str = "router_upstream_responses_total";
    pub const FORWARD_ERRORS_TOTAL: &str = "router_forward_errors_total";
    pub const OVERLOAD_REJECTIONS_TOTAL: &str = "router_overload_rejections_total";
    pub const DEPENDENCY_HEALTHY: &str = "router_dependency_healthy";
    pub const EVENT_LOOP_LAG_SECONDS: &str = "router_event_loop_lag_seconds";
}

/// Install the Prometheus exporter listening on `addr`.
///
/// Must be called from within a tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    describe_counter!(names::REQUESTS_TOTAL, "Requests received by the router");
    describe_histogram!(
        names::REQUEST_DURATION_SECONDS,
        "Time from request receipt to response headers"
    );
    describe_counter!(
        names::UPSTREAM_RESPONSES_TOTAL,
        "Responses received from upstream services"
    );
    describe_counter!(
        names::FORWARD_ERRORS_TOTAL,
        "Forwards that failed before an upstream response arrived"
    );
    describe_counter!(
        names::OVERLOAD_REJECTIONS_TOTAL,
        "Requests rejected because the runtime was lagging"
    );
    describe_gauge!(
        names::DEPENDENCY_HEALTHY,
        "Dependency health (1 = healthy, 0 = unhealthy)"
    );
    describe_gauge!(names::EVENT_LOOP_LAG_SECONDS, "Dampened scheduler lag");

    tracing::info!(address = %addr, "Prometheus metrics endpoint started");
    Ok(())
}

pub fn record_request_received(method: &str) {
    counter!(names::REQUESTS_TOTAL, "method" => method.to_string()).increment(1);
}

pub fn record_request_completed(method: &str, status: u16, elapsed: Duration) {
    histogram!(
        names::REQUEST_DURATION_SECONDS,
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .record(elapsed.as_secs_f64());
}

pub fn record_upstream_response(upstream: Role, status: u16) {
    counter!(
        names::UPSTREAM_RESPONSES_TOTAL,
        "upstream" => upstream.as_str(),
        "status" => status.to_string()
    )
    .increment(1);
}

pub fn record_forward_error(upstream: Role, kind: &'static str) {
    counter!(
        names::FORWARD_ERRORS_TOTAL,
        "upstream" => upstream.as_str(),
        "kind" => kind
    )
    .increment(1);
}

pub fn record_overload_rejection() {
    counter!(names::OVERLOAD_REJECTIONS_TOTAL).increment(1);
}

pub fn record_dependency_health(dependency: Role, healthy: bool) {
    gauge!(names::DEPENDENCY_HEALTHY, "dependency" => dependency.as_str())
        .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_event_loop_lag(lag: Duration) {
    gauge!(names::EVENT_LOOP_LAG_SECONDS).set(lag.as_secs_f64());
}

/// Counts requests on the way in and times them on the way out.
pub struct RequestMetricsStage;

impl Stage for RequestMetricsStage {
    fn name(&self) -> &'static str {
        "request_metrics"
    }

    fn on_request(&self, _req: &mut Request<Body>, cx: &mut RequestContext) -> Flow {
        record_request_received(cx.method.as_str());
        Flow::Continue
    }

    fn on_response(&self, res: &mut Response<Body>, cx: &RequestContext) {
        record_request_completed(cx.method.as_str(), res.status().as_u16(), cx.started.elapsed());
    }
}

/// Records upstream response statuses for requests that reach the catch-all.
pub struct UpstreamMetricsStage;

impl Stage for UpstreamMetricsStage {
    fn name(&self) -> &'static str {
        "upstream_metrics"
    }

    fn on_request(&self, _req: &mut Request<Body>, _cx: &mut RequestContext) -> Flow {
        Flow::Continue
    }

    fn on_response(&self, _res: &mut Response<Body>, cx: &RequestContext) {
        if let (Some(role), Some(ForwardOutcome::Success { status, .. })) =
            (cx.upstream, cx.outcome.as_ref())
        {
            record_upstream_response(role, status.as_u16());
        }
    }
}
