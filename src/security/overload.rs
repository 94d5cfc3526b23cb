//! Overload shedding based on scheduler lag.
//!
//! A sampler task sleeps for a fixed interval and measures how late it woke
//! up. When the runtime is saturated that lateness grows, and the shed stage
//! starts turning requests away before they cost anything.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{header::RETRY_AFTER, HeaderValue, Request, StatusCode};
use axum::response::IntoResponse;

use crate::http::pipeline::{Flow, RequestContext, Stage};
use crate::lifecycle::Shutdown;
use crate::observability::metrics;

/// Weight of the previous value when dampening new samples.
const SMOOTHING_FACTOR: u64 = 3;

/// Tracks dampened scheduler lag.
#[derive(Debug)]
pub struct LagMonitor {
    lag_micros: AtomicU64,
    max_lag: Duration,
}

impl LagMonitor {
    /// A zero `max_lag` never sheds.
    pub fn new(max_lag: Duration) -> Self {
        Self {
            lag_micros: AtomicU64::new(0),
            max_lag,
        }
    }

    pub fn current_lag(&self) -> Duration {
        Duration::from_micros(self.lag_micros.load(Ordering::Relaxed))
    }

    /// Fold in one lag sample.
    pub fn observe(&self, sample: Duration) {
        let sample = u64::try_from(sample.as_micros()).unwrap_or(u64::MAX);
        let previous = self.lag_micros.load(Ordering::Relaxed);
        let dampened = sample
            .saturating_add(previous.saturating_mul(SMOOTHING_FACTOR - 1))
            / SMOOTHING_FACTOR;
        self.lag_micros.store(dampened, Ordering::Relaxed);
        metrics::record_event_loop_lag(Duration::from_micros(dampened));
    }

    pub fn is_overloaded(&self) -> bool {
        !self.max_lag.is_zero() && self.current_lag() > self.max_lag
    }

    /// Sample lag every `interval` until the drain begins.
    pub async fn run(self: Arc<Self>, interval: Duration, shutdown: Arc<Shutdown>) {
        tracing::debug!(interval = ?interval, max_lag = ?self.max_lag, "Lag sampler starting");
        loop {
            let started = Instant::now();
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    self.observe(started.elapsed().saturating_sub(interval));
                }
                _ = shutdown.draining() => {
                    tracing::debug!("Lag sampler stopped");
                    break;
                }
            }
        }
    }
}

/// Rejects requests while the runtime is lagging.
pub struct ShedStage {
    monitor: Arc<LagMonitor>,
}

impl ShedStage {
    pub fn new(monitor: Arc<LagMonitor>) -> Self {
        Self { monitor }
    }
}

impl Stage for ShedStage {
    fn name(&self) -> &'static str {
        "overload"
    }

    fn on_request(&self, _req: &mut Request<Body>, cx: &mut RequestContext) -> Flow {
        if !self.monitor.is_overloaded() {
            return Flow::Continue;
        }

        tracing::debug!(
            path = %cx.path,
            lag = ?self.monitor.current_lag(),
            "Shedding request"
        );
        metrics::record_overload_rejection();

        let mut response = (StatusCode::SERVICE_UNAVAILABLE, "server is too busy").into_response();
        response
            .headers_mut()
            .insert(RETRY_AFTER, HeaderValue::from_static("1"));
        Flow::Respond(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dampens_samples() {
        let monitor = LagMonitor::new(Duration::from_millis(70));
        monitor.observe(Duration::from_millis(300));
        assert_eq!(monitor.current_lag(), Duration::from_millis(100));
        monitor.observe(Duration::ZERO);
        assert!(monitor.current_lag() < Duration::from_millis(70));
    }

    #[test]
    fn threshold_and_disable() {
        let monitor = LagMonitor::new(Duration::from_millis(70));
        assert!(!monitor.is_overloaded());
        monitor.observe(Duration::from_millis(300));
        assert!(monitor.is_overloaded());

        let disabled = LagMonitor::new(Duration::ZERO);
        disabled.observe(Duration::from_secs(10));
        assert!(!disabled.is_overloaded());
    }

    #[test]
    fn stage_rejects_only_when_overloaded() {
        let monitor = Arc::new(LagMonitor::new(Duration::from_millis(70)));
        let stage = ShedStage::new(monitor.clone());

        let mut req = Request::builder().uri("/").body(Body::empty()).unwrap();
        let mut cx = RequestContext::new(&req);
        assert!(matches!(stage.on_request(&mut req, &mut cx), Flow::Continue));

        monitor.observe(Duration::from_secs(1));
        match stage.on_request(&mut req, &mut cx) {
            Flow::Respond(r) => {
                assert_eq!(r.status(), StatusCode::SERVICE_UNAVAILABLE);
                assert_eq!(r.headers()["retry-after"], "1");
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn sampler_stops_on_drain() {
        let monitor = Arc::new(LagMonitor::new(Duration::from_millis(70)));
        let shutdown = Arc::new(Shutdown::new());
        let task = tokio::spawn(monitor.clone().run(Duration::from_millis(10), shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.begin_drain();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("sampler should stop")
            .unwrap();
    }
}
