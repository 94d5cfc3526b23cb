//! Ordered request pipeline.
//!
//! Stages run in declaration order on the way in. Each returns a [`Flow`]:
//! continue to the next stage, answer the client directly, or forward to an
//! upstream. If every stage continues, the request goes to the fallback
//! upstream. On the way out, every stage the request entered sees the final
//! response, in reverse order.

use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::http::{Method, Request, Response};
use uuid::Uuid;

use crate::http::forward::{content_length, ForwardOutcome, Forwarder};
use crate::net::connection::ConnectionTracker;
use crate::routing::origin::{Role, Upstream};

/// What a stage decided about a request.
#[derive(Debug)]
pub enum Flow {
    /// Hand the request to the next stage.
    Continue,
    /// Answer the client; no later stage or forward runs.
    Respond(Response<Body>),
    /// Forward to this upstream; no later stage runs.
    Forward(Arc<Upstream>),
}

/// Per-request state shared by all stages.
#[derive(Debug)]
pub struct RequestContext {
    pub request_id: Uuid,
    pub method: Method,
    pub path: String,
    pub started: Instant,
    /// Set once the request is handed to an upstream.
    pub upstream: Option<Role>,
    /// Set once the forward completes.
    pub outcome: Option<ForwardOutcome>,
}

impl RequestContext {
    pub fn new(req: &Request<Body>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            method: req.method().clone(),
            path: req.uri().path().to_string(),
            started: Instant::now(),
            upstream: None,
            outcome: None,
        }
    }
}

/// One step of the pipeline.
///
/// Request hooks must be cheap and must not perform I/O.
pub trait Stage: Send + Sync {
    /// Stage name for logging.
    fn name(&self) -> &'static str;

    fn on_request(&self, req: &mut Request<Body>, cx: &mut RequestContext) -> Flow;

    /// Observe or amend the final response.
    fn on_response(&self, _res: &mut Response<Body>, _cx: &RequestContext) {}
}

/// Terminal decision for a request.
#[derive(Debug)]
pub enum Decision {
    Respond(Response<Body>),
    Forward(Arc<Upstream>),
}

/// The assembled pipeline plus its catch-all upstream.
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
    fallback: Arc<Upstream>,
    forwarder: Forwarder,
    in_flight: ConnectionTracker,
}

impl Pipeline {
    pub fn new(
        stages: Vec<Box<dyn Stage>>,
        fallback: Arc<Upstream>,
        forwarder: Forwarder,
        in_flight: ConnectionTracker,
    ) -> Self {
        Self {
            stages,
            fallback,
            forwarder,
            in_flight,
        }
    }

    /// Stage names in execution order.
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run request hooks and decide where the request goes.
    ///
    /// Returns the decision and how many stages the request entered.
    pub fn decide(&self, req: &mut Request<Body>, cx: &mut RequestContext) -> (Decision, usize) {
        for (index, stage) in self.stages.iter().enumerate() {
            match stage.on_request(req, cx) {
                Flow::Continue => continue,
                Flow::Respond(response) => {
                    tracing::trace!(stage = stage.name(), "Stage answered request");
                    return (Decision::Respond(response), index + 1);
                }
                Flow::Forward(upstream) => {
                    tracing::trace!(stage = stage.name(), upstream = %upstream.role, "Stage claimed request");
                    return (Decision::Forward(upstream), index + 1);
                }
            }
        }
        (Decision::Forward(self.fallback.clone()), self.stages.len())
    }

    /// Handle one request end to end.
    pub async fn handle(&self, mut req: Request<Body>) -> Response<Body> {
        let mut cx = RequestContext::new(&req);
        let (decision, entered) = self.decide(&mut req, &mut cx);

        let mut response = match decision {
            Decision::Respond(response) => response,
            Decision::Forward(upstream) => self.forward(&upstream, req, &mut cx).await,
        };

        for stage in self.stages[..entered].iter().rev() {
            stage.on_response(&mut response, &cx);
        }
        response
    }

    async fn forward(
        &self,
        upstream: &Upstream,
        req: Request<Body>,
        cx: &mut RequestContext,
    ) -> Response<Body> {
        cx.upstream = Some(upstream.role);
        let guard = self.in_flight.track();

        match self.forwarder.forward(&upstream.origin, req).await {
            Ok(response) => {
                cx.outcome = Some(ForwardOutcome::Success {
                    status: response.status(),
                    content_length: content_length(&response),
                });
                response
            }
            Err(err) => {
                tracing::warn!(
                    request_id = %cx.request_id,
                    forward_id = %guard.id(),
                    method = %cx.method,
                    path = %cx.path,
                    upstream = %upstream.role,
                    origin = %upstream.origin,
                    error = %err,
                    "Forward failed"
                );
                crate::observability::metrics::record_forward_error(upstream.role, err.kind());
                let response = err.to_response();
                cx.outcome = Some(ForwardOutcome::Failure(err));
                response
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use axum::http::StatusCode;
    use tokio::net::TcpListener;

    use crate::routing::origin::Origin;

    fn upstream(role: Role, raw: &str) -> Arc<Upstream> {
        Upstream::new(role, Origin::resolve("TEST_URL", raw).unwrap())
    }

    /// Records hook calls into a shared log.
    struct Probe {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        flow: fn() -> Flow,
    }

    impl Stage for Probe {
        fn name(&self) -> &'static str {
            self.name
        }

        fn on_request(&self, _req: &mut Request<Body>, _cx: &mut RequestContext) -> Flow {
            self.log.lock().unwrap().push(format!("req:{}", self.name));
            (self.flow)()
        }

        fn on_response(&self, _res: &mut Response<Body>, _cx: &RequestContext) {
            self.log.lock().unwrap().push(format!("res:{}", self.name));
        }
    }

    fn pipeline(stages: Vec<Box<dyn Stage>>, fallback: Arc<Upstream>) -> Pipeline {
        Pipeline::new(
            stages,
            fallback,
            Forwarder::new(Duration::from_secs(1), Duration::from_secs(1)),
            ConnectionTracker::new(),
        )
    }

    fn probe(name: &'static str, log: &Arc<Mutex<Vec<String>>>, flow: fn() -> Flow) -> Box<dyn Stage> {
        Box::new(Probe {
            name,
            log: log.clone(),
            flow,
        })
    }

    #[tokio::test]
    async fn short_circuit_skips_later_stages_and_unwinds_entered_ones() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let p = pipeline(
            vec![
                probe("a", &log, || Flow::Continue),
                probe("b", &log, || Flow::Respond(Response::new(Body::from("stop")))),
                probe("c", &log, || Flow::Continue),
            ],
            upstream(Role::Static, "http://127.0.0.1:1"),
        );

        let req = Request::builder().uri("/x").body(Body::empty()).unwrap();
        let response = p.handle(req).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(*log.lock().unwrap(), ["req:a", "req:b", "res:b", "res:a"]);
    }

    #[test]
    fn falls_back_when_every_stage_continues() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let fallback = upstream(Role::Static, "http://static.internal");
        let p = pipeline(
            vec![probe("a", &log, || Flow::Continue), probe("b", &log, || Flow::Continue)],
            fallback.clone(),
        );

        let mut req = Request::builder().uri("/anything").body(Body::empty()).unwrap();
        let mut cx = RequestContext::new(&req);
        let (decision, entered) = p.decide(&mut req, &mut cx);

        assert_eq!(entered, 2);
        match decision {
            Decision::Forward(u) => assert_eq!(u, fallback),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn forward_failure_still_answers_and_runs_response_hooks() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let log = Arc::new(Mutex::new(Vec::new()));
        let p = pipeline(
            vec![probe("a", &log, || Flow::Continue)],
            upstream(Role::Static, &format!("http://{addr}")),
        );

        let req = Request::builder().uri("/").body(Body::empty()).unwrap();
        let response = p.handle(req).await;

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(*log.lock().unwrap(), ["req:a", "res:a"]);
    }
}
