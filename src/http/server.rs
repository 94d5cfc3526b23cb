//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Resolve upstreams and assemble the ordered pipeline
//! - Create the Axum router with a single catch-all handler
//! - Run background tasks (dependency health, lag sampler)
//! - Serve until the drain begins, then wait for in-flight work (bounded)

use std::io;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header::CONNECTION, HeaderValue, Request, StatusCode},
    response::{IntoResponse, Response},
    Router,
};
use tokio::net::TcpListener;
use tokio::time;

use crate::config::RouterConfig;
use crate::health::{HealthMonitor, HealthState, HeartbeatStage};
use crate::http::forward::Forwarder;
use crate::http::pipeline::{Pipeline, Stage};
use crate::lifecycle::Shutdown;
use crate::net::connection::ConnectionTracker;
use crate::observability::{AccessLogStage, RequestMetricsStage, UpstreamMetricsStage};
use crate::routing::api::api_stage;
use crate::routing::origin::{Role, Upstream};
use crate::routing::rule::{fake_verification_stage, verifier_stage};
use crate::security::{BodyLimitStage, LagMonitor, LegacyHeadersStage, ShedStage, TransportSecurityStage};

/// Application state injected into the handler.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub shutdown: Arc<Shutdown>,
}

/// HTTP server for the edge router.
pub struct HttpServer {
    router: Router,
    config: Arc<RouterConfig>,
    shutdown: Arc<Shutdown>,
    pipeline: Arc<Pipeline>,
    health: Arc<HealthState>,
    dependencies: Vec<Arc<Upstream>>,
    lag: Arc<LagMonitor>,
    in_flight: ConnectionTracker,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: Arc<RouterConfig>, shutdown: Arc<Shutdown>) -> Self {
        let backends = &config.backends;
        let identity = Upstream::new(Role::Identity, backends.identity.clone());
        let writer = Upstream::new(Role::Writer, backends.writer.clone());
        let static_assets = Upstream::new(Role::Static, backends.static_assets.clone());
        let verifier = backends
            .verifier
            .clone()
            .map(|origin| Upstream::new(Role::Verifier, origin));

        let dependencies = vec![identity.clone(), static_assets.clone()];
        let health = Arc::new(HealthState::new(
            dependencies.iter().map(|d| d.role.as_str()),
        ));
        let lag = Arc::new(LagMonitor::new(config.overload.max_lag));
        let in_flight = ConnectionTracker::new();

        let mut stages: Vec<Box<dyn Stage>> = vec![
            Box::new(HeartbeatStage::new(config.health_check.path.clone(), health.clone())),
            Box::new(ShedStage::new(lag.clone())),
            Box::new(AccessLogStage),
            Box::new(BodyLimitStage::new(config.security.max_body_bytes)),
            Box::new(RequestMetricsStage),
            Box::new(TransportSecurityStage::new(&config.security)),
            Box::new(LegacyHeadersStage::new(config.security.legacy_headers.clone())),
        ];
        if let Some(verifier) = verifier {
            stages.push(Box::new(verifier_stage(verifier, &config.public)));
        }
        if config.fake_verification {
            tracing::warn!("Fake verification passthrough enabled; never use this in production");
            stages.push(Box::new(fake_verification_stage(identity.clone())));
        }
        stages.push(Box::new(api_stage(identity, writer)));
        stages.push(Box::new(UpstreamMetricsStage));

        let forwarder = Forwarder::new(config.timeouts.connect, config.timeouts.upstream);
        let pipeline = Arc::new(Pipeline::new(stages, static_assets, forwarder, in_flight.clone()));

        let state = AppState {
            pipeline: pipeline.clone(),
            shutdown: shutdown.clone(),
        };
        let router = Router::new().fallback(dispatch).with_state(state);

        Self {
            router,
            config,
            shutdown,
            pipeline,
            health,
            dependencies,
            lag,
            in_flight,
        }
    }

    /// The Axum router, for driving requests without a socket.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn health(&self) -> &Arc<HealthState> {
        &self.health
    }

    /// A monitor over this server's dependencies, publishing into its state.
    pub fn health_monitor(&self) -> HealthMonitor {
        HealthMonitor::new(
            self.dependencies.clone(),
            self.health.clone(),
            self.config.health_check.clone(),
        )
    }

    pub fn lag_monitor(&self) -> &Arc<LagMonitor> {
        &self.lag
    }

    /// Forwards currently waiting on an upstream.
    pub fn in_flight(&self) -> &ConnectionTracker {
        &self.in_flight
    }

    /// Serve on `listener` until the drain begins and completes.
    pub async fn run(self, listener: TcpListener) -> Result<(), io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            stages = ?self.pipeline.stage_names(),
            "HTTP server starting"
        );

        tokio::spawn(self.health_monitor().run(self.shutdown.clone()));

        if self.config.overload.enabled() {
            tokio::spawn(
                self.lag
                    .clone()
                    .run(self.config.overload.sample_interval, self.shutdown.clone()),
            );
        }

        let HttpServer {
            router,
            config,
            shutdown,
            in_flight,
            ..
        } = self;

        let signal = shutdown.clone();
        let mut server = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move { signal.draining().await })
                .await
        });

        tokio::select! {
            result = &mut server => {
                // Only reachable if serving failed before any drain.
                shutdown.finish();
                return match result {
                    Ok(served) => served,
                    Err(e) => Err(io::Error::other(e)),
                };
            }
            _ = shutdown.draining() => {}
        }

        tracing::info!(
            in_flight = in_flight.active_count(),
            timeout = ?config.timeouts.drain,
            "Waiting for in-flight requests"
        );

        let drained = time::timeout(config.timeouts.drain, async {
            in_flight.wait_idle().await;
            tracing::debug!("In-flight forwards finished");
            (&mut server).await
        })
        .await;

        let result = match drained {
            Ok(Ok(served)) => served,
            Ok(Err(e)) => Err(io::Error::other(e)),
            Err(_) => {
                tracing::warn!(
                    in_flight = in_flight.active_count(),
                    "Drain timed out, aborting remaining connections"
                );
                server.abort();
                Ok(())
            }
        };

        shutdown.finish();
        tracing::info!("HTTP server stopped");
        result
    }
}

/// Catch-all handler: runs the pipeline unless the router is draining.
async fn dispatch(State(state): State<AppState>, request: Request<Body>) -> Response {
    if !state.shutdown.is_running() {
        let mut response =
            (StatusCode::SERVICE_UNAVAILABLE, "server is shutting down").into_response();
        response
            .headers_mut()
            .insert(CONNECTION, HeaderValue::from_static("close"));
        return response;
    }
    state.pipeline.handle(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tower::ServiceExt;

    fn config(extra: &[(&str, &str)]) -> Arc<RouterConfig> {
        let mut vars: HashMap<String, String> = [
            ("IDENTITY_URL", "http://127.0.0.1:1"),
            ("WRITER_URL", "http://127.0.0.1:1"),
            ("STATIC_URL", "http://127.0.0.1:1"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        for (k, v) in extra {
            vars.insert(k.to_string(), v.to_string());
        }
        Arc::new(RouterConfig::from_map(&vars).unwrap())
    }

    #[test]
    fn stages_follow_the_documented_order() {
        let server = HttpServer::new(
            config(&[
                ("VERIFIER_URL", "http://127.0.0.1:2"),
                ("FAKE_VERIFICATION", "true"),
            ]),
            Arc::new(Shutdown::new()),
        );
        assert_eq!(
            server.pipeline().stage_names(),
            [
                "heartbeat",
                "overload",
                "access_log",
                "body_limit",
                "request_metrics",
                "transport_security",
                "legacy_headers",
                "verifier",
                "fake_verification",
                "api",
                "upstream_metrics",
            ]
        );
    }

    #[test]
    fn optional_stages_are_not_installed_by_default() {
        let server = HttpServer::new(config(&[]), Arc::new(Shutdown::new()));
        let names = server.pipeline().stage_names();
        assert!(!names.contains(&"verifier"));
        assert!(!names.contains(&"fake_verification"));
    }

    #[tokio::test]
    async fn draining_rejects_before_any_stage() {
        let shutdown = Arc::new(Shutdown::new());
        let server = HttpServer::new(config(&[]), shutdown.clone());
        shutdown.begin_drain();

        let response = server
            .router()
            .oneshot(Request::builder().uri("/__heartbeat__").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers()["connection"], "close");
    }
}
