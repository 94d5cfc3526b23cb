//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe each dependency's heartbeat
//! - Publish one snapshot per cycle into the shared state

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header::USER_AGENT, Request};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::time::{self, MissedTickBehavior};

use crate::config::HealthCheckConfig;
use crate::health::state::{HealthSnapshot, HealthState};
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::routing::origin::Upstream;

pub struct HealthMonitor {
    dependencies: Vec<Arc<Upstream>>,
    state: Arc<HealthState>,
    config: HealthCheckConfig,
    client: Client<HttpConnector, Body>,
}

impl HealthMonitor {
    /// State keys are the dependencies' role names.
    pub fn new(
        dependencies: Vec<Arc<Upstream>>,
        state: Arc<HealthState>,
        config: HealthCheckConfig,
    ) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(config.timeout));
        let client = Client::builder(TokioExecutor::new()).build(connector);

        Self {
            dependencies,
            state,
            config,
            client,
        }
    }

    /// Probe on every interval until the drain begins.
    pub async fn run(self, shutdown: Arc<Shutdown>) {
        tracing::info!(
            interval = ?self.config.interval,
            path = %self.config.path,
            dependencies = self.dependencies.len(),
            "Health monitor starting"
        );

        let mut ticker = time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.draining() => break,
            }
            // A stalled dependency must not hold the cycle past the drain.
            tokio::select! {
                _ = self.check_all() => {}
                _ = shutdown.draining() => break,
            }
        }
        tracing::info!("Health monitor received shutdown signal, exiting loop");
    }

    /// Run one probe cycle and publish the result.
    pub async fn check_all(&self) -> Arc<HealthSnapshot> {
        let mut results = Vec::with_capacity(self.dependencies.len());

        for dependency in &self.dependencies {
            let healthy = self.probe(dependency).await;
            metrics::record_dependency_health(dependency.role, healthy);
            results.push((dependency.role.as_str(), healthy));
        }

        let snapshot: HealthSnapshot = results.into_iter().collect();
        if !snapshot.all_healthy() {
            tracing::debug!(snapshot = ?snapshot, "Dependency check cycle found failures");
        }
        self.state.publish(snapshot);
        self.state.snapshot()
    }

    async fn probe(&self, dependency: &Upstream) -> bool {
        let uri = format!("{}{}", dependency.origin, self.config.path);

        let request = match Request::builder()
            .method("GET")
            .uri(uri)
            .header(USER_AGENT, "edge-router-health-check")
            .body(Body::empty())
        {
            Ok(req) => req,
            Err(e) => {
                tracing::error!(dependency = %dependency.role, "Failed to build health check request: {}", e);
                return false;
            }
        };

        match time::timeout(self.config.timeout, self.client.request(request)).await {
            Ok(Ok(response)) => {
                let success = response.status().is_success();
                if !success {
                    tracing::warn!(dependency = %dependency.role, status = %response.status(), "Health check failed: non-success status");
                }
                success
            }
            Ok(Err(e)) => {
                tracing::warn!(dependency = %dependency.role, error = %e, "Health check failed: connection error");
                false
            }
            Err(_) => {
                tracing::warn!(dependency = %dependency.role, "Health check failed: timeout");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::net::TcpListener;

    use crate::routing::origin::{Origin, Role};

    #[tokio::test]
    async fn drain_interrupts_a_stalled_cycle() {
        // Accepts connections and never answers.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let origin = Origin::resolve("TEST_URL", &format!("http://{addr}")).unwrap();
        let dependencies = vec![Upstream::new(Role::Identity, origin)];
        let state = Arc::new(HealthState::new(["identity"]));
        let config = HealthCheckConfig {
            path: "/__heartbeat__".to_string(),
            interval: Duration::from_millis(10),
            timeout: Duration::from_secs(30),
        };
        let monitor = HealthMonitor::new(dependencies, state.clone(), config);

        let shutdown = Arc::new(Shutdown::new());
        let task = tokio::spawn(monitor.run(shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.begin_drain();

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("monitor should stop once draining")
            .unwrap();
        assert_eq!(state.snapshot().get("identity"), Some(false));
    }
}
