//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{HeaderMap, HeaderValue, Method, Uri},
    response::{IntoResponse, Response},
    Router,
};
use edge_router::config::RouterConfig;
use edge_router::http::HttpServer;
use edge_router::lifecycle::Shutdown;
use edge_router::net::connection::ConnectionTracker;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// A mock backend that echoes what it received.
///
/// Responses carry `x-backend` (its name), `x-seen-method`, `x-seen-uri`,
/// `x-seen-host` and `x-seen-test`, and the request body verbatim.
pub struct Backend {
    pub addr: SocketAddr,
    hits: Arc<AtomicUsize>,
}

impl Backend {
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Requests received so far, heartbeat probes excluded.
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
struct EchoState {
    name: &'static str,
    delay: Duration,
    hits: Arc<AtomicUsize>,
}

async fn echo(
    State(state): State<EchoState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if uri.path() != "/__heartbeat__" {
        state.hits.fetch_add(1, Ordering::SeqCst);
    }
    if !state.delay.is_zero() {
        tokio::time::sleep(state.delay).await;
    }

    let mut response = Body::from(body).into_response();
    let out = response.headers_mut();
    out.insert("x-backend", HeaderValue::from_static(state.name));
    out.insert("x-seen-method", HeaderValue::from_str(method.as_str()).unwrap());
    out.insert("x-seen-uri", HeaderValue::from_str(&uri.to_string()).unwrap());
    if let Some(host) = headers.get("host") {
        out.insert("x-seen-host", host.clone());
    }
    if let Some(test) = headers.get("x-test") {
        out.insert("x-seen-test", test.clone());
    }
    response
}

/// Start an echo backend on an ephemeral port.
pub async fn spawn_backend(name: &'static str) -> Backend {
    spawn_slow_backend(name, Duration::ZERO).await
}

/// Start an echo backend that waits `delay` before answering.
pub async fn spawn_slow_backend(name: &'static str, delay: Duration) -> Backend {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));

    let app = Router::new().fallback(echo).with_state(EchoState {
        name,
        delay,
        hits: hits.clone(),
    });
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Backend { addr, hits }
}

/// An address nothing listens on.
pub async fn dead_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// The three required backends.
pub struct Backends {
    pub identity: Backend,
    pub writer: Backend,
    pub static_assets: Backend,
}

pub async fn spawn_backends() -> Backends {
    Backends {
        identity: spawn_backend("identity").await,
        writer: spawn_backend("writer").await,
        static_assets: spawn_backend("static").await,
    }
}

/// Config pointing at `backends`, with shedding disabled unless overridden.
pub fn config(backends: &Backends, extra: &[(&str, &str)]) -> Arc<RouterConfig> {
    let mut vars: HashMap<String, String> = HashMap::new();
    vars.insert("IDENTITY_URL".into(), backends.identity.url());
    vars.insert("WRITER_URL".into(), backends.writer.url());
    vars.insert("STATIC_URL".into(), backends.static_assets.url());
    vars.insert("MAX_LAG_MS".into(), "0".into());
    for (k, v) in extra {
        vars.insert(k.to_string(), v.to_string());
    }
    Arc::new(RouterConfig::from_map(&vars).unwrap())
}

/// A router serving on an ephemeral port in the background.
pub struct RunningRouter {
    pub addr: SocketAddr,
    pub shutdown: Arc<Shutdown>,
    pub in_flight: ConnectionTracker,
    pub task: JoinHandle<io::Result<()>>,
}

impl RunningRouter {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

pub async fn start_router(config: Arc<RouterConfig>) -> RunningRouter {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Arc::new(Shutdown::new());

    let server = HttpServer::new(config, shutdown.clone());
    let in_flight = server.in_flight().clone();
    let task = tokio::spawn(server.run(listener));

    RunningRouter {
        addr,
        shutdown,
        in_flight,
        task,
    }
}

/// Poll `condition` every 10ms for up to two seconds.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
