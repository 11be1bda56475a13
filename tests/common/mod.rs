//! Shared utilities for integration testing.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use feedvote_gate::config::GateConfig;
use feedvote_gate::http::{GateState, HttpServer};
use feedvote_gate::lifecycle::Shutdown;
use feedvote_gate::security::Clock;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A gate serving on an ephemeral local port.
pub struct TestGate {
    pub addr: SocketAddr,
    pub state: GateState,
    pub shutdown: Shutdown,
    pub config_tx: mpsc::UnboundedSender<GateConfig>,
    pub handle: JoinHandle<Result<(), std::io::Error>>,
}

impl TestGate {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Trigger shutdown and wait for the server to finish draining.
    pub async fn stop(self) {
        self.shutdown.trigger();
        let _ = tokio::time::timeout(Duration::from_secs(5), self.handle).await;
    }
}

/// Start a gate with `config` and `clock`.
pub async fn start_gate(mut config: GateConfig, clock: Arc<dyn Clock>) -> TestGate {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    config.listener.bind_address = addr.to_string();

    let shutdown = Shutdown::new();
    let (config_tx, config_updates) = mpsc::unbounded_channel();
    let server = HttpServer::with_clock(config, clock);
    let state = server.state().clone();
    let handle = tokio::spawn(server.run(listener, config_updates, shutdown.subscribe()));

    TestGate {
        addr,
        state,
        shutdown,
        config_tx,
        handle,
    }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}

/// Token values from every `Set-Cookie: feedvote-csrf-token=...` on a response.
pub fn csrf_cookies(response: &reqwest::Response) -> Vec<String> {
    response
        .headers()
        .get_all(reqwest::header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.strip_prefix("feedvote-csrf-token="))
        .filter_map(|rest| rest.split(';').next())
        .map(str::to_string)
        .collect()
}
