//! Shared utilities for integration testing.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use breakwater::net::listener::Acceptor;
use breakwater::{Engine, EngineError, HostCallbacks, ServerConfig};
use tokio::task::JoinHandle;

/// An engine serving on an ephemeral port for the duration of a test.
pub struct TestServer {
    pub addr: SocketAddr,
    pub engine: Arc<Engine>,
    task: JoinHandle<Result<(), EngineError>>,
}

/// Start an engine with the given callbacks on an ephemeral port.
pub async fn start_engine(callbacks: HostCallbacks) -> TestServer {
    let engine = Arc::new(Engine::new(ServerConfig::default(), callbacks));
    let acceptor = Acceptor::bind(0).expect("bind ephemeral port");
    let addr = acceptor.local_addr().expect("local addr");
    let task = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.serve_on(acceptor).await })
    };
    TestServer { addr, engine, task }
}

impl TestServer {
    /// Shut the engine down and wait for the accept loop to exit.
    pub async fn stop(self) {
        self.engine.trigger_shutdown();
        let _ = self.task.await;
    }
}

/// Poll `condition` until it holds or the deadline passes.
#[allow(dead_code)]
pub async fn wait_until(condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within deadline"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
