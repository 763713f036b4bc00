//! Server runtime subsystem.
//!
//! # Data Flow
//! ```text
//! run_server(config, callbacks)
//!     → build multi-thread runtime (config.workers)
//!     → Acceptor::bind → accept loop (serve)
//!     → per connection: detect → [TLS handshake] → HTTP session task
//!     → shutdown event → stop accepting → drop runtime (tears down tasks)
//!     → host shutdown callback → rendezvous released
//! ```
//!
//! # Design Decisions
//! - [`Engine`] is an ordinary value; embedders construct as many as they
//!   like and drive them on their own runtime. The blocking
//!   [`run_server`]/[`shutdown_server`] surface manages one active engine
//!   behind a process-wide slot for hosts that want the one-call form
//! - A second `run_server` while one is active is startup-fatal, not queued
//! - Accept errors are logged and the loop continues; only bind and TLS
//!   context construction are fatal
//! - The host shutdown callback runs exactly once, after the runtime is
//!   gone, on every exit path including startup failures

use std::sync::{Arc, Mutex, MutexGuard};

use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_rustls::TlsAcceptor;

use crate::bridge::{BridgeError, Registry, SessionHandle, SessionKind};
use crate::host::HostCallbacks;
use crate::http;
use crate::lifecycle::shutdown::{Rendezvous, Shutdown};
use crate::lifecycle::signals;
use crate::net::listener::{Acceptor, AcceptorError};
use crate::net::rewind::Rewind;
use crate::net::{self, detect, tls};

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// TCP port to listen on; `0` asks the platform for an ephemeral port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Whether TLS connections are served on this port.
    ///
    /// Plaintext is always accepted; this flag controls whether a detected
    /// TLS handshake proceeds or the connection is dropped.
    #[serde(default)]
    pub use_tls: bool,
    /// Runtime worker threads; `0` means one.
    ///
    /// The pool is sized to this value. The thread that called
    /// [`run_server`] stays blocked for the server's lifetime and is not
    /// part of the pool.
    #[serde(default)]
    pub workers: usize,
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            use_tls: false,
            workers: 0,
        }
    }
}

/// Startup and runtime errors for the engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A server is already running through the process-wide surface.
    #[error("a server is already running in this process")]
    AlreadyRunning,
    /// Listener construction failed.
    #[error(transparent)]
    Bind(#[from] AcceptorError),
    /// TLS context construction failed.
    #[error(transparent)]
    Tls(#[from] tls::TlsError),
    /// The async runtime could not be built.
    #[error("failed to build runtime: {0}")]
    Runtime(std::io::Error),
}

/// State shared between the engine, its sessions and the host surface.
struct EngineShared {
    registry: Arc<Registry>,
    callbacks: Arc<HostCallbacks>,
    shutdown: Shutdown,
    rendezvous: Rendezvous,
}

/// An embeddable server engine instance.
pub struct Engine {
    config: ServerConfig,
    shared: Arc<EngineShared>,
}

impl Engine {
    /// Build an engine from its configuration and host callback table.
    pub fn new(config: ServerConfig, callbacks: HostCallbacks) -> Self {
        Self {
            config,
            shared: Arc::new(EngineShared {
                registry: Arc::new(Registry::new()),
                callbacks: Arc::new(callbacks),
                shutdown: Shutdown::new(),
                rendezvous: Rendezvous::new(),
            }),
        }
    }

    /// The session registry backing this engine's handles.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.shared.registry
    }

    /// Bind the configured port and serve until shutdown triggers.
    pub async fn serve(&self) -> Result<(), EngineError> {
        let acceptor = Acceptor::bind(self.config.port)?;
        self.serve_on(acceptor).await
    }

    /// Serve connections from an already bound acceptor until shutdown.
    pub async fn serve_on(&self, acceptor: Acceptor) -> Result<(), EngineError> {
        let tls_acceptor = if self.config.use_tls {
            let material = self
                .shared
                .callbacks
                .tls
                .as_ref()
                .ok_or(tls::TlsError::MissingMaterial)?;
            Some(TlsAcceptor::from(tls::build_server_config(material)?))
        } else {
            None
        };

        let mut shutdown_rx = self.shared.shutdown.subscribe();
        loop {
            tokio::select! {
                _ = shutdown_rx.wait_for(|&triggered| triggered) => {
                    tracing::info!("Shutdown requested; listener closing");
                    break;
                }
                accepted = acceptor.accept() => match accepted {
                    Ok((stream, _peer)) => {
                        let shared = Arc::clone(&self.shared);
                        let tls_acceptor = tls_acceptor.clone();
                        tokio::spawn(handle_connection(stream, tls_acceptor, shared));
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Accept failed; listener continues");
                    }
                },
            }
        }
        Ok(())
    }

    /// Request shutdown of the accept loop.
    pub fn trigger_shutdown(&self) {
        self.shared.shutdown.trigger();
    }

    /// Send a text frame through a WebSocket session handle.
    pub fn ws_send(&self, handle: SessionHandle, text: impl Into<String>) -> Result<(), BridgeError> {
        self.shared.registry.send_text(handle, text.into())
    }
}

/// Classify one accepted connection and run its session to completion.
async fn handle_connection(
    mut stream: TcpStream,
    tls_acceptor: Option<TlsAcceptor>,
    shared: Arc<EngineShared>,
) {
    let (is_tls, buffered) = match detect::detect(&mut stream).await {
        Ok(verdict) => verdict,
        Err(e) => {
            net::log_connection_error("detect", &e);
            return;
        }
    };

    let registry = Arc::clone(&shared.registry);
    let callbacks = Arc::clone(&shared.callbacks);
    match (is_tls, tls_acceptor) {
        (false, _) => {
            http::session::run(stream, buffered, SessionKind::PlainHttp, registry, callbacks).await;
        }
        (true, Some(acceptor)) => {
            // The handshake consumes the detector's buffered bytes first.
            let rewound = Rewind::new(buffered, stream);
            match tls::handshake(&acceptor, rewound).await {
                Ok(tls_stream) => {
                    http::session::run(
                        tls_stream,
                        BytesMut::new(),
                        SessionKind::TlsHttp,
                        registry,
                        callbacks,
                    )
                    .await;
                }
                Err(e) => net::log_connection_error("tls.handshake", &e),
            }
        }
        (true, None) => {
            tracing::warn!("TLS handshake on a plaintext-only listener; connection dropped");
        }
    }
}

/// The single engine slot behind the process-wide blocking surface.
static ACTIVE: Mutex<Option<Arc<EngineShared>>> = Mutex::new(None);

fn active_slot() -> MutexGuard<'static, Option<Arc<EngineShared>>> {
    match ACTIVE.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Run a server on the calling thread until shutdown.
///
/// Builds a multi-thread runtime with `config.workers` threads, installs
/// SIGINT/SIGTERM handlers, serves, and blocks until the engine exits.
/// The host's shutdown notification fires after teardown on every exit
/// path, then any [`shutdown_server_and_wait`] callers are released.
pub fn run_server(config: ServerConfig, callbacks: HostCallbacks) -> Result<(), EngineError> {
    let engine = Engine::new(config, callbacks);
    {
        let mut active = active_slot();
        if active.is_some() {
            return Err(EngineError::AlreadyRunning);
        }
        *active = Some(Arc::clone(&engine.shared));
    }

    let result = run_blocking(&engine);

    if let Some(handler) = engine.shared.callbacks.take_shutdown() {
        handler();
    }
    *active_slot() = None;
    engine.shared.rendezvous.complete();
    result
}

fn run_blocking(engine: &Engine) -> Result<(), EngineError> {
    let workers = engine.config.workers.max(1);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(workers)
        .enable_all()
        .build()
        .map_err(EngineError::Runtime)?;

    let result = runtime.block_on(async {
        signals::install(engine.shared.shutdown.clone());
        engine.serve().await
    });
    // Dropping the runtime tears down every in-flight session task.
    drop(runtime);
    result
}

/// Request shutdown of the active server, if any, without blocking.
pub fn shutdown_server() {
    if let Some(shared) = active_slot().as_ref().map(Arc::clone) {
        shared.shutdown.trigger();
    }
}

/// Request shutdown and block until the active server has fully torn down.
///
/// Intended for console-close style handlers that must not return before
/// the engine is gone. Returns immediately when no server is active.
pub fn shutdown_server_and_wait() {
    let shared = match active_slot().as_ref().map(Arc::clone) {
        Some(shared) => shared,
        None => return,
    };
    shared.shutdown.trigger();
    shared.rendezvous.wait();
}

/// Send a text frame through a WebSocket handle on the active server.
pub fn ws_send(handle: SessionHandle, text: impl Into<String>) -> Result<(), BridgeError> {
    match active_slot().as_ref().map(Arc::clone) {
        Some(shared) => shared.registry.send_text(handle, text.into()),
        None => Err(BridgeError::Stale(handle)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn serves_plaintext_http_over_tcp() {
        let callbacks = HostCallbacks::new().on_request(|_, _, _, responder| {
            responder.send(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok".to_vec());
        });
        let engine = Arc::new(Engine::new(ServerConfig::default(), callbacks));
        let acceptor = Acceptor::bind(0).expect("bind");
        let addr = acceptor.local_addr().expect("local addr");

        let serving = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.serve_on(acceptor).await })
        };

        let mut client = TcpStream::connect(addr).await.expect("connect");
        client
            .write_all(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        assert!(reply.starts_with(b"HTTP/1.1 200 OK"));
        assert!(reply.ends_with(b"ok"));

        engine.trigger_shutdown();
        serving.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn shutdown_before_serving_stops_immediately() {
        let engine = Engine::new(ServerConfig::default(), HostCallbacks::new());
        engine.trigger_shutdown();
        let acceptor = Acceptor::bind(0).expect("bind");
        engine.serve_on(acceptor).await.expect("clean exit");
    }

    #[tokio::test]
    async fn tls_without_material_is_startup_fatal() {
        let config = ServerConfig {
            use_tls: true,
            ..ServerConfig::default()
        };
        let engine = Engine::new(config, HostCallbacks::new());
        let acceptor = Acceptor::bind(0).expect("bind");
        let result = engine.serve_on(acceptor).await;
        assert!(matches!(
            result,
            Err(EngineError::Tls(tls::TlsError::MissingMaterial))
        ));
    }

    #[tokio::test]
    async fn tls_bytes_on_plaintext_listener_drop_the_connection() {
        let engine = Arc::new(Engine::new(ServerConfig::default(), HostCallbacks::new()));
        let acceptor = Acceptor::bind(0).expect("bind");
        let addr = acceptor.local_addr().expect("local addr");
        let serving = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.serve_on(acceptor).await })
        };

        let mut client = TcpStream::connect(addr).await.expect("connect");
        client
            .write_all(&[0x16, 0x03, 0x01, 0x00, 0x10])
            .await
            .unwrap();
        let mut buf = [0u8; 16];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(n, 0, "connection must close without a response");

        engine.trigger_shutdown();
        serving.await.unwrap().unwrap();
    }

    #[test]
    fn global_surface_is_inert_without_an_active_server() {
        shutdown_server();
        shutdown_server_and_wait();
        let handle = SessionHandle::from_u64(42);
        assert!(matches!(
            ws_send(handle, "hello"),
            Err(BridgeError::Stale(_))
        ));
    }

    #[test]
    fn config_defaults_round_trip() {
        let config: ServerConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.port, 8080);
        assert!(!config.use_tls);
        assert_eq!(config.workers, 0);
    }
}
