//! Breakwater: an embeddable TCP/TLS/HTTP/WebSocket server engine.
//!
//! The engine terminates TCP, classifies each connection as TLS or
//! plaintext on a single port, speaks pipelined HTTP/1.1 and WebSocket
//! over both transports, and reaches its host application only through
//! the callback table in [`host::HostCallbacks`]. Sessions are referred
//! to across that boundary by opaque [`bridge::SessionHandle`] values.
//!
//! # Architecture Overview
//!
//! ```text
//!   Client ──TCP──▶ net::listener ──▶ net::detect ──┬─▶ net::tls ──┐
//!                                                   │ (plaintext)  │ (TLS)
//!                                                   ▼              ▼
//!                                          http::session  ◀────────┘
//!                                                   │ upgrade
//!                                                   ▼
//!                                          http::websocket
//!
//!   host ◀── bridge::Registry (handles, mailboxes) ──▶ sessions
//!   server:: Engine / run_server drive the whole pipeline
//!   lifecycle:: signals + shutdown coordinate teardown
//! ```

// Core subsystems
pub mod bridge;
pub mod host;
pub mod http;
pub mod net;
pub mod server;

// Cross-cutting concerns
pub mod lifecycle;

pub use bridge::{BridgeError, SessionHandle, SessionKind};
pub use host::{HostCallbacks, Responder, TlsMaterial};
pub use lifecycle::shutdown::Shutdown;
pub use server::{
    run_server, shutdown_server, shutdown_server_and_wait, ws_send, Engine, EngineError,
    ServerConfig,
};
