//! Host callback surface.
//!
//! # Responsibilities
//! - Hold every host-registered callback slot in one explicit struct
//! - Provide the single-use response delivery path for HTTP requests
//! - Carry the TLS material provider callbacks
//!
//! # Design Decisions
//! - The callback table is built once before `run` and passed by `Arc` into
//!   the runtime and every session; there is no lazily-initialized global
//! - Host closures subsume the C-style `user_data` pointer through capture
//! - Response delivery from a foreign thread is a mailbox send; the owning
//!   session's task performs the actual state mutation

use std::sync::Arc;

use crate::bridge::{Registry, SessionCommand, SessionHandle};

/// Default per-request read timeout when the host registers no provider.
pub const DEFAULT_READ_TIMEOUT_SECS: u32 = 300;

/// HTTP request handler: `(handle, head_text, body, responder)`.
pub type RequestHandler = dyn Fn(SessionHandle, &str, &[u8], Responder) + Send + Sync;

/// Per-session integer provider (read timeout seconds).
pub type TimeoutProvider = dyn Fn(SessionHandle) -> u32 + Send + Sync;

/// Per-session integer provider (body size limit in bytes).
pub type BodyLimitProvider = dyn Fn(SessionHandle) -> u64 + Send + Sync;

/// WebSocket open/close notification: `(handle)`.
pub type WsLifecycleHandler = dyn Fn(SessionHandle) + Send + Sync;

/// WebSocket inbound text notification: `(handle, text)`.
pub type WsMessageHandler = dyn Fn(SessionHandle, &str) + Send + Sync;

/// Shutdown notification, invoked once after the run loop fully exits.
pub type ShutdownHandler = dyn FnOnce() + Send;

/// Byte-buffer provider for TLS material (certificate, key, DH parameters).
pub type TlsBytesProvider = dyn Fn() -> Vec<u8> + Send + Sync;

/// Password provider; `is_write` distinguishes write from read usage.
pub type TlsPasswordProvider = dyn Fn(bool) -> Vec<u8> + Send + Sync;

/// Host-supplied TLS material provider callbacks.
///
/// Certificate and private key are PEM byte buffers. DH parameters and the
/// password are accepted for surface parity with hosts that provision them;
/// the TLS provider negotiates its own groups (see DESIGN.md).
#[derive(Clone)]
pub struct TlsMaterial {
    /// Certificate chain provider (PEM).
    pub certificate: Arc<TlsBytesProvider>,
    /// Private key provider (PEM).
    pub private_key: Arc<TlsBytesProvider>,
    /// Optional DH parameter provider (PEM).
    pub dh_params: Option<Arc<TlsBytesProvider>>,
    /// Optional key password provider.
    pub password: Option<Arc<TlsPasswordProvider>>,
}

impl TlsMaterial {
    /// Build material from certificate and key providers.
    pub fn new(
        certificate: impl Fn() -> Vec<u8> + Send + Sync + 'static,
        private_key: impl Fn() -> Vec<u8> + Send + Sync + 'static,
    ) -> Self {
        Self {
            certificate: Arc::new(certificate),
            private_key: Arc::new(private_key),
            dh_params: None,
            password: None,
        }
    }

    /// Register a DH parameter provider.
    pub fn with_dh_params(mut self, dh: impl Fn() -> Vec<u8> + Send + Sync + 'static) -> Self {
        self.dh_params = Some(Arc::new(dh));
        self
    }

    /// Register a password provider.
    pub fn with_password(mut self, pw: impl Fn(bool) -> Vec<u8> + Send + Sync + 'static) -> Self {
        self.password = Some(Arc::new(pw));
        self
    }
}

/// The complete host callback table.
///
/// Every slot is optional; absent slots fall back to engine defaults
/// (timeout 300 s, unbounded body, WebSocket events ignored, HTTP requests
/// drained without a response).
#[derive(Default)]
pub struct HostCallbacks {
    /// HTTP request handler.
    pub request: Option<Arc<RequestHandler>>,
    /// Per-request read timeout provider.
    pub read_timeout: Option<Arc<TimeoutProvider>>,
    /// Request body size limit provider.
    pub body_limit: Option<Arc<BodyLimitProvider>>,
    /// WebSocket open handler.
    pub ws_open: Option<Arc<WsLifecycleHandler>>,
    /// WebSocket close handler.
    pub ws_close: Option<Arc<WsLifecycleHandler>>,
    /// WebSocket message handler.
    pub ws_message: Option<Arc<WsMessageHandler>>,
    /// Shutdown notification.
    pub shutdown: std::sync::Mutex<Option<Box<ShutdownHandler>>>,
    /// TLS material providers, required when running with `use_tls`.
    pub tls: Option<TlsMaterial>,
}

impl HostCallbacks {
    /// Empty callback table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the HTTP request handler.
    pub fn on_request(
        mut self,
        f: impl Fn(SessionHandle, &str, &[u8], Responder) + Send + Sync + 'static,
    ) -> Self {
        self.request = Some(Arc::new(f));
        self
    }

    /// Register the read-timeout-seconds provider.
    pub fn on_read_timeout(mut self, f: impl Fn(SessionHandle) -> u32 + Send + Sync + 'static) -> Self {
        self.read_timeout = Some(Arc::new(f));
        self
    }

    /// Register the body-size-limit provider.
    pub fn on_body_limit(mut self, f: impl Fn(SessionHandle) -> u64 + Send + Sync + 'static) -> Self {
        self.body_limit = Some(Arc::new(f));
        self
    }

    /// Register the WebSocket open handler.
    pub fn on_ws_open(mut self, f: impl Fn(SessionHandle) + Send + Sync + 'static) -> Self {
        self.ws_open = Some(Arc::new(f));
        self
    }

    /// Register the WebSocket close handler.
    pub fn on_ws_close(mut self, f: impl Fn(SessionHandle) + Send + Sync + 'static) -> Self {
        self.ws_close = Some(Arc::new(f));
        self
    }

    /// Register the WebSocket message handler.
    pub fn on_ws_message(mut self, f: impl Fn(SessionHandle, &str) + Send + Sync + 'static) -> Self {
        self.ws_message = Some(Arc::new(f));
        self
    }

    /// Register the shutdown notification.
    pub fn on_shutdown(self, f: impl FnOnce() + Send + 'static) -> Self {
        let mut slot = match self.shutdown.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *slot = Some(Box::new(f));
        drop(slot);
        self
    }

    /// Register TLS material providers.
    pub fn with_tls(mut self, material: TlsMaterial) -> Self {
        self.tls = Some(material);
        self
    }

    /// Resolve the read timeout for a session.
    pub fn read_timeout_secs(&self, handle: SessionHandle) -> u32 {
        match &self.read_timeout {
            Some(f) => f(handle),
            None => DEFAULT_READ_TIMEOUT_SECS,
        }
    }

    /// Resolve the body size limit for a session.
    pub fn body_limit_bytes(&self, handle: SessionHandle) -> u64 {
        match &self.body_limit {
            Some(f) => f(handle),
            None => u64::MAX,
        }
    }

    /// Take the shutdown handler, leaving the slot empty.
    pub(crate) fn take_shutdown(&self) -> Option<Box<ShutdownHandler>> {
        match self.shutdown.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

/// Single-use response delivery bound to one HTTP request.
///
/// May be invoked from any thread at any later time; the raw response bytes
/// are marshalled into the owning session's task. Delivery to a session that
/// has already closed is a silent no-op.
pub struct Responder {
    registry: Arc<Registry>,
    handle: SessionHandle,
    seq: u64,
}

impl Responder {
    pub(crate) fn new(registry: Arc<Registry>, handle: SessionHandle, seq: u64) -> Self {
        Self {
            registry,
            handle,
            seq,
        }
    }

    /// Handle of the session this response belongs to.
    pub fn session(&self) -> SessionHandle {
        self.handle
    }

    /// Deliver a complete raw HTTP response message.
    pub fn send(self, response: impl Into<Vec<u8>>) {
        let command = SessionCommand::Response {
            seq: self.seq,
            bytes: response.into(),
        };
        if let Err(e) = self.registry.deliver(self.handle, command) {
            // The connection died before the host answered.
            tracing::debug!(handle = %self.handle, error = %e, "Response dropped");
        }
    }
}

impl std::fmt::Debug for Responder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Responder")
            .field("handle", &self.handle)
            .field("seq", &self.seq)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::SessionKind;
    use tokio::sync::mpsc;

    #[test]
    fn defaults_apply_when_slots_absent() {
        let callbacks = HostCallbacks::new();
        let handle = SessionHandle::from_u64(7);
        assert_eq!(callbacks.read_timeout_secs(handle), DEFAULT_READ_TIMEOUT_SECS);
        assert_eq!(callbacks.body_limit_bytes(handle), u64::MAX);
    }

    #[test]
    fn providers_override_defaults() {
        let callbacks = HostCallbacks::new()
            .on_read_timeout(|_| 15)
            .on_body_limit(|_| 4096);
        let handle = SessionHandle::from_u64(1);
        assert_eq!(callbacks.read_timeout_secs(handle), 15);
        assert_eq!(callbacks.body_limit_bytes(handle), 4096);
    }

    #[test]
    fn responder_delivers_into_session_mailbox() {
        let registry = Arc::new(Registry::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let reg = registry.register(SessionKind::PlainHttp, tx);

        let responder = Responder::new(Arc::clone(&registry), reg.handle(), 3);
        responder.send(b"HTTP/1.1 200 OK\r\n\r\n".to_vec());

        match rx.try_recv() {
            Ok(SessionCommand::Response { seq, bytes }) => {
                assert_eq!(seq, 3);
                assert!(bytes.starts_with(b"HTTP/1.1 200"));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn responder_to_dead_session_is_a_no_op() {
        let registry = Arc::new(Registry::new());
        let responder = Responder::new(registry, SessionHandle::from_u64(99), 0);
        responder.send(b"HTTP/1.1 200 OK\r\n\r\n".to_vec());
    }

    #[test]
    fn shutdown_slot_is_single_use() {
        let callbacks = HostCallbacks::new().on_shutdown(|| {});
        assert!(callbacks.take_shutdown().is_some());
        assert!(callbacks.take_shutdown().is_none());
    }
}
