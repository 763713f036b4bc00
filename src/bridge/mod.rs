//! Opaque session handle bridge.
//!
//! # Responsibilities
//! - Mint process-local integer handles for live sessions
//! - Resolve a handle back to its concrete session variant (kind tag)
//! - Marshal host-originated commands into the owning session's task
//!
//! # Design Decisions
//! - Handles are monotonically increasing ids, never reused; a stale handle
//!   fails lookup instead of aliasing a newer session
//! - Downcast is a match on the kind tag, not a dynamic cast
//! - The registry stores only a mailbox sender; all session state lives
//!   inside the session's own task

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;

/// Opaque identifier standing in for a session across the host boundary.
///
/// Process-local, no cross-process meaning, no on-wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle(u64);

impl SessionHandle {
    /// Get the raw handle value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Rebuild a handle from its raw value (e.g. one the host stored).
    pub fn from_u64(raw: u64) -> Self {
        Self(raw)
    }
}

impl std::fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Concrete session variant behind a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    /// HTTP over plaintext TCP.
    PlainHttp,
    /// HTTP over TLS.
    TlsHttp,
    /// WebSocket over plaintext TCP.
    PlainWs,
    /// WebSocket over TLS.
    TlsWs,
}

impl SessionKind {
    /// Whether this variant is a WebSocket session.
    pub fn is_websocket(&self) -> bool {
        matches!(self, SessionKind::PlainWs | SessionKind::TlsWs)
    }

    /// Whether this variant runs over TLS.
    pub fn is_tls(&self) -> bool {
        matches!(self, SessionKind::TlsHttp | SessionKind::TlsWs)
    }
}

impl std::fmt::Display for SessionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionKind::PlainHttp => "plain-http",
            SessionKind::TlsHttp => "tls-http",
            SessionKind::PlainWs => "plain-ws",
            SessionKind::TlsWs => "tls-ws",
        };
        f.write_str(name)
    }
}

/// A command marshalled from a foreign thread into a session's task.
///
/// The session's own event loop performs all resulting state mutation.
#[derive(Debug)]
pub enum SessionCommand {
    /// A complete raw HTTP response for the pipeline slot `seq`.
    Response { seq: u64, bytes: Vec<u8> },
    /// One outbound WebSocket text frame.
    SendText(String),
}

/// Error resolving or delivering through a handle.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// No live session is registered under this handle.
    #[error("stale session handle: {0}")]
    Stale(SessionHandle),
    /// The handle resolved to a session of the wrong kind.
    #[error("handle {handle} is {actual}, expected a websocket session")]
    WrongKind {
        /// Offending handle.
        handle: SessionHandle,
        /// Variant actually registered.
        actual: SessionKind,
    },
    /// The session's task has already exited; its mailbox is gone.
    #[error("session {0} is shutting down")]
    Closed(SessionHandle),
}

struct Entry {
    kind: SessionKind,
    mailbox: mpsc::UnboundedSender<SessionCommand>,
}

/// Registry mapping live handles to session mailboxes.
///
/// Shared, read-mostly after a session registers; concurrent lookups come
/// from host threads invoking the send/response surface.
#[derive(Default)]
pub struct Registry {
    sessions: DashMap<u64, Entry>,
    next_id: AtomicU64,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            // Start at 1 so 0 is never a valid handle.
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a session and mint its handle.
    pub fn register(
        self: &Arc<Self>,
        kind: SessionKind,
        mailbox: mpsc::UnboundedSender<SessionCommand>,
    ) -> Registration {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.sessions.insert(id, Entry { kind, mailbox });
        let handle = SessionHandle(id);
        tracing::trace!(handle = %handle, kind = %kind, "Session registered");
        Registration {
            registry: Arc::clone(self),
            handle,
        }
    }

    /// Resolve the concrete variant behind a handle, if it is still live.
    pub fn kind(&self, handle: SessionHandle) -> Option<SessionKind> {
        self.sessions.get(&handle.0).map(|e| e.kind)
    }

    /// Deliver a command into the owning session's mailbox.
    pub fn deliver(&self, handle: SessionHandle, command: SessionCommand) -> Result<(), BridgeError> {
        let entry = self
            .sessions
            .get(&handle.0)
            .ok_or(BridgeError::Stale(handle))?;
        entry
            .mailbox
            .send(command)
            .map_err(|_| BridgeError::Closed(handle))
    }

    /// Send one text frame through a WebSocket session handle.
    ///
    /// Fails with [`BridgeError::WrongKind`] when the handle resolves to an
    /// HTTP session.
    pub fn send_text(&self, handle: SessionHandle, text: String) -> Result<(), BridgeError> {
        let entry = self
            .sessions
            .get(&handle.0)
            .ok_or(BridgeError::Stale(handle))?;
        if !entry.kind.is_websocket() {
            return Err(BridgeError::WrongKind {
                handle,
                actual: entry.kind,
            });
        }
        entry
            .mailbox
            .send(SessionCommand::SendText(text))
            .map_err(|_| BridgeError::Closed(handle))
    }

    /// Number of currently registered sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no sessions are registered.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn deregister(&self, handle: SessionHandle) {
        if self.sessions.remove(&handle.0).is_some() {
            tracing::trace!(handle = %handle, "Session deregistered");
        }
    }
}

/// Guard tying a registry entry to a session's lifetime.
///
/// Deregisters on drop so no teardown path can leak a handle.
pub struct Registration {
    registry: Arc<Registry>,
    handle: SessionHandle,
}

impl Registration {
    /// The handle minted for this session.
    pub fn handle(&self) -> SessionHandle {
        self.handle
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.deregister(self.handle);
    }
}
