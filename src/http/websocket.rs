//! WebSocket session engine.
//!
//! # Responsibilities
//! - Complete the upgrade handshake the HTTP engine accepted
//! - Relay inbound text messages to the host, one at a time
//! - Write host-initiated messages delivered through the session mailbox
//! - Fire the open and close lifecycle callbacks exactly once each
//!
//! # Design Decisions
//! - Framing is delegated to `tokio-tungstenite` over the upgraded
//!   transport; leftover pipelined bytes replay through [`Rewind`]
//! - The close callback lives in a drop guard, so it fires even when the
//!   session task is torn down mid-flight
//! - Binary, ping and pong frames are consumed without host involvement

use std::sync::Arc;

use bytes::BytesMut;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;

use crate::bridge::{Registry, SessionCommand, SessionHandle, SessionKind};
use crate::host::HostCallbacks;
use crate::http::request::ParsedRequest;
use crate::net::{self, rewind::Rewind};

/// Server identity advertised in the upgrade response.
pub const SERVER_IDENT: &str = concat!("breakwater/", env!("CARGO_PKG_VERSION"));

/// Fires the host's close notification exactly once, at session teardown.
struct CloseGuard {
    callbacks: Arc<HostCallbacks>,
    handle: SessionHandle,
}

impl Drop for CloseGuard {
    fn drop(&mut self) {
        if let Some(close) = &self.callbacks.ws_close {
            close(self.handle);
        }
    }
}

/// Run one WebSocket session to completion.
///
/// Called by the HTTP engine after it parsed an upgrade request; this
/// writes the `101 Switching Protocols` response itself and then speaks
/// frames for the rest of the connection's life.
pub(crate) async fn run<S>(
    mut stream: S,
    leftover: BytesMut,
    request: ParsedRequest,
    kind: SessionKind,
    registry: Arc<Registry>,
    callbacks: Arc<HostCallbacks>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let Some(key) = request.ws_key.as_deref() else {
        tracing::error!(
            operation = "websocket.accept",
            "Upgrade request carries no Sec-WebSocket-Key"
        );
        return;
    };
    let accept = derive_accept_key(key.as_bytes());
    let response = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Connection: Upgrade\r\n\
         Upgrade: websocket\r\n\
         Sec-WebSocket-Accept: {accept}\r\n\
         Server: {SERVER_IDENT}\r\n\r\n"
    );
    if let Err(e) = stream.write_all(response.as_bytes()).await {
        net::log_connection_error("websocket.accept", &e);
        return;
    }

    let mut ws =
        WebSocketStream::from_raw_socket(Rewind::new(leftover, stream), Role::Server, None).await;

    let (mailbox, mut commands) = mpsc::unbounded_channel();
    let registration = registry.register(kind, mailbox);
    let handle = registration.handle();
    tracing::debug!(handle = %handle, kind = %kind, "WebSocket session open");

    if let Some(open) = &callbacks.ws_open {
        open(handle);
    }
    // Declared after the registration so close fires while the handle
    // still resolves.
    let _close_guard = CloseGuard {
        callbacks: Arc::clone(&callbacks),
        handle,
    };

    loop {
        tokio::select! {
            frame = ws.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if let Some(on_message) = &callbacks.ws_message {
                        on_message(handle, text.as_str());
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    log_ws_error(handle, &e);
                    break;
                }
            },
            command = commands.recv() => {
                if let Some(SessionCommand::SendText(text)) = command {
                    if let Err(e) = ws.send(Message::text(text)).await {
                        log_ws_error(handle, &e);
                        break;
                    }
                }
            },
        }
    }

    // Best-effort closing handshake; the peer may already be gone.
    let _ = ws.close(None).await;
    tracing::debug!(handle = %handle, "WebSocket session closed");
}

fn log_ws_error(handle: SessionHandle, err: &WsError) {
    if matches!(err, WsError::ConnectionClosed | WsError::AlreadyClosed) {
        return;
    }
    tracing::error!(operation = "websocket.read", handle = %handle, error = %err, "WebSocket error");
}
