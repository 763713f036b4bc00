//! HTTP session engine.
//!
//! # Responsibilities
//! - Drive one connection's request/response state machine:
//!   `ReadingRequest → Dispatching → Queuing/Writing → (ReadingRequest | Closing)`
//! - Enforce the host-supplied per-request read timeout and body limit
//! - Pipeline up to [`QUEUE_LIMIT`] requests with strict FIFO responses
//! - Hand upgrade requests (and buffered bytes) to the WebSocket engine
//!
//! # Design Decisions
//! - Generic over the transport; the same state machine serves plaintext
//!   and TLS connections
//! - The session task owns all state; host response delivery arrives
//!   through the session mailbox, never by touching session data directly
//! - Responses are written in request-arrival order no matter when the
//!   host delivers them; only the head of the queue is ever on the wire
//! - An I/O error tears down this session only; nothing is retried

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, WriteHalf};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::bridge::{Registry, SessionCommand, SessionKind};
use crate::host::{HostCallbacks, Responder};
use crate::http::{request, response, websocket};
use crate::net;

/// Maximum number of outstanding pipelined requests per session.
pub const QUEUE_LIMIT: usize = 8;

/// Deadline for the closing handshake (TCP half-close or TLS close_notify).
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// One pipeline slot, created at dispatch in request-arrival order.
struct Slot {
    seq: u64,
    response: Option<Vec<u8>>,
    close_after: bool,
}

enum Exit {
    /// Connection-fatal error; drop the transport.
    Fatal,
    /// Orderly end of session; perform the closing handshake.
    Graceful,
    /// WebSocket upgrade; transport ownership moves on.
    Upgrade(request::ParsedRequest),
}

/// Run one HTTP session to completion.
///
/// `initial` carries bytes buffered by the detector (plaintext) or left
/// over from a previous stage; they are parsed before the socket is read.
pub async fn run<S>(
    stream: S,
    initial: BytesMut,
    kind: SessionKind,
    registry: Arc<Registry>,
    callbacks: Arc<HostCallbacks>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mailbox, mut commands) = mpsc::unbounded_channel();
    let registration = registry.register(kind, mailbox);
    let handle = registration.handle();
    tracing::debug!(handle = %handle, kind = %kind, "HTTP session started");

    let (mut rd, mut wr) = tokio::io::split(stream);
    let mut inbuf = initial;
    let mut slots: VecDeque<Slot> = VecDeque::with_capacity(QUEUE_LIMIT);
    let mut next_seq: u64 = 0;

    // The response currently on the wire. A single write call per loop
    // iteration keeps progress intact when another branch wins the select.
    let mut write_buf: Vec<u8> = Vec::new();
    let mut write_off = 0usize;
    let mut write_close = false;
    let mut writing = false;

    let mut body_limit = callbacks.body_limit_bytes(handle);
    let mut read_deadline = arm_deadline(&callbacks, handle);

    let exit = loop {
        // Promote the head-of-queue response onto the wire.
        if !writing {
            if let Some(front) = slots.front_mut() {
                if let Some(bytes) = front.response.take() {
                    write_close = front.close_after || response::wants_close(&bytes);
                    write_buf = bytes;
                    write_off = 0;
                    writing = true;
                }
            }
        }

        let want_read = slots.len() < QUEUE_LIMIT;

        // Drain complete requests the buffer already holds before reading.
        if want_read {
            match request::parse_request(&inbuf, body_limit) {
                Ok(Some((req, consumed))) => {
                    inbuf.advance(consumed);
                    if req.is_upgrade {
                        break Exit::Upgrade(req);
                    }

                    let seq = next_seq;
                    next_seq += 1;
                    match &callbacks.request {
                        Some(handler) => {
                            slots.push_back(Slot {
                                seq,
                                response: None,
                                close_after: !req.keep_alive,
                            });
                            let responder = Responder::new(Arc::clone(&registry), handle, seq);
                            handler(handle, &req.head, &req.body, responder);
                        }
                        None => {
                            tracing::debug!(handle = %handle, "No request handler registered; request dropped");
                        }
                    }

                    // Next message gets fresh timeout and limit values.
                    body_limit = callbacks.body_limit_bytes(handle);
                    read_deadline = arm_deadline(&callbacks, handle);
                    continue;
                }
                Ok(None) => {}
                Err(e) => {
                    request::log_parse_error(handle, &e);
                    break Exit::Fatal;
                }
            }
        }

        tokio::select! {
            read = rd.read_buf(&mut inbuf), if want_read => match read {
                Ok(0) => {
                    if inbuf.is_empty() {
                        // Peer closed at a message boundary.
                        break Exit::Graceful;
                    }
                    let err = std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        "connection closed mid-request",
                    );
                    net::log_connection_error("http_session.read", &err);
                    break Exit::Fatal;
                }
                Ok(_) => {}
                Err(e) => {
                    net::log_connection_error("http_session.read", &e);
                    break Exit::Fatal;
                }
            },
            _ = tokio::time::sleep_until(read_deadline), if want_read => {
                let err = std::io::Error::new(std::io::ErrorKind::TimedOut, "request read timed out");
                net::log_connection_error("http_session.read", &err);
                break Exit::Fatal;
            },
            command = commands.recv() => {
                if let Some(SessionCommand::Response { seq, bytes }) = command {
                    // Out-of-order delivery fills its slot; emission order
                    // stays the arrival order.
                    if let Some(slot) = slots.iter_mut().find(|s| s.seq == seq) {
                        if slot.response.is_none() {
                            slot.response = Some(bytes);
                        }
                    } else {
                        tracing::debug!(handle = %handle, seq, "Response for a retired request dropped");
                    }
                }
            },
            wrote = wr.write(&write_buf[write_off..]), if writing => match wrote {
                Ok(0) => {
                    let err = std::io::Error::new(std::io::ErrorKind::WriteZero, "transport refused bytes");
                    net::log_connection_error("http_session.write", &err);
                    break Exit::Fatal;
                }
                Ok(n) => {
                    write_off += n;
                    if write_off == write_buf.len() {
                        // Reset the offset with the buffer: a disabled
                        // select branch still evaluates its expression, so
                        // the slice below must stay in bounds while idle.
                        writing = false;
                        write_buf = Vec::new();
                        write_off = 0;
                        let was_full = slots.len() == QUEUE_LIMIT;
                        slots.pop_front();
                        if write_close {
                            break Exit::Graceful;
                        }
                        if was_full {
                            // Reading resumes; restart the per-message clock.
                            body_limit = callbacks.body_limit_bytes(handle);
                            read_deadline = arm_deadline(&callbacks, handle);
                        }
                    }
                }
                Err(e) => {
                    net::log_connection_error("http_session.write", &e);
                    break Exit::Fatal;
                }
            },
        }
    };

    match exit {
        Exit::Fatal => {}
        Exit::Graceful => {
            close_transport(&mut wr, handle).await;
            tracing::debug!(handle = %handle, "HTTP session closed");
        }
        Exit::Upgrade(req) => {
            // The WebSocket session takes the transport, the unconsumed
            // buffer and a fresh handle; this session ends here.
            drop(registration);
            let stream = rd.unsplit(wr);
            let ws_kind = if kind.is_tls() {
                SessionKind::TlsWs
            } else {
                SessionKind::PlainWs
            };
            websocket::run(stream, inbuf, req, ws_kind, registry, callbacks).await;
        }
    }
}

fn arm_deadline(callbacks: &HostCallbacks, handle: crate::bridge::SessionHandle) -> Instant {
    Instant::now() + Duration::from_secs(u64::from(callbacks.read_timeout_secs(handle)))
}

/// Transport-specific graceful shutdown under its own deadline.
///
/// For plaintext this is a TCP half-close of the write side; for TLS the
/// close_notify handshake. The TLS short-read on close is filtered as
/// benign by the shared error logger.
async fn close_transport<S>(wr: &mut WriteHalf<S>, handle: crate::bridge::SessionHandle)
where
    S: AsyncWrite + AsyncRead,
{
    match tokio::time::timeout(SHUTDOWN_TIMEOUT, wr.shutdown()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => net::log_close_error("http_session.shutdown", &e),
        Err(_) => {
            tracing::error!(operation = "http_session.shutdown", handle = %handle, "Close timed out");
        }
    }
}
