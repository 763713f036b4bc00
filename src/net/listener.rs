//! TCP connection acceptor.
//!
//! # Responsibilities
//! - Bind a wildcard address on the configured port with address reuse
//! - Accept incoming TCP connections
//! - Keep accepting after per-connection accept errors
//!
//! Bind, option-set and listen failures are startup-fatal; accept errors
//! are logged by the serve loop and never stop the listener.

use std::net::{Ipv4Addr, SocketAddr};

use tokio::net::{TcpListener, TcpSocket, TcpStream};

/// Listen backlog requested from the platform.
const LISTEN_BACKLOG: u32 = 1024;

/// Error type for acceptor construction and accept operations.
#[derive(Debug, thiserror::Error)]
pub enum AcceptorError {
    /// Failed to open, configure or bind the listening socket.
    #[error("failed to bind listener: {0}")]
    Bind(#[source] std::io::Error),
    /// Failed to accept a connection.
    #[error("failed to accept connection: {0}")]
    Accept(#[source] std::io::Error),
}

/// A bound, listening TCP acceptor.
pub struct Acceptor {
    inner: TcpListener,
}

impl Acceptor {
    /// Bind `0.0.0.0:port` with `SO_REUSEADDR` and start listening.
    pub fn bind(port: u16) -> Result<Self, AcceptorError> {
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
        let socket = TcpSocket::new_v4().map_err(AcceptorError::Bind)?;
        socket.set_reuseaddr(true).map_err(AcceptorError::Bind)?;
        socket.bind(addr).map_err(AcceptorError::Bind)?;
        let listener = socket.listen(LISTEN_BACKLOG).map_err(AcceptorError::Bind)?;

        let local_addr = listener.local_addr().map_err(AcceptorError::Bind)?;
        tracing::info!(address = %local_addr, "Listener bound");

        Ok(Self { inner: listener })
    }

    /// Accept one connection.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr), AcceptorError> {
        let (stream, addr) = self.inner.accept().await.map_err(AcceptorError::Accept)?;
        tracing::debug!(peer_addr = %addr, "Connection accepted");
        Ok((stream, addr))
    }

    /// The local address this acceptor is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.inner.local_addr()
    }
}
