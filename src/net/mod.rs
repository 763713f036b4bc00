//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (bind, accept loop)
//!     → detect.rs (TLS vs plaintext classification, 30 s deadline)
//!     → tls.rs (server handshake over the buffered prefix, TLS only)
//!     → Hand off to the HTTP session engine
//!
//! rewind.rs carries buffered-but-unconsumed bytes across each handoff.
//! ```
//!
//! # Design Decisions
//! - Accept errors never stop the listener; every later error is isolated
//!   to its own connection
//! - Detection bytes transfer intact to whichever session comes next

pub mod detect;
pub mod listener;
pub mod rewind;
pub mod tls;

/// Log a connection-level I/O error with its operation tag.
pub(crate) fn log_connection_error(operation: &str, err: &std::io::Error) {
    tracing::error!(operation = operation, error = %err, "Connection error");
}

/// Log a close-path I/O error, filtering the benign truncated close.
///
/// A TLS peer that skips the closing handshake surfaces as `UnexpectedEof`
/// (the TLS "short read"). HTTP and WebSocket messages are self-terminated,
/// so a short read while closing is a normal end of connection, not a
/// reportable fault. Mid-message short reads go through
/// [`log_connection_error`] and are always logged.
pub(crate) fn log_close_error(operation: &str, err: &std::io::Error) {
    if benign_close(err) {
        return;
    }
    log_connection_error(operation, err);
}

fn benign_close(err: &std::io::Error) -> bool {
    err.kind() == std::io::ErrorKind::UnexpectedEof
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncated_close_is_benign() {
        let err = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "tls short read");
        assert!(benign_close(&err));
    }

    #[test]
    fn other_errors_are_reportable() {
        for kind in [
            std::io::ErrorKind::ConnectionReset,
            std::io::ErrorKind::TimedOut,
            std::io::ErrorKind::InvalidData,
        ] {
            let err = std::io::Error::new(kind, "fault");
            assert!(!benign_close(&err));
        }
    }
}
