//! Application protocol subsystem.
//!
//! # Data Flow
//! ```text
//! Classified transport (plain or TLS)
//!     → session.rs (HTTP/1.1 state machine, pipelining, dispatch to host)
//!     → request.rs (incremental parse) / response.rs (close semantics)
//!     → websocket.rs (after an accepted upgrade, for the connection's life)
//! ```

pub mod request;
pub mod response;
pub mod session;
pub mod websocket;
