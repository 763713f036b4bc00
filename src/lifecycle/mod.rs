//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     Request received → Stop accepting → Tear down sessions
//!         → Host shutdown callback → Release rendezvous waiters
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Signals, the programmatic stop call and runtime teardown all funnel
//!   into one shared, sticky shutdown event
//! - Blocking callers rendezvous with teardown through a condvar, not by
//!   polling

pub mod shutdown;
pub mod signals;
