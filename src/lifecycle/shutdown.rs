//! Shutdown coordination for the engine.

use std::sync::{Condvar, Mutex};

use tokio::sync::watch;

/// Coordinator for graceful shutdown.
///
/// Wraps a watch channel, so the trigger is sticky: a subscriber that
/// arrives after the trigger still observes it. Clones share the same
/// underlying event.
#[derive(Clone)]
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

impl Shutdown {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// Subscribe to the shutdown signal.
    ///
    /// Await it with `receiver.wait_for(|&triggered| triggered)`; a trigger
    /// that fired before the subscription completes immediately.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Trigger the shutdown signal. Sticky; repeated triggers are harmless.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Whether shutdown has been requested.
    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Blocking rendezvous between a shutdown requester and engine teardown.
///
/// The requester parks on [`wait`](Rendezvous::wait) from a plain thread;
/// the runtime thread calls [`complete`](Rendezvous::complete) once every
/// session has been torn down and the host's shutdown callback has run.
/// Completion is sticky, so a late waiter returns immediately.
pub struct Rendezvous {
    done: Mutex<bool>,
    signal: Condvar,
}

impl Rendezvous {
    pub fn new() -> Self {
        Self {
            done: Mutex::new(false),
            signal: Condvar::new(),
        }
    }

    /// Block the calling thread until teardown completes.
    pub fn wait(&self) {
        let mut done = match self.done.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        while !*done {
            done = match self.signal.wait(done) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }

    /// Mark teardown complete and wake every waiter.
    pub fn complete(&self) {
        let mut done = match self.done.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *done = true;
        self.signal.notify_all();
    }
}

impl Default for Rendezvous {
    fn default() -> Self {
        Self::new()
    }
}
