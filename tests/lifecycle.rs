//! Process-wide run/shutdown surface behavior.
//!
//! `run_server` manages one active engine per process, so this file holds
//! the only test that exercises it.

use std::sync::mpsc;
use std::time::{Duration, Instant};

use breakwater::{run_server, shutdown_server_and_wait, HostCallbacks, ServerConfig};

#[test]
fn run_server_fires_shutdown_notification_and_unblocks() {
    let (notified_tx, notified_rx) = mpsc::channel();
    let callbacks = HostCallbacks::new()
        .on_request(|_, _, _, responder| {
            responder.send(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n".to_vec());
        })
        .on_shutdown(move || {
            let _ = notified_tx.send(());
        });

    let config = ServerConfig {
        port: 0,
        use_tls: false,
        workers: 2,
    };
    let server = std::thread::spawn(move || run_server(config, callbacks));

    // The trigger is sticky once the server has published itself, so the
    // only window to cross is the instant between spawning the thread and
    // publication, when the wait returns immediately as a no-op.
    let deadline = Instant::now() + Duration::from_secs(10);
    while !server.is_finished() {
        assert!(Instant::now() < deadline, "server did not shut down");
        shutdown_server_and_wait();
        std::thread::sleep(Duration::from_millis(10));
    }

    server.join().unwrap().expect("clean exit");
    notified_rx
        .recv_timeout(Duration::from_secs(1))
        .expect("shutdown notification fired");
}
