//! Demo host binary.
//!
//! Runs the engine with echo-style callbacks: HTTP requests get their own
//! head and body reflected back, WebSocket text frames are echoed to the
//! sender. Configuration comes from the environment (`PORT`, `WORKERS`).

use breakwater::{run_server, HostCallbacks, ServerConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing subscriber
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "breakwater=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig {
        port: std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8080),
        use_tls: false,
        workers: std::env::var("WORKERS")
            .ok()
            .and_then(|w| w.parse().ok())
            .unwrap_or(0),
    };

    tracing::info!(
        port = config.port,
        workers = config.workers,
        "breakwater demo starting"
    );

    let callbacks = HostCallbacks::new()
        .on_request(|handle, head, body, responder| {
            tracing::info!(handle = %handle, bytes = body.len(), "Request received");
            let mut payload = Vec::with_capacity(head.len() + body.len());
            payload.extend_from_slice(head.as_bytes());
            payload.extend_from_slice(body);
            let mut response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\n\r\n",
                payload.len()
            )
            .into_bytes();
            response.extend_from_slice(&payload);
            responder.send(response);
        })
        .on_ws_open(|handle| tracing::info!(handle = %handle, "WebSocket opened"))
        .on_ws_close(|handle| tracing::info!(handle = %handle, "WebSocket closed"))
        .on_ws_message(|handle, text| {
            if let Err(e) = breakwater::ws_send(handle, format!("echo: {text}")) {
                tracing::warn!(handle = %handle, error = %e, "Echo failed");
            }
        })
        .on_shutdown(|| tracing::info!("Shutdown complete"));

    run_server(config, callbacks)?;
    Ok(())
}
