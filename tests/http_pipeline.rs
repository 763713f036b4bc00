//! HTTP pipelining behavior over real TCP connections.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use breakwater::{HostCallbacks, Responder};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

mod common;

fn ok_response(body: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{}",
        body.len(),
        body
    )
    .into_bytes()
}

#[tokio::test]
async fn sequential_keep_alive_requests_share_a_connection() {
    let callbacks = HostCallbacks::new().on_request(|_, head, _, responder| {
        let path = head.split_whitespace().nth(1).unwrap_or("?").to_string();
        responder.send(ok_response(&path));
    });
    let server = common::start_engine(callbacks).await;

    let mut client = TcpStream::connect(server.addr).await.unwrap();
    for path in ["/a", "/bb", "/ccc"] {
        client
            .write_all(format!("GET {path} HTTP/1.1\r\nHost: t\r\n\r\n").as_bytes())
            .await
            .unwrap();
        let expected = ok_response(path);
        let mut reply = vec![0u8; expected.len()];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, expected);
    }
    server.stop().await;
}

#[tokio::test]
async fn out_of_order_host_delivery_preserves_request_order() {
    let pending: Arc<Mutex<Vec<(String, Responder)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&pending);
    let callbacks = HostCallbacks::new().on_request(move |_, head, _, responder| {
        let path = head.split_whitespace().nth(1).unwrap_or("?").to_string();
        sink.lock().unwrap().push((path, responder));
    });
    let server = common::start_engine(callbacks).await;

    let mut client = TcpStream::connect(server.addr).await.unwrap();
    client
        .write_all(b"GET /1 HTTP/1.1\r\n\r\nGET /2 HTTP/1.1\r\n\r\nGET /3 HTTP/1.1\r\n\r\n")
        .await
        .unwrap();

    let held = Arc::clone(&pending);
    common::wait_until(move || held.lock().unwrap().len() == 3).await;

    // Answer in reverse arrival order.
    let mut queued = pending.lock().unwrap().drain(..).collect::<Vec<_>>();
    queued.reverse();
    for (path, responder) in queued {
        responder.send(ok_response(&path));
    }

    let expected: Vec<u8> = [ok_response("/1"), ok_response("/2"), ok_response("/3")].concat();
    let mut reply = vec![0u8; expected.len()];
    client.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply, expected, "responses must follow request order");
    server.stop().await;
}

#[tokio::test]
async fn reading_pauses_at_the_pipeline_limit() {
    let dispatched = Arc::new(AtomicU32::new(0));
    let first: Arc<Mutex<Option<Responder>>> = Arc::new(Mutex::new(None));
    let counter = Arc::clone(&dispatched);
    let first_slot = Arc::clone(&first);
    let callbacks = HostCallbacks::new().on_request(move |_, _, _, responder| {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            *first_slot.lock().unwrap() = Some(responder);
        }
        // Later responders are dropped unanswered on purpose.
    });
    let server = common::start_engine(callbacks).await;

    let mut client = TcpStream::connect(server.addr).await.unwrap();
    let mut burst = Vec::new();
    for i in 0..9 {
        burst.extend_from_slice(format!("GET /{i} HTTP/1.1\r\n\r\n").as_bytes());
    }
    client.write_all(&burst).await.unwrap();

    let counter = Arc::clone(&dispatched);
    common::wait_until(move || counter.load(Ordering::SeqCst) == 8).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        dispatched.load(Ordering::SeqCst),
        8,
        "ninth request must wait until a slot frees"
    );

    // Completing the head response frees a slot and resumes reading.
    let responder = first.lock().unwrap().take().unwrap();
    responder.send(ok_response("head"));
    let counter = Arc::clone(&dispatched);
    common::wait_until(move || counter.load(Ordering::SeqCst) == 9).await;
    server.stop().await;
}

#[tokio::test]
async fn body_over_limit_closes_only_that_connection() {
    let callbacks = HostCallbacks::new()
        .on_body_limit(|_| 16)
        .on_request(|_, _, body, responder| {
            responder.send(ok_response(&format!("{}", body.len())));
        });
    let server = common::start_engine(callbacks).await;

    let mut offender = TcpStream::connect(server.addr).await.unwrap();
    offender
        .write_all(b"POST / HTTP/1.1\r\nContent-Length: 1024\r\n\r\n")
        .await
        .unwrap();
    let mut buf = [0u8; 64];
    let n = offender.read(&mut buf).await.unwrap();
    assert_eq!(n, 0, "oversized request must get no response");

    // A well-behaved connection is unaffected.
    let mut client = TcpStream::connect(server.addr).await.unwrap();
    client
        .write_all(b"POST / HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello")
        .await
        .unwrap();
    let expected = ok_response("5");
    let mut reply = vec![0u8; expected.len()];
    client.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply, expected);
    server.stop().await;
}

#[tokio::test]
async fn chunked_body_is_decoded_before_dispatch() {
    let seen: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let callbacks = HostCallbacks::new().on_request(move |_, _, body, responder| {
        *sink.lock().unwrap() = body.to_vec();
        responder.send(ok_response("done"));
    });
    let server = common::start_engine(callbacks).await;

    let mut client = TcpStream::connect(server.addr).await.unwrap();
    client
        .write_all(
            b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n\
              5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n",
        )
        .await
        .unwrap();
    let expected = ok_response("done");
    let mut reply = vec![0u8; expected.len()];
    client.read_exact(&mut reply).await.unwrap();
    assert_eq!(&*seen.lock().unwrap(), b"hello world");
    server.stop().await;
}

#[tokio::test]
async fn without_a_request_handler_connections_stay_open() {
    let server = common::start_engine(HostCallbacks::new()).await;

    let mut client = TcpStream::connect(server.addr).await.unwrap();
    client.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();

    let registry = Arc::clone(server.engine.registry());
    common::wait_until(move || registry.len() == 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        server.engine.registry().len(),
        1,
        "session must stay registered after draining the request"
    );
    server.stop().await;
}
