//! Transport protocol detection.
//!
//! # Responsibilities
//! - Classify a freshly accepted connection as TLS or plaintext
//! - Hand every buffered byte onward, unconsumed and in order
//! - Enforce the detection inactivity deadline
//!
//! # Design Decisions
//! - A TLS stream opens with a handshake record (content type 0x16); any
//!   other first byte is plaintext HTTP
//! - The TLS verdict waits for enough of the record header to rule out
//!   ambiguity; no decision is made on a truncated peek
//! - Each connection is independent: a timeout or I/O error here discards
//!   only this connection

use std::io;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Inactivity deadline for classifying a new connection.
pub const DETECT_TIMEOUT: Duration = Duration::from_secs(30);

/// TLS record content type for a handshake record.
const TLS_HANDSHAKE_RECORD: u8 = 0x16;

/// Bytes required before committing to a TLS classification.
const TLS_VERDICT_BYTES: usize = 4;

/// Classify the stream's opening bytes under [`DETECT_TIMEOUT`].
///
/// Returns `(is_tls, buffered_bytes)`. The buffered bytes are exactly what
/// was read from the stream during classification; the caller must hand
/// them to the next stage intact.
pub async fn detect<S>(stream: &mut S) -> io::Result<(bool, BytesMut)>
where
    S: AsyncRead + Unpin,
{
    match tokio::time::timeout(DETECT_TIMEOUT, classify(stream)).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            "protocol detection timed out",
        )),
    }
}

async fn classify<S>(stream: &mut S) -> io::Result<(bool, BytesMut)>
where
    S: AsyncRead + Unpin,
{
    let mut buffer = BytesMut::with_capacity(1024);
    loop {
        if let Some(&first) = buffer.first() {
            if first != TLS_HANDSHAKE_RECORD {
                return Ok((false, buffer));
            }
            if buffer.len() >= TLS_VERDICT_BYTES {
                return Ok((true, buffer));
            }
        }
        let n = stream.read_buf(&mut buffer).await?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "connection closed during protocol detection",
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn http_request_classifies_as_plaintext() {
        let (mut client, mut server) = tokio::io::duplex(256);
        client.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();

        let (is_tls, buffer) = detect(&mut server).await.unwrap();
        assert!(!is_tls);
        assert_eq!(&buffer[..], b"GET / HTTP/1.1\r\n\r\n");
    }

    #[tokio::test]
    async fn client_hello_classifies_as_tls() {
        // TLS 1.2 ClientHello record header.
        let hello = [0x16, 0x03, 0x01, 0x00, 0xa5, 0x01, 0x00];
        let (mut client, mut server) = tokio::io::duplex(256);
        client.write_all(&hello).await.unwrap();

        let (is_tls, buffer) = detect(&mut server).await.unwrap();
        assert!(is_tls);
        assert_eq!(&buffer[..], &hello[..]);
    }

    #[tokio::test]
    async fn single_plain_byte_is_enough_to_decide() {
        let (mut client, mut server) = tokio::io::duplex(256);
        client.write_all(b"G").await.unwrap();

        let (is_tls, buffer) = detect(&mut server).await.unwrap();
        assert!(!is_tls);
        assert_eq!(&buffer[..], b"G");
    }

    #[tokio::test]
    async fn truncated_tls_prefix_waits_for_more_bytes() {
        let (mut client, mut server) = tokio::io::duplex(256);
        let verdict = tokio::spawn(async move { detect(&mut server).await });

        // Verdict must not land until enough of the record header arrived.
        client.write_all(&[0x16, 0x03]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!verdict.is_finished());

        client.write_all(&[0x01, 0x02]).await.unwrap();
        let (is_tls, buffer) = verdict.await.unwrap().unwrap();
        assert!(is_tls);
        assert_eq!(&buffer[..], &[0x16, 0x03, 0x01, 0x02]);
    }

    #[tokio::test]
    async fn eof_during_detection_is_an_error() {
        let (client, mut server) = tokio::io::duplex(256);
        drop(client);
        assert!(detect(&mut server).await.is_err());
    }
}
