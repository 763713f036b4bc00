//! Host-delivered response inspection.
//!
//! The host answers each request with a complete raw HTTP response message.
//! The engine writes those bytes to the wire untouched; the only thing it
//! needs to know is whether the response carries connection-close
//! semantics, which decides the session's next state.

/// Maximum number of headers inspected in a delivered response.
const MAX_HEADERS: usize = 64;

/// Whether the connection must close after writing this response.
///
/// Close when the response says `Connection: close`, when it is HTTP/1.0
/// without `keep-alive`, or when its body is framed by EOF (no
/// Content-Length, not chunked, and a status that carries a body).
/// Unparseable responses close the connection as the safe default.
pub fn wants_close(response: &[u8]) -> bool {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parsed = httparse::Response::new(&mut headers);
    let ok = match parsed.parse(response) {
        Ok(httparse::Status::Complete(_)) => true,
        // A partial head can still be inspected if the status line parsed.
        Ok(httparse::Status::Partial) => parsed.code.is_some(),
        Err(_) => false,
    };
    if !ok {
        return true;
    }

    let mut has_length = false;
    let mut chunked = false;
    let mut conn_close = false;
    let mut conn_keep_alive = false;
    for header in parsed.headers.iter() {
        if header.name.eq_ignore_ascii_case("content-length") {
            has_length = true;
        } else if header.name.eq_ignore_ascii_case("transfer-encoding") {
            if let Ok(text) = std::str::from_utf8(header.value) {
                if text
                    .split(',')
                    .any(|t| t.trim().eq_ignore_ascii_case("chunked"))
                {
                    chunked = true;
                }
            }
        } else if header.name.eq_ignore_ascii_case("connection") {
            if let Ok(text) = std::str::from_utf8(header.value) {
                for token in text.split(',') {
                    let token = token.trim();
                    if token.eq_ignore_ascii_case("close") {
                        conn_close = true;
                    } else if token.eq_ignore_ascii_case("keep-alive") {
                        conn_keep_alive = true;
                    }
                }
            }
        }
    }

    if conn_close {
        return true;
    }
    if parsed.version == Some(0) && !conn_keep_alive {
        return true;
    }

    // Informational and empty statuses never carry a body.
    let bodyless = matches!(parsed.code, Some(code) if (100..200).contains(&code) || code == 204 || code == 304);
    !bodyless && !has_length && !chunked
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keep_alive_response_stays_open() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok";
        assert!(!wants_close(raw));
    }

    #[test]
    fn explicit_close_closes() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok";
        assert!(wants_close(raw));
    }

    #[test]
    fn http10_without_keep_alive_closes() {
        let raw = b"HTTP/1.0 200 OK\r\nContent-Length: 2\r\n\r\nok";
        assert!(wants_close(raw));
        let raw = b"HTTP/1.0 200 OK\r\nContent-Length: 2\r\nConnection: keep-alive\r\n\r\nok";
        assert!(!wants_close(raw));
    }

    #[test]
    fn eof_framed_body_closes() {
        let raw = b"HTTP/1.1 200 OK\r\n\r\nstream until eof";
        assert!(wants_close(raw));
    }

    #[test]
    fn bodyless_status_without_length_stays_open() {
        let raw = b"HTTP/1.1 204 No Content\r\n\r\n";
        assert!(!wants_close(raw));
    }

    #[test]
    fn chunked_response_stays_open() {
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n0\r\n\r\n";
        assert!(!wants_close(raw));
    }

    #[test]
    fn garbage_closes() {
        assert!(wants_close(b"not an http response"));
    }
}
