//! HTTP/1.1 request parsing.
//!
//! # Responsibilities
//! - Incrementally parse one request (head + body) from the session buffer
//! - Decode Content-Length and chunked body framing
//! - Enforce the head limit and the host-supplied body size limit
//! - Surface keep-alive semantics and WebSocket upgrade intent
//!
//! The session calls [`parse_request`] after every read; `Ok(None)` means
//! the buffer does not yet hold a complete message.

use crate::bridge::SessionHandle;

/// Maximum accepted size of a request head (start line + headers).
pub const HEAD_LIMIT: usize = 8 * 1024;

/// Maximum number of headers parsed from one request.
const MAX_HEADERS: usize = 64;

/// A fully parsed HTTP request.
#[derive(Debug)]
pub struct ParsedRequest {
    /// Raw head text: start line + headers + terminating blank line.
    pub head: String,
    /// Decoded body bytes.
    pub body: Vec<u8>,
    /// Whether the connection stays open after this request's response.
    pub keep_alive: bool,
    /// Whether this request asks for a WebSocket upgrade.
    pub is_upgrade: bool,
    /// `Sec-WebSocket-Key` value, when present on an upgrade request.
    pub ws_key: Option<String>,
}

/// Connection-fatal request parse failure.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// The head grew past [`HEAD_LIMIT`] without terminating.
    #[error("request head exceeds {HEAD_LIMIT} bytes")]
    HeadTooLarge,
    /// The declared or decoded body exceeds the session's limit.
    #[error("request body exceeds the session body limit")]
    BodyTooLarge,
    /// httparse rejected the head.
    #[error("malformed request head: {0}")]
    Head(httparse::Error),
    /// Body framing is inconsistent.
    #[error("malformed request framing: {0}")]
    Framing(&'static str),
}

/// Try to parse one complete request from `buf`.
///
/// On success returns the request and the number of bytes it consumed;
/// `Ok(None)` asks the caller to read more. The body size limit applies to
/// the decoded body and is checked as early as the framing allows.
pub fn parse_request(
    buf: &[u8],
    body_limit: u64,
) -> Result<Option<(ParsedRequest, usize)>, ParseError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);

    let head_len = match req.parse(buf) {
        Ok(httparse::Status::Complete(n)) => n,
        Ok(httparse::Status::Partial) => {
            if buf.len() > HEAD_LIMIT {
                return Err(ParseError::HeadTooLarge);
            }
            return Ok(None);
        }
        // The header array is a size bound, not a protocol violation.
        Err(httparse::Error::TooManyHeaders) => return Err(ParseError::HeadTooLarge),
        Err(e) => return Err(ParseError::Head(e)),
    };
    if head_len > HEAD_LIMIT {
        return Err(ParseError::HeadTooLarge);
    }

    let mut content_length: Option<u64> = None;
    let mut chunked = false;
    let mut conn_close = false;
    let mut conn_keep_alive = false;
    let mut conn_upgrade = false;
    let mut upgrade_websocket = false;
    let mut ws_key: Option<String> = None;

    for header in req.headers.iter() {
        if header.name.eq_ignore_ascii_case("content-length") {
            let text = std::str::from_utf8(header.value)
                .map_err(|_| ParseError::Framing("non-ASCII Content-Length"))?;
            content_length = Some(
                text.trim()
                    .parse::<u64>()
                    .map_err(|_| ParseError::Framing("invalid Content-Length"))?,
            );
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
                    } else if token.eq_ignore_ascii_case("upgrade") {
                        conn_upgrade = true;
                    }
                }
            }
        } else if header.name.eq_ignore_ascii_case("upgrade") {
            if let Ok(text) = std::str::from_utf8(header.value) {
                if text.trim().eq_ignore_ascii_case("websocket") {
                    upgrade_websocket = true;
                }
            }
        } else if header.name.eq_ignore_ascii_case("sec-websocket-key") {
            if let Ok(text) = std::str::from_utf8(header.value) {
                ws_key = Some(text.trim().to_string());
            }
        }
    }

    // HTTP/1.1 defaults to keep-alive; HTTP/1.0 must opt in.
    let http11 = req.version == Some(1);
    let keep_alive = if http11 { !conn_close } else { conn_keep_alive };
    let is_upgrade = conn_upgrade && upgrade_websocket;

    let (body, consumed) = if chunked {
        match decode_chunked(&buf[head_len..], body_limit)? {
            Some((body, body_consumed)) => (body, head_len + body_consumed),
            None => return Ok(None),
        }
    } else if let Some(len) = content_length {
        if len > body_limit {
            return Err(ParseError::BodyTooLarge);
        }
        // A length that cannot be addressed can never be buffered.
        let len = usize::try_from(len).map_err(|_| ParseError::BodyTooLarge)?;
        let total = head_len.checked_add(len).ok_or(ParseError::BodyTooLarge)?;
        if buf.len() < total {
            return Ok(None);
        }
        (buf[head_len..total].to_vec(), total)
    } else {
        // A request with neither framing header carries no body.
        (Vec::new(), head_len)
    };

    let head = String::from_utf8_lossy(&buf[..head_len]).into_owned();
    Ok(Some((
        ParsedRequest {
            head,
            body,
            keep_alive,
            is_upgrade,
            ws_key,
        },
        consumed,
    )))
}

/// Decode a chunked body. Returns the decoded bytes and consumed length, or
/// `None` when the buffer ends mid-body.
fn decode_chunked(input: &[u8], limit: u64) -> Result<Option<(Vec<u8>, usize)>, ParseError> {
    let mut body = Vec::new();
    let mut pos = 0usize;
    loop {
        let Some(line_len) = find_crlf(&input[pos..]) else {
            return Ok(None);
        };
        let size_line = &input[pos..pos + line_len];
        let size_text = match size_line.iter().position(|&b| b == b';') {
            Some(i) => &size_line[..i],
            None => size_line,
        };
        let size_text =
            std::str::from_utf8(size_text).map_err(|_| ParseError::Framing("invalid chunk size"))?;
        let size = u64::from_str_radix(size_text.trim(), 16)
            .map_err(|_| ParseError::Framing("invalid chunk size"))?;
        pos += line_len + 2;

        if size == 0 {
            // Trailer section: zero or more header lines, then a blank line.
            loop {
                let Some(trailer_len) = find_crlf(&input[pos..]) else {
                    return Ok(None);
                };
                pos += trailer_len + 2;
                if trailer_len == 0 {
                    return Ok(Some((body, pos)));
                }
            }
        }

        let running = (body.len() as u64)
            .checked_add(size)
            .ok_or(ParseError::BodyTooLarge)?;
        if running > limit {
            return Err(ParseError::BodyTooLarge);
        }
        let size = usize::try_from(size).map_err(|_| ParseError::BodyTooLarge)?;
        let data_end = pos
            .checked_add(size)
            .and_then(|end| end.checked_add(2))
            .ok_or(ParseError::BodyTooLarge)?;
        if input.len() < data_end {
            return Ok(None);
        }
        body.extend_from_slice(&input[pos..pos + size]);
        if &input[data_end - 2..data_end] != b"\r\n" {
            return Err(ParseError::Framing("missing chunk terminator"));
        }
        pos = data_end;
    }
}

fn find_crlf(input: &[u8]) -> Option<usize> {
    input.windows(2).position(|w| w == b"\r\n")
}

/// Log a parse failure with the session it belongs to.
pub(crate) fn log_parse_error(handle: SessionHandle, err: &ParseError) {
    tracing::error!(
        operation = "http_session.read",
        handle = %handle,
        error = %err,
        "Request parse failed"
    );
}
