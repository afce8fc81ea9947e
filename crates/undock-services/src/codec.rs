//! HTTP/1.1 message codec for overlay streams.
//!
//! A stream carries one complete message per direction, so the body is
//! always fully buffered. Hop-by-hop headers are stripped and
//! `content-length` is recomputed from the body on encode. Chunked transfer
//! coding is not supported on the overlay.
//!
//! Responses to HEAD, and 1xx/204/304 responses, never carry a body. Their
//! `content-length` describes the representation, so it passes through as is.
//! Both ends of a response therefore need the request method.

use bytes::Bytes;
use http::header::{HeaderName, CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{Method, Request, Response, StatusCode};

const MAX_HEADERS: usize = 64;

/// Headers scoped to a single connection; never forwarded.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "te",
    "trailer",
    "upgrade",
];

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("incomplete message")]
    Incomplete,
    #[error("malformed message: {0}")]
    Parse(#[from] httparse::Error),
    #[error("invalid message: {0}")]
    Http(#[from] http::Error),
    #[error("invalid content-length")]
    BadContentLength,
    #[error("chunked transfer coding is not supported")]
    Chunked,
}

// ── Encode ────────────────────────────────────────────────────────────────────

pub fn encode_request(req: &Request<Bytes>) -> Vec<u8> {
    let target = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let mut out = Vec::with_capacity(256 + req.body().len());
    out.extend_from_slice(req.method().as_str().as_bytes());
    out.push(b' ');
    out.extend_from_slice(target.as_bytes());
    out.extend_from_slice(b" HTTP/1.1\r\n");
    write_headers(&mut out, req.headers(), Some(req.body()));
    out
}

pub fn encode_response(resp: &Response<Bytes>, method: &Method) -> Vec<u8> {
    let status = resp.status();
    let mut out = Vec::with_capacity(128 + resp.body().len());
    out.extend_from_slice(b"HTTP/1.1 ");
    out.extend_from_slice(status.as_str().as_bytes());
    out.push(b' ');
    out.extend_from_slice(status.canonical_reason().unwrap_or("").as_bytes());
    out.extend_from_slice(b"\r\n");
    let body = (!is_bodiless(method, status)).then(|| resp.body());
    write_headers(&mut out, resp.headers(), body);
    out
}

/// `None` writes the head alone, keeping any `content-length` present.
fn write_headers(out: &mut Vec<u8>, headers: &http::HeaderMap, body: Option<&Bytes>) {
    for (name, value) in headers {
        if is_hop_by_hop(name) || (body.is_some() && name == CONTENT_LENGTH) {
            continue;
        }
        out.extend_from_slice(name.as_str().as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    match body {
        Some(body) => {
            out.extend_from_slice(format!("content-length: {}\r\n\r\n", body.len()).as_bytes());
            out.extend_from_slice(body);
        }
        None => out.extend_from_slice(b"\r\n"),
    }
}

/// Responses that end at the blank line whatever their headers say.
fn is_bodiless(method: &Method, status: StatusCode) -> bool {
    *method == Method::HEAD
        || status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

// ── Decode ────────────────────────────────────────────────────────────────────

pub fn decode_request(bytes: &[u8]) -> Result<Request<Bytes>, CodecError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parsed = httparse::Request::new(&mut headers);
    let head_len = match parsed.parse(bytes)? {
        httparse::Status::Complete(n) => n,
        httparse::Status::Partial => return Err(CodecError::Incomplete),
    };
    let method = parsed.method.ok_or(CodecError::Incomplete)?;
    let path = parsed.path.ok_or(CodecError::Incomplete)?;

    let mut builder = Request::builder().method(method).uri(path);
    for h in parsed.headers.iter() {
        builder = builder.header(h.name, h.value);
    }
    let body = body_of(&*parsed.headers, &bytes[head_len..])?;
    let mut req = builder.body(body)?;
    strip_hop_by_hop(req.headers_mut());
    Ok(req)
}

pub fn decode_response(bytes: &[u8], method: &Method) -> Result<Response<Bytes>, CodecError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parsed = httparse::Response::new(&mut headers);
    let head_len = match parsed.parse(bytes)? {
        httparse::Status::Complete(n) => n,
        httparse::Status::Partial => return Err(CodecError::Incomplete),
    };
    let code = parsed.code.ok_or(CodecError::Incomplete)?;
    let status = StatusCode::from_u16(code).map_err(http::Error::from)?;

    let mut builder = Response::builder().status(status);
    for h in parsed.headers.iter() {
        builder = builder.header(h.name, h.value);
    }
    let body = if is_bodiless(method, status) {
        Bytes::new()
    } else {
        body_of(&*parsed.headers, &bytes[head_len..])?
    };
    let mut resp = builder.body(body)?;
    strip_hop_by_hop(resp.headers_mut());
    Ok(resp)
}

/// Body bytes bounded by content-length, or everything left when absent.
fn body_of(headers: &[httparse::Header<'_>], rest: &[u8]) -> Result<Bytes, CodecError> {
    let mut length = None;
    for h in headers {
        if h.name.eq_ignore_ascii_case(TRANSFER_ENCODING.as_str())
            && h.value.windows(7).any(|w| w.eq_ignore_ascii_case(b"chunked"))
        {
            return Err(CodecError::Chunked);
        }
        if h.name.eq_ignore_ascii_case(CONTENT_LENGTH.as_str()) {
            let n = std::str::from_utf8(h.value)
                .ok()
                .and_then(|v| v.trim().parse::<usize>().ok())
                .ok_or(CodecError::BadContentLength)?;
            length = Some(n);
        }
    }
    match length {
        Some(n) if rest.len() < n => Err(CodecError::Incomplete),
        Some(n) => Ok(Bytes::copy_from_slice(&rest[..n])),
        None => Ok(Bytes::copy_from_slice(rest)),
    }
}

fn strip_hop_by_hop(headers: &mut http::HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
}
