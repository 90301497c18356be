//! Request metadata and the head grammar.

use std::collections::HashMap;

use crate::error::{ErrorKind, Result};
use crate::headers::Headers;

/// One parsed request head plus body-framing state.
///
/// Built by the transaction when the head is read; the body is streamed
/// through [`Transaction::read_some`](crate::Transaction::read_some), so the
/// request itself never buffers payload.
#[derive(Debug, Default)]
pub struct Request {
    pub(crate) method: String,
    pub(crate) version: String,
    pub(crate) resource: String,
    pub(crate) path: String,
    pub(crate) query: HashMap<String, String>,
    pub(crate) fragment: String,
    pub(crate) headers: Headers,
    pub(crate) body_remaining: u64,
    pub(crate) chunks_pending: bool,
}

impl Request {
    /// Request method, e.g. `GET`.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Version token; always `HTTP/1.1`.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Raw request target as it appeared on the wire.
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Decoded path component of the target.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Decoded query parameters; later keys overwrite earlier ones.
    pub fn query(&self) -> &HashMap<String, String> {
        &self.query
    }

    /// Decoded fragment component, or `""`.
    pub fn fragment(&self) -> &str {
        &self.fragment
    }

    /// Request headers. Once the body reports end-of-stream this also holds
    /// any trailers of a chunk-framed body.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Bytes still owed on the current framing unit.
    pub fn body_remaining(&self) -> u64 {
        self.body_remaining
    }

    /// Returns `true` while the body is chunk-framed and the terminating
    /// chunk has not been seen.
    pub fn chunks_pending(&self) -> bool {
        self.chunks_pending
    }
}

// ===== Request line =====

const METHODS: [&str; 9] = [
    "GET", "HEAD", "POST", "PUT", "DELETE", "CONNECT", "OPTIONS", "TRACE", "PATCH",
];

#[derive(Debug)]
pub(crate) struct RequestLine {
    pub method: String,
    pub resource: String,
    pub version: String,
}

fn is_token_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric()
        || matches!(
            byte,
            b'-' | b'!'
                | b'#'
                | b'$'
                | b'%'
                | b'^'
                | b'&'
                | b'*'
                | b'+'
                | b'.'
                | b'_'
                | b'\''
                | b'`'
                | b'|'
                | b'~'
        )
}

/// Parse `method SP request-target SP version` with single separators.
pub(crate) fn parse_request_line(line: &str) -> Result<RequestLine> {
    let mut parts = line.split(' ');
    let (Some(method), Some(resource), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(ErrorKind::InvalidRequestLine.into());
    };

    if method.is_empty() || !method.bytes().all(is_token_byte) {
        return Err(ErrorKind::InvalidRequestLine.into());
    }
    if !METHODS.contains(&method) {
        return Err(ErrorKind::InvalidRequestLine.into());
    }
    if resource.is_empty() || resource.bytes().any(|b| b.is_ascii_whitespace()) {
        return Err(ErrorKind::InvalidRequestLine.into());
    }

    let v = version.as_bytes();
    let well_formed = v.len() == 8
        && &v[..5] == b"HTTP/"
        && v[5].is_ascii_digit()
        && v[6] == b'.'
        && v[7].is_ascii_digit();
    if !well_formed {
        return Err(ErrorKind::InvalidRequestLine.into());
    }
    if version != "HTTP/1.1" {
        return Err(ErrorKind::UnsupportedHttpVersion.into());
    }

    Ok(RequestLine {
        method: method.to_owned(),
        resource: resource.to_owned(),
        version: version.to_owned(),
    })
}

// ===== Header line =====

/// Split `name: value`, left-trimming the value only.
pub(crate) fn parse_header_line(line: &str) -> Result<(&str, &str)> {
    let Some((name, value)) = line.split_once(':') else {
        return Err(ErrorKind::InvalidRequestHeader.into());
    };
    Ok((name, value.trim_start_matches([' ', '\t'])))
}

// ===== Target splitting and decoding =====

pub(crate) struct Target {
    pub path: String,
    pub query: HashMap<String, String>,
    pub fragment: String,
}

/// Split the raw target on the first `?` and `#`, decoding each component.
pub(crate) fn split_target(resource: &str) -> Target {
    let (rest, fragment) = match resource.split_once('#') {
        Some((rest, fragment)) => (rest, fragment),
        None => (resource, ""),
    };
    let (path, query) = match rest.split_once('?') {
        Some((path, query)) => (path, query),
        None => (rest, ""),
    };
    Target {
        path: percent_decode(path, false),
        query: parse_query(query),
        fragment: percent_decode(fragment, false),
    }
}

/// Percent-decode `input`; `+` becomes a space only in query components.
/// Malformed escapes are kept literally.
pub(crate) fn percent_decode(input: &str, plus_as_space: bool) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' if plus_as_space => {
                out.push(b' ');
                i += 1;
            }
            b'%' => match (hex_value(bytes.get(i + 1)), hex_value(bytes.get(i + 2))) {
                (Some(hi), Some(lo)) => {
                    out.push(hi << 4 | lo);
                    i += 3;
                }
                _ => {
                    out.push(b'%');
                    i += 1;
                }
            },
            byte => {
                out.push(byte);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_value(byte: Option<&u8>) -> Option<u8> {
    match byte.copied()? {
        b @ b'0'..=b'9' => Some(b - b'0'),
        b @ b'a'..=b'f' => Some(b - b'a' + 10),
        b @ b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// `key(=value)?` pairs separated by `&`; bare keys are ignored and later
/// keys overwrite earlier ones.
pub(crate) fn parse_query(query: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for pair in query.split('&') {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        map.insert(percent_decode(key, true), percent_decode(value, true));
    }
    map
}

// ===== Body framing =====

/// Strict decimal `Content-Length`: ASCII digits only, no sign, no padding.
pub(crate) fn parse_content_length(value: &str) -> Result<u64> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ErrorKind::InvalidContentLength.into());
    }
    value
        .parse()
        .map_err(|_| ErrorKind::InvalidContentLength.into())
}

/// Hex chunk size; anything after the first `;` is a chunk extension and is
/// ignored.
pub(crate) fn parse_chunk_size(line: &str) -> Result<u64> {
    let size = match line.split_once(';') {
        Some((size, _extensions)) => size,
        None => line,
    };
    let size = size.trim_end_matches([' ', '\t']);
    if size.is_empty() || !size.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ErrorKind::InvalidChunkLength.into());
    }
    u64::from_str_radix(size, 16).map_err(|_| ErrorKind::InvalidChunkLength.into())
}
