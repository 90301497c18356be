//! One request/response exchange over a buffered stream.

use std::cmp;
use std::fmt;
use std::fmt::Write as _;
use std::io;

use bytes::BytesMut;

use crate::date;
use crate::error::{Error, ErrorKind, Result};
use crate::headers::Headers;
use crate::line::{DEFAULT_BUFFER_LIMIT, LineReader};
use crate::log::debug;
use crate::request::{self, Request, RequestLine};
use crate::status::reason_phrase;
use crate::stream::{BufStream, Transport};

/// Scratch size used when draining an unread request body.
const DRAIN_CHUNK: usize = 64 * 1024;

/// Write-once response state. Grows monotonically: status and headers freeze
/// once the first payload byte is out, framing is decided at the first flush.
#[derive(Debug, Default)]
struct Response {
    status: u16,
    headers: Headers,
    trailers: Headers,
    bytes_written: u64,
    chunked: bool,
    head_pending: bool,
}

/// One HTTP/1.1 exchange.
///
/// A transaction owns the [`BufStream`] for its lifetime: create it (which
/// parses the request head), stream the request body out and the response
/// body in, then call [`finish`](Transaction::finish). When keep-alive holds,
/// [`into_stream`](Transaction::into_stream) returns the stream so the next
/// transaction can be built over it; bytes the head parser over-read are put
/// back first.
pub struct Transaction<T> {
    stream: BufStream<T>,
    line: LineReader,
    request: Request,
    response: Response,
}

impl<T: Transport> Transaction<T> {
    /// Build a transaction and parse the request head.
    ///
    /// Head-parse errors are fatal to the connection; no handler should run
    /// after one.
    pub async fn create(stream: BufStream<T>) -> Result<Self> {
        Self::create_with_limit(stream, DEFAULT_BUFFER_LIMIT).await
    }

    /// [`create`](Self::create) with an explicit head-buffer cap.
    pub async fn create_with_limit(stream: BufStream<T>, limit: usize) -> Result<Self> {
        let mut tx = Self {
            stream,
            line: LineReader::new(limit),
            request: Request::default(),
            response: Response { head_pending: true, ..Response::default() },
        };
        tx.read_head().await?;
        Ok(tx)
    }

    /// Blocking form of [`create`](Self::create).
    pub fn create_blocking(stream: BufStream<T>) -> Result<Self> {
        crate::blocking::block_on(Self::create(stream))
    }

    // ===== Head parse =====

    async fn read_head(&mut self) -> Result<()> {
        // The entire head must fit in the capped buffer.
        self.line.load_until(&mut self.stream, b"\r\n\r\n").await?;

        let line = self.line.get_line(&mut self.stream).await?;
        let RequestLine { method, resource, version } = request::parse_request_line(&line)?;
        debug!("request: {method} {resource}");

        let target = request::split_target(&resource);
        self.request.method = method;
        self.request.version = version;
        self.request.resource = resource;
        self.request.path = target.path;
        self.request.query = target.query;
        self.request.fragment = target.fragment;

        loop {
            let line = self.line.get_line(&mut self.stream).await?;
            if line.is_empty() {
                break;
            }
            let (name, value) = request::parse_header_line(&line)?;
            self.request.headers.append(name, value);
        }

        let chunked = self
            .request
            .headers
            .get("transfer-encoding")
            .is_some_and(|v| !v.eq_ignore_ascii_case("identity"));
        if chunked {
            self.request.chunks_pending = true;
            self.read_chunk_header().await?;
        } else if let Some(value) = self.request.headers.get("content-length") {
            self.request.body_remaining = request::parse_content_length(value)?;
        }
        Ok(())
    }

    /// Read the next chunk-size line. A size of zero terminates the body and
    /// is followed by optional trailers.
    async fn read_chunk_header(&mut self) -> Result<()> {
        debug_assert!(self.request.chunks_pending && self.request.body_remaining == 0);
        let line = self.line.get_line(&mut self.stream).await?;
        let size = request::parse_chunk_size(&line)?;
        if size == 0 {
            self.request.chunks_pending = false;
            self.read_trailers().await?;
        } else {
            self.request.body_remaining = size;
        }
        Ok(())
    }

    /// Trailers parse like headers and fold into the request headers.
    async fn read_trailers(&mut self) -> Result<()> {
        loop {
            let line = self.line.get_line(&mut self.stream).await?;
            if line.is_empty() {
                return Ok(());
            }
            let (name, value) = request::parse_header_line(&line)?;
            self.request.headers.append(name, value);
        }
    }

    // ===== Request body =====

    /// Read request-body bytes into `buf`.
    ///
    /// Bytes the head parser over-read are served first, then the stream,
    /// bounded by the current framing unit. Chunk delimiters, chunk-size
    /// lines, the terminator, and trailers are consumed transparently. Once
    /// the body is exhausted a nonempty read yields the [`Eof`] error; a
    /// zero-length read is always a no-op.
    ///
    /// [`Eof`]: ErrorKind::Eof
    pub async fn read_some(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let want = cmp::min(self.request.body_remaining, buf.len() as u64) as usize;
        if want == 0 {
            return Err(ErrorKind::Eof.into());
        }

        let n = if self.line.is_empty() {
            self.stream.read_some(&mut buf[..want]).await?
        } else {
            self.line.drain_into(buf, want)
        };
        if n == 0 {
            return Err(Error::from(io::Error::from(io::ErrorKind::UnexpectedEof)));
        }
        self.request.body_remaining -= n as u64;

        if self.request.chunks_pending && self.request.body_remaining == 0 {
            let delim = self.line.get_line(&mut self.stream).await?;
            if !delim.is_empty() {
                return Err(ErrorKind::InvalidChunkDelimiter.into());
            }
            self.read_chunk_header().await?;
        }
        Ok(n)
    }

    /// Blocking form of [`read_some`](Self::read_some).
    pub fn read_some_blocking(&mut self, buf: &mut [u8]) -> Result<usize> {
        crate::blocking::block_on(self.read_some(buf))
    }

    // ===== Response =====

    /// Write response payload.
    ///
    /// The first write emits the status line and headers, inserting `Date`
    /// and deciding the body framing. In chunked framing each nonempty write
    /// becomes one chunk. Head, chunk framing, and payload go out as a single
    /// buffered write.
    pub async fn write_some(&mut self, buf: &[u8]) -> Result<usize> {
        let bodyless = self.is_bodyless();
        if bodyless && !buf.is_empty() {
            return Err(Error::from(io::Error::new(
                io::ErrorKind::InvalidInput,
                "body write on a bodyless response",
            )));
        }

        let mut out = BytesMut::new();
        if self.response.head_pending {
            self.prepare_head(&mut out, bodyless);
            self.response.head_pending = false;
        }
        if self.response.chunked && !buf.is_empty() {
            let _ = write!(out, "{:x}\r\n", buf.len());
        }
        out.extend_from_slice(buf);
        if self.response.chunked && !buf.is_empty() {
            out.extend_from_slice(b"\r\n");
        }
        if !out.is_empty() {
            self.stream.write_all(&out).await?;
        }
        self.response.bytes_written += buf.len() as u64;
        Ok(buf.len())
    }

    /// Blocking form of [`write_some`](Self::write_some).
    pub fn write_some_blocking(&mut self, buf: &[u8]) -> Result<usize> {
        crate::blocking::block_on(self.write_some(buf))
    }

    fn is_bodyless(&self) -> bool {
        let status = self.response.status;
        status < 200 || status == 204 || status == 304 || self.request.method == "HEAD"
    }

    fn prepare_head(&mut self, out: &mut BytesMut, bodyless: bool) {
        if !self.response.headers.contains_key("date") {
            let now = date::httpdate_now();
            self.response
                .headers
                .insert("Date", String::from_utf8_lossy(&now));
        }

        if !bodyless {
            let te_chunked = self
                .response
                .headers
                .get("transfer-encoding")
                .is_some_and(|v| !v.eq_ignore_ascii_case("identity"));
            if te_chunked {
                self.response.chunked = true;
                self.response.headers.remove("content-length");
            } else if !self.response.headers.contains_key("content-length") {
                self.response.chunked = true;
                self.response.headers.insert("Transfer-Encoding", "chunked");
            }
        }

        let mut digits = itoa::Buffer::new();
        out.extend_from_slice(b"HTTP/1.1 ");
        out.extend_from_slice(digits.format(self.response.status).as_bytes());
        out.extend_from_slice(b" ");
        out.extend_from_slice(reason_phrase(self.response.status).as_bytes());
        out.extend_from_slice(b"\r\n");
        for (name, value) in self.response.headers.iter() {
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"\r\n");
    }

    // ===== Finalization =====

    /// Finalize the exchange.
    ///
    /// Drains any unread request body so the stream is positioned at the
    /// next request, returns over-read bytes to the stream's putback buffer,
    /// and emits the terminating write: the head if nothing was written yet,
    /// plus `0\r\n`, trailers, and the final blank line in chunked framing.
    ///
    /// For an informational status (`< 200`) the drain is skipped and head
    /// emission is re-armed: the handler is expected to send the real
    /// response over the same transaction and call `finish` again.
    ///
    /// After a read error `finish` is a best-effort flush; the connection
    /// must not be reused.
    pub async fn finish(&mut self) -> Result<()> {
        if self.response.status >= 200
            && (self.request.body_remaining > 0 || self.request.chunks_pending)
        {
            let mut scratch = vec![0u8; DRAIN_CHUNK];
            while self.request.body_remaining > 0 || self.request.chunks_pending {
                self.read_some(&mut scratch).await?;
            }
        }

        if !self.line.is_empty() {
            let rest = self.line.take_rest();
            self.stream.put_back(&rest);
        }

        // A response that never wrote a body byte goes out length-delimited
        // rather than as an empty chunked stream.
        if self.response.bytes_written == 0
            && !self.is_bodyless()
            && !self.response.headers.contains_key("content-length")
            && !self.response.headers.contains_key("transfer-encoding")
        {
            self.response.headers.insert("Content-Length", "0");
        }

        self.write_some(&[]).await?;

        if self.response.chunked {
            let mut out = BytesMut::new();
            out.extend_from_slice(b"0\r\n");
            for (name, value) in self.response.trailers.iter() {
                out.extend_from_slice(name.as_bytes());
                out.extend_from_slice(b": ");
                out.extend_from_slice(value.as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            out.extend_from_slice(b"\r\n");
            self.stream.write_all(&out).await?;
        }

        if self.response.status < 200 {
            self.response.head_pending = true;
        }
        Ok(())
    }

    /// Blocking form of [`finish`](Self::finish).
    pub fn finish_blocking(&mut self) -> Result<()> {
        crate::blocking::block_on(self.finish())
    }

    // ===== Accessors =====

    /// The parsed request head and body-framing state.
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Peer identity of the underlying transport.
    pub fn peer(&self) -> String {
        self.stream.peer()
    }

    /// Response status; `0` until the handler sets it.
    pub fn status(&self) -> u16 {
        self.response.status
    }

    /// Set the response status. Must happen before the first write; a status
    /// still `0` when writes begin is a caller bug.
    pub fn set_status(&mut self, status: u16) {
        debug_assert!(
            self.response.bytes_written == 0,
            "status is frozen once payload is written"
        );
        self.response.status = status;
    }

    /// Response headers, mutable until the first payload byte is flushed.
    pub fn response_headers(&self) -> &Headers {
        &self.response.headers
    }

    pub fn response_headers_mut(&mut self) -> &mut Headers {
        &mut self.response.headers
    }

    /// Response trailers, emitted after the terminating chunk when the
    /// response is chunk-framed. Ignored in identity framing.
    pub fn trailers_mut(&mut self) -> &mut Headers {
        &mut self.response.trailers
    }

    /// Payload bytes written so far, excluding framing.
    pub fn bytes_written(&self) -> u64 {
        self.response.bytes_written
    }

    /// Returns `true` once chunked framing was selected at the first flush.
    pub fn is_chunked(&self) -> bool {
        self.response.chunked
    }

    /// Keep-alive decision for the finished exchange: `false` after a `101`
    /// or when either side sent `Connection: close`.
    pub fn keep_alive(&self) -> bool {
        if self.response.status == 101 {
            return false;
        }
        let wants_close = |headers: &Headers| {
            headers
                .get("connection")
                .is_some_and(|v| v.eq_ignore_ascii_case("close"))
        };
        !(wants_close(&self.request.headers) || wants_close(&self.response.headers))
    }

    /// Hand the stream back for the next transaction.
    pub fn into_stream(self) -> BufStream<T> {
        self.stream
    }
}

impl<T> fmt::Debug for Transaction<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("method", &self.request.method)
            .field("path", &self.request.path)
            .field("status", &self.response.status)
            .finish_non_exhaustive()
    }
}
