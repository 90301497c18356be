use std::io;

use bytes::{Buf, BytesMut};

use crate::error::{Error, ErrorKind, Result};
use crate::stream::{BufStream, Transport};

/// Default cap for the delimiter buffer; the whole request head must fit.
pub(crate) const DEFAULT_BUFFER_LIMIT: usize = 10 * 1024 * 1024;

const READ_CHUNK: usize = 4 * 1024;

/// Bounded delimiter reader.
///
/// Accumulates stream bytes until a delimiter is present, yields CRLF lines,
/// and lends over-read bytes back out: the body reader drains them through
/// [`drain_into`](LineReader::drain_into) and finalization returns the rest
/// to the stream via [`take_rest`](LineReader::take_rest).
pub(crate) struct LineReader {
    buf: BytesMut,
    limit: usize,
}

impl LineReader {
    pub fn new(limit: usize) -> Self {
        Self { buf: BytesMut::new(), limit }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Ensure the buffer contains `delim`, reading from `stream` as needed.
    ///
    /// Returns the buffer length up to and including the delimiter. Exceeding
    /// the buffer cap while seeking is fatal.
    pub async fn load_until<T: Transport>(
        &mut self,
        stream: &mut BufStream<T>,
        delim: &[u8],
    ) -> Result<usize> {
        let mut searched = 0;
        loop {
            if let Some(at) = find(&self.buf[searched..], delim) {
                return Ok(searched + at + delim.len());
            }
            // A partial delimiter may straddle the next read.
            searched = self.buf.len().saturating_sub(delim.len() - 1);

            if self.buf.len() >= self.limit {
                return Err(ErrorKind::BufferLimit.into());
            }
            let mut chunk = [0u8; READ_CHUNK];
            let n = stream.read_some(&mut chunk).await?;
            if n == 0 {
                return Err(Error::from(io::Error::from(io::ErrorKind::UnexpectedEof)));
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    /// Extract the next CRLF-terminated line, consuming the delimiter.
    pub async fn get_line<T: Transport>(&mut self, stream: &mut BufStream<T>) -> Result<String> {
        let end = self.load_until(stream, b"\r\n").await?;
        let mut line = self.buf.split_to(end);
        line.truncate(line.len() - 2);
        Ok(String::from_utf8_lossy(&line).into_owned())
    }

    /// Copy up to `limit` buffered bytes into `buf`; returns the count.
    pub fn drain_into(&mut self, buf: &mut [u8], limit: usize) -> usize {
        let n = limit.min(self.buf.len()).min(buf.len());
        buf[..n].copy_from_slice(&self.buf[..n]);
        self.buf.advance(n);
        n
    }

    /// Surrender all buffered bytes, e.g. for stream putback.
    pub fn take_rest(&mut self) -> BytesMut {
        self.buf.split()
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

impl std::fmt::Debug for LineReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineReader")
            .field("buffered", &self.buf.len())
            .field("limit", &self.limit)
            .finish()
    }
}
