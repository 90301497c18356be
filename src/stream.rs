//! Transport contract and the buffered stream layered over it.

use std::cmp;
use std::collections::VecDeque;
use std::fmt;
use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

/// A byte-oriented connection the engine can serve.
///
/// Plaintext TCP and TLS streams both satisfy this contract. The connection
/// closes when the transport is dropped; [`BufStream::shutdown`] is available
/// for an orderly close before that.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {
    /// Stable peer identity usable for logging.
    fn peer(&self) -> String;
}

impl Transport for TcpStream {
    fn peer(&self) -> String {
        match self.peer_addr() {
            Ok(addr) => addr.to_string(),
            Err(_) => "<unknown>".to_owned(),
        }
    }
}

impl Transport for tokio::io::DuplexStream {
    fn peer(&self) -> String {
        "<duplex>".to_owned()
    }
}

/// Transport plus a putback buffer.
///
/// Reads drain the putback buffer before touching the transport, and
/// [`put_back`](BufStream::put_back) prepends bytes an upper layer over-read,
/// so the next reader observes them first. One transaction at a time owns the
/// stream; operations serialize through that exclusive ownership inside a
/// single connection task.
pub struct BufStream<T> {
    io: T,
    putback: VecDeque<u8>,
}

impl<T: Transport> BufStream<T> {
    pub fn new(io: T) -> Self {
        Self { io, putback: VecDeque::new() }
    }

    /// Peer identity of the underlying transport.
    pub fn peer(&self) -> String {
        self.io.peer()
    }

    pub fn get_ref(&self) -> &T {
        &self.io
    }

    pub fn into_inner(self) -> T {
        self.io
    }

    /// Read into `buf`, serving the putback buffer first.
    pub async fn read_some(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.putback.is_empty() {
            let n = cmp::min(self.putback.len(), buf.len());
            for (slot, byte) in buf.iter_mut().zip(self.putback.drain(..n)) {
                *slot = byte;
            }
            return Ok(n);
        }
        self.io.read(buf).await
    }

    pub async fn write_some(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.io.write(buf).await
    }

    pub async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.io.write_all(buf).await
    }

    /// Prepend `bytes` to the read path, preserving their order.
    pub fn put_back(&mut self, bytes: &[u8]) {
        for &byte in bytes.iter().rev() {
            self.putback.push_front(byte);
        }
    }

    /// Orderly shutdown of the write side.
    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.io.shutdown().await
    }
}

// ===== Blocking variants =====

impl<T: Transport> BufStream<T> {
    /// Blocking form of [`read_some`](Self::read_some).
    pub fn read_some_blocking(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        crate::blocking::block_on(self.read_some(buf))
    }

    /// Blocking form of [`write_some`](Self::write_some).
    pub fn write_some_blocking(&mut self, buf: &[u8]) -> io::Result<usize> {
        crate::blocking::block_on(self.write_some(buf))
    }
}

impl<T> fmt::Debug for BufStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufStream")
            .field("putback", &self.putback.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod test {
    use super::BufStream;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn putback_is_served_before_the_transport() {
        let (mut client, server) = tokio::io::duplex(64);
        client.write_all(b"world").await.unwrap();

        let mut stream = BufStream::new(server);
        stream.put_back(b"hello ");

        let mut buf = [0u8; 4];
        assert_eq!(stream.read_some(&mut buf).await.unwrap(), 4);
        assert_eq!(&buf, b"hell");
        assert_eq!(stream.read_some(&mut buf).await.unwrap(), 2);
        assert_eq!(&buf[..2], b"o ");

        let mut rest = [0u8; 8];
        let n = stream.read_some(&mut rest).await.unwrap();
        assert_eq!(&rest[..n], b"world");
    }

    #[tokio::test]
    async fn put_back_prepends() {
        let (_client, server) = tokio::io::duplex(64);
        let mut stream = BufStream::new(server);
        stream.put_back(b"cd");
        stream.put_back(b"ab");

        let mut buf = [0u8; 4];
        assert_eq!(stream.read_some(&mut buf).await.unwrap(), 4);
        assert_eq!(&buf, b"abcd");
    }
}
