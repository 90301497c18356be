use std::{fmt, io};

/// Result alias with the crate [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Error produced by the transaction engine.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
}

#[derive(Debug)]
pub enum ErrorKind {
    /// Request line did not match the grammar.
    InvalidRequestLine,
    /// Header line is missing the `:` separator.
    InvalidRequestHeader,
    /// Version token is not `HTTP/1.1`.
    UnsupportedHttpVersion,
    /// `Content-Length` is not a plain decimal integer.
    InvalidContentLength,
    /// Chunk size line is not a hex integer.
    InvalidChunkLength,
    /// Non-empty line where the per-chunk `CRLF` was expected.
    InvalidChunkDelimiter,
    /// The delimiter buffer cap was exceeded.
    BufferLimit,
    /// End of the request body.
    Eof,
    /// Transport error, surfaced unchanged.
    Io(io::Error),
}

use ErrorKind as Kind;

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// Returns `true` if the error marks the end of the request body.
    pub fn is_eof(&self) -> bool {
        matches!(self.kind, Kind::Eof)
    }

    /// Returns `true` for head-parse errors, which are fatal to the
    /// connection before any handler runs.
    pub fn is_parse(&self) -> bool {
        matches!(
            self.kind,
            Kind::InvalidRequestLine
                | Kind::InvalidRequestHeader
                | Kind::UnsupportedHttpVersion
                | Kind::InvalidContentLength
        )
    }
}

impl From<Kind> for Error {
    fn from(kind: Kind) -> Self {
        Self { kind }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self { kind: Kind::Io(err) }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            Kind::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.kind.fmt(f)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Kind::InvalidRequestLine => f.write_str("invalid request line"),
            Kind::InvalidRequestHeader => f.write_str("invalid request header"),
            Kind::UnsupportedHttpVersion => f.write_str("unsupported http version"),
            Kind::InvalidContentLength => f.write_str("invalid content length"),
            Kind::InvalidChunkLength => f.write_str("invalid chunk length"),
            Kind::InvalidChunkDelimiter => f.write_str("invalid chunk delimiter"),
            Kind::BufferLimit => f.write_str("delimiter buffer cap exceeded"),
            Kind::Eof => f.write_str("end of request body"),
            Kind::Io(err) => err.fmt(f),
        }
    }
}
