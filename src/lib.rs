//! Compact HTTP/1.1 server library.
//!
//! The core is a per-connection [`Transaction`] engine: it parses one request
//! head, streams the request body (length-delimited or chunk-framed), frames
//! the response with a deferred head, and decides keep-alive. The engine runs
//! over any [`Transport`] wrapped in a [`BufStream`], so plaintext TCP and TLS
//! connections are served the same way. A minimal [`Server`] dispatches
//! transactions to handlers by exact request path.
#![warn(missing_debug_implementations)]

mod log;

mod date;
mod error;
mod headers;
mod line;
mod status;

pub mod blocking;
pub mod request;
pub mod server;
pub mod stream;
pub mod transaction;

// ===== Reexports =====

pub use error::{Error, ErrorKind, Result};
pub use headers::Headers;
pub use request::Request;
pub use server::{Handler, HandlerFuture, Router, Server, serve_connection};
pub use status::reason_phrase;
pub use stream::{BufStream, Transport};
pub use transaction::Transaction;
