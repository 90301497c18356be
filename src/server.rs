//! Path-dispatching server over the transaction engine.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};

use crate::error::Result;
use crate::line::DEFAULT_BUFFER_LIMIT;
use crate::log::{debug, error, info};
use crate::stream::{BufStream, Transport};
use crate::transaction::Transaction;

/// Future returned by a [`Handler`].
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// A request handler.
///
/// The handler reads the request body (if it cares), writes the response,
/// and calls [`Transaction::finish`]. Free functions returning a boxed
/// future implement this directly:
///
/// ```ignore
/// fn hello(tx: &mut Transaction<TcpStream>) -> HandlerFuture<'_> {
///     Box::pin(async move {
///         tx.set_status(200);
///         tx.write_some(b"hello").await?;
///         tx.finish().await
///     })
/// }
/// ```
pub trait Handler<T: Transport>: Send + Sync {
    fn call<'a>(&self, tx: &'a mut Transaction<T>) -> HandlerFuture<'a>;
}

impl<T, F> Handler<T> for F
where
    T: Transport,
    F: for<'a> Fn(&'a mut Transaction<T>) -> HandlerFuture<'a> + Send + Sync,
{
    fn call<'a>(&self, tx: &'a mut Transaction<T>) -> HandlerFuture<'a> {
        self(tx)
    }
}

// ===== Router =====

/// Handlers keyed by exact request path; the empty string is the fallback.
///
/// Registration happens before serving: the router moves behind an [`Arc`]
/// into the connection tasks, so dispatch never races an update.
pub struct Router<T = TcpStream> {
    routes: HashMap<String, Arc<dyn Handler<T>>>,
}

impl<T: Transport> Router<T> {
    pub fn new() -> Self {
        Self { routes: HashMap::new() }
    }

    /// Register `handler` for `path`, replacing any previous entry. An empty
    /// `path` registers the default fallback.
    pub fn set_handler(&mut self, path: impl Into<String>, handler: impl Handler<T> + 'static) {
        self.routes.insert(path.into(), Arc::new(handler));
    }

    fn route(&self, path: &str) -> Option<Arc<dyn Handler<T>>> {
        self.routes
            .get(path)
            .or_else(|| self.routes.get(""))
            .cloned()
    }
}

impl<T: Transport> Default for Router<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Router<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut paths: Vec<_> = self.routes.keys().collect();
        paths.sort();
        f.debug_struct("Router").field("paths", &paths).finish()
    }
}

// ===== Per-connection loop =====

/// Serve transactions on `io` until keep-alive ends or an error closes the
/// connection. Usable directly with any [`Transport`], e.g. a TLS stream.
pub async fn serve_connection<T: Transport>(io: T, router: &Router<T>) -> Result<()> {
    serve_connection_with_limit(io, router, DEFAULT_BUFFER_LIMIT).await
}

pub(crate) async fn serve_connection_with_limit<T: Transport>(
    io: T,
    router: &Router<T>,
    limit: usize,
) -> Result<()> {
    let mut stream = BufStream::new(io);
    loop {
        // Wait for the next request; a close between requests is clean.
        let mut first = [0u8; 1];
        let n = stream.read_some(&mut first).await?;
        if n == 0 {
            return Ok(());
        }
        stream.put_back(&first);

        let mut tx = Transaction::create_with_limit(stream, limit).await?;
        match router.route(tx.request().path()) {
            Some(handler) => {
                if let Err(err) = handler.call(&mut tx).await {
                    // Mid-body errors are fatal to the transaction; flush
                    // what we can and drop the connection.
                    let _ = tx.finish().await;
                    return Err(err);
                }
            }
            None => {
                tx.set_status(404);
                tx.finish().await?;
            }
        }

        if !tx.keep_alive() {
            let mut stream = tx.into_stream();
            let _ = stream.shutdown().await;
            return Ok(());
        }
        stream = tx.into_stream();
    }
}

// ===== Server =====

type LoggerFn = dyn Fn(&str) + Send + Sync;

#[derive(Clone, Default)]
struct Logger {
    sink: Option<Arc<LoggerFn>>,
}

impl Logger {
    fn log(&self, message: &str) {
        if let Some(sink) = &self.sink {
            sink(message);
        }
        info!("{message}");
    }
}

/// Minimal dispatching server: listening endpoints, a path router, and a
/// logger sink.
pub struct Server {
    router: Router<TcpStream>,
    addrs: Vec<SocketAddr>,
    listeners: Vec<TcpListener>,
    logger: Logger,
    head_limit: usize,
}

impl Server {
    pub fn new() -> Self {
        Self {
            router: Router::new(),
            addrs: Vec::new(),
            listeners: Vec::new(),
            logger: Logger::default(),
            head_limit: DEFAULT_BUFFER_LIMIT,
        }
    }

    /// Register `handler` for `path`; `""` registers the default fallback.
    pub fn set_handler(
        &mut self,
        path: impl Into<String>,
        handler: impl Handler<TcpStream> + 'static,
    ) -> &mut Self {
        self.router.set_handler(path, handler);
        self
    }

    /// Register the logger sink. Connection-level events and errors are
    /// reported here as strings (and through the `log` facade).
    pub fn set_logger(&mut self, sink: impl Fn(&str) + Send + Sync + 'static) -> &mut Self {
        self.logger.sink = Some(Arc::new(sink));
        self
    }

    /// Add a listening endpoint, bound when the server runs.
    pub fn listen(&mut self, addr: SocketAddr) -> &mut Self {
        self.addrs.push(addr);
        self
    }

    /// Add an already-bound listener.
    pub fn add_listener(&mut self, listener: TcpListener) -> &mut Self {
        self.listeners.push(listener);
        self
    }

    /// Cap for the request-head buffer of every served connection.
    pub fn head_limit(&mut self, limit: usize) -> &mut Self {
        self.head_limit = limit;
        self
    }

    /// Bind the registered endpoints and serve until every listener stops.
    pub async fn run(self) -> io::Result<()> {
        let Server { router, addrs, mut listeners, logger, head_limit } = self;
        for addr in addrs {
            listeners.push(TcpListener::bind(addr).await?);
        }

        let router = Arc::new(router);
        let mut tasks = Vec::with_capacity(listeners.len());
        for listener in listeners {
            let router = Arc::clone(&router);
            let logger = logger.clone();
            tasks.push(tokio::spawn(accept_loop(listener, router, logger, head_limit)));
        }
        for task in tasks {
            let _ = task.await;
        }
        Ok(())
    }
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("router", &self.router)
            .field("addrs", &self.addrs)
            .field("head_limit", &self.head_limit)
            .finish_non_exhaustive()
    }
}

async fn accept_loop(
    listener: TcpListener,
    router: Arc<Router<TcpStream>>,
    logger: Logger,
    head_limit: usize,
) {
    loop {
        match listener.accept().await {
            Ok((io, peer)) => {
                debug!("accepted {peer}");
                let router = Arc::clone(&router);
                let logger = logger.clone();
                tokio::spawn(async move {
                    if let Err(err) = serve_connection_with_limit(io, &router, head_limit).await {
                        logger.log(&format!("{peer}: {err}"));
                    }
                });
            }
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::ConnectionAborted
                        | io::ErrorKind::ConnectionReset
                        | io::ErrorKind::Interrupted
                ) =>
            {
                // Transient, connection-scoped; keep accepting.
                debug!("accept retry: {err}");
            }
            Err(err) => {
                logger.log(&format!("accept failed: {err}"));
                error!("listener stopped: {err}");
                return;
            }
        }
    }
}
