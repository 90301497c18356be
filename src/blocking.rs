//! Blocking counterparts of the suspension-based surface.
//!
//! The blocking forms do not maintain a second state machine: they drive the
//! async operations to completion on a shared current-thread executor. The
//! executor is built lazily and lives for the process, so transports keep a
//! single I/O driver across successive blocking calls.

use std::future::Future;
use std::sync::OnceLock;

use tokio::runtime::{Builder, Runtime};

fn runtime() -> &'static Runtime {
    static RUNTIME: OnceLock<Runtime> = OnceLock::new();
    RUNTIME.get_or_init(|| {
        Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("blocking executor")
    })
}

/// Drive `future` to completion on the blocking executor.
///
/// # Panics
///
/// Panics when called from within an async context, like
/// [`Runtime::block_on`] does. The blocking surface is meant for
/// thread-per-connection embeddings.
pub fn block_on<F: Future>(future: F) -> F::Output {
    runtime().block_on(future)
}

#[cfg(test)]
mod test {
    use super::block_on;

    #[test]
    fn drives_to_completion() {
        assert_eq!(block_on(async { 21 * 2 }), 42);
    }

    #[test]
    fn timers_run_on_the_shared_executor() {
        block_on(async { tokio::time::sleep(std::time::Duration::from_millis(1)).await });
    }
}
