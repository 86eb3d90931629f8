//! Process-wide tokio runtime behind the blocking [`crate::client`] API.
//!
//! Created on first use and kept for the life of the process, so pooled
//! connections opened by one blocking call stay usable by the next.

use std::future::Future;
use std::sync::OnceLock;

use tokio::runtime::Runtime;

static RUNTIME: OnceLock<Runtime> = OnceLock::new();

/// Get (or build) the shared runtime.
///
/// Worker count defaults to the number of cores; set
/// `RESPLINK_RUNTIME_THREADS` to override it.
pub fn get_runtime() -> &'static Runtime {
    RUNTIME.get_or_init(|| {
        let mut builder = tokio::runtime::Builder::new_multi_thread();
        builder.enable_all();

        if let Some(n) = std::env::var("RESPLINK_RUNTIME_THREADS")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|n| *n > 0)
        {
            builder.worker_threads(n);
        }

        match builder.thread_name("resplink-rt").build() {
            Ok(rt) => rt,
            // get_or_init cannot fail; without a runtime nothing else works
            Err(e) => panic!("resplink: failed to create tokio runtime: {e}"),
        }
    })
}

/// Drive `future` to completion on the shared runtime.
///
/// Panics when called from inside an async context.
pub fn block_on<F: Future>(future: F) -> F::Output {
    get_runtime().block_on(future)
}

/// Spawn `future` onto the shared runtime.
pub fn spawn<F>(future: F) -> tokio::task::JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    get_runtime().spawn(future)
}

// ── Tests ──────────────────────────────────────────────────────────
