//! Execution facilities for asynchronous pumps.
//!
//! The pipeline never owns a thread pool. Hosts hand it an `Executor` and
//! asynchronous dispatches submit their chain walk to it as a single task.

use std::fmt;
use std::sync::Arc;

use tokio::runtime::Handle;

/// Unit of work submitted to an executor.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

// ---------------------------------------------------------------------------
// Executor trait
// ---------------------------------------------------------------------------

/// Task-submission abstraction supplied by the host.
///
/// An executor may run the task immediately, later, or on another thread. If
/// it drops the task without running it, any pump handle waiting on that task
/// resolves to "no result".
pub trait Executor: Send + Sync + 'static {
    /// Submit `task` for execution.
    fn execute(&self, task: Task);
}

impl<E: Executor + ?Sized> Executor for Arc<E> {
    fn execute(&self, task: Task) {
        (**self).execute(task);
    }
}

// ---------------------------------------------------------------------------
// InlineExecutor
// ---------------------------------------------------------------------------

/// Runs every task on the submitting thread before `execute` returns.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn execute(&self, task: Task) {
        task();
    }
}

// ---------------------------------------------------------------------------
// ThreadExecutor
// ---------------------------------------------------------------------------

/// Spawns one named OS thread per task.
#[derive(Debug, Clone)]
pub struct ThreadExecutor {
    thread_name: String,
}

impl ThreadExecutor {
    /// Create an executor whose threads carry the given name.
    #[must_use]
    pub fn new(thread_name: impl Into<String>) -> Self {
        Self {
            thread_name: thread_name.into(),
        }
    }
}

impl Default for ThreadExecutor {
    fn default() -> Self {
        Self::new("switchyard-pump")
    }
}

impl Executor for ThreadExecutor {
    fn execute(&self, task: Task) {
        let spawned = std::thread::Builder::new()
            .name(self.thread_name.clone())
            .spawn(task);
        if let Err(error) = spawned {
            tracing::error!(thread = %self.thread_name, error = %error, "failed to spawn pump thread");
        }
    }
}

// ---------------------------------------------------------------------------
// TokioExecutor
// ---------------------------------------------------------------------------

/// Runs tasks on a tokio runtime's blocking pool.
///
/// Implementations are synchronous and may block, so tasks go through
/// `spawn_blocking` rather than onto the async worker threads.
#[derive(Clone)]
pub struct TokioExecutor {
    handle: Handle,
}

impl TokioExecutor {
    /// Create an executor bound to the given runtime handle.
    #[must_use]
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Bind to the runtime the caller is currently running in, if any.
    #[must_use]
    pub fn try_current() -> Option<Self> {
        Handle::try_current().ok().map(Self::new)
    }
}

impl fmt::Debug for TokioExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokioExecutor")
            .field("runtime", &self.handle.runtime_flavor())
            .finish()
    }
}

impl Executor for TokioExecutor {
    fn execute(&self, task: Task) {
        // Detached: completion is observed through the pump handle.
        drop(self.handle.spawn_blocking(task));
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
