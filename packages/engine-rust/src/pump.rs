//! Dispatch pump: walks a service type's eligible implementations for one
//! context until one answers.
//!
//! A pump captures the repository snapshot when it is created. The walk
//! proceeds `CREATED -> TRYING(i) -> COMPLETED | EXHAUSTED`:
//!
//! 1. Candidates are taken lazily, in dispatch order, filtered against the context
//! 2. The first `Some` result completes the dispatch; later candidates never run
//! 3. `None`, an `Err`, or a panic moves on to the next candidate
//! 4. If the default (always last) also yields nothing, the pump is exhausted
//!
//! There is no timeout: an implementation that never returns blocks its pump.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use switchyard_core::ServiceType;
use tokio::sync::oneshot;
use tracing::info_span;

use crate::executor::Executor;
use crate::repository::{DispatchSnapshot, EligibleImplementations, ServiceWrapper};

// ---------------------------------------------------------------------------
// PumpOutcome
// ---------------------------------------------------------------------------

/// Terminal state of a single dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PumpOutcome<R> {
    /// An implementation produced a result.
    Completed {
        result: R,
        /// Number of implementations invoked, the answering one included.
        attempts: usize,
        /// Name of the implementation that answered.
        implementation: String,
    },
    /// Every eligible implementation, the default included, yielded nothing.
    Exhausted { attempts: usize },
}

impl<R> PumpOutcome<R> {
    /// The result, if the dispatch completed.
    pub fn into_result(self) -> Option<R> {
        match self {
            Self::Completed { result, .. } => Some(result),
            Self::Exhausted { .. } => None,
        }
    }

    /// Number of implementations invoked.
    pub fn attempts(&self) -> usize {
        match self {
            Self::Completed { attempts, .. } | Self::Exhausted { attempts } => *attempts,
        }
    }

    /// Whether an implementation produced a result.
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

// ---------------------------------------------------------------------------
// ServicePump
// ---------------------------------------------------------------------------

/// A dispatch bound to one service type and one context.
pub struct ServicePump<S: ServiceType> {
    context: S::Context,
    snapshot: DispatchSnapshot<S>,
    executor: Arc<dyn Executor>,
    pipeline: Arc<str>,
}

impl<S: ServiceType> ServicePump<S> {
    pub(crate) fn new(
        context: S::Context,
        snapshot: DispatchSnapshot<S>,
        executor: Arc<dyn Executor>,
        pipeline: Arc<str>,
    ) -> Self {
        Self {
            context,
            snapshot,
            executor,
            pipeline,
        }
    }

    /// The context this pump dispatches.
    pub fn context(&self) -> &S::Context {
        &self.context
    }

    /// Walk the chain on the calling thread and report how it ended.
    pub fn outcome(&self) -> PumpOutcome<S::Result> {
        walk(&self.snapshot, &self.context, &self.pipeline)
    }

    /// Walk the chain on the calling thread, blocking until it resolves.
    pub fn result(&self) -> Option<S::Result> {
        self.outcome().into_result()
    }

    /// Submit the chain walk to the pipeline's executor.
    ///
    /// Returns immediately; the handle resolves once the walk finishes on
    /// the executor.
    pub fn result_async(self) -> PumpHandle<S::Result> {
        let (tx, rx) = oneshot::channel();
        let Self {
            context,
            snapshot,
            executor,
            pipeline,
        } = self;

        executor.execute(Box::new(move || {
            let result = walk(&snapshot, &context, &pipeline).into_result();
            if tx.send(result).is_err() {
                tracing::trace!(service = S::NAME, "pump handle dropped before completion");
            }
        }));

        PumpHandle { rx }
    }
}

impl<S: ServiceType> fmt::Debug for ServicePump<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServicePump")
            .field("service", &S::NAME)
            .field("pipeline", &self.pipeline)
            .field("candidates", &self.snapshot.len())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// PumpHandle
// ---------------------------------------------------------------------------

/// Future-like handle to an asynchronous dispatch.
///
/// Resolves to the dispatch result, or `None` when the chain was exhausted
/// or the executor dropped the task without running it.
#[derive(Debug)]
pub struct PumpHandle<R> {
    rx: oneshot::Receiver<Option<R>>,
}

impl<R> PumpHandle<R> {
    /// Block the current thread until the dispatch resolves.
    ///
    /// Must not be called from within an async execution context.
    pub fn wait(self) -> Option<R> {
        self.rx.blocking_recv().unwrap_or_else(|_| {
            tracing::warn!("pump task was dropped by the executor without running");
            None
        })
    }
}

impl<R> Future for PumpHandle<R> {
    type Output = Option<R>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.get_mut().rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => {
                tracing::warn!("pump task was dropped by the executor without running");
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

// ---------------------------------------------------------------------------
// Chain walk
// ---------------------------------------------------------------------------

pub(crate) fn walk<S: ServiceType>(
    snapshot: &DispatchSnapshot<S>,
    context: &S::Context,
    pipeline: &str,
) -> PumpOutcome<S::Result> {
    let span = info_span!("pump", pipeline = pipeline, service = S::NAME);
    let _entered = span.enter();

    let mut attempts = 0;
    for wrapper in EligibleImplementations::new(Arc::clone(snapshot), context) {
        attempts += 1;
        if let Some(result) = invoke(&wrapper, context, attempts) {
            tracing::debug!(
                implementation = wrapper.name(),
                attempt = attempts,
                "dispatch completed"
            );
            return PumpOutcome::Completed {
                result,
                attempts,
                implementation: wrapper.name().to_string(),
            };
        }
    }

    tracing::debug!(attempts, "dispatch exhausted without a result");
    PumpOutcome::Exhausted { attempts }
}

/// Invoke one implementation, containing errors and panics as "no result".
fn invoke<S: ServiceType>(
    wrapper: &ServiceWrapper<S>,
    context: &S::Context,
    attempt: usize,
) -> Option<S::Result> {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| wrapper.implementation().handle(context)));
    match outcome {
        Ok(Ok(Some(result))) => Some(result),
        Ok(Ok(None)) => {
            tracing::trace!(implementation = wrapper.name(), attempt, "no result, trying next");
            None
        }
        Ok(Err(error)) => {
            tracing::warn!(
                service = S::NAME,
                implementation = wrapper.name(),
                order = %wrapper.order(),
                attempt,
                error = ?error,
                "service implementation failed, trying next"
            );
            None
        }
        Err(payload) => {
            tracing::warn!(
                service = S::NAME,
                implementation = wrapper.name(),
                order = %wrapper.order(),
                attempt,
                panic = panic_message(&*payload),
                "service implementation panicked, trying next"
            );
            None
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
