//! Tower adapter: dispatch one service type as a `tower::Service`.

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use switchyard_core::ServiceType;

use crate::error::PipelineError;
use crate::pipeline::ServicePipeline;
use crate::pump::ServicePump;

// ---------------------------------------------------------------------------
// PipelineService
// ---------------------------------------------------------------------------

/// `tower::Service` that dispatches each request through service type `S`.
///
/// Every call creates a pump and submits it to the pipeline's executor. The
/// response is the dispatch result, `None` when the chain was exhausted.
/// Requests for an unregistered type fail with
/// [`PipelineError::UnregisteredServiceType`].
pub struct PipelineService<S> {
    pipeline: Arc<ServicePipeline>,
    _service: PhantomData<fn() -> S>,
}

impl<S: ServiceType> PipelineService<S> {
    #[must_use]
    pub fn new(pipeline: Arc<ServicePipeline>) -> Self {
        Self {
            pipeline,
            _service: PhantomData,
        }
    }

    /// The pipeline requests are dispatched through.
    pub fn pipeline(&self) -> &Arc<ServicePipeline> {
        &self.pipeline
    }
}

impl<S> Clone for PipelineService<S> {
    fn clone(&self) -> Self {
        Self {
            pipeline: Arc::clone(&self.pipeline),
            _service: PhantomData,
        }
    }
}

impl<S: ServiceType> fmt::Debug for PipelineService<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineService")
            .field("service", &S::NAME)
            .field("pipeline", &self.pipeline)
            .finish()
    }
}

impl<S: ServiceType> tower::Service<S::Context> for PipelineService<S> {
    type Response = Option<S::Result>;
    type Error = PipelineError;
    type Future = Pin<Box<dyn Future<Output = Result<Option<S::Result>, PipelineError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, context: S::Context) -> Self::Future {
        let handle = self
            .pipeline
            .pump::<S>(context)
            .map(ServicePump::<S>::result_async);
        Box::pin(async move {
            match handle {
                Ok(handle) => Ok(handle.await),
                Err(error) => Err(error),
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use switchyard_core::{filter, ExecutionOrder, ServiceFn};
    use tower::ServiceExt;

    use super::*;
    use crate::executor::TokioExecutor;

    struct Greeting;

    impl ServiceType for Greeting {
        type Context = String;
        type Result = String;
        const NAME: &'static str = "greeting";
    }

    struct Farewell;

    impl ServiceType for Farewell {
        type Context = String;
        type Result = String;
        const NAME: &'static str = "farewell";
    }

    fn pipeline() -> Arc<ServicePipeline> {
        let pipeline = ServicePipeline::builder()
            .with_executor(TokioExecutor::try_current().unwrap())
            .build();
        pipeline
            .register_service_type::<Greeting, _>(ServiceFn::new(
                ExecutionOrder::Soon,
                |_: &String| -> anyhow::Result<Option<String>> { Ok(Some("hello".to_string())) },
            ))
            .unwrap()
            .register_service_implementation::<Greeting, _>(
                ServiceFn::new(ExecutionOrder::First, |ctx: &String| -> anyhow::Result<Option<String>> {
                    Ok(Some(format!("welcome back, {ctx}")))
                }),
                [filter(|ctx: &String| ctx == "VIP")],
            )
            .unwrap();
        Arc::new(pipeline)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn oneshot_dispatches_through_pipeline() {
        let service = PipelineService::<Greeting>::new(pipeline());

        let vip = service.clone().oneshot("VIP".to_string()).await.unwrap();
        assert_eq!(vip.as_deref(), Some("welcome back, VIP"));

        let guest = service.oneshot("guest".to_string()).await.unwrap();
        assert_eq!(guest.as_deref(), Some("hello"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn unregistered_type_fails_the_call() {
        let service = PipelineService::<Farewell>::new(pipeline());
        let err = service.oneshot("bye".to_string()).await.unwrap_err();
        assert_eq!(err, PipelineError::UnregisteredServiceType { name: "farewell" });
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn composes_with_service_ext() {
        let service = PipelineService::<Greeting>::new(pipeline())
            .map_response(|greeting: Option<String>| greeting.map(|g| g.len()));
        assert_eq!(service.oneshot("guest".to_string()).await.unwrap(), Some(5));
    }
}
