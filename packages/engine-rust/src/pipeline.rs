//! The service pipeline: registry of service types and entry point for dispatch.

use std::any::{Any, TypeId};
use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::stream::{self, StreamExt};
use parking_lot::{Mutex, RwLock};
use switchyard_core::{ChunkedRequest, Service, ServiceFilter, ServiceType};

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::executor::{Executor, InlineExecutor};
use crate::methods::{MethodSet, ServiceHost};
use crate::pump::{walk, ServicePump};
use crate::repository::{ImplementationInfo, ServiceRepository, SharedService};

// ---------------------------------------------------------------------------
// ServicePipeline
// ---------------------------------------------------------------------------

/// Registry of service types and the entry point for dispatch.
///
/// Provides typed access to one [`ServiceRepository`] per registered
/// [`ServiceType`], keyed by the marker's `TypeId`:
/// - **Registration** takes the pipeline-wide lock, so duplicate checks and
///   inserts are atomic with respect to each other
/// - **Dispatch** never takes that lock; a pump sees the repository snapshot
///   that was current when it was created
pub struct ServicePipeline {
    /// Type-based lookup: marker `TypeId` -> `Arc<ServiceRepository<S>>`.
    repositories: DashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    /// Service type names in registration order.
    recognized: RwLock<Vec<&'static str>>,
    /// Serializes every mutating call.
    registration: Mutex<()>,
    executor: Arc<dyn Executor>,
    config: Arc<PipelineConfig>,
    label: Arc<str>,
}

impl ServicePipeline {
    /// Start building a pipeline.
    #[must_use]
    pub fn builder() -> ServicePipelineBuilder {
        ServicePipelineBuilder::default()
    }

    /// A pipeline with the default configuration and an inline executor.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Register a service type with its mandatory default implementation.
    ///
    /// The default is never filtered out and is always tried last.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::DuplicateServiceType`] if `S` is already
    /// registered; existing state is left untouched.
    pub fn register_service_type<S, I>(&self, default_implementation: I) -> Result<&Self, PipelineError>
    where
        S: ServiceType,
        I: Service<S::Context, S::Result>,
    {
        self.register_shared_service_type::<S>(Arc::new(default_implementation))
    }

    /// Like [`register_service_type`](Self::register_service_type), for an
    /// implementation the host keeps a shared handle to.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::DuplicateServiceType`] if `S` is already registered.
    pub fn register_shared_service_type<S: ServiceType>(
        &self,
        default_implementation: SharedService<S>,
    ) -> Result<&Self, PipelineError> {
        let _guard = self.registration.lock();
        let key = TypeId::of::<S>();
        if self.repositories.contains_key(&key) {
            return Err(PipelineError::DuplicateServiceType { name: S::NAME });
        }

        let repository: Arc<ServiceRepository<S>> =
            Arc::new(ServiceRepository::new(default_implementation));
        self.repositories.insert(key, repository);
        self.recognized.write().push(S::NAME);

        tracing::info!(pipeline = %self.label, service = S::NAME, "registered service type");
        Ok(self)
    }

    /// Register an additional implementation for a registered service type.
    ///
    /// The implementation is placed at its declared [`Service::order`] and is
    /// only eligible for contexts accepted by every filter.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::UnregisteredServiceType`] if `S` was never registered.
    pub fn register_service_implementation<S, I>(
        &self,
        implementation: I,
        filters: impl IntoIterator<Item = ServiceFilter<S::Context>>,
    ) -> Result<&Self, PipelineError>
    where
        S: ServiceType,
        I: Service<S::Context, S::Result>,
    {
        self.register_shared_implementation::<S>(Arc::new(implementation), filters)
    }

    /// Like [`register_service_implementation`](Self::register_service_implementation),
    /// for an implementation the host keeps a shared handle to.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::UnregisteredServiceType`] if `S` was never
    /// registered, or [`PipelineError::DuplicateImplementation`] if this shared
    /// instance is already registered for `S`.
    pub fn register_shared_implementation<S: ServiceType>(
        &self,
        implementation: SharedService<S>,
        filters: impl IntoIterator<Item = ServiceFilter<S::Context>>,
    ) -> Result<&Self, PipelineError> {
        let _guard = self.registration.lock();
        self.repository::<S>()?
            .register_implementation(implementation, filters.into_iter().collect())?;
        Ok(self)
    }

    /// Register every handler method a host object enumerates.
    ///
    /// Every method is checked before anything is registered, so a host
    /// naming an unknown type, or a host instance whose methods are already
    /// registered, registers nothing.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::UnregisteredServiceType`] for the first
    /// targeted type that is not registered, or
    /// [`PipelineError::DuplicateImplementation`] if a method of this host
    /// instance is already registered for its type.
    pub fn register_methods<H: ServiceHost>(&self, host: Arc<H>) -> Result<&Self, PipelineError> {
        let mut methods = MethodSet::new();
        H::methods(&mut methods);

        let _guard = self.registration.lock();
        methods.check_all(&host, self)?;

        let count = methods.len();
        methods.bind_all(&host, self)?;
        tracing::info!(
            pipeline = %self.label,
            host = std::any::type_name::<H>(),
            methods = count,
            "registered host methods"
        );
        Ok(self)
    }

    /// Bind a context to service type `S` for dispatch.
    ///
    /// The returned pump dispatches against the implementations registered
    /// at this moment.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::UnregisteredServiceType`] if `S` was never registered.
    pub fn pump<S: ServiceType>(&self, context: S::Context) -> Result<ServicePump<S>, PipelineError> {
        let repository = self.repository::<S>()?;
        Ok(ServicePump::new(
            context,
            repository.snapshot(),
            Arc::clone(&self.executor),
            Arc::clone(&self.label),
        ))
    }

    /// Dispatch every remaining context of `batch` on the calling thread.
    ///
    /// Each distinct context is dispatched once and its result is stored into
    /// the batch as soon as its chain completes. Contexts whose chain is
    /// exhausted stay in `remaining()`. Returns the number of results stored
    /// by this call.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::UnregisteredServiceType`] if `S` was never registered.
    pub fn pump_batch<S>(
        &self,
        batch: &ChunkedRequest<S::Context, S::Result>,
    ) -> Result<usize, PipelineError>
    where
        S: ServiceType,
        S::Context: Clone + Eq + Hash,
    {
        let snapshot = self.repository::<S>()?.snapshot();
        let mut stored = 0;
        for context in distinct_pending(batch) {
            if let Some(result) = walk(&snapshot, &context, &self.label).into_result() {
                batch.store_result(context, result);
                stored += 1;
            }
        }
        tracing::debug!(service = S::NAME, stored, "batch pass finished");
        Ok(stored)
    }

    /// Dispatch every remaining context of `batch` through the executor.
    ///
    /// Each distinct context is dispatched once. At most
    /// [`PipelineConfig::max_batch_in_flight`] pumps are outstanding at once.
    /// Resolves to the number of results stored by this call.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::UnregisteredServiceType`] if `S` was never registered.
    pub async fn pump_batch_async<S>(
        &self,
        batch: &ChunkedRequest<S::Context, S::Result>,
    ) -> Result<usize, PipelineError>
    where
        S: ServiceType,
        S::Context: Clone + Eq + Hash,
    {
        let snapshot = self.repository::<S>()?.snapshot();
        let pending = distinct_pending(batch);

        let mut completions = stream::iter(pending)
            .map(|context| {
                let handle = ServicePump::<S>::new(
                    context.clone(),
                    Arc::clone(&snapshot),
                    Arc::clone(&self.executor),
                    Arc::clone(&self.label),
                )
                .result_async();
                async move { (context, handle.await) }
            })
            .buffer_unordered(self.config.batch_limit());

        let mut stored = 0;
        while let Some((context, result)) = completions.next().await {
            if let Some(result) = result {
                batch.store_result(context, result);
                stored += 1;
            }
        }
        tracing::debug!(service = S::NAME, stored, "async batch pass finished");
        Ok(stored)
    }

    /// Names of all registered service types, in registration order.
    pub fn recognized_types(&self) -> Vec<&'static str> {
        self.recognized.read().clone()
    }

    /// Whether service type `S` is registered.
    pub fn is_registered<S: ServiceType>(&self) -> bool {
        self.repositories.contains_key(&TypeId::of::<S>())
    }

    /// Implementations of `S` in the order a dispatch would try them.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::UnregisteredServiceType`] if `S` was never registered.
    pub fn implementations_of<S: ServiceType>(&self) -> Result<Vec<ImplementationInfo>, PipelineError> {
        Ok(self.repository::<S>()?.implementations())
    }

    /// The execution facility used by asynchronous pumps.
    pub fn executor(&self) -> &Arc<dyn Executor> {
        &self.executor
    }

    /// Configuration this pipeline was built with.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Typed access to the repository of `S`.
    pub(crate) fn repository<S: ServiceType>(&self) -> Result<Arc<ServiceRepository<S>>, PipelineError> {
        self.repositories
            .get(&TypeId::of::<S>())
            .and_then(|entry| entry.value().clone().downcast::<ServiceRepository<S>>().ok())
            .ok_or(PipelineError::UnregisteredServiceType { name: S::NAME })
    }
}

/// Remaining contexts of `batch`, each listed once.
fn distinct_pending<C, R>(batch: &ChunkedRequest<C, R>) -> Vec<C>
where
    C: Clone + Eq + Hash,
{
    let mut seen = HashSet::new();
    batch
        .remaining()
        .into_iter()
        .filter(|context| seen.insert(context.clone()))
        .collect()
}

impl Default for ServicePipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ServicePipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServicePipeline")
            .field("name", &self.label)
            .field("types", &*self.recognized.read())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// ServicePipelineBuilder
// ---------------------------------------------------------------------------

/// Builder for [`ServicePipeline`].
#[derive(Default)]
pub struct ServicePipelineBuilder {
    executor: Option<Arc<dyn Executor>>,
    config: PipelineConfig,
}

impl ServicePipelineBuilder {
    /// Execution facility for asynchronous pumps. Defaults to [`InlineExecutor`].
    #[must_use]
    pub fn with_executor(mut self, executor: impl Executor) -> Self {
        self.executor = Some(Arc::new(executor));
        self
    }

    /// Replace the default [`PipelineConfig`].
    #[must_use]
    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Finish the pipeline. No service types are registered yet.
    #[must_use]
    pub fn build(self) -> ServicePipeline {
        let label: Arc<str> = Arc::from(self.config.name.as_str());
        ServicePipeline {
            repositories: DashMap::new(),
            recognized: RwLock::new(Vec::new()),
            registration: Mutex::new(()),
            executor: self
                .executor
                .unwrap_or_else(|| Arc::new(InlineExecutor) as Arc<dyn Executor>),
            config: Arc::new(self.config),
            label,
        }
    }
}

impl fmt::Debug for ServicePipelineBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServicePipelineBuilder")
            .field("custom_executor", &self.executor.is_some())
            .field("config", &self.config)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
