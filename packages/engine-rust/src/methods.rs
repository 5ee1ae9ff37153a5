//! Explicit method registration for host objects.
//!
//! A host type lists its handler methods once in [`ServiceHost::methods`].
//! Each entry is adapted into a [`MethodService`] that forwards to the method
//! on a shared host instance. Failures inside the method are reported and
//! turned into "no result" by the adapter itself.

use std::any::TypeId;
use std::collections::HashSet;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use switchyard_core::{ExecutionOrder, Service, ServiceType};

use crate::error::PipelineError;
use crate::pipeline::ServicePipeline;
use crate::pump::panic_message;

/// Handler method signature for service type `S` on host `H`.
pub type MethodFn<H, S> = fn(
    &H,
    &<S as ServiceType>::Context,
) -> anyhow::Result<Option<<S as ServiceType>::Result>>;

// ---------------------------------------------------------------------------
// ServiceHost trait
// ---------------------------------------------------------------------------

/// A host object that provides service implementations as methods.
///
/// ```
/// use std::sync::Arc;
/// use switchyard::{MethodSet, ServiceHost, ServicePipeline, ServiceType, ExecutionOrder, ServiceFn};
///
/// struct Greeting;
///
/// impl ServiceType for Greeting {
///     type Context = String;
///     type Result = String;
///     const NAME: &'static str = "greeting";
/// }
///
/// struct Greeter {
///     salutation: String,
/// }
///
/// impl Greeter {
///     fn greet(&self, name: &String) -> anyhow::Result<Option<String>> {
///         Ok(Some(format!("{} {name}", self.salutation)))
///     }
/// }
///
/// impl ServiceHost for Greeter {
///     fn methods(methods: &mut MethodSet<Self>) {
///         methods.ordered_method::<Greeting>("greet", ExecutionOrder::First, Self::greet);
///     }
/// }
///
/// let pipeline = ServicePipeline::new();
/// pipeline
///     .register_service_type::<Greeting, _>(ServiceFn::new(
///         ExecutionOrder::Soon,
///         |_: &String| -> anyhow::Result<Option<String>> { Ok(None) },
///     ))
///     .unwrap()
///     .register_methods(Arc::new(Greeter { salutation: "hi".into() }))
///     .unwrap();
///
/// let greeting = pipeline.pump::<Greeting>("ana".into()).unwrap().result();
/// assert_eq!(greeting.as_deref(), Some("hi ana"));
/// ```
pub trait ServiceHost: Send + Sync + Sized + 'static {
    /// Enumerate the handler methods of this host.
    fn methods(methods: &mut MethodSet<Self>);
}

// ---------------------------------------------------------------------------
// MethodKey
// ---------------------------------------------------------------------------

/// Identity of one method on one host instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct MethodKey {
    host: usize,
    method: &'static str,
}

impl MethodKey {
    pub(crate) fn of<H>(host: &Arc<H>, method: &'static str) -> Self {
        Self {
            host: Arc::as_ptr(host).cast::<()>() as usize,
            method,
        }
    }
}

// ---------------------------------------------------------------------------
// MethodSet
// ---------------------------------------------------------------------------

type Binder<H> = Box<dyn FnOnce(&Arc<H>, &ServicePipeline) -> Result<(), PipelineError>>;
type Check<H> = Box<dyn Fn(&Arc<H>, &ServicePipeline) -> Result<(), PipelineError>>;

struct MethodEntry<H> {
    type_id: TypeId,
    service: &'static str,
    method: &'static str,
    check: Check<H>,
    bind: Binder<H>,
}

/// Handler methods collected from a [`ServiceHost`].
pub struct MethodSet<H> {
    entries: Vec<MethodEntry<H>>,
}

impl<H: ServiceHost> MethodSet<H> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Add a method with no declared order; it runs at [`ExecutionOrder::Last`].
    pub fn method<S: ServiceType>(&mut self, name: &'static str, method: MethodFn<H, S>) -> &mut Self {
        self.ordered_method::<S>(name, ExecutionOrder::Last, method)
    }

    /// Add a method with an explicit order.
    pub fn ordered_method<S: ServiceType>(
        &mut self,
        name: &'static str,
        order: ExecutionOrder,
        method: MethodFn<H, S>,
    ) -> &mut Self {
        self.entries.push(MethodEntry {
            type_id: TypeId::of::<S>(),
            service: S::NAME,
            method: name,
            check: Box::new(move |host: &Arc<H>, pipeline: &ServicePipeline| {
                if pipeline.repository::<S>()?.contains_method(MethodKey::of(host, name)) {
                    return Err(duplicate_method::<H, S>(name));
                }
                Ok(())
            }),
            bind: Box::new(move |host: &Arc<H>, pipeline: &ServicePipeline| {
                let adapter: MethodService<H, S> = MethodService::new(Arc::clone(host), name, order, method);
                pipeline
                    .repository::<S>()?
                    .register_method(Arc::new(adapter), MethodKey::of(host, name))
            }),
        });
        self
    }

    /// Number of collected methods.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Verify every collected method can be registered for `host`.
    ///
    /// Fails on the first method whose service type is unknown, or that is
    /// already registered for this host instance (including twice in this set).
    pub(crate) fn check_all(&self, host: &Arc<H>, pipeline: &ServicePipeline) -> Result<(), PipelineError> {
        let mut seen = HashSet::with_capacity(self.entries.len());
        for entry in &self.entries {
            (entry.check)(host, pipeline)?;
            if !seen.insert((entry.type_id, entry.method)) {
                return Err(PipelineError::DuplicateImplementation {
                    service: entry.service,
                    implementation: format!("{}::{}", std::any::type_name::<H>(), entry.method),
                });
            }
        }
        Ok(())
    }

    /// Register every collected method. The caller holds the registration lock.
    pub(crate) fn bind_all(self, host: &Arc<H>, pipeline: &ServicePipeline) -> Result<(), PipelineError> {
        for entry in self.entries {
            (entry.bind)(host, pipeline)?;
        }
        Ok(())
    }
}

fn duplicate_method<H, S: ServiceType>(method: &'static str) -> PipelineError {
    PipelineError::DuplicateImplementation {
        service: S::NAME,
        implementation: format!("{}::{method}", std::any::type_name::<H>()),
    }
}

// ---------------------------------------------------------------------------
// MethodService
// ---------------------------------------------------------------------------

/// Adapter forwarding a [`Service`] call to a method on a shared host.
pub struct MethodService<H, S: ServiceType> {
    host: Arc<H>,
    method_name: &'static str,
    qualified_name: String,
    order: ExecutionOrder,
    method: MethodFn<H, S>,
}

impl<H, S> MethodService<H, S>
where
    H: Send + Sync + 'static,
    S: ServiceType,
{
    pub fn new(host: Arc<H>, method_name: &'static str, order: ExecutionOrder, method: MethodFn<H, S>) -> Self {
        Self {
            host,
            method_name,
            qualified_name: format!("{}::{method_name}", std::any::type_name::<H>()),
            order,
            method,
        }
    }
}

impl<H, S> Service<S::Context, S::Result> for MethodService<H, S>
where
    H: Send + Sync + 'static,
    S: ServiceType,
{
    fn handle(&self, context: &S::Context) -> anyhow::Result<Option<S::Result>> {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| (self.method)(&self.host, context)));
        match outcome {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(error)) => {
                tracing::error!(
                    service = S::NAME,
                    method = self.method_name,
                    host = std::any::type_name::<H>(),
                    error = ?error,
                    "failed to call method service implementation"
                );
                Ok(None)
            }
            Err(payload) => {
                tracing::error!(
                    service = S::NAME,
                    method = self.method_name,
                    host = std::any::type_name::<H>(),
                    panic = panic_message(&*payload),
                    "method service implementation panicked"
                );
                Ok(None)
            }
        }
    }

    fn order(&self) -> ExecutionOrder {
        self.order
    }

    fn name(&self) -> &str {
        &self.qualified_name
    }
}

impl<H, S: ServiceType> fmt::Debug for MethodService<H, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodService")
            .field("name", &self.qualified_name)
            .field("order", &self.order)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
