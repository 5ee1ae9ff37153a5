use std::fmt;
use std::sync::Arc;

use crate::order::ExecutionOrder;

/// Predicate deciding whether an implementation is eligible for a context.
///
/// Filters are evaluated against the live context on every dispatch and are
/// never cached. A filter that panics counts as rejecting the context.
pub type ServiceFilter<C> = Arc<dyn Fn(&C) -> bool + Send + Sync>;

/// Wrap a closure as a [`ServiceFilter`].
pub fn filter<C, F>(predicate: F) -> ServiceFilter<C>
where
    F: Fn(&C) -> bool + Send + Sync + 'static,
{
    Arc::new(predicate)
}

/// Nominal key naming a family of interchangeable implementations.
///
/// Implemented by a zero-sized marker type chosen by the host. The associated
/// types fix the input and output shape shared by every implementation
/// registered under the key.
///
/// ```
/// use switchyard_core::ServiceType;
///
/// struct Greeting;
///
/// impl ServiceType for Greeting {
///     type Context = String;
///     type Result = String;
///     const NAME: &'static str = "greeting";
/// }
/// ```
pub trait ServiceType: Send + Sync + 'static {
    /// Request value handed to every implementation.
    type Context: Send + Sync + 'static;
    /// Value produced by an implementation that answers the request.
    type Result: Send + 'static;
    /// Human-readable name used in errors, logs, and introspection.
    const NAME: &'static str;
}

/// One concrete handler for a service type.
///
/// `handle` returns `Ok(Some(_))` to answer the request, `Ok(None)` to pass it
/// on to the next eligible implementation, and `Err(_)` on failure. Failures
/// (and panics) are contained by the dispatcher and treated as `Ok(None)`.
pub trait Service<C, R>: Send + Sync + 'static {
    /// Produce a result for `context`, or signal that there is none.
    ///
    /// # Errors
    ///
    /// Any error is reported by the dispatcher and the next implementation is tried.
    fn handle(&self, context: &C) -> anyhow::Result<Option<R>>;

    /// Declared priority class of this implementation.
    fn order(&self) -> ExecutionOrder {
        ExecutionOrder::Soon
    }

    /// Name identifying this implementation in logs and introspection.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

// ---------------------------------------------------------------------------
// ServiceFn
// ---------------------------------------------------------------------------

/// Closure adapter: turns a function reference into a [`Service`].
pub struct ServiceFn<F> {
    order: ExecutionOrder,
    name: &'static str,
    handler: F,
}

impl<F> ServiceFn<F> {
    /// Adapt `handler` with the given declared order.
    pub fn new(order: ExecutionOrder, handler: F) -> Self {
        Self {
            order,
            name: std::any::type_name::<F>(),
            handler,
        }
    }

    /// Replace the generated name with a readable one.
    #[must_use]
    pub fn named(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }
}

impl<F> fmt::Debug for ServiceFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceFn")
            .field("order", &self.order)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl<C, R, F> Service<C, R> for ServiceFn<F>
where
    F: Fn(&C) -> anyhow::Result<Option<R>> + Send + Sync + 'static,
    C: 'static,
    R: 'static,
{
    fn handle(&self, context: &C) -> anyhow::Result<Option<R>> {
        (self.handler)(context)
    }

    fn order(&self) -> ExecutionOrder {
        self.order
    }

    fn name(&self) -> &str {
        self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    impl Service<String, String> for Echo {
        fn handle(&self, context: &String) -> anyhow::Result<Option<String>> {
            Ok(Some(context.clone()))
        }
    }

    #[test]
    fn trait_defaults() {
        let echo = Echo;
        assert_eq!(Service::<String, String>::order(&echo), ExecutionOrder::Soon);
        assert!(Service::<String, String>::name(&echo).ends_with("Echo"));
        assert_eq!(echo.handle(&"hi".to_string()).unwrap(), Some("hi".to_string()));
    }

    #[test]
    fn service_fn_forwards_to_closure() {
        let svc = ServiceFn::new(ExecutionOrder::Late, |n: &u32| -> anyhow::Result<Option<u32>> {
            Ok(Some(n * 2))
        })
        .named("double");
        assert_eq!(Service::<u32, u32>::handle(&svc, &21).unwrap(), Some(42));
        assert_eq!(Service::<u32, u32>::order(&svc), ExecutionOrder::Late);
        assert_eq!(Service::<u32, u32>::name(&svc), "double");
    }

    #[test]
    fn service_fn_propagates_errors() {
        let svc = ServiceFn::new(ExecutionOrder::First, |_: &u32| -> anyhow::Result<Option<u32>> {
            anyhow::bail!("broken")
        });
        assert!(Service::<u32, u32>::handle(&svc, &1).is_err());
    }

    #[test]
    fn filter_wraps_closure() {
        let vip = filter(|ctx: &String| ctx == "VIP");
        assert!(vip(&"VIP".to_string()));
        assert!(!vip(&"guest".to_string()));
    }
}
