//! Per-type implementation storage with priority ordering and filter evaluation.

use std::cmp::Ordering;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde::Serialize;
use switchyard_core::{ExecutionOrder, Service, ServiceFilter, ServiceType};

use crate::error::PipelineError;
use crate::methods::MethodKey;
use crate::pump::panic_message;

/// Shared handle to an implementation of service type `S`.
pub type SharedService<S> =
    Arc<dyn Service<<S as ServiceType>::Context, <S as ServiceType>::Result>>;

/// Wrappers of one service type in dispatch order, default last.
pub type DispatchSnapshot<S> = Arc<Vec<Arc<ServiceWrapper<S>>>>;

// ---------------------------------------------------------------------------
// ServiceWrapper
// ---------------------------------------------------------------------------

/// One registered implementation together with its priority and filters.
///
/// Immutable once created. Equality is the identity of the wrapped
/// implementation; ordering is dispatch order (priority class, then
/// registration sequence, with the default pinned after everything else).
pub struct ServiceWrapper<S: ServiceType> {
    implementation: SharedService<S>,
    order: ExecutionOrder,
    filters: Vec<ServiceFilter<S::Context>>,
    is_default: bool,
    sequence: u64,
    /// Host method this wrapper adapts, if it came from `register_methods`.
    method: Option<MethodKey>,
}

impl<S: ServiceType> ServiceWrapper<S> {
    fn new(
        implementation: SharedService<S>,
        filters: Vec<ServiceFilter<S::Context>>,
        is_default: bool,
        sequence: u64,
    ) -> Self {
        let order = implementation.order();
        Self {
            implementation,
            order,
            filters,
            is_default,
            sequence,
            method: None,
        }
    }

    /// `true` iff every filter accepts `context`. No filters always matches.
    ///
    /// A filter that panics rejects the context.
    pub fn matches(&self, context: &S::Context) -> bool {
        self.filters.iter().all(|filter| {
            panic::catch_unwind(AssertUnwindSafe(|| filter(context))).unwrap_or_else(|payload| {
                tracing::warn!(
                    service = S::NAME,
                    implementation = self.name(),
                    panic = panic_message(&*payload),
                    "service filter panicked, skipping implementation"
                );
                false
            })
        })
    }

    /// The wrapped implementation.
    pub fn implementation(&self) -> &SharedService<S> {
        &self.implementation
    }

    /// Declared priority class, captured at registration.
    pub fn order(&self) -> ExecutionOrder {
        self.order
    }

    /// Whether this is the type's unconditional last-resort implementation.
    pub fn is_default(&self) -> bool {
        self.is_default
    }

    /// Name of the wrapped implementation.
    pub fn name(&self) -> &str {
        self.implementation.name()
    }

    fn adapts(&self, key: MethodKey) -> bool {
        self.method == Some(key)
    }

    fn wraps(&self, implementation: &SharedService<S>) -> bool {
        std::ptr::addr_eq(
            Arc::as_ptr(&self.implementation),
            Arc::as_ptr(implementation),
        )
    }

    fn dispatch_key(&self) -> (bool, ExecutionOrder, u64) {
        (self.is_default, self.order, self.sequence)
    }
}

impl<S: ServiceType> PartialEq for ServiceWrapper<S> {
    fn eq(&self, other: &Self) -> bool {
        self.wraps(&other.implementation) || other.method.is_some_and(|key| self.adapts(key))
    }
}

impl<S: ServiceType> Eq for ServiceWrapper<S> {}

impl<S: ServiceType> PartialOrd for ServiceWrapper<S> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<S: ServiceType> Ord for ServiceWrapper<S> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.dispatch_key().cmp(&other.dispatch_key())
    }
}

impl<S: ServiceType> fmt::Debug for ServiceWrapper<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceWrapper")
            .field("service", &S::NAME)
            .field("implementation", &self.name())
            .field("order", &self.order)
            .field("filters", &self.filters.len())
            .field("is_default", &self.is_default)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ImplementationInfo
// ---------------------------------------------------------------------------

/// Read-only description of a registered implementation, for introspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImplementationInfo {
    pub name: String,
    pub order: ExecutionOrder,
    pub is_default: bool,
    pub filters: usize,
}

impl<S: ServiceType> From<&ServiceWrapper<S>> for ImplementationInfo {
    fn from(wrapper: &ServiceWrapper<S>) -> Self {
        Self {
            name: wrapper.name().to_string(),
            order: wrapper.order,
            is_default: wrapper.is_default,
            filters: wrapper.filters.len(),
        }
    }
}

// ---------------------------------------------------------------------------
// ServiceRepository
// ---------------------------------------------------------------------------

/// All implementations registered for one service type.
///
/// Writers serialize on an internal lock and publish a freshly sorted
/// snapshot after each registration. Readers load the current snapshot
/// without locking; a dispatch that already holds a snapshot does not see
/// registrations published after it.
pub struct ServiceRepository<S: ServiceType> {
    wrappers: ArcSwap<Vec<Arc<ServiceWrapper<S>>>>,
    /// Next registration sequence number. Held for the whole registration.
    next_sequence: Mutex<u64>,
}

impl<S: ServiceType> ServiceRepository<S> {
    /// Create the repository with its unconditional default implementation.
    pub fn new(default_implementation: SharedService<S>) -> Self {
        let wrapper = ServiceWrapper::new(default_implementation, Vec::new(), true, 0);
        tracing::debug!(
            service = S::NAME,
            implementation = wrapper.name(),
            "registered default implementation"
        );
        Self {
            wrappers: ArcSwap::from_pointee(vec![Arc::new(wrapper)]),
            next_sequence: Mutex::new(1),
        }
    }

    /// Add an implementation at its declared priority.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::DuplicateImplementation`] if this exact
    /// implementation (same shared instance) is already registered.
    pub fn register_implementation(
        &self,
        implementation: SharedService<S>,
        filters: Vec<ServiceFilter<S::Context>>,
    ) -> Result<(), PipelineError> {
        self.insert(implementation, filters, None)
    }

    /// Add the adapter for one host method.
    ///
    /// The same method of the same host instance is registered at most once.
    pub(crate) fn register_method(
        &self,
        implementation: SharedService<S>,
        key: MethodKey,
    ) -> Result<(), PipelineError> {
        self.insert(implementation, Vec::new(), Some(key))
    }

    /// Whether the given host method is already registered.
    pub(crate) fn contains_method(&self, key: MethodKey) -> bool {
        self.wrappers.load().iter().any(|existing| existing.adapts(key))
    }

    fn insert(
        &self,
        implementation: SharedService<S>,
        filters: Vec<ServiceFilter<S::Context>>,
        method: Option<MethodKey>,
    ) -> Result<(), PipelineError> {
        let mut next_sequence = self.next_sequence.lock();
        let current = self.wrappers.load_full();

        let duplicate = current.iter().any(|existing| {
            existing.wraps(&implementation) || method.is_some_and(|key| existing.adapts(key))
        });
        if duplicate {
            return Err(PipelineError::DuplicateImplementation {
                service: S::NAME,
                implementation: implementation.name().to_string(),
            });
        }

        let mut wrapper = ServiceWrapper::new(implementation, filters, false, *next_sequence);
        wrapper.method = method;
        let wrapper = Arc::new(wrapper);
        *next_sequence += 1;

        tracing::debug!(
            service = S::NAME,
            implementation = wrapper.name(),
            order = %wrapper.order(),
            filters = wrapper.filters.len(),
            "registered service implementation"
        );

        let mut next: Vec<Arc<ServiceWrapper<S>>> = current.to_vec();
        let position = next.partition_point(|existing| **existing < *wrapper);
        next.insert(position, wrapper);
        self.wrappers.store(Arc::new(next));
        Ok(())
    }

    /// Current dispatch-ordered wrappers, default last.
    pub fn snapshot(&self) -> DispatchSnapshot<S> {
        self.wrappers.load_full()
    }

    /// Wrappers eligible for `context`, lazily filtered in dispatch order.
    pub fn eligible_for<'a>(&self, context: &'a S::Context) -> EligibleImplementations<'a, S> {
        EligibleImplementations::new(self.snapshot(), context)
    }

    /// Every registered implementation in dispatch order.
    pub fn implementations(&self) -> Vec<ImplementationInfo> {
        self.wrappers
            .load()
            .iter()
            .map(|wrapper| ImplementationInfo::from(&**wrapper))
            .collect()
    }

    /// Number of registered implementations, default included.
    pub fn len(&self) -> usize {
        self.wrappers.load().len()
    }

    /// Always `false`: the default implementation is present from construction.
    pub fn is_empty(&self) -> bool {
        false
    }
}

impl<S: ServiceType> fmt::Debug for ServiceRepository<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRepository")
            .field("service", &S::NAME)
            .field("implementations", &self.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// EligibleImplementations
// ---------------------------------------------------------------------------

/// Lazy iterator over the wrappers whose filters accept one context.
///
/// Filters are evaluated only when the iterator reaches a wrapper, so a pump
/// that stops early never runs the filters of later candidates.
pub struct EligibleImplementations<'a, S: ServiceType> {
    snapshot: DispatchSnapshot<S>,
    context: &'a S::Context,
    position: usize,
}

impl<'a, S: ServiceType> EligibleImplementations<'a, S> {
    pub(crate) fn new(snapshot: DispatchSnapshot<S>, context: &'a S::Context) -> Self {
        Self {
            snapshot,
            context,
            position: 0,
        }
    }
}

impl<S: ServiceType> Iterator for EligibleImplementations<'_, S> {
    type Item = Arc<ServiceWrapper<S>>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(wrapper) = self.snapshot.get(self.position) {
            self.position += 1;
            if wrapper.matches(self.context) {
                return Some(Arc::clone(wrapper));
            }
            tracing::trace!(
                service = S::NAME,
                implementation = wrapper.name(),
                "filtered out"
            );
        }
        None
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};

    use proptest::prelude::*;
    use switchyard_core::{filter, ServiceFn};

    use super::*;

    struct Numbers;

    impl ServiceType for Numbers {
        type Context = u32;
        type Result = String;
        const NAME: &'static str = "numbers";
    }

    fn named(name: &'static str, order: ExecutionOrder) -> SharedService<Numbers> {
        Arc::new(
            ServiceFn::new(order, move |_: &u32| -> anyhow::Result<Option<String>> {
                Ok(Some(name.to_string()))
            })
            .named(name),
        )
    }

    fn names(repository: &ServiceRepository<Numbers>, context: u32) -> Vec<String> {
        repository
            .eligible_for(&context)
            .map(|wrapper| wrapper.name().to_string())
            .collect()
    }

    #[test]
    fn default_only_after_construction() {
        let repository = ServiceRepository::<Numbers>::new(named("default", ExecutionOrder::First));
        assert_eq!(repository.len(), 1);
        assert!(!repository.is_empty());
        assert_eq!(names(&repository, 0), vec!["default"]);
    }

    #[test]
    fn priority_order_with_default_last() {
        // The default declares First but is still pinned last.
        let repository = ServiceRepository::<Numbers>::new(named("default", ExecutionOrder::First));
        repository.register_implementation(named("late", ExecutionOrder::Late), Vec::new()).unwrap();
        repository.register_implementation(named("first", ExecutionOrder::First), Vec::new()).unwrap();
        repository.register_implementation(named("last", ExecutionOrder::Last), Vec::new()).unwrap();
        repository.register_implementation(named("soon", ExecutionOrder::Soon), Vec::new()).unwrap();

        assert_eq!(names(&repository, 0), vec!["first", "soon", "late", "last", "default"]);
    }

    #[test]
    fn equal_priority_keeps_registration_order() {
        let repository = ServiceRepository::<Numbers>::new(named("default", ExecutionOrder::Soon));
        repository.register_implementation(named("a", ExecutionOrder::Late), Vec::new()).unwrap();
        repository.register_implementation(named("b", ExecutionOrder::Late), Vec::new()).unwrap();
        repository.register_implementation(named("c", ExecutionOrder::Late), Vec::new()).unwrap();

        assert_eq!(names(&repository, 0), vec!["a", "b", "c", "default"]);
    }

    #[test]
    fn filters_exclude_non_matching_contexts() {
        let repository = ServiceRepository::<Numbers>::new(named("default", ExecutionOrder::Soon));
        repository
            .register_implementation(
                named("even", ExecutionOrder::First),
                vec![filter(|n: &u32| n % 2 == 0)],
            )
            .unwrap();
        repository
            .register_implementation(
                named("small-even", ExecutionOrder::Sooner),
                vec![filter(|n: &u32| n % 2 == 0), filter(|n: &u32| *n < 10)],
            )
            .unwrap();

        assert_eq!(names(&repository, 4), vec!["even", "small-even", "default"]);
        assert_eq!(names(&repository, 12), vec!["even", "default"]);
        assert_eq!(names(&repository, 3), vec!["default"]);
    }

    #[test]
    fn panicking_filter_rejects_the_context() {
        let repository = ServiceRepository::<Numbers>::new(named("default", ExecutionOrder::Soon));
        repository
            .register_implementation(
                named("fragile", ExecutionOrder::First),
                vec![filter(|n: &u32| {
                    assert!(*n != 13, "unlucky context");
                    true
                })],
            )
            .unwrap();

        assert_eq!(names(&repository, 13), vec!["default"]);
        assert_eq!(names(&repository, 7), vec!["fragile", "default"]);
    }

    #[test]
    fn host_method_registers_once() {
        let repository = ServiceRepository::<Numbers>::new(named("default", ExecutionOrder::Soon));
        let host = Arc::new(());
        let key = MethodKey::of(&host, "lookup");
        assert!(!repository.contains_method(key));

        repository.register_method(named("lookup", ExecutionOrder::Last), key).unwrap();
        assert!(repository.contains_method(key));

        let err = repository
            .register_method(named("lookup", ExecutionOrder::Last), key)
            .unwrap_err();
        assert!(matches!(err, PipelineError::DuplicateImplementation { service: "numbers", .. }));

        let other_host = Arc::new(());
        repository
            .register_method(named("lookup", ExecutionOrder::Last), MethodKey::of(&other_host, "lookup"))
            .unwrap();
        assert_eq!(repository.len(), 3);
    }

    #[test]
    fn filters_are_evaluated_lazily_and_per_call() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let repository = ServiceRepository::<Numbers>::new(named("default", ExecutionOrder::Soon));
        repository.register_implementation(named("first", ExecutionOrder::First), Vec::new()).unwrap();
        repository
            .register_implementation(
                named("counted", ExecutionOrder::Last),
                vec![filter(move |_: &u32| {
                    counter.fetch_add(1, AtomicOrdering::SeqCst);
                    true
                })],
            )
            .unwrap();

        // Taking only the first candidate never reaches the counted filter.
        let first = repository.eligible_for(&1).next().unwrap();
        assert_eq!(first.name(), "first");
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 0);

        names(&repository, 1);
        names(&repository, 1);
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 2);
    }

    #[test]
    fn same_instance_cannot_register_twice() {
        let repository = ServiceRepository::<Numbers>::new(named("default", ExecutionOrder::Soon));
        let shared = named("shared", ExecutionOrder::Late);
        repository.register_implementation(Arc::clone(&shared), Vec::new()).unwrap();

        let err = repository.register_implementation(shared, Vec::new()).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::DuplicateImplementation { service: "numbers", ref implementation }
                if implementation == "shared"
        ));
        assert_eq!(repository.len(), 2);
    }

    #[test]
    fn distinct_instances_of_same_type_are_distinct() {
        let repository = ServiceRepository::<Numbers>::new(named("default", ExecutionOrder::Soon));
        repository.register_implementation(named("twin", ExecutionOrder::Late), Vec::new()).unwrap();
        repository.register_implementation(named("twin", ExecutionOrder::Late), Vec::new()).unwrap();
        assert_eq!(repository.len(), 3);
    }

    #[test]
    fn snapshot_is_not_affected_by_later_registration() {
        let repository = ServiceRepository::<Numbers>::new(named("default", ExecutionOrder::Soon));
        let before = repository.snapshot();
        repository.register_implementation(named("new", ExecutionOrder::First), Vec::new()).unwrap();

        assert_eq!(before.len(), 1);
        assert_eq!(repository.snapshot().len(), 2);
    }

    #[test]
    fn introspection_matches_dispatch_order() {
        let repository = ServiceRepository::<Numbers>::new(named("default", ExecutionOrder::Soon));
        repository
            .register_implementation(
                named("filtered", ExecutionOrder::Later),
                vec![filter(|_: &u32| false)],
            )
            .unwrap();
        repository.register_implementation(named("first", ExecutionOrder::First), Vec::new()).unwrap();

        let infos = repository.implementations();
        let listed: Vec<&str> = infos.iter().map(|info| info.name.as_str()).collect();
        assert_eq!(listed, vec!["first", "filtered", "default"]);
        assert_eq!(infos[1].filters, 1);
        assert!(infos[2].is_default);
    }

    #[test]
    fn wrapper_ordering_and_identity() {
        let repository = ServiceRepository::<Numbers>::new(named("default", ExecutionOrder::First));
        repository.register_implementation(named("late", ExecutionOrder::Late), Vec::new()).unwrap();
        let snapshot = repository.snapshot();

        assert!(snapshot[0] < snapshot[1]);
        assert_eq!(snapshot[0], snapshot[0].clone());
        assert_ne!(snapshot[0], snapshot[1]);
    }

    proptest! {
        #[test]
        fn dispatch_order_is_priority_then_insertion(
            orders in prop::collection::vec(prop::sample::select(ExecutionOrder::ALL.to_vec()), 0..24),
        ) {
            let repository = ServiceRepository::<Numbers>::new(named("default", ExecutionOrder::First));
            let labels: Vec<String> = (0..orders.len()).map(|i| format!("impl-{i}")).collect();
            for (label, order) in labels.iter().zip(&orders) {
                let label: &'static str = Box::leak(label.clone().into_boxed_str());
                repository.register_implementation(named(label, *order), Vec::new()).unwrap();
            }

            let mut expected: Vec<(ExecutionOrder, usize)> =
                orders.iter().copied().zip(0..).collect();
            expected.sort();
            let mut expected: Vec<String> =
                expected.into_iter().map(|(_, i)| format!("impl-{i}")).collect();
            expected.push("default".to_string());

            prop_assert_eq!(names(&repository, 0), expected);
        }
    }
}
