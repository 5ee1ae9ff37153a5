//! Batch result tracking for requests that fan out over many contexts.
//!
//! A `ChunkedRequest` starts with every context "remaining" and moves each one
//! to the result map when a result is stored. Every operation, reads included,
//! takes the tracker's single lock, so concurrent dispatches storing results
//! never expose a half-updated state.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

use parking_lot::Mutex;

/// Error returned when a batch is created from an empty collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("a batch request needs at least one context")]
pub struct EmptyBatch;

struct ChunkState<C, R> {
    remaining: Vec<C>,
    results: HashMap<C, R>,
}

/// A request to be fulfilled for many contexts against the same service type.
pub struct ChunkedRequest<C, R> {
    state: Mutex<ChunkState<C, R>>,
}

impl<C, R> ChunkedRequest<C, R>
where
    C: Eq + Hash,
{
    /// Create a batch from the contexts that still need a result.
    ///
    /// # Errors
    ///
    /// Returns [`EmptyBatch`] if `requests` yields no contexts.
    pub fn new(requests: impl IntoIterator<Item = C>) -> Result<Self, EmptyBatch> {
        let remaining: Vec<C> = requests.into_iter().collect();
        if remaining.is_empty() {
            return Err(EmptyBatch);
        }
        let results = HashMap::with_capacity(remaining.len());
        Ok(Self {
            state: Mutex::new(ChunkState { remaining, results }),
        })
    }

    /// Record `result` for `context` and drop the context from the remaining set.
    ///
    /// Storing twice for the same context replaces the earlier result; the
    /// context never re-enters the remaining set.
    pub fn store_result(&self, context: C, result: R) {
        let mut state = self.state.lock();
        let before = state.remaining.len();
        state.remaining.retain(|pending| pending != &context);
        if state.remaining.len() == before {
            tracing::trace!("stored result for a context that was not pending");
        }
        state.results.insert(context, result);
    }

    /// `true` once no context is left without a result.
    pub fn is_completed(&self) -> bool {
        self.state.lock().remaining.is_empty()
    }

    /// Number of contexts still waiting for a result.
    pub fn remaining_count(&self) -> usize {
        self.state.lock().remaining.len()
    }

    /// Consume the batch and take ownership of the collected results.
    pub fn into_results(self) -> HashMap<C, R> {
        self.state.into_inner().results
    }
}

impl<C, R> ChunkedRequest<C, R>
where
    C: Eq + Hash + Clone,
{
    /// Snapshot of the contexts that still need a result, in batch order.
    pub fn remaining(&self) -> Vec<C> {
        self.state.lock().remaining.clone()
    }
}

impl<C, R> ChunkedRequest<C, R>
where
    C: Eq + Hash + Clone,
    R: Clone,
{
    /// Snapshot of the results collected so far.
    pub fn available_results(&self) -> HashMap<C, R> {
        self.state.lock().results.clone()
    }
}

impl<C, R> fmt::Debug for ChunkedRequest<C, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ChunkedRequest")
            .field("remaining", &state.remaining.len())
            .field("results", &state.results.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use proptest::prelude::*;

    use super::*;

    #[test]
    fn empty_batch_is_rejected() {
        let batch = ChunkedRequest::<u32, u32>::new(Vec::new());
        assert_eq!(batch.unwrap_err(), EmptyBatch);
    }

    #[test]
    fn partial_then_complete() {
        let batch = ChunkedRequest::new(["A", "B", "C"]).unwrap();
        assert!(!batch.is_completed());

        batch.store_result("A", 1);
        batch.store_result("B", 2);

        assert_eq!(batch.remaining(), vec!["C"]);
        assert_eq!(batch.available_results(), HashMap::from([("A", 1), ("B", 2)]));
        assert!(!batch.is_completed());

        batch.store_result("C", 3);
        assert!(batch.is_completed());
        assert!(batch.remaining().is_empty());
        assert_eq!(batch.into_results().len(), 3);
    }

    #[test]
    fn redundant_store_overwrites_without_reviving() {
        let batch = ChunkedRequest::new([1, 2]).unwrap();
        batch.store_result(1, "first");
        batch.store_result(1, "second");

        assert_eq!(batch.remaining(), vec![2]);
        assert_eq!(batch.available_results().get(&1), Some(&"second"));
        assert_eq!(batch.remaining_count(), 1);
    }

    #[test]
    fn duplicate_contexts_resolve_together() {
        let batch = ChunkedRequest::new(["x", "x", "y"]).unwrap();
        batch.store_result("x", 0);
        assert_eq!(batch.remaining(), vec!["y"]);
    }

    #[test]
    fn concurrent_stores_all_land() {
        let batch = Arc::new(ChunkedRequest::new(0..64u32).unwrap());

        std::thread::scope(|scope| {
            for worker in 0..4u32 {
                let batch = Arc::clone(&batch);
                scope.spawn(move || {
                    for ctx in (0..64u32).filter(|c| c % 4 == worker) {
                        batch.store_result(ctx, ctx * 10);
                        // Readers never observe a context in both views.
                        let remaining = batch.remaining();
                        assert!(!remaining.contains(&ctx));
                    }
                });
            }
        });

        assert!(batch.is_completed());
        let results = batch.available_results();
        assert_eq!(results.len(), 64);
        assert!(results.iter().all(|(ctx, res)| *res == ctx * 10));
    }

    proptest! {
        #[test]
        fn completed_iff_nothing_remaining(
            contexts in prop::collection::hash_set(0u16..500, 1..40),
            picks in prop::collection::vec(any::<prop::sample::Index>(), 0..60),
        ) {
            let contexts: Vec<u16> = contexts.into_iter().collect();
            let batch = ChunkedRequest::new(contexts.clone()).unwrap();
            let mut stored = HashSet::new();

            for pick in picks {
                let ctx = contexts[pick.index(contexts.len())];
                batch.store_result(ctx, u32::from(ctx) + 1);
                stored.insert(ctx);

                let remaining = batch.remaining();
                prop_assert!(!remaining.contains(&ctx));
                let available = batch.available_results();
                prop_assert_eq!(available.get(&ctx), Some(&(u32::from(ctx) + 1)));
                prop_assert_eq!(batch.is_completed(), remaining.is_empty());
            }

            prop_assert_eq!(batch.remaining_count(), contexts.len() - stored.len());
        }
    }
}
