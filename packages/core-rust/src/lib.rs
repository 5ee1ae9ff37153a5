//! Switchyard core: execution order, service capability, and batch result tracking.

pub mod chunked;
pub mod order;
pub mod service;

pub use chunked::{ChunkedRequest, EmptyBatch};
pub use order::{ExecutionOrder, ParseExecutionOrderError};
pub use service::{filter, Service, ServiceFilter, ServiceFn, ServiceType};

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {
        // Empty body: if this test runs, the crate compiles and loads.
    }
}
