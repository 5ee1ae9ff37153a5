use switchyard_core::EmptyBatch;

/// Configuration errors raised by registration and dispatch setup.
///
/// These are surfaced to the calling code immediately and never retried.
/// Failures inside an implementation are not represented here: the pump
/// contains them and moves on to the next candidate.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
    #[error("service of type '{name}' has already been registered")]
    DuplicateServiceType { name: &'static str },
    #[error("no service registered for type '{name}'")]
    UnregisteredServiceType { name: &'static str },
    #[error("implementation '{implementation}' is already registered for service type '{service}'")]
    DuplicateImplementation {
        service: &'static str,
        implementation: String,
    },
    #[error(transparent)]
    EmptyBatch(#[from] EmptyBatch),
}
