/// Pipeline-level configuration.
///
/// Controls how dispatches are labelled in traces and how far batched
/// dispatch fans out over the execution facility.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Label recorded on every dispatch span.
    pub name: String,
    /// Maximum number of per-context pumps a single asynchronous batch keeps
    /// outstanding on the executor. Values below 1 are treated as 1.
    pub max_batch_in_flight: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            name: "pipeline".to_string(),
            max_batch_in_flight: 64,
        }
    }
}

impl PipelineConfig {
    /// Effective batch fan-out limit, never zero.
    #[must_use]
    pub fn batch_limit(&self) -> usize {
        self.max_batch_in_flight.max(1)
    }
}
