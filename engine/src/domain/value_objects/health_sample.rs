//! HealthSample value object

use serde::{Deserialize, Serialize};

/// One resource-usage observation for a running worker.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct HealthSample {
    /// Event-loop utilization, fraction in [0, 1].
    pub elu: f64,
    /// Heap bytes currently in use.
    pub heap_used: u64,
    /// Heap bytes reserved by the allocator.
    pub heap_total: u64,
    /// Maximum heap the worker may grow to. Zero when unknown.
    pub heap_limit: u64,
    /// Young-generation bytes in use. Zero when the sampler cannot tell.
    pub young_generation: u64,
}
