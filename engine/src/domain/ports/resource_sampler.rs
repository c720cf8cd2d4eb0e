//! ResourceSampler port

use async_trait::async_trait;

use crate::domain::error::Result;
use crate::domain::value_objects::HealthSample;

/// Produces resource-usage observations for a live process.
#[async_trait]
pub trait ResourceSampler: Send + Sync {
    /// Take one sample for the given pid. Errors when the process is gone
    /// or its accounting cannot be read.
    async fn sample(&self, pid: u32) -> Result<HealthSample>;
}
