//! HealthPolicy value object
//! Thresholds and cadence for worker health evaluation

use serde::{Deserialize, Serialize};

use crate::domain::constants::*;
use crate::domain::error::{DomainError, Result};
use crate::domain::value_objects::HealthSample;

/// Health evaluation policy for an application's workers.
///
/// Fractional thresholds (`max_elu`, `max_heap_used`) are constrained to
/// [0, 1]; byte ceilings are absolute. A ceiling of `None` disables that
/// particular check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthPolicy {
    /// Whether health monitoring runs at all for this application.
    pub enabled: bool,

    /// Sampling interval in milliseconds.
    pub interval_ms: u64,

    /// Period after worker start during which samples are not evaluated.
    pub grace_period_ms: u64,

    /// Consecutive failing samples before the worker is signalled unhealthy.
    pub max_unhealthy_checks: u32,

    /// Event-loop utilization ceiling, fraction in [0, 1].
    pub max_elu: f64,

    /// Heap-used ceiling as a fraction of the heap limit, in [0, 1].
    pub max_heap_used: f64,

    /// Absolute heap-total ceiling in bytes.
    pub max_heap_total: Option<u64>,

    /// Absolute young-generation ceiling in bytes.
    pub max_young_generation: Option<u64>,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: DEFAULT_HEALTH_INTERVAL_MS,
            grace_period_ms: DEFAULT_HEALTH_GRACE_PERIOD_MS,
            max_unhealthy_checks: DEFAULT_MAX_UNHEALTHY_CHECKS,
            max_elu: DEFAULT_MAX_ELU,
            max_heap_used: DEFAULT_MAX_HEAP_USED,
            max_heap_total: None,
            max_young_generation: None,
        }
    }
}

impl HealthPolicy {
    /// Validate threshold ranges.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.max_elu) {
            return Err(DomainError::ConfigInvalid(format!(
                "health.max_elu must be within [0, 1], got {}",
                self.max_elu
            )));
        }
        if !(0.0..=1.0).contains(&self.max_heap_used) {
            return Err(DomainError::ConfigInvalid(format!(
                "health.max_heap_used must be within [0, 1], got {}",
                self.max_heap_used
            )));
        }
        if self.max_unhealthy_checks == 0 {
            return Err(DomainError::ConfigInvalid(
                "health.max_unhealthy_checks must be at least 1".to_string(),
            ));
        }
        if self.interval_ms == 0 {
            return Err(DomainError::ConfigInvalid(
                "health.interval_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Evaluate a sample against the thresholds.
    ///
    /// Returns the names of breached thresholds, empty when the sample is
    /// within all of them. The heap-used check is a fraction of the heap
    /// limit, so it is skipped when the sampler reported no limit.
    pub fn breaches(&self, sample: &HealthSample) -> Vec<&'static str> {
        let mut breached = Vec::new();

        if sample.elu > self.max_elu {
            breached.push("max_elu");
        }
        if sample.heap_limit > 0 {
            let used_fraction = sample.heap_used as f64 / sample.heap_limit as f64;
            if used_fraction > self.max_heap_used {
                breached.push("max_heap_used");
            }
        }
        if let Some(ceiling) = self.max_heap_total {
            if sample.heap_total > ceiling {
                breached.push("max_heap_total");
            }
        }
        if let Some(ceiling) = self.max_young_generation {
            if sample.young_generation > ceiling {
                breached.push("max_young_generation");
            }
        }

        breached
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(elu: f64, heap_used: u64, heap_limit: u64) -> HealthSample {
        HealthSample {
            elu,
            heap_used,
            heap_total: heap_used,
            heap_limit,
            young_generation: 0,
        }
    }

    #[test]
    fn test_validate_rejects_out_of_range_fractions() {
        let mut policy = HealthPolicy::default();
        policy.max_elu = 1.5;
        assert!(policy.validate().is_err());

        let mut policy = HealthPolicy::default();
        policy.max_heap_used = -0.1;
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_clean_sample_has_no_breaches() {
        let policy = HealthPolicy::default();
        assert!(policy.breaches(&sample(0.5, 100, 1_000)).is_empty());
    }

    #[test]
    fn test_elu_breach() {
        let mut policy = HealthPolicy::default();
        policy.max_elu = 0.9;
        assert_eq!(policy.breaches(&sample(0.95, 0, 0)), vec!["max_elu"]);
    }

    #[test]
    fn test_heap_used_fraction_breach() {
        let mut policy = HealthPolicy::default();
        policy.max_heap_used = 0.8;
        assert_eq!(
            policy.breaches(&sample(0.0, 900, 1_000)),
            vec!["max_heap_used"]
        );
        // No limit reported: the fractional check is skipped
        assert!(policy.breaches(&sample(0.0, 900, 0)).is_empty());
    }

    #[test]
    fn test_absolute_ceilings() {
        let mut policy = HealthPolicy::default();
        policy.max_heap_total = Some(500);
        let mut s = sample(0.0, 600, 10_000);
        s.heap_total = 600;
        assert_eq!(policy.breaches(&s), vec!["max_heap_total"]);
    }
}
