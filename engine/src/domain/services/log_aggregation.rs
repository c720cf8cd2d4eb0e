//! Log and metric aggregation
//! Bounded fan-out of worker log lines and a registry of health samples

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::warn;

use crate::domain::constants::LOG_BUS_CAPACITY;
use crate::domain::error::{DomainError, Result};
use crate::domain::value_objects::{HealthSample, LogRecord};

/// Broadcast bus carrying captured worker log lines.
///
/// The bus is bounded: a subscriber that falls behind loses its oldest
/// pending records rather than stalling the producers.
#[derive(Clone)]
pub struct LogBus {
    tx: broadcast::Sender<LogRecord>,
}

impl LogBus {
    pub fn new() -> Self {
        Self::with_capacity(LOG_BUS_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish a record. A send error only means nobody is listening.
    pub fn publish(&self, record: LogRecord) {
        let _ = self.tx.send(record);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogRecord> {
        self.tx.subscribe()
    }
}

impl Default for LogBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receive the next record, skipping over gaps left by lag.
pub async fn recv_skipping_lag(
    rx: &mut broadcast::Receiver<LogRecord>,
) -> Option<LogRecord> {
    loop {
        match rx.recv().await {
            Ok(record) => return Some(record),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, "log subscriber lagged, records dropped");
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

/// Latest health view of one worker, as served by the metrics surface.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct WorkerHealth {
    #[serde(flatten)]
    pub sample: HealthSample,
    /// Consecutive failing samples so far.
    pub unhealthy_checks: u32,
}

/// One timestamped health sample inside a profiling session.
#[derive(Debug, Clone, Serialize)]
pub struct ProfileEntry {
    pub timestamp_ms: u64,
    pub replica: usize,
    #[serde(flatten)]
    pub sample: HealthSample,
}

#[derive(Default)]
struct ProfileSession {
    entries: Vec<ProfileEntry>,
}

/// Latest health observations per worker plus on-demand profiling sessions.
///
/// Samples flow in from the health monitor. While a profiling session is
/// active for an application, every sample is also appended to the session
/// so that stopping it yields a time series.
pub struct MetricsRegistry {
    latest: RwLock<HashMap<(String, usize), WorkerHealth>>,
    profiles: RwLock<HashMap<String, ProfileSession>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            latest: RwLock::new(HashMap::new()),
            profiles: RwLock::new(HashMap::new()),
        }
    }

    pub fn record(
        &self,
        application: &str,
        replica: usize,
        sample: HealthSample,
        unhealthy_checks: u32,
    ) {
        self.latest.write().expect("metrics lock poisoned").insert(
            (application.to_string(), replica),
            WorkerHealth {
                sample,
                unhealthy_checks,
            },
        );

        let mut profiles = self.profiles.write().expect("metrics lock poisoned");
        if let Some(session) = profiles.get_mut(application) {
            session.entries.push(ProfileEntry {
                timestamp_ms: epoch_ms(),
                replica,
                sample,
            });
        }
    }

    pub fn latest(&self, application: &str) -> Vec<(usize, WorkerHealth)> {
        let latest = self.latest.read().expect("metrics lock poisoned");
        let mut samples: Vec<(usize, WorkerHealth)> = latest
            .iter()
            .filter(|((app, _), _)| app == application)
            .map(|((_, replica), health)| (*replica, *health))
            .collect();
        samples.sort_by_key(|(replica, _)| *replica);
        samples
    }

    pub fn forget(&self, application: &str, replica: usize) {
        self.latest
            .write()
            .expect("metrics lock poisoned")
            .remove(&(application.to_string(), replica));
    }

    pub fn start_profile(&self, application: &str) -> Result<()> {
        let mut profiles = self.profiles.write().expect("metrics lock poisoned");
        if profiles.contains_key(application) {
            return Err(DomainError::ProfileAlreadyActive(application.to_string()));
        }
        profiles.insert(application.to_string(), ProfileSession::default());
        Ok(())
    }

    pub fn stop_profile(&self, application: &str) -> Result<Vec<ProfileEntry>> {
        let mut profiles = self.profiles.write().expect("metrics lock poisoned");
        profiles
            .remove(application)
            .map(|s| s.entries)
            .ok_or_else(|| DomainError::ProfileNotActive(application.to_string()))
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_objects::LogLevel;
    use uuid::Uuid;

    fn record(message: &str) -> LogRecord {
        LogRecord {
            application: "api".to_string(),
            worker: Uuid::new_v4(),
            replica: 0,
            pid: 1,
            level: LogLevel::Info,
            timestamp_ms: 0,
            message: message.to_string(),
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let bus = LogBus::new();
        let mut rx = bus.subscribe();
        bus.publish(record("hello"));
        let got = recv_skipping_lag(&mut rx).await.unwrap();
        assert_eq!(got.message, "hello");
    }

    #[tokio::test]
    async fn test_lagged_subscriber_skips_to_newest() {
        let bus = LogBus::with_capacity(2);
        let mut rx = bus.subscribe();
        for i in 0..5 {
            bus.publish(record(&format!("line {i}")));
        }
        // Capacity 2: the first recv observes the lag, then yields line 3
        let got = recv_skipping_lag(&mut rx).await.unwrap();
        assert_eq!(got.message, "line 3");
    }

    #[test]
    fn test_metrics_latest_per_replica() {
        let registry = MetricsRegistry::new();
        let mut sample = HealthSample::default();
        sample.heap_used = 10;
        registry.record("api", 1, sample, 0);
        sample.heap_used = 20;
        registry.record("api", 0, sample, 3);
        registry.record("other", 0, HealthSample::default(), 0);

        let latest = registry.latest("api");
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].0, 0);
        assert_eq!(latest[0].1.sample.heap_used, 20);
        assert_eq!(latest[0].1.unhealthy_checks, 3);
    }

    #[test]
    fn test_profile_session_lifecycle() {
        let registry = MetricsRegistry::new();
        assert!(registry.stop_profile("api").is_err());

        registry.start_profile("api").unwrap();
        assert!(registry.start_profile("api").is_err());

        registry.record("api", 0, HealthSample::default(), 0);
        registry.record("api", 0, HealthSample::default(), 0);
        let entries = registry.stop_profile("api").unwrap();
        assert_eq!(entries.len(), 2);
        assert!(registry.stop_profile("api").is_err());
    }
}
