//! Health monitoring
//! Samples running workers and signals the supervisor on repeated breaches

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::entities::{Application, WorkerSnapshot};
use crate::domain::ports::ResourceSampler;
use crate::domain::services::log_aggregation::MetricsRegistry;
use crate::domain::services::worker_supervision::RuntimeSignal;
use crate::domain::value_objects::{HealthPolicy, WorkerState};

/// Watches one worker per spawned task: every `interval_ms` it takes a
/// resource sample, evaluates it against the application's policy and
/// counts consecutive breaches. At `max_unhealthy_checks` it signals the
/// supervisor and resets the counter; it never restarts anything itself.
pub struct HealthMonitoringService {
    sampler: Arc<dyn ResourceSampler>,
    metrics: Arc<MetricsRegistry>,
}

impl HealthMonitoringService {
    pub fn new(sampler: Arc<dyn ResourceSampler>, metrics: Arc<MetricsRegistry>) -> Self {
        Self { sampler, metrics }
    }

    /// Start monitoring one worker. Returns `None` when the policy is off.
    pub fn spawn(
        &self,
        application: &Application,
        replica: usize,
        state_rx: watch::Receiver<WorkerSnapshot>,
        signal_tx: mpsc::Sender<RuntimeSignal>,
        cancel: CancellationToken,
    ) -> Option<JoinHandle<()>> {
        if !application.health.enabled {
            return None;
        }
        let monitor = WorkerMonitor {
            application: application.id.clone(),
            replica,
            policy: application.health.clone(),
            sampler: self.sampler.clone(),
            metrics: self.metrics.clone(),
            state_rx,
            signal_tx,
            cancel,
        };
        Some(tokio::spawn(monitor.run()))
    }
}

struct WorkerMonitor {
    application: String,
    replica: usize,
    policy: HealthPolicy,
    sampler: Arc<dyn ResourceSampler>,
    metrics: Arc<MetricsRegistry>,
    state_rx: watch::Receiver<WorkerSnapshot>,
    signal_tx: mpsc::Sender<RuntimeSignal>,
    cancel: CancellationToken,
}

impl WorkerMonitor {
    async fn run(mut self) {
        let interval = Duration::from_millis(self.policy.interval_ms);
        let mut unhealthy_checks: u32 = 0;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(interval) => {}
            }

            let (state, pid, started_at_ms) = {
                let snapshot = self.state_rx.borrow();
                (snapshot.state, snapshot.pid, snapshot.started_at_ms)
            };
            if state != WorkerState::Running {
                unhealthy_checks = 0;
                continue;
            }
            let pid = match pid {
                Some(pid) => pid,
                None => continue,
            };
            // Do not evaluate freshly started workers.
            let now_ms = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0);
            let uptime_ms = started_at_ms.map(|t| now_ms.saturating_sub(t));
            if uptime_ms.unwrap_or(0) < self.policy.grace_period_ms {
                continue;
            }

            let sample = match self.sampler.sample(pid).await {
                Ok(sample) => sample,
                Err(err) => {
                    // The worker may be mid-restart; the actor will notice
                    // a real death on its own.
                    debug!(
                        application = %self.application,
                        replica = self.replica,
                        pid,
                        %err,
                        "health sample failed"
                    );
                    continue;
                }
            };

            let breaches = self.policy.breaches(&sample);
            if breaches.is_empty() {
                unhealthy_checks = 0;
            } else {
                unhealthy_checks += 1;
                warn!(
                    application = %self.application,
                    replica = self.replica,
                    ?breaches,
                    unhealthy_checks,
                    max = self.policy.max_unhealthy_checks,
                    "health thresholds breached"
                );
            }
            self.metrics
                .record(&self.application, self.replica, sample, unhealthy_checks);

            if unhealthy_checks >= self.policy.max_unhealthy_checks {
                unhealthy_checks = 0;
                let signal = RuntimeSignal::Unhealthy {
                    application: self.application.clone(),
                    replica: self.replica,
                };
                if self.signal_tx.send(signal).await.is_err() {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::WorkerInstance;
    use crate::domain::error::Result;
    use crate::domain::value_objects::HealthSample;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct ScriptedSampler {
        samples: Mutex<Vec<HealthSample>>,
        fallback: HealthSample,
    }

    #[async_trait]
    impl ResourceSampler for ScriptedSampler {
        async fn sample(&self, _pid: u32) -> Result<HealthSample> {
            let mut samples = self.samples.lock().unwrap();
            Ok(if samples.is_empty() {
                self.fallback
            } else {
                samples.remove(0)
            })
        }
    }

    fn hot_sample() -> HealthSample {
        HealthSample {
            elu: 1.0,
            ..HealthSample::default()
        }
    }

    fn running_snapshot() -> WorkerSnapshot {
        let mut worker = WorkerInstance::new("api", 0);
        worker.transition_to(WorkerState::Starting).unwrap();
        worker.mark_running(42).unwrap();
        worker.snapshot()
    }

    fn monitored_app(policy: HealthPolicy) -> Application {
        Application::builder("api")
            .command("node")
            .health(policy)
            .entrypoint(true)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_consecutive_breaches_emit_signal() {
        let policy = HealthPolicy {
            interval_ms: 10,
            grace_period_ms: 0,
            max_unhealthy_checks: 3,
            max_elu: 0.9,
            ..HealthPolicy::default()
        };
        let sampler = Arc::new(ScriptedSampler {
            samples: Mutex::new(Vec::new()),
            fallback: hot_sample(),
        });
        let metrics = Arc::new(MetricsRegistry::new());
        let service = HealthMonitoringService::new(sampler, metrics.clone());

        let (_state_tx, state_rx) = watch::channel(running_snapshot());
        let (signal_tx, mut signal_rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let handle = service
            .spawn(&monitored_app(policy), 0, state_rx, signal_tx, cancel.clone())
            .unwrap();

        let signal = tokio::time::timeout(Duration::from_secs(5), signal_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            signal,
            RuntimeSignal::Unhealthy { ref application, replica: 0 }
                if application == "api"
        ));

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_clean_sample_resets_counter() {
        let policy = HealthPolicy {
            interval_ms: 10,
            grace_period_ms: 0,
            max_unhealthy_checks: 3,
            max_elu: 0.9,
            ..HealthPolicy::default()
        };
        // Two breaches, then clean forever: the threshold is never reached.
        let sampler = Arc::new(ScriptedSampler {
            samples: Mutex::new(vec![hot_sample(), hot_sample()]),
            fallback: HealthSample::default(),
        });
        let metrics = Arc::new(MetricsRegistry::new());
        let service = HealthMonitoringService::new(sampler, metrics.clone());

        let (_state_tx, state_rx) = watch::channel(running_snapshot());
        let (signal_tx, mut signal_rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let handle = service
            .spawn(&monitored_app(policy), 0, state_rx, signal_tx, cancel.clone())
            .unwrap();

        let outcome =
            tokio::time::timeout(Duration::from_millis(300), signal_rx.recv()).await;
        assert!(outcome.is_err(), "no unhealthy signal expected");
        assert_eq!(metrics.latest("api")[0].1.unhealthy_checks, 0);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_grace_period_skips_evaluation() {
        let policy = HealthPolicy {
            interval_ms: 10,
            grace_period_ms: 60_000,
            max_unhealthy_checks: 1,
            max_elu: 0.9,
            ..HealthPolicy::default()
        };
        let sampler = Arc::new(ScriptedSampler {
            samples: Mutex::new(Vec::new()),
            fallback: hot_sample(),
        });
        let metrics = Arc::new(MetricsRegistry::new());
        let service = HealthMonitoringService::new(sampler, metrics);

        let (_state_tx, state_rx) = watch::channel(running_snapshot());
        let (signal_tx, mut signal_rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let handle = service
            .spawn(&monitored_app(policy), 0, state_rx, signal_tx, cancel.clone())
            .unwrap();

        let outcome =
            tokio::time::timeout(Duration::from_millis(200), signal_rx.recv()).await;
        assert!(outcome.is_err(), "grace period must suppress signals");

        cancel.cancel();
        handle.await.unwrap();
    }

    #[test]
    fn test_disabled_policy_spawns_nothing() {
        let policy = HealthPolicy {
            enabled: false,
            ..HealthPolicy::default()
        };
        let sampler = Arc::new(ScriptedSampler {
            samples: Mutex::new(Vec::new()),
            fallback: HealthSample::default(),
        });
        let service =
            HealthMonitoringService::new(sampler, Arc::new(MetricsRegistry::new()));
        let (_state_tx, state_rx) = watch::channel(running_snapshot());
        let (signal_tx, _signal_rx) = mpsc::channel(16);
        assert!(service
            .spawn(
                &monitored_app(policy),
                0,
                state_rx,
                signal_tx,
                CancellationToken::new()
            )
            .is_none());
    }
}
