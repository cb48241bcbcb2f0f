pub mod decay_tick;
pub mod gaming_flag_sweep;
pub mod idempotency_gc;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::config::WorkerConfig;
use crate::evi::engine::EviEngine;

/// Upper bound for a single worker invocation.
const WORKER_TIMEOUT: Duration = Duration::from_secs(600);

/// Lets in-flight ticks finish before the scheduler stops.
#[cfg(test)]
const DRAIN_TIMEOUT: Duration = Duration::from_millis(10);
#[cfg(not(test))]
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

const FLAG_SWEEP_CRON: &str = "0 5 * * * *";
const IDEMPOTENCY_GC_CRON: &str = "0 30 3 * * *";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerName {
    DecayTick,
    GamingFlagSweep,
    IdempotencyGc,
}

impl WorkerName {
    pub const ALL: [WorkerName; 3] = [Self::DecayTick, Self::GamingFlagSweep, Self::IdempotencyGc];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::DecayTick => "decay_tick",
            Self::GamingFlagSweep => "gaming_flag_sweep",
            Self::IdempotencyGc => "idempotency_gc",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub name: WorkerName,
    pub cron: String,
    pub enabled: bool,
}

pub struct WorkerManager {
    engine: Arc<EviEngine>,
    shutdown_rx: broadcast::Receiver<()>,
    config: WorkerConfig,
}

impl WorkerManager {
    pub fn new(
        engine: Arc<EviEngine>,
        shutdown_rx: broadcast::Receiver<()>,
        config: &WorkerConfig,
    ) -> Self {
        Self {
            engine,
            shutdown_rx,
            config: config.clone(),
        }
    }

    /// Every scheduled job and its cron expression. Followers plan nothing.
    pub fn planned_jobs(&self) -> Vec<JobSpec> {
        if !self.config.is_leader {
            return Vec::new();
        }

        vec![
            JobSpec {
                name: WorkerName::DecayTick,
                cron: self.config.decay_tick_cron.clone(),
                enabled: true,
            },
            JobSpec {
                name: WorkerName::GamingFlagSweep,
                cron: FLAG_SWEEP_CRON.to_string(),
                enabled: true,
            },
            JobSpec {
                name: WorkerName::IdempotencyGc,
                cron: IDEMPOTENCY_GC_CRON.to_string(),
                enabled: true,
            },
        ]
    }

    pub async fn start(mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if !self.config.is_leader {
            tracing::info!("Worker leader disabled; skipping worker startup");
            return Ok(());
        }

        let mut scheduler = JobScheduler::new().await?;
        self.register_jobs(&scheduler).await;
        scheduler.start().await?;

        tracing::info!("Worker manager started");
        let _ = self.shutdown_rx.recv().await;

        tracing::info!(
            drain_secs = DRAIN_TIMEOUT.as_secs(),
            "Worker manager shutting down"
        );
        tokio::time::sleep(DRAIN_TIMEOUT).await;
        let _ = scheduler.shutdown().await;
        Ok(())
    }

    async fn register_jobs(&self, scheduler: &JobScheduler) {
        for spec in self.planned_jobs() {
            if !spec.enabled {
                tracing::info!(name = spec.name.as_str(), "Skipping disabled worker");
                continue;
            }

            let engine = self.engine.clone();
            let name = spec.name.as_str();

            match spec.name {
                WorkerName::DecayTick => {
                    add_job(scheduler, &spec.cron, name, move || {
                        let engine = engine.clone();
                        async move { decay_tick::run(&engine).await }
                    })
                    .await;
                }
                WorkerName::GamingFlagSweep => {
                    add_job(scheduler, &spec.cron, name, move || {
                        let engine = engine.clone();
                        async move { gaming_flag_sweep::run(&engine).await }
                    })
                    .await;
                }
                WorkerName::IdempotencyGc => {
                    add_job(scheduler, &spec.cron, name, move || {
                        let engine = engine.clone();
                        async move { idempotency_gc::run(&engine).await }
                    })
                    .await;
                }
            }
            tracing::info!(name, cron = %spec.cron, "Registered worker");
        }
    }
}

/// Registers `run` under `cron`, skipping a firing while the previous one is
/// still running and cutting it off after `WORKER_TIMEOUT`.
async fn add_job<Fut, F>(scheduler: &JobScheduler, cron: &str, name: &'static str, mut run: F)
where
    F: FnMut() -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let running = Arc::new(AtomicBool::new(false));

    let job = Job::new_async(cron, move |_uuid, _lock| {
        let guard = running.clone();

        if guard
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::warn!(worker = name, "Previous run still in progress, skipping");
            return Box::pin(async {});
        }

        let fut = run();
        Box::pin(async move {
            if tokio::time::timeout(WORKER_TIMEOUT, fut).await.is_err() {
                tracing::error!(
                    worker = name,
                    timeout_secs = WORKER_TIMEOUT.as_secs(),
                    "Worker timed out"
                );
            }
            guard.store(false, Ordering::SeqCst);
        })
    });

    match job {
        Ok(job) => {
            if let Err(err) = scheduler.add(job).await {
                tracing::error!(error = %err, cron, worker = name, "Failed to add worker job");
            }
        }
        Err(err) => tracing::error!(error = %err, cron, worker = name, "Failed to create worker job"),
    }
}

#[cfg(test)]
mod tests {
    use crate::evi::config::EviConfig;
    use crate::store::Store;

    use super::*;

    fn manager(is_leader: bool) -> (tempfile::TempDir, WorkerManager, broadcast::Sender<()>) {
        let tmp = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(Store::open(tmp.path().join("workers.sled").to_str().unwrap()).unwrap());
        let engine = Arc::new(EviEngine::new(EviConfig::default(), store));
        let (tx, _) = broadcast::channel(2);
        let cfg = WorkerConfig {
            is_leader,
            decay_tick_cron: "0 0 2 * * *".to_string(),
        };
        let manager = WorkerManager::new(engine, tx.subscribe(), &cfg);
        (tmp, manager, tx)
    }

    #[tokio::test]
    async fn follower_plans_no_jobs() {
        let (_tmp, manager, _tx) = manager(false);
        assert!(manager.planned_jobs().is_empty());
        manager.start().await.expect("follower start is a no-op");
    }

    #[tokio::test]
    async fn leader_plans_every_worker_with_configured_tick() {
        let (_tmp, manager, _tx) = manager(true);
        let jobs = manager.planned_jobs();
        assert_eq!(jobs.len(), WorkerName::ALL.len());
        let tick = jobs.iter().find(|j| j.name == WorkerName::DecayTick).unwrap();
        assert_eq!(tick.cron, "0 0 2 * * *");
        assert!(jobs.iter().all(|j| j.enabled));
    }

    #[tokio::test]
    async fn planned_crons_parse() {
        for cron in ["0 0 2 * * *", FLAG_SWEEP_CRON, IDEMPOTENCY_GC_CRON] {
            assert!(Job::new_async(cron, |_, _| Box::pin(async {})).is_ok(), "{cron}");
        }
    }
}
