use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::{broadcast, Mutex, RwLock};

use crate::evi::config::{EviConfig, ForecastConfig};
use crate::evi::error::EngineError;
use crate::evi::forecast::{self, Forecast, ForecastRequest};
use crate::evi::monitoring;
use crate::evi::normalizer::SignalBatch;
use crate::evi::pipeline::{self, PipelineInput, PipelineRun};
use crate::evi::reinforcement;
use crate::evi::types::*;
use crate::store::keys;
use crate::store::operations::context::OrgCommit;
use crate::store::Store;

const EVENT_CHANNEL_CAPACITY: usize = 256;
const ORG_LOCK_PRUNE_THRESHOLD: usize = 1000;
const TICK_CONCURRENCY: usize = 16;

pub struct EviEngine {
    config: Arc<RwLock<EviConfig>>,
    store: Arc<Store>,
    org_locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
    /// Latest in-flight generation per (org, horizon). The entry is removed by
    /// the request that still owns it once it finishes.
    forecast_generations: Arc<Mutex<HashMap<(String, u32), u64>>>,
    next_generation: AtomicU64,
    events: broadcast::Sender<SnapshotComputed>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalIngestResult {
    pub snapshot: EviSnapshot,
    pub new_flags: Vec<GamingFlag>,
    pub quarantined: Vec<QuarantinedSignal>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityIngestResult {
    /// `None` only when every key was a replay and the org has no snapshot yet.
    pub snapshot: Option<EviSnapshot>,
    pub applied_keys: Vec<String>,
    pub duplicate_keys: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GamingFlagStatus {
    #[serde(flatten)]
    pub flag: GamingFlag,
    pub active: bool,
    #[serde(rename = "override")]
    pub override_record: Option<GamingFlagOverride>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickSummary {
    pub ticked: usize,
    pub failed: usize,
}

impl EviEngine {
    pub fn new(config: EviConfig, store: Arc<Store>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            config: Arc::new(RwLock::new(config)),
            store,
            org_locks: Arc::new(Mutex::new(HashMap::new())),
            forecast_generations: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(1),
            events,
        }
    }

    pub async fn reload_config(&self, new_config: EviConfig) -> Result<(), String> {
        new_config.validate()?;
        let mut cfg = self.config.write().await;
        *cfg = new_config;
        tracing::info!("EVI config reloaded");
        Ok(())
    }

    pub async fn get_config(&self) -> EviConfig {
        self.config.read().await.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SnapshotComputed> {
        self.events.subscribe()
    }

    async fn acquire_org_lock(&self, org_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.org_locks.lock().await;

        // strong_count == 1: only the map holds it, nobody is waiting
        if locks.len() > ORG_LOCK_PRUNE_THRESHOLD {
            locks.retain(|_, v| Arc::strong_count(v) > 1);
        }

        locks
            .entry(org_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Load, compute, commit, publish. The caller holds the org lock.
    async fn execute(
        &self,
        org_id: &str,
        input: PipelineInput<'_>,
        now: DateTime<Utc>,
    ) -> Result<PipelineRun, EngineError> {
        let config = self.config.read().await.clone();
        let mut ctx = self.store.load_org_context(org_id, now)?;

        let run = pipeline::run(&mut ctx, input, &config, now).inspect_err(|e| {
            if e.is_input_error() {
                tracing::warn!(org_id, error = %e, "EVI run rejected, previous snapshot retained");
            } else {
                tracing::error!(org_id, error = %e, "EVI run failed");
            }
        })?;

        self.store.commit_org_run(&OrgCommit {
            context: &ctx,
            snapshot: &run.snapshot,
            new_flags: &run.new_flags,
            quarantined: &run.quarantined,
            processed_keys: &run.applied_keys,
        })?;

        monitoring::log_snapshot(&run.snapshot);
        // no subscribers is fine
        let _ = self.events.send(SnapshotComputed::from(&run.snapshot));
        Ok(run)
    }

    pub async fn run_tick(&self, org_id: &str, scheduled: bool) -> Result<EviSnapshot, EngineError> {
        self.run_tick_at(org_id, scheduled, Utc::now()).await
    }

    pub async fn run_tick_at(
        &self,
        org_id: &str,
        scheduled: bool,
        now: DateTime<Utc>,
    ) -> Result<EviSnapshot, EngineError> {
        keys::org_prefix(org_id)?;
        if self.store.get_profile(org_id)?.is_none() {
            return Err(EngineError::not_found("org", org_id));
        }
        let lock = self.acquire_org_lock(org_id).await;
        let _guard = lock.lock().await;
        let run = self
            .execute(org_id, PipelineInput::Tick { scheduled }, now)
            .await?;
        Ok(run.snapshot)
    }

    /// Ticks every known org, up to `TICK_CONCURRENCY` at a time. One org
    /// failing or stalling never holds back the others.
    pub async fn tick_all(&self, now: DateTime<Utc>) -> Result<TickSummary, EngineError> {
        let org_ids = self.store.list_org_ids()?;
        let outcomes: Vec<(String, Result<EviSnapshot, EngineError>)> = stream::iter(org_ids)
            .map(|org_id| async move {
                let outcome = self.run_tick_at(&org_id, true, now).await;
                (org_id, outcome)
            })
            .buffer_unordered(TICK_CONCURRENCY)
            .collect()
            .await;

        let mut summary = TickSummary::default();
        for (org_id, outcome) in outcomes {
            match outcome {
                Ok(_) => summary.ticked += 1,
                Err(e) => {
                    summary.failed += 1;
                    tracing::warn!(org_id = %org_id, error = %e, "Scheduled tick failed");
                }
            }
        }
        Ok(summary)
    }

    pub async fn ingest_signals(
        &self,
        org_id: &str,
        batch: &SignalBatch,
    ) -> Result<SignalIngestResult, EngineError> {
        self.ingest_signals_at(org_id, batch, Utc::now()).await
    }

    pub async fn ingest_signals_at(
        &self,
        org_id: &str,
        batch: &SignalBatch,
        now: DateTime<Utc>,
    ) -> Result<SignalIngestResult, EngineError> {
        keys::org_prefix(org_id)?;
        let lock = self.acquire_org_lock(org_id).await;
        let _guard = lock.lock().await;
        let run = self.execute(org_id, PipelineInput::Signals(batch), now).await?;
        Ok(SignalIngestResult {
            snapshot: run.snapshot,
            new_flags: run.new_flags,
            quarantined: run.quarantined,
        })
    }

    pub async fn ingest_activity(
        &self,
        org_id: &str,
        events: &[ActivityEvent],
    ) -> Result<ActivityIngestResult, EngineError> {
        self.ingest_activity_at(org_id, events, Utc::now()).await
    }

    pub async fn ingest_activity_at(
        &self,
        org_id: &str,
        events: &[ActivityEvent],
        now: DateTime<Utc>,
    ) -> Result<ActivityIngestResult, EngineError> {
        keys::org_prefix(org_id)?;
        if events.is_empty() {
            return Err(EngineError::InvalidActivityEvent(
                "batch must contain at least one event".to_string(),
            ));
        }
        for event in events {
            reinforcement::validate_event(event, org_id)?;
        }
        let lock = self.acquire_org_lock(org_id).await;
        let _guard = lock.lock().await;

        let processed = self
            .store
            .processed_activity_keys(org_id, events.iter().map(|e| e.idempotency_key.as_str()))?;

        let unique: HashSet<&str> = events.iter().map(|e| e.idempotency_key.as_str()).collect();
        if unique.iter().all(|k| processed.contains(*k)) {
            tracing::info!(org_id, replayed = events.len(), "Activity batch fully replayed, skipping");
            return Ok(ActivityIngestResult {
                snapshot: self.store.latest_snapshot(org_id)?,
                applied_keys: Vec::new(),
                duplicate_keys: events.iter().map(|e| e.idempotency_key.clone()).collect(),
            });
        }

        let run = self
            .execute(
                org_id,
                PipelineInput::Activity {
                    events,
                    processed: &processed,
                },
                now,
            )
            .await?;
        Ok(ActivityIngestResult {
            snapshot: Some(run.snapshot),
            applied_keys: run.applied_keys,
            duplicate_keys: run.duplicate_keys,
        })
    }

    pub async fn ingest_shock(&self, org_id: &str, event: ShockEvent) -> Result<EviSnapshot, EngineError> {
        self.ingest_shock_at(org_id, event, Utc::now()).await
    }

    pub async fn ingest_shock_at(
        &self,
        org_id: &str,
        event: ShockEvent,
        now: DateTime<Utc>,
    ) -> Result<EviSnapshot, EngineError> {
        keys::org_prefix(org_id)?;
        keys::shock_key(org_id, &event.id)?;
        let lock = self.acquire_org_lock(org_id).await;
        let _guard = lock.lock().await;
        let run = self.execute(org_id, PipelineInput::Shock(event), now).await?;
        Ok(run.snapshot)
    }

    pub async fn set_shock_response(
        &self,
        org_id: &str,
        shock_id: &str,
        active: bool,
        recovery_rate: Option<f64>,
    ) -> Result<EviSnapshot, EngineError> {
        self.set_shock_response_at(org_id, shock_id, active, recovery_rate, Utc::now())
            .await
    }

    pub async fn set_shock_response_at(
        &self,
        org_id: &str,
        shock_id: &str,
        active: bool,
        recovery_rate: Option<f64>,
        now: DateTime<Utc>,
    ) -> Result<EviSnapshot, EngineError> {
        keys::shock_key(org_id, shock_id)?;
        let lock = self.acquire_org_lock(org_id).await;
        let _guard = lock.lock().await;
        let run = self
            .execute(
                org_id,
                PipelineInput::ShockResponse {
                    shock_id,
                    active,
                    recovery_rate,
                },
                now,
            )
            .await?;
        tracing::info!(org_id, shock_id, active, "Shock response campaign updated");
        Ok(run.snapshot)
    }

    pub fn latest_snapshot(&self, org_id: &str) -> Result<EviSnapshot, EngineError> {
        self.store
            .latest_snapshot(org_id)?
            .ok_or_else(|| EngineError::not_found("snapshot", org_id))
    }

    pub fn list_snapshots(&self, org_id: &str, limit: usize) -> Result<Vec<EviSnapshot>, EngineError> {
        Ok(self.store.list_snapshots(org_id, limit)?)
    }

    async fn next_forecast_generation(&self, key: &(String, u32)) -> u64 {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        self.forecast_generations
            .lock()
            .await
            .insert(key.clone(), generation);
        generation
    }

    /// A missing entry means a newer request already finished.
    async fn is_current_forecast(&self, key: &(String, u32), generation: u64) -> bool {
        self.forecast_generations
            .lock()
            .await
            .get(key)
            .is_some_and(|current| *current == generation)
    }

    async fn finish_forecast(&self, key: &(String, u32), generation: u64) {
        let mut generations = self.forecast_generations.lock().await;
        if generations.get(key) == Some(&generation) {
            generations.remove(key);
        }
    }

    /// Projects low/expected/high trajectories from the latest snapshot. A newer
    /// request for the same org and horizon makes this one return
    /// `ForecastSuperseded`; committed snapshots are never touched either way.
    pub async fn forecast(&self, org_id: &str, request: &ForecastRequest) -> Result<Forecast, EngineError> {
        keys::org_prefix(org_id)?;
        let config = self.config.read().await.forecast.clone();
        forecast::validate_request(request, &config)?;

        let key = (org_id.to_string(), request.horizon_weeks);
        let generation = self.next_forecast_generation(&key).await;
        let result = self.project_forecast(org_id, request, &config, &key, generation).await;
        self.finish_forecast(&key, generation).await;
        result
    }

    async fn project_forecast(
        &self,
        org_id: &str,
        request: &ForecastRequest,
        config: &ForecastConfig,
        key: &(String, u32),
        generation: u64,
    ) -> Result<Forecast, EngineError> {
        let superseded = || EngineError::ForecastSuperseded {
            org_id: org_id.to_string(),
            horizon_weeks: request.horizon_weeks,
        };

        let base = self.latest_snapshot(org_id)?;
        tokio::task::yield_now().await;
        if !self.is_current_forecast(key, generation).await {
            tracing::debug!(org_id, generation, "Forecast superseded before projection");
            return Err(superseded());
        }

        let (series, breakdown) = forecast::project(base.evi, request, config)?;
        if !self.is_current_forecast(key, generation).await {
            return Err(superseded());
        }

        Ok(Forecast {
            org_id: org_id.to_string(),
            base_snapshot_id: base.id,
            base_evi: base.evi,
            horizon_weeks: request.horizon_weeks,
            success_rate: config.success_rate,
            generated_at: Utc::now(),
            series,
            breakdown,
        })
    }

    pub fn list_flags(&self, org_id: &str) -> Result<Vec<GamingFlagStatus>, EngineError> {
        let now = Utc::now();
        let overrides = self.store.list_flag_overrides(org_id)?;
        let flags = self.store.list_gaming_flags(org_id)?;
        Ok(flags
            .into_iter()
            .map(|flag| {
                let override_record = overrides.iter().find(|o| o.flag_id == flag.id).cloned();
                GamingFlagStatus {
                    active: flag.applies_at(now) && override_record.is_none(),
                    flag,
                    override_record,
                }
            })
            .collect())
    }

    /// Logged manual override. The flag record is kept as-is.
    pub async fn override_flag(
        &self,
        org_id: &str,
        flag_id: &str,
        operator: &str,
        reason: &str,
    ) -> Result<GamingFlagOverride, EngineError> {
        keys::gaming_flag_key(org_id, flag_id)?;
        let lock = self.acquire_org_lock(org_id).await;
        let _guard = lock.lock().await;

        let flag = self
            .store
            .get_gaming_flag(org_id, flag_id)?
            .ok_or_else(|| EngineError::not_found("gaming_flag", flag_id))?;
        let record = GamingFlagOverride {
            flag_id: flag.id.clone(),
            org_id: org_id.to_string(),
            operator: operator.to_string(),
            reason: reason.to_string(),
            overridden_at: Utc::now(),
        };
        self.store.insert_flag_override(&record)?;
        tracing::warn!(
            org_id,
            flag_id,
            operator,
            reason,
            pattern = flag.pattern_type.as_str(),
            "Gaming flag manually overridden"
        );
        Ok(record)
    }

    pub fn list_quarantine(&self, org_id: &str) -> Result<Vec<QuarantinedSignal>, EngineError> {
        Ok(self.store.list_quarantine(org_id)?)
    }

    pub fn list_org_ids(&self) -> Result<Vec<String>, EngineError> {
        Ok(self.store.list_org_ids()?)
    }

    /// Flags reaching expiry in `[now - lookback, now)`.
    pub fn flags_expired_since(
        &self,
        now: DateTime<Utc>,
        lookback: Duration,
    ) -> Result<Vec<GamingFlag>, EngineError> {
        Ok(self
            .store
            .gaming_flags_expiring_between(now - lookback, now)?)
    }

    pub async fn sweep_idempotency_keys(&self, now: DateTime<Utc>) -> Result<usize, EngineError> {
        let retention = self.config.read().await.reinforcement.idempotency_retention_days;
        Ok(self
            .store
            .sweep_processed_activity(now - Duration::days(retention))?)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use tempfile::tempdir;

    use super::*;
    use crate::evi::forecast::{ActionStatus, PlannedAction};
    use crate::evi::normalizer::{RawSignal, SignalDomain};

    fn engine() -> (tempfile::TempDir, EviEngine) {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path().join("db").to_str().unwrap()).unwrap();
        store.run_migrations().unwrap();
        (dir, EviEngine::new(EviConfig::default(), Arc::new(store)))
    }

    fn batch() -> SignalBatch {
        SignalBatch {
            signals: SubMetric::ALL
                .iter()
                .map(|metric| RawSignal {
                    metric: *metric,
                    value: Some(match metric.component() {
                        Component::Visibility => 70.0,
                        Component::Authority => 60.0,
                        Component::Momentum => 50.0,
                    }),
                    domain: Some(SignalDomain::Percentage),
                    allow_out_of_range: false,
                })
                .collect(),
            volume: None,
            observed_at: None,
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 9, 7, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn signals_then_idle_weeks_decay() {
        let (_dir, engine) = engine();
        let first = engine.ingest_signals_at("acme", &batch(), t0()).await.unwrap();
        assert!((first.snapshot.evi - 61.5).abs() < 1e-9);

        let later = engine
            .run_tick_at("acme", true, t0() + Duration::weeks(8))
            .await
            .unwrap();
        let ratio = later.evi / first.snapshot.evi;
        assert!((0.55..=0.65).contains(&ratio), "ratio {ratio}");
        assert_eq!(engine.list_snapshots("acme", 10).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn tick_for_unknown_org_is_not_found() {
        let (_dir, engine) = engine();
        let err = engine.run_tick("ghost", false).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
    }

    #[tokio::test]
    async fn replayed_activity_batch_creates_no_snapshot() {
        let (_dir, engine) = engine();
        engine.ingest_signals_at("acme", &batch(), t0()).await.unwrap();
        let events = vec![ActivityEvent {
            idempotency_key: "press-1".to_string(),
            org_id: "acme".to_string(),
            pillars: vec![Pillar::Pr],
            activity_type: ActivityType::PressPlacement,
            magnitude: 1.0,
            timestamp: t0(),
        }];
        let at = t0() + Duration::hours(1);
        let first = engine.ingest_activity_at("acme", &events, at).await.unwrap();
        assert_eq!(first.applied_keys.len(), 1);

        let replay = engine.ingest_activity_at("acme", &events, at).await.unwrap();
        assert!(replay.applied_keys.is_empty());
        assert_eq!(replay.duplicate_keys, vec!["press-1".to_string()]);
        assert_eq!(
            replay.snapshot.unwrap().id,
            first.snapshot.unwrap().id
        );
        assert_eq!(engine.list_snapshots("acme", 10).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn snapshot_event_is_broadcast() {
        let (_dir, engine) = engine();
        let mut rx = engine.subscribe();
        let result = engine.ingest_signals_at("acme", &batch(), t0()).await.unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.snapshot_id, result.snapshot.id);
        assert_eq!(event.trigger, SnapshotTrigger::Signals);
    }

    #[tokio::test]
    async fn invalid_signal_keeps_previous_snapshot() {
        let (_dir, engine) = engine();
        let good = engine.ingest_signals_at("acme", &batch(), t0()).await.unwrap();
        let mut bad = batch();
        bad.signals[0].value = Some(-5.0);
        let err = engine
            .ingest_signals_at("acme", &bad, t0() + Duration::hours(1))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidSignalRange { .. }));
        assert_eq!(engine.latest_snapshot("acme").unwrap().id, good.snapshot.id);
    }

    #[tokio::test]
    async fn newer_forecast_supersedes_older() {
        let (_dir, engine) = engine();
        engine.ingest_signals_at("acme", &batch(), t0()).await.unwrap();
        let request = ForecastRequest {
            horizon_weeks: 4,
            actions: vec![PlannedAction {
                id: "campaign".to_string(),
                status: ActionStatus::Planned,
                expected_driver_lift: Some(10.0),
                driver_weight: Some(0.5),
                success_probability: Some(0.6),
                lands_in_weeks: 1,
            }],
        };
        let (older, newer) = futures::join!(
            engine.forecast("acme", &request),
            engine.forecast("acme", &request)
        );
        assert!(matches!(older, Err(EngineError::ForecastSuperseded { .. })));
        let newer = newer.unwrap();
        assert_eq!(newer.series.len(), 4);
        assert_eq!(newer.breakdown.len(), 1);
        assert!(engine.forecast_generations.lock().await.is_empty());
    }

    #[tokio::test]
    async fn override_of_missing_flag_is_not_found() {
        let (_dir, engine) = engine();
        let err = engine
            .override_flag("acme", "missing", "ops", "checked")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
    }

    fn batch_with_backlinks(backlinks: u64) -> SignalBatch {
        let mut batch = batch();
        batch.volume = Some(VolumeCounters {
            backlinks,
            citation_sources: 10,
            press_mentions: 10,
            distinct_citation_domains: 8,
        });
        batch
    }

    #[tokio::test]
    async fn override_deactivates_flag_and_lifts_penalty() {
        let (_dir, engine) = engine();
        // listing evaluates against the wall clock, so the flag must be live now
        let now = Utc::now();
        engine
            .ingest_signals_at("acme", &batch_with_backlinks(10), now - Duration::weeks(1))
            .await
            .unwrap();
        let spiked = engine
            .ingest_signals_at("acme", &batch_with_backlinks(50), now)
            .await
            .unwrap();
        assert_eq!(spiked.new_flags.len(), 1);
        let flag_id = spiked.new_flags[0].id.clone();
        assert!(spiked.snapshot.provenance.penalty_multiplier < 1.0);

        let listed = engine.list_flags("acme").unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].active);

        let record = engine
            .override_flag("acme", &flag_id, "ops", "verified partner campaign")
            .await
            .unwrap();
        assert_eq!(record.flag_id, flag_id);

        let listed = engine.list_flags("acme").unwrap();
        assert!(!listed[0].active);
        assert_eq!(
            listed[0].override_record.as_ref().map(|o| o.operator.as_str()),
            Some("ops")
        );

        let after = engine
            .run_tick_at("acme", false, now + Duration::minutes(1))
            .await
            .unwrap();
        assert!(after.active_gaming_flag_ids.is_empty());
        assert_eq!(after.provenance.penalty_multiplier, 1.0);
    }

    #[tokio::test]
    async fn tick_all_covers_every_org() {
        let (_dir, engine) = engine();
        for org in ["acme", "globex", "initech"] {
            engine.ingest_signals_at(org, &batch(), t0()).await.unwrap();
        }
        let summary = engine.tick_all(t0() + Duration::days(1)).await.unwrap();
        assert_eq!(summary.ticked, 3);
        assert_eq!(summary.failed, 0);
        for org in ["acme", "globex", "initech"] {
            let latest = engine.latest_snapshot(org).unwrap();
            assert_eq!(latest.trigger, SnapshotTrigger::ScheduledTick);
            assert!(latest.evi < 61.5);
        }
    }

    #[tokio::test]
    async fn finished_forecasts_release_their_generation() {
        let (_dir, engine) = engine();
        engine.ingest_signals_at("acme", &batch(), t0()).await.unwrap();
        for horizon in [4, 8, 12] {
            let request = ForecastRequest {
                horizon_weeks: horizon,
                actions: Vec::new(),
            };
            engine.forecast("acme", &request).await.unwrap();
        }
        let missing = engine
            .forecast(
                "ghost",
                &ForecastRequest {
                    horizon_weeks: 4,
                    actions: Vec::new(),
                },
            )
            .await;
        assert!(matches!(missing, Err(EngineError::NotFound { .. })));
        assert!(engine.forecast_generations.lock().await.is_empty());
    }
}
