//! Component G: Recovery Engine (§4.G). Produces replay deliveries for a
//! `RecoveryJob`: sources the recent window from the Storage Port's cache, the
//! older window from the durable archive, rate-limits delivery, and retries
//! transient failures before giving up.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::error::{codes, GatewayError, GatewayResult};
use crate::ports::{
    Clock, DocStore, Metrics, RecoveryAcceptance, RecoveryAction, RecoveryDataMessage, RecoveryDeliverySink,
    RecoveryFailureMessage, RecoveryPort, RecoveryRequest,
};
use crate::storage::StoragePort;

use super::model::{ArchivedTick, RecoveryJob, RecoveryJobState};
use super::rate_limiter::TokenBucket;
use super::retry::RetryPolicy;

const ARCHIVE_COLLECTION: &str = "tick_archive";
/// Rough estimate used for `RecoveryAcceptance`: one data point per symbol per second.
const ESTIMATED_POINTS_PER_SECOND_PER_SYMBOL: u64 = 1;

#[derive(Debug, Clone, Copy)]
pub struct RecoveryEngineConfig {
    pub max_recovery_window: std::time::Duration,
    pub batch_size: usize,
    pub rate_limiter_qps: f64,
    pub rate_limiter_burst: f64,
    pub retry: RetryPolicy,
}

impl Default for RecoveryEngineConfig {
    fn default() -> Self {
        Self {
            max_recovery_window: std::time::Duration::from_secs(300),
            batch_size: 200,
            rate_limiter_qps: 50.0,
            rate_limiter_burst: 100.0,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Default)]
pub struct RecoveryStats {
    pub total_jobs: u64,
    pub completed: u64,
    pub failed: u64,
    pub retry: u64,
    pub data_points_recovered: u64,
    pub batches_sent: u64,
    pub rate_limit_hits: u64,
    pub tokens_consumed: u64,
}

#[derive(Default)]
struct AtomicStats {
    total_jobs: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    retry: AtomicU64,
    data_points_recovered: AtomicU64,
    batches_sent: AtomicU64,
    rate_limit_hits: AtomicU64,
    tokens_consumed: AtomicU64,
}

impl AtomicStats {
    fn snapshot(&self) -> RecoveryStats {
        RecoveryStats {
            total_jobs: self.total_jobs.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retry: self.retry.load(Ordering::Relaxed),
            data_points_recovered: self.data_points_recovered.load(Ordering::Relaxed),
            batches_sent: self.batches_sent.load(Ordering::Relaxed),
            rate_limit_hits: self.rate_limit_hits.load(Ordering::Relaxed),
            tokens_consumed: self.tokens_consumed.load(Ordering::Relaxed),
        }
    }
}

struct Inner {
    storage: Arc<StoragePort>,
    archive: Arc<dyn DocStore>,
    sink: Arc<dyn RecoveryDeliverySink>,
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn Metrics>,
    config: RecoveryEngineConfig,
    limiter: TokenBucket,
    stats: AtomicStats,
}

/// A cheaply-cloneable handle: `submit` clones the inner `Arc` into a spawned task
/// rather than needing a self-referencing `Arc<Self>` (§9 "tasks + channels").
#[derive(Clone)]
pub struct RecoveryEngine(Arc<Inner>);

impl RecoveryEngine {
    pub fn new(
        storage: Arc<StoragePort>,
        archive: Arc<dyn DocStore>,
        sink: Arc<dyn RecoveryDeliverySink>,
        clock: Arc<dyn Clock>,
        metrics: Arc<dyn Metrics>,
        config: RecoveryEngineConfig,
    ) -> Self {
        let limiter = TokenBucket::new(config.rate_limiter_qps, config.rate_limiter_burst, clock.clone());
        Self(Arc::new(Inner { storage, archive, sink, clock, metrics, config, limiter, stats: AtomicStats::default() }))
    }

    pub fn stats(&self) -> RecoveryStats {
        self.0.stats.snapshot()
    }

    /// Sources every point in `[job.from_millis, job.to_millis]` for `job.symbols`:
    /// the Storage Port's cached latest value per symbol if it falls in range (the
    /// "recent window" E covers), plus the durable archive for the rest.
    async fn source_points(&self, job: &RecoveryJob) -> GatewayResult<Vec<ArchivedTick>> {
        let mut points = Vec::new();

        for symbol in &job.symbols {
            let key = format!("stream_cache_warm:{symbol}");
            if let Some(value) = self.0.storage.get(&key).await? {
                if let Some(ts) = value.get("timestamp").and_then(|v| v.as_i64()) {
                    if ts >= job.from_millis && ts <= job.to_millis {
                        points.push(ArchivedTick { symbol: symbol.clone(), timestamp_millis: ts, data: value });
                    }
                }
            }
        }

        let archived = self.0.archive.list(ARCHIVE_COLLECTION).await?;
        let wanted: std::collections::HashSet<&String> = job.symbols.iter().collect();
        for doc in archived {
            let Ok(tick) = serde_json::from_value::<ArchivedTick>(doc) else { continue };
            if wanted.contains(&tick.symbol) && tick.timestamp_millis >= job.from_millis && tick.timestamp_millis <= job.to_millis {
                points.push(tick);
            }
        }

        points.sort_by_key(|t| t.timestamp_millis);
        Ok(points)
    }

    async fn run_job(&self, mut job: RecoveryJob) {
        self.0.stats.total_jobs.fetch_add(1, Ordering::Relaxed);
        job.state = RecoveryJobState::Active;

        let points = match self.source_points(&job).await {
            Ok(points) => points,
            Err(err) => {
                self.fail(&job, &err.to_string()).await;
                return;
            }
        };

        let total_batches = points.chunks(self.0.config.batch_size.max(1)).count().max(1) as u32;
        let chunks: Vec<Vec<ArchivedTick>> = points.chunks(self.0.config.batch_size.max(1)).map(|c| c.to_vec()).collect();

        for (index, chunk) in chunks.iter().enumerate() {
            let batch_number = index as u32 + 1;
            let is_last = batch_number == total_batches;
            if !self.deliver_with_retry(&job, batch_number, total_batches, chunk, is_last).await {
                self.fail(&job, "rate limiter retry budget exhausted").await;
                return;
            }
            job.batches_sent += 1;
            job.data_points_recovered += chunk.len() as u64;
        }

        if chunks.is_empty() {
            self.0.sink.deliver_batch(
                &job.client_id,
                RecoveryDataMessage {
                    recovery_batch: 1,
                    total_batches: 1,
                    timestamp: self.0.clock.now_millis(),
                    time_range: (job.from_millis, job.to_millis),
                    is_last_batch: true,
                    data: serde_json::json!([]),
                },
            ).await;
            self.0.stats.batches_sent.fetch_add(1, Ordering::Relaxed);
        }

        job.state = RecoveryJobState::Completed;
        self.0.stats.completed.fetch_add(1, Ordering::Relaxed);
        self.0.stats.data_points_recovered.fetch_add(job.data_points_recovered, Ordering::Relaxed);
        self.0.metrics.increment("recovery_jobs_completed", &[]);
    }

    /// Delivers one batch, retrying on rate-limiter denial per `config.retry` before
    /// giving up (§4.G step 3: "on limiter hit the job is requeued, not dropped").
    async fn deliver_with_retry(
        &self,
        job: &RecoveryJob,
        batch_number: u32,
        total_batches: u32,
        chunk: &[ArchivedTick],
        is_last: bool,
    ) -> bool {
        let cost = chunk.len().max(1) as f64;
        let mut attempt = 1;
        loop {
            if self.0.limiter.try_acquire(cost) {
                self.0.stats.tokens_consumed.fetch_add(cost as u64, Ordering::Relaxed);
                let message = RecoveryDataMessage {
                    recovery_batch: batch_number,
                    total_batches,
                    timestamp: self.0.clock.now_millis(),
                    time_range: (job.from_millis, job.to_millis),
                    is_last_batch: is_last,
                    data: serde_json::to_value(chunk).unwrap_or(serde_json::Value::Null),
                };
                self.0.sink.deliver_batch(&job.client_id, message).await;
                self.0.stats.batches_sent.fetch_add(1, Ordering::Relaxed);
                return true;
            }

            self.0.stats.rate_limit_hits.fetch_add(1, Ordering::Relaxed);
            self.0.stats.retry.fetch_add(1, Ordering::Relaxed);
            let Some(delay) = self.0.config.retry.delay_for(attempt) else {
                return false;
            };
            warn!(client_id = %job.client_id, batch_number, attempt, "recovery batch rate-limited, retrying");
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn fail(&self, job: &RecoveryJob, reason: &str) {
        self.0.stats.failed.fetch_add(1, Ordering::Relaxed);
        self.0.metrics.increment("recovery_jobs_failed", &[]);
        warn!(client_id = %job.client_id, reason, "recovery job failed");
        self.0.sink.deliver_failure(
            &job.client_id,
            RecoveryFailureMessage { action: RecoveryAction::RetryLater, message: reason.to_string() },
        ).await;
    }

    fn estimate_points(&self, request: &RecoveryRequest) -> u64 {
        let seconds = ((request.to_millis - request.from_millis).max(0) / 1000) as u64;
        seconds.saturating_mul(ESTIMATED_POINTS_PER_SECOND_PER_SYMBOL).saturating_mul(request.symbols.len().max(1) as u64)
    }
}

#[async_trait]
impl RecoveryPort for RecoveryEngine {
    async fn submit(&self, request: RecoveryRequest) -> GatewayResult<(String, RecoveryAcceptance)> {
        let window_millis = self.0.config.max_recovery_window.as_millis() as i64;
        if request.to_millis - request.from_millis > window_millis {
            return Err(GatewayError::new(
                codes::STREAM_CACHE_BUSINESS_RECOVERY_WINDOW_EXCEEDED,
                "recovery window exceeded",
            ));
        }

        let job_id = uuid::Uuid::new_v4().to_string();
        let acceptance = RecoveryAcceptance { estimated_data_points: self.estimate_points(&request) };

        let job = RecoveryJob {
            id: job_id.clone(),
            client_id: request.client_id,
            symbols: request.symbols,
            from_millis: request.from_millis,
            to_millis: request.to_millis,
            state: RecoveryJobState::Pending,
            batches_sent: 0,
            data_points_recovered: 0,
            created_at_millis: self.0.clock.now_millis(),
        };

        let this = self.clone();
        tokio::spawn(async move { this.run_job(job).await });

        Ok((job_id, acceptance))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::Mutex as AsyncMutex;

    use super::*;
    use crate::ports::clock::FixedClock;
    use crate::ports::metrics::NoopMetrics;
    use crate::storage::StorageConfig;
    use crate::testutil::{InMemoryDocStore, InMemoryKVStore};

    #[derive(Default)]
    struct RecordingSink {
        batches: AsyncMutex<Vec<(String, RecoveryDataMessage)>>,
        failures: AsyncMutex<Vec<(String, RecoveryFailureMessage)>>,
    }

    #[async_trait]
    impl RecoveryDeliverySink for RecordingSink {
        async fn deliver_batch(&self, client_id: &str, message: RecoveryDataMessage) {
            self.batches.lock().await.push((client_id.to_string(), message));
        }
        async fn deliver_failure(&self, client_id: &str, message: RecoveryFailureMessage) {
            self.failures.lock().await.push((client_id.to_string(), message));
        }
    }

    fn engine(sink: Arc<RecordingSink>) -> (RecoveryEngine, Arc<StoragePort>, Arc<InMemoryDocStore>) {
        let clock = Arc::new(FixedClock::new(1_000_000));
        let kv = Arc::new(InMemoryKVStore::new({
            let clock = clock.clone();
            Arc::new(move || clock.now_millis())
        }));
        let archive = Arc::new(InMemoryDocStore::new());
        let storage =
            Arc::new(StoragePort::new(kv, archive.clone(), clock.clone(), Arc::new(NoopMetrics), StorageConfig::default()));
        let config = RecoveryEngineConfig {
            max_recovery_window: Duration::from_secs(300),
            batch_size: 2,
            rate_limiter_qps: 1000.0,
            rate_limiter_burst: 1000.0,
            retry: RetryPolicy::default(),
        };
        let engine = RecoveryEngine::new(storage.clone(), archive.clone(), sink, clock, Arc::new(NoopMetrics), config);
        (engine, storage, archive)
    }

    #[tokio::test]
    async fn rejects_window_wider_than_configured_maximum() {
        let sink = Arc::new(RecordingSink::default());
        let (engine, _, _) = engine(sink);
        let request = RecoveryRequest {
            client_id: "c1".into(),
            symbols: vec!["AAPL".into()],
            from_millis: 0,
            to_millis: 301_000,
        };
        let err = engine.submit(request).await.unwrap_err();
        assert_eq!(err.code, codes::STREAM_CACHE_BUSINESS_RECOVERY_WINDOW_EXCEEDED);
    }

    #[tokio::test]
    async fn sources_archive_points_and_delivers_batches_with_last_flag() {
        let sink = Arc::new(RecordingSink::default());
        let (engine, _, archive) = engine(sink.clone());

        for (i, ts) in [100_i64, 200, 300].into_iter().enumerate() {
            let doc = serde_json::to_value(ArchivedTick {
                symbol: "AAPL".into(),
                timestamp_millis: ts,
                data: serde_json::json!({"px": i}),
            })
            .unwrap();
            archive.put("tick_archive", &format!("t{i}"), doc).await.unwrap();
        }

        let request = RecoveryRequest {
            client_id: "c1".into(),
            symbols: vec!["AAPL".into()],
            from_millis: 0,
            to_millis: 1000,
        };
        engine.submit(request).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;

        let batches = sink.batches.lock().await;
        assert_eq!(batches.len(), 2);
        assert!(!batches[0].1.is_last_batch);
        assert!(batches[1].1.is_last_batch);
        assert_eq!(batches[1].1.total_batches, 2);
    }

    #[tokio::test]
    async fn empty_range_still_emits_a_single_completed_batch() {
        let sink = Arc::new(RecordingSink::default());
        let (engine, _, _) = engine(sink.clone());

        let request = RecoveryRequest {
            client_id: "c1".into(),
            symbols: vec!["AAPL".into()],
            from_millis: 0,
            to_millis: 1000,
        };
        engine.submit(request).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let batches = sink.batches.lock().await;
        assert_eq!(batches.len(), 1);
        assert!(batches[0].1.is_last_batch);
    }
}
