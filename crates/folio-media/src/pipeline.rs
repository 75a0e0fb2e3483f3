//! Bounded, deduplicating worker pool that renders and stores image variants.
//!
//! Producers call [`VariantPipeline::enqueue`], which never waits: it claims
//! the in-flight marker for the `(id, width)` pair and tries to push the job
//! into a bounded queue. A fixed set of workers pulls jobs, renders them on
//! the blocking pool, and writes the result back through the store.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use folio_storage::{read_all, StorageProvider};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

use crate::asset_id::{AssetId, VariantKey, VariantWidth};
use crate::codec::{self, EncodedVariant};
use crate::error::{MediaError, MediaResult};

/// Worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Number of workers; 0 picks available parallelism minus one.
    pub workers: usize,
    /// Jobs the queue holds before enqueue reports backpressure.
    pub queue_capacity: usize,
    /// Deadline given to each background job, in seconds.
    pub job_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            queue_capacity: 25,
            job_timeout_secs: 10,
        }
    }
}

impl PipelineConfig {
    /// Resolved worker count, never below one.
    pub fn worker_count(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2)
            .saturating_sub(1)
            .max(1)
    }

    /// Per-job deadline as a duration.
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }
}

/// One request to render a variant.
#[derive(Debug, Clone)]
pub struct VariantJob {
    /// Storage key of the source image.
    pub source_path: String,
    /// Asset the variant belongs to.
    pub id: AssetId,
    /// Target width.
    pub width: VariantWidth,
    /// Span the worker span follows from.
    pub follows_from: Option<tracing::Id>,
    /// Point after which the job is abandoned.
    pub deadline: Option<Instant>,
}

impl VariantJob {
    /// Creates a job with no deadline and no trace linkage.
    pub fn new(source_path: impl Into<String>, id: AssetId, width: VariantWidth) -> Self {
        Self {
            source_path: source_path.into(),
            id,
            width,
            follows_from: None,
            deadline: None,
        }
    }

    /// Sets the deadline.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Links the worker span to `span`.
    pub fn following(mut self, span: &Span) -> Self {
        self.follows_from = span.id();
        self
    }

    /// Deduplication key.
    pub fn key(&self) -> VariantKey {
        VariantKey::new(self.id, self.width)
    }
}

/// Claim on one in-flight key, released when dropped.
struct InFlightMarker {
    key: VariantKey,
    set: Arc<DashSet<VariantKey>>,
}

impl Drop for InFlightMarker {
    fn drop(&mut self) {
        self.set.remove(&self.key);
    }
}

struct QueuedJob {
    job: VariantJob,
    _marker: InFlightMarker,
}

/// Pipeline counters.
#[derive(Debug, Default)]
pub struct PipelineStats {
    enqueued: AtomicU64,
    deduplicated: AtomicU64,
    rejected: AtomicU64,
    skipped: AtomicU64,
    stored: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineSnapshot {
    /// Jobs accepted into the queue.
    pub enqueued: u64,
    /// Enqueue calls absorbed by an in-flight job for the same key.
    pub deduplicated: u64,
    /// Enqueue calls refused because the queue was full.
    pub rejected: u64,
    /// Jobs whose variant was already stored.
    pub skipped: u64,
    /// Variants rendered and saved.
    pub stored: u64,
    /// Jobs discarded after an error or a missed deadline.
    pub failed: u64,
}

impl PipelineStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Reads every counter.
    pub fn snapshot(&self) -> PipelineSnapshot {
        PipelineSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            deduplicated: self.deduplicated.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            stored: self.stored.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

enum JobOutcome {
    Skipped,
    Stored(EncodedVariant),
}

/// Handle to a running worker pool.
pub struct VariantPipeline {
    tx: mpsc::Sender<QueuedJob>,
    in_flight: Arc<DashSet<VariantKey>>,
    stats: Arc<PipelineStats>,
    shutdown: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
}

impl VariantPipeline {
    /// Spawns the workers. Cancelling `root` tears the pool down.
    pub fn start(
        config: &PipelineConfig,
        store: Arc<dyn StorageProvider>,
        root: &CancellationToken,
    ) -> Self {
        let worker_count = config.worker_count();
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let stats = Arc::new(PipelineStats::default());
        let shutdown = root.child_token();

        let workers = (0..worker_count)
            .map(|worker_id| {
                tokio::spawn(worker_loop(
                    worker_id,
                    rx.clone(),
                    store.clone(),
                    stats.clone(),
                    shutdown.clone(),
                ))
            })
            .collect();

        info!(
            workers = worker_count,
            queue_capacity = config.queue_capacity,
            backend = store.backend_name(),
            "variant pipeline started"
        );

        Self {
            tx,
            in_flight: Arc::new(DashSet::new()),
            stats,
            shutdown,
            workers: Mutex::new(workers),
            worker_count,
        }
    }

    /// Schedules `job` without waiting for queue capacity.
    ///
    /// A job whose key is already queued or processing is absorbed and
    /// reported as success.
    pub fn enqueue(&self, job: VariantJob) -> MediaResult<()> {
        if self.shutdown.is_cancelled() {
            return Err(MediaError::ShutDown);
        }

        let key = job.key();
        if !self.in_flight.insert(key) {
            PipelineStats::bump(&self.stats.deduplicated);
            debug!(%key, "variant already in flight");
            return Ok(());
        }
        let marker = InFlightMarker {
            key,
            set: self.in_flight.clone(),
        };

        if job.deadline.is_some_and(|deadline| deadline <= Instant::now()) {
            return Err(MediaError::Cancelled);
        }

        // A refused job is handed back and dropped here, releasing its marker.
        match self.tx.try_send(QueuedJob { job, _marker: marker }) {
            Ok(()) => {
                PipelineStats::bump(&self.stats.enqueued);
                debug!(%key, "variant job queued");
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                PipelineStats::bump(&self.stats.rejected);
                Err(MediaError::Backpressure)
            }
            Err(TrySendError::Closed(_)) => Err(MediaError::ShutDown),
        }
    }

    /// Stops accepting jobs and waits for every worker to return.
    ///
    /// Jobs still waiting in the queue are dropped.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handles = std::mem::take(&mut *self.workers.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "variant worker ended abnormally");
            }
        }
        info!(stats = ?self.stats.snapshot(), "variant pipeline stopped");
    }

    /// Returns true once shutdown has begun.
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Number of keys queued or processing.
    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    /// Returns true while `key` is queued or processing.
    pub fn is_in_flight(&self, key: &VariantKey) -> bool {
        self.in_flight.contains(key)
    }

    /// Counter snapshot.
    pub fn stats(&self) -> PipelineSnapshot {
        self.stats.snapshot()
    }

    /// Number of workers in the pool.
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }
}

async fn worker_loop(
    worker_id: usize,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<QueuedJob>>>,
    store: Arc<dyn StorageProvider>,
    stats: Arc<PipelineStats>,
    shutdown: CancellationToken,
) {
    debug!(worker_id, "variant worker started");
    loop {
        let next = {
            let mut rx = rx.lock().await;
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => None,
                queued = rx.recv() => queued,
            }
        };
        let Some(queued) = next else { break };

        let job = &queued.job;
        let span = info_span!(
            "process_variant",
            worker_id,
            id = %job.id,
            width = job.width.pixels()
        );
        span.follows_from(job.follows_from.clone());

        async {
            match run_job(job, store.as_ref()).await {
                Ok(JobOutcome::Skipped) => {
                    PipelineStats::bump(&stats.skipped);
                    debug!("variant already stored");
                }
                Ok(JobOutcome::Stored(variant)) => {
                    PipelineStats::bump(&stats.stored);
                    info!(
                        bytes = variant.bytes.len(),
                        out_width = variant.width,
                        out_height = variant.height,
                        resized = variant.resized,
                        "variant stored"
                    );
                }
                Err(e) => {
                    PipelineStats::bump(&stats.failed);
                    error!(source = %job.source_path, error = %e, "variant job discarded");
                }
            }
        }
        .instrument(span)
        .await;
    }
    debug!(worker_id, "variant worker stopped");
}

async fn run_job(job: &VariantJob, store: &dyn StorageProvider) -> MediaResult<JobOutcome> {
    let work = render_and_store(job, store);
    match job.deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, work)
            .await
            .unwrap_or(Err(MediaError::Cancelled)),
        None => work.await,
    }
}

async fn render_and_store(job: &VariantJob, store: &dyn StorageProvider) -> MediaResult<JobOutcome> {
    let key = job.key().storage_key();
    if store.exists(&key).await {
        return Ok(JobOutcome::Skipped);
    }

    let source = read_all(store, &job.source_path).await?;
    let max_width = job.width.pixels();
    let variant = tokio::task::spawn_blocking(move || codec::render_variant(&source, max_width))
        .await
        .map_err(|e| MediaError::Codec(format!("render task failed: {e}")))??;

    store.save(&key, variant.bytes.clone()).await?;
    Ok(JobOutcome::Stored(variant))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use folio_storage::MemoryStore;
    use image::{DynamicImage, ImageFormat, RgbImage};
    use std::io::Cursor;
    use uuid::Uuid;

    fn png_bytes(width: u32, height: u32) -> Bytes {
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(RgbImage::new(width, height))
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        Bytes::from(out.into_inner())
    }

    fn asset(path: &str) -> AssetId {
        AssetId::derive(&Uuid::NAMESPACE_URL, path)
    }

    fn config(workers: usize, queue_capacity: usize) -> PipelineConfig {
        PipelineConfig {
            workers,
            queue_capacity,
            job_timeout_secs: 10,
        }
    }

    async fn wait_until(cond: impl Fn() -> bool) {
        for _ in 0..1000 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[test]
    fn test_worker_count_floor() {
        assert!(PipelineConfig::default().worker_count() >= 1);
        assert_eq!(config(3, 25).worker_count(), 3);
        assert_eq!(PipelineConfig::default().job_timeout(), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_duplicate_enqueues_collapse() {
        let store = Arc::new(MemoryStore::new());
        store.save("photo.png", png_bytes(1000, 500)).await.unwrap();
        let root = CancellationToken::new();
        let pipeline = VariantPipeline::start(&config(2, 25), store.clone(), &root);

        let id = asset("photo.png");
        for _ in 0..10 {
            pipeline
                .enqueue(VariantJob::new("photo.png", id, VariantWidth::W800))
                .unwrap();
        }
        let stats = pipeline.stats();
        assert_eq!(stats.enqueued, 1);
        assert_eq!(stats.deduplicated, 9);
        assert_eq!(pipeline.in_flight_len(), 1);

        wait_until(|| pipeline.stats().stored == 1 && pipeline.in_flight_len() == 0).await;
        assert_eq!(store.stats().saves, 2);
        pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn test_full_queue_reports_backpressure() {
        let store = Arc::new(MemoryStore::new());
        let root = CancellationToken::new();
        let pipeline = VariantPipeline::start(&config(1, 2), store, &root);

        let id = asset("photo.png");
        pipeline
            .enqueue(VariantJob::new("photo.png", id, VariantWidth::W800))
            .unwrap();
        pipeline
            .enqueue(VariantJob::new("photo.png", id, VariantWidth::W1200))
            .unwrap();
        let third = VariantJob::new("photo.png", id, VariantWidth::W1920);
        let third_key = third.key();
        assert!(matches!(pipeline.enqueue(third), Err(MediaError::Backpressure)));

        assert!(!pipeline.is_in_flight(&third_key));
        assert_eq!(pipeline.in_flight_len(), 2);
        assert_eq!(pipeline.stats().rejected, 1);
        pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn test_variant_is_downscaled_and_stored() {
        let store = Arc::new(MemoryStore::new());
        store.save("img/photo.png", png_bytes(1000, 500)).await.unwrap();
        let root = CancellationToken::new();
        let pipeline = VariantPipeline::start(&config(1, 25), store.clone(), &root);

        let id = asset("img/photo.png");
        let job = VariantJob::new("img/photo.png", id, VariantWidth::W800);
        let key = job.key().storage_key();
        pipeline.enqueue(job).unwrap();

        wait_until(|| store.get(&key).is_some()).await;
        let stored = store.get(&key).unwrap();
        let decoded = image::load_from_memory(&stored).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (800, 400));
        pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn test_existing_variant_is_skipped() {
        let store = Arc::new(MemoryStore::new());
        let id = asset("photo.png");
        let job = VariantJob::new("photo.png", id, VariantWidth::W1200);
        store
            .save(&job.key().storage_key(), Bytes::from_static(b"already here"))
            .await
            .unwrap();
        let root = CancellationToken::new();
        let pipeline = VariantPipeline::start(&config(1, 25), store.clone(), &root);

        pipeline.enqueue(job).unwrap();
        wait_until(|| pipeline.stats().skipped == 1).await;
        assert_eq!(store.stats().saves, 1);
        assert_eq!(store.stats().opens, 0);
        pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_job_releases_marker() {
        let store = Arc::new(MemoryStore::new());
        store
            .save("broken.jpg", Bytes::from_static(b"not really a jpeg"))
            .await
            .unwrap();
        let root = CancellationToken::new();
        let pipeline = VariantPipeline::start(&config(1, 25), store.clone(), &root);

        let id = asset("broken.jpg");
        pipeline
            .enqueue(VariantJob::new("broken.jpg", id, VariantWidth::W800))
            .unwrap();
        wait_until(|| pipeline.stats().failed == 1 && pipeline.in_flight_len() == 0).await;

        // A later request re-triggers generation.
        pipeline
            .enqueue(VariantJob::new("broken.jpg", id, VariantWidth::W800))
            .unwrap();
        assert_eq!(pipeline.stats().enqueued, 2);
        wait_until(|| pipeline.stats().failed == 2).await;

        // So does a missing source.
        let ghost = asset("ghost.jpg");
        pipeline
            .enqueue(VariantJob::new("ghost.jpg", ghost, VariantWidth::W800))
            .unwrap();
        wait_until(|| pipeline.stats().failed == 3 && pipeline.in_flight_len() == 0).await;
        assert_eq!(pipeline.stats().stored, 0);
        pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn test_expired_deadline_is_cancelled() {
        let store = Arc::new(MemoryStore::new());
        let root = CancellationToken::new();
        let pipeline = VariantPipeline::start(&config(1, 25), store, &root);

        let job = VariantJob::new("photo.png", asset("photo.png"), VariantWidth::W800)
            .with_deadline(Instant::now());
        assert!(matches!(pipeline.enqueue(job), Err(MediaError::Cancelled)));
        assert_eq!(pipeline.in_flight_len(), 0);
        assert_eq!(pipeline.stats().enqueued, 0);
        pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_drops_queued_jobs() {
        let store = Arc::new(MemoryStore::new());
        store.save("photo.png", png_bytes(1000, 500)).await.unwrap();
        let root = CancellationToken::new();
        let pipeline = VariantPipeline::start(&config(2, 25), store.clone(), &root);

        let id = asset("photo.png");
        for width in VariantWidth::ALL {
            pipeline
                .enqueue(VariantJob::new("photo.png", id, width))
                .unwrap();
        }
        assert_eq!(pipeline.in_flight_len(), 3);

        pipeline.shutdown().await;
        assert!(pipeline.is_shut_down());
        assert_eq!(pipeline.in_flight_len(), 0);
        assert_eq!(pipeline.stats().stored, 0);
        assert!(pipeline.workers.lock().is_empty());
        assert!(matches!(
            pipeline.enqueue(VariantJob::new("photo.png", id, VariantWidth::W800)),
            Err(MediaError::ShutDown)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shutdown_finishes_running_job() {
        let store = Arc::new(MemoryStore::new());
        store.save("large.png", png_bytes(4000, 3000)).await.unwrap();
        let root = CancellationToken::new();
        let pipeline = VariantPipeline::start(&config(1, 25), store.clone(), &root);

        let id = asset("large.png");
        let job = VariantJob::new("large.png", id, VariantWidth::W800);
        let key = job.key().storage_key();
        pipeline.enqueue(job).unwrap();
        wait_until(|| store.stats().opens >= 1).await;

        pipeline.shutdown().await;
        let stats = pipeline.stats();
        assert_eq!(stats.stored, 1);
        assert_eq!(stats.failed, 0);
        assert_eq!(pipeline.in_flight_len(), 0);
        let decoded = image::load_from_memory(&store.get(&key).unwrap()).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (800, 600));
    }

    #[tokio::test]
    async fn test_root_token_stops_pipeline() {
        let store = Arc::new(MemoryStore::new());
        let root = CancellationToken::new();
        let pipeline = VariantPipeline::start(&config(1, 25), store, &root);

        root.cancel();
        let job = VariantJob::new("photo.png", asset("photo.png"), VariantWidth::W800);
        assert!(matches!(pipeline.enqueue(job), Err(MediaError::ShutDown)));
        pipeline.shutdown().await;
    }
}
