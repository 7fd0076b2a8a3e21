//! Parallel fan-out/fan-in over whole-document recognitions.
//!
//! One worker per submitted item. Workers lease an exclusive
//! [`RecognitionEngine`] from the pool and report through a channel keyed by
//! submission slot. A worker's timeout covers its own work only; the clock
//! stops while it waits for an engine.

use crate::engine::RecognitionEngine;
use crate::error::OcrError;
use crate::ocr::TextDetector;
use crate::segment::{DetectedBox, LineGrouper};
use anyhow::Context;
use image::RgbImage;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// One document submitted for recognition.
#[derive(Debug, Clone)]
pub struct JobItem {
    pub id: String,
    pub image_bytes: Vec<u8>,
}

/// Text produced for one submitted item; lines are joined with `\n`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct JobResult {
    pub id: String,
    pub text: String,
}

/// Builds one engine with its own scorer session.
pub type EngineFactory = Arc<dyn Fn() -> anyhow::Result<RecognitionEngine> + Send + Sync>;

const LEASED: u8 = 0;
const RETURNED: u8 = 1;
const ABANDONED: u8 = 2;

struct PoolShared {
    idle: Mutex<Vec<RecognitionEngine>>,
    /// One permit per idle engine.
    available: Semaphore,
    /// Engines that exist or are being rebuilt; the pool closes at zero.
    live: AtomicUsize,
    factory: EngineFactory,
}

impl PoolShared {
    fn idle(&self) -> MutexGuard<'_, Vec<RecognitionEngine>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self, engine: RecognitionEngine) {
        self.idle().push(engine);
        self.available.add_permits(1);
    }

    /// Rebuild an abandoned engine on the blocking pool.
    fn replace(self: Arc<Self>) {
        tokio::task::spawn_blocking(move || match (self.factory)() {
            Ok(engine) => {
                info!("EnginePool: replacement engine ready");
                self.release(engine);
            }
            Err(e) => {
                warn!("EnginePool: failed to rebuild engine: {:#}", e);
                if self.live.fetch_sub(1, Ordering::AcqRel) == 1 {
                    warn!("EnginePool: no engines left, closing pool");
                    self.available.close();
                }
            }
        });
    }
}

/// Fixed set of independently constructed engines.
///
/// Scorer sessions are never shared: a worker holds an engine exclusively
/// through an [`EngineLease`]. A lease given up through its [`LeaseTicket`]
/// is replaced by a freshly built engine, so an inference that never ends
/// cannot starve later workers.
pub struct EnginePool {
    shared: Arc<PoolShared>,
    size: usize,
}

impl EnginePool {
    /// Build `size` engines up front; any construction failure is fatal.
    pub fn new(size: usize, factory: EngineFactory) -> anyhow::Result<Self> {
        anyhow::ensure!(size > 0, "Engine pool needs at least one engine");
        let engines = (0..size)
            .map(|slot| factory().with_context(|| format!("Failed to create engine {}", slot)))
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(Self {
            shared: Arc::new(PoolShared {
                idle: Mutex::new(engines),
                available: Semaphore::new(size),
                live: AtomicUsize::new(size),
                factory,
            }),
            size,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    #[cfg(test)]
    fn idle(&self) -> usize {
        self.shared.available.available_permits()
    }

    /// Wait for a free engine. Fails once every engine has been lost.
    pub async fn acquire(&self) -> Result<EngineLease, OcrError> {
        let permit = self
            .shared
            .available
            .acquire()
            .await
            .map_err(|_| OcrError::Pool)?;
        permit.forget();

        let engine = self.shared.idle().pop().ok_or(OcrError::Pool)?;
        Ok(EngineLease {
            engine: Some(engine),
            state: Arc::new(AtomicU8::new(LEASED)),
            shared: Arc::clone(&self.shared),
        })
    }
}

pub struct EngineLease {
    engine: Option<RecognitionEngine>,
    state: Arc<AtomicU8>,
    shared: Arc<PoolShared>,
}

impl EngineLease {
    /// Handle for giving up on this lease after the lease itself has moved
    /// into a blocking task.
    pub fn ticket(&self) -> LeaseTicket {
        LeaseTicket {
            state: Arc::clone(&self.state),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl std::ops::Deref for EngineLease {
    type Target = RecognitionEngine;

    fn deref(&self) -> &RecognitionEngine {
        self.engine.as_ref().expect("engine present until drop")
    }
}

impl std::ops::DerefMut for EngineLease {
    fn deref_mut(&mut self) -> &mut RecognitionEngine {
        self.engine.as_mut().expect("engine present until drop")
    }
}

impl Drop for EngineLease {
    fn drop(&mut self) {
        let Some(engine) = self.engine.take() else {
            return;
        };
        match self
            .state
            .compare_exchange(LEASED, RETURNED, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => self.shared.release(engine),
            // already replaced
            Err(_) => debug!("EnginePool: discarding abandoned engine"),
        }
    }
}

pub struct LeaseTicket {
    state: Arc<AtomicU8>,
    shared: Arc<PoolShared>,
}

impl LeaseTicket {
    /// Give the leased engine up for lost and build a replacement. The
    /// original is dropped whenever its inference ends. No-op if the lease
    /// was already returned.
    pub fn abandon(self) {
        if self
            .state
            .compare_exchange(LEASED, ABANDONED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.shared.replace();
        }
    }
}

pub struct Orchestrator {
    detector: Arc<dyn TextDetector>,
    engines: Arc<EnginePool>,
    grouper: LineGrouper,
    worker_timeout: Duration,
}

impl Orchestrator {
    pub fn new(
        detector: Arc<dyn TextDetector>,
        engines: EnginePool,
        grouper: LineGrouper,
        worker_timeout: Duration,
    ) -> Self {
        Self {
            detector,
            engines: Arc::new(engines),
            grouper,
            worker_timeout,
        }
    }

    pub fn workers(&self) -> usize {
        self.engines.size()
    }

    /// Recognize every item concurrently. Always returns one result per
    /// item, in submission order; items that fail or time out get empty
    /// text.
    pub async fn recognize_batch(&self, items: Vec<JobItem>) -> Result<Vec<JobResult>, OcrError> {
        if items.is_empty() {
            return Err(OcrError::EmptyBatch);
        }

        let count = items.len();
        let (tx, mut rx) = mpsc::channel::<(usize, String)>(count);
        let mut workers = JoinSet::new();
        let mut ids = Vec::with_capacity(count);

        info!("Orchestrator: dispatching {} workers", count);
        for (slot, item) in items.into_iter().enumerate() {
            ids.push(item.id.clone());
            let tx = tx.clone();
            let detector = Arc::clone(&self.detector);
            let engines = Arc::clone(&self.engines);
            let grouper = self.grouper;
            let timeout = self.worker_timeout;
            workers.spawn(async move {
                let text = run_worker(item, detector, engines, grouper, timeout).await;
                let _ = tx.send((slot, text)).await;
            });
        }
        drop(tx);

        // Every worker bounds its own work, so the channel closes once each
        // has reported or crashed.
        let mut texts: Vec<Option<String>> = vec![None; count];
        let mut received = 0;
        while let Some((slot, text)) = rx.recv().await {
            if texts[slot].replace(text).is_none() {
                received += 1;
            }
        }

        let results: Vec<JobResult> = ids
            .into_iter()
            .zip(texts)
            .map(|(id, text)| {
                if text.is_none() {
                    warn!("Orchestrator: no result for item {}, using empty text", id);
                }
                JobResult {
                    id,
                    text: text.unwrap_or_default(),
                }
            })
            .collect();

        info!("Orchestrator: batch complete ({}/{} reported)", received, count);
        Ok(results)
    }
}

/// Decoded page plus the detector outcome, which the line fallback needs.
type Prepared = (RgbImage, Result<Vec<DetectedBox>, OcrError>);

/// Full recognition of one item. Never fails: every error degrades to
/// empty text for this item only.
async fn run_worker(
    item: JobItem,
    detector: Arc<dyn TextDetector>,
    engines: Arc<EnginePool>,
    grouper: LineGrouper,
    timeout: Duration,
) -> String {
    let id = item.id;
    let started = Instant::now();

    let prepared = tokio::time::timeout(timeout, prepare(item.image_bytes, detector.as_ref())).await;
    let (image, boxes) = match prepared {
        Ok(Ok(prepared)) => prepared,
        Ok(Err(e)) => {
            warn!("Worker {}: {}", id, e);
            return String::new();
        }
        Err(_) => {
            warn!("Worker {}: timed out after {:?} before recognition", id, timeout);
            return String::new();
        }
    };

    let budget = timeout.saturating_sub(started.elapsed());
    let mut engine = match engines.acquire().await {
        Ok(engine) => engine,
        Err(e) => {
            warn!("Worker {}: {}", id, e);
            return String::new();
        }
    };

    let ticket = engine.ticket();
    let task_id = id.clone();
    let inference = tokio::task::spawn_blocking(move || {
        recognize_page(&mut engine, &grouper, &image, boxes, &task_id)
    });

    match tokio::time::timeout(budget, inference).await {
        Ok(Ok(text)) => {
            debug!("Worker {}: {} chars", id, text.chars().count());
            text
        }
        Ok(Err(e)) => {
            warn!("Worker {}: recognition task failed: {}", id, e);
            String::new()
        }
        Err(_) => {
            warn!("Worker {}: timed out after {:?}, abandoning its engine", id, timeout);
            ticket.abandon();
            String::new()
        }
    }
}

async fn prepare(bytes: Vec<u8>, detector: &dyn TextDetector) -> Result<Prepared, OcrError> {
    let image = tokio::task::spawn_blocking(move || decode_image(&bytes))
        .await
        .map_err(|e| OcrError::InvalidImage(format!("decode task failed: {e}")))??;
    let boxes = detector
        .detect(&image)
        .await
        .map_err(|e| OcrError::Detection(e.to_string()));
    Ok((image, boxes))
}

pub fn decode_image(bytes: &[u8]) -> Result<RgbImage, OcrError> {
    Ok(image::load_from_memory(bytes)?.to_rgb8())
}

/// Line-level recognition with a single whole-image retry on failure.
pub fn recognize_page(
    engine: &mut RecognitionEngine,
    grouper: &LineGrouper,
    image: &RgbImage,
    boxes: Result<Vec<DetectedBox>, OcrError>,
    id: &str,
) -> String {
    boxes
        .and_then(|boxes| decode_lines(engine, grouper, image, &boxes))
        .unwrap_or_else(|e| {
            warn!("Worker {}: line decode failed ({}), retrying whole image", id, e);
            engine.recognize(image)
        })
}

/// Decode each detected line, or the whole image when grouping yields no crops.
fn decode_lines(
    engine: &mut RecognitionEngine,
    grouper: &LineGrouper,
    image: &RgbImage,
    boxes: &[DetectedBox],
) -> Result<String, OcrError> {
    let crops = grouper.crop_lines(image, boxes);
    if crops.is_empty() {
        return engine.try_recognize(image);
    }

    let mut lines = Vec::with_capacity(crops.len());
    for crop in &crops {
        let text = engine.try_recognize(crop)?;
        let text = text.trim();
        if !text.is_empty() {
            lines.push(text.to_string());
        }
    }
    Ok(lines.join("\n"))
}
