//! Quota-gated concurrent batch processing.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::asset::{AssetEncoder, DEFAULT_JPEG_QUALITY};
use crate::error::{BatchError, ProcessError};
use crate::store::{AccountLedger, AssetStore, ProcessingEvent};
use crate::style::{ImageStats, StyleEngine, StyleRequest};

use super::quota::{CallerContext, QuotaPolicy};

// =============================================================================
// Items and Results
// =============================================================================

/// One image submitted for processing.
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub image: Bytes,
    pub request: StyleRequest,
}

impl BatchItem {
    pub fn new(image: impl Into<Bytes>, request: StyleRequest) -> Self {
        Self {
            image: image.into(),
            request,
        }
    }
}

/// A processed and persisted item.
#[derive(Debug, Clone)]
pub struct ItemSuccess {
    pub asset_name: String,
    /// Treatment label, as recorded in the caller's history
    pub label: String,
    pub elapsed: Duration,
    pub width: u32,
    pub height: u32,
    pub input_stats: Option<ImageStats>,
    pub output_stats: Option<ImageStats>,
}

#[derive(Debug, Clone)]
pub enum BatchOutcome {
    Success(ItemSuccess),
    Failure { reason: String },
}

/// Outcome of the item at `index` in the submitted batch.
#[derive(Debug, Clone)]
pub struct BatchResult {
    pub index: usize,
    pub outcome: BatchOutcome,
}

impl BatchResult {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, BatchOutcome::Success(_))
    }

    pub fn success(&self) -> Option<&ItemSuccess> {
        match &self.outcome {
            BatchOutcome::Success(item) => Some(item),
            BatchOutcome::Failure { .. } => None,
        }
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match &self.outcome {
            BatchOutcome::Success(_) => None,
            BatchOutcome::Failure { reason } => Some(reason),
        }
    }
}

// =============================================================================
// Dispatcher
// =============================================================================

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// JPEG quality of persisted base assets
    pub jpeg_quality: u8,
    pub quota: QuotaPolicy,
    /// Upper bound on concurrent workers; defaults to the available parallelism
    pub max_workers: Option<usize>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            quota: QuotaPolicy::default(),
            max_workers: None,
        }
    }
}

/// Runs stylization requests for a caller, persists the results and records
/// them in the caller's history.
///
/// # Type Parameters
///
/// * `S` - Where processed base assets are persisted
/// * `L` - Usage counter and history log
pub struct BatchDispatcher<S: AssetStore, L: AccountLedger> {
    engine: StyleEngine,
    store: Arc<S>,
    ledger: Arc<L>,
    encoder: AssetEncoder,
    config: DispatcherConfig,
}

impl<S, L> BatchDispatcher<S, L>
where
    S: AssetStore + 'static,
    L: AccountLedger + 'static,
{
    pub fn new(engine: StyleEngine, store: Arc<S>, ledger: Arc<L>, config: DispatcherConfig) -> Self {
        Self {
            engine,
            store,
            ledger,
            encoder: AssetEncoder::new(),
            config,
        }
    }

    pub fn engine(&self) -> &StyleEngine {
        &self.engine
    }

    pub fn ledger(&self) -> &Arc<L> {
        &self.ledger
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Process a batch. The quota is checked once for the whole batch before
    /// any item runs; results are returned in submission order.
    ///
    /// # Errors
    ///
    /// Only batch-fatal conditions are errors: `QuotaExceeded` and a failing
    /// usage lookup. Item failures are reported in their [`BatchResult`].
    pub async fn dispatch(
        &self,
        caller: &CallerContext,
        items: Vec<BatchItem>,
    ) -> Result<Vec<BatchResult>, BatchError> {
        if items.is_empty() {
            return Ok(Vec::new());
        }
        self.admit(caller, items.len()).await?;

        let workers = self.worker_count(items.len());
        let permits = Arc::new(Semaphore::new(workers));
        debug!(
            caller = %caller.caller_id,
            items = items.len(),
            workers = workers,
            "Dispatching batch"
        );

        let mut handles = Vec::with_capacity(items.len());
        for item in items {
            let worker = self.worker(caller);
            let permits = Arc::clone(&permits);
            handles.push(tokio::spawn(async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|e| ProcessError::Worker(e.to_string()))?;
                worker.run(item).await
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (index, handle) in handles.into_iter().enumerate() {
            let outcome = match handle.await {
                Ok(Ok(success)) => BatchOutcome::Success(success),
                Ok(Err(e)) => BatchOutcome::Failure {
                    reason: e.to_string(),
                },
                Err(e) => BatchOutcome::Failure {
                    reason: ProcessError::Worker(e.to_string()).to_string(),
                },
            };
            results.push(BatchResult { index, outcome });
        }

        let succeeded = results.iter().filter(|r| r.is_success()).count();
        info!(
            caller = %caller.caller_id,
            items = results.len(),
            succeeded = succeeded,
            failed = results.len() - succeeded,
            "Batch complete"
        );
        Ok(results)
    }

    /// Process one item in the calling task, counting it as a batch of one.
    pub async fn process(
        &self,
        caller: &CallerContext,
        item: BatchItem,
    ) -> Result<ItemSuccess, ProcessError> {
        self.admit(caller, 1).await?;
        self.worker(caller).run(item).await
    }

    async fn admit(&self, caller: &CallerContext, requested: usize) -> Result<(), BatchError> {
        if !caller.tier.is_constrained() {
            return Ok(());
        }
        let used = self
            .ledger
            .usage_count(&caller.caller_id, self.config.quota.window)
            .await?;
        let requested = u32::try_from(requested).unwrap_or(u32::MAX);

        if let Err(e) = self.config.quota.check(caller, used, requested) {
            warn!(caller = %caller.caller_id, used = used, requested = requested, "Quota exceeded");
            return Err(e);
        }
        Ok(())
    }

    fn worker_count(&self, items: usize) -> usize {
        let available = self.config.max_workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        });
        available.min(items).max(1)
    }

    fn worker(&self, caller: &CallerContext) -> Worker<S, L> {
        Worker {
            engine: self.engine.clone(),
            store: Arc::clone(&self.store),
            ledger: Arc::clone(&self.ledger),
            encoder: self.encoder.clone(),
            caller: caller.clone(),
            jpeg_quality: self.config.jpeg_quality,
        }
    }
}

/// Everything one item needs, owned so it can move into a task.
struct Worker<S, L> {
    engine: StyleEngine,
    store: Arc<S>,
    ledger: Arc<L>,
    encoder: AssetEncoder,
    caller: CallerContext,
    jpeg_quality: u8,
}

impl<S: AssetStore, L: AccountLedger> Worker<S, L> {
    async fn run(self, item: BatchItem) -> Result<ItemSuccess, ProcessError> {
        let mut request = item.request;
        request.tier = self.caller.tier.grant_resolution(request.tier);
        let label = request.treatment.label();

        let engine = self.engine;
        let encoder = self.encoder;
        let quality = self.jpeg_quality;
        let image = item.image;
        let (result, encoded) = tokio::task::spawn_blocking(move || {
            let result = engine.process(&image, &request)?;
            let encoded = encoder.encode_jpeg(&result.image, quality)?;
            Ok::<_, ProcessError>((result, encoded))
        })
        .await
        .map_err(|e| ProcessError::Worker(e.to_string()))??;

        let asset_name = self
            .store
            .persist_asset(encoded)
            .await
            .map_err(ProcessError::Store)?;

        let event = ProcessingEvent::new(
            self.caller.caller_id.as_str(),
            asset_name.as_str(),
            label.as_str(),
            result.elapsed,
        );
        if let Err(e) = self.ledger.log_processing_event(event).await {
            warn!(
                caller = %self.caller.caller_id,
                asset = %asset_name,
                error = %e,
                "Failed to record processing event"
            );
        }

        Ok(ItemSuccess {
            asset_name,
            label,
            elapsed: result.elapsed,
            width: result.image.width(),
            height: result.image.height(),
            input_stats: result.input_stats,
            output_stats: result.output_stats,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
