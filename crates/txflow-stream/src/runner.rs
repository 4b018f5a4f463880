//! The run orchestrator. Wires the window plan, fetch pipeline, correlation
//! engine and cursor store together.
//!
//! For every delivered message:
//!   - Classify the height (prefetch / in range / postfetch) and derive visibility flags
//!   - Feed it through the correlation engine, dispatching indexer callbacks
//!   - Apply the error policy (stop, or log and continue)
//!   - Persist `height + 1` as the resume cursor for in-range heights
//!
//! Whatever happens, the runner waits for the pipeline to finish and calls
//! [`Indexer::finalize`] exactly once.

use std::sync::Arc;
use std::time::Duration;

use txflow_core::{
    CorrelationEngine, CursorStore, Indexer, IndexerError, Region, RunConfig, WindowPlan,
};

use crate::pipeline::{OrderedFetchPipeline, PipelineStats};
use crate::source::MessageSource;

/// What a finished run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Messages fed through the correlation engine without error.
    pub processed_blocks: u64,
    /// Messages whose callbacks failed (only non-zero when `stop_on_error` is off).
    pub failed_blocks: u64,
    /// Heights the source reported as absent.
    pub absent_heights: u64,
    /// Transactions whose receipts all resolved during this run.
    pub completed_transactions: u64,
    /// Transactions still open when the run ended (discarded).
    pub open_transactions: usize,
    /// Last height delivered to the engine.
    pub last_height: Option<u64>,
}

/// Drives one indexer over the configured range.
pub struct IndexRunner {
    config: RunConfig,
    source: Arc<dyn MessageSource>,
    cursor: Option<Arc<dyn CursorStore>>,
    stats: Arc<PipelineStats>,
}

impl IndexRunner {
    /// Create a runner. Fails if `config` does not validate.
    pub fn new(config: RunConfig, source: Arc<dyn MessageSource>) -> Result<Self, IndexerError> {
        config.validate()?;
        Ok(Self {
            config,
            source,
            cursor: None,
            stats: Arc::new(PipelineStats::default()),
        })
    }

    /// Persist the resume cursor in `store`.
    pub fn with_cursor_store(mut self, store: Arc<dyn CursorStore>) -> Self {
        self.cursor = Some(store);
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Live fetch counters for this runner.
    pub fn stats(&self) -> Arc<PipelineStats> {
        Arc::clone(&self.stats)
    }

    /// Resolve the range (consulting the cursor store if needed) and plan the window.
    pub async fn plan(&self) -> WindowPlan {
        let cursor = match (&self.cursor, self.config.range.uses_cursor()) {
            (Some(store), true) => match store.load().await {
                Ok(next) => next,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to load cursor; using default start");
                    None
                }
            },
            _ => None,
        };
        if let Some(next) = cursor {
            tracing::info!(indexer = %self.config.id, next, "resuming from cursor");
        }
        self.config.plan(cursor)
    }

    /// Run `indexer` over the configured range.
    ///
    /// Under `stop_on_error` the first callback failure ends the run and is returned
    /// after finalization; otherwise failures are logged and the run moves on.
    pub async fn run<I>(&self, indexer: &mut I) -> Result<RunSummary, IndexerError>
    where
        I: Indexer + ?Sized,
    {
        let plan = self.plan().await;
        let mut summary = RunSummary::default();

        if plan.is_empty() {
            tracing::info!(
                indexer = %self.config.id,
                start = plan.range().start,
                end = ?plan.range().end,
                "requested range is empty; nothing to fetch"
            );
            indexer.finalize().await?;
            return Ok(summary);
        }

        tracing::info!(
            indexer = %self.config.id,
            start = plan.range().start,
            end = ?plan.range().end,
            fetch_start = plan.fetch_start(),
            fetch_end = ?plan.fetch_end(),
            preprocessing = plan.preprocessing(),
            workers = self.config.workers,
            "Starting run"
        );

        let pipeline = OrderedFetchPipeline::new(
            Arc::clone(&self.source),
            self.config.workers,
            Duration::from_millis(self.config.retry_delay_ms),
        )
        .with_stats(Arc::clone(&self.stats));
        let (mut feed, handle) = pipeline.spawn(plan.fetch_start(), plan.fetch_end());

        let mut engine = CorrelationEngine::new(self.config.unknown_status_success);
        let mut failure: Option<IndexerError> = None;

        while let Some(message) = feed.next().await {
            let height = message.height();
            let region = plan.region(height);

            match engine.observe(&message, plan.flags(height), &mut *indexer).await {
                Ok(report) => {
                    summary.processed_blocks += 1;
                    summary.completed_transactions += report.completed as u64;
                }
                Err(e) if self.config.stop_on_error => {
                    tracing::error!(height, error = %e, "indexer failed; stopping run");
                    failure = Some(e);
                    break;
                }
                Err(e) => {
                    summary.failed_blocks += 1;
                    tracing::warn!(height, error = %e, "indexer failed; continuing");
                }
            }
            summary.last_height = Some(height);

            if region == Region::InRange {
                self.save_cursor(height + 1).await;
            }
        }

        if failure.is_some() {
            feed.close();
            handle.cancel();
        }
        drop(feed);
        let pipeline_result = handle.wait().await;

        summary.open_transactions = engine.open_count();
        if let Ok(report) = &pipeline_result {
            summary.absent_heights = report.absent;
        }
        if summary.open_transactions > 0 {
            tracing::info!(
                open = summary.open_transactions,
                "transactions still open at end of run; discarding"
            );
        }

        let finalized = indexer.finalize().await;

        if let Some(e) = failure {
            if let Err(fin) = finalized {
                tracing::warn!(error = %fin, "finalize failed after aborted run");
            }
            return Err(e);
        }
        pipeline_result?;
        finalized?;

        tracing::info!(
            indexer = %self.config.id,
            processed = summary.processed_blocks,
            failed = summary.failed_blocks,
            completed = summary.completed_transactions,
            last_height = ?summary.last_height,
            "Run complete"
        );
        Ok(summary)
    }

    async fn save_cursor(&self, next_height: u64) {
        let Some(store) = &self.cursor else {
            return;
        };
        if let Err(e) = store.save(next_height).await {
            tracing::warn!(next_height, error = %e, "failed to save cursor");
        }
    }
}
