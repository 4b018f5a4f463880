//! Ordered, bounded-concurrency fetch pipeline.
//!
//! A single coordinator task keeps at most `workers` fetches in flight, claims
//! heights in increasing order, and feeds completions through a [`ReorderBuffer`]
//! so the consumer receives messages in strictly increasing height order. Absent
//! heights are suppressed. Each fetch retries its height forever with a fixed delay.
//!
//! ```text
//!  fetch(h) ─┐
//!  fetch(h+1)├─► ReorderBuffer ──(next_to_emit)──► mpsc ──► MessageFeed
//!  fetch(h+2)┘
//! ```

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, Stream, StreamExt};
use futures::FutureExt;
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

use txflow_core::{IndexerError, StreamMessage};

use crate::source::{MessageSource, SourceError};

// ─── Reorder buffer ───────────────────────────────────────────────────────────

/// Holds out-of-order completions until the next expected height arrives.
#[derive(Debug)]
pub struct ReorderBuffer<T> {
    next_to_emit: u64,
    pending: BTreeMap<u64, Option<T>>,
}

impl<T> ReorderBuffer<T> {
    pub fn new(next_to_emit: u64) -> Self {
        Self {
            next_to_emit,
            pending: BTreeMap::new(),
        }
    }

    /// Record the result for `height` (`None` = absent height).
    ///
    /// Heights already emitted are dropped.
    pub fn insert(&mut self, height: u64, item: Option<T>) {
        if height < self.next_to_emit {
            tracing::debug!(height, next = self.next_to_emit, "dropping already-emitted height");
            return;
        }
        self.pending.insert(height, item);
    }

    /// Remove the entry for `next_to_emit`, if present, and advance.
    pub fn pop_ready(&mut self) -> Option<(u64, Option<T>)> {
        let height = self.next_to_emit;
        let item = self.pending.remove(&height)?;
        self.next_to_emit += 1;
        Some((height, item))
    }

    pub fn next_to_emit(&self) -> u64 {
        self.next_to_emit
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

// ─── Stats ────────────────────────────────────────────────────────────────────

/// Live pipeline counters, shared between the coordinator and observers.
#[derive(Debug, Default)]
pub struct PipelineStats {
    fetched: AtomicU64,
    absent: AtomicU64,
    retries: AtomicU64,
    delivered: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PipelineStatsSnapshot {
    pub fetched: u64,
    pub absent: u64,
    pub retries: u64,
    pub delivered: u64,
}

impl PipelineStats {
    pub fn snapshot(&self) -> PipelineStatsSnapshot {
        PipelineStatsSnapshot {
            fetched: self.fetched.load(Ordering::Relaxed),
            absent: self.absent.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
        }
    }

    fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

// ─── Feed ─────────────────────────────────────────────────────────────────────

/// Consumer end of the pipeline: messages in strictly increasing height order.
///
/// `next()` returns `None` once the pipeline has completed and every delivered
/// message was consumed.
pub struct MessageFeed {
    rx: mpsc::UnboundedReceiver<StreamMessage>,
}

impl MessageFeed {
    pub async fn next(&mut self) -> Option<StreamMessage> {
        self.rx.recv().await
    }

    /// Stop accepting messages; the pipeline notices on its next delivery.
    pub fn close(&mut self) {
        self.rx.close();
    }

    pub fn into_stream(self) -> impl Stream<Item = StreamMessage> {
        futures::stream::unfold(self, |mut feed| async move {
            let message = feed.next().await?;
            Some((message, feed))
        })
    }
}

// ─── Pipeline ─────────────────────────────────────────────────────────────────

/// What the coordinator did before it stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineReport {
    /// Messages handed to the feed.
    pub delivered: u64,
    /// Heights that turned out not to exist.
    pub absent: u64,
    /// First height that was not emitted.
    pub next_height: u64,
    /// `true` if the pipeline stopped before exhausting its range.
    pub cancelled: bool,
}

/// Handle to a running pipeline.
pub struct PipelineHandle {
    token: CancellationToken,
    join: JoinHandle<PipelineReport>,
}

impl PipelineHandle {
    /// Stop claiming heights and abandon in-flight fetches.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Wait for the coordinator to finish.
    pub async fn wait(self) -> Result<PipelineReport, IndexerError> {
        self.join.await.map_err(|e| IndexerError::Aborted {
            reason: format!("fetch pipeline task failed: {e}"),
        })
    }
}

type FetchDone = (u64, Result<Option<Option<StreamMessage>>, JoinError>);

/// Fetches `[start, end)` with bounded concurrency and delivers in order.
pub struct OrderedFetchPipeline {
    source: Arc<dyn MessageSource>,
    workers: usize,
    retry_delay: Duration,
    stats: Arc<PipelineStats>,
}

impl OrderedFetchPipeline {
    pub fn new(source: Arc<dyn MessageSource>, workers: usize, retry_delay: Duration) -> Self {
        Self {
            source,
            workers: workers.max(1),
            retry_delay,
            stats: Arc::new(PipelineStats::default()),
        }
    }

    /// Record counters into an existing [`PipelineStats`].
    pub fn with_stats(mut self, stats: Arc<PipelineStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn stats(&self) -> Arc<PipelineStats> {
        Arc::clone(&self.stats)
    }

    /// Start fetching `[start, end)`; `end = None` runs until cancelled.
    pub fn spawn(self, start: u64, end: Option<u64>) -> (MessageFeed, PipelineHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        let join = tokio::spawn(self.coordinate(start, end, tx, token.clone()));
        (MessageFeed { rx }, PipelineHandle { token, join })
    }

    async fn coordinate(
        self,
        start: u64,
        end: Option<u64>,
        tx: mpsc::UnboundedSender<StreamMessage>,
        token: CancellationToken,
    ) -> PipelineReport {
        let claimable = |height: u64| end.map_or(true, |end| height < end);
        let mut inflight: FuturesUnordered<BoxFuture<'static, FetchDone>> = FuturesUnordered::new();
        let mut buffer = ReorderBuffer::new(start);
        let mut next_claim = start;
        let mut delivered = 0u64;
        let mut absent = 0u64;
        let mut cancelled = false;

        tracing::debug!(start, ?end, workers = self.workers, "fetch pipeline started");

        'outer: loop {
            while inflight.len() < self.workers && claimable(next_claim) {
                inflight.push(self.spawn_fetch(next_claim, Duration::ZERO, &token));
                next_claim += 1;
            }

            let (height, joined) = tokio::select! {
                _ = token.cancelled() => {
                    cancelled = true;
                    break;
                }
                done = inflight.next() => match done {
                    Some(done) => done,
                    None => break,
                },
            };

            match joined {
                Ok(Some(item)) => buffer.insert(height, item),
                Ok(None) => {
                    cancelled = true;
                    break;
                }
                Err(e) => {
                    tracing::error!(height, error = %e, "fetch task failed; rescheduling height");
                    PipelineStats::incr(&self.stats.retries);
                    inflight.push(self.spawn_fetch(height, self.retry_delay, &token));
                    continue;
                }
            }

            while let Some((_, item)) = buffer.pop_ready() {
                let Some(message) = item else {
                    absent += 1;
                    continue;
                };
                if tx.send(message).is_err() {
                    tracing::debug!("feed closed by consumer; stopping pipeline");
                    cancelled = true;
                    break 'outer;
                }
                delivered += 1;
                PipelineStats::incr(&self.stats.delivered);
            }
        }

        if cancelled {
            token.cancel();
            // Fetch tasks observe the token and return promptly.
            while inflight.next().await.is_some() {}
        }

        let report = PipelineReport {
            delivered,
            absent,
            next_height: buffer.next_to_emit(),
            cancelled,
        };
        tracing::debug!(?report, "fetch pipeline finished");
        report
    }

    fn spawn_fetch(
        &self,
        height: u64,
        initial_delay: Duration,
        token: &CancellationToken,
    ) -> BoxFuture<'static, FetchDone> {
        let task = fetch_with_retry(
            Arc::clone(&self.source),
            height,
            initial_delay,
            self.retry_delay,
            token.clone(),
            Arc::clone(&self.stats),
        );
        tokio::spawn(task).map(move |joined| (height, joined)).boxed()
    }
}

/// Fetch one height until it succeeds or the token is cancelled (`None`).
///
/// A panicking source counts as a failed attempt and waits out `retry_delay`.
async fn fetch_with_retry(
    source: Arc<dyn MessageSource>,
    height: u64,
    initial_delay: Duration,
    retry_delay: Duration,
    token: CancellationToken,
    stats: Arc<PipelineStats>,
) -> Option<Option<StreamMessage>> {
    if !initial_delay.is_zero() {
        tokio::select! {
            _ = token.cancelled() => return None,
            _ = tokio::time::sleep(initial_delay) => {}
        }
    }

    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        let result = tokio::select! {
            _ = token.cancelled() => return None,
            caught = AssertUnwindSafe(source.fetch(height)).catch_unwind() => {
                caught.unwrap_or_else(|payload| {
                    let reason = panic_message(&*payload);
                    Err(SourceError::Other(format!("source panicked: {reason}")))
                })
            }
        };

        match result {
            Ok(Some(message)) => {
                if message.height() != height {
                    tracing::warn!(
                        requested = height,
                        received = message.height(),
                        "source returned a message for a different height"
                    );
                }
                PipelineStats::incr(&stats.fetched);
                return Some(Some(message));
            }
            Ok(None) => {
                tracing::debug!(height, "height absent; skipping");
                PipelineStats::incr(&stats.absent);
                return Some(None);
            }
            Err(e) => {
                PipelineStats::incr(&stats.retries);
                tracing::warn!(
                    height,
                    attempt,
                    error = %e,
                    retry_in_ms = retry_delay.as_millis() as u64,
                    "fetch failed; retrying"
                );
                tokio::select! {
                    _ = token.cancelled() => return None,
                    _ = tokio::time::sleep(retry_delay) => {}
                }
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceError;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use txflow_core::BlockHeader;

    fn message(height: u64) -> StreamMessage {
        StreamMessage {
            block: BlockHeader {
                height,
                hash: format!("h{height}"),
                prev_hash: String::new(),
                timestamp_nanosec: height * 1_000,
            },
            shards: vec![],
        }
    }

    /// Serves heights with per-height delays, absent heights and failure counts.
    #[derive(Default)]
    struct ScriptedSource {
        delays_ms: HashMap<u64, u64>,
        absent: Vec<u64>,
        failures: Mutex<HashMap<u64, u32>>,
    }

    #[async_trait]
    impl MessageSource for ScriptedSource {
        async fn fetch(&self, height: u64) -> Result<Option<StreamMessage>, SourceError> {
            if let Some(ms) = self.delays_ms.get(&height) {
                tokio::time::sleep(Duration::from_millis(*ms)).await;
            }
            {
                let mut failures = self.failures.lock().unwrap();
                if let Some(left) = failures.get_mut(&height) {
                    if *left > 0 {
                        *left -= 1;
                        return Err(SourceError::Other("flaky".into()));
                    }
                }
            }
            if self.absent.contains(&height) {
                return Ok(None);
            }
            Ok(Some(message(height)))
        }
    }

    async fn collect(mut feed: MessageFeed) -> Vec<u64> {
        let mut heights = vec![];
        while let Some(m) = feed.next().await {
            heights.push(m.height());
        }
        heights
    }

    #[test]
    fn reorder_buffer_releases_in_order() {
        let mut buf = ReorderBuffer::new(10);
        buf.insert(12, Some("c"));
        buf.insert(11, None);
        assert!(buf.pop_ready().is_none());

        buf.insert(10, Some("a"));
        assert_eq!(buf.pop_ready(), Some((10, Some("a"))));
        assert_eq!(buf.pop_ready(), Some((11, None)));
        assert_eq!(buf.pop_ready(), Some((12, Some("c"))));
        assert!(buf.pop_ready().is_none());
        assert!(buf.is_empty());
        assert_eq!(buf.next_to_emit(), 13);

        buf.insert(5, Some("stale"));
        assert_eq!(buf.len(), 0);
    }

    #[tokio::test]
    async fn delivers_in_order_despite_latency() {
        let source = ScriptedSource {
            delays_ms: HashMap::from([(100, 40), (101, 5), (102, 20), (104, 1)]),
            ..Default::default()
        };
        let pipeline = OrderedFetchPipeline::new(Arc::new(source), 3, Duration::from_millis(5));
        let (feed, handle) = pipeline.spawn(100, Some(106));

        assert_eq!(collect(feed).await, vec![100, 101, 102, 103, 104, 105]);
        let report = handle.wait().await.unwrap();
        assert_eq!(report.delivered, 6);
        assert_eq!(report.next_height, 106);
        assert!(!report.cancelled);
    }

    #[tokio::test]
    async fn absent_heights_are_suppressed() {
        let source = ScriptedSource {
            absent: vec![1, 3],
            ..Default::default()
        };
        let pipeline = OrderedFetchPipeline::new(Arc::new(source), 2, Duration::from_millis(5));
        let stats = pipeline.stats();
        let (feed, handle) = pipeline.spawn(0, Some(5));

        assert_eq!(collect(feed).await, vec![0, 2, 4]);
        let report = handle.wait().await.unwrap();
        assert_eq!(report.absent, 2);
        assert_eq!(stats.snapshot().absent, 2);
        assert_eq!(stats.snapshot().delivered, 3);
    }

    #[tokio::test]
    async fn failed_fetches_are_retried() {
        let source = ScriptedSource {
            failures: Mutex::new(HashMap::from([(7, 3)])),
            ..Default::default()
        };
        let pipeline = OrderedFetchPipeline::new(Arc::new(source), 4, Duration::from_millis(2));
        let stats = pipeline.stats();
        let (feed, handle) = pipeline.spawn(5, Some(9));

        assert_eq!(collect(feed).await, vec![5, 6, 7, 8]);
        handle.wait().await.unwrap();
        assert_eq!(stats.snapshot().retries, 3);
    }

    /// Panics on every fetch of one height.
    struct PanicsAt {
        height: u64,
        attempts: AtomicU64,
    }

    #[async_trait]
    impl MessageSource for PanicsAt {
        async fn fetch(&self, height: u64) -> Result<Option<StreamMessage>, SourceError> {
            if height == self.height {
                self.attempts.fetch_add(1, Ordering::SeqCst);
                panic!("corrupt block {height}");
            }
            Ok(Some(message(height)))
        }
    }

    #[tokio::test]
    async fn panicking_source_waits_out_the_retry_delay() {
        let source = Arc::new(PanicsAt {
            height: 3,
            attempts: AtomicU64::new(0),
        });
        let pipeline = OrderedFetchPipeline::new(source.clone(), 2, Duration::from_millis(1_000));
        let stats = pipeline.stats();
        let (mut feed, handle) = pipeline.spawn(0, Some(6));

        for expected in 0..3 {
            assert_eq!(feed.next().await.unwrap().height(), expected);
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.cancel();
        let report = handle.wait().await.unwrap();

        assert_eq!(source.attempts.load(Ordering::SeqCst), 1);
        assert_eq!(stats.snapshot().retries, 1);
        assert!(report.cancelled);
        assert_eq!(report.next_height, 3);
    }

    #[test]
    fn panic_payloads_are_described() {
        assert_eq!(panic_message(&"boom"), "boom");
        assert_eq!(panic_message(&String::from("bang")), "bang");
        assert_eq!(panic_message(&42u8), "non-string panic payload");
    }

    #[tokio::test]
    async fn empty_range_completes_immediately() {
        let source = Arc::new(ScriptedSource::default());
        let pipeline = OrderedFetchPipeline::new(source, 4, Duration::from_millis(1));
        let (feed, handle) = pipeline.spawn(10, Some(10));
        assert!(collect(feed).await.is_empty());
        assert_eq!(handle.wait().await.unwrap().delivered, 0);
    }

    #[tokio::test]
    async fn closing_the_feed_stops_an_unbounded_pipeline() {
        let source = Arc::new(ScriptedSource::default());
        let pipeline = OrderedFetchPipeline::new(source, 4, Duration::from_millis(1));
        let (mut feed, handle) = pipeline.spawn(0, None);

        for expected in 0..3 {
            assert_eq!(feed.next().await.unwrap().height(), expected);
        }
        drop(feed);

        let report = handle.wait().await.unwrap();
        assert!(report.cancelled);
    }

    #[tokio::test]
    async fn cancel_abandons_a_stuck_height() {
        let source = ScriptedSource {
            failures: Mutex::new(HashMap::from([(1, u32::MAX)])),
            ..Default::default()
        };
        let pipeline = OrderedFetchPipeline::new(Arc::new(source), 2, Duration::from_millis(1));
        let (mut feed, handle) = pipeline.spawn(0, Some(10));

        assert_eq!(feed.next().await.unwrap().height(), 0);
        handle.cancel();
        let report = handle.wait().await.unwrap();
        assert!(report.cancelled);
        assert_eq!(report.next_height, 1);
    }

    #[tokio::test]
    async fn feed_as_stream() {
        let source = Arc::new(ScriptedSource::default());
        let pipeline = OrderedFetchPipeline::new(source, 2, Duration::from_millis(1));
        let (feed, handle) = pipeline.spawn(3, Some(6));
        let heights: Vec<u64> = feed.into_stream().map(|m| m.height()).collect().await;
        assert_eq!(heights, vec![3, 4, 5]);
        handle.wait().await.unwrap();
    }
}
