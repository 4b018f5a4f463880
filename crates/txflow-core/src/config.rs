//! Run configuration.

use serde::{Deserialize, Serialize};

use crate::error::IndexerError;
use crate::window::{BlockRange, WindowPlan};

/// Default prefetch/postfetch margin when preprocessing is enabled.
pub const DEFAULT_MARGIN: u64 = 100;

/// How far an auto-continuing range runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndPolicy {
    /// Stop before this absolute height.
    Height(u64),
    /// Process this many heights from the resolved start.
    Count(u64),
    /// Run forever.
    Unbounded,
}

/// Which heights a run covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RangeSpec {
    /// An explicit `[start, end)` range; `end = None` runs forever.
    Fixed { start: u64, end: Option<u64> },
    /// Resume from the persisted cursor, or `default_start` when there is none.
    AutoContinue { default_start: u64, end: EndPolicy },
}

impl RangeSpec {
    /// Resolve to a concrete range given the persisted cursor (if any).
    pub fn resolve(&self, cursor: Option<u64>) -> BlockRange {
        match *self {
            Self::Fixed { start, end } => BlockRange::new(start, end),
            Self::AutoContinue { default_start, end } => {
                let start = cursor.unwrap_or(default_start);
                let end = match end {
                    EndPolicy::Height(h) => Some(h),
                    EndPolicy::Count(n) => Some(start.saturating_add(n)),
                    EndPolicy::Unbounded => None,
                };
                BlockRange::new(start, end)
            }
        }
    }

    /// Returns `true` if the start depends on a persisted cursor.
    pub fn uses_cursor(&self) -> bool {
        matches!(self, Self::AutoContinue { .. })
    }
}

impl Default for RangeSpec {
    fn default() -> Self {
        Self::Fixed {
            start: 0,
            end: None,
        }
    }
}

/// Cross-block correlation settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preprocessing {
    /// Heights fetched below the requested start.
    #[serde(default = "default_margin")]
    pub prefetch: u64,
    /// Heights fetched past the requested end.
    #[serde(default = "default_margin")]
    pub postfetch: u64,
}

fn default_margin() -> u64 {
    DEFAULT_MARGIN
}

impl Default for Preprocessing {
    fn default() -> Self {
        Self {
            prefetch: DEFAULT_MARGIN,
            postfetch: DEFAULT_MARGIN,
        }
    }
}

/// Configuration for one indexer run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Unique name for this indexer (used as the cursor key).
    pub id: String,
    /// Heights to process.
    pub range: RangeSpec,
    /// Abort the run on the first callback failure instead of logging and moving on.
    pub stop_on_error: bool,
    /// Cross-block correlation; `None` disables it and forces zero margins.
    pub preprocessing: Option<Preprocessing>,
    /// Lowest height that exists; the prefetch window never reaches below it.
    pub genesis_height: u64,
    /// Success predicate applied to receipts with an `Unknown` execution status.
    pub unknown_status_success: bool,
    /// Number of concurrent fetch workers.
    pub workers: usize,
    /// Fixed delay between fetch retries of the same height (milliseconds).
    pub retry_delay_ms: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            id: "default".into(),
            range: RangeSpec::default(),
            stop_on_error: true,
            preprocessing: None,
            genesis_height: 0,
            unknown_status_success: true,
            workers: 16,
            retry_delay_ms: 1_000,
        }
    }
}

impl RunConfig {
    /// `(prefetch, postfetch)` margins, or `None` when preprocessing is disabled.
    pub fn margins(&self) -> Option<(u64, u64)> {
        self.preprocessing.map(|p| (p.prefetch, p.postfetch))
    }

    /// Plan the fetch window given the persisted cursor (if any).
    pub fn plan(&self, cursor: Option<u64>) -> WindowPlan {
        WindowPlan::new(self.range.resolve(cursor), self.margins(), self.genesis_height)
    }

    pub fn validate(&self) -> Result<(), IndexerError> {
        if self.id.trim().is_empty() {
            return Err(IndexerError::Config("id cannot be empty".into()));
        }
        if self.workers == 0 {
            return Err(IndexerError::Config("workers must be greater than 0".into()));
        }
        if self.retry_delay_ms == 0 {
            return Err(IndexerError::Config(
                "retry_delay_ms must be greater than 0".into(),
            ));
        }
        if let RangeSpec::Fixed { start, end: Some(end) } = self.range {
            if end <= start {
                return Err(IndexerError::Config(format!(
                    "range end ({end}) must be greater than start ({start})"
                )));
            }
        }
        Ok(())
    }
}
