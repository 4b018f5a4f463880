//! Fetch window planning.
//!
//! A requested range `[start, end)` is widened by a prefetch margin below `start`
//! and a postfetch margin above `end`, so transactions that straddle a boundary can
//! still be correlated. Every fetched height is classified into a [`Region`], which
//! determines what the correlation engine is allowed to do with it.

use serde::{Deserialize, Serialize};

/// A requested block range: `start` inclusive, `end` exclusive, `None` = unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRange {
    pub start: u64,
    pub end: Option<u64>,
}

impl BlockRange {
    pub fn new(start: u64, end: Option<u64>) -> Self {
        Self { start, end }
    }

    /// Returns `true` if the range can never contain a height.
    pub fn is_empty(&self) -> bool {
        matches!(self.end, Some(end) if end <= self.start)
    }

    pub fn contains(&self, height: u64) -> bool {
        height >= self.start && self.end.map_or(true, |end| height < end)
    }
}

/// Where a height sits relative to the requested range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Region {
    /// Fetched below the requested start to learn about earlier transactions.
    Prefetch,
    /// Inside the requested range.
    InRange,
    /// Fetched past the requested end to finish transactions started in range.
    Postfetch,
    /// Not part of the fetch window at all.
    Outside,
}

/// What the correlation engine may do with one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VisibilityFlags {
    /// Run correlation at all.
    pub preprocess: bool,
    /// Open transactions first seen in this block.
    pub register_new_transactions: bool,
    /// Invoke the raw block / transaction / receipt callbacks.
    pub emit_raw: bool,
    /// Invoke the resolved-receipt / completed-transaction callbacks.
    pub emit_correlated: bool,
}

/// The fetch window derived for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowPlan {
    range: BlockRange,
    prefetch: u64,
    postfetch: u64,
    preprocess: bool,
    fetch_start: u64,
    fetch_end: Option<u64>,
}

impl WindowPlan {
    /// Plan a window around `range`.
    ///
    /// `margins` is `(prefetch, postfetch)`; `None` disables preprocessing, which also
    /// forces both margins to zero. The fetch start is clamped at `genesis_height`.
    pub fn new(range: BlockRange, margins: Option<(u64, u64)>, genesis_height: u64) -> Self {
        let (preprocess, prefetch, postfetch) = match margins {
            Some((pre, post)) => (true, pre, post),
            None => (false, 0, 0),
        };
        let fetch_start = range.start.saturating_sub(prefetch).max(genesis_height);
        let fetch_end = range.end.map(|end| end.saturating_add(postfetch));

        Self {
            range,
            prefetch,
            postfetch,
            preprocess,
            fetch_start,
            fetch_end,
        }
    }

    pub fn range(&self) -> BlockRange {
        self.range
    }

    /// First height to fetch (inclusive).
    pub fn fetch_start(&self) -> u64 {
        self.fetch_start
    }

    /// Height to stop fetching at (exclusive); `None` = unbounded.
    pub fn fetch_end(&self) -> Option<u64> {
        self.fetch_end
    }

    pub fn preprocessing(&self) -> bool {
        self.preprocess
    }

    pub fn margins(&self) -> (u64, u64) {
        (self.prefetch, self.postfetch)
    }

    /// Returns `true` if there is nothing to fetch.
    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }

    pub fn region(&self, height: u64) -> Region {
        if height < self.fetch_start {
            return Region::Outside;
        }
        if height < self.range.start {
            return Region::Prefetch;
        }
        match self.range.end {
            None => Region::InRange,
            Some(end) if height < end => Region::InRange,
            Some(end) if height < end.saturating_add(self.postfetch) => Region::Postfetch,
            Some(_) => Region::Outside,
        }
    }

    pub fn is_prefetch(&self, height: u64) -> bool {
        self.region(height) == Region::Prefetch
    }

    pub fn is_postfetch(&self, height: u64) -> bool {
        self.region(height) == Region::Postfetch
    }

    /// Visibility flags for `height`.
    pub fn flags(&self, height: u64) -> VisibilityFlags {
        let preprocess = self.preprocess;
        match self.region(height) {
            Region::Prefetch => VisibilityFlags {
                preprocess,
                register_new_transactions: true,
                emit_raw: false,
                emit_correlated: false,
            },
            Region::InRange => VisibilityFlags {
                preprocess,
                register_new_transactions: true,
                emit_raw: true,
                emit_correlated: true,
            },
            Region::Postfetch => VisibilityFlags {
                preprocess,
                register_new_transactions: false,
                emit_raw: false,
                emit_correlated: true,
            },
            Region::Outside => VisibilityFlags::default(),
        }
    }
}
