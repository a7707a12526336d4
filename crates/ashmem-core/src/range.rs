//! Unpinned page ranges.
//!
//! A [`Range`] is one contiguous, inclusive run of pages inside a single
//! segment's unpinned set. Ranges are owned by their segment's
//! [`RangeTracker`](crate::tracker::RangeTracker); the global
//! [`ReclaimList`](crate::reclaim_list::ReclaimList) only refers to them by
//! [`RangeId`].

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-unique identifier of a tracked range.
///
/// Ids are handed out from a monotonic counter at the moment a range is
/// created. A range joins the reclaim list exactly when it is created, so
/// ordering by id is ordering by recency of becoming unpinned.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct RangeId(u64);

static NEXT_RANGE_ID: AtomicU64 = AtomicU64::new(1);

impl RangeId {
    pub(crate) fn next() -> Self {
        RangeId(NEXT_RANGE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Inclusive page interval `[start, end]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct PageRange {
    /// First page (inclusive)
    pub start: u64,
    /// Last page (inclusive)
    pub end: u64,
}

impl PageRange {
    /// Creates a page interval.
    ///
    /// # Panics
    ///
    /// Panics if `end < start`.
    pub fn new(start: u64, end: u64) -> Self {
        assert!(end >= start, "Invalid page range [{}, {}]", start, end);
        PageRange { start, end }
    }

    /// Number of pages covered.
    pub fn pages(&self) -> u64 {
        self.end - self.start + 1
    }
}

impl fmt::Display for PageRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

/// One contiguous run of unpinned pages plus its purged flag.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Range {
    id: RangeId,
    /// First unpinned page (inclusive)
    pub start_page: u64,
    /// Last unpinned page (inclusive)
    pub end_page: u64,
    /// Whether the backing pages of this range have been discarded
    pub purged: bool,
}

impl Range {
    pub(crate) fn new(start_page: u64, end_page: u64, purged: bool) -> Self {
        debug_assert!(end_page >= start_page);
        Range {
            id: RangeId::next(),
            start_page,
            end_page,
            purged,
        }
    }

    /// The identifier the reclaim list knows this range by.
    pub fn id(&self) -> RangeId {
        self.id
    }

    /// Number of pages in this range.
    pub fn pages(&self) -> u64 {
        self.end_page - self.start_page + 1
    }

    /// The page interval covered by this range.
    pub fn page_range(&self) -> PageRange {
        PageRange::new(self.start_page, self.end_page)
    }

    /// True if the range ends before `page`, i.e. no later range in a
    /// descending scan can reach `page` either.
    pub(crate) fn before_page(&self, page: u64) -> bool {
        self.end_page < page
    }

    /// True if the range shares at least one page with `[start, end]`.
    pub(crate) fn overlaps(&self, start: u64, end: u64) -> bool {
        self.start_page <= end && self.end_page >= start
    }

    /// True if the range overlaps `[start, end]` or touches it on either side.
    pub(crate) fn mergeable_with(&self, start: u64, end: u64) -> bool {
        self.start_page <= end.saturating_add(1) && self.end_page.saturating_add(1) >= start
    }

    /// True if `[start, end]` lies entirely inside this range.
    pub(crate) fn covers(&self, start: u64, end: u64) -> bool {
        self.start_page <= start && self.end_page >= end
    }

    /// True if this range lies entirely inside `[start, end]`.
    pub(crate) fn is_within(&self, start: u64, end: u64) -> bool {
        self.start_page >= start && self.end_page <= end
    }

    pub(crate) fn shrink(&mut self, start_page: u64, end_page: u64) {
        debug_assert!(start_page >= self.start_page && end_page <= self.end_page);
        debug_assert!(end_page >= start_page);
        self.start_page = start_page;
        self.end_page = end_page;
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start_page, self.end_page)?;
        if self.purged {
            write!(f, " (purged)")?;
        }
        Ok(())
    }
}
