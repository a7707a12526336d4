//! Per-segment unpinned range tracking.
//!
//! The [`RangeTracker`] keeps the set of unpinned pages of one segment as a
//! list of disjoint [`Range`]s sorted by strictly decreasing start page. All
//! three operations scan from the highest range downwards and stop as soon as
//! a range lies entirely below the query, so their cost is bounded by the
//! number of ranges at or above the query.
//!
//! Every mutation is mirrored into the global [`ReclaimList`] passed in by
//! the caller, who must hold the reclaimer's lock.

use crate::error::Result;
use crate::range::Range;
use crate::reclaim_list::ReclaimList;
use crate::segment::SegmentId;
use itertools::Itertools;
use log::trace;
use serde::Serialize;

#[cfg(test)]
thread_local! {
    static FAIL_SPLIT: std::cell::Cell<bool> = const { std::cell::Cell::new(false) };
}

/// Pin state of a page interval.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum PinStatus {
    /// No page of the interval is unpinned
    Pinned,
    /// At least one page of the interval is unpinned
    Unpinned,
}

/// The sorted, coalesced set of unpinned ranges of one segment.
#[derive(Debug)]
pub struct RangeTracker {
    segment: SegmentId,
    ranges: Vec<Range>,
}

impl RangeTracker {
    /// Creates an empty tracker: every page of the segment starts pinned.
    pub fn new(segment: SegmentId) -> Self {
        RangeTracker {
            segment,
            ranges: Vec::new(),
        }
    }

    /// Pins `[pgstart, pgend]`, returning whether any of the pages had been
    /// purged while unpinned.
    ///
    /// The caller can ask to pin pages that span multiple ranges, or pages
    /// that were never unpinned, so each overlapping range falls in one of
    /// four cases:
    ///
    /// 1. the query subsumes the range: the range is deleted;
    /// 2. the query overlaps the start of the range: the range is moved up;
    /// 3. the query overlaps the end of the range: the range is cut short;
    /// 4. the query punches a hole in the range: the upper remainder becomes
    ///    a new range and the original keeps the lower part.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ResourceExhausted`](crate::Error::ResourceExhausted)
    /// if the remainder of a split cannot be allocated. The tracker and the
    /// reclaim list are unchanged in that case.
    pub fn pin(&mut self, lru: &mut ReclaimList, pgstart: u64, pgend: u64) -> Result<bool> {
        debug_assert!(pgend >= pgstart);
        let mut purged = false;
        let mut i = 0;
        while i < self.ranges.len() {
            let range = &mut self.ranges[i];
            // moved past last applicable page
            if range.before_page(pgstart) {
                break;
            }
            if !range.overlaps(pgstart, pgend) {
                i += 1;
                continue;
            }
            purged |= range.purged;

            if range.is_within(pgstart, pgend) {
                let range = self.ranges.remove(i);
                lru.on_range_removed(&range);
                continue;
            }
            if range.start_page >= pgstart {
                let end = range.end_page;
                range.shrink(pgend + 1, end);
                lru.on_range_shrunk(range);
                i += 1;
                continue;
            }
            if range.end_page <= pgend {
                let start = range.start_page;
                range.shrink(start, pgstart - 1);
                lru.on_range_shrunk(range);
                i += 1;
                continue;
            }

            self.split(lru, i, pgstart, pgend)?;
            break;
        }
        trace!(
            "{:?} pin [{}, {}] purged={}: {}",
            self.segment,
            pgstart,
            pgend,
            purged,
            self.ranges.iter().join(", ")
        );
        Ok(purged)
    }

    /// Removes `[pgstart, pgend]` from the middle of the range at `idx`.
    ///
    /// Storage for the upper remainder is reserved in both the tracker and the
    /// reclaim list before the original range is touched.
    fn split(&mut self, lru: &mut ReclaimList, idx: usize, pgstart: u64, pgend: u64) -> Result<()> {
        #[cfg(test)]
        if FAIL_SPLIT.get() {
            Vec::<Range>::new().try_reserve(usize::MAX)?;
        }
        self.ranges.try_reserve(1)?;
        lru.reserve(1)?;

        let range = &mut self.ranges[idx];
        let remainder = Range::new(pgend + 1, range.end_page, range.purged);
        let start = range.start_page;
        range.shrink(start, pgstart - 1);
        lru.on_range_shrunk(range);

        lru.on_range_unpinned(self.segment, &remainder);
        self.ranges.insert(idx, remainder);
        Ok(())
    }

    /// Unpins `[pgstart, pgend]`.
    ///
    /// Ranges overlapping or touching the query are absorbed into it and their
    /// purged flags carried over, then a single range covering the widened
    /// interval is inserted. Unpinning pages that are already unpinned is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ResourceExhausted`](crate::Error::ResourceExhausted)
    /// if the new range cannot be allocated, before anything is modified.
    pub fn unpin(&mut self, lru: &mut ReclaimList, mut pgstart: u64, mut pgend: u64) -> Result<()> {
        debug_assert!(pgend >= pgstart);
        self.ranges.try_reserve(1)?;
        lru.reserve(1)?;

        let mut purged = false;
        loop {
            let mut insert_at = self.ranges.len();
            let mut absorb = None;
            for (i, range) in self.ranges.iter().enumerate() {
                // this is our insertion point
                if range.end_page.saturating_add(1) < pgstart {
                    insert_at = i;
                    break;
                }
                if range.covers(pgstart, pgend) {
                    trace!(
                        "{:?} unpin [{}, {}]: already unpinned by {}",
                        self.segment, pgstart, pgend, range
                    );
                    return Ok(());
                }
                if range.mergeable_with(pgstart, pgend) {
                    absorb = Some(i);
                    break;
                }
            }

            match absorb {
                Some(i) => {
                    let range = self.ranges.remove(i);
                    pgstart = pgstart.min(range.start_page);
                    pgend = pgend.max(range.end_page);
                    purged |= range.purged;
                    lru.on_range_removed(&range);
                }
                None => {
                    let range = Range::new(pgstart, pgend, purged);
                    lru.on_range_unpinned(self.segment, &range);
                    self.ranges.insert(insert_at, range);
                    break;
                }
            }
        }
        trace!(
            "{:?} unpin: {}",
            self.segment,
            self.ranges.iter().join(", ")
        );
        Ok(())
    }

    /// Returns [`PinStatus::Unpinned`] if any page of `[pgstart, pgend]` is
    /// unpinned.
    pub fn pin_status(&self, pgstart: u64, pgend: u64) -> PinStatus {
        for range in &self.ranges {
            if range.before_page(pgstart) {
                break;
            }
            if range.overlaps(pgstart, pgend) {
                return PinStatus::Unpinned;
            }
        }
        PinStatus::Pinned
    }

    /// Drops every range, removing each from the reclaim list.
    pub fn clear(&mut self, lru: &mut ReclaimList) {
        for range in self.ranges.drain(..) {
            lru.on_range_removed(&range);
        }
    }

    pub(crate) fn range_mut(&mut self, id: crate::range::RangeId) -> Option<&mut Range> {
        self.ranges.iter_mut().find(|r| r.id() == id)
    }

    /// The unpinned ranges, highest start page first.
    pub fn ranges(&self) -> &[Range] {
        &self.ranges
    }

    /// Number of unpinned ranges.
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    /// True if every page is pinned.
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}
