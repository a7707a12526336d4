//! The global least-recently-unpinned list.
//!
//! Every range tracked by any segment is indexed here in the order it became
//! unpinned. Under memory pressure the list is walked oldest-first and each
//! range's backing pages are released. The list never owns a range; it only
//! stores the [`RangeId`] and enough bookkeeping to keep the byte total
//! current.

use crate::error::Result;
use crate::range::{Range, RangeId};
use crate::segment::SegmentId;
use log::trace;
use std::collections::VecDeque;

/// Selects which segments a purge visits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PurgeScope {
    /// Every segment known to the reclaimer
    All,
    /// A single segment
    Segment(SegmentId),
}

impl PurgeScope {
    fn matches(&self, segment: SegmentId) -> bool {
        match self {
            PurgeScope::All => true,
            PurgeScope::Segment(id) => *id == segment,
        }
    }
}

/// One reclaim list entry: a back-reference to a tracked range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReclaimEntry {
    /// The referenced range
    pub range: RangeId,
    /// The segment whose tracker owns the range
    pub segment: SegmentId,
    /// Current length of the range in pages
    pub pages: u64,
}

/// Recency-ordered index of all unpinned ranges across segments.
#[derive(Debug)]
pub struct ReclaimList {
    entries: VecDeque<ReclaimEntry>,
    page_size: u64,
    total_bytes: u64,
}

impl ReclaimList {
    /// Creates an empty list for pages of `page_size` bytes.
    pub fn new(page_size: usize) -> Self {
        ReclaimList {
            entries: VecDeque::new(),
            page_size: page_size as u64,
            total_bytes: 0,
        }
    }

    /// Makes room for `additional` entries so the next insertions cannot
    /// fail halfway through a tracker mutation.
    pub fn reserve(&mut self, additional: usize) -> Result<()> {
        self.entries.try_reserve(additional)?;
        Ok(())
    }

    /// Appends a freshly created range at the most-recently-unpinned end.
    pub fn on_range_unpinned(&mut self, segment: SegmentId, range: &Range) {
        debug_assert!(
            self.entries.back().is_none_or(|last| last.range < range.id()),
            "reclaim list must stay ordered by range id"
        );
        trace!("lru add {:?} {} ({} pages)", segment, range, range.pages());
        self.entries.push_back(ReclaimEntry {
            range: range.id(),
            segment,
            pages: range.pages(),
        });
        self.total_bytes += range.pages() * self.page_size;
    }

    /// Drops a range that was deleted from its tracker.
    pub fn on_range_removed(&mut self, range: &Range) {
        match self
            .position(range.id())
            .and_then(|idx| self.entries.remove(idx))
        {
            Some(entry) => {
                trace!("lru del {:?} {}", entry.segment, range);
                self.total_bytes -= entry.pages * self.page_size;
            }
            None => debug_assert!(false, "range {:?} not on reclaim list", range.id()),
        }
    }

    /// Accounts for a range whose bounds were narrowed in place.
    pub fn on_range_shrunk(&mut self, range: &Range) {
        let page_size = self.page_size;
        match self.position(range.id()) {
            Some(idx) => {
                let entry = &mut self.entries[idx];
                debug_assert!(range.pages() <= entry.pages);
                self.total_bytes -= (entry.pages - range.pages()) * page_size;
                entry.pages = range.pages();
            }
            None => debug_assert!(false, "range {:?} not on reclaim list", range.id()),
        }
    }

    fn position(&self, id: RangeId) -> Option<usize> {
        self.entries.binary_search_by_key(&id, |e| e.range).ok()
    }

    /// Iterates entries in `scope` from least to most recently unpinned.
    pub fn oldest_first(&self, scope: PurgeScope) -> impl Iterator<Item = &ReclaimEntry> {
        self.entries.iter().filter(move |e| scope.matches(e.segment))
    }

    /// Sum of the byte lengths of all listed ranges.
    pub fn total_reclaimable_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Number of listed ranges.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no range is listed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Page size the byte totals are computed with.
    pub fn page_size(&self) -> usize {
        self.page_size as usize
    }
}
