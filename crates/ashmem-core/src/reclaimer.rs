//! The reclaim coordinator.
//!
//! A [`Reclaimer`] is the process-wide owner of the single exclusive lock
//! that serializes every tracker mutation, every reclaim list mutation and
//! every purge. Segments are opened through it and route all range operations
//! through [`Reclaimer::with_tracker`]; the memory pressure hook calls
//! [`Reclaimer::on_memory_pressure`].

use crate::backing::BackingStore;
use crate::error::{Error, Result};
use crate::range::{PageRange, Range};
use crate::reclaim_list::{PurgeScope, ReclaimList};
use crate::segment::{Segment, SegmentId};
use crate::tracker::RangeTracker;
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A page release that failed during a purge.
#[derive(Debug, Clone, Serialize)]
pub struct ReleaseFailure {
    /// Segment owning the range
    pub segment: SegmentId,
    /// Pages that could not be released
    pub pages: PageRange,
    /// Error reported by the backing store
    pub error: String,
}

/// Outcome of a purge sweep.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PurgeReport {
    /// Ranges whose pages were released by this sweep
    pub ranges_purged: usize,
    /// Pages released by this sweep
    pub pages_purged: u64,
    /// Ranges skipped because an earlier sweep already released them
    pub already_purged: usize,
    /// Releases the backing store rejected
    pub failures: Vec<ReleaseFailure>,
}

impl PurgeReport {
    /// Number of ranges the sweep visited.
    pub fn visited(&self) -> usize {
        self.ranges_purged + self.already_purged + self.failures.len()
    }
}

struct SegmentEntry<O> {
    tracker: RangeTracker,
    backing: Option<Arc<O>>,
}

struct ReclaimState<O> {
    segments: HashMap<SegmentId, SegmentEntry<O>>,
    lru: ReclaimList,
}

/// Coordinates segments, their range trackers and the global reclaim list.
pub struct Reclaimer<S: BackingStore> {
    store: S,
    state: Mutex<ReclaimState<S::Object>>,
    next_segment: AtomicU64,
}

impl<S: BackingStore> Reclaimer<S> {
    /// Creates a reclaimer over `store`.
    ///
    /// # Panics
    ///
    /// Panics if the store's page size is not a power of two.
    pub fn new(store: S) -> Arc<Self> {
        let page_size = store.page_size();
        assert!(
            page_size.is_power_of_two(),
            "Page size {} must be a power of two",
            page_size
        );
        Arc::new(Reclaimer {
            store,
            state: Mutex::new(ReclaimState {
                segments: HashMap::new(),
                lru: ReclaimList::new(page_size),
            }),
            next_segment: AtomicU64::new(1),
        })
    }

    /// Opens a new, unsized and unmapped segment.
    pub fn open_segment(self: &Arc<Self>) -> Segment<S> {
        let id = SegmentId::from_raw(self.next_segment.fetch_add(1, Ordering::Relaxed));
        self.lock().segments.insert(
            id,
            SegmentEntry {
                tracker: RangeTracker::new(id),
                backing: None,
            },
        );
        debug!("open {:?}", id);
        Segment::new(id, Arc::clone(self))
    }

    /// The backing store segments are created in.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Page size of the backing store.
    pub fn page_size(&self) -> usize {
        self.store.page_size()
    }

    fn lock(&self) -> MutexGuard<'_, ReclaimState<S::Object>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn register_backing(&self, id: SegmentId, object: Arc<S::Object>) {
        if let Some(entry) = self.lock().segments.get_mut(&id) {
            entry.backing = Some(object);
        }
    }

    /// Runs `f` on the tracker of segment `id` under the global lock.
    pub(crate) fn with_tracker<R>(
        &self,
        id: SegmentId,
        f: impl FnOnce(&mut RangeTracker, &mut ReclaimList) -> Result<R>,
    ) -> Result<R> {
        let mut guard = self.lock();
        let ReclaimState { segments, lru } = &mut *guard;
        let entry = segments
            .get_mut(&id)
            .ok_or_else(|| Error::invalid(format!("{:?} is closed", id)))?;
        f(&mut entry.tracker, lru)
    }

    pub(crate) fn unpinned_ranges(&self, id: SegmentId) -> Vec<Range> {
        self.lock()
            .segments
            .get(&id)
            .map(|e| e.tracker.ranges().to_vec())
            .unwrap_or_default()
    }

    /// Forgets segment `id`, dropping its tracker and its reference to the
    /// backing object.
    pub(crate) fn remove_segment(&self, id: SegmentId) {
        let mut guard = self.lock();
        let ReclaimState { segments, lru } = &mut *guard;
        if let Some(mut entry) = segments.remove(&id) {
            let ranges = entry.tracker.len();
            entry.tracker.clear(lru);
            debug!("close {:?}, dropped {} unpinned ranges", id, ranges);
        }
    }

    /// Releases the backing pages of every unpinned range in `scope`, oldest
    /// first, and marks them purged.
    ///
    /// Ranges stay tracked and listed: a later pin reports the loss. Ranges
    /// purged by an earlier sweep are not released again. A failed release is
    /// logged and recorded and leaves the range unpurged; the sweep continues.
    pub fn purge(&self, scope: PurgeScope) -> PurgeReport {
        let mut guard = self.lock();
        let ReclaimState { segments, lru } = &mut *guard;
        let mut report = PurgeReport::default();

        for entry in lru.oldest_first(scope) {
            let Some(segment) = segments.get_mut(&entry.segment) else {
                debug_assert!(false, "reclaim list references closed {:?}", entry.segment);
                continue;
            };
            let SegmentEntry { tracker, backing } = segment;
            let (Some(range), Some(backing)) = (tracker.range_mut(entry.range), backing.as_ref())
            else {
                debug_assert!(false, "stale reclaim list entry {:?}", entry);
                continue;
            };
            if range.purged {
                report.already_purged += 1;
                continue;
            }
            match self.store.release_pages(backing, range.page_range()) {
                Ok(()) => {
                    range.purged = true;
                    report.ranges_purged += 1;
                    report.pages_purged += range.pages();
                }
                Err(e) => {
                    warn!(
                        "Failed to release pages {} of {:?}: {}",
                        range.page_range(),
                        entry.segment,
                        e
                    );
                    report.failures.push(ReleaseFailure {
                        segment: entry.segment,
                        pages: range.page_range(),
                        error: e.to_string(),
                    });
                }
            }
        }

        if report.visited() > 0 {
            info!(
                "purge {:?}: {} ranges ({} pages) released, {} already purged, {} failed",
                scope,
                report.ranges_purged,
                report.pages_purged,
                report.already_purged,
                report.failures.len()
            );
        }
        report
    }

    /// The memory pressure callback: purges every segment.
    pub fn on_memory_pressure(&self) -> PurgeReport {
        debug!("memory pressure signaled");
        self.purge(PurgeScope::All)
    }

    /// Administrative purge of every segment's unpinned ranges.
    pub fn purge_all_caches(&self) -> PurgeReport {
        self.purge(PurgeScope::All)
    }

    /// Total bytes covered by unpinned ranges across all segments.
    pub fn reclaimable_bytes(&self) -> u64 {
        self.lock().lru.total_reclaimable_bytes()
    }

    /// Number of unpinned ranges across all segments.
    pub fn reclaimable_ranges(&self) -> usize {
        self.lock().lru.len()
    }

    /// Number of open segments.
    pub fn segment_count(&self) -> usize {
        self.lock().segments.len()
    }
}
