//! # Ashmem Core
//!
//! `ashmem-core` implements named, resizable anonymous shared memory segments
//! whose pages clients can pin and unpin. Unpinned pages are tracked so that,
//! under memory pressure, the least recently unpinned ones can be discarded.
//! A client that re-pins a discarded range is told its contents were lost.
//!
//! ## Architecture Overview
//!
//! - [`RangeTracker`] - The per-segment set of unpinned page intervals. Pin
//!   removes pages from the set (shrinking or splitting ranges); unpin adds
//!   them, absorbing overlapping and adjacent ranges.
//!
//! - [`ReclaimList`] - The global recency order of every unpinned range of
//!   every segment, plus the total number of reclaimable bytes.
//!
//! - [`Reclaimer`] - Owns the single lock serializing every tracker, reclaim
//!   list and purge operation. Purging walks the reclaim list oldest first and
//!   asks the [`BackingStore`] to release the pages of each range.
//!
//! - [`Segment`] - The client handle: size, name and protection mask, lazy
//!   creation of the backing object on first mapping, and the pin, unpin and
//!   status requests.
//!
//! - [`pressure`] module - A background [`PressureMonitor`] that purges when
//!   a [`PressureSignal`] fires, e.g. Linux PSI.
//!
//! ## Backing Stores
//!
//! The core does not allocate shared memory itself. Concrete stores live in
//! the `ashmem-memfd` (Linux `memfd_create`) and `ashmem-heap` (in-process
//! buffers) crates.

#![warn(missing_docs)]

pub mod backing;
pub mod config;
mod error;
pub mod pressure;
pub mod range;
pub mod reclaim_list;
mod reclaimer;
mod request;
pub mod segment;
pub mod tracker;
pub mod util;

pub use crate::backing::BackingStore;
pub use crate::config::{AshmemConfig, ConfigError};
pub use crate::error::{Error, Result};
pub use crate::pressure::{ManualPressure, PressureMonitor, PressureSignal, PsiPressure};
pub use crate::range::{PageRange, Range};
pub use crate::reclaim_list::{PurgeScope, ReclaimList};
pub use crate::reclaimer::{PurgeReport, Reclaimer, ReleaseFailure};
pub use crate::request::{PinRequest, PurgeStatus};
pub use crate::segment::{MappingRequest, Protection, Segment, SegmentId, SegmentReader};
pub use crate::tracker::{PinStatus, RangeTracker};

#[cfg(test)]
mod test_store;
