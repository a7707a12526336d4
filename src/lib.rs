//! # Ashmem
//!
//! Named, resizable anonymous shared memory segments whose pages clients can
//! pin and unpin. Unpinned pages are reclaimed, least recently unpinned first,
//! when the system comes under memory pressure.
//!
//! This crate re-exports [`ashmem_core`] and, depending on the enabled
//! features, the backing stores:
//!
//! - `heap` (default): [`heap::HeapStore`], in-process buffers
//! - `memfd`: [`memfd::MemfdStore`], Linux `memfd_create`
//!
//! ```
//! use ashmem::heap::HeapStore;
//! use ashmem::{MappingRequest, PinRequest, Protection, PurgeStatus, Reclaimer};
//!
//! let reclaimer = Reclaimer::new(HeapStore::default());
//! let segment = reclaimer.open_segment();
//! segment.set_size(4 * 4096).unwrap();
//! segment
//!     .ensure_backing_object(&MappingRequest::new(4 * 4096, Protection::READ))
//!     .unwrap();
//!
//! segment.unpin(PinRequest::all()).unwrap();
//! reclaimer.on_memory_pressure();
//! assert_eq!(segment.pin(PinRequest::all()).unwrap(), PurgeStatus::WasPurged);
//! ```

pub use ashmem_core::*;

#[cfg(feature = "heap")]
pub use ashmem_heap as heap;
#[cfg(feature = "memfd")]
pub use ashmem_memfd as memfd;
