//! In-process backing store for ashmem segments.
//!
//! Backing objects are plain zero-initialized byte buffers on the heap.
//! Releasing pages zero-fills them, which gives the same observable contract
//! as discarding shared memory pages: reads after a purge return zeros.
//!
//! Implements the [`ashmem_core::BackingStore`] trait. Useful for tests,
//! benchmarks and platforms without `memfd_create`.

#![warn(missing_docs)]

mod heap;

pub use heap::*;
