//! Linux `memfd_create` backing store for ashmem segments.
//!
//! Each segment's backing object is an anonymous memfd sized with
//! `ftruncate`. Mappings are `MAP_SHARED`, so every process or thread mapping
//! the same object sees the same pages. Purged pages are discarded with
//! `fallocate(FALLOC_FL_PUNCH_HOLE)` and read back as zeros.
//!
//! Implements the [`ashmem_core::BackingStore`] trait.
//!
//! # Platform Requirements
//!
//! - Linux 3.17 or newer (`memfd_create`)
//! - A kernel whose shmem supports hole punching

#![warn(missing_docs)]

mod memfd;

pub use memfd::*;
