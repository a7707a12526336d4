//! The backing store collaborator.
//!
//! Segments do not allocate memory themselves. A [`BackingStore`] creates the
//! byte-addressable object a segment's mappings refer to, reports the page
//! size, copies object contents for reads through the segment handle, and
//! discards backing pages when the reclaimer purges a range.

use crate::error::Result;
use crate::range::PageRange;

/// Trait for stores that provide the backing objects of segments.
///
/// Implementors must be shareable across threads: the reclaimer calls
/// [`release_pages()`](BackingStore::release_pages) from whatever thread
/// reports memory pressure.
///
/// # Examples
///
/// See `ashmem-memfd` (Linux `memfd_create`) and `ashmem-heap` (in-process
/// buffers) for concrete implementations.
pub trait BackingStore: Send + Sync {
    /// The object a segment's mappings share.
    type Object: Send + Sync + 'static;

    /// Returns the page size used for all page arithmetic.
    ///
    /// Must be a power of two and must not change over the lifetime of the
    /// store.
    fn page_size(&self) -> usize;

    /// Creates a backing object of `size` bytes named `name`.
    ///
    /// # Errors
    ///
    /// Should return [`Error::ResourceExhausted`](crate::Error::ResourceExhausted)
    /// when memory for the object cannot be obtained.
    fn create_object(&self, name: &str, size: usize) -> Result<Self::Object>;

    /// Discards the contents of the inclusive page interval `pages` of
    /// `object`. Subsequent reads of those pages observe zeros.
    ///
    /// Called with the reclaimer's lock held. Failures are logged and
    /// recorded by the purge, never propagated to segment users.
    fn release_pages(&self, object: &Self::Object, pages: PageRange) -> Result<()>;

    /// Copies bytes of `object` starting at `offset` into `buf` and returns
    /// how many were copied.
    ///
    /// [`Segment::read`](crate::Segment::read) only calls this with `offset`
    /// inside the object and `buf` no longer than the rest of it.
    fn read_object(&self, object: &Self::Object, offset: usize, buf: &mut [u8]) -> Result<usize>;
}
