use ashmem_core::util::PAGE_SIZE;
use ashmem_core::{BackingStore, PageRange};
use log::trace;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

/// Errors of heap backed objects.
#[derive(Debug, Error)]
pub enum HeapError {
    /// An access or release reached past the end of the object.
    #[error("access [{offset:#x}, +{len:#x}) out of bounds for object of {size:#x} bytes")]
    OutOfBounds {
        /// Byte offset of the access
        offset: usize,
        /// Length of the access
        len: usize,
        /// Object size
        size: usize,
    },
    /// Page releases were disabled with [`HeapStore::set_fail_releases`].
    #[error("page release rejected")]
    ReleaseRejected,
}

impl From<HeapError> for ashmem_core::Error {
    fn from(e: HeapError) -> Self {
        ashmem_core::Error::backing(e)
    }
}

/// Backing store keeping segment contents in heap buffers.
#[derive(Debug)]
pub struct HeapStore {
    page_size: usize,
    fail_releases: AtomicBool,
}

impl Default for HeapStore {
    fn default() -> Self {
        Self::new(PAGE_SIZE)
    }
}

impl HeapStore {
    /// Creates a store with the given page size.
    ///
    /// # Panics
    ///
    /// Panics if `page_size` is not a power of two.
    pub fn new(page_size: usize) -> Self {
        assert!(
            page_size.is_power_of_two(),
            "Page size {} must be a power of two",
            page_size
        );
        HeapStore {
            page_size,
            fail_releases: AtomicBool::new(false),
        }
    }

    /// Makes every subsequent [`release_pages`](BackingStore::release_pages)
    /// fail (or succeed again).
    pub fn set_fail_releases(&self, fail: bool) {
        self.fail_releases.store(fail, Ordering::Relaxed);
    }
}

/// A heap buffer standing in for a shared memory object.
#[derive(Debug)]
pub struct HeapObject {
    name: String,
    data: Mutex<Vec<u8>>,
    released_pages: AtomicUsize,
}

impl HeapObject {
    fn data(&self) -> MutexGuard<'_, Vec<u8>> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The name the object was created with.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Object size in bytes.
    pub fn len(&self) -> usize {
        self.data().len()
    }

    /// True for zero-sized objects.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of pages released so far.
    pub fn released_pages(&self) -> usize {
        self.released_pages.load(Ordering::Relaxed)
    }

    /// Copies `buf.len()` bytes at `offset` into `buf`.
    ///
    /// # Errors
    ///
    /// Returns [`HeapError::OutOfBounds`] if the read reaches past the end.
    pub fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), HeapError> {
        let data = self.data();
        let src = checked_slice(data.len(), offset, buf.len())?;
        buf.copy_from_slice(&data[src]);
        Ok(())
    }

    /// Writes `buf` at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`HeapError::OutOfBounds`] if the write reaches past the end.
    pub fn write(&self, offset: usize, buf: &[u8]) -> Result<(), HeapError> {
        let mut data = self.data();
        let dst = checked_slice(data.len(), offset, buf.len())?;
        data[dst].copy_from_slice(buf);
        Ok(())
    }
}

fn checked_slice(size: usize, offset: usize, len: usize) -> Result<std::ops::Range<usize>, HeapError> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(offset..end),
        _ => Err(HeapError::OutOfBounds { offset, len, size }),
    }
}

impl BackingStore for HeapStore {
    type Object = HeapObject;

    fn page_size(&self) -> usize {
        self.page_size
    }

    fn create_object(&self, name: &str, size: usize) -> ashmem_core::Result<HeapObject> {
        let mut data = Vec::new();
        data.try_reserve_exact(size)
            .map_err(|_| ashmem_core::Error::ResourceExhausted("heap object"))?;
        data.resize(size, 0);
        trace!("heap object {} with {} bytes", name, size);
        Ok(HeapObject {
            name: name.to_owned(),
            data: Mutex::new(data),
            released_pages: AtomicUsize::new(0),
        })
    }

    fn read_object(
        &self,
        object: &HeapObject,
        offset: usize,
        buf: &mut [u8],
    ) -> ashmem_core::Result<usize> {
        object.read(offset, buf)?;
        Ok(buf.len())
    }

    fn release_pages(&self, object: &HeapObject, pages: PageRange) -> ashmem_core::Result<()> {
        if self.fail_releases.load(Ordering::Relaxed) {
            return Err(HeapError::ReleaseRejected.into());
        }
        let mut data = object.data();
        let size = data.len();
        let offset = pages.start as usize * self.page_size;
        // the last page may be partial
        let end = ((pages.end as usize + 1) * self.page_size).min(size);
        if offset >= size {
            return Err(HeapError::OutOfBounds {
                offset,
                len: pages.pages() as usize * self.page_size,
                size,
            }
            .into());
        }
        data[offset..end].fill(0);
        object
            .released_pages
            .fetch_add(pages.pages() as usize, Ordering::Relaxed);
        trace!("heap object {}: zeroed pages {}", object.name, pages);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_object_is_zeroed() -> anyhow::Result<()> {
        let store = HeapStore::default();
        let object = store.create_object("zero", 3 * PAGE_SIZE)?;
        let mut buf = vec![0xff; 3 * PAGE_SIZE];
        object.read(0, &mut buf)?;
        assert!(buf.iter().all(|&b| b == 0));
        assert_eq!(object.name(), "zero");
        assert_eq!(object.len(), 3 * PAGE_SIZE);
        Ok(())
    }

    #[test]
    fn test_release_zeroes_only_given_pages() -> anyhow::Result<()> {
        let store = HeapStore::default();
        let object = store.create_object("pages", 4 * PAGE_SIZE)?;
        object.write(0, &vec![0x5a; 4 * PAGE_SIZE])?;
        store.release_pages(&object, PageRange::new(1, 2))?;

        let mut page = vec![0; PAGE_SIZE];
        for (idx, expected) in [(0, 0x5a), (1, 0), (2, 0), (3, 0x5a)] {
            object.read(idx * PAGE_SIZE, &mut page)?;
            assert!(page.iter().all(|&b| b == expected), "page {}", idx);
        }
        assert_eq!(object.released_pages(), 2);
        Ok(())
    }

    #[test]
    fn test_release_partial_last_page() -> anyhow::Result<()> {
        let store = HeapStore::default();
        let object = store.create_object("partial", PAGE_SIZE + 10)?;
        object.write(PAGE_SIZE, &[1; 10])?;
        store.release_pages(&object, PageRange::new(1, 1))?;
        let mut tail = [0xff; 10];
        object.read(PAGE_SIZE, &mut tail)?;
        assert_eq!(tail, [0; 10]);
        Ok(())
    }

    #[test]
    fn test_read_object_copies_contents() -> anyhow::Result<()> {
        let store = HeapStore::default();
        let object = store.create_object("read", 2 * PAGE_SIZE)?;
        object.write(PAGE_SIZE - 2, b"heap")?;
        let mut buf = [0; 4];
        assert_eq!(store.read_object(&object, PAGE_SIZE - 2, &mut buf)?, 4);
        assert_eq!(&buf, b"heap");
        assert!(store.read_object(&object, 2 * PAGE_SIZE - 2, &mut buf).is_err());
        Ok(())
    }

    #[test]
    fn test_out_of_bounds() -> anyhow::Result<()> {
        let store = HeapStore::default();
        let object = store.create_object("oob", PAGE_SIZE)?;
        assert!(matches!(
            object.write(PAGE_SIZE - 1, &[0, 0]),
            Err(HeapError::OutOfBounds { .. })
        ));
        assert!(matches!(
            object.read(usize::MAX, &mut [0]),
            Err(HeapError::OutOfBounds { .. })
        ));
        assert!(store.release_pages(&object, PageRange::new(1, 1)).is_err());
        Ok(())
    }

    #[test]
    fn test_fail_releases() -> anyhow::Result<()> {
        let store = HeapStore::default();
        let object = store.create_object("fail", PAGE_SIZE)?;
        object.write(0, &[7])?;
        store.set_fail_releases(true);
        assert!(matches!(
            store.release_pages(&object, PageRange::new(0, 0)),
            Err(ashmem_core::Error::Backing(_))
        ));
        let mut b = [0];
        object.read(0, &mut b)?;
        assert_eq!(b, [7]);
        Ok(())
    }
}
