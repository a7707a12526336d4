//! Named, resizable shared memory segments.
//!
//! A [`Segment`] is the handle a client holds. It carries the segment's size,
//! name and protection mask, creates its backing object lazily on the first
//! mapping, and forwards pin/unpin/status requests to its range tracker under
//! the reclaimer's global lock.
//!
//! Mappings only ever hold an `Arc` to the backing object. Dropping the
//! segment forgets its unpinned ranges immediately, whether or not mappings
//! of the backing object are still alive.

use crate::backing::BackingStore;
use crate::error::{Error, Result};
use crate::range::Range;
use crate::reclaim_list::PurgeScope;
use crate::reclaimer::{PurgeReport, Reclaimer};
use crate::request::{PinRequest, PurgeStatus};
use crate::tracker::PinStatus;
use crate::util::{NAME_DEFAULT, NAME_PREFIX, page_align, truncate_name};
use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{self, Read, Seek, SeekFrom};
use std::ops::{BitAnd, BitOr};
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

/// Identifier of an open segment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SegmentId(u64);

impl SegmentId {
    /// Wraps a raw identifier.
    pub const fn from_raw(id: u64) -> Self {
        SegmentId(id)
    }

    /// The raw identifier.
    pub fn as_raw(&self) -> u64 {
        self.0
    }
}

/// Memory protection bits, using the platform's `PROT_*` values.
///
/// Deserializing drops bits other than read, write and exec.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i32")]
pub struct Protection(i32);

impl Protection {
    /// No access
    pub const NONE: Protection = Protection(libc::PROT_NONE);
    /// Pages may be read
    pub const READ: Protection = Protection(libc::PROT_READ);
    /// Pages may be written
    pub const WRITE: Protection = Protection(libc::PROT_WRITE);
    /// Pages may be executed
    pub const EXEC: Protection = Protection(libc::PROT_EXEC);
    /// Every protection bit a segment can grant
    pub const ALL: Protection = Protection(libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC);

    /// Builds a protection value from raw `PROT_*` bits, dropping unknown bits.
    pub fn from_bits_truncate(bits: i32) -> Self {
        Protection(bits & Self::ALL.0)
    }

    /// The raw `PROT_*` bits.
    pub fn bits(&self) -> i32 {
        self.0
    }

    /// True if every bit of `other` is set in `self`.
    pub fn contains(&self, other: Protection) -> bool {
        self.0 & other.0 == other.0
    }
}

impl From<i32> for Protection {
    fn from(bits: i32) -> Self {
        Protection::from_bits_truncate(bits)
    }
}

impl BitOr for Protection {
    type Output = Protection;
    fn bitor(self, rhs: Self) -> Self::Output {
        Protection(self.0 | rhs.0)
    }
}

impl BitAnd for Protection {
    type Output = Protection;
    fn bitand(self, rhs: Self) -> Self::Output {
        Protection(self.0 & rhs.0)
    }
}

impl fmt::Display for Protection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flag = |p: Protection, c: char| if self.contains(p) { c } else { '-' };
        write!(
            f,
            "{}{}{}",
            flag(Protection::READ, 'r'),
            flag(Protection::WRITE, 'w'),
            flag(Protection::EXEC, 'x')
        )
    }
}

impl fmt::Debug for Protection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Protection({})", self)
    }
}

/// A request to map a segment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MappingRequest {
    /// Length of the mapping in bytes
    pub len: usize,
    /// Access the mapping needs
    pub prot: Protection,
}

impl MappingRequest {
    /// Creates a mapping request.
    pub fn new(len: usize, prot: Protection) -> Self {
        MappingRequest { len, prot }
    }
}

/// An anonymous shared memory segment.
///
/// Created with [`Reclaimer::open_segment`]. The segment is closed when the
/// handle is dropped or passed to [`Segment::close`].
pub struct Segment<S: BackingStore> {
    id: SegmentId,
    reclaimer: Arc<Reclaimer<S>>,
    size: AtomicUsize,
    prot_mask: AtomicI32,
    /// Guards lazy backing creation and the writers of name, size and mask.
    setup: Mutex<Option<String>>,
    backing: OnceLock<Arc<S::Object>>,
}

impl<S: BackingStore> Segment<S> {
    pub(crate) fn new(id: SegmentId, reclaimer: Arc<Reclaimer<S>>) -> Self {
        Segment {
            id,
            reclaimer,
            size: AtomicUsize::new(0),
            prot_mask: AtomicI32::new(Protection::ALL.bits()),
            setup: Mutex::new(None),
            backing: OnceLock::new(),
        }
    }

    /// Opens a new segment on `reclaimer`.
    pub fn create(reclaimer: &Arc<Reclaimer<S>>) -> Self {
        reclaimer.open_segment()
    }

    /// This segment's identifier.
    pub fn id(&self) -> SegmentId {
        self.id
    }

    fn lock_setup(&self) -> MutexGuard<'_, Option<String>> {
        self.setup.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The segment's name, or [`NAME_DEFAULT`] if none was set.
    pub fn name(&self) -> String {
        self.lock_setup()
            .clone()
            .unwrap_or_else(|| NAME_DEFAULT.to_owned())
    }

    /// Names the segment. Names longer than 255 bytes are truncated.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyConfigured`] once the backing object exists.
    pub fn set_name(&self, name: &str) -> Result<()> {
        let mut setup = self.lock_setup();
        if self.backing.get().is_some() {
            return Err(Error::AlreadyConfigured("name"));
        }
        *setup = Some(truncate_name(name).to_owned());
        Ok(())
    }

    /// The segment size in bytes, or 0 if it was never set.
    pub fn size(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    /// Sets the segment size in bytes.
    ///
    /// # Errors
    ///
    /// * [`Error::AlreadyConfigured`] if the backing object exists
    /// * [`Error::InvalidArgument`] if `size` is zero or cannot be page aligned
    pub fn set_size(&self, size: usize) -> Result<()> {
        let _setup = self.lock_setup();
        if self.backing.get().is_some() {
            return Err(Error::AlreadyConfigured("size"));
        }
        if size == 0 {
            return Err(Error::invalid("segment size must be greater than 0"));
        }
        if page_align(size, self.reclaimer.page_size()).is_none() {
            return Err(Error::invalid(format!("segment size {} too large", size)));
        }
        self.size.store(size, Ordering::Release);
        Ok(())
    }

    /// The protection bits mappings may still request.
    pub fn protection(&self) -> Protection {
        Protection(self.prot_mask.load(Ordering::Acquire))
    }

    /// Narrows the protection mask to `prot`.
    ///
    /// If `read_implies_exec` is set (the mapping requester's platform treats
    /// readable memory as executable) and `prot` keeps read access, execute
    /// access is kept as well. Existing mappings are not affected.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `prot` contains bits the mask no
    /// longer allows.
    pub fn narrow_protection(&self, prot: Protection, read_implies_exec: bool) -> Result<()> {
        let _setup = self.lock_setup();
        let allowed = self.protection();
        if !allowed.contains(prot) {
            return Err(Error::invalid(format!(
                "cannot widen protection from {} to {}",
                allowed, prot
            )));
        }
        let mut prot = prot;
        if read_implies_exec && prot.contains(Protection::READ) {
            prot = prot | Protection::EXEC;
        }
        self.prot_mask.store(prot.bits(), Ordering::Release);
        Ok(())
    }

    fn validate_mapping(&self, request: &MappingRequest) -> Result<()> {
        let size = self.size();
        if size == 0 {
            return Err(Error::invalid("segment size must be set before mapping"));
        }
        let aligned = page_align(size, self.reclaimer.page_size())
            .ok_or_else(|| Error::invalid("segment size overflows page alignment"))?;
        if request.len == 0 || request.len > aligned {
            return Err(Error::invalid(format!(
                "mapping of {} bytes does not fit segment of {} bytes",
                request.len, aligned
            )));
        }
        let allowed = self.protection();
        if !allowed.contains(request.prot) {
            return Err(Error::PermissionDenied {
                requested: request.prot,
                allowed,
            });
        }
        Ok(())
    }

    /// Validates a mapping request and returns the backing object, creating
    /// it on first use.
    ///
    /// The object is created at most once even when several threads map the
    /// segment concurrently; every caller receives the same object.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidArgument`] if the size is unset or the mapping is
    ///   larger than the page-aligned size
    /// * [`Error::PermissionDenied`] if the mapping needs access the
    ///   protection mask does not allow
    /// * any error of [`BackingStore::create_object`]
    pub fn ensure_backing_object(&self, request: &MappingRequest) -> Result<Arc<S::Object>> {
        self.validate_mapping(request)?;
        if let Some(object) = self.backing.get() {
            return Ok(Arc::clone(object));
        }

        let setup = self.lock_setup();
        if let Some(object) = self.backing.get() {
            return Ok(Arc::clone(object));
        }
        // size, name and mask are frozen while we hold the setup lock
        self.validate_mapping(request)?;
        let name = match setup.as_deref() {
            Some(name) => format!("{}{}", NAME_PREFIX, name),
            None => NAME_DEFAULT.to_owned(),
        };
        let size = self.size();
        let object = Arc::new(self.reclaimer.store().create_object(&name, size)?);
        self.reclaimer.register_backing(self.id, Arc::clone(&object));
        debug!("{:?}: created backing object {} ({} bytes)", self.id, name, size);
        Ok(Arc::clone(self.backing.get_or_init(|| object)))
    }

    /// The backing object, if the segment has been mapped.
    pub fn backing_object(&self) -> Option<Arc<S::Object>> {
        self.backing.get().cloned()
    }

    /// True once the backing object exists.
    pub fn is_mapped(&self) -> bool {
        self.backing.get().is_some()
    }

    /// Reads segment contents at `offset` into `buf`, returning the number
    /// of bytes read. Purged pages read as zeros.
    ///
    /// Returns `Ok(0)` at end of file: for a segment of size 0 or an offset
    /// at or past the size.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidArgument`] if a sized segment has no backing object
    /// * any error of [`BackingStore::read_object`]
    pub fn read(&self, offset: usize, buf: &mut [u8]) -> Result<usize> {
        let size = self.size();
        if size == 0 {
            return Ok(0);
        }
        let object = self
            .backing
            .get()
            .ok_or_else(|| Error::invalid("segment has no backing object"))?;
        if offset >= size || buf.is_empty() {
            return Ok(0);
        }
        let len = buf.len().min(size - offset);
        self.reclaimer
            .store()
            .read_object(object, offset, &mut buf[..len])
    }

    /// A reader over the segment contents, starting at offset 0.
    pub fn reader(&self) -> SegmentReader<'_, S> {
        SegmentReader {
            segment: self,
            pos: 0,
        }
    }

    fn resolve(&self, request: &PinRequest) -> Result<crate::range::PageRange> {
        if !self.is_mapped() {
            return Err(Error::invalid("segment has no backing object"));
        }
        request.to_pages(self.size(), self.reclaimer.page_size())
    }

    /// Pins the pages of `request`, reporting whether any of them were purged
    /// while unpinned.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidArgument`] for malformed requests or unmapped segments
    /// * [`Error::ResourceExhausted`] if a range split cannot be allocated
    pub fn pin(&self, request: PinRequest) -> Result<PurgeStatus> {
        let pages = self.resolve(&request)?;
        let purged = self
            .reclaimer
            .with_tracker(self.id, |tracker, lru| tracker.pin(lru, pages.start, pages.end))?;
        Ok(purged.into())
    }

    /// Unpins the pages of `request`, making them eligible for reclaim.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidArgument`] for malformed requests or unmapped segments
    /// * [`Error::ResourceExhausted`] if the range cannot be allocated
    pub fn unpin(&self, request: PinRequest) -> Result<()> {
        let pages = self.resolve(&request)?;
        self.reclaimer
            .with_tracker(self.id, |tracker, lru| tracker.unpin(lru, pages.start, pages.end))
    }

    /// Reports whether any page of `request` is unpinned.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for malformed requests or unmapped
    /// segments.
    pub fn pin_status(&self, request: PinRequest) -> Result<PinStatus> {
        let pages = self.resolve(&request)?;
        self.reclaimer
            .with_tracker(self.id, |tracker, _| Ok(tracker.pin_status(pages.start, pages.end)))
    }

    /// Snapshot of the unpinned ranges, highest start page first.
    pub fn unpinned_ranges(&self) -> Vec<Range> {
        self.reclaimer.unpinned_ranges(self.id)
    }

    /// Purges only this segment's unpinned ranges.
    pub fn purge(&self) -> PurgeReport {
        self.reclaimer.purge(PurgeScope::Segment(self.id))
    }

    /// Closes the segment. Equivalent to dropping it.
    pub fn close(self) {}
}

impl<S: BackingStore> Drop for Segment<S> {
    fn drop(&mut self) {
        self.reclaimer.remove_segment(self.id);
    }
}

impl<S: BackingStore> fmt::Debug for Segment<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Segment")
            .field("id", &self.id)
            .field("size", &self.size())
            .field("protection", &self.protection())
            .field("mapped", &self.is_mapped())
            .finish()
    }
}

/// Sequential reader over a segment's contents, with a file position.
///
/// Created by [`Segment::reader`].
#[derive(Debug)]
pub struct SegmentReader<'a, S: BackingStore> {
    segment: &'a Segment<S>,
    pos: u64,
}

impl<S: BackingStore> Read for SegmentReader<'_, S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Ok(offset) = usize::try_from(self.pos) else {
            return Ok(0);
        };
        let n = self.segment.read(offset, buf)?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl<S: BackingStore> Seek for SegmentReader<'_, S> {
    /// Moves the position. `SeekFrom::End` is relative to the segment size.
    ///
    /// Fails with `InvalidInput` on a segment of size 0, on an unmapped
    /// segment, or if the position would become negative.
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let size = self.segment.size() as u64;
        if size == 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "segment size is not set"));
        }
        if !self.segment.is_mapped() {
            return Err(Error::invalid("segment has no backing object").into());
        }
        let (base, delta) = match pos {
            SeekFrom::Start(p) => (p, 0),
            SeekFrom::End(d) => (size, d),
            SeekFrom::Current(d) => (self.pos, d),
        };
        self.pos = base
            .checked_add_signed(delta)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "invalid seek position"))?;
        Ok(self.pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_store::TestStore;
    use crate::util::{NAME_LEN, PAGE_SIZE};

    const P: u64 = PAGE_SIZE as u64;
    const RW: Protection = Protection(libc::PROT_READ | libc::PROT_WRITE);

    fn mapped(reclaimer: &Arc<Reclaimer<TestStore>>, pages: usize) -> Segment<TestStore> {
        let segment = reclaimer.open_segment();
        segment.set_size(pages * PAGE_SIZE).unwrap();
        segment
            .ensure_backing_object(&MappingRequest::new(pages * PAGE_SIZE, RW))
            .unwrap();
        segment
    }

    #[test]
    fn test_new_segment_defaults() {
        let reclaimer = Reclaimer::new(TestStore::default());
        let segment = reclaimer.open_segment();
        assert_eq!(segment.size(), 0);
        assert_eq!(segment.name(), NAME_DEFAULT);
        assert_eq!(segment.protection(), Protection::ALL);
        assert!(!segment.is_mapped());
        assert!(segment.backing_object().is_none());
    }

    #[test]
    fn test_set_size() {
        let reclaimer = Reclaimer::new(TestStore::default());
        let segment = reclaimer.open_segment();
        assert!(matches!(segment.set_size(0), Err(Error::InvalidArgument(_))));
        assert!(matches!(
            segment.set_size(usize::MAX),
            Err(Error::InvalidArgument(_))
        ));
        segment.set_size(3 * PAGE_SIZE).unwrap();
        segment.set_size(10 * PAGE_SIZE).unwrap();
        assert_eq!(segment.size(), 10 * PAGE_SIZE);
    }

    #[test]
    fn test_configuration_frozen_after_mapping() {
        let reclaimer = Reclaimer::new(TestStore::default());
        let segment = mapped(&reclaimer, 4);
        assert!(matches!(
            segment.set_size(8 * PAGE_SIZE),
            Err(Error::AlreadyConfigured("size"))
        ));
        assert!(matches!(
            segment.set_name("late"),
            Err(Error::AlreadyConfigured("name"))
        ));
        assert_eq!(segment.size(), 4 * PAGE_SIZE);
        // the mask can still be narrowed
        segment.narrow_protection(Protection::READ, false).unwrap();
    }

    #[test]
    fn test_backing_object_name() {
        let reclaimer = Reclaimer::new(TestStore::default());
        let named = reclaimer.open_segment();
        named.set_name("gralloc-buffer").unwrap();
        named.set_size(PAGE_SIZE).unwrap();
        let object = named
            .ensure_backing_object(&MappingRequest::new(PAGE_SIZE, RW))
            .unwrap();
        assert_eq!(object.name, "dev/ashmem/gralloc-buffer");
        assert_eq!(object.size, PAGE_SIZE);

        let unnamed = mapped(&reclaimer, 1);
        assert_eq!(unnamed.backing_object().unwrap().name, "dev/ashmem");
    }

    #[test]
    fn test_long_name_truncated() {
        let reclaimer = Reclaimer::new(TestStore::default());
        let segment = reclaimer.open_segment();
        segment.set_name(&"n".repeat(1000)).unwrap();
        assert_eq!(segment.name().len(), NAME_LEN - 1);
    }

    #[test]
    fn test_narrow_protection() {
        let reclaimer = Reclaimer::new(TestStore::default());
        let segment = reclaimer.open_segment();
        segment.narrow_protection(RW, false).unwrap();
        assert_eq!(segment.protection(), RW);
        assert!(matches!(
            segment.narrow_protection(Protection::ALL, false),
            Err(Error::InvalidArgument(_))
        ));
        assert_eq!(segment.protection(), RW);
        segment.narrow_protection(Protection::READ, false).unwrap();
        assert_eq!(segment.protection(), Protection::READ);
        assert_eq!(segment.protection().to_string(), "r--");
    }

    #[test]
    fn test_protection_drops_unknown_bits() -> anyhow::Result<()> {
        assert_eq!(Protection::from_bits_truncate(0xff), Protection::ALL);
        let prot: Protection = serde_json::from_str(&(0x100 | libc::PROT_READ).to_string())?;
        assert_eq!(prot, Protection::READ);
        assert_eq!(serde_json::to_string(&RW)?, RW.bits().to_string());
        Ok(())
    }

    #[test]
    fn test_read_through_segment() -> anyhow::Result<()> {
        let reclaimer = Reclaimer::new(TestStore::default());
        let segment = reclaimer.open_segment();
        let mut buf = [0xee; 16];
        // unsized segments read as empty
        assert_eq!(segment.read(0, &mut buf)?, 0);

        segment.set_size(2 * PAGE_SIZE + 10)?;
        assert!(matches!(segment.read(0, &mut buf), Err(Error::InvalidArgument(_))));

        segment.ensure_backing_object(&MappingRequest::new(PAGE_SIZE, RW))?;
        assert_eq!(segment.read(4, &mut buf)?, 16);
        assert_eq!(buf[0], 5);
        // reads stop at the segment size, not the page-aligned size
        assert_eq!(segment.read(2 * PAGE_SIZE + 4, &mut buf)?, 6);
        assert_eq!(segment.read(2 * PAGE_SIZE + 10, &mut buf)?, 0);
        assert_eq!(segment.read(usize::MAX, &mut buf)?, 0);

        segment.unpin(PinRequest::new(P, P))?;
        segment.purge();
        let mut page = vec![0xee; PAGE_SIZE];
        assert_eq!(segment.read(PAGE_SIZE, &mut page)?, PAGE_SIZE);
        assert!(page.iter().all(|&b| b == 0));
        Ok(())
    }

    #[test]
    fn test_reader_seek_and_read() -> anyhow::Result<()> {
        let reclaimer = Reclaimer::new(TestStore::default());
        let empty = reclaimer.open_segment();
        assert_eq!(
            empty.reader().seek(SeekFrom::Start(0)).unwrap_err().kind(),
            io::ErrorKind::InvalidInput
        );

        let segment = mapped(&reclaimer, 2);
        let mut reader = segment.reader();
        assert!(reader.seek(SeekFrom::Current(-1)).is_err());
        assert_eq!(reader.seek(SeekFrom::End(-3))?, 2 * P - 3);
        let mut tail = Vec::new();
        reader.read_to_end(&mut tail)?;
        assert_eq!(tail.len(), 3);

        // seeking past the end is allowed and reads nothing
        assert_eq!(reader.seek(SeekFrom::End(100))?, 2 * P + 100);
        assert_eq!(reader.read(&mut [0; 8])?, 0);

        reader.seek(SeekFrom::Start(0))?;
        let mut all = Vec::new();
        reader.read_to_end(&mut all)?;
        assert_eq!(all.len(), 2 * PAGE_SIZE);
        assert_eq!(&all[all.len() - 3..], &tail[..]);
        Ok(())
    }

    #[test]
    fn test_read_implies_exec() {
        let reclaimer = Reclaimer::new(TestStore::default());
        let segment = reclaimer.open_segment();
        segment.narrow_protection(Protection::READ, true).unwrap();
        assert_eq!(segment.protection(), Protection::READ | Protection::EXEC);
        // write-only requests are not affected
        let other = reclaimer.open_segment();
        other.narrow_protection(Protection::WRITE, true).unwrap();
        assert_eq!(other.protection(), Protection::WRITE);
    }

    #[test]
    fn test_mapping_validation() {
        let reclaimer = Reclaimer::new(TestStore::default());
        let segment = reclaimer.open_segment();
        let request = MappingRequest::new(PAGE_SIZE, RW);
        assert!(matches!(
            segment.ensure_backing_object(&request),
            Err(Error::InvalidArgument(_))
        ));

        // mappings may cover the page-aligned size
        segment.set_size(PAGE_SIZE + 1).unwrap();
        assert!(matches!(
            segment.ensure_backing_object(&MappingRequest::new(3 * PAGE_SIZE, RW)),
            Err(Error::InvalidArgument(_))
        ));

        segment.narrow_protection(Protection::READ, false).unwrap();
        assert!(matches!(
            segment.ensure_backing_object(&request),
            Err(Error::PermissionDenied { .. })
        ));
        assert!(!segment.is_mapped());
        assert_eq!(reclaimer.store().created.load(Ordering::SeqCst), 0);

        segment
            .ensure_backing_object(&MappingRequest::new(2 * PAGE_SIZE, Protection::READ))
            .unwrap();
        assert!(segment.is_mapped());
    }

    #[test]
    fn test_backing_created_once() {
        let reclaimer = Reclaimer::new(TestStore::default());
        let segment = reclaimer.open_segment();
        segment.set_size(16 * PAGE_SIZE).unwrap();
        let request = MappingRequest::new(16 * PAGE_SIZE, RW);

        let objects: Vec<_> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| segment.ensure_backing_object(&request).unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(reclaimer.store().created.load(Ordering::SeqCst), 1);
        let first = segment.backing_object().unwrap();
        assert!(objects.iter().all(|o| Arc::ptr_eq(o, &first)));
    }

    #[test]
    fn test_failed_creation_can_be_retried() {
        let reclaimer = Reclaimer::new(TestStore::default());
        let segment = reclaimer.open_segment();
        segment.set_size(PAGE_SIZE).unwrap();
        let request = MappingRequest::new(PAGE_SIZE, RW);

        reclaimer.store().fail_create.store(true, Ordering::SeqCst);
        assert!(matches!(
            segment.ensure_backing_object(&request),
            Err(Error::ResourceExhausted(_))
        ));
        assert!(!segment.is_mapped());
        segment.set_size(2 * PAGE_SIZE).unwrap();

        reclaimer.store().fail_create.store(false, Ordering::SeqCst);
        let object = segment.ensure_backing_object(&request).unwrap();
        assert_eq!(object.size, 2 * PAGE_SIZE);
    }

    #[test]
    fn test_range_operations_need_backing() {
        let reclaimer = Reclaimer::new(TestStore::default());
        let segment = reclaimer.open_segment();
        segment.set_size(4 * PAGE_SIZE).unwrap();
        assert!(matches!(
            segment.unpin(PinRequest::all()),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            segment.pin(PinRequest::all()),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            segment.pin_status(PinRequest::all()),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_unpin_pin_status() -> anyhow::Result<()> {
        let reclaimer = Reclaimer::new(TestStore::default());
        let segment = mapped(&reclaimer, 100);

        segment.unpin(PinRequest::new(0, 100 * P))?;
        assert_eq!(segment.pin_status(PinRequest::new(10 * P, P))?, PinStatus::Unpinned);
        assert_eq!(reclaimer.reclaimable_bytes(), 100 * P);

        assert_eq!(
            segment.pin(PinRequest::new(20 * P, 11 * P))?,
            PurgeStatus::NotPurged
        );
        assert_eq!(segment.pin_status(PinRequest::new(20 * P, 11 * P))?, PinStatus::Pinned);
        assert_eq!(segment.pin_status(PinRequest::new(15 * P, 10 * P))?, PinStatus::Unpinned);
        let bounds: Vec<_> = segment
            .unpinned_ranges()
            .iter()
            .map(|r| (r.start_page, r.end_page))
            .collect();
        assert_eq!(bounds, vec![(31, 99), (0, 19)]);
        assert_eq!(reclaimer.reclaimable_bytes(), 89 * P);

        // an invalid request leaves everything untouched
        assert!(segment.unpin(PinRequest::new(P / 2, P)).is_err());
        assert_eq!(reclaimer.reclaimable_bytes(), 89 * P);
        Ok(())
    }

    #[test]
    fn test_pin_reports_purge() -> anyhow::Result<()> {
        let reclaimer = Reclaimer::new(TestStore::default());
        let segment = mapped(&reclaimer, 10);

        segment.unpin(PinRequest::new(2 * P, 4 * P))?;
        let report = segment.purge();
        assert_eq!(report.ranges_purged, 1);
        assert_eq!(report.pages_purged, 4);
        assert_eq!(
            segment.backing_object().unwrap().released(),
            vec![crate::range::PageRange::new(2, 5)]
        );

        assert_eq!(segment.pin(PinRequest::new(0, 3 * P))?, PurgeStatus::WasPurged);
        assert_eq!(segment.pin(PinRequest::new(0, 3 * P))?, PurgeStatus::NotPurged);
        assert_eq!(segment.pin(PinRequest::all())?, PurgeStatus::WasPurged);
        assert!(segment.unpinned_ranges().is_empty());
        assert_eq!(reclaimer.reclaimable_bytes(), 0);
        Ok(())
    }

    #[test]
    fn test_close_forgets_ranges() -> anyhow::Result<()> {
        let reclaimer = Reclaimer::new(TestStore::default());
        let keep = mapped(&reclaimer, 10);
        let closed = mapped(&reclaimer, 10);
        keep.unpin(PinRequest::new(0, 2 * P))?;
        closed.unpin(PinRequest::new(0, 5 * P))?;
        closed.unpin(PinRequest::new(7 * P, P))?;
        assert_eq!(reclaimer.reclaimable_ranges(), 3);
        assert_eq!(reclaimer.segment_count(), 2);

        let object = closed.backing_object().unwrap();
        closed.close();
        assert_eq!(reclaimer.reclaimable_ranges(), 1);
        assert_eq!(reclaimer.reclaimable_bytes(), 2 * P);
        assert_eq!(reclaimer.segment_count(), 1);

        // nothing of the closed segment is released
        reclaimer.on_memory_pressure();
        assert!(object.released().is_empty());
        Ok(())
    }
}
