use ashmem_core::util::page_align;
use ashmem_core::{BackingStore, MappingRequest, PageRange, Protection, Reclaimer, Segment};
use lazy_static::lazy_static;
use libc::{FALLOC_FL_KEEP_SIZE, FALLOC_FL_PUNCH_HOLE, MAP_SHARED, MFD_CLOEXEC};
use log::{debug, trace};
use std::ffi::CString;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::sync::Arc;
use thiserror::Error;

// memfd names are limited to NAME_MAX minus the "memfd:" prefix
const MFD_NAME_MAX: usize = 249;

lazy_static! {
    static ref SYSTEM_PAGE_SIZE: usize = {
        let v = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if v > 0 {
            v as usize
        } else {
            ashmem_core::util::PAGE_SIZE
        }
    };
    static ref GLOBAL: Arc<Reclaimer<MemfdStore>> = Reclaimer::new(MemfdStore::default());
}

/// The process-wide reclaimer over the system memfd store.
pub fn global_reclaimer() -> Arc<Reclaimer<MemfdStore>> {
    Arc::clone(&GLOBAL)
}

/// Errors of the memfd backing store.
#[derive(Debug, Error)]
pub enum MemfdError {
    /// A system call failed
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// The object name contains a NUL byte
    #[error("invalid name: {0}")]
    InvalidName(#[from] std::ffi::NulError),
    /// An access reached past the end of a mapping
    #[error("access [{offset:#x}, +{len:#x}) out of bounds for mapping of {size:#x} bytes")]
    OutOfBounds {
        /// Byte offset of the access
        offset: usize,
        /// Length of the access
        len: usize,
        /// Mapping length
        size: usize,
    },
    /// A mapping was requested past the last page of its object
    #[error("mapping of {len:#x} bytes exceeds object of {size:#x} bytes")]
    TooLarge {
        /// Requested mapping length
        len: usize,
        /// Object size
        size: usize,
    },
    /// A read through a mapping without `PROT_READ`
    #[error("mapping is not readable ({0})")]
    NotReadable(Protection),
    /// A write through a mapping without `PROT_WRITE`
    #[error("mapping is not writable ({0})")]
    NotWritable(Protection),
}

impl From<MemfdError> for ashmem_core::Error {
    fn from(e: MemfdError) -> Self {
        match &e {
            MemfdError::Io(io) if matches!(io.raw_os_error(), Some(libc::ENOMEM | libc::ENOSPC)) => {
                ashmem_core::Error::ResourceExhausted("memfd object")
            }
            _ => ashmem_core::Error::backing(e),
        }
    }
}

/// Backing store creating one memfd per segment.
#[derive(Debug, Clone, Copy)]
pub struct MemfdStore {
    page_size: usize,
}

impl Default for MemfdStore {
    fn default() -> Self {
        MemfdStore {
            page_size: *SYSTEM_PAGE_SIZE,
        }
    }
}

/// An anonymous memfd holding a segment's pages.
#[derive(Debug)]
pub struct MemfdObject {
    fd: OwnedFd,
    name: String,
    size: usize,
}

impl MemfdObject {
    fn create(name: &str, size: usize) -> Result<Self, MemfdError> {
        let mut end = name.len().min(MFD_NAME_MAX);
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        let cname = CString::new(&name[..end])?;
        let fd = unsafe { libc::memfd_create(cname.as_ptr(), MFD_CLOEXEC) };
        if fd == -1 {
            return Err(std::io::Error::last_os_error().into());
        }
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };
        if unsafe { libc::ftruncate(fd.as_raw_fd(), size as libc::off_t) } == -1 {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(MemfdObject {
            fd,
            name: name.to_owned(),
            size,
        })
    }

    /// The name the object was created with.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Object size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }
}

impl AsRawFd for MemfdObject {
    fn as_raw_fd(&self) -> std::os::fd::RawFd {
        self.fd.as_raw_fd()
    }
}

impl BackingStore for MemfdStore {
    type Object = MemfdObject;

    fn page_size(&self) -> usize {
        self.page_size
    }

    fn create_object(&self, name: &str, size: usize) -> ashmem_core::Result<MemfdObject> {
        let object = MemfdObject::create(name, size)?;
        debug!("memfd {} (fd {}) with {} bytes", name, object.as_raw_fd(), size);
        Ok(object)
    }

    fn read_object(
        &self,
        object: &MemfdObject,
        offset: usize,
        buf: &mut [u8],
    ) -> ashmem_core::Result<usize> {
        let mut done = 0;
        while done < buf.len() {
            let ret = unsafe {
                libc::pread(
                    object.as_raw_fd(),
                    buf[done..].as_mut_ptr() as *mut libc::c_void,
                    buf.len() - done,
                    (offset + done) as libc::off_t,
                )
            };
            match ret {
                -1 => {
                    let e = std::io::Error::last_os_error();
                    if e.kind() != std::io::ErrorKind::Interrupted {
                        return Err(MemfdError::Io(e).into());
                    }
                }
                0 => break,
                n => done += n as usize,
            }
        }
        Ok(done)
    }

    fn release_pages(&self, object: &MemfdObject, pages: PageRange) -> ashmem_core::Result<()> {
        let offset = pages.start as usize * self.page_size;
        let len = pages.pages() as usize * self.page_size;
        let ret = unsafe {
            libc::fallocate(
                object.as_raw_fd(),
                FALLOC_FL_PUNCH_HOLE | FALLOC_FL_KEEP_SIZE,
                offset as libc::off_t,
                len as libc::off_t,
            )
        };
        if ret == -1 {
            return Err(MemfdError::Io(std::io::Error::last_os_error()).into());
        }
        trace!("memfd {}: punched pages {}", object.name, pages);
        Ok(())
    }
}

/// A shared mapping of a memfd object.
///
/// Keeps the object alive until unmapped, even if the segment is closed.
#[derive(Debug)]
pub struct Mapping {
    ptr: *mut u8,
    len: usize,
    prot: Protection,
    object: Arc<MemfdObject>,
}

// SAFETY: the pointer refers to a MAP_SHARED region owned by the mapping
unsafe impl Send for Mapping {}
unsafe impl Sync for Mapping {}

impl Mapping {
    /// Maps `len` bytes of `object` with protection `prot`.
    ///
    /// # Errors
    ///
    /// * [`MemfdError::TooLarge`] if `len` reaches past the object's last page
    /// * the OS error if `mmap` fails
    pub fn new(
        object: Arc<MemfdObject>,
        len: usize,
        prot: Protection,
    ) -> Result<Self, MemfdError> {
        let limit = page_align(object.size(), *SYSTEM_PAGE_SIZE).unwrap_or(usize::MAX);
        if len > limit {
            return Err(MemfdError::TooLarge {
                len,
                size: object.size(),
            });
        }
        let p = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                prot.bits(),
                MAP_SHARED,
                object.as_raw_fd(),
                0,
            )
        };
        if p == libc::MAP_FAILED {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(Mapping {
            ptr: p as *mut u8,
            len,
            prot,
            object,
        })
    }

    /// Validates `request` against `segment`, creating the segment's backing
    /// object if needed, and maps it.
    ///
    /// # Errors
    ///
    /// Returns any error of [`Segment::ensure_backing_object`] or of `mmap`.
    pub fn of_segment(
        segment: &Segment<MemfdStore>,
        request: &MappingRequest,
    ) -> ashmem_core::Result<Self> {
        let object = segment.ensure_backing_object(request)?;
        Ok(Mapping::new(object, request.len, request.prot)?)
    }

    /// Start of the mapping.
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }

    /// Length of the mapping in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True for empty mappings.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Protection the region was mapped with.
    pub fn protection(&self) -> Protection {
        self.prot
    }

    /// The mapped object.
    pub fn object(&self) -> &Arc<MemfdObject> {
        &self.object
    }

    fn check(&self, offset: usize, len: usize) -> Result<(), MemfdError> {
        match offset.checked_add(len) {
            Some(end) if end <= self.len => Ok(()),
            _ => Err(MemfdError::OutOfBounds {
                offset,
                len,
                size: self.len,
            }),
        }
    }

    /// Copies `buf.len()` bytes at `offset` into `buf`.
    ///
    /// # Errors
    ///
    /// * [`MemfdError::NotReadable`] without `PROT_READ`
    /// * [`MemfdError::OutOfBounds`] if the read reaches past the end
    pub fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), MemfdError> {
        if !self.prot.contains(Protection::READ) {
            return Err(MemfdError::NotReadable(self.prot));
        }
        self.check(offset, buf.len())?;
        unsafe { std::ptr::copy_nonoverlapping(self.ptr.add(offset), buf.as_mut_ptr(), buf.len()) };
        Ok(())
    }

    /// Writes `buf` at `offset`.
    ///
    /// # Errors
    ///
    /// * [`MemfdError::NotWritable`] without `PROT_WRITE`
    /// * [`MemfdError::OutOfBounds`] if the write reaches past the end
    pub fn write(&self, offset: usize, buf: &[u8]) -> Result<(), MemfdError> {
        if !self.prot.contains(Protection::WRITE) {
            return Err(MemfdError::NotWritable(self.prot));
        }
        self.check(offset, buf.len())?;
        unsafe { std::ptr::copy_nonoverlapping(buf.as_ptr(), self.ptr.add(offset), buf.len()) };
        Ok(())
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        unsafe { libc::munmap(self.ptr as *mut libc::c_void, self.len) };
    }
}
