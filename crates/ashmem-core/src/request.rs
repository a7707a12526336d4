//! Pin, unpin and status request validation.

use crate::error::{Error, Result};
use crate::range::PageRange;
use crate::util::{is_page_aligned, page_align};
use serde::{Deserialize, Serialize};

/// A byte range of a segment to pin, unpin or query.
///
/// Both fields must be multiples of the page size. A `len` of zero means
/// "from `offset` to the end of the segment".
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinRequest {
    /// Byte offset into the segment
    pub offset: u64,
    /// Length in bytes, or zero for the rest of the segment
    pub len: u64,
}

impl PinRequest {
    /// Creates a request for `len` bytes at `offset`.
    pub fn new(offset: u64, len: u64) -> Self {
        PinRequest { offset, len }
    }

    /// A request covering the whole segment.
    pub fn all() -> Self {
        PinRequest { offset: 0, len: 0 }
    }

    /// Resolves this request against a segment of `size` bytes into an
    /// inclusive page interval.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the offset or length is not page
    /// aligned, if `offset + len` overflows, or if the range ends past the
    /// page-aligned segment size.
    pub fn to_pages(&self, size: usize, page_size: usize) -> Result<PageRange> {
        let aligned_size = page_align(size, page_size)
            .ok_or_else(|| Error::invalid("segment size overflows page alignment"))?
            as u64;
        let len = match self.len {
            0 => aligned_size.checked_sub(self.offset).ok_or_else(|| {
                Error::invalid(format!(
                    "offset {:#x} past end of segment ({:#x})",
                    self.offset, aligned_size
                ))
            })?,
            len => len,
        };
        if !is_page_aligned(self.offset | len, page_size) {
            return Err(Error::invalid(format!(
                "offset {:#x} and length {:#x} must be page aligned",
                self.offset, len
            )));
        }
        if len == 0 {
            return Err(Error::invalid("empty range"));
        }
        let end = self
            .offset
            .checked_add(len)
            .ok_or_else(|| Error::invalid("offset + length overflows"))?;
        if end > aligned_size {
            return Err(Error::invalid(format!(
                "range [{:#x}, {:#x}) past end of segment ({:#x})",
                self.offset, end, aligned_size
            )));
        }
        let pgstart = self.offset / page_size as u64;
        Ok(PageRange::new(pgstart, pgstart + len / page_size as u64 - 1))
    }
}

/// Result of a pin: whether any pinned page had been purged while unpinned.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum PurgeStatus {
    /// All pinned pages kept their contents
    NotPurged,
    /// At least one pinned page lost its contents and reads back as zeros
    WasPurged,
}

impl From<bool> for PurgeStatus {
    fn from(purged: bool) -> Self {
        if purged {
            PurgeStatus::WasPurged
        } else {
            PurgeStatus::NotPurged
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::PAGE_SIZE;

    const P: u64 = PAGE_SIZE as u64;

    #[test]
    fn test_resolves_page_bounds() {
        let pages = PinRequest::new(2 * P, 3 * P).to_pages(100 * PAGE_SIZE, PAGE_SIZE);
        assert_eq!(pages.unwrap(), PageRange::new(2, 4));
    }

    #[test]
    fn test_zero_len_means_rest_of_segment() {
        let pages = PinRequest::new(10 * P, 0).to_pages(100 * PAGE_SIZE, PAGE_SIZE);
        assert_eq!(pages.unwrap(), PageRange::new(10, 99));
        // partial last page is rounded up
        let pages = PinRequest::all().to_pages(PAGE_SIZE + 1, PAGE_SIZE);
        assert_eq!(pages.unwrap(), PageRange::new(0, 1));
    }

    #[test]
    fn test_rejects_misaligned() {
        let r = PinRequest::new(1, P).to_pages(10 * PAGE_SIZE, PAGE_SIZE);
        assert!(matches!(r, Err(Error::InvalidArgument(_))));
        let r = PinRequest::new(0, P + 1).to_pages(10 * PAGE_SIZE, PAGE_SIZE);
        assert!(matches!(r, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_rejects_out_of_bounds() {
        let r = PinRequest::new(9 * P, 2 * P).to_pages(10 * PAGE_SIZE, PAGE_SIZE);
        assert!(matches!(r, Err(Error::InvalidArgument(_))));
        let r = PinRequest::new(11 * P, 0).to_pages(10 * PAGE_SIZE, PAGE_SIZE);
        assert!(matches!(r, Err(Error::InvalidArgument(_))));
        let r = PinRequest::new(10 * P, 0).to_pages(10 * PAGE_SIZE, PAGE_SIZE);
        assert!(matches!(r, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_rejects_overflow() {
        let r = PinRequest::new(u64::MAX & !(P - 1), 2 * P).to_pages(10 * PAGE_SIZE, PAGE_SIZE);
        assert!(matches!(r, Err(Error::InvalidArgument(_))));
    }
}
