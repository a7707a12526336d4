//! Utility functions and types used throughout ashmem.
//!
//! This module provides:
//! - Constants for pages, segment names and pressure sources ([`PAGE_SIZE`], [`NAME_LEN`], ...)
//! - Page arithmetic helpers ([`page_align`], [`is_page_aligned`])
//! - Name handling ([`truncate_name`])
//! - Cancelable background threads ([`spawn_cancelable`])

mod cancelable_thread;
mod constants;

pub use self::cancelable_thread::*;
pub use self::constants::*;

/// Rounds `n` up to the next multiple of `page_size`.
///
/// Returns `None` if the result does not fit in a `usize`.
///
/// # Examples
///
/// ```
/// use ashmem_core::util::page_align;
///
/// assert_eq!(page_align(1, 4096), Some(4096));
/// assert_eq!(page_align(8192, 4096), Some(8192));
/// assert_eq!(page_align(usize::MAX, 4096), None);
/// ```
pub fn page_align(n: usize, page_size: usize) -> Option<usize> {
    debug_assert!(page_size.is_power_of_two());
    n.checked_add(page_size - 1).map(|v| v & !(page_size - 1))
}

/// Returns true if `n` is a multiple of `page_size`.
pub fn is_page_aligned(n: u64, page_size: usize) -> bool {
    n & (page_size as u64 - 1) == 0
}

/// Truncates `name` to at most `NAME_LEN - 1` bytes without splitting a
/// character.
pub fn truncate_name(name: &str) -> &str {
    let max = NAME_LEN - 1;
    if name.len() <= max {
        return name;
    }
    let mut end = max;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}
