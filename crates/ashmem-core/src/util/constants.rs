/// Page shift value (12 bits) for 4KB pages
pub const PAGE_SHIFT: usize = 12;
/// Default page size (4096 bytes) for stores that do not query the platform
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;

/// Maximum segment name length in bytes, including the terminator slot
pub const NAME_LEN: usize = 256;
/// Prefix of every backing object name
pub const NAME_PREFIX: &str = "dev/ashmem/";
/// Name reported for segments that were never named
pub const NAME_DEFAULT: &str = "dev/ashmem";

/// Linux pressure stall information for memory
pub const PSI_MEMORY_PATH: &str = "/proc/pressure/memory";
