//! Error types shared by every ashmem component.

use crate::segment::Protection;
use thiserror::Error;

/// Errors returned by segment, tracker and reclaim operations.
///
/// Every request is validated before any tracker or reclaim list state is
/// touched, so receiving one of these errors means nothing was modified.
#[derive(Debug, Error)]
pub enum Error {
    /// A request was malformed: misaligned offsets or lengths, a zero or
    /// oversized segment size, a range past the end of the segment, an attempt
    /// to widen the protection mask, or a range operation on a segment that
    /// has no backing object yet.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    /// The requested access exceeds the segment's allowed protection mask.
    #[error("Permission denied: requested {requested}, allowed {allowed}")]
    PermissionDenied {
        /// Protection bits requested by the caller
        requested: Protection,
        /// Protection bits the segment still allows
        allowed: Protection,
    },
    /// The size or name of a segment was changed after its backing object
    /// was created.
    #[error("{0} cannot be changed once the segment is mapped")]
    AlreadyConfigured(&'static str),
    /// Allocation of a backing object or a range node failed.
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(&'static str),
    /// Any other failure reported by the backing store.
    #[error("Backing store error: {0}")]
    Backing(Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Wraps a backing store error.
    pub fn backing<E: std::error::Error + Send + Sync + 'static>(e: E) -> Self {
        Error::Backing(Box::new(e))
    }
}

impl From<std::collections::TryReserveError> for Error {
    fn from(_: std::collections::TryReserveError) -> Self {
        Error::ResourceExhausted("range node")
    }
}

impl From<Error> for std::io::Error {
    fn from(e: Error) -> Self {
        let kind = match &e {
            Error::InvalidArgument(_) => std::io::ErrorKind::InvalidInput,
            Error::PermissionDenied { .. } => std::io::ErrorKind::PermissionDenied,
            Error::ResourceExhausted(_) => std::io::ErrorKind::OutOfMemory,
            Error::AlreadyConfigured(_) | Error::Backing(_) => std::io::ErrorKind::Other,
        };
        std::io::Error::new(kind, e)
    }
}

/// Result type for ashmem core operations.
pub type Result<T> = std::result::Result<T, Error>;
