use crate::platform::FlashFault;
use crate::{ObjectId, PageId};
use thiserror::Error;

/// Errors that can occur during NVM operations. Marked as non-exhaustive to allow for future
/// additions without breaking the API.
///
/// A caller usually only needs to handle [`Error::NoValidPage`] (expected on first boot, bootstrap
/// by erasing and writing) and the media errors, which may be retried or treated as a fatal device
/// failure. Configuration errors are programming mistakes.
#[derive(Error, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum Error {
    /// The page table is inconsistent, see [`ConfigError`]
    #[error("invalid configuration: {0}")]
    InvalidConfig(ConfigError),

    /// The region base address has to be aligned to the flash erase size
    #[error("invalid region address")]
    InvalidRegionAddress,

    /// The page size has to be a power-of-two multiple of the flash erase size
    #[error("invalid page size")]
    InvalidPageSize,

    /// The reserved region (user pages + scratch pages) exceeds the flash capacity
    #[error("region out of bounds")]
    RegionOutOfBounds,

    /// Slot header and packed objects of the page don't fit into a single slot
    #[error("page {0} too large for a slot")]
    PageTooLarge(PageId),

    /// The page id is not part of the page table
    #[error("unknown page {0}")]
    UnknownPage(PageId),

    /// The object id is not part of the given page
    #[error("unknown object {0}")]
    UnknownObject(ObjectId),

    /// The provided value or buffer doesn't match the configured object size
    #[error("size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    /// The page has never been written, or it was erased. Expected on first boot.
    #[error("no valid copy of page {0}")]
    NoValidPage(PageId),

    /// The newest copy of the page failed its payload checksum. Only `erase` recovers the page.
    #[error("page {0} is corrupt")]
    Corrupt(PageId),

    /// Reading from the flash failed
    #[error("flash read failed")]
    FlashReadFailed,

    /// Programming the flash failed
    #[error("flash write failed")]
    FlashWriteFailed,

    /// Erasing a flash page failed
    #[error("flash erase failed")]
    FlashEraseFailed,

    /// The flash driver rejected an unaligned access
    #[error("unaligned flash access")]
    Unaligned,

    /// The flash region is write protected
    #[error("flash region locked")]
    Locked,

    /// The flash controller didn't finish in time
    #[error("flash timeout")]
    Timeout,

    /// Every slot holds the current copy of some page. Can't happen with a valid configuration.
    #[error("no free slot")]
    NoFreeSlot,

    /// The generation counter reached `u32::MAX`
    #[error("generation counter exhausted")]
    GenerationExhausted,
}

/// Reasons for rejecting a page table when building a [`crate::config::Config`].
#[derive(Error, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum ConfigError {
    #[error("no pages configured")]
    NoPages,

    /// At least one scratch page is required for copy-on-write
    #[error("no scratch pages configured")]
    NoScratchPages,

    #[error("region not set")]
    MissingRegion,

    #[error("duplicate page {0}")]
    DuplicatePage(PageId),

    #[error("page {0} holds no objects")]
    EmptyPage(PageId),

    #[error("duplicate object {1} in page {0}")]
    DuplicateObject(PageId, ObjectId),

    #[error("object {1} in page {0} has zero size")]
    ZeroSizedObject(PageId, ObjectId),

    /// The payload length is stored as `u16` in the slot header
    #[error("payload of page {0} exceeds 65535 bytes")]
    PayloadTooLarge(PageId),
}

impl From<ConfigError> for Error {
    fn from(value: ConfigError) -> Self {
        Error::InvalidConfig(value)
    }
}

/// The flash primitive that failed, used to pick the matching generic error.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum FlashOp {
    Read,
    Write,
    Erase,
}

impl Error {
    pub(crate) fn from_fault(op: FlashOp, fault: FlashFault) -> Self {
        match fault {
            FlashFault::Unaligned => Error::Unaligned,
            FlashFault::Locked => Error::Locked,
            FlashFault::Timeout => Error::Timeout,
            FlashFault::OutOfBounds | FlashFault::Other => match op {
                FlashOp::Read => Error::FlashReadFailed,
                FlashOp::Write => Error::FlashWriteFailed,
                FlashOp::Erase => Error::FlashEraseFailed,
            },
        }
    }

    /// Media errors come from the flash driver and may succeed when retried.
    pub fn is_media_error(&self) -> bool {
        matches!(
            self,
            Error::FlashReadFailed
                | Error::FlashWriteFailed
                | Error::FlashEraseFailed
                | Error::Unaligned
                | Error::Locked
                | Error::Timeout
        )
    }
}
