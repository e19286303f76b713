use crate::error::{Error, FlashOp};
use embedded_storage::nor_flash::{NorFlash, NorFlashError, NorFlashErrorKind};

/// The flash driver the engine runs on. Any [`NorFlash`] that can calculate a CRC32 qualifies:
///
/// ```ignore
/// impl Crc for MyFlash {
///     fn crc32(init: u32, data: &[u8]) -> u32 { my_rom::crc32_le(init, data) }
/// }
/// impl Platform for MyFlash {}
/// ```
///
/// Drivers that can tell a locked region or a timeout apart override [`Platform::classify`].
pub trait Platform: Crc + NorFlash {
    fn classify(error: &Self::Error) -> FlashFault {
        match error.kind() {
            NorFlashErrorKind::NotAligned => FlashFault::Unaligned,
            NorFlashErrorKind::OutOfBounds => FlashFault::OutOfBounds,
            _ => FlashFault::Other,
        }
    }
}

impl<T: Platform> Platform for &mut T {
    fn classify(error: &Self::Error) -> FlashFault {
        T::classify(error)
    }
}

pub type FnCrc32 = fn(init: u32, data: &[u8]) -> u32;

pub trait Crc {
    fn crc32(init: u32, data: &[u8]) -> u32;
}

impl<T: Crc> Crc for &mut T {
    fn crc32(init: u32, data: &[u8]) -> u32 {
        T::crc32(init, data)
    }
}

/// Failure classes reported by a flash driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FlashFault {
    Unaligned,
    OutOfBounds,
    Locked,
    Timeout,
    Other,
}

pub trait AlignedOps: Platform {
    fn align_read(size: usize) -> usize {
        align_ceil(size, Self::READ_SIZE)
    }

    fn align_read_floor(size: usize) -> usize {
        align_floor(size, Self::READ_SIZE)
    }

    fn align_write_ceil(size: usize) -> usize {
        align_ceil(size, Self::WRITE_SIZE)
    }

    fn align_write_floor(size: usize) -> usize {
        align_floor(size, Self::WRITE_SIZE)
    }
}

#[inline(always)]
const fn align_ceil(size: usize, alignment: usize) -> usize {
    if alignment.is_power_of_two() {
        size.saturating_add(alignment - 1) & !(alignment - 1)
    } else {
        size.saturating_add(alignment - 1) / alignment * alignment
    }
}

#[inline(always)]
const fn align_floor(size: usize, alignment: usize) -> usize {
    if alignment.is_power_of_two() {
        size & !(alignment - 1)
    } else {
        size / alignment * alignment
    }
}

impl<T: Platform> AlignedOps for T {}

/// Runs a flash program or erase with interrupts masked. The mask is released when the closure
/// returns, including the error paths.
#[inline(always)]
pub(crate) fn masked<R>(f: impl FnOnce() -> R) -> R {
    critical_section::with(|_cs| f())
}

pub(crate) fn erase_masked<T: Platform>(hal: &mut T, from: u32, to: u32) -> Result<(), Error> {
    masked(|| hal.erase(from, to)).map_err(|e| Error::from_fault(FlashOp::Erase, T::classify(&e)))
}

/// Reads `bytes.len()` bytes from an address that doesn't need to satisfy `READ_SIZE`.
pub(crate) fn read_unaligned<T: Platform>(
    hal: &mut T,
    address: usize,
    bytes: &mut [u8],
) -> Result<(), Error> {
    let start = T::align_read_floor(address);
    let end = T::align_read(address + bytes.len());

    if start == address && end == address + bytes.len() {
        return hal
            .read(address as _, bytes)
            .map_err(|e| Error::from_fault(FlashOp::Read, T::classify(&e)));
    }

    let mut buf = alloc::vec![0u8; end - start];
    hal.read(start as _, &mut buf)
        .map_err(|e| Error::from_fault(FlashOp::Read, T::classify(&e)))?;
    let skip = address - start;
    bytes.copy_from_slice(&buf[skip..skip + bytes.len()]);
    Ok(())
}
