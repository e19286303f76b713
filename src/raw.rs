use crate::config::PageKind;
use crate::error::{Error, FlashOp};
use crate::platform::{AlignedOps, FnCrc32, Platform, masked};
use alloc::vec;
use core::fmt::{Debug, Formatter};
use core::mem::size_of;
#[cfg(feature = "defmt")]
use defmt::trace;

pub(crate) const HEADER_SIZE: usize = size_of::<SlotHeader>();
pub(crate) const FORMAT_VERSION: u8 = 0xFE;

// header_crc covers everything between the state marker and the two checksums
const HEADER_CRC_RANGE: core::ops::Range<usize> = 4..20;

const _: () = assert!(HEADER_SIZE == 24, "slot header layout changed");

const SSB_VALID: u32 = 0x1;
const SSB_STALE: u32 = 0x2;

/// Validity marker in the first word of a slot. Transitions only clear bits so they can be
/// programmed without an erase.
#[derive(strum::FromRepr, strum::Display, Debug, PartialEq, Copy, Clone)]
#[repr(u32)]
pub(crate) enum SlotMarker {
    // All bits set, default state after flash erase.
    Erased = u32::MAX,

    // Header and payload are committed. Written last.
    Valid = SlotMarker::Erased as u32 & !SSB_VALID,

    // A newer copy exists or the page was erased.
    Stale = SlotMarker::Valid as u32 & !SSB_STALE,

    // Any other bit pattern, e.g. an interrupted marker write.
    Garbage = 0,
}

impl From<u32> for SlotMarker {
    fn from(val: u32) -> Self {
        match SlotMarker::from_repr(val) {
            Some(SlotMarker::Garbage) | None => SlotMarker::Garbage,
            Some(marker) => marker,
        }
    }
}

#[repr(C, packed)]
#[derive(Copy, Clone)]
pub(crate) struct SlotHeader {
    pub(crate) state: u32,
    pub(crate) generation: u32,
    pub(crate) page_id: u16,
    pub(crate) payload_len: u16,
    pub(crate) kind: u8,
    pub(crate) version: u8,
    pub(crate) _reserved: [u8; 2],
    pub(crate) payload_crc: u32,
    pub(crate) header_crc: u32,
}

pub(crate) union SlotHeaderRaw {
    pub(crate) header: SlotHeader,
    pub(crate) raw: [u8; HEADER_SIZE],
}

impl SlotHeader {
    pub(crate) fn new(
        crc32: FnCrc32,
        page_id: u16,
        kind: PageKind,
        generation: u32,
        payload: &[u8],
    ) -> Self {
        let mut header = SlotHeader {
            state: SlotMarker::Valid as u32,
            generation,
            page_id,
            payload_len: payload.len() as u16,
            kind: kind as u8,
            version: FORMAT_VERSION,
            _reserved: [0xFF; 2],
            payload_crc: crc32(u32::MAX, payload),
            header_crc: 0,
        };
        header.header_crc = header.calculate_crc32(crc32);
        header
    }

    pub(crate) fn from_bytes(bytes: &[u8]) -> Self {
        let mut raw = [0u8; HEADER_SIZE];
        raw.copy_from_slice(&bytes[..HEADER_SIZE]);
        // Safety: every bit pattern is a valid SlotHeader, it only holds integers
        unsafe { SlotHeaderRaw { raw }.header }
    }

    pub(crate) fn to_bytes(self) -> [u8; HEADER_SIZE] {
        // Safety: both union fields have the same size and no padding
        unsafe { SlotHeaderRaw { header: self }.raw }
    }

    pub(crate) fn calculate_crc32(&self, crc32: FnCrc32) -> u32 {
        let buf = self.to_bytes();
        crc32(u32::MAX, &buf[HEADER_CRC_RANGE])
    }

    pub(crate) fn marker(&self) -> SlotMarker {
        SlotMarker::from(self.state)
    }
}

impl Debug for SlotHeader {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        let state = self.marker();
        let generation = self.generation;
        let page_id = self.page_id;
        let payload_len = self.payload_len;
        let kind = self.kind;
        let version = self.version;
        match state {
            SlotMarker::Valid | SlotMarker::Stale => f.write_fmt(format_args!(
                "SlotHeader {{ state: {state:>7}, page: {page_id:>3}, kind: {kind}, generation: {generation:>6}, len: {payload_len}, version: 0x{version:0>2x} }}"
            )),
            _ => f.write_fmt(format_args!("SlotHeader {{ state: {state:>7} }}")),
        }
    }
}

/// Programs `bytes` at `offset`. A trailer shorter than `WRITE_SIZE` is padded with `0xFF`, which
/// leaves the padded flash bits untouched.
#[inline(always)]
pub(crate) fn write_aligned<T: Platform>(
    hal: &mut T,
    offset: u32,
    bytes: &[u8],
) -> Result<(), Error> {
    #[cfg(feature = "defmt")]
    trace!("write_aligned @{:#08x}: [{}]", offset, bytes.len());

    masked(|| {
        if bytes.len().is_multiple_of(T::WRITE_SIZE) {
            hal.write(offset, bytes)
        } else {
            let pivot = T::align_write_floor(bytes.len());
            let head = &bytes[..pivot];
            let trailer = &bytes[pivot..];
            if !head.is_empty() {
                hal.write(offset, head)?;
            }

            // no need to write the trailer if remaining data is all ones - this the default state of the flash
            if trailer.iter().any(|&e| e != 0xFF) {
                let mut buf = vec![0xFFu8; T::WRITE_SIZE];
                buf[..trailer.len()].copy_from_slice(trailer);
                hal.write(offset + (pivot as u32), &buf)?
            }

            Ok(())
        }
    })
    .map_err(|e| Error::from_fault(FlashOp::Write, T::classify(&e)))
}

/// Programs a bare slot marker into the first word of the slot at `address`.
pub(crate) fn write_marker<T: Platform>(
    hal: &mut T,
    address: usize,
    marker: SlotMarker,
) -> Result<(), Error> {
    let raw = (marker as u32).to_le_bytes();
    write_aligned(hal, address as u32, &raw)
}

/// Byte offset of the payload inside a slot.
pub(crate) fn payload_offset<T: Platform>() -> usize {
    T::align_write_ceil(HEADER_SIZE)
}
