#![doc = include_str ! ("../README.md")]
#![cfg_attr(not(target_arch = "x86_64"), no_std)]

pub mod config;
pub mod error;
mod get;
pub mod platform;
mod raw;
pub mod request;
mod set;
mod store;
mod wear;

pub use config::{Config, ConfigBuilder, ObjectDescriptor, PageDescriptor, PageKind};
pub use get::Get;
pub use request::{Request, RequestQueue};
pub use set::Set;
pub use wear::{PageState, SlotState};

extern crate alloc;

use crate::error::{Error, FlashOp};
use crate::platform::{AlignedOps, Platform};
use crate::raw::{HEADER_SIZE, payload_offset};
use crate::wear::Slot;
use alloc::vec::Vec;
use core::fmt;
#[cfg(feature = "defmt")]
use defmt::trace;

/// Identifies a logical page of the page table.
///
/// Usage: `const PAGE_WEAR: PageId = PageId(1);`
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PageId(pub u16);

/// Identifies an object within a page. The same id may be used in several pages.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ObjectId(pub u16);

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NvmStatistics {
    pub slots: SlotStatistics,
    pub per_slot: Vec<SlotInfo>,
    pub pages: Vec<(PageId, PageState)>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SlotStatistics {
    pub blank: u16,
    pub valid: u16,
    pub stale: u16,
    pub dirty: u16,
    pub corrupt: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SlotInfo {
    pub index: usize,
    pub address: usize,
    pub state: SlotState,
    pub page: Option<PageId>,
    pub generation: Option<u32>,
    /// Erases issued by this instance, the count is not persisted
    pub erase_count: u32,
}

/// The Nvm struct keeps the logical to physical page mapping in memory. It is rebuilt from the
/// slot headers on every [`Nvm::new`], nothing else is persisted.
pub struct Nvm<T: Platform> {
    pub(crate) hal: T,
    pub(crate) config: Config,

    // set after calling self.load_slots
    pub(crate) slots: Vec<Slot>,
    pub(crate) pages: Vec<PageState>,
    pub(crate) next_generation: u32,
    pub(crate) cursor: usize,
}

impl<T: Platform> Nvm<T> {
    /// Scans all slots of the reserved region to
    /// 1. Find the newest valid copy of every configured page
    /// 2. Invalidate older copies left behind by an interrupted write
    /// 3. Detect slots that were torn by a power loss so they are erased before reuse
    ///
    /// Succeeds on blank flash, in which case every page is [`PageState::Uninitialized`]. Use
    /// [`Nvm::check_pages`] to find out whether the application has to bootstrap its data.
    pub fn new(config: Config, hal: T) -> Result<Nvm<T>, Error> {
        if !config.base_address().is_multiple_of(T::ERASE_SIZE) {
            return Err(Error::InvalidRegionAddress);
        }

        let page_size = config.page_size();
        if page_size == 0
            || !page_size.is_multiple_of(T::ERASE_SIZE)
            || !(page_size / T::ERASE_SIZE).is_power_of_two()
        {
            return Err(Error::InvalidPageSize);
        }

        let region_end = config
            .region_size()
            .and_then(|size| config.base_address().checked_add(size))
            .ok_or(Error::RegionOutOfBounds)?;
        if region_end > hal.capacity() || region_end > u32::MAX as usize {
            return Err(Error::RegionOutOfBounds);
        }

        let payload_start = payload_offset::<T>();
        if let Some(page) = config
            .pages()
            .iter()
            .find(|page| payload_start + T::align_write_ceil(page.payload_len()) > page_size)
        {
            return Err(Error::PageTooLarge(page.id()));
        }

        let mut nvm = Self {
            hal,
            pages: Vec::with_capacity(config.pages().len()),
            slots: Vec::with_capacity(config.slot_count()),
            config,
            next_generation: 0,
            cursor: 0,
        };

        nvm.load_slots()?;

        Ok(nvm)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns `Ok` if every configured page has a valid copy.
    ///
    /// `Err(NoValidPage)` names the first page that was never written, which is expected on the
    /// first boot after programming the device: erase and write initial data to bootstrap.
    pub fn check_pages(&self) -> Result<(), Error> {
        for (descriptor, state) in self.config.pages().iter().zip(self.pages.iter()) {
            match state {
                PageState::Valid { .. } => {}
                PageState::Uninitialized => return Err(Error::NoValidPage(descriptor.id())),
                PageState::Corrupt { .. } => return Err(Error::Corrupt(descriptor.id())),
            }
        }
        Ok(())
    }

    pub fn page_state(&self, page: PageId) -> Result<PageState, Error> {
        let page_index = self.config.page_index(page)?;
        Ok(self.pages[page_index])
    }

    /// Read the committed bytes of an object.
    pub fn read(&mut self, page: PageId, object: ObjectId) -> Result<Vec<u8>, Error> {
        #[cfg(feature = "defmt")]
        trace!("read: {} {}", page, object);

        let location = self.resolve(page, object)?;
        let mut buf = alloc::vec![0u8; location.size];
        self.read_object(&location, &mut buf)?;
        Ok(buf)
    }

    /// Read the committed bytes of an object into `buf`, which must match the object size.
    pub fn read_into(&mut self, page: PageId, object: ObjectId, buf: &mut [u8]) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("read_into: {} {}", page, object);

        let location = self.resolve(page, object)?;
        if buf.len() != location.size {
            return Err(Error::SizeMismatch {
                expected: location.size,
                actual: buf.len(),
            });
        }
        self.read_object(&location, buf)
    }

    /// Get a typed value from the flash.
    ///
    /// Supported types are bool, signed and unsigned integers up to 64-bit width (stored little
    /// endian) and `Vec<u8>`. The object size has to match the width of the type.
    pub fn get<R>(&mut self, page: PageId, object: ObjectId) -> Result<R, Error>
    where
        Nvm<T>: Get<R>,
    {
        Get::get(self, page, object)
    }

    /// Write a single object. The other objects of the page keep their committed value, or zero
    /// if the page was never written.
    pub fn write(&mut self, page: PageId, object: ObjectId, value: &[u8]) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("write: {} {}", page, object);

        self.store_objects(page, &[(object, value)])
    }

    /// Write several objects of a page in one page commit. Objects not listed keep their committed
    /// value. An empty list commits the current image, which bootstraps a never written page with
    /// zeroed objects.
    pub fn write_all(&mut self, page: PageId, values: &[(ObjectId, &[u8])]) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("write_all: {} [{}]", page, values.len());

        self.store_objects(page, values)
    }

    /// Set a typed value and write it to the flash, see [`Nvm::get`] for the supported types.
    pub fn set<R>(&mut self, page: PageId, object: ObjectId, value: R) -> Result<(), Error>
    where
        Nvm<T>: Set<R>,
    {
        Set::set(self, page, object, value)
    }

    /// Invalidate every copy of the page. Reads fail with [`Error::NoValidPage`] until the next
    /// write. Also recovers a corrupt page.
    pub fn erase(&mut self, page: PageId) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("erase: {}", page);

        let page_index = self.config.page_index(page)?;
        self.invalidate_page(page_index)
    }

    /// Physically erase the whole reserved region.
    pub fn erase_all(&mut self) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("erase_all");

        self.erase_all_slots()
    }

    /// Returns detailed statistics about the slot usage
    pub fn statistics(&self) -> NvmStatistics {
        let mut slots = SlotStatistics::default();

        let per_slot = self
            .slots
            .iter()
            .enumerate()
            .map(|(index, slot)| {
                match slot.state {
                    SlotState::Blank => slots.blank += 1,
                    SlotState::Valid => slots.valid += 1,
                    SlotState::Stale => slots.stale += 1,
                    SlotState::Dirty => slots.dirty += 1,
                    SlotState::Corrupt => slots.corrupt += 1,
                }
                SlotInfo {
                    index,
                    address: slot.address,
                    state: slot.state,
                    page: slot.page,
                    generation: slot.page.map(|_| slot.generation),
                    erase_count: slot.erase_count,
                }
            })
            .collect::<Vec<_>>();

        let pages = self
            .config
            .pages()
            .iter()
            .zip(self.pages.iter())
            .map(|(descriptor, state)| (descriptor.id(), *state))
            .collect();

        NvmStatistics {
            slots,
            per_slot,
            pages,
        }
    }

    /// Gives the flash driver back.
    pub fn release(self) -> T {
        self.hal
    }

    pub(crate) fn read_flash(&mut self, address: usize, buf: &mut [u8]) -> Result<(), Error> {
        self.hal
            .read(address as _, buf)
            .map_err(|e| Error::from_fault(FlashOp::Read, T::classify(&e)))
    }
}

// The header has to start on a read boundary of any sane flash
const _: () = assert!(HEADER_SIZE.is_multiple_of(8));
