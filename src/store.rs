//! Object store: resolves `(page, object)` to a byte range of the page payload and builds page
//! images for the wear-leveling layer, which can only rewrite whole pages.

use crate::error::Error;
use crate::platform::{Platform, read_unaligned};
use crate::raw::payload_offset;
use crate::{Nvm, ObjectId, PageId, PageState};
use alloc::vec;
use alloc::vec::Vec;
#[cfg(feature = "defmt")]
use defmt::trace;

pub(crate) struct ObjectLocation {
    pub(crate) page: PageId,
    pub(crate) page_index: usize,
    pub(crate) offset: usize,
    pub(crate) size: usize,
}

impl<T: Platform> Nvm<T> {
    /// Looks the object up in the page table. Never touches the flash.
    pub(crate) fn resolve(&self, page: PageId, object: ObjectId) -> Result<ObjectLocation, Error> {
        let page_index = self.config.page_index(page)?;
        let (offset, size) = self.config.pages()[page_index]
            .locate(object)
            .ok_or(Error::UnknownObject(object))?;

        Ok(ObjectLocation {
            page,
            page_index,
            offset,
            size,
        })
    }

    fn current_slot(&self, page: PageId, page_index: usize) -> Result<usize, Error> {
        match self.pages[page_index] {
            PageState::Valid { slot, .. } => Ok(slot),
            PageState::Uninitialized => Err(Error::NoValidPage(page)),
            PageState::Corrupt { .. } => Err(Error::Corrupt(page)),
        }
    }

    pub(crate) fn read_object(
        &mut self,
        location: &ObjectLocation,
        buf: &mut [u8],
    ) -> Result<(), Error> {
        let slot = self.current_slot(location.page, location.page_index)?;
        let address = self.slots[slot].address + payload_offset::<T>() + location.offset;

        #[cfg(feature = "defmt")]
        trace!("read_object: @{:#08x}[{}]", address, location.size);

        read_unaligned(&mut self.hal, address, buf)
    }

    /// Committed payload of the page, or zeroes if the page was never written.
    fn load_payload(&mut self, page_index: usize) -> Result<(Vec<u8>, bool), Error> {
        let descriptor = &self.config.pages()[page_index];
        let (page, len) = (descriptor.id(), descriptor.payload_len());

        let mut payload = vec![0u8; len];
        match self.current_slot(page, page_index) {
            Ok(slot) => {
                let address = self.slots[slot].address + payload_offset::<T>();
                read_unaligned(&mut self.hal, address, &mut payload)?;
                Ok((payload, true))
            }
            Err(Error::NoValidPage(_)) => Ok((payload, false)),
            Err(e) => Err(e),
        }
    }

    /// Patches the given objects into the page image and commits it. All ids and sizes are checked
    /// before the flash is touched. Nothing is written if the committed image already matches.
    pub(crate) fn store_objects(
        &mut self,
        page: PageId,
        values: &[(ObjectId, &[u8])],
    ) -> Result<(), Error> {
        let page_index = self.config.page_index(page)?;
        let descriptor = &self.config.pages()[page_index];

        let mut patches = Vec::with_capacity(values.len());
        for &(object, value) in values {
            let (offset, size) = descriptor
                .locate(object)
                .ok_or(Error::UnknownObject(object))?;
            if value.len() != size {
                return Err(Error::SizeMismatch {
                    expected: size,
                    actual: value.len(),
                });
            }
            patches.push((offset, value));
        }

        let (mut image, committed) = self.load_payload(page_index)?;

        let mut changed = !committed;
        for (offset, value) in patches {
            let target = &mut image[offset..offset + value.len()];
            if target != value {
                target.copy_from_slice(value);
                changed = true;
            }
        }

        if !changed {
            #[cfg(feature = "defmt")]
            trace!("store_objects: {} unchanged", page);
            return Ok(());
        }

        self.write_page(page_index, &image)
    }
}
