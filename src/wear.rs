//! Wear leveling: maps every logical page to a physical slot and moves it to a fresh slot on each
//! write.
//!
//! A write never touches the slot holding the current copy. The new copy is programmed payload
//! first and header last, the header carrying the `Valid` marker is the commit point. Only then the
//! previous copy gets its `Stale` marker. A power loss at any point leaves either the old or the new
//! copy valid, and if both are, the higher generation wins on the next scan.

use crate::config::PageKind;
use crate::error::Error;
use crate::platform::{Platform, erase_masked};
use crate::raw::{
    FORMAT_VERSION, HEADER_SIZE, SlotHeader, SlotMarker, payload_offset, write_aligned,
    write_marker,
};
use crate::{Nvm, PageId};
use alloc::vec;
use alloc::vec::Vec;
#[cfg(feature = "defmt")]
use defmt::{debug, trace, warn};

/// What the engine knows about a physical slot.
#[derive(strum::Display, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SlotState {
    /// Verified erased, can be programmed without an erase.
    Blank,
    /// Holds the current copy of a page.
    Valid,
    /// Superseded or invalidated copy, erased before reuse.
    Stale,
    /// Torn or unrecognized content, erased before reuse.
    Dirty,
    /// Holds the newest copy of a page whose payload failed its checksum. Kept until the page is
    /// erased.
    Corrupt,
}

/// Logical page state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PageState {
    /// Never written or erased.
    Uninitialized,
    Valid { slot: usize, generation: u32 },
    Corrupt { slot: usize },
}

pub(crate) struct Slot {
    pub(crate) address: usize,
    pub(crate) state: SlotState,
    pub(crate) page: Option<PageId>,
    pub(crate) generation: u32,
    // the marker on flash still says Valid, so a scan would consider this slot
    marker_valid: bool,
    pub(crate) erase_count: u32,
}

impl Slot {
    fn blank(address: usize) -> Self {
        Self {
            address,
            state: SlotState::Blank,
            page: None,
            generation: 0,
            marker_valid: false,
            erase_count: 0,
        }
    }

    fn is_free(&self) -> bool {
        !matches!(self.state, SlotState::Valid | SlotState::Corrupt)
    }
}

enum LoadSlotResult {
    Blank,
    Dirty,
    Stale {
        generation: Option<u32>,
    },
    Candidate {
        page_index: usize,
        generation: u32,
        payload_ok: bool,
    },
}

struct Candidate {
    slot: usize,
    page_index: usize,
    generation: u32,
    payload_ok: bool,
}

impl<T: Platform> Nvm<T> {
    pub(crate) fn load_slots(&mut self) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("load_slots");

        #[cfg(feature = "debug-logs")]
        println!("wear: load_slots");

        let mut candidates: Vec<Candidate> = vec![];
        let mut max_generation: Option<u32> = None;

        for index in 0..self.config.slot_count() {
            let address = self.config.slot_address(index);
            let mut slot = Slot::blank(address);

            match self.load_slot(address)? {
                LoadSlotResult::Blank => {}
                LoadSlotResult::Dirty => slot.state = SlotState::Dirty,
                LoadSlotResult::Stale { generation } => {
                    slot.state = SlotState::Stale;
                    max_generation = max_generation.max(generation);
                }
                LoadSlotResult::Candidate {
                    page_index,
                    generation,
                    payload_ok,
                } => {
                    // demoted below unless it turns out to be the newest copy
                    slot.state = SlotState::Stale;
                    slot.page = Some(self.config.pages()[page_index].id());
                    slot.generation = generation;
                    slot.marker_valid = true;
                    max_generation = max_generation.max(Some(generation));
                    candidates.push(Candidate {
                        slot: index,
                        page_index,
                        generation,
                        payload_ok,
                    });
                }
            }

            self.slots.push(slot);
        }

        self.next_generation = match max_generation {
            Some(generation) => generation.checked_add(1).ok_or(Error::GenerationExhausted)?,
            None => 0,
        };

        let mut newest_slot: Option<(u32, usize)> = None;
        for page_index in 0..self.config.pages().len() {
            let winner = candidates
                .iter()
                .filter(|candidate| candidate.page_index == page_index)
                .max_by_key(|candidate| candidate.generation);

            let Some(winner) = winner else {
                self.pages.push(PageState::Uninitialized);
                continue;
            };

            if !winner.payload_ok {
                #[cfg(feature = "defmt")]
                warn!(
                    "load_slots: newest copy of page {} in slot {} is corrupt",
                    self.config.pages()[page_index].id(),
                    winner.slot
                );
                self.slots[winner.slot].state = SlotState::Corrupt;
                self.pages.push(PageState::Corrupt { slot: winner.slot });
                continue;
            }

            self.slots[winner.slot].state = SlotState::Valid;
            self.pages.push(PageState::Valid {
                slot: winner.slot,
                generation: winner.generation,
            });
            if newest_slot.is_none_or(|(generation, _)| winner.generation > generation) {
                newest_slot = Some((winner.generation, winner.slot));
            }

            // an interrupted write or invalidation left older copies behind
            let duplicates = candidates
                .iter()
                .filter(|candidate| {
                    candidate.page_index == page_index && candidate.slot != winner.slot
                })
                .map(|candidate| candidate.slot)
                .collect::<Vec<_>>();
            for slot in duplicates {
                #[cfg(feature = "defmt")]
                warn!("load_slots: invalidating outdated copy in slot {}", slot);

                #[cfg(feature = "debug-logs")]
                println!("wear: load_slots: invalidating outdated copy in slot {slot}");

                if let Err(_e) = self.invalidate_slot(slot) {
                    #[cfg(feature = "defmt")]
                    warn!("load_slots: failed to invalidate slot {}: {}", slot, _e);

                    // still marked valid on flash, erased before reuse or invalidated with the page
                    self.slots[slot].state = SlotState::Dirty;
                }
            }
        }

        self.cursor = match newest_slot {
            Some((_, slot)) => (slot + 1) % self.slots.len(),
            None => 0,
        };

        Ok(())
    }

    fn load_slot(&mut self, address: usize) -> Result<LoadSlotResult, Error> {
        #[cfg(feature = "defmt")]
        trace!("load_slot: @{:#08x}", address);

        let mut buf = vec![0u8; self.config.page_size()];
        self.read_flash(address, &mut buf)?;

        if buf[..HEADER_SIZE].iter().all(|&it| it == 0xFF) {
            if buf.iter().all(|&it| it == 0xFF) {
                return Ok(LoadSlotResult::Blank);
            }

            // payload was programmed but the header never made it
            #[cfg(feature = "defmt")]
            warn!("load_slot: @{:#08x} torn write", address);

            #[cfg(feature = "debug-logs")]
            println!("  wear: load slot: 0x{address:04X} -> torn write");

            return Ok(LoadSlotResult::Dirty);
        }

        let header = SlotHeader::from_bytes(&buf);

        #[cfg(feature = "debug-logs")]
        println!("  wear: load slot: 0x{address:04X} -> {header:?}");

        let header_ok = header.version == FORMAT_VERSION
            && header.header_crc == header.calculate_crc32(T::crc32);

        match header.marker() {
            SlotMarker::Stale => {
                return Ok(LoadSlotResult::Stale {
                    generation: header_ok.then_some(header.generation),
                });
            }
            SlotMarker::Valid if header_ok => {}
            _ => return Ok(LoadSlotResult::Dirty),
        }

        let page_id = PageId(header.page_id);
        let Ok(page_index) = self.config.page_index(page_id) else {
            #[cfg(feature = "defmt")]
            warn!("load_slot: @{:#08x} holds unknown page {}", address, page_id);
            return Ok(LoadSlotResult::Dirty);
        };

        let descriptor = &self.config.pages()[page_index];
        if PageKind::from_repr(header.kind) != Some(descriptor.kind())
            || header.payload_len as usize != descriptor.payload_len()
        {
            // written with a different page table
            #[cfg(feature = "defmt")]
            warn!("load_slot: @{:#08x} layout of page {} changed", address, page_id);
            return Ok(LoadSlotResult::Dirty);
        }

        let offset = payload_offset::<T>();
        let payload = &buf[offset..offset + descriptor.payload_len()];
        let payload_ok = T::crc32(u32::MAX, payload) == header.payload_crc;

        Ok(LoadSlotResult::Candidate {
            page_index,
            generation: header.generation,
            payload_ok,
        })
    }

    /// Picks the slot for the next copy of a page. Normal pages settle in the lowest free slot,
    /// wear pages walk the ring starting after their current slot.
    fn select_slot(&self, page_index: usize) -> Result<usize, Error> {
        let count = self.slots.len();
        let selected = match self.config.pages()[page_index].kind() {
            PageKind::Normal => (0..count).find(|&index| self.slots[index].is_free()),
            PageKind::Wear => {
                let start = match self.pages[page_index] {
                    PageState::Valid { slot, .. } => slot + 1,
                    _ => self.cursor,
                };
                (0..count)
                    .map(|offset| (start + offset) % count)
                    .find(|&index| self.slots[index].is_free())
            }
        };

        selected.ok_or(Error::NoFreeSlot)
    }

    /// Commits a new copy of the page.
    pub(crate) fn write_page(&mut self, page_index: usize, payload: &[u8]) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("write_page: [{}]", payload.len());

        let descriptor = &self.config.pages()[page_index];
        let (page_id, kind) = (descriptor.id(), descriptor.kind());

        let previous = match self.pages[page_index] {
            PageState::Corrupt { .. } => return Err(Error::Corrupt(page_id)),
            PageState::Valid { slot, .. } => Some(slot),
            PageState::Uninitialized => None,
        };

        let generation = self.next_generation;
        let following = generation
            .checked_add(1)
            .ok_or(Error::GenerationExhausted)?;

        let target = self.select_slot(page_index)?;

        #[cfg(feature = "defmt")]
        debug!(
            "write_page: page {} generation {} -> slot {}",
            page_id, generation, target
        );

        #[cfg(feature = "debug-logs")]
        println!("wear: write_page: page {page_id} generation {generation} -> slot {target}");

        self.prepare_slot(target)?;

        let address = self.slots[target].address;
        let offset = payload_offset::<T>();
        if let Err(e) = write_aligned(&mut self.hal, (address + offset) as _, payload) {
            self.slots[target].state = SlotState::Dirty;
            return Err(e);
        }

        let header = SlotHeader::new(T::crc32, page_id.0, kind, generation, payload);
        if let Err(e) = write_aligned(&mut self.hal, address as _, &header.to_bytes()) {
            self.slots[target].state = SlotState::Dirty;
            return Err(e);
        }

        // committed, the new copy is what a scan would find from now on
        self.next_generation = following;
        let slot = &mut self.slots[target];
        slot.state = SlotState::Valid;
        slot.page = Some(page_id);
        slot.generation = generation;
        slot.marker_valid = true;
        self.pages[page_index] = PageState::Valid {
            slot: target,
            generation,
        };
        self.cursor = (target + 1) % self.slots.len();

        match previous {
            Some(previous) => {
                // no longer current but still marked valid on flash until invalidated
                self.slots[previous].state = SlotState::Dirty;
                self.invalidate_slot(previous)
            }
            None => Ok(()),
        }
    }

    /// Erases the slot unless it is known to be blank.
    fn prepare_slot(&mut self, index: usize) -> Result<(), Error> {
        if self.slots[index].state == SlotState::Blank {
            return Ok(());
        }
        self.erase_slot(index)
    }

    fn erase_slot(&mut self, index: usize) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("erase_slot: {}", index);

        let from = self.slots[index].address;
        let to = from + self.config.page_size();
        if let Err(e) = erase_masked(&mut self.hal, from as _, to as _) {
            // a partially erased slot must not be mistaken for a blank one
            self.slots[index].state = SlotState::Dirty;
            return Err(e);
        }

        let slot = &mut self.slots[index];
        slot.state = SlotState::Blank;
        slot.page = None;
        slot.generation = 0;
        slot.marker_valid = false;
        slot.erase_count += 1;
        Ok(())
    }

    /// Programs the `Stale` marker so a scan no longer considers the slot. On failure the slot
    /// keeps its state, callers demote slots that are no longer current beforehand.
    fn invalidate_slot(&mut self, index: usize) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("invalidate_slot: {}", index);

        let address = self.slots[index].address;
        write_marker(&mut self.hal, address, SlotMarker::Stale)?;

        let slot = &mut self.slots[index];
        slot.state = SlotState::Stale;
        slot.marker_valid = false;
        Ok(())
    }

    /// Invalidates every copy of the page, the current one last.
    pub(crate) fn invalidate_page(&mut self, page_index: usize) -> Result<(), Error> {
        let page_id = self.config.pages()[page_index].id();
        let current = match self.pages[page_index] {
            PageState::Valid { slot, .. } | PageState::Corrupt { slot } => Some(slot),
            PageState::Uninitialized => None,
        };

        let outdated = (0..self.slots.len())
            .filter(|&index| Some(index) != current)
            .filter(|&index| {
                let slot = &self.slots[index];
                slot.marker_valid && slot.page == Some(page_id)
            })
            .collect::<Vec<_>>();
        for index in outdated {
            self.invalidate_slot(index)?;
        }

        if let Some(current) = current {
            self.invalidate_slot(current)?;
            self.pages[page_index] = PageState::Uninitialized;
        }

        Ok(())
    }

    pub(crate) fn erase_all_slots(&mut self) -> Result<(), Error> {
        for index in 0..self.slots.len() {
            let owner = self.pages.iter().position(|state| match state {
                PageState::Valid { slot, .. } | PageState::Corrupt { slot } => *slot == index,
                PageState::Uninitialized => false,
            });

            let result = self.erase_slot(index);

            // even a failed erase may have wiped parts of the copy
            if let Some(page_index) = owner {
                self.pages[page_index] = PageState::Uninitialized;
            }
            result?;
        }

        Ok(())
    }
}
