//! The page table: which logical pages exist, which objects they hold and where the reserved flash
//! region is. Built once at startup and immutable afterwards.
//!
//! ```ignore
//! const COUNTER_ID: ObjectId = ObjectId(0);
//! const PAGE_NORMAL: PageId = PageId(0);
//! const PAGE_WEAR: PageId = PageId(1);
//!
//! let config = Config::builder()
//!     .region(0x1f000, 512)
//!     .scratch_pages(3)
//!     .page(PageDescriptor::normal(PAGE_NORMAL).object(COUNTER_ID, 2))
//!     .page(PageDescriptor::wear(PAGE_WEAR).object(COUNTER_ID, 2))
//!     .build()?;
//! ```

use crate::error::{ConfigError, Error};
use crate::{ObjectId, PageId};
use alloc::vec::Vec;

/// How a page is placed on flash.
#[derive(strum::FromRepr, strum::Display, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum PageKind {
    /// Rarely changing data. Stays in the lowest free slot.
    Normal = 0x01,
    /// Frequently changing data. Every write moves to the next slot of the ring.
    Wear = 0x02,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ObjectDescriptor {
    pub id: ObjectId,
    pub size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageDescriptor {
    id: PageId,
    kind: PageKind,
    objects: Vec<ObjectDescriptor>,
}

impl PageDescriptor {
    pub fn new(id: PageId, kind: PageKind) -> Self {
        Self {
            id,
            kind,
            objects: Vec::new(),
        }
    }

    pub fn normal(id: PageId) -> Self {
        Self::new(id, PageKind::Normal)
    }

    pub fn wear(id: PageId) -> Self {
        Self::new(id, PageKind::Wear)
    }

    /// Appends an object. Objects are packed in the order they are added.
    pub fn object(mut self, id: ObjectId, size: usize) -> Self {
        self.objects.push(ObjectDescriptor { id, size });
        self
    }

    pub fn id(&self) -> PageId {
        self.id
    }

    pub fn kind(&self) -> PageKind {
        self.kind
    }

    pub fn objects(&self) -> &[ObjectDescriptor] {
        &self.objects
    }

    /// Size of all objects packed back to back.
    pub fn payload_len(&self) -> usize {
        self.objects.iter().map(|object| object.size).sum()
    }

    /// Returns `(offset, size)` of the object within the payload.
    pub(crate) fn locate(&self, object: ObjectId) -> Option<(usize, usize)> {
        let mut offset = 0;
        for descriptor in &self.objects {
            if descriptor.id == object {
                return Some((offset, descriptor.size));
            }
            offset += descriptor.size;
        }
        None
    }
}

/// Immutable engine configuration, see [`Config::builder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    base_address: usize,
    page_size: usize,
    scratch_pages: usize,
    pages: Vec<PageDescriptor>,
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    pub fn base_address(&self) -> usize {
        self.base_address
    }

    /// Size of one physical slot in bytes.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn scratch_pages(&self) -> usize {
        self.scratch_pages
    }

    pub fn pages(&self) -> &[PageDescriptor] {
        &self.pages
    }

    /// User pages plus scratch pages.
    pub fn slot_count(&self) -> usize {
        self.pages.len() + self.scratch_pages
    }

    /// Total number of reserved bytes, `None` if it doesn't fit into `usize`.
    pub fn region_size(&self) -> Option<usize> {
        self.slot_count().checked_mul(self.page_size)
    }

    pub(crate) fn slot_address(&self, index: usize) -> usize {
        self.base_address + index * self.page_size
    }

    pub(crate) fn page_index(&self, id: PageId) -> Result<usize, Error> {
        self.pages
            .iter()
            .position(|page| page.id == id)
            .ok_or(Error::UnknownPage(id))
    }
}

#[derive(Default)]
pub struct ConfigBuilder {
    region: Option<(usize, usize)>,
    scratch_pages: usize,
    pages: Vec<PageDescriptor>,
}

impl ConfigBuilder {
    /// Reserved flash region: base address and physical slot size. The region has to hold
    /// `pages + scratch_pages` slots.
    pub fn region(mut self, base_address: usize, page_size: usize) -> Self {
        self.region = Some((base_address, page_size));
        self
    }

    /// Extra slots for copy-on-write and wear leveling. Minimum 1, but the more you add the longer
    /// the flash lives.
    pub fn scratch_pages(mut self, count: usize) -> Self {
        self.scratch_pages = count;
        self
    }

    pub fn page(mut self, page: PageDescriptor) -> Self {
        self.pages.push(page);
        self
    }

    pub fn build(self) -> Result<Config, Error> {
        let (base_address, page_size) = self.region.ok_or(ConfigError::MissingRegion)?;

        if self.pages.is_empty() {
            return Err(ConfigError::NoPages.into());
        }
        if self.scratch_pages == 0 {
            return Err(ConfigError::NoScratchPages.into());
        }

        for (index, page) in self.pages.iter().enumerate() {
            if self.pages[..index].iter().any(|other| other.id == page.id) {
                return Err(ConfigError::DuplicatePage(page.id).into());
            }
            if page.objects.is_empty() {
                return Err(ConfigError::EmptyPage(page.id).into());
            }
            for (object_index, object) in page.objects.iter().enumerate() {
                if object.size == 0 {
                    return Err(ConfigError::ZeroSizedObject(page.id, object.id).into());
                }
                if page.objects[..object_index]
                    .iter()
                    .any(|other| other.id == object.id)
                {
                    return Err(ConfigError::DuplicateObject(page.id, object.id).into());
                }
            }
            if page.payload_len() > u16::MAX as usize {
                return Err(ConfigError::PayloadTooLarge(page.id).into());
            }
        }

        Ok(Config {
            base_address,
            page_size,
            scratch_pages: self.scratch_pages,
            pages: self.pages,
        })
    }
}
