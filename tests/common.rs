#![allow(dead_code)]

// filename according to https://doc.rust-lang.org/book/ch11-03-test-organization.html
use embedded_storage::nor_flash::{
    ErrorType, NorFlash, NorFlashError, NorFlashErrorKind, ReadNorFlash,
};
use nvm_wear::platform::{Crc, FlashFault, Platform};
use nvm_wear::{Config, ObjectId, PageDescriptor, PageId};

// EFM32 Gecko flash page
pub const FLASH_PAGE_SIZE: usize = 512;
pub const WORD_SIZE: usize = 4;
pub const SLOT_HEADER_SIZE: usize = 24;

pub const COUNTER_ID: ObjectId = ObjectId(0);
pub const SETTINGS_ID: ObjectId = ObjectId(1);
pub const CALIBRATION_ID: ObjectId = ObjectId(2);

pub const PAGE_NORMAL: PageId = PageId(0);
pub const PAGE_WEAR: PageId = PageId(1);

/// One normal and one wear page holding a 2 byte counter each, 3 scratch slots.
pub fn counter_config() -> Config {
    Config::builder()
        .region(0, FLASH_PAGE_SIZE)
        .scratch_pages(3)
        .page(PageDescriptor::normal(PAGE_NORMAL).object(COUNTER_ID, 2))
        .page(PageDescriptor::wear(PAGE_WEAR).object(COUNTER_ID, 2))
        .build()
        .unwrap()
}

/// A normal page with objects of every typed width, and a wear page.
pub fn mixed_config() -> Config {
    Config::builder()
        .region(0, FLASH_PAGE_SIZE)
        .scratch_pages(2)
        .page(
            PageDescriptor::normal(PAGE_NORMAL)
                .object(ObjectId(0), 1)
                .object(ObjectId(1), 2)
                .object(ObjectId(2), 4)
                .object(ObjectId(3), 8)
                .object(ObjectId(4), 3),
        )
        .page(
            PageDescriptor::wear(PAGE_WEAR)
                .object(COUNTER_ID, 4)
                .object(SETTINGS_ID, 1)
                .object(CALIBRATION_ID, 6),
        )
        .build()
        .unwrap()
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub enum Fault {
    #[default]
    Other,
    Locked,
    Timeout,
}

#[derive(Default)]
pub struct Flash {
    pub buf: Vec<u8>,
    pub fail_after_operation: usize,
    /// The failing program or erase still changes the first half of its range, like a power loss
    /// in the middle of the operation would.
    pub torn: bool,
    pub fault: Fault,
    /// Only the operation at `fail_after_operation` fails, the following ones succeed again.
    pub single_fault: bool,
    pub operations: Vec<Operation>,
}

#[derive(Debug, PartialEq, Clone)]
pub enum Operation {
    Read { offset: u32, len: usize },
    Write { offset: u32, len: usize },
    Erase { offset: u32, len: usize },
}

impl Flash {
    pub fn new(pages: usize) -> Self {
        Self {
            buf: vec![0xffu8; FLASH_PAGE_SIZE * pages],
            fail_after_operation: usize::MAX,
            ..Default::default()
        }
    }

    pub fn new_with_fault(pages: usize, fail_after_operation: usize) -> Self {
        Self {
            buf: vec![0xffu8; FLASH_PAGE_SIZE * pages],
            fail_after_operation,
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Fails the next operation and every one after it.
    pub fn fail_next(&mut self, fault: Fault) {
        self.fault = fault;
        self.fail_after_operation = self.operations.len();
    }

    pub fn disable_faults(&mut self) {
        self.fail_after_operation = usize::MAX;
        self.torn = false;
        self.fault = Fault::Other;
        self.single_fault = false;
    }

    pub fn erases(&self) -> usize {
        self.operations
            .iter()
            .filter(|op| matches!(op, Operation::Erase { .. }))
            .count()
    }

    pub fn writes(&self) -> usize {
        self.operations
            .iter()
            .filter(|op| matches!(op, Operation::Write { .. }))
            .count()
    }

    /// Erases of the physical page starting at `offset`.
    pub fn erases_at(&self, offset: usize) -> usize {
        self.operations
            .iter()
            .filter(|op| matches!(op, Operation::Erase { offset: o, .. } if *o as usize == offset))
            .count()
    }

    pub fn dump_operations(&self) {
        println!("Operations:");
        for op in &self.operations {
            println!("  {:?}", op);
        }
    }

    fn faulted(&mut self) -> bool {
        let faulted = self.operations.len() >= self.fail_after_operation;
        if faulted && self.single_fault {
            self.fail_after_operation = usize::MAX;
        }
        faulted
    }
}

#[derive(Debug)]
pub struct FlashError(pub Fault);

impl NorFlashError for FlashError {
    fn kind(&self) -> NorFlashErrorKind {
        NorFlashErrorKind::Other
    }
}

impl ErrorType for Flash {
    type Error = FlashError;
}

impl ReadNorFlash for Flash {
    const READ_SIZE: usize = WORD_SIZE;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        assert!(offset.is_multiple_of(Self::READ_SIZE as _));

        println!(
            "    flash: read:  0x{offset:04X}[0x{:04X}] #{:>2}",
            bytes.len(),
            self.operations.len()
        );
        if self.faulted() {
            println!("    flash: FAULT");
            return Err(FlashError(self.fault));
        }
        self.operations.push(Operation::Read {
            offset,
            len: bytes.len(),
        });

        let offset = offset as usize;
        bytes.copy_from_slice(&self.buf[offset..offset + bytes.len()]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.buf.len()
    }
}

impl NorFlash for Flash {
    const WRITE_SIZE: usize = WORD_SIZE;

    const ERASE_SIZE: usize = FLASH_PAGE_SIZE;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        assert!(from.is_multiple_of(Self::ERASE_SIZE as _));
        assert!(to.is_multiple_of(Self::ERASE_SIZE as _));
        assert!(to > from);

        println!(
            "    flash: erase: {from:04X} - {to:04X} #{:>2}",
            self.operations.len()
        );

        if self.faulted() {
            println!("    flash: FAULT");
            if self.torn {
                let half = from + (to - from) / 2;
                for addr in from..half {
                    self.buf[addr as usize] = 0xff;
                }
            }
            return Err(FlashError(self.fault));
        }

        self.operations.push(Operation::Erase {
            offset: from,
            len: (to - from) as usize,
        });

        for addr in from..to {
            self.buf[addr as usize] = 0xff;
        }
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        assert!(offset.is_multiple_of(Self::WRITE_SIZE as _));
        assert!(bytes.len().is_multiple_of(Self::WRITE_SIZE as _));
        assert!(!bytes.is_empty());

        println!(
            "    flash: write: 0x{offset:04X}[0x{:04X}] #{:>2}",
            bytes.len(),
            self.operations.len()
        );

        let programmed = if self.faulted() {
            println!("    flash: FAULT");
            if !self.torn {
                return Err(FlashError(self.fault));
            }
            &bytes[..bytes.len() / 2]
        } else {
            self.operations.push(Operation::Write {
                offset,
                len: bytes.len(),
            });
            bytes
        };

        let offset = offset as usize;
        for (i, &val) in programmed.iter().enumerate() {
            // NOR flash can only flip bits from 1 to 0
            self.buf[offset + i] &= val;
        }

        if programmed.len() < bytes.len() {
            return Err(FlashError(self.fault));
        }
        Ok(())
    }
}

impl Crc for Flash {
    fn crc32(init: u32, data: &[u8]) -> u32 {
        unsafe { libz_sys::crc32(init as u64, data.as_ptr(), data.len() as u32) as u32 }
    }
}

impl Platform for Flash {
    fn classify(error: &FlashError) -> FlashFault {
        match error.0 {
            Fault::Other => FlashFault::Other,
            Fault::Locked => FlashFault::Locked,
            Fault::Timeout => FlashFault::Timeout,
        }
    }
}
