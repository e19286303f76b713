//! The `Get<T>` trait and its implementation in this module allows providing a single generic,
//! overloaded function `get<T>()` for all supported types of the driver.

use crate::error::Error;
use crate::platform::Platform;
use crate::{Nvm, ObjectId, PageId};
use alloc::vec::Vec;

pub trait Get<T> {
    fn get(&mut self, page: PageId, object: ObjectId) -> Result<T, Error>;
}

impl<T, G: Get<T>> Get<T> for &mut G {
    fn get(&mut self, page: PageId, object: ObjectId) -> Result<T, Error> {
        (*self).get(page, object)
    }
}

impl<T: Platform> Nvm<T> {
    fn get_array<const N: usize>(
        &mut self,
        page: PageId,
        object: ObjectId,
    ) -> Result<[u8; N], Error> {
        let mut buf = [0u8; N];
        self.read_into(page, object, &mut buf)?;
        Ok(buf)
    }
}

impl<T: Platform> Get<bool> for Nvm<T> {
    fn get(&mut self, page: PageId, object: ObjectId) -> Result<bool, Error> {
        let value = self.get_array::<1>(page, object)?;
        Ok(value[0] != 0)
    }
}

impl<T: Platform> Get<u8> for Nvm<T> {
    fn get(&mut self, page: PageId, object: ObjectId) -> Result<u8, Error> {
        let value = self.get_array(page, object)?;
        Ok(u8::from_le_bytes(value))
    }
}

impl<T: Platform> Get<u16> for Nvm<T> {
    fn get(&mut self, page: PageId, object: ObjectId) -> Result<u16, Error> {
        let value = self.get_array(page, object)?;
        Ok(u16::from_le_bytes(value))
    }
}

impl<T: Platform> Get<u32> for Nvm<T> {
    fn get(&mut self, page: PageId, object: ObjectId) -> Result<u32, Error> {
        let value = self.get_array(page, object)?;
        Ok(u32::from_le_bytes(value))
    }
}

impl<T: Platform> Get<u64> for Nvm<T> {
    fn get(&mut self, page: PageId, object: ObjectId) -> Result<u64, Error> {
        let value = self.get_array(page, object)?;
        Ok(u64::from_le_bytes(value))
    }
}

impl<T: Platform> Get<i8> for Nvm<T> {
    fn get(&mut self, page: PageId, object: ObjectId) -> Result<i8, Error> {
        let value = self.get_array(page, object)?;
        Ok(i8::from_le_bytes(value))
    }
}

impl<T: Platform> Get<i16> for Nvm<T> {
    fn get(&mut self, page: PageId, object: ObjectId) -> Result<i16, Error> {
        let value = self.get_array(page, object)?;
        Ok(i16::from_le_bytes(value))
    }
}

impl<T: Platform> Get<i32> for Nvm<T> {
    fn get(&mut self, page: PageId, object: ObjectId) -> Result<i32, Error> {
        let value = self.get_array(page, object)?;
        Ok(i32::from_le_bytes(value))
    }
}

impl<T: Platform> Get<i64> for Nvm<T> {
    fn get(&mut self, page: PageId, object: ObjectId) -> Result<i64, Error> {
        let value = self.get_array(page, object)?;
        Ok(i64::from_le_bytes(value))
    }
}

impl<T: Platform> Get<Vec<u8>> for Nvm<T> {
    fn get(&mut self, page: PageId, object: ObjectId) -> Result<Vec<u8>, Error> {
        self.read(page, object)
    }
}
