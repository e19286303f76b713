use crate::error::Error;
use crate::platform::Platform;
use crate::{Nvm, ObjectId, PageId};

pub trait Set<T> {
    fn set(&mut self, page: PageId, object: ObjectId, value: T) -> Result<(), Error>;
}

impl<T, S: Set<T>> Set<T> for &mut S {
    fn set(&mut self, page: PageId, object: ObjectId, value: T) -> Result<(), Error> {
        (*self).set(page, object, value)
    }
}

impl<T: Platform> Set<bool> for Nvm<T> {
    fn set(&mut self, page: PageId, object: ObjectId, value: bool) -> Result<(), Error> {
        self.write(page, object, &[value as u8])
    }
}

impl<T: Platform> Set<u8> for Nvm<T> {
    fn set(&mut self, page: PageId, object: ObjectId, value: u8) -> Result<(), Error> {
        self.write(page, object, &value.to_le_bytes())
    }
}

impl<T: Platform> Set<u16> for Nvm<T> {
    fn set(&mut self, page: PageId, object: ObjectId, value: u16) -> Result<(), Error> {
        self.write(page, object, &value.to_le_bytes())
    }
}

impl<T: Platform> Set<u32> for Nvm<T> {
    fn set(&mut self, page: PageId, object: ObjectId, value: u32) -> Result<(), Error> {
        self.write(page, object, &value.to_le_bytes())
    }
}

impl<T: Platform> Set<u64> for Nvm<T> {
    fn set(&mut self, page: PageId, object: ObjectId, value: u64) -> Result<(), Error> {
        self.write(page, object, &value.to_le_bytes())
    }
}

impl<T: Platform> Set<i8> for Nvm<T> {
    fn set(&mut self, page: PageId, object: ObjectId, value: i8) -> Result<(), Error> {
        self.write(page, object, &value.to_le_bytes())
    }
}

impl<T: Platform> Set<i16> for Nvm<T> {
    fn set(&mut self, page: PageId, object: ObjectId, value: i16) -> Result<(), Error> {
        self.write(page, object, &value.to_le_bytes())
    }
}

impl<T: Platform> Set<i32> for Nvm<T> {
    fn set(&mut self, page: PageId, object: ObjectId, value: i32) -> Result<(), Error> {
        self.write(page, object, &value.to_le_bytes())
    }
}

impl<T: Platform> Set<i64> for Nvm<T> {
    fn set(&mut self, page: PageId, object: ObjectId, value: i64) -> Result<(), Error> {
        self.write(page, object, &value.to_le_bytes())
    }
}

impl<T: Platform> Set<&[u8]> for Nvm<T> {
    fn set(&mut self, page: PageId, object: ObjectId, value: &[u8]) -> Result<(), Error> {
        self.write(page, object, value)
    }
}
