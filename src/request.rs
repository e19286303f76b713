//! Hand-off of flash work from interrupt handlers to the main context.
//!
//! Programming and erasing flash blocks for milliseconds, which is too long for an interrupt
//! handler. Handlers [`RequestQueue::post`] a [`Request`] instead and the main loop executes them
//! with [`Nvm::drain`]:
//!
//! ```ignore
//! static REQUESTS: RequestQueue<4> = RequestQueue::new();
//!
//! #[interrupt]
//! fn GPIO_EVEN() {
//!     let _ = REQUESTS.post(Request::store(PAGE_WEAR, COUNTER_ID, &counter.to_le_bytes()).unwrap());
//! }
//!
//! loop {
//!     nvm.drain(&REQUESTS)?;
//!     wait_for_interrupt();
//! }
//! ```

use crate::error::Error;
use crate::platform::Platform;
use crate::{Nvm, ObjectId, PageId};
use core::cell::RefCell;
use critical_section::Mutex;
use heapless::Deque;
#[cfg(feature = "defmt")]
use defmt::{debug, trace};

/// Largest object value a [`Request::Store`] can carry.
pub const MAX_INLINE_VALUE: usize = 8;

#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// Write one object, see [`Nvm::write`]
    Store {
        page: PageId,
        object: ObjectId,
        value: heapless::Vec<u8, MAX_INLINE_VALUE>,
    },
    /// Commit the page image, see [`Nvm::write_all`] with no values
    StoreAll { page: PageId },
    /// See [`Nvm::erase`]
    Erase { page: PageId },
    /// See [`Nvm::erase_all`]
    EraseAll,
}

impl Request {
    /// Returns `None` if the value is longer than [`MAX_INLINE_VALUE`].
    pub fn store(page: PageId, object: ObjectId, value: &[u8]) -> Option<Self> {
        let value = heapless::Vec::from_slice(value).ok()?;
        Some(Request::Store {
            page,
            object,
            value,
        })
    }
}

/// Fixed capacity queue that can be shared between interrupt handlers and the main context.
pub struct RequestQueue<const N: usize> {
    inner: Mutex<RefCell<Deque<Request, N>>>,
}

impl<const N: usize> RequestQueue<N> {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(Deque::new())),
        }
    }

    /// Enqueues the request. Returns it back if the queue is full.
    pub fn post(&self, request: Request) -> Result<(), Request> {
        critical_section::with(|cs| self.inner.borrow(cs).borrow_mut().push_back(request))
    }

    pub fn pop(&self) -> Option<Request> {
        critical_section::with(|cs| self.inner.borrow(cs).borrow_mut().pop_front())
    }

    pub fn len(&self) -> usize {
        critical_section::with(|cs| self.inner.borrow(cs).borrow().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<const N: usize> Default for RequestQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Platform> Nvm<T> {
    /// Executes queued requests in order until the queue is empty. The queue is only locked while
    /// taking a request out, the flash work runs with interrupts enabled apart from the individual
    /// program and erase calls.
    ///
    /// Stops at the first failing request and returns its error. That request is consumed, the
    /// remaining ones stay queued. Returns the number of executed requests otherwise.
    pub fn drain<const N: usize>(&mut self, queue: &RequestQueue<N>) -> Result<usize, Error> {
        #[cfg(feature = "defmt")]
        trace!("drain");

        let mut executed = 0;
        while let Some(request) = queue.pop() {
            self.execute(request)?;
            executed += 1;
        }

        #[cfg(feature = "defmt")]
        debug!("drain: executed {} requests", executed);

        Ok(executed)
    }

    pub fn execute(&mut self, request: Request) -> Result<(), Error> {
        match request {
            Request::Store {
                page,
                object,
                value,
            } => self.write(page, object, &value),
            Request::StoreAll { page } => self.write_all(page, &[]),
            Request::Erase { page } => self.erase(page),
            Request::EraseAll => self.erase_all(),
        }
    }
}
