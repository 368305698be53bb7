//! The event primitive and the mutex built directly on top of it.

pub mod wait_queue;

pub use wait_queue::WaitQueue;

use crate::error::{BermudaError, BermudaResult};

/// A lock built directly on [`WaitQueue`], the way the device table's
/// per-device lock is specified: "acquire" is `wait` on an
/// already-signaled queue, "release" is `signal`.
pub struct Mutex {
    queue: WaitQueue,
}

impl Mutex {
    pub const fn new() -> Self {
        Mutex {
            queue: WaitQueue::new_signaled(),
        }
    }

    pub fn acquire(&self, timeout_ticks: u32) -> BermudaResult<()> {
        match self.queue.wait(timeout_ticks) {
            crate::error::WaitResult::Ok => Ok(()),
            crate::error::WaitResult::Timeout => Err(BermudaError::Timeout),
        }
    }

    pub fn release(&self) {
        self.queue.signal();
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}
