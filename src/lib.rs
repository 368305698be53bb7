//! BermudaOS core: a cooperative scheduler, wait-queue event primitive,
//! virtual timer wheel, first-fit heap, and the I2C/SPI bus engines that
//! ride on top of them, for 8-bit AVR microcontrollers.
//!
//! `no_std`, with `alloc` for the handful of things that genuinely need
//! heap allocation (thread stacks, boxed device drivers). Board support
//! packages (pin mappings, real TWI/SPI register pokes, the hardware
//! timer ISR) are external collaborators that call into this crate's
//! modules directly; none of that board-specific glue lives here.

#![no_std]

extern crate alloc;

pub mod arch;
pub mod bus;
pub mod device;
pub mod error;
pub mod heap;
pub mod logging;
pub mod sched;
pub mod sync;
pub mod tick;
pub mod timer;

pub use error::{BermudaError, BermudaResult, WaitResult};

use heap::Heap;

#[global_allocator]
static HEAP: Heap = Heap::empty();

/// Everything `init` needs that varies per board: where the heap region
/// lives, how fast the hardware tick fires, and how big the idle thread's
/// stack should be. No file or environment-based configuration — there is
/// no filesystem and no host environment on this target.
pub struct BermudaConfig {
    /// Start of the memory region handed to the heap allocator.
    pub heap_base: *mut u8,
    /// Size in bytes of the heap region.
    pub heap_size: usize,
    /// Hardware timer interrupt frequency, used to convert the timer
    /// wheel's millisecond-based API to ticks.
    pub tick_hz: u32,
    /// Stack size in bytes for the idle thread.
    pub idle_stack_size: usize,
}

/// Bring up the core in dependency order: heap, tick counter, timer
/// wheel, scheduler (which spawns the idle thread), then the device
/// table. Board code runs after this returns to construct and register
/// its I2C/SPI adapters and any other devices.
///
/// # Safety
/// `config.heap_base` must point to `config.heap_size` bytes owned
/// exclusively by the heap for the remainder of the program, and `init`
/// must be called exactly once, before any other module in this crate is
/// used.
pub unsafe fn init(config: BermudaConfig) {
    HEAP.init(config.heap_base, config.heap_size);
    tick::init();
    timer::init();
    device::init();

    let idle = sched::spawn_idle(config.idle_stack_size);
    if idle.is_none() {
        log::error!("failed to create the idle thread");
    }

    log::info!(
        "bermuda_os initialized: heap={} bytes, tick_hz={}",
        config.heap_size,
        config.tick_hz
    );
}

/// Convert a millisecond duration to ticks at the configured tick
/// frequency, grounded in `BermudaTimerMillisToTicks`. Rounds up so a
/// requested timeout never fires early.
pub fn ms_to_ticks(ms: u32, tick_hz: u32) -> u32 {
    if tick_hz == 0 {
        return ms;
    }
    ((ms as u64 * tick_hz as u64 + 999) / 1000) as u32
}

#[cfg(not(test))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    log::error!("panic: {}", info);
    loop {
        arch::without_interrupts(|| {});
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ms_to_ticks_rounds_up_at_common_rates() {
        assert_eq!(ms_to_ticks(10, 1000), 10);
        assert_eq!(ms_to_ticks(1, 1000), 1);
        assert_eq!(ms_to_ticks(1, 100), 1);
        assert_eq!(ms_to_ticks(5, 100), 1);
    }
}
