//! Binary entry point. Board bring-up (clock setup, pin muxing, the
//! hardware timer ISR, bus adapter construction) is the external
//! collaborator's job per the crate's scope boundary; this just carries
//! the reset vector down to `bermuda_os::init` with a placeholder
//! configuration and then falls into the scheduler.

#![no_std]
#![no_main]

use bermuda_os::BermudaConfig;

/// Scratch heap region. A real board picks this from its linker script
/// (typically everything between `.bss`'s end and the stack); this
/// placeholder exists so the binary links standalone.
const HEAP_SIZE: usize = 2048;
static mut HEAP_REGION: [u8; HEAP_SIZE] = [0u8; HEAP_SIZE];

#[no_mangle]
pub extern "C" fn main() -> ! {
    let config = BermudaConfig {
        heap_base: core::ptr::addr_of_mut!(HEAP_REGION) as *mut u8,
        heap_size: HEAP_SIZE,
        tick_hz: 1000,
        idle_stack_size: 128,
    };

    unsafe {
        bermuda_os::init(config);
    }

    loop {
        bermuda_os::sched::yield_now();
    }
}

// The panic handler is defined in the `bermuda_os` library crate; a
// `no_std` binary may only link one `#[panic_handler]`, and that crate
// already provides it.
