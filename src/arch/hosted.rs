/*
 * Hosted architecture backend
 *
 * Used only for `#[cfg(test)]` builds on the host. There is no real
 * multi-stack execution here: `context_switch` just records the new
 * current stack pointer. This is enough to unit-test the scheduler's
 * bookkeeping (ready-queue ordering, state transitions, wait-queue
 * splicing) without needing a second real execution context, since tests
 * drive the scheduler's pure decision logic directly rather than actually
 * resuming thread bodies.
 */

use core::sync::atomic::{AtomicBool, Ordering};

pub struct Hosted;

static IRQ_DISABLED: AtomicBool = AtomicBool::new(false);

impl super::ArchContext for Hosted {
    unsafe fn prepare_initial_frame(stack: &mut [u8], _entry: usize, _arg: usize) -> *mut u8 {
        stack.as_mut_ptr().add(stack.len())
    }

    unsafe fn context_switch(prev_sp_slot: *mut *mut u8, next_sp: *mut u8) {
        // No real stack to switch to on the host test backend; just record
        // bookkeeping so callers that inspect saved SPs see a consistent
        // value.
        *prev_sp_slot = next_sp;
    }

    fn without_interrupts<R>(f: impl FnOnce() -> R) -> R {
        let was_disabled = IRQ_DISABLED.swap(true, Ordering::SeqCst);
        let r = f();
        if !was_disabled {
            IRQ_DISABLED.store(false, Ordering::SeqCst);
        }
        r
    }
}
