/*
 * Architecture boundary
 *
 * The only operation in this crate that is inherently target-specific is
 * the prepared-stack context switch: building an initial frame for a new
 * thread and transferring control between two stack pointers. Everything
 * else (heap, timer wheel, wait queues, scheduler bookkeeping, bus state
 * machines) is target-independent and implemented once.
 *
 * Each target supplies an `ArchContext` implementation. `avr` is the real
 * AVR ATmega backend; `hosted` backs `#[cfg(test)]` builds so the pure
 * bookkeeping can be exercised on the host without real register save and
 * restore.
 */

#[cfg(target_arch = "avr")]
mod avr;
#[cfg(target_arch = "avr")]
pub use avr::Avr as Target;

#[cfg(not(target_arch = "avr"))]
mod hosted;
#[cfg(not(target_arch = "avr"))]
pub use hosted::Hosted as Target;

/// The architecture-specific half of thread creation and context switching.
///
/// # Safety
/// Implementations manipulate raw stack pointers and, on real hardware,
/// interrupt-enable state. Callers must ensure `stack` outlives the thread
/// and that `prev_sp_slot`/`next_sp` refer to stacks prepared by
/// `prepare_initial_frame` or previously suspended by `context_switch`.
pub trait ArchContext {
    /// Build an initial stack frame inside `stack` such that resuming it
    /// transfers control to `entry` with `arg` in the architecturally
    /// defined first-argument location, interrupts enabled, and general
    /// registers zeroed. Returns the saved stack pointer to record on the
    /// new thread.
    unsafe fn prepare_initial_frame(stack: &mut [u8], entry: usize, arg: usize) -> *mut u8;

    /// Save the currently running context's stack pointer through
    /// `prev_sp_slot`, then resume execution at `next_sp`. Returns once
    /// some other call to `context_switch` resumes the thread that called
    /// this one.
    unsafe fn context_switch(prev_sp_slot: *mut *mut u8, next_sp: *mut u8);

    /// Run `f` with interrupts disabled, restoring the prior interrupt
    /// enable state on return. The single critical-section primitive used
    /// throughout the crate for ready-queue, wait-queue and tick-counter
    /// manipulation.
    fn without_interrupts<R>(f: impl FnOnce() -> R) -> R;
}

/// Run `f` with interrupts disabled on the active target.
pub fn without_interrupts<R>(f: impl FnOnce() -> R) -> R {
    Target::without_interrupts(f)
}
