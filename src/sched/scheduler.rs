/*
 * Cooperative priority scheduler
 *
 * One ready queue, priority-ordered, FIFO within a level. Every
 * suspension point (`yield_now`, `sleep`, the wait-queue primitive,
 * thread exit) re-queues or removes the outgoing thread itself and then
 * calls `schedule`, which only ever does two things: reap threads killed
 * on a previous pass, then hand the CPU to the ready queue's head.
 *
 * `schedule` briefly takes the scheduler lock to pick the next thread and
 * read/write the two stack-pointer slots involved, then drops the lock
 * before calling into `ArchContext::context_switch`. Holding the lock
 * across the switch would "hold" it for however long the resumed thread
 * runs before yielding back, starving every other thread that needs the
 * scheduler in between — correct only because this is a single-core,
 * interrupts-disabled cooperative switch: nothing else observes the
 * scheduler state between the unlock and the switch.
 */

use super::ready_queue::Slots;
use super::thread::{Priority, Tcb, ThreadEntry, ThreadId, ThreadState, MAX_THREADS};
use crate::arch::{self, without_interrupts, ArchContext, Target};
use alloc::boxed::Box;
use spin::Mutex;

/// Scratch slot `schedule` points `context_switch` at when there is no
/// previous thread to save (the very first dispatch, into the idle
/// thread). Both arch backends write the outgoing SP through
/// `prev_sp_slot` unconditionally, so this must be real, writable memory
/// rather than null; nothing ever reads it back.
static mut BOOT_SP_SINK: *mut u8 = core::ptr::null_mut();

struct Scheduler {
    slots: [Option<Tcb>; MAX_THREADS],
    ready_head: Option<ThreadId>,
    kill_head: Option<ThreadId>,
    current: Option<ThreadId>,
}

impl Scheduler {
    const fn new() -> Self {
        Scheduler {
            slots: [None; MAX_THREADS],
            ready_head: None,
            kill_head: None,
            current: None,
        }
    }

    fn free_slot(&self) -> Option<ThreadId> {
        self.slots
            .iter()
            .position(|s| s.is_none())
            .map(|i| ThreadId(i as u8))
    }

    fn tcb(&self, id: ThreadId) -> &Tcb {
        self.slots[id.0 as usize].as_ref().expect("dangling ThreadId")
    }

    fn tcb_mut(&mut self, id: ThreadId) -> &mut Tcb {
        self.slots[id.0 as usize].as_mut().expect("dangling ThreadId")
    }

    fn slots_view(&mut self) -> Slots<'_> {
        Slots {
            slots: &mut self.slots,
        }
    }

    fn ready_insert(&mut self, id: ThreadId) {
        let mut head = self.ready_head;
        self.slots_view().insert(&mut head, id);
        self.ready_head = head;
    }

    fn ready_remove(&mut self, id: ThreadId) -> bool {
        let mut head = self.ready_head;
        let found = self.slots_view().remove(&mut head, id);
        self.ready_head = head;
        found
    }

    fn ready_pop(&mut self) -> Option<ThreadId> {
        let mut head = self.ready_head;
        let popped = self.slots_view().pop_front(&mut head);
        self.ready_head = head;
        popped
    }

    fn kill_push(&mut self, id: ThreadId) {
        let mut head = self.kill_head;
        self.slots_view().insert(&mut head, id);
        self.kill_head = head;
    }

    fn reap_killed(&mut self) {
        while let Some(id) = {
            let mut head = self.kill_head;
            let popped = self.slots_view().pop_front(&mut head);
            self.kill_head = head;
            popped
        } {
            log::debug!("reaping thread {}", id.0);
            self.slots[id.0 as usize] = None;
        }
    }
}

unsafe impl Send for Scheduler {}

static SCHED: Mutex<Scheduler> = Mutex::new(Scheduler::new());

/// Create a thread. The first call in a process's lifetime must create
/// the idle thread (lowest priority, never exits); subsequent calls
/// create ordinary threads.
pub fn thread_create(
    name: &'static str,
    priority: Priority,
    stack_size: usize,
    entry: ThreadEntry,
    arg: usize,
) -> Option<ThreadId> {
    let mut stack = alloc::vec![0u8; stack_size].into_boxed_slice();
    let sp = unsafe { Target::prepare_initial_frame(&mut stack, trampoline as usize, arg) };

    without_interrupts(|| {
        let mut s = SCHED.lock();
        let id = s.free_slot()?;
        let tcb = Tcb::new(name, priority, stack, sp);
        s.slots[id.0 as usize] = Some(tcb);
        s.ready_insert(id);
        log::info!("thread '{}' created as {:?} at priority {}", name, id, priority.0);
        Some(id)
    })
}

/// Trampoline every new thread's prepared frame resumes into. Declared
/// so `prepare_initial_frame` has a concrete entry address; real thread
/// bodies are invoked through the entry function pointer stored by the
/// arch layer inside the frame itself on AVR, or, on the hosted backend,
/// never actually entered (tests never resume a hosted thread's frame).
extern "C" fn trampoline(_arg: usize) {
    loop {
        arch::without_interrupts(|| {});
    }
}

pub fn current() -> Option<ThreadId> {
    without_interrupts(|| SCHED.lock().current)
}

pub fn priority_of(id: ThreadId) -> Priority {
    without_interrupts(|| SCHED.lock().tcb(id).priority)
}

/// `set_prio(prio) -> old_prio`: change a thread's priority, returning
/// whatever it was before. The ready queue is priority-ordered only at
/// insertion time, so a thread already sitting on it keeps its old
/// position until the next time it's inserted.
pub fn set_priority(id: ThreadId, priority: Priority) -> Priority {
    without_interrupts(|| {
        let mut s = SCHED.lock();
        let tcb = s.tcb_mut(id);
        let old = tcb.priority;
        tcb.priority = priority;
        old
    })
}

pub fn state_of(id: ThreadId) -> ThreadState {
    without_interrupts(|| SCHED.lock().tcb(id).state)
}

/// Core scheduling primitive. Reaps threads killed on a previous pass,
/// then dispatches the ready queue's head. Callers are responsible for
/// having already placed the outgoing thread wherever it belongs (back
/// on the ready queue for a plain yield, on a wait queue, nowhere for a
/// sleeping or killed thread) before calling this.
pub fn schedule() {
    drain_isr_events();
    without_interrupts(|| {
        let (prev_sp_slot, next_sp, switch_needed) = {
            let mut s = SCHED.lock();
            s.reap_killed();

            let next = match s.ready_pop() {
                Some(id) => id,
                None => return, // nothing ready, not even idle: nothing to do
            };
            let prev = s.current;
            s.current = Some(next);
            s.tcb_mut(next).state = ThreadState::Running;

            if prev == Some(next) {
                (core::ptr::null_mut(), core::ptr::null_mut(), false)
            } else {
                // SAFETY: see module doc comment — the lock is dropped
                // before these raw pointers are used, relying on the
                // single-core, interrupts-disabled cooperative-switch
                // invariant rather than the borrow checker.
                let prev_sp_slot: *mut *mut u8 = match prev {
                    Some(p) => &mut s.tcb_mut(p).sp as *mut *mut u8,
                    // SAFETY: taking a raw pointer to a `static mut` does
                    // not itself create a reference; see `BOOT_SP_SINK`.
                    None => unsafe { core::ptr::addr_of_mut!(BOOT_SP_SINK) },
                };
                let next_sp = s.tcb(next).sp;
                (prev_sp_slot, next_sp, true)
            }
        };

        if switch_needed && !next_sp.is_null() {
            unsafe { Target::context_switch(prev_sp_slot, next_sp) };
        }
    });
}

/// Turn any ISR-banked signals into real wakeups. Each thread's event
/// counter and recorded wait-queue address were both set without taking
/// the scheduler into account (ISRs cannot call `schedule`); this walks
/// the thread table once per scheduling pass and performs the transfer
/// that `signal` would have done directly, for anything an ISR bumped.
fn drain_isr_events() {
    for i in 0..MAX_THREADS {
        let id = ThreadId(i as u8);
        if !wq_support::thread_exists(id) {
            continue;
        }
        if wq_support::take_event_count(id) == 0 {
            continue;
        }
        if let Some(addr) = wq_support::take_queue(id) {
            let wq = unsafe { &*(addr as *const crate::sync::wait_queue::WaitQueue) };
            wq.force_wake(id);
        }
    }
}

/// Voluntarily give up the CPU. The calling thread goes to the tail of
/// its priority level in the ready queue.
pub fn yield_now() {
    without_interrupts(|| {
        let mut s = SCHED.lock();
        if let Some(cur) = s.current {
            s.tcb_mut(cur).state = ThreadState::Ready;
            s.ready_insert(cur);
        }
    });
    schedule();
}

/// Suspend the calling thread for `ticks` system ticks.
pub fn sleep(ticks: u32) {
    let cur = match current() {
        Some(id) => id,
        None => return,
    };
    without_interrupts(|| {
        let mut s = SCHED.lock();
        s.tcb_mut(cur).state = ThreadState::Sleeping;
    });
    let id_usize = cur.0 as usize;
    crate::timer::create(ticks, crate::timer::TimerKind::OneShot, wake_sleeper, id_usize);
    schedule();
}

fn wake_sleeper(id_usize: usize) {
    let id = ThreadId(id_usize as u8);
    without_interrupts(|| {
        let mut s = SCHED.lock();
        if s.slots[id.0 as usize].is_some() {
            s.tcb_mut(id).state = ThreadState::Ready;
            s.ready_insert(id);
        }
    });
}

/// Terminate the calling thread. Never returns; the thread's slot is
/// freed on a later call to `schedule` made by some other thread, once
/// this thread's stack is no longer the one in use.
pub fn exit() -> ! {
    if let Some(cur) = current() {
        without_interrupts(|| {
            let mut s = SCHED.lock();
            s.tcb_mut(cur).state = ThreadState::Killed;
            s.kill_push(cur);
        });
        log::info!("thread {:?} exiting", cur);
    }
    schedule();
    unreachable!("scheduler resumed a killed thread")
}

// -- wait-queue support, used by `crate::sync::wait_queue` ------------------

pub(crate) mod wq_support {
    use super::*;

    /// Remove the current thread from the ready queue and return its id,
    /// if any (there always is one outside of early boot).
    pub fn take_current() -> Option<ThreadId> {
        current()
    }

    pub fn set_state(id: ThreadId, state: ThreadState) {
        without_interrupts(|| SCHED.lock().tcb_mut(id).state = state);
    }

    pub fn ready_insert(id: ThreadId) {
        without_interrupts(|| SCHED.lock().ready_insert(id));
    }

    pub fn ready_remove(id: ThreadId) -> bool {
        without_interrupts(|| SCHED.lock().ready_remove(id))
    }

    pub fn set_timer(id: ThreadId, timer: Option<usize>) {
        without_interrupts(|| SCHED.lock().tcb_mut(id).timer = timer);
    }

    pub fn take_timer(id: ThreadId) -> Option<usize> {
        without_interrupts(|| SCHED.lock().tcb_mut(id).timer.take())
    }

    pub fn set_timed_out(id: ThreadId, v: bool) {
        without_interrupts(|| SCHED.lock().tcb_mut(id).timed_out = v);
    }

    pub fn take_timed_out(id: ThreadId) -> bool {
        without_interrupts(|| core::mem::take(&mut SCHED.lock().tcb_mut(id).timed_out))
    }

    pub fn bump_event_count(id: ThreadId) {
        without_interrupts(|| {
            let mut s = SCHED.lock();
            let tcb = s.tcb_mut(id);
            tcb.event_count = tcb.event_count.saturating_add(1);
        });
    }

    pub fn take_event_count(id: ThreadId) -> u8 {
        without_interrupts(|| core::mem::take(&mut SCHED.lock().tcb_mut(id).event_count))
    }

    pub fn thread_exists(id: ThreadId) -> bool {
        without_interrupts(|| SCHED.lock().slots[id.0 as usize].is_some())
    }

    pub fn set_queue(id: ThreadId, queue: Option<usize>) {
        without_interrupts(|| SCHED.lock().tcb_mut(id).queue = queue);
    }

    pub fn take_queue(id: ThreadId) -> Option<usize> {
        without_interrupts(|| SCHED.lock().tcb_mut(id).queue.take())
    }

    /// Insert `id` (by priority) into an arbitrary intrusive list headed
    /// by `head` — used by wait queues, which thread the same `next`
    /// link the ready queue uses.
    pub fn list_insert(head: &mut Option<ThreadId>, id: ThreadId) {
        without_interrupts(|| SCHED.lock().slots_view().insert(head, id));
    }

    pub fn list_remove(head: &mut Option<ThreadId>, id: ThreadId) -> bool {
        without_interrupts(|| SCHED.lock().slots_view().remove(head, id))
    }

    pub fn list_pop_front(head: &mut Option<ThreadId>) -> Option<ThreadId> {
        without_interrupts(|| SCHED.lock().slots_view().pop_front(head))
    }
}
