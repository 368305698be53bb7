/*
 * The event primitive
 *
 * Three states: empty (no waiters, nothing pending), signaled (no
 * waiters, one pending wakeup banked for the next waiter), non-empty (a
 * priority-ordered list of suspended threads, linked through the same
 * `next` field the ready queue uses — a thread is never on both at
 * once).
 *
 * `signal` on an empty queue banks into the signaled state rather than
 * being lost, so a publisher that races ahead of its subscriber doesn't
 * strand it; any number of redundant signals collapse into that single
 * bank. `signal_from_isr` additionally buffers extra wakeups as a count
 * on the head waiter's thread (its "event counter"), since an ISR cannot
 * walk into the scheduler to hand off straight away — the scheduler
 * drains that count the next time it looks at the thread.
 *
 * A waiting thread records the address of the queue holding it on its
 * own control block. That lets a firing timeout find its queue without
 * a search, and lets whichever of `signal`/timeout unlinks the thread
 * first win a race for the same waiter: the other finds the thread's
 * queue pointer already cleared and no-ops.
 */

use crate::error::WaitResult;
use crate::sched::scheduler::wq_support;
use crate::sched::thread::ThreadState;
use crate::timer::{self, TimerKind};
use spin::Mutex;

#[derive(Clone, Copy, PartialEq, Eq)]
enum State {
    Empty,
    Signaled,
    NonEmpty(crate::sched::thread::ThreadId),
}

pub struct WaitQueue {
    state: Mutex<State>,
}

impl WaitQueue {
    pub const fn new() -> Self {
        WaitQueue {
            state: Mutex::new(State::Empty),
        }
    }

    /// An already-signaled queue: the first `wait` returns immediately.
    /// Used to back a mutex built directly on the event primitive, the
    /// way the device table's per-device lock is specified — "available"
    /// is simply "one pending signal nobody has collected yet".
    pub const fn new_signaled() -> Self {
        WaitQueue {
            state: Mutex::new(State::Signaled),
        }
    }

    /// Wait for a signal, or until `timeout_ticks` system ticks elapse
    /// (0 means wait forever). If the queue is already signaled, the
    /// signal is consumed and this returns immediately without blocking.
    pub fn wait(&self, timeout_ticks: u32) -> WaitResult {
        let cur = match wq_support::take_current() {
            Some(id) => id,
            None => return WaitResult::Ok,
        };

        let already_signaled = {
            let mut st = self.state.lock();
            if *st == State::Signaled {
                *st = State::Empty;
                true
            } else {
                false
            }
        };

        if already_signaled {
            crate::sched::scheduler::yield_now();
            return WaitResult::Ok;
        }

        wq_support::ready_remove(cur);
        {
            let mut st = self.state.lock();
            let mut head = match *st {
                State::NonEmpty(h) => Some(h),
                _ => None,
            };
            wq_support::list_insert(&mut head, cur);
            *st = State::NonEmpty(head.expect("just inserted"));
        }
        wq_support::set_state(cur, ThreadState::Waiting);
        wq_support::set_queue(cur, Some(self as *const WaitQueue as usize));

        if timeout_ticks != 0 {
            let timer_id = timer::create(timeout_ticks, TimerKind::OneShot, timeout_callback, cur.0 as usize);
            wq_support::set_timer(cur, timer_id);
        } else {
            wq_support::set_timer(cur, None);
        }

        crate::sched::scheduler::schedule();

        // Resumed: either signaled (cancel the still-pending timer, if
        // any) or timed out (queue membership already cleared for us).
        if wq_support::take_timed_out(cur) {
            WaitResult::Timeout
        } else {
            if let Some(t) = wq_support::take_timer(cur) {
                timer::stop(t);
            }
            wq_support::set_queue(cur, None);
            WaitResult::Ok
        }
    }

    /// Wake the highest-priority waiter, if any, and yield so it can run
    /// immediately if it outranks the caller. If no one is waiting, bank
    /// a signal. Returns whether a waiter was woken.
    pub fn signal(&self) -> bool {
        let woke = self.signal_raw();
        crate::sched::scheduler::yield_now();
        woke
    }

    fn signal_raw(&self) -> bool {
        let mut st = self.state.lock();
        match *st {
            State::Signaled => false,
            State::Empty => {
                *st = State::Signaled;
                false
            }
            State::NonEmpty(head) => {
                let mut h = Some(head);
                let woken = wq_support::list_pop_front(&mut h).expect("non-empty state");
                *st = match h {
                    Some(x) => State::NonEmpty(x),
                    None => State::Empty,
                };
                drop(st);

                wq_support::set_queue(woken, None);
                if let Some(t) = wq_support::take_timer(woken) {
                    timer::stop(t);
                }
                wq_support::set_state(woken, ThreadState::Ready);
                wq_support::ready_insert(woken);
                true
            }
        }
    }

    /// ISR-safe signal. Never yields, never cancels timers (that's a
    /// non-ISR-safe path). If a thread is already waiting, only its
    /// event counter is bumped; draining that into an actual wakeup
    /// happens outside ISR context, on the scheduler's next pass.
    pub fn signal_from_isr(&self) {
        let mut st = self.state.lock();
        match *st {
            State::Empty => *st = State::Signaled,
            State::Signaled => {}
            State::NonEmpty(head) => wq_support::bump_event_count(head),
        }
    }

    /// Used only by the scheduler's ISR-signal drain pass
    /// (`crate::sched::scheduler::drain_isr_events`): force-wake a
    /// specific thread already known to be a member of this queue,
    /// outside of the normal head-of-queue `signal` path.
    pub(crate) fn force_wake(&self, id: crate::sched::thread::ThreadId) {
        {
            let mut st = self.state.lock();
            if let State::NonEmpty(head) = *st {
                let mut h = Some(head);
                wq_support::list_remove(&mut h, id);
                *st = match h {
                    Some(x) => State::NonEmpty(x),
                    None => State::Empty,
                };
            }
        }
        if let Some(t) = wq_support::take_timer(id) {
            timer::stop(t);
        }
        wq_support::set_state(id, ThreadState::Ready);
        wq_support::ready_insert(id);
    }
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}

fn timeout_callback(thread_id: usize) {
    let id = crate::sched::thread::ThreadId(thread_id as u8);

    let queue_addr = match wq_support::take_queue(id) {
        Some(addr) => addr,
        None => return, // a signal already unlinked this thread; we lost the race
    };

    let wq = unsafe { &*(queue_addr as *const WaitQueue) };
    {
        let mut st = wq.state.lock();
        if let State::NonEmpty(head) = *st {
            let mut h = Some(head);
            wq_support::list_remove(&mut h, id);
            *st = match h {
                Some(x) => State::NonEmpty(x),
                None => State::Empty,
            };
        }
    }

    wq_support::set_timed_out(id, true);
    wq_support::set_state(id, ThreadState::Ready);
    wq_support::ready_insert(id);
}
