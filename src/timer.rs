/*
 * Virtual timer wheel
 *
 * A sorted delta list: each node stores ticks remaining *relative to its
 * predecessor*, so the sum of `remaining` from the head through node N
 * equals N's absolute fire tick. Advancing time by one tick only ever
 * touches the head, and inserting a new timer only walks as far as the
 * point where it sorts in — both O(timers-ahead-of-it), not O(n) against
 * some absolute tick value that would need rescaling as ticks overflow.
 *
 * Grounded in the original virtual timer module's delta-list design:
 * creation walks forward subtracting from each node's remaining count
 * until it finds where the new node's deadline falls short, then splits
 * the remainder into the new node and subtracts the new node's `remaining`
 * from whatever follows it.
 */

use crate::arch::without_interrupts;
use heapless::Vec;

pub const MAX_TIMERS: usize = 16;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TimerKind {
    OneShot,
    Periodic,
}

pub type TimerCallback = fn(usize);

#[derive(Clone, Copy)]
struct TimerNode {
    id: usize,
    remaining: u32,
    period: u32,
    kind: TimerKind,
    callback: TimerCallback,
    arg: usize,
    active: bool,
}

struct Wheel {
    nodes: Vec<TimerNode, MAX_TIMERS>,
    next_id: usize,
}

impl Wheel {
    const fn new() -> Self {
        Wheel {
            nodes: Vec::new(),
            next_id: 1,
        }
    }

    /// Insert a new timer firing in `ticks` ticks, maintaining the
    /// delta-list invariant: walk forward consuming `ticks` from each
    /// node's `remaining` until a node's remaining would exceed it, insert
    /// there with the leftover, and subtract the new node's contribution
    /// from the node that used to follow at that slot.
    fn create(
        &mut self,
        ticks: u32,
        kind: TimerKind,
        callback: TimerCallback,
        arg: usize,
    ) -> Option<usize> {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);

        let mut remaining = ticks;
        let mut insert_at = self.nodes.len();
        for (i, node) in self.nodes.iter_mut().enumerate() {
            if node.remaining > remaining {
                node.remaining -= remaining;
                insert_at = i;
                break;
            }
            remaining -= node.remaining;
        }

        let node = TimerNode {
            id,
            remaining,
            period: ticks,
            kind,
            callback,
            arg,
            active: true,
        };
        self.nodes.insert(insert_at, node).ok()?;
        Some(id)
    }

    fn stop(&mut self, id: usize) -> bool {
        if let Some(pos) = self.nodes.iter().position(|n| n.id == id) {
            // Removing a node must donate its remaining ticks to whatever
            // follows it, or the delta-list sum invariant breaks for every
            // node after it.
            let removed = self.nodes.remove(pos);
            if let Some(next) = self.nodes.get_mut(pos) {
                next.remaining += removed.remaining;
            }
            true
        } else {
            false
        }
    }

    /// Advance by one tick. Decrements the head's `remaining`; while the
    /// head has reached zero, fire it (collecting its callback to run
    /// outside the critical section) and either reschedule it (periodic)
    /// or drop it (one-shot).
    fn tick(&mut self) -> Vec<(TimerCallback, usize), MAX_TIMERS> {
        let mut fired: Vec<(TimerCallback, usize), MAX_TIMERS> = Vec::new();

        if let Some(head) = self.nodes.first_mut() {
            if head.remaining > 0 {
                head.remaining -= 1;
            }
        }

        while let Some(head) = self.nodes.first() {
            if head.remaining != 0 {
                break;
            }
            let fired_node = self.nodes.remove(0);
            let _ = fired.push((fired_node.callback, fired_node.arg));

            if fired_node.kind == TimerKind::Periodic && fired_node.period > 0 {
                self.create(
                    fired_node.period,
                    TimerKind::Periodic,
                    fired_node.callback,
                    fired_node.arg,
                );
            }
        }

        fired
    }

    fn is_active(&self, id: usize) -> bool {
        self.nodes.iter().any(|n| n.id == id)
    }
}

use spin::Mutex;

static WHEEL: Mutex<Wheel> = Mutex::new(Wheel::new());

/// Reset the wheel to empty. Called once during `bermuda_os::init`, before
/// any thread or bus code can have created a timer.
pub fn init() {
    without_interrupts(|| {
        let mut w = WHEEL.lock();
        w.nodes.clear();
        w.next_id = 1;
    });
}

/// Schedule `callback(arg)` to run in `ticks` system ticks.
pub fn create(ticks: u32, kind: TimerKind, callback: TimerCallback, arg: usize) -> Option<usize> {
    without_interrupts(|| WHEEL.lock().create(ticks, kind, callback, arg))
}

/// Cancel a pending timer. Returns `false` if it already fired (one-shot)
/// or never existed.
pub fn stop(id: usize) -> bool {
    without_interrupts(|| WHEEL.lock().stop(id))
}

pub fn is_active(id: usize) -> bool {
    without_interrupts(|| WHEEL.lock().is_active(id))
}

/// Advance the wheel by one tick and run any callbacks that fired.
/// Intended to be called once per tick from the scheduler's idle/tick
/// processing, outside of ISR context — callbacks may take the heap lock
/// or other non-ISR-safe paths.
pub fn process_tick() {
    let fired = without_interrupts(|| WHEEL.lock().tick());
    for (callback, arg) in fired {
        callback(arg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicUsize, Ordering};

    static HITS: AtomicUsize = AtomicUsize::new(0);

    fn bump(_arg: usize) {
        HITS.fetch_add(1, Ordering::SeqCst);
    }

    fn reset() {
        HITS.store(0, Ordering::SeqCst);
        let mut w = WHEEL.lock();
        while w.nodes.pop().is_some() {}
    }

    #[test]
    fn one_shot_fires_exactly_once_at_deadline() {
        reset();
        let id = create(3, TimerKind::OneShot, bump, 0).unwrap();
        process_tick();
        process_tick();
        assert_eq!(HITS.load(Ordering::SeqCst), 0);
        process_tick();
        assert_eq!(HITS.load(Ordering::SeqCst), 1);
        assert!(!is_active(id));
    }

    #[test]
    fn periodic_fires_k_times() {
        reset();
        create(2, TimerKind::Periodic, bump, 0).unwrap();
        for _ in 0..8 {
            process_tick();
        }
        assert_eq!(HITS.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn stop_removes_pending_timer_and_donates_remaining() {
        reset();
        let a = create(5, TimerKind::OneShot, bump, 0).unwrap();
        let b = create(10, TimerKind::OneShot, bump, 0).unwrap();
        assert!(stop(a));
        for _ in 0..10 {
            process_tick();
        }
        assert_eq!(HITS.load(Ordering::SeqCst), 1);
        assert!(!is_active(b));
    }

    #[test]
    fn delta_list_sum_matches_absolute_deadlines() {
        reset();
        create(4, TimerKind::OneShot, bump, 0).unwrap();
        create(9, TimerKind::OneShot, bump, 0).unwrap();
        create(2, TimerKind::OneShot, bump, 0).unwrap();
        let w = WHEEL.lock();
        let mut sum = 0u32;
        let mut deadlines: Vec<u32, MAX_TIMERS> = Vec::new();
        for n in w.nodes.iter() {
            sum += n.remaining;
            deadlines.push(sum).ok();
        }
        let mut expect: Vec<u32, MAX_TIMERS> = Vec::new();
        expect.push(2).ok();
        expect.push(4).ok();
        expect.push(9).ok();
        assert_eq!(deadlines, expect);
    }
}
