/*
 * Priority-ordered intrusive list
 *
 * Shared machinery for both the ready queue and every wait queue: threads
 * are linked through their own `next` field, ordered by ascending
 * priority value (0 = highest), FIFO among equal priorities. Insertion
 * walks from the head until it finds a strictly-lower-priority thread (or
 * the end) and splices in before it, which keeps equal-priority runs in
 * arrival order without a separate tie-break field.
 */

use super::thread::{Priority, Tcb, ThreadId, MAX_THREADS};

pub struct Slots<'a> {
    pub slots: &'a mut [Option<Tcb>; MAX_THREADS],
}

impl<'a> Slots<'a> {
    fn get(&self, id: ThreadId) -> &Tcb {
        self.slots[id.0 as usize].as_ref().expect("dangling ThreadId")
    }

    fn get_mut(&mut self, id: ThreadId) -> &mut Tcb {
        self.slots[id.0 as usize].as_mut().expect("dangling ThreadId")
    }

    fn priority_of(&self, id: ThreadId) -> Priority {
        self.get(id).priority
    }

    /// Insert `id` into the list headed by `head`, keeping it sorted by
    /// ascending priority with FIFO order within a priority level.
    pub fn insert(&mut self, head: &mut Option<ThreadId>, id: ThreadId) {
        let prio = self.priority_of(id);
        match *head {
            None => {
                self.get_mut(id).next = None;
                *head = Some(id);
            }
            Some(first) => {
                if self.priority_of(first) > prio {
                    self.get_mut(id).next = Some(first);
                    *head = Some(id);
                    return;
                }
                let mut cursor = first;
                loop {
                    let next = self.get(cursor).next;
                    match next {
                        Some(n) if self.priority_of(n) <= prio => cursor = n,
                        other => {
                            self.get_mut(id).next = other;
                            self.get_mut(cursor).next = Some(id);
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Remove `id` from the list headed by `head`, if present. Returns
    /// whether it was found.
    pub fn remove(&mut self, head: &mut Option<ThreadId>, id: ThreadId) -> bool {
        let mut cursor = *head;
        let mut prev: Option<ThreadId> = None;
        while let Some(cur) = cursor {
            let next = self.get(cur).next;
            if cur == id {
                match prev {
                    None => *head = next,
                    Some(p) => self.get_mut(p).next = next,
                }
                self.get_mut(cur).next = None;
                return true;
            }
            prev = Some(cur);
            cursor = next;
        }
        false
    }

    /// Pop the head of the list (the highest-priority, longest-waiting
    /// thread).
    pub fn pop_front(&mut self, head: &mut Option<ThreadId>) -> Option<ThreadId> {
        let first = (*head)?;
        let next = self.get(first).next;
        *head = next;
        self.get_mut(first).next = None;
        Some(first)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched::thread::ThreadState;
    use alloc::boxed::Box;

    fn tcb(prio: u8) -> Option<Tcb> {
        Some(Tcb {
            name: "t",
            priority: Priority(prio),
            state: ThreadState::Ready,
            stack: Box::new([]),
            sp: core::ptr::null_mut(),
            next: None,
            timer: None,
            timed_out: false,
            event_count: 0,
            queue: None,
        })
    }

    #[test]
    fn insert_keeps_priority_order_and_fifo_within_level() {
        extern crate alloc;
        let mut slots: [Option<Tcb>; MAX_THREADS] = core::array::from_fn(|_| None);
        slots[0] = tcb(10);
        slots[1] = tcb(5);
        slots[2] = tcb(10);
        slots[3] = tcb(1);

        let mut head = None;
        let mut s = Slots { slots: &mut slots };
        s.insert(&mut head, ThreadId(0));
        s.insert(&mut head, ThreadId(1));
        s.insert(&mut head, ThreadId(2));
        s.insert(&mut head, ThreadId(3));

        let mut order = alloc::vec::Vec::new();
        let mut h = head;
        while let Some(id) = s.pop_front(&mut h) {
            order.push(id);
        }
        assert_eq!(order, alloc::vec![ThreadId(3), ThreadId(1), ThreadId(0), ThreadId(2)]);
    }

    #[test]
    fn remove_mid_list_relinks_neighbors() {
        let mut slots: [Option<Tcb>; MAX_THREADS] = core::array::from_fn(|_| None);
        slots[0] = tcb(1);
        slots[1] = tcb(2);
        slots[2] = tcb(3);
        let mut head = None;
        let mut s = Slots { slots: &mut slots };
        s.insert(&mut head, ThreadId(0));
        s.insert(&mut head, ThreadId(1));
        s.insert(&mut head, ThreadId(2));

        assert!(s.remove(&mut head, ThreadId(1)));
        let mut order = alloc::vec::Vec::new();
        while let Some(id) = s.pop_front(&mut head) {
            order.push(id);
        }
        assert_eq!(order, alloc::vec![ThreadId(0), ThreadId(2)]);
    }
}
