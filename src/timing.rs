/// Core timing service.
///
/// A deadline-scheduled event queue driven by the CPU emulation loop.
/// Components register named events at construction and schedule them
/// at deadlines measured in CPU ticks. Events fire synchronously when
/// the embedder drains the queue at an instruction boundary.
///
/// The handle is cheap to clone; all clones share the same queue.
/// Scheduling from outside the emulation thread must go through
/// `schedule_threadsafe_immediate`, which serialises the mutation onto
/// the emulation thread via a channel drained by `next_due`.

use crossbeam_channel::{Sender, Receiver, unbounded};
use parking_lot::Mutex;
use std::{
    cmp::Reverse,
    collections::BinaryHeap,
    sync::Arc
};

/// Opaque handle to a registered event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct EventId(usize);

/// A fired event, as returned by `Timing::next_due`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FiredEvent {
    pub event: EventId,
    pub userdata: u32,
}

struct TimingInner {
    /// Current time in CPU ticks.
    ticks:      u64,
    /// Names of registered events, indexed by EventId.
    events:     Vec<String>,
    /// Pending entries. Reverse() turns the max-heap into a min-heap;
    /// seq keeps same-deadline entries in schedule order.
    queue:      BinaryHeap<Reverse<(u64, u64, usize, u32)>>,
    seq:        u64,
}

#[derive(Clone)]
pub struct Timing {
    inner:          Arc<Mutex<TimingInner>>,
    ticks_per_sec:  u64,

    immediate_tx:   Sender<FiredEvent>,
    immediate_rx:   Receiver<FiredEvent>,
}

impl Timing {
    pub fn new(ticks_per_sec: u64) -> Self {
        let (immediate_tx, immediate_rx) = unbounded();
        Self {
            inner: Arc::new(Mutex::new(TimingInner {
                ticks:  0,
                events: Vec::new(),
                queue:  BinaryHeap::new(),
                seq:    0,
            })),
            ticks_per_sec,
            immediate_tx,
            immediate_rx,
        }
    }

    /// Register a named event. The returned id is passed back in
    /// `FiredEvent` when the event comes due.
    pub fn register_event(&self, name: &str) -> EventId {
        let mut inner = self.inner.lock();
        inner.events.push(name.to_string());
        EventId(inner.events.len() - 1)
    }

    /// Drop all pending entries for the given event.
    pub fn remove_event(&self, event: EventId) {
        let mut inner = self.inner.lock();
        let entries = std::mem::take(&mut inner.queue);
        inner.queue = entries.into_iter()
            .filter(|Reverse((_, _, id, _))| *id != event.0)
            .collect();
    }

    /// Schedule an event to fire `after` ticks from now.
    pub fn schedule(&self, after: u64, event: EventId, userdata: u32) {
        let mut inner = self.inner.lock();
        let deadline = inner.ticks + after;
        let seq = inner.seq;
        inner.seq += 1;
        inner.queue.push(Reverse((deadline, seq, event.0, userdata)));
    }

    /// Schedule an event to fire as soon as the emulation thread next
    /// drains the queue. Safe to call from any thread.
    pub fn schedule_threadsafe_immediate(&self, event: EventId, userdata: u32) {
        // The channel is unbounded so this never blocks the caller.
        self.immediate_tx.send(FiredEvent { event, userdata })
            .expect("timing queue gone");
    }

    /// Advance the clock. Called from the emulation loop.
    pub fn add_ticks(&self, ticks: u64) {
        self.inner.lock().ticks += ticks;
    }

    /// Current time in ticks.
    pub fn ticks(&self) -> u64 {
        self.inner.lock().ticks
    }

    pub fn ticks_per_second(&self) -> u64 {
        self.ticks_per_sec
    }

    /// Pop the next event due at or before the current time.
    ///
    /// Cross-thread immediate events drain first, then deadline order.
    /// Returns None once nothing else is due yet.
    pub fn next_due(&self) -> Option<FiredEvent> {
        if let Ok(fired) = self.immediate_rx.try_recv() {
            return Some(fired);
        }
        let mut inner = self.inner.lock();
        match inner.queue.peek() {
            Some(Reverse((deadline, _, _, _))) if *deadline <= inner.ticks => {
                let Reverse((_, _, id, userdata)) = inner.queue.pop().unwrap();
                Some(FiredEvent { event: EventId(id), userdata })
            },
            _ => None
        }
    }

    /// Name of a registered event, for debug logging.
    pub fn event_name(&self, event: EventId) -> String {
        self.inner.lock().events[event.0].clone()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn events_fire_in_deadline_order() {
        let timing = Timing::new(1000);
        let a = timing.register_event("a");
        let b = timing.register_event("b");

        timing.schedule(20, b, 2);
        timing.schedule(10, a, 1);
        assert_eq!(timing.next_due(), None);

        timing.add_ticks(10);
        assert_eq!(timing.next_due(), Some(FiredEvent { event: a, userdata: 1 }));
        assert_eq!(timing.next_due(), None);

        timing.add_ticks(10);
        assert_eq!(timing.next_due(), Some(FiredEvent { event: b, userdata: 2 }));
        assert_eq!(timing.next_due(), None);
    }

    #[test]
    fn same_deadline_keeps_schedule_order() {
        let timing = Timing::new(1000);
        let a = timing.register_event("a");
        timing.schedule(5, a, 1);
        timing.schedule(5, a, 2);
        timing.add_ticks(5);
        assert_eq!(timing.next_due().unwrap().userdata, 1);
        assert_eq!(timing.next_due().unwrap().userdata, 2);
    }

    #[test]
    fn removed_events_never_fire() {
        let timing = Timing::new(1000);
        let a = timing.register_event("a");
        let b = timing.register_event("b");
        timing.schedule(5, a, 0);
        timing.schedule(5, b, 0);
        timing.remove_event(a);
        timing.add_ticks(5);
        assert_eq!(timing.next_due().unwrap().event, b);
        assert_eq!(timing.next_due(), None);
    }

    #[test]
    fn threadsafe_immediate_fires_before_deadlines() {
        let timing = Timing::new(1000);
        let a = timing.register_event("a");
        let b = timing.register_event("b");
        timing.schedule(0, a, 0);
        timing.schedule_threadsafe_immediate(b, 7);
        assert_eq!(timing.next_due(), Some(FiredEvent { event: b, userdata: 7 }));
        assert_eq!(timing.next_due(), Some(FiredEvent { event: a, userdata: 0 }));
    }
}
