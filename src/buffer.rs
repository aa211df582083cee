use parking_lot::{Condvar, Mutex};
use std::mem;
use tracing::{debug, trace};

/// Outcome of a [`Handoff::send`] or [`Handoff::receive`] call
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exchange {
    /// The local cell was swapped with the buffer's cell
    Swapped,
    /// The buffer was terminated; no swap took place and the local cell
    /// must not be treated as a delivered item
    Terminated,
}

impl Exchange {
    /// True if an item actually changed hands
    pub fn is_swapped(self) -> bool {
        matches!(self, Exchange::Swapped)
    }

    /// True if the call returned because of [`Handoff::terminate`]
    pub fn is_terminated(self) -> bool {
        matches!(self, Exchange::Terminated)
    }
}

struct Slot<T> {
    cell: T,
    /// Producer may deposit
    available: bool,
    /// Consumer may withdraw
    filled: bool,
    terminated: bool,
}

/// A single-slot rendezvous channel between two stages.
///
/// The buffer couples one producer thread with one consumer thread. Each
/// side brings its own owned cell of `T` and exchanges it for the buffer's
/// cell with a `mem::swap`, so the payload itself is never copied; only
/// ownership of the cells changes hands. The total population across
/// sender-local, buffer and receiver-local cells is a constant three.
///
/// Both calls block until the peer has made the slot usable, which is what
/// synchronizes two adjacent stages: a slow consumer holds its producer at
/// [`send`](Handoff::send), a slow producer holds its consumer at
/// [`receive`](Handoff::receive). The depth is exactly one; there is no
/// queueing beyond the single resident item.
///
/// [`terminate`](Handoff::terminate) wakes both sides; a woken call reports
/// [`Exchange::Terminated`] and performs no swap, even if an item is still
/// resident.
pub struct Handoff<T> {
    name: String,
    slot: Mutex<Slot<T>>,
    cond: Condvar,
}

impl<T: Default> Handoff<T> {
    /// Create an empty buffer. The name only shows up in trace output.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            slot: Mutex::new(Slot {
                cell: T::default(),
                available: true,
                filled: false,
                terminated: false,
            }),
            cond: Condvar::new(),
        }
    }
}

impl<T> Handoff<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Deposit the contents of `local`, blocking until the slot is free.
    ///
    /// On [`Exchange::Swapped`], `local` holds whatever the buffer's cell
    /// previously held (usually a spent item from the consumer's last
    /// withdrawal) and the deposited item is resident until the peer takes
    /// it.
    pub fn send(&self, local: &mut T) -> Exchange {
        let mut slot = self.slot.lock();
        trace!("[{}] waiting for a free slot", self.name);
        self.cond
            .wait_while(&mut slot, |s| !s.available && !s.terminated);
        if slot.terminated {
            trace!("[{}] send woke on termination", self.name);
            return Exchange::Terminated;
        }
        mem::swap(&mut slot.cell, local);
        slot.available = false;
        slot.filled = true;
        trace!("[{}] item deposited", self.name);
        drop(slot);
        self.cond.notify_one();
        Exchange::Swapped
    }

    /// Withdraw the resident item into `local`, blocking until one arrives.
    ///
    /// On [`Exchange::Swapped`], the buffer's cell holds whatever `local`
    /// held on entry and the slot is free for the next deposit.
    pub fn receive(&self, local: &mut T) -> Exchange {
        let mut slot = self.slot.lock();
        trace!("[{}] waiting for a resident item", self.name);
        self.cond
            .wait_while(&mut slot, |s| !s.filled && !s.terminated);
        if slot.terminated {
            trace!("[{}] receive woke on termination", self.name);
            return Exchange::Terminated;
        }
        mem::swap(&mut slot.cell, local);
        slot.filled = false;
        slot.available = true;
        trace!("[{}] item withdrawn", self.name);
        drop(slot);
        self.cond.notify_one();
        Exchange::Swapped
    }

    /// Shut the buffer down and wake both sides. Idempotent; every later
    /// `send` or `receive` returns [`Exchange::Terminated`] immediately.
    pub fn terminate(&self) {
        let mut slot = self.slot.lock();
        if !slot.terminated {
            debug!("[{}] terminated", self.name);
        }
        slot.terminated = true;
        drop(slot);
        self.cond.notify_all();
    }

    pub fn is_terminated(&self) -> bool {
        self.slot.lock().terminated
    }

    #[cfg(test)]
    fn flags(&self) -> (bool, bool) {
        let slot = self.slot.lock();
        (slot.available, slot.filled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_send_then_receive() {
        let buffer = Handoff::new("pair");
        let mut cell = 42;
        assert_eq!(buffer.send(&mut cell), Exchange::Swapped);
        assert_eq!(cell, 0);

        let mut taken = 0;
        assert_eq!(buffer.receive(&mut taken), Exchange::Swapped);
        assert_eq!(taken, 42);
    }

    #[test]
    fn test_exactly_one_flag_set() {
        let buffer = Handoff::<u32>::new("flags");
        assert_eq!(buffer.flags(), (true, false));

        let mut cell = 7;
        let _ = buffer.send(&mut cell);
        assert_eq!(buffer.flags(), (false, true));

        let _ = buffer.receive(&mut cell);
        assert_eq!(buffer.flags(), (true, false));
    }

    #[test]
    fn test_terminate_is_idempotent_and_prompt() {
        let buffer = Handoff::<u32>::new("ending");
        buffer.terminate();
        buffer.terminate();
        assert!(buffer.is_terminated());

        let mut cell = 9;
        assert_eq!(buffer.send(&mut cell), Exchange::Terminated);
        assert_eq!(buffer.receive(&mut cell), Exchange::Terminated);
        // The local cell is untouched by a terminated exchange.
        assert_eq!(cell, 9);
    }

    #[test]
    fn test_no_swap_after_terminate_even_when_filled() {
        let buffer = Handoff::new("stale");
        let mut cell = 5;
        let _ = buffer.send(&mut cell);
        buffer.terminate();

        let mut taken = 77;
        assert_eq!(buffer.receive(&mut taken), Exchange::Terminated);
        assert_eq!(taken, 77);
    }

    #[test]
    fn test_terminate_unblocks_waiting_sender() {
        let buffer = Arc::new(Handoff::new("blocked"));
        let mut cell = 1;
        let _ = buffer.send(&mut cell);

        let peer = Arc::clone(&buffer);
        let sender = thread::spawn(move || {
            let mut cell = 2;
            peer.send(&mut cell)
        });

        thread::sleep(Duration::from_millis(50));
        buffer.terminate();
        assert_eq!(sender.join().unwrap(), Exchange::Terminated);
    }

    #[test]
    fn test_ping_pong_preserves_order() {
        let buffer = Handoff::new("order");
        let collected = crossbeam::scope(|s| {
            s.spawn(|_| {
                let mut cell = 0u64;
                for i in 1..=100 {
                    cell = i;
                    assert_eq!(buffer.send(&mut cell), Exchange::Swapped);
                }
            });

            let mut seen = Vec::new();
            let mut cell = 0u64;
            for _ in 0..100 {
                assert_eq!(buffer.receive(&mut cell), Exchange::Swapped);
                seen.push(cell);
            }
            seen
        })
        .unwrap();

        let expected: Vec<u64> = (1..=100).collect();
        assert_eq!(collected, expected);
    }

    #[test]
    fn test_sender_blocks_until_consumer_takes() {
        let buffer = Arc::new(Handoff::new("backpressure"));
        let mut cell = 10;
        let _ = buffer.send(&mut cell);

        let peer = Arc::clone(&buffer);
        let sender = thread::spawn(move || {
            let mut cell = 11;
            let outcome = peer.send(&mut cell);
            (outcome, std::time::Instant::now())
        });

        thread::sleep(Duration::from_millis(80));
        let released = std::time::Instant::now();
        let mut taken = 0;
        let _ = buffer.receive(&mut taken);
        assert_eq!(taken, 10);

        let (outcome, finished) = sender.join().unwrap();
        assert_eq!(outcome, Exchange::Swapped);
        assert!(finished >= released);
    }
}
