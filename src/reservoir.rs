//! Per-bucket bounded random samples, realized via classical reservoir sampling.

use std::cell::RefCell;
use std::fmt;

use parking_lot::Mutex;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// The id sentinel for unfilled slots.
///
/// Fixed to the maximum value of the id domain so that an ascending sort always pushes it to the
/// end of a block, which is what [`crate::Index::top_k`] relies on.
pub const EMPTY: u32 = u32::MAX;

thread_local! {
    // One small, fast PRNG per OS thread, lazily seeded from the process entropy pool. Concurrent
    // `add` calls on different reservoirs never contend on this, unlike a single shared generator
    // behind a lock would.
    static RNG: RefCell<SmallRng> = RefCell::new(SmallRng::from_entropy());
}

struct Inner {
    slots: Vec<u32>,
    attempts: u64,
}

/// A fixed-capacity bounded sample of every id ever offered to a bucket.
///
/// `add` is classical reservoir sampling: once more than `capacity` ids have been offered, each
/// new id replaces a uniformly random existing slot with probability `capacity / attempts`, so
/// every id ever seen ends up with marginal inclusion probability `capacity / attempts`.
///
/// The whole of `add` and `retrieve` runs under a single `parking_lot::Mutex`, so a bucket never
/// observes a torn snapshot; ordering between concurrent `add`s on the same bucket is otherwise
/// unspecified.
pub struct Reservoir {
    inner: Mutex<Inner>,
    capacity: usize,
}

impl Reservoir {
    /// Create a reservoir with all slots `EMPTY` and zero attempts.
    pub fn new(capacity: usize) -> Reservoir {
        Reservoir {
            inner: Mutex::new(Inner {
                slots: vec![EMPTY; capacity],
                attempts: 0,
            }),
            capacity,
        }
    }

    /// Offer `id` to the reservoir.
    ///
    /// Never fails. Atomic with respect to other `add`/`retrieve` calls on this reservoir.
    pub fn add(&self, id: u32) {
        let mut inner = self.inner.lock();

        if inner.attempts < self.capacity as u64 {
            // Reservoir not yet full: the id always lands in the next free slot.
            inner.slots[inner.attempts as usize] = id;
        } else {
            // Reservoir full: replace a uniformly random previously-seen slot. `attempts` keeps
            // counting even when the draw misses the reservoir — that growth is what keeps the
            // inclusion probability equal to `capacity / attempts` rather than drifting.
            let loc = RNG.with(|rng| rng.borrow_mut().gen_range(0..inner.attempts));
            if loc < self.capacity as u64 {
                inner.slots[loc as usize] = id;
            }
        }

        inner.attempts += 1;
    }

    /// Copy the full `capacity`-length slot array, including `EMPTY` padding, into `buffer`.
    ///
    /// Atomic with respect to concurrent `add`s: the caller never observes a slot updated by an
    /// `add` whose `attempts` increment hasn't landed yet, or vice versa.
    pub fn retrieve(&self, buffer: &mut [u32]) {
        let inner = self.inner.lock();
        buffer.copy_from_slice(&inner.slots);
    }

    /// Reset to the construction-time state: all slots `EMPTY`, `attempts` zero.
    ///
    /// Not safe to call concurrently with `add`/`retrieve` on the same reservoir; callers (the
    /// index's `reset`) must ensure quiescence first.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        for slot in inner.slots.iter_mut() {
            *slot = EMPTY;
        }
        inner.attempts = 0;
    }

    /// The fixed maximum number of ids this reservoir can retain.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The total number of `add` calls ever made on this reservoir.
    pub fn attempts(&self) -> u64 {
        self.inner.lock().attempts
    }
}

impl fmt::Debug for Reservoir {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let inner = self.inner.lock();
        write!(f, "Reservoir [{}/{}] {:?}", inner.attempts, self.capacity, inner.slots)
    }
}
