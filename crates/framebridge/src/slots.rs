//! Lock-free triple-slot handoff between the upload thread and the render loop.
//!
//! The registry holds three cells and two atomic indices. The producer always
//! fills the write slot and then rotates the read index onto it; the consumer
//! takes whatever the read index points at. Claiming empties the cell with an
//! atomic swap, so a published value is handed out at most once even when
//! consumer calls interleave.
//!
//! Exactly one thread may call [`SlotRegistry::publish`]; this is a documented
//! precondition, not a runtime check. Any number of threads may call
//! [`SlotRegistry::claim`].

use std::marker::PhantomData;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

pub struct SlotRegistry<T> {
    slots: [AtomicPtr<T>; 3],
    read: AtomicUsize,
    write: AtomicUsize,
    _owned: PhantomData<T>,
}

// The registry moves owned values between threads; it never hands out shared
// references to them, so `T: Send` is the only requirement.
unsafe impl<T: Send> Sync for SlotRegistry<T> {}

impl<T> SlotRegistry<T> {
    pub fn new() -> Self {
        Self {
            slots: [
                AtomicPtr::new(ptr::null_mut()),
                AtomicPtr::new(ptr::null_mut()),
                AtomicPtr::new(ptr::null_mut()),
            ],
            read: AtomicUsize::new(0),
            write: AtomicUsize::new(1),
            _owned: PhantomData,
        }
    }

    /// Makes `value` the current one visible to the consumer.
    ///
    /// Returns the displaced value if the previous publication was never
    /// claimed. Single-producer only: concurrent `publish` calls violate the
    /// index invariant.
    pub fn publish(&self, value: T) -> Option<T> {
        let fresh = Box::into_raw(Box::new(value));
        let write = self.write.load(Ordering::Acquire);
        // Release the fully built value into the cell; a claim racing on this
        // slot acquires it through the matching swap.
        let stale = self.slots[write].swap(fresh, Ordering::AcqRel);

        // The single synchronization edge: from here on the consumer sees the
        // new publication.
        let prev_read = self.read.swap(write, Ordering::AcqRel);
        debug_assert_ne!(prev_read, write, "read and write indices collided");

        // The indices now occupied are `write` (just published) and
        // `prev_read` (possibly still being drained by a claim that loaded
        // the read index before our swap). The next write slot is the unique
        // third index, so neither is ever overwritten mid-use. Distinctness
        // of the pair makes the subtraction land in {0,1,2}.
        self.write.store(3 - write - prev_read, Ordering::Release);

        if stale.is_null() {
            None
        } else {
            Some(*unsafe { Box::from_raw(stale) })
        }
    }

    /// Takes ownership of the current publication, if any.
    ///
    /// Non-blocking and total: an empty slot is a legal no-op tick, not an
    /// error.
    pub fn claim(&self) -> Option<T> {
        let read = self.read.load(Ordering::Acquire);
        let taken = self.slots[read].swap(ptr::null_mut(), Ordering::AcqRel);
        if taken.is_null() {
            None
        } else {
            Some(*unsafe { Box::from_raw(taken) })
        }
    }

    /// Empties every slot, releasing whatever they hold. Idempotent.
    ///
    /// Consumer-side; used when the device changes and recorded work from the
    /// old device must not survive.
    pub fn purge(&self) {
        for slot in &self.slots {
            let taken = slot.swap(ptr::null_mut(), Ordering::AcqRel);
            if !taken.is_null() {
                drop(unsafe { Box::from_raw(taken) });
            }
        }
    }

    #[cfg(test)]
    fn indices(&self) -> (usize, usize) {
        (
            self.read.load(Ordering::Acquire),
            self.write.load(Ordering::Acquire),
        )
    }
}

impl<T> Default for SlotRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for SlotRegistry<T> {
    fn drop(&mut self) {
        self.purge();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn claim_without_publish_is_empty() {
        let registry: SlotRegistry<u32> = SlotRegistry::new();
        assert_eq!(registry.claim(), None);
        assert_eq!(registry.claim(), None);
    }

    #[test]
    fn single_claim_returns_latest_publication() {
        let registry = SlotRegistry::new();
        registry.publish('a');
        registry.publish('b');
        registry.publish('c');
        assert_eq!(registry.claim(), Some('c'));
        assert_eq!(registry.claim(), None, "a publication is claimed at most once");
    }

    #[test]
    fn publish_reports_displaced_values() {
        let registry = SlotRegistry::new();
        assert_eq!(registry.publish(1), None);
        assert_eq!(registry.claim(), Some(1));
        assert_eq!(registry.publish(2), None);
        assert_eq!(registry.publish(3), None);
        assert_eq!(registry.publish(4), None, "claimed slots are not displaced");
        // The rotation now lands back on the slot still holding 2.
        assert_eq!(registry.publish(5), Some(2));
    }

    #[test]
    fn purge_is_idempotent_and_empties_slots() {
        let registry = SlotRegistry::new();
        registry.publish(10);
        registry.publish(20);
        registry.purge();
        assert_eq!(registry.claim(), None);
        registry.purge();
        assert_eq!(registry.claim(), None);
    }

    #[test]
    fn indices_stay_distinct_across_many_publishes() {
        let registry = SlotRegistry::new();
        for round in 0..10_000u64 {
            registry.publish(round);
            let (read, write) = registry.indices();
            assert_ne!(read, write, "invariant broke after publish {round}");
            assert!(read < 3 && write < 3);
            if round % 3 == 0 {
                registry.claim();
            }
        }
    }

    #[test]
    fn drop_releases_unclaimed_values() {
        struct Tracked(Arc<AtomicUsize>);
        impl Drop for Tracked {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let drops = Arc::new(AtomicUsize::new(0));
        {
            let registry = SlotRegistry::new();
            for _ in 0..5 {
                registry.publish(Tracked(drops.clone()));
            }
            drop(registry.claim());
        }
        assert_eq!(drops.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn concurrent_claims_hand_each_value_out_once() {
        const ROUNDS: u64 = 10_000;
        let registry = Arc::new(SlotRegistry::new());
        let producer = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                for value in 0..ROUNDS {
                    registry.publish(value);
                }
            })
        };

        let consumer = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                let mut seen = Vec::new();
                while seen.last() != Some(&(ROUNDS - 1)) {
                    if let Some(value) = registry.claim() {
                        seen.push(value);
                    } else {
                        thread::yield_now();
                    }
                }
                seen
            })
        };

        producer.join().expect("producer thread panicked");
        let seen = consumer.join().expect("consumer thread panicked");

        // Claims observe publications in order and never repeat one: the
        // sequence must be strictly increasing.
        assert!(
            seen.windows(2).all(|pair| pair[0] < pair[1]),
            "claimed values repeated or went backwards"
        );
        assert_eq!(*seen.last().unwrap(), ROUNDS - 1);
    }

    #[test]
    fn claims_interleaved_with_publishes_stay_fresh() {
        let registry = SlotRegistry::new();
        for round in 0..100u64 {
            registry.publish(round * 2);
            registry.publish(round * 2 + 1);
            // A quiescent claim always sees the newest completed publish.
            assert_eq!(registry.claim(), Some(round * 2 + 1));
            assert_eq!(registry.claim(), None);
        }
    }
}
