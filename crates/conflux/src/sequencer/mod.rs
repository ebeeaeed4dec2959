//! In-order finalization of out-of-order work.
//!
//! A [`Sequencer`] hands out slots for an unbounded incoming sequence while
//! bounding the number of concurrently outstanding items. Producers complete
//! their slots in any order; the completion callback observes the payloads
//! strictly in arrival order. This is the building block for pipelines where
//! workers finish out of order but downstream commitment (acknowledgment,
//! persistence, emission) must preserve submission order.

use std::fmt;
use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore;

use crate::config::SequencerConfig;


type CompletionCallback<T> = Box<dyn Fn(T) + Send + Sync>;

/// One buffered unit of the window.
///
/// A slot is `active` from the moment it is assigned until its handle is
/// completed; the sweep then reclaims it.
struct Slot<T> {
    entry: Option<T>,
    active: bool,
}

struct Window<T> {
    slots: Vec<Slot<T>>,
    head: usize,
    tail: usize,
    /// Number of outstanding slots, active or completed but not yet swept.
    len: usize,
}

struct SequencerInner<T> {
    window: Mutex<Window<T>>,
    free_slots: Semaphore,
    on_complete: CompletionCallback<T>,
}

/// A bounded circular buffer enforcing in-order finalization of out-of-order
/// work.
///
/// [`enqueue`](Self::enqueue) assigns the next circular slot and suspends
/// while all `capacity` slots are outstanding. Completing a slot triggers a
/// sweep that delivers the maximal run of completed payloads starting at the
/// oldest outstanding one, so the callback fires in arrival order no matter
/// in which order slots complete.
///
/// The callback is invoked while the internal window lock is held: it must be
/// fast and must not call back into the sequencer, or it would deadlock on
/// that lock. Producers suspended in `enqueue` wait on a semaphore, not the
/// lock, so a well-behaved callback can never deadlock them.
///
/// Delivery order is linearizable on submission index; no fairness guarantee
/// is made among producers blocked on a full window.
pub struct Sequencer<T> {
    inner: Arc<SequencerInner<T>>,
}

// https://github.com/rust-lang/rust/issues/26925
impl<T> Clone for Sequencer<T> {
    fn clone(&self) -> Self {
        Sequencer {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Sequencer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let outstanding = self
            .inner
            .window
            .try_lock()
            .map(|window| window.len)
            .unwrap_or_default();
        f.debug_struct("Sequencer")
            .field("outstanding", &outstanding)
            .finish()
    }
}

impl<T> Sequencer<T> {
    /// Creates a sequencer with `capacity` slots.
    ///
    /// The callback is invoked with each payload, in arrival order.
    ///
    /// # Panics
    ///
    /// Panics when `capacity` is 0; misconfiguration fails at construction,
    /// not at use.
    pub fn new(capacity: usize, on_complete: impl Fn(T) + Send + Sync + 'static) -> Self {
        assert!(capacity > 0, "sequencer capacity must be at least 1");

        let slots = (0..capacity)
            .map(|_| Slot {
                entry: None,
                active: false,
            })
            .collect();

        Sequencer {
            inner: Arc::new(SequencerInner {
                window: Mutex::new(Window {
                    slots,
                    head: 0,
                    tail: 0,
                    len: 0,
                }),
                free_slots: Semaphore::new(capacity),
                on_complete: Box::new(on_complete),
            }),
        }
    }

    /// Creates a sequencer from a [`SequencerConfig`].
    ///
    /// # Panics
    ///
    /// Panics when the configured capacity is 0, like [`new`](Self::new).
    pub fn from_config(
        config: &SequencerConfig,
        on_complete: impl Fn(T) + Send + Sync + 'static,
    ) -> Self {
        Self::new(config.capacity, on_complete)
    }

    /// Assigns the next slot to `payload`, suspending while the window is
    /// full.
    ///
    /// Arrival order is the order in which concurrent calls win the internal
    /// lock. The returned handle must be completed for the window to advance
    /// past its slot; there is no timeout, so liveness is the caller's
    /// responsibility.
    pub async fn enqueue(&self, payload: T) -> SlotHandle<T> {
        // The semaphore tracks free slots and is never closed.
        let permit = self
            .inner
            .free_slots
            .acquire()
            .await
            .expect("the slot semaphore is never closed");
        permit.forget();

        let mut window = self.inner.window.lock().unwrap();
        let position = window.tail;
        debug_assert!(!window.slots[position].active);
        window.slots[position] = Slot {
            entry: Some(payload),
            active: true,
        };
        window.tail = (window.tail + 1) % window.slots.len();
        window.len += 1;

        SlotHandle {
            inner: Arc::clone(&self.inner),
            position,
            completed: false,
        }
    }
}

impl<T> SequencerInner<T> {
    fn finish(&self, position: usize) {
        let mut window = self.window.lock().unwrap();
        window.slots[position].active = false;
        let reclaimed = self.sweep(&mut window);
        drop(window);

        if reclaimed > 0 {
            self.free_slots.add_permits(reclaimed);
        }
    }

    /// Delivers the maximal run of completed slots starting at the head.
    ///
    /// Runs with the window lock held, so the callback does as well.
    /// Amortized O(1) per completion; O(capacity) when a long run completed
    /// silently behind the still-outstanding oldest item.
    fn sweep(&self, window: &mut Window<T>) -> usize {
        let mut reclaimed = 0;
        while window.len > 0 && !window.slots[window.head].active {
            if let Some(entry) = window.slots[window.head].entry.take() {
                (self.on_complete)(entry);
            }
            window.head = (window.head + 1) % window.slots.len();
            window.len -= 1;
            reclaimed += 1;
        }
        reclaimed
    }
}

/// A one-shot completion marker for one enqueued payload.
///
/// Exclusively owned by the producer that received it until completion.
/// [`complete`](Self::complete) is idempotent. A handle dropped without
/// completion stalls the window behind its slot and logs a warning; the
/// sequencer never reclaims such a slot on its own.
pub struct SlotHandle<T> {
    inner: Arc<SequencerInner<T>>,
    position: usize,
    completed: bool,
}

impl<T> SlotHandle<T> {
    /// Marks this slot as processed and delivers every payload whose
    /// predecessors have all completed.
    ///
    /// Completing an already completed handle is a no-op, not an error.
    pub fn complete(&mut self) {
        if self.completed {
            return;
        }
        self.completed = true;
        self.inner.finish(self.position);
    }
}

impl<T> Drop for SlotHandle<T> {
    fn drop(&mut self) {
        if !self.completed {
            tracing::warn!(
                position = self.position,
                "slot handle dropped without completion, the window will stall behind it"
            );
        }
    }
}

impl<T> fmt::Debug for SlotHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotHandle")
            .field("position", &self.position)
            .field("completed", &self.completed)
            .finish()
    }
}
