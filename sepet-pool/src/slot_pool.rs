use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_epoch::{self as epoch, Atomic, Owned};
use crossbeam_utils::CachePadded;

/// Default slot count of the initial segment.
const SEGMENT_CAPACITY: usize = 11;
/// Capacity multiplier for each newly grown segment.
const GROWTH_FACTOR: f64 = 1.5;

fn grown_capacity(capacity: usize) -> usize {
    (((capacity as f64) * GROWTH_FACTOR).ceil() as usize).max(capacity + 1)
}

/// A single value cell.
///
/// Legal flag sequence: free (neither set), claimed by a producer
/// (`claimed` only), readable (both set), claimed by a consumer
/// (`claimed` only again), free. Whoever wins the flag transition owns
/// the cell until it hands the slot to the next stage.
struct Slot<T> {
    claimed: AtomicBool,
    ready: AtomicBool,
    value: UnsafeCell<Option<T>>,
}

struct Segment<T> {
    slots: Box<[Slot<T>]>,
    next: Atomic<Segment<T>>,
}

impl<T> Segment<T> {
    fn new(capacity: usize) -> Segment<T> {
        let mut slots = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            slots.push(Slot {
                claimed: AtomicBool::new(false),
                ready: AtomicBool::new(false),
                value: UnsafeCell::new(None),
            });
        }
        Segment {
            slots: slots.into_boxed_slice(),
            next: Atomic::null(),
        }
    }
}

/// An unordered pool of values over a growing chain of slot segments.
///
/// `push` claims the first free slot it finds, growing the chain when
/// every slot is occupied; `try_pop` claims the first readable slot.
/// Claims are per-slot flag transitions, so threads contend only when
/// they race for the same slot, not on a shared list head.
pub struct SlotPool<T> {
    /// Chain head. Growth prepends, so the newest, largest segment is
    /// scanned first.
    head: CachePadded<Atomic<Segment<T>>>,
    /// Initial segment capacity; `clear` starts the fresh chain from it.
    capacity: usize,
}

unsafe impl<T: Send> Send for SlotPool<T> {}
unsafe impl<T: Send> Sync for SlotPool<T> {}

impl<T> Default for SlotPool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SlotPool<T> {
    /// Creates a pool with the default initial segment capacity (11).
    pub fn new() -> SlotPool<T> {
        Self::with_segment_capacity(SEGMENT_CAPACITY)
    }

    /// Creates a pool whose initial segment holds `capacity` slots.
    /// Each grown segment is 1.5 times the size of the previous head.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn with_segment_capacity(capacity: usize) -> SlotPool<T> {
        assert!(capacity > 0, "segment capacity must be non-zero");
        SlotPool {
            head: CachePadded::new(Atomic::new(Segment::new(capacity))),
            capacity,
        }
    }

    /// Stores a value in the first free slot, growing the chain if every
    /// slot is occupied.
    pub fn push(&self, value: T) {
        let guard = epoch::pin();
        loop {
            let head = self.head.load(Ordering::Acquire, &guard);
            let head_capacity = unsafe { head.as_ref() }.map_or(0, |s| s.slots.len());

            let mut seg = head;
            while let Some(segment) = unsafe { seg.as_ref() } {
                for slot in segment.slots.iter() {
                    // Test-and-test-and-set keeps losing probes read-only.
                    if !slot.claimed.load(Ordering::Relaxed)
                        && !slot.claimed.swap(true, Ordering::Acquire)
                    {
                        // Claim won: the cell is ours until `ready` flips.
                        unsafe {
                            *slot.value.get() = Some(value);
                        }
                        slot.ready.store(true, Ordering::Release);
                        return;
                    }
                }
                seg = segment.next.load(Ordering::Acquire, &guard);
            }

            // Chain full. Prepend a larger segment; on CAS failure another
            // thread grew first and the rescan may find room there.
            let new_seg = Owned::new(Segment::new(grown_capacity(head_capacity)));
            new_seg.next.store(head, Ordering::Relaxed);
            if let Err(e) =
                self.head
                    .compare_exchange(head, new_seg, Ordering::Release, Ordering::Relaxed, &guard)
            {
                drop(e.new);
            }
        }
    }

    /// Takes some value out of the pool, or returns `None` if no slot was
    /// readable. No ordering among pushed values is promised.
    pub fn try_pop(&self) -> Option<T> {
        let guard = epoch::pin();
        let mut seg = self.head.load(Ordering::Acquire, &guard);
        while let Some(segment) = unsafe { seg.as_ref() } {
            for slot in segment.slots.iter() {
                if slot.ready.load(Ordering::Relaxed) && slot.ready.swap(false, Ordering::Acquire) {
                    // The publishing store put the value in before `ready`
                    // flipped, so the cell is Some here.
                    let value = unsafe { (*slot.value.get()).take() };
                    slot.claimed.store(false, Ordering::Release);
                    return value;
                }
            }
            seg = segment.next.load(Ordering::Acquire, &guard);
        }
        None
    }

    /// Drops every pooled value and shrinks back to a single segment of
    /// the initial capacity.
    ///
    /// The displaced chain is retired through the epoch reclaimer: a push
    /// still scanning it finishes safely, and a value it managed to store
    /// there is dropped with the chain, as if pushed just before the
    /// clear.
    pub fn clear(&self) {
        let guard = epoch::pin();
        let fresh = Owned::new(Segment::new(self.capacity));
        let mut seg = self.head.swap(fresh, Ordering::AcqRel, &guard);
        unsafe {
            while let Some(segment) = seg.as_ref() {
                let next = segment.next.load(Ordering::Acquire, &guard);
                guard.defer_destroy(seg);
                seg = next;
            }
        }
    }
}

impl<T> Drop for SlotPool<T> {
    fn drop(&mut self) {
        // Exclusive access: walk the chain and free each segment, cells
        // and their payloads included.
        unsafe {
            let guard = epoch::unprotected();
            let mut seg = self.head.load(Ordering::Relaxed, guard);
            while !seg.is_null() {
                let next = seg.deref().next.load(Ordering::Relaxed, guard);
                drop(seg.into_owned());
                seg = next;
            }
        }
    }
}
