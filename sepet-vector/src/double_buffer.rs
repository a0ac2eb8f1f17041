//! The double-buffered vector.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use crossbeam_utils::{Backoff, CachePadded};
use parking_lot::Mutex;
use sepet::Stack;

/// Default initial slot capacity of a new vector.
const INITIAL_CAPACITY: usize = 7;
/// Capacity multiplier applied when a full slot vector grows.
const GROWTH_FACTOR: f64 = 1.5;

fn grown_capacity(capacity: usize) -> usize {
    (((capacity as f64) * GROWTH_FACTOR).ceil() as usize).max(capacity + 1)
}

/// One of the two element-pointer buffers.
///
/// While a buffer holds the read role its slot vector is immutable; the
/// writer rewrites it only after both quiescent points of a commit, when
/// no reader can still be traversing it.
struct Buffer<T> {
    slots: UnsafeCell<Vec<*mut T>>,
    /// Element count, loaded by readers for the bounds check.
    len: AtomicUsize,
}

impl<T> Buffer<T> {
    fn alloc(capacity: usize) -> *mut Buffer<T> {
        Box::into_raw(Box::new(Buffer {
            slots: UnsafeCell::new(Vec::with_capacity(capacity)),
            len: AtomicUsize::new(0),
        }))
    }
}

/// Writer-role state, guarded by the writer mutex.
struct Writer<T> {
    /// The buffer currently in the write role. Swaps with the published
    /// buffer at every commit.
    write: *mut Buffer<T>,
}

/// An element pointer displaced from the write buffer, parked until the
/// commit's reclamation step frees it.
struct Retired<T>(*mut T);

unsafe impl<T: Send> Send for Retired<T> {}

/// Decrements the reader count on exit, including panic unwinds out of a
/// `Clone` impl.
struct ReadGuard<'a, T> {
    vec: &'a DoubleBufferVec<T>,
}

impl<'a, T> ReadGuard<'a, T> {
    fn enter(vec: &'a DoubleBufferVec<T>) -> ReadGuard<'a, T> {
        vec.readers.fetch_add(1, Ordering::SeqCst);
        ReadGuard { vec }
    }
}

impl<T> Drop for ReadGuard<'_, T> {
    fn drop(&mut self) {
        self.vec.readers.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A dynamic array with wait-free positional reads and mutex-serialized
/// writes.
///
/// Two buffers of element pointers trade the read and write roles. Every
/// mutation runs against the write buffer, publishes it with one atomic
/// swap, waits out the readers of the displaced buffer, frees displaced
/// elements, and mirrors the result so the roles can trade again.
///
/// Readers never lock and never retry more than a role swap forces them
/// to; a read costs two counter updates, a pointer load, and a verifying
/// compare-exchange.
pub struct DoubleBufferVec<T> {
    /// The published buffer readers go through.
    read: CachePadded<AtomicPtr<Buffer<T>>>,
    /// In-flight reader count; commits wait for it to reach zero.
    readers: CachePadded<AtomicUsize>,
    writer: Mutex<Writer<T>>,
    /// Displaced element pointers awaiting the reclamation step.
    retired: Stack<Retired<T>>,
}

unsafe impl<T: Send> Send for DoubleBufferVec<T> {}
unsafe impl<T: Send + Sync> Sync for DoubleBufferVec<T> {}

impl<T> Default for DoubleBufferVec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> DoubleBufferVec<T> {
    /// Creates an empty vector with the default initial capacity (7).
    pub fn new() -> DoubleBufferVec<T> {
        Self::with_capacity(INITIAL_CAPACITY)
    }

    /// Creates an empty vector with room for `capacity` elements in each
    /// buffer before the first growth.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn with_capacity(capacity: usize) -> DoubleBufferVec<T> {
        assert!(capacity > 0, "capacity must be non-zero");
        DoubleBufferVec {
            read: CachePadded::new(AtomicPtr::new(Buffer::alloc(capacity))),
            readers: CachePadded::new(AtomicUsize::new(0)),
            writer: Mutex::new(Writer {
                write: Buffer::alloc(capacity),
            }),
            retired: Stack::new(),
        }
    }

    /// Returns the number of elements in the published buffer.
    pub fn len(&self) -> usize {
        let buf = self.read.load(Ordering::SeqCst);
        unsafe { (*buf).len.load(Ordering::Acquire) }
    }

    /// Returns `true` if the published buffer holds no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends a value at the end of the vector.
    pub fn push_back(&self, value: T) {
        let mut writer = self.writer.lock();
        let elem = Box::into_raw(Box::new(value));
        unsafe {
            let buf = &*writer.write;
            let slots = &mut *buf.slots.get();
            if slots.len() == slots.capacity() {
                slots.reserve_exact(grown_capacity(slots.capacity()) - slots.capacity());
            }
            slots.push(elem);
            buf.len.store(slots.len(), Ordering::Relaxed);
        }
        self.commit(&mut writer);
    }

    /// Removes the last element. Returns `false` if the vector was empty.
    pub fn try_pop_back(&self) -> bool {
        let mut writer = self.writer.lock();
        unsafe {
            let buf = &*writer.write;
            let slots = &mut *buf.slots.get();
            match slots.pop() {
                Some(elem) => {
                    buf.len.store(slots.len(), Ordering::Relaxed);
                    self.retired.push(Retired(elem));
                }
                None => return false,
            }
        }
        self.commit(&mut writer);
        true
    }

    /// Inserts a value before the element at `position`, shifting the rest
    /// one slot towards the back. Returns `false` if `position` is out of
    /// bounds.
    pub fn try_insert(&self, position: usize, value: T) -> bool {
        let mut writer = self.writer.lock();
        unsafe {
            let buf = &*writer.write;
            let slots = &mut *buf.slots.get();
            if position >= slots.len() {
                return false;
            }
            if slots.len() == slots.capacity() {
                slots.reserve_exact(grown_capacity(slots.capacity()) - slots.capacity());
            }
            slots.insert(position, Box::into_raw(Box::new(value)));
            buf.len.store(slots.len(), Ordering::Relaxed);
        }
        self.commit(&mut writer);
        true
    }

    /// Removes the element at `position`, shifting the rest one slot
    /// towards the front. Returns `false` if `position` is out of bounds.
    pub fn try_erase(&self, position: usize) -> bool {
        let mut writer = self.writer.lock();
        unsafe {
            let buf = &*writer.write;
            let slots = &mut *buf.slots.get();
            if position >= slots.len() {
                return false;
            }
            let elem = slots.remove(position);
            buf.len.store(slots.len(), Ordering::Relaxed);
            self.retired.push(Retired(elem));
        }
        self.commit(&mut writer);
        true
    }

    /// Removes every element.
    pub fn clear(&self) {
        let mut writer = self.writer.lock();
        unsafe {
            let buf = &*writer.write;
            let slots = &mut *buf.slots.get();
            for &elem in slots.iter() {
                self.retired.push(Retired(elem));
            }
            slots.clear();
            buf.len.store(0, Ordering::Relaxed);
        }
        self.commit(&mut writer);
    }

    /// Returns an iterator over positions `0..len` as of the call, yielding
    /// `Some(value)` for positions still occupied and `None` for positions
    /// vacated since.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            vec: self,
            index: 0,
            len: self.len(),
        }
    }

    /// Publishes the write buffer, retires the displaced one, and mirrors.
    /// Caller holds the writer lock.
    ///
    /// Order is load-bearing: publish first, then quiesce, then free, then
    /// quiesce again, then rewrite the displaced buffer. Retired elements
    /// may still be referenced by the displaced buffer's slots and by any
    /// reader that entered before the swap; both are gone after the first
    /// quiescent point.
    fn commit(&self, writer: &mut Writer<T>) {
        let publish = writer.write;
        let displaced = self.read.swap(publish, Ordering::SeqCst);

        self.quiesce();
        while let Some(Retired(elem)) = self.retired.try_pop() {
            unsafe { drop(Box::from_raw(elem)) };
        }
        self.quiesce();

        unsafe {
            let src = &*publish;
            let dst = &*displaced;
            let src_slots = &*src.slots.get();
            let dst_slots = &mut *dst.slots.get();
            dst_slots.clear();
            dst_slots.extend_from_slice(src_slots);
            dst.len.store(src.len.load(Ordering::Relaxed), Ordering::Relaxed);
        }
        writer.write = displaced;
    }

    /// Waits until no reader is in flight.
    ///
    /// The SeqCst pairing with the reader side forbids the interleaving
    /// where a reader holds the old buffer pointer while the writer reads
    /// a zero count.
    fn quiesce(&self) {
        let backoff = Backoff::new();
        while self.readers.load(Ordering::SeqCst) != 0 {
            backoff.snooze();
        }
    }
}

impl<T: Clone> DoubleBufferVec<T> {
    /// Returns a copy of the element at `index`, or `None` if `index` is
    /// out of bounds.
    ///
    /// Wait-free with respect to writers: a concurrent commit costs at
    /// most one retry of the pointer load.
    pub fn try_at(&self, index: usize) -> Option<T> {
        let _guard = ReadGuard::enter(self);
        loop {
            let buf = self.read.load(Ordering::SeqCst);
            unsafe {
                if index >= (*buf).len.load(Ordering::Acquire) {
                    return None;
                }
                let elem = (&*(*buf).slots.get())[index];
                // Verify the buffer kept the read role while we indexed
                // it; a swap in between invalidates the element pointer.
                if self
                    .read
                    .compare_exchange(buf, buf, Ordering::SeqCst, Ordering::SeqCst)
                    .is_err()
                {
                    continue;
                }
                // The guard holds reclamation back until we return, so
                // the pointee stays alive through the clone.
                return Some((*elem).clone());
            }
        }
    }
}

impl<T: PartialEq> DoubleBufferVec<T> {
    /// Removes the element at `position` only if it equals `expected`.
    /// Returns `false` if `position` is out of bounds or the element
    /// differs.
    ///
    /// The comparison and the removal happen under the writer lock, so no
    /// other mutation can slip between them.
    pub fn test_and_erase(&self, position: usize, expected: &T) -> bool {
        let mut writer = self.writer.lock();
        unsafe {
            let buf = &*writer.write;
            let slots = &mut *buf.slots.get();
            if position >= slots.len() || *slots[position] != *expected {
                return false;
            }
            let elem = slots.remove(position);
            buf.len.store(slots.len(), Ordering::Relaxed);
            self.retired.push(Retired(elem));
        }
        self.commit(&mut writer);
        true
    }
}

impl<T> Drop for DoubleBufferVec<T> {
    fn drop(&mut self) {
        // Exclusive access. Between commits both buffers hold the same
        // element pointers, so the elements are freed once through the
        // published buffer only.
        let read = *self.read.get_mut();
        let write = self.writer.get_mut().write;
        unsafe {
            let buf = Box::from_raw(read);
            for &elem in (*buf.slots.get()).iter() {
                drop(Box::from_raw(elem));
            }
            drop(buf);
            drop(Box::from_raw(write));
        }
        while let Some(Retired(elem)) = self.retired.try_pop() {
            unsafe { drop(Box::from_raw(elem)) };
        }
    }
}

/// Iterator returned by [`DoubleBufferVec::iter`].
///
/// The length is snapshotted when the iterator is created; each `next`
/// performs an independent positional read.
pub struct Iter<'a, T> {
    vec: &'a DoubleBufferVec<T>,
    index: usize,
    len: usize,
}

impl<T: Clone> Iterator for Iter<'_, T> {
    type Item = Option<T>;

    fn next(&mut self) -> Option<Option<T>> {
        if self.index >= self.len {
            return None;
        }
        let item = self.vec.try_at(self.index);
        self.index += 1;
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.len - self.index;
        (remaining, Some(remaining))
    }
}
