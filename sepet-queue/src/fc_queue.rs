use std::cell::UnsafeCell;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU64, AtomicU8, Ordering};
use std::time::{Duration, Instant};

use crossbeam_utils::{Backoff, CachePadded};
use sepet::{tid, Stack};

/// Passes an idle record may lag behind the pass counter before the
/// combiner unlinks it from the publication list.
const STALENESS: u64 = 100;

/// Record state: no request outstanding.
const IDLE: u8 = 0;
/// Record state: owner filed a push; the value cell holds the payload.
const PUSH_REQ: u8 = 1;
/// Record state: owner filed a pop.
const POP_REQ: u8 = 2;
/// Record state: the combiner claimed the request and is executing it.
const EXEC: u8 = 3;
/// Record state: push served.
const RESP_PUSH: u8 = 4;
/// Record state: pop served; the value cell holds the payload.
const RESP_POP: u8 = 5;
/// Record state: pop served; the queue was observed empty.
const RESP_POP_EMPTY: u8 = 6;

/// One publication record per thread index.
///
/// The record is written by its owning thread while `state` is `IDLE` and
/// by the combiner once a request tag is visible. Records live as long as
/// the queue: eviction unlinks them from the publication list but never
/// frees them, so a combiner traversal can never touch freed memory.
struct Record<T> {
    state: AtomicU8,
    /// Publication-list membership. Cleared by the combiner strictly after
    /// the unlink, so the owner may re-link the moment it reads `false`.
    active: AtomicBool,
    /// Pass number of the last service, stamped by the combiner.
    age: AtomicU64,
    next: AtomicPtr<Record<T>>,
    value: UnsafeCell<Option<T>>,
}

/// FIFO list node. Touched only while holding the combiner lock, except
/// for the head pointer's null check in `is_empty`.
struct Node<T> {
    value: Option<T>,
    next: *mut Node<T>,
}

/// A dequeued node parked on the free stack between uses. The pointer is
/// a unique owner; it changes hands whole through the stack.
struct FreeNode<T>(*mut Node<T>);

unsafe impl<T: Send> Send for FreeNode<T> {}

/// Combiner-only state, protected by the combiner lock.
struct Inner<T> {
    tail: *mut Node<T>,
    passes: u64,
}

enum Outcome<T> {
    Pushed,
    Popped(T),
    Empty,
    /// Deadline hit before the request was claimed. Carries the payload
    /// back for a withdrawn push.
    Expired(Option<T>),
}

/// A FIFO queue based on flat combining.
///
/// Callers publish their operation to a per-thread record and spin; one
/// caller at a time takes the combiner lock and executes every published
/// request against a private linked list. Per-thread FIFO order holds, and
/// cross-thread order follows the combiner's traversal of the publication
/// list rather than arrival time.
pub struct FcQueue<T> {
    /// Publication list head. Owners prepend with CAS; only the combiner
    /// unlinks.
    pub_head: CachePadded<AtomicPtr<Record<T>>>,
    /// The combiner lock (test-and-set).
    combiner: CachePadded<AtomicBool>,
    /// FIFO list head. Atomic only so `is_empty` is a defined racy load;
    /// it is dereferenced exclusively under the combiner lock.
    head: CachePadded<AtomicPtr<Node<T>>>,
    /// FIFO tail and the pass counter, combiner-only.
    inner: UnsafeCell<Inner<T>>,
    /// Recycled FIFO nodes. Dequeued nodes are parked here and reused by
    /// later pushes; the queue's `Drop` frees whatever is left.
    free: Stack<FreeNode<T>>,
    /// One record per thread index, allocated up front, never freed while
    /// the queue lives.
    records: Box<[CachePadded<Record<T>>]>,
    staleness: u64,
}

unsafe impl<T: Send> Send for FcQueue<T> {}
unsafe impl<T: Send> Sync for FcQueue<T> {}

impl<T> Default for FcQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> FcQueue<T> {
    /// Creates a new empty queue with the default record staleness
    /// threshold (100 combining passes).
    pub fn new() -> FcQueue<T> {
        Self::with_staleness(STALENESS)
    }

    /// Creates a new empty queue whose idle publication records are
    /// unlinked after lagging `passes` combining passes.
    ///
    /// Small values keep the publication list short when many threads use
    /// the queue sporadically; large values spare steady threads the
    /// re-linking CAS.
    pub fn with_staleness(passes: u64) -> FcQueue<T> {
        let mut records = Vec::with_capacity(tid::MAX_THREADS);
        for _ in 0..tid::MAX_THREADS {
            records.push(CachePadded::new(Record {
                state: AtomicU8::new(IDLE),
                active: AtomicBool::new(false),
                age: AtomicU64::new(0),
                next: AtomicPtr::new(ptr::null_mut()),
                value: UnsafeCell::new(None),
            }));
        }

        FcQueue {
            pub_head: CachePadded::new(AtomicPtr::new(ptr::null_mut())),
            combiner: CachePadded::new(AtomicBool::new(false)),
            head: CachePadded::new(AtomicPtr::new(ptr::null_mut())),
            inner: UnsafeCell::new(Inner {
                tail: ptr::null_mut(),
                passes: 0,
            }),
            free: Stack::new(),
            records: records.into_boxed_slice(),
            staleness: passes,
        }
    }

    /// Pushes a value onto the back of the queue.
    pub fn push(&self, value: T) {
        self.run(PUSH_REQ, Some(value), None);
    }

    /// Pops the value at the front of the queue, or returns `None` if the
    /// queue was observed empty.
    pub fn try_pop(&self) -> Option<T> {
        match self.run(POP_REQ, None, None) {
            Outcome::Popped(value) => Some(value),
            _ => None,
        }
    }

    /// Like [`push`](Self::push), but gives up once `timeout` has elapsed
    /// without the request being served, returning the value back.
    ///
    /// A request that the combiner has already started executing is always
    /// carried to completion, so `Ok` may be returned slightly past the
    /// deadline; the pushed value is never lost and never delivered twice.
    pub fn push_timeout(&self, value: T, timeout: Duration) -> Result<(), T> {
        match self.run(PUSH_REQ, Some(value), Some(Instant::now() + timeout)) {
            Outcome::Expired(Some(value)) => Err(value),
            _ => Ok(()),
        }
    }

    /// Like [`try_pop`](Self::try_pop), but bounds the wait for a combiner:
    /// returns `None` once `timeout` has elapsed without the request being
    /// served. A response that lands concurrently with the deadline is
    /// consumed and returned, never dropped.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        match self.run(POP_REQ, None, Some(Instant::now() + timeout)) {
            Outcome::Popped(value) => Some(value),
            _ => None,
        }
    }

    /// Returns `true` if the queue was observed empty.
    ///
    /// Best-effort snapshot: concurrent pushes and pops may invalidate the
    /// answer before the caller can act on it.
    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire).is_null()
    }

    /// Publishes one request and waits for its response, combining along
    /// the way when the lock is free.
    fn run(&self, request: u8, value: Option<T>, deadline: Option<Instant>) -> Outcome<T> {
        let rec: &Record<T> = &self.records[tid::current()];

        // The record is exclusively ours while IDLE: the combiner only
        // touches it after observing a request tag.
        unsafe {
            *rec.value.get() = value;
        }
        rec.state.store(request, Ordering::Release);
        self.ensure_linked(rec);

        let backoff = Backoff::new();
        loop {
            match rec.state.load(Ordering::Acquire) {
                RESP_PUSH => {
                    rec.state.store(IDLE, Ordering::Relaxed);
                    return Outcome::Pushed;
                }
                RESP_POP => {
                    // The combiner stored the payload before flipping the
                    // tag, and the Acquire above pairs with that Release.
                    let value = unsafe { (*rec.value.get()).take() };
                    rec.state.store(IDLE, Ordering::Relaxed);
                    match value {
                        Some(value) => return Outcome::Popped(value),
                        None => return Outcome::Empty,
                    }
                }
                RESP_POP_EMPTY => {
                    rec.state.store(IDLE, Ordering::Relaxed);
                    return Outcome::Empty;
                }
                _ => {}
            }

            // Evicted while waiting: the combiner unlinks strictly before
            // clearing `active`, so a false read here means the record is
            // out of the list and safe to prepend again.
            if !rec.active.load(Ordering::Acquire) {
                self.ensure_linked(rec);
            }

            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    // Withdraw. The CAS only succeeds while the request is
                    // still unclaimed; failure means the combiner got there
                    // first and a response is imminent, so loop to take it.
                    if rec
                        .state
                        .compare_exchange(request, IDLE, Ordering::SeqCst, Ordering::Relaxed)
                        .is_ok()
                    {
                        let value = unsafe { (*rec.value.get()).take() };
                        return Outcome::Expired(value);
                    }
                    continue;
                }
            }

            if self.try_lock() {
                self.combine();
                self.unlock();
                // The pass very likely served our own request.
                continue;
            }

            backoff.snooze();
        }
    }

    /// Links the record into the publication list if it is not already in
    /// it. Only the owning thread calls this.
    fn ensure_linked(&self, rec: &Record<T>) {
        if rec.active.load(Ordering::Acquire) {
            return;
        }
        rec.active.store(true, Ordering::Relaxed);

        let rec_ptr = rec as *const Record<T> as *mut Record<T>;
        let backoff = Backoff::new();
        loop {
            let head = self.pub_head.load(Ordering::Acquire);
            rec.next.store(head, Ordering::Relaxed);
            if self
                .pub_head
                .compare_exchange(head, rec_ptr, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
            backoff.spin();
        }
    }

    #[inline]
    fn try_lock(&self) -> bool {
        // Test phase first so contended acquisition spins in cache.
        !self.combiner.load(Ordering::Relaxed) && !self.combiner.swap(true, Ordering::Acquire)
    }

    #[inline]
    fn unlock(&self) {
        self.combiner.store(false, Ordering::Release);
    }

    /// One combining pass. Caller must hold the combiner lock, which makes
    /// `inner`, every FIFO node, and all interior publication links ours
    /// exclusively until release.
    fn combine(&self) {
        let inner = unsafe { &mut *self.inner.get() };
        inner.passes += 1;
        let passes = inner.passes;

        let mut prev: *mut Record<T> = ptr::null_mut();
        let mut curr = self.pub_head.load(Ordering::Acquire);

        while !curr.is_null() {
            let rec = unsafe { &*curr };
            let next = rec.next.load(Ordering::Acquire);
            let state = rec.state.load(Ordering::Acquire);

            match state {
                PUSH_REQ | POP_REQ => {
                    // Claim before touching the payload, so a timed-out
                    // owner cannot withdraw a request we are executing.
                    if rec
                        .state
                        .compare_exchange(state, EXEC, Ordering::SeqCst, Ordering::Relaxed)
                        .is_ok()
                    {
                        rec.age.store(passes, Ordering::Relaxed);
                        if state == PUSH_REQ {
                            if let Some(value) = unsafe { (*rec.value.get()).take() } {
                                self.enqueue(inner, value);
                            }
                            rec.state.store(RESP_PUSH, Ordering::Release);
                        } else {
                            match self.dequeue(inner) {
                                Some(value) => {
                                    unsafe {
                                        *rec.value.get() = Some(value);
                                    }
                                    rec.state.store(RESP_POP, Ordering::Release);
                                }
                                None => rec.state.store(RESP_POP_EMPTY, Ordering::Release),
                            }
                        }
                    }
                    prev = curr;
                }
                IDLE => {
                    let age = rec.age.load(Ordering::Relaxed);
                    if passes.saturating_sub(age) > self.staleness && self.unlink(prev, curr, next)
                    {
                        // Unlink first, deactivate second. An owner that
                        // reads `active == false` can then safely prepend.
                        rec.active.store(false, Ordering::Release);
                        // prev stands: curr is no longer in the list.
                        curr = next;
                        continue;
                    }
                    prev = curr;
                }
                _ => {
                    // In-flight or unconsumed response; leave it alone.
                    prev = curr;
                }
            }
            curr = next;
        }
    }

    /// Removes `curr` from the publication list. Reports whether the
    /// record actually left the list.
    fn unlink(&self, prev: *mut Record<T>, curr: *mut Record<T>, next: *mut Record<T>) -> bool {
        if prev.is_null() {
            // Head unlink races with owner prepends; skip this round if one
            // slipped in, the record will still be stale next pass.
            self.pub_head
                .compare_exchange(curr, next, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
        } else {
            // Interior links are written only under the combiner lock.
            unsafe { (*prev).next.store(next, Ordering::Release) };
            true
        }
    }

    /// Appends a value to the FIFO list, reusing a parked node when one is
    /// available. Combiner only.
    fn enqueue(&self, inner: &mut Inner<T>, value: T) {
        let node = match self.free.try_pop() {
            Some(FreeNode(node)) => unsafe {
                (*node).value = Some(value);
                (*node).next = ptr::null_mut();
                node
            },
            None => Box::into_raw(Box::new(Node {
                value: Some(value),
                next: ptr::null_mut(),
            })),
        };

        if inner.tail.is_null() {
            self.head.store(node, Ordering::Release);
        } else {
            unsafe { (*inner.tail).next = node };
        }
        inner.tail = node;
    }

    /// Takes the value at the front of the FIFO list and parks the node on
    /// the free stack. Combiner only.
    fn dequeue(&self, inner: &mut Inner<T>) -> Option<T> {
        let head = self.head.load(Ordering::Relaxed);
        if head.is_null() {
            return None;
        }
        unsafe {
            let value = (*head).value.take();
            let next = (*head).next;
            self.head.store(next, Ordering::Release);
            if next.is_null() {
                inner.tail = ptr::null_mut();
            }
            self.free.push(FreeNode(head));
            value
        }
    }
}

impl<T> Drop for FcQueue<T> {
    fn drop(&mut self) {
        // Exclusive access: free the FIFO list, payloads included, and
        // then every node parked on the free stack.
        let mut curr = *self.head.get_mut();
        while !curr.is_null() {
            let node = unsafe { Box::from_raw(curr) };
            curr = node.next;
        }
        while let Some(FreeNode(node)) = self.free.try_pop() {
            unsafe { drop(Box::from_raw(node)) };
        }
    }
}
