//! Lock-free LIFO stack.
//!
//! A Treiber stack: nodes are linked through their `next` pointers and the
//! head is the single point of contention. Push and pop are CAS loops on the
//! head; a popped node is handed to the epoch collector instead of being
//! freed inline, so a thread still holding the node as its expected head can
//! never dereference freed memory.

use std::mem::ManuallyDrop;
use std::ptr;
use std::sync::atomic::Ordering;

use crossbeam_epoch::{self as epoch, Atomic, Owned};
use crossbeam_utils::{Backoff, CachePadded};

struct Node<T> {
    // The value moves out through `ptr::read` on pop, so the node must not
    // drop it again when the epoch collector destroys the allocation.
    value: ManuallyDrop<T>,
    next: Atomic<Node<T>>,
}

/// A lock-free LIFO stack.
///
/// Operations never block. `push` and `try_pop` retry internally on CAS
/// failure; the retries are invisible to the caller and unbounded only in
/// the theoretical worst case (lock-freedom, not wait-freedom).
pub struct Stack<T> {
    head: CachePadded<Atomic<Node<T>>>,
}

unsafe impl<T: Send> Send for Stack<T> {}
unsafe impl<T: Send> Sync for Stack<T> {}

impl<T> Stack<T> {
    /// Creates a new empty stack.
    pub const fn new() -> Self {
        Self {
            head: CachePadded::new(Atomic::null()),
        }
    }

    /// Pushes a value onto the stack.
    pub fn push(&self, value: T) {
        let mut node = Owned::new(Node {
            value: ManuallyDrop::new(value),
            next: Atomic::null(),
        });
        let guard = epoch::pin();
        let backoff = Backoff::new();

        loop {
            let head = self.head.load(Ordering::Acquire, &guard);
            node.next.store(head, Ordering::Relaxed);

            match self.head.compare_exchange(
                head,
                node,
                Ordering::Release,
                Ordering::Acquire,
                &guard,
            ) {
                Ok(_) => return,
                Err(e) => node = e.new,
            }
            backoff.spin();
        }
    }

    /// Pops the most recently pushed value, or returns `None` if the stack
    /// was observed empty.
    pub fn try_pop(&self) -> Option<T> {
        let guard = epoch::pin();
        let backoff = Backoff::new();

        loop {
            let head = self.head.load(Ordering::Acquire, &guard);

            match unsafe { head.as_ref() } {
                Some(h) => {
                    let next = h.next.load(Ordering::Relaxed, &guard);

                    if self
                        .head
                        .compare_exchange(
                            head,
                            next,
                            Ordering::Release,
                            Ordering::Acquire,
                            &guard,
                        )
                        .is_ok()
                    {
                        // The CAS winner owns the node exclusively. Move the
                        // value out and let the collector free the node once
                        // no pinned thread can still observe it.
                        unsafe {
                            let value = ptr::read(&*h.value);
                            guard.defer_destroy(head);
                            return Some(value);
                        }
                    }
                }
                None => return None,
            }
            backoff.spin();
        }
    }

    /// Returns `true` if the stack was observed empty.
    ///
    /// Best-effort snapshot: the answer may be stale by the time the caller
    /// acts on it.
    pub fn is_empty(&self) -> bool {
        let guard = epoch::pin();
        self.head.load(Ordering::Acquire, &guard).is_null()
    }
}

impl<T> Default for Stack<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for Stack<T> {
    fn drop(&mut self) {
        // Exclusive access: walk the list and free nodes directly, dropping
        // the values the pops never took.
        unsafe {
            let guard = epoch::unprotected();
            let mut current = self.head.load(Ordering::Relaxed, guard);

            while !current.is_null() {
                let next = current.deref().next.load(Ordering::Relaxed, guard);
                let mut node = current.into_owned();
                ManuallyDrop::drop(&mut node.value);
                drop(node);
                current = next;
            }
        }
    }
}
