//! Thread index registry.
//!
//! Containers that keep per-thread state (the flat-combining queue's
//! publication records) need a dense, stable index for the calling thread.
//! Indices are allocated lazily on first use, recycled when the thread
//! exits, and bounded by [`MAX_THREADS`]. Two containers sharing the
//! registry is fine: the index identifies the thread, each container owns
//! its per-index state.

use std::cell::Cell;
use std::sync::atomic::{AtomicUsize, Ordering};

use once_cell::race::OnceBox;
use parking_lot::Mutex;

/// Maximum number of threads that can hold an index at the same time.
pub const MAX_THREADS: usize = 128;

struct Registry {
    /// Next never-used index.
    next: AtomicUsize,
    /// Indices returned by exited threads, handed out before `next` grows.
    recycled: Mutex<Vec<usize>>,
}

impl Registry {
    fn alloc(&self) -> usize {
        {
            let mut recycled = self.recycled.lock();
            if let Some(tid) = recycled.pop() {
                return tid;
            }
        }
        let tid = self.next.fetch_add(1, Ordering::Relaxed);
        assert!(
            tid < MAX_THREADS,
            "sepet: exceeded maximum thread count ({MAX_THREADS})"
        );
        tid
    }

    fn release(&self, tid: usize) {
        self.recycled.lock().push(tid);
    }
}

static REGISTRY: OnceBox<Registry> = OnceBox::new();

#[inline]
fn registry() -> &'static Registry {
    REGISTRY.get_or_init(|| {
        Box::new(Registry {
            next: AtomicUsize::new(0),
            recycled: Mutex::new(Vec::new()),
        })
    })
}

/// Hands the index back when the thread exits.
struct Slot {
    tid: Cell<Option<usize>>,
}

impl Drop for Slot {
    fn drop(&mut self) {
        if let Some(tid) = self.tid.get() {
            registry().release(tid);
        }
    }
}

thread_local! {
    static SLOT: Slot = const {
        Slot {
            tid: Cell::new(None),
        }
    };
}

/// Returns the calling thread's dense index, allocating one on first use.
///
/// The index is stable for the thread's lifetime and strictly less than
/// [`MAX_THREADS`]. After the thread exits, the index may be reissued to a
/// new thread.
///
/// # Panics
///
/// Panics if more than [`MAX_THREADS`] threads hold an index at once.
#[inline]
pub fn current() -> usize {
    SLOT.with(|slot| match slot.tid.get() {
        Some(tid) => tid,
        None => {
            let tid = registry().alloc();
            slot.tid.set(Some(tid));
            tid
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stable_within_thread() {
        let a = current();
        let b = current();
        assert_eq!(a, b);
        assert!(a < MAX_THREADS);
    }

    #[test]
    fn test_distinct_across_threads() {
        let mine = current();
        let theirs = std::thread::spawn(current).join().unwrap();
        assert_ne!(mine, theirs);
    }
}
