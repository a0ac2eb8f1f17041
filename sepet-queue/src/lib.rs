//! Flat-combining FIFO queue.
//!
//! Instead of contending on head/tail pointers, callers publish their
//! operation to a shared record list and one thread at a time (the
//! combiner) executes the published batch against a private linked list.
//! One cache-line transfer per batch instead of one per operation.
//!
//! ## Usage
//!
//! ```rust
//! use sepet_queue::FcQueue;
//!
//! let q = FcQueue::new();
//! q.push(1);
//! q.push(2);
//! assert_eq!(q.try_pop(), Some(1));
//! assert_eq!(q.try_pop(), Some(2));
//! assert_eq!(q.try_pop(), None);
//! ```

pub mod fc_queue;

pub use fc_queue::FcQueue;
