//! An order-agnostic pool of values.
//!
//! [`SlotPool`] trades ordering away for contention spread: producers and
//! consumers probe a chain of fixed-size segments for the first slot they
//! can claim, instead of serializing on a shared head or tail. `try_pop`
//! returns *some* previously pushed value, with no promise about which.
//!
//! # Usage
//!
//! ```
//! use sepet_pool::SlotPool;
//!
//! let pool = SlotPool::new();
//! pool.push(1);
//! pool.push(2);
//!
//! let mut got = vec![pool.try_pop().unwrap(), pool.try_pop().unwrap()];
//! got.sort_unstable();
//! assert_eq!(got, vec![1, 2]);
//! assert_eq!(pool.try_pop(), None);
//! ```

pub mod slot_pool;

pub use slot_pool::SlotPool;
