//! A dynamic array with wait-free reads and serialized writes.
//!
//! [`DoubleBufferVec`] keeps two buffers of element pointers. Readers go
//! through the published one without taking any lock; writers mutate the
//! other under a mutex, publish it with a single pointer swap, and then
//! mirror the change back so the displaced buffer can take the write role
//! for the next operation. Elements are heap-allocated individually and
//! reclaimed only once no reader can still hold a pointer to them.
//!
//! Reads scale with reader count and never block behind a writer. Writes
//! pay for that: each one waits out in-flight readers twice before it
//! returns.
//!
//! # Usage
//!
//! ```
//! use sepet_vector::DoubleBufferVec;
//!
//! let v = DoubleBufferVec::new();
//! v.push_back(10);
//! v.push_back(20);
//!
//! assert_eq!(v.try_at(0), Some(10));
//! assert_eq!(v.len(), 2);
//! assert!(v.try_erase(0));
//! assert_eq!(v.try_at(0), Some(20));
//! ```

#![warn(missing_docs)]

pub mod double_buffer;

pub use double_buffer::{DoubleBufferVec, Iter};
