//! Sepet: concurrent container primitives, each built around a distinct
//! synchronization strategy.
//!
//! This crate is the trunk of the workspace. It holds the pieces the
//! container crates build on:
//!
//! - [`Stack`]: a lock-free Treiber stack. Useful on its own, and embedded
//!   by `sepet-queue` and `sepet-vector` as their deferred-deletion list.
//! - [`tid`]: a registry handing out dense, recyclable per-thread indices,
//!   used by containers that keep per-thread state.
//!
//! The containers themselves live in the member crates: `sepet-queue`
//! (flat-combining FIFO), `sepet-vector` (double-buffered vector with
//! wait-free reads), `sepet-pool` (orderless slot pool) and `sepet-map`
//! (sharded balanced-tree map).
//!
//! # Example
//!
//! ```rust
//! use sepet::Stack;
//!
//! let stack = Stack::new();
//! stack.push(1);
//! stack.push(2);
//!
//! assert_eq!(stack.try_pop(), Some(2));
//! assert_eq!(stack.try_pop(), Some(1));
//! assert_eq!(stack.try_pop(), None);
//! ```

#![warn(missing_docs)]

mod stack;
pub mod tid;

pub use stack::Stack;
