//! A sharded concurrent associative map.
//!
//! [`ShardedTreeMap`] spreads keys over a fixed set of buckets by hash;
//! each bucket is an independently locked height-balanced tree keyed by
//! the full 64-bit hash, with same-hash keys kept side by side in the
//! node. Operations lock exactly one bucket, so work on different buckets
//! proceeds in parallel.
//!
//! # Usage
//!
//! ```
//! use sepet_map::ShardedTreeMap;
//!
//! let map = ShardedTreeMap::new();
//! map.insert("one", 1);
//! map.insert("two", 2);
//!
//! assert_eq!(map.try_get("one"), Some(1));
//! assert!(map.try_erase("one"));
//! assert_eq!(map.try_get("one"), None);
//! ```

pub mod tree_map;

pub use tree_map::ShardedTreeMap;
