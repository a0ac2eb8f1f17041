use std::borrow::Borrow;
use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::mem;

use crossbeam_utils::CachePadded;
use foldhash::fast::FixedState;
use parking_lot::Mutex;

/// Default bucket count.
const BUCKET_COUNT: usize = 19;

type Link<K, V> = Option<Box<TreeNode<K, V>>>;

/// One tree node per distinct hash value.
///
/// Keys whose hashes collide share the node: `entries` holds every
/// distinct key with that hash, so a collision can never make one key
/// shadow another.
struct TreeNode<K, V> {
    hash: u64,
    height: u8,
    entries: Vec<(K, V)>,
    lesser: Link<K, V>,
    greater: Link<K, V>,
}

impl<K, V> TreeNode<K, V> {
    fn leaf(hash: u64, key: K, value: V) -> Box<TreeNode<K, V>> {
        Box::new(TreeNode {
            hash,
            height: 1,
            entries: vec![(key, value)],
            lesser: None,
            greater: None,
        })
    }
}

/// A concurrent map sharded into independently locked balanced trees.
///
/// The hash picks the bucket; within the bucket, nodes are ordered by
/// hash and kept height-balanced, so a bucket holding n hashes does any
/// operation in O(log n) comparisons under its own mutex.
pub struct ShardedTreeMap<K, V, S = FixedState> {
    buckets: Box<[CachePadded<Mutex<Link<K, V>>>]>,
    hasher: S,
}

impl<K, V> ShardedTreeMap<K, V> {
    /// Creates a map with the default bucket count (19) and hasher.
    pub fn new() -> ShardedTreeMap<K, V> {
        Self::with_buckets_and_hasher(BUCKET_COUNT, FixedState::default())
    }

    /// Creates a map sharded into `buckets` independently locked trees.
    ///
    /// # Panics
    ///
    /// Panics if `buckets` is zero.
    pub fn with_buckets(buckets: usize) -> ShardedTreeMap<K, V> {
        Self::with_buckets_and_hasher(buckets, FixedState::default())
    }
}

impl<K, V, S> ShardedTreeMap<K, V, S> {
    /// Creates a map with the default bucket count and the given hasher.
    pub fn with_hasher(hasher: S) -> ShardedTreeMap<K, V, S> {
        Self::with_buckets_and_hasher(BUCKET_COUNT, hasher)
    }

    /// Creates a map with `buckets` trees and the given hasher.
    ///
    /// # Panics
    ///
    /// Panics if `buckets` is zero.
    pub fn with_buckets_and_hasher(buckets: usize, hasher: S) -> ShardedTreeMap<K, V, S> {
        assert!(buckets > 0, "bucket count must be non-zero");
        let mut vec = Vec::with_capacity(buckets);
        for _ in 0..buckets {
            vec.push(CachePadded::new(Mutex::new(None)));
        }
        ShardedTreeMap {
            buckets: vec.into_boxed_slice(),
            hasher,
        }
    }

    fn bucket_index(&self, hash: u64) -> usize {
        (hash % self.buckets.len() as u64) as usize
    }
}

impl<K, V, S: BuildHasher> ShardedTreeMap<K, V, S> {
    /// Inserts a key-value pair, overwriting the value if the key is
    /// already present.
    pub fn insert(&self, key: K, value: V)
    where
        K: Hash + Eq,
    {
        let hash = self.hasher.hash_one(&key);
        let mut bucket = self.buckets[self.bucket_index(hash)].lock();
        insert_node(&mut bucket, hash, key, value);
    }

    /// Returns a copy of the value stored under `key`, or `None`.
    pub fn try_get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: Clone,
    {
        let hash = self.hasher.hash_one(key);
        let bucket = self.buckets[self.bucket_index(hash)].lock();
        let mut node = bucket.as_deref();
        while let Some(n) = node {
            if hash < n.hash {
                node = n.lesser.as_deref();
            } else if hash > n.hash {
                node = n.greater.as_deref();
            } else {
                return n
                    .entries
                    .iter()
                    .find(|(k, _)| k.borrow() == key)
                    .map(|(_, v)| v.clone());
            }
        }
        None
    }

    /// Removes the entry stored under `key`. Returns `false` if the key
    /// was not present.
    pub fn try_erase<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = self.hasher.hash_one(key);
        let mut bucket = self.buckets[self.bucket_index(hash)].lock();
        erase_node(&mut bucket, hash, key)
    }
}

impl<K, V> Default for ShardedTreeMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, S> fmt::Debug for ShardedTreeMap<K, V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardedTreeMap")
            .field("buckets", &self.buckets.len())
            .finish_non_exhaustive()
    }
}

fn height<K, V>(link: &Link<K, V>) -> u8 {
    link.as_ref().map_or(0, |n| n.height)
}

fn update_height<K, V>(node: &mut TreeNode<K, V>) {
    node.height = 1 + height(&node.lesser).max(height(&node.greater));
}

/// Positive when the greater side is taller.
fn balance_factor<K, V>(node: &TreeNode<K, V>) -> i16 {
    height(&node.greater) as i16 - height(&node.lesser) as i16
}

fn rotate_left<K, V>(link: &mut Link<K, V>) {
    if let Some(mut node) = link.take() {
        if let Some(mut pivot) = node.greater.take() {
            node.greater = pivot.lesser.take();
            update_height(&mut node);
            pivot.lesser = Some(node);
            update_height(&mut pivot);
            *link = Some(pivot);
        } else {
            *link = Some(node);
        }
    }
}

fn rotate_right<K, V>(link: &mut Link<K, V>) {
    if let Some(mut node) = link.take() {
        if let Some(mut pivot) = node.lesser.take() {
            node.lesser = pivot.greater.take();
            update_height(&mut node);
            pivot.greater = Some(node);
            update_height(&mut pivot);
            *link = Some(pivot);
        } else {
            *link = Some(node);
        }
    }
}

/// Restores the height invariant at `link` after a child subtree changed.
/// A same-signed grandchild imbalance takes one rotation, an opposite-
/// signed one takes two.
fn rebalance<K, V>(link: &mut Link<K, V>) {
    if let Some(node) = link {
        update_height(node);
        let balance = balance_factor(node);
        if balance > 1 {
            if let Some(greater) = &node.greater {
                if balance_factor(greater) < 0 {
                    rotate_right(&mut node.greater);
                }
            }
            rotate_left(link);
        } else if balance < -1 {
            if let Some(lesser) = &node.lesser {
                if balance_factor(lesser) > 0 {
                    rotate_left(&mut node.lesser);
                }
            }
            rotate_right(link);
        }
    }
}

fn insert_node<K: Eq, V>(link: &mut Link<K, V>, hash: u64, key: K, value: V) {
    let node = match link {
        None => {
            *link = Some(TreeNode::leaf(hash, key, value));
            return;
        }
        Some(node) => node,
    };

    if hash < node.hash {
        insert_node(&mut node.lesser, hash, key, value);
    } else if hash > node.hash {
        insert_node(&mut node.greater, hash, key, value);
    } else {
        // Same hash: compare full keys, never collapse distinct ones.
        for entry in node.entries.iter_mut() {
            if entry.0 == key {
                entry.1 = value;
                return;
            }
        }
        node.entries.push((key, value));
        return;
    }
    rebalance(link);
}

fn erase_node<K, V, Q>(link: &mut Link<K, V>, hash: u64, key: &Q) -> bool
where
    K: Borrow<Q>,
    Q: Eq + ?Sized,
{
    let node = match link {
        None => return false,
        Some(node) => node,
    };

    let erased = if hash < node.hash {
        erase_node(&mut node.lesser, hash, key)
    } else if hash > node.hash {
        erase_node(&mut node.greater, hash, key)
    } else {
        match node.entries.iter().position(|(k, _)| k.borrow() == key) {
            None => return false,
            Some(pos) => {
                node.entries.swap_remove(pos);
                if node.entries.is_empty() {
                    remove_node(link);
                }
                true
            }
        }
    };
    if erased {
        rebalance(link);
    }
    erased
}

/// Unlinks the node at `link` once its entry list is empty.
fn remove_node<K, V>(link: &mut Link<K, V>) {
    if let Some(mut node) = link.take() {
        match (node.lesser.is_some(), node.greater.is_some()) {
            (false, false) => {}
            (true, false) => *link = node.lesser.take(),
            (false, true) => *link = node.greater.take(),
            (true, true) => {
                // Promote the in-order successor, the minimum of the
                // greater subtree; its removal path is rebalanced on the
                // way back up and the caller rebalances this level.
                if let Some(mut successor) = take_min(&mut node.greater) {
                    node.hash = successor.hash;
                    mem::swap(&mut node.entries, &mut successor.entries);
                }
                *link = Some(node);
            }
        }
    }
}

/// Detaches and returns the minimum node of the subtree at `link`,
/// splicing its greater child into its place.
fn take_min<K, V>(link: &mut Link<K, V>) -> Link<K, V> {
    let node = match link {
        None => return None,
        Some(node) => node,
    };
    if node.lesser.is_some() {
        let min = take_min(&mut node.lesser);
        rebalance(link);
        min
    } else {
        let mut min = link.take();
        if let Some(n) = &mut min {
            *link = n.greater.take();
        }
        min
    }
}
