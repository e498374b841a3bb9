//! This module provides a deterministic hasher and `HashMap` and `HashSet` variants that use
//! it. The hashing data structures in the standard library are randomly seeded, which would make
//! any iteration over them differ from run to run and break trajectory reproducibility.
//!
//! `HashMap<K, V, S>` does not have a `new` method for non-default hashers. Use
//! `HashMap::default()`, or bring `HashMapExt` into scope to keep the familiar API. Similarly for
//! `HashSet` and `HashSetExt`.
//!
//! The `hash_str` free function is used to derive per-stream random seeds in `crate::random`.

use xxhash_rust::xxh3::xxh3_64;

pub use rustc_hash::{FxHashMap as HashMap, FxHashSet as HashSet};

/// Provides `new` and `with_capacity` for the deterministic `HashMap`.
pub trait HashMapExt {
    fn new() -> Self;
    fn with_capacity(capacity: usize) -> Self;
}

impl<K, V> HashMapExt for HashMap<K, V> {
    fn new() -> Self {
        HashMap::default()
    }

    fn with_capacity(capacity: usize) -> Self {
        HashMap::with_capacity_and_hasher(capacity, rustc_hash::FxBuildHasher)
    }
}

/// Provides `new` and `with_capacity` for the deterministic `HashSet`.
pub trait HashSetExt {
    fn new() -> Self;
    fn with_capacity(capacity: usize) -> Self;
}

impl<T> HashSetExt for HashSet<T> {
    fn new() -> Self {
        HashSet::default()
    }

    fn with_capacity(capacity: usize) -> Self {
        HashSet::with_capacity_and_hasher(capacity, rustc_hash::FxBuildHasher)
    }
}

/// A convenience method to compute the hash of a `&str`. Stable across platforms and runs.
#[must_use]
pub fn hash_str(data: &str) -> u64 {
    xxh3_64(data.as_bytes())
}
