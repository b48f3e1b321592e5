// Copyright 2024 The Osmocom-BB-rs Authors. Licensed under GPL-2.0-or-later.

//! Hasher-pinned `HashMap`/`HashSet` aliases shared by every crate in the
//! stack. The core never iterates these maps in a way that depends on
//! iteration order, so a faster, non-DoS-resistant hasher is used instead of
//! the standard library's `SipHash`.

use std::collections::{HashMap as StdHashMap, HashSet as StdHashSet};

pub use fxhash::FxBuildHasher;

pub type HashMap<K, V> = StdHashMap<K, V, FxBuildHasher>;
pub type HashSet<T> = StdHashSet<T, FxBuildHasher>;

pub fn map_with_capacity<K, V>(capacity: usize) -> HashMap<K, V> {
    HashMap::with_capacity_and_hasher(capacity, FxBuildHasher::default())
}

pub fn set_with_capacity<T>(capacity: usize) -> HashSet<T> {
    HashSet::with_capacity_and_hasher(capacity, FxBuildHasher::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_with_capacity_is_usable() {
        let mut m: HashMap<u16, &str> = map_with_capacity(4);
        m.insert(1, "one");
        assert_eq!(m.get(&1), Some(&"one"));
    }
}
