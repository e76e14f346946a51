use fxhash::FxBuildHasher;
use std::hash::Hash;
use std::ops::{Deref, DerefMut};

type InnerMap<K, V> = hashbrown::HashMap<K, V, FxBuildHasher>;
type InnerSet<T> = hashbrown::HashSet<T, FxBuildHasher>;

/// Hash map with the fast (non-cryptographic) Fx hasher.
/// Iteration order is unspecified, do not use it where determinism matters.
#[derive(Debug, Clone)]
pub struct Map<K: Eq + Hash, V>(InnerMap<K, V>);

impl<K: Eq + Hash, V> Map<K, V> {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }
}

impl<K: Eq + Hash, V> Default for Map<K, V> {
    #[inline]
    fn default() -> Self {
        Self(InnerMap::default())
    }
}

impl<K: Eq + Hash, V> Deref for Map<K, V> {
    type Target = InnerMap<K, V>;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<K: Eq + Hash, V> DerefMut for Map<K, V> {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

/// Hash set with the same hasher as [`Map`].
#[derive(Debug, Clone)]
pub struct Set<T: Eq + Hash>(InnerSet<T>);

impl<T: Eq + Hash> Set<T> {
    #[inline]
    pub fn new() -> Self {
        Self(InnerSet::default())
    }
}

impl<T: Eq + Hash> Default for Set<T> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Eq + Hash> Deref for Set<T> {
    type Target = InnerSet<T>;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T: Eq + Hash> DerefMut for Set<T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

#[cfg(test)]
mod tests {
    use super::{Map, Set};

    #[test]
    fn test_set_and_map_go_through_deref() {
        let mut set = Set::new();
        assert!(set.insert((0u32, 1u32)));
        assert!(!set.insert((0, 1)));
        assert!(set.contains(&(0, 1)));
        assert_eq!(set.len(), 1);

        let mut map: Map<u32, &str> = Map::default();
        map.insert(3, "scaler");
        assert_eq!(map.get(&3), Some(&"scaler"));
    }
}
