//! Capability set that parameterizes a [`crate::Dict`] over a key/value
//! domain, and the tagged value slot stored in each entry.

use core::hash::{BuildHasher, Hash};
use core::marker::PhantomData;
use hashbrown::hash_map::DefaultHashBuilder;

/// Per-table strategy: hashing, key comparison, and ownership hooks.
///
/// The implementing value is the table's private context; hooks receive it
/// as `&self`. Hooks must not call back into the table that invoked them
/// (debug builds panic if they do).
pub trait DictType {
    type Key;
    type Value;

    fn hash(&self, key: &Self::Key) -> u64;

    /// Key equality. Defaults to identity: two keys match only if they are
    /// the same object.
    fn key_eq(&self, a: &Self::Key, b: &Self::Key) -> bool {
        core::ptr::eq(a, b)
    }

    /// Applied to every key as it is installed.
    fn dup_key(&self, key: Self::Key) -> Self::Key {
        key
    }

    /// Applied to every `DictValue::Ref` as it is installed.
    fn dup_value(&self, value: Self::Value) -> Self::Value {
        value
    }

    /// Receives every key the table disposes of.
    fn destroy_key(&self, key: Self::Key) {
        drop(key);
    }

    /// Receives every `DictValue::Ref` the table disposes of.
    fn destroy_value(&self, value: Self::Value) {
        drop(value);
    }
}

/// Value slot of a dictionary entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DictValue<V> {
    Ref(V),
    Unsigned(u64),
    Signed(i64),
}

impl<V> DictValue<V> {
    pub fn get_ref(&self) -> Option<&V> {
        match self {
            DictValue::Ref(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_unsigned(&self) -> Option<u64> {
        match *self {
            DictValue::Unsigned(u) => Some(u),
            _ => None,
        }
    }

    pub fn as_signed(&self) -> Option<i64> {
        match *self {
            DictValue::Signed(i) => Some(i),
            _ => None,
        }
    }
}

/// `DictType` for any `K: Hash + Eq`, hashing with a `BuildHasher`.
pub struct HashDictType<K, V, S = DefaultHashBuilder> {
    hasher: S,
    _pd: PhantomData<fn(K, V)>,
}

impl<K, V> HashDictType<K, V> {
    pub fn new() -> Self {
        Self::with_hasher(DefaultHashBuilder::default())
    }
}

impl<K, V> Default for HashDictType<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, S> HashDictType<K, V, S> {
    pub fn with_hasher(hasher: S) -> Self {
        Self {
            hasher,
            _pd: PhantomData,
        }
    }
}

impl<K, V, S> DictType for HashDictType<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    type Key = K;
    type Value = V;

    #[inline]
    fn hash(&self, key: &K) -> u64 {
        self.hasher.hash_one(key)
    }

    #[inline]
    fn key_eq(&self, a: &K, b: &K) -> bool {
        a == b
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct IdentityType;
    impl DictType for IdentityType {
        type Key = u32;
        type Value = ();
        fn hash(&self, key: &u32) -> u64 {
            *key as u64
        }
    }

    #[test]
    fn default_comparator_is_identity() {
        let t = IdentityType;
        let a = 7u32;
        let b = 7u32;
        assert!(t.key_eq(&a, &a));
        assert!(!t.key_eq(&a, &b));
    }

    #[test]
    fn hash_type_compares_by_value_and_hashes_stably() {
        let t: HashDictType<String, ()> = HashDictType::new();
        let a = "k".to_string();
        let b = "k".to_string();
        assert!(t.key_eq(&a, &b));
        assert_eq!(t.hash(&a), t.hash(&b));
    }

    #[test]
    fn value_accessors_match_variant() {
        let r: DictValue<&str> = DictValue::Ref("v");
        assert_eq!(r.get_ref(), Some(&"v"));
        assert_eq!(r.as_unsigned(), None);
        let u: DictValue<()> = DictValue::Unsigned(u64::MAX);
        assert_eq!(u.as_unsigned(), Some(u64::MAX));
        let s: DictValue<()> = DictValue::Signed(i64::MIN);
        assert_eq!(s.as_signed(), Some(i64::MIN));
        assert_eq!(s.get_ref(), None);
    }
}
