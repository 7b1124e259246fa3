//! Dict: chained hash table with two slot arrays and incremental rehashing.
//!
//! Entries live in a generational arena; slot arrays hold the arena key of
//! each bucket's head and every entry links to the next one in its chain.
//! Growing allocates a second array and migrates a bounded number of
//! buckets on each mutating call, so no single call pays for moving the
//! whole table.

use crate::alloc::Allocator;
use crate::config::{table_size_for, DictConfig, ResizePolicy, MIN_TABLE_SIZE};
use crate::dict_type::{DictType, DictValue, HashDictType};
use crate::error::DictError;
use crate::reentrancy::DebugReentrancy;
use core::cell::Cell;
use core::fmt;
use core::hash::Hash;
use core::mem::{self, size_of};
use slotmap::{DefaultKey, SlotMap};

/// One key and its value slot.
#[derive(Debug)]
pub struct DictEntry<K, V> {
    pub(crate) key: K,
    pub(crate) value: Option<DictValue<V>>,
    // Cached at insertion; migration never calls the hash hook again.
    pub(crate) hash: u64,
    pub(crate) next: Option<DefaultKey>,
}

impl<K, V> DictEntry<K, V> {
    pub fn key(&self) -> &K {
        &self.key
    }

    /// `None` until a value is installed (see [`Dict::add_raw`]).
    pub fn value(&self) -> Option<&DictValue<V>> {
        self.value.as_ref()
    }

    pub fn value_mut(&mut self) -> Option<&mut DictValue<V>> {
        self.value.as_mut()
    }

    /// Raw assignment: no `dup_value` hook runs and the previous value is
    /// handed back instead of being destroyed.
    pub fn set_value(&mut self, value: DictValue<V>) -> Option<DictValue<V>> {
        self.value.replace(value)
    }

    pub fn hash(&self) -> u64 {
        self.hash
    }

    pub fn into_parts(self) -> (K, Option<DictValue<V>>) {
        (self.key, self.value)
    }
}

pub(crate) struct SlotArray {
    pub(crate) buckets: Vec<Option<DefaultKey>>,
    pub(crate) used: usize,
}

impl SlotArray {
    const fn empty() -> Self {
        Self {
            buckets: Vec::new(),
            used: 0,
        }
    }

    #[inline]
    pub(crate) fn size(&self) -> usize {
        self.buckets.len()
    }

    #[inline]
    pub(crate) fn mask(&self) -> usize {
        self.buckets.len().wrapping_sub(1)
    }

    #[inline]
    pub(crate) fn slot(&self, hash: u64) -> usize {
        (hash as usize) & self.mask()
    }
}

/// Outcome of [`Dict::expand`]. Every variant is a success.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Expand {
    /// The table had no slot array; the new one became the primary.
    Initialized,
    /// The new array became the rehash target.
    Rehashing,
    /// Nothing to do: already rehashing, the request would not hold the
    /// current entries, or the size would not change.
    Skipped,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TableStats {
    pub size: usize,
    pub used: usize,
    pub non_empty_buckets: usize,
    pub max_chain_len: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DictStats {
    pub primary: TableStats,
    /// Present only while rehashing.
    pub target: Option<TableStats>,
}

pub struct Dict<T: DictType> {
    pub(crate) ty: T,
    config: DictConfig,
    pub(crate) tables: [SlotArray; 2],
    pub(crate) entries: SlotMap<DefaultKey, DictEntry<T::Key, T::Value>>,
    // None while idle; otherwise the next primary bucket to migrate.
    rehash_idx: Option<usize>,
    pub(crate) iterators: Cell<usize>,
    alloc: Allocator,
    pub(crate) reentrancy: DebugReentrancy,
}

impl<K, V> Default for Dict<HashDictType<K, V>>
where
    K: Hash + Eq,
{
    fn default() -> Self {
        Self::new(HashDictType::new())
    }
}

impl<T: DictType> Dict<T> {
    const ENTRY_BYTES: usize = size_of::<DictEntry<T::Key, T::Value>>();

    pub fn new(ty: T) -> Self {
        Self::with_config(ty, DictConfig::default())
    }

    pub fn with_config(ty: T, config: DictConfig) -> Self {
        Self::with_allocator(ty, config, Allocator::default())
    }

    pub fn with_allocator(ty: T, config: DictConfig, alloc: Allocator) -> Self {
        Self {
            ty,
            config,
            tables: [SlotArray::empty(), SlotArray::empty()],
            entries: SlotMap::with_key(),
            rehash_idx: None,
            iterators: Cell::new(0),
            alloc,
            reentrancy: DebugReentrancy::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.tables[0].used + self.tables[1].used
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_rehashing(&self) -> bool {
        self.rehash_idx.is_some()
    }

    /// Bucket count of the primary slot array (0 before the first insert).
    pub fn primary_size(&self) -> usize {
        self.tables[0].size()
    }

    /// Bucket count of the rehash target (0 while idle).
    pub fn target_size(&self) -> usize {
        self.tables[1].size()
    }

    pub fn live_iterators(&self) -> usize {
        self.iterators.get()
    }

    pub fn config(&self) -> &DictConfig {
        &self.config
    }

    pub fn resize_policy(&self) -> ResizePolicy {
        self.config.resize_policy
    }

    pub fn set_resize_policy(&mut self, policy: ResizePolicy) {
        self.config.resize_policy = policy;
    }

    pub fn dict_type(&self) -> &T {
        &self.ty
    }

    pub fn allocator(&self) -> &Allocator {
        &self.alloc
    }

    /// Insert `key` with no value and return its entry for the caller to
    /// fill in. Fails if an equal key is present in either slot array.
    pub fn add_raw(
        &mut self,
        key: T::Key,
    ) -> Result<&mut DictEntry<T::Key, T::Value>, DictError> {
        let _g = self.reentrancy.enter("add_raw");
        let k = self.insert_key(key)?;
        Ok(&mut self.entries[k])
    }

    pub fn add(&mut self, key: T::Key, value: DictValue<T::Value>) -> Result<(), DictError> {
        let _g = self.reentrancy.enter("add");
        let k = self.insert_key(key)?;
        let value = self.dup(value);
        self.entries[k].value = Some(value);
        Ok(())
    }

    /// Insert `key`, or overwrite the value of the equal key already
    /// present. Returns `true` if the key was new. On overwrite the new
    /// value is installed before the old one is destroyed, and the passed
    /// key is dropped.
    pub fn replace(&mut self, key: T::Key, value: DictValue<T::Value>) -> bool {
        let _g = self.reentrancy.enter("replace");
        self.rehash_step();
        let hash = self.ty.hash(&key);
        match self.key_index(&key, hash) {
            Ok(slot) => {
                let k = self.link_new(key, hash, slot);
                let value = self.dup(value);
                self.entries[k].value = Some(value);
                true
            }
            Err(existing) => {
                let value = self.dup(value);
                let old = self.entries[existing].value.replace(value);
                if let Some(old) = old {
                    self.destroy(old);
                }
                false
            }
        }
    }

    /// Lookup without advancing a rehash in progress.
    pub fn find(&self, key: &T::Key) -> Option<&DictEntry<T::Key, T::Value>> {
        let _g = self.reentrancy.enter("find");
        self.lookup(key).map(|k| &self.entries[k])
    }

    /// Lookup that first performs one rehash step.
    pub fn find_mut(&mut self, key: &T::Key) -> Option<&mut DictEntry<T::Key, T::Value>> {
        let _g = self.reentrancy.enter("find_mut");
        self.rehash_step();
        let k = self.lookup(key)?;
        Some(&mut self.entries[k])
    }

    pub fn fetch_value(&self, key: &T::Key) -> Option<&DictValue<T::Value>> {
        self.find(key)?.value()
    }

    pub fn contains_key(&self, key: &T::Key) -> bool {
        self.find(key).is_some()
    }

    /// Remove `key`, passing its key and value to the destroy hooks.
    /// Returns `false` if it was not present.
    pub fn delete(&mut self, key: &T::Key) -> bool {
        let _g = self.reentrancy.enter("delete");
        match self.unlink_inner(key) {
            Some(entry) => {
                Self::dispose(&self.ty, entry);
                true
            }
            None => false,
        }
    }

    /// Remove `key` and hand its entry to the caller. No hooks run; pass the
    /// entry to [`Dict::free_unlinked`] to run them.
    pub fn unlink(&mut self, key: &T::Key) -> Option<DictEntry<T::Key, T::Value>> {
        let _g = self.reentrancy.enter("unlink");
        self.unlink_inner(key)
    }

    pub fn free_unlinked(&self, entry: DictEntry<T::Key, T::Value>) {
        Self::dispose(&self.ty, entry);
    }

    /// Allocate a slot array of `next_power_of_two(max(requested, 4))`
    /// buckets. It becomes the primary if there is none yet, otherwise the
    /// rehash target.
    pub fn expand(&mut self, requested: usize) -> Expand {
        let _g = self.reentrancy.enter("expand");
        self.expand_inner(requested)
    }

    /// Rehash into the smallest table that holds the current entries.
    /// Skipped while rehashing or when the resize policy is `Avoid`.
    pub fn resize_to_fit(&mut self) -> Expand {
        let _g = self.reentrancy.enter("resize_to_fit");
        if self.config.resize_policy != ResizePolicy::Allow || self.is_rehashing() {
            return Expand::Skipped;
        }
        let minimal = self.tables[0].used.max(MIN_TABLE_SIZE);
        self.expand_inner(minimal)
    }

    /// Migrate up to `n` non-empty buckets. Returns `true` while entries
    /// remain to be moved.
    pub fn rehash(&mut self, n: usize) -> bool {
        let _g = self.reentrancy.enter("rehash");
        self.rehash_inner(n)
    }

    /// Destroy every entry and release both slot arrays.
    pub fn clear(&mut self) {
        let _g = self.reentrancy.enter("clear");
        self.clear_inner();
    }

    pub fn release(self) {
        drop(self);
    }

    pub fn stats(&self) -> DictStats {
        DictStats {
            primary: self.table_stats(0),
            target: self.is_rehashing().then(|| self.table_stats(1)),
        }
    }

    fn table_stats(&self, table: usize) -> TableStats {
        let t = &self.tables[table];
        let mut stats = TableStats {
            size: t.size(),
            used: t.used,
            ..TableStats::default()
        };
        for head in &t.buckets {
            let mut chain = 0;
            let mut cur = *head;
            while let Some(k) = cur {
                chain += 1;
                cur = self.entries[k].next;
            }
            if chain > 0 {
                stats.non_empty_buckets += 1;
                stats.max_chain_len = stats.max_chain_len.max(chain);
            }
        }
        stats
    }

    fn dup(&self, value: DictValue<T::Value>) -> DictValue<T::Value> {
        match value {
            DictValue::Ref(v) => DictValue::Ref(self.ty.dup_value(v)),
            other => other,
        }
    }

    fn destroy(&self, value: DictValue<T::Value>) {
        if let DictValue::Ref(v) = value {
            self.ty.destroy_value(v);
        }
    }

    fn dispose(ty: &T, entry: DictEntry<T::Key, T::Value>) {
        let (key, value) = entry.into_parts();
        ty.destroy_key(key);
        if let Some(DictValue::Ref(v)) = value {
            ty.destroy_value(v);
        }
    }

    fn insert_key(&mut self, key: T::Key) -> Result<DefaultKey, DictError> {
        self.rehash_step();
        let hash = self.ty.hash(&key);
        let slot = self
            .key_index(&key, hash)
            .map_err(|_| DictError::DuplicateKey)?;
        Ok(self.link_new(key, hash, slot))
    }

    /// Push a new entry at the head of `slot`'s chain in the array that
    /// receives inserts: the target while rehashing, else the primary.
    fn link_new(&mut self, key: T::Key, hash: u64, slot: usize) -> DefaultKey {
        let key = self.ty.dup_key(key);
        let table = usize::from(self.is_rehashing());
        let next = self.tables[table].buckets[slot];
        let k = self.entries.insert(DictEntry {
            key,
            value: None,
            hash,
            next,
        });
        self.alloc.track(Self::ENTRY_BYTES);
        let t = &mut self.tables[table];
        t.buckets[slot] = Some(k);
        t.used += 1;
        k
    }

    /// Bucket index a new entry with `hash` goes to, or the arena key of
    /// the entry already holding `key`. Grows the table first if needed.
    fn key_index(&mut self, key: &T::Key, hash: u64) -> Result<usize, DefaultKey> {
        self.expand_if_needed();
        let mut idx = 0;
        for t in &self.tables {
            idx = t.slot(hash);
            let mut cur = t.buckets[idx];
            while let Some(k) = cur {
                let e = &self.entries[k];
                if self.ty.key_eq(&e.key, key) {
                    return Err(k);
                }
                cur = e.next;
            }
            if !self.is_rehashing() {
                break;
            }
        }
        Ok(idx)
    }

    fn lookup(&self, key: &T::Key) -> Option<DefaultKey> {
        if self.tables[0].size() == 0 {
            return None;
        }
        let hash = self.ty.hash(key);
        for t in &self.tables {
            let mut cur = t.buckets[t.slot(hash)];
            while let Some(k) = cur {
                let e = &self.entries[k];
                if self.ty.key_eq(&e.key, key) {
                    return Some(k);
                }
                cur = e.next;
            }
            if !self.is_rehashing() {
                break;
            }
        }
        None
    }

    fn unlink_inner(&mut self, key: &T::Key) -> Option<DictEntry<T::Key, T::Value>> {
        if self.tables[0].size() == 0 {
            return None;
        }
        self.rehash_step();
        let hash = self.ty.hash(key);
        for table in 0..2 {
            let idx = self.tables[table].slot(hash);
            let mut prev: Option<DefaultKey> = None;
            let mut cur = self.tables[table].buckets[idx];
            while let Some(k) = cur {
                let e = &self.entries[k];
                let next = e.next;
                if self.ty.key_eq(&e.key, key) {
                    match prev {
                        Some(p) => self.entries[p].next = next,
                        None => self.tables[table].buckets[idx] = next,
                    }
                    self.tables[table].used -= 1;
                    let mut entry = self.entries.remove(k)?;
                    entry.next = None;
                    self.alloc.untrack(Self::ENTRY_BYTES);
                    return Some(entry);
                }
                prev = Some(k);
                cur = next;
            }
            if !self.is_rehashing() {
                break;
            }
        }
        None
    }

    fn expand_if_needed(&mut self) {
        if self.is_rehashing() {
            return;
        }
        let (used, size) = (self.tables[0].used, self.tables[0].size());
        if size == 0 {
            self.expand_inner(self.config.initial_size);
            return;
        }
        let allowed = self.config.resize_policy == ResizePolicy::Allow
            || used / size > self.config.force_resize_ratio;
        if used >= size && allowed {
            self.expand_inner(used.saturating_mul(2));
        }
    }

    fn expand_inner(&mut self, requested: usize) -> Expand {
        if self.is_rehashing() || self.tables[0].used > requested {
            return Expand::Skipped;
        }
        let size = table_size_for(requested);
        if size == self.tables[0].size() {
            return Expand::Skipped;
        }
        let fresh = SlotArray {
            buckets: self.alloc.alloc_array(size, None),
            used: 0,
        };
        if self.tables[0].size() == 0 {
            self.tables[0] = fresh;
            return Expand::Initialized;
        }
        log::debug!(
            "dict rehash started: {} -> {} buckets, {} entries",
            self.tables[0].size(),
            size,
            self.tables[0].used
        );
        self.tables[1] = fresh;
        self.rehash_idx = Some(0);
        Expand::Rehashing
    }

    fn rehash_step(&mut self) {
        // No iterator check: iterators borrow the dict, so none is alive
        // during a `&mut` call. `iterators` is only reported.
        if self.is_rehashing() {
            self.rehash_inner(self.config.rehash_buckets_per_step);
        }
    }

    fn rehash_inner(&mut self, n: usize) -> bool {
        let Some(mut idx) = self.rehash_idx else {
            return false;
        };
        // Bound the work spent skipping empty buckets as well.
        let mut empty_visits = n.saturating_mul(10);
        let mut remaining = n;
        let [old, new] = &mut self.tables;
        while remaining > 0 && old.used != 0 {
            debug_assert!(idx < old.size(), "rehash cursor past a non-empty table");
            while old.buckets[idx].is_none() {
                idx += 1;
                empty_visits -= 1;
                if empty_visits == 0 {
                    self.rehash_idx = Some(idx);
                    return true;
                }
            }
            let mut cur = old.buckets[idx].take();
            while let Some(k) = cur {
                let entry = &mut self.entries[k];
                cur = entry.next;
                let slot = new.slot(entry.hash);
                entry.next = new.buckets[slot];
                new.buckets[slot] = Some(k);
                old.used -= 1;
                new.used += 1;
            }
            idx += 1;
            remaining -= 1;
        }

        if old.used == 0 {
            let retired = mem::replace(old, mem::replace(new, SlotArray::empty()));
            self.alloc.free_array(retired.buckets);
            self.rehash_idx = None;
            log::debug!("dict rehash finished: {} buckets", self.tables[0].size());
            return false;
        }
        self.rehash_idx = Some(idx);
        true
    }

    fn clear_inner(&mut self) {
        let ty = &self.ty;
        for (_, entry) in self.entries.drain() {
            self.alloc.untrack(Self::ENTRY_BYTES);
            Self::dispose(ty, entry);
        }
        for t in &mut self.tables {
            let retired = mem::replace(t, SlotArray::empty());
            self.alloc.free_array(retired.buckets);
        }
        self.rehash_idx = None;
    }
}

impl<T: DictType> Drop for Dict<T> {
    fn drop(&mut self) {
        self.clear_inner();
    }
}

impl<T: DictType> fmt::Debug for Dict<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dict")
            .field("len", &self.len())
            .field("primary_size", &self.primary_size())
            .field("target_size", &self.target_size())
            .field("rehash_idx", &self.rehash_idx)
            .field("iterators", &self.iterators.get())
            .finish()
    }
}
