//! Traversal of a [`Dict`]: a borrowing iterator and a stateless cursor scan.
//!
//! `Iter` holds `&Dict`, so the table cannot be mutated while one is alive;
//! the live-iterator count it maintains additionally keeps rehash steps
//! from running.
//!
//! `scan` needs no borrow between calls. The cursor is advanced by
//! incrementing its bit-reversed value, so buckets are visited high bits
//! first and a table that doubles (or halves) between two calls does not
//! cause entries present for the whole scan to be missed. Entries may be
//! reported more than once.

use crate::dict::{Dict, DictEntry, SlotArray};
use crate::dict_type::DictType;
use slotmap::DefaultKey;

/// Entries in bucket order: the primary array, then the rehash target.
pub struct Iter<'a, T: DictType> {
    dict: &'a Dict<T>,
    table: usize,
    bucket: usize,
    next: Option<DefaultKey>,
}

impl<'a, T: DictType> Iterator for Iter<'a, T> {
    type Item = &'a DictEntry<T::Key, T::Value>;

    fn next(&mut self) -> Option<Self::Item> {
        let dict = self.dict;
        loop {
            if let Some(k) = self.next {
                let entry = &dict.entries[k];
                self.next = entry.next;
                return Some(entry);
            }
            let t = &dict.tables[self.table];
            if self.bucket < t.size() {
                self.next = t.buckets[self.bucket];
                self.bucket += 1;
                continue;
            }
            if self.table == 0 && dict.is_rehashing() {
                self.table = 1;
                self.bucket = 0;
                continue;
            }
            return None;
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.dict.len()))
    }
}

impl<'a, T: DictType> Drop for Iter<'a, T> {
    fn drop(&mut self) {
        let n = self.dict.iterators.get();
        debug_assert!(n > 0);
        self.dict.iterators.set(n - 1);
    }
}

impl<'a, T: DictType> IntoIterator for &'a Dict<T> {
    type Item = &'a DictEntry<T::Key, T::Value>;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[inline]
fn next_cursor(v: usize, mask: usize) -> usize {
    (v | !mask).reverse_bits().wrapping_add(1).reverse_bits()
}

impl<T: DictType> Dict<T> {
    pub fn iter(&self) -> Iter<'_, T> {
        self.iterators.set(self.iterators.get() + 1);
        Iter {
            dict: self,
            table: 0,
            bucket: 0,
            next: None,
        }
    }

    /// Report the entries of the bucket(s) addressed by `cursor` to `f` and
    /// return the next cursor. Start with 0; the scan is complete when 0 is
    /// returned.
    pub fn scan<F>(&self, cursor: usize, mut f: F) -> usize
    where
        F: FnMut(&DictEntry<T::Key, T::Value>),
    {
        let _g = self.reentrancy.enter("scan");
        if self.is_empty() {
            return 0;
        }
        let mut v = cursor;
        if !self.is_rehashing() {
            let t0 = &self.tables[0];
            let m0 = t0.mask();
            self.visit_bucket(t0, v & m0, &mut f);
            return next_cursor(v, m0);
        }

        let (small, large) = if self.tables[0].size() <= self.tables[1].size() {
            (&self.tables[0], &self.tables[1])
        } else {
            (&self.tables[1], &self.tables[0])
        };
        let (m0, m1) = (small.mask(), large.mask());
        self.visit_bucket(small, v & m0, &mut f);
        // Every bucket of the larger array that folds onto `v & m0`.
        loop {
            self.visit_bucket(large, v & m1, &mut f);
            v = next_cursor(v, m1);
            if v & (m0 ^ m1) == 0 {
                break;
            }
        }
        v
    }

    fn visit_bucket<F>(&self, table: &SlotArray, idx: usize, f: &mut F)
    where
        F: FnMut(&DictEntry<T::Key, T::Value>),
    {
        let mut cur = table.buckets[idx];
        while let Some(k) = cur {
            let entry = &self.entries[k];
            cur = entry.next;
            f(entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::alloc::Allocator;
    use crate::config::DictConfig;
    use crate::dict::Dict;
    use crate::dict_type::{DictValue, HashDictType};
    use std::collections::BTreeSet;

    fn filled(n: u64) -> Dict<HashDictType<u64, ()>> {
        let mut d = Dict::with_allocator(
            HashDictType::new(),
            DictConfig::default(),
            Allocator::isolated(),
        );
        for k in 0..n {
            d.add(k, DictValue::Unsigned(k)).unwrap();
        }
        d
    }

    fn full_scan(d: &Dict<HashDictType<u64, ()>>) -> BTreeSet<u64> {
        let mut seen = BTreeSet::new();
        let mut cursor = 0;
        loop {
            cursor = d.scan(cursor, |e| {
                seen.insert(*e.key());
            });
            if cursor == 0 {
                break;
            }
        }
        seen
    }

    /// Invariant: iteration yields every entry exactly once, from both
    /// arrays while rehashing, and tracks the live-iterator count.
    #[test]
    fn iter_covers_both_arrays() {
        let d = filled(5);
        assert!(d.is_rehashing());
        let it = d.iter();
        assert_eq!(d.live_iterators(), 1);
        let keys: Vec<u64> = it.map(|e| *e.key()).collect();
        assert_eq!(d.live_iterators(), 0);
        assert_eq!(keys.len(), 5);
        let unique: BTreeSet<u64> = keys.into_iter().collect();
        assert_eq!(unique, (0..5).collect());

        let by_ref: usize = (&d).into_iter().count();
        assert_eq!(by_ref, 5);
    }

    /// Invariant: the live-iterator count never blocks migration. A leaked
    /// iterator keeps the count up, yet mutating calls still finish the
    /// rehash.
    #[test]
    fn leaked_iterator_does_not_stall_rehash() {
        let mut d = filled(5);
        assert!(d.is_rehashing());
        core::mem::forget(d.iter());
        assert_eq!(d.live_iterators(), 1);
        let mut calls = 0;
        while d.is_rehashing() {
            assert!(d.find_mut(&0).is_some());
            calls += 1;
            assert!(calls <= 4);
        }
        assert_eq!(d.primary_size(), 8);
        assert_eq!(full_scan(&d), (0..5).collect());
    }

    #[test]
    fn scan_on_empty_table_finishes_immediately() {
        let d = filled(0);
        assert_eq!(d.scan(0, |_| panic!("no entries")), 0);
    }

    /// Invariant: a full scan reports every entry of an idle table.
    #[test]
    fn scan_covers_idle_table() {
        let mut d = filled(200);
        while d.rehash(100) {}
        assert_eq!(full_scan(&d), (0..200).collect());
    }

    /// Invariant: a full scan started mid-rehash reports every entry.
    #[test]
    fn scan_covers_table_mid_rehash() {
        let mut d = filled(200);
        while d.rehash(100) {}
        d.expand(1024);
        assert!(d.is_rehashing());
        d.rehash(3);
        assert!(d.is_rehashing());
        assert_eq!(full_scan(&d), (0..200).collect());
    }

    /// Invariant: entries present for the whole scan are reported even when
    /// the table grows between calls.
    #[test]
    fn scan_survives_growth_between_calls() {
        let mut d = filled(16);
        while d.rehash(100) {}
        let mut seen = BTreeSet::new();
        let mut cursor = d.scan(0, |e| {
            seen.insert(*e.key());
        });
        let mut next_key = 16;
        while cursor != 0 {
            for _ in 0..8 {
                d.add(next_key, DictValue::Unsigned(next_key)).unwrap();
                next_key += 1;
            }
            cursor = d.scan(cursor, |e| {
                seen.insert(*e.key());
            });
        }
        for k in 0..16 {
            assert!(seen.contains(&k), "key {k} missed by scan");
        }
    }
}
