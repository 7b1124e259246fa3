#![cfg(test)]

// Property tests for Dict kept inside the crate so they can look at the
// slot arrays directly.

use crate::alloc::Allocator;
use crate::config::{DictConfig, ResizePolicy};
use crate::dict::Dict;
use crate::dict_type::{DictType, DictValue, HashDictType};
use crate::error::DictError;
use hashbrown::HashMap;
use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use std::collections::BTreeSet;

type Key = String;

// Pool-indexed operations so shrinking moves towards earlier keys and
// shorter op lists.
#[derive(Clone, Debug)]
enum Op {
    Add(usize, i64),
    AddRaw(usize, u64),
    Replace(usize, i64),
    Delete(usize),
    Unlink(usize),
    Find(usize),
    FindMut(usize, i64),
    Rehash(usize),
    Expand(usize),
    ResizeToFit,
    SetPolicy(bool),
    Iterate,
    Scan,
}

fn arb_scenario() -> impl Strategy<Value = (Vec<Key>, Vec<Op>)> {
    proptest::collection::vec("[a-z]{1,6}", 1..=64).prop_flat_map(|pool| {
        let idx = 0..pool.len();
        let op = prop_oneof![
            6 => (idx.clone(), any::<i64>()).prop_map(|(i, v)| Op::Add(i, v)),
            2 => (idx.clone(), any::<u64>()).prop_map(|(i, v)| Op::AddRaw(i, v)),
            2 => (idx.clone(), any::<i64>()).prop_map(|(i, v)| Op::Replace(i, v)),
            3 => idx.clone().prop_map(Op::Delete),
            1 => idx.clone().prop_map(Op::Unlink),
            3 => idx.clone().prop_map(Op::Find),
            2 => (idx.clone(), any::<i64>()).prop_map(|(i, d)| Op::FindMut(i, d)),
            1 => (0usize..8).prop_map(Op::Rehash),
            1 => (0usize..300).prop_map(Op::Expand),
            1 => Just(Op::ResizeToFit),
            1 => any::<bool>().prop_map(Op::SetPolicy),
            1 => Just(Op::Iterate),
            1 => Just(Op::Scan),
        ];
        proptest::collection::vec(op, 1..200).prop_map(move |ops| (pool.clone(), ops))
    })
}

fn scan_keys<T: DictType<Key = Key>>(sut: &Dict<T>) -> BTreeSet<Key> {
    let mut seen = BTreeSet::new();
    let mut cursor = 0;
    loop {
        cursor = sut.scan(cursor, |e| {
            seen.insert(e.key().clone());
        });
        if cursor == 0 {
            return seen;
        }
    }
}

// State-machine equivalence against a HashMap model. After every op:
// - every model key is findable with the model's value, whether or not a
//   rehash is in progress;
// - `len` and the per-array `used` counters agree with the model;
// - a rehash target exists exactly while rehashing.
fn run_state_machine<T>(
    mut sut: Dict<T>,
    pool: &[Key],
    ops: Vec<Op>,
) -> Result<(), TestCaseError>
where
    T: DictType<Key = Key, Value = i64>,
{
    let mut model: HashMap<Key, DictValue<i64>> = HashMap::new();
    for op in ops {
        match op {
            Op::Add(i, v) => {
                let k = pool[i].clone();
                let already = model.contains_key(&k);
                match sut.add(k.clone(), DictValue::Ref(v)) {
                    Ok(()) => {
                        prop_assert!(!already, "add must fail on duplicate");
                        model.insert(k, DictValue::Ref(v));
                    }
                    Err(DictError::DuplicateKey) => prop_assert!(already),
                }
            }
            Op::AddRaw(i, v) => {
                let k = pool[i].clone();
                let already = model.contains_key(&k);
                match sut.add_raw(k.clone()) {
                    Ok(e) => {
                        prop_assert!(!already);
                        prop_assert!(e.value().is_none());
                        e.set_value(DictValue::Unsigned(v));
                        model.insert(k, DictValue::Unsigned(v));
                    }
                    Err(DictError::DuplicateKey) => prop_assert!(already),
                }
            }
            Op::Replace(i, v) => {
                let k = pool[i].clone();
                let fresh = sut.replace(k.clone(), DictValue::Signed(v));
                let prev = model.insert(k, DictValue::Signed(v));
                prop_assert_eq!(fresh, prev.is_none());
            }
            Op::Delete(i) => {
                let k = &pool[i];
                prop_assert_eq!(sut.delete(k), model.remove(k).is_some());
            }
            Op::Unlink(i) => {
                let k = &pool[i];
                match (sut.unlink(k), model.remove(k)) {
                    (Some(e), Some(mv)) => {
                        prop_assert_eq!(e.key(), k);
                        prop_assert_eq!(e.value(), Some(&mv));
                        sut.free_unlinked(e);
                    }
                    (None, None) => {}
                    (s, m) => prop_assert!(false, "unlink mismatch: {:?} vs {:?}", s.is_some(), m),
                }
            }
            Op::Find(i) => {
                let k = &pool[i];
                prop_assert_eq!(sut.fetch_value(k), model.get(k));
            }
            Op::FindMut(i, d) => {
                let k = &pool[i];
                match (sut.find_mut(k), model.get_mut(k)) {
                    (Some(e), Some(mv)) => {
                        let next = DictValue::Signed(d);
                        let old = e.set_value(next.clone());
                        prop_assert_eq!(old.as_ref(), Some(&*mv));
                        *mv = next;
                    }
                    (None, None) => {}
                    (s, m) => prop_assert!(false, "find_mut mismatch: {:?} vs {:?}", s.is_some(), m),
                }
            }
            Op::Rehash(n) => {
                let was = sut.is_rehashing();
                let more = sut.rehash(n);
                prop_assert_eq!(more, sut.is_rehashing());
                if !was {
                    prop_assert!(!more);
                }
            }
            Op::Expand(n) => {
                sut.expand(n);
            }
            Op::ResizeToFit => {
                sut.resize_to_fit();
            }
            Op::SetPolicy(allow) => {
                sut.set_resize_policy(if allow {
                    ResizePolicy::Allow
                } else {
                    ResizePolicy::Avoid
                });
            }
            Op::Iterate => {
                let keys: Vec<Key> = sut.iter().map(|e| e.key().clone()).collect();
                prop_assert_eq!(keys.len(), model.len());
                let s_keys: BTreeSet<Key> = keys.into_iter().collect();
                let m_keys: BTreeSet<Key> = model.keys().cloned().collect();
                prop_assert_eq!(s_keys, m_keys);
                prop_assert_eq!(sut.live_iterators(), 0);
            }
            Op::Scan => {
                let m_keys: BTreeSet<Key> = model.keys().cloned().collect();
                prop_assert_eq!(scan_keys(&sut), m_keys);
            }
        }

        prop_assert_eq!(sut.len(), model.len());
        prop_assert_eq!(sut.is_empty(), model.is_empty());
        for (k, v) in &model {
            prop_assert_eq!(sut.fetch_value(k), Some(v), "key {} lost", k);
        }
        let stats = sut.stats();
        let target_used = stats.target.as_ref().map_or(0, |t| t.used);
        prop_assert_eq!(stats.primary.used + target_used, model.len());
        prop_assert_eq!(stats.target.is_some(), sut.is_rehashing());
        prop_assert_eq!(sut.target_size() > 0, sut.is_rehashing());
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_state_machine((pool, ops) in arb_scenario()) {
        let sut = Dict::with_allocator(
            HashDictType::<Key, i64>::new(),
            DictConfig::default(),
            Allocator::isolated(),
        );
        run_state_machine(sut, &pool, ops)?;
    }
}

// Every key lands in the same bucket; stresses chain walking during
// migration and removal from the middle of long chains.
struct Colliding;
impl DictType for Colliding {
    type Key = Key;
    type Value = i64;
    fn hash(&self, _key: &Key) -> u64 {
        0
    }
    fn key_eq(&self, a: &Key, b: &Key) -> bool {
        a == b
    }
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_state_machine_with_collisions((pool, ops) in arb_scenario()) {
        let sut = Dict::with_allocator(Colliding, DictConfig::default(), Allocator::isolated());
        run_state_machine(sut, &pool, ops)?;
    }

    #[test]
    fn prop_state_machine_multi_bucket_steps((pool, ops) in arb_scenario(), step in 2usize..6) {
        let sut = Dict::with_allocator(
            HashDictType::<Key, i64>::new(),
            DictConfig::default().with_rehash_buckets_per_step(step),
            Allocator::isolated(),
        );
        run_state_machine(sut, &pool, ops)?;
    }
}
