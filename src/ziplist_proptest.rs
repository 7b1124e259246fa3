#![cfg(test)]

// Property tests for ZipList against a Vec model. Values are drawn so that
// entries straddle the 254-byte predecessor-length boundary, which is
// where cascading updates happen.

use crate::alloc::Allocator;
use crate::zip_encoding::{decode_entry, prevlen_size, HEADER_SIZE};
use crate::ziplist::{End, Position, ZipList};
use proptest::prelude::*;
use proptest::sample::Index;

#[derive(Clone, Debug)]
enum Op {
    PushHead(Vec<u8>),
    PushTail(Vec<u8>),
    Insert(Index, Vec<u8>),
    Delete(Index),
    DeleteRange(Index, usize),
    Replace(Index, Vec<u8>),
}

fn arb_value() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        (0i64..=12).prop_map(|v| v.to_string().into_bytes()),
        any::<i64>().prop_map(|v| v.to_string().into_bytes()),
        (-(1i64 << 24)..(1i64 << 24)).prop_map(|v| v.to_string().into_bytes()),
        "[a-z0-9+-]{0,10}".prop_map(String::into_bytes),
        (244usize..262).prop_map(|n| vec![b'w'; n]),
        (0usize..600).prop_map(|n| vec![b'v'; n]),
    ]
}

fn arb_ops() -> impl Strategy<Value = Vec<Op>> {
    let op = prop_oneof![
        arb_value().prop_map(Op::PushHead),
        arb_value().prop_map(Op::PushTail),
        (any::<Index>(), arb_value()).prop_map(|(i, v)| Op::Insert(i, v)),
        any::<Index>().prop_map(Op::Delete),
        (any::<Index>(), 1usize..4).prop_map(|(i, n)| Op::DeleteRange(i, n)),
        (any::<Index>(), arb_value()).prop_map(|(i, v)| Op::Replace(i, v)),
    ];
    proptest::collection::vec(op, 1..80)
}

fn position(sut: &ZipList, i: usize) -> Position {
    sut.index(i as isize)
        .expect("valid list")
        .expect("index within model bounds")
}

fn build(model: &[Vec<u8>]) -> ZipList {
    let mut zl = ZipList::new_in(&Allocator::isolated());
    for v in model {
        zl.push(v, End::Tail).expect("push onto valid list");
    }
    zl
}

// State-machine equivalence against Vec<Vec<u8>>. After every op:
// - the buffer passes full structural validation (sizes sum to the
//   total-length field, every predecessor length matches, tail and count
//   are right);
// - every predecessor-length field has its minimal width;
// - the decoded values equal the model, forwards and backwards;
// - the bytes equal a list built from scratch by tail pushes of the model,
//   i.e. the layout does not depend on the edit history.
proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_state_machine(ops in arb_ops()) {
        let alloc = Allocator::isolated();
        let mut sut = ZipList::new_in(&alloc);
        let mut model: Vec<Vec<u8>> = Vec::new();

        for op in ops {
            match op {
                Op::PushHead(v) => {
                    sut.push(&v, End::Head).unwrap();
                    model.insert(0, v);
                }
                Op::PushTail(v) => {
                    sut.push(&v, End::Tail).unwrap();
                    model.push(v);
                }
                Op::Insert(i, v) => {
                    let at = i.index(model.len() + 1);
                    let before = if at == model.len() {
                        Position::from_offset(sut.blob_len() - 1)
                    } else {
                        position(&sut, at)
                    };
                    let p = sut.insert(before, &v).unwrap();
                    prop_assert_eq!(sut.get(p).unwrap().map(|x| x.to_vec()), Some(v.clone()));
                    model.insert(at, v);
                }
                Op::Delete(i) => {
                    if model.is_empty() {
                        continue;
                    }
                    let at = i.index(model.len());
                    let next = sut.delete(position(&sut, at)).unwrap();
                    model.remove(at);
                    let expect = model.get(at).cloned();
                    prop_assert_eq!(sut.get(next).unwrap().map(|x| x.to_vec()), expect);
                }
                Op::DeleteRange(i, n) => {
                    if model.is_empty() {
                        continue;
                    }
                    let at = i.index(model.len());
                    sut.delete_range(position(&sut, at), n).unwrap();
                    let stop = (at + n).min(model.len());
                    model.drain(at..stop);
                }
                Op::Replace(i, v) => {
                    if model.is_empty() {
                        continue;
                    }
                    let at = i.index(model.len());
                    sut.replace(position(&sut, at), &v).unwrap();
                    model[at] = v;
                }
            }

            let copy = ZipList::from_bytes_in(sut.as_bytes().to_vec(), &alloc);
            prop_assert!(copy.is_ok(), "{:?}", copy.err());

            let bytes = sut.as_bytes();
            let end = bytes.len() - 1;
            let mut p = HEADER_SIZE;
            while p != end {
                let e = decode_entry(bytes, p, end).unwrap();
                prop_assert_eq!(e.prev_len_size, prevlen_size(e.prev_len));
                p += e.size();
            }

            let forward: Vec<Vec<u8>> = sut.iter().map(|v| v.unwrap().to_vec()).collect();
            prop_assert_eq!(&forward, &model);
            prop_assert_eq!(sut.len(), model.len());

            let mut backward = Vec::new();
            let mut cur = sut.index(-1).unwrap();
            while let Some(pos) = cur {
                backward.push(sut.get(pos).unwrap().unwrap().to_vec());
                cur = sut.prev(pos).unwrap();
            }
            backward.reverse();
            prop_assert_eq!(&backward, &model);

            let fresh = build(&model);
            prop_assert_eq!(sut.as_bytes(), fresh.as_bytes());
        }

        drop(sut);
        prop_assert_eq!(alloc.used_memory(), 0);
    }
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 256, .. ProptestConfig::default() })]
    // Values come back exactly as pushed; canonical integers are stored in
    // the narrowest class and render back to the same text.
    #[test]
    fn prop_value_round_trip(v in arb_value(), n in any::<i64>()) {
        let mut zl = ZipList::new_in(&Allocator::isolated());
        let text = n.to_string().into_bytes();
        let a = zl.push(&v, End::Tail).unwrap();
        let a_val = zl.get(a).unwrap().unwrap().to_vec();
        prop_assert_eq!(a_val, v.clone());
        let b = zl.push(&text, End::Tail).unwrap();
        prop_assert_eq!(zl.get(b).unwrap(), Some(crate::ziplist::ZipValue::Int(n)));
        prop_assert!(zl.compare(b, &text).unwrap());
        let head = zl.index(0).unwrap().unwrap();
        prop_assert_eq!(zl.find(head, &v, 0).unwrap(), Some(head));
    }
}
