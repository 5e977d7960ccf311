// Property tests for the backing tables, kept inside the crate so they can
// drive the `Table` trait directly against a `std` model.

use super::{HashedTable, InsertError, Lookup, OrderedTable, Slot, Table};
use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::hash::Hasher;

// Key newtype with Borrow<str> to exercise borrowed lookup.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
struct Key(String);
impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
impl std::borrow::Borrow<str> for Key {
    fn borrow(&self) -> &str {
        &self.0
    }
}

// Pool-indexed operations shrink well: indices shrink toward earlier keys,
// the pool shrinks, and the op list shrinks in length.
#[derive(Clone, Debug)]
enum Op {
    Insert(usize, i32),
    Remove(usize),
    Find(usize),
    Contains(String),
    Mutate(usize, i32),
    Visit,
}

fn arb_scenario() -> impl Strategy<Value = (Vec<String>, Vec<Op>)> {
    proptest::collection::vec("[a-z]{0,5}", 1..=8).prop_flat_map(|pool| {
        let idxs: Vec<usize> = (0..pool.len()).collect();
        let idx = proptest::sample::select(idxs);
        let contains_pool = proptest::sample::select(pool.clone());
        let op = prop_oneof![
            (idx.clone(), any::<i32>()).prop_map(|(i, v)| Op::Insert(i, v)),
            idx.clone().prop_map(Op::Remove),
            idx.clone().prop_map(Op::Find),
            prop_oneof![contains_pool, "[a-z]{0,5}"].prop_map(Op::Contains),
            (idx.clone(), any::<i32>()).prop_map(|(i, d)| Op::Mutate(i, d)),
            Just(Op::Visit),
        ];
        proptest::collection::vec(op, 1..60).prop_map(move |ops| (pool.clone(), ops))
    })
}

// State-machine equivalence against a BTreeMap model. After every op:
// - stale slots never resolve,
// - `len`/`is_empty` match the model,
// - when `sorted` is set, `for_each` visits keys in ascending order.
fn run_state_machine<T>(
    mut sut: T,
    pool: &[String],
    ops: Vec<Op>,
    sorted: bool,
) -> Result<(), TestCaseError>
where
    T: Table<Key = Key, Value = i32, Slot = Slot> + Lookup<Key> + Lookup<str>,
{
    let mut model: BTreeMap<Key, i32> = BTreeMap::new();
    let mut live: HashMap<Key, Slot> = HashMap::new();
    let mut stale: Vec<Slot> = Vec::new();

    for op in ops {
        match op {
            Op::Insert(i, v) => {
                let k = Key(pool[i].clone());
                let already = model.contains_key(&k);
                match sut.insert(k.clone(), v) {
                    Ok(s) => {
                        prop_assert!(!already, "insert must fail on duplicate");
                        prop_assert!(live.insert(k.clone(), s).is_none());
                        model.insert(k, v);
                    }
                    Err(InsertError::DuplicateKey { slot, key, value }) => {
                        prop_assert!(already, "duplicate error only when key exists");
                        prop_assert_eq!(Some(&slot), live.get(&k));
                        prop_assert_eq!(key, k);
                        prop_assert_eq!(value, v);
                    }
                }
            }
            Op::Remove(i) => {
                let k = Key(pool[i].clone());
                if let Some(s) = live.remove(&k) {
                    let (kk, vv) = sut.remove(s).expect("live slot removable");
                    prop_assert!(kk == k);
                    prop_assert_eq!(Some(vv), model.remove(&kk));
                    stale.push(s);
                } else {
                    prop_assert!(Lookup::<Key>::find(&sut, &k).is_none());
                }
            }
            Op::Find(i) => {
                let k = Key(pool[i].clone());
                let s = Lookup::<Key>::find(&sut, &k);
                prop_assert_eq!(s.is_some(), model.contains_key(&k));
                if let Some(s) = s {
                    prop_assert_eq!(Some(&s), live.get(&k));
                }
            }
            Op::Contains(q) => {
                let has = Lookup::<str>::contains_key(&sut, q.as_str());
                prop_assert_eq!(has, model.keys().any(|k| k.0 == q));
            }
            Op::Mutate(i, d) => {
                let k = Key(pool[i].clone());
                if let Some(&s) = live.get(&k) {
                    let Some(vr) = sut.value_mut(s) else {
                        return Err(TestCaseError::fail("live slot should resolve"));
                    };
                    *vr = vr.wrapping_add(d);
                    if let Some(mv) = model.get_mut(&k) {
                        *mv = mv.wrapping_add(d);
                    }
                }
            }
            Op::Visit => {
                let mut order = Vec::new();
                sut.for_each(|_, k, v| order.push((k.clone(), *v)));
                let visited: BTreeSet<_> = order.iter().map(|(k, _)| k.clone()).collect();
                prop_assert_eq!(visited.len(), order.len(), "each entry visited once");
                if sorted {
                    let expected: Vec<_> = model.iter().map(|(k, v)| (k.clone(), *v)).collect();
                    prop_assert_eq!(order, expected);
                } else {
                    let expected: BTreeSet<_> = model.keys().cloned().collect();
                    prop_assert_eq!(visited, expected);
                }
            }
        }

        for &s in &stale {
            prop_assert!(sut.value(s).is_none());
        }
        prop_assert_eq!(sut.len(), model.len());
        prop_assert_eq!(sut.is_empty(), model.is_empty());
    }
    Ok(())
}

// Forces every key into one bucket to stress equality probing.
#[derive(Clone, Default)]
struct ConstBuildHasher;
struct ConstHasher;
impl std::hash::BuildHasher for ConstBuildHasher {
    type Hasher = ConstHasher;
    fn build_hasher(&self) -> Self::Hasher {
        ConstHasher
    }
}
impl Hasher for ConstHasher {
    fn write(&mut self, _bytes: &[u8]) {}
    fn finish(&self) -> u64 {
        0
    }
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]

    #[test]
    fn prop_hashed_state_machine((pool, ops) in arb_scenario()) {
        run_state_machine(HashedTable::<Key, i32>::new(), &pool, ops, false)?;
    }

    #[test]
    fn prop_hashed_state_machine_with_collisions((pool, ops) in arb_scenario()) {
        let t: HashedTable<Key, i32, ConstBuildHasher> = HashedTable::with_hasher(ConstBuildHasher);
        run_state_machine(t, &pool, ops, false)?;
    }

    #[test]
    fn prop_ordered_state_machine((pool, ops) in arb_scenario()) {
        run_state_machine(OrderedTable::<Key, i32>::new(), &pool, ops, true)?;
    }
}
