use std::collections::{BTreeMap, HashMap, HashSet};

use crate::{StableHash, StableHasher, hash_128};

fn hash_of<T: StableHash + ?Sized>(value: &T) -> u128 {
    hash_128(value, 0)
}

#[test]
fn primitives_are_deterministic() {
    assert_eq!(hash_of(&42u64), hash_of(&42u64));
    assert_ne!(hash_of(&42u64), hash_of(&43u64));
    assert_ne!(hash_of(&42u64), hash_of(&42u32));
}

#[test]
fn seed_changes_hash() {
    assert_ne!(hash_128(&7u8, 0), hash_128(&7u8, 1));
}

#[test]
fn string_length_prefix_separates_fields() {
    // ("ab", "c") must not collide with ("a", "bc")
    assert_ne!(
        hash_of(&("ab".to_owned(), "c".to_owned())),
        hash_of(&("a".to_owned(), "bc".to_owned()))
    );
}

#[test]
fn hash_map_is_order_insensitive() {
    let mut a = HashMap::new();
    a.insert("x".to_owned(), 1u32);
    a.insert("y".to_owned(), 2u32);

    let mut b = HashMap::new();
    b.insert("y".to_owned(), 2u32);
    b.insert("x".to_owned(), 1u32);

    assert_eq!(hash_of(&a), hash_of(&b));
}

#[test]
fn hash_set_differs_from_empty() {
    let mut set = HashSet::new();
    set.insert(1u64);

    assert_ne!(hash_of(&set), hash_of(&HashSet::<u64>::new()));
}

#[test]
fn btree_map_hashes_in_key_order() {
    let mut a = BTreeMap::new();
    a.insert(2u8, "b".to_owned());
    a.insert(1u8, "a".to_owned());

    let mut b = BTreeMap::new();
    b.insert(1u8, "a".to_owned());
    b.insert(2u8, "b".to_owned());

    assert_eq!(hash_of(&a), hash_of(&b));
}

#[test]
fn option_disambiguates_none_and_default() {
    assert_ne!(hash_of(&None::<u8>), hash_of(&Some(0u8)));
}

#[test]
fn derive_on_struct_and_enum() {
    #[derive(StableHash)]
    struct Point {
        x: i32,
        y: i32,
    }

    #[derive(StableHash)]
    enum Shape {
        Dot,
        Line(Point, Point),
        Poly { points: Vec<Point> },
    }

    let line = Shape::Line(Point { x: 0, y: 0 }, Point { x: 1, y: 1 });
    let same = Shape::Line(Point { x: 0, y: 0 }, Point { x: 1, y: 1 });
    assert_eq!(hash_of(&line), hash_of(&same));

    assert_ne!(hash_of(&Shape::Dot), hash_of(&Shape::Poly { points: vec![] }));
}

#[test]
fn sub_hash_matches_direct_hash() {
    let mut hasher = crate::Sip128Hasher::new();
    let sub = hasher.sub_hash(&mut |h| 99u64.stable_hash(h));

    let mut direct = crate::Sip128Hasher::new();
    99u64.stable_hash(&mut direct);

    assert_eq!(sub, StableHasher::finish(&direct));
}
