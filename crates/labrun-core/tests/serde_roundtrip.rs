use std::collections::HashMap;

use labrun_core::{from_json_slice, stable_hash_string, to_canonical_json_bytes};

#[test]
fn canonical_json_sorts_keys() {
    let mut map = HashMap::new();
    map.insert("zeta", 1);
    map.insert("alpha", 2);
    map.insert("mid", 3);
    let bytes = to_canonical_json_bytes(&map).expect("serialize");
    assert_eq!(bytes, br#"{"alpha":2,"mid":3,"zeta":1}"#.to_vec());
    let decoded: HashMap<String, i32> = from_json_slice(&bytes).expect("deserialize");
    assert_eq!(decoded.len(), 3);
}

#[test]
fn stable_hash_ignores_insertion_order() {
    let a: HashMap<_, _> = [("x", 1), ("y", 2)].into_iter().collect();
    let b: HashMap<_, _> = [("y", 2), ("x", 1)].into_iter().collect();
    assert_eq!(
        stable_hash_string(&a).expect("hash"),
        stable_hash_string(&b).expect("hash")
    );
}
