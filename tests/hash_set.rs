use hazindex::hash_set::{AddError, HashSet, RemoveError};
use std::thread;

#[test]
fn growth_and_duplicate() {
    let set = HashSet::new(4);
    let initial_capacity = set.capacity();
    set.add(0, 0).unwrap();
    set.add(0, 1).unwrap();
    set.add(0, 2).unwrap();
    assert!(set.capacity() >= initial_capacity * 2);
    assert!(set.contains(0, 0));
    assert!(set.contains(0, 1));
    assert!(set.contains(0, 2));
    assert_eq!(set.add(0, 1), Err(AddError::Duplicate));
}

#[test]
fn remove_then_absent() {
    let set = HashSet::new(4);
    set.add(0, 42).unwrap();
    assert_eq!(set.remove(0, 42), Ok(()));
    assert_eq!(set.remove(0, 42), Err(RemoveError::Absent));
    assert!(!set.contains(0, 42));
}

#[test]
fn recursive_bucket_chain_is_materialized() {
    let set = HashSet::new(4);
    for k in 0..40u32 {
        set.add(0, k).unwrap();
    }
    for k in 0..40u32 {
        assert!(set.contains(0, k));
    }
}

#[test]
fn concurrent_add_remove_disjoint_keys() {
    let set = HashSet::new(8);
    let mut handles = Vec::new();
    for tid in 0..4usize {
        let set = set.clone();
        handles.push(thread::spawn(move || {
            for i in 0..500u32 {
                let key = tid as u32 * 10_000 + i;
                set.add(tid, key).unwrap();
                assert!(set.contains(tid, key));
                set.remove(tid, key).unwrap();
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }
    for tid in 0..4u32 {
        for i in 0..500u32 {
            assert!(!set.contains(0, tid * 10_000 + i));
        }
    }
}
