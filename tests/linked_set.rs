use hazindex::linked_set::{InsertError, LinkedSet, RemoveError};
use std::thread;

#[test]
fn single_thread() {
    let s = LinkedSet::new(4);
    s.insert(0, 5).unwrap();
    s.insert(0, 3).unwrap();
    s.insert(0, 8).unwrap();
    assert_eq!(s.insert(0, 3), Err(InsertError::Duplicate));
    assert_eq!(s.remove(0, 5), Ok(()));
    assert_eq!(s.remove(0, 5), Err(RemoveError::Absent));
    assert!(s.contains(0, 8));
    assert!(!s.contains(0, 5));
}

#[test]
fn producer_consumer() {
    let set = LinkedSet::new(4);

    let inserter = {
        let set = set.clone();
        thread::spawn(move || {
            for i in 0..5_000 {
                set.insert(0, i).unwrap();
            }
        })
    };

    let remover = {
        let set = set.clone();
        thread::spawn(move || {
            for i in 0..5_000 {
                loop {
                    if set.remove(1, i).is_ok() {
                        break;
                    }
                }
            }
        })
    };

    inserter.join().unwrap();
    remover.join().unwrap();

    for i in 0..5_000 {
        assert!(!set.contains(0, i));
    }
}

#[test]
fn concurrent_disjoint_inserts_are_all_visible() {
    let set = LinkedSet::new(8);
    let mut handles = Vec::new();
    for tid in 0..4usize {
        let set = set.clone();
        handles.push(thread::spawn(move || {
            for i in 0..1_000usize {
                let key = (tid * 10_000 + i) as i64;
                set.insert(tid, key).unwrap();
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }
    for tid in 0..4i64 {
        for i in 0..1_000i64 {
            assert!(set.contains(0, tid * 10_000 + i));
        }
    }
}
