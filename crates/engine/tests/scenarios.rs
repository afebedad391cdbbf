//! End-to-end scenarios over the public batch API

use lattice_engine::{
    Arena, CollectionId, Database, ReadOptions, ReadTasks, ScanTasks, TransactionOptions,
    WriteOptions, WriteTasks, LEN_MISSING,
};

fn open() -> Database {
    Database::open("").unwrap()
}

#[test]
fn single_put_get() {
    let db = open();
    let mut arena = Arena::new();

    let keys = [7u64];
    let values = [Some(&b"hi"[..])];
    db.write(
        None,
        &WriteTasks::puts(&keys, &values).unwrap(),
        WriteOptions::new(),
    )
    .unwrap();

    let tape = db
        .read(None, &ReadTasks::new(&keys), ReadOptions::new(), &mut arena)
        .unwrap();
    assert_eq!(tape.value_len(0), Some(2));
    assert_eq!(tape.value(0), Some(&b"hi"[..]));
}

#[test]
fn missing_key_reads_as_len_missing() {
    let db = open();
    let mut arena = Arena::new();

    let keys = [42u64];
    let tape = db
        .read(None, &ReadTasks::new(&keys), ReadOptions::new(), &mut arena)
        .unwrap();
    assert_eq!(tape.value_len(0), Some(LEN_MISSING));
    assert!(tape.is_missing(0));
    assert_eq!(tape.value(0), None);
}

#[test]
fn delete_via_null_value() {
    let db = open();
    let mut arena = Arena::new();

    let keys = [5u64];
    let live = [Some(&b"x"[..])];
    db.write(
        None,
        &WriteTasks::puts(&keys, &live).unwrap(),
        WriteOptions::new(),
    )
    .unwrap();

    // A null value is a delete.
    let dead: [Option<&[u8]>; 1] = [None];
    db.write(
        None,
        &WriteTasks::puts(&keys, &dead).unwrap(),
        WriteOptions::new(),
    )
    .unwrap();

    let tape = db
        .read(None, &ReadTasks::new(&keys), ReadOptions::new(), &mut arena)
        .unwrap();
    assert_eq!(tape.value_len(0), Some(LEN_MISSING));
}

#[test]
fn zero_length_value_is_present() {
    let db = open();
    let mut arena = Arena::new();

    let keys = [9u64];
    let values = [Some(&b""[..])];
    db.write(
        None,
        &WriteTasks::puts(&keys, &values).unwrap(),
        WriteOptions::new(),
    )
    .unwrap();

    let tape = db
        .read(None, &ReadTasks::new(&keys), ReadOptions::new(), &mut arena)
        .unwrap();
    assert_eq!(tape.value_len(0), Some(0));
    assert_eq!(tape.value(0), Some(&b""[..]));
}

#[test]
fn transactional_atomicity() {
    let db = open();
    let mut arena = Arena::new();

    let mut txn = db.begin_transaction(TransactionOptions::new()).unwrap();
    txn.put(CollectionId::DEFAULT, 1, b"a").unwrap();
    txn.put(CollectionId::DEFAULT, 2, b"b").unwrap();

    // Nothing visible before commit.
    let keys = [1u64, 2];
    let before = db
        .read(None, &ReadTasks::new(&keys), ReadOptions::new(), &mut arena)
        .unwrap();
    assert!(before.is_missing(0));
    assert!(before.is_missing(1));

    txn.commit().unwrap();

    let after = db
        .read(None, &ReadTasks::new(&keys), ReadOptions::new(), &mut arena)
        .unwrap();
    assert_eq!(after.value(0), Some(&b"a"[..]));
    assert_eq!(after.value(1), Some(&b"b"[..]));
}

#[test]
fn aborted_transaction_leaves_no_trace() {
    let db = open();

    let mut txn = db.begin_transaction(TransactionOptions::new()).unwrap();
    txn.put(CollectionId::DEFAULT, 1, b"a").unwrap();
    txn.put(CollectionId::DEFAULT, 2, b"b").unwrap();
    txn.abort();

    assert!(db.get(CollectionId::DEFAULT, 1).unwrap().is_none());
    assert!(db.get(CollectionId::DEFAULT, 2).unwrap().is_none());
}

#[test]
fn batch_read_mixed_presence() {
    let db = open();
    let mut arena = Arena::new();

    db.put(CollectionId::DEFAULT, 1, b"one").unwrap();
    db.put(CollectionId::DEFAULT, 3, b"three").unwrap();

    let keys = [1u64, 2, 3, 4];
    let tape = db
        .read(None, &ReadTasks::new(&keys), ReadOptions::new(), &mut arena)
        .unwrap();
    assert_eq!(tape.value(0), Some(&b"one"[..]));
    assert!(tape.is_missing(1));
    assert_eq!(tape.value(2), Some(&b"three"[..]));
    assert!(tape.is_missing(3));
}

#[test]
fn writes_in_one_collection_invisible_in_another() {
    let db = open();
    let other = db.collection_open(Some("side")).unwrap();

    db.put(CollectionId::DEFAULT, 1, b"default").unwrap();
    db.put(other, 1, b"side").unwrap();

    assert_eq!(
        db.get(CollectionId::DEFAULT, 1).unwrap().as_deref(),
        Some(&b"default"[..])
    );
    assert_eq!(db.get(other, 1).unwrap().as_deref(), Some(&b"side"[..]));

    db.delete(other, 1).unwrap();
    assert!(db.get(other, 1).unwrap().is_none());
    assert!(db.get(CollectionId::DEFAULT, 1).unwrap().is_some());
}

#[test]
fn scan_returns_live_keys_ascending() {
    let db = open();
    let mut arena = Arena::new();

    for key in [50u64, 10, 30, 20, 40] {
        db.put(CollectionId::DEFAULT, key, b"v").unwrap();
    }
    db.delete(CollectionId::DEFAULT, 30).unwrap();

    let min_keys = [0u64];
    let lengths = [10u32];
    let tape = db
        .scan(
            None,
            &ScanTasks::new(&min_keys, &lengths).unwrap(),
            ReadOptions::new(),
            &mut arena,
        )
        .unwrap();

    assert_eq!(tape.found(0), Some(4));
    assert_eq!(tape.keys(0).collect::<Vec<_>>(), vec![10, 20, 40, 50]);
    assert_eq!(tape.value_len(0, 0), Some(1));
}

#[test]
fn scan_hitting_end_of_collection_yields_fewer() {
    let db = open();
    let mut arena = Arena::new();

    db.put(CollectionId::DEFAULT, 1, b"a").unwrap();
    db.put(CollectionId::DEFAULT, 2, b"bb").unwrap();

    let min_keys = [0u64, 2];
    let lengths = [10u32, 10];
    let tape = db
        .scan(
            None,
            &ScanTasks::new(&min_keys, &lengths).unwrap(),
            ReadOptions::new(),
            &mut arena,
        )
        .unwrap();

    assert_eq!(tape.task_count(), 2);
    assert_eq!(tape.found(0), Some(2));
    assert_eq!(tape.found(1), Some(1));
    assert_eq!(tape.key(1, 0), Some(2));
    assert_eq!(tape.value_len(1, 0), Some(2));
}

#[test]
fn scan_inside_transaction_merges_staged_writes() {
    let db = open();
    let mut arena = Arena::new();

    db.put(CollectionId::DEFAULT, 10, b"a").unwrap();
    db.put(CollectionId::DEFAULT, 20, b"b").unwrap();

    let mut txn = db.begin_transaction(TransactionOptions::new()).unwrap();
    txn.delete(CollectionId::DEFAULT, 20).unwrap();
    txn.put(CollectionId::DEFAULT, 15, b"staged").unwrap();

    let min_keys = [0u64];
    let lengths = [10u32];
    let tape = db
        .scan(
            Some(&mut txn),
            &ScanTasks::new(&min_keys, &lengths).unwrap(),
            ReadOptions::new(),
            &mut arena,
        )
        .unwrap();
    assert_eq!(tape.keys(0).collect::<Vec<_>>(), vec![10, 15]);
    txn.abort();
}

#[test]
fn replaying_committed_writes_reproduces_final_state() {
    // Sequential sanity version of the concurrent replay property:
    // applying W1..Wn in commit order to an empty store ends in the
    // same state.
    let db = open();
    let mut log: Vec<(u64, u64, Option<Vec<u8>>)> = Vec::new();

    for round in 0..100u64 {
        let key = round % 10;
        if round % 7 == 3 {
            let sequence = db.delete(CollectionId::DEFAULT, key).unwrap();
            log.push((sequence, key, None));
        } else {
            let value = round.to_le_bytes().to_vec();
            let sequence = db.put(CollectionId::DEFAULT, key, &value).unwrap();
            log.push((sequence, key, Some(value)));
        }
    }

    log.sort_by_key(|(sequence, _, _)| *sequence);
    let replay = open();
    for (_, key, value) in &log {
        match value {
            Some(value) => {
                replay.put(CollectionId::DEFAULT, *key, value).unwrap();
            }
            None => {
                replay.delete(CollectionId::DEFAULT, *key).unwrap();
            }
        }
    }

    for key in 0..10u64 {
        assert_eq!(
            db.get(CollectionId::DEFAULT, key).unwrap(),
            replay.get(CollectionId::DEFAULT, key).unwrap(),
            "key {key} diverged"
        );
    }
}

#[test]
fn arena_views_survive_until_next_use() {
    let db = open();
    let mut arena = Arena::new();
    db.put(CollectionId::DEFAULT, 1, b"first").unwrap();
    db.put(CollectionId::DEFAULT, 2, b"second").unwrap();

    let keys = [1u64];
    let tape = db
        .read(None, &ReadTasks::new(&keys), ReadOptions::new(), &mut arena)
        .unwrap();
    let copied = tape.value(0).unwrap().to_vec();

    // The next call reuses the arena; the old tape is gone by then
    // (enforced at compile time) and the copy is what persists.
    let keys = [2u64];
    let tape = db
        .read(None, &ReadTasks::new(&keys), ReadOptions::new(), &mut arena)
        .unwrap();
    assert_eq!(copied, b"first");
    assert_eq!(tape.value(0), Some(&b"second"[..]));
}
