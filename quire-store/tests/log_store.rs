mod common;

use common::*;
use quire_model::{
    compute_id, is_first_older, Entry, EntryId, Hash, MetaPatch, MockClock, Scope, Watermark,
};
use quire_store::{
    AddOptions, AddOutcome, Conflict, Direction, IndexSelector, IngestOutcome, PageQuery,
    Prepared, Rejection, StoreError, SyncedUpdate,
};
use std::ops::ControlFlow;
use std::sync::{Arc, Barrier};

fn watermark_at(store: &quire_store::LogStore, local_seq: u64) -> Watermark {
    let query = PageQuery::new(IndexSelector::Device(store.device().clone()))
        .ascending()
        .limit(1000);
    let page = store.page(&query).unwrap();
    page.entries
        .iter()
        .find(|e| e.metadata.local_seq() == local_seq)
        .map(|e| e.metadata.watermark())
        .unwrap()
}

#[test]
fn first_add_on_empty_store() {
    let clock = MockClock::new(T0);
    let store = memory_store("laptop", 1, &clock);

    let meta = store
        .add(note(0), AddOptions::default())
        .unwrap()
        .added()
        .unwrap();

    assert_eq!(meta.local_seq(), 0);
    assert_eq!(meta.body.prev, None);
    assert_eq!(meta.timestamp(), T0);
    assert_eq!(meta.device().as_str(), "laptop");
    assert!(meta.signature.is_some());
    assert!(meta.verify().is_ok());

    let last = store.last_added().unwrap().unwrap();
    assert_eq!(last, meta.watermark());
    assert_eq!(last.local_seq, 0);
    assert_eq!(last.seq.timestamp, T0);
    assert_eq!(store.last_synced().unwrap(), None);
}

#[test]
fn local_seq_and_prev_form_a_chain() {
    let clock = MockClock::new(T0);
    let store = memory_store("laptop", 1, &clock);
    let mut prev: Option<EntryId> = None;
    for n in 0..5 {
        let meta = store
            .add(note(n), AddOptions::default())
            .unwrap()
            .added()
            .unwrap();
        assert_eq!(meta.local_seq(), n);
        assert_eq!(meta.body.prev, prev);
        prev = Some(meta.id);
    }
    assert_eq!(store.len().unwrap(), 5);
}

#[test]
fn timestamps_never_go_backwards() {
    let clock = MockClock::new(T0);
    let store = memory_store("laptop", 1, &clock);
    let first = store.add(note(0), AddOptions::default()).unwrap().added().unwrap();

    clock.set(T0 - 60_000);
    let second = store.add(note(1), AddOptions::default()).unwrap().added().unwrap();

    assert_eq!(second.timestamp(), first.timestamp());
    assert!(is_first_older(&first, &second));
}

#[test]
fn explicit_prev_must_exist() {
    let clock = MockClock::new(T0);
    let store = memory_store("laptop", 1, &clock);
    let root = store.add(note(0), AddOptions::default()).unwrap().added().unwrap();
    store.add(note(1), AddOptions::default()).unwrap();

    let options = AddOptions {
        prev: Some(root.id),
        ..AddOptions::default()
    };
    let branch = store.add(note(2), options).unwrap().added().unwrap();
    assert_eq!(branch.body.prev, Some(root.id));
    assert_eq!(branch.local_seq(), 2);
}

#[test]
fn set_last_synced_is_idempotent_and_monotonic() {
    let clock = MockClock::new(T0);
    let store = memory_store("laptop", 1, &clock);
    fill(&store, &clock, 6);

    let w3 = watermark_at(&store, 3);
    let w5 = watermark_at(&store, 5);

    assert_eq!(store.set_last_synced(&w5).unwrap(), SyncedUpdate::Advanced);
    assert_eq!(store.set_last_synced(&w5).unwrap(), SyncedUpdate::Unchanged);

    let err = store.set_last_synced(&w3).unwrap_err();
    assert!(matches!(err, StoreError::WatermarkRegression { .. }));
    assert_eq!(store.last_synced().unwrap(), Some(w5));
}

#[test]
fn set_last_synced_cannot_pass_last_added() {
    let clock = MockClock::new(T0);
    let store = memory_store("laptop", 1, &clock);
    fill(&store, &clock, 2);

    let mut ahead = store.last_added().unwrap().unwrap();
    ahead.local_seq = 7;
    ahead.seq.local_seq = 7;
    assert!(matches!(
        store.set_last_synced(&ahead),
        Err(StoreError::WatermarkAhead { .. })
    ));
    assert_eq!(store.last_synced().unwrap(), None);
}

#[test]
fn concurrent_prepare_of_same_local_seq_conflicts() {
    let clock = MockClock::new(T0);
    let store = memory_store("laptop", 1, &clock);
    fill(&store, &clock, 3);

    let first = match store.prepare(note(10), AddOptions::default()).unwrap() {
        Prepared::Ready(pending) => pending,
        Prepared::AlreadyExists(c) => panic!("first prepare conflicted: {c:?}"),
    };
    assert_eq!(first.metadata().local_seq(), 3);

    match store.prepare(note(11), AddOptions::default()).unwrap() {
        Prepared::AlreadyExists(Conflict::LocalSeqInFlight(3)) => {}
        Prepared::AlreadyExists(other) => panic!("wrong conflict {other:?}"),
        Prepared::Ready(_) => panic!("second prepare should conflict"),
    }

    let committed = first.commit().unwrap().added().unwrap();
    assert_eq!(committed.local_seq(), 3);
    assert_eq!(store.last_added().unwrap().unwrap().local_seq, 3);

    let retried = store.add(note(11), AddOptions::default()).unwrap().added().unwrap();
    assert_eq!(retried.local_seq(), 4);
}

#[test]
fn racing_threads_produce_contiguous_local_seqs() {
    const THREADS: usize = 8;
    const PER_THREAD: usize = 10;

    let clock = MockClock::new(T0);
    let store = Arc::new(memory_store("laptop", 1, &clock));
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let store = store.clone();
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                barrier.wait();
                for i in 0..PER_THREAD {
                    loop {
                        let content = note((t * 100 + i) as u64);
                        match store.add(content, AddOptions::default()).unwrap() {
                            AddOutcome::Added(_) => break,
                            AddOutcome::AlreadyExists(_) => std::thread::yield_now(),
                        }
                    }
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let total = (THREADS * PER_THREAD) as u64;
    assert_eq!(store.len().unwrap(), total);
    assert_eq!(store.last_added().unwrap().unwrap().local_seq, total - 1);
    let seqs: Vec<u64> = store
        .get_diff(None)
        .map(|e| e.unwrap().metadata.local_seq())
        .collect();
    assert_eq!(seqs, (0..total).collect::<Vec<_>>());
}

#[test]
fn change_meta_rescopes_without_touching_identity() {
    let clock = MockClock::new(T0);
    let store = memory_store("laptop", 1, &clock);
    let meta = store
        .add(note(0), AddOptions::scoped(Scope::new("old").unwrap()))
        .unwrap()
        .added()
        .unwrap();

    assert!(store
        .change_meta(&meta.id, &MetaPatch::rescope(Scope::new("new").unwrap()))
        .unwrap());

    let entry = store.by_id(&meta.id).unwrap().unwrap();
    assert_eq!(entry.metadata, meta);
    assert_eq!(entry.effective_scope().as_str(), "new");
    assert_eq!(entry.admin.scope.as_ref().map(Scope::as_str), Some("new"));

    let old = store
        .page(&PageQuery::new(IndexSelector::Scope(Scope::new("old").unwrap())))
        .unwrap();
    assert!(old.entries.is_empty());
    let new = store
        .page(&PageQuery::new(IndexSelector::Scope(Scope::new("new").unwrap())))
        .unwrap();
    assert_eq!(new.entries.len(), 1);

    let unknown = EntryId(Hash::digest(b"missing"));
    assert!(!store.change_meta(&unknown, &MetaPatch::default().synced(true)).unwrap());
}

#[test]
fn remove_is_a_hard_delete() {
    let clock = MockClock::new(T0);
    let store = memory_store("laptop", 1, &clock);
    fill(&store, &clock, 3);
    let target = watermark_at(&store, 1);

    let removed = store.remove(&target.id).unwrap().unwrap();
    assert_eq!(removed.metadata.local_seq(), 1);
    assert!(store.by_id(&target.id).unwrap().is_none());
    assert!(store.remove(&target.id).unwrap().is_none());

    let seqs: Vec<u64> = store
        .get_diff(None)
        .map(|e| e.unwrap().metadata.local_seq())
        .collect();
    assert_eq!(seqs, vec![0, 2]);
    assert_eq!(store.heads().unwrap()[store.device()], 2);

    // localSeq values are never reused.
    let next = store.add(note(9), AddOptions::default()).unwrap().added().unwrap();
    assert_eq!(next.local_seq(), 3);
}

#[test]
fn diff_returns_exactly_the_unsynced_suffix() {
    let clock = MockClock::new(T0);
    let store = memory_store("laptop", 1, &clock).with_diff_batch(3);
    fill(&store, &clock, 10);

    let all: Vec<u64> = store
        .get_diff(None)
        .map(|e| e.unwrap().metadata.local_seq())
        .collect();
    assert_eq!(all, (0..10).collect::<Vec<_>>());

    let tail: Vec<u64> = store
        .get_diff(Some(7))
        .map(|e| e.unwrap().metadata.local_seq())
        .collect();
    assert_eq!(tail, vec![8, 9]);

    assert_eq!(store.get_diff(Some(9)).count(), 0);
    assert_eq!(store.get_diff(Some(u64::MAX)).count(), 0);

    // Restart from the middle of an interrupted walk.
    let first_half: Vec<u64> = store
        .get_diff(None)
        .take(4)
        .map(|e| e.unwrap().metadata.local_seq())
        .collect();
    let rest: Vec<u64> = store
        .get_diff(first_half.last().copied())
        .map(|e| e.unwrap().metadata.local_seq())
        .collect();
    assert_eq!(rest, (4..10).collect::<Vec<_>>());
}

#[test]
fn pages_walk_every_index_in_both_directions() {
    let clock = MockClock::new(T0);
    let store = memory_store("laptop", 1, &clock);
    for n in 0..7u64 {
        let scope = if n % 2 == 0 { "even" } else { "odd" };
        store
            .add(note(n), AddOptions::scoped(Scope::new(scope).unwrap()))
            .unwrap();
        clock.advance(10);
    }

    // Default direction is newest first.
    let first = store.page(&PageQuery::new(IndexSelector::Seq).limit(3)).unwrap();
    let seqs: Vec<u64> = first.entries.iter().map(|e| e.metadata.local_seq()).collect();
    assert_eq!(seqs, vec![6, 5, 4]);
    let cursor = first.next.clone().unwrap();

    let second = store
        .page(&PageQuery::new(IndexSelector::Seq).limit(3).after(cursor))
        .unwrap();
    let seqs: Vec<u64> = second.entries.iter().map(|e| e.metadata.local_seq()).collect();
    assert_eq!(seqs, vec![3, 2, 1]);

    let third = store
        .page(&PageQuery::new(IndexSelector::Seq).limit(3).after(second.next.unwrap()))
        .unwrap();
    assert_eq!(third.entries.len(), 1);
    assert!(third.next.is_none());

    let odd = store
        .page(&PageQuery::new(IndexSelector::Scope(Scope::new("odd").unwrap())).ascending())
        .unwrap();
    let seqs: Vec<u64> = odd.entries.iter().map(|e| e.metadata.local_seq()).collect();
    assert_eq!(seqs, vec![1, 3, 5]);

    let window = store
        .page(
            &PageQuery::new(IndexSelector::Time {
                from: Some(T0 + 20),
                to: Some(T0 + 40),
            })
            .ascending(),
        )
        .unwrap();
    let seqs: Vec<u64> = window.entries.iter().map(|e| e.metadata.local_seq()).collect();
    assert_eq!(seqs, vec![2, 3, 4]);

    let query = PageQuery {
        index: IndexSelector::Device(store.device().clone()),
        direction: Direction::Descending,
        limit: 2,
        cursor: None,
    };
    let chain = store.page(&query).unwrap();
    let seqs: Vec<u64> = chain.entries.iter().map(|e| e.metadata.local_seq()).collect();
    assert_eq!(seqs, vec![6, 5]);
}

#[test]
fn cursor_never_leaves_the_selected_scope() {
    let clock = MockClock::new(T0);
    let store = memory_store("laptop", 1, &clock);
    for (n, scope) in ["a", "a", "a", "b", "b"].into_iter().enumerate() {
        store
            .add(note(n as u64), AddOptions::scoped(Scope::new(scope).unwrap()))
            .unwrap();
        clock.advance(1);
    }
    let by_scope = |name: &str| PageQuery::new(IndexSelector::Scope(Scope::new(name).unwrap()));
    let scopes = |page: &quire_store::Page| -> Vec<String> {
        page.entries
            .iter()
            .map(|e| e.effective_scope().as_str().to_string())
            .collect()
    };

    let a_cursor = store
        .page(&by_scope("a").ascending().limit(1))
        .unwrap()
        .next
        .unwrap();
    let b_page = store
        .page(&by_scope("b").ascending().after(a_cursor.clone()))
        .unwrap();
    assert_eq!(scopes(&b_page), vec!["b", "b"]);

    // Descending from a cursor below the scope's range is past its end.
    let b_desc = store.page(&by_scope("b").after(a_cursor)).unwrap();
    assert!(b_desc.entries.is_empty());
    assert!(b_desc.next.is_none());

    let b_cursor = store.page(&by_scope("b").limit(1)).unwrap().next.unwrap();
    let a_desc = store.page(&by_scope("a").after(b_cursor.clone())).unwrap();
    assert_eq!(scopes(&a_desc), vec!["a", "a", "a"]);
    let a_asc = store.page(&by_scope("a").ascending().after(b_cursor)).unwrap();
    assert!(a_asc.entries.is_empty());
}

#[test]
fn scan_stops_when_the_callback_breaks() {
    let clock = MockClock::new(T0);
    let store = memory_store("laptop", 1, &clock);
    fill(&store, &clock, 10);

    let mut seen = Vec::new();
    let visited = store
        .scan(&PageQuery::new(IndexSelector::Seq).ascending(), |entry| {
            seen.push(entry.metadata.local_seq());
            if seen.len() == 4 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })
        .unwrap();
    assert_eq!(visited, 4);
    assert_eq!(seen, vec![0, 1, 2, 3]);
}

#[test]
fn ingest_round_trips_remote_entries() {
    let clock = MockClock::new(T0);
    let phone = memory_store("phone", 2, &clock);
    let server = memory_store("server", 3, &clock);
    fill(&phone, &clock, 3);

    for entry in phone.get_diff(None) {
        let entry = entry.unwrap();
        let outcome = server.ingest(entry.clone()).unwrap();
        assert!(matches!(outcome, IngestOutcome::Applied(_)));
        let stored = server.by_id(&entry.id()).unwrap().unwrap();
        assert_eq!(stored.metadata, entry.metadata);
        assert_eq!(stored.content, entry.content);
    }

    let again = phone.get_diff(None).next().unwrap().unwrap();
    assert!(matches!(server.ingest(again).unwrap(), IngestOutcome::Duplicate(_)));
    assert_eq!(server.heads().unwrap()[&device("phone")], 2);
    // Foreign entries never move the receiver's own watermarks.
    assert_eq!(server.last_added().unwrap(), None);
}

#[test]
fn ingest_rejects_tampered_entries() {
    let clock = MockClock::new(T0);
    let phone = memory_store("phone", 2, &clock);
    let server = memory_store("server", 3, &clock);
    fill(&phone, &clock, 1);
    let original = phone.get_diff(None).next().unwrap().unwrap();

    let mut forged = original.clone();
    forged.metadata.body.scope = Scope::new("public").unwrap();
    assert!(matches!(
        server.ingest(forged.clone()).unwrap(),
        IngestOutcome::Rejected(Rejection::Invalid(_))
    ));

    forged.metadata.id =
        compute_id(&forged.metadata.body, forged.metadata.signature.as_ref()).unwrap();
    assert!(matches!(
        server.ingest(forged).unwrap(),
        IngestOutcome::Rejected(Rejection::Invalid(_))
    ));
    assert!(server.is_empty().unwrap());
}

#[test]
fn ingest_refuses_a_second_entry_for_an_occupied_slot() {
    let clock = MockClock::new(T0);
    let phone = memory_store("phone", 2, &clock);
    let impostor = memory_store("phone", 2, &clock);
    let server = memory_store("server", 3, &clock);
    phone.add(note(1), AddOptions::default()).unwrap();
    impostor.add(note(2), AddOptions::default()).unwrap();

    let a = phone.get_diff(None).next().unwrap().unwrap();
    let b = impostor.get_diff(None).next().unwrap().unwrap();
    assert!(server.ingest(a.clone()).unwrap().held().is_some());
    match server.ingest(b).unwrap() {
        IngestOutcome::Rejected(Rejection::SlotTaken { existing, local_seq, .. }) => {
            assert_eq!(existing, a.id());
            assert_eq!(local_seq, 0);
        }
        other => panic!("expected SlotTaken, got {other:?}"),
    }
}

#[test]
fn ingest_of_own_history_advances_last_added() {
    let clock = MockClock::new(T0);
    let original = memory_store("laptop", 1, &clock);
    fill(&original, &clock, 4);

    // Same device, fresh storage: history comes back from the server.
    let restored = memory_store("laptop", 1, &clock);
    let history: Vec<Entry> = original.get_diff(None).map(Result::unwrap).collect();
    for entry in history.iter().rev() {
        restored.ingest(entry.clone()).unwrap();
    }
    assert_eq!(
        restored.last_added().unwrap(),
        original.last_added().unwrap()
    );

    let next = restored.add(note(9), AddOptions::default()).unwrap().added().unwrap();
    assert_eq!(next.local_seq(), 4);
    assert_eq!(next.body.prev, Some(history[3].id()));
}

#[test]
fn file_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let clock = MockClock::new(T0);
    let (added, synced) = {
        let store = file_store(dir.path(), "laptop", 1, &clock);
        fill(&store, &clock, 3);
        let w1 = watermark_at(&store, 1);
        store.set_last_synced(&w1).unwrap();
        (store.last_added().unwrap(), w1)
    };

    let store = file_store(dir.path(), "laptop", 1, &clock);
    assert_eq!(store.last_added().unwrap(), added);
    assert_eq!(store.last_synced().unwrap(), Some(synced));
    assert_eq!(store.len().unwrap(), 3);
    drop(store);

    let other = quire_store::LogStore::open(
        &quire_model::StorageConfig::File(dir.path().to_path_buf()),
        identity("phone", 2),
    );
    assert!(matches!(other, Err(StoreError::InvalidData(_))));
}
