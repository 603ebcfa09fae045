//! # Order Book Scenario Tests
//!
//! End-to-end behavior of the exchange state through the public API, run
//! under both key schemes.

use primitive_types::U256;
use qc_18_dex_state::{
    order_triples, BookId, DexState, DexStateApi, DexStateConfig, DexStateError,
    DexStateService, DumpOrderList, InMemoryTrieDb, KeyScheme, Side, VolumeDelta,
};
use std::collections::BTreeMap;
use std::sync::Arc;

const SCHEMES: [KeyScheme; 2] = [KeyScheme::Ordered, KeyScheme::Secure];

fn u(n: u64) -> U256 {
    U256::from(n)
}

fn fresh(scheme: KeyScheme) -> DexState {
    DexState::new(
        Arc::new(InMemoryTrieDb::new()),
        DexStateConfig::default().with_key_scheme(scheme),
    )
    .unwrap()
}

fn level(volume: u64, orders: &[(u64, u64)]) -> DumpOrderList {
    DumpOrderList {
        volume: u(volume),
        orders: orders.iter().map(|(id, v)| (u(*id), u(*v))).collect(),
    }
}

/// BOOK1 with asks 100 -> {1: 5, 2: 3} and 90 -> {3: 10}.
fn book1(state: &mut DexState) -> BookId {
    let book = BookId::from_name("BOOK1");
    state.place(book, Side::Ask, u(100), u(1), u(5)).unwrap();
    state.place(book, Side::Ask, u(100), u(2), u(3)).unwrap();
    state.place(book, Side::Ask, u(90), u(3), u(10)).unwrap();
    book
}

// =============================================================================
// SCENARIOS
// =============================================================================

#[test]
fn test_book1_best_ask_and_dump() {
    for scheme in SCHEMES {
        let mut state = fresh(scheme);
        let book = book1(&mut state);

        assert_eq!(state.best_ask(book).unwrap(), Some((u(90), u(10))));

        let mut expected = BTreeMap::new();
        expected.insert(u(90), level(10, &[(3, 10)]));
        expected.insert(u(100), level(8, &[(1, 5), (2, 3)]));
        assert_eq!(state.dump_asks(book).unwrap(), expected);
    }
}

#[test]
fn test_book1_after_removing_best_level() {
    for scheme in SCHEMES {
        let mut state = fresh(scheme);
        let book = book1(&mut state);

        assert_eq!(state.cancel(book, Side::Ask, u(90), u(3)).unwrap(), Some(u(10)));
        assert_eq!(state.best_ask(book).unwrap(), Some((u(100), u(8))));
        assert!(!state.dump_asks(book).unwrap().contains_key(&u(90)));

        // Bids were never written: empty, not an error.
        assert!(state.dump_bids(book).unwrap().is_empty());
        assert_eq!(state.best_bid(book).unwrap(), None);
    }
}

#[test]
fn test_unknown_book_not_found() {
    for scheme in SCHEMES {
        let mut state = fresh(scheme);
        book1(&mut state);
        let unknown = BookId::from_name("UNKNOWN");
        assert!(matches!(
            state.dump_asks(unknown),
            Err(DexStateError::BookNotFound { book }) if book == unknown
        ));
    }
}

#[test]
fn test_remove_twice_is_noop() {
    for scheme in SCHEMES {
        let mut state = fresh(scheme);
        let book = book1(&mut state);
        let before = state.intermediate_root().unwrap();

        assert_eq!(state.cancel(book, Side::Ask, u(100), u(42)).unwrap(), None);
        assert_eq!(state.cancel(book, Side::Ask, u(100), u(42)).unwrap(), None);
        assert_eq!(state.intermediate_root().unwrap(), before);
    }
}

#[test]
fn test_partial_fill_keeps_level() {
    let mut state = fresh(KeyScheme::Ordered);
    let book = book1(&mut state);

    let left = state
        .upsert_order(book, Side::Ask, u(100), u(1), VolumeDelta::Decrease(u(4)))
        .unwrap();
    assert_eq!(left, u(1));
    assert_eq!(state.dump_asks(book).unwrap()[&u(100)], level(4, &[(1, 1), (2, 3)]));
}

#[test]
fn test_dump_replay_reproduces_snapshot() {
    for scheme in SCHEMES {
        let mut state = fresh(scheme);
        let book = book1(&mut state);
        let dump = state.dump_asks(book).unwrap();

        let mut replay = fresh(scheme);
        for (price, order, volume) in order_triples(&dump) {
            replay
                .upsert_order(book, Side::Ask, price, order, VolumeDelta::Increase(volume))
                .unwrap();
        }
        assert_eq!(replay.dump_asks(book).unwrap(), dump);
        assert_eq!(replay.intermediate_root().unwrap(), state.intermediate_root().unwrap());
    }
}

#[test]
fn test_snapshot_serializes() {
    let mut state = fresh(KeyScheme::Ordered);
    let book = book1(&mut state);
    let dump = state.dump_asks(book).unwrap();

    let json = serde_json::to_string(&dump).unwrap();
    let back: qc_18_dex_state::BookSnapshot = serde_json::from_str(&json).unwrap();
    assert_eq!(back, dump);
}

#[test]
fn test_parallel_snapshot_matches_sequential() {
    let db = Arc::new(InMemoryTrieDb::new());
    let mut state = DexState::new(db.clone(), DexStateConfig::default()).unwrap();
    let book = BookId::from_name("BOOK1");
    for price in 1..=20u64 {
        for order in 0..3u64 {
            state
                .place(book, Side::Bid, u(price), u(price * 10 + order), u(order + 1))
                .unwrap();
        }
    }
    let root = state.commit().unwrap();

    let sequential = DexState::open(root, db.clone(), DexStateConfig::default()).unwrap();
    let parallel = DexState::open(
        root,
        db,
        DexStateConfig::default().with_parallel_snapshot(true),
    )
    .unwrap();
    assert_eq!(
        sequential.dump_bids(book).unwrap(),
        parallel.dump_bids(book).unwrap()
    );
    assert_eq!(parallel.best_bid(book).unwrap(), Some((u(20), u(6))));
}

#[test]
fn test_schemes_agree_on_content() {
    let mut ordered = fresh(KeyScheme::Ordered);
    let mut secure = fresh(KeyScheme::Secure);
    let book = book1(&mut ordered);
    book1(&mut secure);

    assert_eq!(ordered.dump_asks(book).unwrap(), secure.dump_asks(book).unwrap());
    assert_eq!(ordered.best_ask(book).unwrap(), secure.best_ask(book).unwrap());
    assert_ne!(
        ordered.intermediate_root().unwrap(),
        secure.intermediate_root().unwrap()
    );
}

// =============================================================================
// SERVICE
// =============================================================================

#[test]
fn test_service_readers_see_committed_state_only() {
    let service = DexStateService::in_memory(DexStateConfig::default()).unwrap();
    let book = BookId::from_name("BOOK1");
    service.place(1, book, Side::Ask, u(100), u(1), u(5)).unwrap();

    let (_, root) = service
        .apply_step(2, |state| {
            state.place(book, Side::Ask, u(90), u(2), u(1))?;
            // Working copy sees its own write.
            assert_eq!(state.best_ask(book)?, Some((u(90), u(1))));
            Ok(())
        })
        .unwrap();

    assert_eq!(service.get_current_state_root().unwrap(), root);
    assert_eq!(service.best_ask(book).unwrap(), Some((u(90), u(1))));
}

#[test]
fn test_service_concurrent_readers() {
    let service = Arc::new(DexStateService::in_memory(DexStateConfig::default()).unwrap());
    let book = BookId::from_name("BOOK1");
    service.place(1, book, Side::Bid, u(50), u(1), u(2)).unwrap();

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let service = service.clone();
            std::thread::spawn(move || service.best_bid(book).unwrap())
        })
        .collect();
    for reader in readers {
        assert_eq!(reader.join().unwrap(), Some((u(50), u(2))));
    }
}

#[test]
fn test_service_secure_scheme_survives_restart() {
    use qc_18_dex_state::{CheckpointStorage, InMemoryCheckpointStorage, SharedTrieDb};

    let db: SharedTrieDb = Arc::new(InMemoryTrieDb::new());
    let checkpoints: Arc<dyn CheckpointStorage> = Arc::new(InMemoryCheckpointStorage::new());
    let config = DexStateConfig::default().with_key_scheme(KeyScheme::Secure);
    let book = BookId::from_name("BOOK1");
    {
        let service = DexStateService::new(db.clone(), checkpoints.clone(), config.clone()).unwrap();
        service.place(1, book, Side::Ask, u(100), u(1), u(5)).unwrap();
        service.place(2, book, Side::Ask, u(90), u(3), u(10)).unwrap();
    }

    let restarted = DexStateService::new(db, checkpoints, config).unwrap();
    assert_eq!(restarted.best_ask(book).unwrap(), Some((u(90), u(10))));
    assert_eq!(restarted.dump_asks(book).unwrap().len(), 2);
}
