//! Gap-limit address discovery tests

mod common;

use common::{test_address, test_config, test_seed, MockIndexer};
use wallet_engine::scanner::{discover_addresses, ScanError, ScanParams};
use wallet_engine::{AddressType, NetworkType};

const NETWORK: NetworkType = NetworkType::Regtest;
const KIND: AddressType = AddressType::P2wpkh;

fn params(seed: &wallet_engine::Seed, last_receive: i64, last_change: i64) -> ScanParams<'_> {
    let config = test_config(NETWORK);
    ScanParams {
        seed,
        network: NETWORK,
        address_type: KIND,
        gap_limit: config.gap_limit,
        batch_size: config.batch_size(),
        last_receive_index: last_receive,
        last_change_index: last_change,
    }
}

#[test]
fn test_fresh_wallet_discovers_nothing_but_generates_lookahead() {
    let seed = test_seed();
    let indexer = MockIndexer::new();
    let config = test_config(NETWORK);

    let outcome = discover_addresses(&indexer, &config.retry, params(&seed, -1, -1))
        .expect("scan should succeed");

    assert_eq!(outcome.receive.last_used_index, -1);
    assert_eq!(outcome.change.last_used_index, -1);
    assert_eq!(outcome.receive.next_index(), 0, "fresh wallet starts at index 0");
    assert!(
        outcome.receive.lookahead() >= config.gap_limit,
        "receive branch must keep at least {} unused addresses, has {}",
        config.gap_limit,
        outcome.receive.lookahead()
    );
    assert!(outcome.change.lookahead() >= config.gap_limit);
}

#[test]
fn test_scan_finds_highest_used_index_and_keeps_lookahead() {
    let seed = test_seed();
    let indexer = MockIndexer::new();
    let config = test_config(NETWORK);

    for index in [0, 1, 2] {
        let address = test_address(NETWORK, KIND, false, index);
        indexer.mark_used(&address.script_hash, &format!("tx{}", index), 100 + index);
    }

    let outcome = discover_addresses(&indexer, &config.retry, params(&seed, -1, -1))
        .expect("scan should succeed");

    assert_eq!(outcome.receive.last_used_index, 2);
    assert_eq!(outcome.receive.next_index(), 3);
    assert!(
        outcome.receive.lookahead() >= config.gap_limit,
        "gap-limit invariant violated: lookahead {}",
        outcome.receive.lookahead()
    );
    assert_eq!(outcome.change.last_used_index, -1, "change branch untouched");
}

#[test]
fn test_scan_widens_into_the_next_batch_when_use_reaches_the_boundary() {
    let seed = test_seed();
    let indexer = MockIndexer::new();
    let config = test_config(NETWORK);

    // Use at 4 sits at the edge of the first batch, which pulls the
    // window forward far enough to also find the use at 7.
    for index in [4, 7] {
        let address = test_address(NETWORK, KIND, false, index);
        indexer.mark_used(&address.script_hash, &format!("tx{}", index), 50);
    }

    let outcome = discover_addresses(&indexer, &config.retry, params(&seed, -1, -1))
        .expect("scan should succeed");

    assert_eq!(
        outcome.receive.last_used_index, 7,
        "widening must follow use into the second batch"
    );
    assert!(outcome.receive.lookahead() >= config.gap_limit);
    assert!(outcome.rounds >= 2, "expected at least two widening rounds");
}

#[test]
fn test_use_beyond_the_gap_window_is_not_discovered() {
    let seed = test_seed();
    let indexer = MockIndexer::new();
    let config = test_config(NETWORK);

    // Indexes 0..7 unused, so a lone use at 7 lies past the gap limit
    // of 5 and stays invisible. That is the gap-limit contract, not a
    // scan defect.
    let far = test_address(NETWORK, KIND, false, 7);
    indexer.mark_used(&far.script_hash, "txfar", 50);

    let outcome = discover_addresses(&indexer, &config.retry, params(&seed, -1, -1))
        .expect("scan should succeed");
    assert_eq!(
        outcome.receive.last_used_index, -1,
        "a use past the gap window must not be picked up"
    );
}

#[test]
fn test_mempool_only_use_counts_as_used() {
    let seed = test_seed();
    let indexer = MockIndexer::new();
    let config = test_config(NETWORK);

    let pending = test_address(NETWORK, KIND, false, 1);
    indexer.mark_mempool(&pending.script_hash, "txpending", 120);

    let outcome = discover_addresses(&indexer, &config.retry, params(&seed, -1, -1))
        .expect("scan should succeed");
    assert_eq!(
        outcome.receive.last_used_index, 1,
        "an unconfirmed transaction must still mark the address used"
    );
}

#[test]
fn test_change_branch_is_scanned_in_the_same_run() {
    let seed = test_seed();
    let indexer = MockIndexer::new();
    let config = test_config(NETWORK);

    let change = test_address(NETWORK, KIND, true, 3);
    indexer.mark_used(&change.script_hash, "txchange", 10);

    let outcome = discover_addresses(&indexer, &config.retry, params(&seed, -1, -1))
        .expect("scan should succeed");
    assert_eq!(outcome.change.last_used_index, 3);
    assert_eq!(outcome.change.next_index(), 4);
    assert!(outcome.change.lookahead() >= config.gap_limit);
}

#[test]
fn test_known_index_is_reverified_not_trusted() {
    let seed = test_seed();
    let indexer = MockIndexer::new();
    let config = test_config(NETWORK);

    // The store claims index 4 was used but the indexer shows use at 6.
    let address = test_address(NETWORK, KIND, false, 6);
    indexer.mark_used(&address.script_hash, "tx6", 10);

    let outcome = discover_addresses(&indexer, &config.retry, params(&seed, 4, -1))
        .expect("scan should succeed");
    assert_eq!(outcome.receive.last_used_index, 6);

    // And a claimed index with no on-chain use never regresses below the
    // caller-provided high-water mark.
    let indexer = MockIndexer::new();
    let outcome = discover_addresses(&indexer, &config.retry, params(&seed, 4, -1))
        .expect("scan should succeed");
    assert_eq!(
        outcome.receive.last_used_index, 4,
        "high-water mark must not regress when the indexer shows no use"
    );
}

#[test]
fn test_indexer_failure_aborts_scan_without_partial_result() {
    let seed = test_seed();
    let indexer = MockIndexer::new();
    let config = test_config(NETWORK);

    indexer.fail_next(10);
    let result = discover_addresses(&indexer, &config.retry, params(&seed, -1, -1));
    match result {
        Err(ScanError::Indexer(_)) => {}
        Err(other) => panic!("expected an indexer error, got {:?}", other),
        Ok(outcome) => panic!(
            "a persistent indexer failure must surface as an error, scan finished in {} rounds",
            outcome.rounds
        ),
    }
}

#[test]
fn test_transient_failure_is_retried() {
    let seed = test_seed();
    let indexer = MockIndexer::new();
    let mut config = test_config(NETWORK);
    config.retry.max_attempts = 3;

    // First call fails, retry succeeds.
    indexer.fail_next(1);
    let outcome = discover_addresses(&indexer, &config.retry, params(&seed, -1, -1))
        .expect("bounded retry should absorb one transient failure");
    assert_eq!(outcome.receive.last_used_index, -1);
}
