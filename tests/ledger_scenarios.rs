//! Integration tests for the ledger's core money paths.
//!
//! Each test drives the public API against a fresh on-disk store:
//! - Proof redemption and single use of a claim
//! - Withdrawal escrow, rejection refund and per-method minimums
//! - Concurrent redemption of one claim from many threads
//! - Recovery of a corrupt collection from its newest backup, which holds
//!   the last committed state

use std::sync::{Arc, Barrier};
use std::thread;
use tally::claims::{add_claims, consume, ConsumeOutcome};
use tally::ledger::{
    adjust_balance, register, Accounts, Amount, BalanceAdjustment, Claims, CollectionId,
    LedgerStore, LoadSource, Profile, StoreOptions, SubmissionOutcome, Submissions, UserId,
    WithdrawalMethod, WithdrawalStatus, Withdrawals,
};
use tally::withdrawal::{
    create_request, resolve, Decision, WithdrawalDraft, WithdrawalError, WithdrawalLimits,
};
use tally::ledger::MutateError;
use tempfile::TempDir;

// === Test Fixtures ===

fn open(dir: &TempDir) -> LedgerStore {
    LedgerStore::open(dir.path(), StoreOptions::default()).unwrap()
}

fn funded(store: &LedgerStore, user: &UserId, units: u64) {
    register(store, user, Profile::default()).unwrap();
    if units > 0 {
        adjust_balance(
            store,
            user,
            BalanceAdjustment::Credit(Amount::from_units(units)),
        )
        .unwrap();
    }
}

fn balance(store: &LedgerStore, user: &UserId) -> Amount {
    store.load::<Accounts>().balance_of(user).unwrap()
}

fn claim_state(store: &LedgerStore, key: &str) -> (bool, Option<UserId>) {
    let claims = store.load::<Claims>();
    let claim = claims
        .entries
        .iter()
        .find(|c| c.claim_key == key)
        .unwrap();
    (claim.consumed, claim.consumed_by.clone())
}

// === Scenarios ===

#[test]
fn test_verified_submission_credits_reward() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    let alice = UserId::new("A");
    funded(&store, &alice, 0);
    add_claims(&store, &["REF123".to_string()], Amount::from_units(5)).unwrap();

    let outcome = consume(&store, "https://t.me/somebot/?start=REF123", &alice).unwrap();

    assert_eq!(
        outcome,
        ConsumeOutcome::Verified {
            amount: Amount::from_units(5),
            claim_key: "REF123".to_string(),
        }
    );
    assert_eq!(balance(&store, &alice), Amount::from_units(5));
    assert_eq!(claim_state(&store, "REF123"), (true, Some(alice.clone())));

    let accounts = store.load::<Accounts>();
    assert_eq!(accounts.get(&alice).unwrap().proof_count, 1);
}

#[test]
fn test_consumed_claim_rejects_second_user() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    let alice = UserId::new("A");
    let bob = UserId::new("B");
    funded(&store, &alice, 0);
    funded(&store, &bob, 0);
    add_claims(&store, &["REF123".to_string()], Amount::from_units(5)).unwrap();

    consume(&store, "https://t.me/somebot/?start=REF123", &alice).unwrap();
    let outcome = consume(&store, "https://t.me/somebot/?start=REF123", &bob).unwrap();

    assert_eq!(outcome, ConsumeOutcome::Rejected);
    assert_eq!(balance(&store, &bob), Amount::ZERO);
    assert_eq!(claim_state(&store, "REF123"), (true, Some(alice)));

    // Both attempts are on record for the moderator
    let records = store.load::<Submissions>().records;
    assert_eq!(records.len(), 2);
    assert_eq!(records[1].user_id, bob);
    assert_eq!(records[1].outcome, SubmissionOutcome::Rejected);
}

#[test]
fn test_rejected_withdrawal_restores_balance() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    let user = UserId::new("C");
    funded(&store, &user, 10);

    let draft = WithdrawalDraft {
        user: user.clone(),
        method: WithdrawalMethod::Upi,
        destination: "name@bank".to_string(),
        amount: Amount::from_units(5),
    };
    let request = create_request(&store, &draft, &WithdrawalLimits::default()).unwrap();
    assert_eq!(request.id, 1);
    assert_eq!(request.status, WithdrawalStatus::Pending);
    assert_eq!(balance(&store, &user), Amount::from_units(5));

    let resolution = resolve(&store, request.id, Decision::Reject, None).unwrap();
    assert!(resolution.applied);
    assert_eq!(balance(&store, &user), Amount::from_units(10));
    assert_eq!(
        store.load::<Withdrawals>().get(1).unwrap().status,
        WithdrawalStatus::Rejected
    );
}

#[test]
fn test_below_minimum_refused_before_mutation() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    let user = UserId::new("D");
    funded(&store, &user, 10);

    let draft = WithdrawalDraft {
        user: user.clone(),
        method: WithdrawalMethod::Wallet,
        destination: "9876543210".to_string(),
        amount: Amount::from_units(1),
    };
    let result = create_request(&store, &draft, &WithdrawalLimits::default());

    assert!(matches!(
        result,
        Err(MutateError::Rejected(WithdrawalError::BelowMinimum { .. }))
    ));
    assert_eq!(balance(&store, &user), Amount::from_units(10));
    assert!(store.load::<Withdrawals>().requests.is_empty());
}

#[test]
fn test_concurrent_submissions_credit_once() {
    const CONTENDERS: usize = 8;

    let dir = TempDir::new().unwrap();
    let store = Arc::new(open(&dir));
    add_claims(&store, &["REF999".to_string()], Amount::from_units(3)).unwrap();

    let users: Vec<UserId> = (0..CONTENDERS)
        .map(|i| UserId::new(format!("user-{}", i)))
        .collect();
    for user in &users {
        funded(&store, user, 0);
    }

    let barrier = Arc::new(Barrier::new(CONTENDERS));
    let handles: Vec<_> = users
        .iter()
        .cloned()
        .map(|user| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                consume(&store, "https://t.me/somebot?start=REF999", &user).unwrap()
            })
        })
        .collect();

    let outcomes: Vec<ConsumeOutcome> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let verified = outcomes.iter().filter(|o| o.is_verified()).count();
    assert_eq!(verified, 1);

    let total: u64 = users.iter().map(|u| balance(&store, u).minor()).sum();
    assert_eq!(total, Amount::from_units(3).minor());

    let claims = store.load::<Claims>();
    assert_eq!(claims.entries.iter().filter(|c| c.consumed).count(), 1);
    assert_eq!(store.load::<Submissions>().records.len(), CONTENDERS);
}

#[test]
fn test_corrupt_collection_recovers_from_backup() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    let user = UserId::new("E");
    funded(&store, &user, 7);

    // The newest snapshot is the last committed state, so nothing is lost
    std::fs::write(store.collection_path(CollectionId::Accounts), b"{ truncated").unwrap();

    assert!(matches!(
        store.inspect(CollectionId::Accounts),
        LoadSource::Backup(_)
    ));
    assert_eq!(balance(&store, &user), Amount::from_units(7));

    // The next mutation writes a clean primary again
    adjust_balance(
        &store,
        &user,
        BalanceAdjustment::Credit(Amount::from_units(1)),
    )
    .unwrap();
    assert_eq!(store.inspect(CollectionId::Accounts), LoadSource::Primary);
    assert_eq!(balance(&store, &user), Amount::from_units(8));
}

#[test]
fn test_recovered_claims_stay_consumed() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    let user = UserId::new("F");
    funded(&store, &user, 0);
    add_claims(&store, &["REF777".to_string()], Amount::from_units(2)).unwrap();
    assert!(consume(&store, "?start=REF777", &user).unwrap().is_verified());

    std::fs::write(store.collection_path(CollectionId::Claims), b"\0\0\0").unwrap();

    assert_eq!(claim_state(&store, "REF777"), (true, Some(user.clone())));
    let other = UserId::new("G");
    funded(&store, &other, 0);
    assert_eq!(
        consume(&store, "?start=REF777", &other).unwrap(),
        ConsumeOutcome::Rejected
    );
    assert_eq!(balance(&store, &other), Amount::ZERO);
}
