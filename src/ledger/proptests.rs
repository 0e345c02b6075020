//! Property-based tests for ledger invariants
//!
//! Tests for:
//! - Conservation: balances plus pending escrow always equal net inflow
//! - Claims: a claim is redeemed by at most one submission
//! - Resolution: a terminal request never changes again

use super::{
    adjust_balance, register, Accounts, Amount, BalanceAdjustment, Claims, LedgerStore, Profile,
    StoreOptions, Submissions, UserId, WithdrawalMethod, WithdrawalStatus, Withdrawals,
};
use crate::claims::{add_claims, consume};
use crate::withdrawal::{create_request, resolve, Decision, WithdrawalDraft, WithdrawalLimits};
use proptest::prelude::*;
use tempfile::TempDir;

const USERS: [&str; 3] = ["alice", "bob", "carol"];
const KEYS: [&str; 3] = ["REF111", "REF222", "REF333"];

#[derive(Debug, Clone)]
enum Op {
    Credit(usize, u64),
    Debit(usize, u64),
    Withdraw(usize, u64),
    Resolve(u64, bool),
    Submit(usize, usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..USERS.len(), 1u64..2_000).prop_map(|(u, m)| Op::Credit(u, m)),
        (0..USERS.len(), 1u64..2_000).prop_map(|(u, m)| Op::Debit(u, m)),
        (0..USERS.len(), 1u64..2_000).prop_map(|(u, m)| Op::Withdraw(u, m)),
        (1u64..6, any::<bool>()).prop_map(|(id, approve)| Op::Resolve(id, approve)),
        (0..USERS.len(), 0..KEYS.len()).prop_map(|(u, k)| Op::Submit(u, k)),
    ]
}

fn user(index: usize) -> UserId {
    UserId::new(USERS[index])
}

fn open_store(dir: &TempDir) -> LedgerStore {
    let options = StoreOptions {
        snapshot_on_write: false,
        ..StoreOptions::default()
    };
    let store = LedgerStore::open(dir.path(), options).unwrap();
    for index in 0..USERS.len() {
        register(&store, &user(index), Profile::default()).unwrap();
    }
    let keys: Vec<String> = KEYS.iter().map(|k| k.to_string()).collect();
    add_claims(&store, &keys, Amount::from_minor(150)).unwrap();
    store
}

/// Sum of balances plus the escrow held by pending requests.
fn holdings(store: &LedgerStore) -> u64 {
    let balances: u64 = store
        .load::<Accounts>()
        .users
        .values()
        .map(|a| a.balance.minor())
        .sum();
    let escrow: u64 = store
        .load::<Withdrawals>()
        .pending()
        .map(|r| r.amount.minor())
        .sum();
    balances + escrow
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Property: Money is conserved
    /// Only credits, debits, redeemed claims and approvals move the total
    #[test]
    fn holdings_track_net_inflow(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let limits = WithdrawalLimits {
            upi_min: Amount::from_minor(1),
            wallet_min: Amount::from_minor(1),
            fxl_min: Amount::from_minor(1),
        };
        let mut expected: u64 = 0;

        for op in ops {
            match op {
                Op::Credit(u, minor) => {
                    let change = adjust_balance(
                        &store,
                        &user(u),
                        BalanceAdjustment::Credit(Amount::from_minor(minor)),
                    )
                    .unwrap();
                    expected += change.applied.minor();
                }
                Op::Debit(u, minor) => {
                    let change = adjust_balance(
                        &store,
                        &user(u),
                        BalanceAdjustment::Debit(Amount::from_minor(minor)),
                    )
                    .unwrap();
                    expected -= change.applied.minor();
                }
                Op::Withdraw(u, minor) => {
                    let before = store.load::<Accounts>().balance_of(&user(u)).unwrap();
                    let draft = WithdrawalDraft {
                        user: user(u),
                        method: WithdrawalMethod::Fxl,
                        destination: "acct 1".to_string(),
                        amount: Amount::from_minor(minor),
                    };
                    let result = create_request(&store, &draft, &limits);
                    prop_assert_eq!(result.is_ok(), minor <= before.minor());
                }
                Op::Resolve(id, approve) => {
                    let decision = if approve { Decision::Approve } else { Decision::Reject };
                    if let Ok(resolution) = resolve(&store, id, decision, None) {
                        if resolution.applied && approve {
                            expected -= resolution.request.amount.minor();
                        }
                    }
                }
                Op::Submit(u, k) => {
                    let outcome = consume(&store, &format!("proof {}", KEYS[k]), &user(u)).unwrap();
                    if let crate::claims::ConsumeOutcome::Verified { amount, .. } = outcome {
                        expected += amount.minor();
                    }
                }
            }

            prop_assert_eq!(holdings(&store), expected);
        }
    }

    /// Property: Each claim pays out at most once
    #[test]
    fn claims_redeemed_at_most_once(
        submissions in prop::collection::vec((0..USERS.len(), 0..KEYS.len()), 1..20),
    ) {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        for (u, k) in submissions {
            consume(&store, KEYS[k], &user(u)).unwrap();
        }

        let records = store.load::<Submissions>().records;
        for key in KEYS {
            let verified = records
                .iter()
                .filter(|r| r.claim_key.as_deref() == Some(key))
                .count();
            prop_assert!(verified <= 1, "claim {} redeemed {} times", key, verified);
        }

        let consumed = store.load::<Claims>().entries.iter().filter(|c| c.consumed).count();
        let verified = records.iter().filter(|r| r.claim_key.is_some()).count();
        prop_assert_eq!(consumed, verified);
    }

    /// Property: Terminal requests are frozen
    /// Resolving again never changes status or balance
    #[test]
    fn terminal_resolution_is_noop(first_approve in any::<bool>(), second_approve in any::<bool>()) {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let owner = user(0);
        adjust_balance(&store, &owner, BalanceAdjustment::Credit(Amount::from_units(10))).unwrap();

        let draft = WithdrawalDraft {
            user: owner.clone(),
            method: WithdrawalMethod::Upi,
            destination: "name@bank".to_string(),
            amount: Amount::from_units(6),
        };
        let request = create_request(&store, &draft, &WithdrawalLimits::default()).unwrap();

        let decide = |approve: bool| if approve { Decision::Approve } else { Decision::Reject };
        let first = resolve(&store, request.id, decide(first_approve), None).unwrap();
        prop_assert!(first.applied);
        let balance_after_first = store.load::<Accounts>().balance_of(&owner);

        let second = resolve(&store, request.id, decide(second_approve), None).unwrap();
        prop_assert!(!second.applied);
        prop_assert_eq!(second.request.status, first.request.status);
        prop_assert_eq!(store.load::<Accounts>().balance_of(&owner), balance_after_first);

        let expected = if first_approve { WithdrawalStatus::Approved } else { WithdrawalStatus::Rejected };
        prop_assert_eq!(first.request.status, expected);
    }
}
