//! Withdrawal Workflow
//!
//! Escrow-and-approval state machine:
//!
//! ```text
//! (request) --debit balance--> Pending --approve--> Approved
//!                                     \--reject---> Rejected (+refund)
//! ```
//!
//! Creation debits the balance and records the `Pending` request in one
//! mutation over (accounts, withdrawals). Resolution is a compare-and-set
//! on `Pending`; any later attempt is a no-op that reports the existing
//! terminal state. If the moderator cannot be reached right after creation,
//! the request is compensated (refund + `Rejected` with a system note),
//! unless the moderator already resolved it.

pub mod destination;

pub use destination::{validate_destination, DestinationError};

use crate::ledger::{
    run_blocking, unix_now, Accounts, Amount, LedgerStore, MutateError, RequestId, UserId,
    WithdrawalMethod, WithdrawalRequest, WithdrawalStatus, Withdrawals,
};
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

/// Note stored on requests refunded because the moderator was unreachable.
pub const UNREACHABLE_MODERATOR_NOTE: &str = "moderator could not be notified; escrow refunded";

/// Per-method minimum withdrawal amounts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithdrawalLimits {
    pub upi_min: Amount,
    pub wallet_min: Amount,
    pub fxl_min: Amount,
}

impl Default for WithdrawalLimits {
    fn default() -> Self {
        Self {
            upi_min: Amount::from_units(5),
            wallet_min: Amount::from_units(2),
            fxl_min: Amount::from_units(5),
        }
    }
}

impl WithdrawalLimits {
    pub fn minimum(&self, method: WithdrawalMethod) -> Amount {
        match method {
            WithdrawalMethod::Upi => self.upi_min,
            WithdrawalMethod::Wallet => self.wallet_min,
            WithdrawalMethod::Fxl => self.fxl_min,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WithdrawalError {
    #[error("minimum withdrawal for {method} is {minimum}")]
    BelowMinimum {
        method: WithdrawalMethod,
        minimum: Amount,
    },

    #[error("insufficient balance: {available} available")]
    InsufficientBalance { available: Amount },

    #[error("account not found")]
    UnknownAccount,

    #[error("withdrawal request #{0} not found")]
    UnknownRequest(RequestId),

    #[error("invalid destination: {0}")]
    InvalidDestination(#[from] DestinationError),
}

/// Everything the withdraw flow collected from the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithdrawalDraft {
    pub user: UserId,
    pub method: WithdrawalMethod,
    pub destination: String,
    pub amount: Amount,
}

/// Check a draft against the current balance without mutating anything.
pub fn check_draft(
    draft: &WithdrawalDraft,
    balance: Amount,
    limits: &WithdrawalLimits,
) -> Result<(), WithdrawalError> {
    let minimum = limits.minimum(draft.method);
    if draft.amount < minimum {
        return Err(WithdrawalError::BelowMinimum {
            method: draft.method,
            minimum,
        });
    }
    if draft.amount > balance {
        return Err(WithdrawalError::InsufficientBalance { available: balance });
    }
    Ok(())
}

/// Debit the escrow and record a `Pending` request, atomically.
pub fn create_request(
    store: &LedgerStore,
    draft: &WithdrawalDraft,
    limits: &WithdrawalLimits,
) -> Result<WithdrawalRequest, MutateError<WithdrawalError>> {
    let destination = validate_destination(draft.method, &draft.destination)
        .map_err(|e| MutateError::Rejected(e.into()))?;
    let now = unix_now();

    store.mutate(|(accounts, withdrawals): &mut (Accounts, Withdrawals)| {
        let account = accounts
            .get_mut(&draft.user)
            .ok_or(WithdrawalError::UnknownAccount)?;

        check_draft(draft, account.balance, limits)?;
        account.balance = account
            .balance
            .checked_sub(draft.amount)
            .ok_or(WithdrawalError::InsufficientBalance {
                available: account.balance,
            })?;
        account.last_active_at = now;

        let id = withdrawals.allocate_id();
        let request = WithdrawalRequest {
            id,
            user_id: draft.user.clone(),
            amount: draft.amount,
            method: draft.method,
            destination,
            status: WithdrawalStatus::Pending,
            requested_at: now,
            resolved_at: None,
            note: None,
        };
        withdrawals.requests.insert(id, request.clone());

        info!(request = id, user = %draft.user, amount = %draft.amount, method = %draft.method, "withdrawal escrowed");
        Ok(request)
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Reject,
}

impl Decision {
    fn target_status(self) -> WithdrawalStatus {
        match self {
            Decision::Approve => WithdrawalStatus::Approved,
            Decision::Reject => WithdrawalStatus::Rejected,
        }
    }
}

/// Outcome of a resolution attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub request: WithdrawalRequest,
    /// False when the request was already terminal and nothing changed.
    pub applied: bool,
}

/// Resolve a `Pending` request; no-op on anything else.
///
/// Rejection refunds exactly the escrowed amount in the same mutation.
pub fn resolve(
    store: &LedgerStore,
    id: RequestId,
    decision: Decision,
    note: Option<String>,
) -> Result<Resolution, MutateError<WithdrawalError>> {
    let now = unix_now();
    store.mutate(|(accounts, withdrawals): &mut (Accounts, Withdrawals)| {
        let request = withdrawals
            .requests
            .get_mut(&id)
            .ok_or(WithdrawalError::UnknownRequest(id))?;

        if request.status.is_terminal() {
            return Ok(Resolution {
                request: request.clone(),
                applied: false,
            });
        }

        if decision == Decision::Reject {
            let account = accounts.ensure(&request.user_id, now);
            account.balance = account
                .balance
                .checked_add(request.amount)
                .unwrap_or(Amount::from_minor(u64::MAX));
        }

        request.status = decision.target_status();
        request.resolved_at = Some(now);
        request.note = note;

        info!(request = id, status = ?request.status, "withdrawal resolved");
        Ok(Resolution {
            request: request.clone(),
            applied: true,
        })
    })
}

/// Outcome of [`submit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submitted {
    /// Request is pending and the moderator was notified.
    Opened(WithdrawalRequest),
    /// Moderator unreachable; escrow refunded and request rejected.
    Compensated(WithdrawalRequest),
    /// Notification reported failure, but the moderator had already
    /// resolved the request; it keeps that status.
    Resolved(WithdrawalRequest),
}

/// Create a request, notify the moderator, compensate if that fails.
///
/// Ledger calls run on the blocking pool; `notify` runs after the creating
/// mutation has committed and never under a ledger lock.
pub async fn submit<F, Fut, E>(
    store: &Arc<LedgerStore>,
    draft: &WithdrawalDraft,
    limits: &WithdrawalLimits,
    notify: F,
) -> Result<Submitted, MutateError<WithdrawalError>>
where
    F: FnOnce(WithdrawalRequest) -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: std::fmt::Display,
{
    let (draft, limits) = (draft.clone(), limits.clone());
    let request =
        run_blocking(store, move |store| create_request(store, &draft, &limits)).await??;
    let id = request.id;

    match notify(request).await {
        Ok(()) => {
            let request = run_blocking(store, move |store| {
                store.load::<Withdrawals>().get(id).cloned()
            })
            .await?
            .ok_or(MutateError::Rejected(WithdrawalError::UnknownRequest(id)))?;
            Ok(Submitted::Opened(request))
        }
        Err(e) => {
            warn!(request = id, error = %e, "moderator unreachable, compensating withdrawal");
            let resolution = run_blocking(store, move |store| {
                resolve(
                    store,
                    id,
                    Decision::Reject,
                    Some(UNREACHABLE_MODERATOR_NOTE.to_string()),
                )
            })
            .await??;

            if resolution.applied {
                Ok(Submitted::Compensated(resolution.request))
            } else {
                info!(
                    request = id,
                    status = ?resolution.request.status,
                    "request already resolved, compensation skipped"
                );
                Ok(Submitted::Resolved(resolution.request))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{BalanceAdjustment, Profile, StoreOptions};
    use tempfile::TempDir;

    fn funded_store(dir: &TempDir, user: &UserId, units: u64) -> Arc<LedgerStore> {
        let store = Arc::new(LedgerStore::open(dir.path(), StoreOptions::default()).unwrap());
        crate::ledger::register(&store, user, Profile::default()).unwrap();
        crate::ledger::adjust_balance(
            &store,
            user,
            BalanceAdjustment::Credit(Amount::from_units(units)),
        )
        .unwrap();
        store
    }

    fn draft(user: &UserId, method: WithdrawalMethod, amount: Amount) -> WithdrawalDraft {
        let destination = match method {
            WithdrawalMethod::Upi => "name@bank",
            WithdrawalMethod::Wallet => "9876543210",
            WithdrawalMethod::Fxl => "acct 42",
        };
        WithdrawalDraft {
            user: user.clone(),
            method,
            destination: destination.to_string(),
            amount,
        }
    }

    fn balance(store: &LedgerStore, user: &UserId) -> Amount {
        store.load::<Accounts>().balance_of(user).unwrap()
    }

    #[test]
    fn test_reject_refunds_escrow_exactly() {
        let dir = TempDir::new().unwrap();
        let user = UserId::new("u");
        let store = funded_store(&dir, &user, 10);
        let limits = WithdrawalLimits::default();

        let request = create_request(
            &store,
            &draft(&user, WithdrawalMethod::Upi, Amount::from_units(5)),
            &limits,
        )
        .unwrap();
        assert_eq!(request.status, WithdrawalStatus::Pending);
        assert_eq!(balance(&store, &user), Amount::from_units(5));

        let resolution = resolve(&store, request.id, Decision::Reject, None).unwrap();
        assert!(resolution.applied);
        assert_eq!(resolution.request.status, WithdrawalStatus::Rejected);
        assert_eq!(balance(&store, &user), Amount::from_units(10));
    }

    #[test]
    fn test_approve_keeps_debit() {
        let dir = TempDir::new().unwrap();
        let user = UserId::new("u");
        let store = funded_store(&dir, &user, 10);

        let request = create_request(
            &store,
            &draft(&user, WithdrawalMethod::Fxl, Amount::from_units(6)),
            &WithdrawalLimits::default(),
        )
        .unwrap();
        resolve(&store, request.id, Decision::Approve, None).unwrap();

        assert_eq!(balance(&store, &user), Amount::from_units(4));
        let stored = store.load::<Withdrawals>().get(request.id).cloned().unwrap();
        assert_eq!(stored.status, WithdrawalStatus::Approved);
        assert!(stored.resolved_at.is_some());
    }

    #[test]
    fn test_below_minimum_is_refused_before_mutation() {
        let dir = TempDir::new().unwrap();
        let user = UserId::new("u");
        let store = funded_store(&dir, &user, 10);

        let err = create_request(
            &store,
            &draft(&user, WithdrawalMethod::Wallet, Amount::from_units(1)),
            &WithdrawalLimits::default(),
        )
        .unwrap_err();

        assert!(matches!(
            err,
            MutateError::Rejected(WithdrawalError::BelowMinimum {
                method: WithdrawalMethod::Wallet,
                ..
            })
        ));
        assert_eq!(balance(&store, &user), Amount::from_units(10));
        assert!(store.load::<Withdrawals>().requests.is_empty());
    }

    #[test]
    fn test_over_balance_is_refused() {
        let dir = TempDir::new().unwrap();
        let user = UserId::new("u");
        let store = funded_store(&dir, &user, 10);

        let err = create_request(
            &store,
            &draft(&user, WithdrawalMethod::Upi, Amount::from_minor(1001)),
            &WithdrawalLimits::default(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            MutateError::Rejected(WithdrawalError::InsufficientBalance { .. })
        ));
        assert_eq!(balance(&store, &user), Amount::from_units(10));
    }

    #[test]
    fn test_bad_destination_is_refused() {
        let dir = TempDir::new().unwrap();
        let user = UserId::new("u");
        let store = funded_store(&dir, &user, 10);
        let mut bad = draft(&user, WithdrawalMethod::Upi, Amount::from_units(5));
        bad.destination = "nobank".to_string();

        let err = create_request(&store, &bad, &WithdrawalLimits::default()).unwrap_err();
        assert!(matches!(
            err,
            MutateError::Rejected(WithdrawalError::InvalidDestination(_))
        ));
    }

    #[test]
    fn test_repeated_resolution_is_noop() {
        let dir = TempDir::new().unwrap();
        let user = UserId::new("u");
        let store = funded_store(&dir, &user, 10);

        let request = create_request(
            &store,
            &draft(&user, WithdrawalMethod::Upi, Amount::from_units(5)),
            &WithdrawalLimits::default(),
        )
        .unwrap();

        let first = resolve(&store, request.id, Decision::Reject, None).unwrap();
        let snapshot = (store.load::<Accounts>(), store.load::<Withdrawals>());

        let again = resolve(&store, request.id, Decision::Reject, None).unwrap();
        let flipped = resolve(&store, request.id, Decision::Approve, None).unwrap();

        assert!(first.applied);
        assert!(!again.applied);
        assert!(!flipped.applied);
        assert_eq!(flipped.request.status, WithdrawalStatus::Rejected);
        assert_eq!(
            (store.load::<Accounts>(), store.load::<Withdrawals>()),
            snapshot
        );
        assert_eq!(balance(&store, &user), Amount::from_units(10));
    }

    #[test]
    fn test_unknown_request_is_error() {
        let dir = TempDir::new().unwrap();
        let user = UserId::new("u");
        let store = funded_store(&dir, &user, 1);

        let err = resolve(&store, 999, Decision::Approve, None).unwrap_err();
        assert!(matches!(
            err,
            MutateError::Rejected(WithdrawalError::UnknownRequest(999))
        ));
    }

    #[tokio::test]
    async fn test_submit_opens_when_moderator_reachable() {
        let dir = TempDir::new().unwrap();
        let user = UserId::new("u");
        let store = funded_store(&dir, &user, 10);

        let submitted = submit(
            &store,
            &draft(&user, WithdrawalMethod::Upi, Amount::from_units(5)),
            &WithdrawalLimits::default(),
            |_request| async { Ok::<_, String>(()) },
        )
        .await
        .unwrap();

        assert!(matches!(submitted, Submitted::Opened(ref r) if r.status == WithdrawalStatus::Pending));
        assert_eq!(balance(&store, &user), Amount::from_units(5));
    }

    #[tokio::test]
    async fn test_submit_compensates_when_moderator_unreachable() {
        let dir = TempDir::new().unwrap();
        let user = UserId::new("u");
        let store = funded_store(&dir, &user, 10);

        let submitted = submit(
            &store,
            &draft(&user, WithdrawalMethod::Upi, Amount::from_units(5)),
            &WithdrawalLimits::default(),
            |_request| async { Err::<(), _>("network down") },
        )
        .await
        .unwrap();

        match submitted {
            Submitted::Compensated(request) => {
                assert_eq!(request.status, WithdrawalStatus::Rejected);
                assert_eq!(request.note.as_deref(), Some(UNREACHABLE_MODERATOR_NOTE));
            }
            other => panic!("expected compensation, got {:?}", other),
        }
        assert_eq!(balance(&store, &user), Amount::from_units(10));
        assert_eq!(store.load::<Withdrawals>().pending().count(), 0);
    }

    #[tokio::test]
    async fn test_submit_keeps_resolution_that_beat_compensation() {
        let dir = TempDir::new().unwrap();
        let user = UserId::new("u");
        let store = funded_store(&dir, &user, 10);

        // Delivered, then the acknowledgement is lost after the moderator approved
        let submitted = submit(
            &store,
            &draft(&user, WithdrawalMethod::Upi, Amount::from_units(5)),
            &WithdrawalLimits::default(),
            |request| {
                let store = Arc::clone(&store);
                async move {
                    resolve(&store, request.id, Decision::Approve, None).unwrap();
                    Err::<(), _>("timeout after delivery")
                }
            },
        )
        .await
        .unwrap();

        match submitted {
            Submitted::Resolved(request) => {
                assert_eq!(request.status, WithdrawalStatus::Approved);
                assert_eq!(request.note, None);
            }
            other => panic!("expected the approval to stand, got {:?}", other),
        }
        assert_eq!(balance(&store, &user), Amount::from_units(5));
        assert_eq!(
            store.load::<Withdrawals>().get(1).unwrap().status,
            WithdrawalStatus::Approved
        );
    }
}
