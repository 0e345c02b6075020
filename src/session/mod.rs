//! Conversation Session Manager
//!
//! Drives short linear flows (submit-proof, withdraw, moderator bulk
//! operations) without persisting anything. Sessions are in-memory only,
//! keyed by user id, at most one per user, and expire after an idle
//! timeout. No ledger mutation happens before a flow's final step, so
//! cancelling or expiring a session never needs a rollback.

pub mod flow;
pub mod validate;

pub use flow::{
    Collected, Field, FlowAction, FlowContext, FlowKind, Input, InputShape, Step,
};
pub use validate::is_valid_link;

use crate::ledger::UserId;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::debug;

/// Default idle time after which a session is discarded.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone)]
struct Session {
    kind: FlowKind,
    step_index: usize,
    collected: Collected,
    last_touched: Instant,
}

impl Session {
    fn step(&self) -> Step {
        self.kind.steps()[self.step_index]
    }
}

/// Result of feeding one input to the active flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advance {
    /// Validation failed; the same step is re-entered.
    Reprompt { step: Step, message: String },
    /// Input accepted; `step` is now current.
    Next { step: Step },
    /// Final step accepted; the session is gone and the action must run.
    Complete(FlowAction),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("no active flow")]
    NoActiveFlow,

    #[error("session expired")]
    Expired,

    #[error("flow {0} finished without all of its fields")]
    Incomplete(&'static str),
}

/// In-memory session table.
pub struct SessionManager {
    sessions: Mutex<HashMap<UserId, Session>>,
    idle_timeout: Duration,
}

impl SessionManager {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            idle_timeout,
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    fn table(&self) -> MutexGuard<'_, HashMap<UserId, Session>> {
        // The table holds no invariants across entries; a poisoned lock is
        // still usable.
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start `kind` for `user`, discarding any session already open.
    pub fn start_flow(&self, user: &UserId, kind: FlowKind) -> Step {
        self.start_flow_at(user, kind, Instant::now())
    }

    pub fn start_flow_at(&self, user: &UserId, kind: FlowKind, now: Instant) -> Step {
        let session = Session {
            kind,
            step_index: 0,
            collected: Collected::default(),
            last_touched: now,
        };
        let step = session.step();
        if let Some(previous) = self.table().insert(user.clone(), session) {
            debug!(user = %user, discarded = previous.kind.name(), "replaced active flow");
        }
        step
    }

    /// Feed `input` to the user's active flow.
    pub fn advance(
        &self,
        user: &UserId,
        input: &Input,
        ctx: &dyn FlowContext,
    ) -> Result<Advance, SessionError> {
        self.advance_at(user, input, ctx, Instant::now())
    }

    pub fn advance_at(
        &self,
        user: &UserId,
        input: &Input,
        ctx: &dyn FlowContext,
        now: Instant,
    ) -> Result<Advance, SessionError> {
        let mut table = self.table();
        let session = table.get_mut(user).ok_or(SessionError::NoActiveFlow)?;

        if self.is_expired(session, now) {
            table.remove(user);
            return Err(SessionError::Expired);
        }
        session.last_touched = now;

        let step = session.step();
        let field = match flow::validate(step, input, user, &session.collected, ctx) {
            Ok(field) => field,
            Err(message) => return Ok(Advance::Reprompt { step, message }),
        };
        session.collected.merge(field);
        session.step_index += 1;

        if session.step_index < session.kind.steps().len() {
            return Ok(Advance::Next {
                step: session.step(),
            });
        }

        let Some(finished) = table.remove(user) else {
            return Err(SessionError::NoActiveFlow);
        };
        flow::finish(finished.kind, user, finished.collected)
            .map(Advance::Complete)
            .ok_or(SessionError::Incomplete(finished.kind.name()))
    }

    /// Discard the user's session. Returns whether one existed.
    pub fn cancel(&self, user: &UserId) -> bool {
        self.table().remove(user).is_some()
    }

    /// Active flow and step for `user`, ignoring expired sessions.
    pub fn current(&self, user: &UserId) -> Option<(FlowKind, Step)> {
        self.current_at(user, Instant::now())
    }

    pub fn current_at(&self, user: &UserId, now: Instant) -> Option<(FlowKind, Step)> {
        self.table()
            .get(user)
            .filter(|s| !self.is_expired(s, now))
            .map(|s| (s.kind, s.step()))
    }

    /// Drop every session idle for longer than the timeout.
    pub fn sweep_expired(&self) -> usize {
        self.sweep_expired_at(Instant::now())
    }

    pub fn sweep_expired_at(&self, now: Instant) -> usize {
        let mut table = self.table();
        let before = table.len();
        table.retain(|_, session| !self.is_expired(session, now));
        before - table.len()
    }

    pub fn active_count(&self) -> usize {
        self.table().len()
    }

    fn is_expired(&self, session: &Session, now: Instant) -> bool {
        now.saturating_duration_since(session.last_touched) > self.idle_timeout
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(DEFAULT_IDLE_TIMEOUT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{Amount, BalanceAdjustment, WithdrawalMethod};
    use crate::withdrawal::{WithdrawalDraft, WithdrawalLimits};
    use std::collections::HashMap;

    struct FakeLedger {
        balances: HashMap<UserId, Amount>,
        limits: WithdrawalLimits,
    }

    impl FakeLedger {
        fn with(user: &str, units: u64) -> Self {
            let mut balances = HashMap::new();
            balances.insert(UserId::new(user), Amount::from_units(units));
            Self {
                balances,
                limits: WithdrawalLimits::default(),
            }
        }
    }

    impl FlowContext for FakeLedger {
        fn balance_of(&self, user: &UserId) -> Option<Amount> {
            self.balances.get(user).copied()
        }

        fn limits(&self) -> &WithdrawalLimits {
            &self.limits
        }

        fn min_claim_key_len(&self) -> usize {
            6
        }
    }

    fn text(s: &str) -> Input {
        Input::Text(s.to_string())
    }

    #[test]
    fn test_withdraw_flow_collects_draft() {
        let manager = SessionManager::default();
        let ctx = FakeLedger::with("u", 10);
        let user = UserId::new("u");

        assert_eq!(manager.start_flow(&user, FlowKind::Withdraw), Step::Method);
        assert_eq!(
            manager
                .advance(&user, &Input::Choice("upi".to_string()), &ctx)
                .unwrap(),
            Advance::Next {
                step: Step::Destination
            }
        );
        assert_eq!(
            manager.advance(&user, &text("name@bank"), &ctx).unwrap(),
            Advance::Next {
                step: Step::WithdrawAmount
            }
        );
        assert_eq!(
            manager.advance(&user, &text("5"), &ctx).unwrap(),
            Advance::Complete(FlowAction::Withdraw(WithdrawalDraft {
                user: user.clone(),
                method: WithdrawalMethod::Upi,
                destination: "name@bank".to_string(),
                amount: Amount::from_units(5),
            }))
        );
        assert_eq!(manager.active_count(), 0);
    }

    #[test]
    fn test_invalid_input_reprompts_same_step() {
        let manager = SessionManager::default();
        let ctx = FakeLedger::with("u", 10);
        let user = UserId::new("u");
        manager.start_flow(&user, FlowKind::Withdraw);
        manager
            .advance(&user, &Input::Choice("wallet".to_string()), &ctx)
            .unwrap();

        let reprompt = manager.advance(&user, &text("abc"), &ctx).unwrap();
        assert!(matches!(
            reprompt,
            Advance::Reprompt {
                step: Step::Destination,
                ..
            }
        ));

        manager.advance(&user, &text("9876543210"), &ctx).unwrap();
        for bad in ["ten", "1.234", "1", "10.01"] {
            let result = manager.advance(&user, &text(bad), &ctx).unwrap();
            assert!(
                matches!(result, Advance::Reprompt { step: Step::WithdrawAmount, .. }),
                "{bad} should be refused"
            );
        }
        assert_eq!(
            manager.current(&user),
            Some((FlowKind::Withdraw, Step::WithdrawAmount))
        );
    }

    #[test]
    fn test_start_flow_discards_previous_session() {
        let manager = SessionManager::default();
        let ctx = FakeLedger::with("u", 10);
        let user = UserId::new("u");
        manager.start_flow(&user, FlowKind::Withdraw);
        manager
            .advance(&user, &Input::Choice("fxl".to_string()), &ctx)
            .unwrap();

        assert_eq!(manager.start_flow(&user, FlowKind::SubmitProof), Step::ProofLink);
        assert_eq!(
            manager.current(&user),
            Some((FlowKind::SubmitProof, Step::ProofLink))
        );
        assert_eq!(manager.active_count(), 1);
    }

    #[test]
    fn test_cancel_and_missing_session() {
        let manager = SessionManager::default();
        let ctx = FakeLedger::with("u", 10);
        let user = UserId::new("u");

        assert!(!manager.cancel(&user));
        manager.start_flow(&user, FlowKind::SubmitProof);
        assert!(manager.cancel(&user));
        assert_eq!(
            manager.advance(&user, &text("https://t.me/x"), &ctx),
            Err(SessionError::NoActiveFlow)
        );
    }

    #[test]
    fn test_idle_session_expires() {
        let manager = SessionManager::new(Duration::from_secs(60));
        let ctx = FakeLedger::with("u", 10);
        let user = UserId::new("u");
        let other = UserId::new("other");
        let start = Instant::now();

        manager.start_flow_at(&user, FlowKind::SubmitProof, start);
        manager.start_flow_at(&other, FlowKind::SubmitProof, start + Duration::from_secs(50));

        let later = start + Duration::from_secs(61);
        assert_eq!(manager.current_at(&user, later), None);
        assert_eq!(
            manager.advance_at(&user, &text("https://t.me/x"), &ctx, later),
            Err(SessionError::Expired)
        );

        manager.start_flow_at(&user, FlowKind::SubmitProof, start);
        assert_eq!(manager.sweep_expired_at(later), 1);
        assert_eq!(
            manager.current_at(&other, later),
            Some((FlowKind::SubmitProof, Step::ProofLink))
        );
    }

    #[test]
    fn test_admin_flows_produce_actions() {
        let manager = SessionManager::default();
        let ctx = FakeLedger::with("target", 3);
        let moderator = UserId::new("mod");

        manager.start_flow(&moderator, FlowKind::AdminRemoveBalance);
        let missing = manager.advance(&moderator, &text("nobody"), &ctx).unwrap();
        assert!(matches!(missing, Advance::Reprompt { step: Step::TargetUser, .. }));
        manager.advance(&moderator, &text("target"), &ctx).unwrap();
        let zero = manager.advance(&moderator, &text("0"), &ctx).unwrap();
        assert!(matches!(zero, Advance::Reprompt { .. }));
        assert_eq!(
            manager.advance(&moderator, &text("7.5"), &ctx).unwrap(),
            Advance::Complete(FlowAction::AdjustBalance {
                target: UserId::new("target"),
                adjustment: BalanceAdjustment::Debit(Amount::from_minor(750)),
            })
        );

        manager.start_flow(&moderator, FlowKind::AdminBulkClaims);
        let none = manager.advance(&moderator, &text("hello world"), &ctx).unwrap();
        assert!(matches!(none, Advance::Reprompt { step: Step::ClaimKeys, .. }));
        manager
            .advance(&moderator, &text("6274638384\n1234567890"), &ctx)
            .unwrap();
        assert_eq!(
            manager.advance(&moderator, &text("1.50"), &ctx).unwrap(),
            Advance::Complete(FlowAction::AddClaims {
                keys: vec!["6274638384".to_string(), "1234567890".to_string()],
                reward: Amount::from_minor(150),
            })
        );
    }

    #[test]
    fn test_proof_flow_rejects_uploads_and_junk() {
        let manager = SessionManager::default();
        let ctx = FakeLedger::with("u", 0);
        let user = UserId::new("u");
        manager.start_flow(&user, FlowKind::SubmitProof);

        assert!(matches!(
            manager.advance(&user, &Input::Upload, &ctx).unwrap(),
            Advance::Reprompt { .. }
        ));
        assert!(matches!(
            manager.advance(&user, &text("hello"), &ctx).unwrap(),
            Advance::Reprompt { .. }
        ));
        assert_eq!(
            manager
                .advance(&user, &text(" https://t.me/bot?start=REF123 "), &ctx)
                .unwrap(),
            Advance::Complete(FlowAction::SubmitProof {
                link: "https://t.me/bot?start=REF123".to_string()
            })
        );
    }
}
