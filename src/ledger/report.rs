//! Read-only moderator views over the ledger.

use super::amount::Amount;
use super::model::{Accounts, Claims, UserAccount, Withdrawals};
use super::store::LedgerStore;

/// Number of accounts shown by the recent-users view.
pub const RECENT_USERS_LIMIT: usize = 5;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Statistics {
    pub total_users: usize,
    pub total_balance: Amount,
    pub total_proofs: u64,
    pub open_claims: usize,
    pub open_claim_rewards: Amount,
    pub pending_withdrawals: usize,
    pub escrowed: Amount,
}

pub fn statistics(store: &LedgerStore) -> Statistics {
    let accounts = store.load::<Accounts>();
    let claims = store.load::<Claims>();
    let withdrawals = store.load::<Withdrawals>();

    Statistics {
        total_users: accounts.users.len(),
        total_balance: accounts.users.values().map(|a| a.balance).sum(),
        total_proofs: accounts.users.values().map(|a| a.proof_count as u64).sum(),
        open_claims: claims.unconsumed().count(),
        open_claim_rewards: claims.unconsumed().map(|c| c.reward).sum(),
        pending_withdrawals: withdrawals.pending().count(),
        escrowed: withdrawals.pending().map(|r| r.amount).sum(),
    }
}

/// Most recently joined accounts, newest first.
pub fn recent_users(store: &LedgerStore, limit: usize) -> Vec<UserAccount> {
    let mut users: Vec<UserAccount> = store.load::<Accounts>().users.into_values().collect();
    users.sort_by(|a, b| {
        b.joined_at
            .cmp(&a.joined_at)
            .then_with(|| b.user_id.cmp(&a.user_id))
    });
    users.truncate(limit);
    users
}
