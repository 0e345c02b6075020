//! Account registration and moderator balance adjustments.

use super::amount::Amount;
use super::model::{unix_now, Accounts, Profile, UserAccount, UserId};
use super::store::{LedgerStore, MutateError};
use tracing::info;

/// Create the account on first interaction, or refresh its profile.
pub fn register(
    store: &LedgerStore,
    user: &UserId,
    profile: Profile,
) -> Result<UserAccount, MutateError<std::convert::Infallible>> {
    let now = unix_now();
    store.mutate(|accounts: &mut Accounts| {
        let created = !accounts.users.contains_key(user);
        let account = accounts.ensure(user, now);
        if profile.display_name.is_some() {
            account.profile.display_name = profile.display_name;
        }
        if profile.username.is_some() {
            account.profile.username = profile.username;
        }
        account.last_active_at = now;
        if created {
            info!(user = %user, "account registered");
        }
        Ok(account.clone())
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceAdjustment {
    Credit(Amount),
    /// Debits clamp at zero instead of failing.
    Debit(Amount),
}

/// What a balance adjustment actually did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceChange {
    pub user: UserId,
    pub applied: Amount,
    pub new_balance: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdjustError {
    #[error("user {0} not found")]
    UnknownUser(UserId),

    #[error("amount must be positive")]
    ZeroAmount,

    #[error("balance would overflow")]
    Overflow,
}

/// Moderator credit or debit of an existing account.
pub fn adjust_balance(
    store: &LedgerStore,
    user: &UserId,
    adjustment: BalanceAdjustment,
) -> Result<BalanceChange, MutateError<AdjustError>> {
    store.mutate(|accounts: &mut Accounts| {
        let account = accounts
            .get_mut(user)
            .ok_or_else(|| AdjustError::UnknownUser(user.clone()))?;

        let applied = match adjustment {
            BalanceAdjustment::Credit(amount) => {
                if amount.is_zero() {
                    return Err(AdjustError::ZeroAmount);
                }
                account.balance = account
                    .balance
                    .checked_add(amount)
                    .ok_or(AdjustError::Overflow)?;
                amount
            }
            BalanceAdjustment::Debit(amount) => {
                if amount.is_zero() {
                    return Err(AdjustError::ZeroAmount);
                }
                let applied = amount.min(account.balance);
                account.balance = account.balance.saturating_sub(amount);
                applied
            }
        };

        info!(user = %user, ?adjustment, new_balance = %account.balance, "balance adjusted");
        Ok(BalanceChange {
            user: user.clone(),
            applied,
            new_balance: account.balance,
        })
    })
}
