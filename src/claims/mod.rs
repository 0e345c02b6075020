//! Claim Consumption Engine
//!
//! Matches a submitted proof against registered claims and redeems at most
//! one, at most once. The scan, the claim update, the balance credit and
//! the submission log entry all happen inside a single ledger mutation over
//! (accounts, claims, submissions), so racing submissions for the same
//! claim cannot both win.
//!
//! Tie-break: claims are scanned in insertion order and the first
//! unconsumed claim whose key is a substring of the submission wins.
//! Overlapping keys (e.g. `1234` and `12345`) are inherently ambiguous;
//! insertion order is the documented resolution.

use crate::ledger::{
    unix_now, Accounts, Amount, Claims, LedgerStore, MutateError, SubmissionOutcome,
    SubmissionRecord, Submissions, UserId, VerifiedClaim,
};
use std::collections::HashSet;
use std::convert::Infallible;
use tracing::info;

/// Default minimum length of a bulk-imported claim key.
pub const DEFAULT_MIN_CLAIM_KEY_LEN: usize = 6;

/// Result of one proof submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumeOutcome {
    Verified { amount: Amount, claim_key: String },
    Rejected,
}

impl ConsumeOutcome {
    pub fn is_verified(&self) -> bool {
        matches!(self, ConsumeOutcome::Verified { .. })
    }
}

/// Redeem the first matching unconsumed claim for `user`.
///
/// Always appends a submission record, verified or not. The account is
/// created if this is the user's first interaction.
pub fn consume(
    store: &LedgerStore,
    token: &str,
    user: &UserId,
) -> Result<ConsumeOutcome, MutateError<Infallible>> {
    let now = unix_now();

    store.mutate(
        |(accounts, claims, submissions): &mut (Accounts, Claims, Submissions)| {
            let account = accounts.ensure(user, now);
            account.last_active_at = now;

            let matched = claims
                .entries
                .iter_mut()
                .find(|claim| !claim.consumed && token.contains(claim.claim_key.as_str()));

            let outcome = match matched {
                Some(claim) => {
                    claim.consumed = true;
                    claim.consumed_by = Some(user.clone());
                    claim.consumed_at = Some(now);

                    // Rewards are bounded by moderator input; saturate rather
                    // than refuse a valid claim on overflow.
                    account.balance = account
                        .balance
                        .checked_add(claim.reward)
                        .unwrap_or(Amount::from_minor(u64::MAX));
                    account.proof_count = account.proof_count.saturating_add(1);

                    ConsumeOutcome::Verified {
                        amount: claim.reward,
                        claim_key: claim.claim_key.clone(),
                    }
                }
                None => ConsumeOutcome::Rejected,
            };

            submissions.records.push(match &outcome {
                ConsumeOutcome::Verified { amount, claim_key } => SubmissionRecord {
                    user_id: user.clone(),
                    submitted_text: token.to_string(),
                    outcome: SubmissionOutcome::Verified,
                    amount_credited: *amount,
                    claim_key: Some(claim_key.clone()),
                    timestamp: now,
                },
                ConsumeOutcome::Rejected => SubmissionRecord {
                    user_id: user.clone(),
                    submitted_text: token.to_string(),
                    outcome: SubmissionOutcome::Rejected,
                    amount_credited: Amount::ZERO,
                    claim_key: None,
                    timestamp: now,
                },
            });

            info!(user = %user, verified = outcome.is_verified(), "proof submission recorded");
            Ok(outcome)
        },
    )
}

/// Counts reported back to the moderator after a bulk import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClaimImport {
    pub added: usize,
    pub updated: usize,
    pub open_total: usize,
}

/// Register claims in bulk, all with the same reward.
///
/// A key that already has an unconsumed claim gets its reward updated.
/// Otherwise a new claim is appended, even when a consumed claim with the
/// same key is retained for audit.
pub fn add_claims(
    store: &LedgerStore,
    keys: &[String],
    reward: Amount,
) -> Result<ClaimImport, MutateError<Infallible>> {
    let now = unix_now();
    store.mutate(|claims: &mut Claims| {
        let mut import = ClaimImport::default();
        for key in keys {
            match claims
                .entries
                .iter_mut()
                .find(|c| !c.consumed && c.claim_key == *key)
            {
                Some(existing) => {
                    existing.reward = reward;
                    import.updated += 1;
                }
                None => {
                    claims.entries.push(VerifiedClaim::new(key.clone(), reward, now));
                    import.added += 1;
                }
            }
        }
        import.open_total = claims.unconsumed().count();
        info!(added = import.added, updated = import.updated, reward = %reward, "claims imported");
        Ok(import)
    })
}

/// Extract claim keys from free-form moderator text.
///
/// A key is a run of ASCII alphanumerics at least `min_len` long that
/// contains at least one digit. Order of first appearance is kept and
/// duplicates collapse.
pub fn parse_claim_keys(text: &str, min_len: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|token| token.len() >= min_len && token.chars().any(|c| c.is_ascii_digit()))
        .filter(|token| seen.insert(token.to_string()))
        .map(str::to_string)
        .collect()
}
