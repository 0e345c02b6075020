//! Persisted records and the four collections that hold them.

use super::amount::Amount;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Opaque chat-platform user identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        UserId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Seconds since the unix epoch.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Display metadata supplied by the chat platform.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub display_name: Option<String>,
    pub username: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccount {
    pub user_id: UserId,
    pub balance: Amount,
    pub proof_count: u32,
    #[serde(default)]
    pub profile: Profile,
    pub joined_at: u64,
    pub last_active_at: u64,
}

impl UserAccount {
    pub fn new(user_id: UserId, profile: Profile, now: u64) -> Self {
        Self {
            user_id,
            balance: Amount::ZERO,
            proof_count: 0,
            profile,
            joined_at: now,
            last_active_at: now,
        }
    }

    /// Best human-readable label for moderator views.
    pub fn label(&self) -> &str {
        self.profile
            .display_name
            .as_deref()
            .unwrap_or(self.user_id.as_str())
    }
}

/// Single-use reward keyed by a token expected inside a submitted proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedClaim {
    pub claim_key: String,
    pub reward: Amount,
    pub consumed: bool,
    pub consumed_by: Option<UserId>,
    pub consumed_at: Option<u64>,
    pub created_at: u64,
}

impl VerifiedClaim {
    pub fn new(claim_key: impl Into<String>, reward: Amount, now: u64) -> Self {
        Self {
            claim_key: claim_key.into(),
            reward,
            consumed: false,
            consumed_by: None,
            consumed_at: None,
            created_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionOutcome {
    Verified,
    Rejected,
}

/// Append-only log entry, one per proof submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionRecord {
    pub user_id: UserId,
    pub submitted_text: String,
    pub outcome: SubmissionOutcome,
    pub amount_credited: Amount,
    pub claim_key: Option<String>,
    pub timestamp: u64,
}

/// Payout rail chosen by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawalMethod {
    Upi,
    Wallet,
    Fxl,
}

impl WithdrawalMethod {
    pub const ALL: [WithdrawalMethod; 3] = [
        WithdrawalMethod::Upi,
        WithdrawalMethod::Wallet,
        WithdrawalMethod::Fxl,
    ];

    /// Stable short code used in callback data and config.
    pub fn code(&self) -> &'static str {
        match self {
            WithdrawalMethod::Upi => "upi",
            WithdrawalMethod::Wallet => "wallet",
            WithdrawalMethod::Fxl => "fxl",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|m| m.code().eq_ignore_ascii_case(code.trim()))
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            WithdrawalMethod::Upi => "UPI",
            WithdrawalMethod::Wallet => "Wallet",
            WithdrawalMethod::Fxl => "FXL",
        }
    }

    /// What the destination prompt asks for.
    pub fn destination_hint(&self) -> &'static str {
        match self {
            WithdrawalMethod::Upi => "UPI ID (e.g. name@bank)",
            WithdrawalMethod::Wallet => "wallet number",
            WithdrawalMethod::Fxl => "FXL details",
        }
    }
}

impl fmt::Display for WithdrawalMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawalStatus {
    Pending,
    Approved,
    Rejected,
}

impl WithdrawalStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, WithdrawalStatus::Pending)
    }
}

pub type RequestId = u64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalRequest {
    pub id: RequestId,
    pub user_id: UserId,
    pub amount: Amount,
    pub method: WithdrawalMethod,
    pub destination: String,
    pub status: WithdrawalStatus,
    pub requested_at: u64,
    pub resolved_at: Option<u64>,
    #[serde(default)]
    pub note: Option<String>,
}

// ============================================================================
// Collections
// ============================================================================

/// Identity of a persisted collection.
///
/// The declaration order is the global lock order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionId {
    Accounts,
    Claims,
    Submissions,
    Withdrawals,
}

impl CollectionId {
    pub const ALL: [CollectionId; 4] = [
        CollectionId::Accounts,
        CollectionId::Claims,
        CollectionId::Submissions,
        CollectionId::Withdrawals,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            CollectionId::Accounts => "accounts",
            CollectionId::Claims => "claims",
            CollectionId::Submissions => "submissions",
            CollectionId::Withdrawals => "withdrawals",
        }
    }

    pub(crate) fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A value persisted as one file by the ledger store.
pub trait Collection: Serialize + DeserializeOwned + Default + Clone + Send + 'static {
    const ID: CollectionId;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Accounts {
    pub users: BTreeMap<UserId, UserAccount>,
}

impl Collection for Accounts {
    const ID: CollectionId = CollectionId::Accounts;
}

impl Accounts {
    pub fn get(&self, user: &UserId) -> Option<&UserAccount> {
        self.users.get(user)
    }

    pub fn get_mut(&mut self, user: &UserId) -> Option<&mut UserAccount> {
        self.users.get_mut(user)
    }

    /// Fetch the account, creating an empty one on first interaction.
    pub fn ensure(&mut self, user: &UserId, now: u64) -> &mut UserAccount {
        self.users
            .entry(user.clone())
            .or_insert_with(|| UserAccount::new(user.clone(), Profile::default(), now))
    }

    pub fn balance_of(&self, user: &UserId) -> Option<Amount> {
        self.users.get(user).map(|a| a.balance)
    }
}

/// Claims in insertion order; scan order for matching is this order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub entries: Vec<VerifiedClaim>,
}

impl Collection for Claims {
    const ID: CollectionId = CollectionId::Claims;
}

impl Claims {
    pub fn unconsumed(&self) -> impl Iterator<Item = &VerifiedClaim> {
        self.entries.iter().filter(|c| !c.consumed)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submissions {
    pub records: Vec<SubmissionRecord>,
}

impl Collection for Submissions {
    const ID: CollectionId = CollectionId::Submissions;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Withdrawals {
    pub next_id: RequestId,
    pub requests: BTreeMap<RequestId, WithdrawalRequest>,
}

impl Default for Withdrawals {
    fn default() -> Self {
        Self {
            next_id: 1,
            requests: BTreeMap::new(),
        }
    }
}

impl Collection for Withdrawals {
    const ID: CollectionId = CollectionId::Withdrawals;
}

impl Withdrawals {
    pub fn get(&self, id: RequestId) -> Option<&WithdrawalRequest> {
        self.requests.get(&id)
    }

    pub fn pending(&self) -> impl Iterator<Item = &WithdrawalRequest> {
        self.requests
            .values()
            .filter(|r| r.status == WithdrawalStatus::Pending)
    }

    /// Hand out the next request id.
    pub fn allocate_id(&mut self) -> RequestId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}
