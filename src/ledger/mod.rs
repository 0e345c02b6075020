//! Ledger Store
//!
//! Durable storage for the four persisted collections (accounts, claims,
//! submission history, withdrawal requests). All writes go through
//! [`LedgerStore::mutate`]; reads through [`LedgerStore::load`].

pub mod accounts;
pub mod amount;
pub mod backup;
pub mod model;
pub mod report;
pub mod store;

#[cfg(test)]
mod proptests;

pub use accounts::{adjust_balance, register, AdjustError, BalanceAdjustment, BalanceChange};
pub use amount::{Amount, AmountParseError};
pub use model::{
    unix_now, Accounts, Claims, Collection, CollectionId, Profile, RequestId, SubmissionOutcome,
    SubmissionRecord, Submissions, UserAccount, UserId, VerifiedClaim, WithdrawalMethod,
    WithdrawalRequest, WithdrawalStatus, Withdrawals,
};
pub use report::{recent_users, statistics, Statistics};
pub use store::{run_blocking, CollectionSet, LedgerStore, LoadSource, MutateError, StoreOptions};

use std::path::{Path, PathBuf};

/// Storage failures (as opposed to a mutation the caller rejected).
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("an earlier commit could not be rolled back; reopen the store to recover it")]
    RecoveryPending,

    #[error("ledger task did not complete: {0}")]
    Blocking(#[from] tokio::task::JoinError),

    #[error("failed to encode {collection}: {source}")]
    Encode {
        collection: CollectionId,
        #[source]
        source: serde_json::Error,
    },
}

impl LedgerError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        LedgerError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn encode(collection: CollectionId, source: serde_json::Error) -> Self {
        LedgerError::Encode { collection, source }
    }
}
