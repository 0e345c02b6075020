//! Lock-protected, crash-safe collection storage.
//!
//! Every collection is one JSON file under the data directory. `mutate` is
//! the only write path: it locks the touched collections (in global
//! `CollectionId` order), loads them, runs the caller's closure on a copy,
//! and commits through write-temp + fsync + rename. A closure that returns
//! `Err` leaves disk untouched.
//!
//! A mutation spanning several collections is journaled. Before the first
//! rename each current file is hard-linked to `<name>.json.prev` and a
//! synced `commit-<names>.journal` is written; the journal is removed once
//! every rename has landed. A failed rename, or a journal found by `open`,
//! puts the `.prev` files back, so the collections move together or not at
//! all.
//!
//! Unreadable files are recovered from the newest parseable backup; if none
//! exists the collection falls back to its default and the event is logged.
//!
//! Every call does blocking file IO under `std::sync::Mutex` locks; async
//! callers go through `tokio::task::spawn_blocking`.

use super::backup::{unix_millis, BackupSet};
use super::model::{Accounts, Claims, Collection, CollectionId, Submissions, Withdrawals};
use super::LedgerError;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info, warn};

/// Default number of snapshots kept per collection.
pub const DEFAULT_BACKUP_RETENTION: usize = 10;

const JOURNAL_PREFIX: &str = "commit-";
const JOURNAL_SUFFIX: &str = ".journal";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOptions {
    /// Snapshot each collection into the backup set after it is committed.
    pub snapshot_on_write: bool,
    /// Snapshots kept per collection.
    pub backup_retention: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            snapshot_on_write: true,
            backup_retention: DEFAULT_BACKUP_RETENTION,
        }
    }
}

/// Where a loaded collection value came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadSource {
    /// Never written; caller default.
    Missing,
    /// Primary file parsed cleanly.
    Primary,
    /// Primary file unreadable; recovered from this snapshot.
    Backup(PathBuf),
    /// Primary file unreadable and no usable snapshot; reset to default.
    Reset,
}

impl LoadSource {
    fn primary_is_corrupt(&self) -> bool {
        matches!(self, LoadSource::Backup(_) | LoadSource::Reset)
    }
}

/// Result of a mutation: either the closure refused, or storage failed.
#[derive(Debug, thiserror::Error)]
pub enum MutateError<E> {
    #[error("mutation rejected: {0}")]
    Rejected(E),

    #[error(transparent)]
    Storage(#[from] LedgerError),
}

/// Durable store for the four ledger collections.
#[derive(Debug)]
pub struct LedgerStore {
    root: PathBuf,
    options: StoreOptions,
    backups: BackupSet,
    locks: [Mutex<()>; 4],
    /// Set when a failed commit could not be rolled back in place.
    recovery_pending: AtomicBool,
    #[cfg(test)]
    fail_rename: Mutex<Option<CollectionId>>,
}

impl LedgerStore {
    /// Open (creating if needed) a store rooted at `root`.
    ///
    /// Any commit interrupted by a crash is rolled back before this returns.
    pub fn open(root: impl Into<PathBuf>, options: StoreOptions) -> Result<Self, LedgerError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| LedgerError::io(&root, e))?;
        let backups = BackupSet::new(&root, options.backup_retention);

        let store = Self {
            root,
            options,
            backups,
            locks: Default::default(),
            recovery_pending: AtomicBool::new(false),
            #[cfg(test)]
            fail_rename: Mutex::new(None),
        };
        store.recover_interrupted_commits()?;
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn collection_path(&self, id: CollectionId) -> PathBuf {
        self.root.join(format!("{}.json", id.name()))
    }

    pub fn backups(&self) -> &BackupSet {
        &self.backups
    }

    /// Last committed value of `C`, or its default if never written.
    pub fn load<C: Collection>(&self) -> C {
        self.read_collection::<C>().0
    }

    /// Report how `id` would load right now, for operator tooling.
    pub fn inspect(&self, id: CollectionId) -> LoadSource {
        match id {
            CollectionId::Accounts => self.read_collection::<Accounts>().1,
            CollectionId::Claims => self.read_collection::<Claims>().1,
            CollectionId::Submissions => self.read_collection::<Submissions>().1,
            CollectionId::Withdrawals => self.read_collection::<Withdrawals>().1,
        }
    }

    /// Apply `f` to the current state of collection set `S` and commit it.
    ///
    /// `S` is a single collection or a tuple of collections; a tuple is
    /// committed under all of its locks at once and lands atomically. If `f`
    /// returns `Err`, nothing is written and the error comes back as
    /// [`MutateError::Rejected`].
    pub fn mutate<S, T, E, F>(&self, f: F) -> Result<T, MutateError<E>>
    where
        S: CollectionSet,
        F: FnOnce(&mut S) -> Result<T, E>,
    {
        let _guards = self.lock_all(&S::ids());
        if self.recovery_pending.load(Ordering::Acquire) {
            return Err(LedgerError::RecoveryPending.into());
        }

        let (mut next, sources) = S::read_all(self);
        let result = f(&mut next).map_err(MutateError::Rejected)?;

        let mut txn = Transaction::new(self);
        next.stage_all(&sources, &mut txn)?;
        txn.commit()?;

        debug!(collections = ?S::ids(), "ledger mutation committed");
        Ok(result)
    }

    fn lock_all(&self, ids: &[CollectionId]) -> Vec<MutexGuard<'_, ()>> {
        let mut ids = ids.to_vec();
        ids.sort();
        ids.dedup();
        ids.into_iter()
            .map(|id| {
                self.locks[id.index()]
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
            })
            .collect()
    }

    fn read_collection<C: Collection>(&self) -> (C, LoadSource) {
        let path = self.collection_path(C::ID);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return (C::default(), LoadSource::Missing)
            }
            Err(e) => {
                warn!(collection = %C::ID, error = %e, "failed to read collection file");
                return self.recover::<C>();
            }
        };

        match serde_json::from_slice::<C>(&bytes) {
            Ok(value) => (value, LoadSource::Primary),
            Err(e) => {
                warn!(collection = %C::ID, error = %e, "collection file is corrupt");
                self.recover::<C>()
            }
        }
    }

    fn recover<C: Collection>(&self) -> (C, LoadSource) {
        for candidate in self.backups.list_newest_first(C::ID) {
            let parsed = fs::read(&candidate)
                .ok()
                .and_then(|bytes| serde_json::from_slice::<C>(&bytes).ok());
            if let Some(value) = parsed {
                warn!(
                    collection = %C::ID,
                    backup = %candidate.display(),
                    "recovered collection from backup"
                );
                return (value, LoadSource::Backup(candidate));
            }
        }

        error!(
            collection = %C::ID,
            "no usable backup; collection reset to default"
        );
        (C::default(), LoadSource::Reset)
    }

    /// Copy an unreadable primary file aside so it is kept for inspection.
    fn quarantine(&self, id: CollectionId) -> Result<(), LedgerError> {
        let path = self.collection_path(id);
        if !path.exists() {
            return Ok(());
        }
        let target = self
            .root
            .join(format!("{}.json.corrupt-{}", id.name(), unix_millis()));
        fs::copy(&path, &target).map_err(|e| LedgerError::io(&path, e))?;
        warn!(collection = %id, copied_to = %target.display(), "quarantined corrupt collection file");
        Ok(())
    }

    fn rename_into_place(&self, staged: &StagedWrite) -> Result<(), LedgerError> {
        #[cfg(test)]
        if self.take_rename_failure(staged.id) {
            return Err(LedgerError::io(
                &staged.tmp,
                std::io::Error::other("rename refused"),
            ));
        }
        fs::rename(&staged.tmp, &staged.target).map_err(|e| LedgerError::io(&staged.tmp, e))
    }

    /// Make the next rename of `id` fail once.
    #[cfg(test)]
    pub(crate) fn fail_next_rename(&self, id: CollectionId) {
        *self.fail_rename.lock().unwrap_or_else(PoisonError::into_inner) = Some(id);
    }

    #[cfg(test)]
    fn take_rename_failure(&self, id: CollectionId) -> bool {
        let mut armed = self
            .fail_rename
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *armed == Some(id) {
            *armed = None;
            return true;
        }
        false
    }

    // ------------------------------------------------------------------------
    // Commit journal
    // ------------------------------------------------------------------------

    fn journal_path(&self, ids: &[CollectionId]) -> PathBuf {
        let names: Vec<&str> = ids.iter().map(|id| id.name()).collect();
        self.root.join(format!(
            "{}{}{}",
            JOURNAL_PREFIX,
            names.join("-"),
            JOURNAL_SUFFIX
        ))
    }

    /// Journal files (or, with `suffix` `.journal.tmp`, unfinished ones).
    fn journal_paths(&self, suffix: &str) -> Result<Vec<PathBuf>, LedgerError> {
        let entries = fs::read_dir(&self.root).map_err(|e| LedgerError::io(&self.root, e))?;
        let mut paths: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with(JOURNAL_PREFIX) && n.ends_with(suffix))
                    .unwrap_or(false)
            })
            .collect();
        paths.sort();
        Ok(paths)
    }

    /// Roll back commits a crash left half-applied, then clear leftovers.
    fn recover_interrupted_commits(&self) -> Result<(), LedgerError> {
        for path in self.journal_paths(JOURNAL_SUFFIX)? {
            let bytes = fs::read(&path).map_err(|e| LedgerError::io(&path, e))?;
            match serde_json::from_slice::<CommitJournal>(&bytes) {
                Ok(journal) => {
                    self.roll_back(&journal)?;
                    info!(journal = %path.display(), "rolled back interrupted commit");
                }
                Err(e) => {
                    warn!(
                        journal = %path.display(),
                        error = %e,
                        "discarding unreadable commit journal"
                    );
                }
            }
            remove_if_exists(&path)?;
            sync_directory(&self.root)?;
        }

        for path in self.journal_paths(".journal.tmp")? {
            remove_if_exists(&path)?;
        }
        for id in CollectionId::ALL {
            let target = self.collection_path(id);
            remove_if_exists(&tmp_path(&target))?;
            remove_if_exists(&prior_path(&target))?;
        }
        Ok(())
    }

    /// Put every already-renamed collection of `journal` back to its prior file.
    ///
    /// A collection whose temp file still exists was never renamed. Safe to
    /// run again after a partial rollback.
    fn roll_back(&self, journal: &CommitJournal) -> Result<(), LedgerError> {
        for entry in &journal.writes {
            let target = self.collection_path(entry.collection);
            if tmp_path(&target).exists() {
                continue;
            }
            let prior = prior_path(&target);
            if entry.had_prior {
                if prior.exists() {
                    fs::rename(&prior, &target).map_err(|e| LedgerError::io(&prior, e))?;
                }
            } else {
                remove_if_exists(&target)?;
            }
        }
        sync_directory(&self.root)
    }

    fn finish_journal(&self, path: &Path, journal: &CommitJournal) -> Result<(), LedgerError> {
        remove_if_exists(path)?;
        sync_directory(&self.root)?;
        for entry in &journal.writes {
            let prior = prior_path(&self.collection_path(entry.collection));
            if let Err(e) = remove_if_exists(&prior) {
                warn!(collection = %entry.collection, error = %e, "failed to remove prior copy");
            }
        }
        Ok(())
    }
}

/// Run `f` against `store` on tokio's blocking pool.
pub async fn run_blocking<T, F>(store: &Arc<LedgerStore>, f: F) -> Result<T, LedgerError>
where
    F: FnOnce(&LedgerStore) -> T + Send + 'static,
    T: Send + 'static,
{
    let store = Arc::clone(store);
    Ok(tokio::task::spawn_blocking(move || f(&store)).await?)
}

// ============================================================================
// Transactions
// ============================================================================

#[derive(Debug, Default, Serialize, Deserialize)]
struct CommitJournal {
    writes: Vec<JournalEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct JournalEntry {
    collection: CollectionId,
    /// Whether `<name>.json` existed, and so has a `.prev` copy.
    had_prior: bool,
}

struct StagedWrite {
    id: CollectionId,
    tmp: PathBuf,
    target: PathBuf,
    quarantine: bool,
    snapshot: Option<Vec<u8>>,
}

/// Staged temp files for one mutation; renamed into place on `commit`.
pub struct Transaction<'a> {
    store: &'a LedgerStore,
    staged: Vec<StagedWrite>,
    committed: bool,
}

impl<'a> Transaction<'a> {
    fn new(store: &'a LedgerStore) -> Self {
        Self {
            store,
            staged: Vec::new(),
            committed: false,
        }
    }

    /// Serialize `next` into a synced temp file.
    pub fn stage<C: Collection>(
        &mut self,
        next: &C,
        source: &LoadSource,
    ) -> Result<(), LedgerError> {
        let target = self.store.collection_path(C::ID);
        let tmp = tmp_path(&target);

        let bytes =
            serde_json::to_vec_pretty(next).map_err(|e| LedgerError::encode(C::ID, e))?;
        write_synced(&tmp, &bytes)?;
        self.staged.push(StagedWrite {
            id: C::ID,
            tmp,
            target,
            quarantine: source.primary_is_corrupt(),
            snapshot: self.store.options.snapshot_on_write.then_some(bytes),
        });
        Ok(())
    }

    fn commit(mut self) -> Result<(), LedgerError> {
        let store = self.store;
        for staged in &self.staged {
            if staged.quarantine {
                store.quarantine(staged.id)?;
            }
        }

        match self.staged.as_slice() {
            [] => {}
            [single] => store.rename_into_place(single)?,
            _ => self.commit_journaled()?,
        }
        self.committed = true;
        sync_directory(&store.root)?;

        for staged in &mut self.staged {
            if let Some(bytes) = staged.snapshot.take() {
                if let Err(e) = store.backups.write(staged.id, &bytes) {
                    warn!(
                        collection = %staged.id,
                        error = %e,
                        "failed to snapshot committed collection"
                    );
                }
            }
        }
        Ok(())
    }

    fn commit_journaled(&self) -> Result<(), LedgerError> {
        let store = self.store;
        let ids: Vec<CollectionId> = self.staged.iter().map(|s| s.id).collect();
        let path = store.journal_path(&ids);

        let mut journal = CommitJournal::default();
        for staged in &self.staged {
            let prior = prior_path(&staged.target);
            remove_if_exists(&prior)?;
            let had_prior = match fs::hard_link(&staged.target, &prior) {
                Ok(()) => true,
                Err(e) if e.kind() == ErrorKind::NotFound => false,
                Err(e) => return Err(LedgerError::io(&staged.target, e)),
            };
            journal.writes.push(JournalEntry {
                collection: staged.id,
                had_prior,
            });
        }

        let bytes = serde_json::to_vec_pretty(&journal)
            .map_err(|e| LedgerError::io(&path, e.into()))?;
        let journal_tmp = path.with_extension("journal.tmp");
        write_synced(&journal_tmp, &bytes)?;
        fs::rename(&journal_tmp, &path).map_err(|e| LedgerError::io(&journal_tmp, e))?;
        sync_directory(&store.root)?;

        for staged in &self.staged {
            if let Err(e) = store.rename_into_place(staged) {
                error!(collection = %staged.id, error = %e, "commit failed midway; rolling back");
                match store.roll_back(&journal) {
                    Ok(()) => store.finish_journal(&path, &journal)?,
                    Err(rollback) => {
                        store.recovery_pending.store(true, Ordering::Release);
                        error!(
                            journal = %path.display(),
                            error = %rollback,
                            "rollback failed; writes refused until the store is reopened"
                        );
                    }
                }
                return Err(e);
            }
        }

        store.finish_journal(&path, &journal)
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        for staged in &self.staged {
            let _ = fs::remove_file(&staged.tmp);
        }
    }
}

fn tmp_path(target: &Path) -> PathBuf {
    target.with_extension("json.tmp")
}

fn prior_path(target: &Path) -> PathBuf {
    target.with_extension("json.prev")
}

fn remove_if_exists(path: &Path) -> Result<(), LedgerError> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(LedgerError::io(path, e)),
        _ => Ok(()),
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<(), LedgerError> {
    let mut file = File::create(path).map_err(|e| LedgerError::io(path, e))?;
    file.write_all(bytes).map_err(|e| LedgerError::io(path, e))?;
    file.sync_all().map_err(|e| LedgerError::io(path, e))
}

#[cfg(unix)]
fn sync_directory(path: &Path) -> Result<(), LedgerError> {
    let dir = File::open(path).map_err(|e| LedgerError::io(path, e))?;
    dir.sync_all().map_err(|e| LedgerError::io(path, e))
}

#[cfg(not(unix))]
fn sync_directory(_path: &Path) -> Result<(), LedgerError> {
    Ok(())
}

// ============================================================================
// Collection sets
// ============================================================================

/// One collection, or a tuple of collections mutated together.
pub trait CollectionSet: Clone + Sized {
    fn ids() -> Vec<CollectionId>;

    #[doc(hidden)]
    fn read_all(store: &LedgerStore) -> (Self, Vec<LoadSource>);

    #[doc(hidden)]
    fn stage_all(
        &self,
        sources: &[LoadSource],
        txn: &mut Transaction<'_>,
    ) -> Result<(), LedgerError>;
}

macro_rules! single_collection_set {
    ($($ty:ty),*) => {$(
        impl CollectionSet for $ty {
            fn ids() -> Vec<CollectionId> {
                vec![<$ty as Collection>::ID]
            }

            fn read_all(store: &LedgerStore) -> (Self, Vec<LoadSource>) {
                let (value, source) = store.read_collection::<$ty>();
                (value, vec![source])
            }

            fn stage_all(
                &self,
                sources: &[LoadSource],
                txn: &mut Transaction<'_>,
            ) -> Result<(), LedgerError> {
                txn.stage(self, &sources[0])
            }
        }
    )*};
}

single_collection_set!(Accounts, Claims, Submissions, Withdrawals);

impl<A: Collection, B: Collection> CollectionSet for (A, B) {
    fn ids() -> Vec<CollectionId> {
        vec![A::ID, B::ID]
    }

    fn read_all(store: &LedgerStore) -> (Self, Vec<LoadSource>) {
        let (a, sa) = store.read_collection::<A>();
        let (b, sb) = store.read_collection::<B>();
        ((a, b), vec![sa, sb])
    }

    fn stage_all(
        &self,
        sources: &[LoadSource],
        txn: &mut Transaction<'_>,
    ) -> Result<(), LedgerError> {
        txn.stage(&self.0, &sources[0])?;
        txn.stage(&self.1, &sources[1])
    }
}

impl<A: Collection, B: Collection, C: Collection> CollectionSet for (A, B, C) {
    fn ids() -> Vec<CollectionId> {
        vec![A::ID, B::ID, C::ID]
    }

    fn read_all(store: &LedgerStore) -> (Self, Vec<LoadSource>) {
        let (a, sa) = store.read_collection::<A>();
        let (b, sb) = store.read_collection::<B>();
        let (c, sc) = store.read_collection::<C>();
        ((a, b, c), vec![sa, sb, sc])
    }

    fn stage_all(
        &self,
        sources: &[LoadSource],
        txn: &mut Transaction<'_>,
    ) -> Result<(), LedgerError> {
        txn.stage(&self.0, &sources[0])?;
        txn.stage(&self.1, &sources[1])?;
        txn.stage(&self.2, &sources[2])
    }
}
