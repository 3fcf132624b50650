use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use rewards_core::{
    Address, CalculatorAuthorization, Enrollment, PositionId, RewardAccrualRecord, SettlementRecord,
    TreasuryState, UserClaimState,
};

use super::memory::StateImage;
use super::{StateStore, StoreBatch};
use crate::error::{EngineError, EngineResult};

const STATE_FILE: &str = "state.json";
const JOURNAL_FILE: &str = "journal.jsonl";
const LOCK_FILE: &str = "LOCK";

/// Journal entries replayed on open before they are folded into the snapshot
pub const DEFAULT_JOURNAL_COMPACT_AFTER: usize = 1024;

struct Journal {
    file: File,
    /// Bytes of complete entries
    len: u64,
    entries: usize,
}

/// Durable snapshot plus append-only journal
///
/// A commit appends its batch as one JSON line and fsyncs it; the cost is
/// proportional to the batch, not to the whole state. Once the journal holds
/// `compact_after` entries the state is written to a fresh snapshot (temp file,
/// fsync, rename) and the journal is truncated. Replaying a batch twice yields
/// the same state, so a crash between those two steps is harmless.
///
/// The directory is held under an exclusive advisory lock for the lifetime of
/// the store; a second process opening it fails instead of interleaving writes.
pub struct FileStore {
    dir: PathBuf,
    state: RwLock<StateImage>,
    journal: Mutex<Journal>,
    compact_after: usize,
    _lock: fd_lock::RwLock<File>,
}

impl std::fmt::Debug for FileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStore")
            .field("dir", &self.dir)
            .field("compact_after", &self.compact_after)
            .finish_non_exhaustive()
    }
}

impl FileStore {
    /// Open or create a store rooted at `dir`
    pub fn open(dir: impl AsRef<Path>) -> EngineResult<Self> {
        Self::open_with_compaction(dir, DEFAULT_JOURNAL_COMPACT_AFTER)
    }

    pub fn open_with_compaction(dir: impl AsRef<Path>, compact_after: usize) -> EngineResult<Self> {
        let dir = dir.as_ref();
        if compact_after == 0 {
            return Err(EngineError::Configuration("journal compaction threshold must be positive".into()));
        }
        fs::create_dir_all(dir)?;
        let lock = lock_directory(dir)?;

        let path = dir.join(STATE_FILE);
        let mut state = if path.exists() {
            let content = fs::read(&path)?;
            let image: StateImage = serde_json::from_slice(&content)?;
            info!(
                path = %path.display(),
                users = image.users.len(),
                enrollments = image.enrollments.len(),
                "Loaded state snapshot"
            );
            image
        } else {
            info!(path = %path.display(), "Creating new state snapshot");
            StateImage::default()
        };

        let journal = replay_journal(&dir.join(JOURNAL_FILE), &mut state)?;

        let store = Self {
            dir: dir.to_path_buf(),
            state: RwLock::new(state),
            journal: Mutex::new(journal),
            compact_after,
            _lock: lock,
        };
        {
            let state = store.state.read();
            let mut journal = store.journal.lock();
            if journal.entries >= store.compact_after {
                store.compact(&state, &mut journal)?;
            }
        }
        Ok(store)
    }

    /// Snapshot file; absent until the first compaction
    pub fn path(&self) -> PathBuf {
        self.dir.join(STATE_FILE)
    }

    pub fn journal_path(&self) -> PathBuf {
        self.dir.join(JOURNAL_FILE)
    }

    /// Entries appended since the last snapshot
    pub fn journal_entries(&self) -> usize {
        self.journal.lock().entries
    }

    fn append(&self, journal: &mut Journal, batch: &StoreBatch) -> EngineResult<()> {
        let mut line = serde_json::to_vec(batch)?;
        line.push(b'\n');

        let written = journal
            .file
            .write_all(&line)
            .and_then(|_| journal.file.sync_data());
        if let Err(e) = written {
            // Cut the partial entry so later appends stay parseable
            if let Err(truncate) = journal.file.set_len(journal.len) {
                warn!(error = %truncate, "Failed to roll back partial journal entry");
            }
            return Err(e.into());
        }

        journal.len += line.len() as u64;
        journal.entries += 1;
        Ok(())
    }

    fn compact(&self, image: &StateImage, journal: &mut Journal) -> EngineResult<()> {
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        serde_json::to_writer(&mut tmp, image)?;
        tmp.flush()?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.path()).map_err(|e| EngineError::Storage(e.error.to_string()))?;

        // The rename itself must reach the disk too
        #[cfg(unix)]
        File::open(&self.dir)?.sync_all()?;

        journal.file.set_len(0)?;
        journal.file.sync_all()?;
        debug!(dir = %self.dir.display(), folded = journal.entries, "Compacted state journal");
        journal.len = 0;
        journal.entries = 0;
        Ok(())
    }
}

fn lock_directory(dir: &Path) -> EngineResult<fd_lock::RwLock<File>> {
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(dir.join(LOCK_FILE))?;
    let mut lock = fd_lock::RwLock::new(file);
    match lock.try_write() {
        // Held until the file is closed with the store
        Ok(guard) => std::mem::forget(guard),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
            return Err(EngineError::Storage(format!(
                "state directory {} is locked by another process",
                dir.display()
            )));
        }
        Err(e) => return Err(e.into()),
    }
    Ok(lock)
}

/// Apply every complete journal entry to `state`
///
/// An unparsable final line is a write torn by a crash and is cut off; a bad
/// line followed by good ones means the journal is corrupt.
fn replay_journal(path: &Path, state: &mut StateImage) -> EngineResult<Journal> {
    let content = if path.exists() { fs::read(path)? } else { Vec::new() };

    let mut offset = 0usize;
    let mut entries = 0usize;
    while offset < content.len() {
        let rest = &content[offset..];
        let end = rest.iter().position(|b| *b == b'\n');
        let line = &rest[..end.unwrap_or(rest.len())];
        let parsed = match end {
            Some(_) => serde_json::from_slice::<StoreBatch>(line).ok(),
            None => None,
        };
        match parsed {
            Some(batch) => {
                state.apply(batch);
                entries += 1;
                offset += line.len() + 1;
            }
            None => {
                let trailing = end.map(|e| offset + e + 1).unwrap_or(content.len());
                if trailing < content.len() {
                    return Err(EngineError::Storage(format!(
                        "journal {} is corrupt at byte {}",
                        path.display(),
                        offset
                    )));
                }
                warn!(
                    path = %path.display(),
                    discarded = content.len() - offset,
                    "Discarding torn journal entry"
                );
                break;
            }
        }
    }

    let file = OpenOptions::new().create(true).append(true).open(path)?;
    if (offset as u64) < file.metadata()?.len() {
        file.set_len(offset as u64)?;
        file.sync_all()?;
    }
    if entries > 0 {
        info!(path = %path.display(), entries, "Replayed state journal");
    }
    Ok(Journal {
        file,
        len: offset as u64,
        entries,
    })
}

impl StateStore for FileStore {
    fn load_treasury(&self) -> EngineResult<Option<TreasuryState>> {
        Ok(self.state.read().treasury.clone())
    }

    fn load_users(&self) -> EngineResult<Vec<UserClaimState>> {
        Ok(self.state.read().users.values().cloned().collect())
    }

    fn load_user(&self, address: &Address) -> EngineResult<Option<UserClaimState>> {
        Ok(self.state.read().users.get(address).cloned())
    }

    fn load_authorization(&self) -> EngineResult<Option<CalculatorAuthorization>> {
        Ok(self.state.read().authorization.clone())
    }

    fn load_enrollments(&self) -> EngineResult<Vec<Enrollment>> {
        Ok(self.state.read().enrollments.values().cloned().collect())
    }

    fn load_enrollment(&self, position_id: &PositionId) -> EngineResult<Option<Enrollment>> {
        Ok(self.state.read().enrollments.get(position_id).cloned())
    }

    fn accruals_for_period(&self, period_index: u64) -> EngineResult<Vec<RewardAccrualRecord>> {
        Ok(self.state.read().accruals_for_period(period_index))
    }

    fn load_settlement(&self, tx_hash: &str) -> EngineResult<Option<SettlementRecord>> {
        Ok(self.state.read().settlements.get(tx_hash).cloned())
    }

    fn commit(&self, batch: StoreBatch) -> EngineResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut state = self.state.write();
        let mut journal = self.journal.lock();
        self.append(&mut journal, &batch)?;
        state.apply(batch);

        if journal.entries >= self.compact_after {
            // The entry is durable already; a failed compaction is retried next commit
            if let Err(e) = self.compact(&state, &mut journal) {
                warn!(dir = %self.dir.display(), error = %e, "State compaction failed");
            }
        }
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;
    use tempfile::TempDir;

    fn treasury() -> TreasuryState {
        TreasuryState::new(
            Decimal::from(1_000),
            Decimal::from(10),
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            100,
            86_400,
        )
        .unwrap()
    }

    fn user(n: u8, nonce: u64) -> UserClaimState {
        let mut user = UserClaimState::new(Address::new([n; 20]), Decimal::from(1_000));
        user.last_nonce = nonce;
        user
    }

    #[test]
    fn test_state_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let user = user(3, 17);

        {
            let store = FileStore::open(dir.path()).unwrap();
            store
                .commit(StoreBatch::new().with_treasury(treasury()).with_user(user.clone()))
                .unwrap();
        }

        let reopened = FileStore::open(dir.path()).unwrap();
        assert_eq!(reopened.load_user(&user.address).unwrap().unwrap().last_nonce, 17);
        assert_eq!(reopened.load_treasury().unwrap().unwrap().daily_budget, Decimal::from(10));
    }

    #[test]
    fn test_empty_batch_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        store.commit(StoreBatch::new()).unwrap();
        assert_eq!(store.journal_entries(), 0);
        assert_eq!(fs::metadata(store.journal_path()).unwrap().len(), 0);
        assert!(!store.path().exists());
    }

    #[test]
    fn test_commit_appends_without_rewriting_snapshot() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        store.commit(StoreBatch::new().with_treasury(treasury())).unwrap();
        let first = fs::metadata(store.journal_path()).unwrap().len();

        store.commit(StoreBatch::new().with_user(user(1, 1))).unwrap();
        let second = fs::metadata(store.journal_path()).unwrap().len();
        assert!(second > first);
        assert_eq!(store.journal_entries(), 2);
        assert!(!store.path().exists());
    }

    #[test]
    fn test_compaction_folds_journal_into_snapshot() {
        let dir = TempDir::new().unwrap();
        {
            let store = FileStore::open_with_compaction(dir.path(), 3).unwrap();
            for nonce in 1..=4 {
                store.commit(StoreBatch::new().with_user(user(5, nonce))).unwrap();
            }
            assert!(store.path().exists());
            assert_eq!(store.journal_entries(), 1);
        }

        let reopened = FileStore::open_with_compaction(dir.path(), 3).unwrap();
        assert_eq!(reopened.load_user(&Address::new([5; 20])).unwrap().unwrap().last_nonce, 4);
    }

    #[test]
    fn test_torn_tail_is_discarded() {
        let dir = TempDir::new().unwrap();
        {
            let store = FileStore::open(dir.path()).unwrap();
            store.commit(StoreBatch::new().with_user(user(6, 1))).unwrap();
        }
        let journal = dir.path().join(JOURNAL_FILE);
        let mut file = OpenOptions::new().append(true).open(&journal).unwrap();
        file.write_all(b"{\"treasury\":nu").unwrap();
        drop(file);

        let store = FileStore::open(dir.path()).unwrap();
        assert_eq!(store.load_user(&Address::new([6; 20])).unwrap().unwrap().last_nonce, 1);
        assert_eq!(store.journal_entries(), 1);

        // New entries land after the last good one
        store.commit(StoreBatch::new().with_user(user(6, 2))).unwrap();
        drop(store);
        let reopened = FileStore::open(dir.path()).unwrap();
        assert_eq!(reopened.load_user(&Address::new([6; 20])).unwrap().unwrap().last_nonce, 2);
    }

    #[test]
    fn test_corrupt_middle_entry_refuses_to_open() {
        let dir = TempDir::new().unwrap();
        let good = serde_json::to_string(&StoreBatch::new().with_user(user(7, 1))).unwrap();
        fs::write(dir.path().join(JOURNAL_FILE), format!("garbage\n{}\n", good)).unwrap();
        assert!(matches!(FileStore::open(dir.path()), Err(EngineError::Storage(_))));
    }

    #[test]
    fn test_directory_is_exclusive() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        match FileStore::open(dir.path()) {
            Err(EngineError::Storage(msg)) => assert!(msg.contains("locked")),
            other => panic!("second open must fail, got {:?}", other),
        }

        drop(store);
        assert!(FileStore::open(dir.path()).is_ok());
    }
}
