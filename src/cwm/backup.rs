use crate::cwm::bank::Bank;
use crate::cwm::ledger::{CommandEntry, Ledger, validate_name};
use crate::cwm::storage::{self, Record};
use crate::error::{CwmError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupSnapshot {
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
    pub file: String,
    pub content_hash: String,
    pub command_count: usize,
    #[serde(default)]
    pub origin: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupIndex {
    pub last_sequence: u64,
    pub snapshots: Vec<BackupSnapshot>,
}

impl Record for BackupIndex {
    const KIND: &'static str = "cwm.backup_index";
    const SCHEMA_VERSION: u32 = 1;
}

/// Snapshots of one ledger. Banks never read these files directly.
#[derive(Debug, Clone)]
pub struct BackupStore {
    dir: PathBuf,
}

fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

impl BackupStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn for_bank(bank: &Bank) -> Self {
        Self::new(bank.backup_dir())
    }

    fn index_path(&self) -> PathBuf {
        self.dir.join("index.json")
    }

    pub fn load_index(&self) -> Result<BackupIndex> {
        storage::load(&self.index_path())
    }

    /// Oldest first.
    pub fn list(&self) -> Result<Vec<BackupSnapshot>> {
        let mut snapshots = self.load_index()?.snapshots;
        snapshots.sort_by_key(|snap| snap.sequence);
        Ok(snapshots)
    }

    pub fn find(&self, sequence: u64) -> Result<BackupSnapshot> {
        self.list()?
            .into_iter()
            .find(|snap| snap.sequence == sequence)
            .ok_or(CwmError::BackupNotFound(sequence))
    }

    pub fn latest(&self) -> Result<Option<BackupSnapshot>> {
        Ok(self.list()?.pop())
    }

    /// Copy `ledger` into a new numbered snapshot file, then publish it in the
    /// index.
    pub fn snapshot_ledger(
        &self,
        ledger: &Ledger,
        origin: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<BackupSnapshot> {
        let mut index = self.load_index()?;
        let max_seen = index.snapshots.iter().map(|s| s.sequence).max().unwrap_or(0);
        let sequence = index.last_sequence.max(max_seen) + 1;

        let bytes = storage::encode(ledger)?;
        let file = format!("saved_cmds.{sequence}.json");
        storage::atomic_replace(&self.dir.join(&file), &bytes)?;

        let snapshot = BackupSnapshot {
            sequence,
            created_at: now,
            file,
            content_hash: content_hash(&bytes),
            command_count: ledger.commands.len(),
            origin: origin.map(ToOwned::to_owned),
        };
        index.last_sequence = sequence;
        index.snapshots.push(snapshot.clone());
        storage::save(&self.index_path(), &index)?;
        tracing::debug!(sequence, dir = %self.dir.display(), "backup snapshot written");
        Ok(snapshot)
    }

    pub fn load_snapshot(&self, snapshot: &BackupSnapshot) -> Result<Ledger> {
        let path = self.dir.join(&snapshot.file);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(CwmError::corrupt(&path, "snapshot listed in index but missing"));
            }
            Err(err) => return Err(CwmError::io(&path, err)),
        };
        if content_hash(&raw) != snapshot.content_hash {
            return Err(CwmError::corrupt(&path, "content hash mismatch"));
        }
        storage::decode(&path, &raw)
    }

    /// Keep the newest `keep` snapshots. Sequence numbers are not recycled.
    pub fn prune(&self, keep: usize) -> Result<Vec<BackupSnapshot>> {
        let mut index = self.load_index()?;
        index.snapshots.sort_by_key(|snap| snap.sequence);
        let drop_count = index.snapshots.len().saturating_sub(keep);
        if drop_count == 0 {
            return Ok(Vec::new());
        }
        let removed: Vec<BackupSnapshot> = index.snapshots.drain(..drop_count).collect();
        storage::save(&self.index_path(), &index)?;

        for snap in &removed {
            let path = self.dir.join(&snap.file);
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(CwmError::io(&path, err)),
            }
        }
        Ok(removed)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Snapshot-guarded ledger mutation.
///
/// `begin` writes a backup of the current ledger and loads it for editing;
/// `commit` atomically replaces the ledger. Dropping the transaction without
/// committing leaves the ledger as it was. The snapshot stays on disk either
/// way.
pub struct LedgerTransaction {
    bank: Bank,
    snapshot: BackupSnapshot,
    ledger: Ledger,
}

impl LedgerTransaction {
    pub fn begin(bank: &Bank, now: DateTime<Utc>) -> Result<Self> {
        let ledger = bank.load_ledger()?;
        let snapshot = BackupStore::for_bank(bank).snapshot_ledger(&ledger, None, now)?;
        Ok(Self {
            bank: bank.clone(),
            snapshot,
            ledger,
        })
    }

    pub fn snapshot(&self) -> &BackupSnapshot {
        &self.snapshot
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut Ledger {
        &mut self.ledger
    }

    pub fn replace(&mut self, ledger: Ledger) {
        self.ledger = ledger;
    }

    pub fn commit(self) -> Result<BackupSnapshot> {
        self.bank.save_ledger(&self.ledger)?;
        Ok(self.snapshot)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeConflict {
    pub name: String,
    pub a: CommandEntry,
    pub b: CommandEntry,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    KeepA,
    KeepB,
    /// Keep A under its name and add B as `renamed_b`.
    KeepBoth { renamed_b: String },
}

pub trait ConflictResolver {
    fn resolve(&mut self, conflict: &MergeConflict, taken: &BTreeSet<String>) -> Result<Resolution>;
}

pub enum MergeStrategy<'r> {
    /// Fail with `MergeConflict` naming every clash.
    Surface,
    /// Ask the resolver about each clash.
    Interactive(&'r mut dyn ConflictResolver),
    /// Keep the most recently created entry, no questions asked.
    Chain,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MergeReport {
    pub added: Vec<String>,
    pub duplicates: usize,
    pub conflicts: Vec<String>,
    pub replaced: Vec<String>,
    pub renamed: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub ledger: Ledger,
    pub report: MergeReport,
}

/// `{name}-b`, `{name}-b2`, ... whichever is free first.
pub fn suggest_rename(name: &str, taken: &BTreeSet<String>) -> String {
    let mut candidate = format!("{name}-b");
    let mut n = 2u32;
    while taken.contains(&candidate) {
        candidate = format!("{name}-b{n}");
        n += 1;
    }
    candidate
}

fn chain_pick_b(a: &CommandEntry, b: &CommandEntry) -> bool {
    (b.created_at, b.updated_at) > (a.created_at, a.updated_at)
}

/// Merge two ledgers into a new one; neither input is touched.
///
/// A's entries keep their position and IDs. Names only in B are appended
/// with fresh IDs. Identical `(name, command)` pairs collapse silently.
pub fn merge(a: &Ledger, b: &Ledger, strategy: MergeStrategy<'_>) -> Result<MergeOutcome> {
    let mut merged = a.clone();
    merged.last_saved_id = merged.last_saved_id.max(b.last_saved_id);
    let mut report = MergeReport::default();

    let conflicts: Vec<MergeConflict> = b
        .commands
        .iter()
        .filter_map(|entry_b| {
            let entry_a = a.get(&entry_b.name)?;
            (entry_a.command != entry_b.command).then(|| MergeConflict {
                name: entry_b.name.clone(),
                a: entry_a.clone(),
                b: entry_b.clone(),
            })
        })
        .collect();
    report.conflicts = conflicts.iter().map(|c| c.name.clone()).collect();

    let mut resolver = match strategy {
        MergeStrategy::Surface if !conflicts.is_empty() => {
            return Err(CwmError::MergeConflict {
                names: report.conflicts.clone(),
            });
        }
        MergeStrategy::Surface => None,
        MergeStrategy::Interactive(resolver) => Some(resolver),
        MergeStrategy::Chain => None,
    };

    let mut taken: BTreeSet<String> = a
        .commands
        .iter()
        .chain(b.commands.iter())
        .map(|entry| entry.name.clone())
        .collect();

    for entry_b in &b.commands {
        let Some(entry_a) = a.get(&entry_b.name) else {
            let mut added = entry_b.clone();
            added.id = merged.next_id();
            merged.last_saved_id = added.id;
            report.added.push(added.name.clone());
            merged.commands.push(added);
            continue;
        };
        if entry_a.command == entry_b.command {
            report.duplicates += 1;
            continue;
        }

        let conflict = MergeConflict {
            name: entry_b.name.clone(),
            a: entry_a.clone(),
            b: entry_b.clone(),
        };
        let resolution = match resolver.as_mut() {
            Some(resolver) => resolver.resolve(&conflict, &taken)?,
            None if chain_pick_b(entry_a, entry_b) => Resolution::KeepB,
            None => Resolution::KeepA,
        };

        match resolution {
            Resolution::KeepA => {}
            Resolution::KeepB => {
                if let Some(slot) = merged
                    .commands
                    .iter_mut()
                    .find(|entry| entry.name == entry_b.name)
                {
                    let id = slot.id;
                    *slot = entry_b.clone();
                    slot.id = id;
                }
                report.replaced.push(entry_b.name.clone());
            }
            Resolution::KeepBoth { renamed_b } => {
                validate_name(&renamed_b)?;
                if taken.contains(&renamed_b) {
                    return Err(CwmError::NameConflict(renamed_b));
                }
                let mut added = entry_b.clone();
                added.name = renamed_b.clone();
                added.id = merged.next_id();
                merged.last_saved_id = added.id;
                merged.commands.push(added);
                taken.insert(renamed_b.clone());
                report.renamed.push((entry_b.name.clone(), renamed_b));
            }
        }
    }

    Ok(MergeOutcome {
        ledger: merged,
        report,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cwm::bank::BankKind;
    use tempfile::tempdir;

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).expect("timestamp")
    }

    fn ledger(entries: &[(&str, &str, i64)]) -> Ledger {
        let mut out = Ledger::default();
        for (name, command, at) in entries {
            out.add(name, command, BTreeSet::new(), ts(*at)).expect("add");
        }
        out
    }

    fn test_bank(root: &Path) -> Bank {
        Bank {
            kind: BankKind::Global,
            root: root.to_path_buf(),
        }
    }

    fn snapshot_bank(store: &BackupStore, bank: &Bank, at: DateTime<Utc>) -> Result<BackupSnapshot> {
        store.snapshot_ledger(&bank.load_ledger()?, None, at)
    }

    struct Scripted(Vec<Resolution>);

    impl ConflictResolver for Scripted {
        fn resolve(
            &mut self,
            _conflict: &MergeConflict,
            _taken: &BTreeSet<String>,
        ) -> Result<Resolution> {
            Ok(self.0.remove(0))
        }
    }

    #[test]
    fn snapshot_then_self_merge_is_identity_for_every_strategy() {
        let tmp = tempdir().expect("tempdir");
        let bank = test_bank(tmp.path());
        let original = ledger(&[("a", "ls -la", 1), ("b", "git status", 2)]);
        bank.save_ledger(&original).expect("save");

        let store = BackupStore::for_bank(&bank);
        let snap = snapshot_bank(&store, &bank, ts(10)).expect("snapshot");
        let loaded = store.load_snapshot(&snap).expect("load");
        assert_eq!(loaded, original);

        let surfaced = merge(&loaded, &loaded, MergeStrategy::Surface).expect("surface");
        assert_eq!(surfaced.ledger, original);
        let chained = merge(&loaded, &loaded, MergeStrategy::Chain).expect("chain");
        assert_eq!(chained.ledger, original);
        let mut resolver = Scripted(Vec::new());
        let asked = merge(&loaded, &loaded, MergeStrategy::Interactive(&mut resolver))
            .expect("interactive");
        assert_eq!(asked.ledger, original);
    }

    #[test]
    fn chain_keeps_the_later_entry() {
        let a = ledger(&[("x", "echo old", 100)]);
        let b = ledger(&[("x", "echo new", 200)]);

        let forward = merge(&a, &b, MergeStrategy::Chain).expect("a<-b");
        assert_eq!(forward.ledger.get("x").expect("x").command, "echo new");
        assert_eq!(forward.report.replaced, vec!["x".to_string()]);

        let backward = merge(&b, &a, MergeStrategy::Chain).expect("b<-a");
        assert_eq!(backward.ledger.get("x").expect("x").command, "echo new");
        assert_eq!(backward.ledger.commands.len(), 1);
    }

    #[test]
    fn surface_reports_conflicts_without_touching_inputs() {
        let a = ledger(&[("x", "echo a", 1), ("y", "pwd", 1)]);
        let b = ledger(&[("x", "echo b", 2), ("z", "date", 2)]);
        let (a_before, b_before) = (a.clone(), b.clone());

        let err = merge(&a, &b, MergeStrategy::Surface).expect_err("conflict");
        assert!(matches!(err, CwmError::MergeConflict { ref names } if names == &["x"]));
        assert_eq!(a, a_before);
        assert_eq!(b, b_before);
    }

    #[test]
    fn interactive_keep_both_renames_incoming() {
        let a = ledger(&[("x", "echo a", 1)]);
        let b = ledger(&[("x", "echo b", 2), ("z", "date", 2)]);
        let mut resolver = Scripted(vec![Resolution::KeepBoth {
            renamed_b: "x-b".to_string(),
        }]);

        let out = merge(&a, &b, MergeStrategy::Interactive(&mut resolver)).expect("merge");
        assert_eq!(out.ledger.get("x").expect("x").command, "echo a");
        assert_eq!(out.ledger.get("x-b").expect("x-b").command, "echo b");
        assert!(out.ledger.contains("z"));
        let ids: BTreeSet<u64> = out.ledger.commands.iter().map(|c| c.id).collect();
        assert_eq!(ids.len(), out.ledger.commands.len());
    }

    #[test]
    fn sequences_survive_prune() {
        let tmp = tempdir().expect("tempdir");
        let bank = test_bank(tmp.path());
        let store = BackupStore::for_bank(&bank);
        for i in 0..3 {
            snapshot_bank(&store, &bank, ts(i)).expect("snapshot");
        }
        let removed = store.prune(1).expect("prune");
        assert_eq!(removed.len(), 2);
        assert_eq!(store.list().expect("list").len(), 1);

        let next = snapshot_bank(&store, &bank, ts(9)).expect("snapshot");
        assert_eq!(next.sequence, 4);
    }

    #[test]
    fn dropped_transaction_keeps_ledger_and_snapshot() {
        let tmp = tempdir().expect("tempdir");
        let bank = test_bank(tmp.path());
        let original = ledger(&[("old", "ls", 1), ("new", "pwd", 1)]);
        bank.save_ledger(&original).expect("save");

        {
            let mut tx = LedgerTransaction::begin(&bank, ts(5)).expect("begin");
            let err = tx.ledger_mut().rename("old", "new", ts(6));
            assert!(matches!(err, Err(CwmError::NameConflict(_))));
        }

        assert_eq!(bank.load_ledger().expect("reload"), original);
        assert_eq!(BackupStore::for_bank(&bank).list().expect("list").len(), 1);
    }

    #[test]
    fn tampered_snapshot_is_corrupt() {
        let tmp = tempdir().expect("tempdir");
        let bank = test_bank(tmp.path());
        let store = BackupStore::for_bank(&bank);
        let snap = snapshot_bank(&store, &bank, ts(1)).expect("snapshot");
        fs::write(store.dir().join(&snap.file), "{}").expect("tamper");
        assert!(matches!(
            store.load_snapshot(&snap),
            Err(CwmError::Corrupt { .. })
        ));
    }

    #[test]
    fn rename_suggestions_skip_taken_names() {
        let taken: BTreeSet<String> = ["x", "x-b"].iter().map(|s| s.to_string()).collect();
        assert_eq!(suggest_rename("x", &taken), "x-b2");
    }
}
