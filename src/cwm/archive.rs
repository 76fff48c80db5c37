use crate::cwm::ledger::Ledger;
use crate::cwm::storage::{self, Record};
use crate::error::{CwmError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// An immutable, numbered batch of commands the user has already seen.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Archive {
    pub id: u64,
    pub created_at: DateTime<Utc>,
    pub origin: String,
    pub commands: Vec<String>,
}

impl Record for Archive {
    const KIND: &'static str = "cwm.archive";
    const SCHEMA_VERSION: u32 = 1;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveMeta {
    pub id: u64,
    pub file: String,
    pub created_at: DateTime<Utc>,
    pub origin: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveIndex {
    /// High-water mark; survives deletions so IDs are never handed out twice.
    pub last_archive_id: u64,
    pub archives: Vec<ArchiveMeta>,
}

impl Record for ArchiveIndex {
    const KIND: &'static str = "cwm.archive_index";
    const SCHEMA_VERSION: u32 = 1;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveOutcome {
    Created(Archive),
    NothingToArchive { candidates: usize },
}

/// Archive files plus the index that makes them visible.
#[derive(Debug, Clone)]
pub struct ArchiveStore {
    dir: PathBuf,
}

impl ArchiveStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn index_path(&self) -> PathBuf {
        self.dir.join("index.json")
    }

    fn archive_file_name(id: u64) -> String {
        format!("archive_{id}.json")
    }

    pub fn load_index(&self) -> Result<ArchiveIndex> {
        storage::load(&self.index_path())
    }

    pub fn load(&self, id: u64) -> Result<Archive> {
        let index = self.load_index()?;
        let meta = index
            .archives
            .iter()
            .find(|meta| meta.id == id)
            .ok_or(CwmError::ArchiveNotFound(id))?;
        let path = self.dir.join(&meta.file);
        if !path.exists() {
            return Err(CwmError::corrupt(&path, "archive listed in index but missing"));
        }
        storage::load(&path)
    }

    pub fn load_all(&self) -> Result<Vec<Archive>> {
        let index = self.load_index()?;
        index.archives.iter().map(|meta| self.load(meta.id)).collect()
    }

    /// Every command already saved in `global` or held by a committed archive.
    pub fn known_commands(&self, global: &Ledger) -> Result<HashSet<String>> {
        let mut known: HashSet<String> = global.command_texts().map(ToOwned::to_owned).collect();
        for archive in self.load_all()? {
            known.extend(archive.commands);
        }
        Ok(known)
    }

    /// Commit a new archive of the candidates that are not already known.
    ///
    /// The archive file is written first and the index is replaced last, so a
    /// failure anywhere leaves the visible store exactly as it was.
    pub fn archive(
        &self,
        global: &Ledger,
        candidates: &[String],
        origin: &str,
        now: DateTime<Utc>,
    ) -> Result<ArchiveOutcome> {
        let mut known = self.known_commands(global)?;
        let fresh: Vec<String> = candidates
            .iter()
            .filter(|cmd| known.insert((*cmd).clone()))
            .cloned()
            .collect();

        if fresh.is_empty() {
            return Ok(ArchiveOutcome::NothingToArchive {
                candidates: candidates.len(),
            });
        }

        let mut index = self.load_index()?;
        let max_seen = index.archives.iter().map(|m| m.id).max().unwrap_or(0);
        let id = index.last_archive_id.max(max_seen) + 1;
        let archive = Archive {
            id,
            created_at: now,
            origin: origin.to_string(),
            commands: fresh,
        };

        let file = Self::archive_file_name(id);
        storage::save(&self.dir.join(&file), &archive)?;

        index.last_archive_id = id;
        index.archives.push(ArchiveMeta {
            id,
            file,
            created_at: now,
            origin: archive.origin.clone(),
            count: archive.commands.len(),
        });
        storage::save(&self.index_path(), &index)?;

        tracing::info!(id, count = archive.commands.len(), "archive committed");
        Ok(ArchiveOutcome::Created(archive))
    }

    /// Drop an archive from the index, then remove its file. The ID stays
    /// burned.
    pub fn delete(&self, id: u64) -> Result<ArchiveMeta> {
        let mut index = self.load_index()?;
        let pos = index
            .archives
            .iter()
            .position(|meta| meta.id == id)
            .ok_or(CwmError::ArchiveNotFound(id))?;
        let meta = index.archives.remove(pos);
        index.last_archive_id = index.last_archive_id.max(id);
        storage::save(&self.index_path(), &index)?;

        let path = self.dir.join(&meta.file);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(CwmError::io(&path, err)),
        }
        Ok(meta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cwm::util::now_utc;
    use std::collections::BTreeSet;
    use tempfile::tempdir;

    fn lines(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn intra_batch_duplicates_keep_first_occurrence() {
        let tmp = tempdir().expect("tempdir");
        let store = ArchiveStore::new(tmp.path().join("archives"));

        let outcome = store
            .archive(
                &Ledger::default(),
                &lines(&["ls -la", "git status", "ls -la"]),
                "history",
                now_utc(),
            )
            .expect("archive");
        let ArchiveOutcome::Created(archive) = outcome else {
            panic!("expected an archive");
        };
        assert_eq!(archive.id, 1);
        assert_eq!(archive.commands, lines(&["ls -la", "git status"]));
    }

    #[test]
    fn saved_global_commands_are_not_archived() {
        let tmp = tempdir().expect("tempdir");
        let store = ArchiveStore::new(tmp.path().join("archives"));
        let mut global = Ledger::default();
        global
            .add("a", "ls -la", BTreeSet::new(), now_utc())
            .expect("add");

        let outcome = store
            .archive(&global, &lines(&["ls -la", "pwd"]), "history", now_utc())
            .expect("archive");
        let ArchiveOutcome::Created(archive) = outcome else {
            panic!("expected an archive");
        };
        assert_eq!(archive.commands, lines(&["pwd"]));
    }

    #[test]
    fn archiving_twice_is_a_no_op_the_second_time() {
        let tmp = tempdir().expect("tempdir");
        let store = ArchiveStore::new(tmp.path().join("archives"));
        let batch = lines(&["make", "make test"]);

        let first = store
            .archive(&Ledger::default(), &batch, "history", now_utc())
            .expect("first");
        assert!(matches!(first, ArchiveOutcome::Created(_)));

        let second = store
            .archive(&Ledger::default(), &batch, "history", now_utc())
            .expect("second");
        assert_eq!(second, ArchiveOutcome::NothingToArchive { candidates: 2 });
        assert_eq!(store.load_index().expect("index").archives.len(), 1);
    }

    #[test]
    fn ids_stay_monotonic_after_delete() {
        let tmp = tempdir().expect("tempdir");
        let store = ArchiveStore::new(tmp.path().join("archives"));
        let empty = Ledger::default();

        store
            .archive(&empty, &lines(&["a"]), "history", now_utc())
            .expect("1");
        store
            .archive(&empty, &lines(&["b"]), "history", now_utc())
            .expect("2");
        store.delete(2).expect("delete");

        let ArchiveOutcome::Created(next) = store
            .archive(&empty, &lines(&["c"]), "history", now_utc())
            .expect("3")
        else {
            panic!("expected an archive");
        };
        assert_eq!(next.id, 3);
        assert!(matches!(store.load(2), Err(CwmError::ArchiveNotFound(2))));
    }

    #[test]
    fn failed_commit_leaves_index_untouched() {
        let tmp = tempdir().expect("tempdir");
        let dir = tmp.path().join("archives");
        let store = ArchiveStore::new(&dir);
        store
            .archive(&Ledger::default(), &lines(&["a"]), "history", now_utc())
            .expect("first");
        let before = store.load_index().expect("index");

        // A directory squatting on the next archive file name makes the write fail.
        fs::create_dir_all(dir.join("archive_2.json")).expect("squat");
        let err = store.archive(&Ledger::default(), &lines(&["b"]), "history", now_utc());
        assert!(err.is_err());
        assert_eq!(store.load_index().expect("index"), before);
    }

    #[test]
    fn corrupt_archive_file_is_surfaced() {
        let tmp = tempdir().expect("tempdir");
        let dir = tmp.path().join("archives");
        let store = ArchiveStore::new(&dir);
        store
            .archive(&Ledger::default(), &lines(&["a"]), "history", now_utc())
            .expect("first");
        fs::write(dir.join("archive_1.json"), "garbage").expect("clobber");

        let err = store
            .archive(&Ledger::default(), &lines(&["b"]), "history", now_utc())
            .expect_err("corrupt");
        assert!(matches!(err, CwmError::Corrupt { .. }));
    }
}
