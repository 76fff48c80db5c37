use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::{TempDir, tempdir};

struct Sandbox {
    _tmp: TempDir,
    home: PathBuf,
    work: PathBuf,
    history: PathBuf,
}

impl Sandbox {
    fn new(history_lines: &[&str]) -> Self {
        let tmp = tempdir().expect("tempdir");
        let home = tmp.path().join("home");
        let work = tmp.path().join("work");
        fs::create_dir_all(&work).expect("mkdir work");
        let history = tmp.path().join(".bash_history");
        let sb = Self {
            _tmp: tmp,
            home,
            work,
            history,
        };
        sb.write_history(history_lines);
        sb
    }

    fn write_history(&self, lines: &[&str]) {
        let mut body = lines.join("\n");
        if !body.is_empty() {
            body.push('\n');
        }
        fs::write(&self.history, body).expect("write history");
    }

    fn append_history(&self, lines: &[&str]) {
        let mut file = fs::OpenOptions::new()
            .append(true)
            .open(&self.history)
            .expect("open history");
        for line in lines {
            writeln!(file, "{line}").expect("append history");
        }
    }

    fn cwm(&self) -> assert_cmd::Command {
        let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("cwm");
        cmd.current_dir(&self.work)
            .env("CWM_HOME", &self.home)
            .env("CWM_HISTORY_FILE", &self.history)
            .env_remove("CWM_LIST_COUNT")
            .env_remove("CWM_IGNORE_SELF_CALLS")
            .env_remove("CWM_ARCHIVES_DIR")
            .env_remove("CWM_LOGS_DIR");
        cmd
    }

    fn archive_commands(&self, id: u64) -> Vec<String> {
        let path = self
            .home
            .join(format!("data/archives/archive_{id}.json"));
        archive_commands_at(&path)
    }
}

fn archive_commands_at(path: &Path) -> Vec<String> {
    let raw = fs::read_to_string(path).expect("read archive");
    let parsed: Value = serde_json::from_str(&raw).expect("archive json");
    assert_eq!(parsed["kind"], "cwm.archive");
    parsed["data"]["commands"]
        .as_array()
        .expect("commands array")
        .iter()
        .map(|v| v.as_str().expect("string").to_string())
        .collect()
}

#[test]
fn duplicates_within_batch_are_archived_once() {
    let sb = Sandbox::new(&["ls -la", "git status", "ls -la"]);
    sb.cwm()
        .args(["archive", "create"])
        .assert()
        .success()
        .stdout(predicate::str::contains("archive #1 created with 2 command(s)"));
    assert_eq!(sb.archive_commands(1), vec!["ls -la", "git status"]);
}

#[test]
fn archiving_twice_is_a_no_op() {
    let sb = Sandbox::new(&["make", "make test"]);
    sb.cwm().args(["save", "--archive"]).assert().success();
    sb.cwm()
        .args(["save", "--archive"])
        .assert()
        .success()
        .stdout(predicate::str::contains("nothing to archive"));
    assert!(!sb.home.join("data/archives/archive_2.json").exists());
}

#[test]
fn globally_saved_commands_are_not_archived() {
    let sb = Sandbox::new(&["ls -la", "pwd"]);
    sb.cwm().args(["save", "a=ls -la"]).assert().success();
    sb.cwm().args(["archive", "create"]).assert().success();
    assert_eq!(sb.archive_commands(1), vec!["pwd"]);
}

#[test]
fn archive_ids_are_never_reused() {
    let sb = Sandbox::new(&["one"]);
    sb.cwm().args(["archive", "create"]).assert().success();
    sb.append_history(&["two"]);
    sb.cwm().args(["archive", "create"]).assert().success();

    sb.cwm().args(["archive", "delete", "2"]).assert().success();
    sb.cwm()
        .args(["archive", "show", "2"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("E007_NOT_FOUND"));

    sb.append_history(&["three"]);
    sb.cwm()
        .args(["archive", "create"])
        .assert()
        .success()
        .stdout(predicate::str::contains("archive #3"));
    sb.cwm()
        .args(["archive", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("#1 "))
        .stdout(predicate::str::contains("#3 "))
        .stdout(predicate::str::contains("#2 ").not());
}

#[test]
fn cached_archive_can_clear_the_cache() {
    let sb = Sandbox::new(&["cargo fmt", "cargo clippy"]);
    sb.cwm().args(["save", "--hist"]).assert().success();
    sb.cwm()
        .args(["archive", "create", "--cached", "--clear-cache"])
        .assert()
        .success()
        .stdout(predicate::str::contains("history cache cleared (2 entries)"));
    assert_eq!(sb.archive_commands(1), vec!["cargo fmt", "cargo clippy"]);
}

#[test]
fn clear_cache_is_refused_for_live_archives() {
    let sb = Sandbox::new(&["only-in-cache-1", "only-in-cache-2"]);
    sb.cwm().args(["save", "--hist"]).assert().success();
    // The shell rotated its history; the cache is the only copy left.
    sb.write_history(&["ls"]);

    sb.cwm()
        .args(["archive", "create", "--clear-cache"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("--cached"));
    assert!(!sb.home.join("data/archives/archive_1.json").exists());

    let raw = fs::read_to_string(sb.home.join("data/history.json")).expect("read cache");
    let cache: Value = serde_json::from_str(&raw).expect("cache json");
    let entries = cache["data"]["entries"].as_array().expect("entries");
    assert_eq!(entries.len(), 2);
}

#[test]
fn global_bank_delete_keeps_archive_ids_and_dedup() {
    let sb = Sandbox::new(&["ls", "pwd"]);
    sb.cwm()
        .args(["archive", "create"])
        .assert()
        .success()
        .stdout(predicate::str::contains("archive #1"));

    sb.cwm()
        .args(["--global", "bank", "delete", "--yes"])
        .assert()
        .success()
        .stdout(predicate::str::contains("backups and archives kept"));

    sb.cwm()
        .args(["archive", "create"])
        .assert()
        .success()
        .stdout(predicate::str::contains("nothing to archive"));

    sb.append_history(&["make"]);
    sb.cwm()
        .args(["archive", "create"])
        .assert()
        .success()
        .stdout(predicate::str::contains("archive #2 created with 1 command(s)"));
    assert_eq!(sb.archive_commands(2), vec!["make"]);
}

#[test]
fn watch_stop_save_archives_only_the_session_span() {
    let sb = Sandbox::new(&["ls", "pwd"]);
    sb.cwm().args(["watch", "start"]).assert().success();
    sb.cwm()
        .args(["watch", "start"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("E005_SESSION"));

    sb.append_history(&[
        "cargo build",
        "cwm watch status",
        "cargo test",
        "cargo doc",
        "cargo build",
    ]);
    sb.cwm()
        .args(["get", "--hist", "--active"])
        .assert()
        .success()
        .stdout(predicate::str::contains("cargo test"))
        .stdout(predicate::str::contains("pwd").not());

    // Already known commands inside the span are left out of the archive.
    sb.cwm().args(["save", "d=cargo doc"]).assert().success();
    sb.cwm()
        .args(["watch", "stop", "--save"])
        .assert()
        .success()
        .stdout(predicate::str::contains("watch session closed"));
    assert_eq!(sb.archive_commands(1), vec!["cargo build", "cargo test"]);

    sb.cwm()
        .args(["watch", "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("state=none"));
    sb.cwm()
        .args(["watch", "stop"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("E005_SESSION"));
}

#[test]
fn failed_save_keeps_the_session_active() {
    let sb = Sandbox::new(&["ls"]);
    sb.cwm().args(["watch", "start"]).assert().success();
    sb.append_history(&["make"]);

    // A file where the archive directory should be makes the commit fail.
    fs::create_dir_all(sb.home.join("data")).expect("mkdir data");
    fs::write(sb.home.join("data/archives"), "not a dir").expect("squat archives");

    sb.cwm().args(["watch", "stop", "--save"]).assert().code(1);
    sb.cwm()
        .args(["watch", "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("state=active"));
}

#[test]
fn chain_merge_keeps_the_newer_entry() {
    let sb = Sandbox::new(&[]);
    sb.cwm().args(["save", "x=echo old"]).assert().success();
    sb.cwm().args(["delete", "x"]).assert().success();
    sb.cwm().args(["save", "x=echo new"]).assert().success();
    // Snapshot #2 holds "echo new"; the ledger goes back to "echo old".
    sb.cwm().args(["backup", "restore", "1"]).assert().success();
    sb.cwm()
        .args(["get", "x", "-s"])
        .assert()
        .success()
        .stdout("echo old\n");

    sb.cwm()
        .args(["backup", "merge", "2"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("E006_MERGE_CONFLICT"))
        .stderr(predicate::str::contains("x"));

    sb.cwm()
        .args(["backup", "merge", "2", "--chain", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("dry run"));
    sb.cwm()
        .args(["get", "x", "-s"])
        .assert()
        .success()
        .stdout("echo old\n");

    sb.cwm()
        .args(["backup", "merge", "2", "--chain"])
        .assert()
        .success();
    sb.cwm()
        .args(["get", "x", "-s"])
        .assert()
        .success()
        .stdout("echo new\n");
}

#[test]
fn prune_keeps_sequence_numbers_increasing() {
    let sb = Sandbox::new(&[]);
    sb.cwm().args(["save", "a=echo 1"]).assert().success();
    for n in 2..=4 {
        let payload = format!("a=echo {n}");
        sb.cwm().args(["save", "-e", &payload]).assert().success();
    }
    sb.cwm()
        .args(["backup", "prune", "--keep", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("pruned=2"));
    sb.cwm()
        .args(["save", "-e", "a=echo 5"])
        .assert()
        .success()
        .stdout(predicate::str::contains("backup.sequence=4"));
}

#[test]
fn deleting_local_bank_requires_confirmation() {
    let sb = Sandbox::new(&[]);
    sb.cwm().arg("init").assert().success();
    sb.cwm()
        .args(["--local", "bank", "delete"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("--yes"));
    assert!(sb.work.join(".cwm").exists());

    sb.cwm()
        .args(["--local", "bank", "delete", "--yes"])
        .assert()
        .success();
    assert!(!sb.work.join(".cwm").exists());
    sb.cwm()
        .args(["backup", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("origin=deleted-local:"));
}
