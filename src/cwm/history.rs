use crate::cwm::config::CwmConfig;
use crate::cwm::storage::Record;
use crate::cwm::util::is_cwm_call;
use crate::error::{CwmError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: u64,
    /// Raw line exactly as read from the history file.
    pub command: String,
    /// Zero-based line offset in the source file.
    pub line: u64,
    pub imported_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryCache {
    pub history_file: Option<PathBuf>,
    pub last_offset: u64,
    pub last_sync_id: u64,
    pub entries: Vec<HistoryEntry>,
}

impl Record for HistoryCache {
    const KIND: &'static str = "cwm.history_cache";
    const SCHEMA_VERSION: u32 = 1;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    pub new_lines: Vec<String>,
    pub start_offset: u64,
    pub new_offset: u64,
    /// The file had fewer lines than the recorded offset and was re-read
    /// from line 0.
    pub truncated: bool,
}

/// Read every line of a history file. Invalid UTF-8 is replaced, never
/// rejected; shells write whatever the terminal handed them.
pub fn read_lines(path: &Path) -> Result<Vec<String>> {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(CwmError::io(path, err)),
    };
    Ok(String::from_utf8_lossy(&raw)
        .lines()
        .map(ToOwned::to_owned)
        .collect())
}

pub fn line_count(path: &Path) -> Result<u64> {
    Ok(read_lines(path)?.len() as u64)
}

/// Lines `[last_offset, EOF)` of `path`. Nothing is written.
pub fn sync(path: &Path, last_offset: u64) -> Result<SyncOutcome> {
    let lines = read_lines(path)?;
    let total = lines.len() as u64;
    let (start, truncated) = if total < last_offset {
        (0, true)
    } else {
        (last_offset, false)
    };
    let new_lines = lines.into_iter().skip(start as usize).collect();
    Ok(SyncOutcome {
        new_lines,
        start_offset: start,
        new_offset: total,
        truncated,
    })
}

/// Lines `[start, end)`; used for watch-session deltas.
pub fn read_range(path: &Path, start: u64, end: u64) -> Result<Vec<String>> {
    let lines = read_lines(path)?;
    let end = end.min(lines.len() as u64);
    if start >= end {
        return Ok(Vec::new());
    }
    Ok(lines[start as usize..end as usize].to_vec())
}

impl HistoryCache {
    /// Pull new lines from `path` into the cache. A different source file than
    /// the one the offset belongs to starts again from line 0.
    pub fn import_from(&mut self, path: &Path, now: DateTime<Utc>) -> Result<SyncOutcome> {
        if self.history_file.as_deref() != Some(path) {
            self.history_file = Some(path.to_path_buf());
            self.last_offset = 0;
        }
        let outcome = sync(path, self.last_offset)?;
        for (idx, line) in outcome.new_lines.iter().enumerate() {
            self.last_sync_id += 1;
            self.entries.push(HistoryEntry {
                id: self.last_sync_id,
                command: line.clone(),
                line: outcome.start_offset + idx as u64,
                imported_at: now,
            });
        }
        self.last_offset = outcome.new_offset;
        Ok(outcome)
    }

    pub fn clear(&mut self, oldest: usize, filter: Option<&str>, all: bool) -> usize {
        let before = self.entries.len();
        if all {
            self.entries.clear();
            self.last_sync_id = 0;
            return before;
        }
        let skip = oldest.min(self.entries.len());
        self.entries.drain(..skip);
        if let Some(filter) = filter.filter(|f| !f.is_empty()) {
            self.entries.retain(|entry| !entry.command.contains(filter));
        }
        for (idx, entry) in self.entries.iter_mut().enumerate() {
            entry.id = idx as u64 + 1;
        }
        self.last_sync_id = self.entries.len() as u64;
        before - self.entries.len()
    }
}

/// Strip shell metadata from one history line: zsh extended history
/// (`: 1700000000:0;cmd`) and fish (`- cmd: cmd`). Fish `when:` metadata
/// lines yield nothing.
pub fn normalize_line(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let command = if let Some(rest) = trimmed.strip_prefix(": ") {
        match rest.split_once(';') {
            Some((meta, cmd)) if meta.split(':').all(|p| p.chars().all(|c| c.is_ascii_digit())) => {
                cmd.trim()
            }
            _ => trimmed,
        }
    } else if let Some(cmd) = trimmed.strip_prefix("- cmd: ") {
        cmd.trim()
    } else if trimmed.starts_with("when: ") || trimmed.starts_with("paths:") {
        return None;
    } else {
        trimmed
    };
    if command.is_empty() {
        None
    } else {
        Some(command.to_string())
    }
}

/// Turn raw history lines into archive/save candidates, in order.
pub fn candidates<'a, I>(lines: I, cfg: &CwmConfig) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    lines
        .into_iter()
        .filter_map(normalize_line)
        .filter(|cmd| !(cfg.ignore_self_calls && is_cwm_call(cmd)))
        .collect()
}

fn home_candidates(home: &Path, shell: &str) -> Vec<PathBuf> {
    let zsh = home.join(".zsh_history");
    let bash = home.join(".bash_history");
    let fish = home.join(".local/share/fish/fish_history");
    let pwsh = home.join(".local/share/powershell/PSReadLine/ConsoleHost_history.txt");
    let shell_name = shell.rsplit('/').next().unwrap_or_default();
    match shell_name {
        "zsh" => vec![zsh, bash, fish, pwsh],
        "fish" => vec![fish, bash, zsh, pwsh],
        _ => vec![bash, zsh, fish, pwsh],
    }
}

/// Configured history file, else the file matching `$SHELL`, else the first
/// common history file that exists.
pub fn resolve_history_file(cfg: &CwmConfig) -> Result<PathBuf> {
    if let Some(path) = &cfg.history_file {
        return Ok(path.clone());
    }
    let home = dirs::home_dir().ok_or(CwmError::HistoryUnavailable)?;
    let shell = env::var("SHELL").unwrap_or_default();
    home_candidates(&home, &shell)
        .into_iter()
        .find(|path| path.is_file())
        .ok_or(CwmError::HistoryUnavailable)
}

/// Last non-`cwm` command, scanning from the newest line.
pub fn last_command(path: &Path) -> Result<Option<String>> {
    let lines = read_lines(path)?;
    Ok(lines
        .iter()
        .rev()
        .filter_map(|line| normalize_line(line))
        .find(|cmd| !is_cwm_call(cmd)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cwm::util::now_utc;
    use tempfile::tempdir;

    fn write_history(path: &Path, lines: &[&str]) {
        let mut body = lines.join("\n");
        body.push('\n');
        fs::write(path, body).expect("write history");
    }

    #[test]
    fn sync_reads_only_lines_past_offset() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join(".bash_history");
        write_history(&path, &["ls", "pwd", "git status"]);

        let outcome = sync(&path, 1).expect("sync");
        assert_eq!(outcome.new_lines, vec!["pwd", "git status"]);
        assert_eq!(outcome.new_offset, 3);
        assert!(!outcome.truncated);
    }

    #[test]
    fn shorter_file_resyncs_from_zero() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join(".bash_history");
        write_history(&path, &["echo fresh"]);

        let outcome = sync(&path, 40).expect("sync");
        assert!(outcome.truncated);
        assert_eq!(outcome.start_offset, 0);
        assert_eq!(outcome.new_lines, vec!["echo fresh"]);
        assert_eq!(outcome.new_offset, 1);
    }

    #[test]
    fn cache_import_is_lossless_and_restartable() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join(".bash_history");
        write_history(&path, &["ls", "ls", "pwd"]);

        let mut cache = HistoryCache::default();
        cache.import_from(&path, now_utc()).expect("first import");
        assert_eq!(cache.entries.len(), 3);
        assert_eq!(cache.last_offset, 3);

        let again = cache.import_from(&path, now_utc()).expect("second import");
        assert!(again.new_lines.is_empty());
        assert_eq!(cache.entries.len(), 3);

        write_history(&path, &["ls", "ls", "pwd", "make"]);
        cache.import_from(&path, now_utc()).expect("third import");
        let last = cache.entries.last().expect("entry");
        assert_eq!(last.command, "make");
        assert_eq!(last.line, 3);
        assert_eq!(last.id, 4);
    }

    #[test]
    fn switching_history_file_resets_offset() {
        let tmp = tempdir().expect("tempdir");
        let bash = tmp.path().join(".bash_history");
        let zsh = tmp.path().join(".zsh_history");
        write_history(&bash, &["a", "b"]);
        write_history(&zsh, &["c"]);

        let mut cache = HistoryCache::default();
        cache.import_from(&bash, now_utc()).expect("bash");
        let outcome = cache.import_from(&zsh, now_utc()).expect("zsh");
        assert_eq!(outcome.new_lines, vec!["c"]);
        assert_eq!(cache.last_offset, 1);
    }

    #[test]
    fn range_is_clamped_to_file() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("h");
        write_history(&path, &["a", "b", "c"]);
        assert_eq!(read_range(&path, 1, 10).expect("range"), vec!["b", "c"]);
        assert!(read_range(&path, 3, 3).expect("empty").is_empty());
    }

    #[test]
    fn normalization_handles_shell_formats() {
        assert_eq!(
            normalize_line(": 1700000000:0;git push").as_deref(),
            Some("git push")
        );
        assert_eq!(normalize_line("- cmd: ls -la").as_deref(), Some("ls -la"));
        assert_eq!(normalize_line("  when: 1700000000"), None);
        assert_eq!(normalize_line("   "), None);
        assert_eq!(normalize_line(": not zsh").as_deref(), Some(": not zsh"));
    }

    #[test]
    fn candidates_skip_self_calls_when_configured() {
        let cfg = CwmConfig::default();
        let got = candidates(["ls", "cwm save -l", "", "pwd"], &cfg);
        assert_eq!(got, vec!["ls", "pwd"]);

        let keep = CwmConfig {
            ignore_self_calls: false,
            ..CwmConfig::default()
        };
        assert_eq!(candidates(["cwm watch start"], &keep).len(), 1);
    }

    #[test]
    fn last_command_skips_cwm_invocations() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("h");
        write_history(&path, &["make test", "cwm save -b t"]);
        assert_eq!(
            last_command(&path).expect("last").as_deref(),
            Some("make test")
        );
    }
}
