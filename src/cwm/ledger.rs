use crate::cwm::storage::Record;
use crate::error::{CwmError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandEntry {
    pub id: u64,
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Saved commands of one bank.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Ledger {
    pub last_saved_id: u64,
    pub commands: Vec<CommandEntry>,
}

impl Record for Ledger {
    const KIND: &'static str = "cwm.ledger";
    const SCHEMA_VERSION: u32 = 1;
}

pub fn validate_name(name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if ok {
        Ok(())
    } else {
        Err(CwmError::InvalidName(name.to_string()))
    }
}

/// Parse `name=command`; whitespace around `=` is allowed.
pub fn parse_assignment(raw: &str) -> Option<(String, String)> {
    let (name, command) = raw.split_once('=')?;
    let name = name.trim();
    let command = command.trim();
    if name.is_empty() || command.is_empty() || validate_name(name).is_err() {
        return None;
    }
    Some((name.to_string(), command.to_string()))
}

impl Ledger {
    pub fn get(&self, name: &str) -> Option<&CommandEntry> {
        self.commands.iter().find(|entry| entry.name == name)
    }

    pub fn get_by_id(&self, id: u64) -> Option<&CommandEntry> {
        self.commands.iter().find(|entry| entry.id == id)
    }

    fn get_mut(&mut self, name: &str) -> Result<&mut CommandEntry> {
        self.commands
            .iter_mut()
            .find(|entry| entry.name == name)
            .ok_or_else(|| CwmError::NameNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn next_id(&self) -> u64 {
        let max_seen = self.commands.iter().map(|c| c.id).max().unwrap_or(0);
        self.last_saved_id.max(max_seen) + 1
    }

    pub fn add(
        &mut self,
        name: &str,
        command: &str,
        tags: BTreeSet<String>,
        now: DateTime<Utc>,
    ) -> Result<&CommandEntry> {
        validate_name(name)?;
        if self.contains(name) {
            return Err(CwmError::NameConflict(name.to_string()));
        }
        let id = self.next_id();
        self.last_saved_id = id;
        self.commands.push(CommandEntry {
            id,
            name: name.to_string(),
            command: command.to_string(),
            tags,
            created_at: now,
            updated_at: now,
        });
        Ok(&self.commands[self.commands.len() - 1])
    }

    pub fn edit(&mut self, name: &str, command: &str, now: DateTime<Utc>) -> Result<String> {
        let entry = self.get_mut(name)?;
        let previous = std::mem::replace(&mut entry.command, command.to_string());
        entry.updated_at = now;
        Ok(previous)
    }

    /// Rename `old` to `new`. The ledger is untouched when this fails.
    pub fn rename(&mut self, old: &str, new: &str, now: DateTime<Utc>) -> Result<()> {
        validate_name(new)?;
        if !self.contains(old) {
            return Err(CwmError::NameNotFound(old.to_string()));
        }
        if self.contains(new) {
            return Err(CwmError::NameConflict(new.to_string()));
        }
        let entry = self.get_mut(old)?;
        entry.name = new.to_string();
        entry.updated_at = now;
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Result<CommandEntry> {
        let idx = self
            .commands
            .iter()
            .position(|entry| entry.name == name)
            .ok_or_else(|| CwmError::NameNotFound(name.to_string()))?;
        Ok(self.commands.remove(idx))
    }

    pub fn tag(
        &mut self,
        name: &str,
        tags: &[String],
        remove: bool,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let entry = self.get_mut(name)?;
        let mut changed = 0usize;
        for tag in tags {
            let hit = if remove {
                entry.tags.remove(tag)
            } else {
                entry.tags.insert(tag.clone())
            };
            if hit {
                changed += 1;
            }
        }
        if changed > 0 {
            entry.updated_at = now;
        }
        Ok(changed)
    }

    /// Drop entries by the `clear` rules: `all`, else the oldest `oldest`
    /// entries, then any entry whose name or command contains `filter`.
    /// Remaining IDs are renumbered from 1.
    pub fn clear(&mut self, oldest: usize, filter: Option<&str>, all: bool) -> usize {
        let before = self.commands.len();
        if all {
            self.commands.clear();
            self.last_saved_id = 0;
            return before;
        }

        let skip = oldest.min(self.commands.len());
        self.commands.drain(..skip);
        if let Some(filter) = filter.filter(|f| !f.is_empty()) {
            self.commands
                .retain(|entry| !entry.command.contains(filter) && !entry.name.contains(filter));
        }
        for (idx, entry) in self.commands.iter_mut().enumerate() {
            entry.id = idx as u64 + 1;
        }
        self.last_saved_id = self.commands.len() as u64;
        before - self.commands.len()
    }

    pub fn command_texts(&self) -> impl Iterator<Item = &str> {
        self.commands.iter().map(|entry| entry.command.as_str())
    }
}
