use crate::cwm::bank::Bank;
use crate::cwm::paths::CwmPaths;
use crate::error::CwmError;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CwmConfig {
    pub history_file: Option<PathBuf>,
    pub ignore_self_calls: bool,
    pub list_count: usize,
}

impl Default for CwmConfig {
    fn default() -> Self {
        Self {
            history_file: None,
            ignore_self_calls: true,
            list_count: 10,
        }
    }
}

/// Sparse overlay: a Local file only overrides the keys it sets.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialCwmConfig {
    history_file: Option<PathBuf>,
    ignore_self_calls: Option<bool>,
    list_count: Option<usize>,
}

fn env_or_usize(var: &str, fallback: usize) -> usize {
    match env::var(var) {
        Ok(v) => v.trim().parse::<usize>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_bool(var: &str, fallback: bool) -> bool {
    match env::var(var) {
        Ok(v) => match v.trim() {
            "1" | "true" | "TRUE" | "yes" | "on" => true,
            "0" | "false" | "FALSE" | "no" | "off" => false,
            _ => fallback,
        },
        Err(_) => fallback,
    }
}

fn env_path(var: &str) -> Option<PathBuf> {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => Some(PathBuf::from(v.trim())),
        _ => None,
    }
}

fn validate(cfg: &CwmConfig) -> Result<()> {
    if cfg.list_count == 0 {
        return Err(CwmError::Config("invalid list_count: must be >= 1".to_string()).into());
    }
    if cfg
        .history_file
        .as_ref()
        .is_some_and(|path| path.as_os_str().is_empty())
    {
        return Err(CwmError::Config("invalid history_file: cannot be empty".to_string()).into());
    }
    Ok(())
}

fn merge_file_config(base: &mut CwmConfig, path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }

    let raw = fs::read_to_string(path).map_err(|err| CwmError::io(path, err))?;
    let parsed: PartialCwmConfig = toml::from_str(&raw)
        .map_err(|err| CwmError::Config(format!("failed to parse {}: {err}", path.display())))?;
    if let Some(history_file) = parsed.history_file {
        base.history_file = Some(history_file);
    }
    if let Some(ignore) = parsed.ignore_self_calls {
        base.ignore_self_calls = ignore;
    }
    if let Some(count) = parsed.list_count {
        base.list_count = count;
    }
    Ok(())
}

/// Defaults, then the Global file, then the Local bank's file, then env.
pub fn load_config(paths: &CwmPaths, local: Option<&Bank>) -> Result<CwmConfig> {
    let mut cfg = CwmConfig::default();
    merge_file_config(&mut cfg, &paths.config_file)?;
    if let Some(bank) = local {
        merge_file_config(&mut cfg, &bank.config_path())?;
    }

    if let Some(path) = env_path("CWM_HISTORY_FILE") {
        cfg.history_file = Some(path);
    }
    cfg.ignore_self_calls = env_or_bool("CWM_IGNORE_SELF_CALLS", cfg.ignore_self_calls);
    cfg.list_count = env_or_usize("CWM_LIST_COUNT", cfg.list_count);

    validate(&cfg)?;
    Ok(cfg)
}
