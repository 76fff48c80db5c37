use anyhow::Result;
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct CwmPaths {
    pub cwm_home: PathBuf,
    pub global_data_dir: PathBuf,
    pub archives_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub watch_session_file: PathBuf,
    pub config_file: PathBuf,
    pub cwd: PathBuf,
}

impl CwmPaths {
    pub fn under(cwm_home: PathBuf, cwd: PathBuf) -> Self {
        let global_data_dir = cwm_home.join("data");
        Self {
            archives_dir: global_data_dir.join("archives"),
            watch_session_file: global_data_dir.join("watch_session.json"),
            logs_dir: cwm_home.join("logs"),
            config_file: cwm_home.join("config.toml"),
            global_data_dir,
            cwm_home,
            cwd,
        }
    }
}

fn default_home() -> Result<PathBuf> {
    if let Some(config) = dirs::config_dir() {
        return Ok(config.join("cwm"));
    }
    if let Some(home) = dirs::home_dir() {
        return Ok(home.join(".cwm-global"));
    }
    Err(anyhow::anyhow!("HOME directory could not be resolved"))
}

fn env_or_default_path(var: &str, fallback: PathBuf) -> PathBuf {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => fallback,
    }
}

pub fn resolve_paths() -> Result<CwmPaths> {
    let cwm_home = match env::var("CWM_HOME") {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => default_home()?,
    };
    let cwd = env::current_dir()?;
    let mut paths = CwmPaths::under(cwm_home, cwd);
    paths.archives_dir = env_or_default_path("CWM_ARCHIVES_DIR", paths.archives_dir);
    paths.logs_dir = env_or_default_path("CWM_LOGS_DIR", paths.logs_dir);
    Ok(paths)
}

#[cfg(test)]
pub(crate) fn test_paths(root: &std::path::Path) -> CwmPaths {
    CwmPaths::under(root.join("global"), root.join("work"))
}
