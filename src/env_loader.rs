use std::env;
use std::path::PathBuf;

include!(concat!(env!("OUT_DIR"), "/cwm_env_allowlist.rs"));

fn fallback_dotenv_path(cwm_home: Option<PathBuf>, config_dir: Option<PathBuf>) -> Option<PathBuf> {
    match cwm_home {
        Some(home) => Some(home.join(".env")),
        None => Some(config_dir?.join("cwm/.env")),
    }
}

/// `.env` from the working directory, else from the cwm home.
pub fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    let fallback = fallback_dotenv_path(
        env::var_os("CWM_HOME").map(PathBuf::from),
        dirs::config_dir(),
    );

    let Some(path) = fallback else {
        return;
    };
    if path.is_file() {
        let _ = dotenvy::from_path(&path);
    }
}

fn unknown_keys<I>(keys: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut unknown: Vec<String> = keys
        .into_iter()
        .filter(|key| key.starts_with("CWM_"))
        .filter(|key| !GENERATED_CWM_ENV_ALLOWLIST.contains(&key.as_str()))
        .collect();
    unknown.sort();
    unknown
}

/// Warn about `CWM_*` variables nothing reads; usually a typo.
pub fn warn_unknown_env() {
    for key in unknown_keys(env::vars_os().filter_map(|(key, _)| key.into_string().ok())) {
        tracing::warn!(key = %key, "unrecognized CWM_* environment variable");
    }
}
