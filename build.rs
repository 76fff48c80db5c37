use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

const PREFIX: &str = "CWM_";

fn source_files(root: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut pending = vec![root.to_path_buf()];
    let mut files = Vec::new();
    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
            } else if path.extension().is_some_and(|ext| ext == "rs") {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

fn is_key_char(ch: char) -> bool {
    ch.is_ascii_uppercase() || ch.is_ascii_digit() || ch == '_'
}

/// Every `CWM_[A-Z0-9_]+` token that is not the tail of a longer identifier.
fn env_keys(source: &str) -> BTreeSet<String> {
    let mut keys = BTreeSet::new();
    for (start, _) in source.match_indices(PREFIX) {
        let glued = source[..start].chars().next_back().is_some_and(is_key_char);
        if glued {
            continue;
        }
        let rest = &source[start + PREFIX.len()..];
        let len = rest.find(|ch: char| !is_key_char(ch)).unwrap_or(rest.len());
        if len > 0 {
            keys.insert(format!("{PREFIX}{}", &rest[..len]));
        }
    }
    keys
}

fn main() -> std::io::Result<()> {
    let mut keys = BTreeSet::new();
    for file in source_files(Path::new("src"))? {
        if let Ok(content) = fs::read_to_string(&file) {
            keys.extend(env_keys(&content));
        }
    }

    let out_dir = env::var_os("OUT_DIR").map(PathBuf::from).unwrap_or_default();
    let mut out = fs::File::create(out_dir.join("cwm_env_allowlist.rs"))?;
    writeln!(out, "pub const GENERATED_CWM_ENV_ALLOWLIST: &[&str] = &[")?;
    for key in &keys {
        writeln!(out, "    {key:?},")?;
    }
    writeln!(out, "];")?;

    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=src");
    Ok(())
}
