use crate::error::{CwmError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::Path;

/// A persisted record with a fixed kind tag and schema version.
///
/// Newer binaries may add fields to `data`; older ones ignore them. A file
/// written by a newer schema than [`Record::SCHEMA_VERSION`] is rejected as
/// corrupt rather than half-understood.
pub trait Record: Serialize + DeserializeOwned + Default {
    const KIND: &'static str;
    const SCHEMA_VERSION: u32;
}

#[derive(Serialize)]
struct EnvelopeOut<'a, T> {
    kind: &'a str,
    schema_version: u32,
    data: &'a T,
}

#[derive(Deserialize)]
struct EnvelopeIn {
    kind: String,
    schema_version: u32,
    data: serde_json::Value,
}

pub fn encode<T: Record>(record: &T) -> Result<Vec<u8>> {
    let envelope = EnvelopeOut {
        kind: T::KIND,
        schema_version: T::SCHEMA_VERSION,
        data: record,
    };
    let mut raw = serde_json::to_vec_pretty(&envelope)
        .map_err(|err| CwmError::Config(format!("failed to encode {}: {err}", T::KIND)))?;
    raw.push(b'\n');
    Ok(raw)
}

pub fn decode<T: Record>(path: &Path, raw: &[u8]) -> Result<T> {
    let envelope: EnvelopeIn =
        serde_json::from_slice(raw).map_err(|err| CwmError::corrupt(path, err.to_string()))?;
    if envelope.kind != T::KIND {
        return Err(CwmError::corrupt(
            path,
            format!("expected kind `{}`, found `{}`", T::KIND, envelope.kind),
        ));
    }
    if envelope.schema_version == 0 || envelope.schema_version > T::SCHEMA_VERSION {
        return Err(CwmError::corrupt(
            path,
            format!(
                "unsupported schema_version {} (this build reads up to {})",
                envelope.schema_version,
                T::SCHEMA_VERSION
            ),
        ));
    }
    serde_json::from_value(envelope.data).map_err(|err| CwmError::corrupt(path, err.to_string()))
}

/// Load a record; a missing file yields the empty default.
pub fn load<T: Record>(path: &Path) -> Result<T> {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(T::default()),
        Err(err) => return Err(CwmError::io(path, err)),
    };
    decode(path, &raw)
}

pub fn save<T: Record>(path: &Path, record: &T) -> Result<()> {
    let raw = encode(record)?;
    atomic_replace(path, &raw)
}

/// Write `data` to a temp file next to `path`, fsync it, then rename it over
/// `path`. Readers see either the old or the new content, never a prefix.
pub fn atomic_replace(path: &Path, data: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|err| CwmError::io(parent, err))?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(|err| CwmError::io(parent, err))?;
    tmp.write_all(data).map_err(|err| CwmError::io(tmp.path(), err))?;
    tmp.flush().map_err(|err| CwmError::io(path, err))?;
    tmp.as_file()
        .sync_all()
        .map_err(|err| CwmError::io(path, err))?;
    tmp.persist(path)
        .map_err(|err| CwmError::io(path, err.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    struct Counter {
        value: u64,
    }

    impl Record for Counter {
        const KIND: &'static str = "counter";
        const SCHEMA_VERSION: u32 = 1;
    }

    #[test]
    fn missing_file_loads_default() {
        let tmp = tempdir().expect("tempdir");
        let got: Counter = load(&tmp.path().join("absent.json")).expect("load");
        assert_eq!(got, Counter::default());
    }

    #[test]
    fn save_then_load_restores_value() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("nested/counter.json");
        save(&path, &Counter { value: 7 }).expect("save");
        let got: Counter = load(&path).expect("load");
        assert_eq!(got.value, 7);

        let raw = fs::read_to_string(&path).expect("read");
        assert!(raw.contains("\"kind\": \"counter\""));
    }

    #[test]
    fn garbage_is_reported_corrupt() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("counter.json");
        fs::write(&path, "{not json").expect("write");
        let err = load::<Counter>(&path).expect_err("corrupt");
        assert!(matches!(err, CwmError::Corrupt { .. }));
        // never repaired in place
        assert_eq!(fs::read_to_string(&path).expect("read"), "{not json");
    }

    #[test]
    fn wrong_kind_and_future_schema_are_corrupt() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("counter.json");

        fs::write(&path, r#"{"kind":"ledger","schema_version":1,"data":{}}"#).expect("write");
        assert!(matches!(load::<Counter>(&path), Err(CwmError::Corrupt { .. })));

        fs::write(&path, r#"{"kind":"counter","schema_version":9,"data":{}}"#).expect("write");
        assert!(matches!(load::<Counter>(&path), Err(CwmError::Corrupt { .. })));
    }

    #[test]
    fn unknown_fields_are_tolerated() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("counter.json");
        fs::write(
            &path,
            r#"{"kind":"counter","schema_version":1,"data":{"value":3,"added_later":true}}"#,
        )
        .expect("write");
        let got: Counter = load(&path).expect("load");
        assert_eq!(got.value, 3);
    }

    #[test]
    fn atomic_replace_leaves_no_temp_files() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("out.txt");
        atomic_replace(&path, b"first").expect("first");
        atomic_replace(&path, b"second").expect("second");
        assert_eq!(fs::read_to_string(&path).expect("read"), "second");
        let entries = fs::read_dir(tmp.path()).expect("read dir").count();
        assert_eq!(entries, 1);
    }
}
