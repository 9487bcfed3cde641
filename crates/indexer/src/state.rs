use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use common::{CoreError, CoreResult, projects::atomic_write};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::scanner::ScannedFile;

const STATE_VERSION: u32 = 1;

/// One file's last-indexed fingerprint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileRecord {
    pub path: String,
    pub mtime_secs: u64,
    pub mtime_nanos: u32,
    pub size: u64,
    pub content_hash: String,
    pub indexed_at_unix: u64,
}

#[derive(Serialize, Deserialize)]
struct StateHeader {
    version: u32,
}

/// Persistent map of relative path to [`FileRecord`], stored as
/// line-delimited JSON behind a version header. A file is in this map iff
/// its chunks are in the keyword index (and the vector index when vectors
/// are enabled).
pub struct IndexState {
    path: PathBuf,
    records: BTreeMap<String, FileRecord>,
}

impl IndexState {
    pub fn open(path: &Path) -> CoreResult<Self> {
        let mut state = Self {
            path: path.to_path_buf(),
            records: BTreeMap::new(),
        };
        if !path.exists() {
            return Ok(state);
        }

        let raw = fs::read_to_string(path)
            .map_err(|err| CoreError::io("failed reading index state", &err))?;
        let mut lines = raw.lines().filter(|l| !l.trim().is_empty());
        let Some(header_line) = lines.next() else {
            // Zero-byte state file: treat as empty, the next catch-up rebuilds.
            return Ok(state);
        };
        let header = serde_json::from_str::<StateHeader>(header_line)
            .map_err(|err| CoreError::Corrupt(format!("index state header: {err}")))?;
        if header.version != STATE_VERSION {
            return Err(CoreError::Corrupt(format!(
                "index state version {} is not supported",
                header.version
            )));
        }
        for line in lines {
            let record = serde_json::from_str::<FileRecord>(line)
                .map_err(|err| CoreError::Corrupt(format!("index state record: {err}")))?;
            state.records.insert(record.path.clone(), record);
        }
        Ok(state)
    }

    pub fn get(&self, path: &str) -> Option<&FileRecord> {
        self.records.get(path)
    }

    pub fn put(&mut self, record: FileRecord) {
        self.records.insert(record.path.clone(), record);
    }

    pub fn delete(&mut self, path: &str) -> bool {
        self.records.remove(path).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FileRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn persist(&self) -> CoreResult<()> {
        let mut body = String::new();
        let header = serde_json::to_string(&StateHeader {
            version: STATE_VERSION,
        })
        .map_err(|err| CoreError::Fatal(format!("state header serialization: {err}")))?;
        body.push_str(&header);
        body.push('\n');
        for record in self.records.values() {
            let line = serde_json::to_string(record)
                .map_err(|err| CoreError::Fatal(format!("state record serialization: {err}")))?;
            body.push_str(&line);
            body.push('\n');
        }
        atomic_write(&self.path, body.as_bytes())
            .map_err(|err| CoreError::io("failed persisting index state", &err))
    }
}

/// Change-detection verdict for one scanned file against the state map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileDisposition {
    Added,
    Unchanged,
    /// mtime or size moved; the content hash decides.
    NeedsHash,
}

pub fn classify_scanned(state: &IndexState, file: &ScannedFile) -> FileDisposition {
    match state.get(&file.rel_path) {
        None => FileDisposition::Added,
        Some(record)
            if record.mtime_secs == file.mtime_secs
                && record.mtime_nanos == file.mtime_nanos
                && record.size == file.size =>
        {
            FileDisposition::Unchanged
        }
        Some(_) => FileDisposition::NeedsHash,
    }
}

pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::{FileDisposition, FileRecord, IndexState, classify_scanned, content_hash};
    use crate::scanner::ScannedFile;

    fn temp_state(tag: &str) -> std::path::PathBuf {
        let base = std::env::temp_dir().join(format!("quarry-state-{tag}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&base);
        fs::create_dir_all(&base).expect("mkdir");
        base.join("state.jsonl")
    }

    fn record(path: &str) -> FileRecord {
        FileRecord {
            path: path.to_string(),
            mtime_secs: 100,
            mtime_nanos: 500,
            size: 42,
            content_hash: content_hash(b"body"),
            indexed_at_unix: 1,
        }
    }

    fn scanned(path: &str, mtime_secs: u64, mtime_nanos: u32, size: u64) -> ScannedFile {
        ScannedFile {
            rel_path: path.to_string(),
            mtime_secs,
            mtime_nanos,
            size,
        }
    }

    #[test]
    fn round_trips_records_through_disk() {
        let path = temp_state("roundtrip");
        let mut state = IndexState::open(&path).expect("open");
        state.put(record("src/a.rs"));
        state.put(record("src/b.rs"));
        state.persist().expect("persist");

        let reloaded = IndexState::open(&path).expect("reopen");
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.get("src/a.rs"), Some(&record("src/a.rs")));
    }

    #[test]
    fn unknown_version_is_corrupt() {
        let path = temp_state("version");
        fs::write(&path, "{\"version\":99}\n").expect("write");
        let err = IndexState::open(&path).expect_err("must fail");
        assert!(err.to_string().contains("version 99"));
    }

    #[test]
    fn zero_byte_file_opens_empty() {
        let path = temp_state("empty");
        fs::write(&path, "").expect("write");
        let state = IndexState::open(&path).expect("open");
        assert!(state.is_empty());
    }

    #[test]
    fn change_detection_uses_mtime_nanos_and_size() {
        let path = temp_state("classify");
        let mut state = IndexState::open(&path).expect("open");
        state.put(record("src/a.rs"));

        assert_eq!(
            classify_scanned(&state, &scanned("src/a.rs", 100, 500, 42)),
            FileDisposition::Unchanged
        );
        assert_eq!(
            classify_scanned(&state, &scanned("src/a.rs", 100, 501, 42)),
            FileDisposition::NeedsHash
        );
        assert_eq!(
            classify_scanned(&state, &scanned("src/a.rs", 100, 500, 43)),
            FileDisposition::NeedsHash
        );
        assert_eq!(
            classify_scanned(&state, &scanned("src/new.rs", 1, 0, 1)),
            FileDisposition::Added
        );
    }

    #[test]
    fn content_hash_is_stable_hex() {
        let a = content_hash(b"def login(): pass");
        let b = content_hash(b"def login(): pass");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, content_hash(b"def logout(): pass"));
    }
}
