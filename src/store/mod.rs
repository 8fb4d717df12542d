//! Durable state documents.
//!
//! Every component that owns persistent state (queue ledger, worker-set
//! snapshot, guardrail state, context transition log, active plan) writes it
//! as a JSON document inside one state directory. Writes go through an
//! exclusive sidecar lock and an atomic temp-file rename, so a concurrent
//! CLI invocation can never observe a half-written document and two
//! read-modify-write cycles cannot interleave on disk.
//!
//! The store is deliberately dumb: it knows about named documents, not about
//! their contents. Each document is owned and serialized by exactly one
//! component; components never read each other's documents.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs4::FileExt;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::StoreError;

/// Append-only audit log filename.
const AUDIT_LOG: &str = "audit.log";

/// A state directory holding one JSON document per owning component.
#[derive(Debug, Clone)]
pub struct StateDir {
    root: PathBuf,
}

impl StateDir {
    /// Open (creating if necessary) a state directory.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| StoreError::Io {
            path: root.clone(),
            source,
        })?;
        Ok(Self { root })
    }

    /// Root path of the state directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn doc_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Load a document, returning `None` if it has never been written.
    pub fn load<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, StoreError> {
        let path = self.doc_path(name);
        let _lock = StateLock::acquire(&path)?;

        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StoreError::Io { path, source }),
        };

        let value = serde_json::from_slice(&bytes).map_err(|source| StoreError::Serde {
            path: path.clone(),
            source,
        })?;
        Ok(Some(value))
    }

    /// Persist a document atomically.
    pub fn save<T: Serialize>(&self, name: &str, value: &T) -> Result<(), StoreError> {
        let path = self.doc_path(name);
        let _lock = StateLock::acquire(&path)?;

        let bytes = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Serde {
            path: path.clone(),
            source,
        })?;

        let tmp = path.with_extension("json.tmp");
        let io_err = |source| StoreError::Io {
            path: path.clone(),
            source,
        };

        let mut file = File::create(&tmp).map_err(io_err)?;
        file.write_all(&bytes).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        drop(file);

        fs::rename(&tmp, &path).map_err(io_err)
    }

    /// Append a structured entry to the audit log.
    ///
    /// The audit log is JSON lines, append-only, and never read back by the
    /// core; it exists for the operator.
    pub fn append_audit<T: Serialize>(&self, entry: &T) -> Result<(), StoreError> {
        let path = self.doc_path(AUDIT_LOG);
        let _lock = StateLock::acquire(&path)?;

        let mut line = serde_json::to_vec(entry).map_err(|source| StoreError::Serde {
            path: path.clone(),
            source,
        })?;
        line.push(b'\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            })?;
        file.write_all(&line).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })
    }
}

/// Exclusive advisory lock on a document's sidecar lock file.
///
/// Held for the duration of one load or save; released on drop.
struct StateLock {
    file: File,
}

impl StateLock {
    fn acquire(doc_path: &Path) -> Result<Self, StoreError> {
        let lock_path = doc_path.with_extension("lock");
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&lock_path)
            .map_err(|source| StoreError::Io {
                path: lock_path.clone(),
                source,
            })?;

        file.lock_exclusive().map_err(|e| StoreError::Lock {
            path: lock_path,
            reason: e.to_string(),
        })?;

        Ok(Self { file })
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Doc {
        name: String,
        count: u32,
    }

    #[test]
    fn test_load_missing_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateDir::open(dir.path()).unwrap();

        let loaded: Option<Doc> = store.load("missing.json").unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateDir::open(dir.path()).unwrap();

        let doc = Doc {
            name: "queue".to_string(),
            count: 3,
        };
        store.save("doc.json", &doc).unwrap();

        let loaded: Doc = store.load("doc.json").unwrap().unwrap();
        assert_eq!(loaded, doc);
    }

    #[test]
    fn test_save_overwrites_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateDir::open(dir.path()).unwrap();

        for count in 0..5 {
            let doc = Doc {
                name: "queue".to_string(),
                count,
            };
            store.save("doc.json", &doc).unwrap();
        }

        let loaded: Doc = store.load("doc.json").unwrap().unwrap();
        assert_eq!(loaded.count, 4);

        // No temp file left behind
        assert!(!dir.path().join("doc.json.tmp").exists());
    }

    #[test]
    fn test_corrupt_document_is_an_error_not_a_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateDir::open(dir.path()).unwrap();

        std::fs::write(dir.path().join("doc.json"), b"{not json").unwrap();

        let result: Result<Option<Doc>, _> = store.load("doc.json");
        assert!(matches!(result, Err(StoreError::Serde { .. })));
    }

    #[test]
    fn test_audit_appends_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateDir::open(dir.path()).unwrap();

        store
            .append_audit(&serde_json::json!({"event": "spawn", "n": 1}))
            .unwrap();
        store
            .append_audit(&serde_json::json!({"event": "spawn", "n": 2}))
            .unwrap();

        let contents = std::fs::read_to_string(dir.path().join("audit.log")).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in lines {
            let parsed: serde_json::Value = serde_json::from_str(line).unwrap();
            assert_eq!(parsed["event"], "spawn");
        }
    }
}
