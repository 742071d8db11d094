//! Key-value persistence backends
//!
//! The store talks to a [`StorageBackend`] rather than to the filesystem
//! directly, so the same signing and session logic runs against local files
//! or an in-memory map.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::debug;

use crate::{Error, Result};

/// Address of a single stored record
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordKey {
    /// `features/<feature_id>.json`
    Feature(String),
    /// `sessions/<feature_id>/<session_id>.json`
    Session {
        feature_id: String,
        session_id: String,
    },
    /// `locks/<feature_id>/<issue_number>.lock`
    Lock { feature_id: String, issue_number: u64 },
}

impl RecordKey {
    pub fn feature(feature_id: &str) -> Self {
        RecordKey::Feature(feature_id.to_string())
    }

    pub fn session(feature_id: &str, session_id: &str) -> Self {
        RecordKey::Session {
            feature_id: feature_id.to_string(),
            session_id: session_id.to_string(),
        }
    }

    pub fn lock(feature_id: &str, issue_number: u64) -> Self {
        RecordKey::Lock {
            feature_id: feature_id.to_string(),
            issue_number,
        }
    }

    /// Namespace this key lives in
    pub fn namespace(&self) -> Namespace {
        match self {
            RecordKey::Feature(_) => Namespace::Features,
            RecordKey::Session { feature_id, .. } => Namespace::Sessions(feature_id.clone()),
            RecordKey::Lock { feature_id, .. } => Namespace::Locks(feature_id.clone()),
        }
    }

    fn file_name(&self) -> String {
        match self {
            RecordKey::Feature(id) => format!("{}.json", id),
            RecordKey::Session { session_id, .. } => format!("{}.json", session_id),
            RecordKey::Lock { issue_number, .. } => format!("{}.lock", issue_number),
        }
    }

    /// Path relative to a backend root
    pub fn relative_path(&self) -> PathBuf {
        self.namespace().relative_dir().join(self.file_name())
    }
}

impl std::fmt::Display for RecordKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.relative_path().display())
    }
}

/// A group of records listed together
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Namespace {
    Features,
    Sessions(String),
    Locks(String),
}

impl Namespace {
    fn relative_dir(&self) -> PathBuf {
        match self {
            Namespace::Features => PathBuf::from("features"),
            Namespace::Sessions(feature_id) => Path::new("sessions").join(feature_id),
            Namespace::Locks(feature_id) => Path::new("locks").join(feature_id),
        }
    }

    fn extension(&self) -> &'static str {
        match self {
            Namespace::Features | Namespace::Sessions(_) => "json",
            Namespace::Locks(_) => "lock",
        }
    }

    /// Rebuild a key from a stored name within this namespace
    fn key_for(&self, stem: &str) -> Option<RecordKey> {
        match self {
            Namespace::Features => Some(RecordKey::Feature(stem.to_string())),
            Namespace::Sessions(feature_id) => Some(RecordKey::session(feature_id, stem)),
            Namespace::Locks(feature_id) => stem
                .parse()
                .ok()
                .map(|issue| RecordKey::lock(feature_id, issue)),
        }
    }
}

/// Durable byte storage addressed by [`RecordKey`]
pub trait StorageBackend: Send + Sync {
    /// Read a record; `None` when absent
    fn read(&self, key: &RecordKey) -> Result<Option<Vec<u8>>>;

    /// Replace a record atomically: readers see the old or the new bytes,
    /// never a mix
    fn write(&self, key: &RecordKey, bytes: &[u8]) -> Result<()>;

    /// Create a record only if absent; returns false if it already existed
    fn create_new(&self, key: &RecordKey, bytes: &[u8]) -> Result<bool>;

    /// Remove a record; returns false if it was absent
    fn remove(&self, key: &RecordKey) -> Result<bool>;

    /// List the keys currently stored in a namespace, sorted
    fn list(&self, namespace: &Namespace) -> Result<Vec<RecordKey>>;

    /// Remove every record in a namespace
    fn remove_namespace(&self, namespace: &Namespace) -> Result<()>;
}

/// Check that an id can be used as a single storage path segment
pub fn validate_id(id: &str) -> Result<()> {
    let ok = !id.is_empty()
        && id.len() <= 128
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if ok {
        Ok(())
    } else {
        Err(Error::InvalidId(id.to_string()))
    }
}

/// Files under a root directory, one per record
#[derive(Debug, Clone)]
pub struct FsBackend {
    root: PathBuf,
}

impl FsBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Write `bytes` to a synced temp file next to the key's target
    ///
    /// The temp file lives in the same directory so a rename or link onto
    /// the target stays on one filesystem.
    fn stage(&self, key: &RecordKey, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.path_for(key);
        let dir = path
            .parent()
            .ok_or_else(|| Error::InvalidId(key.to_string()))?;
        fs::create_dir_all(dir)?;

        let tmp_path = dir.join(format!(
            ".{}.{}.tmp",
            key.file_name(),
            uuid::Uuid::new_v4().simple()
        ));
        let written = (|| -> std::io::Result<()> {
            let mut file = OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&tmp_path)?;
            file.write_all(bytes)?;
            file.sync_all()
        })();

        if let Err(e) = written {
            let _ = fs::remove_file(&tmp_path);
            return Err(Error::Io(e));
        }
        Ok(tmp_path)
    }

    fn path_for(&self, key: &RecordKey) -> PathBuf {
        self.root.join(key.relative_path())
    }
}

impl StorageBackend for FsBackend {
    fn read(&self, key: &RecordKey) -> Result<Option<Vec<u8>>> {
        match fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn write(&self, key: &RecordKey, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(key);
        let tmp_path = self.stage(key, bytes)?;

        if let Err(e) = fs::rename(&tmp_path, &path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(Error::Io(e));
        }
        debug!(path = %path.display(), bytes = bytes.len(), "Record written");
        Ok(())
    }

    fn create_new(&self, key: &RecordKey, bytes: &[u8]) -> Result<bool> {
        let path = self.path_for(key);
        let tmp_path = self.stage(key, bytes)?;

        // Linking fails if the target exists, and readers never see it half-written
        let linked = fs::hard_link(&tmp_path, &path);
        let _ = fs::remove_file(&tmp_path);
        match linked {
            Ok(()) => {
                debug!(path = %path.display(), "Record created");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn remove(&self, key: &RecordKey) -> Result<bool> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn list(&self, namespace: &Namespace) -> Result<Vec<RecordKey>> {
        let dir = self.root.join(namespace.relative_dir());
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::Io(e)),
        };

        let mut keys = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some(namespace.extension()) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if stem.starts_with('.') {
                continue;
            }
            match namespace.key_for(stem) {
                Some(key) => keys.push(key),
                None => debug!(path = %path.display(), "Ignoring unrecognised record name"),
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn remove_namespace(&self, namespace: &Namespace) -> Result<()> {
        match fs::remove_dir_all(self.root.join(namespace.relative_dir())) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }
}

/// Records held in process memory
#[derive(Debug, Default)]
pub struct MemoryBackend {
    records: Mutex<BTreeMap<RecordKey, Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> std::sync::MutexGuard<'_, BTreeMap<RecordKey, Vec<u8>>> {
        // A panic mid-insert cannot leave a half-written entry, so poisoning is harmless
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl StorageBackend for MemoryBackend {
    fn read(&self, key: &RecordKey) -> Result<Option<Vec<u8>>> {
        Ok(self.records().get(key).cloned())
    }

    fn write(&self, key: &RecordKey, bytes: &[u8]) -> Result<()> {
        self.records().insert(key.clone(), bytes.to_vec());
        Ok(())
    }

    fn create_new(&self, key: &RecordKey, bytes: &[u8]) -> Result<bool> {
        let mut records = self.records();
        if records.contains_key(key) {
            return Ok(false);
        }
        records.insert(key.clone(), bytes.to_vec());
        Ok(true)
    }

    fn remove(&self, key: &RecordKey) -> Result<bool> {
        Ok(self.records().remove(key).is_some())
    }

    fn list(&self, namespace: &Namespace) -> Result<Vec<RecordKey>> {
        Ok(self
            .records()
            .keys()
            .filter(|k| &k.namespace() == namespace)
            .cloned()
            .collect())
    }

    fn remove_namespace(&self, namespace: &Namespace) -> Result<()> {
        self.records().retain(|k, _| &k.namespace() != namespace);
        Ok(())
    }
}
