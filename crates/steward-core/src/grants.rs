use crate::protocol::ToolKind;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, warn};

pub const WILDCARD: &str = "*";
pub const GRANT_FILE_VERSION: u32 = 1;

/// `(tool kind, path-or-wildcard)`; a `None` path is the wildcard.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GrantKey {
    pub tool: ToolKind,
    pub path: Option<String>,
}

impl GrantKey {
    pub fn new(tool: ToolKind, path: Option<&str>) -> Self {
        let path = path
            .map(str::trim)
            .filter(|p| !p.is_empty() && *p != WILDCARD)
            .map(str::to_string);
        Self { tool, path }
    }

    pub fn wildcard(tool: ToolKind) -> Self {
        Self { tool, path: None }
    }

    pub fn is_wildcard(&self) -> bool {
        self.path.is_none()
    }

    pub fn encode(&self) -> String {
        format!("{}:{}", self.tool, self.path.as_deref().unwrap_or(WILDCARD))
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let (tool, path) = raw.split_once(':')?;
        let tool = tool.parse::<ToolKind>().ok()?;
        Some(Self::new(tool, Some(path)))
    }
}

impl fmt::Display for GrantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GrantStore {
    grants: BTreeMap<GrantKey, bool>,
}

impl GrantStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &GrantKey) -> Option<bool> {
        self.grants.get(key).copied()
    }

    pub fn insert(&mut self, key: GrantKey, allowed: bool) {
        self.grants.insert(key, allowed);
    }

    pub fn remove(&mut self, key: &GrantKey) -> bool {
        self.grants.remove(key).is_some()
    }

    pub fn clear(&mut self) {
        self.grants.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&GrantKey, bool)> {
        self.grants.iter().map(|(key, allowed)| (key, *allowed))
    }

    pub fn len(&self) -> usize {
        self.grants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }
}

#[derive(Debug, Error)]
pub enum GrantStoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("unsupported grant file version {found}, max supported {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },
}

/// Where "always" decisions live between client restarts.
///
/// Several clients may share one store, so writes go through `update`, which
/// applies a change to the latest stored grants and returns what was saved.
pub trait GrantBackend: Send {
    fn load(&self) -> Result<GrantStore, GrantStoreError>;
    fn update(
        &self,
        change: &mut dyn FnMut(&mut GrantStore),
    ) -> Result<GrantStore, GrantStoreError>;
}

/// Process-local backend. Clones share storage, so a second broker built from
/// a clone sees what the first one saved.
#[derive(Debug, Default, Clone)]
pub struct MemoryGrantBackend {
    saved: Arc<Mutex<GrantStore>>,
}

impl MemoryGrantBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> GrantStore {
        self.saved
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl GrantBackend for MemoryGrantBackend {
    fn load(&self) -> Result<GrantStore, GrantStoreError> {
        Ok(self.snapshot())
    }

    fn update(
        &self,
        change: &mut dyn FnMut(&mut GrantStore),
    ) -> Result<GrantStore, GrantStoreError> {
        let mut saved = self
            .saved
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        change(&mut *saved);
        Ok(saved.clone())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct GrantFile {
    version: u32,
    #[serde(default)]
    grants: BTreeMap<String, bool>,
}

/// JSON file backend: `{"version":1,"grants":{"bash:*":true}}`.
#[derive(Debug, Clone)]
pub struct FileGrantBackend {
    path: PathBuf,
}

impl FileGrantBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        self.path.with_extension("lock")
    }
}

impl GrantBackend for FileGrantBackend {
    fn load(&self) -> Result<GrantStore, GrantStoreError> {
        if !self.path.exists() {
            return Ok(GrantStore::new());
        }
        let contents = fs::read_to_string(&self.path)?;
        let file: GrantFile = serde_json::from_str(&contents)
            .map_err(|err| GrantStoreError::Serialization(err.to_string()))?;
        if file.version > GRANT_FILE_VERSION {
            return Err(GrantStoreError::UnsupportedVersion {
                found: file.version,
                supported: GRANT_FILE_VERSION,
            });
        }
        let mut store = GrantStore::new();
        for (raw, allowed) in file.grants {
            match GrantKey::parse(&raw) {
                Some(key) => store.insert(key, allowed),
                None => warn!("grant_key_skipped: {raw}"),
            }
        }
        Ok(store)
    }

    /// Reload, change and write all happen under an exclusive lock on a
    /// sibling `.lock` file, so concurrent writers never lose each other's
    /// grants. A corrupt file is replaced; a newer version is left untouched.
    fn update(
        &self,
        change: &mut dyn FnMut(&mut GrantStore),
    ) -> Result<GrantStore, GrantStoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.lock_path())?;
        lock.lock_exclusive()?;

        let mut grants = match self.load() {
            Ok(grants) => grants,
            Err(GrantStoreError::Serialization(err)) => {
                warn!(path = %self.path.display(), "grant_file_corrupt_replaced: {err}");
                GrantStore::new()
            }
            Err(err) => return Err(err),
        };
        change(&mut grants);

        let file = GrantFile {
            version: GRANT_FILE_VERSION,
            grants: grants.iter().map(|(key, allowed)| (key.encode(), allowed)).collect(),
        };
        let payload = serde_json::to_string_pretty(&file)
            .map_err(|err| GrantStoreError::Serialization(err.to_string()))?;
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, payload)?;
        fs::rename(&tmp_path, &self.path)?;
        debug!(path = %self.path.display(), count = grants.len(), "grants_saved");
        Ok(grants)
    }
}

/// In-memory view of the persistent store, written through to its backend.
pub struct PersistentGrants {
    backend: Box<dyn GrantBackend>,
    grants: GrantStore,
}

impl PersistentGrants {
    /// Loads eagerly; an unreadable store starts empty rather than blocking
    /// the session.
    pub fn open(backend: impl GrantBackend + 'static) -> Self {
        let grants = match backend.load() {
            Ok(grants) => grants,
            Err(err) => {
                warn!("grant_store_load_error: {err}");
                GrantStore::new()
            }
        };
        Self {
            backend: Box::new(backend),
            grants,
        }
    }

    pub fn in_memory() -> Self {
        Self::open(MemoryGrantBackend::new())
    }

    pub fn get(&self, key: &GrantKey) -> Option<bool> {
        self.grants.get(key)
    }

    /// On a failed write the change still applies to this client's view.
    pub fn set(&mut self, key: GrantKey, allowed: bool) -> Result<(), GrantStoreError> {
        let saved = self
            .backend
            .update(&mut |grants| grants.insert(key.clone(), allowed));
        match saved {
            Ok(latest) => {
                self.grants = latest;
                Ok(())
            }
            Err(err) => {
                self.grants.insert(key, allowed);
                Err(err)
            }
        }
    }

    pub fn remove(&mut self, key: &GrantKey) -> Result<bool, GrantStoreError> {
        let mut removed = false;
        let saved = self.backend.update(&mut |grants| removed = grants.remove(key));
        match saved {
            Ok(latest) => {
                self.grants = latest;
                Ok(removed)
            }
            Err(err) => {
                self.grants.remove(key);
                Err(err)
            }
        }
    }

    pub fn clear(&mut self) -> Result<(), GrantStoreError> {
        let saved = self.backend.update(&mut |grants| grants.clear());
        match saved {
            Ok(latest) => {
                self.grants = latest;
                Ok(())
            }
            Err(err) => {
                self.grants.clear();
                Err(err)
            }
        }
    }

    pub fn store(&self) -> &GrantStore {
        &self.grants
    }
}

impl fmt::Debug for PersistentGrants {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistentGrants")
            .field("grants", &self.grants)
            .finish_non_exhaustive()
    }
}
