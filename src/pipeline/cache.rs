//! Explicit artifact cache used by the aggregation stage.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// When a stored artifact may stand in for a recomputation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CachePolicy {
    /// Never read nor write the store.
    AlwaysCompute,
    /// Return the stored artifact if present, otherwise compute and store.
    #[default]
    UseIfPresent,
    /// Ignore any stored artifact, compute and overwrite it.
    ForceRefresh,
}

impl CachePolicy {
    /// Parses `"always-compute"`, `"use-if-present"` or `"force-refresh"`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "always-compute" => Some(Self::AlwaysCompute),
            "use-if-present" => Some(Self::UseIfPresent),
            "force-refresh" => Some(Self::ForceRefresh),
            _ => None,
        }
    }
}

/// Storage backend holding artifacts as text under string keys.
pub trait ArtifactStore {
    /// Returns the artifact stored under `key`, or `None` if there is none.
    fn read(&self, key: &str) -> io::Result<Option<String>>;

    /// Stores `contents` under `key`, replacing any previous artifact.
    fn write(&mut self, key: &str, contents: &str) -> io::Result<()>;
}

/// Artifacts as files below a root directory; keys are relative paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// File that backs `key`.
    pub fn path_of(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

impl ArtifactStore for FsStore {
    fn read(&self, key: &str) -> io::Result<Option<String>> {
        match fs::read_to_string(self.path_of(key)) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn write(&mut self, key: &str, contents: &str) -> io::Result<()> {
        let path = self.path_of(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = tmp_path(&path);
        fs::write(&tmp, contents)?;
        fs::rename(&tmp, &path)
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// In-memory store; counts reads so tests can observe cache behaviour.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: HashMap<String, String>,
    reads: std::cell::Cell<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(mut self, key: impl Into<String>, contents: impl Into<String>) -> Self {
        self.entries.insert(key.into(), contents.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Number of `read` calls so far.
    pub fn reads(&self) -> usize {
        self.reads.get()
    }
}

impl ArtifactStore for MemoryStore {
    fn read(&self, key: &str) -> io::Result<Option<String>> {
        self.reads.set(self.reads.get() + 1);
        Ok(self.entries.get(key).cloned())
    }

    fn write(&mut self, key: &str, contents: &str) -> io::Result<()> {
        self.entries.insert(key.to_string(), contents.to_string());
        Ok(())
    }
}

/// Whether a result came from the store or was computed.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheOutcome<T> {
    Cached(T),
    Computed(T),
}

impl<T> CacheOutcome<T> {
    pub fn is_cached(&self) -> bool {
        matches!(self, Self::Cached(_))
    }

    pub fn into_inner(self) -> T {
        match self {
            Self::Cached(v) | Self::Computed(v) => v,
        }
    }

    pub fn get(&self) -> &T {
        match self {
            Self::Cached(v) | Self::Computed(v) => v,
        }
    }
}

/// A store paired with a policy.
#[derive(Debug, Clone, Default)]
pub struct ArtifactCache<S> {
    store: S,
    policy: CachePolicy,
}

impl<S: ArtifactStore> ArtifactCache<S> {
    pub fn new(store: S, policy: CachePolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Stored artifact, if the policy allows using one and it exists.
    ///
    /// # Errors
    ///
    /// Propagates store read failures other than absence.
    pub fn lookup(&self, key: &str) -> io::Result<Option<String>> {
        match self.policy {
            CachePolicy::UseIfPresent => self.store.read(key),
            CachePolicy::AlwaysCompute | CachePolicy::ForceRefresh => Ok(None),
        }
    }

    /// Stores a freshly computed artifact unless the policy is
    /// `AlwaysCompute`.
    ///
    /// # Errors
    ///
    /// Propagates store write failures.
    pub fn commit(&mut self, key: &str, contents: &str) -> io::Result<()> {
        match self.policy {
            CachePolicy::AlwaysCompute => Ok(()),
            CachePolicy::UseIfPresent | CachePolicy::ForceRefresh => self.store.write(key, contents),
        }
    }
}
