//! Session store: last submitted session id per logical flow.
//!
//! Every client instance owns exactly one [`SessionType`]. After a successful
//! submission the client records the returned [`SessionId`] here so that a
//! restarted process can resume tracking the same pending transaction.
//!
//! The store is an injected dependency ([`SessionStore`]) so tests can use
//! [`MemorySessionStore`] while the CLI persists through [`FileSessionStore`].
//!
//! Two clients that share a `SessionType` overwrite each other: the store is
//! last-write-wins per type. Distinct types never do, even across processes:
//! [`FileSessionStore`] merges into the file under an advisory lock.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;

// =============================================================================
// Session identity
// =============================================================================

/// Logical flow that issued a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionType {
    /// Election registration and lifecycle (register, end).
    ElectionFlow,
    /// Candidacy submission and candidate approval.
    CandidateFlow,
    /// Voter registration and voting.
    VoterFlow,
    /// Disputes and their resolution.
    DisputeFlow,
    /// Connectivity check flow.
    PingPongFlow,
}

impl SessionType {
    pub const ALL: [Self; 5] = [
        Self::ElectionFlow,
        Self::CandidateFlow,
        Self::VoterFlow,
        Self::DisputeFlow,
        Self::PingPongFlow,
    ];

    /// Storage key for this flow.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ElectionFlow => "election-flow",
            Self::CandidateFlow => "candidate-flow",
            Self::VoterFlow => "voter-flow",
            Self::DisputeFlow => "dispute-flow",
            Self::PingPongFlow => "ping-pong-flow",
        }
    }
}

impl fmt::Display for SessionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|ty| ty.as_str() == s)
            .ok_or_else(|| {
                let known: Vec<&str> = Self::ALL.iter().map(|ty| ty.as_str()).collect();
                format!("unknown session type: {s}. Expected one of: {}", known.join(", "))
            })
    }
}

/// Opaque handle for one submission.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(0);

impl SessionId {
    /// Allocate a new process-unique session id.
    #[must_use]
    pub fn generate() -> Self {
        let counter = SESSION_COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
        let ts_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        Self(format!("{ts_ms}-{counter}"))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

// =============================================================================
// Store boundary
// =============================================================================

/// Synchronous key/value mapping from flow to its most recent session id.
pub trait SessionStore: Send + Sync {
    /// Last session id recorded for `ty`.
    fn get(&self, ty: SessionType) -> Option<SessionId>;

    /// Record `id` for `ty`, replacing any previous value.
    fn set(&self, ty: SessionType, id: SessionId);

    /// All recorded flows, ordered by type.
    fn entries(&self) -> Vec<(SessionType, SessionId)>;
}

/// Process-lifetime store.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    records: Mutex<BTreeMap<SessionType, SessionId>>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, ty: SessionType) -> Option<SessionId> {
        lock(&self.records).get(&ty).cloned()
    }

    fn set(&self, ty: SessionType, id: SessionId) {
        lock(&self.records).insert(ty, id);
    }

    fn entries(&self) -> Vec<(SessionType, SessionId)> {
        lock(&self.records)
            .iter()
            .map(|(ty, id)| (*ty, id.clone()))
            .collect()
    }
}

type Records = BTreeMap<SessionType, SessionId>;

/// Store persisted as a flat JSON object (`{"election-flow": "<id>", ...}`).
///
/// Reads are served from memory. Each write re-reads the file under its lock,
/// replaces one key and picks up whatever other processes recorded since. A
/// write that cannot be persisted is logged and the in-memory value is still
/// updated.
#[derive(Debug)]
pub struct FileSessionStore {
    path: PathBuf,
    records: Mutex<Records>,
}

impl FileSessionStore {
    /// Open (or lazily create) the store at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let records = read_json_or_default::<Records>(&path)?;
        debug!(path = %path.display(), records = records.len(), "session store opened");
        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionStore for FileSessionStore {
    fn get(&self, ty: SessionType) -> Option<SessionId> {
        lock(&self.records).get(&ty).cloned()
    }

    fn set(&self, ty: SessionType, id: SessionId) {
        let mut records = lock(&self.records);
        records.insert(ty, id.clone());
        let merged = update_json_locked(&self.path, |disk: &mut Records| {
            disk.insert(ty, id);
        });
        match merged {
            Ok(disk) => *records = disk,
            Err(err) => warn!(
                path = %self.path.display(),
                session_type = %ty,
                error = %err,
                "failed to persist session store"
            ),
        }
    }

    fn entries(&self) -> Vec<(SessionType, SessionId)> {
        lock(&self.records)
            .iter()
            .map(|(ty, id)| (*ty, id.clone()))
            .collect()
    }
}

// =============================================================================
// Persistence helpers
// =============================================================================

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Exclusive advisory lock on `<path>.lock`, held until dropped.
pub(crate) struct FileLock {
    file: File,
}

impl FileLock {
    /// Block until no other process holds the lock for `path`.
    pub(crate) fn acquire(path: &Path) -> Result<Self> {
        ensure_parent(path)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.with_extension("lock"))?;
        FileExt::lock_exclusive(&file)?;
        Ok(Self { file })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// Read `path`, apply `op`, write it back, all under the file's lock.
/// Returns the value as written.
pub(crate) fn update_json_locked<T>(path: &Path, op: impl FnOnce(&mut T)) -> Result<T>
where
    T: Default + Serialize + DeserializeOwned,
{
    let _lock = FileLock::acquire(path)?;
    let mut value: T = read_json_or_default(path)?;
    op(&mut value);
    write_json_atomic(path, &value)?;
    Ok(value)
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

pub(crate) fn read_json_or_default<T>(path: &Path) -> Result<T>
where
    T: Default + for<'de> Deserialize<'de>,
{
    if !path.exists() {
        return Ok(T::default());
    }
    let bytes = std::fs::read(path)?;
    if bytes.is_empty() {
        return Ok(T::default());
    }
    Ok(serde_json::from_slice(&bytes)?)
}

pub(crate) fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    ensure_parent(path)?;
    let tmp_path = path.with_extension("tmp");
    let bytes = serde_json::to_vec_pretty(value)?;
    std::fs::write(&tmp_path, bytes)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}
