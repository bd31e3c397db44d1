//! Local record of submitted sessions.
//!
//! Each submission gets a [`SessionEntry`] keyed by its [`SessionId`]: its
//! lifecycle status, the broadcast hashes, and the display strings shown
//! while it is processed. The submitter calls [`SessionRegistry::clear_all`]
//! before building a new transaction: every queued (unsigned or signed but
//! not broadcast) session is dropped and every notice is dismissed. Broadcast
//! sessions keep their hashes so status lookups stay keyed by id.
//!
//! With a backing file the registry survives restarts and is shared between
//! processes. Every change re-reads the file under its lock and writes the
//! merged result back. Queued sessions this handle did not begin are shown as
//! cancelled, since nothing in this process can complete them.
//!
//! Finished sessions are evicted oldest first beyond a cap, except those the
//! session store still names as the last session of a flow.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;
use crate::session::{
    FileLock, SessionId, SessionStore, lock, read_json_or_default, write_json_atomic,
};
use crate::tracker::TransactionStatus;
use crate::transaction::{DisplayInfo, TxHash};

/// Terminal entries retained before the oldest are evicted.
pub const DEFAULT_MAX_FINISHED: usize = 64;

const ABANDONED: &str = "abandoned before broadcast";

/// One submission as seen locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEntry {
    pub id: SessionId,
    /// Contract function the session calls.
    pub function: String,
    pub status: TransactionStatus,
    /// Hashes in broadcast order; empty until broadcast.
    #[serde(default)]
    pub hashes: Vec<TxHash>,
    pub display: DisplayInfo,
    /// Failure or cancellation reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Whether the user-facing notice was dismissed.
    #[serde(default)]
    pub dismissed: bool,
    pub created_at_ms: u64,
}

impl SessionEntry {
    fn new(id: &SessionId, function: &str, display: DisplayInfo, status: TransactionStatus) -> Self {
        Self {
            id: id.clone(),
            function: function.to_string(),
            status,
            hashes: Vec::new(),
            display,
            reason: None,
            dismissed: false,
            created_at_ms: now_ms(),
        }
    }

    /// Message matching the current status.
    #[must_use]
    pub fn message(&self) -> &str {
        match self.status {
            TransactionStatus::Confirmed => &self.display.success_message,
            TransactionStatus::Failed | TransactionStatus::Cancelled => {
                &self.display.error_message
            }
            _ => &self.display.processing_message,
        }
    }
}

type Entries = HashMap<SessionId, SessionEntry>;

#[derive(Debug, Default)]
struct Inner {
    entries: Entries,
    /// Sessions begun through this handle.
    own: HashSet<SessionId>,
}

impl Inner {
    /// Replace the view with `entries`, showing queued sessions of other
    /// handles as cancelled. Returns how many were.
    fn adopt(&mut self, mut entries: Entries) -> usize {
        let mut abandoned = 0;
        for entry in entries.values_mut() {
            if is_queued(entry.status) && !self.own.contains(&entry.id) {
                entry.status = TransactionStatus::Cancelled;
                entry.reason = Some(ABANDONED.to_string());
                abandoned += 1;
            }
        }
        self.entries = entries;
        abandoned
    }
}

/// Shared session registry.
pub struct SessionRegistry {
    inner: Mutex<Inner>,
    path: Option<PathBuf>,
    max_finished: usize,
    store: OnceLock<Arc<dyn SessionStore>>,
}

impl fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("path", &self.path)
            .field("max_finished", &self.max_finished)
            .finish_non_exhaustive()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    /// In-memory registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            path: None,
            max_finished: DEFAULT_MAX_FINISHED,
            store: OnceLock::new(),
        }
    }

    /// Registry backed by `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut inner = Inner::default();
        let abandoned = inner.adopt(load_entries(&path)?);
        debug!(
            path = %path.display(),
            sessions = inner.entries.len(),
            abandoned,
            "session registry opened"
        );
        Ok(Self {
            inner: Mutex::new(inner),
            path: Some(path),
            max_finished: DEFAULT_MAX_FINISHED,
            store: OnceLock::new(),
        })
    }

    #[must_use]
    pub fn with_max_finished(mut self, max_finished: usize) -> Self {
        self.max_finished = max_finished;
        self
    }

    /// Never evict a session `store` still records for some flow.
    ///
    /// Only the first store registered is consulted.
    pub fn keep_stored(&self, store: Arc<dyn SessionStore>) {
        if self.store.set(store).is_err() {
            debug!("session registry already follows a store");
        }
    }

    /// Register a new session awaiting signature.
    pub fn begin(&self, id: &SessionId, function: &str, display: DisplayInfo) {
        lock(&self.inner).own.insert(id.clone());
        let entry = SessionEntry::new(id, function, display, TransactionStatus::Pending);
        self.update(|entries| {
            entries.insert(id.clone(), entry);
        });
    }

    /// Move `id` forward to `status`. Returns the resulting status, or `None`
    /// when the session is unknown. Backward moves and moves out of a
    /// terminal state are ignored.
    pub fn advance(
        &self,
        id: &SessionId,
        status: TransactionStatus,
        reason: Option<String>,
    ) -> Option<TransactionStatus> {
        self.update(|entries| {
            let entry = entries.get_mut(id)?;
            Some(move_forward(entry, status, reason))
        })
    }

    /// Record broadcast hashes. Re-creates the entry if a concurrent
    /// `clear_all` dropped it while it was being signed.
    pub fn record_broadcast(
        &self,
        id: &SessionId,
        function: &str,
        display: &DisplayInfo,
        hashes: Vec<TxHash>,
    ) {
        self.update(|entries| {
            let entry = entries.entry(id.clone()).or_insert_with(|| {
                SessionEntry::new(id, function, display.clone(), TransactionStatus::Signed)
            });
            if entry.status.can_advance_to(TransactionStatus::Broadcast) {
                entry.status = TransactionStatus::Broadcast;
                entry.hashes = hashes;
            }
        });
    }

    /// End `id` as failed or cancelled before it was broadcast, re-creating
    /// the entry if a concurrent `clear_all` dropped it.
    pub fn finish(
        &self,
        id: &SessionId,
        function: &str,
        display: &DisplayInfo,
        status: TransactionStatus,
        reason: String,
    ) -> TransactionStatus {
        self.update(|entries| {
            let entry = entries.entry(id.clone()).or_insert_with(|| {
                SessionEntry::new(id, function, display.clone(), TransactionStatus::Pending)
            });
            move_forward(entry, status, Some(reason))
        })
    }

    /// Drop every queued session and dismiss every notice.
    ///
    /// Returns the number of sessions dropped.
    pub fn clear_all(&self) -> usize {
        self.update(|entries| {
            let before = entries.len();
            entries.retain(|_, entry| !is_queued(entry.status));
            for entry in entries.values_mut() {
                entry.dismissed = true;
            }
            before - entries.len()
        })
    }

    #[must_use]
    pub fn get(&self, id: &SessionId) -> Option<SessionEntry> {
        lock(&self.inner).entries.get(id).cloned()
    }

    #[must_use]
    pub fn status(&self, id: &SessionId) -> TransactionStatus {
        lock(&self.inner)
            .entries
            .get(id)
            .map_or(TransactionStatus::None, |entry| entry.status)
    }

    /// Sessions whose notice is still showing, oldest first.
    #[must_use]
    pub fn active_notices(&self) -> Vec<SessionEntry> {
        let inner = lock(&self.inner);
        let mut out: Vec<SessionEntry> = inner
            .entries
            .values()
            .filter(|entry| !entry.dismissed)
            .cloned()
            .collect();
        out.sort_by_key(|entry| entry.created_at_ms);
        out
    }

    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.inner).entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply `op` to the current entries, evict, and persist.
    ///
    /// With a file, `op` sees the file's contents read under its lock, so
    /// changes made by other processes are kept. If the file cannot be locked
    /// or read, `op` runs against memory only.
    fn update<R>(&self, op: impl FnOnce(&mut Entries) -> R) -> R {
        let mut inner = lock(&self.inner);
        let pinned = self.pinned();

        let Some(path) = &self.path else {
            let out = op(&mut inner.entries);
            evict_finished(&mut inner.entries, self.max_finished, &pinned);
            return out;
        };

        let mut on_disk = match lock_and_load(path) {
            Ok(locked) => Some(locked),
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "session registry unavailable, keeping change in memory"
                );
                None
            }
        };
        let entries = match on_disk.as_mut() {
            Some((_, disk)) => disk,
            None => &mut inner.entries,
        };
        let out = op(entries);
        evict_finished(entries, self.max_finished, &pinned);

        if let Some((held, disk)) = on_disk {
            if let Err(err) = save_entries(path, &disk) {
                warn!(path = %path.display(), error = %err, "failed to persist session registry");
            }
            drop(held);
            inner.adopt(disk);
        }
        out
    }

    fn pinned(&self) -> HashSet<SessionId> {
        self.store.get().map_or_else(HashSet::new, |store| {
            store.entries().into_iter().map(|(_, id)| id).collect()
        })
    }
}

fn is_queued(status: TransactionStatus) -> bool {
    matches!(
        status,
        TransactionStatus::Pending | TransactionStatus::Signed
    )
}

fn move_forward(
    entry: &mut SessionEntry,
    status: TransactionStatus,
    reason: Option<String>,
) -> TransactionStatus {
    if entry.status.can_advance_to(status) {
        entry.status = status;
        if reason.is_some() {
            entry.reason = reason;
        }
    }
    entry.status
}

fn evict_finished(entries: &mut Entries, max_finished: usize, pinned: &HashSet<SessionId>) {
    let finished = entries
        .values()
        .filter(|entry| entry.status.is_terminal())
        .count();
    let excess = finished.saturating_sub(max_finished);
    if excess == 0 {
        return;
    }
    let mut evictable: Vec<(u64, SessionId)> = entries
        .values()
        .filter(|entry| entry.status.is_terminal() && !pinned.contains(&entry.id))
        .map(|entry| (entry.created_at_ms, entry.id.clone()))
        .collect();
    evictable.sort();
    for (_, id) in evictable.into_iter().take(excess) {
        entries.remove(&id);
    }
}

fn lock_and_load(path: &Path) -> Result<(FileLock, Entries)> {
    let held = FileLock::acquire(path)?;
    let entries = load_entries(path)?;
    Ok((held, entries))
}

fn load_entries(path: &Path) -> Result<Entries> {
    let stored: Vec<SessionEntry> = read_json_or_default(path)?;
    Ok(stored
        .into_iter()
        .map(|entry| (entry.id.clone(), entry))
        .collect())
}

fn save_entries(path: &Path, entries: &Entries) -> Result<()> {
    let mut ordered: Vec<&SessionEntry> = entries.values().collect();
    ordered.sort_by(|a, b| a.created_at_ms.cmp(&b.created_at_ms).then(a.id.cmp(&b.id)));
    write_json_atomic(path, &ordered)
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{MemorySessionStore, SessionType};
    use tempfile::tempdir;

    fn info() -> DisplayInfo {
        DisplayInfo::for_action("Vote")
    }

    #[test]
    fn lifecycle_moves_forward_only() {
        let registry = SessionRegistry::new();
        let id = SessionId::from("S1");
        registry.begin(&id, "vote", info());
        assert_eq!(registry.status(&id), TransactionStatus::Pending);

        registry.advance(&id, TransactionStatus::Signed, None);
        registry.record_broadcast(&id, "vote", &info(), vec![TxHash("h1".into())]);
        assert_eq!(registry.status(&id), TransactionStatus::Broadcast);

        // Regressing is ignored.
        assert_eq!(
            registry.advance(&id, TransactionStatus::Pending, None),
            Some(TransactionStatus::Broadcast)
        );

        registry.advance(&id, TransactionStatus::Confirmed, None);
        assert_eq!(
            registry.advance(&id, TransactionStatus::Failed, Some("late".into())),
            Some(TransactionStatus::Confirmed)
        );
        assert_eq!(registry.get(&id).unwrap().reason, None);
    }

    #[test]
    fn unknown_sessions_report_none() {
        let registry = SessionRegistry::new();
        let id = SessionId::from("ghost");
        assert_eq!(registry.status(&id), TransactionStatus::None);
        assert_eq!(registry.advance(&id, TransactionStatus::Signed, None), None);
    }

    #[test]
    fn clear_all_drops_queued_and_dismisses_the_rest() {
        let registry = SessionRegistry::new();
        let queued = SessionId::from("queued");
        let signed = SessionId::from("signed");
        let sent = SessionId::from("sent");
        registry.begin(&queued, "vote", info());
        registry.begin(&signed, "vote", info());
        registry.advance(&signed, TransactionStatus::Signed, None);
        registry.begin(&sent, "vote", info());
        registry.record_broadcast(&sent, "vote", &info(), vec![TxHash("h".into())]);

        assert_eq!(registry.active_notices().len(), 3);
        assert_eq!(registry.clear_all(), 2);

        assert_eq!(registry.status(&queued), TransactionStatus::None);
        assert_eq!(registry.status(&signed), TransactionStatus::None);
        assert_eq!(registry.status(&sent), TransactionStatus::Broadcast);
        assert!(registry.active_notices().is_empty());
    }

    #[test]
    fn broadcast_recreates_cleared_entry() {
        let registry = SessionRegistry::new();
        let id = SessionId::from("S1");
        registry.begin(&id, "vote", info());
        registry.clear_all();
        registry.record_broadcast(&id, "vote", &info(), vec![TxHash("h1".into())]);
        let entry = registry.get(&id).unwrap();
        assert_eq!(entry.status, TransactionStatus::Broadcast);
        assert_eq!(entry.hashes, vec![TxHash("h1".into())]);
    }

    #[test]
    fn finished_sessions_are_bounded() {
        let registry = SessionRegistry::new().with_max_finished(2);
        for n in 0..4 {
            let id = SessionId(format!("S{n}"));
            registry.begin(&id, "vote", info());
            registry.advance(&id, TransactionStatus::Cancelled, None);
        }
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn messages_follow_status() {
        let registry = SessionRegistry::new();
        let id = SessionId::from("S1");
        registry.begin(&id, "vote", info());
        assert_eq!(
            registry.get(&id).unwrap().message(),
            "Processing Vote transaction"
        );
        registry.advance(&id, TransactionStatus::Cancelled, Some("declined".into()));
        assert_eq!(
            registry.get(&id).unwrap().message(),
            "An error has occurred during Vote"
        );
    }

    #[test]
    fn reopen_cancels_sessions_that_never_broadcast() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("registry.json");

        let registry = SessionRegistry::open(&path).unwrap();
        let waiting = SessionId::from("waiting");
        let sent = SessionId::from("sent");
        registry.begin(&waiting, "vote", info());
        registry.begin(&sent, "vote", info());
        registry.record_broadcast(&sent, "vote", &info(), vec![TxHash("h".into())]);
        drop(registry);

        let reopened = SessionRegistry::open(&path).unwrap();
        assert_eq!(reopened.status(&waiting), TransactionStatus::Cancelled);
        let entry = reopened.get(&sent).unwrap();
        assert_eq!(entry.status, TransactionStatus::Broadcast);
        assert_eq!(entry.hashes, vec![TxHash("h".into())]);
    }

    #[test]
    fn failure_recreates_cleared_entry() {
        let registry = SessionRegistry::new();
        let id = SessionId::from("S1");
        registry.begin(&id, "vote", info());
        registry.clear_all();
        assert_eq!(registry.status(&id), TransactionStatus::None);

        let status = registry.finish(
            &id,
            "vote",
            &info(),
            TransactionStatus::Cancelled,
            "declined".into(),
        );
        assert_eq!(status, TransactionStatus::Cancelled);
        let entry = registry.get(&id).unwrap();
        assert_eq!(entry.reason.as_deref(), Some("declined"));
        assert!(!entry.dismissed);
    }

    #[test]
    fn finish_never_leaves_a_terminal_state() {
        let registry = SessionRegistry::new();
        let id = SessionId::from("S1");
        registry.begin(&id, "vote", info());
        registry.advance(&id, TransactionStatus::Cancelled, Some("declined".into()));
        let status = registry.finish(
            &id,
            "vote",
            &info(),
            TransactionStatus::Failed,
            "late".into(),
        );
        assert_eq!(status, TransactionStatus::Cancelled);
    }

    #[test]
    fn eviction_spares_sessions_the_store_still_names() {
        let store = Arc::new(MemorySessionStore::new());
        let registry = SessionRegistry::new().with_max_finished(2);
        registry.keep_stored(store.clone());

        let kept = SessionId::from("kept");
        registry.begin(&kept, "ping", info());
        registry.advance(&kept, TransactionStatus::Confirmed, None);
        store.set(SessionType::PingPongFlow, kept.clone());

        for n in 0..5 {
            let id = SessionId(format!("S{n}"));
            registry.begin(&id, "vote", info());
            registry.advance(&id, TransactionStatus::Confirmed, None);
        }

        assert_eq!(registry.status(&kept), TransactionStatus::Confirmed);
        assert_eq!(registry.status(&SessionId::from("S4")), TransactionStatus::Confirmed);
        assert_eq!(registry.status(&SessionId::from("S0")), TransactionStatus::None);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn handles_on_one_file_merge_their_sessions() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("registry.json");
        let first = SessionRegistry::open(&path).unwrap();
        let second = SessionRegistry::open(&path).unwrap();

        let a = SessionId::from("a");
        let b = SessionId::from("b");
        first.begin(&a, "vote", info());
        first.record_broadcast(&a, "vote", &info(), vec![TxHash("ha".into())]);
        second.begin(&b, "endElection", info());
        second.record_broadcast(&b, "endElection", &info(), vec![TxHash("hb".into())]);

        let reopened = SessionRegistry::open(&path).unwrap();
        assert_eq!(reopened.get(&a).unwrap().hashes, vec![TxHash("ha".into())]);
        assert_eq!(reopened.get(&b).unwrap().hashes, vec![TxHash("hb".into())]);
    }

    #[test]
    fn other_handles_do_not_cancel_a_session_being_signed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("registry.json");
        let signing = SessionRegistry::open(&path).unwrap();
        let id = SessionId::from("waiting");
        signing.begin(&id, "vote", info());

        // A second process sees it as abandoned but leaves the file alone.
        let watcher = SessionRegistry::open(&path).unwrap();
        assert_eq!(watcher.status(&id), TransactionStatus::Cancelled);

        signing.advance(&id, TransactionStatus::Signed, None);
        signing.record_broadcast(&id, "vote", &info(), vec![TxHash("h".into())]);
        assert_eq!(signing.status(&id), TransactionStatus::Broadcast);
    }
}
