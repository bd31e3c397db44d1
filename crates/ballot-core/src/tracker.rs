//! Live status of one session at a time.
//!
//! A [`StatusTracker`] follows a single session id. Retargeting bumps a
//! generation counter inside the watch channel and aborts the previous
//! polling task; a poll result is only published if its generation is still
//! current, so nothing observed for an old id reaches subscribers after the
//! switch. [`StatusFeed`]s are bound to the generation they subscribed under
//! and end when it changes.
//!
//! Statuses only move forward. The [`StatusLedger`] remembers the furthest
//! status observed per id, so once a session is seen in a terminal state it
//! stays there for every later lookup.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, warn};

use crate::error::{Error, Result};
use crate::gateway::{ChainTxStatus, Gateway};
use crate::registry::SessionRegistry;
use crate::session::{SessionId, lock};
use crate::wait::{Backoff, WaitFor, wait_for};

// =============================================================================
// Status state machine
// =============================================================================

/// Lifecycle of a submitted session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// No session, or a session this process knows nothing about.
    #[default]
    None,
    /// Built and waiting for a signature.
    Pending,
    Signed,
    /// Accepted by the gateway, not yet executed.
    Broadcast,
    Confirmed,
    Failed,
    Cancelled,
}

impl TransactionStatus {
    pub const ALL: [Self; 7] = [
        Self::None,
        Self::Pending,
        Self::Signed,
        Self::Broadcast,
        Self::Confirmed,
        Self::Failed,
        Self::Cancelled,
    ];

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Confirmed | Self::Failed | Self::Cancelled)
    }

    const fn rank(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Pending => 1,
            Self::Signed => 2,
            Self::Broadcast => 3,
            Self::Confirmed | Self::Failed | Self::Cancelled => 4,
        }
    }

    /// Whether moving from `self` to `next` is a forward transition.
    #[must_use]
    pub const fn can_advance_to(self, next: Self) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Pending => "pending",
            Self::Signed => "signed",
            Self::Broadcast => "broadcast",
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown transaction status: {s}"))
    }
}

// =============================================================================
// Status sources
// =============================================================================

/// Where a tracker reads the current status of a session.
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn status(&self, id: &SessionId) -> Result<TransactionStatus>;
}

/// Registry for everything up to broadcast, gateway after that.
///
/// A broadcast session is confirmed once every hash succeeded and failed as
/// soon as any hash failed. The outcome is written back to the registry.
pub struct ChainStatusSource {
    registry: Arc<SessionRegistry>,
    gateway: Arc<dyn Gateway>,
}

impl ChainStatusSource {
    pub fn new(registry: Arc<SessionRegistry>, gateway: Arc<dyn Gateway>) -> Self {
        Self { registry, gateway }
    }
}

#[async_trait]
impl StatusSource for ChainStatusSource {
    async fn status(&self, id: &SessionId) -> Result<TransactionStatus> {
        let Some(entry) = self.registry.get(id) else {
            return Ok(TransactionStatus::None);
        };
        if entry.status != TransactionStatus::Broadcast {
            return Ok(entry.status);
        }

        let mut all_executed = !entry.hashes.is_empty();
        for hash in &entry.hashes {
            match self.gateway.transaction_status(hash).await? {
                ChainTxStatus::Success => {}
                ChainTxStatus::Pending => all_executed = false,
                ChainTxStatus::Failed => {
                    debug!(session_id = %id, tx_hash = %hash, "transaction failed on chain");
                    let status = self.registry.advance(
                        id,
                        TransactionStatus::Failed,
                        Some(format!("transaction {hash} failed")),
                    );
                    return Ok(status.unwrap_or(TransactionStatus::Failed));
                }
            }
        }

        if all_executed {
            let status = self.registry.advance(id, TransactionStatus::Confirmed, None);
            return Ok(status.unwrap_or(TransactionStatus::Confirmed));
        }
        Ok(TransactionStatus::Broadcast)
    }
}

// =============================================================================
// Ledger
// =============================================================================

/// Furthest status observed per session id.
#[derive(Debug, Default)]
pub struct StatusLedger {
    seen: Mutex<HashMap<SessionId, TransactionStatus>>,
}

impl StatusLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a fresh observation in and return the effective status.
    pub fn observe(&self, id: &SessionId, status: TransactionStatus) -> TransactionStatus {
        let mut seen = lock(&self.seen);
        match seen.get_mut(id) {
            Some(known) => {
                if known.can_advance_to(status) {
                    *known = status;
                }
                *known
            }
            None => {
                if status != TransactionStatus::None {
                    seen.insert(id.clone(), status);
                }
                status
            }
        }
    }

    #[must_use]
    pub fn get(&self, id: &SessionId) -> Option<TransactionStatus> {
        lock(&self.seen).get(id).copied()
    }
}

// =============================================================================
// Tracker
// =============================================================================

#[derive(Debug, Clone, Default)]
struct Target {
    generation: u64,
    session_id: Option<SessionId>,
    status: TransactionStatus,
}

/// Follows one session id and publishes its status.
pub struct StatusTracker {
    source: Arc<dyn StatusSource>,
    ledger: Arc<StatusLedger>,
    backoff: Backoff,
    state: Arc<watch::Sender<Target>>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl StatusTracker {
    /// Tracker with no session.
    pub fn new(source: Arc<dyn StatusSource>, backoff: Backoff) -> Self {
        let (state, _) = watch::channel(Target::default());
        Self {
            source,
            ledger: Arc::new(StatusLedger::new()),
            backoff,
            state: Arc::new(state),
            poller: Mutex::new(None),
        }
    }

    /// Share a ledger with other trackers of the same process.
    #[must_use]
    pub fn with_ledger(mut self, ledger: Arc<StatusLedger>) -> Self {
        self.ledger = ledger;
        self
    }

    #[must_use]
    pub fn session_id(&self) -> Option<SessionId> {
        self.state.borrow().session_id.clone()
    }

    #[must_use]
    pub fn current(&self) -> TransactionStatus {
        self.state.borrow().status
    }

    /// Follow `session_id`, or nothing.
    ///
    /// Must be called inside a tokio runtime when tracking a session.
    pub fn track(&self, session_id: Option<SessionId>) {
        let mut poller = lock(&self.poller);
        if let Some(handle) = poller.take() {
            handle.abort();
        }

        let initial = session_id
            .as_ref()
            .and_then(|id| self.ledger.get(id))
            .unwrap_or_default();
        let mut generation = 0;
        self.state.send_modify(|target| {
            target.generation += 1;
            target.session_id.clone_from(&session_id);
            target.status = initial;
            generation = target.generation;
        });

        let Some(id) = session_id else {
            debug!(generation, "status tracker cleared");
            return;
        };
        debug!(session_id = %id, generation, status = %initial, "status tracker retargeted");
        if initial.is_terminal() {
            return;
        }

        let span = tracing::debug_span!("status_poll", session_id = %id, generation);
        let task = poll_session(
            Arc::clone(&self.source),
            Arc::clone(&self.ledger),
            Arc::clone(&self.state),
            self.backoff.clone(),
            id,
            generation,
        );
        *poller = Some(tokio::spawn(task.instrument(span)));
    }

    /// Feed bound to the session tracked right now.
    #[must_use]
    pub fn subscribe(&self) -> StatusFeed {
        let rx = self.state.subscribe();
        let (generation, session_id, status) = {
            let target = rx.borrow();
            (target.generation, target.session_id.clone(), target.status)
        };
        StatusFeed {
            rx,
            generation,
            session_id,
            finished: status.is_terminal(),
        }
    }

    /// One-shot status lookup for any id.
    pub async fn status_of(&self, id: &SessionId) -> Result<TransactionStatus> {
        if let Some(status) = self.ledger.get(id).filter(|status| status.is_terminal()) {
            return Ok(status);
        }
        let observed = self.source.status(id).await?;
        Ok(self.ledger.observe(id, observed))
    }

    /// Poll `id` with backoff until it is terminal.
    pub async fn wait_for_terminal(
        &self,
        id: &SessionId,
        timeout: Duration,
    ) -> Result<TransactionStatus> {
        let this = self;
        wait_for(
            format!("session {id} to finish"),
            move || async move {
                match this.status_of(id).await {
                    Ok(status) if status.is_terminal() => WaitFor::ready(status),
                    Ok(status) => WaitFor::not_ready(status.to_string()),
                    Err(err) => WaitFor::not_ready(format!("error: {err}")),
                }
            },
            timeout,
            &self.backoff,
        )
        .await
        .map_err(|err| Error::Timeout(err.to_string()))
    }
}

impl Drop for StatusTracker {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.poller).take() {
            handle.abort();
        }
    }
}

async fn poll_session(
    source: Arc<dyn StatusSource>,
    ledger: Arc<StatusLedger>,
    state: Arc<watch::Sender<Target>>,
    backoff: Backoff,
    id: SessionId,
    generation: u64,
) {
    let mut delay = backoff.initial;
    let mut polls = 0usize;
    loop {
        polls += 1;
        match source.status(&id).await {
            Ok(observed) => {
                let status = ledger.observe(&id, observed);
                let mut current = true;
                state.send_if_modified(|target| {
                    if target.generation != generation {
                        current = false;
                        return false;
                    }
                    if !target.status.can_advance_to(status) {
                        return false;
                    }
                    target.status = status;
                    true
                });
                if !current {
                    return;
                }
                if status.is_terminal() {
                    debug!(status = %status, polls, "session finished");
                    return;
                }
            }
            Err(err) => debug!(error = %err, polls, "status poll failed"),
        }

        if backoff.max_polls.is_some_and(|max| polls >= max) {
            warn!(polls, "status polling gave up before a terminal status");
            return;
        }
        tokio::time::sleep(delay).await;
        delay = backoff.next_delay(delay);
    }
}

// =============================================================================
// Feed
// =============================================================================

/// Status updates for one session id.
///
/// Ends after a terminal status, when the tracker retargets, or when the
/// tracker is dropped.
#[derive(Debug)]
pub struct StatusFeed {
    rx: watch::Receiver<Target>,
    generation: u64,
    session_id: Option<SessionId>,
    finished: bool,
}

impl StatusFeed {
    #[must_use]
    pub fn session_id(&self) -> Option<&SessionId> {
        self.session_id.as_ref()
    }

    /// Latest status, or `None` once the tracker moved on.
    #[must_use]
    pub fn current(&self) -> Option<TransactionStatus> {
        let target = self.rx.borrow();
        (target.generation == self.generation).then_some(target.status)
    }

    /// Next status change for this session.
    pub async fn next(&mut self) -> Option<TransactionStatus> {
        if self.finished {
            return None;
        }
        if self.rx.changed().await.is_err() {
            self.finished = true;
            return None;
        }
        let (generation, status) = {
            let target = self.rx.borrow_and_update();
            (target.generation, target.status)
        };
        if generation != self.generation {
            self.finished = true;
            return None;
        }
        if status.is_terminal() {
            self.finished = true;
        }
        Some(status)
    }

    /// Wait until the session is terminal. `Ok(None)` if the feed ended first.
    pub async fn wait_terminal(&mut self, timeout: Duration) -> Result<Option<TransactionStatus>> {
        if let Some(status) = self.current().filter(|status| status.is_terminal()) {
            return Ok(Some(status));
        }
        let wait = async {
            while let Some(status) = self.next().await {
                if status.is_terminal() {
                    return Some(status);
                }
            }
            None
        };
        tokio::time::timeout(timeout, wait).await.map_err(|_| {
            Error::Timeout(format!(
                "no terminal status within {}ms",
                timeout.as_millis()
            ))
        })
    }
}
