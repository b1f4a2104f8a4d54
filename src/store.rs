//! Durable state behind the tracking pipeline: the session record and the
//! ordered queue of locations awaiting upload.
//!
//! Every method is one atomic step. Read-modify-write sequences that span
//! the session and the queue (`accept_fix`, `replace_session`, `clear_all`)
//! are single calls so a background batch can never interleave with them.

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::classifier::{FixOutcome, MovementClassifier};
use crate::error::StoreError;
use crate::models::{LocationFix, QueuedLocation, TrackingSession};

pub type SessionUpdate = Box<dyn FnOnce(&mut TrackingSession) + Send>;

/// A queued location together with its store-assigned position.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingLocation {
    pub id: i64,
    pub item: QueuedLocation,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn load_session(&self) -> Result<Option<TrackingSession>, StoreError>;

    /// Supersedes any stored session and appends `first_item` with it.
    async fn replace_session(
        &self,
        session: &TrackingSession,
        first_item: Option<&QueuedLocation>,
    ) -> Result<(), StoreError>;

    /// Applies `apply` to the stored session, if any, and returns the result.
    async fn update_session(
        &self,
        apply: SessionUpdate,
    ) -> Result<Option<TrackingSession>, StoreError>;

    /// Removes the session and every pending location.
    async fn clear_all(&self) -> Result<(), StoreError>;

    /// Classifies `fix` against the active session's last fix; on accept
    /// updates the session and appends the tracking item.
    async fn accept_fix(
        &self,
        fix: &LocationFix,
        classifier: &MovementClassifier,
    ) -> Result<FixOutcome, StoreError>;

    async fn push_location(&self, item: &QueuedLocation) -> Result<i64, StoreError>;

    /// All pending locations in enqueue order.
    async fn pending_locations(&self) -> Result<Vec<PendingLocation>, StoreError>;

    async fn remove_location(&self, id: i64) -> Result<(), StoreError>;

    async fn clear_locations(&self) -> Result<(), StoreError>;

    async fn count_locations(&self) -> Result<usize, StoreError>;
}

/// Refuses items whose fix would not decode again once serialized.
pub fn check_storable(item: &QueuedLocation) -> Result<(), StoreError> {
    if item.fix.is_well_formed() {
        return Ok(());
    }
    Err(StoreError::InvalidItem(format!(
        "{} fix at ({}, {}) with accuracy {}",
        item.kind, item.fix.latitude, item.fix.longitude, item.fix.accuracy
    )))
}

#[derive(Default)]
struct MemoryState {
    session: Option<TrackingSession>,
    queue: Vec<PendingLocation>,
    next_id: i64,
    fail_writes: bool,
}

impl MemoryState {
    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes {
            return Err(StoreError::Unavailable("writes disabled".to_string()));
        }
        Ok(())
    }

    fn push(&mut self, item: &QueuedLocation) -> i64 {
        self.next_id += 1;
        self.queue.push(PendingLocation {
            id: self.next_id,
            item: item.clone(),
        });
        self.next_id
    }
}

/// Process-local store. Survives component re-creation but not process
/// death; hosts that need durability use `db::SqliteStore`.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent write fail, to exercise error propagation.
    pub async fn set_fail_writes(&self, fail: bool) {
        self.state.lock().await.fail_writes = fail;
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn load_session(&self) -> Result<Option<TrackingSession>, StoreError> {
        Ok(self.state.lock().await.session.clone())
    }

    async fn replace_session(
        &self,
        session: &TrackingSession,
        first_item: Option<&QueuedLocation>,
    ) -> Result<(), StoreError> {
        if let Some(item) = first_item {
            check_storable(item)?;
        }
        let mut state = self.state.lock().await;
        state.check_writable()?;
        state.session = Some(session.clone());
        if let Some(item) = first_item {
            state.push(item);
        }
        Ok(())
    }

    async fn update_session(
        &self,
        apply: SessionUpdate,
    ) -> Result<Option<TrackingSession>, StoreError> {
        let mut state = self.state.lock().await;
        state.check_writable()?;
        Ok(state.session.as_mut().map(|session| {
            apply(session);
            session.clone()
        }))
    }

    async fn clear_all(&self) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.check_writable()?;
        state.session = None;
        state.queue.clear();
        Ok(())
    }

    async fn accept_fix(
        &self,
        fix: &LocationFix,
        classifier: &MovementClassifier,
    ) -> Result<FixOutcome, StoreError> {
        let mut state = self.state.lock().await;
        let Some(mut session) = state.session.clone().filter(|s| s.is_active) else {
            return Ok(FixOutcome::NoSession);
        };

        let outcome = classifier.apply(&mut session, fix);
        if let FixOutcome::Queued(item, _) = &outcome {
            check_storable(item)?;
            state.check_writable()?;
            state.push(item);
            state.session = Some(session);
        }
        Ok(outcome)
    }

    async fn push_location(&self, item: &QueuedLocation) -> Result<i64, StoreError> {
        check_storable(item)?;
        let mut state = self.state.lock().await;
        state.check_writable()?;
        Ok(state.push(item))
    }

    async fn pending_locations(&self) -> Result<Vec<PendingLocation>, StoreError> {
        Ok(self.state.lock().await.queue.clone())
    }

    async fn remove_location(&self, id: i64) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.check_writable()?;
        state.queue.retain(|entry| entry.id != id);
        Ok(())
    }

    async fn clear_locations(&self) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.check_writable()?;
        state.queue.clear();
        Ok(())
    }

    async fn count_locations(&self) -> Result<usize, StoreError> {
        Ok(self.state.lock().await.queue.len())
    }
}
