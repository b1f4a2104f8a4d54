use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::classifier::{FixOutcome, MovementClassifier};
use crate::config::TrackingConfig;
use crate::error::StoreError;
use crate::models::{LocationFix, TrackingSession};
use crate::queue::{DurableQueue, FlushReport};
use crate::sampler::within_accuracy;
use crate::store::Store;
use crate::uplink::Uplink;

/// The single path every fix takes, whether it came from the foreground
/// watch or from a background task delivery. Holds no session state of its
/// own: token, session id and last fix are read from the store on every
/// call.
pub struct FixPipeline {
    store: Arc<dyn Store>,
    queue: Arc<DurableQueue>,
    uplink: Arc<dyn Uplink>,
    classifier: MovementClassifier,
    max_accuracy_m: f64,
    auth_expired: watch::Sender<bool>,
}

impl FixPipeline {
    pub fn new(store: Arc<dyn Store>, uplink: Arc<dyn Uplink>, config: &TrackingConfig) -> Self {
        let queue = Arc::new(DurableQueue::new(store.clone()));
        let (auth_expired, _) = watch::channel(false);
        Self {
            store,
            queue,
            uplink,
            classifier: MovementClassifier::from_config(config),
            max_accuracy_m: config.max_accuracy_m,
            auth_expired,
        }
    }

    pub fn queue(&self) -> Arc<DurableQueue> {
        self.queue.clone()
    }

    pub fn subscribe_auth_expired(&self) -> watch::Receiver<bool> {
        self.auth_expired.subscribe()
    }

    pub fn clear_auth_expired(&self) {
        self.auth_expired.send_replace(false);
    }

    /// Classifies and persists one fix without flushing.
    pub async fn record_fix(&self, fix: &LocationFix) -> Result<FixOutcome, StoreError> {
        // 1. Filter noise
        if !within_accuracy(fix, self.max_accuracy_m) {
            debug!(accuracy = fix.accuracy, "Discarding inaccurate fix");
            return Ok(FixOutcome::Inaccurate);
        }

        // 2. Classify against the persisted last fix and queue atomically
        let outcome = self.store.accept_fix(fix, &self.classifier).await?;

        match &outcome {
            FixOutcome::Queued(item, classification) => {
                info!(
                    session_id = %item.session_id,
                    classification = ?classification,
                    "Tracking fix accepted"
                );
            }
            FixOutcome::Rejected(classification) => {
                debug!(classification = ?classification, "Tracking fix rejected");
            }
            FixOutcome::NoSession => {
                debug!("No active session, ignoring fix");
            }
            FixOutcome::Inaccurate => {}
        }

        Ok(outcome)
    }

    pub async fn process_fix(&self, fix: LocationFix) -> Result<FixOutcome, StoreError> {
        let outcome = self.record_fix(&fix).await?;
        if matches!(outcome, FixOutcome::Queued(..)) {
            self.flush().await?;
        }
        Ok(outcome)
    }

    /// Processes a batch in capture order and flushes once. Returns how many
    /// fixes were queued.
    pub async fn process_fixes(&self, mut fixes: Vec<LocationFix>) -> Result<usize, StoreError> {
        fixes.sort_by_key(|fix| fix.captured_at);

        let mut queued = 0;
        for fix in &fixes {
            match self.record_fix(fix).await? {
                FixOutcome::Queued(..) => queued += 1,
                FixOutcome::NoSession => break,
                _ => {}
            }
        }

        if queued > 0 {
            self.flush().await?;
        }
        Ok(queued)
    }

    /// Flushes the queue with the persisted session token.
    pub async fn flush(&self) -> Result<FlushReport, StoreError> {
        self.flush_inner(None).await
    }

    /// Flushes after waiting up to `wait` for a flush already in progress.
    pub async fn flush_waiting(&self, wait: Duration) -> Result<FlushReport, StoreError> {
        self.flush_inner(Some(wait)).await
    }

    async fn flush_inner(&self, wait: Option<Duration>) -> Result<FlushReport, StoreError> {
        let Some(session) = self.store.load_session().await? else {
            debug!("No session, nothing to flush");
            return Ok(FlushReport::default());
        };

        if session.auth_expired {
            debug!(session_id = %session.session_id, "Token expired, flush postponed");
            self.auth_expired.send_if_modified(|expired| !std::mem::replace(expired, true));
            return Ok(FlushReport {
                skipped: true,
                ..FlushReport::default()
            });
        }

        let uplink = self.uplink.as_ref();
        let report = match wait {
            Some(wait) => self.queue.flush_waiting(uplink, &session.token, wait).await?,
            None => self.queue.flush(uplink, &session.token).await?,
        };

        if report.unauthorized {
            self.mark_auth_expired(&session.session_id).await?;
        }
        Ok(report)
    }

    async fn mark_auth_expired(&self, session_id: &str) -> Result<(), StoreError> {
        let expected = session_id.to_string();
        self.store
            .update_session(Box::new(move |session: &mut TrackingSession| {
                if session.session_id == expected {
                    session.auth_expired = true;
                }
            }))
            .await?;
        self.auth_expired.send_replace(true);
        warn!(session_id, "Server rejected the session token; re-authentication required");
        Ok(())
    }
}

/// Entry point for platform background-task deliveries. Builds everything it
/// needs from its arguments, so it works in a process that was started only
/// to run the task.
pub async fn handle_background_fixes(
    store: Arc<dyn Store>,
    uplink: Arc<dyn Uplink>,
    config: &TrackingConfig,
    fixes: Vec<LocationFix>,
) -> anyhow::Result<usize> {
    if fixes.is_empty() {
        return Ok(0);
    }
    debug!("Background task delivered {} fixes", fixes.len());

    let pipeline = FixPipeline::new(store, uplink, config);
    let queued = pipeline.process_fixes(fixes).await?;
    Ok(queued)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::Classification;
    use crate::models::LocationKind;
    use crate::store::MemoryStore;
    use crate::testing::{base_time, fix_at, north_of, ScriptedUplink};
    use crate::uplink::SendOutcome;
    use chrono::Duration as ChronoDuration;

    async fn store_with_session(origin: &LocationFix) -> (Arc<MemoryStore>, TrackingSession) {
        let store = Arc::new(MemoryStore::new());
        let mut session = TrackingSession::start("tok", base_time());
        session.last_fix = Some(origin.clone());
        store.replace_session(&session, None).await.unwrap();
        (store, session)
    }

    #[tokio::test]
    async fn test_inaccurate_fix_never_reaches_classifier() {
        let origin = fix_at(4.6097, -74.0817, base_time());
        let (store, _) = store_with_session(&origin).await;
        let pipeline = FixPipeline::new(
            store.clone(),
            Arc::new(ScriptedUplink::accepting()),
            &TrackingConfig::default(),
        );

        let mut noisy = north_of(&origin, 800.0, ChronoDuration::minutes(20));
        noisy.accuracy = 350.0;
        assert_eq!(pipeline.process_fix(noisy).await.unwrap(), FixOutcome::Inaccurate);

        let session = store.load_session().await.unwrap().unwrap();
        assert_eq!(session.last_fix, Some(origin));
    }

    #[tokio::test]
    async fn test_accepted_fix_is_flushed_with_persisted_token() {
        let origin = fix_at(4.6097, -74.0817, base_time());
        let (store, session) = store_with_session(&origin).await;
        let uplink = Arc::new(ScriptedUplink::accepting());
        let pipeline = FixPipeline::new(store.clone(), uplink.clone(), &TrackingConfig::default());

        let moved = north_of(&origin, 50.0, ChronoDuration::seconds(30));
        let outcome = pipeline.process_fix(moved).await.unwrap();
        assert!(matches!(outcome, FixOutcome::Queued(_, Classification::Moving)));

        assert_eq!(uplink.tokens(), vec!["tok".to_string()]);
        let sent = uplink.delivered();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, LocationKind::Tracking);
        assert_eq!(sent[0].session_id, session.session_id);
        assert_eq!(store.count_locations().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unauthorized_marks_session_and_pauses_flushes() {
        let origin = fix_at(4.6097, -74.0817, base_time());
        let (store, _) = store_with_session(&origin).await;
        let uplink = Arc::new(ScriptedUplink::new(SendOutcome::Unauthorized));
        let pipeline = FixPipeline::new(store.clone(), uplink.clone(), &TrackingConfig::default());
        let auth = pipeline.subscribe_auth_expired();

        let moved = north_of(&origin, 50.0, ChronoDuration::seconds(30));
        pipeline.process_fix(moved).await.unwrap();

        assert!(*auth.borrow());
        assert!(store.load_session().await.unwrap().unwrap().auth_expired);
        assert_eq!(store.count_locations().await.unwrap(), 1);

        let report = pipeline.flush().await.unwrap();
        assert!(report.skipped);
        assert_eq!(uplink.attempts().len(), 1);
    }

    #[tokio::test]
    async fn test_background_batch_is_ordered_by_capture_time() {
        let origin = fix_at(4.6097, -74.0817, base_time());
        let (store, _) = store_with_session(&origin).await;
        let uplink = Arc::new(ScriptedUplink::failing());

        let a = north_of(&origin, 30.0, ChronoDuration::seconds(10));
        let b = north_of(&a, 30.0, ChronoDuration::seconds(10));
        let queued = handle_background_fixes(
            store.clone(),
            uplink,
            &TrackingConfig::default(),
            vec![b.clone(), a.clone()],
        )
        .await
        .unwrap();

        assert_eq!(queued, 2);
        let pending = store.pending_locations().await.unwrap();
        assert_eq!(pending[0].item.fix, a);
        assert_eq!(pending[1].item.fix, b);
    }

    #[tokio::test]
    async fn test_background_batch_after_logout_is_dropped() {
        let store = Arc::new(MemoryStore::new());
        let uplink = Arc::new(ScriptedUplink::accepting());
        let fix = fix_at(4.6097, -74.0817, base_time());

        let queued = handle_background_fixes(
            store.clone(),
            uplink.clone(),
            &TrackingConfig::default(),
            vec![fix],
        )
        .await
        .unwrap();

        assert_eq!(queued, 0);
        assert_eq!(store.count_locations().await.unwrap(), 0);
        assert!(uplink.attempts().is_empty());
    }
}
