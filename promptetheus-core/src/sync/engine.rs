use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use sqlx::SqlitePool;

use super::error::ReplayError;
use super::scheduler::Scheduler;
use crate::connectivity::ConnectivityMonitor;
use crate::models::{
    DraftDocument, HttpMethod, MalformedOperation, NewOperation, OperationKind, PendingOperation,
    QueueEntry, SyncStatus,
};
use crate::store::{DraftStore, OperationStore, StoreError};
use crate::transport::HttpTransport;

/// Default period of the auto-sync timer.
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_millis(30_000);

const ALREADY_SYNCING: &str = "sync already in progress";
const OFFLINE: &str = "device is offline";

/// Outcome of one drain pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainSummary {
    pub synced: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

impl DrainSummary {
    fn rejected(reason: impl Into<String>) -> Self {
        Self {
            errors: vec![reason.into()],
            ..Self::default()
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.errors.is_empty()
    }
}

/// Clears the in-flight flag when dropped, including when a drain future is cancelled.
struct InFlightGuard<'a>(&'a AtomicBool);

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlightGuard(flag))
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn describe(kind: impl std::fmt::Display, method: impl std::fmt::Display, endpoint: &str) -> String {
    format!("{} {} {}", kind, method, endpoint)
}

/// Replays queued mutations against the remote API.
///
/// At most one drain runs at a time per engine. Operations are replayed
/// one by one in creation order and a failure never aborts the pass.
pub struct SyncEngine {
    operations: OperationStore,
    drafts: DraftStore,
    transport: Arc<dyn HttpTransport>,
    connectivity: Arc<ConnectivityMonitor>,
    scheduler: Arc<Scheduler>,
    syncing: AtomicBool,
}

impl SyncEngine {
    /// Creates the engine and registers its drain triggers with `scheduler`.
    pub fn new(
        pool: SqlitePool,
        transport: Arc<dyn HttpTransport>,
        connectivity: Arc<ConnectivityMonitor>,
        scheduler: Arc<Scheduler>,
    ) -> Arc<Self> {
        let engine = Arc::new(Self {
            operations: OperationStore::new(pool.clone()),
            drafts: DraftStore::new(pool),
            transport,
            connectivity,
            scheduler,
            syncing: AtomicBool::new(false),
        });

        let weak = Arc::downgrade(&engine);
        engine.scheduler.on_tick(move || {
            let weak = weak.clone();
            async move {
                let Some(engine) = weak.upgrade() else { return };
                if engine.connectivity.is_online() {
                    engine.drain().await;
                }
            }
        });

        let weak = Arc::downgrade(&engine);
        engine.scheduler.on_connectivity_restored(move || {
            let weak = weak.clone();
            async move {
                if let Some(engine) = weak.upgrade() {
                    engine.drain().await;
                }
            }
        });

        engine
    }

    /// Replays every queued operation once.
    pub async fn drain(&self) -> DrainSummary {
        let Some(_guard) = InFlightGuard::acquire(&self.syncing) else {
            tracing::debug!("Drain requested while another is running");
            return DrainSummary::rejected(ALREADY_SYNCING);
        };

        if !self.connectivity.is_online() {
            tracing::debug!("Skipping drain while offline");
            return DrainSummary::rejected(OFFLINE);
        }

        let entries = match self.operations.list_ordered_by_creation().await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("Failed to read pending operations: {}", e);
                return DrainSummary::rejected(format!("failed to read pending operations: {}", e));
            }
        };

        if entries.is_empty() {
            return DrainSummary::default();
        }

        tracing::info!("Replaying {} pending operation(s)", entries.len());
        let mut summary = DrainSummary::default();

        for entry in entries {
            match entry {
                QueueEntry::Ready(op) => self.replay(&op, &mut summary).await,
                QueueEntry::Malformed(op) => skip_malformed(&op, &mut summary),
            }
        }

        tracing::info!(
            synced = summary.synced,
            failed = summary.failed,
            "Drain finished"
        );
        summary
    }

    async fn replay(&self, op: &PendingOperation, summary: &mut DrainSummary) {
        let label = describe(op.kind, op.method, &op.endpoint);
        tracing::debug!(id = op.id, "Replaying {}", label);

        let outcome = match self
            .transport
            .send(op.method, &op.endpoint, op.payload.as_ref())
            .await
        {
            Ok(response) => ReplayError::from_response(&response).map_or(Ok(()), Err),
            Err(e) => Err(ReplayError::from(e)),
        };

        match outcome {
            Ok(()) => {
                summary.synced += 1;
                if let Err(e) = self.confirm(op).await {
                    tracing::warn!("Failed to clear confirmed {}: {}", label, e);
                    summary.errors.push(format!("{} failed: {}", label, e));
                }
            }
            Err(err) => {
                tracing::warn!("{} failed: {}", label, err);
                summary.failed += 1;
                summary.errors.push(format!("{} failed: {}", label, err));

                if err.discards_operation() {
                    if let Err(e) = self.discard(op).await {
                        summary.errors.push(format!("{} failed: {}", label, e));
                    }
                }
            }
        }
    }

    /// Removes a confirmed operation and settles its draft once nothing else is outstanding.
    async fn confirm(&self, op: &PendingOperation) -> Result<(), StoreError> {
        self.operations.remove(op.id).await?;

        let Some(draft_id) = &op.draft_id else {
            return Ok(());
        };
        if self.operations.count_for_draft(draft_id).await? > 0 {
            return Ok(());
        }
        // A rejection earlier in the pass keeps the draft in conflict
        if let Some(draft) = self.drafts.get(draft_id).await? {
            if draft.sync_status == SyncStatus::Pending {
                self.drafts.set_status(draft_id, SyncStatus::Synced).await?;
            }
        }
        Ok(())
    }

    async fn discard(&self, op: &PendingOperation) -> Result<(), StoreError> {
        self.operations.remove(op.id).await?;
        if let Some(draft_id) = &op.draft_id {
            self.drafts.set_status(draft_id, SyncStatus::Conflict).await?;
        }
        Ok(())
    }

    /// Starts the periodic timer. Returns false if it was already running.
    pub fn start_auto_sync(&self, interval: Duration) -> bool {
        self.scheduler.start(interval, self.connectivity.subscribe())
    }

    pub fn stop_auto_sync(&self) -> bool {
        self.scheduler.stop()
    }

    pub async fn enqueue(
        &self,
        kind: OperationKind,
        endpoint: &str,
        method: HttpMethod,
        payload: Option<Value>,
    ) -> Result<i64, StoreError> {
        let mut op = NewOperation::new(kind, method, endpoint);
        if let Some(payload) = payload {
            op = op.with_payload(payload);
        }
        let id = self.operations.enqueue(&op).await?;
        tracing::debug!(id, "Queued {}", describe(kind, method, endpoint));
        Ok(id)
    }

    /// Saves a draft locally and queues the operation that publishes it.
    pub async fn stage_draft(
        &self,
        draft: &DraftDocument,
        op: NewOperation,
    ) -> Result<i64, StoreError> {
        self.drafts.stage(draft, op).await
    }

    pub async fn pending_count(&self) -> Result<i64, StoreError> {
        self.operations.count().await
    }

    pub async fn clear_all(&self) -> Result<u64, StoreError> {
        let removed = self.operations.clear_all().await?;
        tracing::info!("Cleared {} pending operation(s)", removed);
        Ok(removed)
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::Acquire)
    }

    pub fn operations(&self) -> &OperationStore {
        &self.operations
    }

    pub fn drafts(&self) -> &DraftStore {
        &self.drafts
    }

    pub fn connectivity(&self) -> &Arc<ConnectivityMonitor> {
        &self.connectivity
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }
}

fn skip_malformed(op: &MalformedOperation, summary: &mut DrainSummary) {
    let err = ReplayError::Malformed {
        reason: op.reason.clone(),
    };
    let label = describe(&op.kind, &op.method, &op.endpoint);
    tracing::warn!(id = op.id, "{} failed: {}", label, err);
    summary.failed += 1;
    summary.errors.push(format!("{} failed: {}", label, err));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::init_store;
    use crate::testing::{Reply, ScriptedTransport};
    use serde_json::json;
    use tempfile::TempDir;

    struct TestContext {
        engine: Arc<SyncEngine>,
        transport: Arc<ScriptedTransport>,
        monitor: Arc<ConnectivityMonitor>,
        pool: SqlitePool,
        _temp_dir: TempDir,
    }

    async fn setup_engine(online: bool) -> TestContext {
        let temp_dir = TempDir::new().unwrap();
        let pool = init_store(&temp_dir.path().join("test.db")).await.unwrap();
        let transport = ScriptedTransport::new();
        let monitor = Arc::new(ConnectivityMonitor::new(online));
        let engine = SyncEngine::new(
            pool.clone(),
            transport.clone(),
            monitor.clone(),
            Arc::new(Scheduler::new()),
        );

        TestContext {
            engine,
            transport,
            monitor,
            pool,
            _temp_dir: temp_dir,
        }
    }

    async fn enqueue_create(ctx: &TestContext, endpoint: &str) -> i64 {
        ctx.engine
            .enqueue(
                OperationKind::Create,
                endpoint,
                HttpMethod::Post,
                Some(json!({ "name": endpoint })),
            )
            .await
            .unwrap()
    }

    async fn wait_until_empty(engine: &SyncEngine) -> bool {
        for _ in 0..200 {
            if engine.pending_count().await.unwrap() == 0 {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_successful_replays_empty_the_queue() {
        let ctx = setup_engine(true).await;
        for endpoint in ["/projects", "/intents", "/prompts"] {
            enqueue_create(&ctx, endpoint).await;
        }

        let summary = ctx.engine.drain().await;

        assert_eq!(summary.synced, 3);
        assert_eq!(summary.failed, 0);
        assert!(summary.is_clean());
        assert_eq!(ctx.engine.pending_count().await.unwrap(), 0);

        let endpoints: Vec<String> = ctx.transport.calls().into_iter().map(|(_, e)| e).collect();
        assert_eq!(endpoints, vec!["/projects", "/intents", "/prompts"]);
    }

    #[tokio::test]
    async fn test_empty_queue_is_clean() {
        let ctx = setup_engine(true).await;

        let summary = ctx.engine.drain().await;

        assert_eq!(summary, DrainSummary::default());
        assert_eq!(ctx.transport.call_count(), 0);
    }

    #[tokio::test]
    async fn test_client_rejection_is_removed() {
        let ctx = setup_engine(true).await;
        ctx.engine
            .enqueue(OperationKind::Delete, "/intents/9", HttpMethod::Delete, None)
            .await
            .unwrap();
        ctx.transport.reply(
            "/intents/9",
            Reply::Status(404, json!({ "error": "Intent not found" })),
        );

        let summary = ctx.engine.drain().await;

        assert_eq!(summary.synced, 0);
        assert_eq!(summary.failed, 1);
        assert_eq!(
            summary.errors,
            vec!["delete DELETE /intents/9 failed: rejected by server (404): Intent not found"]
        );
        assert_eq!(ctx.engine.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried_on_next_drain() {
        let ctx = setup_engine(true).await;
        enqueue_create(&ctx, "/projects").await;
        ctx.transport.reply("/projects", Reply::Fail);

        let first = ctx.engine.drain().await;
        assert_eq!(first.synced, 0);
        assert_eq!(first.failed, 1);
        assert!(first.errors[0].starts_with("create POST /projects failed: transient failure"));
        assert_eq!(ctx.engine.pending_count().await.unwrap(), 1);

        let second = ctx.engine.drain().await;
        assert_eq!(second.synced, 1);
        assert_eq!(second.failed, 0);
        assert_eq!(ctx.engine.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_server_error_is_retained() {
        let ctx = setup_engine(true).await;
        enqueue_create(&ctx, "/projects").await;
        ctx.transport
            .reply("/projects", Reply::Status(503, json!({ "error": "maintenance" })));

        let summary = ctx.engine.drain().await;

        assert_eq!(summary.failed, 1);
        assert!(summary.errors[0].contains("503"));
        assert_eq!(ctx.engine.pending_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failure_does_not_abort_the_pass() {
        let ctx = setup_engine(true).await;
        enqueue_create(&ctx, "/a").await;
        enqueue_create(&ctx, "/b").await;
        enqueue_create(&ctx, "/c").await;
        ctx.transport.reply("/b", Reply::Fail);

        let summary = ctx.engine.drain().await;

        assert_eq!(summary.synced, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(ctx.transport.call_count(), 3);

        let remaining = ctx.engine.operations().list_ordered_by_creation().await.unwrap();
        assert_eq!(remaining.len(), 1);
        match &remaining[0] {
            QueueEntry::Ready(op) => assert_eq!(op.endpoint, "/b"),
            other => panic!("unexpected entry {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_concurrent_drain_is_rejected() {
        let ctx = setup_engine(true).await;
        enqueue_create(&ctx, "/projects").await;
        ctx.transport.hold();

        let engine = ctx.engine.clone();
        let in_flight = tokio::spawn(async move { engine.drain().await });
        ctx.transport.wait_for_call().await;

        assert!(ctx.engine.is_syncing());
        let second = ctx.engine.drain().await;
        assert_eq!(
            second,
            DrainSummary {
                synced: 0,
                failed: 0,
                errors: vec!["sync already in progress".to_string()],
            }
        );

        ctx.transport.release();
        let first = in_flight.await.unwrap();
        assert_eq!(first.synced, 1);
        assert!(first.is_clean());
        assert!(!ctx.engine.is_syncing());
        assert_eq!(ctx.transport.call_count(), 1);
    }

    #[tokio::test]
    async fn test_stalled_send_delays_but_does_not_block_later_operations() {
        let ctx = setup_engine(true).await;
        enqueue_create(&ctx, "/stalled").await;
        enqueue_create(&ctx, "/b").await;
        enqueue_create(&ctx, "/c").await;
        ctx.transport.reply("/stalled", Reply::Timeout);
        ctx.transport.hold();

        let engine = ctx.engine.clone();
        let in_flight = tokio::spawn(async move { engine.drain().await });
        ctx.transport.wait_for_call().await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Later operations wait behind the stalled one
        assert_eq!(ctx.transport.call_count(), 1);
        assert!(ctx.engine.is_syncing());

        ctx.transport.release();
        let summary = tokio::time::timeout(Duration::from_secs(5), in_flight)
            .await
            .expect("drain finished")
            .unwrap();

        assert_eq!(summary.synced, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(
            summary.errors,
            vec!["create POST /stalled failed: transient failure: Request timed out"]
        );
        let endpoints: Vec<String> = ctx.transport.calls().into_iter().map(|(_, e)| e).collect();
        assert_eq!(endpoints, vec!["/stalled", "/b", "/c"]);

        let remaining = ctx.engine.operations().list_ordered_by_creation().await.unwrap();
        assert_eq!(remaining.len(), 1);
        match &remaining[0] {
            QueueEntry::Ready(op) => assert_eq!(op.endpoint, "/stalled"),
            other => panic!("unexpected entry {:?}", other),
        }
        assert!(!ctx.engine.is_syncing());
    }

    #[tokio::test]
    async fn test_cancelled_drain_releases_guard() {
        let ctx = setup_engine(true).await;
        enqueue_create(&ctx, "/projects").await;
        ctx.transport.hold();

        let engine = ctx.engine.clone();
        let in_flight = tokio::spawn(async move { engine.drain().await });
        ctx.transport.wait_for_call().await;
        in_flight.abort();
        let _ = in_flight.await;

        assert!(!ctx.engine.is_syncing());
        ctx.transport.release();
        let summary = ctx.engine.drain().await;
        assert_eq!(summary.synced, 1);
    }

    #[tokio::test]
    async fn test_offline_drain_makes_no_calls() {
        let ctx = setup_engine(false).await;
        enqueue_create(&ctx, "/projects").await;

        let summary = ctx.engine.drain().await;

        assert_eq!(summary.synced, 0);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.errors, vec!["device is offline"]);
        assert_eq!(ctx.transport.call_count(), 0);
        assert_eq!(ctx.engine.pending_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_operations_queued_mid_pass_wait_for_next_drain() {
        let ctx = setup_engine(true).await;
        enqueue_create(&ctx, "/first").await;
        ctx.transport.hold();

        let engine = ctx.engine.clone();
        let in_flight = tokio::spawn(async move { engine.drain().await });
        ctx.transport.wait_for_call().await;
        enqueue_create(&ctx, "/second").await;
        ctx.transport.release();

        let first = in_flight.await.unwrap();
        assert_eq!(first.synced, 1);
        assert_eq!(ctx.engine.pending_count().await.unwrap(), 1);

        let second = ctx.engine.drain().await;
        assert_eq!(second.synced, 1);
        assert_eq!(ctx.engine.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_malformed_entry_is_retained() {
        let ctx = setup_engine(true).await;
        sqlx::query(
            "INSERT INTO pending_operations (kind, endpoint, method, payload, created_at) \
             VALUES ('update', '/projects/1', 'PATCH', NULL, 0)",
        )
        .execute(&ctx.pool)
        .await
        .unwrap();
        enqueue_create(&ctx, "/projects").await;

        let summary = ctx.engine.drain().await;

        assert_eq!(summary.synced, 1);
        assert_eq!(summary.failed, 1);
        assert!(summary.errors[0].starts_with("update PATCH /projects/1 failed: cannot be replayed"));
        assert_eq!(ctx.transport.call_count(), 1);
        assert_eq!(ctx.engine.pending_count().await.unwrap(), 1);

        // Still there after another pass
        ctx.engine.drain().await;
        assert_eq!(ctx.engine.pending_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_confirmed_draft_is_marked_synced() {
        let ctx = setup_engine(true).await;
        let draft = DraftDocument::new("draft-1", "intent-4", json!({ "title": "Offline" }));
        let op = NewOperation::new(OperationKind::Update, HttpMethod::Put, "/intents/4")
            .with_payload(json!({ "title": "Offline" }));
        ctx.engine.stage_draft(&draft, op).await.unwrap();

        let summary = ctx.engine.drain().await;

        assert_eq!(summary.synced, 1);
        let stored = ctx.engine.drafts().get("draft-1").await.unwrap().unwrap();
        assert_eq!(stored.sync_status, SyncStatus::Synced);
    }

    #[tokio::test]
    async fn test_rejected_draft_is_marked_conflict() {
        let ctx = setup_engine(true).await;
        let draft = DraftDocument::new("draft-1", "intent-4", json!({ "title": "Offline" }));
        let op = NewOperation::new(OperationKind::Update, HttpMethod::Put, "/intents/4");
        ctx.engine.stage_draft(&draft, op).await.unwrap();
        ctx.transport
            .reply("/intents/4", Reply::Status(409, json!({ "error": "stale revision" })));

        let summary = ctx.engine.drain().await;

        assert_eq!(summary.failed, 1);
        let stored = ctx.engine.drafts().get("draft-1").await.unwrap().unwrap();
        assert_eq!(stored.sync_status, SyncStatus::Conflict);
        assert_eq!(ctx.engine.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_draft_stays_pending_while_operations_remain() {
        let ctx = setup_engine(true).await;
        let draft = DraftDocument::new("draft-1", "intent-4", json!({}));
        ctx.engine
            .stage_draft(
                &draft,
                NewOperation::new(OperationKind::Update, HttpMethod::Put, "/intents/4"),
            )
            .await
            .unwrap();
        ctx.engine
            .stage_draft(
                &draft,
                NewOperation::new(OperationKind::Forge, HttpMethod::Post, "/intents/4/forge"),
            )
            .await
            .unwrap();
        ctx.transport.reply("/intents/4/forge", Reply::Fail);

        let summary = ctx.engine.drain().await;

        assert_eq!(summary.synced, 1);
        assert_eq!(summary.failed, 1);
        let stored = ctx.engine.drafts().get("draft-1").await.unwrap().unwrap();
        assert_eq!(stored.sync_status, SyncStatus::Pending);
    }

    #[tokio::test]
    async fn test_clear_all() {
        let ctx = setup_engine(true).await;
        enqueue_create(&ctx, "/a").await;
        enqueue_create(&ctx, "/b").await;

        assert_eq!(ctx.engine.clear_all().await.unwrap(), 2);
        assert_eq!(ctx.engine.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_tick_drains_only_when_online() {
        let ctx = setup_engine(false).await;
        enqueue_create(&ctx, "/projects").await;

        ctx.engine.scheduler().tick().await;
        assert_eq!(ctx.transport.call_count(), 0);

        ctx.monitor.set_online(true);
        ctx.engine.scheduler().tick().await;
        assert_eq!(ctx.transport.call_count(), 1);
        assert_eq!(ctx.engine.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_connectivity_restored_trigger_drains() {
        let ctx = setup_engine(true).await;
        enqueue_create(&ctx, "/projects").await;

        ctx.engine.scheduler().connectivity_restored().await;

        assert_eq!(ctx.engine.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_start_auto_sync_is_idempotent() {
        let ctx = setup_engine(true).await;

        assert!(ctx.engine.start_auto_sync(Duration::from_secs(3600)));
        assert!(!ctx.engine.start_auto_sync(Duration::from_secs(3600)));
        assert!(ctx.engine.stop_auto_sync());
        assert!(!ctx.engine.stop_auto_sync());
    }

    #[tokio::test]
    async fn test_auto_sync_timer_drains() {
        let ctx = setup_engine(true).await;
        enqueue_create(&ctx, "/projects").await;

        ctx.engine.start_auto_sync(Duration::from_millis(20));

        assert!(wait_until_empty(&ctx.engine).await);
        ctx.engine.stop_auto_sync();
    }

    #[tokio::test]
    async fn test_reconnect_drains_without_waiting_for_timer() {
        let ctx = setup_engine(false).await;
        enqueue_create(&ctx, "/projects").await;
        ctx.engine.start_auto_sync(Duration::from_secs(3600));

        ctx.monitor.set_online(true);

        assert!(wait_until_empty(&ctx.engine).await);
        ctx.engine.stop_auto_sync();
    }
}
