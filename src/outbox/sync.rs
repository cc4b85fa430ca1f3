use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use dashmap::DashSet;
use serde_json::Value;
use tokio::sync::{broadcast, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SyncSettings;
use crate::engine::normalize::normalize_intake;
use crate::engine::validate::validate_intake;
use crate::models::outbox::{
    Attachment, OutboxItem, OutboxKind, OutboxPatch, OutboxStatus, ServerResult,
};
use crate::outbox::auto_sync::AutoSyncTrigger;
use crate::outbox::store::OutboxStore;
use crate::outbox::transport::{HttpIntakeTransport, IntakeTransport};
use crate::outbox::OutboxError;

const INTERRUPTED_MESSAGE: &str = "Sync was interrupted before the server replied; retry to resubmit";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Offline,
    InFlight,
    NotFound,
    AlreadySynced,
    BatchInProgress,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncAttempt {
    /// The submission ran; the entry is now `synced` or `failed`.
    Completed(OutboxItem),
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub synced: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Connectivity was lost part-way through.
    pub interrupted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchRun {
    Ran(BatchReport),
    Skipped(SkipReason),
}

/// Removes the entry id from the in-flight set when dropped.
struct InFlightGuard {
    set: Arc<DashSet<Uuid>>,
    id: Uuid,
}

impl InFlightGuard {
    fn acquire(set: &Arc<DashSet<Uuid>>, id: Uuid) -> Option<Self> {
        set.insert(id).then(|| Self {
            set: Arc::clone(set),
            id,
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set.remove(&self.id);
    }
}

/// Drives outbox entries through `pending → syncing → synced | failed`.
///
/// At most one submission per entry is in flight. Batch passes run entries
/// one after another and never overlap: an auto pass that finds another
/// pass running skips, while a manual pass waits its turn. Once started, a submission always runs to completion
/// and records its outcome, even if the caller stops waiting.
pub struct SyncEngine {
    store: OutboxStore,
    transport: Arc<dyn IntakeTransport>,
    online: AtomicBool,
    in_flight: Arc<DashSet<Uuid>>,
    batch: AsyncMutex<()>,
    trigger: Mutex<AutoSyncTrigger>,
    auto_task: Mutex<Option<JoinHandle<()>>>,
    auto_sync_debounce: Duration,
    updates: broadcast::Sender<OutboxItem>,
}

impl SyncEngine {
    pub fn new(
        store: OutboxStore,
        transport: Arc<dyn IntakeTransport>,
        auto_sync_debounce: Duration,
        online: bool,
    ) -> Arc<Self> {
        let (updates, _) = broadcast::channel(64);
        Arc::new(Self {
            store,
            transport,
            online: AtomicBool::new(online),
            in_flight: Arc::new(DashSet::new()),
            batch: AsyncMutex::new(()),
            trigger: Mutex::new(AutoSyncTrigger::new(online)),
            auto_task: Mutex::new(None),
            auto_sync_debounce,
            updates,
        })
    }

    /// Opens the on-device outbox and submits over HTTP as `user_id`.
    /// Entries a previous process left `syncing` are marked `failed`.
    pub async fn open(settings: &SyncSettings, user_id: &str, online: bool) -> Result<Arc<Self>, OutboxError> {
        if let Some(parent) = settings.outbox_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| OutboxError::Storage(format!("{}: {err}", parent.display())))?;
        }
        let store = OutboxStore::open(&settings.outbox_path).await?;
        let transport = Arc::new(HttpIntakeTransport::new(
            settings.intake_endpoint.clone(),
            user_id,
        ));

        let engine = Self::new(store, transport, settings.auto_sync_debounce, online);
        engine.recover_interrupted().await?;
        Ok(engine)
    }

    pub fn store(&self) -> &OutboxStore {
        &self.store
    }

    /// Every entry change the engine makes is broadcast here.
    pub fn subscribe(&self) -> broadcast::Receiver<OutboxItem> {
        self.updates.subscribe()
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    fn trigger(&self) -> MutexGuard<'_, AutoSyncTrigger> {
        self.trigger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, item: &OutboxItem) {
        let _ = self.updates.send(item.clone());
    }

    pub async fn recover_interrupted(&self) -> Result<usize, OutboxError> {
        let recovered = self.store.fail_interrupted(INTERRUPTED_MESSAGE).await?;
        if recovered > 0 {
            warn!(recovered, "interrupted outbox submissions marked failed");
        }
        Ok(recovered)
    }

    /// Normalizes and validates raw form input, queues it as `pending`, and
    /// submits it right away when online.
    pub async fn save(
        self: &Arc<Self>,
        form: &Value,
        photos: Vec<Attachment>,
        signature: Option<Attachment>,
    ) -> Result<OutboxItem, OutboxError> {
        let payload = normalize_intake(form);
        validate_intake(&payload)?;

        let item = OutboxItem::pending(payload, photos, signature);
        self.store.put(&item).await?;
        self.publish(&item);
        info!(outbox_id = %item.id, "field intake queued");

        if self.is_online() {
            let engine = Arc::clone(self);
            let id = item.id;
            tokio::spawn(async move {
                if let Err(err) = engine.sync_one(id).await {
                    warn!(outbox_id = %id, error = %err, "immediate sync failed");
                }
            });
        }

        Ok(item)
    }

    pub async fn sync_one(self: &Arc<Self>, id: Uuid) -> Result<SyncAttempt, OutboxError> {
        if !self.is_online() {
            return Ok(SyncAttempt::Skipped(SkipReason::Offline));
        }
        let Some(guard) = InFlightGuard::acquire(&self.in_flight, id) else {
            debug!(outbox_id = %id, "submission already in flight");
            return Ok(SyncAttempt::Skipped(SkipReason::InFlight));
        };

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let _guard = guard;
            engine.submit(id).await
        })
        .await
        .map_err(|err| OutboxError::Interrupted(err.to_string()))?
    }

    async fn submit(&self, id: Uuid) -> Result<SyncAttempt, OutboxError> {
        let Some(item) = self.store.get(id).await? else {
            return Ok(SyncAttempt::Skipped(SkipReason::NotFound));
        };
        if item.status == OutboxStatus::Synced {
            return Ok(SyncAttempt::Skipped(SkipReason::AlreadySynced));
        }
        if item.status == OutboxStatus::Syncing {
            // Nobody holds the in-flight guard, so an earlier run was cut off.
            self.store.patch(id, OutboxPatch::failed(INTERRUPTED_MESSAGE)).await?;
        }

        let Some(item) = self.store.patch(id, OutboxPatch::syncing()).await? else {
            return Ok(SyncAttempt::Skipped(SkipReason::NotFound));
        };
        self.publish(&item);

        let patch = match self.transport.submit(&item).await {
            Ok(ack) => {
                if let Some(asset_error) = &ack.asset_error {
                    warn!(outbox_id = %id, error = %asset_error, "server kept shipment without all assets");
                }
                info!(
                    outbox_id = %id,
                    tracking_code = %ack.tracking_code,
                    duplicate = ack.duplicate,
                    "outbox entry synced"
                );
                OutboxPatch::synced(
                    ServerResult {
                        shipment_id: ack.shipment_id,
                        tracking_code: ack.tracking_code,
                    },
                    ack.asset_error,
                )
            }
            Err(err) => {
                warn!(outbox_id = %id, error = %err, "outbox entry failed to sync");
                OutboxPatch::failed(err.to_string())
            }
        };

        match self.store.patch(id, patch).await? {
            Some(item) => {
                self.publish(&item);
                Ok(SyncAttempt::Completed(item))
            }
            None => Ok(SyncAttempt::Skipped(SkipReason::NotFound)),
        }
    }

    /// Manual batch: every `pending` entry, plus `failed` ones when asked.
    /// Cancels any armed auto-sync and waits for a pass already running.
    pub async fn sync_all(self: &Arc<Self>, include_failed: bool) -> Result<BatchRun, OutboxError> {
        self.trigger().disarm();
        let _batch = self.batch.lock().await;
        self.run_batch(include_failed).await
    }

    /// Auto-sync pass over `pending` entries; skips if a pass is running.
    async fn auto_batch(self: &Arc<Self>) -> Result<BatchRun, OutboxError> {
        let Ok(_batch) = self.batch.try_lock() else {
            debug!("auto-sync skipped, batch already running");
            return Ok(BatchRun::Skipped(SkipReason::BatchInProgress));
        };
        self.run_batch(false).await
    }

    /// Callers hold the batch lock.
    async fn run_batch(self: &Arc<Self>, include_failed: bool) -> Result<BatchRun, OutboxError> {
        if !self.is_online() {
            return Ok(BatchRun::Skipped(SkipReason::Offline));
        }

        let mut queue = self.store.list(Some(OutboxKind::IntakeCreate)).await?;
        queue.retain(|item| {
            item.status == OutboxStatus::Pending
                || (include_failed && item.status == OutboxStatus::Failed)
        });
        queue.reverse();

        let mut report = BatchReport::default();
        for item in queue {
            if !self.is_online() {
                report.interrupted = true;
                break;
            }
            match self.sync_one(item.id).await? {
                SyncAttempt::Completed(done) if done.status == OutboxStatus::Synced => report.synced += 1,
                SyncAttempt::Completed(_) => report.failed += 1,
                SyncAttempt::Skipped(_) => report.skipped += 1,
            }
        }

        info!(
            synced = report.synced,
            failed = report.failed,
            skipped = report.skipped,
            "outbox batch finished"
        );
        Ok(BatchRun::Ran(report))
    }

    /// Connectivity report from the platform. An offline → online change
    /// arms one debounced auto-sync pass over `pending` entries.
    pub fn set_online(self: &Arc<Self>, online: bool) {
        self.online.store(online, Ordering::SeqCst);
        if !self.trigger().on_connectivity(online) {
            return;
        }

        debug!("auto-sync armed");
        let engine = Arc::clone(self);
        let task = tokio::spawn(async move {
            tokio::time::sleep(engine.auto_sync_debounce).await;
            let fire = engine.trigger().begin_fire();
            if !fire {
                return;
            }
            info!("auto-sync firing");
            if let Err(err) = engine.auto_batch().await {
                warn!(error = %err, "auto-sync pass failed");
            }
            engine.trigger().finish();
        });

        let mut slot = self.auto_task.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(task);
    }

    /// Waits for the most recently armed auto-sync pass, if any.
    pub async fn wait_for_auto_sync(&self) {
        let task = self
            .auto_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}
