use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::models::outbox::{OutboxItem, OutboxKind, OutboxStatus};
use crate::outbox::store::OutboxStore;

#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    /// Case-insensitive match on customer name, phone, destination or
    /// tracking code. Blank matches everything.
    pub search: String,
    pub status: Option<OutboxStatus>,
}

impl ListQuery {
    fn matches(&self, item: &OutboxItem) -> bool {
        if self.status.is_some_and(|status| status != item.status) {
            return false;
        }

        let needle = self.search.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }

        let tracking_code = item.server.as_ref().map(|server| server.tracking_code.as_str());
        [
            Some(item.payload.customer_name.as_str()),
            Some(item.payload.phone.as_str()),
            Some(item.payload.destination.as_str()),
            tracking_code,
        ]
        .into_iter()
        .flatten()
        .any(|field| field.to_lowercase().contains(&needle))
    }
}

#[derive(Debug, Clone, Default)]
pub struct ListSnapshot {
    /// Request number that produced these items; 0 before the first load.
    pub generation: u64,
    pub items: Vec<OutboxItem>,
}

/// Debounced outbox list reloads where the latest request wins.
///
/// Issuing a request cancels any earlier one still waiting or loading, and
/// a superseded load never publishes its result.
pub struct ListRefresher {
    store: OutboxStore,
    debounce: Duration,
    generation: AtomicU64,
    current: Mutex<Option<CancellationToken>>,
    snapshot: watch::Sender<ListSnapshot>,
}

impl ListRefresher {
    pub fn new(store: OutboxStore, debounce: Duration) -> Arc<Self> {
        let (snapshot, _) = watch::channel(ListSnapshot::default());
        Arc::new(Self {
            store,
            debounce,
            generation: AtomicU64::new(0),
            current: Mutex::new(None),
            snapshot,
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<ListSnapshot> {
        self.snapshot.subscribe()
    }

    pub fn latest(&self) -> ListSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn request(self: &Arc<Self>, query: ListQuery) -> JoinHandle<()> {
        let token = CancellationToken::new();
        let generation = {
            let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(previous) = current.replace(token.clone()) {
                previous.cancel();
            }
            self.generation.fetch_add(1, Ordering::SeqCst) + 1
        };

        let refresher = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(refresher.debounce) => {}
            }

            let loaded = tokio::select! {
                _ = token.cancelled() => return,
                loaded = refresher.store.list(Some(OutboxKind::IntakeCreate)) => loaded,
            };

            let items = match loaded {
                Ok(items) => items.into_iter().filter(|item| query.matches(item)).collect(),
                Err(err) => {
                    warn!(error = %err, "outbox list reload failed");
                    return;
                }
            };

            // Checked under the same lock a newer request takes to cancel us.
            let current = refresher.current.lock().unwrap_or_else(PoisonError::into_inner);
            if token.is_cancelled() {
                return;
            }
            refresher.snapshot.send_replace(ListSnapshot { generation, items });
            drop(current);
        })
    }
}
