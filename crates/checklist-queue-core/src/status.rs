use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;

use crate::queue::{DrainReport, OfflineQueue};

/// Process-wide transient sync flags. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SyncState {
    pub is_online: bool,
    pub is_syncing: bool,
}

/// Pending record counts, read fresh from the durable store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct OfflineCount {
    pub notas: usize,
    pub paletes: usize,
    pub total: usize,
}

impl OfflineCount {
    pub fn new(notas: usize, paletes: usize) -> Self {
        Self {
            notas,
            paletes,
            total: notas + paletes,
        }
    }
}

/// Headline shown by the status indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusLabel {
    Offline,
    Syncing,
    Pending(usize),
    Synced,
}

impl fmt::Display for StatusLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusLabel::Offline => write!(f, "Offline"),
            StatusLabel::Syncing => write!(f, "Sincronizando..."),
            StatusLabel::Pending(n) => write!(f, "{} item(s) pendente(s)", n),
            StatusLabel::Synced => write!(f, "Sincronizado"),
        }
    }
}

/// Everything the status indicator renders in one read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusView {
    pub state: SyncState,
    pub count: OfflineCount,
    pub label: StatusLabel,
    /// Whether a manual sync button should be offered.
    pub can_force_sync: bool,
}

impl StatusView {
    pub fn new(state: SyncState, count: OfflineCount) -> Self {
        let label = if !state.is_online {
            StatusLabel::Offline
        } else if state.is_syncing {
            StatusLabel::Syncing
        } else if count.total > 0 {
            StatusLabel::Pending(count.total)
        } else {
            StatusLabel::Synced
        };

        Self {
            state,
            count,
            label,
            can_force_sync: state.is_online && !state.is_syncing && count.total > 0,
        }
    }
}

/// Read-only view of the queue for UI consumers.
#[derive(Clone)]
pub struct SyncStatus {
    queue: Arc<OfflineQueue>,
}

impl SyncStatus {
    pub fn new(queue: Arc<OfflineQueue>) -> Self {
        Self { queue }
    }

    pub fn is_online(&self) -> bool {
        self.queue.state().is_online
    }

    pub fn is_syncing(&self) -> bool {
        self.queue.state().is_syncing
    }

    pub async fn offline_count(&self) -> OfflineCount {
        self.queue.count().await
    }

    pub async fn force_sync(&self) -> Option<DrainReport> {
        self.queue.force_sync().await
    }

    /// Watch flag changes; re-read counts whenever `is_syncing` drops.
    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.queue.subscribe_state()
    }

    pub async fn snapshot(&self) -> StatusView {
        let count = self.queue.count().await;
        StatusView::new(self.queue.state(), count)
    }
}
