//! Offline write queue and reconciliation core for the route checklist client.
//!
//! This crate defines the pieces shared by every host of the queue:
//! - `KeyValueStore`: durable storage for the pending sequences
//! - `ConnectivityMonitor`: online/offline transitions
//! - `SubmissionClient`: remote creation of notas and paletes
//! - `OfflineQueue`: enqueue, count, and drain orchestration
//! - `SyncStatus`: read-only status for UI consumers

mod connectivity;
mod error;
mod queue;
mod record;
mod status;
mod store;
mod submit;

pub use connectivity::{
    ConnectivityHub, ConnectivityMonitor, ConnectivitySubscription, ManualConnectivity,
};
pub use error::{NetworkError, StorageError};
pub use queue::{
    CaptureOutcome, DrainPolicy, DrainReport, KindReport, OfflineQueue, QueueListener,
    QueueOptions,
};
pub use record::{
    decode_batch, encode_batch, Avaria, Nota, Palete, QueueRecord, RecordKind, SimNao, Tipologia,
    PALLET_WITHOUT_FLAG,
};
pub use status::{OfflineCount, StatusLabel, StatusView, SyncState, SyncStatus};
pub use store::{KeyValueStore, MemoryStore};
pub use submit::{ServerRecord, SubmissionClient};
