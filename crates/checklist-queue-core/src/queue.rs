use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::connectivity::ConnectivityMonitor;
use crate::error::{NetworkError, StorageError};
use crate::record::{decode_batch, encode_batch, QueueRecord, RecordKind};
use crate::status::{OfflineCount, SyncState};
use crate::store::KeyValueStore;
use crate::submit::{ServerRecord, SubmissionClient};

/// What happens to a kind's persisted batch once its drain loop finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DrainPolicy {
    /// Drop the whole batch, including records whose submission failed.
    #[default]
    ClearAll,
    /// Keep only the records whose submission failed, in their original order.
    RetainFailed,
}

#[derive(Debug, Clone)]
pub struct QueueOptions {
    pub drain_policy: DrainPolicy,
    /// Upper bound for a single remote submission attempt.
    pub submit_timeout: Duration,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            drain_policy: DrainPolicy::default(),
            submit_timeout: Duration::from_secs(12),
        }
    }
}

/// Outcome counts for one kind within a drain pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct KindReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Failed records written back for the next drain.
    pub retained: usize,
}

/// Summary of a completed drain pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub notas: KindReport,
    pub paletes: KindReport,
    /// Set when a storage failure cut the pass short.
    pub aborted: Option<String>,
}

impl DrainReport {
    fn begin() -> Self {
        let now = Utc::now();
        Self {
            started_at: now,
            finished_at: now,
            notas: KindReport::default(),
            paletes: KindReport::default(),
            aborted: None,
        }
    }

    pub fn kind(&self, kind: RecordKind) -> &KindReport {
        match kind {
            RecordKind::Notas => &self.notas,
            RecordKind::Paletes => &self.paletes,
        }
    }

    fn kind_mut(&mut self, kind: RecordKind) -> &mut KindReport {
        match kind {
            RecordKind::Notas => &mut self.notas,
            RecordKind::Paletes => &mut self.paletes,
        }
    }

    pub fn attempted(&self) -> usize {
        self.notas.attempted + self.paletes.attempted
    }

    pub fn failed(&self) -> usize {
        self.notas.failed + self.paletes.failed
    }
}

/// Result of capturing a record through [`OfflineQueue::capture`].
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureOutcome {
    /// Sent straight to the remote service.
    Submitted(ServerRecord),
    /// Persisted locally for a later drain.
    Enqueued,
    /// The server refused the record; it was not queued.
    Rejected(NetworkError),
}

/// Offline write queue over a durable key-value store.
///
/// Owns the `offline_notas` / `offline_paletes` keys exclusively. Public
/// operations never return errors: storage and network failures are logged
/// and collapsed into defaults. The `try_*` variants expose the underlying
/// `Result` for callers that need to tell the difference.
pub struct OfflineQueue {
    store: Arc<dyn KeyValueStore>,
    client: Arc<dyn SubmissionClient>,
    options: QueueOptions,
    state: watch::Sender<SyncState>,
    /// Re-entrancy guard: at most one drain per queue instance.
    draining: AtomicBool,
    /// Serializes read-modify-write cycles on the queue keys.
    mutation: Mutex<()>,
}

impl std::fmt::Debug for OfflineQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineQueue")
            .field("store", &self.store.backend_name())
            .field("options", &self.options)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

/// Holds the drain flag; releasing it on drop covers every exit path,
/// including a cancelled or panicking drain.
struct DrainGuard<'a> {
    queue: &'a OfflineQueue,
}

impl<'a> DrainGuard<'a> {
    fn acquire(queue: &'a OfflineQueue) -> Option<Self> {
        queue
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        queue.state.send_modify(|s| s.is_syncing = true);
        Some(Self { queue })
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.queue.draining.store(false, Ordering::Release);
        self.queue.state.send_modify(|s| s.is_syncing = false);
    }
}

impl OfflineQueue {
    /// Create a queue that considers itself offline until told otherwise.
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        client: Arc<dyn SubmissionClient>,
        options: QueueOptions,
    ) -> Self {
        let (state, _) = watch::channel(SyncState::default());
        Self {
            store,
            client,
            options,
            state,
            draining: AtomicBool::new(false),
            mutation: Mutex::new(()),
        }
    }

    pub fn options(&self) -> &QueueOptions {
        &self.options
    }

    pub fn state(&self) -> SyncState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    // =========================================================================
    // Persisted sequences
    // =========================================================================

    async fn load(&self, kind: RecordKind) -> Result<Vec<QueueRecord>, StorageError> {
        match self.store.get(kind.storage_key()).await? {
            Some(json) if !json.trim().is_empty() => decode_batch(kind, &json),
            _ => Ok(Vec::new()),
        }
    }

    /// Like `load`, but a corrupt value reads as an empty sequence.
    async fn load_lenient(&self, kind: RecordKind) -> Result<Vec<QueueRecord>, StorageError> {
        match self.load(kind).await {
            Err(StorageError::Serialization(msg)) => {
                warn!("Ignoring corrupt {} value: {}", kind.storage_key(), msg);
                Ok(Vec::new())
            }
            other => other,
        }
    }

    async fn persist(&self, kind: RecordKind, records: &[QueueRecord]) -> Result<(), StorageError> {
        if records.is_empty() {
            return self.store.remove(kind.storage_key()).await;
        }
        let json = encode_batch(kind, records)?;
        self.store.set(kind.storage_key(), &json).await
    }

    /// Append `record` to its kind's sequence, returning the new length.
    pub async fn try_enqueue(&self, record: QueueRecord) -> Result<usize, StorageError> {
        let kind = record.kind();
        let _lock = self.mutation.lock().await;

        let mut records = self.load_lenient(kind).await?;
        records.push(record);
        let json = encode_batch(kind, &records)?;
        self.store.set(kind.storage_key(), &json).await?;

        Ok(records.len())
    }

    /// Append `record` to the end of its kind's persisted sequence.
    ///
    /// A storage failure is logged and the record is lost.
    pub async fn enqueue(&self, record: QueueRecord) {
        let description = record.describe();
        match self.try_enqueue(record).await {
            Ok(len) => info!("Saved {} offline ({} pending)", description, len),
            Err(e) => error!("Failed to save {} offline: {}", description, e),
        }
    }

    pub async fn try_list_pending(&self, kind: RecordKind) -> Result<Vec<QueueRecord>, StorageError> {
        self.load(kind).await
    }

    /// Full pending sequence for `kind`, in replay order. Empty on failure.
    pub async fn list_pending(&self, kind: RecordKind) -> Vec<QueueRecord> {
        self.try_list_pending(kind).await.unwrap_or_else(|e| {
            warn!("Failed to read pending {}: {}", kind, e);
            Vec::new()
        })
    }

    pub async fn try_count(&self) -> Result<OfflineCount, StorageError> {
        let notas = self.load(RecordKind::Notas).await?.len();
        let paletes = self.load(RecordKind::Paletes).await?.len();
        Ok(OfflineCount::new(notas, paletes))
    }

    /// Pending counts read fresh from the store. All zero on failure.
    pub async fn count(&self) -> OfflineCount {
        self.try_count().await.unwrap_or_else(|e| {
            warn!("Failed to count pending records: {}", e);
            OfflineCount::default()
        })
    }

    // =========================================================================
    // Remote submission
    // =========================================================================

    async fn submit(&self, record: &QueueRecord) -> Result<ServerRecord, NetworkError> {
        let limit = self.options.submit_timeout;
        tokio::time::timeout(limit, self.client.submit(record))
            .await
            .unwrap_or_else(|_| Err(NetworkError::Timeout(limit.as_millis() as u64)))
    }

    /// Submit directly when online, otherwise queue.
    ///
    /// Unreachable-server failures fall back to the queue; a server
    /// rejection is returned so the caller can show it.
    pub async fn capture(&self, record: QueueRecord) -> CaptureOutcome {
        let record = match record {
            QueueRecord::Palete(palete) => QueueRecord::Palete(palete.normalized()),
            other => other,
        };

        if !self.state().is_online {
            self.enqueue(record).await;
            return CaptureOutcome::Enqueued;
        }

        match self.submit(&record).await {
            Ok(saved) => {
                info!("Submitted {}", record.describe());
                CaptureOutcome::Submitted(saved)
            }
            Err(e) if e.is_unreachable() => {
                warn!("Could not reach server for {}: {}", record.describe(), e);
                self.enqueue(record).await;
                CaptureOutcome::Enqueued
            }
            Err(e) => {
                warn!("Server rejected {}: {}", record.describe(), e);
                CaptureOutcome::Rejected(e)
            }
        }
    }

    // =========================================================================
    // Drain
    // =========================================================================

    /// Replay every pending record, notas first, then paletes.
    ///
    /// Returns `None` without touching the store when another drain is
    /// already running on this queue.
    pub async fn drain_and_sync(&self) -> Option<DrainReport> {
        let Some(_guard) = DrainGuard::acquire(self) else {
            debug!("Drain already in flight, skipping");
            return None;
        };

        let mut report = DrainReport::begin();
        for kind in RecordKind::DRAIN_ORDER {
            let drained = self.drain_kind(kind, report.kind_mut(kind)).await;
            if let Err(e) = drained {
                error!("Sync aborted while draining {}: {}", kind, e);
                report.aborted = Some(e.to_string());
                break;
            }
        }
        report.finished_at = Utc::now();

        if report.attempted() > 0 {
            info!(
                "Sync finished: {} attempted, {} failed",
                report.attempted(),
                report.failed()
            );
        }
        Some(report)
    }

    async fn drain_kind(&self, kind: RecordKind, report: &mut KindReport) -> Result<(), StorageError> {
        let batch = self.load_lenient(kind).await?;
        if batch.is_empty() {
            return Ok(());
        }
        info!("Syncing {} pending {}", batch.len(), kind);

        let mut failed = Vec::new();
        for record in &batch {
            report.attempted += 1;
            match self.submit(record).await {
                Ok(_) => {
                    report.succeeded += 1;
                    debug!("Synced {}", record.describe());
                }
                Err(e) => {
                    report.failed += 1;
                    error!("Failed to sync {}: {}", record.describe(), e);
                    failed.push(record.clone());
                }
            }
        }

        let keep = match self.options.drain_policy {
            DrainPolicy::ClearAll => Vec::new(),
            DrainPolicy::RetainFailed => failed,
        };
        report.retained = keep.len();
        self.settle(kind, batch.len(), keep).await
    }

    /// Remove the drained prefix, keeping `keep` plus anything enqueued
    /// while the batch was in flight.
    async fn settle(
        &self,
        kind: RecordKind,
        drained: usize,
        mut keep: Vec<QueueRecord>,
    ) -> Result<(), StorageError> {
        let _lock = self.mutation.lock().await;

        let current = self.load_lenient(kind).await?;
        let arrived = current.len().saturating_sub(drained);
        if arrived > 0 {
            debug!("{} {} enqueued during sync, keeping them", arrived, kind);
        }
        keep.extend(current.into_iter().skip(drained));

        self.persist(kind, &keep).await
    }

    /// Drain if online and idle; otherwise a no-op.
    pub async fn force_sync(&self) -> Option<DrainReport> {
        let state = self.state();
        if !state.is_online || state.is_syncing {
            debug!(
                "Force sync ignored (online={}, syncing={})",
                state.is_online, state.is_syncing
            );
            return None;
        }
        self.drain_and_sync().await
    }

    // =========================================================================
    // Connectivity
    // =========================================================================

    /// Record a reachability event; start a background drain when it brings
    /// the queue online and no drain is running.
    pub fn handle_connectivity(
        self: &Arc<Self>,
        online: bool,
    ) -> Option<JoinHandle<Option<DrainReport>>> {
        self.state.send_modify(|s| s.is_online = online);

        if !online || self.draining.load(Ordering::Acquire) {
            return None;
        }

        let queue = Arc::clone(self);
        Some(tokio::spawn(async move { queue.drain_and_sync().await }))
    }

    /// Refresh `is_online` from a one-shot probe.
    pub async fn refresh_online(&self, monitor: &dyn ConnectivityMonitor) -> bool {
        let online = monitor.probe().await;
        self.state.send_modify(|s| s.is_online = online);
        online
    }

    /// Subscribe to `monitor` and react to every event until the returned
    /// listener is shut down.
    pub fn attach(self: &Arc<Self>, monitor: &dyn ConnectivityMonitor) -> QueueListener {
        let mut subscription = monitor.subscribe();
        let queue = Arc::clone(self);
        info!("Listening for connectivity via {}", monitor.monitor_name());

        let task = tokio::spawn(async move {
            while let Some(online) = subscription.next().await {
                debug!("Connectivity changed: online={}", online);
                queue.handle_connectivity(online);
            }
            debug!("Connectivity monitor closed");
        });

        QueueListener { task: Some(task) }
    }
}

/// Active connectivity subscription of an [`OfflineQueue`].
///
/// Dropping the listener also unsubscribes.
#[derive(Debug)]
pub struct QueueListener {
    task: Option<JoinHandle<()>>,
}

impl QueueListener {
    /// Tear down the subscription and wait for the listener task to stop.
    ///
    /// A drain already started by the listener keeps running to completion.
    pub async fn shutdown(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
    }
}

impl Drop for QueueListener {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;

    use super::*;
    use crate::connectivity::ManualConnectivity;
    use crate::record::{Nota, Palete, SimNao, Tipologia};
    use crate::store::MemoryStore;

    type Responder = Box<dyn Fn(&QueueRecord) -> Result<ServerRecord, NetworkError> + Send + Sync>;

    /// Submission client with scripted answers that records every call.
    struct ScriptedClient {
        respond: Responder,
        delay: Duration,
        calls: StdMutex<Vec<QueueRecord>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl ScriptedClient {
        fn new(respond: Responder) -> Self {
            Self {
                respond,
                delay: Duration::ZERO,
                calls: StdMutex::new(Vec::new()),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }

        fn accepting() -> Self {
            Self::new(Box::new(|_: &QueueRecord| Ok(ServerRecord::accepted())))
        }

        fn failing() -> Self {
            Self::new(Box::new(|_: &QueueRecord| Err(NetworkError::from_status(500, "down"))))
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        fn calls(&self) -> Vec<QueueRecord> {
            self.calls.lock().unwrap().clone()
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl SubmissionClient for ScriptedClient {
        async fn create_nota(&self, nota: &Nota) -> Result<ServerRecord, NetworkError> {
            self.submit(&QueueRecord::Nota(nota.clone())).await
        }

        async fn create_palete(&self, palete: &Palete) -> Result<ServerRecord, NetworkError> {
            self.submit(&QueueRecord::Palete(palete.clone())).await
        }

        async fn submit(&self, record: &QueueRecord) -> Result<ServerRecord, NetworkError> {
            self.calls.lock().unwrap().push(record.clone());
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            (self.respond)(record)
        }
    }

    /// Store wrapper that counts mutations.
    #[derive(Default)]
    struct CountingStore {
        inner: MemoryStore,
        writes: AtomicUsize,
    }

    #[async_trait]
    impl KeyValueStore for CountingStore {
        fn backend_name(&self) -> &'static str {
            "counting"
        }

        async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.inner.set(key, value).await
        }

        async fn remove(&self, key: &str) -> Result<(), StorageError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.inner.remove(key).await
        }
    }

    /// Store whose writes always fail.
    #[derive(Default)]
    struct ReadOnlyStore {
        inner: MemoryStore,
    }

    #[async_trait]
    impl KeyValueStore for ReadOnlyStore {
        fn backend_name(&self) -> &'static str {
            "read-only"
        }

        async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
            self.inner.get(key).await
        }

        async fn set(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
            Err(StorageError::Io("disk full".to_string()))
        }

        async fn remove(&self, _key: &str) -> Result<(), StorageError> {
            Err(StorageError::Io("disk full".to_string()))
        }
    }

    fn nota(numero_nota: i64) -> QueueRecord {
        QueueRecord::Nota(Nota {
            numero_rota: 1,
            numero_nota,
            tipologia: Tipologia::Seco,
            conferido_por: "joao".to_string(),
            avaria: SimNao::Nao,
            avarias: vec![],
        })
    }

    fn palete(numero_pallet: &str) -> QueueRecord {
        QueueRecord::Palete(Palete {
            numero_rota: 2,
            numero_pallet: numero_pallet.to_string(),
            tipologia: Tipologia::Congelado,
            remontado: SimNao::Nao,
            conferido: SimNao::Sim,
        })
    }

    fn queue_with(
        store: Arc<dyn KeyValueStore>,
        client: Arc<ScriptedClient>,
        options: QueueOptions,
    ) -> Arc<OfflineQueue> {
        Arc::new(OfflineQueue::new(store, client, options))
    }

    fn setup(client: ScriptedClient) -> (Arc<OfflineQueue>, Arc<MemoryStore>, Arc<ScriptedClient>) {
        let store = Arc::new(MemoryStore::new());
        let client = Arc::new(client);
        let queue = queue_with(store.clone(), client.clone(), QueueOptions::default());
        (queue, store, client)
    }

    async fn wait_idle_after(queue: &OfflineQueue, client: &ScriptedClient, calls: usize) {
        let mut rx = queue.subscribe_state();
        tokio::time::timeout(
            Duration::from_secs(5),
            rx.wait_for(|s| !s.is_syncing && client.call_count() >= calls),
        )
        .await
        .expect("drain did not finish in time")
        .unwrap();
    }

    #[tokio::test]
    async fn test_enqueue_preserves_insertion_order() {
        let (queue, _store, _client) = setup(ScriptedClient::accepting());

        let expected: Vec<QueueRecord> = (1..=5).map(nota).collect();
        for record in &expected {
            queue.enqueue(record.clone()).await;
        }

        assert_eq!(queue.list_pending(RecordKind::Notas).await, expected);
        assert!(queue.list_pending(RecordKind::Paletes).await.is_empty());
    }

    #[tokio::test]
    async fn test_count_matches_persisted_state() {
        let (queue, _store, _client) = setup(ScriptedClient::accepting());

        assert_eq!(queue.count().await, OfflineCount::default());

        queue.enqueue(nota(1)).await;
        queue.enqueue(nota(2)).await;
        queue.enqueue(palete("P1")).await;

        assert_eq!(queue.count().await, OfflineCount::new(2, 1));
        assert_eq!(queue.count().await.total, 3);
    }

    #[tokio::test]
    async fn test_drain_with_nothing_pending_is_a_no_op() {
        let store = Arc::new(CountingStore::default());
        let client = Arc::new(ScriptedClient::accepting());
        let queue = queue_with(store.clone(), client.clone(), QueueOptions::default());
        let mut rx = queue.subscribe_state();

        let report = queue.drain_and_sync().await.unwrap();

        assert_eq!(report.attempted(), 0);
        assert_eq!(store.writes.load(Ordering::SeqCst), 0);
        assert_eq!(client.call_count(), 0);
        assert!(!queue.state().is_syncing);
        // The flag went up and came back down
        assert!(rx.has_changed().unwrap());
        assert!(!rx.borrow_and_update().is_syncing);
    }

    #[tokio::test]
    async fn test_concurrent_force_sync_runs_one_pass() {
        let (queue, _store, client) =
            setup(ScriptedClient::accepting().with_delay(Duration::from_millis(20)));
        queue.enqueue(nota(1)).await;
        queue.enqueue(nota(2)).await;
        queue.enqueue(palete("P1")).await;
        queue.state.send_modify(|s| s.is_online = true);

        let (first, second) = tokio::join!(queue.force_sync(), queue.force_sync());

        assert!(first.is_some() ^ second.is_some());
        assert_eq!(client.call_count(), 3);
        assert_eq!(client.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(queue.count().await.total, 0);
    }

    #[tokio::test]
    async fn test_force_sync_requires_online() {
        let (queue, _store, client) = setup(ScriptedClient::accepting());
        queue.enqueue(nota(1)).await;

        assert!(queue.force_sync().await.is_none());
        assert_eq!(client.call_count(), 0);
        assert_eq!(queue.count().await.notas, 1);
    }

    #[tokio::test]
    async fn test_offline_nota_synced_when_connectivity_returns() {
        let (queue, store, client) = setup(ScriptedClient::accepting());
        let monitor = ManualConnectivity::new(false);
        let listener = queue.attach(&monitor);

        let record = QueueRecord::Nota(Nota {
            numero_rota: 1,
            numero_nota: 100,
            tipologia: Tipologia::Seco,
            conferido_por: "maria".to_string(),
            avaria: SimNao::Nao,
            avarias: vec![],
        });
        queue.enqueue(record.clone()).await;
        assert_eq!(queue.count().await.notas, 1);

        monitor.set_online(true);
        wait_idle_after(&queue, &client, 1).await;

        assert_eq!(client.calls(), vec![record]);
        assert!(store.get("offline_notas").await.unwrap().is_none());
        assert_eq!(queue.count().await.notas, 0);
        assert!(queue.state().is_online);

        listener.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_paletes_are_cleared_by_default() {
        let (queue, store, client) = setup(ScriptedClient::failing());
        queue.enqueue(palete("P1")).await;
        queue.enqueue(palete("P2")).await;

        queue.handle_connectivity(true).unwrap().await.unwrap();

        assert_eq!(client.call_count(), 2);
        assert!(store.get("offline_paletes").await.unwrap().is_none());
        assert_eq!(queue.count().await.paletes, 0);
    }

    #[tokio::test]
    async fn test_retain_failed_policy_keeps_failures() {
        let store = Arc::new(MemoryStore::new());
        let client = Arc::new(ScriptedClient::new(Box::new(|record: &QueueRecord| match record {
            QueueRecord::Palete(p) if p.numero_pallet == "P2" => {
                Err(NetworkError::Transport("connection reset".into()))
            }
            _ => Ok(ServerRecord::accepted()),
        })));
        let options = QueueOptions {
            drain_policy: DrainPolicy::RetainFailed,
            ..QueueOptions::default()
        };
        let queue = queue_with(store, client.clone(), options);

        for id in ["P1", "P2", "P3"] {
            queue.enqueue(palete(id)).await;
        }
        queue.enqueue(nota(7)).await;

        let report = queue.handle_connectivity(true).unwrap().await.unwrap().unwrap();

        assert_eq!(report.notas.succeeded, 1);
        assert_eq!(report.paletes.attempted, 3);
        assert_eq!(report.paletes.failed, 1);
        assert_eq!(report.paletes.retained, 1);
        assert_eq!(queue.list_pending(RecordKind::Paletes).await, vec![palete("P2")]);
        assert_eq!(queue.count().await, OfflineCount::new(0, 1));
    }

    #[tokio::test]
    async fn test_corrupt_value_counts_as_empty() {
        let (queue, store, client) = setup(ScriptedClient::accepting());
        store.set("offline_notas", "{not json").await.unwrap();

        assert_eq!(queue.count().await, OfflineCount::default());
        assert!(queue.list_pending(RecordKind::Notas).await.is_empty());
        assert!(queue.try_count().await.is_err());

        // Paletes still drain past the corrupt notas value
        queue.enqueue(palete("P1")).await;
        let report = queue.handle_connectivity(true).unwrap().await.unwrap().unwrap();
        assert_eq!(report.notas.attempted, 0);
        assert_eq!(report.paletes.succeeded, 1);
        assert!(report.aborted.is_none());
        assert_eq!(client.call_count(), 1);

        // The next enqueue replaces the corrupt value
        queue.enqueue(nota(1)).await;
        assert_eq!(queue.list_pending(RecordKind::Notas).await, vec![nota(1)]);
    }

    #[tokio::test]
    async fn test_drain_order_notas_before_paletes() {
        let (queue, _store, client) = setup(ScriptedClient::accepting());
        queue.enqueue(palete("P1")).await;
        queue.enqueue(nota(1)).await;
        queue.enqueue(palete("P2")).await;
        queue.enqueue(nota(2)).await;

        queue.handle_connectivity(true).unwrap().await.unwrap();

        assert_eq!(client.calls(), vec![nota(1), nota(2), palete("P1"), palete("P2")]);
    }

    #[tokio::test]
    async fn test_enqueue_during_drain_is_kept() {
        let (queue, _store, client) =
            setup(ScriptedClient::accepting().with_delay(Duration::from_millis(100)));
        queue.enqueue(nota(1)).await;

        let drain = queue.handle_connectivity(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while client.call_count() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        queue.enqueue(nota(2)).await;

        drain.await.unwrap();

        assert_eq!(client.calls(), vec![nota(1)]);
        assert_eq!(queue.list_pending(RecordKind::Notas).await, vec![nota(2)]);
    }

    #[tokio::test]
    async fn test_submission_timeout_counts_as_failure() {
        let store = Arc::new(MemoryStore::new());
        let client = Arc::new(ScriptedClient::accepting().with_delay(Duration::from_secs(5)));
        let options = QueueOptions {
            drain_policy: DrainPolicy::RetainFailed,
            submit_timeout: Duration::from_millis(50),
        };
        let queue = queue_with(store, client, options);
        queue.enqueue(nota(1)).await;

        let report = queue.handle_connectivity(true).unwrap().await.unwrap().unwrap();

        assert_eq!(report.notas.failed, 1);
        assert_eq!(queue.count().await.notas, 1);
        assert!(!queue.state().is_syncing);
    }

    #[tokio::test]
    async fn test_offline_transition_does_not_drain() {
        let (queue, _store, client) = setup(ScriptedClient::accepting());
        queue.enqueue(nota(1)).await;

        assert!(queue.handle_connectivity(false).is_none());
        assert!(!queue.state().is_online);
        assert_eq!(client.call_count(), 0);
    }

    #[tokio::test]
    async fn test_flapping_never_overlaps_drains() {
        let (queue, _store, client) =
            setup(ScriptedClient::accepting().with_delay(Duration::from_millis(10)));
        for n in 1..=4 {
            queue.enqueue(nota(n)).await;
        }
        let monitor = ManualConnectivity::new(false);
        let listener = queue.attach(&monitor);

        for online in [true, false, true, false, true] {
            monitor.set_online(online);
        }
        wait_idle_after(&queue, &client, 4).await;

        assert_eq!(client.call_count(), 4);
        assert_eq!(client.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(queue.count().await.total, 0);
        listener.shutdown().await;
    }

    #[tokio::test]
    async fn test_storage_failure_is_swallowed() {
        let store = Arc::new(ReadOnlyStore::default());
        let client = Arc::new(ScriptedClient::accepting());
        let queue = queue_with(store, client, QueueOptions::default());

        queue.enqueue(nota(1)).await;
        assert!(matches!(
            queue.try_enqueue(nota(2)).await,
            Err(StorageError::Io(_))
        ));
        assert_eq!(queue.count().await, OfflineCount::default());
    }

    #[tokio::test]
    async fn test_clear_failure_aborts_pass() {
        let store = Arc::new(ReadOnlyStore::default());
        store
            .inner
            .set("offline_notas", &encode_batch(RecordKind::Notas, &[nota(1)]).unwrap())
            .await
            .unwrap();
        store
            .inner
            .set("offline_paletes", &encode_batch(RecordKind::Paletes, &[palete("P1")]).unwrap())
            .await
            .unwrap();
        let client = Arc::new(ScriptedClient::accepting());
        let queue = queue_with(store, client.clone(), QueueOptions::default());

        let report = queue.handle_connectivity(true).unwrap().await.unwrap().unwrap();

        assert!(report.aborted.is_some());
        assert_eq!(client.calls(), vec![nota(1)]);
        assert!(!queue.state().is_syncing);
    }

    #[tokio::test]
    async fn test_capture_paths() {
        let client = Arc::new(ScriptedClient::new(Box::new(|record: &QueueRecord| match record {
            QueueRecord::Nota(n) if n.numero_nota == 2 => {
                Err(NetworkError::Transport("dns".into()))
            }
            QueueRecord::Nota(n) if n.numero_nota == 3 => {
                Err(NetworkError::from_status(400, "Já existe nota"))
            }
            _ => Ok(ServerRecord(serde_json::json!({ "id": 42 }))),
        })));
        let queue = queue_with(Arc::new(MemoryStore::new()), client.clone(), QueueOptions::default());

        // Offline: straight to the queue without a network call
        assert_eq!(queue.capture(nota(1)).await, CaptureOutcome::Enqueued);
        assert_eq!(client.call_count(), 0);

        queue.state.send_modify(|s| s.is_online = true);

        assert_eq!(
            queue.capture(nota(4)).await,
            CaptureOutcome::Submitted(ServerRecord(serde_json::json!({ "id": 42 })))
        );
        assert_eq!(queue.capture(nota(2)).await, CaptureOutcome::Enqueued);
        assert!(matches!(
            queue.capture(nota(3)).await,
            CaptureOutcome::Rejected(NetworkError::Conflict(_))
        ));

        assert_eq!(queue.list_pending(RecordKind::Notas).await, vec![nota(1), nota(2)]);
    }

    #[tokio::test]
    async fn test_capture_normalizes_pallet_number() {
        let (queue, _store, _client) = setup(ScriptedClient::accepting());

        queue.capture(palete("  ")).await;

        assert_eq!(
            queue.list_pending(RecordKind::Paletes).await,
            vec![palete(crate::record::PALLET_WITHOUT_FLAG)]
        );
    }

    #[tokio::test]
    async fn test_listener_shutdown_unsubscribes() {
        let (queue, _store, _client) = setup(ScriptedClient::accepting());
        let monitor = ManualConnectivity::new(true);

        let listener = queue.attach(&monitor);
        assert_eq!(monitor.subscriber_count(), 1);

        listener.shutdown().await;
        assert_eq!(monitor.subscriber_count(), 0);
    }
}
