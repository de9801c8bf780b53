use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

/// Source of network reachability transitions.
///
/// Different implementations support different mechanisms:
/// - Push-style platform notifications: drive a [`ManualConnectivity`]
/// - Platforms without notifications: a polling probe
#[async_trait]
pub trait ConnectivityMonitor: Send + Sync {
    /// Returns the monitor identifier (e.g., "manual", "tcp-probe").
    fn monitor_name(&self) -> &'static str;

    /// Best-effort one-shot reachability check.
    async fn probe(&self) -> bool;

    /// Subscribe to transitions.
    ///
    /// The current state is delivered first whenever it is known. Dropping the
    /// subscription unsubscribes.
    fn subscribe(&self) -> ConnectivitySubscription;
}

/// Receiving end of a [`ConnectivityMonitor`] subscription.
#[derive(Debug)]
pub struct ConnectivitySubscription {
    rx: mpsc::UnboundedReceiver<bool>,
}

impl ConnectivitySubscription {
    /// Wait for the next reachability event. `None` once the monitor is gone.
    pub async fn next(&mut self) -> Option<bool> {
        self.rx.recv().await
    }

    /// Stop receiving events.
    pub fn unsubscribe(self) {}
}

#[derive(Debug, Default)]
struct HubState {
    last: Option<bool>,
    subscribers: Vec<mpsc::UnboundedSender<bool>>,
}

/// Fan-out of reachability events to any number of subscribers.
///
/// Monitors embed a hub and call [`ConnectivityHub::publish`]; closed
/// subscribers are pruned on the next publish.
#[derive(Debug, Default)]
pub struct ConnectivityHub {
    state: Mutex<HubState>,
}

impl ConnectivityHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record `online` as the current state and deliver it to every subscriber.
    pub fn publish(&self, online: bool) {
        let mut state = self.lock();
        state.last = Some(online);
        state.subscribers.retain(|tx| tx.send(online).is_ok());
        debug!(
            "Published connectivity {} to {} subscriber(s)",
            if online { "online" } else { "offline" },
            state.subscribers.len()
        );
    }

    /// Last published state, if any.
    pub fn last(&self) -> Option<bool> {
        self.lock().last
    }

    /// Register a subscriber, replaying the last known state to it.
    pub fn subscribe(&self) -> ConnectivitySubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.lock();
        if let Some(online) = state.last {
            let _ = tx.send(online);
        }
        state.subscribers.push(tx);
        ConnectivitySubscription { rx }
    }

    /// Number of subscribers still attached (as of the last prune).
    pub fn subscriber_count(&self) -> usize {
        let mut state = self.lock();
        state.subscribers.retain(|tx| !tx.is_closed());
        state.subscribers.len()
    }
}

/// Monitor driven by explicit calls, for hosts that receive push
/// notifications themselves.
///
/// Every [`ManualConnectivity::set_online`] call is published, including
/// repeats of the current state.
#[derive(Debug)]
pub struct ManualConnectivity {
    hub: ConnectivityHub,
}

impl ManualConnectivity {
    pub fn new(initially_online: bool) -> Self {
        let hub = ConnectivityHub::new();
        hub.publish(initially_online);
        Self { hub }
    }

    pub fn set_online(&self, online: bool) {
        self.hub.publish(online);
    }

    pub fn subscriber_count(&self) -> usize {
        self.hub.subscriber_count()
    }
}

#[async_trait]
impl ConnectivityMonitor for ManualConnectivity {
    fn monitor_name(&self) -> &'static str {
        "manual"
    }

    async fn probe(&self) -> bool {
        self.hub.last().unwrap_or(false)
    }

    fn subscribe(&self) -> ConnectivitySubscription {
        self.hub.subscribe()
    }
}
