use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use checklist_queue_core::{ConnectivityHub, ConnectivityMonitor, ConnectivitySubscription};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// Polling reachability monitor.
///
/// There is no portable push notification for network changes, so we poll
/// by opening a TCP connection to the API host and publish only when the
/// result flips.
pub struct ProbeMonitor {
    /// `host:port` to connect to
    target: String,
    interval: Duration,
    probe_timeout: Duration,
    hub: Arc<ConnectivityHub>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for ProbeMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeMonitor")
            .field("target", &self.target)
            .field("interval", &self.interval)
            .field("probe_timeout", &self.probe_timeout)
            .finish_non_exhaustive()
    }
}

impl ProbeMonitor {
    /// Create a new ProbeMonitor. Nothing is polled until [`ProbeMonitor::start`].
    pub fn new(target: impl Into<String>, interval: Duration, probe_timeout: Duration) -> Self {
        Self {
            target: target.into(),
            interval,
            probe_timeout,
            hub: Arc::new(ConnectivityHub::new()),
            poller: Mutex::new(None),
        }
    }

    async fn check(target: &str, probe_timeout: Duration) -> bool {
        match tokio::time::timeout(probe_timeout, TcpStream::connect(target)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!("Probe to {} failed: {}", target, e);
                false
            }
            Err(_) => {
                debug!("Probe to {} timed out", target);
                false
            }
        }
    }

    /// Start the polling task. The first probe result is always published.
    pub fn start(&self) {
        let mut poller = self.poller.lock().unwrap_or_else(|e| e.into_inner());
        if poller.is_some() {
            warn!("ProbeMonitor already started, ignoring");
            return;
        }

        let target = self.target.clone();
        let interval = self.interval;
        let probe_timeout = self.probe_timeout;
        let hub = Arc::clone(&self.hub);

        info!(
            "Polling reachability of {} every {} ms",
            target,
            interval.as_millis()
        );
        *poller = Some(tokio::spawn(async move {
            let mut last = None;
            loop {
                let online = Self::check(&target, probe_timeout).await;
                if last != Some(online) {
                    info!("Network is {}", if online { "online" } else { "offline" });
                    hub.publish(online);
                    last = Some(online);
                }
                tokio::time::sleep(interval).await;
            }
        }));
    }

    /// Stop polling. Subscribers stay attached but receive nothing further.
    pub fn stop(&self) {
        if let Some(task) = self.poller.lock().unwrap_or_else(|e| e.into_inner()).take() {
            task.abort();
            debug!("Stopped polling {}", self.target);
        }
    }
}

impl Drop for ProbeMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[async_trait]
impl ConnectivityMonitor for ProbeMonitor {
    fn monitor_name(&self) -> &'static str {
        "tcp-probe"
    }

    #[instrument(skip(self), level = "debug")]
    async fn probe(&self) -> bool {
        Self::check(&self.target, self.probe_timeout).await
    }

    fn subscribe(&self) -> ConnectivitySubscription {
        self.hub.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;

    async fn next_event(sub: &mut ConnectivitySubscription) -> Option<bool> {
        tokio::time::timeout(Duration::from_secs(5), sub.next())
            .await
            .expect("no connectivity event")
    }

    #[tokio::test]
    async fn test_probe_reachable_and_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target = listener.local_addr().unwrap().to_string();
        let monitor = ProbeMonitor::new(&target, Duration::from_secs(1), Duration::from_millis(500));

        assert!(monitor.probe().await);

        drop(listener);
        assert!(!monitor.probe().await);
    }

    #[tokio::test]
    async fn test_publishes_transitions_only() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target = listener.local_addr().unwrap().to_string();
        let monitor = ProbeMonitor::new(&target, Duration::from_millis(20), Duration::from_millis(200));

        let mut sub = monitor.subscribe();
        monitor.start();
        assert_eq!(next_event(&mut sub).await, Some(true));

        // Several polls go by while still reachable without new events
        tokio::time::sleep(Duration::from_millis(100)).await;
        drop(listener);
        assert_eq!(next_event(&mut sub).await, Some(false));

        monitor.stop();
    }

    #[tokio::test]
    async fn test_late_subscriber_gets_current_state() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target = listener.local_addr().unwrap().to_string();
        let monitor = ProbeMonitor::new(&target, Duration::from_millis(20), Duration::from_millis(200));

        let mut early = monitor.subscribe();
        monitor.start();
        assert_eq!(next_event(&mut early).await, Some(true));

        let mut late = monitor.subscribe();
        assert_eq!(next_event(&mut late).await, Some(true));
        drop(listener);
    }
}
