//! Connectivity monitoring.
//!
//! [`ConnectivityMonitor`] holds the current online/offline state and wakes
//! subscribers on every transition. It does no I/O itself: a
//! [`ReachabilityProbe`] polled by [`spawn_probe_loop`] feeds it.
//!
//! The state is a hint. It may say online while requests still fail, so
//! every caller that talks to the remote handles failure on its own.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::remote::{HttpRequest, Transport};

/// Current connectivity plus transition notifications.
#[derive(Debug)]
pub struct ConnectivityMonitor {
    state: watch::Sender<bool>,
}

impl ConnectivityMonitor {
    /// Create a monitor seeded with the platform's current signal.
    #[must_use]
    pub fn new(initially_online: bool) -> Self {
        let (state, _) = watch::channel(initially_online);
        Self { state }
    }

    /// Whether the last signal said online.
    #[must_use]
    pub fn is_online(&self) -> bool {
        *self.state.borrow()
    }

    /// Record a new signal.
    ///
    /// Subscribers are only woken on an actual transition. Returns `true` if
    /// the state changed.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.state.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            info!(online, "Connectivity changed");
        }
        changed
    }

    /// Receive every future transition.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }
}

/// Source of the platform reachability signal.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync + std::fmt::Debug {
    /// Check whether the remote looks reachable right now.
    async fn probe(&self) -> bool;
}

/// Probe that asks the remote for a lightweight path.
///
/// Any HTTP response, error statuses included, counts as reachable.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    transport: Arc<dyn Transport>,
    path: String,
}

impl HttpProbe {
    /// Probe `path` through `transport`.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, path: impl Into<String>) -> Self {
        Self {
            transport,
            path: path.into(),
        }
    }
}

#[async_trait]
impl ReachabilityProbe for HttpProbe {
    async fn probe(&self) -> bool {
        let mut request = HttpRequest::get(self.path.clone());
        request.method = crate::remote::Method::Head;
        match self.transport.fetch(&request).await {
            Ok(_) => true,
            Err(e) => {
                debug!("Reachability probe failed: {e}");
                false
            }
        }
    }
}

/// A handle to stop a background loop.
///
/// Cloneable; every clone shares the same stop signal.
#[derive(Debug, Clone, Default)]
pub struct MonitorHandle {
    stop_signal: Arc<AtomicBool>,
}

impl MonitorHandle {
    /// Create a new handle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal the loop to stop.
    pub fn stop(&self) {
        self.stop_signal.store(true, Ordering::SeqCst);
    }

    /// Check if the stop signal has been sent.
    #[must_use]
    pub fn should_stop(&self) -> bool {
        self.stop_signal.load(Ordering::SeqCst)
    }
}

/// Poll `probe` every `interval` and feed the result to `monitor`.
///
/// The loop exits at the first tick after `handle` is stopped.
pub fn spawn_probe_loop(
    monitor: Arc<ConnectivityMonitor>,
    probe: Arc<dyn ReachabilityProbe>,
    interval: Duration,
    handle: MonitorHandle,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately; the caller seeded the state.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if handle.should_stop() {
                debug!("Probe loop stopped");
                break;
            }
            let online = probe.probe().await;
            monitor.set_online(online);
        }
    })
}
