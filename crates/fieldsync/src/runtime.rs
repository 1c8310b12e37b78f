//! Process-level wiring.
//!
//! [`FieldSync`] builds every component explicitly and owns the background
//! tasks. Callers hold it (or the handles it hands out); nothing lives in a
//! global.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::intercept::Interceptor;
use crate::monitor::{
    spawn_probe_loop, ConnectivityMonitor, HttpProbe, MonitorHandle, ReachabilityProbe,
};
use crate::record::Capture;
use crate::remote::{HttpRequest, HttpResponse, RemoteClient, Transport};
use crate::status::{StatusBus, StatusEvent};
use crate::sync::trigger::{forward_connectivity, forward_periodic};
use crate::sync::{
    ControlMessage, DeferredScheduler, Dispatcher, StoreSlot, SubmitOutcome, SyncEngine,
    SyncSettings, SyncTrigger,
};

/// A running capture-and-sync engine.
#[derive(Debug)]
pub struct FieldSync {
    engine: Arc<SyncEngine>,
    interceptor: Arc<Interceptor>,
    status: Arc<StatusBus>,
    triggers: mpsc::Sender<SyncTrigger>,
    handle: MonitorHandle,
    tasks: Vec<JoinHandle<()>>,
}

impl FieldSync {
    /// Start everything.
    ///
    /// A store that fails to open disables offline saving and is reported on
    /// the status bus; it does not stop startup.
    ///
    /// # Errors
    ///
    /// Returns an error only for invalid interceptor configuration.
    pub async fn start(config: &Config, transport: Arc<dyn Transport>) -> Result<Self> {
        let status = Arc::new(StatusBus::new());
        let engine = connect(config, Arc::clone(&transport), Arc::clone(&status)).await;
        let monitor = Arc::clone(engine.monitor());

        let interceptor = Arc::new(Interceptor::new(
            Arc::clone(&engine),
            config.intercept.clone(),
        )?);
        interceptor.install().await;

        let scheduler = Arc::new(DeferredScheduler::new());
        engine.register_background_trigger(scheduler.clone());

        let (triggers, dispatcher) = Dispatcher::new(Arc::clone(&engine), Arc::clone(&status));
        let handle = MonitorHandle::new();
        let mut tasks = vec![
            tokio::spawn(dispatcher.run()),
            forward_connectivity(&monitor, scheduler, triggers.clone()),
        ];
        if let Some(interval) = config.probe_interval() {
            let probe: Arc<dyn ReachabilityProbe> =
                Arc::new(HttpProbe::new(transport, config.remote.health_path.clone()));
            tasks.push(spawn_probe_loop(
                Arc::clone(&monitor),
                probe,
                interval,
                handle.clone(),
            ));
        }
        if let Some(interval) = config.sync_interval() {
            tasks.push(forward_periodic(interval, triggers.clone(), handle.clone()));
        }

        if triggers.send(SyncTrigger::Startup).await.is_err() {
            warn!("Dispatcher stopped before startup sync");
        }

        Ok(Self {
            engine,
            interceptor,
            status,
            triggers,
            handle,
            tasks,
        })
    }

    /// The sync engine.
    #[must_use]
    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    /// The network interceptor.
    #[must_use]
    pub fn interceptor(&self) -> &Arc<Interceptor> {
        &self.interceptor
    }

    /// The status bus.
    #[must_use]
    pub fn status(&self) -> &Arc<StatusBus> {
        &self.status
    }

    /// Submit a capture, storing it offline if needed.
    ///
    /// # Errors
    ///
    /// Returns an error only if the capture could not be stored.
    pub async fn capture(&self, capture: Capture) -> Result<SubmitOutcome> {
        self.engine.submit_or_queue(capture).await
    }

    /// Route a request through the interceptor.
    pub async fn fetch(&self, request: HttpRequest) -> HttpResponse {
        self.interceptor.handle(request).await
    }

    /// Handle a control message.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache switch fails or the dispatcher is gone.
    pub async fn control(&self, message: ControlMessage) -> Result<()> {
        match message {
            ControlMessage::SkipWaiting => {
                self.interceptor.skip_waiting()?;
                Ok(())
            }
            ControlMessage::SyncNow => self
                .triggers
                .send(SyncTrigger::SyncNow)
                .await
                .map_err(|_| Error::internal("sync dispatcher stopped")),
        }
    }

    /// Stop background tasks. A sync pass already running finishes on its own.
    pub fn shutdown(self) {
        self.handle.stop();
        for task in self.tasks {
            task.abort();
        }
        info!("fieldsync stopped");
    }
}

/// Build a sync engine without starting any background task.
///
/// Opens the store and seeds connectivity from a single probe. Used by
/// [`FieldSync::start`] and by one-shot commands that drive the engine
/// directly.
pub async fn connect(
    config: &Config,
    transport: Arc<dyn Transport>,
    status: Arc<StatusBus>,
) -> Arc<SyncEngine> {
    let store = StoreSlot::open(&config.database_path());
    if let StoreSlot::Unavailable { reason, .. } = &store {
        status.publish(StatusEvent::OfflineSavingDisabled {
            reason: reason.clone(),
        });
    }

    let probe = HttpProbe::new(Arc::clone(&transport), config.remote.health_path.clone());
    let online = probe.probe().await;
    let monitor = Arc::new(ConnectivityMonitor::new(online));
    status.publish(StatusEvent::Connectivity { online });
    info!(online, "Initial connectivity");

    let engine = Arc::new(SyncEngine::new(
        store,
        RemoteClient::new(transport, &config.remote),
        monitor,
        Arc::clone(&status),
        SyncSettings::from(config),
    ));
    if let Ok(counts) = engine.pending_counts() {
        status.publish(StatusEvent::PendingChanged(counts));
    }
    engine
}
