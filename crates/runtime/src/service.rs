//! Sync service: wires the data source, the coordinator and the
//! notification sink together and drains the trigger queue.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use sidequest_config::AppConfig;
use sidequest_progress::{
    LevelUpEvent, Reading, SyncCoordinator, SyncError, SyncOutcome, SystemClock, TriggerKind,
    open_store,
};

use crate::notify::{LevelUpNotification, NotificationSink};
use crate::queue::{TriggerQueue, TriggerReceiver, trigger_queue};
use crate::source::{HealthDataSource, SampleAnchor};

/// Knobs lifted out of [`AppConfig`].
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    pub queue_capacity: usize,
    pub poll_interval: Option<Duration>,
    /// Read steps through anchored sample batches instead of the cumulative
    /// counter.  Applies to every trigger; the two paths are never mixed.
    pub incremental_samples: bool,
    pub notifications_enabled: bool,
    pub player_name: Option<String>,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl ServiceOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            queue_capacity: config.sync.queue_capacity,
            poll_interval: (config.sync.poll_interval_secs > 0)
                .then(|| Duration::from_secs(config.sync.poll_interval_secs)),
            incremental_samples: config.sync.incremental_samples,
            notifications_enabled: config.notifications.enabled,
            player_name: config.player_name().map(str::to_string),
        }
    }
}

pub struct SyncService {
    coordinator: Arc<SyncCoordinator>,
    source: Arc<dyn HealthDataSource>,
    sink: Arc<dyn NotificationSink>,
    options: ServiceOptions,
}

impl SyncService {
    pub fn new(
        coordinator: Arc<SyncCoordinator>,
        source: Arc<dyn HealthDataSource>,
        sink: Arc<dyn NotificationSink>,
        options: ServiceOptions,
    ) -> Self {
        Self {
            coordinator,
            source,
            sink,
            options,
        }
    }

    /// Build the whole stack from configuration: store, clock, coordinator.
    pub async fn from_config(
        config: &AppConfig,
        source: Arc<dyn HealthDataSource>,
        sink: Arc<dyn NotificationSink>,
    ) -> Result<Self> {
        let store = open_store(&config.storage)?;
        let clock = Arc::new(SystemClock::from_name(&config.clock.timezone));
        let coordinator = SyncCoordinator::load(store, clock)
            .await
            .context("loading saved progress")?;
        info!(
            backend = ?config.storage.backend,
            path = %config.storage.path,
            timezone = %config.clock.timezone,
            incremental = config.sync.incremental_samples,
            "sync service configured"
        );
        Ok(Self::new(
            Arc::new(coordinator),
            source,
            sink,
            ServiceOptions::from_config(config),
        ))
    }

    pub fn coordinator(&self) -> &Arc<SyncCoordinator> {
        &self.coordinator
    }

    /// Cursor the next incremental fetch will start from.
    pub fn current_anchor(&self) -> Option<SampleAnchor> {
        self.coordinator.current().anchor
    }

    /// Fetch a fresh reading for `trigger` and reconcile it.
    ///
    /// The configured mode picks the read path, not the trigger: samples bypass
    /// the daily watermark, so crediting one day through both paths would
    /// count the same steps twice.
    ///
    /// Level-ups are forwarded to the sink, including those of a cycle whose
    /// write failed: they are already credited.
    pub async fn handle(&self, trigger: TriggerKind) -> Result<SyncOutcome, SyncError> {
        let result = if self.options.incremental_samples {
            self.sync_samples(trigger).await
        } else {
            self.sync_cumulative(trigger).await
        };

        match &result {
            Ok(SyncOutcome::Applied(events)) => self.notify(events).await,
            Err(SyncError::PersistFailed { events, .. }) => self.notify(events).await,
            _ => {}
        }
        result
    }

    async fn sync_cumulative(&self, trigger: TriggerKind) -> Result<SyncOutcome, SyncError> {
        let raw = self
            .source
            .query_today_cumulative_count()
            .await
            .map_err(|err| SyncError::DataSourceUnavailable(format!("{err:#}")))?;
        self.coordinator
            .run_reconciliation(trigger, Reading::Cumulative(raw))
            .await
    }

    /// The coordinator commits the cursor together with the credit and drops
    /// a batch whose starting cursor has moved on in the meantime.
    async fn sync_samples(&self, trigger: TriggerKind) -> Result<SyncOutcome, SyncError> {
        let since = self.current_anchor();
        let batch = self
            .source
            .fetch_incremental_samples(since.as_ref())
            .await
            .map_err(|err| SyncError::DataSourceUnavailable(format!("{err:#}")))?;

        self.coordinator
            .run_reconciliation(
                trigger,
                Reading::Samples {
                    since,
                    samples: batch.samples,
                    next: batch.anchor,
                },
            )
            .await
    }

    async fn notify(&self, events: &[LevelUpEvent]) {
        if !self.options.notifications_enabled {
            return;
        }
        for event in events {
            let notification =
                LevelUpNotification::for_event(event, self.options.player_name.as_deref());
            if let Err(err) = self.sink.deliver(notification).await {
                warn!(level = event.new_level, error = %err, "level-up notification failed");
            }
        }
    }

    /// Drain `triggers` until shutdown or until every queue handle is gone.
    pub async fn run(&self, mut triggers: TriggerReceiver, mut shutdown: watch::Receiver<bool>) {
        info!("sync service started");
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                next = triggers.recv() => {
                    let Some(trigger) = next else { break };
                    match self.handle(trigger).await {
                        Ok(outcome) => debug!(trigger = trigger.label(), ?outcome, "trigger handled"),
                        Err(SyncError::PersistFailed { .. }) => {}
                        Err(err) => warn!(trigger = trigger.label(), error = %err, "reconciliation failed"),
                    }
                }
            }
        }
        info!("sync service stopped");
    }

    /// Spawn the consumer plus the trigger producers (change stream and
    /// periodic poll).  A foreground trigger is posted right away so steps
    /// are read once at startup.
    pub fn start(self: Arc<Self>) -> ServiceHandle {
        let (queue, triggers) = trigger_queue(self.options.queue_capacity);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::new();

        queue.post(TriggerKind::Foreground);

        {
            let service = self.clone();
            let shutdown = shutdown_rx.clone();
            tasks.push(tokio::spawn(async move {
                service.run(triggers, shutdown).await;
            }));
        }

        tasks.push(spawn_change_watcher(
            &self,
            queue.clone(),
            shutdown_rx.clone(),
        ));

        if let Some(interval) = self.options.poll_interval {
            tasks.push(spawn_poller(interval, queue.clone(), shutdown_rx));
        }

        ServiceHandle {
            queue,
            shutdown_tx,
            tasks,
        }
    }
}

fn spawn_change_watcher(
    service: &Arc<SyncService>,
    queue: TriggerQueue,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let kind = if service.options.incremental_samples {
        TriggerKind::AnchoredSync
    } else {
        TriggerKind::Background
    };
    let mut changes = service.source.subscribe_to_changes();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                next = changes.next() => match next {
                    Some(_) => {
                        queue.post(kind);
                    }
                    None => {
                        debug!("change stream ended");
                        break;
                    }
                },
            }
        }
    })
}

fn spawn_poller(
    interval: Duration,
    queue: TriggerQueue,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick fires immediately; startup already posted a read.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    queue.post(TriggerKind::Background);
                }
            }
        }
    })
}

/// Running service.  Dropping it without [`shutdown`](Self::shutdown)
/// leaves the tasks running until the runtime stops.
pub struct ServiceHandle {
    queue: TriggerQueue,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl ServiceHandle {
    /// Handle for platform callbacks (e.g. app-became-active).
    pub fn queue(&self) -> &TriggerQueue {
        &self.queue
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks {
            if let Err(err) = task.await {
                warn!(error = %err, "sync task ended abnormally");
            }
        }
    }
}
