//! Stream manager: discovery, scheduling and the worker pool.
//!
//! # Flow
//!
//! 1. `sync_stream_list` lists every group and its streams, then updates the
//!    [`StreamRegistry`] in one step. New streams are enqueued.
//! 2. `enqueue` hands a stream to the scheduler with a delay that keeps each
//!    window at least `min_fetch_range` wide.
//! 3. Workers take ready streams, run one fetch window and enqueue them again.
//!
//! A timer re-runs the sync independently of the workers. Everything stops
//! on the shared [`CancellationToken`].

mod registry;
mod scheduler;
mod worker;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::checkpoint::CheckpointStore;
use crate::output::RecordSink;
use crate::provider::LogServiceClient;
use crate::stream::{StreamEntry, StreamState, TagPolicy, WindowPolicy};
use crate::{Error, Result};

pub use registry::{StreamRegistry, SyncPlan, SyncReport};

use scheduler::Scheduled;

/// Default number of concurrent fetch workers.
pub const DEFAULT_WORKER_COUNT: usize = 5;

/// Default entries requested per page.
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Default interval between inventory syncs.
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(60);

/// Manager configuration.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub window: WindowPolicy,
    pub tags: TagPolicy,
    pub page_size: u32,
    pub sync_interval: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            window: WindowPolicy::default(),
            tags: TagPolicy::new("x-hwc-logstream-pos", "x-hwc-logstream-exclude"),
            page_size: DEFAULT_PAGE_SIZE,
            sync_interval: DEFAULT_SYNC_INTERVAL,
        }
    }
}

/// Discovers streams and keeps every active one tailed.
pub struct StreamManager {
    client: Arc<dyn LogServiceClient>,
    checkpoints: Arc<dyn CheckpointStore>,
    sink: Arc<dyn RecordSink>,
    config: ManagerConfig,
    registry: StreamRegistry,
    submissions: mpsc::UnboundedSender<Scheduled>,
    /// Receiving side of `submissions`, taken by `start`.
    pending_rx: Mutex<Option<mpsc::UnboundedReceiver<Scheduled>>>,
}

impl StreamManager {
    pub fn new(
        client: Arc<dyn LogServiceClient>,
        checkpoints: Arc<dyn CheckpointStore>,
        sink: Arc<dyn RecordSink>,
        config: ManagerConfig,
    ) -> Arc<Self> {
        let (submissions, pending_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            client,
            checkpoints,
            sink,
            config,
            registry: StreamRegistry::new(),
            submissions,
            pending_rx: Mutex::new(Some(pending_rx)),
        })
    }

    pub fn registry(&self) -> &StreamRegistry {
        &self.registry
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Run until `cancel` fires.
    ///
    /// The initial sync must succeed; without an inventory there is nothing
    /// to tail. Afterwards the sync timer and `worker_count` workers run
    /// until cancellation, and all of them are awaited before returning.
    pub async fn start(
        self: &Arc<Self>,
        worker_count: usize,
        cancel: CancellationToken,
    ) -> Result<()> {
        if worker_count == 0 {
            return Err(Error::config("worker count must be at least 1"));
        }
        let submissions = self
            .pending_rx
            .lock()
            .take()
            .ok_or_else(|| Error::Other("stream manager already started".to_string()))?;

        let report = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            report = self.sync_stream_list() => {
                report.map_err(|e| e.context("initial sync of log groups and streams"))?
            }
        };
        info!(
            streams = self.registry.len(),
            excluded = report.excluded,
            workers = worker_count,
            "Initial stream list synced"
        );

        let (ready_tx, ready_rx) = mpsc::channel(1);
        let ready_rx = Arc::new(tokio::sync::Mutex::new(ready_rx));
        let mut tasks = JoinSet::new();

        tasks.spawn(scheduler::run(submissions, ready_tx, cancel.clone()));

        let manager = Arc::clone(self);
        let sync_cancel = cancel.clone();
        tasks.spawn(async move { manager.run_resync(sync_cancel).await });

        for id in 0..worker_count {
            let manager = Arc::clone(self);
            let ready_rx = Arc::clone(&ready_rx);
            let cancel = cancel.clone();
            tasks.spawn(async move { worker::run(id, manager, ready_rx, cancel).await });
        }

        cancel.cancelled().await;
        info!("Stopping stream manager");

        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "Stream manager task failed");
            }
        }

        info!("Stream manager stopped");
        Ok(())
    }

    async fn run_resync(&self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.sync_interval) => {}
            }

            let result = tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.sync_stream_list() => result,
            };
            match result {
                Ok(report) => debug!(?report, "Stream list synced"),
                Err(e) => warn!(error = %e, "Failed to sync log groups and streams"),
            }
        }
        debug!("Stream list sync task shutting down");
    }

    /// Reconcile the registry with the provider's inventory.
    ///
    /// The whole inventory is listed before anything changes; a listing
    /// error aborts the sync and leaves the registry untouched.
    pub async fn sync_stream_list(&self) -> Result<SyncReport> {
        let plan = self.stage_sync().await?;
        let (report, fresh) = self.registry.apply(&self.config.tags, plan);

        for state in fresh {
            self.enqueue(state);
        }
        if report.added > 0 || report.retired > 0 {
            info!(
                added = report.added,
                retired = report.retired,
                tracked = self.registry.len(),
                "Stream list changed"
            );
        }
        Ok(report)
    }

    async fn stage_sync(&self) -> Result<SyncPlan> {
        let policy = &self.config.tags;
        let groups = self
            .client
            .list_groups()
            .await
            .map_err(|e| e.context("fetch groups"))?;

        let mut plan = SyncPlan::default();
        for group in groups {
            let streams = self
                .client
                .list_streams(&group.id)
                .await
                .map_err(|e| e.context(format!("fetch streams of group {}", group.name)))?;

            for stream in streams {
                if policy.is_excluded(&stream) {
                    warn!(
                        group = %group.name,
                        stream = %stream.name,
                        "Stream is excluded"
                    );
                    plan.excluded += 1;
                    continue;
                }

                let entry = StreamEntry::new(policy, &group, &stream);
                if self.registry.contains(entry.identity()) {
                    plan.refreshed.push((group.clone(), stream));
                } else {
                    let state =
                        StreamState::create(self.checkpoints.as_ref(), Arc::new(entry), Utc::now())
                            .await;
                    plan.discovered.push(state);
                }
            }
        }

        Ok(plan)
    }

    /// Offer a stream to the workers once its next window is wide enough.
    ///
    /// Retired streams and submissions after shutdown are dropped.
    pub fn enqueue(&self, state: StreamState) {
        if state.is_terminated() {
            debug!(stream = %state, "Not enqueueing retired stream");
            return;
        }

        let delay = self
            .config
            .window
            .enqueue_delay(state.cursor_start(), Utc::now());
        if self.submissions.send(Scheduled { state, delay }).is_err() {
            debug!("Scheduler gone, dropping stream");
        }
    }
}
