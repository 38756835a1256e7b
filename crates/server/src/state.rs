//! Application state shared across handlers.

use crate::coordinator::RefreshCoordinator;
use crate::operations::OperationAggregator;
use crate::sweep::SweepScheduler;
use crate::upstream::UpstreamResolver;
use easel_core::config::AppConfig;
use easel_metadata::MetadataStore;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// How often the watchdog inspects batch drivers.
const WATCHDOG_INTERVAL: Duration = Duration::from_secs(10);

/// Registry for tracking batch refresh drivers and detecting panics.
///
/// A panicked driver never finalizes its operation. The watchdog notices the
/// finished handle and re-finalizes the operation from whatever the rows say,
/// so it settles as soon as its rows do.
pub struct RefreshTaskRegistry {
    /// Map of operation_id -> driver handle
    tasks: Mutex<HashMap<Uuid, JoinHandle<()>>>,
}

impl Default for RefreshTaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RefreshTaskRegistry {
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Register a spawned driver.
    pub async fn register(&self, operation_id: Uuid, handle: JoinHandle<()>) {
        self.tasks.lock().await.insert(operation_id, handle);
    }

    /// Number of drivers not yet reaped.
    pub async fn tracked(&self) -> usize {
        self.tasks.lock().await.len()
    }

    /// Spawn a watchdog task that periodically reaps finished drivers.
    /// The caller should keep the handle alive.
    pub fn spawn_watchdog(self: Arc<Self>, operations: Arc<OperationAggregator>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(WATCHDOG_INTERVAL).await;
                self.reap(&operations).await;
            }
        })
    }

    /// Remove finished drivers; re-finalize operations whose driver panicked.
    /// Returns the number of panicked drivers found.
    pub async fn reap(&self, operations: &OperationAggregator) -> usize {
        // Hold the mutex only while collecting finished handles
        let finished: Vec<(Uuid, JoinHandle<()>)> = {
            let mut tasks = self.tasks.lock().await;
            let done: Vec<Uuid> = tasks
                .iter()
                .filter(|(_, handle)| handle.is_finished())
                .map(|(id, _)| *id)
                .collect();
            done.into_iter()
                .filter_map(|id| tasks.remove(&id).map(|handle| (id, handle)))
                .collect()
        };

        let mut panicked = 0;
        for (operation_id, handle) in finished {
            match handle.await {
                Ok(()) => {
                    tracing::debug!(operation_id = %operation_id, "Batch driver completed");
                }
                Err(join_err) if join_err.is_panic() => {
                    panicked += 1;
                    crate::metrics::BATCH_DRIVERS_ACTIVE.dec();
                    crate::metrics::BATCH_DRIVERS_PANICKED.inc();
                    tracing::error!(
                        operation_id = %operation_id,
                        panic = ?join_err,
                        "Batch driver panicked, re-finalizing operation"
                    );

                    if let Err(e) = operations.finalize(operation_id).await {
                        tracing::error!(
                            operation_id = %operation_id,
                            error = %e,
                            "Failed to re-finalize operation after driver panic"
                        );
                    }
                }
                Err(join_err) => {
                    crate::metrics::BATCH_DRIVERS_ACTIVE.dec();
                    tracing::warn!(operation_id = %operation_id, error = ?join_err, "Batch driver was cancelled");
                }
            }
        }
        panicked
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Metadata store.
    pub metadata: Arc<dyn MetadataStore>,
    /// Single-flight refresh coordinator.
    pub coordinator: Arc<RefreshCoordinator>,
    /// Batch operation aggregator.
    pub operations: Arc<OperationAggregator>,
    /// Batch driver registry for panic detection.
    pub tasks: Arc<RefreshTaskRegistry>,
}

impl AppState {
    /// Wire the coordinator, aggregator and task registry together.
    ///
    /// The configuration is expected to have been validated by the caller.
    pub fn new(
        config: AppConfig,
        metadata: Arc<dyn MetadataStore>,
        resolver: Arc<dyn UpstreamResolver>,
    ) -> Self {
        let coordinator = Arc::new(RefreshCoordinator::new(
            metadata.clone(),
            resolver,
            config.refresh.clone(),
        ));
        let tasks = Arc::new(RefreshTaskRegistry::new());
        let operations = Arc::new(OperationAggregator::new(
            metadata.clone(),
            coordinator.clone(),
            tasks.clone(),
            config.server.max_batch_keys,
        ));

        Self {
            config: Arc::new(config),
            metadata,
            coordinator,
            operations,
            tasks,
        }
    }

    /// Build the sweep scheduler over this state's store and coordinator.
    pub fn sweep_scheduler(&self) -> SweepScheduler {
        SweepScheduler::new(
            self.metadata.clone(),
            self.coordinator.clone(),
            self.config.sweep.clone(),
        )
    }
}
