//! Background sweep that keeps the cache warm.
//!
//! Each tick picks up rows nobody has fetched yet (NEW/STALE), successes past
//! the expiry window, and PROCESSING rows whose claim lease lapsed. Each
//! candidate goes through the same atomic claim as API refreshes, so a sweep
//! on one instance never duplicates an upstream call made by another.

use crate::coordinator::{RefreshCoordinator, RefreshError};
use crate::metrics;
use easel_core::ArtifactStatus;
use easel_core::config::{SweepConfig, cutoff};
use easel_metadata::MetadataStore;
use easel_metadata::models::ArtifactRow;
use easel_metadata::repos::ClaimWindow;
use futures::{StreamExt, stream};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Counters for one sweep tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepStats {
    pub candidates: usize,
    pub claimed: usize,
    /// Candidates another refresher claimed first.
    pub skipped: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub errors: usize,
}

impl SweepStats {
    pub fn is_empty(&self) -> bool {
        self.candidates == 0
    }
}

enum RowOutcome {
    Skipped,
    Succeeded,
    Failed,
    Error,
}

pub struct SweepScheduler {
    metadata: Arc<dyn MetadataStore>,
    coordinator: Arc<RefreshCoordinator>,
    config: SweepConfig,
    tick_lock: Mutex<()>,
}

impl SweepScheduler {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        coordinator: Arc<RefreshCoordinator>,
        config: SweepConfig,
    ) -> Self {
        Self {
            metadata,
            coordinator,
            config,
            tick_lock: Mutex::new(()),
        }
    }

    /// Run one sweep pass.
    ///
    /// Returns `Ok(None)` when another tick on this process is still running.
    pub async fn tick(&self) -> Result<Option<SweepStats>, RefreshError> {
        let Ok(_guard) = self.tick_lock.try_lock() else {
            tracing::debug!("Previous sweep tick still running, skipping");
            metrics::SWEEP_TICKS.with_label_values(&["skipped"]).inc();
            return Ok(None);
        };

        let now = OffsetDateTime::now_utc();
        let window = ClaimWindow {
            claimed_at: now,
            success_fetched_before: cutoff(now, self.config.expire_after()),
            lease_cutoff: cutoff(now, self.coordinator.config().claim_lease()),
        };

        let candidates = self.select_candidates(window).await?;
        let mut stats = SweepStats {
            candidates: candidates.len(),
            ..SweepStats::default()
        };

        let outcomes: Vec<RowOutcome> = stream::iter(candidates)
            .map(|row| self.sweep_row(row, window))
            .buffer_unordered(self.config.max_concurrency.max(1))
            .collect()
            .await;

        for outcome in outcomes {
            let label = match outcome {
                RowOutcome::Skipped => {
                    stats.skipped += 1;
                    "skipped"
                }
                RowOutcome::Succeeded => {
                    stats.claimed += 1;
                    stats.succeeded += 1;
                    "succeeded"
                }
                RowOutcome::Failed => {
                    stats.claimed += 1;
                    stats.failed += 1;
                    "failed"
                }
                RowOutcome::Error => {
                    stats.errors += 1;
                    "error"
                }
            };
            metrics::SWEEP_ROWS.with_label_values(&[label]).inc();
        }

        metrics::SWEEP_TICKS.with_label_values(&["ran"]).inc();
        if !stats.is_empty() {
            tracing::info!(
                candidates = stats.candidates,
                claimed = stats.claimed,
                skipped = stats.skipped,
                succeeded = stats.succeeded,
                failed = stats.failed,
                errors = stats.errors,
                "Sweep tick complete"
            );
        }

        Ok(Some(stats))
    }

    /// Unfetched rows first, then expired successes, then lapsed claims;
    /// de-duplicated by key and capped at the batch size.
    async fn select_candidates(&self, window: ClaimWindow) -> Result<Vec<ArtifactRow>, RefreshError> {
        let limit = self.config.batch_size;

        let mut candidates = self.metadata.list_unfetched(limit).await?;
        candidates.extend(
            self.metadata
                .list_expired(window.success_fetched_before, limit)
                .await?,
        );
        candidates.extend(
            self.metadata
                .list_abandoned_claims(window.lease_cutoff, limit)
                .await?,
        );

        let mut seen = HashSet::new();
        candidates.retain(|row| seen.insert(row.canonical_key.clone()));
        candidates.truncate(limit as usize);
        Ok(candidates)
    }

    async fn sweep_row(&self, row: ArtifactRow, window: ClaimWindow) -> RowOutcome {
        match self.metadata.try_claim(&row.canonical_key, window).await {
            Ok(true) => {}
            Ok(false) => return RowOutcome::Skipped,
            Err(e) => {
                tracing::warn!(key = %row.canonical_key, error = %e, "Sweep claim failed");
                return RowOutcome::Error;
            }
        }

        match self.coordinator.refresh_and_save(&row).await {
            Ok(saved) if saved.status == ArtifactStatus::Success.as_str() => RowOutcome::Succeeded,
            Ok(_) => RowOutcome::Failed,
            Err(e) => {
                tracing::warn!(key = %row.canonical_key, error = %e, "Sweep refresh failed");
                RowOutcome::Error
            }
        }
    }

    /// Run `tick` every `sweep.interval_secs` until the process exits.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = self.config.interval();
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            tracing::info!(
                interval_secs = period.as_secs(),
                batch_size = self.config.batch_size,
                max_concurrency = self.config.max_concurrency,
                "Sweep scheduler started"
            );

            loop {
                ticker.tick().await;
                if let Err(e) = self.tick().await {
                    metrics::SWEEP_TICKS.with_label_values(&["error"]).inc();
                    tracing::error!(error = %e, "Sweep tick failed");
                }
            }
        })
    }
}
