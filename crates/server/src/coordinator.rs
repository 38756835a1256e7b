//! Refresh coordination.
//!
//! Every refresher (API batch driver or sweep) goes through the same atomic
//! claim on the artifact row. Exactly one caller wins the claim and talks to
//! the upstream; everyone else follows by polling the row until it settles.
//! Claims carry a lease: a PROCESSING row whose claim is older than
//! `refresh.claim_lease_secs` is up for grabs again, so a crashed leader
//! never wedges its followers.

use crate::metrics;
use crate::upstream::UpstreamResolver;
use easel_core::config::{RefreshConfig, cutoff};
use easel_core::{ArtifactStatus, CanonicalKey};
use easel_metadata::models::ArtifactRow;
use easel_metadata::repos::ClaimWindow;
use easel_metadata::{MetadataError, MetadataStore};
use futures::{StreamExt, TryStreamExt, stream};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

/// Errors surfaced by the coordinator. Upstream failures are not among them:
/// those are recorded on the row as FAILURE.
#[derive(Debug, Error)]
pub enum RefreshError {
    #[error(transparent)]
    Core(#[from] easel_core::Error),

    #[error("artifact not tracked: {0}")]
    NotTracked(String),

    #[error("operation not found: {0}")]
    OperationNotFound(Uuid),

    #[error("gave up on '{key}' after waiting {waited:?} for another refresher")]
    FollowerTimeout { key: String, waited: Duration },

    #[error(transparent)]
    Metadata(#[from] MetadataError),
}

pub struct RefreshCoordinator {
    metadata: Arc<dyn MetadataStore>,
    resolver: Arc<dyn UpstreamResolver>,
    config: RefreshConfig,
}

impl RefreshCoordinator {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        resolver: Arc<dyn UpstreamResolver>,
        config: RefreshConfig,
    ) -> Self {
        Self {
            metadata,
            resolver,
            config,
        }
    }

    pub fn config(&self) -> &RefreshConfig {
        &self.config
    }

    /// Make sure every key has a row, returning the rows in input order.
    ///
    /// Keys are validated up front; nothing is written if any key is invalid.
    /// A SUCCESS row found past the cache TTL is demoted to STALE on the way.
    pub async fn ensure_tracked(&self, keys: &[String]) -> Result<Vec<ArtifactRow>, RefreshError> {
        let parsed = keys
            .iter()
            .map(|raw| CanonicalKey::parse(raw).map(|key| (key, raw.clone())))
            .collect::<Result<Vec<_>, _>>()?;

        stream::iter(parsed)
            .map(|(key, raw)| async move { self.track(key, &raw).await })
            .buffered(self.config.concurrency.max(1))
            .try_collect()
            .await
    }

    async fn track(&self, key: CanonicalKey, raw: &str) -> Result<ArtifactRow, RefreshError> {
        let now = OffsetDateTime::now_utc();
        let mut row = self
            .metadata
            .upsert_artifact(&ArtifactRow::new(&key, raw, now))
            .await?;

        let ttl = self.config.cache_ttl();
        if row.is_expired(now, ttl)
            && self
                .metadata
                .mark_stale(key.as_str(), cutoff(now, ttl), now)
                .await?
        {
            tracing::debug!(key = %key, "Marked expired artifact stale");
            row.status = ArtifactStatus::Stale.as_str().to_string();
            row.updated_at = now;
        }

        Ok(row)
    }

    /// Drive a tracked key until its row is SUCCESS (fresh) or FAILURE.
    ///
    /// The key is canonicalized first; a blank key fails before any lookup.
    pub async fn refresh_to_terminal(&self, key: &str) -> Result<ArtifactRow, RefreshError> {
        let key = CanonicalKey::parse(key)?;
        let canonical_key = key.as_str();
        let row = self.load(canonical_key).await?;
        let now = OffsetDateTime::now_utc();

        if row.is_fresh(now, self.config.cache_ttl()) {
            metrics::CACHE_HITS.inc();
            tracing::debug!(key = %canonical_key, "Cache hit");
            return Ok(row);
        }

        if self
            .metadata
            .try_claim(canonical_key, self.claim_window(now))
            .await?
        {
            return self.refresh_and_save(&row).await;
        }

        metrics::FOLLOWER_WAITS.inc();
        self.follow(canonical_key).await
    }

    /// Refresh several keys with bounded, order-preserving fan-out.
    pub async fn refresh_all(
        &self,
        canonical_keys: &[String],
    ) -> Vec<Result<ArtifactRow, RefreshError>> {
        stream::iter(canonical_keys.iter().cloned())
            .map(|key| async move { self.refresh_to_terminal(&key).await })
            .buffered(self.config.concurrency.max(1))
            .collect()
            .await
    }

    /// Call the upstream for a row the caller has already claimed and record
    /// the outcome. Upstream failures become a FAILURE row, not an error.
    pub async fn refresh_and_save(&self, row: &ArtifactRow) -> Result<ArtifactRow, RefreshError> {
        let started = Instant::now();
        let outcome = self.resolver.resolve(&row.canonical_key).await;
        let elapsed = started.elapsed().as_secs_f64();
        let now = OffsetDateTime::now_utc();

        match outcome {
            Ok(url) => {
                metrics::record_upstream("success", elapsed);
                self.metadata
                    .complete_success(row.artifact_id, &url, now)
                    .await?;
                tracing::info!(key = %row.canonical_key, url = %url, "Artifact refreshed");
            }
            Err(e) => {
                metrics::record_upstream("failure", elapsed);
                let reason = e.to_string();
                self.metadata
                    .complete_failure(row.artifact_id, &reason, now)
                    .await?;
                tracing::warn!(key = %row.canonical_key, error = %reason, "Artifact refresh failed");
            }
        }

        self.metadata
            .get_artifact(row.artifact_id)
            .await?
            .ok_or_else(|| RefreshError::NotTracked(row.canonical_key.clone()))
    }

    /// Wait for another refresher to settle the row, taking over if its
    /// claim lapses.
    async fn follow(&self, canonical_key: &str) -> Result<ArtifactRow, RefreshError> {
        let started = Instant::now();
        let ttl = self.config.cache_ttl();

        loop {
            let row = self.load(canonical_key).await?;
            let now = OffsetDateTime::now_utc();

            match row.status()? {
                ArtifactStatus::Failure => return Ok(row),
                ArtifactStatus::Success if row.is_fresh(now, ttl) => return Ok(row),
                _ => {}
            }

            if self.may_take_over(&row, now)
                && self
                    .metadata
                    .try_claim(canonical_key, self.claim_window(now))
                    .await?
            {
                metrics::FOLLOWER_TAKEOVERS.inc();
                tracing::warn!(key = %canonical_key, "Claim lapsed, taking over refresh");
                return self.refresh_and_save(&row).await;
            }

            let waited = started.elapsed();
            if waited >= self.config.follower_max_wait() {
                metrics::FOLLOWER_TIMEOUTS.inc();
                return Err(RefreshError::FollowerTimeout {
                    key: canonical_key.to_string(),
                    waited,
                });
            }

            tokio::time::sleep(self.config.follower_poll_interval()).await;
        }
    }

    /// Whether the row looks claimable; the claim itself decides.
    fn may_take_over(&self, row: &ArtifactRow, now: OffsetDateTime) -> bool {
        if row.status != ArtifactStatus::Processing.as_str() {
            return true;
        }
        row.claimed_at
            .is_none_or(|claimed| claimed < cutoff(now, self.config.claim_lease()))
    }

    fn claim_window(&self, now: OffsetDateTime) -> ClaimWindow {
        ClaimWindow {
            claimed_at: now,
            success_fetched_before: cutoff(now, self.config.cache_ttl()),
            lease_cutoff: cutoff(now, self.config.claim_lease()),
        }
    }

    async fn load(&self, canonical_key: &str) -> Result<ArtifactRow, RefreshError> {
        self.metadata
            .get_artifact_by_key(canonical_key)
            .await?
            .ok_or_else(|| RefreshError::NotTracked(canonical_key.to_string()))
    }
}
