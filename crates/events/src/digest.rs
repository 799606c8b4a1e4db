//! Digest and redelivery scheduler.
//!
//! [`DigestScheduler`] runs as a background task. Each sweep:
//!
//! 1. retries every pending digest left by an earlier failed dispatch;
//! 2. claims and sends a digest for every batching user whose period has
//!    elapsed since their last sent digest;
//! 3. redelivers items that non-batching users did not receive
//!    immediately (failed dispatch or quiet hours), once the user is
//!    outside quiet hours.
//!
//! Claiming and completing a digest are single store calls. The dispatch in
//! between runs outside any lock with a bounded timeout.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use quill_core::channels::DeliveryChannel;
use quill_core::digest::{DigestStatus, DigestType};
use quill_core::preferences::NotificationPreferences;
use quill_core::types::{DbId, Timestamp};
use quill_db::models::digest::{DigestClaim, NotificationDigest};
use quill_db::models::notification::NotificationItem;
use quill_db::Stores;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::delivery::{deliver_with_timeout, DeliveryDispatcher, DeliveryPayload, ItemPayload};
use crate::engine::log_item_failure;
use crate::error::EngineError;
use crate::render::render_digest;

// ---------------------------------------------------------------------------
// SweepReport
// ---------------------------------------------------------------------------

/// What one sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Pending digests picked up for another attempt.
    pub retried: usize,
    /// New digests claimed this sweep.
    pub created: usize,
    pub sent: usize,
    pub failed_dispatches: usize,
    /// Due users with nothing to send.
    pub empty: usize,
    /// Due users whose pending digest blocked a new claim.
    pub in_flight: usize,
    pub redelivered: usize,
    pub redelivery_failures: usize,
    /// Users skipped because a store call failed.
    pub errors: usize,
}

// ---------------------------------------------------------------------------
// DigestScheduler
// ---------------------------------------------------------------------------

/// Background service that builds, sends, and retries digests.
pub struct DigestScheduler {
    stores: Stores,
    dispatcher: Arc<dyn DeliveryDispatcher>,
    config: EngineConfig,
}

impl DigestScheduler {
    pub fn new(stores: Stores, dispatcher: Arc<dyn DeliveryDispatcher>, config: EngineConfig) -> Self {
        Self {
            stores,
            dispatcher,
            config,
        }
    }

    /// Run the scheduler loop.
    ///
    /// Sweeps once per `digest_check_interval`, starting immediately. The
    /// loop exits gracefully when the provided [`CancellationToken`] is
    /// cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.digest_check_interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Digest scheduler cancelled");
                    break;
                }
                _ = interval.tick() => {
                    match self.sweep().await {
                        Ok(report) if report != SweepReport::default() => {
                            tracing::info!(?report, "Digest sweep finished");
                        }
                        Ok(_) => {}
                        Err(e) => tracing::error!(error = %e, "Digest sweep failed"),
                    }
                }
            }
        }
    }

    pub async fn sweep(&self) -> Result<SweepReport, EngineError> {
        self.sweep_at(Utc::now()).await
    }

    /// One sweep as of `now`.
    ///
    /// Failures for a single user or digest are logged and counted; only a
    /// failure to list the work itself is returned.
    pub async fn sweep_at(&self, now: Timestamp) -> Result<SweepReport, EngineError> {
        let mut report = SweepReport::default();

        self.retry_pending(now, &mut report).await?;
        self.send_due_digests(now, &mut report).await?;
        self.redeliver_items(now, &mut report).await?;

        Ok(report)
    }

    async fn retry_pending(&self, now: Timestamp, report: &mut SweepReport) -> Result<(), EngineError> {
        for digest in self.stores.digests.list_unresolved().await? {
            if digest.status != DigestStatus::Pending {
                continue;
            }
            report.retried += 1;
            if let Err(e) = self.retry_digest(&digest, now, report).await {
                tracing::warn!(digest_id = digest.id, user_id = digest.user_id, error = %e, "Digest retry failed");
                report.errors += 1;
            }
        }
        Ok(())
    }

    async fn retry_digest(
        &self,
        digest: &NotificationDigest,
        now: Timestamp,
        report: &mut SweepReport,
    ) -> Result<(), EngineError> {
        let prefs = self.preferences(digest.user_id).await?;
        let Some(channel) = prefs.digest_channel() else {
            tracing::debug!(digest_id = digest.id, user_id = digest.user_id, "No enabled channel for digest");
            return Ok(());
        };
        let items = self.stores.digests.items(digest.id).await?;
        self.deliver_digest(digest, &items, channel, now, report).await
    }

    async fn send_due_digests(&self, now: Timestamp, report: &mut SweepReport) -> Result<(), EngineError> {
        for prefs in self.stores.preferences.list_batching().await? {
            let user_id = prefs.user_id;
            if let Err(e) = self.send_digest_for(&prefs, now, report).await {
                tracing::warn!(user_id, error = %e, "Failed to build digest for user");
                report.errors += 1;
            }
        }
        Ok(())
    }

    async fn send_digest_for(
        &self,
        prefs: &NotificationPreferences,
        now: Timestamp,
        report: &mut SweepReport,
    ) -> Result<(), EngineError> {
        let user_id = prefs.user_id;
        let Some(channel) = prefs.digest_channel() else {
            tracing::debug!(user_id, "Batching user has every channel disabled");
            return Ok(());
        };

        let frequency = prefs.batch_frequency;
        if let Some(last_sent) = self.stores.digests.last_sent_at(user_id).await? {
            if last_sent + frequency.period() > now {
                return Ok(());
            }
        }

        let claim = self
            .stores
            .digests
            .claim(
                user_id,
                DigestType::for_frequency(frequency),
                now - frequency.first_run_lookback(),
                now,
            )
            .await?;

        match claim {
            DigestClaim::Created { digest, items } => {
                report.created += 1;
                tracing::debug!(user_id, digest_id = digest.id, items = items.len(), "Digest claimed");
                self.deliver_digest(&digest, &items, channel, now, report).await
            }
            DigestClaim::InFlight(digest) => {
                tracing::debug!(user_id, digest_id = digest.id, "Digest already in flight");
                report.in_flight += 1;
                Ok(())
            }
            DigestClaim::Empty => {
                report.empty += 1;
                Ok(())
            }
        }
    }

    async fn deliver_digest(
        &self,
        digest: &NotificationDigest,
        items: &[NotificationItem],
        channel: DeliveryChannel,
        now: Timestamp,
        report: &mut SweepReport,
    ) -> Result<(), EngineError> {
        let payload = DeliveryPayload::Digest(render_digest(digest, items));
        let result = deliver_with_timeout(
            self.dispatcher.as_ref(),
            digest.user_id,
            channel,
            &payload,
            self.config.dispatch_timeout,
        )
        .await;

        match result {
            Ok(()) => {
                self.stores.digests.mark_sent(digest.id, now).await?;
                report.sent += 1;
                tracing::info!(
                    user_id = digest.user_id,
                    digest_id = digest.id,
                    item_count = items.len(),
                    %channel,
                    "Digest delivered"
                );
            }
            Err(e) => {
                report.failed_dispatches += 1;
                let updated = self
                    .stores
                    .digests
                    .record_failure(digest.id, self.config.max_delivery_attempts)
                    .await?;
                if updated.status == DigestStatus::Failed {
                    tracing::error!(
                        user_id = digest.user_id,
                        digest_id = digest.id,
                        attempts = updated.attempts,
                        error = %e,
                        "Digest delivery attempts exhausted"
                    );
                } else {
                    tracing::warn!(
                        user_id = digest.user_id,
                        digest_id = digest.id,
                        attempts = updated.attempts,
                        error = %e,
                        "Digest delivery failed"
                    );
                }
            }
        }
        Ok(())
    }

    async fn redeliver_items(&self, now: Timestamp, report: &mut SweepReport) -> Result<(), EngineError> {
        let max_attempts = self.config.max_delivery_attempts;
        let cutoff = redelivery_cutoff(now, &self.config);

        let users = self
            .stores
            .notifications
            .users_with_pending_deliveries(max_attempts, cutoff)
            .await?;

        for user_id in users {
            if let Err(e) = self.redeliver_for(user_id, cutoff, now, report).await {
                tracing::warn!(user_id, error = %e, "Redelivery failed for user");
                report.errors += 1;
            }
        }
        Ok(())
    }

    async fn redeliver_for(
        &self,
        user_id: DbId,
        cutoff: Timestamp,
        now: Timestamp,
        report: &mut SweepReport,
    ) -> Result<(), EngineError> {
        let prefs = self.preferences(user_id).await?;
        if prefs.enable_batching || prefs.is_quiet_at(now) {
            return Ok(());
        }

        let items = self
            .stores
            .notifications
            .list_pending_deliveries(user_id, self.config.max_delivery_attempts, cutoff)
            .await?;

        for item in items {
            let payload = DeliveryPayload::Item(ItemPayload::from(&item));
            let result = deliver_with_timeout(
                self.dispatcher.as_ref(),
                user_id,
                item.channel,
                &payload,
                self.config.dispatch_timeout,
            )
            .await;

            match result {
                Ok(()) => {
                    self.stores.notifications.mark_delivered(item.id, now).await?;
                    report.redelivered += 1;
                }
                Err(e) => {
                    let attempts = self
                        .stores
                        .notifications
                        .record_delivery_failure(item.id)
                        .await?;
                    log_item_failure(&item, attempts, self.config.max_delivery_attempts, &e);
                    report.redelivery_failures += 1;
                }
            }
        }
        Ok(())
    }

    async fn preferences(&self, user_id: DbId) -> Result<NotificationPreferences, EngineError> {
        let stored = self.stores.preferences.get(user_id).await?;
        Ok(NotificationPreferences::resolve(user_id, stored))
    }
}

/// Items younger than one dispatch timeout may still be in the engine's
/// own immediate dispatch.
fn redelivery_cutoff(now: Timestamp, config: &EngineConfig) -> Timestamp {
    TimeDelta::from_std(config.dispatch_timeout)
        .ok()
        .and_then(|window| now.checked_sub_signed(window))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
