//! The notification engine: event in, items out.
//!
//! [`NotificationEngine::process_event`] runs matcher, evaluator, item
//! creation, and immediate dispatch for one event. Each user is processed
//! independently; a storage or dispatch failure for one user never stops
//! the others. Redelivery of the same event is absorbed by the dedup check
//! inside [`NotificationStore::admit`](quill_db::NotificationStore::admit).

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use quill_core::channels::DeliveryChannel;
use quill_core::preferences::NotificationPreferences;
use quill_core::subscription::ContentAttributes;
use quill_core::types::{DbId, Timestamp};
use quill_db::models::notification::{NewNotificationItem, NotificationItem};
use quill_db::models::subscription::Subscription;
use quill_db::Stores;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use validator::Validate;

use crate::bus::NotificationEvent;
use crate::config::EngineConfig;
use crate::delivery::{deliver_with_timeout, DeliveryDispatcher, DeliveryPayload, ItemPayload};
use crate::error::EngineError;
use crate::evaluator::{self, Decision, RejectReason};
use crate::matcher::SubscriptionMatcher;

// ---------------------------------------------------------------------------
// ProcessReport
// ---------------------------------------------------------------------------

/// What one `process_event` call did. For logging and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessReport {
    /// Subscriptions returned by the matcher.
    pub matched: usize,
    /// Distinct users among the matches.
    pub users: usize,
    pub created: usize,
    pub filtered: usize,
    pub channel_disabled: usize,
    pub rate_limited: usize,
    pub duplicates: usize,
    pub dispatched: usize,
    pub dispatch_failures: usize,
    /// Items left for the digest or the redelivery sweep.
    pub deferred: usize,
    /// Users whose processing stopped on a storage error.
    pub failed_users: usize,
}

impl ProcessReport {
    fn record_reject(&mut self, reason: &RejectReason) {
        match reason {
            RejectReason::Filter(_) => self.filtered += 1,
            RejectReason::ChannelDisabled(_) => self.channel_disabled += 1,
            RejectReason::RateLimited { .. } => self.rate_limited += 1,
            RejectReason::Duplicate { .. } => self.duplicates += 1,
        }
    }
}

// ---------------------------------------------------------------------------
// NotificationEngine
// ---------------------------------------------------------------------------

pub struct NotificationEngine {
    stores: Stores,
    matcher: SubscriptionMatcher,
    dispatcher: Arc<dyn DeliveryDispatcher>,
    config: EngineConfig,
}

impl NotificationEngine {
    pub fn new(stores: Stores, dispatcher: Arc<dyn DeliveryDispatcher>, config: EngineConfig) -> Self {
        Self {
            matcher: SubscriptionMatcher::new(stores.subscriptions.clone()),
            stores,
            dispatcher,
            config,
        }
    }

    /// Process one event at the current time.
    pub async fn process_event(
        &self,
        event: &NotificationEvent,
    ) -> Result<ProcessReport, EngineError> {
        self.process_event_at(event, Utc::now()).await
    }

    /// Process one event as of `now`.
    ///
    /// A malformed event is rejected before any side effect. Otherwise
    /// every matched user is processed; if any of them hit a storage error
    /// the first such error is returned after the rest have finished, and
    /// the whole call may be retried.
    pub async fn process_event_at(
        &self,
        event: &NotificationEvent,
        now: Timestamp,
    ) -> Result<ProcessReport, EngineError> {
        event.validate()?;
        let attrs = ContentAttributes::from_extra(&event.extra_data)?;

        let matches = self.matcher.find_matches(event).await?;
        let mut report = ProcessReport {
            matched: matches.len(),
            ..Default::default()
        };

        let mut by_user: BTreeMap<DbId, Vec<Subscription>> = BTreeMap::new();
        for subscription in matches {
            by_user.entry(subscription.user_id).or_default().push(subscription);
        }
        report.users = by_user.len();

        let mut first_error = None;
        for (user_id, subscriptions) in by_user {
            if let Err(e) = self
                .process_user(event, &attrs, user_id, &subscriptions, now, &mut report)
                .await
            {
                tracing::warn!(
                    user_id,
                    event_type = %event.event_type,
                    source_id = event.source_id,
                    error = %e,
                    "Failed to process event for user"
                );
                report.failed_users += 1;
                first_error.get_or_insert(e);
            }
        }

        tracing::debug!(
            event_type = %event.event_type,
            source_id = event.source_id,
            ?report,
            "Event processed"
        );

        match first_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    async fn process_user(
        &self,
        event: &NotificationEvent,
        attrs: &ContentAttributes,
        user_id: DbId,
        subscriptions: &[Subscription],
        now: Timestamp,
        report: &mut ProcessReport,
    ) -> Result<(), EngineError> {
        // Several subscriptions of one user can hit the same event; the
        // first whose filters pass owns the items.
        let mut chosen = None;
        for subscription in subscriptions {
            match evaluator::evaluate_filters(&subscription.filters, attrs) {
                Ok(()) => {
                    chosen = Some(subscription);
                    break;
                }
                Err(reason) => {
                    tracing::debug!(
                        user_id,
                        subscription_id = subscription.id,
                        %reason,
                        "Rejected"
                    );
                    report.record_reject(&reason);
                }
            }
        }
        let Some(subscription) = chosen else {
            return Ok(());
        };

        let stored = self.stores.preferences.get(user_id).await?;
        let prefs = NotificationPreferences::resolve(user_id, stored);
        let plan = evaluator::plan_channels(&prefs, event.event_type, now);
        let limits = evaluator::admission_limits(&prefs);

        for channel in &plan.disabled {
            let reason = RejectReason::ChannelDisabled(*channel);
            tracing::debug!(user_id, subscription_id = subscription.id, %reason, "Rejected");
            report.record_reject(&reason);
        }

        let mut created_any = false;
        for channel in plan.enabled {
            let item = new_item(event, user_id, channel, subscription.id, now);
            let admission = self.stores.notifications.admit(item, limits).await?;

            match Decision::from(admission) {
                Decision::Accept(item) => {
                    report.created += 1;
                    created_any = true;
                    if plan.mode.is_immediate() {
                        if self.dispatch_item(&item, now).await? {
                            report.dispatched += 1;
                        } else {
                            report.dispatch_failures += 1;
                        }
                    } else {
                        tracing::debug!(
                            user_id,
                            item_id = item.id,
                            mode = ?plan.mode,
                            "Item deferred"
                        );
                        report.deferred += 1;
                    }
                }
                Decision::Reject(reason) => {
                    tracing::debug!(
                        user_id,
                        subscription_id = subscription.id,
                        %channel,
                        %reason,
                        "Rejected"
                    );
                    report.record_reject(&reason);
                }
            }
        }

        if created_any {
            self.stores
                .subscriptions
                .touch_notified(subscription.id, now)
                .await?;
        }
        Ok(())
    }

    /// Send one item now. Returns `false` when the dispatch failed; the item
    /// stays undelivered with its attempt counter raised.
    async fn dispatch_item(&self, item: &NotificationItem, now: Timestamp) -> Result<bool, EngineError> {
        let payload = DeliveryPayload::Item(ItemPayload::from(item));
        let result = deliver_with_timeout(
            self.dispatcher.as_ref(),
            item.user_id,
            item.channel,
            &payload,
            self.config.dispatch_timeout,
        )
        .await;

        match result {
            Ok(()) => {
                self.stores.notifications.mark_delivered(item.id, now).await?;
                Ok(true)
            }
            Err(e) => {
                let attempts = self.stores.notifications.record_delivery_failure(item.id).await?;
                log_item_failure(item, attempts, self.config.max_delivery_attempts, &e);
                Ok(false)
            }
        }
    }

    /// Consume events from the bus until it closes or `cancel` fires.
    ///
    /// Each event is processed on its own task; in-flight tasks are awaited
    /// before returning.
    pub async fn run(
        self: Arc<Self>,
        mut receiver: broadcast::Receiver<NotificationEvent>,
        cancel: CancellationToken,
    ) {
        let tracker = TaskTracker::new();

        loop {
            let received = tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Notification engine cancelled");
                    break;
                }
                received = receiver.recv() => received,
            };

            match received {
                Ok(event) => {
                    let engine = Arc::clone(&self);
                    tracker.spawn(async move {
                        if let Err(e) = engine.process_event(&event).await {
                            tracing::error!(
                                error = %e,
                                event_type = %event.event_type,
                                source_id = event.source_id,
                                "Failed to process event"
                            );
                        }
                    });
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(
                        skipped = n,
                        "Notification engine lagged, some events were not processed"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("Event bus closed, notification engine shutting down");
                    break;
                }
            }
        }

        tracker.close();
        tracker.wait().await;
    }
}

fn new_item(
    event: &NotificationEvent,
    user_id: DbId,
    channel: DeliveryChannel,
    subscription_id: DbId,
    now: Timestamp,
) -> NewNotificationItem {
    NewNotificationItem {
        user_id,
        event: event.event_type,
        channel,
        priority: event.priority(),
        subscription_id: Some(subscription_id),
        source_id: event.source_id,
        source_type: event.source_type.clone(),
        title: event.title.clone(),
        description: event.description.clone(),
        action_url: event.action_url.clone(),
        actor_id: event.actor_id,
        actor_name: event.actor_name.clone(),
        extra_data: event.extra_data.clone(),
        created_at: now,
    }
}

/// Warn on a failed item dispatch; past the attempt budget it is an error.
pub(crate) fn log_item_failure(
    item: &NotificationItem,
    attempts: i32,
    max_attempts: i32,
    error: &crate::delivery::DispatchError,
) {
    if attempts >= max_attempts {
        tracing::error!(
            item_id = item.id,
            user_id = item.user_id,
            channel = %item.channel,
            attempts,
            error = %error,
            "Item delivery attempts exhausted"
        );
    } else {
        tracing::warn!(
            item_id = item.id,
            user_id = item.user_id,
            channel = %item.channel,
            attempts,
            error = %error,
            "Item delivery failed"
        );
    }
}
