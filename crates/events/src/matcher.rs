//! Subscription matching.
//!
//! An event hits a subscription when the subscription is active, lists the
//! event type, and its target resolves to the event:
//!
//! | Kind         | Resolves on                                             |
//! |--------------|---------------------------------------------------------|
//! | `work`       | `source_id` for `"work"` or work activity, `work_ids`   |
//! | `author`     | `actor_id`, `source_id` for `"author"`, `author_ids`    |
//! | `series`     | `source_id` for `"series"`, `series_ids`                |
//! | `collection` | `source_id` for `"collection"`, `collection_ids`        |
//! | `tag`        | `source_id` for `"tag"`, `tag_ids`                      |
//!
//! Comments, kudos, and bookmarks are work activity: their `source_id` is
//! the work even when `source_type` names the comment or kudos itself.

use std::sync::Arc;

use quill_core::attributes;
use quill_core::subscription::SubscriptionKind;
use quill_core::types::DbId;
use quill_db::models::subscription::Subscription;
use quill_db::SubscriptionStore;
use validator::Validate;

use crate::bus::NotificationEvent;
use crate::error::EngineError;

pub struct SubscriptionMatcher {
    subscriptions: Arc<dyn SubscriptionStore>,
}

impl SubscriptionMatcher {
    pub fn new(subscriptions: Arc<dyn SubscriptionStore>) -> Self {
        Self { subscriptions }
    }

    /// Every active subscription the event hits, grouped by kind and
    /// ordered by id within a kind. An empty result is not an error.
    ///
    /// Subscriptions whose stored filters are invalid are logged and
    /// skipped. Only storage failures abort the lookup.
    pub async fn find_matches(
        &self,
        event: &NotificationEvent,
    ) -> Result<Vec<Subscription>, EngineError> {
        let mut matches = Vec::new();

        for kind in SubscriptionKind::ALL {
            let targets = targets_for(event, kind);
            if targets.is_empty() {
                continue;
            }

            let candidates = self
                .subscriptions
                .list_by_target(kind, &targets, event.event_type)
                .await?;

            for subscription in candidates {
                if let Err(e) = subscription.filters.validate() {
                    tracing::warn!(
                        subscription_id = subscription.id,
                        user_id = subscription.user_id,
                        error = %e,
                        "Skipping subscription with invalid filters"
                    );
                    continue;
                }
                matches.push(subscription);
            }
        }

        tracing::debug!(
            event_type = %event.event_type,
            source_id = event.source_id,
            matched = matches.len(),
            "Matched subscriptions"
        );
        Ok(matches)
    }
}

/// Target ids of `kind` the event resolves to, sorted and deduplicated.
fn targets_for(event: &NotificationEvent, kind: SubscriptionKind) -> Vec<DbId> {
    let mut targets = Vec::new();

    let names_kind = event.source_type.parse::<SubscriptionKind>() == Ok(kind);
    let on_work = kind == SubscriptionKind::Work && event.event_type.is_work_activity();
    if names_kind || on_work {
        targets.push(event.source_id);
    }

    if kind == SubscriptionKind::Author {
        targets.extend(event.actor_id);
    }

    match attributes::related_ids(&event.extra_data, attributes::related_ids_key(kind)) {
        Ok(ids) => targets.extend(ids),
        Err(e) => tracing::warn!(
            event_type = %event.event_type,
            source_id = event.source_id,
            error = %e,
            "Ignoring malformed related ids"
        ),
    }

    targets.sort_unstable();
    targets.dedup();
    targets
}
