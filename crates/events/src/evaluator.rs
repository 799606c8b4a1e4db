//! Per-candidate accept/reject rules.
//!
//! The pure checks (content filters, channel toggles, quiet hours) live
//! here. The rate limit and dedup checks need other items, so they run
//! inside [`NotificationStore::admit`] and come back as an [`Admission`]
//! that [`Decision`] reads.
//!
//! [`NotificationStore::admit`]: quill_db::NotificationStore::admit

use std::fmt;

use quill_core::channels::DeliveryChannel;
use quill_core::event_types::EventType;
use quill_core::preferences::NotificationPreferences;
use quill_core::subscription::{ContentAttributes, FilterRejection, SubscriptionFilters};
use quill_core::types::{DbId, Timestamp};
use quill_db::models::notification::{Admission, AdmissionLimits, NotificationItem};

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

/// Why a (subscription, channel) pair produced no item.
#[derive(Debug, Clone, PartialEq)]
pub enum RejectReason {
    Filter(FilterRejection),
    ChannelDisabled(DeliveryChannel),
    RateLimited { recent_count: i64 },
    Duplicate { existing_id: DbId },
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::Filter(rejection) => write!(f, "filtered: {rejection}"),
            RejectReason::ChannelDisabled(channel) => write!(f, "{channel} disabled"),
            RejectReason::RateLimited { recent_count } => {
                write!(f, "rate limited ({recent_count} in the last hour)")
            }
            RejectReason::Duplicate { existing_id } => write!(f, "duplicate of item {existing_id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Accept(NotificationItem),
    Reject(RejectReason),
}

impl From<Admission> for Decision {
    fn from(admission: Admission) -> Self {
        match admission {
            Admission::Created(item) => Decision::Accept(item),
            Admission::RateLimited { recent_count } => {
                Decision::Reject(RejectReason::RateLimited { recent_count })
            }
            Admission::Duplicate { existing_id } => {
                Decision::Reject(RejectReason::Duplicate { existing_id })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// Content filters, conjunctive; an unset filter or missing attribute passes.
pub fn evaluate_filters(
    filters: &SubscriptionFilters,
    attrs: &ContentAttributes,
) -> Result<(), RejectReason> {
    filters.evaluate(attrs).map_err(RejectReason::Filter)
}

/// How accepted items for one user should leave the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Dispatch now.
    Immediate,
    /// Leave for the user's next digest.
    Batched,
    /// Hold until quiet hours end.
    QuietHours,
}

impl DeliveryMode {
    pub fn for_user(prefs: &NotificationPreferences, now: Timestamp) -> Self {
        if prefs.enable_batching {
            DeliveryMode::Batched
        } else if prefs.is_quiet_at(now) {
            DeliveryMode::QuietHours
        } else {
            DeliveryMode::Immediate
        }
    }

    pub fn is_immediate(self) -> bool {
        self == DeliveryMode::Immediate
    }
}

/// Channels an event may produce items on for one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelPlan {
    pub enabled: Vec<DeliveryChannel>,
    pub disabled: Vec<DeliveryChannel>,
    pub mode: DeliveryMode,
}

/// Split channels by the user's global and per-event toggles. A disabled
/// channel never affects the others.
pub fn plan_channels(
    prefs: &NotificationPreferences,
    event: EventType,
    now: Timestamp,
) -> ChannelPlan {
    let (enabled, disabled) = DeliveryChannel::ALL
        .into_iter()
        .partition(|channel| prefs.allows(event, *channel));
    ChannelPlan {
        enabled,
        disabled,
        mode: DeliveryMode::for_user(prefs, now),
    }
}

pub fn admission_limits(prefs: &NotificationPreferences) -> AdmissionLimits {
    AdmissionLimits {
        max_per_hour: prefs.max_notifications_per_hour,
        dedup_window: prefs.min_time_between_similar(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
