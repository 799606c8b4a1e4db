#![allow(dead_code)]

use chrono::{TimeDelta, TimeZone, Utc};
use quill_core::channels::DeliveryChannel;
use quill_core::event_types::EventType;
use quill_core::types::{DbId, Timestamp};
use quill_db::models::notification::{AdmissionLimits, NewNotificationItem};

/// Fixed reference instant so window arithmetic is reproducible.
pub fn t0() -> Timestamp {
    Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap()
}

pub fn minutes(m: i64) -> TimeDelta {
    TimeDelta::minutes(m)
}

pub fn limits(max_per_hour: i32, dedup_minutes: i64) -> AdmissionLimits {
    AdmissionLimits {
        max_per_hour,
        dedup_window: minutes(dedup_minutes),
    }
}

pub fn item(user_id: DbId, source_id: DbId, created_at: Timestamp) -> NewNotificationItem {
    NewNotificationItem {
        user_id,
        event: EventType::WorkUpdated,
        channel: DeliveryChannel::Web,
        priority: EventType::WorkUpdated.default_priority(),
        subscription_id: None,
        source_id,
        source_type: "work".into(),
        title: format!("Work {source_id} updated"),
        description: String::new(),
        action_url: format!("/works/{source_id}"),
        actor_id: Some(7),
        actor_name: "author".into(),
        extra_data: serde_json::json!({}),
        created_at,
    }
}
