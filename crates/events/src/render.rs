//! Plain-text rendering of digests.
//!
//! A digest encloses a user's items on every channel, so the same event
//! about the same source can appear more than once. Rendering collapses
//! those to one entry keyed by `(event, source_id)`.

use std::collections::{BTreeMap, HashSet};

use quill_core::event_types::EventType;
use quill_db::models::digest::NotificationDigest;
use quill_db::models::notification::NotificationItem;

use crate::delivery::{DigestPayload, ItemPayload};

/// Subject line for a digest with `count` entries.
pub fn digest_subject(count: usize) -> String {
    match count {
        1 => "1 new notification".to_string(),
        n => format!("{n} new notifications"),
    }
}

/// Render `items` (creation order) as the payload for `digest`.
pub fn render_digest(digest: &NotificationDigest, items: &[NotificationItem]) -> DigestPayload {
    let entries = distinct_entries(items);

    DigestPayload {
        digest_id: digest.id,
        digest_type: digest.digest_type,
        subject: digest_subject(entries.len()),
        body: digest_body(&entries),
        items: entries.into_iter().map(ItemPayload::from).collect(),
    }
}

fn distinct_entries(items: &[NotificationItem]) -> Vec<&NotificationItem> {
    let mut seen = HashSet::new();
    items
        .iter()
        .filter(|item| seen.insert((item.event, item.source_id)))
        .collect()
}

fn digest_body(entries: &[&NotificationItem]) -> String {
    let mut groups: BTreeMap<EventType, Vec<&NotificationItem>> = BTreeMap::new();
    for item in entries {
        groups.entry(item.event).or_default().push(item);
    }

    // Most urgent group first; event type order breaks ties.
    let mut ordered: Vec<_> = groups.into_iter().collect();
    ordered.sort_by_key(|(event, items)| {
        let rank = items.iter().map(|i| i.priority.rank()).min().unwrap_or(u8::MAX);
        (rank, *event)
    });

    let mut body = String::new();
    body.push_str(&format!("You have {}:\n\n", digest_subject(entries.len())));
    for (event, items) in ordered {
        body.push_str(&format!("{} ({}):\n", event.display_name(), items.len()));
        for item in items {
            body.push_str(&format!("  - {}\n", item.title));
            if !item.action_url.is_empty() {
                body.push_str(&format!("    {}\n", item.action_url));
            }
        }
        body.push('\n');
    }
    body.push_str("---\nManage your notification preferences in your account settings.\n");
    body
}

#[cfg(test)]
mod tests {
    use chrono::{TimeDelta, TimeZone, Utc};
    use quill_core::channels::DeliveryChannel;
    use quill_core::digest::{DigestStatus, DigestType};
    use quill_core::event_types::Priority;

    use super::*;

    fn item(id: i64, event: EventType, source_id: i64, channel: DeliveryChannel) -> NotificationItem {
        let t0 = Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap();
        NotificationItem {
            id,
            user_id: 1,
            event,
            channel,
            priority: event.default_priority(),
            subscription_id: None,
            source_id,
            source_type: "work".into(),
            title: format!("item {id}"),
            description: String::new(),
            action_url: if id % 2 == 0 { format!("/works/{source_id}") } else { String::new() },
            actor_id: None,
            actor_name: String::new(),
            extra_data: serde_json::json!({}),
            digest_id: Some(9),
            delivery_attempts: 0,
            is_read: false,
            read_at: None,
            is_delivered: false,
            delivered_at: None,
            created_at: t0 + TimeDelta::minutes(id),
        }
    }

    fn digest() -> NotificationDigest {
        NotificationDigest {
            id: 9,
            user_id: 1,
            digest_type: DigestType::Daily,
            item_ids: vec![],
            status: DigestStatus::Pending,
            attempts: 0,
            window_start: Utc::now(),
            created_at: Utc::now(),
            sent_at: None,
        }
    }

    #[test]
    fn subject_pluralizes() {
        assert_eq!(digest_subject(1), "1 new notification");
        assert_eq!(digest_subject(4), "4 new notifications");
    }

    #[test]
    fn duplicates_across_channels_collapse() {
        let items = vec![
            item(1, EventType::WorkUpdated, 10, DeliveryChannel::Email),
            item(2, EventType::WorkUpdated, 10, DeliveryChannel::Web),
            item(3, EventType::KudosReceived, 10, DeliveryChannel::Email),
        ];
        let payload = render_digest(&digest(), &items);
        assert_eq!(payload.subject, "2 new notifications");
        let ids: Vec<_> = payload.items.iter().map(|i| i.item_id).collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn groups_are_ordered_by_priority() {
        let items = vec![
            item(1, EventType::KudosReceived, 10, DeliveryChannel::Email),
            item(2, EventType::WorkUpdated, 11, DeliveryChannel::Email),
            item(3, EventType::CommentReceived, 12, DeliveryChannel::Email),
        ];
        assert_eq!(items[2].priority, Priority::High);

        let body = render_digest(&digest(), &items).body;
        let comments = body.find("New Comments (1):").unwrap();
        let updates = body.find("Work Updates (1):").unwrap();
        let kudos = body.find("Kudos (1):").unwrap();
        assert!(comments < updates && updates < kudos);
        assert!(body.contains("  - item 2\n    /works/11\n"));
    }

    #[test]
    fn single_item_body_is_complete() {
        let items = vec![item(2, EventType::WorkUpdated, 10, DeliveryChannel::Email)];
        let body = render_digest(&digest(), &items).body;
        assert_eq!(
            body,
            "You have 1 new notification:\n\n\
             Work Updates (1):\n  - item 2\n    /works/10\n\n\
             ---\nManage your notification preferences in your account settings.\n"
        );
    }
}
