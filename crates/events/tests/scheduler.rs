mod common;

use std::time::Duration;

use assert_matches::assert_matches;
use chrono::{NaiveTime, TimeDelta};
use common::{minutes, t0, work_updated, Harness};
use quill_core::channels::DeliveryChannel;
use quill_core::digest::{DigestStatus, DigestType};
use quill_core::event_types::EventType;
use quill_core::preferences::{BatchFrequency, NotificationPreferences};
use quill_core::subscription::SubscriptionKind;
use quill_db::StoreError;
use quill_events::{DeliveryPayload, EngineConfig};
use tokio_util::sync::CancellationToken;

fn hours(h: i64) -> TimeDelta {
    TimeDelta::hours(h)
}

fn daily_batching(prefs: &mut NotificationPreferences) {
    prefs.enable_batching = true;
    prefs.batch_frequency = BatchFrequency::Daily;
}

/// User 1 batches daily and follows works 10..20.
async fn batching_harness() -> Harness {
    let h = Harness::new();
    h.prefs(1, daily_batching).await;
    for work in 10..20 {
        h.subscribe(1, SubscriptionKind::Work, work, &[EventType::WorkUpdated]).await;
    }
    h
}

// ---------------------------------------------------------------------------
// Digests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn digest_encloses_every_undelivered_item() {
    let h = batching_harness().await;
    for (i, work) in (10..13).enumerate() {
        let at = t0() - hours(3 - i as i64);
        h.engine.process_event_at(&work_updated(work), at).await.unwrap();
    }
    // One item per channel per event.
    assert_eq!(h.items(1).await.len(), 9);

    let report = h.scheduler.sweep_at(t0()).await.unwrap();
    assert_eq!(report.created, 1);
    assert_eq!(report.sent, 1);

    let digests = h.stores.digests.list_for_user(1).await.unwrap();
    assert_eq!(digests.len(), 1);
    let digest = &digests[0];
    assert_eq!(digest.status, DigestStatus::Sent);
    assert_eq!(digest.digest_type, DigestType::Daily);
    assert_eq!(digest.sent_at, Some(t0()));
    assert_eq!(digest.item_ids.len(), 9);

    let items = h.items(1).await;
    assert!(items.iter().all(|i| i.is_delivered && i.digest_id == Some(digest.id)));

    let sent = h.dispatcher.digests();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].channel, DeliveryChannel::Email);
    let DeliveryPayload::Digest(payload) = &sent[0].payload else {
        panic!("expected a digest payload");
    };
    assert_eq!(payload.subject, "3 new notifications");
    let sources: Vec<_> = payload.items.iter().map(|i| i.source_id).collect();
    assert_eq!(sources, vec![10, 11, 12]);
}

#[tokio::test]
async fn nothing_to_send_creates_no_digest() {
    let h = batching_harness().await;

    let report = h.scheduler.sweep_at(t0()).await.unwrap();

    assert_eq!(report.empty, 1);
    assert_eq!(report.created, 0);
    assert!(h.stores.digests.list_for_user(1).await.unwrap().is_empty());
    assert!(h.dispatcher.sent().is_empty());
}

#[tokio::test]
async fn next_digest_waits_for_the_period_and_skips_sent_items() {
    let h = batching_harness().await;
    h.engine
        .process_event_at(&work_updated(10), t0() - hours(1))
        .await
        .unwrap();
    h.scheduler.sweep_at(t0()).await.unwrap();

    h.engine
        .process_event_at(&work_updated(11), t0() + hours(1))
        .await
        .unwrap();

    let early = h.scheduler.sweep_at(t0() + hours(2)).await.unwrap();
    assert_eq!(early.created, 0);

    let due = h.scheduler.sweep_at(t0() + hours(24)).await.unwrap();
    assert_eq!(due.sent, 1);

    let digests = h.stores.digests.list_for_user(1).await.unwrap();
    assert_eq!(digests.len(), 2);
    let newest = &digests[0];
    let enclosed = h.stores.digests.items(newest.id).await.unwrap();
    assert_eq!(enclosed.len(), 3);
    assert!(enclosed.iter().all(|i| i.source_id == 11));
    assert_eq!(newest.window_start, t0());
}

#[tokio::test]
async fn first_digest_only_looks_back_one_period() {
    let h = batching_harness().await;
    h.engine
        .process_event_at(&work_updated(10), t0() - hours(30))
        .await
        .unwrap();
    h.engine
        .process_event_at(&work_updated(11), t0() - hours(2))
        .await
        .unwrap();

    h.scheduler.sweep_at(t0()).await.unwrap();

    let digest = &h.stores.digests.list_for_user(1).await.unwrap()[0];
    let enclosed = h.stores.digests.items(digest.id).await.unwrap();
    assert!(enclosed.iter().all(|i| i.source_id == 11));
}

#[tokio::test]
async fn weekly_batching_produces_weekly_digest() {
    let h = Harness::new();
    h.prefs(1, |p| {
        p.enable_batching = true;
        p.batch_frequency = BatchFrequency::Weekly;
    })
    .await;
    h.subscribe(1, SubscriptionKind::Work, 10, &[EventType::WorkUpdated]).await;
    h.engine
        .process_event_at(&work_updated(10), t0() - TimeDelta::days(5))
        .await
        .unwrap();

    h.scheduler.sweep_at(t0()).await.unwrap();

    let digest = &h.stores.digests.list_for_user(1).await.unwrap()[0];
    assert_eq!(digest.digest_type, DigestType::Weekly);
    assert_eq!(digest.status, DigestStatus::Sent);
}

#[tokio::test]
async fn digest_goes_to_first_enabled_channel() {
    let h = batching_harness().await;
    h.prefs(1, |p| {
        daily_batching(p);
        p.email_enabled = false;
    })
    .await;
    h.engine
        .process_event_at(&work_updated(10), t0() - hours(1))
        .await
        .unwrap();

    h.scheduler.sweep_at(t0()).await.unwrap();

    assert_eq!(h.dispatcher.digests()[0].channel, DeliveryChannel::Web);
}

// ---------------------------------------------------------------------------
// Digest failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failed_dispatch_leaves_digest_pending_and_items_undelivered() {
    let h = batching_harness().await;
    h.engine
        .process_event_at(&work_updated(10), t0() - hours(1))
        .await
        .unwrap();
    h.dispatcher.set_failing(true);

    let report = h.scheduler.sweep_at(t0()).await.unwrap();
    assert_eq!(report.failed_dispatches, 1);

    let digest = h.stores.digests.list_for_user(1).await.unwrap().remove(0);
    assert_eq!(digest.status, DigestStatus::Pending);
    assert_eq!(digest.attempts, 1);
    assert!(h.items(1).await.iter().all(|i| !i.is_delivered));

    // A new item arrives while the digest is unresolved.
    h.engine
        .process_event_at(&work_updated(11), t0() + minutes(10))
        .await
        .unwrap();
    let report = h.scheduler.sweep_at(t0() + minutes(20)).await.unwrap();
    assert_eq!(report.retried, 1);
    assert_eq!(report.in_flight, 1);
    assert_eq!(h.stores.digests.list_for_user(1).await.unwrap().len(), 1);

    h.dispatcher.set_failing(false);
    let report = h.scheduler.sweep_at(t0() + minutes(30)).await.unwrap();
    assert_eq!(report.sent, 1);

    let digest = h.stores.digests.get(digest.id).await.unwrap().unwrap();
    assert_eq!(digest.status, DigestStatus::Sent);
    for item in h.items(1).await {
        if item.source_id == 10 {
            assert!(item.is_delivered);
            assert_eq!(item.digest_id, Some(digest.id));
        } else {
            assert!(!item.is_delivered);
            assert_eq!(item.digest_id, None);
        }
    }
}

#[tokio::test]
async fn exhausted_digest_fails_and_can_be_requeued() {
    let h = batching_harness().await;
    h.engine
        .process_event_at(&work_updated(10), t0() - hours(1))
        .await
        .unwrap();
    h.dispatcher.set_failing(true);

    for sweep in 0..3 {
        h.scheduler.sweep_at(t0() + minutes(sweep)).await.unwrap();
    }
    let digest = h.stores.digests.list_for_user(1).await.unwrap().remove(0);
    assert_eq!(digest.status, DigestStatus::Failed);
    assert_eq!(digest.attempts, 3);

    // Failed digests are not retried and their items stay enclosed.
    let report = h.scheduler.sweep_at(t0() + minutes(5)).await.unwrap();
    assert_eq!(report.retried, 0);
    assert_eq!(report.empty, 1);

    h.dispatcher.set_failing(false);
    let requeued = h.stores.digests.requeue(digest.id).await.unwrap();
    assert_eq!(requeued.status, DigestStatus::Pending);
    assert_eq!(requeued.attempts, 0);

    let report = h.scheduler.sweep_at(t0() + minutes(10)).await.unwrap();
    assert_eq!(report.retried, 1);
    assert_eq!(report.sent, 1);
    assert!(h.items(1).await.iter().all(|i| i.is_delivered));
}

#[tokio::test]
async fn requeue_refuses_a_sent_digest() {
    let h = batching_harness().await;
    h.engine
        .process_event_at(&work_updated(10), t0() - hours(1))
        .await
        .unwrap();
    h.scheduler.sweep_at(t0()).await.unwrap();

    let digest = h.stores.digests.list_for_user(1).await.unwrap().remove(0);
    let err = h.stores.digests.requeue(digest.id).await.unwrap_err();
    assert_matches!(err, StoreError::InvalidTransition(_));
}

#[tokio::test(start_paused = true)]
async fn stalled_digest_dispatch_times_out() {
    let h = batching_harness().await;
    h.engine
        .process_event_at(&work_updated(10), t0() - hours(1))
        .await
        .unwrap();
    h.dispatcher.set_stalled(true);

    let report = h.scheduler.sweep_at(t0()).await.unwrap();

    assert_eq!(report.failed_dispatches, 1);
    let digest = h.stores.digests.list_for_user(1).await.unwrap().remove(0);
    assert_eq!(digest.status, DigestStatus::Pending);
    assert!(h.items(1).await.iter().all(|i| !i.is_delivered));
}

// ---------------------------------------------------------------------------
// Redelivery
// ---------------------------------------------------------------------------

fn web_only(prefs: &mut NotificationPreferences) {
    prefs.email_enabled = false;
    prefs.push_enabled = false;
}

#[tokio::test]
async fn failed_immediate_item_is_redelivered() {
    let h = Harness::new();
    h.prefs(1, web_only).await;
    h.subscribe(1, SubscriptionKind::Work, 10, &[EventType::WorkUpdated]).await;
    h.dispatcher.set_failing(true);
    h.engine.process_event_at(&work_updated(10), t0()).await.unwrap();
    h.dispatcher.set_failing(false);

    // Too young: the engine may still be dispatching it.
    let report = h.scheduler.sweep_at(t0()).await.unwrap();
    assert_eq!(report.redelivered, 0);

    let report = h.scheduler.sweep_at(t0() + minutes(1)).await.unwrap();
    assert_eq!(report.redelivered, 1);
    let item = h.items(1).await.remove(0);
    assert!(item.is_delivered);
    assert_eq!(item.delivered_at, Some(t0() + minutes(1)));
}

#[tokio::test]
async fn quiet_hours_items_go_out_when_quiet_hours_end() {
    let h = Harness::new();
    h.prefs(1, |p| {
        web_only(p);
        p.quiet_hours_start = NaiveTime::from_hms_opt(22, 0, 0);
        p.quiet_hours_end = NaiveTime::from_hms_opt(7, 0, 0);
    })
    .await;
    h.subscribe(1, SubscriptionKind::Work, 10, &[EventType::WorkUpdated]).await;

    // 23:30 and 06:59 are quiet; 07:00 is not.
    let late = t0() + minutes(11 * 60 + 30);
    h.engine.process_event_at(&work_updated(10), late).await.unwrap();

    let report = h.scheduler.sweep_at(late + minutes(30)).await.unwrap();
    assert_eq!(report.redelivered, 0);
    let report = h.scheduler.sweep_at(t0() + minutes(18 * 60 + 59)).await.unwrap();
    assert_eq!(report.redelivered, 0);
    let report = h.scheduler.sweep_at(t0() + hours(19)).await.unwrap();
    assert_eq!(report.redelivered, 1);
    assert!(h.items(1).await[0].is_delivered);
}

#[tokio::test]
async fn redelivery_stops_after_max_attempts() {
    let h = Harness::new();
    h.prefs(1, web_only).await;
    h.subscribe(1, SubscriptionKind::Work, 10, &[EventType::WorkUpdated]).await;
    h.dispatcher.set_failing(true);
    h.engine.process_event_at(&work_updated(10), t0()).await.unwrap();

    let mut failures = 0;
    for sweep in 1..=5 {
        let report = h.scheduler.sweep_at(t0() + minutes(sweep)).await.unwrap();
        failures += report.redelivery_failures;
    }

    // One failure in the engine, two in the sweeps, then it is given up on.
    assert_eq!(failures, 2);
    let item = h.items(1).await.remove(0);
    assert_eq!(item.delivery_attempts, 3);
    assert!(!item.is_delivered);
}

#[tokio::test]
async fn batching_users_are_not_redelivered_individually() {
    let h = batching_harness().await;
    h.engine.process_event_at(&work_updated(10), t0()).await.unwrap();
    h.dispatcher.set_failing(true);

    let report = h.scheduler.sweep_at(t0() + minutes(1)).await.unwrap();
    assert_eq!(report.redelivered + report.redelivery_failures, 0);
}

// ---------------------------------------------------------------------------
// Loop
// ---------------------------------------------------------------------------

#[tokio::test]
async fn run_stops_on_cancel() {
    let h = Harness::with_config(EngineConfig::default());
    let cancel = CancellationToken::new();
    cancel.cancel();

    tokio::time::timeout(Duration::from_secs(5), h.scheduler.run(cancel))
        .await
        .expect("scheduler should stop once cancelled");
}
