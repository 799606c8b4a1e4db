//! PostgreSQL store tests. Run with `DATABASE_URL` pointing at a scratch
//! server and `--ignored`.

mod common;

use assert_matches::assert_matches;
use common::{item, limits, minutes, t0};
use quill_core::channels::DeliveryChannel;
use quill_core::digest::{DigestStatus, DigestType};
use quill_core::event_types::EventType;
use quill_core::preferences::{BatchFrequency, EventChannelPreference, NotificationPreferences};
use quill_core::subscription::{NewSubscription, SubscriptionKind};
use quill_db::models::digest::DigestClaim;
use quill_db::models::notification::Admission;
use quill_db::{DigestStore, NotificationStore, PgStore, PreferenceStore, SubscriptionStore};
use sqlx::PgPool;

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn subscription_put_upserts(pool: PgPool) {
    let store = PgStore::new(pool);
    let first = SubscriptionStore::put(
        &store,
        NewSubscription::new(1, SubscriptionKind::Work, 10, vec![EventType::WorkUpdated]),
    )
    .await
    .unwrap();
    let second = SubscriptionStore::put(
        &store,
        NewSubscription::new(1, SubscriptionKind::Work, 10, vec![EventType::WorkCompleted]),
    )
    .await
    .unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(second.events, vec![EventType::WorkCompleted]);

    let found = store
        .list_by_target(SubscriptionKind::Work, &[10], EventType::WorkCompleted)
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn preferences_round_trip(pool: PgPool) {
    let store = PgStore::new(pool);
    let mut prefs = NotificationPreferences::defaults(4);
    prefs.enable_batching = true;
    prefs.batch_frequency = BatchFrequency::Weekly;
    prefs.quiet_hours_start = chrono::NaiveTime::from_hms_opt(22, 0, 0);
    prefs.quiet_hours_end = chrono::NaiveTime::from_hms_opt(7, 0, 0);
    prefs.event_preferences.insert(
        EventType::KudosReceived,
        EventChannelPreference {
            email: false,
            web: true,
            push: false,
        },
    );
    PreferenceStore::put(&store, prefs.clone()).await.unwrap();
    assert_eq!(PreferenceStore::get(&store, 4).await.unwrap(), Some(prefs));
    assert_eq!(store.list_batching().await.unwrap().len(), 1);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn admission_cap_and_dedup(pool: PgPool) {
    let store = PgStore::new(pool);
    for source in 1..=3 {
        let admitted = store
            .admit(item(1, source, t0() + minutes(source)), limits(3, 10))
            .await
            .unwrap();
        assert_matches!(admitted, Admission::Created(_));
    }
    assert_matches!(
        store.admit(item(1, 9, t0() + minutes(5)), limits(3, 10)).await.unwrap(),
        Admission::RateLimited { recent_count: 3 }
    );

    let mut email = item(1, 9, t0() + minutes(5));
    email.channel = DeliveryChannel::Email;
    assert_matches!(
        store.admit(email, limits(3, 10)).await.unwrap(),
        Admission::RateLimited { recent_count: 3 }
    );
    let mut fan_out = item(1, 2, t0() + minutes(2));
    fan_out.channel = DeliveryChannel::Email;
    assert_matches!(store.admit(fan_out, limits(3, 10)).await.unwrap(), Admission::Created(_));

    assert_matches!(
        store.admit(item(1, 1, t0() + minutes(5)), limits(10, 10)).await.unwrap(),
        Admission::Duplicate { .. }
    );
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn digest_claim_and_send(pool: PgPool) {
    let store = PgStore::new(pool);
    for source in 1..=2 {
        store
            .admit(item(1, source, t0() + minutes(source)), limits(0, 0))
            .await
            .unwrap();
    }
    let claim = store
        .claim(1, DigestType::Daily, t0(), t0() + minutes(10))
        .await
        .unwrap();
    let digest = assert_matches!(claim, DigestClaim::Created { digest, .. } => digest);
    assert_matches!(
        store.claim(1, DigestType::Daily, t0(), t0() + minutes(11)).await.unwrap(),
        DigestClaim::InFlight(_)
    );

    let sent = store.mark_sent(digest.id, t0() + minutes(12)).await.unwrap();
    assert_eq!(sent.status, DigestStatus::Sent);
    let items = store.items(digest.id).await.unwrap();
    assert_eq!(items.len(), 2);
    assert!(items.iter().all(|i| i.is_delivered));
}
