// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Event subscription lifecycle.

use calendar_presence::db::Store;
use calendar_presence::error::AppError;
use calendar_presence::services::signing::new_client_state;
use calendar_presence::services::subscription::SUBSCRIPTION_VERSION;

mod common;
use common::{connected_user, TestEnv};

#[tokio::test]
async fn test_create_links_subscription_to_user() {
    let t = TestEnv::new();
    t.store.seed_user(connected_user("u1", "r1"));

    let sub = t.engine().create_my_event_subscription("u1").await.unwrap();

    assert_eq!(sub.chat_creator_id, "u1");
    assert_eq!(sub.version, SUBSCRIPTION_VERSION);
    assert_eq!(sub.remote.creator_id, "r1");
    assert_eq!(sub.remote.client_state.len(), 64);
    assert_ne!(
        sub.remote.client_state,
        new_client_state(&t.config().webhook_secret, "u2")
    );

    let loaded = t.engine().load_my_event_subscription("u1").await.unwrap();
    assert_eq!(loaded, Some(sub));
}

#[tokio::test]
async fn test_renew_extends_expiration() {
    let t = TestEnv::new();
    t.store.seed_user(connected_user("u1", "r1"));
    let sub = t.engine().create_my_event_subscription("u1").await.unwrap();

    let renewed = t
        .engine()
        .renew_my_event_subscription("u1")
        .await
        .unwrap()
        .unwrap();

    assert_eq!(renewed.remote.id, sub.remote.id);
    assert!(renewed.remote.expiration > sub.remote.expiration);
}

#[tokio::test]
async fn test_renew_replaces_subscription_provider_forgot() {
    let t = TestEnv::new();
    t.store.seed_user(connected_user("u1", "r1"));
    let old = t.engine().create_my_event_subscription("u1").await.unwrap();
    *t.calendar.renew_not_found.lock().unwrap() = true;

    let new = t
        .engine()
        .renew_my_event_subscription("u1")
        .await
        .unwrap()
        .unwrap();

    assert_ne!(new.remote.id, old.remote.id);
    assert!(t
        .store
        .load_subscription(&old.remote.id)
        .await
        .unwrap()
        .is_none());
    let user = t.store.load_user("u1").await.unwrap().unwrap();
    assert_eq!(user.settings.event_subscription_id, Some(new.remote.id));
}

#[tokio::test]
async fn test_renew_without_subscription_is_none() {
    let t = TestEnv::new();
    t.store.seed_user(connected_user("u1", "r1"));

    let renewed = t.engine().renew_my_event_subscription("u1").await.unwrap();
    assert!(renewed.is_none());
}

#[tokio::test]
async fn test_delete_clears_settings() {
    let t = TestEnv::new();
    t.store.seed_user(connected_user("u1", "r1"));
    let sub = t.engine().create_my_event_subscription("u1").await.unwrap();

    t.engine().delete_my_event_subscription("u1").await.unwrap();

    let user = t.store.load_user("u1").await.unwrap().unwrap();
    assert_eq!(user.settings.event_subscription_id, None);
    assert_eq!(
        *t.calendar.deleted_subscriptions.lock().unwrap(),
        vec![sub.remote.id]
    );

    let err = t
        .engine()
        .delete_my_event_subscription("u1")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn test_renew_all_counts_outcomes() {
    let t = TestEnv::new();
    t.store.seed_user(connected_user("u1", "r1"));
    t.store.seed_user(connected_user("u2", "r2"));
    t.engine().create_my_event_subscription("u1").await.unwrap();

    // Points at a subscription that was never stored
    let mut broken = connected_user("u3", "r3");
    broken.settings.event_subscription_id = Some("missing".to_string());
    t.store.seed_user(broken);

    let summary = t.engine().renew_all_subscriptions().await.unwrap();
    assert_eq!(summary.users_processed, 3);
    assert_eq!(summary.subscriptions_renewed, 1);
    assert_eq!(summary.subscriptions_failed, 1);
}
