// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore integration tests.
//!
//! These tests require the Firestore emulator to be running
//! (`FIRESTORE_EMULATOR_HOST` set); they are skipped otherwise.
//!
//! The emulator provides a clean state for each test run.

use calendar_presence::db::Store;
use calendar_presence::models::user::OAuthToken;
use calendar_presence::models::{
    EventMetadata, PresenceStatus, RemoteSubscription, StoredEvent, StoredSubscription,
};
use chrono::TimeZone;

mod common;
use common::{connected_user, event, test_db};

/// Generate a unique user ID for test isolation.
fn unique_user_id(prefix: &str) -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    format!("{}-{}", prefix, nanos)
}

// ═══════════════════════════════════════════════════════════════════════════
// USER TESTS
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_user_round_trip_and_index() {
    require_emulator!();

    let db = test_db().await;
    let user_id = unique_user_id("user");
    let remote_id = unique_user_id("remote");

    // Initially, user should not exist
    assert!(db.load_user(&user_id).await.unwrap().is_none());

    let mut user = connected_user(&user_id, &remote_id);
    user.last_status = Some(PresenceStatus::Away);
    db.store_user(&user).await.unwrap();
    db.store_user_in_index(&user.index_entry()).await.unwrap();

    let loaded = db.load_user(&user_id).await.unwrap().unwrap();
    assert_eq!(loaded, user);

    let index = db.load_user_index().await.unwrap();
    assert!(index.iter().any(|e| e.chat_user_id == user_id));
    assert_eq!(
        db.load_chat_user_id_by_remote(&remote_id).await.unwrap(),
        Some(user_id.clone())
    );

    db.delete_user(&user_id).await.unwrap();
    db.delete_user_from_index(&user_id).await.unwrap();
    assert!(db.load_user(&user_id).await.unwrap().is_none());
    assert!(db
        .load_user_index()
        .await
        .unwrap()
        .iter()
        .all(|e| e.chat_user_id != user_id));
}

#[tokio::test]
async fn test_active_events_update() {
    require_emulator!();

    let db = test_db().await;
    let user_id = unique_user_id("user");
    db.store_user(&connected_user(&user_id, "r1")).await.unwrap();

    let fingerprints = vec![event("m1", 0, 30).fingerprint()];
    db.store_user_active_events(&user_id, fingerprints.clone())
        .await
        .unwrap();
    db.store_user_custom_status_updates(&user_id, true)
        .await
        .unwrap();

    let token = OAuthToken {
        access_token: "fresh".to_string(),
        refresh_token: Some("r".to_string()),
        expires_at: chrono::Utc.with_ymd_and_hms(2026, 3, 2, 14, 0, 0).unwrap(),
    };
    db.store_user_oauth_token(&user_id, &token).await.unwrap();

    // Each write touches only its own field
    let loaded = db.load_user(&user_id).await.unwrap().unwrap();
    assert_eq!(loaded.active_events, fingerprints);
    assert!(loaded.is_custom_status_set);
    assert_eq!(loaded.oauth_token, Some(token));

    // Field updates never create a user
    let missing = unique_user_id("missing");
    assert!(db
        .store_user_active_events(&missing, Vec::new())
        .await
        .is_err());
    assert!(db.load_user(&missing).await.unwrap().is_none());
}

// ═══════════════════════════════════════════════════════════════════════════
// EVENT AND SUBSCRIPTION TESTS
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_event_snapshot_with_unsafe_uid() {
    require_emulator!();

    let db = test_db().await;
    let user_id = unique_user_id("user");
    // Provider UIDs may contain characters Firestore rejects in IDs
    let mut snapshot = event("a/b+c==", 0, 30);
    snapshot.subject = "Snapshot".to_string();

    db.store_user_event(&user_id, &StoredEvent { remote: snapshot.clone() })
        .await
        .unwrap();

    let loaded = db
        .load_user_event(&user_id, "a/b+c==")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(loaded.remote, snapshot);
    assert!(db
        .load_user_event(&user_id, "other")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_linked_channels() {
    require_emulator!();

    let db = test_db().await;
    let uid = unique_user_id("event");

    let mut metadata = EventMetadata::default();
    metadata.linked_channel_ids.insert("c1".to_string());
    metadata.linked_channel_ids.insert("c2".to_string());
    db.store_event_metadata(&uid, &metadata).await.unwrap();

    db.delete_linked_channel_from_event(&uid, "c1")
        .await
        .unwrap();

    let loaded = db.load_event_metadata(&uid).await.unwrap().unwrap();
    assert_eq!(
        loaded.linked_channel_ids.into_iter().collect::<Vec<_>>(),
        vec!["c2".to_string()]
    );
}

#[tokio::test]
async fn test_user_subscription_link() {
    require_emulator!();

    let db = test_db().await;
    let user_id = unique_user_id("user");
    let mut user = connected_user(&user_id, "r1");
    db.store_user(&user).await.unwrap();

    let subscription = StoredSubscription {
        remote: RemoteSubscription {
            id: unique_user_id("sub"),
            resource: "/users/r1/events".to_string(),
            change_type: "created,updated,deleted".to_string(),
            client_state: "state".to_string(),
            creator_id: "r1".to_string(),
            expiration: chrono::Utc.with_ymd_and_hms(2026, 3, 5, 12, 0, 0).unwrap(),
        },
        chat_creator_id: user_id.clone(),
        version: "0.1.0".to_string(),
    };
    db.store_user_subscription(&mut user, &subscription)
        .await
        .unwrap();

    let loaded = db.load_user(&user_id).await.unwrap().unwrap();
    assert_eq!(
        loaded.settings.event_subscription_id.as_deref(),
        Some(subscription.remote.id.as_str())
    );
    assert_eq!(
        db.load_subscription(&subscription.remote.id).await.unwrap(),
        Some(subscription.clone())
    );

    db.delete_user_subscription(&mut user, &subscription.remote.id)
        .await
        .unwrap();
    assert!(db
        .load_subscription(&subscription.remote.id)
        .await
        .unwrap()
        .is_none());
    let loaded = db.load_user(&user_id).await.unwrap().unwrap();
    assert!(loaded.settings.event_subscription_id.is_none());
}
