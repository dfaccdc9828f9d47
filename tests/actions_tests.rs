// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Interactive post action handlers.

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
};
use calendar_presence::models::PresenceStatus;
use calendar_presence::services::signing::action_signature;
use serde_json::{json, Value};
use tower::ServiceExt;

mod common;
use common::{connected_user, TestEnv};

fn action(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_signature_for_other_user_forbidden() {
    let t = TestEnv::new();
    t.store.seed_user(connected_user("u1", "r1"));
    let (app, state) = t.app();
    let signature = action_signature(&state.config.webhook_secret, "u2");

    let response = app
        .oneshot(action(
            "/actions/confirm-status-change",
            json!({
                "user_id": "u1",
                "context": { "value": true, "change_to": "dnd", "signature": signature }
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(t.chat.update_count(), 0);
}

#[tokio::test]
async fn test_confirm_status_change_updates_prompt() {
    let t = TestEnv::new();
    t.store.seed_user(connected_user("u1", "r1"));
    t.chat.set_status("u1", PresenceStatus::Online, false);
    let (app, state) = t.app();
    let signature = action_signature(&state.config.webhook_secret, "u1");

    let response = app
        .oneshot(action(
            "/actions/confirm-status-change",
            json!({
                "user_id": "u1",
                "context": { "value": true, "change_to": "away", "signature": signature }
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["update"]["message"], "Status changed to Away.");
    assert_eq!(t.chat.status_of("u1"), Some(PresenceStatus::Away));
}

#[tokio::test]
async fn test_unknown_target_status_bad_request() {
    let (app, state) = common::create_test_app();
    let signature = action_signature(&state.config.webhook_secret, "u1");

    let response = app
        .oneshot(action(
            "/actions/confirm-status-change",
            json!({
                "user_id": "u1",
                "context": { "value": true, "change_to": "busy", "signature": signature }
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_respond_to_event_returns_ephemeral_text() {
    let t = TestEnv::new();
    t.store.seed_user(connected_user("u1", "r1"));
    let (app, state) = t.app();
    let signature = action_signature(&state.config.webhook_secret, "u1");

    let response = app
        .oneshot(action(
            "/actions/respond",
            json!({
                "user_id": "u1",
                "context": {
                    "event_id": "AAMk1",
                    "selected_option": "Yes",
                    "signature": signature
                }
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(
        body["ephemeral_text"],
        "You have responded \"Yes\" to this event."
    );
    assert!(body.get("update").is_none());
    assert_eq!(
        *t.calendar.responses.lock().unwrap(),
        vec![("AAMk1".to_string(), "accept".to_string())]
    );
}
