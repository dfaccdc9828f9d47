// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Security tests for scheduled task handlers.

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
};
use calendar_presence::config::Config;
use calendar_presence::db::Store;
use calendar_presence::models::PresenceStatus;
use tower::ServiceExt;

mod common;
use common::{connected_user, TestEnv};

fn task_request(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("POST").uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_sync_all_without_token_unauthorized() {
    let (app, _) = common::create_test_app();

    let response = app
        .oneshot(task_request("/tasks/sync-all", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_sync_all_wrong_token_forbidden() {
    let (app, _) = common::create_test_app();

    let response = app
        .oneshot(task_request("/tasks/sync-all", Some("not-the-secret")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_every_task_route_requires_token() {
    for uri in [
        "/tasks/sync/u1",
        "/tasks/daily-summary",
        "/tasks/renew-subscriptions",
        "/tasks/invite/u1",
        "/tasks/disconnect/u1",
    ] {
        let (app, _) = common::create_test_app();
        let response = app.oneshot(task_request(uri, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{}", uri);
    }
}

#[tokio::test]
async fn test_empty_configured_secret_rejects_everything() {
    let mut config = Config::test_default();
    config.tasks_shared_secret = String::new();
    let (app, _) = TestEnv::with_config(config).app();

    let response = app
        .oneshot(task_request("/tasks/sync-all", Some("guess")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_sync_all_with_token_runs_pass() {
    let t = TestEnv::new();
    t.store.seed_user(connected_user("u1", "r1"));
    t.chat.set_status("u1", PresenceStatus::Online, false);
    let (app, state) = t.app();
    let token = state.config.tasks_shared_secret.clone();

    let response = app
        .oneshot(task_request("/tasks/sync-all", Some(&token)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let report: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(report["summary"]["users_processed"], 1);
    assert_eq!(
        report["message"],
        "No events in local or remote. No status change."
    );
}

#[tokio::test]
async fn test_invite_and_disconnect_with_token() {
    let t = TestEnv::new();
    t.store.seed_user(connected_user("u1", "r1"));
    let (app, state) = t.app();
    let token = state.config.tasks_shared_secret.clone();

    let response = app
        .clone()
        .oneshot(task_request("/tasks/invite/u2", Some(&token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let invite = t.chat.dms_for("u2");
    assert_eq!(invite.len(), 1);
    assert!(invite[0].contains("/oauth2/connect?user_id=u2"));

    // Already connected users are not invited again
    let response = app
        .clone()
        .oneshot(task_request("/tasks/invite/u1", Some(&token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .oneshot(task_request("/tasks/disconnect/u1", Some(&token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(t.store.load_user("u1").await.unwrap().is_none());
}
