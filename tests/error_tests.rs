// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use axum::body::to_bytes;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use calendar_presence::error::AppError;
use calendar_presence::services::chat::ChatError;
use calendar_presence::services::remote::{RemoteError, RemoteErrorKind};

#[test]
fn test_is_remote_not_found_matches() {
    let err = AppError::from(RemoteError::new(RemoteErrorKind::NotFound, "subscription"));
    assert!(err.is_remote_not_found());
}

#[test]
fn test_is_remote_not_found_no_match() {
    let err = AppError::from(RemoteError::new(RemoteErrorKind::Unauthorized, "expired"));
    assert!(!err.is_remote_not_found());

    let err = AppError::NotFound("user".to_string());
    assert!(!err.is_remote_not_found());
}

#[test]
fn test_status_codes() {
    let cases = [
        (AppError::Unauthorized, StatusCode::UNAUTHORIZED),
        (AppError::Forbidden("x".into()), StatusCode::FORBIDDEN),
        (AppError::NotFound("x".into()), StatusCode::NOT_FOUND),
        (AppError::BadRequest("x".into()), StatusCode::BAD_REQUEST),
        (
            AppError::from(RemoteError::new(RemoteErrorKind::Http, "boom")),
            StatusCode::BAD_GATEWAY,
        ),
        (
            AppError::from(ChatError::Request("refused".into())),
            StatusCode::BAD_GATEWAY,
        ),
        (AppError::Database("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        (AppError::QueueFull, StatusCode::SERVICE_UNAVAILABLE),
        (
            AppError::Internal(anyhow::anyhow!("x")),
            StatusCode::INTERNAL_SERVER_ERROR,
        ),
    ];

    for (err, expected) in cases {
        let label = err.to_string();
        assert_eq!(err.into_response().status(), expected, "{}", label);
    }
}

#[tokio::test]
async fn test_internal_details_not_leaked() {
    let response = AppError::Database("connection string with password".into()).into_response();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();

    assert_eq!(json["error"], "database_error");
    assert!(json.get("details").is_none());
}

#[tokio::test]
async fn test_offline_store_reports_database_error() {
    use calendar_presence::db::{FirestoreDb, Store};

    let db = FirestoreDb::new_mock();
    let err = db.load_user("u1").await.unwrap_err();
    assert!(matches!(err, AppError::Database(_)));
    assert_eq!(
        err.into_response().status(),
        StatusCode::INTERNAL_SERVER_ERROR
    );
}
