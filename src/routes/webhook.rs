// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Calendar change-notification webhook.

use crate::error::AppError;
use crate::AppState;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use serde::Deserialize;
use std::sync::Arc;

/// Webhook routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/webhook/{provider}/events", post(handle_notifications))
}

#[derive(Deserialize)]
struct ValidationParams {
    #[serde(rename = "validationToken")]
    validation_token: Option<String>,
}

/// Receive notifications (POST).
///
/// A subscription handshake echoes `validationToken` as plain text.
/// Otherwise the batch is queued and acknowledged with 202; processing
/// happens on the notification worker.
async fn handle_notifications(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    Query(params): Query<ValidationParams>,
    body: Bytes,
) -> Response {
    let remote = &state.engine.env().remote;
    if provider != remote.name() {
        tracing::warn!(provider = %provider, "Webhook for unknown provider");
        return StatusCode::NOT_FOUND.into_response();
    }

    if let Some(token) = params.validation_token {
        tracing::info!("Webhook subscription validated");
        return (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain")],
            token,
        )
            .into_response();
    }

    let notifications = match remote.parse_notifications(&body) {
        Ok(n) => n,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to parse webhook notifications");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    let count = notifications.len();
    match state.notifications.enqueue(notifications) {
        Ok(()) => {
            tracing::debug!(count, "Queued webhook notifications");
            StatusCode::ACCEPTED.into_response()
        }
        Err(e) => {
            tracing::warn!(count, error = %e, "Dropped webhook notifications");
            AppError::from(e).into_response()
        }
    }
}
