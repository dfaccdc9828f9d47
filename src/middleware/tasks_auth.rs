// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Scheduler authentication for `/tasks/*` routes.

use crate::services::signing::secrets_match;
use crate::AppState;
use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

/// Require `Authorization: Bearer <TASKS_SHARED_SECRET>`.
pub async fn require_tasks_auth(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let expected = state.config.tasks_shared_secret.as_str();
    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "));

    match presented {
        Some(token) if !expected.is_empty() && secrets_match(expected, token) => {
            Ok(next.run(request).await)
        }
        Some(_) => {
            tracing::warn!(path = %request.uri().path(), "Blocked tasks request: bad token");
            Err(StatusCode::FORBIDDEN)
        }
        None => {
            tracing::warn!(path = %request.uri().path(), "Blocked tasks request: no token");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}
