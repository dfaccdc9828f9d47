// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Scheduled job and admin routes.
//!
//! These endpoints are called by the external scheduler (or an operator),
//! never by end users, and require the shared tasks bearer token.

use crate::error::Result;
use crate::middleware::require_tasks_auth;
use crate::services::subscription::RenewalSummary;
use crate::services::SyncReport;
use crate::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware,
    routing::post,
    Json, Router,
};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;

/// Task handler routes.
pub fn routes(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/tasks/sync-all", post(sync_all))
        .route("/tasks/sync/{user_id}", post(sync_user))
        .route("/tasks/daily-summary", post(daily_summary))
        .route("/tasks/renew-subscriptions", post(renew_subscriptions))
        .route("/tasks/invite/{user_id}", post(invite_user))
        .route("/tasks/disconnect/{user_id}", post(disconnect_user))
        .route_layer(middleware::from_fn_with_state(state, require_tasks_auth))
}

/// Status sync for every connected user.
async fn sync_all(State(state): State<Arc<AppState>>) -> Result<Json<SyncReport>> {
    let report = state.engine.sync_all().await?;
    tracing::info!(
        processed = report.summary.users_processed,
        changed = report.summary.users_status_changed,
        failed = report.summary.users_failed_status_changed,
        "Status sync job finished"
    );
    Ok(Json(report))
}

async fn sync_user(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<SyncReport>> {
    Ok(Json(state.engine.sync(&user_id).await?))
}

#[derive(Serialize)]
struct DailySummaryResponse {
    summaries_sent: usize,
}

async fn daily_summary(State(state): State<Arc<AppState>>) -> Result<Json<DailySummaryResponse>> {
    let summaries_sent = state.engine.process_all_daily_summary(Utc::now()).await?;
    Ok(Json(DailySummaryResponse { summaries_sent }))
}

async fn renew_subscriptions(State(state): State<Arc<AppState>>) -> Result<Json<RenewalSummary>> {
    Ok(Json(state.engine.renew_all_subscriptions().await?))
}

/// DM a user the link to connect their calendar.
async fn invite_user(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<StatusCode> {
    state.engine.send_connect_invite(&user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn disconnect_user(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<StatusCode> {
    state.engine.disconnect_user(&user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
