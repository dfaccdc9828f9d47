// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! OAuth routes linking a chat user to a calendar account.

use crate::error::{AppError, Result};
use crate::services::signing::verify_action_signature;
use crate::AppState;
use axum::{
    extract::{Query, State},
    response::{Html, Redirect},
    routing::get,
    Router,
};
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/oauth2/connect", get(connect))
        .route("/oauth2/complete", get(complete))
}

/// Query parameters of the link sent to the user.
#[derive(Deserialize)]
pub struct ConnectParams {
    user_id: String,
    signature: String,
}

/// Start OAuth flow - redirect to the provider's consent page.
async fn connect(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ConnectParams>,
) -> Result<Redirect> {
    if !verify_action_signature(&state.config.webhook_secret, &params.user_id, &params.signature) {
        tracing::warn!(user_id = %params.user_id, "Rejected connect link with bad signature");
        return Err(AppError::Forbidden("invalid connect link".to_string()));
    }

    let url = state.engine.init_oauth2(&params.user_id, Utc::now()).await?;
    tracing::info!(user_id = %params.user_id, "Starting OAuth flow");
    Ok(Redirect::temporary(&url))
}

#[derive(Deserialize)]
pub struct CallbackParams {
    #[serde(default)]
    code: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

/// OAuth callback - exchange the code and link the account.
async fn complete(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CallbackParams>,
) -> Result<Html<String>> {
    if let Some(error) = params.error {
        tracing::warn!(
            error = %error,
            description = ?params.error_description,
            "OAuth error from provider"
        );
        return Err(AppError::BadRequest(format!("authorization failed: {}", error)));
    }

    let user = state
        .engine
        .complete_oauth2(&params.state, &params.code, Utc::now())
        .await?;
    tracing::info!(
        user_id = %user.chat_user_id,
        remote_id = %user.remote.id,
        "OAuth successful, account connected"
    );

    Ok(Html(
        "<!DOCTYPE html><html><body><p>Your calendar is connected. You can close this window.</p></body></html>"
            .to_string(),
    ))
}
