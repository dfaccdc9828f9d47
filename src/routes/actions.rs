// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Interactive post actions posted back by the chat server.
//!
//! Every action carries a signature bound to the user it was sent to, so
//! a forged request for another user is rejected.

use crate::error::{AppError, Result};
use crate::models::PresenceStatus;
use crate::services::notification::RESPOND_TO_EVENT_ACTION;
use crate::services::signing::verify_action_signature;
use crate::services::status::CONFIRM_STATUS_CHANGE_ACTION;
use crate::AppState;
use axum::{extract::State, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            &format!("/actions/{}", CONFIRM_STATUS_CHANGE_ACTION),
            post(confirm_status_change),
        )
        .route(
            &format!("/actions/{}", RESPOND_TO_EVENT_ACTION),
            post(respond_to_event),
        )
}

/// Body the chat server sends when a button or menu is used.
#[derive(Debug, Deserialize)]
pub struct PostActionRequest {
    pub user_id: String,
    #[serde(default)]
    pub context: Map<String, Value>,
}

#[derive(Debug, Default, Serialize)]
pub struct PostUpdate {
    pub message: String,
    pub props: Map<String, Value>,
}

#[derive(Debug, Default, Serialize)]
pub struct PostActionResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update: Option<PostUpdate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ephemeral_text: Option<String>,
}

impl PostActionRequest {
    fn str_field(&self, key: &str) -> Option<&str> {
        self.context.get(key).and_then(Value::as_str)
    }

    fn verify(&self, secret: &[u8]) -> Result<()> {
        let signature = self.str_field("signature").unwrap_or_default();
        if !verify_action_signature(secret, &self.user_id, signature) {
            tracing::warn!(user_id = %self.user_id, "Rejected post action with bad signature");
            return Err(AppError::Forbidden("invalid action signature".to_string()));
        }
        Ok(())
    }
}

/// Yes/No answer to a status change prompt.
async fn confirm_status_change(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PostActionRequest>,
) -> Result<Json<PostActionResponse>> {
    req.verify(&state.config.webhook_secret)?;

    let accepted = req
        .context
        .get("value")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let change_to = req
        .str_field("change_to")
        .map(|s| s.parse::<PresenceStatus>())
        .transpose()
        .map_err(AppError::BadRequest)?;

    let message = state
        .engine
        .confirm_status_change(&req.user_id, accepted, change_to)
        .await?;

    // Replace the prompt so it cannot be answered twice
    Ok(Json(PostActionResponse {
        update: Some(PostUpdate {
            message,
            props: Map::new(),
        }),
        ephemeral_text: None,
    }))
}

/// Invitation response picked from a notification's menu.
async fn respond_to_event(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PostActionRequest>,
) -> Result<Json<PostActionResponse>> {
    req.verify(&state.config.webhook_secret)?;

    let event_id = req
        .str_field("event_id")
        .ok_or_else(|| AppError::BadRequest("missing event_id".to_string()))?;
    let option = req
        .str_field("selected_option")
        .ok_or_else(|| AppError::BadRequest("missing selected_option".to_string()))?;

    let message = state
        .engine
        .respond_to_event(&req.user_id, event_id, option)
        .await?;
    Ok(Json(PostActionResponse {
        update: None,
        ephemeral_text: Some(message),
    }))
}
