// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Calendar-themed custom status ("In a meeting").

use crate::error::Result;
use crate::models::{CustomStatus, Event, User};
use crate::services::engine::Engine;
use crate::services::status::StatusOutcome;

pub const CUSTOM_STATUS_EMOJI: &str = "calendar";
pub const CUSTOM_STATUS_TEXT: &str = "In a meeting";
const CUSTOM_STATUS_DURATION: &str = "date_and_time";

/// The custom status shown while the user is in `event`.
pub fn meeting_custom_status(event: &Event) -> CustomStatus {
    CustomStatus {
        emoji: CUSTOM_STATUS_EMOJI.to_string(),
        text: CUSTOM_STATUS_TEXT.to_string(),
        expires_at: Some(event.end),
        duration: CUSTOM_STATUS_DURATION.to_string(),
    }
}

impl Engine {
    /// Set or clear the meeting custom status from the user's busy windows.
    ///
    /// A custom status the user picked themselves is never replaced.
    pub async fn set_custom_status_from_calendar_view(
        &self,
        user: &mut User,
        events: &[Event],
    ) -> Result<StatusOutcome> {
        if !user.is_configured_for_custom_status_updates() {
            return Ok(StatusOutcome {
                message: "User does not want a custom status".to_string(),
                changed: false,
            });
        }

        let Some(first) = events.first() else {
            if user.is_custom_status_set {
                if let Err(e) = self
                    .env
                    .presence
                    .remove_custom_status(&user.chat_user_id)
                    .await
                {
                    tracing::warn!(
                        user_id = %user.chat_user_id,
                        error = %e,
                        "Failed to remove custom status"
                    );
                }
                self.env
                    .store
                    .store_user_custom_status_updates(&user.chat_user_id, false)
                    .await?;
                user.is_custom_status_set = false;
            }
            return Ok(StatusOutcome {
                message: "No events to set custom status".to_string(),
                changed: false,
            });
        };

        let current = self
            .env
            .presence
            .get_custom_status(&user.chat_user_id)
            .await?;
        if current.is_some() && !user.is_custom_status_set {
            return Ok(StatusOutcome {
                message: "User already has a custom status set, ignoring custom status change"
                    .to_string(),
                changed: false,
            });
        }

        self.env
            .presence
            .update_custom_status(&user.chat_user_id, &meeting_custom_status(first))
            .await?;

        self.env
            .store
            .store_user_custom_status_updates(&user.chat_user_id, true)
            .await?;
        user.is_custom_status_set = true;

        Ok(StatusOutcome {
            message: String::new(),
            changed: true,
        })
    }
}
