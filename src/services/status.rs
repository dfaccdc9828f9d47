// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Presence status decisions driven by the user's busy windows.
//!
//! The user's `active_events` fingerprints record what the last completed
//! decision saw. They are only persisted after the status call (or the
//! confirmation DM) succeeded, so a failed pass is retried on the next run.

use crate::error::Result;
use crate::models::{Event, PresenceStatus, User, UserStatus};
use crate::services::engine::Engine;
use crate::services::{signing, views, window};
use chrono::{DateTime, Utc};
use std::collections::HashSet;

/// Path of the status confirmation action handler.
pub const CONFIRM_STATUS_CHANGE_ACTION: &str = "confirm-status-change";

/// Result of one status decision for one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusOutcome {
    pub message: String,
    /// A status was applied or a confirmation prompt was sent
    pub changed: bool,
}

impl StatusOutcome {
    fn unchanged(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            changed: false,
        }
    }

    fn changed(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            changed: true,
        }
    }
}

impl Engine {
    /// Decide and apply a presence change for `user` from its merged busy
    /// windows. `events` must already be filtered and merged.
    pub async fn set_status_from_calendar_view(
        &self,
        user: &mut User,
        status: &UserStatus,
        events: &[Event],
        now: DateTime<Utc>,
    ) -> Result<StatusOutcome> {
        if !user.is_configured_for_status_updates() {
            return Ok(StatusOutcome::unchanged(
                "No value set for the status update option",
            ));
        }

        let current = status.status;
        if current == PresenceStatus::Offline && !user.settings.get_confirmation {
            return Ok(StatusOutcome::unchanged(
                "User is offline and does not want status change confirmations. No status change",
            ));
        }

        let busy = user.busy_status();

        if user.active_events.is_empty() && events.is_empty() {
            return Ok(StatusOutcome::unchanged(
                "No events in local or remote. No status change.",
            ));
        }

        if !user.active_events.is_empty() && events.is_empty() {
            let mut outcome = StatusOutcome::unchanged(format!(
                "User is no longer busy in calendar, but is not set to busy ({}). No status change.",
                busy
            ));
            if current == busy {
                let message = match user.last_status {
                    Some(last) => format!(
                        "User is no longer busy in calendar. Set status to previous status ({})",
                        last
                    ),
                    None => "User is no longer busy in calendar. Set status to online.".to_string(),
                };
                self.set_status_or_ask_user(user, status, events, true, now)
                    .await?;
                outcome = StatusOutcome::changed(message);
            }

            self.env
                .store
                .store_user_active_events(&user.chat_user_id, Vec::new())
                .await?;
            user.active_events.clear();
            return Ok(outcome);
        }

        let remote_hashes = window::fingerprints(events);

        if user.active_events.is_empty() {
            if current == busy {
                user.last_status = status.manual.then_some(current);
                self.env.store.store_user(user).await?;
                self.env
                    .store
                    .store_user_active_events(&user.chat_user_id, remote_hashes.clone())
                    .await?;
                user.active_events = remote_hashes;
                return Ok(StatusOutcome::unchanged(
                    "User is already busy. No status change.",
                ));
            }

            self.set_status_or_ask_user(user, status, events, false, now)
                .await?;
            self.env
                .store
                .store_user_active_events(&user.chat_user_id, remote_hashes.clone())
                .await?;
            user.active_events = remote_hashes;
            return Ok(StatusOutcome::changed(format!(
                "User was free, but is now busy ({}). Set status to busy.",
                busy
            )));
        }

        let prior: HashSet<&str> = user.active_events.iter().map(String::as_str).collect();
        let new_event_exists = remote_hashes.iter().any(|h| !prior.contains(h.as_str()));

        if !new_event_exists {
            let current_set: HashSet<&str> = remote_hashes.iter().map(String::as_str).collect();
            if current_set != prior {
                // An event ended while another is still running
                self.env
                    .store
                    .store_user_active_events(&user.chat_user_id, remote_hashes.clone())
                    .await?;
                user.active_events = remote_hashes;
            }
            return Ok(StatusOutcome::unchanged(format!(
                "No changes in active events. Total number of events: {}",
                events.len()
            )));
        }

        let mut outcome = StatusOutcome::unchanged("User is already busy. No status change.");
        if current != busy {
            self.set_status_or_ask_user(user, status, events, false, now)
                .await?;
            outcome = StatusOutcome::changed(format!(
                "User was free, but is now busy. Set status to busy ({}).",
                busy
            ));
        }

        self.env
            .store
            .store_user_active_events(&user.chat_user_id, remote_hashes.clone())
            .await?;
        user.active_events = remote_hashes;
        Ok(outcome)
    }

    /// Apply the target status, or DM the user asking to confirm it.
    ///
    /// Going free restores the saved manual status if there is one. Going
    /// busy saves the current manual status for later, but only when the
    /// change is applied automatically; a prompt defers that to the answer.
    pub async fn set_status_or_ask_user(
        &self,
        user: &mut User,
        current: &UserStatus,
        events: &[Event],
        is_free: bool,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let previous_last_status = user.last_status;

        let to_set = if is_free {
            user.last_status.take().unwrap_or(PresenceStatus::Online)
        } else {
            if !user.settings.get_confirmation {
                user.last_status = current.manual.then_some(current.status);
            }
            user.busy_status()
        };

        if user.last_status != previous_last_status {
            self.env.store.store_user(user).await?;
        }

        if !user.settings.get_confirmation {
            self.env
                .presence
                .update_status(&user.chat_user_id, to_set)
                .await?;
            tracing::info!(
                user_id = %user.chat_user_id,
                status = %to_set,
                "Updated presence from calendar"
            );
            return Ok(());
        }

        let config = &self.env.config;
        let attachment = views::render_status_change_notification(
            events,
            to_set,
            &config.action_url(CONFIRM_STATUS_CHANGE_ACTION),
            &signing::action_signature(&config.webhook_secret, &user.chat_user_id),
            now,
        );
        self.env
            .poster
            .dm_with_attachment(&user.chat_user_id, attachment)
            .await?;
        tracing::info!(
            user_id = %user.chat_user_id,
            status = %to_set,
            "Asked user to confirm status change"
        );
        Ok(())
    }

    /// Handle the user's answer to a status confirmation prompt.
    ///
    /// Returns the message that replaces the prompt.
    pub async fn confirm_status_change(
        &self,
        chat_user_id: &str,
        accepted: bool,
        change_to: Option<PresenceStatus>,
    ) -> Result<String> {
        if !accepted {
            return Ok("Status was not changed.".to_string());
        }
        let Some(change_to) = change_to else {
            return Err(crate::error::AppError::BadRequest(
                "missing target status".to_string(),
            ));
        };

        let _guard = self.env.user_locks.lock(chat_user_id).await;
        let mut user = self
            .env
            .store
            .load_user(chat_user_id)
            .await?
            .ok_or_else(|| crate::error::AppError::NotFound(format!("user {}", chat_user_id)))?;

        if change_to == PresenceStatus::Dnd || change_to == PresenceStatus::Away {
            let statuses = self
                .env
                .presence
                .get_statuses(&[chat_user_id.to_string()])
                .await?;
            if let Some(current) = statuses.into_iter().find(|s| s.user_id == chat_user_id) {
                let last_status = current.manual.then_some(current.status);
                if user.last_status != last_status {
                    user.last_status = last_status;
                    self.env.store.store_user(&user).await?;
                }
            }
        }

        self.env
            .presence
            .update_status(chat_user_id, change_to)
            .await?;
        Ok(format!("Status changed to {}.", change_to.pretty()))
    }
}
