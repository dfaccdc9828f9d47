// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Upcoming-event reminders by DM and in linked channels.

use crate::config::{upcoming_event_notification_time, upcoming_event_notification_window};
use crate::models::{Event, Post, User};
use crate::services::engine::Engine;
use crate::services::views;
use crate::time_utils::resolve_timezone_or_utc;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;

/// Message of the post created in channels linked to an event.
pub const UPCOMING_EVENT_POST_MESSAGE: &str = "Upcoming event";

/// True if `event` starts close enough to the reminder lead time.
///
/// The window is slightly wider than the sync interval, so every event is
/// picked up by exactly one pass even when runs drift.
pub fn is_due_for_reminder(event: &Event, now: DateTime<Utc>) -> bool {
    if event.is_cancelled {
        return false;
    }
    let diff = event.start - (now + upcoming_event_notification_time());
    let window = upcoming_event_notification_window();
    diff < window && diff > -window
}

impl Engine {
    /// Send reminders for the events of `user` starting around the lead time.
    ///
    /// Failures are logged. The user's timezone is looked up at most once and
    /// a lookup failure skips the remaining reminders for this user.
    pub async fn notify_upcoming_events(&self, user: &User, events: &[Event], now: DateTime<Utc>) {
        let mut timezone: Option<Tz> = None;

        for event in events.iter().filter(|e| is_due_for_reminder(e, now)) {
            let tz = match timezone {
                Some(tz) => tz,
                None => match self.get_timezone(user).await {
                    Ok(name) => {
                        let tz = resolve_timezone_or_utc(&name);
                        timezone = Some(tz);
                        tz
                    }
                    Err(e) => {
                        tracing::warn!(
                            user_id = %user.chat_user_id,
                            error = %e,
                            "Failed to get timezone for reminders"
                        );
                        return;
                    }
                },
            };

            let attachment = views::render_upcoming_event_attachment(event, tz, now);
            if let Err(e) = self
                .env
                .poster
                .dm_with_attachment(&user.chat_user_id, attachment)
                .await
            {
                tracing::warn!(
                    user_id = %user.chat_user_id,
                    event_id = %event.id,
                    error = %e,
                    "Failed to send reminder DM"
                );
                continue;
            }

            let metadata = match self.env.store.load_event_metadata(&event.ical_uid).await {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!(
                        event_id = %event.id,
                        error = %e,
                        "Failed to load linked channels for reminder"
                    );
                    continue;
                }
            };

            let Some(metadata) = metadata else {
                continue;
            };
            for channel_id in &metadata.linked_channel_ids {
                let post = Post {
                    channel_id: channel_id.clone(),
                    message: UPCOMING_EVENT_POST_MESSAGE.to_string(),
                    attachments: vec![views::render_event_attachment(event, tz, now)],
                };
                if let Err(e) = self.env.poster.create_post(post).await {
                    tracing::warn!(
                        channel_id = %channel_id,
                        event_id = %event.id,
                        error = %e,
                        "Failed to post reminder to channel"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::window::test_support::{base_time, event};
    use chrono::Duration;

    #[test]
    fn test_reminder_window_is_symmetric_around_lead_time() {
        let now = base_time();
        // lead time is 10 minutes, window is 5.5 minutes each side
        assert!(is_due_for_reminder(&event("a", 10, 20), now));
        assert!(is_due_for_reminder(&event("a", 5, 20), now));
        assert!(is_due_for_reminder(&event("a", 15, 20), now));
        assert!(!is_due_for_reminder(&event("a", 16, 20), now));
        assert!(!is_due_for_reminder(&event("a", 4, 20), now));

        let edge = now + Duration::seconds(30);
        assert!(!is_due_for_reminder(&event("a", 5, 20), edge));
    }

    #[test]
    fn test_cancelled_event_not_due() {
        let mut e = event("a", 10, 20);
        e.is_cancelled = true;
        assert!(!is_due_for_reminder(&e, base_time()));
    }
}
