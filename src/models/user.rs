// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! User model for storage.

use crate::models::chat::PresenceStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Which status to apply while the user is in a meeting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusOption {
    Away,
    Dnd,
    #[default]
    NotSet,
}

/// Daily agenda DM configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailySummarySettings {
    /// Post time in the user's zone, e.g. "8:00AM"
    pub post_time: String,
    /// Timezone name as reported by the provider (IANA or Windows)
    pub timezone: String,
    pub enable: bool,
    #[serde(default)]
    pub last_post_time: Option<DateTime<Utc>>,
}

impl Default for DailySummarySettings {
    fn default() -> Self {
        Self {
            post_time: "8:00AM".to_string(),
            timezone: "Eastern Standard Time".to_string(),
            enable: false,
            last_post_time: None,
        }
    }
}

/// Per-user preferences.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub update_status_from: StatusOption,
    #[serde(default)]
    pub get_confirmation: bool,
    #[serde(default)]
    pub set_custom_status: bool,
    #[serde(default)]
    pub receive_reminders: bool,
    #[serde(default)]
    pub event_subscription_id: Option<String>,
    #[serde(default)]
    pub daily_summary: Option<DailySummarySettings>,
}

/// Identity of the linked calendar account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteUser {
    pub id: String,
    #[serde(default)]
    pub mail: String,
    #[serde(default)]
    pub display_name: String,
}

/// OAuth tokens for the linked calendar account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthToken {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

/// Connected user stored by chat user ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub chat_user_id: String,
    pub remote: RemoteUser,
    #[serde(default)]
    pub oauth_token: Option<OAuthToken>,
    #[serde(default)]
    pub settings: Settings,
    /// Fingerprints of the busy events the user was last known to be in
    #[serde(default)]
    pub active_events: Vec<String>,
    /// Manually chosen status to restore once the user is free again
    #[serde(default)]
    pub last_status: Option<PresenceStatus>,
    /// True when the current custom status was set by this service
    #[serde(default)]
    pub is_custom_status_set: bool,
    /// Event iCal UID -> channel linked by this user
    #[serde(default)]
    pub channel_events: HashMap<String, String>,
}

impl User {
    pub fn new(chat_user_id: impl Into<String>, remote: RemoteUser) -> Self {
        Self {
            chat_user_id: chat_user_id.into(),
            remote,
            oauth_token: None,
            settings: Settings::default(),
            active_events: Vec::new(),
            last_status: None,
            is_custom_status_set: false,
            channel_events: HashMap::new(),
        }
    }

    pub fn is_configured_for_status_updates(&self) -> bool {
        self.settings.update_status_from != StatusOption::NotSet
    }

    pub fn is_configured_for_custom_status_updates(&self) -> bool {
        self.settings.set_custom_status
    }

    /// True if any scheduled sync feature is turned on.
    pub fn needs_sync(&self) -> bool {
        self.is_configured_for_status_updates()
            || self.is_configured_for_custom_status_updates()
            || self.settings.receive_reminders
    }

    /// Status applied while in a meeting.
    pub fn busy_status(&self) -> PresenceStatus {
        match self.settings.update_status_from {
            StatusOption::Away => PresenceStatus::Away,
            _ => PresenceStatus::Dnd,
        }
    }

    pub fn index_entry(&self) -> UserIndexEntry {
        UserIndexEntry {
            chat_user_id: self.chat_user_id.clone(),
            remote_id: self.remote.id.clone(),
            remote_mail: self.remote.mail.clone(),
        }
    }
}

/// Entry in the index of connected users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIndexEntry {
    pub chat_user_id: String,
    pub remote_id: String,
    #[serde(default)]
    pub remote_mail: String,
}
