// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Calendar event model shared by the sync engine and the webhook path.

use crate::time_utils::format_utc_rfc3339;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How the event blocks the attendee's time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ShowAs {
    Free,
    Tentative,
    #[default]
    Busy,
    Oof,
    WorkingElsewhere,
    Unknown,
}

impl ShowAs {
    /// Parse the provider's wire value; unrecognized values map to `Unknown`.
    pub fn from_wire(value: &str) -> Self {
        match value {
            "free" => ShowAs::Free,
            "tentative" => ShowAs::Tentative,
            "busy" => ShowAs::Busy,
            "oof" => ShowAs::Oof,
            "workingElsewhere" => ShowAs::WorkingElsewhere,
            _ => ShowAs::Unknown,
        }
    }
}

/// The user's response to an invitation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventResponse {
    None,
    Organizer,
    Accepted,
    TentativelyAccepted,
    Declined,
    NotResponded,
}

impl EventResponse {
    pub fn from_wire(value: &str) -> Self {
        match value {
            "organizer" => EventResponse::Organizer,
            "accepted" => EventResponse::Accepted,
            "tentativelyAccepted" => EventResponse::TentativelyAccepted,
            "declined" => EventResponse::Declined,
            "notResponded" => EventResponse::NotResponded,
            _ => EventResponse::None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventResponse::None => "none",
            EventResponse::Organizer => "organizer",
            EventResponse::Accepted => "accepted",
            EventResponse::TentativelyAccepted => "tentativelyAccepted",
            EventResponse::Declined => "declined",
            EventResponse::NotResponded => "notResponded",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailAddress {
    pub name: String,
    pub address: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attendee {
    pub email_address: EmailAddress,
}

/// A calendar event instance as fetched from the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Provider-specific event ID
    pub id: String,
    /// Stable iCalendar UID, shared by all copies of the event
    pub ical_uid: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body_preview: String,
    #[serde(default)]
    pub importance: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub is_all_day: bool,
    #[serde(default)]
    pub is_cancelled: bool,
    #[serde(default)]
    pub is_organizer: bool,
    #[serde(default)]
    pub response_requested: bool,
    #[serde(default)]
    pub show_as: ShowAs,
    #[serde(default)]
    pub response_status: Option<EventResponse>,
    #[serde(default)]
    pub organizer: Option<EmailAddress>,
    #[serde(default)]
    pub attendees: Vec<Attendee>,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub weblink: String,
}

impl Event {
    /// Identity of this event occurrence for active-event bookkeeping:
    /// iCal UID plus the UTC start time at second precision.
    pub fn fingerprint(&self) -> String {
        format!("{} {}", self.ical_uid, format_utc_rfc3339(self.start))
    }

    pub fn is_declined(&self) -> bool {
        self.response_status == Some(EventResponse::Declined)
    }
}

/// Error reported by the provider for one user inside a batched fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewError {
    pub code: String,
    pub message: String,
}

/// Events fetched for one remote user over a time window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarView {
    pub remote_user_id: String,
    pub events: Vec<Event>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ViewError>,
}

impl CalendarView {
    /// Sort events by start time, earliest first.
    pub fn sort_events(&mut self) {
        self.events.sort_by_key(|e| e.start);
    }
}

/// Last-known copy of an event, used to diff webhook updates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEvent {
    pub remote: Event,
}

/// Chat channels that receive a reminder post for an event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventMetadata {
    #[serde(default)]
    pub linked_channel_ids: std::collections::BTreeSet<String>,
}
