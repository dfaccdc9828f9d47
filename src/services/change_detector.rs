// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Field-level diffing of calendar events for change notifications.
//!
//! An event is flattened into named display fields. A new event renders a
//! fixed subset; an updated event renders only the changed fields that
//! matter, and is suppressed entirely when none of those changed.

use crate::models::chat::{AttachmentField, PostAction, PostActionIntegration, PostActionOption};
use crate::models::event::EventResponse;
use crate::models::{Attachment, Event};
use crate::services::views::{ensure_subject, markdown_to_html_entities, render_when};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde_json::{json, Map};
use std::collections::HashMap;

pub const FIELD_SUBJECT: &str = "Subject";
pub const FIELD_BODY_PREVIEW: &str = "BodyPreview";
pub const FIELD_IMPORTANCE: &str = "Importance";
pub const FIELD_DURATION: &str = "Duration";
pub const FIELD_WHEN: &str = "When";
pub const FIELD_LOCATION: &str = "Location";
pub const FIELD_ATTENDEES: &str = "Attendees";
pub const FIELD_ORGANIZER: &str = "Organizer";
pub const FIELD_RESPONSE_STATUS: &str = "ResponseStatus";

/// Every field compared between snapshots, in diff order.
pub const ALL_FIELDS: [&str; 9] = [
    FIELD_SUBJECT,
    FIELD_BODY_PREVIEW,
    FIELD_IMPORTANCE,
    FIELD_DURATION,
    FIELD_WHEN,
    FIELD_LOCATION,
    FIELD_ATTENDEES,
    FIELD_ORGANIZER,
    FIELD_RESPONSE_STATUS,
];

/// Fields shown on a new-event notification, in display order.
pub const NEW_EVENT_FIELD_ORDER: [&str; 4] =
    [FIELD_WHEN, FIELD_LOCATION, FIELD_ATTENDEES, FIELD_IMPORTANCE];

/// Only changes to these fields produce an update notification.
pub const IMPORTANT_FIELDS: [&str; 2] = [FIELD_SUBJECT, FIELD_WHEN];

pub const OPTION_NOT_RESPONDED: &str = "Not responded";
pub const OPTION_YES: &str = "Yes";
pub const OPTION_NO: &str = "No";
pub const OPTION_MAYBE: &str = "Maybe";

const NOT_DEFINED: &str = "Not defined";

pub fn is_important_change(field: &str) -> bool {
    IMPORTANT_FIELDS.contains(&field)
}

/// Named display values of an event. Attendees is multi-valued.
pub type Fields = HashMap<&'static str, Vec<String>>;

fn value_or_not_defined(s: &str) -> String {
    if s.is_empty() {
        NOT_DEFINED.to_string()
    } else {
        s.to_string()
    }
}

/// Human duration such as "1 hour, 30 minutes", "2 days" or "All day".
pub fn format_duration(event: &Event) -> String {
    let total = event.end - event.start;
    let total_minutes = (total.num_seconds() as f64 / 60.0).round() as i64;
    let days = total.num_hours() / 24;
    let hours = total.num_hours() - days * 24;
    let minutes = total_minutes - total.num_hours() * 60;

    if days > 0 {
        return if days == 1 {
            "1 day".to_string()
        } else {
            format!("{} days", days)
        };
    }
    if event.is_all_day {
        return "All day".to_string();
    }

    let mut out = match hours {
        0 => String::new(),
        1 => "1 hour".to_string(),
        h => format!("{} hours", h),
    };
    if minutes > 0 {
        if !out.is_empty() {
            out.push_str(", ");
        }
        out.push_str(&format!("{} minutes", minutes));
    }
    out
}

fn mailto(name: &str, address: &str) -> String {
    format!("[{}](mailto:{})", name, address)
}

pub fn event_to_fields(event: &Event, tz: Tz, now: DateTime<Utc>) -> Fields {
    let mut attendees: Vec<String> = event
        .attendees
        .iter()
        .map(|a| mailto(&a.email_address.name, &a.email_address.address))
        .collect();
    if attendees.is_empty() {
        attendees.push("None".to_string());
    }

    let organizer = event
        .organizer
        .as_ref()
        .map(|o| mailto(&o.name, &o.address))
        .unwrap_or_else(|| NOT_DEFINED.to_string());

    let response = event
        .response_status
        .map(|r| r.as_str().to_string())
        .unwrap_or_default();

    HashMap::from([
        (FIELD_SUBJECT, vec![ensure_subject(&event.subject).to_string()]),
        (FIELD_BODY_PREVIEW, vec![value_or_not_defined(&event.body_preview)]),
        (FIELD_IMPORTANCE, vec![value_or_not_defined(&event.importance)]),
        (
            FIELD_WHEN,
            vec![render_when(event.start, event.end, tz, now)],
        ),
        (FIELD_DURATION, vec![value_or_not_defined(&format_duration(event))]),
        (FIELD_ORGANIZER, vec![organizer]),
        (FIELD_LOCATION, vec![value_or_not_defined(&event.location)]),
        (FIELD_RESPONSE_STATUS, vec![response]),
        (FIELD_ATTENDEES, attendees),
    ])
}

/// Field names added, updated and deleted between two snapshots.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct FieldDiff {
    pub added: Vec<&'static str>,
    pub updated: Vec<&'static str>,
    pub deleted: Vec<&'static str>,
}

impl FieldDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    pub fn has_important_changes(&self) -> bool {
        self.added
            .iter()
            .chain(&self.updated)
            .chain(&self.deleted)
            .any(|f| is_important_change(f))
    }
}

pub fn diff_fields(prior: &Fields, new: &Fields) -> FieldDiff {
    let mut diff = FieldDiff::default();
    for field in ALL_FIELDS {
        match (prior.get(field), new.get(field)) {
            (None, Some(_)) => diff.added.push(field),
            (Some(_), None) => diff.deleted.push(field),
            (Some(a), Some(b)) if a != b => diff.updated.push(field),
            _ => {}
        }
    }
    diff
}

fn base_attachment(event: &Event) -> Attachment {
    let title = ensure_subject(&event.subject).to_string();
    let (author_name, author_link) = match &event.organizer {
        Some(o) => (o.name.clone(), format!("mailto:{}", o.address)),
        None => (String::new(), String::new()),
    };
    Attachment {
        author_name,
        author_link,
        fallback: format!("[{}]({}): {}", title, event.weblink, event.body_preview),
        title,
        title_link: event.weblink.clone(),
        text: event.body_preview.clone(),
        ..Default::default()
    }
}

/// Select menu letting the attendee answer the invitation.
pub fn response_actions(
    event_id: &str,
    response: Option<EventResponse>,
    url: &str,
    signature: &str,
) -> Vec<PostAction> {
    let mut context = Map::new();
    context.insert("event_id".into(), json!(event_id));
    context.insert("signature".into(), json!(signature));

    let default_option = match response {
        Some(EventResponse::Accepted) => Some(OPTION_YES),
        Some(EventResponse::Declined) => Some(OPTION_NO),
        Some(EventResponse::TentativelyAccepted) => Some(OPTION_MAYBE),
        Some(EventResponse::NotResponded) | Some(EventResponse::None) | None => {
            Some(OPTION_NOT_RESPONDED)
        }
        Some(EventResponse::Organizer) => None,
    };

    vec![PostAction {
        name: "Response".to_string(),
        kind: Some("select".to_string()),
        integration: PostActionIntegration {
            url: url.to_string(),
            context,
        },
        options: [OPTION_NOT_RESPONDED, OPTION_YES, OPTION_NO, OPTION_MAYBE]
            .iter()
            .map(|o| PostActionOption {
                text: o.to_string(),
                value: o.to_string(),
            })
            .collect(),
        default_option: default_option.map(str::to_string),
    }]
}

/// Where response actions post back, plus the signature they carry.
#[derive(Debug, Clone)]
pub struct ResponseTarget<'a> {
    pub url: &'a str,
    pub signature: &'a str,
}

/// "(New)" notification for an event seen for the first time.
pub fn new_event_attachment(
    event: &Event,
    tz: Tz,
    respond: &ResponseTarget<'_>,
    now: DateTime<Utc>,
) -> Attachment {
    let mut att = base_attachment(event);
    att.title = format!("(New) {}", att.title);

    let fields = event_to_fields(event, tz, now);
    for name in NEW_EVENT_FIELD_ORDER {
        let value = fields.get(name).map(|v| v.join(", ")).unwrap_or_default();
        att.fields.push(AttachmentField {
            title: name.to_string(),
            value,
            short: true,
        });
    }

    if event.response_requested && !event.is_organizer {
        att.actions = response_actions(
            &event.id,
            event.response_status,
            respond.url,
            respond.signature,
        );
    }
    att
}

/// "(Updated)" notification, or `None` when no important field changed.
pub fn updated_event_attachment(
    event: &Event,
    prior: &Event,
    tz: Tz,
    respond: &ResponseTarget<'_>,
    now: DateTime<Utc>,
) -> Option<Attachment> {
    let new_fields = event_to_fields(event, tz, now);
    let prior_fields = event_to_fields(prior, tz, now);
    let diff = diff_fields(&prior_fields, &new_fields);
    if diff.is_empty() || !diff.has_important_changes() {
        return None;
    }

    let joined = |fields: &Fields, name: &str| {
        markdown_to_html_entities(&fields.get(name).map(|v| v.join(", ")).unwrap_or_default())
    };

    let mut att = base_attachment(event);
    att.title = format!("(Updated) {}", att.title);

    for &name in diff.added.iter().filter(|f| is_important_change(f)) {
        att.fields.push(AttachmentField {
            title: name.to_string(),
            value: joined(&new_fields, name),
            short: true,
        });
    }
    for &name in diff.updated.iter().filter(|f| is_important_change(f)) {
        att.fields.push(AttachmentField {
            title: name.to_string(),
            value: format!(
                "~~{}~~ \u{2192} {}",
                joined(&prior_fields, name),
                joined(&new_fields, name)
            ),
            short: true,
        });
    }
    for &name in diff.deleted.iter().filter(|f| is_important_change(f)) {
        att.fields.push(AttachmentField {
            title: name.to_string(),
            value: format!("~~{}~~", joined(&prior_fields, name)),
            short: true,
        });
    }

    if event.response_requested && !event.is_organizer && !event.is_cancelled {
        att.actions = response_actions(
            &event.id,
            event.response_status,
            respond.url,
            respond.signature,
        );
    }
    Some(att)
}
