// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Rendering of bot messages: status prompts, reminders and agendas.

use crate::models::chat::{AttachmentField, PostAction, PostActionIntegration};
use crate::models::{Attachment, Event, PresenceStatus};
use chrono::{DateTime, Datelike, Utc};
use chrono_tz::Tz;
use serde_json::{json, Map, Value};

pub const NO_SUBJECT: &str = "(No subject)";

pub fn ensure_subject(subject: &str) -> &str {
    if subject.trim().is_empty() {
        NO_SUBJECT
    } else {
        subject
    }
}

/// Escape characters that the chat server would render as markdown.
pub fn markdown_to_html_entities(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('*', "&#42;")
        .replace('_', "&#95;")
        .replace('~', "&#126;")
        .replace('`', "&#96;")
}

/// "h:mmAM" in the given zone.
pub fn kitchen_time(t: DateTime<Utc>, tz: Tz) -> String {
    t.with_timezone(&tz).format("%-I:%M%p").to_string()
}

/// One-line "starts soon" / "in progress" description of an event.
pub fn render_event_will_start_line(
    subject: &str,
    weblink: &str,
    start: DateTime<Utc>,
    now: DateTime<Utc>,
) -> String {
    let link = urlencoding::decode(weblink)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| weblink.to_string());
    let in_progress = start < now;
    match (subject.trim().is_empty(), in_progress) {
        (false, false) => format!("The event [{}]({}) will start soon.", subject, link),
        (true, false) => format!("An [event with no subject]({}) will start soon.", link),
        (false, true) => format!("The event [{}]({}) is ongoing.", subject, link),
        (true, true) => format!("An [event with no subject]({}) is ongoing.", link),
    }
}

/// Attachment asking the user to confirm a status change.
///
/// References the first event that has not started yet; for a busy
/// (dnd) transition with only ongoing events, the last one is used.
pub fn render_status_change_notification(
    events: &[Event],
    status: PresenceStatus,
    url: &str,
    signature: &str,
    now: DateTime<Utc>,
) -> Attachment {
    let event = events
        .iter()
        .find(|e| e.start > now)
        .or_else(|| match status {
            PresenceStatus::Dnd => events.last(),
            _ => None,
        });

    let mut yes_context = Map::new();
    yes_context.insert("value".into(), json!(true));
    yes_context.insert("change_to".into(), json!(status.as_str()));
    yes_context.insert("pretty_change_to".into(), json!(status.pretty()));
    yes_context.insert("signature".into(), json!(signature));

    let mut no_context = Map::new();
    no_context.insert("value".into(), json!(false));
    no_context.insert("signature".into(), json!(signature));

    let has_event = event.is_some();
    for ctx in [&mut yes_context, &mut no_context] {
        ctx.insert("hasEvent".into(), Value::Bool(has_event));
        if let Some(e) = event {
            ctx.insert("subject".into(), json!(e.subject));
            ctx.insert("weblink".into(), json!(e.weblink));
            ctx.insert("startTime".into(), json!(e.start));
        }
    }

    let text = match event {
        None => format!(
            "You have no upcoming events.\nShall I change your status back to {}?",
            status.pretty()
        ),
        Some(e) => format!(
            "{}\nShall I change your status to {}?",
            render_event_will_start_line(&e.subject, &e.weblink, e.start, now),
            status.pretty()
        ),
    };

    let title = "Status change".to_string();
    Attachment {
        fallback: format!("{}: {}", title, text),
        title,
        text,
        actions: vec![
            PostAction {
                name: "Yes".into(),
                integration: PostActionIntegration {
                    url: url.to_string(),
                    context: yes_context,
                },
                ..Default::default()
            },
            PostAction {
                name: "No".into(),
                integration: PostActionIntegration {
                    url: url.to_string(),
                    context: no_context,
                },
                ..Default::default()
            },
        ],
        ..Default::default()
    }
}

/// "Monday, March 02 · (1:00PM - 2:00PM)" in the given zone.
pub fn render_when(start: DateTime<Utc>, end: DateTime<Utc>, tz: Tz, now: DateTime<Utc>) -> String {
    let local_start = start.with_timezone(&tz);
    let date_format = if local_start.year() != now.with_timezone(&tz).year() {
        "%A, %B %d, %Y"
    } else {
        "%A, %B %d"
    };
    format!(
        "{} · ({} - {})",
        local_start.format(date_format),
        kitchen_time(start, tz),
        kitchen_time(end, tz)
    )
}

fn event_fields(event: &Event, tz: Tz, now: DateTime<Utc>) -> Vec<AttachmentField> {
    let mut fields = vec![AttachmentField {
        title: "When".into(),
        value: render_when(event.start, event.end, tz, now),
        short: true,
    }];
    if !event.location.is_empty() {
        fields.push(AttachmentField {
            title: "Location".into(),
            value: event.location.clone(),
            short: true,
        });
    }
    fields
}

/// Reminder DM for an event about to start.
pub fn render_upcoming_event_attachment(event: &Event, tz: Tz, now: DateTime<Utc>) -> Attachment {
    let title = ensure_subject(&event.subject).to_string();
    let text = render_event_will_start_line(&event.subject, &event.weblink, event.start, now);
    Attachment {
        fallback: text.clone(),
        title,
        title_link: event.weblink.clone(),
        text,
        fields: event_fields(event, tz, now),
        ..Default::default()
    }
}

/// Event summary posted to linked channels, with the zone spelled out.
pub fn render_event_attachment(event: &Event, tz: Tz, now: DateTime<Utc>) -> Attachment {
    let title = ensure_subject(&event.subject).to_string();
    let mut fields = event_fields(event, tz, now);
    fields.push(AttachmentField {
        title: "Timezone".into(),
        value: tz.name().to_string(),
        short: true,
    });
    Attachment {
        fallback: format!("{} ({})", title, render_when(event.start, event.end, tz, now)),
        title,
        title_link: event.weblink.clone(),
        text: markdown_to_html_entities(&event.body_preview),
        fields,
        ..Default::default()
    }
}

/// Markdown agenda of one day's events, used by the daily summary.
pub fn render_calendar_view(events: &[Event], tz: Tz, day: DateTime<Utc>) -> String {
    if events.is_empty() {
        return "You have no upcoming events.".to_string();
    }

    let mut out = format!(
        "Times are shown in {}\nAgenda for {}.\n\n| Time | Subject |\n| :-- | :-- |",
        tz.name(),
        day.with_timezone(&tz).format("%A, %B %d")
    );
    for event in events {
        let time = if event.is_all_day {
            "All day".to_string()
        } else {
            format!("{} - {}", kitchen_time(event.start, tz), kitchen_time(event.end, tz))
        };
        let subject = markdown_to_html_entities(ensure_subject(&event.subject));
        let subject = if event.weblink.is_empty() {
            subject
        } else {
            format!("[{}]({})", subject, event.weblink)
        };
        out.push_str(&format!("\n| {} | {} |", time, subject));
    }
    out
}
