// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Busy-window normalization for a single user's calendar view.
//!
//! Events are first filtered down to real meetings the user is busy for,
//! then merged so that overlapping or closely spaced meetings count as one
//! busy interval. The merged list drives both status decisions.

use crate::config::status_sync_job_interval;
use crate::models::event::ShowAs;
use crate::models::Event;

/// Keep only non-cancelled busy events with at least one attendee.
///
/// Events without attendees are usually personal blocks, not meetings.
pub fn filter_busy_events(events: &[Event]) -> Vec<Event> {
    events
        .iter()
        .filter(|e| e.show_as == ShowAs::Busy && !e.is_cancelled && !e.attendees.is_empty())
        .cloned()
        .collect()
}

/// Whether `next` should be folded into `current`.
///
/// Either they overlap, or `current` is shorter than one sync interval and
/// `next` starts within one sync interval of its end. The second case keeps
/// a short meeting followed closely by another from being missed between
/// two polls.
pub fn are_mergeable(current: &Event, next: &Event) -> bool {
    let interval = status_sync_job_interval();
    if current.end >= next.start {
        return true;
    }
    current.end - current.start <= interval && next.start - current.end <= interval
}

/// Merge a start-sorted list of events into compacted busy intervals.
///
/// Each merged interval keeps the identity (id, ical_uid, start) of its
/// first event and extends its end to cover the absorbed events.
pub fn merge_events(events: Vec<Event>) -> Vec<Event> {
    let mut merged: Vec<Event> = Vec::with_capacity(events.len());
    for event in events {
        match merged.last_mut() {
            Some(current) if are_mergeable(current, &event) => {
                if event.end > current.end {
                    current.end = event.end;
                }
            }
            _ => merged.push(event),
        }
    }
    merged
}

/// Filter then merge, the form both decision engines consume.
pub fn busy_windows(events: &[Event]) -> Vec<Event> {
    merge_events(filter_busy_events(events))
}

/// Fingerprints of the non-cancelled events, in input order.
pub fn fingerprints(events: &[Event]) -> Vec<String> {
    events
        .iter()
        .filter(|e| !e.is_cancelled)
        .map(Event::fingerprint)
        .collect()
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::models::event::{Attendee, EmailAddress, ShowAs};
    use crate::models::Event;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    pub fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 13, 0, 0).unwrap()
    }

    /// Busy event with two attendees, offsets in minutes from `base_time`.
    pub fn event(uid: &str, start_min: i64, end_min: i64) -> Event {
        Event {
            id: format!("id-{}", uid),
            ical_uid: uid.to_string(),
            subject: format!("Meeting {}", uid),
            body_preview: String::new(),
            importance: "normal".to_string(),
            start: base_time() + Duration::minutes(start_min),
            end: base_time() + Duration::minutes(end_min),
            is_all_day: false,
            is_cancelled: false,
            is_organizer: false,
            response_requested: false,
            show_as: ShowAs::Busy,
            response_status: None,
            organizer: None,
            attendees: vec![
                Attendee {
                    email_address: EmailAddress {
                        name: "A".into(),
                        address: "a@example.com".into(),
                    },
                },
                Attendee {
                    email_address: EmailAddress {
                        name: "B".into(),
                        address: "b@example.com".into(),
                    },
                },
            ],
            location: String::new(),
            weblink: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{base_time, event};
    use super::*;
    use chrono::Duration;
    use std::collections::HashSet;

    #[test]
    fn test_overlapping_events_collapse() {
        let merged = merge_events(vec![event("a", 1, 4), event("b", 3, 5)]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].ical_uid, "a");
        assert_eq!(merged[0].start, base_time() + Duration::minutes(1));
        assert_eq!(merged[0].end, base_time() + Duration::minutes(5));
    }

    #[test]
    fn test_short_gap_between_short_events_collapses() {
        let merged = merge_events(vec![event("a", 1, 2), event("b", 3, 5)]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].end, base_time() + Duration::minutes(5));
    }

    #[test]
    fn test_long_event_with_long_gap_stays_separate() {
        let merged = merge_events(vec![event("a", 0, 30), event("b", 40, 60)]);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_long_event_with_short_gap_stays_separate() {
        // current lasts longer than one interval, so the gap rule does not apply
        let merged = merge_events(vec![event("a", 0, 30), event("b", 32, 60)]);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_contained_event_does_not_shrink_window() {
        let merged = merge_events(vec![event("a", 0, 30), event("b", 5, 10)]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].end, base_time() + Duration::minutes(30));
    }

    #[test]
    fn test_merge_is_idempotent() {
        let events = vec![
            event("a", 0, 2),
            event("b", 4, 6),
            event("c", 20, 50),
            event("d", 45, 55),
            event("e", 70, 90),
        ];
        let once = merge_events(events);
        let twice = merge_events(once.clone());
        assert_eq!(once, twice);
        assert!(once.len() <= 5);
    }

    #[test]
    fn test_filter_drops_non_meetings() {
        let mut cancelled = event("c", 0, 10);
        cancelled.is_cancelled = true;
        let mut solo = event("s", 0, 10);
        solo.attendees.clear();
        let mut free = event("f", 0, 10);
        free.show_as = ShowAs::Free;
        let mut tentative = event("t", 0, 10);
        tentative.show_as = ShowAs::Tentative;

        let kept = filter_busy_events(&[
            cancelled,
            solo,
            free,
            tentative,
            event("ok", 0, 10),
        ]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].ical_uid, "ok");
    }

    #[test]
    fn test_fingerprints_are_order_independent() {
        let a = fingerprints(&[event("a", 0, 10), event("b", 20, 30)]);
        let b = fingerprints(&[event("b", 20, 30), event("a", 0, 10)]);
        let a: HashSet<_> = a.into_iter().collect();
        let b: HashSet<_> = b.into_iter().collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_changes_with_start_time() {
        let before = fingerprints(&[event("a", 0, 10)]);
        let after = fingerprints(&[event("a", 1, 10)]);
        assert_ne!(before, after);
        assert_eq!(before[0], "a 2026-03-02T13:00:00Z");
    }
}
