// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Daily agenda DM, posted on weekdays at the user's chosen time.

use crate::config::{DAILY_SUMMARY_JOB_INTERVAL_MINUTES, DAILY_SUMMARY_WINDOW_MINUTES};
use crate::error::{AppError, Result};
use crate::models::user::DailySummarySettings;
use crate::models::{CalendarView, Event, User};
use crate::services::engine::Engine;
use crate::services::remote::ViewCalendarParams;
use crate::services::views;
use crate::time_utils::{resolve_timezone, resolve_timezone_or_utc};
use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Timelike, Utc, Weekday};
use chrono_tz::Tz;
use std::collections::HashMap;

/// Format of the post time setting, e.g. `8:00AM`.
const POST_TIME_FORMAT: &str = "%I:%M%p";

/// Upper-case a trailing am/pm so `9:15pm` is stored as `9:15PM`.
pub fn convert_meridiem_to_upper_case(time: &str) -> String {
    let time = time.trim();
    if time.len() < 2 || !time.is_char_boundary(time.len() - 2) {
        return time.to_string();
    }
    let (head, meridiem) = time.split_at(time.len() - 2);
    let upper = meridiem.to_ascii_uppercase();
    if upper == "AM" || upper == "PM" {
        format!("{}{}", head, upper)
    } else {
        time.to_string()
    }
}

fn parse_post_time(time: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(time, POST_TIME_FORMAT).ok()
}

/// Midnight to midnight of `now`'s calendar day in `timezone`, as UTC.
pub fn today_hours_for_timezone(now: DateTime<Utc>, timezone: &str) -> (DateTime<Utc>, DateTime<Utc>) {
    let tz = resolve_timezone_or_utc(timezone);
    let day = now.with_timezone(&tz).date_naive();
    let start = day
        .and_hms_opt(0, 0, 0)
        .and_then(|midnight| tz.from_local_datetime(&midnight).earliest())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or(now);
    (start, start + Duration::hours(24))
}

/// True if the summary is due at `now`.
///
/// Due means enabled, not posted within the window, a weekday in the
/// user's timezone and within the window of the configured post time.
pub fn should_post_daily_summary(settings: &DailySummarySettings, now: DateTime<Utc>) -> Result<bool> {
    if !settings.enable {
        return Ok(false);
    }

    let window = Duration::minutes(DAILY_SUMMARY_WINDOW_MINUTES);
    if let Some(last) = settings.last_post_time {
        if now - last < window {
            return Ok(false);
        }
    }

    let tz: Tz = resolve_timezone(&settings.timezone).ok_or_else(|| {
        AppError::BadRequest(format!("invalid timezone '{}'", settings.timezone))
    })?;
    let post_time = parse_post_time(&settings.post_time).ok_or_else(|| {
        AppError::BadRequest(format!("invalid post time '{}'", settings.post_time))
    })?;

    let local = now.with_timezone(&tz);
    if matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
        return Ok(false);
    }

    let Some(target) = tz
        .from_local_datetime(&local.date_naive().and_time(post_time))
        .earliest()
    else {
        // Post time falls in a DST gap today
        return Ok(false);
    };
    let diff = local.signed_duration_since(target);
    Ok(diff.abs() < window)
}

fn exclude_declined(events: Vec<Event>) -> Vec<Event> {
    events.into_iter().filter(|e| !e.is_declined()).collect()
}

impl Engine {
    pub async fn get_daily_summary_settings_for_user(
        &self,
        chat_user_id: &str,
    ) -> Result<Option<DailySummarySettings>> {
        Ok(self.load_connected_user(chat_user_id).await?.settings.daily_summary)
    }

    /// Set the time of day the summary is posted, in the user's timezone.
    pub async fn set_daily_summary_post_time(
        &self,
        chat_user_id: &str,
        time: &str,
    ) -> Result<DailySummarySettings> {
        let time = convert_meridiem_to_upper_case(time);
        let parsed = parse_post_time(&time)
            .ok_or_else(|| AppError::BadRequest(format!("invalid time value: {}", time)))?;
        if i64::from(parsed.minute()) % DAILY_SUMMARY_JOB_INTERVAL_MINUTES != 0 {
            return Err(AppError::BadRequest(format!(
                "time must be a multiple of {} minutes",
                DAILY_SUMMARY_JOB_INTERVAL_MINUTES
            )));
        }

        let _guard = self.env.user_locks.lock(chat_user_id).await;
        let mut user = self.load_connected_user(chat_user_id).await?;
        let timezone = self.get_timezone(&user).await?;

        let summary = user.settings.daily_summary.get_or_insert_with(Default::default);
        summary.post_time = time;
        summary.timezone = timezone;
        let summary = summary.clone();

        self.env.store.store_user(&user).await?;
        Ok(summary)
    }

    pub async fn set_daily_summary_enabled(
        &self,
        chat_user_id: &str,
        enable: bool,
    ) -> Result<DailySummarySettings> {
        let _guard = self.env.user_locks.lock(chat_user_id).await;
        let mut user = self.load_connected_user(chat_user_id).await?;

        let summary = user.settings.daily_summary.get_or_insert_with(Default::default);
        summary.enable = enable;
        let summary = summary.clone();

        self.env.store.store_user(&user).await?;
        Ok(summary)
    }

    /// Render the user's agenda for the day containing `day`.
    pub async fn get_day_summary_for_user(&self, chat_user_id: &str, day: DateTime<Utc>) -> Result<String> {
        let user = self.load_connected_user(chat_user_id).await?;
        let timezone = self.get_timezone(&user).await?;
        let events = self.get_today_calendar_events(&user, day, &timezone).await?;
        Ok(views::render_calendar_view(
            &exclude_declined(events),
            resolve_timezone_or_utc(&timezone),
            day,
        ))
    }

    async fn get_today_calendar_events(
        &self,
        user: &User,
        now: DateTime<Utc>,
        timezone: &str,
    ) -> Result<Vec<Event>> {
        let client = self.client_for(user).await?;
        let (start, end) = today_hours_for_timezone(now, timezone);
        Ok(client
            .get_default_calendar_view(&user.remote.id, start, end)
            .await?)
    }

    /// Post the daily summary to every user for whom it is due.
    ///
    /// Returns the number of summaries sent. Per-user failures are logged
    /// and skipped.
    pub async fn process_all_daily_summary(&self, now: DateTime<Utc>) -> Result<usize> {
        let index = self.env.store.load_user_index().await?;
        if index.is_empty() {
            return Ok(0);
        }

        let superuser = match self.env.remote.make_superuser_client().await {
            Ok(client) => Some(client),
            Err(e) if e.is_superuser_not_supported() => None,
            Err(e) => return Err(e.into()),
        };

        let mut views_to_post: Vec<CalendarView> = Vec::new();
        let mut requests = Vec::new();
        let mut by_remote_id: HashMap<String, User> = HashMap::new();

        for entry in &index {
            let user = match self.env.store.load_user(&entry.chat_user_id).await {
                Ok(Some(user)) => user,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(
                        user_id = %entry.chat_user_id,
                        error = %e,
                        "Failed to load user for daily summary"
                    );
                    continue;
                }
            };

            let Some(settings) = user.settings.daily_summary.clone() else {
                continue;
            };
            match should_post_daily_summary(&settings, now) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    tracing::warn!(
                        user_id = %user.chat_user_id,
                        now = %now,
                        error = %e,
                        "Failed to check whether to post daily summary"
                    );
                    continue;
                }
            }

            if superuser.is_some() {
                let (start, end) = today_hours_for_timezone(now, &settings.timezone);
                requests.push(ViewCalendarParams {
                    remote_user_id: user.remote.id.clone(),
                    start,
                    end,
                });
            } else {
                let timezone = match self.get_timezone(&user).await {
                    Ok(tz) => tz,
                    Err(e) => {
                        tracing::error!(
                            user_id = %user.chat_user_id,
                            error = %e,
                            "Failed to get user timezone"
                        );
                        continue;
                    }
                };
                match self.get_today_calendar_events(&user, now, &timezone).await {
                    Ok(events) => views_to_post.push(CalendarView {
                        remote_user_id: user.remote.id.clone(),
                        events,
                        error: None,
                    }),
                    Err(e) => {
                        tracing::error!(
                            user_id = %user.chat_user_id,
                            now = %now,
                            timezone = %timezone,
                            error = %e,
                            "Failed to get user calendar events"
                        );
                        continue;
                    }
                }
            }
            by_remote_id.insert(user.remote.id.clone(), user);
        }

        if let Some(client) = &superuser {
            if !requests.is_empty() {
                views_to_post = client.batch_view_calendar(&requests).await?;
            }
        }

        let mut sent = 0;
        for view in views_to_post {
            let Some(user) = by_remote_id.get(&view.remote_user_id) else {
                continue;
            };
            let Some(settings) = &user.settings.daily_summary else {
                continue;
            };
            if let Some(err) = &view.error {
                tracing::warn!(
                    user_id = %user.chat_user_id,
                    code = %err.code,
                    message = %err.message,
                    "Error fetching calendar for daily summary"
                );
            }

            let tz = resolve_timezone_or_utc(&settings.timezone);
            let message = views::render_calendar_view(&exclude_declined(view.events), tz, now);
            if let Err(e) = self.env.poster.dm(&user.chat_user_id, &message).await {
                tracing::warn!(
                    user_id = %user.chat_user_id,
                    error = %e,
                    "Failed to send daily summary"
                );
                continue;
            }
            sent += 1;

            if let Err(e) = self.record_daily_summary_posted(&user.chat_user_id, now).await {
                tracing::warn!(
                    user_id = %user.chat_user_id,
                    error = %e,
                    "Failed to store daily summary post time"
                );
            }
        }

        tracing::info!(users = sent, "Processed daily summaries");
        Ok(sent)
    }

    async fn record_daily_summary_posted(&self, chat_user_id: &str, at: DateTime<Utc>) -> Result<()> {
        let _guard = self.env.user_locks.lock(chat_user_id).await;
        let mut user = self.load_connected_user(chat_user_id).await?;
        if let Some(summary) = user.settings.daily_summary.as_mut() {
            summary.last_post_time = Some(at);
        }
        self.env.store.store_user(&user).await
    }
}
