// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Batch availability sync: fetch calendar views, send reminders, and
//! reconcile presence and custom status for every connected user.

use crate::config::{calendar_view_window, INDIVIDUAL_FETCH_CONCURRENCY};
use crate::error::{AppError, Result};
use crate::models::{CalendarView, Event, User, UserIndexEntry};
use crate::models::user::StatusOption;
use crate::services::engine::{Engine, LogLimiter};
use crate::services::remote::{CalendarClient, ViewCalendarParams};
use crate::services::window;
use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Counters for one sync pass. Observational only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobSummary {
    pub users_processed: usize,
    pub users_status_changed: usize,
    pub users_failed_status_changed: usize,
}

/// Result message and counters of a sync pass.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub message: String,
    pub summary: JobSummary,
}

/// A pass that stopped early, with whatever message and counters it had.
struct PassFailure {
    message: String,
    summary: JobSummary,
    error: AppError,
}

impl Engine {
    /// Sync a single connected user.
    pub async fn sync(&self, chat_user_id: &str) -> Result<SyncReport> {
        self.sync_at(chat_user_id, Utc::now()).await
    }

    pub async fn sync_at(&self, chat_user_id: &str, now: DateTime<Utc>) -> Result<SyncReport> {
        let user = self.env.store.load_user(chat_user_id).await?.ok_or_else(|| {
            AppError::NotFound(format!("user {} is not connected", chat_user_id))
        })?;
        let superuser = self.superuser_client_if_supported().await?;

        self.sync_users(&[user.index_entry()], superuser, now)
            .await
            .map_err(|failure| failure.error)
    }

    /// Sync every user in the index.
    ///
    /// A pass that stops with an explanatory message (for example because no
    /// user needs syncing) is reported as a success carrying that message.
    pub async fn sync_all(&self) -> Result<SyncReport> {
        self.sync_all_at(Utc::now()).await
    }

    pub async fn sync_all_at(&self, now: DateTime<Utc>) -> Result<SyncReport> {
        let index = self.env.store.load_user_index().await?;
        if index.is_empty() {
            return Ok(SyncReport {
                message: "No users found in user index".to_string(),
                summary: JobSummary::default(),
            });
        }

        let superuser = self.superuser_client_if_supported().await?;

        match self.sync_users(&index, superuser, now).await {
            Ok(report) => Ok(report),
            Err(failure) if !failure.message.is_empty() => {
                tracing::info!(error = %failure.error, "Availability sync stopped early");
                Ok(SyncReport {
                    message: failure.message,
                    summary: failure.summary,
                })
            }
            Err(failure) => Err(failure.error),
        }
    }

    /// The application client, or `None` when only per-user clients exist.
    async fn superuser_client_if_supported(&self) -> Result<Option<Arc<dyn CalendarClient>>> {
        match self.env.remote.make_superuser_client().await {
            Ok(client) => Ok(Some(client)),
            Err(e) if e.is_superuser_not_supported() => Ok(None),
            Err(e) => Err(AppError::Remote(e)),
        }
    }

    async fn sync_users(
        &self,
        index: &[UserIndexEntry],
        superuser: Option<Arc<dyn CalendarClient>>,
        now: DateTime<Utc>,
    ) -> std::result::Result<SyncReport, PassFailure> {
        let mut summary = JobSummary::default();
        if index.is_empty() {
            return Ok(SyncReport {
                message: "No connected users found".to_string(),
                summary,
            });
        }
        summary.users_processed = index.len();

        let fetch_individually = superuser.is_none();
        let (users, views) = match self
            .retrieve_users_to_sync(index, &mut summary, superuser, now)
            .await
        {
            Ok(found) => found,
            Err(error) => {
                tracing::warn!(
                    error = %error,
                    individually = fetch_individually,
                    "Failed to retrieve users to sync"
                );
                let message = match &error {
                    AppError::NotFound(msg) => msg.clone(),
                    other => other.to_string(),
                };
                return Err(PassFailure {
                    message,
                    summary,
                    error,
                });
            }
        };

        self.deliver_reminders(&users, &views, now).await;

        match self.set_user_statuses(&users, &views, now).await {
            Ok((message, changed, failed)) => {
                summary.users_failed_status_changed += failed;
                summary.users_status_changed = changed;
                tracing::info!(
                    processed = summary.users_processed,
                    changed = summary.users_status_changed,
                    failed = summary.users_failed_status_changed,
                    "Availability sync complete"
                );
                Ok(SyncReport { message, summary })
            }
            Err(error) => Err(PassFailure {
                message: String::new(),
                summary,
                error,
            }),
        }
    }

    /// Load eligible users and fetch their calendar views for the next window.
    ///
    /// Without an application client each user's view is fetched with the
    /// user's own credentials; otherwise one batched call covers everyone.
    async fn retrieve_users_to_sync(
        &self,
        index: &[UserIndexEntry],
        summary: &mut JobSummary,
        superuser: Option<Arc<dyn CalendarClient>>,
        now: DateTime<Utc>,
    ) -> Result<(Vec<User>, Vec<CalendarView>)> {
        let start = now;
        let end = now + calendar_view_window();

        let mut limiter = LogLimiter::default();
        let mut eligible = Vec::new();

        for entry in index {
            let user = match self.env.store.load_user(&entry.chat_user_id).await {
                Ok(Some(user)) => user,
                Ok(None) => {
                    summary.users_failed_status_changed += 1;
                    if limiter.allow() {
                        tracing::warn!(
                            user_id = %entry.chat_user_id,
                            "User in index has no stored record"
                        );
                    }
                    continue;
                }
                Err(e) => {
                    summary.users_failed_status_changed += 1;
                    if limiter.allow() {
                        tracing::warn!(
                            user_id = %entry.chat_user_id,
                            error = %e,
                            "Failed to load user from index"
                        );
                    }
                    continue;
                }
            };

            if user.needs_sync() {
                eligible.push(user);
            }
        }

        let (users, mut views) = if superuser.is_some() {
            (eligible, Vec::new())
        } else {
            let fetched: Vec<(User, Result<Vec<Event>>)> = stream::iter(eligible)
                .map(|user| async move {
                    let events = self.fetch_user_events(&user, start, end).await;
                    (user, events)
                })
                .buffered(INDIVIDUAL_FETCH_CONCURRENCY)
                .collect()
                .await;

            let mut users = Vec::with_capacity(fetched.len());
            let mut views = Vec::with_capacity(fetched.len());
            for (user, events) in fetched {
                match events {
                    Ok(events) => {
                        views.push(CalendarView {
                            remote_user_id: user.remote.id.clone(),
                            events: events.into_iter().filter(|e| !e.is_declined()).collect(),
                            error: None,
                        });
                        users.push(user);
                    }
                    Err(e) => {
                        summary.users_failed_status_changed += 1;
                        if limiter.allow() {
                            tracing::warn!(
                                user_id = %user.chat_user_id,
                                error = %e,
                                "Failed to fetch calendar events"
                            );
                        }
                    }
                }
            }
            (users, views)
        };

        if users.is_empty() {
            return Err(AppError::NotFound("No users need to be synced".to_string()));
        }

        if let Some(client) = superuser {
            let params: Vec<ViewCalendarParams> = users
                .iter()
                .map(|u| ViewCalendarParams {
                    remote_user_id: u.remote.id.clone(),
                    start,
                    end,
                })
                .collect();
            views = client.batch_view_calendar(&params).await.map_err(|e| {
                AppError::Internal(anyhow::anyhow!(
                    "unable to get calendar views for connected users: {}",
                    e
                ))
            })?;
        }

        if views.is_empty() {
            return Err(AppError::NotFound("No calendar views found".to_string()));
        }

        for view in &mut views {
            view.sort_events();
        }

        Ok((users, views))
    }

    /// One user's events with their own credentials.
    async fn fetch_user_events(
        &self,
        user: &User,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Event>> {
        let client = self.env.remote.make_user_client(user).await?;
        Ok(client
            .get_events_between_dates(&user.remote.id, start, end)
            .await?)
    }

    async fn deliver_reminders(&self, users: &[User], views: &[CalendarView], now: DateTime<Utc>) {
        let by_remote_id: HashMap<&str, &User> = users
            .iter()
            .filter(|u| u.settings.receive_reminders)
            .map(|u| (u.remote.id.as_str(), u))
            .collect();
        if by_remote_id.is_empty() {
            return;
        }

        let mut limiter = LogLimiter::default();
        for view in views {
            let Some(user) = by_remote_id.get(view.remote_user_id.as_str()) else {
                continue;
            };
            if let Some(err) = &view.error {
                if limiter.allow() {
                    tracing::warn!(
                        user_id = %user.chat_user_id,
                        code = %err.code,
                        error = %err.message,
                        "Error getting availability for reminders"
                    );
                }
                continue;
            }
            self.notify_upcoming_events(user, &view.events, now).await;
        }
    }

    /// Returns the last decision message, the number of users whose status
    /// changed, and the number of users that failed.
    async fn set_user_statuses(
        &self,
        users: &[User],
        views: &[CalendarView],
        now: DateTime<Utc>,
    ) -> Result<(String, usize, usize)> {
        let to_update: Vec<&User> = users
            .iter()
            .filter(|u| {
                u.is_configured_for_status_updates() || u.is_configured_for_custom_status_updates()
            })
            .collect();
        if to_update.is_empty() {
            return Ok(("No users want to have their status updated".to_string(), 0, 0));
        }

        let ids: Vec<String> = to_update.iter().map(|u| u.chat_user_id.clone()).collect();
        let statuses = self.env.presence.get_statuses(&ids).await.map_err(|e| {
            AppError::Internal(anyhow::anyhow!(
                "error getting chat user statuses for connected users: {}",
                e
            ))
        })?;
        let status_by_user: HashMap<&str, _> =
            statuses.iter().map(|s| (s.user_id.as_str(), s)).collect();
        let by_remote_id: HashMap<&str, &User> = to_update
            .iter()
            .map(|u| (u.remote.id.as_str(), *u))
            .collect();

        let mut limiter = LogLimiter::default();
        let (mut changed, mut failed) = (0usize, 0usize);
        let mut res = String::new();

        for view in views {
            let Some(listed) = by_remote_id.get(view.remote_user_id.as_str()) else {
                continue;
            };
            if let Some(err) = &view.error {
                if limiter.allow() {
                    tracing::warn!(
                        user_id = %listed.chat_user_id,
                        code = %err.code,
                        error = %err.message,
                        "Error getting availability"
                    );
                }
                failed += 1;
                continue;
            }
            let Some(status) = status_by_user.get(listed.chat_user_id.as_str()) else {
                continue;
            };

            let events = window::busy_windows(&view.events);

            let _guard = self.env.user_locks.lock(&listed.chat_user_id).await;
            // Re-read under the lock; the webhook path may have written since
            let mut user = match self.env.store.load_user(&listed.chat_user_id).await {
                Ok(Some(fresh)) => fresh,
                Ok(None) => {
                    tracing::debug!(
                        user_id = %listed.chat_user_id,
                        "User disconnected during sync"
                    );
                    continue;
                }
                Err(e) => {
                    if limiter.allow() {
                        tracing::warn!(
                            user_id = %listed.chat_user_id,
                            error = %e,
                            "Failed to reload user before status update"
                        );
                    }
                    failed += 1;
                    continue;
                }
            };

            if user.is_configured_for_status_updates() {
                match self
                    .set_status_from_calendar_view(&mut user, status, &events, now)
                    .await
                {
                    Ok(outcome) => {
                        if outcome.changed {
                            changed += 1;
                        }
                        res = outcome.message;
                    }
                    Err(e) => {
                        if limiter.allow() {
                            tracing::warn!(
                                user_id = %user.chat_user_id,
                                error = %e,
                                "Error setting user status"
                            );
                        }
                        failed += 1;
                        res.clear();
                    }
                }
            }

            if user.is_configured_for_custom_status_updates() {
                match self
                    .set_custom_status_from_calendar_view(&mut user, &events)
                    .await
                {
                    Ok(outcome) => {
                        // Count each user once when both features are on
                        if outcome.changed
                            && user.settings.update_status_from == StatusOption::NotSet
                        {
                            changed += 1;
                        }
                        res = outcome.message;
                    }
                    Err(e) => {
                        if limiter.allow() {
                            tracing::warn!(
                                user_id = %user.chat_user_id,
                                error = %e,
                                "Error setting user custom status"
                            );
                        }
                        failed += 1;
                        res.clear();
                    }
                }
            }
        }

        if !res.is_empty() {
            return Ok((res, changed, failed));
        }

        let json = serde_json::to_string_pretty(views)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("failed to render views: {}", e)))?;
        Ok((format!("```json\n{}\n```", json), changed, failed))
    }
}
