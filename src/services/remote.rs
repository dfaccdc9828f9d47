// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Calendar provider abstraction.
//!
//! The engine only talks to [`RemoteProvider`] and [`CalendarClient`];
//! the concrete backend is chosen once at startup from configuration.

use crate::models::user::{OAuthToken, RemoteUser};
use crate::models::{CalendarView, Event, Notification, RemoteSubscription, User};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Classification of calendar provider failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorKind {
    /// The remote object no longer exists
    NotFound,
    Unauthorized,
    /// The user's stored token cannot be refreshed
    RefreshTokenNotSet,
    /// No application-level (superuser) client is configured
    SuperuserNotSupported,
    RateLimited,
    Http,
    Transport,
    Decode,
}

impl fmt::Display for RemoteErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RemoteErrorKind::NotFound => "not found",
            RemoteErrorKind::Unauthorized => "unauthorized",
            RemoteErrorKind::RefreshTokenNotSet => "refresh token not set",
            RemoteErrorKind::SuperuserNotSupported => "superuser client not supported",
            RemoteErrorKind::RateLimited => "rate limited",
            RemoteErrorKind::Http => "http error",
            RemoteErrorKind::Transport => "transport error",
            RemoteErrorKind::Decode => "decode error",
        };
        f.write_str(s)
    }
}

/// Error returned by calendar provider calls.
#[derive(Debug, Clone, thiserror::Error)]
#[error("calendar provider {kind}: {message}")]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn superuser_not_supported() -> Self {
        Self::new(
            RemoteErrorKind::SuperuserNotSupported,
            "no application credentials configured",
        )
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == RemoteErrorKind::NotFound
    }

    pub fn is_superuser_not_supported(&self) -> bool {
        self.kind == RemoteErrorKind::SuperuserNotSupported
    }
}

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// One entry of a batched calendar fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewCalendarParams {
    pub remote_user_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailboxSettings {
    /// Provider timezone name (IANA or Windows)
    pub time_zone: String,
}

/// Operations against one user's calendar, or all users for a superuser client.
#[async_trait]
pub trait CalendarClient: Send + Sync {
    /// Account the client's token belongs to.
    async fn get_me(&self) -> RemoteResult<RemoteUser>;

    /// Expanded event instances overlapping `[start, end)`.
    async fn get_default_calendar_view(
        &self,
        remote_user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> RemoteResult<Vec<Event>>;

    /// Events starting within `[start, end)`.
    async fn get_events_between_dates(
        &self,
        remote_user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> RemoteResult<Vec<Event>>;

    /// Fetch calendar views for many users in as few requests as possible.
    ///
    /// Per-user failures are reported in [`CalendarView::error`].
    async fn batch_view_calendar(
        &self,
        params: &[ViewCalendarParams],
    ) -> RemoteResult<Vec<CalendarView>>;

    async fn get_event(&self, remote_user_id: &str, event_id: &str) -> RemoteResult<Event>;

    /// Fill in the event of a notification that only carried identifiers.
    async fn get_notification_data(
        &self,
        remote_user_id: &str,
        notification: &Notification,
    ) -> RemoteResult<Notification>;

    async fn get_mailbox_settings(&self, remote_user_id: &str) -> RemoteResult<MailboxSettings>;

    /// Respond to an invitation (`accept`, `tentativelyAccept` or `decline`).
    async fn respond_to_event(
        &self,
        remote_user_id: &str,
        event_id: &str,
        response: &str,
    ) -> RemoteResult<()>;

    async fn create_subscription(
        &self,
        notification_url: &str,
        remote_user_id: &str,
        client_state: &str,
    ) -> RemoteResult<RemoteSubscription>;

    async fn renew_subscription(
        &self,
        notification_url: &str,
        remote_user_id: &str,
        subscription: &RemoteSubscription,
    ) -> RemoteResult<RemoteSubscription>;

    async fn delete_subscription(&self, subscription: &RemoteSubscription) -> RemoteResult<()>;
}

/// Factory for calendar clients plus provider-specific webhook parsing.
#[async_trait]
pub trait RemoteProvider: Send + Sync {
    /// Provider name used in webhook URLs.
    fn name(&self) -> &'static str;

    /// Client acting with the user's own (refreshed) OAuth token.
    async fn make_user_client(&self, user: &User) -> RemoteResult<Arc<dyn CalendarClient>>;

    /// Application-level client; fails with `SuperuserNotSupported` when
    /// no tenant credentials are configured.
    async fn make_superuser_client(&self) -> RemoteResult<Arc<dyn CalendarClient>>;

    /// Authorization page the user is sent to when linking an account.
    fn authorize_url(&self, redirect_uri: &str, state: &str) -> String;

    /// Exchange an authorization code for tokens.
    async fn exchange_code(&self, redirect_uri: &str, code: &str) -> RemoteResult<OAuthToken>;

    /// Decode a webhook body into notifications.
    fn parse_notifications(&self, body: &[u8]) -> RemoteResult<Vec<Notification>>;
}
