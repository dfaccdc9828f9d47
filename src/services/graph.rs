// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Microsoft Graph calendar provider.
//!
//! Handles:
//! - Calendar views, single and batched (`$batch`, 20 requests per call)
//! - Change-notification subscriptions and webhook payload decoding
//! - Per-user token refresh with an in-process token cache
//! - App-only (client credentials) access when a tenant is configured

use crate::config::Config;
use crate::db::Store;
use crate::models::event::{Attendee, EmailAddress, EventResponse, ShowAs, ViewError};
use crate::models::user::{OAuthToken, RemoteUser};
use crate::models::{CalendarView, Event, Notification, RemoteSubscription, User};
use crate::services::remote::{
    CalendarClient, MailboxSettings, RemoteError, RemoteErrorKind, RemoteProvider, RemoteResult,
    ViewCalendarParams,
};
use crate::time_utils::{format_utc_rfc3339, resolve_timezone_or_utc};
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

pub const GRAPH_BASE_URL: &str = "https://graph.microsoft.com/v1.0";
pub const LOGIN_BASE_URL: &str = "https://login.microsoftonline.com";

/// Graph accepts at most 20 requests in one `$batch` call.
const MAX_BATCH_SIZE: usize = 20;

/// Lifetime requested for event subscriptions (the maximum Graph allows).
const SUBSCRIPTION_TTL_MINUTES: i64 = 4230;

/// Margin before token expiration when we refresh proactively.
const TOKEN_REFRESH_MARGIN_SECS: i64 = 5 * 60;

const USER_SCOPES: &str = "offline_access User.Read Calendars.ReadWrite MailboxSettings.Read";
const APP_SCOPE: &str = "https://graph.microsoft.com/.default";

const EVENT_FIELDS: &str = "id,iCalUId,subject,bodyPreview,importance,start,end,isAllDay,\
isCancelled,isOrganizer,responseRequested,showAs,responseStatus,organizer,attendees,location,webLink";

/// Ask Graph to report all event times in UTC.
const PREFER_UTC: (&str, &str) = ("Prefer", "outlook.timezone=\"UTC\"");

const SUBSCRIPTION_CHANGE_TYPES: &str = "created,updated,deleted";

// ─── Wire types ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphDateTime {
    date_time: String,
    #[serde(default)]
    time_zone: String,
}

#[derive(Debug, Default, Deserialize)]
struct GraphEmailAddress {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    address: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphRecipient {
    #[serde(default)]
    email_address: GraphEmailAddress,
}

impl From<GraphRecipient> for EmailAddress {
    fn from(r: GraphRecipient) -> Self {
        EmailAddress {
            name: r.email_address.name.unwrap_or_default(),
            address: r.email_address.address.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GraphResponseStatus {
    #[serde(default)]
    response: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphLocation {
    #[serde(default)]
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphEvent {
    id: String,
    #[serde(rename = "iCalUId", default)]
    ical_uid: Option<String>,
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    body_preview: Option<String>,
    #[serde(default)]
    importance: Option<String>,
    start: GraphDateTime,
    end: GraphDateTime,
    #[serde(default)]
    is_all_day: Option<bool>,
    #[serde(default)]
    is_cancelled: Option<bool>,
    #[serde(default)]
    is_organizer: Option<bool>,
    #[serde(default)]
    response_requested: Option<bool>,
    #[serde(default)]
    show_as: Option<String>,
    #[serde(default)]
    response_status: Option<GraphResponseStatus>,
    #[serde(default)]
    organizer: Option<GraphRecipient>,
    #[serde(default)]
    attendees: Vec<GraphRecipient>,
    #[serde(default)]
    location: Option<GraphLocation>,
    #[serde(default)]
    web_link: Option<String>,
}

fn parse_graph_datetime(dt: &GraphDateTime) -> RemoteResult<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(&dt.date_time, "%Y-%m-%dT%H:%M:%S%.f").map_err(
        |e| RemoteError::new(RemoteErrorKind::Decode, format!("bad dateTime '{}': {}", dt.date_time, e)),
    )?;
    resolve_timezone_or_utc(&dt.time_zone)
        .from_local_datetime(&naive)
        .earliest()
        .map(|t| t.with_timezone(&Utc))
        .ok_or_else(|| {
            RemoteError::new(
                RemoteErrorKind::Decode,
                format!("nonexistent local time '{}'", dt.date_time),
            )
        })
}

impl GraphEvent {
    fn into_event(self) -> RemoteResult<Event> {
        let start = parse_graph_datetime(&self.start)?;
        let end = parse_graph_datetime(&self.end)?;
        Ok(Event {
            ical_uid: self.ical_uid.unwrap_or_else(|| self.id.clone()),
            id: self.id,
            subject: self.subject.unwrap_or_default(),
            body_preview: self.body_preview.unwrap_or_default(),
            importance: self.importance.unwrap_or_default(),
            start,
            end,
            is_all_day: self.is_all_day.unwrap_or(false),
            is_cancelled: self.is_cancelled.unwrap_or(false),
            is_organizer: self.is_organizer.unwrap_or(false),
            response_requested: self.response_requested.unwrap_or(false),
            show_as: self
                .show_as
                .as_deref()
                .map(ShowAs::from_wire)
                .unwrap_or_default(),
            response_status: self
                .response_status
                .and_then(|r| r.response)
                .filter(|r| !r.is_empty())
                .map(|r| EventResponse::from_wire(&r)),
            organizer: self.organizer.map(EmailAddress::from),
            attendees: self
                .attendees
                .into_iter()
                .map(|a| Attendee {
                    email_address: a.into(),
                })
                .collect(),
            location: self
                .location
                .and_then(|l| l.display_name)
                .unwrap_or_default(),
            weblink: self.web_link.unwrap_or_default(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct GraphList<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
    #[serde(rename = "@odata.nextLink", default)]
    next_link: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct GraphErrorDetail {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct GraphErrorBody {
    #[serde(default)]
    error: GraphErrorDetail,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphSubscription {
    id: String,
    #[serde(default)]
    resource: Option<String>,
    #[serde(default)]
    change_type: Option<String>,
    #[serde(default)]
    client_state: Option<String>,
    expiration_date_time: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphMe {
    id: String,
    #[serde(default)]
    mail: Option<String>,
    #[serde(default)]
    user_principal_name: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphMailboxSettings {
    #[serde(default)]
    time_zone: Option<String>,
}

#[derive(Debug, Serialize)]
struct BatchRequestItem {
    id: String,
    method: &'static str,
    url: String,
    headers: HashMap<&'static str, &'static str>,
}

#[derive(Debug, Serialize)]
struct BatchRequest {
    requests: Vec<BatchRequestItem>,
}

#[derive(Debug, Deserialize)]
struct BatchResponseItem {
    id: String,
    status: u16,
    #[serde(default)]
    body: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct BatchResponse {
    #[serde(default)]
    responses: Vec<BatchResponseItem>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    expires_in: i64,
}

impl TokenResponse {
    fn into_token(self, previous_refresh: Option<&str>) -> OAuthToken {
        OAuthToken {
            access_token: self.access_token,
            refresh_token: self
                .refresh_token
                .or_else(|| previous_refresh.map(str::to_string)),
            expires_at: Utc::now() + Duration::seconds(self.expires_in),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphResourceData {
    #[serde(default)]
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphNotification {
    subscription_id: String,
    #[serde(default)]
    client_state: Option<String>,
    #[serde(default)]
    change_type: Option<String>,
    #[serde(default)]
    resource_data: Option<GraphResourceData>,
    #[serde(default)]
    lifecycle_event: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphNotificationBatch {
    #[serde(default)]
    value: Vec<GraphNotification>,
}

// ─── Response handling ───────────────────────────────────────────────────────

fn transport_error(e: reqwest::Error) -> RemoteError {
    RemoteError::new(RemoteErrorKind::Transport, e.to_string())
}

fn error_kind_for_status(status: u16) -> RemoteErrorKind {
    match status {
        404 => RemoteErrorKind::NotFound,
        401 | 403 => RemoteErrorKind::Unauthorized,
        429 => RemoteErrorKind::RateLimited,
        _ => RemoteErrorKind::Http,
    }
}

fn error_from_body(status: u16, body: &str) -> RemoteError {
    let detail = serde_json::from_str::<GraphErrorBody>(body)
        .map(|b| b.error)
        .unwrap_or_default();
    let message = if detail.message.is_empty() {
        format!("HTTP {}: {}", status, body)
    } else {
        format!("HTTP {} {}: {}", status, detail.code, detail.message)
    };
    RemoteError::new(error_kind_for_status(status), message)
}

/// Check response status and return an error if not successful.
async fn check_response(response: reqwest::Response) -> RemoteResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    if status.as_u16() == 429 {
        tracing::warn!("Graph rate limit hit (429)");
    }
    Err(error_from_body(status.as_u16(), &body))
}

/// Check response and parse JSON body.
async fn check_response_json<T: DeserializeOwned>(response: reqwest::Response) -> RemoteResult<T> {
    check_response(response)
        .await?
        .json()
        .await
        .map_err(|e| RemoteError::new(RemoteErrorKind::Decode, format!("JSON parse error: {}", e)))
}

fn events_from_list(list: Vec<GraphEvent>) -> RemoteResult<Vec<Event>> {
    list.into_iter().map(GraphEvent::into_event).collect()
}

// ─── Client ──────────────────────────────────────────────────────────────────

/// Graph client bound to one access token.
pub struct GraphClient {
    http: reqwest::Client,
    base_url: String,
    access_token: String,
}

impl GraphClient {
    pub fn new(http: reqwest::Client, base_url: String, access_token: String) -> Self {
        Self {
            http,
            base_url,
            access_token,
        }
    }

    /// Path and query of a calendar view, relative to the API root.
    fn calendar_view_path(remote_user_id: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> String {
        format!(
            "/users/{}/calendar/calendarView?startDateTime={}&endDateTime={}&$select={}&$top=100",
            urlencoding::encode(remote_user_id),
            urlencoding::encode(&format_utc_rfc3339(start)),
            urlencoding::encode(&format_utc_rfc3339(end)),
            EVENT_FIELDS
        )
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> RemoteResult<T> {
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.access_token)
            .header(PREFER_UTC.0, PREFER_UTC.1)
            .send()
            .await
            .map_err(transport_error)?;
        check_response_json(response).await
    }

    /// Fetch every page of an event listing.
    async fn list_events(&self, first_url: String) -> RemoteResult<Vec<Event>> {
        let mut events = Vec::new();
        let mut next = Some(first_url);
        while let Some(url) = next {
            let page: GraphList<GraphEvent> = self.get_json(&url).await?;
            events.extend(events_from_list(page.value)?);
            next = page.next_link;
        }
        Ok(events)
    }

    async fn batch_chunk(&self, chunk: &[ViewCalendarParams]) -> RemoteResult<Vec<CalendarView>> {
        let body = BatchRequest {
            requests: chunk
                .iter()
                .enumerate()
                .map(|(i, p)| BatchRequestItem {
                    id: i.to_string(),
                    method: "GET",
                    url: Self::calendar_view_path(&p.remote_user_id, p.start, p.end),
                    headers: HashMap::from([PREFER_UTC]),
                })
                .collect(),
        };

        let response = self
            .http
            .post(format!("{}/$batch", self.base_url))
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;
        let batch: BatchResponse = check_response_json(response).await?;

        let mut views = Vec::with_capacity(batch.responses.len());
        for item in batch.responses {
            let Some(params) = item.id.parse::<usize>().ok().and_then(|i| chunk.get(i)) else {
                tracing::warn!(id = %item.id, "Unexpected id in batch response");
                continue;
            };

            let view = if (200..300).contains(&item.status) {
                match serde_json::from_value::<GraphList<GraphEvent>>(item.body)
                    .map_err(|e| RemoteError::new(RemoteErrorKind::Decode, e.to_string()))
                    .and_then(|list| events_from_list(list.value))
                {
                    Ok(events) => CalendarView {
                        remote_user_id: params.remote_user_id.clone(),
                        events,
                        error: None,
                    },
                    Err(e) => CalendarView {
                        remote_user_id: params.remote_user_id.clone(),
                        events: Vec::new(),
                        error: Some(ViewError {
                            code: "decode_error".to_string(),
                            message: e.message,
                        }),
                    },
                }
            } else {
                let detail = serde_json::from_value::<GraphErrorBody>(item.body)
                    .map(|b| b.error)
                    .unwrap_or_default();
                CalendarView {
                    remote_user_id: params.remote_user_id.clone(),
                    events: Vec::new(),
                    error: Some(ViewError {
                        code: if detail.code.is_empty() {
                            format!("http_{}", item.status)
                        } else {
                            detail.code
                        },
                        message: detail.message,
                    }),
                }
            };
            views.push(view);
        }
        Ok(views)
    }
}

fn response_path(response: &str) -> RemoteResult<&'static str> {
    match response {
        "accept" | "accepted" => Ok("accept"),
        "tentativelyAccept" | "tentativelyAccepted" => Ok("tentativelyAccept"),
        "decline" | "declined" => Ok("decline"),
        other => Err(RemoteError::new(
            RemoteErrorKind::Http,
            format!("unsupported invitation response '{}'", other),
        )),
    }
}

#[async_trait]
impl CalendarClient for GraphClient {
    async fn get_me(&self) -> RemoteResult<RemoteUser> {
        let me: GraphMe = self
            .get_json(&format!(
                "{}/me?$select=id,mail,userPrincipalName,displayName",
                self.base_url
            ))
            .await?;
        Ok(RemoteUser {
            id: me.id,
            mail: me.mail.or(me.user_principal_name).unwrap_or_default(),
            display_name: me.display_name.unwrap_or_default(),
        })
    }

    async fn get_default_calendar_view(
        &self,
        remote_user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> RemoteResult<Vec<Event>> {
        let url = format!(
            "{}{}",
            self.base_url,
            Self::calendar_view_path(remote_user_id, start, end)
        );
        self.list_events(url).await
    }

    async fn get_events_between_dates(
        &self,
        remote_user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> RemoteResult<Vec<Event>> {
        let filter = format!(
            "start/dateTime ge '{}' and start/dateTime lt '{}'",
            start.format("%Y-%m-%dT%H:%M:%S"),
            end.format("%Y-%m-%dT%H:%M:%S")
        );
        let url = format!(
            "{}/users/{}/events?$filter={}&$select={}&$top=100",
            self.base_url,
            urlencoding::encode(remote_user_id),
            urlencoding::encode(&filter),
            EVENT_FIELDS
        );
        self.list_events(url).await
    }

    async fn batch_view_calendar(
        &self,
        params: &[ViewCalendarParams],
    ) -> RemoteResult<Vec<CalendarView>> {
        let mut views = Vec::with_capacity(params.len());
        for chunk in params.chunks(MAX_BATCH_SIZE) {
            views.extend(self.batch_chunk(chunk).await?);
        }
        Ok(views)
    }

    async fn get_event(&self, remote_user_id: &str, event_id: &str) -> RemoteResult<Event> {
        let event: GraphEvent = self
            .get_json(&format!(
                "{}/users/{}/events/{}?$select={}",
                self.base_url,
                urlencoding::encode(remote_user_id),
                urlencoding::encode(event_id),
                EVENT_FIELDS
            ))
            .await?;
        event.into_event()
    }

    async fn get_notification_data(
        &self,
        remote_user_id: &str,
        notification: &Notification,
    ) -> RemoteResult<Notification> {
        let mut full = notification.clone();
        if let Some(event_id) = &notification.resource_id {
            full.event = Some(self.get_event(remote_user_id, event_id).await?);
        }
        full.is_bare = false;
        Ok(full)
    }

    async fn get_mailbox_settings(&self, remote_user_id: &str) -> RemoteResult<MailboxSettings> {
        let settings: GraphMailboxSettings = self
            .get_json(&format!(
                "{}/users/{}/mailboxSettings",
                self.base_url,
                urlencoding::encode(remote_user_id)
            ))
            .await?;
        Ok(MailboxSettings {
            time_zone: settings.time_zone.unwrap_or_default(),
        })
    }

    async fn respond_to_event(
        &self,
        remote_user_id: &str,
        event_id: &str,
        response: &str,
    ) -> RemoteResult<()> {
        let action = response_path(response)?;
        let response = self
            .http
            .post(format!(
                "{}/users/{}/events/{}/{}",
                self.base_url,
                urlencoding::encode(remote_user_id),
                urlencoding::encode(event_id),
                action
            ))
            .bearer_auth(&self.access_token)
            .json(&json!({ "sendResponse": true }))
            .send()
            .await
            .map_err(transport_error)?;
        check_response(response).await?;
        Ok(())
    }

    async fn create_subscription(
        &self,
        notification_url: &str,
        remote_user_id: &str,
        client_state: &str,
    ) -> RemoteResult<RemoteSubscription> {
        let resource = format!("/users/{}/events", remote_user_id);
        let body = json!({
            "changeType": SUBSCRIPTION_CHANGE_TYPES,
            "notificationUrl": notification_url,
            "lifecycleNotificationUrl": notification_url,
            "resource": resource,
            "expirationDateTime": format_utc_rfc3339(
                Utc::now() + Duration::minutes(SUBSCRIPTION_TTL_MINUTES)
            ),
            "clientState": client_state,
        });
        let response = self
            .http
            .post(format!("{}/subscriptions", self.base_url))
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;
        let sub: GraphSubscription = check_response_json(response).await?;

        Ok(RemoteSubscription {
            id: sub.id,
            resource: sub.resource.unwrap_or(resource),
            change_type: sub
                .change_type
                .unwrap_or_else(|| SUBSCRIPTION_CHANGE_TYPES.to_string()),
            client_state: sub.client_state.unwrap_or_else(|| client_state.to_string()),
            creator_id: remote_user_id.to_string(),
            expiration: sub.expiration_date_time,
        })
    }

    async fn renew_subscription(
        &self,
        _notification_url: &str,
        remote_user_id: &str,
        subscription: &RemoteSubscription,
    ) -> RemoteResult<RemoteSubscription> {
        let body = json!({
            "expirationDateTime": format_utc_rfc3339(
                Utc::now() + Duration::minutes(SUBSCRIPTION_TTL_MINUTES)
            ),
        });
        let response = self
            .http
            .patch(format!(
                "{}/subscriptions/{}",
                self.base_url,
                urlencoding::encode(&subscription.id)
            ))
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;
        let sub: GraphSubscription = check_response_json(response).await?;

        tracing::debug!(
            subscription_id = %sub.id,
            expiration = %sub.expiration_date_time,
            "Renewed Graph subscription"
        );

        // PATCH responses omit the client state
        Ok(RemoteSubscription {
            id: sub.id,
            resource: sub.resource.unwrap_or_else(|| subscription.resource.clone()),
            change_type: sub
                .change_type
                .unwrap_or_else(|| subscription.change_type.clone()),
            client_state: subscription.client_state.clone(),
            creator_id: remote_user_id.to_string(),
            expiration: sub.expiration_date_time,
        })
    }

    async fn delete_subscription(&self, subscription: &RemoteSubscription) -> RemoteResult<()> {
        let response = self
            .http
            .delete(format!(
                "{}/subscriptions/{}",
                self.base_url,
                urlencoding::encode(&subscription.id)
            ))
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(transport_error)?;
        check_response(response).await?;
        Ok(())
    }
}

// ─── Provider ────────────────────────────────────────────────────────────────

/// Graph-backed [`RemoteProvider`].
///
/// Refreshed user tokens are persisted to the store and also cached in
/// memory, so a caller still holding an older copy of the user record
/// keeps getting the fresh token within this process.
pub struct GraphProvider {
    http: reqwest::Client,
    graph_url: String,
    login_url: String,
    client_id: String,
    client_secret: String,
    tenant_id: Option<String>,
    store: Arc<dyn Store>,
    token_cache: DashMap<String, OAuthToken>,
    refresh_locks: DashMap<String, Arc<Mutex<()>>>,
    app_token: Mutex<Option<OAuthToken>>,
}

impl GraphProvider {
    pub fn new(config: &Config, store: Arc<dyn Store>) -> Self {
        Self {
            http: reqwest::Client::new(),
            graph_url: GRAPH_BASE_URL.to_string(),
            login_url: LOGIN_BASE_URL.to_string(),
            client_id: config.remote_client_id.clone(),
            client_secret: config.remote_client_secret.clone(),
            tenant_id: config.remote_tenant_id.clone(),
            store,
            token_cache: DashMap::new(),
            refresh_locks: DashMap::new(),
            app_token: Mutex::new(None),
        }
    }

    /// Point the provider at different API hosts (tests).
    pub fn with_base_urls(mut self, graph_url: impl Into<String>, login_url: impl Into<String>) -> Self {
        self.graph_url = graph_url.into();
        self.login_url = login_url.into();
        self
    }

    fn token_url(&self, tenant: &str) -> String {
        format!("{}/{}/oauth2/v2.0/token", self.login_url, tenant)
    }

    fn client(&self, access_token: String) -> Arc<dyn CalendarClient> {
        Arc::new(GraphClient::new(
            self.http.clone(),
            self.graph_url.clone(),
            access_token,
        ))
    }

    async fn request_token(&self, tenant: &str, form: &[(&str, &str)]) -> RemoteResult<TokenResponse> {
        let response = self
            .http
            .post(self.token_url(tenant))
            .form(form)
            .send()
            .await
            .map_err(|e| {
                RemoteError::new(
                    RemoteErrorKind::Transport,
                    format!("Token request failed: {}", e),
                )
            })?;
        check_response_json(response).await
    }

    async fn refresh_user_token(&self, refresh_token: &str) -> RemoteResult<OAuthToken> {
        let response = self
            .request_token(
                "common",
                &[
                    ("client_id", self.client_id.as_str()),
                    ("client_secret", self.client_secret.as_str()),
                    ("refresh_token", refresh_token),
                    ("grant_type", "refresh_token"),
                    ("scope", USER_SCOPES),
                ],
            )
            .await?;
        Ok(response.into_token(Some(refresh_token)))
    }

    /// Newest token known for `user`, from the record or the cache.
    fn current_token(&self, user: &User) -> Option<OAuthToken> {
        let cached = self
            .token_cache
            .get(&user.chat_user_id)
            .map(|entry| entry.value().clone());
        match (user.oauth_token.clone(), cached) {
            (Some(stored), Some(cached)) if cached.expires_at > stored.expires_at => Some(cached),
            (Some(stored), _) => Some(stored),
            (None, cached) => cached,
        }
    }

    /// A non-expired access token for `user`, refreshing it if needed.
    async fn valid_user_token(&self, user: &User) -> RemoteResult<String> {
        let margin = Duration::seconds(TOKEN_REFRESH_MARGIN_SECS);

        let token = self.current_token(user).ok_or_else(|| {
            RemoteError::new(
                RemoteErrorKind::Unauthorized,
                format!("no token stored for user {}", user.chat_user_id),
            )
        })?;
        if Utc::now() + margin < token.expires_at {
            return Ok(token.access_token);
        }

        let lock = self
            .refresh_locks
            .entry(user.chat_user_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // Another task may have refreshed while we were waiting
        if let Some(cached) = self
            .token_cache
            .get(&user.chat_user_id)
            .map(|entry| entry.value().clone())
        {
            if Utc::now() + margin < cached.expires_at {
                return Ok(cached.access_token);
            }
        }

        let refresh_token = token.refresh_token.as_deref().ok_or_else(|| {
            RemoteError::new(
                RemoteErrorKind::RefreshTokenNotSet,
                format!("user {}", user.chat_user_id),
            )
        })?;
        let fresh = self.refresh_user_token(refresh_token).await?;
        self.token_cache
            .insert(user.chat_user_id.clone(), fresh.clone());

        // Field-level write: this path does not hold the user's lock
        if let Err(e) = self
            .store
            .store_user_oauth_token(&user.chat_user_id, &fresh)
            .await
        {
            tracing::warn!(
                user_id = %user.chat_user_id,
                error = %e,
                "Failed to store refreshed token"
            );
        }

        tracing::info!(
            user_id = %user.chat_user_id,
            expires_at = %fresh.expires_at,
            "Refreshed Graph token"
        );
        Ok(fresh.access_token)
    }

    async fn app_access_token(&self) -> RemoteResult<String> {
        let Some(tenant) = self.tenant_id.as_deref() else {
            return Err(RemoteError::superuser_not_supported());
        };

        let mut cached = self.app_token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Utc::now() + Duration::seconds(TOKEN_REFRESH_MARGIN_SECS) < token.expires_at {
                return Ok(token.access_token.clone());
            }
        }

        let token = self
            .request_token(
                tenant,
                &[
                    ("client_id", self.client_id.as_str()),
                    ("client_secret", self.client_secret.as_str()),
                    ("scope", APP_SCOPE),
                    ("grant_type", "client_credentials"),
                ],
            )
            .await?
            .into_token(None);
        let access_token = token.access_token.clone();
        *cached = Some(token);
        Ok(access_token)
    }
}

#[async_trait]
impl RemoteProvider for GraphProvider {
    fn name(&self) -> &'static str {
        "microsoft"
    }

    async fn make_user_client(&self, user: &User) -> RemoteResult<Arc<dyn CalendarClient>> {
        let token = self.valid_user_token(user).await?;
        Ok(self.client(token))
    }

    async fn make_superuser_client(&self) -> RemoteResult<Arc<dyn CalendarClient>> {
        let token = self.app_access_token().await?;
        Ok(self.client(token))
    }

    fn authorize_url(&self, redirect_uri: &str, state: &str) -> String {
        format!(
            "{}/common/oauth2/v2.0/authorize?client_id={}&response_type=code&redirect_uri={}&response_mode=query&scope={}&state={}",
            self.login_url,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(USER_SCOPES),
            urlencoding::encode(state)
        )
    }

    async fn exchange_code(&self, redirect_uri: &str, code: &str) -> RemoteResult<OAuthToken> {
        let response = self
            .request_token(
                "common",
                &[
                    ("client_id", self.client_id.as_str()),
                    ("client_secret", self.client_secret.as_str()),
                    ("code", code),
                    ("redirect_uri", redirect_uri),
                    ("grant_type", "authorization_code"),
                    ("scope", USER_SCOPES),
                ],
            )
            .await?;
        Ok(response.into_token(None))
    }

    fn parse_notifications(&self, body: &[u8]) -> RemoteResult<Vec<Notification>> {
        let batch: GraphNotificationBatch = serde_json::from_slice(body).map_err(|e| {
            RemoteError::new(
                RemoteErrorKind::Decode,
                format!("invalid notification payload: {}", e),
            )
        })?;

        let mut notifications = Vec::with_capacity(batch.value.len());
        for n in batch.value {
            let client_state = n.client_state.unwrap_or_default();
            match n.lifecycle_event.as_deref() {
                Some("reauthorizationRequired") | Some("subscriptionRemoved") => {
                    notifications.push(Notification {
                        subscription_id: n.subscription_id,
                        client_state,
                        change_type: String::new(),
                        resource_id: None,
                        recommend_renew: true,
                        is_bare: false,
                        event: None,
                    });
                    continue;
                }
                Some(other) => {
                    tracing::debug!(
                        subscription_id = %n.subscription_id,
                        lifecycle_event = %other,
                        "Ignoring lifecycle notification"
                    );
                    continue;
                }
                None => {}
            }

            let change_type = n.change_type.unwrap_or_default();
            if change_type == "deleted" {
                // The event can no longer be fetched
                tracing::debug!(subscription_id = %n.subscription_id, "Ignoring deleted event");
                continue;
            }
            notifications.push(Notification {
                subscription_id: n.subscription_id,
                client_state,
                change_type,
                resource_id: n.resource_data.and_then(|d| d.id),
                recommend_renew: false,
                is_bare: true,
                event: None,
            });
        }
        Ok(notifications)
    }
}
