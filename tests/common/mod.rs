// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

#![allow(dead_code)]

use async_trait::async_trait;
use calendar_presence::config::Config;
use calendar_presence::db::{FirestoreDb, MemoryStore, Store};
use calendar_presence::error::{AppError, Result as AppResult};
use calendar_presence::models::event::{Attendee, EmailAddress, ShowAs};
use calendar_presence::models::user::{OAuthToken, RemoteUser, StatusOption};
use calendar_presence::models::{
    Attachment, CalendarView, CustomStatus, Event, EventMetadata, Notification, Post,
    PresenceStatus, RemoteSubscription, StoredEvent, StoredSubscription, User, UserIndexEntry,
    UserStatus,
};
use calendar_presence::routes::create_router;
use calendar_presence::services::chat::{ChatError, ChatResult, PresenceApi, Poster};
use calendar_presence::services::remote::{
    CalendarClient, MailboxSettings, RemoteError, RemoteErrorKind, RemoteProvider, RemoteResult,
    ViewCalendarParams,
};
use calendar_presence::services::{Engine, Env, NotificationProcessor};
use calendar_presence::AppState;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Check if emulator is available via environment variable.
pub fn emulator_available() -> bool {
    std::env::var("FIRESTORE_EMULATOR_HOST").is_ok()
}

/// Skip test with message if emulator not available.
#[macro_export]
macro_rules! require_emulator {
    () => {
        if !crate::common::emulator_available() {
            eprintln!("⚠️  Skipping: FIRESTORE_EMULATOR_HOST not set");
            return;
        }
    };
}

/// Create a test database connection.
pub async fn test_db() -> FirestoreDb {
    FirestoreDb::new("test-project")
        .await
        .expect("Failed to connect to Firestore emulator")
}

// ─── Fixtures ────────────────────────────────────────────────────

/// Monday 2026-03-02 13:00 UTC (8:00AM in New York).
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 13, 0, 0).unwrap()
}

/// Busy event with one attendee, offsets in minutes from `base_time`.
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
        response_requested: true,
        show_as: ShowAs::Busy,
        response_status: None,
        organizer: Some(EmailAddress {
            name: "Organizer".into(),
            address: "organizer@example.com".into(),
        }),
        attendees: vec![Attendee {
            email_address: EmailAddress {
                name: "Attendee".into(),
                address: "attendee@example.com".into(),
            },
        }],
        location: "Room 1".to_string(),
        weblink: format!("https://calendar.example.com/{}", uid),
    }
}

/// Connected user that wants DND during meetings, without confirmation.
pub fn connected_user(chat_user_id: &str, remote_id: &str) -> User {
    let mut user = User::new(
        chat_user_id,
        RemoteUser {
            id: remote_id.to_string(),
            mail: format!("{}@example.com", remote_id),
            display_name: remote_id.to_string(),
        },
    );
    user.oauth_token = Some(OAuthToken {
        access_token: format!("token-{}", remote_id),
        refresh_token: Some("refresh".to_string()),
        expires_at: Utc::now() + Duration::hours(1),
    });
    user.settings.update_status_from = StatusOption::Dnd;
    user
}

// ─── Fake calendar provider ──────────────────────────────────────

/// In-memory calendar shared by every client the fake provider hands out.
#[derive(Default)]
pub struct FakeCalendar {
    /// Remote user ID -> events on their calendar
    pub events: Mutex<HashMap<String, Vec<Event>>>,
    /// Remote user IDs whose calendar fetch fails
    pub failing_users: Mutex<HashSet<String>>,
    /// Identity returned by `get_me`
    pub me: Mutex<RemoteUser>,
    pub time_zone: Mutex<String>,
    /// Renewing reports the subscription as gone
    pub renew_not_found: Mutex<bool>,
    pub created_subscriptions: Mutex<Vec<RemoteSubscription>>,
    pub renewed_subscriptions: Mutex<Vec<String>>,
    pub deleted_subscriptions: Mutex<Vec<String>>,
    /// (event ID, response) pairs sent by the user
    pub responses: Mutex<Vec<(String, String)>>,
    pub batch_calls: AtomicUsize,
    next_subscription: AtomicUsize,
}

impl FakeCalendar {
    pub fn new() -> Self {
        let calendar = Self::default();
        *calendar.time_zone.lock().unwrap() = "UTC".to_string();
        calendar
    }

    pub fn set_events(&self, remote_user_id: &str, events: Vec<Event>) {
        self.events
            .lock()
            .unwrap()
            .insert(remote_user_id.to_string(), events);
    }

    fn events_for(&self, remote_user_id: &str) -> RemoteResult<Vec<Event>> {
        if self.failing_users.lock().unwrap().contains(remote_user_id) {
            return Err(RemoteError::new(
                RemoteErrorKind::Http,
                format!("calendar unavailable for {}", remote_user_id),
            ));
        }
        Ok(self
            .events
            .lock()
            .unwrap()
            .get(remote_user_id)
            .cloned()
            .unwrap_or_default())
    }

    fn find_event(&self, event_id: &str) -> Option<Event> {
        self.events
            .lock()
            .unwrap()
            .values()
            .flatten()
            .find(|e| e.id == event_id)
            .cloned()
    }
}

#[async_trait]
impl CalendarClient for FakeCalendar {
    async fn get_me(&self) -> RemoteResult<RemoteUser> {
        Ok(self.me.lock().unwrap().clone())
    }

    async fn get_default_calendar_view(
        &self,
        remote_user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> RemoteResult<Vec<Event>> {
        Ok(self
            .events_for(remote_user_id)?
            .into_iter()
            .filter(|e| e.start < end && e.end > start)
            .collect())
    }

    async fn get_events_between_dates(
        &self,
        remote_user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> RemoteResult<Vec<Event>> {
        self.get_default_calendar_view(remote_user_id, start, end)
            .await
    }

    async fn batch_view_calendar(
        &self,
        params: &[ViewCalendarParams],
    ) -> RemoteResult<Vec<CalendarView>> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        let mut views = Vec::new();
        for p in params {
            let view = match self
                .get_default_calendar_view(&p.remote_user_id, p.start, p.end)
                .await
            {
                Ok(events) => CalendarView {
                    remote_user_id: p.remote_user_id.clone(),
                    events,
                    error: None,
                },
                Err(e) => CalendarView {
                    remote_user_id: p.remote_user_id.clone(),
                    events: Vec::new(),
                    error: Some(calendar_presence::models::event::ViewError {
                        code: "ErrorItemNotFound".to_string(),
                        message: e.message,
                    }),
                },
            };
            views.push(view);
        }
        Ok(views)
    }

    async fn get_event(&self, _remote_user_id: &str, event_id: &str) -> RemoteResult<Event> {
        self.find_event(event_id)
            .ok_or_else(|| RemoteError::new(RemoteErrorKind::NotFound, event_id))
    }

    async fn get_notification_data(
        &self,
        remote_user_id: &str,
        notification: &Notification,
    ) -> RemoteResult<Notification> {
        let mut full = notification.clone();
        if let Some(id) = &notification.resource_id {
            full.event = Some(self.get_event(remote_user_id, id).await?);
        }
        full.is_bare = false;
        Ok(full)
    }

    async fn get_mailbox_settings(&self, _remote_user_id: &str) -> RemoteResult<MailboxSettings> {
        Ok(MailboxSettings {
            time_zone: self.time_zone.lock().unwrap().clone(),
        })
    }

    async fn respond_to_event(
        &self,
        _remote_user_id: &str,
        event_id: &str,
        response: &str,
    ) -> RemoteResult<()> {
        self.responses
            .lock()
            .unwrap()
            .push((event_id.to_string(), response.to_string()));
        Ok(())
    }

    async fn create_subscription(
        &self,
        _notification_url: &str,
        remote_user_id: &str,
        client_state: &str,
    ) -> RemoteResult<RemoteSubscription> {
        let n = self.next_subscription.fetch_add(1, Ordering::SeqCst) + 1;
        let sub = RemoteSubscription {
            id: format!("sub-{}", n),
            resource: format!("/users/{}/events", remote_user_id),
            change_type: "created,updated,deleted".to_string(),
            client_state: client_state.to_string(),
            creator_id: remote_user_id.to_string(),
            expiration: Utc::now() + Duration::days(3),
        };
        self.created_subscriptions.lock().unwrap().push(sub.clone());
        Ok(sub)
    }

    async fn renew_subscription(
        &self,
        _notification_url: &str,
        _remote_user_id: &str,
        subscription: &RemoteSubscription,
    ) -> RemoteResult<RemoteSubscription> {
        if *self.renew_not_found.lock().unwrap() {
            return Err(RemoteError::new(
                RemoteErrorKind::NotFound,
                format!("subscription {}", subscription.id),
            ));
        }
        self.renewed_subscriptions
            .lock()
            .unwrap()
            .push(subscription.id.clone());
        Ok(RemoteSubscription {
            expiration: subscription.expiration + Duration::days(3),
            ..subscription.clone()
        })
    }

    async fn delete_subscription(&self, subscription: &RemoteSubscription) -> RemoteResult<()> {
        self.deleted_subscriptions
            .lock()
            .unwrap()
            .push(subscription.id.clone());
        Ok(())
    }
}

/// Notification as posted to the fake provider's webhook.
#[derive(Deserialize)]
struct FakeNotification {
    subscription_id: String,
    client_state: String,
    #[serde(default)]
    resource_id: Option<String>,
    #[serde(default)]
    lifecycle: bool,
}

/// Provider whose clients all share one [`FakeCalendar`].
pub struct FakeRemote {
    pub calendar: Arc<FakeCalendar>,
    pub superuser: bool,
}

#[async_trait]
impl RemoteProvider for FakeRemote {
    fn name(&self) -> &'static str {
        "microsoft"
    }

    async fn make_user_client(&self, user: &User) -> RemoteResult<Arc<dyn CalendarClient>> {
        if user.oauth_token.is_none() {
            return Err(RemoteError::new(
                RemoteErrorKind::Unauthorized,
                "user has no token",
            ));
        }
        Ok(self.calendar.clone())
    }

    async fn make_superuser_client(&self) -> RemoteResult<Arc<dyn CalendarClient>> {
        if !self.superuser {
            return Err(RemoteError::superuser_not_supported());
        }
        Ok(self.calendar.clone())
    }

    fn authorize_url(&self, redirect_uri: &str, state: &str) -> String {
        format!(
            "https://login.example.com/authorize?redirect_uri={}&state={}",
            urlencoding::encode(redirect_uri),
            urlencoding::encode(state)
        )
    }

    async fn exchange_code(&self, _redirect_uri: &str, code: &str) -> RemoteResult<OAuthToken> {
        if code == "bad-code" {
            return Err(RemoteError::new(
                RemoteErrorKind::Unauthorized,
                "invalid_grant",
            ));
        }
        Ok(OAuthToken {
            access_token: format!("access-{}", code),
            refresh_token: Some("refresh".to_string()),
            expires_at: Utc::now() + Duration::hours(1),
        })
    }

    fn parse_notifications(&self, body: &[u8]) -> RemoteResult<Vec<Notification>> {
        let raw: Vec<FakeNotification> = serde_json::from_slice(body)
            .map_err(|e| RemoteError::new(RemoteErrorKind::Decode, e.to_string()))?;
        Ok(raw
            .into_iter()
            .map(|n| Notification {
                subscription_id: n.subscription_id,
                client_state: n.client_state,
                change_type: if n.lifecycle { "" } else { "updated" }.to_string(),
                is_bare: n.resource_id.is_some(),
                recommend_renew: n.lifecycle,
                resource_id: n.resource_id,
                event: None,
            })
            .collect())
    }
}

// ─── Fake chat server ────────────────────────────────────────────

/// Chat server that records every call.
#[derive(Default)]
pub struct FakeChat {
    pub statuses: Mutex<HashMap<String, UserStatus>>,
    pub custom_statuses: Mutex<HashMap<String, CustomStatus>>,
    pub status_updates: Mutex<Vec<(String, PresenceStatus)>>,
    pub dms: Mutex<Vec<(String, String)>>,
    pub attachments: Mutex<Vec<(String, Attachment)>>,
    pub posts: Mutex<Vec<Post>>,
    /// Make `update_status` fail without recording anything
    pub fail_status_updates: AtomicBool,
    /// Make `dm_with_attachment` fail without recording anything
    pub fail_attachment_dms: AtomicBool,
}

impl FakeChat {
    pub fn set_status(&self, user_id: &str, status: PresenceStatus, manual: bool) {
        self.statuses.lock().unwrap().insert(
            user_id.to_string(),
            UserStatus {
                user_id: user_id.to_string(),
                status,
                manual,
            },
        );
    }

    pub fn status_of(&self, user_id: &str) -> Option<PresenceStatus> {
        self.statuses.lock().unwrap().get(user_id).map(|s| s.status)
    }

    pub fn update_count(&self) -> usize {
        self.status_updates.lock().unwrap().len()
    }

    pub fn attachments_for(&self, user_id: &str) -> Vec<Attachment> {
        self.attachments
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == user_id)
            .map(|(_, a)| a.clone())
            .collect()
    }

    pub fn dms_for(&self, user_id: &str) -> Vec<String> {
        self.dms
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == user_id)
            .map(|(_, m)| m.clone())
            .collect()
    }
}

#[async_trait]
impl PresenceApi for FakeChat {
    async fn get_statuses(&self, user_ids: &[String]) -> ChatResult<Vec<UserStatus>> {
        let statuses = self.statuses.lock().unwrap();
        Ok(user_ids
            .iter()
            .filter_map(|id| statuses.get(id).cloned())
            .collect())
    }

    async fn update_status(&self, user_id: &str, status: PresenceStatus) -> ChatResult<UserStatus> {
        if self.fail_status_updates.load(Ordering::SeqCst) {
            return Err(ChatError::Request("connection reset".to_string()));
        }
        self.status_updates
            .lock()
            .unwrap()
            .push((user_id.to_string(), status));
        self.set_status(user_id, status, false);
        Ok(UserStatus {
            user_id: user_id.to_string(),
            status,
            manual: false,
        })
    }

    async fn get_custom_status(&self, user_id: &str) -> ChatResult<Option<CustomStatus>> {
        Ok(self.custom_statuses.lock().unwrap().get(user_id).cloned())
    }

    async fn update_custom_status(&self, user_id: &str, status: &CustomStatus) -> ChatResult<()> {
        self.custom_statuses
            .lock()
            .unwrap()
            .insert(user_id.to_string(), status.clone());
        Ok(())
    }

    async fn remove_custom_status(&self, user_id: &str) -> ChatResult<()> {
        self.custom_statuses.lock().unwrap().remove(user_id);
        Ok(())
    }
}

#[async_trait]
impl Poster for FakeChat {
    async fn dm(&self, user_id: &str, message: &str) -> ChatResult<String> {
        let mut dms = self.dms.lock().unwrap();
        dms.push((user_id.to_string(), message.to_string()));
        Ok(format!("post-{}", dms.len()))
    }

    async fn dm_with_attachment(&self, user_id: &str, attachment: Attachment) -> ChatResult<String> {
        if self.fail_attachment_dms.load(Ordering::SeqCst) {
            return Err(ChatError::Http {
                status: 503,
                body: "unavailable".to_string(),
            });
        }
        let mut attachments = self.attachments.lock().unwrap();
        attachments.push((user_id.to_string(), attachment));
        Ok(format!("attachment-post-{}", attachments.len()))
    }

    async fn create_post(&self, post: Post) -> ChatResult<String> {
        let mut posts = self.posts.lock().unwrap();
        posts.push(post);
        Ok(format!("channel-post-{}", posts.len()))
    }
}

// ─── Failing store ───────────────────────────────────────────────

/// Store that delegates to a `MemoryStore` but starts failing one user's
/// loads after a given number of successful ones.
pub struct FlakyStore {
    pub inner: Arc<MemoryStore>,
    failing_user: String,
    loads_left: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: Arc<MemoryStore>, failing_user: &str, successful_loads: usize) -> Self {
        Self {
            inner,
            failing_user: failing_user.to_string(),
            loads_left: AtomicUsize::new(successful_loads),
        }
    }
}

#[async_trait]
impl Store for FlakyStore {
    async fn load_user_index(&self) -> AppResult<Vec<UserIndexEntry>> {
        self.inner.load_user_index().await
    }

    async fn store_user_in_index(&self, entry: &UserIndexEntry) -> AppResult<()> {
        self.inner.store_user_in_index(entry).await
    }

    async fn delete_user_from_index(&self, chat_user_id: &str) -> AppResult<()> {
        self.inner.delete_user_from_index(chat_user_id).await
    }

    async fn load_user(&self, chat_user_id: &str) -> AppResult<Option<User>> {
        if chat_user_id == self.failing_user {
            let left = self
                .loads_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
            if left.is_err() {
                return Err(AppError::Database("deadline exceeded".to_string()));
            }
        }
        self.inner.load_user(chat_user_id).await
    }

    async fn store_user(&self, user: &User) -> AppResult<()> {
        self.inner.store_user(user).await
    }

    async fn delete_user(&self, chat_user_id: &str) -> AppResult<()> {
        self.inner.delete_user(chat_user_id).await
    }

    async fn store_user_oauth_token(&self, chat_user_id: &str, token: &OAuthToken) -> AppResult<()> {
        self.inner.store_user_oauth_token(chat_user_id, token).await
    }

    async fn store_user_active_events(&self, chat_user_id: &str, events: Vec<String>) -> AppResult<()> {
        self.inner.store_user_active_events(chat_user_id, events).await
    }

    async fn store_user_custom_status_updates(&self, chat_user_id: &str, value: bool) -> AppResult<()> {
        self.inner
            .store_user_custom_status_updates(chat_user_id, value)
            .await
    }

    async fn load_user_event(
        &self,
        chat_user_id: &str,
        ical_uid: &str,
    ) -> AppResult<Option<StoredEvent>> {
        self.inner.load_user_event(chat_user_id, ical_uid).await
    }

    async fn store_user_event(&self, chat_user_id: &str, event: &StoredEvent) -> AppResult<()> {
        self.inner.store_user_event(chat_user_id, event).await
    }

    async fn load_event_metadata(&self, ical_uid: &str) -> AppResult<Option<EventMetadata>> {
        self.inner.load_event_metadata(ical_uid).await
    }

    async fn store_event_metadata(&self, ical_uid: &str, metadata: &EventMetadata) -> AppResult<()> {
        self.inner.store_event_metadata(ical_uid, metadata).await
    }

    async fn load_subscription(&self, subscription_id: &str) -> AppResult<Option<StoredSubscription>> {
        self.inner.load_subscription(subscription_id).await
    }

    async fn put_subscription(&self, subscription: &StoredSubscription) -> AppResult<()> {
        self.inner.put_subscription(subscription).await
    }

    async fn delete_subscription(&self, subscription_id: &str) -> AppResult<()> {
        self.inner.delete_subscription(subscription_id).await
    }
}

// ─── Wiring ──────────────────────────────────────────────────────

/// Engine collaborators backed by fakes, with handles for assertions.
pub struct TestEnv {
    pub store: Arc<MemoryStore>,
    pub calendar: Arc<FakeCalendar>,
    pub chat: Arc<FakeChat>,
    pub env: Arc<Env>,
}

impl TestEnv {
    /// Per-user calendar access only.
    pub fn new() -> Self {
        Self::with_config(Config::test_default())
    }

    /// Application credentials configured, so views are fetched in batches.
    pub fn with_superuser() -> Self {
        let mut config = Config::test_default();
        config.remote_tenant_id = Some("tenant".to_string());
        Self::with_config(config)
    }

    /// App-only access follows `remote_tenant_id`, as in production.
    pub fn with_config(config: Config) -> Self {
        let superuser = config.remote_tenant_id.is_some();
        let store = Arc::new(MemoryStore::new());
        let calendar = Arc::new(FakeCalendar::new());
        let chat = Arc::new(FakeChat::default());
        let remote = Arc::new(FakeRemote {
            calendar: calendar.clone(),
            superuser,
        });
        let env = Arc::new(Env::new(
            config,
            store.clone(),
            remote,
            chat.clone(),
            chat.clone(),
        ));
        Self {
            store,
            calendar,
            chat,
            env,
        }
    }

    pub fn engine(&self) -> Engine {
        Engine::new(self.env.clone())
    }

    pub fn config(&self) -> &Config {
        &self.env.config
    }

    /// Engine over `store` in place of the memory store, sharing locks and fakes.
    pub fn engine_with_store(&self, store: Arc<dyn Store>) -> Engine {
        Engine::new(Arc::new(self.env.reconfigure(
            self.env.config.clone(),
            store,
            self.env.remote.clone(),
            self.chat.clone(),
            self.chat.clone(),
        )))
    }

    /// Same collaborators rebuilt through `Env::reconfigure`.
    pub fn reconfigured(&self) -> Arc<Env> {
        Arc::new(self.env.reconfigure(
            self.env.config.clone(),
            self.store.clone(),
            self.env.remote.clone(),
            self.chat.clone(),
            self.chat.clone(),
        ))
    }

    /// Router and state over this environment. Needs a Tokio runtime.
    pub fn app(&self) -> (axum::Router, Arc<AppState>) {
        let state = Arc::new(AppState {
            config: self.env.config.clone(),
            engine: self.engine(),
            notifications: NotificationProcessor::start(self.env.clone()),
        });
        (create_router(state.clone()), state)
    }
}

/// Create a test app over fresh fakes.
/// Returns the router and the shared state.
pub fn create_test_app() -> (axum::Router, Arc<AppState>) {
    TestEnv::new().app()
}
