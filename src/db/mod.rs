// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Persistence layer: the `Store` trait plus Firestore and in-memory backends.

pub mod firestore;
pub mod memory;

pub use firestore::FirestoreDb;
pub use memory::MemoryStore;

use crate::error::Result;
use crate::models::user::OAuthToken;
use crate::models::{EventMetadata, StoredEvent, StoredSubscription, User, UserIndexEntry};
use async_trait::async_trait;

/// Collection names as constants.
pub mod collections {
    /// Connected users (keyed by chat user ID)
    pub const USERS: &str = "users";
    /// One small entry per connected user, scanned by batch jobs
    pub const USER_INDEX: &str = "user_index";
    /// Last-seen event snapshots (keyed by `{user}_{ical_uid}`)
    pub const USER_EVENTS: &str = "user_events";
    /// Channels linked to an event (keyed by ical_uid)
    pub const EVENT_METADATA: &str = "event_metadata";
    pub const SUBSCRIPTIONS: &str = "subscriptions";
}

/// Document ID for a per-user event snapshot.
pub fn user_event_doc_id(chat_user_id: &str, ical_uid: &str) -> String {
    format!("{}_{}", chat_user_id, urlencoding::encode(ical_uid))
}

/// Storage operations used by the engine.
///
/// Loads return `Ok(None)` when the record does not exist; errors are
/// reserved for backend failures.
#[async_trait]
pub trait Store: Send + Sync {
    // ─── User index ──────────────────────────────────────────────

    async fn load_user_index(&self) -> Result<Vec<UserIndexEntry>>;
    async fn store_user_in_index(&self, entry: &UserIndexEntry) -> Result<()>;
    async fn delete_user_from_index(&self, chat_user_id: &str) -> Result<()>;

    // ─── Users ───────────────────────────────────────────────────

    async fn load_user(&self, chat_user_id: &str) -> Result<Option<User>>;
    async fn store_user(&self, user: &User) -> Result<()>;
    async fn delete_user(&self, chat_user_id: &str) -> Result<()>;

    // ─── Event snapshots and metadata ────────────────────────────

    async fn load_user_event(&self, chat_user_id: &str, ical_uid: &str)
        -> Result<Option<StoredEvent>>;
    async fn store_user_event(&self, chat_user_id: &str, event: &StoredEvent) -> Result<()>;

    async fn load_event_metadata(&self, ical_uid: &str) -> Result<Option<EventMetadata>>;
    async fn store_event_metadata(&self, ical_uid: &str, metadata: &EventMetadata) -> Result<()>;

    // ─── Subscriptions ───────────────────────────────────────────

    async fn load_subscription(&self, subscription_id: &str) -> Result<Option<StoredSubscription>>;
    async fn put_subscription(&self, subscription: &StoredSubscription) -> Result<()>;
    async fn delete_subscription(&self, subscription_id: &str) -> Result<()>;

    // ─── Composite operations ────────────────────────────────────

    /// Find the chat user linked to a remote calendar account.
    async fn load_chat_user_id_by_remote(&self, remote_id: &str) -> Result<Option<String>> {
        Ok(self
            .load_user_index()
            .await?
            .into_iter()
            .find(|entry| entry.remote_id == remote_id)
            .map(|entry| entry.chat_user_id))
    }

    // Single-field user writes. Backends override these to touch only the
    // named field, so writers that do not hold the user's lock (token
    // refresh) cannot revert fields written under it.

    /// Replace the user's OAuth token after a refresh.
    async fn store_user_oauth_token(&self, chat_user_id: &str, token: &OAuthToken) -> Result<()> {
        let Some(mut user) = self.load_user(chat_user_id).await? else {
            return Err(crate::error::AppError::NotFound(format!(
                "user {}",
                chat_user_id
            )));
        };
        user.oauth_token = Some(token.clone());
        self.store_user(&user).await
    }

    /// Persist the user's current busy-event fingerprints.
    async fn store_user_active_events(&self, chat_user_id: &str, events: Vec<String>) -> Result<()> {
        let Some(mut user) = self.load_user(chat_user_id).await? else {
            return Err(crate::error::AppError::NotFound(format!(
                "user {}",
                chat_user_id
            )));
        };
        user.active_events = events;
        self.store_user(&user).await
    }

    /// Record whether the user's current custom status was set by us.
    async fn store_user_custom_status_updates(&self, chat_user_id: &str, value: bool) -> Result<()> {
        let Some(mut user) = self.load_user(chat_user_id).await? else {
            return Err(crate::error::AppError::NotFound(format!(
                "user {}",
                chat_user_id
            )));
        };
        user.is_custom_status_set = value;
        self.store_user(&user).await
    }

    /// Store a subscription and point the user's settings at it.
    async fn store_user_subscription(
        &self,
        user: &mut User,
        subscription: &StoredSubscription,
    ) -> Result<()> {
        self.put_subscription(subscription).await?;
        user.settings.event_subscription_id = Some(subscription.remote.id.clone());
        self.store_user(user).await
    }

    /// Delete a subscription and clear it from the user's settings.
    async fn delete_user_subscription(&self, user: &mut User, subscription_id: &str) -> Result<()> {
        self.delete_subscription(subscription_id).await?;
        if user.settings.event_subscription_id.as_deref() == Some(subscription_id) {
            user.settings.event_subscription_id = None;
        }
        self.store_user(user).await
    }

    /// Remove a channel from an event's linked channels.
    async fn delete_linked_channel_from_event(&self, ical_uid: &str, channel_id: &str) -> Result<()> {
        let Some(mut metadata) = self.load_event_metadata(ical_uid).await? else {
            return Ok(());
        };
        metadata.linked_channel_ids.remove(channel_id);
        self.store_event_metadata(ical_uid, &metadata).await
    }
}
