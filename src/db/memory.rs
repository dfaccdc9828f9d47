// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! In-memory store for local runs and tests.

use crate::db::{user_event_doc_id, Store};
use crate::error::{AppError, Result};
use crate::models::user::OAuthToken;
use crate::models::{EventMetadata, StoredEvent, StoredSubscription, User, UserIndexEntry};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct MemoryStore {
    index: Arc<DashMap<String, UserIndexEntry>>,
    users: Arc<DashMap<String, User>>,
    events: Arc<DashMap<String, StoredEvent>>,
    metadata: Arc<DashMap<String, EventMetadata>>,
    subscriptions: Arc<DashMap<String, StoredSubscription>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mutate one stored user in place.
    fn update_user(&self, chat_user_id: &str, f: impl FnOnce(&mut User)) -> Result<()> {
        let mut user = self
            .users
            .get_mut(chat_user_id)
            .ok_or_else(|| AppError::NotFound(format!("user {}", chat_user_id)))?;
        f(user.value_mut());
        Ok(())
    }

    /// Insert a user and its index entry in one step.
    pub fn seed_user(&self, user: User) {
        self.index
            .insert(user.chat_user_id.clone(), user.index_entry());
        self.users.insert(user.chat_user_id.clone(), user);
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn load_user_index(&self) -> Result<Vec<UserIndexEntry>> {
        let mut entries: Vec<UserIndexEntry> =
            self.index.iter().map(|e| e.value().clone()).collect();
        entries.sort_by(|a, b| a.chat_user_id.cmp(&b.chat_user_id));
        Ok(entries)
    }

    async fn store_user_in_index(&self, entry: &UserIndexEntry) -> Result<()> {
        self.index.insert(entry.chat_user_id.clone(), entry.clone());
        Ok(())
    }

    async fn delete_user_from_index(&self, chat_user_id: &str) -> Result<()> {
        self.index.remove(chat_user_id);
        Ok(())
    }

    async fn load_user(&self, chat_user_id: &str) -> Result<Option<User>> {
        Ok(self.users.get(chat_user_id).map(|u| u.value().clone()))
    }

    async fn store_user(&self, user: &User) -> Result<()> {
        self.users.insert(user.chat_user_id.clone(), user.clone());
        Ok(())
    }

    async fn delete_user(&self, chat_user_id: &str) -> Result<()> {
        self.users.remove(chat_user_id);
        Ok(())
    }

    async fn store_user_oauth_token(&self, chat_user_id: &str, token: &OAuthToken) -> Result<()> {
        self.update_user(chat_user_id, |u| u.oauth_token = Some(token.clone()))
    }

    async fn store_user_active_events(&self, chat_user_id: &str, events: Vec<String>) -> Result<()> {
        self.update_user(chat_user_id, |u| u.active_events = events)
    }

    async fn store_user_custom_status_updates(&self, chat_user_id: &str, value: bool) -> Result<()> {
        self.update_user(chat_user_id, |u| u.is_custom_status_set = value)
    }

    async fn load_user_event(
        &self,
        chat_user_id: &str,
        ical_uid: &str,
    ) -> Result<Option<StoredEvent>> {
        let key = user_event_doc_id(chat_user_id, ical_uid);
        Ok(self.events.get(&key).map(|e| e.value().clone()))
    }

    async fn store_user_event(&self, chat_user_id: &str, event: &StoredEvent) -> Result<()> {
        let key = user_event_doc_id(chat_user_id, &event.remote.ical_uid);
        self.events.insert(key, event.clone());
        Ok(())
    }

    async fn load_event_metadata(&self, ical_uid: &str) -> Result<Option<EventMetadata>> {
        Ok(self.metadata.get(ical_uid).map(|m| m.value().clone()))
    }

    async fn store_event_metadata(&self, ical_uid: &str, metadata: &EventMetadata) -> Result<()> {
        self.metadata.insert(ical_uid.to_string(), metadata.clone());
        Ok(())
    }

    async fn load_subscription(&self, subscription_id: &str) -> Result<Option<StoredSubscription>> {
        Ok(self
            .subscriptions
            .get(subscription_id)
            .map(|s| s.value().clone()))
    }

    async fn put_subscription(&self, subscription: &StoredSubscription) -> Result<()> {
        self.subscriptions
            .insert(subscription.remote.id.clone(), subscription.clone());
        Ok(())
    }

    async fn delete_subscription(&self, subscription_id: &str) -> Result<()> {
        self.subscriptions.remove(subscription_id);
        Ok(())
    }
}
