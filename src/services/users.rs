// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Connected-user lifecycle: linking, timezone lookup and disconnect.

use crate::error::{AppError, Result};
use crate::models::user::Settings;
use crate::models::User;
use crate::services::engine::Engine;
use crate::services::remote::{CalendarClient, RemoteResult};
use std::sync::Arc;

impl Engine {
    /// Client for operations on `user`'s calendar: the application client
    /// when available, the user's own otherwise.
    pub async fn client_for(&self, user: &User) -> RemoteResult<Arc<dyn CalendarClient>> {
        match self.env.remote.make_superuser_client().await {
            Ok(client) => Ok(client),
            Err(e) if e.is_superuser_not_supported() => {
                self.env.remote.make_user_client(user).await
            }
            Err(e) => Err(e),
        }
    }

    pub async fn load_connected_user(&self, chat_user_id: &str) -> Result<User> {
        self.env
            .store
            .load_user(chat_user_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "no {} account is connected for user {}",
                    self.env.config.provider.display_name(),
                    chat_user_id
                ))
            })
    }

    /// Provider timezone name of the user's mailbox.
    pub async fn get_timezone(&self, user: &User) -> Result<String> {
        let client = self.client_for(user).await?;
        let settings = client.get_mailbox_settings(&user.remote.id).await?;
        Ok(settings.time_zone)
    }

    pub async fn get_timezone_by_id(&self, chat_user_id: &str) -> Result<String> {
        let user = self.load_connected_user(chat_user_id).await?;
        self.get_timezone(&user).await
    }

    pub async fn get_user_settings(&self, chat_user_id: &str) -> Result<Settings> {
        Ok(self.load_connected_user(chat_user_id).await?.settings)
    }

    pub fn is_authorized_admin(&self, chat_user_id: &str) -> bool {
        self.env.config.is_admin(chat_user_id)
    }

    /// Persist a newly linked user and add it to the index.
    pub async fn connect_user(&self, user: &User) -> Result<()> {
        let _guard = self.env.user_locks.lock(&user.chat_user_id).await;
        self.env.store.store_user(user).await?;
        self.env.store.store_user_in_index(&user.index_entry()).await?;
        tracing::info!(
            user_id = %user.chat_user_id,
            remote_id = %user.remote.id,
            "Connected calendar account"
        );
        Ok(())
    }

    /// Unlink the user's calendar account and remove everything stored for it.
    ///
    /// Channels the user linked to events are unlinked first; if any of
    /// those fail, the remaining links are saved and the disconnect aborts.
    pub async fn disconnect_user(&self, chat_user_id: &str) -> Result<()> {
        let _guard = self.env.user_locks.lock(chat_user_id).await;
        let mut user = self.load_connected_user(chat_user_id).await?;
        let store = &self.env.store;

        let mut links_left = std::collections::HashMap::new();
        for (event_id, channel_id) in &user.channel_events {
            if let Err(e) = store
                .delete_linked_channel_from_event(event_id, channel_id)
                .await
            {
                tracing::warn!(
                    user_id = %chat_user_id,
                    event_id = %event_id,
                    channel_id = %channel_id,
                    error = %e,
                    "Failed to unlink channel from event"
                );
                links_left.insert(event_id.clone(), channel_id.clone());
            }
        }
        if !links_left.is_empty() {
            user.channel_events = links_left;
            if let Err(e) = store.store_user(&user).await {
                tracing::error!(
                    user_id = %chat_user_id,
                    error = %e,
                    "Failed to store user after unlinking channels"
                );
            }
            return Err(AppError::Internal(anyhow::anyhow!(
                "failed to unlink channels from events"
            )));
        }

        if let Some(subscription_id) = user.settings.event_subscription_id.clone() {
            let stored = store.load_subscription(&subscription_id).await?;
            store
                .delete_user_subscription(&mut user, &subscription_id)
                .await?;

            if let Some(stored) = stored {
                let result = match self.client_for(&user).await {
                    Ok(client) => client.delete_subscription(&stored.remote).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = result {
                    tracing::warn!(
                        user_id = %chat_user_id,
                        subscription_id = %subscription_id,
                        error = %e,
                        "Failed to delete remote subscription"
                    );
                }
            }
        }

        store.delete_user(chat_user_id).await?;
        store.delete_user_from_index(chat_user_id).await?;

        tracing::info!(user_id = %chat_user_id, "Disconnected calendar account");
        Ok(())
    }
}
