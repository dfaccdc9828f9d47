// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Change-notification subscriptions on users' calendars.
//!
//! Each connected user owns at most one subscription, referenced from
//! `settings.event_subscription_id`. Subscriptions expire after a few days
//! and are renewed by a scheduled job.

use crate::error::{AppError, Result};
use crate::models::{StoredSubscription, User};
use crate::services::engine::{Engine, LogLimiter};
use crate::services::signing;
use serde::Serialize;

/// Version tag stored with every subscription.
pub const SUBSCRIPTION_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Outcome counts of a subscription renewal pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RenewalSummary {
    pub users_processed: usize,
    pub subscriptions_renewed: usize,
    pub subscriptions_failed: usize,
}

impl Engine {
    pub async fn create_my_event_subscription(&self, chat_user_id: &str) -> Result<StoredSubscription> {
        let _guard = self.env.user_locks.lock(chat_user_id).await;
        let mut user = self.load_connected_user(chat_user_id).await?;
        self.create_subscription_for(&mut user).await
    }

    pub async fn load_my_event_subscription(&self, chat_user_id: &str) -> Result<Option<StoredSubscription>> {
        let user = self.load_connected_user(chat_user_id).await?;
        match user.settings.event_subscription_id {
            Some(id) => self.env.store.load_subscription(&id).await,
            None => Ok(None),
        }
    }

    /// Extend the user's subscription.
    ///
    /// Returns `None` when the user has no subscription. A subscription the
    /// provider no longer knows about is replaced with a fresh one.
    pub async fn renew_my_event_subscription(
        &self,
        chat_user_id: &str,
    ) -> Result<Option<StoredSubscription>> {
        let _guard = self.env.user_locks.lock(chat_user_id).await;
        let mut user = self.load_connected_user(chat_user_id).await?;
        self.renew_subscription_for(&mut user).await
    }

    pub async fn delete_my_event_subscription(&self, chat_user_id: &str) -> Result<()> {
        let _guard = self.env.user_locks.lock(chat_user_id).await;
        let mut user = self.load_connected_user(chat_user_id).await?;

        let subscription_id = user
            .settings
            .event_subscription_id
            .clone()
            .ok_or_else(|| AppError::NotFound(format!("subscription for user {}", chat_user_id)))?;
        let stored = self
            .env
            .store
            .load_subscription(&subscription_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("subscription {}", subscription_id)))?;

        let client = self.env.remote.make_user_client(&user).await?;
        client.delete_subscription(&stored.remote).await?;

        self.env
            .store
            .delete_user_subscription(&mut user, &subscription_id)
            .await?;
        tracing::info!(
            user_id = %chat_user_id,
            subscription_id = %subscription_id,
            "Deleted event subscription"
        );
        Ok(())
    }

    /// Renew the subscription of every connected user that has one.
    pub async fn renew_all_subscriptions(&self) -> Result<RenewalSummary> {
        let index = self.env.store.load_user_index().await?;
        let mut summary = RenewalSummary::default();
        let mut limiter = LogLimiter::default();

        for entry in &index {
            summary.users_processed += 1;
            match self.renew_my_event_subscription(&entry.chat_user_id).await {
                Ok(Some(_)) => summary.subscriptions_renewed += 1,
                Ok(None) => {}
                Err(e) => {
                    summary.subscriptions_failed += 1;
                    if limiter.allow() {
                        tracing::warn!(
                            user_id = %entry.chat_user_id,
                            error = %e,
                            "Failed to renew subscription"
                        );
                    }
                }
            }
        }

        tracing::info!(
            users = summary.users_processed,
            renewed = summary.subscriptions_renewed,
            failed = summary.subscriptions_failed,
            "Subscription renewal complete"
        );
        Ok(summary)
    }

    /// Caller must hold the user's lock.
    async fn create_subscription_for(&self, user: &mut User) -> Result<StoredSubscription> {
        let client = self.env.remote.make_user_client(user).await?;
        let client_state = signing::new_client_state(&self.env.config.webhook_secret, &user.chat_user_id);
        let remote = client
            .create_subscription(&self.env.config.notification_url(), &user.remote.id, &client_state)
            .await?;

        let stored = StoredSubscription {
            remote,
            chat_creator_id: user.chat_user_id.clone(),
            version: SUBSCRIPTION_VERSION.to_string(),
        };
        self.env.store.store_user_subscription(user, &stored).await?;
        tracing::info!(
            user_id = %user.chat_user_id,
            subscription_id = %stored.remote.id,
            expiration = %stored.remote.expiration,
            "Created event subscription"
        );
        Ok(stored)
    }

    /// Caller must hold the user's lock.
    async fn renew_subscription_for(&self, user: &mut User) -> Result<Option<StoredSubscription>> {
        let Some(subscription_id) = user.settings.event_subscription_id.clone() else {
            return Ok(None);
        };
        let mut stored = self
            .env
            .store
            .load_subscription(&subscription_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("subscription {}", subscription_id)))?;

        let client = self.env.remote.make_user_client(user).await?;
        let renewed = match client
            .renew_subscription(&self.env.config.notification_url(), &user.remote.id, &stored.remote)
            .await
        {
            Ok(renewed) => renewed,
            Err(e) if e.is_not_found() => {
                self.env
                    .store
                    .delete_user_subscription(user, &subscription_id)
                    .await?;
                tracing::info!(
                    user_id = %user.chat_user_id,
                    subscription_id = %subscription_id,
                    "Subscription expired, creating a new one"
                );
                return self.create_subscription_for(user).await.map(Some);
            }
            Err(e) => return Err(e.into()),
        };

        stored.remote = renewed;
        self.env.store.store_user_subscription(user, &stored).await?;
        Ok(Some(stored))
    }
}
