// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Linking a chat user to a calendar account through OAuth.
//!
//! The OAuth `state` carries the chat user ID and a timestamp, signed with
//! the webhook secret, so the callback needs no server-side state.

use crate::error::{AppError, Result};
use crate::models::user::DailySummarySettings;
use crate::models::User;
use crate::services::engine::Engine;
use crate::services::signing;
use chrono::{DateTime, Duration, Utc};

/// How long a connect link stays valid.
pub const OAUTH_STATE_TTL_MINUTES: i64 = 15;

/// Build a signed state: `{chat_user_id}|{timestamp_hex}|{signature}`.
pub fn new_oauth_state(secret: &[u8], chat_user_id: &str, now: DateTime<Utc>) -> String {
    let payload = format!("{}|{:x}", chat_user_id, now.timestamp());
    let signature = signing::sign(secret, &payload);
    format!("{}|{}", payload, signature)
}

/// Verify a state and return the chat user ID it was issued for.
pub fn verify_oauth_state(secret: &[u8], state: &str, now: DateTime<Utc>) -> Option<String> {
    let (payload, signature) = state.rsplit_once('|')?;
    if !signing::secrets_match(&signing::sign(secret, payload), signature) {
        return None;
    }

    let (chat_user_id, timestamp_hex) = payload.rsplit_once('|')?;
    let issued = i64::from_str_radix(timestamp_hex, 16).ok()?;
    let issued = DateTime::<Utc>::from_timestamp(issued, 0)?;
    let age = now - issued;
    if age < Duration::zero() || age > Duration::minutes(OAUTH_STATE_TTL_MINUTES) {
        return None;
    }
    Some(chat_user_id.to_string())
}

impl Engine {
    /// Callback URL registered with the calendar provider.
    pub fn oauth_redirect_uri(&self) -> String {
        format!("{}/oauth2/complete", self.env.config.public_url)
    }

    /// Link the user opens to start connecting their calendar.
    pub fn connect_url(&self, chat_user_id: &str) -> String {
        let signature = signing::action_signature(&self.env.config.webhook_secret, chat_user_id);
        format!(
            "{}/oauth2/connect?user_id={}&signature={}",
            self.env.config.public_url,
            urlencoding::encode(chat_user_id),
            signature
        )
    }

    /// DM the user a link to connect their calendar account.
    pub async fn send_connect_invite(&self, chat_user_id: &str) -> Result<()> {
        if self.env.store.load_user(chat_user_id).await?.is_some() {
            return Err(AppError::BadRequest(format!(
                "user {} is already connected",
                chat_user_id
            )));
        }
        let message = format!(
            "[Click here to connect your {} account.]({})",
            self.env.config.provider.display_name(),
            self.connect_url(chat_user_id)
        );
        self.env.poster.dm(chat_user_id, &message).await?;
        Ok(())
    }

    /// Provider authorization URL for `chat_user_id`.
    pub async fn init_oauth2(&self, chat_user_id: &str, now: DateTime<Utc>) -> Result<String> {
        if let Some(user) = self.env.store.load_user(chat_user_id).await? {
            return Err(AppError::BadRequest(format!(
                "user is already connected to {}",
                user.remote.mail
            )));
        }
        let state = new_oauth_state(&self.env.config.webhook_secret, chat_user_id, now);
        Ok(self
            .env
            .remote
            .authorize_url(&self.oauth_redirect_uri(), &state))
    }

    /// Finish the OAuth flow: exchange the code, link the account and
    /// subscribe to calendar changes.
    pub async fn complete_oauth2(&self, state: &str, code: &str, now: DateTime<Utc>) -> Result<User> {
        if code.is_empty() || state.is_empty() {
            return Err(AppError::BadRequest("missing code or state".to_string()));
        }
        let chat_user_id = verify_oauth_state(&self.env.config.webhook_secret, state, now)
            .ok_or(AppError::Unauthorized)?;

        let token = self
            .env
            .remote
            .exchange_code(&self.oauth_redirect_uri(), code)
            .await?;

        let mut user = User::new(chat_user_id.clone(), Default::default());
        user.oauth_token = Some(token);
        let client = self.env.remote.make_user_client(&user).await?;
        user.remote = client.get_me().await?;

        if let Some(existing) = self
            .env
            .store
            .load_chat_user_id_by_remote(&user.remote.id)
            .await?
        {
            let message = format!(
                "{} account `{}` is already connected to another chat account. Disconnect it there first.",
                self.env.config.provider.display_name(),
                user.remote.mail
            );
            if let Err(e) = self.env.poster.dm(&chat_user_id, &message).await {
                tracing::warn!(user_id = %chat_user_id, error = %e, "Failed to send DM");
            }
            tracing::warn!(
                user_id = %chat_user_id,
                existing_user_id = %existing,
                remote_id = %user.remote.id,
                "Calendar account already connected"
            );
            return Err(AppError::BadRequest(message));
        }

        let mailbox = client.get_mailbox_settings(&user.remote.id).await?;
        user.settings.daily_summary = Some(DailySummarySettings {
            timezone: mailbox.time_zone,
            ..Default::default()
        });

        self.connect_user(&user).await?;

        if let Err(e) = self.create_my_event_subscription(&chat_user_id).await {
            tracing::warn!(
                user_id = %chat_user_id,
                error = %e,
                "Failed to subscribe to calendar changes"
            );
        }

        let welcome = format!(
            "Your {} account {} is now connected.",
            self.env.config.provider.display_name(),
            user.remote.mail
        );
        if let Err(e) = self.env.poster.dm(&chat_user_id, &welcome).await {
            tracing::warn!(user_id = %chat_user_id, error = %e, "Failed to send welcome DM");
        }

        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_oauth_state_round_trip_and_expiry() {
        let secret = b"secret";
        let issued = Utc.with_ymd_and_hms(2026, 3, 2, 13, 0, 0).unwrap();
        let state = new_oauth_state(secret, "user-1", issued);

        assert_eq!(
            verify_oauth_state(secret, &state, issued + Duration::minutes(5)).as_deref(),
            Some("user-1")
        );
        assert!(verify_oauth_state(secret, &state, issued + Duration::minutes(16)).is_none());
        assert!(verify_oauth_state(b"other", &state, issued).is_none());
    }

    #[test]
    fn test_tampered_user_is_rejected() {
        let secret = b"secret";
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 13, 0, 0).unwrap();
        let state = new_oauth_state(secret, "user-1", now);
        let tampered = state.replacen("user-1", "user-2", 1);
        assert!(verify_oauth_state(secret, &tampered, now).is_none());
    }
}
