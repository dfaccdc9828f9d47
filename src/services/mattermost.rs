// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Mattermost REST v4 client for presence updates and bot posts.

use crate::config::Config;
use crate::models::{Attachment, CustomStatus, Post, PresenceStatus, UserStatus};
use crate::services::chat::{ChatError, ChatResult, PresenceApi, Poster};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;

#[derive(Debug, Deserialize)]
struct CreatedObject {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ChatUser {
    #[serde(default)]
    props: HashMap<String, String>,
}

/// Mattermost API client authenticated as the bot account.
#[derive(Clone)]
pub struct MattermostClient {
    http: reqwest::Client,
    base_url: String,
    bot_user_id: String,
    bot_token: String,
}

impl MattermostClient {
    pub fn new(base_url: String, bot_user_id: String, bot_token: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: format!("{}/api/v4", base_url.trim_end_matches('/')),
            bot_user_id,
            bot_token,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.chat_url.clone(),
            config.chat_bot_user_id.clone(),
            config.chat_bot_token.clone(),
        )
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> ChatResult<reqwest::Response> {
        let response = request
            .bearer_auth(&self.bot_token)
            .send()
            .await
            .map_err(|e| ChatError::Request(e.to_string()))?;
        self.check_response(response).await
    }

    async fn send_json<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> ChatResult<T> {
        self.send(request)
            .await?
            .json()
            .await
            .map_err(|e| ChatError::Decode(e.to_string()))
    }

    /// Check response status and return error if not successful.
    async fn check_response(&self, response: reqwest::Response) -> ChatResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        if status.as_u16() == 429 {
            tracing::warn!("Chat API rate limit hit (429)");
        }
        Err(ChatError::Http {
            status: status.as_u16(),
            body,
        })
    }

    async fn direct_channel(&self, user_id: &str) -> ChatResult<String> {
        let channel: CreatedObject = self
            .send_json(
                self.http
                    .post(self.url("/channels/direct"))
                    .json(&[self.bot_user_id.as_str(), user_id]),
            )
            .await?;
        Ok(channel.id)
    }
}

#[async_trait]
impl PresenceApi for MattermostClient {
    async fn get_statuses(&self, user_ids: &[String]) -> ChatResult<Vec<UserStatus>> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }
        self.send_json(self.http.post(self.url("/users/status/ids")).json(user_ids))
            .await
    }

    async fn update_status(&self, user_id: &str, status: PresenceStatus) -> ChatResult<UserStatus> {
        self.send_json(
            self.http
                .put(self.url(&format!("/users/{}/status", user_id)))
                .json(&json!({ "user_id": user_id, "status": status.as_str() })),
        )
        .await
    }

    async fn get_custom_status(&self, user_id: &str) -> ChatResult<Option<CustomStatus>> {
        let user: ChatUser = self
            .send_json(self.http.get(self.url(&format!("/users/{}", user_id))))
            .await?;
        // The custom status is kept as a JSON string in the user's props
        let Some(raw) = user.props.get("customStatus").filter(|s| !s.is_empty()) else {
            return Ok(None);
        };
        let status: CustomStatus =
            serde_json::from_str(raw).map_err(|e| ChatError::Decode(e.to_string()))?;
        if status.emoji.is_empty() && status.text.is_empty() {
            return Ok(None);
        }
        Ok(Some(status))
    }

    async fn update_custom_status(&self, user_id: &str, status: &CustomStatus) -> ChatResult<()> {
        self.send(
            self.http
                .put(self.url(&format!("/users/{}/status/custom", user_id)))
                .json(status),
        )
        .await?;
        Ok(())
    }

    async fn remove_custom_status(&self, user_id: &str) -> ChatResult<()> {
        self.send(
            self.http
                .delete(self.url(&format!("/users/{}/status/custom", user_id))),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl Poster for MattermostClient {
    async fn dm(&self, user_id: &str, message: &str) -> ChatResult<String> {
        let channel_id = self.direct_channel(user_id).await?;
        self.create_post(Post {
            channel_id,
            message: message.to_string(),
            attachments: Vec::new(),
        })
        .await
    }

    async fn dm_with_attachment(&self, user_id: &str, attachment: Attachment) -> ChatResult<String> {
        let channel_id = self.direct_channel(user_id).await?;
        self.create_post(Post {
            channel_id,
            message: String::new(),
            attachments: vec![attachment],
        })
        .await
    }

    async fn create_post(&self, post: Post) -> ChatResult<String> {
        let body = json!({
            "channel_id": post.channel_id,
            "message": post.message,
            "props": { "attachments": post.attachments },
        });
        let created: CreatedObject = self
            .send_json(self.http.post(self.url("/posts")).json(&body))
            .await?;
        Ok(created.id)
    }
}
