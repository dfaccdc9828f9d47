// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Chat platform collaborators: presence updates and bot posts.

use crate::models::{Attachment, CustomStatus, Post, PresenceStatus, UserStatus};
use async_trait::async_trait;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ChatError {
    #[error("chat request failed: {0}")]
    Request(String),

    #[error("chat API returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("chat response could not be decoded: {0}")]
    Decode(String),
}

pub type ChatResult<T> = std::result::Result<T, ChatError>;

/// Presence and custom-status API of the chat platform.
#[async_trait]
pub trait PresenceApi: Send + Sync {
    async fn get_statuses(&self, user_ids: &[String]) -> ChatResult<Vec<UserStatus>>;

    async fn update_status(&self, user_id: &str, status: PresenceStatus)
        -> ChatResult<UserStatus>;

    /// Current custom status, `None` when the user has none.
    async fn get_custom_status(&self, user_id: &str) -> ChatResult<Option<CustomStatus>>;

    async fn update_custom_status(&self, user_id: &str, status: &CustomStatus) -> ChatResult<()>;

    async fn remove_custom_status(&self, user_id: &str) -> ChatResult<()>;
}

/// Bot posting API. Each method returns the created post ID.
#[async_trait]
pub trait Poster: Send + Sync {
    async fn dm(&self, user_id: &str, message: &str) -> ChatResult<String>;

    async fn dm_with_attachment(&self, user_id: &str, attachment: Attachment)
        -> ChatResult<String>;

    async fn create_post(&self, post: Post) -> ChatResult<String>;
}
