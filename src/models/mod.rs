// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Data models for the application.

pub mod chat;
pub mod event;
pub mod subscription;
pub mod user;

pub use chat::{Attachment, CustomStatus, Post, PresenceStatus, UserStatus};
pub use event::{CalendarView, Event, EventMetadata, StoredEvent};
pub use subscription::{Notification, RemoteSubscription, StoredSubscription};
pub use user::{User, UserIndexEntry};
