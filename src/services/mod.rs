// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - sync engine and external API clients.

pub mod availability;
pub mod change_detector;
pub mod chat;
pub mod connect;
pub mod custom_status;
pub mod daily_summary;
pub mod engine;
pub mod graph;
pub mod mattermost;
pub mod notification;
pub mod reminders;
pub mod remote;
pub mod signing;
pub mod status;
pub mod subscription;
pub mod users;
pub mod views;
pub mod window;

pub use availability::{JobSummary, SyncReport};
pub use engine::{Engine, Env, UserLocks};
pub use graph::GraphProvider;
pub use mattermost::MattermostClient;
pub use notification::{NotificationProcessor, QueueError};
