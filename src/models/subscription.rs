// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Push-notification subscriptions and inbound change notifications.

use crate::models::event::Event;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Subscription as registered with the calendar provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSubscription {
    pub id: String,
    pub resource: String,
    #[serde(default)]
    pub change_type: String,
    /// Secret echoed back on every notification
    #[serde(default)]
    pub client_state: String,
    /// Remote user ID of the subscription owner
    pub creator_id: String,
    pub expiration: DateTime<Utc>,
}

/// Subscription persisted alongside the chat user that created it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSubscription {
    pub remote: RemoteSubscription,
    pub chat_creator_id: String,
    #[serde(default)]
    pub version: String,
}

/// Change notification delivered to the webhook.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub subscription_id: String,
    pub client_state: String,
    pub change_type: String,
    /// Provider event ID the change refers to; lifecycle notifications have none
    pub resource_id: Option<String>,
    /// The subscription is close to expiring and should be renewed
    pub recommend_renew: bool,
    /// Only identifiers were delivered; the event must be fetched
    pub is_bare: bool,
    pub event: Option<Event>,
}
