// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application configuration loaded from environment variables.
//!
//! Secrets are read once at startup and kept in memory. The scheduling and
//! notification windows used by the sync engine are compile-time constants.

use chrono::Duration;
use std::env;
use std::str::FromStr;

/// Size of the calendar window fetched on every status sync pass.
pub const CALENDAR_VIEW_WINDOW_MINUTES: i64 = 10;
/// How often the external scheduler triggers the status sync job.
pub const STATUS_SYNC_JOB_INTERVAL_MINUTES: i64 = 5;
/// Lead time before an event at which a reminder is sent.
pub const UPCOMING_EVENT_NOTIFICATION_MINUTES: i64 = 10;
/// How often the external scheduler triggers the daily summary job.
pub const DAILY_SUMMARY_JOB_INTERVAL_MINUTES: i64 = 15;
/// Tolerance around the configured daily summary post time.
pub const DAILY_SUMMARY_WINDOW_MINUTES: i64 = 2;
/// Per-pass cap on repeated warnings before the log is truncated.
pub const LOG_TRUNCATE_LIMIT: usize = 5;
/// Capacity of the webhook notification queue.
pub const NOTIFICATION_QUEUE_SIZE: usize = 1024;
/// Calendar fetches in flight at once when syncing users individually.
pub const INDIVIDUAL_FETCH_CONCURRENCY: usize = 8;

/// Window fetched on every status sync pass.
pub fn calendar_view_window() -> Duration {
    Duration::minutes(CALENDAR_VIEW_WINDOW_MINUTES)
}

/// Interval between status sync passes.
pub fn status_sync_job_interval() -> Duration {
    Duration::minutes(STATUS_SYNC_JOB_INTERVAL_MINUTES)
}

/// Reminder lead time.
pub fn upcoming_event_notification_time() -> Duration {
    Duration::minutes(UPCOMING_EVENT_NOTIFICATION_MINUTES)
}

/// Tolerance around the reminder lead time: 110% of the sync interval, so a
/// reminder is not lost when a pass runs slightly late.
pub fn upcoming_event_notification_window() -> Duration {
    status_sync_job_interval() * 11 / 10
}

/// Calendar provider backing the remote client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalendarProviderKind {
    Microsoft,
}

impl CalendarProviderKind {
    /// Path segment used in webhook URLs.
    pub fn as_str(&self) -> &'static str {
        match self {
            CalendarProviderKind::Microsoft => "microsoft",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            CalendarProviderKind::Microsoft => "Microsoft Calendar",
        }
    }
}

impl FromStr for CalendarProviderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "microsoft" | "mscalendar" | "outlook" => Ok(CalendarProviderKind::Microsoft),
            other => Err(ConfigError::Invalid {
                name: "CALENDAR_PROVIDER",
                reason: format!("unsupported provider '{}'", other),
            }),
        }
    }
}

/// Persistent store backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Firestore,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "firestore" => Ok(StoreBackend::Firestore),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(ConfigError::Invalid {
                name: "STORE_BACKEND",
                reason: format!("unsupported backend '{}'", other),
            }),
        }
    }
}

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    // --- Environment Variables (non-sensitive) ---
    /// Base URL of the chat server (e.g. https://chat.example.com)
    pub chat_url: String,
    /// User ID of the bot account that sends DMs
    pub chat_bot_user_id: String,
    /// Public base URL of this service, used for webhook and action callbacks
    pub public_url: String,
    /// Calendar provider
    pub provider: CalendarProviderKind,
    /// OAuth client ID registered with the calendar provider
    pub remote_client_id: String,
    /// Tenant ID for app-only access; enables batched calendar fetches
    pub remote_tenant_id: Option<String>,
    /// Store backend
    pub store_backend: StoreBackend,
    /// GCP project ID (Firestore)
    pub gcp_project_id: String,
    /// Chat user IDs allowed to run admin-only operations
    pub admin_user_ids: Vec<String>,
    /// Server port
    pub port: u16,

    // --- Secrets ---
    /// Bot access token for the chat API
    pub chat_bot_token: String,
    /// OAuth client secret for the calendar provider
    pub remote_client_secret: String,
    /// Key used to derive subscription client states and sign post actions
    pub webhook_secret: Vec<u8>,
    /// Bearer token the scheduler presents on `/tasks/*`
    pub tasks_shared_secret: String,
}

impl Config {
    /// Config for tests only.
    pub fn test_default() -> Self {
        Self {
            chat_url: "http://localhost:8065".to_string(),
            chat_bot_user_id: "bot-user-id".to_string(),
            public_url: "http://localhost:8080".to_string(),
            provider: CalendarProviderKind::Microsoft,
            remote_client_id: "test_client_id".to_string(),
            remote_tenant_id: None,
            store_backend: StoreBackend::Memory,
            gcp_project_id: "test-project".to_string(),
            admin_user_ids: vec!["admin-user".to_string()],
            port: 8080,
            chat_bot_token: "test_bot_token".to_string(),
            remote_client_secret: "test_secret".to_string(),
            webhook_secret: b"test_webhook_secret_32_bytes!!!!".to_vec(),
            tasks_shared_secret: "test_tasks_secret".to_string(),
        }
    }

    /// Load configuration from environment variables.
    ///
    /// For local development, a `.env` file in the working directory is
    /// loaded first.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let provider = env::var("CALENDAR_PROVIDER")
            .unwrap_or_else(|_| "microsoft".to_string())
            .parse()?;
        let store_backend = env::var("STORE_BACKEND")
            .unwrap_or_else(|_| "firestore".to_string())
            .parse()?;

        Ok(Self {
            chat_url: required("CHAT_URL")?.trim_end_matches('/').to_string(),
            chat_bot_user_id: required("CHAT_BOT_USER_ID")?,
            public_url: required("PUBLIC_URL")?.trim_end_matches('/').to_string(),
            provider,
            remote_client_id: required("REMOTE_CLIENT_ID")?,
            remote_tenant_id: env::var("REMOTE_TENANT_ID")
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
            store_backend,
            gcp_project_id: env::var("GCP_PROJECT_ID").unwrap_or_else(|_| "local-dev".to_string()),
            admin_user_ids: env::var("ADMIN_USER_IDS")
                .unwrap_or_default()
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .unwrap_or(8080),

            chat_bot_token: required("CHAT_BOT_TOKEN")?,
            remote_client_secret: required("REMOTE_CLIENT_SECRET")?,
            webhook_secret: required("WEBHOOK_SECRET")?.into_bytes(),
            tasks_shared_secret: required("TASKS_SHARED_SECRET")?,
        })
    }

    /// URL the calendar provider posts change notifications to.
    pub fn notification_url(&self) -> String {
        format!("{}/webhook/{}/events", self.public_url, self.provider.as_str())
    }

    /// URL of an interactive post action handler.
    pub fn action_url(&self, action: &str) -> String {
        format!("{}/actions/{}", self.public_url, action)
    }

    pub fn is_admin(&self, chat_user_id: &str) -> bool {
        self.admin_user_ids.iter().any(|id| id == chat_user_id)
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    env::var(name)
        .map(|v| v.trim().to_string())
        .map_err(|_| ConfigError::Missing(name))
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}
