// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Engine environment: the collaborators every operation depends on.

use crate::config::{Config, LOG_TRUNCATE_LIMIT};
use crate::db::Store;
use crate::services::chat::{PresenceApi, Poster};
use crate::services::remote::RemoteProvider;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Per-user async mutexes serializing writes to a user's record.
///
/// Shared by the scheduled sync path and the webhook worker.
#[derive(Clone, Default)]
pub struct UserLocks {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for and take the lock for `chat_user_id`.
    pub async fn lock(&self, chat_user_id: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(chat_user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }
}

/// Immutable bundle of collaborators. Reconfiguration swaps the whole `Arc`.
pub struct Env {
    pub config: Config,
    pub store: Arc<dyn Store>,
    pub remote: Arc<dyn RemoteProvider>,
    pub presence: Arc<dyn PresenceApi>,
    pub poster: Arc<dyn Poster>,
    pub user_locks: UserLocks,
}

impl Env {
    pub fn new(
        config: Config,
        store: Arc<dyn Store>,
        remote: Arc<dyn RemoteProvider>,
        presence: Arc<dyn PresenceApi>,
        poster: Arc<dyn Poster>,
    ) -> Self {
        Self {
            config,
            store,
            remote,
            presence,
            poster,
            user_locks: UserLocks::new(),
        }
    }

    /// Environment over new collaborators that keeps this one's user locks,
    /// so operations on either side still serialize per user.
    pub fn reconfigure(
        &self,
        config: Config,
        store: Arc<dyn Store>,
        remote: Arc<dyn RemoteProvider>,
        presence: Arc<dyn PresenceApi>,
        poster: Arc<dyn Poster>,
    ) -> Self {
        Self {
            user_locks: self.user_locks.clone(),
            ..Self::new(config, store, remote, presence, poster)
        }
    }
}

/// Entry point for the scheduled jobs and user-initiated operations.
///
/// Operations live in the sibling modules (`availability`, `status`,
/// `daily_summary`, `subscription`, `users`) as `impl Engine` blocks.
#[derive(Clone)]
pub struct Engine {
    pub(crate) env: Arc<Env>,
}

impl Engine {
    pub fn new(env: Arc<Env>) -> Self {
        Self { env }
    }

    pub fn env(&self) -> &Arc<Env> {
        &self.env
    }
}

/// Caps the number of per-user warnings emitted by one batch pass.
///
/// After the limit, a single truncation marker is logged and the rest
/// are suppressed. Counting continues regardless.
#[derive(Debug)]
pub struct LogLimiter {
    limit: usize,
    seen: usize,
}

impl Default for LogLimiter {
    fn default() -> Self {
        Self::new(LOG_TRUNCATE_LIMIT)
    }
}

impl LogLimiter {
    pub fn new(limit: usize) -> Self {
        Self { limit, seen: 0 }
    }

    /// Returns true if the caller should emit its message.
    pub fn allow(&mut self) -> bool {
        self.seen += 1;
        if self.seen <= self.limit {
            return true;
        }
        if self.seen == self.limit + 1 {
            tracing::warn!(limit = self.limit, "Too many messages, truncating log");
        }
        false
    }

    /// Number of messages offered so far, logged or not.
    pub fn seen(&self) -> usize {
        self.seen
    }
}
