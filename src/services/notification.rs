// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Webhook change-notification queue and its background worker.
//!
//! The webhook handler only enqueues; a single worker task drains the queue
//! and turns each change into a DM to the subscription's creator:
//! 1. Load the subscription and its creator, and authenticate the notification
//! 2. Renew the subscription if the provider asked for it
//! 3. Fetch the event if only identifiers were delivered
//! 4. Diff against the last stored snapshot and DM new or important changes
//! 5. Store the event as the new snapshot

use crate::config::NOTIFICATION_QUEUE_SIZE;
use crate::error::{AppError, Result};
use crate::models::{Notification, StoredEvent, StoredSubscription};
use crate::services::change_detector::{
    new_event_attachment, updated_event_attachment, ResponseTarget, OPTION_MAYBE, OPTION_NO,
    OPTION_YES,
};
use crate::services::engine::{Engine, Env};
use crate::services::signing;
use crate::time_utils::resolve_timezone_or_utc;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

/// Path of the invitation response action handler.
pub const RESPOND_TO_EVENT_ACTION: &str = "respond";

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("notification queue is full")]
    Full,

    #[error("notification worker has stopped")]
    Closed,
}

impl From<QueueError> for AppError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Full => AppError::QueueFull,
            QueueError::Closed => AppError::Internal(anyhow::anyhow!(err)),
        }
    }
}

enum Control {
    Configure(Arc<Env>),
    Quit,
}

/// Handle to the notification worker.
pub struct NotificationProcessor {
    queue: mpsc::Sender<Notification>,
    control: mpsc::UnboundedSender<Control>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl NotificationProcessor {
    /// Spawn the worker on the current runtime.
    pub fn start(env: Arc<Env>) -> Self {
        Self::with_capacity(env, NOTIFICATION_QUEUE_SIZE)
    }

    pub fn with_capacity(env: Arc<Env>, capacity: usize) -> Self {
        let (queue, queue_rx) = mpsc::channel(capacity);
        let (control, control_rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_worker(env, queue_rx, control_rx));
        Self {
            queue,
            control,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Queue notifications without waiting.
    ///
    /// Fails with [`QueueError::Full`] as soon as one does not fit; the
    /// ones queued before it stay queued.
    pub fn enqueue(&self, notifications: Vec<Notification>) -> std::result::Result<(), QueueError> {
        for n in notifications {
            self.queue.try_send(n).map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => QueueError::Full,
                mpsc::error::TrySendError::Closed(_) => QueueError::Closed,
            })?;
        }
        Ok(())
    }

    /// Swap the worker's collaborators. Takes effect before the next item.
    ///
    /// Build `env` with [`Env::reconfigure`] from the engine's environment
    /// so the worker keeps contending on the same user locks.
    pub fn configure(&self, env: Arc<Env>) -> std::result::Result<(), QueueError> {
        self.control
            .send(Control::Configure(env))
            .map_err(|_| QueueError::Closed)
    }

    /// Stop the worker and wait for it to exit. Queued items are dropped.
    pub async fn quit(&self) {
        let _ = self.control.send(Control::Quit);
        if let Some(handle) = self.worker.lock().await.take() {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Notification worker panicked");
            }
        }
    }
}

async fn run_worker(
    mut env: Arc<Env>,
    mut queue: mpsc::Receiver<Notification>,
    mut control: mpsc::UnboundedReceiver<Control>,
) {
    tracing::info!("Notification worker started");
    loop {
        tokio::select! {
            biased;

            msg = control.recv() => match msg {
                Some(Control::Configure(new_env)) => {
                    tracing::info!("Notification worker reconfigured");
                    env = new_env;
                }
                Some(Control::Quit) | None => break,
            },

            item = queue.recv() => {
                let Some(n) = item else { break };
                let engine = Engine::new(env.clone());
                if let Err(e) = engine.process_notification(&n, Utc::now()).await {
                    tracing::info!(
                        subscription_id = %n.subscription_id,
                        error = %e,
                        "Failed to process webhook notification"
                    );
                }
            }
        }
    }
    tracing::info!("Notification worker stopped");
}

impl Engine {
    /// Handle one change notification end to end.
    pub async fn process_notification(&self, n: &Notification, now: DateTime<Utc>) -> Result<()> {
        let store = &self.env.store;

        let sub = store
            .load_subscription(&n.subscription_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("subscription {}", n.subscription_id)))?;

        let _guard = self.env.user_locks.lock(&sub.chat_creator_id).await;
        let mut creator = self.load_connected_user(&sub.chat_creator_id).await?;

        if creator.settings.event_subscription_id.as_deref() != Some(sub.remote.id.as_str()) {
            return Err(AppError::Forbidden(format!(
                "subscription {} is orphaned",
                sub.remote.id
            )));
        }
        if !sub.remote.client_state.is_empty()
            && !signing::secrets_match(&sub.remote.client_state, &n.client_state)
        {
            return Err(AppError::Forbidden(
                "notification client state does not match".to_string(),
            ));
        }

        let client = self.env.remote.make_user_client(&creator).await?;

        if n.recommend_renew {
            let renewed = client
                .renew_subscription(
                    &self.env.config.notification_url(),
                    &sub.remote.creator_id,
                    &sub.remote,
                )
                .await?;
            let stored = StoredSubscription {
                remote: renewed,
                chat_creator_id: creator.chat_user_id.clone(),
                version: sub.version.clone(),
            };
            store.store_user_subscription(&mut creator, &stored).await?;
            tracing::info!(
                user_id = %creator.chat_user_id,
                subscription_id = %n.subscription_id,
                expiration = %stored.remote.expiration,
                "Renewed subscription from notification"
            );
        }

        let fetched;
        let n = if n.is_bare {
            fetched = client
                .get_notification_data(&sub.remote.creator_id, n)
                .await?;
            &fetched
        } else {
            n
        };

        let Some(event) = n.event.as_ref() else {
            // Lifecycle notifications carry no event
            return Ok(());
        };

        let prior = store
            .load_user_event(&creator.chat_user_id, &event.ical_uid)
            .await?;

        let mailbox = client.get_mailbox_settings(&sub.remote.creator_id).await?;
        let tz = resolve_timezone_or_utc(&mailbox.time_zone);

        let url = self.env.config.action_url(RESPOND_TO_EVENT_ACTION);
        let signature =
            signing::action_signature(&self.env.config.webhook_secret, &creator.chat_user_id);
        let target = ResponseTarget {
            url: &url,
            signature: &signature,
        };

        let attachment = match &prior {
            Some(prior) => {
                match updated_event_attachment(event, &prior.remote, tz, &target, now) {
                    Some(att) => att,
                    None => {
                        tracing::debug!(
                            user_id = %creator.chat_user_id,
                            subscription_id = %n.subscription_id,
                            change_type = %n.change_type,
                            event_id = %event.id,
                            "No important change in event"
                        );
                        return Ok(());
                    }
                }
            }
            None => new_event_attachment(event, tz, &target, now),
        };
        let title = attachment.title.clone();

        self.env
            .poster
            .dm_with_attachment(&creator.chat_user_id, attachment)
            .await?;

        store
            .store_user_event(
                &creator.chat_user_id,
                &StoredEvent {
                    remote: event.clone(),
                },
            )
            .await?;

        tracing::debug!(
            user_id = %creator.chat_user_id,
            subscription_id = %n.subscription_id,
            title = %title,
            "Sent event change notification"
        );
        Ok(())
    }
}

impl Engine {
    /// Answer an invitation with the option picked in a notification's
    /// response menu.
    pub async fn respond_to_event(&self, chat_user_id: &str, event_id: &str, option: &str) -> Result<String> {
        let response = match option {
            OPTION_YES => "accept",
            OPTION_NO => "decline",
            OPTION_MAYBE => "tentativelyAccept",
            other => {
                return Err(AppError::BadRequest(format!(
                    "cannot respond with '{}'",
                    other
                )))
            }
        };

        let user = self.load_connected_user(chat_user_id).await?;
        let client = self.client_for(&user).await?;
        client
            .respond_to_event(&user.remote.id, event_id, response)
            .await?;

        tracing::info!(
            user_id = %chat_user_id,
            event_id = %event_id,
            response = %response,
            "Responded to event"
        );
        Ok(format!("You have responded \"{}\" to this event.", option))
    }
}
