// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore client wrapper implementing [`Store`].
//!
//! Collections:
//! - `users` and `user_index` (keyed by chat user ID)
//! - `user_events` (last-seen event snapshots)
//! - `event_metadata` (linked channels per event)
//! - `subscriptions` (keyed by remote subscription ID)

use crate::db::{collections, user_event_doc_id, Store};
use crate::error::{AppError, Result};
use crate::models::user::OAuthToken;
use crate::models::{EventMetadata, StoredEvent, StoredSubscription, User, UserIndexEntry};
use async_trait::async_trait;
use firestore::{paths, FirestoreWritePrecondition};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

// Partial user documents for masked updates; field names must match `User`.

#[derive(Serialize, Deserialize)]
struct OAuthTokenPatch {
    oauth_token: OAuthToken,
}

#[derive(Serialize, Deserialize)]
struct ActiveEventsPatch {
    active_events: Vec<String>,
}

#[derive(Serialize, Deserialize)]
struct CustomStatusPatch {
    is_custom_status_set: bool,
}

/// Firestore database client.
#[derive(Clone)]
pub struct FirestoreDb {
    client: Option<firestore::FirestoreDb>,
}

impl FirestoreDb {
    /// Create a new Firestore client.
    ///
    /// For local development with emulator, set FIRESTORE_EMULATOR_HOST.
    pub async fn new(project_id: &str) -> Result<Self> {
        if std::env::var("FIRESTORE_EMULATOR_HOST").is_ok() {
            return Self::create_emulator_client(project_id).await;
        }

        let client = firestore::FirestoreDb::new(project_id)
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect to Firestore: {}", e)))?;

        tracing::info!(project = project_id, "Connected to Firestore");

        Ok(Self {
            client: Some(client),
        })
    }

    /// Emulator connection with a dummy unsigned token.
    async fn create_emulator_client(project_id: &str) -> Result<Self> {
        let token_source = gcloud_sdk::ExternalJwtFunctionSource::new(|| async {
            Ok(gcloud_sdk::Token {
                token_type: "Bearer".to_string(),
                token: gcloud_sdk::SecretValue::new(
                    "eyJhbGciOiJub25lIn0.eyJ1aWQiOiJ0ZXN0In0."
                        .to_string()
                        .into(),
                ),
                expiry: chrono::Utc::now() + chrono::Duration::hours(1),
            })
        });

        let options = firestore::FirestoreDbOptions::new(project_id.to_string());

        let client = firestore::FirestoreDb::with_options_token_source(
            options,
            gcloud_sdk::GCP_DEFAULT_SCOPES.clone(),
            gcloud_sdk::TokenSourceType::ExternalSource(Box::new(token_source)),
        )
        .await
        .map_err(|e| {
            AppError::Database(format!("Failed to connect to Firestore Emulator: {}", e))
        })?;

        tracing::info!(project = project_id, "Connected to Firestore emulator");

        Ok(Self {
            client: Some(client),
        })
    }

    /// Offline client for tests; every operation returns an error.
    pub fn new_mock() -> Self {
        Self { client: None }
    }

    fn get_client(&self) -> Result<&firestore::FirestoreDb> {
        self.client
            .as_ref()
            .ok_or_else(|| AppError::Database("Database not connected (offline mode)".to_string()))
    }

    async fn get_doc<T>(&self, collection: &str, id: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        self.get_client()?
            .fluent()
            .select()
            .by_id_in(collection)
            .obj()
            .one(id)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn put_doc<T>(&self, collection: &str, id: &str, value: &T) -> Result<()>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
    {
        let _: () = self
            .get_client()?
            .fluent()
            .update()
            .in_col(collection)
            .document_id(id)
            .object(value)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    /// Write only `fields` of an existing user document.
    async fn update_user_fields<T>(&self, chat_user_id: &str, fields: Vec<String>, patch: &T) -> Result<()>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
    {
        let _: () = self
            .get_client()?
            .fluent()
            .update()
            .fields(fields)
            .in_col(collections::USERS)
            .precondition(FirestoreWritePrecondition::Exists(true))
            .document_id(chat_user_id)
            .object(patch)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    async fn delete_doc(&self, collection: &str, id: &str) -> Result<()> {
        self.get_client()?
            .fluent()
            .delete()
            .from(collection)
            .document_id(id)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }
}

#[async_trait]
impl Store for FirestoreDb {
    async fn load_user_index(&self) -> Result<Vec<UserIndexEntry>> {
        self.get_client()?
            .fluent()
            .select()
            .from(collections::USER_INDEX)
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn store_user_in_index(&self, entry: &UserIndexEntry) -> Result<()> {
        self.put_doc(collections::USER_INDEX, &entry.chat_user_id, entry)
            .await
    }

    async fn delete_user_from_index(&self, chat_user_id: &str) -> Result<()> {
        self.delete_doc(collections::USER_INDEX, chat_user_id).await
    }

    async fn load_user(&self, chat_user_id: &str) -> Result<Option<User>> {
        self.get_doc(collections::USERS, chat_user_id).await
    }

    async fn store_user(&self, user: &User) -> Result<()> {
        self.put_doc(collections::USERS, &user.chat_user_id, user)
            .await
    }

    async fn delete_user(&self, chat_user_id: &str) -> Result<()> {
        self.delete_doc(collections::USERS, chat_user_id).await
    }

    async fn store_user_oauth_token(&self, chat_user_id: &str, token: &OAuthToken) -> Result<()> {
        self.update_user_fields(
            chat_user_id,
            paths!(User::{oauth_token}),
            &OAuthTokenPatch {
                oauth_token: token.clone(),
            },
        )
        .await
    }

    async fn store_user_active_events(&self, chat_user_id: &str, events: Vec<String>) -> Result<()> {
        self.update_user_fields(
            chat_user_id,
            paths!(User::{active_events}),
            &ActiveEventsPatch {
                active_events: events,
            },
        )
        .await
    }

    async fn store_user_custom_status_updates(&self, chat_user_id: &str, value: bool) -> Result<()> {
        self.update_user_fields(
            chat_user_id,
            paths!(User::{is_custom_status_set}),
            &CustomStatusPatch {
                is_custom_status_set: value,
            },
        )
        .await
    }

    async fn load_user_event(
        &self,
        chat_user_id: &str,
        ical_uid: &str,
    ) -> Result<Option<StoredEvent>> {
        self.get_doc(
            collections::USER_EVENTS,
            &user_event_doc_id(chat_user_id, ical_uid),
        )
        .await
    }

    async fn store_user_event(&self, chat_user_id: &str, event: &StoredEvent) -> Result<()> {
        let doc_id = user_event_doc_id(chat_user_id, &event.remote.ical_uid);
        self.put_doc(collections::USER_EVENTS, &doc_id, event).await
    }

    async fn load_event_metadata(&self, ical_uid: &str) -> Result<Option<EventMetadata>> {
        self.get_doc(
            collections::EVENT_METADATA,
            &urlencoding::encode(ical_uid),
        )
        .await
    }

    async fn store_event_metadata(&self, ical_uid: &str, metadata: &EventMetadata) -> Result<()> {
        self.put_doc(
            collections::EVENT_METADATA,
            &urlencoding::encode(ical_uid),
            metadata,
        )
        .await
    }

    async fn load_subscription(&self, subscription_id: &str) -> Result<Option<StoredSubscription>> {
        self.get_doc(collections::SUBSCRIPTIONS, subscription_id)
            .await
    }

    async fn put_subscription(&self, subscription: &StoredSubscription) -> Result<()> {
        self.put_doc(
            collections::SUBSCRIPTIONS,
            &subscription.remote.id,
            subscription,
        )
        .await
    }

    async fn delete_subscription(&self, subscription_id: &str) -> Result<()> {
        self.delete_doc(collections::SUBSCRIPTIONS, subscription_id)
            .await
    }
}
