use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::{
    providers::{DeliveryError, FcmClient, PushMessage},
    storage::{Store, StoreError},
};

/// Title, body and data shared by every recipient of a send.
#[derive(Debug, Clone, Default)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub data: Map<String, Value>,
}

/// Why a single delivery attempt failed.
#[derive(Debug, Error)]
pub enum SendFailure {
    #[error("User not found")]
    UserNotFound,

    #[error("FCM token not found")]
    TokenMissing,

    #[error(transparent)]
    Lookup(#[from] StoreError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryResult {
    pub user_id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DeliveryResult {
    fn from_outcome(user_id: &str, outcome: Result<String, SendFailure>) -> Self {
        match outcome {
            Ok(message_id) => Self {
                user_id: user_id.to_string(),
                success: true,
                message_id: Some(message_id),
                error: None,
            },
            Err(failure) => Self {
                user_id: user_id.to_string(),
                success: false,
                message_id: None,
                error: Some(failure.to_string()),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub total: usize,
    pub success_count: usize,
    pub results: Vec<DeliveryResult>,
}

/// Resolves users to registration tokens and submits notifications.
pub struct NotificationSender {
    users: Store,
    fcm: Arc<dyn FcmClient>,
}

impl NotificationSender {
    pub fn new(users: Store, fcm: Arc<dyn FcmClient>) -> Self {
        Self { users, fcm }
    }

    /// Deliver to one user. Failures are reported in the result, never raised.
    pub async fn send_one(&self, user_id: &str, notification: &Notification) -> DeliveryResult {
        let outcome = self.try_send(user_id, notification).await;
        match &outcome {
            Ok(message_id) => {
                tracing::info!(user_id, message_id = %message_id, "notification sent");
            }
            Err(SendFailure::Delivery(err)) if err.is_invalid_token() => {
                tracing::warn!(
                    user_id,
                    error = %err,
                    invalid_token = true,
                    "registration token rejected"
                );
            }
            Err(err) => {
                tracing::warn!(user_id, error = %err, "notification not sent");
            }
        }
        DeliveryResult::from_outcome(user_id, outcome)
    }

    /// Deliver to each user in order. One failure never stops the rest.
    pub async fn send_many(
        &self,
        user_ids: &[String],
        notification: &Notification,
    ) -> BatchSummary {
        let mut results = Vec::with_capacity(user_ids.len());
        for user_id in user_ids {
            results.push(self.send_one(user_id, notification).await);
        }
        let success_count = results.iter().filter(|result| result.success).count();
        tracing::info!(total = user_ids.len(), success_count, "batch send finished");

        BatchSummary {
            total: user_ids.len(),
            success_count,
            results,
        }
    }

    async fn try_send(
        &self,
        user_id: &str,
        notification: &Notification,
    ) -> Result<String, SendFailure> {
        let user = self
            .users
            .find_user(user_id)
            .await?
            .ok_or(SendFailure::UserNotFound)?;
        let token = user.push_token().ok_or(SendFailure::TokenMissing)?;

        let message = PushMessage::new(
            token,
            &notification.title,
            &notification.body,
            &notification.data,
        );
        Ok(self.fcm.send(&message).await?)
    }
}
