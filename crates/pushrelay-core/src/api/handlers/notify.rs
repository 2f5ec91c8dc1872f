use axum::{Json, extract::State, extract::rejection::JsonRejection};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::{
    api::{Error, HttpResult, callable_input},
    app::AppState,
    notify::{BatchSummary, Notification},
};

const SINGLE_REQUIRED: &str = "userId, title, and body are required";
const USER_IDS_REQUIRED: &str = "userIds array is required";
const CONTENT_REQUIRED: &str = "title and body are required";

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub(crate) struct SendNotificationInput {
    #[serde(deserialize_with = "lenient_string")]
    pub user_id: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub title: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub body: Option<String>,
    #[serde(deserialize_with = "lenient_object")]
    pub data: Option<Map<String, Value>>,
}

impl SendNotificationInput {
    /// Returns the user id and notification, or the boundary error.
    pub fn validate(self) -> Result<(String, Notification), Error> {
        let (Some(user_id), Some(title), Some(body)) = (
            non_blank(self.user_id),
            non_blank(self.title),
            non_blank(self.body),
        ) else {
            return Err(Error::InvalidArgument(SINGLE_REQUIRED));
        };
        Ok((
            user_id,
            Notification {
                title,
                body,
                data: self.data.unwrap_or_default(),
            },
        ))
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub(crate) struct SendToUsersInput {
    #[serde(deserialize_with = "lenient_string_list")]
    pub user_ids: Option<Vec<String>>,
    #[serde(deserialize_with = "lenient_string")]
    pub title: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub body: Option<String>,
    #[serde(deserialize_with = "lenient_object")]
    pub data: Option<Map<String, Value>>,
}

impl SendToUsersInput {
    pub fn validate(self) -> Result<(Vec<String>, Notification), Error> {
        let user_ids = self
            .user_ids
            .filter(|ids| !ids.is_empty())
            .ok_or(Error::InvalidArgument(USER_IDS_REQUIRED))?;
        let (Some(title), Some(body)) = (non_blank(self.title), non_blank(self.body)) else {
            return Err(Error::InvalidArgument(CONTENT_REQUIRED));
        };
        Ok((
            user_ids,
            Notification {
                title,
                body,
                data: self.data.unwrap_or_default(),
            },
        ))
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|text| !text.trim().is_empty())
}

// Wrongly typed fields decode as absent so `validate` names the field at fault.

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(text) => Ok(Some(text)),
        _ => Ok(None),
    }
}

fn lenient_string_list<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let Value::Array(items) = Value::deserialize(deserializer)? else {
        return Ok(None);
    };
    Ok(items
        .into_iter()
        .map(|item| match item {
            Value::String(text) => Some(text),
            _ => None,
        })
        .collect())
}

fn lenient_object<'de, D>(deserializer: D) -> Result<Option<Map<String, Value>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Object(map) => Ok(Some(map)),
        _ => Ok(None),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SendNotificationOutput {
    success: bool,
    message_id: String,
}

#[derive(Serialize)]
struct SendToUsersOutput {
    success: bool,
    #[serde(flatten)]
    summary: BatchSummary,
}

pub(crate) async fn send_notification(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> HttpResult {
    let input: SendNotificationInput = callable_input(payload, SINGLE_REQUIRED)?;
    let (user_id, notification) = input.validate()?;

    let result = state.sender.send_one(&user_id, &notification).await;
    if !result.success {
        return Err(Error::Internal(
            result
                .error
                .unwrap_or_else(|| "Failed to send notification".to_string()),
        ));
    }
    let message_id = result
        .message_id
        .ok_or_else(|| Error::Internal("Failed to send notification".to_string()))?;

    Ok(crate::api::callable_ok(SendNotificationOutput {
        success: true,
        message_id,
    }))
}

pub(crate) async fn send_notifications_to_users(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> HttpResult {
    let input: SendToUsersInput = callable_input(payload, USER_IDS_REQUIRED)?;
    let (user_ids, notification) = input.validate()?;

    let summary = state.sender.send_many(&user_ids, &notification).await;
    Ok(crate::api::callable_ok(SendToUsersOutput {
        success: true,
        summary,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single() -> SendNotificationInput {
        SendNotificationInput {
            user_id: Some("u1".to_string()),
            title: Some("Hello".to_string()),
            body: Some("World".to_string()),
            data: None,
        }
    }

    #[test]
    fn single_requires_every_field() {
        for blank in ["", "   "] {
            let mut input = single();
            input.title = Some(blank.to_string());
            assert!(matches!(
                input.validate(),
                Err(Error::InvalidArgument(SINGLE_REQUIRED))
            ));
        }
        let mut input = single();
        input.user_id = None;
        assert!(matches!(
            input.validate(),
            Err(Error::InvalidArgument(SINGLE_REQUIRED))
        ));
    }

    #[test]
    fn single_defaults_data_to_empty() {
        let (user_id, notification) = single().validate().expect("valid input");
        assert_eq!(user_id, "u1");
        assert!(notification.data.is_empty());
    }

    #[test]
    fn wrongly_typed_field_is_named_in_error() {
        let input: SendToUsersInput = serde_json::from_value(serde_json::json!({
            "userIds": ["u1"],
            "title": 5,
            "body": "World"
        }))
        .expect("lenient decode");
        assert!(matches!(
            input.validate(),
            Err(Error::InvalidArgument(CONTENT_REQUIRED))
        ));

        let input: SendToUsersInput = serde_json::from_value(serde_json::json!({
            "userIds": ["u1", 7],
            "title": "Hello",
            "body": "World"
        }))
        .expect("lenient decode");
        assert!(matches!(
            input.validate(),
            Err(Error::InvalidArgument(USER_IDS_REQUIRED))
        ));

        let input: SendNotificationInput = serde_json::from_value(serde_json::json!({
            "userId": 42,
            "title": "Hello",
            "body": "World",
            "data": "not-a-map"
        }))
        .expect("lenient decode");
        assert!(matches!(
            input.validate(),
            Err(Error::InvalidArgument(SINGLE_REQUIRED))
        ));
    }

    #[test]
    fn bulk_checks_user_ids_before_content() {
        let input = SendToUsersInput {
            user_ids: Some(vec![]),
            title: None,
            body: None,
            data: None,
        };
        assert!(matches!(
            input.validate(),
            Err(Error::InvalidArgument(USER_IDS_REQUIRED))
        ));

        let input = SendToUsersInput {
            user_ids: Some(vec!["u1".to_string()]),
            title: Some("Hello".to_string()),
            body: None,
            data: None,
        };
        assert!(matches!(
            input.validate(),
            Err(Error::InvalidArgument(CONTENT_REQUIRED))
        ));
    }
}
