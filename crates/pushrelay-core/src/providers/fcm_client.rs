use std::{sync::Arc, time::Duration};

use reqwest::Client;
use serde::Deserialize;

use crate::{
    auth::{AccessTokenCache, AuthError},
    credentials::Credentials,
    providers::{BoxFuture, DeliveryError, FcmClient, PushMessage},
};

pub const FCM_DEFAULT_URL: &str = "https://fcm.googleapis.com";
const FCM_TIMEOUT: Duration = Duration::from_secs(60);

/// FCM HTTP v1 sender.
pub struct FcmService {
    client: Client,
    tokens: Arc<AccessTokenCache>,
    project_id: Result<Arc<str>, AuthError>,
    base_url: Arc<str>,
}

impl FcmService {
    pub fn new(
        tokens: Arc<AccessTokenCache>,
        credentials: &Credentials,
        base_url: &str,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(concat!("pushrelay/", env!("CARGO_PKG_VERSION")))
            .timeout(FCM_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            tokens,
            project_id: credentials.project_id(),
            base_url: Arc::from(base_url.trim_end_matches('/')),
        })
    }

    pub async fn send(&self, message: &PushMessage) -> Result<String, DeliveryError> {
        let project_id = self.project_id.clone()?;
        let access_token = self.tokens.access_token().await?;

        let endpoint = format!(
            "{}/v1/projects/{}/messages:send",
            self.base_url, project_id
        );

        let response = self
            .client
            .post(&endpoint)
            .bearer_auth(access_token.as_ref())
            .json(&message.to_request())
            .send()
            .await
            .map_err(|err| DeliveryError::Transport(err.to_string()))?;

        let status = response.status();
        let status_code = status.as_u16();
        let body_text = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(DeliveryError::Upstream {
                status: status_code,
                message: fcm_error_message(status_code, &body_text),
                invalid_token: is_fcm_token_invalid(status_code, &body_text),
            });
        }

        let sent: SendResponse = serde_json::from_str(&body_text)
            .map_err(|err| DeliveryError::Transport(err.to_string()))?;
        sent.name
            .filter(|name| !name.is_empty())
            .ok_or(DeliveryError::MissingMessageId)
    }
}

impl FcmClient for FcmService {
    fn send<'a>(
        &'a self,
        message: &'a PushMessage,
    ) -> BoxFuture<'a, Result<String, DeliveryError>> {
        Box::pin(async move { self.send(message).await })
    }
}

#[derive(Deserialize)]
struct SendResponse {
    name: Option<String>,
}

fn fcm_error_message(status_code: u16, body_text: &str) -> String {
    let from_json = serde_json::from_str::<serde_json::Value>(body_text)
        .ok()
        .and_then(|value| {
            value
                .get("error")?
                .get("message")?
                .as_str()
                .map(str::to_string)
        });
    match from_json {
        Some(message) => message,
        None if body_text.trim().is_empty() => format!("FCM error, status {status_code}"),
        None => body_text.to_string(),
    }
}

fn is_fcm_token_invalid(status_code: u16, body_text: &str) -> bool {
    if status_code == 404 {
        return true;
    }
    let value: serde_json::Value = match serde_json::from_str(body_text) {
        Ok(value) => value,
        Err(_) => return mentions_bad_registration(body_text),
    };
    let Some(error) = value.get("error") else {
        return false;
    };
    if error
        .get("status")
        .and_then(|status| status.as_str())
        .is_some_and(|status| status.eq_ignore_ascii_case("NOT_FOUND"))
    {
        return true;
    }
    if let Some(details) = error.get("details").and_then(|details| details.as_array())
        && details.iter().any(|detail| {
            detail
                .get("errorCode")
                .and_then(|code| code.as_str())
                .is_some_and(|code| code.eq_ignore_ascii_case("UNREGISTERED"))
        })
    {
        return true;
    }
    error
        .get("message")
        .and_then(|msg| msg.as_str())
        .is_some_and(mentions_bad_registration)
}

fn mentions_bad_registration(text: &str) -> bool {
    let haystack = text.to_ascii_lowercase();
    haystack.contains("unregistered")
        || haystack.contains("not registered")
        || haystack.contains("invalid registration token")
        || (haystack.contains("registration token") && haystack.contains("invalid"))
}
