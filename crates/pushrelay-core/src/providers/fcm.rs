use std::collections::HashMap;

use serde::Serialize;
use serde_json::{Map, Value};

/// Data key the Flutter client uses to route notification taps.
pub const CLICK_ACTION_KEY: &str = "click_action";
pub const CLICK_ACTION_VALUE: &str = "FLUTTER_NOTIFICATION_CLICK";

/// A fully resolved FCM message addressed to one registration token.
#[derive(Debug, Clone)]
pub struct PushMessage {
    token: String,
    title: String,
    body: String,
    data: HashMap<String, String>,
}

impl PushMessage {
    pub fn new(
        token: impl Into<String>,
        title: &str,
        body: &str,
        data: &Map<String, Value>,
    ) -> Self {
        Self {
            token: token.into(),
            title: title.to_string(),
            body: body.to_string(),
            data: build_data(data),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn data(&self) -> &HashMap<String, String> {
        &self.data
    }

    /// Request body for `projects/{id}/messages:send`.
    pub(crate) fn to_request(&self) -> FcmRequest<'_> {
        FcmRequest {
            message: FcmMessage {
                token: &self.token,
                notification: FcmNotification {
                    title: &self.title,
                    body: &self.body,
                },
                data: &self.data,
                android: FcmAndroidConfig { priority: "high" },
                apns: FcmApnsConfig {
                    headers: ApnsHeaders {
                        apns_priority: "10",
                    },
                    payload: ApnsPayload {
                        aps: Aps { sound: "default" },
                    },
                },
            },
        }
    }
}

/// FCM data payloads only carry strings.
fn build_data(data: &Map<String, Value>) -> HashMap<String, String> {
    let mut out: HashMap<String, String> = data
        .iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            (key.clone(), value)
        })
        .collect();
    out.insert(CLICK_ACTION_KEY.to_string(), CLICK_ACTION_VALUE.to_string());
    out
}

#[derive(Serialize)]
pub(crate) struct FcmRequest<'a> {
    message: FcmMessage<'a>,
}

#[derive(Serialize)]
struct FcmMessage<'a> {
    token: &'a str,
    notification: FcmNotification<'a>,
    data: &'a HashMap<String, String>,
    android: FcmAndroidConfig,
    apns: FcmApnsConfig,
}

#[derive(Serialize)]
struct FcmNotification<'a> {
    title: &'a str,
    body: &'a str,
}

#[derive(Serialize)]
struct FcmAndroidConfig {
    priority: &'static str,
}

#[derive(Serialize)]
struct FcmApnsConfig {
    headers: ApnsHeaders,
    payload: ApnsPayload,
}

#[derive(Serialize)]
struct ApnsHeaders {
    #[serde(rename = "apns-priority")]
    apns_priority: &'static str,
}

#[derive(Serialize)]
struct ApnsPayload {
    aps: Aps,
}

#[derive(Serialize)]
struct Aps {
    sound: &'static str,
}
