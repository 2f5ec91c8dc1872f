use std::sync::Arc;

use serde::Deserialize;

use crate::auth::AuthError;

/// Environment variable holding the JSON-encoded service-account key.
pub const SERVICE_ACCOUNT_ENV: &str = "FIREBASE_SERVICE_ACCOUNT_KEY";

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Google service-account key, as downloaded from the Firebase console.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub project_id: String,
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub private_key_id: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

impl std::fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("project_id", &self.project_id)
            .field("client_email", &self.client_email)
            .field("private_key_id", &self.private_key_id)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

/// Result of loading the service-account key at startup.
///
/// A missing or malformed key does not stop the process; the reason is kept
/// and reported every time a token is requested.
#[derive(Debug, Clone)]
pub struct Credentials {
    key: Result<Arc<ServiceAccountKey>, AuthError>,
}

impl Credentials {
    /// Parse the raw value of [`SERVICE_ACCOUNT_ENV`].
    pub fn from_env_value(raw: Option<&str>) -> Self {
        let key = match raw.map(str::trim).filter(|value| !value.is_empty()) {
            None => Err(AuthError::MissingConfiguration(SERVICE_ACCOUNT_ENV)),
            Some(raw) => parse_key(raw).map(Arc::new),
        };
        Self { key }
    }

    pub fn from_key(key: ServiceAccountKey) -> Self {
        Self {
            key: Ok(Arc::new(key)),
        }
    }

    pub fn key(&self) -> Result<&Arc<ServiceAccountKey>, AuthError> {
        self.key.as_ref().map_err(Clone::clone)
    }

    pub fn project_id(&self) -> Result<Arc<str>, AuthError> {
        self.key().map(|key| Arc::from(key.project_id.as_str()))
    }
}

fn parse_key(raw: &str) -> Result<ServiceAccountKey, AuthError> {
    let key: ServiceAccountKey = serde_json::from_str(raw).map_err(|err| {
        AuthError::InvalidKey(format!("{SERVICE_ACCOUNT_ENV} is not a valid key: {err}"))
    })?;
    if key.client_email.trim().is_empty() {
        return Err(AuthError::InvalidKey("client_email must not be empty".to_string()));
    }
    if key.private_key.trim().is_empty() {
        return Err(AuthError::InvalidKey("private_key must not be empty".to_string()));
    }
    Ok(key)
}
