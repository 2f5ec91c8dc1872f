use std::{collections::HashMap, sync::Arc, time::Duration};

use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;

use crate::{
    auth::{AccessTokenCache, AuthError},
    credentials::Credentials,
    providers::BoxFuture,
    storage::{FCM_TOKEN_FIELD, StoreError, USERS_COLLECTION, UserDirectory, UserRecord},
};

pub const FIRESTORE_DEFAULT_URL: &str = "https://firestore.googleapis.com";
const FIRESTORE_TIMEOUT: Duration = Duration::from_secs(60);

pub struct FirestoreSettings<'a> {
    pub base_url: &'a str,
    pub credentials: &'a Credentials,
    /// Cache minting tokens with the datastore scope.
    pub tokens: Arc<AccessTokenCache>,
}

/// User directory backed by the Firestore REST API.
pub struct FirestoreUserStore {
    client: Client,
    base_url: Url,
    project_id: Result<Arc<str>, AuthError>,
    tokens: Arc<AccessTokenCache>,
}

impl FirestoreUserStore {
    pub fn new(
        settings: FirestoreSettings<'_>,
        project_id: Option<&str>,
    ) -> Result<Self, StoreError> {
        let client = Client::builder()
            .user_agent(concat!("pushrelay/", env!("CARGO_PKG_VERSION")))
            .timeout(FIRESTORE_TIMEOUT)
            .build()
            .map_err(|err| StoreError::Transport(err.to_string()))?;
        let base_url = Url::parse(settings.base_url).map_err(|err| {
            StoreError::InvalidStoreType(format!("firestore url {}: {err}", settings.base_url))
        })?;
        let project_id = match project_id {
            Some(project_id) => Ok(Arc::from(project_id)),
            None => settings.credentials.project_id(),
        };

        Ok(Self {
            client,
            base_url,
            project_id,
            tokens: settings.tokens,
        })
    }

    fn document_url(&self, project_id: &str, user_id: &str) -> Result<Url, StoreError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                StoreError::InvalidStoreType("firestore url cannot be a base".to_string())
            })?
            .pop_if_empty()
            .extend([
                "v1",
                "projects",
                project_id,
                "databases",
                "(default)",
                "documents",
                USERS_COLLECTION,
                user_id,
            ]);
        Ok(url)
    }

    pub async fn get_user(&self, user_id: &str) -> Result<Option<UserRecord>, StoreError> {
        let project_id = self.project_id.clone()?;
        let url = self.document_url(&project_id, user_id)?;
        let access_token = self.tokens.access_token().await?;

        let response = self
            .client
            .get(url)
            .bearer_auth(access_token.as_ref())
            .send()
            .await
            .map_err(|err| StoreError::Transport(err.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            let message = if body.trim().is_empty() {
                format!("Firestore error, status {}", status.as_u16())
            } else {
                body
            };
            return Err(StoreError::Upstream {
                status: status.as_u16(),
                message,
            });
        }

        let document: FirestoreDocument = serde_json::from_str(&body)?;
        Ok(Some(document.into_record()))
    }
}

impl UserDirectory for FirestoreUserStore {
    fn find_user<'a>(
        &'a self,
        user_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<UserRecord>, StoreError>> {
        Box::pin(async move { self.get_user(user_id).await })
    }
}

/// Firestore wraps every field value in a typed object such as
/// `{"stringValue": "..."}`.
#[derive(Deserialize)]
struct FirestoreDocument {
    #[serde(default)]
    fields: HashMap<String, Value>,
}

impl FirestoreDocument {
    fn into_record(self) -> UserRecord {
        let fcm_token = self
            .fields
            .get(FCM_TOKEN_FIELD)
            .and_then(|value| value.get("stringValue"))
            .and_then(Value::as_str)
            .map(str::to_string);
        UserRecord { fcm_token }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{header, method, path},
    };

    use super::*;
    use crate::auth::{
        Clock, DATASTORE_SCOPE, TokenMinter,
        testing::{CountingMinter, ManualClock},
    };

    fn store(server: &MockServer, project_id: Option<&str>) -> FirestoreUserStore {
        let credentials = Credentials::from_env_value(None);
        let tokens = Arc::new(AccessTokenCache::new(
            Arc::new(CountingMinter::new()) as Arc<dyn TokenMinter>,
            Arc::new(ManualClock::new()) as Arc<dyn Clock>,
            &[DATASTORE_SCOPE],
        ));
        let uri = server.uri();
        FirestoreUserStore::new(
            FirestoreSettings {
                base_url: &uri,
                credentials: &credentials,
                tokens,
            },
            project_id,
        )
        .expect("store builds")
    }

    #[tokio::test]
    async fn reads_token_from_document_fields() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(
                "/v1/projects/my-app/databases/(default)/documents/users/alice",
            ))
            .and(header("authorization", "Bearer token-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "projects/my-app/databases/(default)/documents/users/alice",
                "fields": {
                    "displayName": {"stringValue": "Alice"},
                    "fcmToken": {"stringValue": "tok-alice"}
                }
            })))
            .mount(&server)
            .await;

        let record = store(&server, Some("my-app"))
            .get_user("alice")
            .await
            .unwrap()
            .expect("document exists");
        assert_eq!(record.push_token(), Some("tok-alice"));
    }

    #[tokio::test]
    async fn missing_document_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error": {"code": 404, "status": "NOT_FOUND"}
            })))
            .mount(&server)
            .await;

        let record = store(&server, Some("my-app")).get_user("ghost").await.unwrap();
        assert!(record.is_none());
    }

    #[tokio::test]
    async fn document_without_token_field() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "fields": {"displayName": {"stringValue": "Bob"}}
            })))
            .mount(&server)
            .await;

        let record = store(&server, Some("my-app"))
            .get_user("bob")
            .await
            .unwrap()
            .expect("document exists");
        assert_eq!(record.push_token(), None);
    }

    #[tokio::test]
    async fn project_falls_back_to_credentials() {
        let server = MockServer::start().await;
        let err = store(&server, None).get_user("alice").await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::Auth(AuthError::MissingConfiguration(_))
        ));
    }

    #[tokio::test]
    async fn server_errors_surface() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = store(&server, Some("my-app")).get_user("alice").await.unwrap_err();
        assert!(matches!(err, StoreError::Upstream { status: 503, .. }));
    }
}
