use std::{path::Path, sync::Arc};

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use thiserror::Error;

use crate::{auth::AuthError, providers::BoxFuture};

mod firestore;

pub use firestore::{FIRESTORE_DEFAULT_URL, FirestoreSettings, FirestoreUserStore};

/// Collection holding one document per user.
pub const USERS_COLLECTION: &str = "users";
/// Document field carrying the user's FCM registration token.
pub const FCM_TOKEN_FIELD: &str = "fcmToken";

const USERS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new(USERS_COLLECTION);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    RedbDatabase(#[from] redb::DatabaseError),
    #[error(transparent)]
    RedbTxn(#[from] redb::TransactionError),
    #[error(transparent)]
    RedbTable(#[from] redb::TableError),
    #[error(transparent)]
    RedbCommit(#[from] redb::CommitError),
    #[error(transparent)]
    RedbStorage(#[from] redb::StorageError),
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("document store request failed: {0}")]
    Transport(String),
    #[error("document store error (HTTP {status}): {message}")]
    Upstream { status: u16, message: String },
    #[error("Unsupported store type: {0}")]
    InvalidStoreType(String),
}

type StoreResult<T> = Result<T, StoreError>;

/// The part of a user document this service reads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct UserRecord {
    #[serde(rename = "fcmToken", default, deserialize_with = "string_or_none")]
    pub fcm_token: Option<String>,
}

/// A token of any other JSON type is treated as absent.
fn string_or_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(token) => Ok(Some(token)),
        _ => Ok(None),
    }
}

impl UserRecord {
    /// The registration token, if present and non-blank.
    pub fn push_token(&self) -> Option<&str> {
        self.fcm_token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
    }
}

/// Read-only lookup of user documents by id.
pub trait UserDirectory: Send + Sync {
    fn find_user<'a>(
        &'a self,
        user_id: &'a str,
    ) -> BoxFuture<'a, StoreResult<Option<UserRecord>>>;
}

pub type Store = Arc<dyn UserDirectory>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum StoreKind {
    Redb,
    Firestore { project_id: Option<String> },
}

impl StoreKind {
    fn from_url(store_url: Option<&str>) -> StoreResult<Self> {
        let Some(raw) = store_url.map(str::trim).filter(|raw| !raw.is_empty()) else {
            return Ok(StoreKind::Firestore { project_id: None });
        };
        let (scheme, rest) = match raw.split_once("://") {
            Some((scheme, rest)) => (scheme, Some(rest.trim_matches('/'))),
            None => (raw, None),
        };
        match scheme.to_ascii_lowercase().as_str() {
            "redb" => Ok(StoreKind::Redb),
            "firestore" => Ok(StoreKind::Firestore {
                project_id: rest
                    .filter(|project| !project.is_empty())
                    .map(str::to_string),
            }),
            other => Err(StoreError::InvalidStoreType(other.to_string())),
        }
    }
}

/// Open the user directory selected by `store_url`.
///
/// Empty or `firestore` reads Cloud Firestore in the key's project,
/// `firestore://<project>` names the project, and `redb` opens the embedded
/// store under `data_path`.
pub fn new_store<P: AsRef<Path>>(
    data_path: P,
    store_url: Option<&str>,
    firestore: FirestoreSettings<'_>,
) -> StoreResult<Store> {
    match StoreKind::from_url(store_url)? {
        StoreKind::Redb => Ok(Arc::new(RedbUserStore::new(data_path)?)),
        StoreKind::Firestore { project_id } => {
            let store = FirestoreUserStore::new(firestore, project_id.as_deref())?;
            Ok(Arc::new(store))
        }
    }
}

/// Embedded user directory for local development.
#[derive(Debug, Clone)]
pub struct RedbUserStore {
    db: Arc<Database>,
}

impl RedbUserStore {
    pub fn new<P: AsRef<Path>>(data_path: P) -> StoreResult<Self> {
        let db_path = data_path.as_ref().join("users.redb");
        let db = Database::create(db_path)?;
        let txn = db.begin_write()?;
        txn.open_table(USERS_TABLE)?;
        txn.commit()?;

        Ok(RedbUserStore { db: db.into() })
    }

    /// Insert or replace the document stored for `user_id`.
    pub fn put_user(&self, user_id: &str, document: &serde_json::Value) -> StoreResult<()> {
        let encoded = serde_json::to_vec(document)?;
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(USERS_TABLE)?;
            table.insert(user_id, encoded.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn get_user(&self, user_id: &str) -> StoreResult<Option<UserRecord>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(USERS_TABLE)?;
        match table.get(user_id)? {
            Some(raw) => Ok(Some(serde_json::from_slice(raw.value())?)),
            None => Ok(None),
        }
    }
}

impl UserDirectory for RedbUserStore {
    fn find_user<'a>(
        &'a self,
        user_id: &'a str,
    ) -> BoxFuture<'a, StoreResult<Option<UserRecord>>> {
        Box::pin(async move { self.get_user(user_id) })
    }
}
