use std::sync::Arc;

use arc_swap::ArcSwapOption;
use chrono::{DateTime, TimeDelta, Utc};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::providers::BoxFuture;

pub const FCM_SCOPE: &str = "https://www.googleapis.com/auth/firebase.messaging";
pub const DATASTORE_SCOPE: &str = "https://www.googleapis.com/auth/datastore";

/// Upper bound on how long a minted token is reused, kept below the
/// provider's one hour validity.
const TOKEN_LIFETIME_SECS: i64 = 55 * 60;
/// A cached token is not handed out once it is this close to expiry.
const REFRESH_SKEW_SECS: i64 = 5 * 60;

#[derive(Debug, Clone, Error)]
pub enum AuthError {
    #[error("{0} environment variable is not set")]
    MissingConfiguration(&'static str),

    #[error("invalid service account key: {0}")]
    InvalidKey(String),

    #[error("failed to sign token request: {0}")]
    Signing(String),

    #[error("token request failed: {0}")]
    Transport(String),

    #[error("token endpoint rejected the request (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Failed to get access token")]
    EmptyToken,
}

#[derive(Debug, Clone)]
pub struct MintedToken {
    pub token: String,
    /// Validity reported by the identity provider, in seconds.
    pub expires_in: u64,
}

/// Exchanges the service-account credential for a bearer token.
pub trait TokenMinter: Send + Sync {
    fn mint<'a>(
        &'a self,
        scopes: &'a [&'static str],
    ) -> BoxFuture<'a, Result<MintedToken, AuthError>>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone)]
pub struct CachedToken {
    pub value: Arc<str>,
    pub expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn usable_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at - TimeDelta::seconds(REFRESH_SKEW_SECS)
    }
}

/// Holds at most one bearer token for a fixed scope set.
///
/// Reads are lock-free. Refreshes are single-flight: concurrent misses queue
/// on `refresh` and the waiters reuse whatever the first caller stored.
pub struct AccessTokenCache {
    minter: Arc<dyn TokenMinter>,
    clock: Arc<dyn Clock>,
    scopes: &'static [&'static str],
    state: ArcSwapOption<CachedToken>,
    refresh: Mutex<()>,
}

impl AccessTokenCache {
    pub fn new(
        minter: Arc<dyn TokenMinter>,
        clock: Arc<dyn Clock>,
        scopes: &'static [&'static str],
    ) -> Self {
        Self {
            minter,
            clock,
            scopes,
            state: ArcSwapOption::empty(),
            refresh: Mutex::new(()),
        }
    }

    pub async fn access_token(&self) -> Result<Arc<str>, AuthError> {
        if let Some(token) = self.fresh() {
            return Ok(token);
        }

        let _refresh = self.refresh.lock().await;
        if let Some(token) = self.fresh() {
            return Ok(token);
        }

        let minted = self.minter.mint(self.scopes).await.inspect_err(|err| {
            tracing::error!(error = %err, scopes = ?self.scopes, "access token refresh failed");
        })?;
        if minted.token.is_empty() {
            return Err(AuthError::EmptyToken);
        }

        let lifetime = i64::try_from(minted.expires_in)
            .unwrap_or(i64::MAX)
            .min(TOKEN_LIFETIME_SECS);
        let value: Arc<str> = Arc::from(minted.token.into_boxed_str());
        let expires_at = self.clock.now() + TimeDelta::seconds(lifetime);
        self.state.store(Some(Arc::new(CachedToken {
            value: Arc::clone(&value),
            expires_at,
        })));
        tracing::debug!(scopes = ?self.scopes, %expires_at, "access token refreshed");
        Ok(value)
    }

    pub fn cached(&self) -> Option<Arc<CachedToken>> {
        self.state.load_full()
    }

    fn fresh(&self) -> Option<Arc<str>> {
        let cached = self.state.load();
        cached
            .as_ref()
            .filter(|token| token.usable_at(self.clock.now()))
            .map(|token| Arc::clone(&token.value))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    pub(crate) struct ManualClock {
        now: Mutex<DateTime<Utc>>,
    }

    impl ManualClock {
        pub(crate) fn new() -> Self {
            let start = DateTime::from_timestamp(1_700_000_000, 0).expect("valid timestamp");
            Self {
                now: Mutex::new(start),
            }
        }

        pub(crate) fn advance(&self, delta: TimeDelta) {
            let mut now = self.now.lock().expect("clock lock");
            *now += delta;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.now.lock().expect("clock lock")
        }
    }

    /// Hands out `token-1`, `token-2`, ... or a fixed error.
    pub(crate) struct CountingMinter {
        pub(crate) calls: AtomicUsize,
        pub(crate) failure: Mutex<Option<AuthError>>,
        pub(crate) expires_in: u64,
    }

    impl CountingMinter {
        pub(crate) fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                failure: Mutex::new(None),
                expires_in: 3600,
            }
        }

        pub(crate) fn failing(err: AuthError) -> Self {
            let minter = Self::new();
            minter.fail_with(Some(err));
            minter
        }

        pub(crate) fn fail_with(&self, err: Option<AuthError>) {
            *self.failure.lock().expect("failure lock") = err;
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl TokenMinter for CountingMinter {
        fn mint<'a>(
            &'a self,
            _scopes: &'a [&'static str],
        ) -> BoxFuture<'a, Result<MintedToken, AuthError>> {
            Box::pin(async move {
                let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
                tokio::task::yield_now().await;
                if let Some(err) = self.failure.lock().expect("failure lock").clone() {
                    return Err(err);
                }
                Ok(MintedToken {
                    token: format!("token-{call}"),
                    expires_in: self.expires_in,
                })
            })
        }
    }
}
