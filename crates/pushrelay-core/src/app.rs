use std::sync::Arc;

use axum::Router;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

use crate::{
    api::{Error, router::build_router},
    auth::{AccessTokenCache, Clock},
    config::CoreArgs,
    notify::NotificationSender,
};

#[derive(Clone)]
pub(crate) enum AuthMode {
    Disabled,
    SharedToken(Arc<str>),
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub auth: AuthMode,
    pub limiter: Option<Arc<RequestLimiter>>,
    pub sender: Arc<NotificationSender>,
    /// Messaging-scoped cache served by `/token`.
    pub tokens: Arc<AccessTokenCache>,
    pub clock: Arc<dyn Clock>,
}

pub fn build_app(
    args: &CoreArgs,
    sender: Arc<NotificationSender>,
    tokens: Arc<AccessTokenCache>,
    clock: Arc<dyn Clock>,
) -> Router {
    let auth = match args.token.as_deref().map(str::trim) {
        None | Some("") => AuthMode::Disabled,
        Some(token) => AuthMode::SharedToken(Arc::from(token)),
    };

    let max_concurrent = args.max_concurrent;
    let limiter = if max_concurrent == 0 {
        None
    } else {
        Some(Arc::new(RequestLimiter::new(max_concurrent, max_concurrent)))
    };

    build_router(AppState {
        auth,
        limiter,
        sender,
        tokens,
        clock,
    })
}

#[derive(Debug)]
pub(crate) struct RequestLimiter {
    in_flight: Arc<Semaphore>,
    queue_slots: Arc<Semaphore>,
    max_queue: usize,
}

impl RequestLimiter {
    /// Create a limiter with in-flight and queue caps.
    ///
    /// `max_in_flight` limits active requests; `max_queue` limits waiters.
    pub fn new(max_in_flight: usize, max_queue: usize) -> Self {
        RequestLimiter {
            in_flight: Arc::new(Semaphore::new(max_in_flight)),
            queue_slots: Arc::new(Semaphore::new(max_queue)),
            max_queue,
        }
    }

    /// Acquire a request permit or return `Error::TooBusy`.
    pub async fn acquire(&self) -> Result<RequestPermit, Error> {
        if self.max_queue == 0 {
            return match self.in_flight.clone().try_acquire_owned() {
                Ok(permit) => Ok(RequestPermit { _in_flight: permit }),
                Err(TryAcquireError::Closed) => {
                    Err(Error::Internal("request limiter closed".to_string()))
                }
                Err(TryAcquireError::NoPermits) => Err(Error::TooBusy),
            };
        }

        match self.queue_slots.clone().try_acquire_owned() {
            Ok(queue_permit) => {
                let in_flight = self
                    .in_flight
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|_| Error::Internal("request limiter closed".to_string()))?;
                drop(queue_permit);
                Ok(RequestPermit {
                    _in_flight: in_flight,
                })
            }
            Err(TryAcquireError::Closed) => {
                Err(Error::Internal("request limiter closed".to_string()))
            }
            Err(TryAcquireError::NoPermits) => Err(Error::TooBusy),
        }
    }
}

pub(crate) struct RequestPermit {
    _in_flight: OwnedSemaphorePermit,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn limiter_rejects_when_queue_is_full() {
        let limiter = RequestLimiter::new(1, 0);
        let held = limiter.acquire().await.expect("first permit");
        assert!(matches!(limiter.acquire().await, Err(Error::TooBusy)));
        drop(held);
        assert!(limiter.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn queued_request_waits_for_permit() {
        let limiter = Arc::new(RequestLimiter::new(1, 1));
        let held = limiter.acquire().await.expect("first permit");

        let waiter = {
            let limiter = Arc::clone(&limiter);
            tokio::spawn(async move { limiter.acquire().await.map(|_| ()) })
        };
        tokio::task::yield_now().await;
        drop(held);

        assert!(waiter.await.expect("join").is_ok());
    }
}
