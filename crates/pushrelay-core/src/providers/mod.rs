use std::{future::Future, pin::Pin};

use thiserror::Error;

use crate::auth::AuthError;

pub mod fcm;
pub mod fcm_client;

pub use fcm::PushMessage;
pub use fcm_client::FcmService;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Failure to hand a message to the push provider.
///
/// `Display` yields the provider's own message so it can be reported to
/// callers verbatim.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("{message}")]
    Upstream {
        status: u16,
        message: String,
        invalid_token: bool,
    },

    #[error("{0}")]
    Transport(String),

    #[error("provider response missing message name")]
    MissingMessageId,
}

impl DeliveryError {
    /// Whether the provider reported the registration token as unusable.
    pub fn is_invalid_token(&self) -> bool {
        matches!(
            self,
            DeliveryError::Upstream {
                invalid_token: true,
                ..
            }
        )
    }
}

pub trait FcmClient: Send + Sync {
    /// Submit one message; resolves to the provider-assigned message name.
    fn send<'a>(
        &'a self,
        message: &'a PushMessage,
    ) -> BoxFuture<'a, Result<String, DeliveryError>>;
}
