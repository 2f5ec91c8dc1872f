mod handlers;
pub mod router;

use std::borrow::Cow;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use thiserror::Error;

pub(crate) fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    (status, Json(body)).into_response()
}

pub(crate) fn err(status: StatusCode, msg: impl Into<Cow<'static, str>>) -> Response {
    json_response(status, StatusResponse::err(msg))
}

/// Successful callable response: `{"result": ...}`.
pub(crate) fn callable_ok<T: Serialize>(result: T) -> Response {
    json_response(StatusCode::OK, CallableResult { result })
}

/// Errors raised at the request boundary.
///
/// Rendered in the callable error envelope
/// `{"error": {"status": "INVALID_ARGUMENT", "message": "..."}}`.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or missing caller input.
    #[error("{0}")]
    InvalidArgument(&'static str),

    /// Authentication failed or not authorized.
    #[error("invalid credentials or unauthorized")]
    Unauthorized,

    /// The operation failed after the input was accepted.
    #[error("{0}")]
    Internal(String),

    /// Server is overloaded and rejecting work.
    #[error("server is too busy")]
    TooBusy,
}

impl Error {
    fn code(&self) -> CallableCode {
        match self {
            Error::InvalidArgument(_) => CallableCode::InvalidArgument,
            Error::Unauthorized => CallableCode::Unauthenticated,
            Error::Internal(_) => CallableCode::Internal,
            Error::TooBusy => CallableCode::Unavailable,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let code = self.code();
        let message = match self {
            Error::Unauthorized => "authentication failed".to_string(),
            Error::TooBusy => "server is busy, please try again later".to_string(),
            other => other.to_string(),
        };
        json_response(
            code.http_status(),
            CallableError {
                error: CallableErrorBody {
                    status: code.as_str(),
                    message,
                },
            },
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallableCode {
    InvalidArgument,
    Unauthenticated,
    Unavailable,
    Internal,
}

impl CallableCode {
    fn as_str(self) -> &'static str {
        match self {
            CallableCode::InvalidArgument => "INVALID_ARGUMENT",
            CallableCode::Unauthenticated => "UNAUTHENTICATED",
            CallableCode::Unavailable => "UNAVAILABLE",
            CallableCode::Internal => "INTERNAL",
        }
    }

    fn http_status(self) -> StatusCode {
        match self {
            CallableCode::InvalidArgument => StatusCode::BAD_REQUEST,
            CallableCode::Unauthenticated => StatusCode::UNAUTHORIZED,
            CallableCode::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            CallableCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub type HttpResult = Result<Response, Error>;

/// Unwrap a callable request body `{"data": ...}` into `T`.
///
/// A body that is not such an envelope is a bad request; a `data` member that
/// does not fit `T` is reported with `invalid`.
pub(crate) fn callable_input<T: DeserializeOwned>(
    payload: Result<Json<Value>, JsonRejection>,
    invalid: &'static str,
) -> Result<T, Error> {
    let Json(body) = payload.map_err(|_| Error::InvalidArgument("Bad Request"))?;
    let envelope: CallableRequest =
        serde_json::from_value(body).map_err(|_| Error::InvalidArgument("Bad Request"))?;
    let data = match envelope.data {
        Value::Null => Value::Object(Default::default()),
        data => data,
    };
    serde_json::from_value(data).map_err(|_| Error::InvalidArgument(invalid))
}

#[derive(Deserialize)]
struct CallableRequest {
    data: Value,
}

#[derive(Serialize)]
struct CallableResult<T> {
    result: T,
}

#[derive(Serialize)]
struct CallableError {
    error: CallableErrorBody,
}

#[derive(Serialize)]
struct CallableErrorBody {
    status: &'static str,
    message: String,
}

#[derive(Serialize)]
pub(super) struct StatusResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Cow<'static, str>>,
}

impl StatusResponse {
    #[inline]
    pub fn err(msg: impl Into<Cow<'static, str>>) -> Self {
        Self {
            success: false,
            error: Some(msg.into()),
        }
    }
}
