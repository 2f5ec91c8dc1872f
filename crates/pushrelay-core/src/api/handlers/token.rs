use axum::{
    extract::State,
    http::{HeaderValue, StatusCode, header},
    response::Response,
};
use serde::Serialize;

use crate::app::AppState;

/// Lifetime advertised to clients, in seconds.
const ADVERTISED_EXPIRES_IN: u64 = 3600;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AccessTokenResponse {
    success: bool,
    token: String,
    expires_in: u64,
    timestamp: i64,
}

#[derive(Debug, Serialize)]
struct MethodNotAllowed {
    error: &'static str,
}

pub(crate) async fn access_token(State(state): State<AppState>) -> Response {
    match state.tokens.access_token().await {
        Ok(token) => crate::api::json_response(
            StatusCode::OK,
            AccessTokenResponse {
                success: true,
                token: token.as_ref().to_string(),
                expires_in: ADVERTISED_EXPIRES_IN,
                timestamp: state.clock.now().timestamp_millis(),
            },
        ),
        Err(err) => {
            tracing::error!(error = %err, "failed to get access token");
            crate::api::err(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

pub(crate) async fn preflight() -> StatusCode {
    StatusCode::OK
}

pub(crate) async fn method_not_allowed() -> Response {
    crate::api::json_response(
        StatusCode::METHOD_NOT_ALLOWED,
        MethodNotAllowed {
            error: "Method not allowed",
        },
    )
}

/// Browsers poll this endpoint directly, so every answer allows any origin.
pub(crate) async fn with_cors_headers(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type"),
    );
    response
}
