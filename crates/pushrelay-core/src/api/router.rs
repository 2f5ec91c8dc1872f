use std::time::Instant;

use axum::body::{Body, Bytes, to_bytes};
use axum::http::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, COOKIE, SET_COOKIE};
use axum::http::{Method, StatusCode};
use axum::{
    Router,
    extract::{DefaultBodyLimit, Request, State},
    middleware::{Next, from_fn_with_state, map_response},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::Value;
use subtle::ConstantTimeEq;

use crate::{
    api::handlers::{
        notify::{send_notification, send_notifications_to_users},
        token::{access_token, method_not_allowed, preflight, with_cors_headers},
    },
    api::{Error, HttpResult},
    app::{AppState, AuthMode},
};

const MAX_BODY_BYTES: usize = 256 * 1024;
const MAX_LOG_BODY_BYTES: usize = 8 * 1024;

pub(crate) fn build_router(state: AppState) -> Router {
    let token_route = get(access_token)
        .head(method_not_allowed)
        .options(preflight)
        .fallback(method_not_allowed)
        .layer(map_response(with_cors_headers));

    Router::new()
        .route("/sendNotification", post(send_notification))
        .route(
            "/sendNotificationsToUsers",
            post(send_notifications_to_users),
        )
        .route("/token", token_route)
        .layer(from_fn_with_state(state.clone(), middleware))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
        .fallback(async || (StatusCode::NOT_FOUND, "404 Not Found").into_response())
}

fn extract_bearer_token(req: &Request) -> Result<&str, Error> {
    let header = req
        .headers()
        .get(AUTHORIZATION)
        .ok_or(Error::Unauthorized)?;

    let raw = header.to_str().map_err(|_| Error::Unauthorized)?;
    let mut it = raw.split_whitespace();

    let scheme = it.next().unwrap_or("");
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(Error::Unauthorized);
    }

    let token = it.next().ok_or(Error::Unauthorized)?;

    // Reject extra segments after the token.
    if it.next().is_some() {
        return Err(Error::Unauthorized);
    }

    const MAX_TOKEN_LEN: usize = 4096;
    if token.is_empty() || token.len() > MAX_TOKEN_LEN {
        return Err(Error::Unauthorized);
    }

    Ok(token)
}

fn constant_time_equals(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

async fn middleware(State(state): State<AppState>, req: Request, next: Next) -> HttpResult {
    let start = Instant::now();
    let (parts, body) = req.into_parts();
    let method = parts.method.clone();
    let uri = parts.uri.clone();

    let body_bytes = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(_) => {
            let resp = crate::api::err(StatusCode::PAYLOAD_TOO_LARGE, "request body too large");
            let status = resp.status().as_u16();
            tracing::warn!(%method, %uri, status, "request body unreadable");
            return Ok(resp);
        }
    };

    tracing::info!(%method, %uri, version = ?parts.version, body_len = body_bytes.len(), "request");
    if tracing::enabled!(tracing::Level::DEBUG) {
        let headers = format_headers(&parts.headers);
        let body = format_body_for_log(&parts.headers, &body_bytes).unwrap_or_default();
        tracing::debug!(%headers, %body, "request detail");
    }

    let req = Request::from_parts(parts, Body::from(body_bytes));

    let _permit = match &state.limiter {
        Some(limiter) => match limiter.acquire().await {
            Ok(permit) => Some(permit),
            Err(err) => {
                let resp = err.into_response();
                log_response(start, &method, &uri, &resp, None);
                return Ok(resp);
            }
        },
        None => None,
    };

    if let AuthMode::SharedToken(token) = &state.auth
        && method != Method::OPTIONS
    {
        let authorized = extract_bearer_token(&req)
            .map(|req_token| constant_time_equals(req_token, token))
            .unwrap_or(false);
        if !authorized {
            let resp = Error::Unauthorized.into_response();
            log_response(start, &method, &uri, &resp, None);
            return Ok(resp);
        }
    }

    let resp = next.run(req).await;

    let content_len = resp
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<usize>().ok());

    if let Some(size) = content_len
        && size <= MAX_LOG_BODY_BYTES
        && tracing::enabled!(tracing::Level::DEBUG)
    {
        let (parts, body) = resp.into_parts();
        let resp_bytes = to_bytes(body, MAX_LOG_BODY_BYTES)
            .await
            .unwrap_or_else(|_| Bytes::new());
        let resp = Response::from_parts(parts, Body::from(resp_bytes.clone()));
        let logged = format_body_for_log(resp.headers(), &resp_bytes);
        log_response(start, &method, &uri, &resp, logged);
        return Ok(resp);
    }

    log_response(start, &method, &uri, &resp, None);
    Ok(resp)
}

fn log_response(
    start: Instant,
    method: &Method,
    uri: &axum::http::Uri,
    resp: &Response,
    body: Option<String>,
) {
    let duration_ms = start.elapsed().as_millis() as u64;
    let status = resp.status();
    if status.is_server_error() {
        tracing::warn!(%method, %uri, status = status.as_u16(), duration_ms, "response");
    } else {
        tracing::info!(%method, %uri, status = status.as_u16(), duration_ms, "response");
    }
    if let Some(body) = body {
        let headers = format_headers(resp.headers());
        tracing::debug!(%headers, %body, "response detail");
    }
}

fn format_headers(headers: &axum::http::HeaderMap) -> String {
    let mut pairs = Vec::new();
    for (name, value) in headers.iter() {
        let value = if is_sensitive_header(name) {
            "<redacted>".to_string()
        } else {
            value.to_str().unwrap_or("<binary>").to_string()
        };
        pairs.push(format!("{name}: {value}"));
    }
    pairs.join("; ")
}

fn format_body_for_log(headers: &axum::http::HeaderMap, bytes: &Bytes) -> Option<String> {
    if bytes.is_empty() {
        return Some("<empty>".to_string());
    }

    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");
    let content_type = content_type.trim().to_ascii_lowercase();
    let is_json = content_type.contains("application/json") || content_type.contains("+json");

    if !is_textual_content_type(&content_type) {
        return Some("<binary>".to_string());
    }

    if is_json && let Ok(mut json) = serde_json::from_slice::<Value>(bytes) {
        redact_json(&mut json);
        if let Ok(rendered) = serde_json::to_string(&json) {
            return Some(rendered);
        }
    }

    Some(String::from_utf8_lossy(bytes).to_string())
}

fn redact_json(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, value) in map.iter_mut() {
                if is_sensitive_key(key) {
                    *value = Value::String("<redacted>".to_string());
                } else {
                    redact_json(value);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                redact_json(item);
            }
        }
        _ => {}
    }
}

fn is_textual_content_type(content_type: &str) -> bool {
    content_type.starts_with("text/")
        || content_type.contains("application/json")
        || content_type.contains("+json")
        || content_type.contains("application/x-www-form-urlencoded")
}

fn is_sensitive_header(name: &axum::http::HeaderName) -> bool {
    if name == AUTHORIZATION || name == COOKIE || name == SET_COOKIE {
        return true;
    }

    matches!(
        name.as_str(),
        "proxy-authorization" | "x-api-key" | "x-auth-token" | "x-access-token"
    )
}

fn is_sensitive_key(key: &str) -> bool {
    matches!(
        key.to_ascii_lowercase().as_str(),
        "token"
            | "fcmtoken"
            | "access_token"
            | "authorization"
            | "private_key"
            | "client_secret"
            | "secret"
    )
}
