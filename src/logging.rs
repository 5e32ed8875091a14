//! Middleware for logging requests and responses.

use axum::{
    body::{Body, Bytes},
    extract::Request,
    http::{HeaderMap, HeaderValue, header::AUTHORIZATION},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::Value;

use crate::Error;

/// Bodies longer than this many characters are truncated at the `info` level.
pub const LOG_BODY_LENGTH_LIMIT: usize = 64;

/// JSON fields whose values never appear in the logs.
const REDACTED_FIELDS: [&str; 2] = ["password", "token"];

const REDACTED: &str = "********";

/// Log the request and response for each request.
///
/// Both the request and response are logged at the `info` level.
/// If a body is longer than [LOG_BODY_LENGTH_LIMIT] characters, it is
/// truncated and the full body is logged at the `debug` level.
/// Passwords, tokens and the `Authorization` header are redacted.
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let (parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(body) => body,
        Err(error) => {
            tracing::warn!("could not read request body: {error}");
            return Error::InvalidInput("could not read request body".to_owned()).into_response();
        }
    };

    tracing::info!(
        "Received request: {} {}\nheaders: {:?}",
        parts.method,
        parts.uri,
        redact_headers(&parts.headers)
    );
    log_body("request", &body);

    let response = next.run(Request::from_parts(parts, Body::from(body))).await;

    let (parts, body) = response.into_parts();
    let body = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(body) => body,
        Err(error) => {
            tracing::error!("could not read response body: {error}");
            return Error::Internal("could not read response body".to_owned()).into_response();
        }
    };

    tracing::info!("Sending response: {}\nheaders: {:?}", parts.status, parts.headers);
    log_body("response", &body);

    Response::from_parts(parts, Body::from(body))
}

fn redact_headers(headers: &HeaderMap) -> HeaderMap {
    let mut headers = headers.clone();

    if headers.contains_key(AUTHORIZATION) {
        headers.insert(AUTHORIZATION, HeaderValue::from_static(REDACTED));
    }

    headers
}

fn log_body(kind: &str, body: &Bytes) {
    if body.is_empty() {
        return;
    }

    let text = redact_body(&String::from_utf8_lossy(body));
    let truncated = truncate(&text, LOG_BODY_LENGTH_LIMIT);

    if truncated.len() < text.len() {
        tracing::info!("{kind} body: {truncated}...");
        tracing::debug!("Full {kind} body: {text:?}");
    } else {
        tracing::info!("{kind} body: {text}");
    }
}

/// Replace the values of sensitive fields in a JSON body.
///
/// Bodies that are not JSON are returned unchanged.
fn redact_body(body: &str) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(mut value) => {
            redact_value(&mut value);
            value.to_string()
        }
        Err(_) => body.to_owned(),
    }
}

fn redact_value(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, field) in map.iter_mut() {
                if REDACTED_FIELDS.contains(&key.as_str()) {
                    *field = Value::String(REDACTED.to_owned());
                } else {
                    redact_value(field);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(redact_value),
        _ => {}
    }
}

/// The first `limit` characters of `text`.
fn truncate(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use axum::http::{HeaderMap, HeaderValue, header::AUTHORIZATION};

    use super::{redact_body, redact_headers, truncate};

    #[test]
    fn redacts_password_fields() {
        let redacted = redact_body(r#"{"username":"alice","password":"hunter2"}"#);

        assert!(!redacted.contains("hunter2"));
        assert!(redacted.contains("alice"));
    }

    #[test]
    fn redacts_nested_tokens() {
        let redacted = redact_body(r#"[{"token":"abc.def.ghi","expires_at":"soon"}]"#);

        assert!(!redacted.contains("abc.def.ghi"));
        assert!(redacted.contains("soon"));
    }

    #[test]
    fn leaves_non_json_bodies_alone() {
        assert_eq!(redact_body("password=hunter2"), "password=hunter2");
    }

    #[test]
    fn redacts_authorization_header() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer secret"));

        let redacted = redact_headers(&headers);

        assert_eq!(redacted[AUTHORIZATION], "********");
    }

    #[test]
    fn truncates_on_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("hi", 10), "hi");
    }
}
