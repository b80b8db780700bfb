// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Custom extractors for improved error handling
//!
//! [`JsonExtractor`] replaces axum's `Json` for request bodies so that every
//! rejection is a [`ServerError::JsonError`] rendered with the same JSON error
//! shape as the rest of the API.

use axum::{
    body::Bytes,
    extract::{FromRequest, Request},
    http::header::CONTENT_TYPE,
};
use serde::de::DeserializeOwned;

use crate::error::ServerError;

/// Largest accepted request body; broadcast payloads are fanned out to every
/// connected client of a tenant, so they are kept small.
pub const MAX_JSON_PAYLOAD_SIZE: usize = 256 * 1024;

/// JSON body extractor with descriptive rejections
#[derive(Debug)]
pub struct JsonExtractor<T>(pub T);

impl<T, S> FromRequest<S> for JsonExtractor<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(content_type) = req.headers().get(CONTENT_TYPE)
            && let Ok(content_type) = content_type.to_str()
            && !content_type.starts_with("application/json")
        {
            return Err(json_error(format!(
                "invalid content-type: expected 'application/json', got '{content_type}'"
            )));
        }

        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|rejection| json_error(format!("failed to read request body: {rejection}")))?;

        if bytes.len() > MAX_JSON_PAYLOAD_SIZE {
            return Err(json_error(format!(
                "request body too large: {} bytes (max: {MAX_JSON_PAYLOAD_SIZE} bytes)",
                bytes.len()
            )));
        }
        if bytes.is_empty() {
            return Err(json_error("request body is empty, expected a JSON object"));
        }

        serde_json::from_slice(&bytes)
            .map(JsonExtractor)
            .map_err(|err| json_error(describe(&err)))
    }
}

fn json_error(message: impl Into<String>) -> ServerError {
    ServerError::JsonError {
        message: message.into(),
    }
}

fn describe(err: &serde_json::Error) -> String {
    use serde_json::error::Category;

    match err.classify() {
        Category::Syntax => format!(
            "invalid JSON syntax at line {}, column {}: {}",
            err.line(),
            err.column(),
            syntax_hint(err)
        ),
        Category::Eof => "unexpected end of JSON input, request appears to be truncated".to_string(),
        Category::Data => format!("JSON data validation failed: {}", data_hint(err)),
        Category::Io => format!("JSON parsing error: {err}"),
    }
}

fn syntax_hint(err: &serde_json::Error) -> &'static str {
    let message = err.to_string();
    if message.contains("expected ','") || message.contains("trailing comma") {
        "check for missing or extra commas"
    } else if message.contains("expected value") {
        "expected a JSON value (string, number, boolean, null, object, or array)"
    } else if message.contains("control character") {
        "control characters inside strings must be escaped"
    } else {
        "check JSON formatting and structure"
    }
}

fn data_hint(err: &serde_json::Error) -> String {
    let message = err.to_string();
    if message.contains("missing field") {
        format!("required field is missing: {message}")
    } else if message.contains("tenant id") {
        format!("invalid tenant id: {message}")
    } else if message.contains("invalid type") {
        format!("data type mismatch: {message}")
    } else {
        message
    }
}
