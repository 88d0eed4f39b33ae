//! Token authentication for webhook triggers and the admin API
//!
//! Trigger tokens are accepted from:
//! - Authorization: Bearer <token>
//! - X-Webhook-Token: <token>
//! - ?token=<token>
//!
//! Admin tokens are only accepted as `Authorization: Bearer <token>`.

use axum::http::{HeaderMap, Uri};
use sha2::{Digest, Sha256};

/// Header carrying a trigger token when the caller cannot set Authorization
pub const WEBHOOK_TOKEN_HEADER: &str = "x-webhook-token";

/// Extract a bearer token from the Authorization header.
/// The scheme is matched case-insensitively.
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let auth = headers.get("authorization")?.to_str().ok()?;
    let (scheme, token) = auth.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Extract the trigger token from the request.
pub fn extract_trigger_token(headers: &HeaderMap, uri: &Uri) -> Option<String> {
    // 1. Authorization: Bearer <token>
    if let Some(token) = extract_bearer_token(headers) {
        return Some(token);
    }

    // 2. X-Webhook-Token
    if let Some(token) = headers.get(WEBHOOK_TOKEN_HEADER) {
        if let Ok(token_str) = token.to_str() {
            let trimmed = token_str.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }

    // 3. ?token=<token>
    if let Some(query) = uri.query() {
        for param in query.split('&') {
            if let Some(value) = param.strip_prefix("token=") {
                if !value.is_empty() {
                    return Some(decode_query_value(value));
                }
            }
        }
    }

    None
}

/// Decode a query value; `+` is a space as in form encoding.
fn decode_query_value(value: &str) -> String {
    let value = value.replace('+', " ");
    String::from_utf8_lossy(&urlencoding::decode_binary(value.as_bytes())).into_owned()
}

/// Timing-safe comparison of two strings.
///
/// Both sides are hashed to fixed-length digests first, so the comparison
/// time depends neither on where the inputs differ nor on the secret's length.
pub fn timing_safe_equal(a: &str, b: &str) -> bool {
    let da = Sha256::digest(a.as_bytes());
    let db = Sha256::digest(b.as_bytes());

    let mut result: u8 = 0;
    for (x, y) in da.iter().zip(db.iter()) {
        result |= x ^ y;
    }
    result == 0
}

/// Validate a provided token against the stored one.
/// Empty tokens never authenticate.
pub fn validate_token(provided: &str, stored: &str) -> bool {
    if provided.is_empty() || stored.is_empty() {
        return false;
    }
    timing_safe_equal(provided, stored)
}
