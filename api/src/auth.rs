/// API-key verification for the fetch service.
use axum::http::HeaderMap;

use gofer_shared::errors::{FetchError, FetchResult};

/// Check the `x-api-key` header against the configured secret.
///
/// Runs before anything else in a handler, so a bad credential never
/// spawns the download tool.
pub fn verify_api_key(headers: &HeaderMap, expected: &str) -> FetchResult<()> {
    match headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        Some(key) if key == expected => Ok(()),
        _ => Err(FetchError::Unauthorized),
    }
}
