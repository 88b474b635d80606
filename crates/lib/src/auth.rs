//! Caller identity.
//!
//! Sign-in is handled upstream (an auth proxy or widget); requests reach the server with
//! the user id in a trusted header. No tokens are verified here.

use crate::config::AuthConfig;
use axum::http::HeaderMap;

/// User id from the configured header, or the dev identity when `allow_dev_user` is set.
/// Returns None when neither yields a non-empty value.
pub fn caller_identity(headers: &HeaderMap, auth: &AuthConfig, allow_dev_user: bool) -> Option<String> {
    headers
        .get(auth.user_header.as_str())
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| {
            if !allow_dev_user {
                return None;
            }
            auth.dev_user_id
                .as_ref()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
}
