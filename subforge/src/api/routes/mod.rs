//! API route modules.
//!
//! Organizes routes by resource type.

pub mod health;
pub mod jobs;
pub mod logging;
pub mod projects;
pub mod styles;

use axum::Router;
use axum::http::{HeaderMap, HeaderValue, header};

use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;
use crate::domain::JobId;

/// Header carrying the caller's owner identity.
pub const OWNER_HEADER: &str = "x-owner-id";

/// Cookie carrying the owner identity for browsers.
pub const SESSION_COOKIE: &str = "subforge_session";

/// Create the main API router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/jobs", jobs::router())
        .nest("/projects", projects::router(&state))
        .nest("/styles", styles::router())
        .nest("/api/logging", logging::router())
        .nest("/health", health::router())
        .with_state(state)
}

/// Owner identity of the caller: the `X-Owner-Id` header, else the session
/// cookie.
pub(crate) fn owner_from_headers(headers: &HeaderMap) -> Option<String> {
    let from_header = headers
        .get(OWNER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(owner) = from_header {
        return Some(owner.to_string());
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// `Set-Cookie` value that binds a new session to `owner`.
pub(crate) fn session_cookie(owner: &str) -> ApiResult<HeaderValue> {
    let cookie = format!(
        "{SESSION_COOKIE}={owner}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        60 * 60 * 24 * 365
    );
    HeaderValue::from_str(&cookie).map_err(|_| ApiError::bad_request("Invalid owner identity"))
}

pub(crate) fn parse_job_id(raw: &str) -> ApiResult<JobId> {
    JobId::parse(raw).map_err(|_| ApiError::not_found(format!("Job with id '{}' not found", raw)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_header_wins_over_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("a=1; subforge_session=cookie-id"));
        assert_eq!(owner_from_headers(&headers).as_deref(), Some("cookie-id"));

        headers.insert(OWNER_HEADER, HeaderValue::from_static(" header-id "));
        assert_eq!(owner_from_headers(&headers).as_deref(), Some("header-id"));
    }

    #[test]
    fn test_missing_owner() {
        let mut headers = HeaderMap::new();
        assert_eq!(owner_from_headers(&headers), None);
        headers.insert(header::COOKIE, HeaderValue::from_static("subforge_session="));
        assert_eq!(owner_from_headers(&headers), None);
    }

    #[test]
    fn test_malformed_job_id_is_not_found() {
        let err = parse_job_id("../etc").unwrap_err();
        assert_eq!(err.status, axum::http::StatusCode::NOT_FOUND);
    }
}
