use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

/// Errors from application requests issued through the authenticated client.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Unauthorized - session expired or revoked")]
    Unauthorized,

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Errors from session operations: login, registration, refresh, profile.
///
/// `Clone` because a single refresh outcome is handed to every caller that
/// joined the in-flight exchange.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("No refresh token available")]
    NoRefreshToken,

    #[error("Refresh token rejected (status {status})")]
    RefreshRejected { status: u16 },

    #[error("Not authenticated")]
    Unauthenticated,

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Account already exists: {0}")]
    Conflict(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Server error (status {status}): {body}")]
    Server { status: u16, body: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            AuthError::InvalidResponse(err.to_string())
        } else {
            AuthError::Network(err.to_string())
        }
    }
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Truncate a response body to avoid logging excessive data
pub(crate) fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY_LENGTH {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY_LENGTH;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
}

/// Pull a human-readable message out of an error body.
///
/// The server reports failures as `{"detail": "..."}`, or for field validation
/// as `{"detail": [{"loc": [...], "msg": "..."}]}`. Anything else is returned
/// truncated as-is.
pub(crate) fn detail_message(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return truncate_body(body);
    };
    match value.get("detail") {
        Some(Value::String(detail)) => truncate_body(detail),
        Some(Value::Array(items)) => {
            let messages: Vec<String> = items
                .iter()
                .filter_map(|item| {
                    let msg = item.get("msg")?.as_str()?;
                    let field = item
                        .get("loc")
                        .and_then(Value::as_array)
                        .and_then(|loc| loc.last())
                        .and_then(Value::as_str);
                    Some(match field {
                        Some(field) => format!("{}: {}", field, msg),
                        None => msg.to_string(),
                    })
                })
                .collect();
            if messages.is_empty() {
                truncate_body(body)
            } else {
                truncate_body(&messages.join("; "))
            }
        }
        _ => truncate_body(body),
    }
}

impl ApiError {
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let truncated = truncate_body(body);
        match status.as_u16() {
            401 => ApiError::Unauthorized,
            403 => ApiError::AccessDenied(truncated),
            404 => ApiError::NotFound(truncated),
            429 => ApiError::RateLimited,
            500..=599 => ApiError::ServerError(truncated),
            _ => ApiError::InvalidResponse(format!("Status {}: {}", status, truncated)),
        }
    }
}

impl AuthError {
    /// Map a failed `/token` response.
    pub(crate) fn from_login_status(status: StatusCode, body: &str) -> Self {
        match status.as_u16() {
            400 | 401 | 403 => AuthError::InvalidCredentials,
            422 => AuthError::Validation(detail_message(body)),
            code => AuthError::Server {
                status: code,
                body: truncate_body(body),
            },
        }
    }

    /// Map a failed `/register` response.
    pub(crate) fn from_register_status(status: StatusCode, body: &str) -> Self {
        let detail = detail_message(body);
        match status.as_u16() {
            409 => AuthError::Conflict(detail),
            400 if detail.to_ascii_lowercase().contains("already") => AuthError::Conflict(detail),
            400 | 422 => AuthError::Validation(detail),
            code => AuthError::Server {
                status: code,
                body: truncate_body(body),
            },
        }
    }

    /// Map a failed `/users/me` response.
    pub(crate) fn from_profile_status(status: StatusCode, body: &str) -> Self {
        match status.as_u16() {
            401 => AuthError::Unauthenticated,
            code => AuthError::Server {
                status: code,
                body: truncate_body(body),
            },
        }
    }

    /// True when the failure ended the session rather than being transient.
    pub fn is_session_ending(&self) -> bool {
        matches!(
            self,
            AuthError::NoRefreshToken | AuthError::RefreshRejected { .. } | AuthError::Unauthenticated
        )
    }
}
