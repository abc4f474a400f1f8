use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::credentials::CredentialError;

/// Error returned by handlers, rendered as `{"detail": ...}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    /// Error with an explicit status.
    pub fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }

    /// HTTP status of the response.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Message placed in the `detail` field.
    #[must_use]
    pub fn detail(&self) -> &str {
        &self.detail
    }
}

impl From<CredentialError> for ApiError {
    fn from(err: CredentialError) -> Self {
        let status = match err {
            CredentialError::DuplicateEmail => StatusCode::BAD_REQUEST,
            CredentialError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            CredentialError::Closed | CredentialError::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_errors_map_to_statuses() {
        let duplicate = ApiError::from(CredentialError::DuplicateEmail);
        assert_eq!(duplicate.status(), StatusCode::BAD_REQUEST);
        assert_eq!(duplicate.detail(), "Email already registered");

        let invalid = ApiError::from(CredentialError::InvalidCredentials);
        assert_eq!(invalid.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(invalid.detail(), "Invalid email or password");

        let closed = ApiError::from(CredentialError::Closed);
        assert_eq!(closed.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
