use reqwest::StatusCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    /// No credential is held locally; the request was never sent.
    #[error("No auth token available.")]
    NotAuthenticated,

    /// The server refused the credential that was sent.
    #[error("Unauthorized - credentials rejected or expired")]
    Unauthorized,

    #[error("Server rejected request ({status}): {body}")]
    Rejected { status: StatusCode, body: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid base URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// A logout happened while the request was in flight, so its result was dropped.
    #[error("Session was logged out while the request was in flight")]
    LoggedOutDuringRequest,

    /// A newer request of the same kind already updated the cache.
    #[error("Superseded by a newer request")]
    Superseded,
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    pub fn from_status(status: StatusCode, body: &str) -> Self {
        match status.as_u16() {
            401 => ApiError::Unauthorized,
            _ => ApiError::Rejected {
                status,
                body: Self::truncate_body(body),
            },
        }
    }

    /// True when the server answered and refused the credential.
    ///
    /// Callers use this to decide on a forced re-login. A missing local
    /// credential is reported separately by [`ApiError::NotAuthenticated`].
    pub fn is_auth_rejected(&self) -> bool {
        match self {
            ApiError::Unauthorized => true,
            ApiError::Rejected { status, .. } => *status == StatusCode::FORBIDDEN,
            _ => false,
        }
    }

    /// True for failures that never produced an HTTP response (DNS, refused
    /// connection, timeout).
    pub fn is_transport(&self) -> bool {
        matches!(self, ApiError::Network(_))
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiError::Unauthorized => Some(StatusCode::UNAUTHORIZED),
            ApiError::Rejected { status, .. } => Some(*status),
            ApiError::Network(e) => e.status(),
            _ => None,
        }
    }
}
