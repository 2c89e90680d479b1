use reqwest::StatusCode;
use thiserror::Error;

/// Failure talking to the school data service.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Credential rejected by the data service")]
    Unauthorized,

    #[error("Scope not accessible with this credential: {0}")]
    AccessDenied(String),

    #[error("Endpoint not found: {0}")]
    NotFound(String),

    #[error("Rate limited by the data service")]
    RateLimited,

    #[error("Data service failed with {status}: {body}")]
    ServerError { status: u16, body: String },

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Response bodies are cut to this many characters before they land in an error.
const MAX_BODY_CHARS: usize = 300;

fn excerpt(body: &str) -> String {
    let body = body.trim();
    let mut chars = body.char_indices();
    match chars.nth(MAX_BODY_CHARS) {
        Some((cut, _)) => format!("{}... ({} bytes)", &body[..cut], body.len()),
        None => body.to_string(),
    }
}

impl ApiError {
    /// Classify a non-success response.
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        match status {
            StatusCode::UNAUTHORIZED => ApiError::Unauthorized,
            StatusCode::FORBIDDEN => ApiError::AccessDenied(excerpt(body)),
            StatusCode::NOT_FOUND => ApiError::NotFound(excerpt(body)),
            StatusCode::TOO_MANY_REQUESTS => ApiError::RateLimited,
            s if s.is_server_error() => ApiError::ServerError {
                status: s.as_u16(),
                body: excerpt(body),
            },
            s => ApiError::InvalidResponse(format!("unexpected status {}: {}", s, excerpt(body))),
        }
    }

    /// True when a different credential could succeed where this one failed.
    pub fn is_credential_problem(&self) -> bool {
        matches!(self, ApiError::Unauthorized | ApiError::AccessDenied(_))
    }
}
