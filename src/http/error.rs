use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum HttpError {
    #[error("unauthorized (401)")]
    Unauthorized { body: String },
    #[error("request failed with status {status}")]
    Status { status: u16, body: String },
    #[error("network error: {message}")]
    Transport { message: String, timed_out: bool },
    #[error("token refresh failed: {0}")]
    Refresh(RefreshError),
    #[error("request cancelled: token refresh coordinator was disposed")]
    Disposed,
    #[error("invalid response body: {0}")]
    Decode(String),
}

/// Failure raised from inside a refresh cycle.
#[derive(Debug, Clone, Error)]
pub enum RefreshError {
    #[error("no refresh token stored")]
    MissingRefreshToken,
    #[error("refresh endpoint rejected the request: {0}")]
    Endpoint(Box<HttpError>),
    #[error("failed to persist refreshed tokens")]
    Persist,
    #[error("refresh timed out after {0:?}")]
    TimedOut(Duration),
    #[error("{0}")]
    Other(String),
}

impl HttpError {
    /// Status code, when the transport reached the server.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Unauthorized { .. } => Some(401),
            Self::Status { status, .. } => Some(*status),
            Self::Refresh(RefreshError::Endpoint(inner)) => inner.status(),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }

    /// The session cannot continue: a 401 that survived recovery, or a failed refresh.
    pub fn requires_logout(&self) -> bool {
        matches!(self, Self::Unauthorized { .. } | Self::Refresh(_))
    }

    /// Worth retrying later without user action.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<RefreshError> for HttpError {
    fn from(err: RefreshError) -> Self {
        Self::Refresh(err)
    }
}
