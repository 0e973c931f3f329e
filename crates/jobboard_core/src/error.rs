use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiErrorKind {
    NotConfigured,
    Network,
    Timeout,
    ServerError,
    NotFound,
    Conflict,
    Unauthorized,
    BadRequest,
    InvalidJson,
    Unknown,
}

impl fmt::Display for ApiErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiErrorKind::NotConfigured => write!(f, "server not configured"),
            ApiErrorKind::Network => write!(f, "network error"),
            ApiErrorKind::Timeout => write!(f, "timeout"),
            ApiErrorKind::ServerError => write!(f, "server error"),
            ApiErrorKind::NotFound => write!(f, "not found"),
            ApiErrorKind::Conflict => write!(f, "conflict"),
            ApiErrorKind::Unauthorized => write!(f, "unauthorized"),
            ApiErrorKind::BadRequest => write!(f, "bad request"),
            ApiErrorKind::InvalidJson => write!(f, "invalid json"),
            ApiErrorKind::Unknown => write!(f, "unknown error"),
        }
    }
}

/// Error surfaced by the transport client and everything built on it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub message: String,
    pub status: Option<u16>,
}

impl ApiError {
    pub fn new(kind: ApiErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn not_configured() -> Self {
        Self::new(
            ApiErrorKind::NotConfigured,
            "no server base url is configured",
        )
    }

    /// True only for failures a later attempt may not repeat.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            ApiErrorKind::Network | ApiErrorKind::Timeout | ApiErrorKind::ServerError
        )
    }
}
