use std::sync::Arc;

use reqwest::StatusCode;

/// Errors produced by the playlist poller, the segment concatenator and the
/// archive packer.
///
/// The type is `Clone` so that a session can keep its terminal error in a
/// slot while also handing it to the consumer that observed it first.
#[derive(Debug, Clone, thiserror::Error)]
pub enum HlsError {
    #[error("operation cancelled")]
    Cancelled,

    #[error("invalid URL `{input}`: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("failed to fetch {url}: {reason}")]
    Fetch {
        url: String,
        reason: String,
        retryable: bool,
    },

    #[error("request for {url} failed with HTTP {status}")]
    HttpStatus { status: StatusCode, url: String },

    #[error("HTTP request failed: {source}")]
    Network { source: Arc<reqwest::Error> },

    #[error("playlist parse error: {reason}")]
    Parse { reason: String },

    #[error("I/O error: {source}")]
    Io { source: Arc<std::io::Error> },

    #[error("archive write error: {reason}")]
    Write { reason: String },

    #[error("archive index error: {reason}")]
    Archive { reason: String },

    #[error("internal error: {reason}")]
    Internal { reason: String },
}

impl HlsError {
    pub fn parse(reason: impl Into<String>) -> Self {
        Self::Parse {
            reason: reason.into(),
        }
    }

    pub fn invalid_url(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn write(reason: impl Into<String>) -> Self {
        Self::Write {
            reason: reason.into(),
        }
    }

    pub fn archive(reason: impl Into<String>) -> Self {
        Self::Archive {
            reason: reason.into(),
        }
    }

    pub fn http_status(status: StatusCode, url: impl Into<String>) -> Self {
        Self::HttpStatus {
            status,
            url: url.into(),
        }
    }

    /// Whether a fetch that failed with this error is worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::HttpStatus { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            Self::Fetch { retryable, .. } => *retryable,
            Self::Network { source } => {
                source.is_connect()
                    || source.is_timeout()
                    || source.is_request()
                    || source.is_body()
                    || source.is_decode()
            }
            Self::Io { .. } => true,
            Self::Cancelled
            | Self::InvalidUrl { .. }
            | Self::Parse { .. }
            | Self::Write { .. }
            | Self::Archive { .. }
            | Self::Internal { .. } => false,
        }
    }
}

impl From<reqwest::Error> for HlsError {
    fn from(source: reqwest::Error) -> Self {
        Self::Network {
            source: Arc::new(source),
        }
    }
}

impl From<std::io::Error> for HlsError {
    fn from(source: std::io::Error) -> Self {
        Self::Io {
            source: Arc::new(source),
        }
    }
}

impl From<HlsError> for std::io::Error {
    fn from(err: HlsError) -> Self {
        match err {
            HlsError::Io { source } => std::io::Error::new(source.kind(), source.to_string()),
            other => std::io::Error::other(other),
        }
    }
}
