use thiserror::Error;
use url::Url;

/// Terminal classification of a failed segment request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Generic transport failure or payload validation failure.
    Failure,
    /// The transport gave up waiting for a response.
    Timeout,
    /// The request was cancelled before it resolved.
    Aborted,
}

/// Error record delivered with a failed segment outcome.
///
/// Transport errors and validation errors (bad key length, empty payload)
/// share this shape so callers can apply one retry/exclusion policy.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct SegmentError {
    pub status: Option<u16>,
    pub message: String,
    pub code: ErrorCode,
    /// URI of the request that produced the error.
    pub uri: Url,
}

impl SegmentError {
    pub fn failure(uri: &Url, status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            code: ErrorCode::Failure,
            uri: uri.clone(),
        }
    }

    pub fn timeout(uri: &Url, status: Option<u16>) -> Self {
        Self {
            status,
            message: format!("request timed out at URL: {uri}"),
            code: ErrorCode::Timeout,
            uri: uri.clone(),
        }
    }

    pub fn aborted(uri: &Url, status: Option<u16>) -> Self {
        Self {
            status,
            message: format!("request aborted at URL: {uri}"),
            code: ErrorCode::Aborted,
            uri: uri.clone(),
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.code == ErrorCode::Aborted
    }
}

/// Errors reported by a [`Transport`](crate::request::Transport).
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("request aborted")]
    Aborted,

    #[error("HTTP error: {0}")]
    Status(u16),

    #[error("network error: {0}")]
    Network(String),

    #[error(transparent)]
    Request(#[from] reqwest::Error),
}

impl TransportError {
    /// Normalizes a transport error into the per-segment error record.
    pub fn into_segment_error(self, uri: &Url) -> SegmentError {
        match self {
            TransportError::Timeout => SegmentError::timeout(uri, None),
            TransportError::Aborted => SegmentError::aborted(uri, None),
            TransportError::Status(status) => SegmentError::failure(
                uri,
                Some(status),
                format!("request errored with status {status} at URL: {uri}"),
            ),
            TransportError::Network(message) => {
                SegmentError::failure(uri, None, format!("request errored at URL: {uri}: {message}"))
            }
            TransportError::Request(e) if e.is_timeout() => {
                SegmentError::timeout(uri, e.status().map(|s| s.as_u16()))
            }
            TransportError::Request(e) => SegmentError::failure(
                uri,
                e.status().map(|s| s.as_u16()),
                format!("request errored at URL: {uri}: {e}"),
            ),
        }
    }
}

#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("Invalid byte range: {0}")]
    InvalidByteRange(String),

    #[error("Invalid IV: {0}")]
    InvalidIv(String),

    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),

    #[error(transparent)]
    RequestError(#[from] reqwest::Error),

    #[error(transparent)]
    TomlError(#[from] toml::de::Error),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("decryption worker closed")]
    DecryptWorkerClosed,
}

pub type LoaderResult<T> = Result<T, LoaderError>;
