use chrono::NaiveDate;
use std::path::PathBuf;
use thiserror::Error;

use crate::scene::Satellite;

/// Problems with the shape of a scene identifier, raised while building or parsing one.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SceneIdError {
    #[error("Scene identifier must be 21 characters, got {0}")]
    Length(usize),
    #[error("Unknown satellite code: {0}")]
    UnknownSatellite(String),
    #[error("WRS2 path {0} is outside 0..=233")]
    PathOutOfRange(u16),
    #[error("WRS2 row {0} is outside 0..=248")]
    RowOutOfRange(u16),
    #[error("Invalid acquisition date: {0}")]
    Date(String),
    #[error("Ground station {station} is not used by {satellite}")]
    UnknownStation { satellite: Satellite, station: String },
    #[error("Invalid archive version: {0}")]
    Version(String),
    #[error("Invalid digits in {field}: {value}")]
    Digits { field: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkErrorKind {
    /// Worth another attempt; the retry policy decides how many.
    Transient,
    /// Fails this scene outright.
    Permanent,
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("No station/version combination exists for {satellite} {path:03}/{row:03} on {date}")]
    NotFound {
        satellite: Satellite,
        path: u16,
        row: u16,
        date: NaiveDate,
    },

    #[error("Login page did not contain a csrf_token input")]
    TokenNotFound,

    #[error("Archive rejected the login credentials")]
    Authentication,

    #[error("Expected a binary archive from {url} but got {content_type}")]
    InvalidResponse {
        url: String,
        content_type: String,
        body: String,
    },

    #[error("Declared size of {url} is {content_length} bytes, below the {minimum} byte minimum")]
    TooSmall {
        url: String,
        content_length: u64,
        minimum: u64,
    },

    #[error("Network error ({kind:?}) for {url}: {message}")]
    Network {
        kind: NetworkErrorKind,
        url: String,
        status: Option<u16>,
        message: String,
    },

    #[error("Unable to extract {}: {message}", archive.display())]
    Extraction { archive: PathBuf, message: String },

    #[error(transparent)]
    SceneId(#[from] SceneIdError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl FetchError {
    /// Errors after which no further request against the archive can succeed.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::TokenNotFound | Self::Authentication)
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network {
                kind: NetworkErrorKind::Transient,
                ..
            }
        )
    }

    pub fn network(kind: NetworkErrorKind, url: &str, message: impl ToString) -> Self {
        Self::Network {
            kind,
            url: url.to_string(),
            status: None,
            message: message.to_string(),
        }
    }
}
