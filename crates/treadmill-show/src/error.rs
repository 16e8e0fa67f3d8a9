//! Error types for state API queries.

use thiserror::Error;

/// Result type alias for show operations.
pub type ShowResult<T> = Result<T, ShowError>;

#[derive(Debug, Error)]
pub enum ShowError {
    /// No state API URL was configured.
    #[error("No state API configured for cell {cell}")]
    NoStateApi { cell: String },

    /// A configured state API URL could not be used as a base URL.
    #[error("Invalid state API URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },

    /// The request could not be sent or the server answered with an error status.
    #[error("Request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The response body was not the expected JSON document.
    #[error("Invalid response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    /// Every configured state API failed.
    #[error("All state APIs failed ({tried} tried), last error: {last}")]
    AllFailed {
        tried: usize,
        last: Box<ShowError>,
    },
}

impl ShowError {
    pub fn invalid_url(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Whether another state API might still answer.
    pub fn try_next(&self) -> bool {
        matches!(self, Self::Http { .. } | Self::Decode { .. })
    }
}
