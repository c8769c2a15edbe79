//! Backend failure classification.

use thiserror::Error;

/// Why a model backend call did not produce a response.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP client setup failed: {0}")]
    Client(String),

    #[error("request to model backend failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("model backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("could not decode model backend response: {0}")]
    Decode(String),

    #[error("model backend returned no choices")]
    EmptyResponse,
}

impl ProviderError {
    /// HTTP status code, when the backend answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            ProviderError::Status { status, .. } => Some(*status),
            ProviderError::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
