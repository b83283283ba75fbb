use thiserror::Error;

pub const NETWORK_ERROR_MESSAGE: &str = "Network error occurred while contacting the backend.";

/// Failure of a single backend operation, classified per the error taxonomy:
/// a structured backend rejection carries its `detail` verbatim, a transport
/// failure is surfaced to the user as a generic message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("{detail}")]
    Backend { detail: String },
    #[error("network error: {message}")]
    Network { message: String },
}

impl ApiError {
    #[must_use]
    pub fn backend(detail: impl Into<String>) -> Self {
        Self::Backend {
            detail: detail.into(),
        }
    }

    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Backend { detail } => detail.clone(),
            Self::Network { .. } => NETWORK_ERROR_MESSAGE.to_string(),
        }
    }
}
