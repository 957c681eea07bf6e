// Error types shared across the search engine

use thiserror::Error;

// Failures reported by the external quote provider
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("Provider timeout: {0}")]
    Timeout(String),

    #[error("Provider error: {0}")]
    Fatal(String),
}

impl ProviderError {
    /// Classifies a raw provider failure message. Only the provider's
    /// timeout signature counts as transient.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        if message.contains("Timeout") && message.contains("wait_for") {
            ProviderError::Timeout(message)
        } else {
            ProviderError::Fatal(message)
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Timeout(_))
    }
}

// Configuration errors short-circuit a whole search
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SearchError {
    #[error("Invalid date: {0}")]
    InvalidDate(String),

    #[error("Invalid stay range: {min}..={max}")]
    InvalidStayRange { min: u32, max: u32 },

    #[error("Invalid time of day (expected HH:MM): {0}")]
    InvalidTime(String),

    #[error("No origin airports given")]
    NoOrigins,

    #[error("No airports matching filters.")]
    NoDestinations,

    #[error("No candidates found from any origin.")]
    NoCandidates,
}

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cache store is closed")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_signature_is_retryable() {
        let err = ProviderError::from_message("Timeout in wait_for(selector)");
        assert!(err.is_retryable());

        // both markers are required
        assert!(!ProviderError::from_message("Timeout while connecting").is_retryable());
        assert!(!ProviderError::from_message("HTTP 500").is_retryable());
    }
}
