use std::error::Error as _;

use thiserror::Error;

/// Fetch failure taxonomy. Fatal variants abort immediately; the rest are
/// retried with backoff up to the attempt cap.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid target URL: {0}")]
    InvalidUrl(String),

    #[error("DNS resolution failed for {0}")]
    Dns(String),

    #[error("timed out")]
    Timeout,

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("network error: {0}")]
    Network(String),

    #[error("browser error: {0}")]
    Browser(String),

    #[error("content below usable threshold ({0} bytes)")]
    InsufficientContent(usize),
}

impl FetchError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, FetchError::InvalidUrl(_) | FetchError::Dns(_))
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return FetchError::Timeout;
        }
        // reqwest surfaces resolver failures as connect errors; the io error
        // chain is the only reliable signal.
        let mut source: Option<&(dyn std::error::Error + 'static)> = err.source();
        while let Some(e) = source {
            if e.to_string().to_lowercase().contains("dns") {
                return FetchError::Dns(err.to_string());
            }
            source = e.source();
        }
        FetchError::Network(err.to_string())
    }
}
