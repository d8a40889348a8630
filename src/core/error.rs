//! Error handling - one flat hierarchy for every adapter

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// coinlib error hierarchy
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network/IO errors
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Non-2xx response the adapter had no better interpretation for
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Exchange reported a failure
    #[error("Exchange error: {0}")]
    Exchange(String),

    /// Authentication errors
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Pair not listed on the exchange
    #[error("Invalid pair {base}/{quote}")]
    InvalidPair { base: String, quote: String },

    /// Order rejected before it was sent
    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    /// Malformed field in an exchange response
    #[error("Parse error: {0}")]
    Parse(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// True when the exchange itself turned the request down, as opposed to
    /// the request never reaching it.
    pub fn is_rejection(&self) -> bool {
        match self {
            Error::Exchange(_) => true,
            Error::Http { status, .. } => (400..500).contains(status),
            Error::Network(e) => e.status().is_some_and(|s| s.is_client_error()),
            _ => false,
        }
    }
}
