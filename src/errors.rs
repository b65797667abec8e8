//! Error taxonomy for the RDAP client.
//!
//! Every public operation returns `Result<T, Error>`. Each variant knows
//! whether the retry wrapper (`crate::retry`) is allowed to attempt it
//! again; see [`Error::retryable`].

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur at any stage of a query: validation, discovery,
/// transport, or normalization.
#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("validation error: {message}")]
    Validation { message: String },

    #[error("SSRF guard rejected URL: {message}")]
    Ssrf { message: String },

    #[error("bootstrap registry error: {message}")]
    Bootstrap { message: String },

    #[error("no server found for query: {message}")]
    NoServerFound { message: String },

    #[error("network error: {message}")]
    Network { message: String },

    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// A 429 response. `retry_after` is the parsed `Retry-After` delay, if any.
    #[error("rate limited by server, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("object not found")]
    NotFound,

    #[error("protocol error: {message}")]
    Protocol { message: String },

    #[error("failed to parse response: {message}")]
    Parse { message: String },

    #[error("operation cancelled")]
    Cancelled,

    /// The local rate limiter couldn't grant a token before the caller's
    /// deadline elapsed. Distinct from [`Error::RateLimited`], which comes
    /// from the remote server.
    #[error("rate limiter deadline exceeded")]
    LocalRateLimited,
}

impl Error {
    /// Whether the retry wrapper ([`crate::retry::Retrier`]) may attempt this
    /// operation again. Per spec: NetworkError, 5xx and 429 are retryable;
    /// everything else (validation, SSRF, 404, other 4xx, parse, cancellation)
    /// is terminal.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            Error::Network { .. } | Error::Timeout(_) | Error::RateLimited { .. }
        )
    }

    /// A short stable machine-readable code, mirroring the variant name.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation { .. } => "VALIDATION_ERROR",
            Error::Ssrf { .. } => "SSRF_ERROR",
            Error::Bootstrap { .. } => "BOOTSTRAP_ERROR",
            Error::NoServerFound { .. } => "NO_SERVER_FOUND",
            Error::Network { .. } => "NETWORK_ERROR",
            Error::Timeout(_) => "TIMEOUT_ERROR",
            Error::RateLimited { .. } => "RATE_LIMITED",
            Error::NotFound => "NOT_FOUND",
            Error::Protocol { .. } => "PROTOCOL_ERROR",
            Error::Parse { .. } => "PARSE_ERROR",
            Error::Cancelled => "CANCELLED",
            Error::LocalRateLimited => "LOCAL_RATE_LIMITED",
        }
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Error {
        Error::Validation {
            message: msg.into(),
        }
    }

    pub(crate) fn ssrf(msg: impl Into<String>) -> Error {
        Error::Ssrf {
            message: msg.into(),
        }
    }

    pub(crate) fn protocol(msg: impl Into<String>) -> Error {
        Error::Protocol {
            message: msg.into(),
        }
    }

    pub(crate) fn parse(msg: impl Into<String>) -> Error {
        Error::Parse {
            message: msg.into(),
        }
    }

    pub(crate) fn network(msg: impl Into<String>) -> Error {
        Error::Network {
            message: msg.into(),
        }
    }
}

impl From<hyper::Error> for Error {
    fn from(e: hyper::Error) -> Error {
        Error::network(e.to_string())
    }
}

impl From<http::Error> for Error {
    fn from(e: http::Error) -> Error {
        Error::protocol(e.to_string())
    }
}

impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Error {
        Error::validation(format!("invalid URL: {}", e))
    }
}

impl From<std::net::AddrParseError> for Error {
    fn from(e: std::net::AddrParseError) -> Error {
        Error::validation(format!("invalid address: {}", e))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Error {
        Error::parse(e.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Error {
        Error::Timeout(Duration::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_matches_spec_table() {
        assert!(Error::network("x").retryable());
        assert!(Error::Timeout(Duration::from_secs(1)).retryable());
        assert!(Error::RateLimited { retry_after: None }.retryable());

        assert!(!Error::validation("x").retryable());
        assert!(!Error::ssrf("x").retryable());
        assert!(!Error::NotFound.retryable());
        assert!(!Error::protocol("x").retryable());
        assert!(!Error::parse("x").retryable());
        assert!(!Error::Cancelled.retryable());
    }

    #[test]
    fn addr_parse_error_converts_to_validation() {
        let parsed: Result<std::net::IpAddr, _> = "not-an-ip".parse();
        let err: Error = parsed.unwrap_err().into();
        assert!(matches!(err, Error::Validation { .. }));
        assert!(!err.retryable());
    }
}
