//! Structured error model for calls to the external source.
//!
//! [`FetchError`] carries classification and retry metadata. Construct via
//! the kind-specific factory methods so retry defaults stay consistent.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Broad classification of a failed source call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
#[serde(rename_all = "snake_case")]
pub enum FetchErrorKind {
    /// Connection reset, DNS failure and similar (retryable).
    TransientNetwork,
    /// The call exceeded its deadline (retryable).
    Timeout,
    /// Source asked us to slow down (retryable).
    RateLimit,
    /// 5xx from the source (retryable).
    Server,
    /// 4xx other than auth/rate limit.
    Client,
    /// Credentials rejected.
    Auth,
    /// Response body could not be decoded into pages.
    Decode,
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::TransientNetwork => "transient_network",
            Self::Timeout => "timeout",
            Self::RateLimit => "rate_limit",
            Self::Server => "server",
            Self::Client => "client",
            Self::Auth => "auth",
            Self::Decode => "decode",
        };
        f.write_str(s)
    }
}

/// Retry backoff strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffClass {
    /// Base delay as configured.
    Normal,
    /// Base delay times five, for throttling.
    Slow,
}

/// Failed call to the external source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("[{kind}] {message}")]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub message: String,
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
    pub backoff_class: BackoffClass,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
}

impl FetchError {
    fn new(kind: FetchErrorKind, retryable: bool, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable,
            retry_after_ms: None,
            backoff_class: BackoffClass::Normal,
            status_code: None,
        }
    }

    /// Transient network error (retryable).
    #[must_use]
    pub fn transient_network(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::TransientNetwork, true, message)
    }

    /// Deadline exceeded (retryable).
    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Timeout, true, message)
    }

    /// Throttled by the source (retryable, slow backoff).
    #[must_use]
    pub fn rate_limit(message: impl Into<String>, retry_after_ms: Option<u64>) -> Self {
        let mut err = Self::new(FetchErrorKind::RateLimit, true, message);
        err.retry_after_ms = retry_after_ms;
        err.backoff_class = BackoffClass::Slow;
        err.status_code = Some(429);
        err
    }

    /// Server-side failure (retryable).
    #[must_use]
    pub fn server(status: u16, message: impl Into<String>) -> Self {
        let mut err = Self::new(FetchErrorKind::Server, true, message);
        err.status_code = Some(status);
        err
    }

    /// Request rejected by the source (not retryable).
    #[must_use]
    pub fn client(status: u16, message: impl Into<String>) -> Self {
        let mut err = Self::new(FetchErrorKind::Client, false, message);
        err.status_code = Some(status);
        err
    }

    /// Credentials rejected (not retryable).
    #[must_use]
    pub fn auth(status: u16, message: impl Into<String>) -> Self {
        let mut err = Self::new(FetchErrorKind::Auth, false, message);
        err.status_code = Some(status);
        err
    }

    /// Undecodable response (not retryable).
    #[must_use]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Decode, false, message)
    }

    /// Classify an HTTP status code.
    #[must_use]
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        match status {
            401 | 403 => Self::auth(status, message),
            429 => Self::rate_limit(message, None),
            500..=599 => Self::server(status, message),
            _ => Self::client(status, message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_retryable() {
        assert!(FetchError::transient_network("reset").retryable);
        assert!(FetchError::timeout("slow").retryable);
        assert!(FetchError::server(503, "unavailable").retryable);
    }

    #[test]
    fn client_errors_are_final() {
        assert!(!FetchError::client(404, "gone").retryable);
        assert!(!FetchError::auth(401, "nope").retryable);
        assert!(!FetchError::decode("not json").retryable);
    }

    #[test]
    fn status_classification() {
        assert_eq!(FetchError::from_status(502, "x").kind, FetchErrorKind::Server);
        assert_eq!(FetchError::from_status(429, "x").kind, FetchErrorKind::RateLimit);
        assert_eq!(FetchError::from_status(403, "x").kind, FetchErrorKind::Auth);
        assert_eq!(FetchError::from_status(400, "x").kind, FetchErrorKind::Client);
    }

    #[test]
    fn rate_limit_uses_slow_backoff() {
        let err = FetchError::rate_limit("throttled", Some(2_000));
        assert_eq!(err.backoff_class, BackoffClass::Slow);
        assert_eq!(err.retry_after_ms, Some(2_000));
    }

    #[test]
    fn display_format() {
        let err = FetchError::server(500, "boom");
        assert_eq!(err.to_string(), "[server] boom");
    }
}
