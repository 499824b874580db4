//! Failure taxonomy for external calls.
//!
//! Classification is a pure function of the error's shape. The first matching
//! rule wins:
//! 1. a direct numeric status,
//! 2. a nested HTTP response status,
//! 3. a timeout (`ECONNABORTED` or a message mentioning "timeout"),
//! 4. a DNS / connection failure (`ENOTFOUND`, `ECONNREFUSED`),
//! 5. anything else.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{CallGuardError, UpstreamError};

pub const CODE_TIMEOUT: &str = "ECONNABORTED";
pub const CODE_DNS: &str = "ENOTFOUND";
pub const CODE_REFUSED: &str = "ECONNREFUSED";

/// Status recorded for timeouts that never produced a response.
pub const STATUS_TIMEOUT: u16 = 408;
/// Status recorded for failures that never reached the remote host.
pub const STATUS_NETWORK: u16 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    RateLimit,
    AuthError,
    ServerError,
    ApiError,
    Timeout,
    NetworkError,
    UnknownError,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RateLimit => "RATE_LIMIT",
            Self::AuthError => "AUTH_ERROR",
            Self::ServerError => "SERVER_ERROR",
            Self::ApiError => "API_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::NetworkError => "NETWORK_ERROR",
            Self::UnknownError => "UNKNOWN_ERROR",
        }
    }

    /// Message used when a response carries a status but no body message.
    pub fn generic_message(self) -> &'static str {
        match self {
            Self::RateLimit => "Rate limit exceeded",
            Self::AuthError => "Authentication failed",
            Self::ServerError => "External service error",
            Self::ApiError => "External API request failed",
            Self::Timeout => "Request timed out",
            Self::NetworkError => "Network error",
            Self::UnknownError => "Unknown error",
        }
    }

    pub fn from_status(status: u16) -> Self {
        match status {
            429 => Self::RateLimit,
            401 | 403 => Self::AuthError,
            s if s >= 500 => Self::ServerError,
            _ => Self::ApiError,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// View of an error used by the classifier. Every method defaults to "absent"
/// so an error type only describes the parts of the shape it actually has.
pub trait ErrorShape: fmt::Display + fmt::Debug {
    /// A status carried directly on the error.
    fn status(&self) -> Option<u16> {
        None
    }

    /// A nested response (status, body message), HTTP-client style.
    fn response(&self) -> Option<(u16, Option<String>)> {
        None
    }

    /// A native transport code such as `ECONNABORTED` or `ENOTFOUND`.
    fn native_code(&self) -> Option<String> {
        None
    }
}

/// Outcome of classifying one failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub code: ErrorCode,
    pub response_status: Option<u16>,
    pub message: String,
}

pub fn classify<E: ErrorShape + ?Sized>(err: &E) -> Classification {
    if let Some(status) = err.status() {
        return Classification {
            code: ErrorCode::from_status(status),
            response_status: Some(status),
            message: err.to_string(),
        };
    }

    if let Some((status, body_message)) = err.response() {
        let code = ErrorCode::from_status(status);
        return Classification {
            code,
            response_status: Some(status),
            message: body_message
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| code.generic_message().to_string()),
        };
    }

    let native = err.native_code();
    let message = err.to_string();
    if native.as_deref() == Some(CODE_TIMEOUT) || message.to_lowercase().contains("timeout") {
        return Classification {
            code: ErrorCode::Timeout,
            response_status: Some(STATUS_TIMEOUT),
            message,
        };
    }

    if matches!(native.as_deref(), Some(CODE_DNS | CODE_REFUSED)) {
        return Classification {
            code: ErrorCode::NetworkError,
            response_status: Some(STATUS_NETWORK),
            message,
        };
    }

    Classification {
        code: ErrorCode::UnknownError,
        response_status: None,
        message,
    }
}

static SECRET_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"(?i)bearer\s+[A-Za-z0-9\-._~+/]+=*", "Bearer [REDACTED]"),
        (r"\bsk-[A-Za-z0-9_\-]{8,}", "sk-[REDACTED]"),
        (r"(?i)(X-Amz-Signature|X-Amz-Credential|X-Amz-Security-Token)=[^&\s]+", "$1=[REDACTED]"),
        (r#"(?i)(api[_-]?key|secret|password|token)(["']?\s*[:=]\s*["']?)[^\s"'&,}]+"#, "$1$2[REDACTED]"),
    ]
    .into_iter()
    .filter_map(|(p, r)| Regex::new(p).ok().map(|re| (re, r)))
    .collect()
});

/// Masks credentials that commonly leak into provider error messages.
pub fn redact(message: &str) -> String {
    let mut out = message.to_string();
    for (re, replacement) in SECRET_PATTERNS.iter() {
        out = re.replace_all(&out, *replacement).into_owned();
    }
    out
}

impl ErrorShape for UpstreamError {
    fn status(&self) -> Option<u16> {
        self.status
    }

    fn response(&self) -> Option<(u16, Option<String>)> {
        self.response.as_ref().map(|r| (r.status, r.message.clone()))
    }

    fn native_code(&self) -> Option<String> {
        self.code.clone()
    }
}

impl ErrorShape for std::io::Error {
    fn native_code(&self) -> Option<String> {
        use std::io::ErrorKind;
        match self.kind() {
            ErrorKind::TimedOut => Some(CODE_TIMEOUT.into()),
            ErrorKind::ConnectionRefused => Some(CODE_REFUSED.into()),
            _ => None,
        }
    }
}

impl ErrorShape for reqwest::Error {
    fn status(&self) -> Option<u16> {
        reqwest::Error::status(self).map(|s| s.as_u16())
    }

    fn native_code(&self) -> Option<String> {
        if self.is_timeout() {
            Some(CODE_TIMEOUT.into())
        } else if self.is_connect() {
            Some(CODE_REFUSED.into())
        } else {
            None
        }
    }
}

impl ErrorShape for CallGuardError {
    fn status(&self) -> Option<u16> {
        match self {
            Self::Upstream(e) => e.status(),
            Self::Other(e) => e.status(),
            _ => None,
        }
    }

    fn response(&self) -> Option<(u16, Option<String>)> {
        match self {
            Self::Upstream(e) => e.response(),
            Self::Other(e) => e.response(),
            _ => None,
        }
    }

    fn native_code(&self) -> Option<String> {
        match self {
            Self::Upstream(e) => e.native_code(),
            Self::Io(e) => e.native_code(),
            Self::Other(e) => e.native_code(),
            _ => None,
        }
    }
}

impl ErrorShape for anyhow::Error {
    fn status(&self) -> Option<u16> {
        if let Some(e) = self.downcast_ref::<UpstreamError>() {
            return e.status();
        }
        self.downcast_ref::<reqwest::Error>().and_then(ErrorShape::status)
    }

    fn response(&self) -> Option<(u16, Option<String>)> {
        self.downcast_ref::<UpstreamError>().and_then(ErrorShape::response)
    }

    fn native_code(&self) -> Option<String> {
        if let Some(e) = self.downcast_ref::<UpstreamError>() {
            return e.native_code();
        }
        if let Some(e) = self.downcast_ref::<reqwest::Error>() {
            return e.native_code();
        }
        self.downcast_ref::<std::io::Error>().and_then(ErrorShape::native_code)
    }
}
