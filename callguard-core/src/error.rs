use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Core error type for callguard.
/// Internally, modules can use `anyhow::Result<T>` for convenience,
/// but public boundaries should expose `CoreResult<T>` with this error.
#[derive(Debug, Error)]
pub enum CallGuardError {
    #[error("validation failed: {0}")]
    Validation(String),

    /// The configured provider exists in the enumeration but has no backend yet.
    /// This is a configuration gap, not a transient fault.
    #[error("{operation} is not yet implemented for storage provider {provider}")]
    NotImplemented { provider: String, operation: String },

    #[error("{operation} is not supported by the {provider} storage provider; {hint}")]
    Unsupported {
        provider: String,
        operation: String,
        hint: String,
    },

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type CoreResult<T> = std::result::Result<T, CallGuardError>;

/// Status and body message of an HTTP-style response attached to a failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamResponse {
    pub status: u16,
    pub message: Option<String>,
}

/// A failure reported by an external service, kept in the shape the
/// classifier understands: a direct status, a nested response, or a
/// native transport code such as `ECONNREFUSED`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UpstreamError {
    pub status: Option<u16>,
    pub response: Option<UpstreamResponse>,
    pub code: Option<String>,
    pub message: String,
}

impl UpstreamError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_response(status: u16, body_message: Option<String>, message: impl Into<String>) -> Self {
        Self {
            response: Some(UpstreamResponse {
                status,
                message: body_message,
            }),
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            message: message.into(),
            ..Default::default()
        }
    }
}

impl fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for UpstreamError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_implemented_names_provider_and_operation() {
        let err = CallGuardError::NotImplemented {
            provider: "azure".into(),
            operation: "uploadFile".into(),
        };
        assert_eq!(
            err.to_string(),
            "uploadFile is not yet implemented for storage provider azure"
        );
    }

    #[test]
    fn upstream_is_transparent() {
        let err: CallGuardError = UpstreamError::with_status(429, "slow down").into();
        assert_eq!(err.to_string(), "slow down");
        assert!(matches!(err, CallGuardError::Upstream(ref u) if u.status == Some(429)));
    }
}
