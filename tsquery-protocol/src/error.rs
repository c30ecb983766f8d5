//! Protocol error types and error codes.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Protocol-level errors that can occur while parsing query lines.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("not an error trailer: {0:?}")]
    NotAnErrorLine(String),

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid value for field {field}: {value:?}")]
    InvalidField { field: String, value: String },

    #[error("invalid banner: expected '{expected}', got {actual:?}")]
    InvalidBanner {
        expected: &'static str,
        actual: String,
    },

    #[error("command name must not be empty")]
    EmptyCommand,
}

/// Well-known error ids returned in error trailers.
///
/// Ids not listed here are preserved as [`ErrorCode::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u32", into = "u32")]
pub enum ErrorCode {
    Ok,
    CommandNotFound,
    InvalidClientId,
    InvalidLogin,
    ClientFlooding,
    InvalidChannelId,
    InvalidServerId,
    ServerNotRunning,
    DatabaseEmptyResult,
    InvalidParameter,
    ParameterNotFound,
    ConvertError,
    InsufficientPermissions,
    Banned,
    FloodBan,
    Other(u32),
}

impl ErrorCode {
    /// Returns the numeric id sent on the wire.
    pub fn id(&self) -> u32 {
        match self {
            ErrorCode::Ok => 0,
            ErrorCode::CommandNotFound => 256,
            ErrorCode::InvalidClientId => 512,
            ErrorCode::InvalidLogin => 520,
            ErrorCode::ClientFlooding => 524,
            ErrorCode::InvalidChannelId => 768,
            ErrorCode::InvalidServerId => 1024,
            ErrorCode::ServerNotRunning => 1033,
            ErrorCode::DatabaseEmptyResult => 1281,
            ErrorCode::InvalidParameter => 1538,
            ErrorCode::ParameterNotFound => 1539,
            ErrorCode::ConvertError => 1540,
            ErrorCode::InsufficientPermissions => 2568,
            ErrorCode::Banned => 3329,
            ErrorCode::FloodBan => 3331,
            ErrorCode::Other(id) => *id,
        }
    }

    /// Returns whether this error is potentially retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCode::ClientFlooding)
    }
}

impl From<u32> for ErrorCode {
    fn from(id: u32) -> Self {
        match id {
            0 => ErrorCode::Ok,
            256 => ErrorCode::CommandNotFound,
            512 => ErrorCode::InvalidClientId,
            520 => ErrorCode::InvalidLogin,
            524 => ErrorCode::ClientFlooding,
            768 => ErrorCode::InvalidChannelId,
            1024 => ErrorCode::InvalidServerId,
            1033 => ErrorCode::ServerNotRunning,
            1281 => ErrorCode::DatabaseEmptyResult,
            1538 => ErrorCode::InvalidParameter,
            1539 => ErrorCode::ParameterNotFound,
            1540 => ErrorCode::ConvertError,
            2568 => ErrorCode::InsufficientPermissions,
            3329 => ErrorCode::Banned,
            3331 => ErrorCode::FloodBan,
            other => ErrorCode::Other(other),
        }
    }
}

impl From<ErrorCode> for u32 {
    fn from(code: ErrorCode) -> Self {
        code.id()
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::Ok => write!(f, "OK"),
            ErrorCode::CommandNotFound => write!(f, "COMMAND_NOT_FOUND"),
            ErrorCode::InvalidClientId => write!(f, "INVALID_CLIENT_ID"),
            ErrorCode::InvalidLogin => write!(f, "INVALID_LOGIN"),
            ErrorCode::ClientFlooding => write!(f, "CLIENT_FLOODING"),
            ErrorCode::InvalidChannelId => write!(f, "INVALID_CHANNEL_ID"),
            ErrorCode::InvalidServerId => write!(f, "INVALID_SERVER_ID"),
            ErrorCode::ServerNotRunning => write!(f, "SERVER_NOT_RUNNING"),
            ErrorCode::DatabaseEmptyResult => write!(f, "DATABASE_EMPTY_RESULT"),
            ErrorCode::InvalidParameter => write!(f, "INVALID_PARAMETER"),
            ErrorCode::ParameterNotFound => write!(f, "PARAMETER_NOT_FOUND"),
            ErrorCode::ConvertError => write!(f, "CONVERT_ERROR"),
            ErrorCode::InsufficientPermissions => write!(f, "INSUFFICIENT_PERMISSIONS"),
            ErrorCode::Banned => write!(f, "BANNED"),
            ErrorCode::FloodBan => write!(f, "FLOOD_BAN"),
            ErrorCode::Other(id) => write!(f, "ERROR_{}", id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_roundtrip_ids() {
        let known = [
            0, 256, 512, 520, 524, 768, 1024, 1033, 1281, 1538, 1539, 1540, 2568, 3329, 3331,
        ];
        for id in known {
            let code = ErrorCode::from(id);
            assert!(!matches!(code, ErrorCode::Other(_)), "id {} unmapped", id);
            assert_eq!(code.id(), id);
        }

        assert_eq!(ErrorCode::from(4242), ErrorCode::Other(4242));
        assert_eq!(ErrorCode::Other(4242).id(), 4242);
    }

    #[test]
    fn test_error_code_retryable() {
        assert!(ErrorCode::ClientFlooding.is_retryable());

        assert!(!ErrorCode::Ok.is_retryable());
        assert!(!ErrorCode::InvalidLogin.is_retryable());
        assert!(!ErrorCode::DatabaseEmptyResult.is_retryable());
        assert!(!ErrorCode::FloodBan.is_retryable());
    }

    #[test]
    fn test_error_code_display() {
        assert_eq!(format!("{}", ErrorCode::Ok), "OK");
        assert_eq!(
            format!("{}", ErrorCode::DatabaseEmptyResult),
            "DATABASE_EMPTY_RESULT"
        );
        assert_eq!(format!("{}", ErrorCode::Other(7)), "ERROR_7");
    }

    #[test]
    fn test_error_code_serialization() {
        let json = serde_json::to_string(&ErrorCode::InvalidLogin).unwrap();
        assert_eq!(json, "520");

        let parsed: ErrorCode = serde_json::from_str("1281").unwrap();
        assert_eq!(parsed, ErrorCode::DatabaseEmptyResult);
    }

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::MissingField("id");
        assert!(err.to_string().contains("id"));

        let err = ProtocolError::InvalidBanner {
            expected: "TS3",
            actual: "SSH-2.0".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("TS3") && msg.contains("SSH-2.0"));

        let err = ProtocolError::InvalidField {
            field: "id".to_string(),
            value: "abc".to_string(),
        };
        assert!(err.to_string().contains("abc"));
    }
}
