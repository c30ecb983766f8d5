//! Client error types.

use std::io;
use thiserror::Error;
use tsquery_protocol::{ErrorCode, QueryError};

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] tsquery_protocol::ProtocolError),

    #[error("not connected")]
    NotConnected,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("connection shut down by reconnect strategy")]
    Closed,

    #[error("request timeout")]
    Timeout,

    #[error("request cancelled")]
    Cancelled,

    #[error("server error: {message} (id {id})")]
    ServerError {
        id: u32,
        message: String,
        extra_message: Option<String>,
        failed_permid: Option<u32>,
    },

    #[error("unknown event type: {0}")]
    UnknownEvent(String),

    #[error("{0} callback already registered")]
    CallbackAlreadyRegistered(&'static str),

    #[error("all {} requests failed", .0.len())]
    AllFailed(Vec<ClientError>),

    #[error("configuration error: {0}")]
    Config(String),
}

impl ClientError {
    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Io(_) => true,
            ClientError::Timeout => true,
            ClientError::ConnectionClosed => true,
            ClientError::ServerError { id, .. } => ErrorCode::from(*id).is_retryable(),
            _ => false,
        }
    }

    /// Returns the server error code, if this is a server error.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            ClientError::ServerError { id, .. } => Some(ErrorCode::from(*id)),
            _ => None,
        }
    }
}

impl From<QueryError> for ClientError {
    fn from(err: QueryError) -> Self {
        ClientError::ServerError {
            id: err.id,
            message: err.message,
            extra_message: err.extra_message,
            failed_permid: err.failed_permid,
        }
    }
}

// One failure is handed to every waiter of a handle, so errors must clone.
// I/O errors keep their kind and message.
impl Clone for ClientError {
    fn clone(&self) -> Self {
        match self {
            ClientError::Io(e) => ClientError::Io(io::Error::new(e.kind(), e.to_string())),
            ClientError::Protocol(e) => ClientError::Protocol(e.clone()),
            ClientError::NotConnected => ClientError::NotConnected,
            ClientError::ConnectionClosed => ClientError::ConnectionClosed,
            ClientError::Closed => ClientError::Closed,
            ClientError::Timeout => ClientError::Timeout,
            ClientError::Cancelled => ClientError::Cancelled,
            ClientError::ServerError {
                id,
                message,
                extra_message,
                failed_permid,
            } => ClientError::ServerError {
                id: *id,
                message: message.clone(),
                extra_message: extra_message.clone(),
                failed_permid: *failed_permid,
            },
            ClientError::UnknownEvent(name) => ClientError::UnknownEvent(name.clone()),
            ClientError::CallbackAlreadyRegistered(kind) => {
                ClientError::CallbackAlreadyRegistered(kind)
            }
            ClientError::AllFailed(errors) => ClientError::AllFailed(errors.clone()),
            ClientError::Config(msg) => ClientError::Config(msg.clone()),
        }
    }
}
