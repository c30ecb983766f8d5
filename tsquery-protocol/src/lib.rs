//! # tsquery-protocol
//!
//! Wire protocol implementation for the TeamSpeak 3 ServerQuery interface.
//!
//! This crate provides:
//! - Escaping and unescaping of the protocol's special characters
//! - Splitting response lines into field records
//! - Command serialization (key/value, flags, positional values, array groups)
//! - Error trailer parsing and line classification
//! - Error codes and protocol constants

pub mod codec;
pub mod command;
pub mod error;
pub mod message;
pub mod record;

pub use codec::{escape, parse_records, unescape};
pub use command::{Command, Param};
pub use error::{ErrorCode, ProtocolError};
pub use message::{classify, validate_banner, Line, QueryError};
pub use record::Record;

/// Default ServerQuery port.
pub const DEFAULT_PORT: u16 = 10011;

/// First banner line sent by a ServerQuery server after accept.
pub const BANNER_IDENT: &str = "TS3";

/// Number of banner lines sent before the server accepts commands.
pub const BANNER_LINES: usize = 2;

/// Prefix of the error trailer that terminates every command response.
pub const ERROR_PREFIX: &str = "error";

/// Prefix of every out-of-band event notification.
pub const NOTIFY_PREFIX: &str = "notify";

/// Cheap query used to keep an idle connection alive.
pub const KEEPALIVE_COMMAND: &str = "whoami";
