//! Line classification and error trailers.

use crate::codec::{parse_record, TOKEN_SEPARATOR};
use crate::error::{ErrorCode, ProtocolError};
use crate::{BANNER_IDENT, ERROR_PREFIX, NOTIFY_PREFIX};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A received line, classified by its prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Line<'a> {
    /// Out-of-band notification: event name and the record body.
    Event { name: &'a str, body: &'a str },
    /// Error trailer terminating a command response.
    Error(&'a str),
    /// Response fragment (or an unsolicited line).
    Response(&'a str),
    /// Blank line.
    Empty,
}

/// Classifies a raw line. Line terminators are stripped first.
pub fn classify(line: &str) -> Line<'_> {
    let line = line.trim_matches(|c| c == '\r' || c == '\n');
    if line.is_empty() {
        return Line::Empty;
    }

    if line.starts_with(NOTIFY_PREFIX) {
        let (name, body) = line.split_once(TOKEN_SEPARATOR).unwrap_or((line, ""));
        return Line::Event { name, body };
    }

    if is_error_line(line) {
        return Line::Error(line);
    }

    Line::Response(line)
}

fn is_error_line(line: &str) -> bool {
    match line.strip_prefix(ERROR_PREFIX) {
        Some(rest) => rest.is_empty() || rest.starts_with(TOKEN_SEPARATOR),
        None => false,
    }
}

/// Checks the first banner line sent after connect.
pub fn validate_banner(line: &str) -> Result<(), ProtocolError> {
    let line = line.trim_matches(|c| c == '\r' || c == '\n');
    if line == BANNER_IDENT {
        Ok(())
    } else {
        Err(ProtocolError::InvalidBanner {
            expected: BANNER_IDENT,
            actual: line.to_string(),
        })
    }
}

/// A parsed error trailer (`error id=.. msg=..`).
///
/// Id 0 marks a successful command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryError {
    pub id: u32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_permid: Option<u32>,
}

impl QueryError {
    /// Parses an error trailer line.
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let trimmed = line.trim_matches(|c| c == '\r' || c == '\n');
        if !is_error_line(trimmed) {
            return Err(ProtocolError::NotAnErrorLine(trimmed.to_string()));
        }

        let record = parse_record(&trimmed[ERROR_PREFIX.len()..]);
        let id = record.parse_required::<u32>("id")?;
        let message = record.require("msg")?.to_string();
        let extra_message = record
            .get("extra_msg")
            .filter(|m| !m.is_empty())
            .map(str::to_string);
        let failed_permid = record.parse::<u32>("failed_permid")?;

        Ok(Self {
            id,
            message,
            extra_message,
            failed_permid,
        })
    }

    /// Returns whether the trailer reports success.
    pub fn is_success(&self) -> bool {
        self.id == 0
    }

    pub fn code(&self) -> ErrorCode {
        ErrorCode::from(self.id)
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (id {})", self.message, self.id)?;
        if let Some(extra) = &self.extra_message {
            write!(f, ": {}", extra)?;
        }
        if let Some(permid) = self.failed_permid {
            write!(f, " [failed permission {}]", permid)?;
        }
        Ok(())
    }
}
