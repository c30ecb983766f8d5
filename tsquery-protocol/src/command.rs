//! Command serialization.
//!
//! A command line is `name [" " param]*` terminated by a newline.

use crate::codec::{escape, RECORD_SEPARATOR, TOKEN_SEPARATOR};
use crate::error::ProtocolError;
use std::fmt;

/// One parameter of a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Param {
    /// `key=value`, value escaped.
    KeyValue { key: String, value: String },
    /// `-name`.
    Flag(String),
    /// Positional value, escaped, no key.
    Value(String),
    /// Sub-records joined by an unescaped `|`, each a space-joined token list.
    Group(Vec<Vec<Param>>),
    /// Already serialized text, written verbatim.
    Raw(String),
}

impl Param {
    pub fn kv(key: impl Into<String>, value: impl ToString) -> Self {
        Param::KeyValue {
            key: key.into(),
            value: value.to_string(),
        }
    }

    fn write_to(&self, out: &mut String) {
        match self {
            Param::KeyValue { key, value } => {
                out.push_str(key);
                out.push('=');
                out.push_str(&escape(value));
            }
            Param::Flag(name) => {
                out.push('-');
                out.push_str(name);
            }
            Param::Value(value) => out.push_str(&escape(value)),
            Param::Group(records) => {
                for (i, record) in records.iter().enumerate() {
                    if i > 0 {
                        out.push(RECORD_SEPARATOR);
                    }
                    write_params(record, out);
                }
            }
            Param::Raw(text) => out.push_str(text),
        }
    }
}

fn write_params(params: &[Param], out: &mut String) {
    for (i, param) in params.iter().enumerate() {
        if i > 0 {
            out.push(TOKEN_SEPARATOR);
        }
        param.write_to(out);
    }
}

/// A query command with its parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    name: String,
    params: Vec<Param>,
}

impl Command {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
        }
    }

    /// Builds a command from an already serialized line.
    ///
    /// The first token is taken as the command name; the remainder is sent
    /// verbatim.
    pub fn raw(line: &str) -> Result<Self, ProtocolError> {
        let line = line.trim_matches(|c| c == '\r' || c == '\n' || c == ' ');
        let (name, rest) = match line.split_once(TOKEN_SEPARATOR) {
            Some((name, rest)) => (name, Some(rest)),
            None => (line, None),
        };
        if name.is_empty() {
            return Err(ProtocolError::EmptyCommand);
        }

        let mut command = Self::new(name);
        if let Some(rest) = rest.filter(|r| !r.is_empty()) {
            command.params.push(Param::Raw(rest.to_string()));
        }
        Ok(command)
    }

    pub fn arg(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.params.push(Param::kv(key, value));
        self
    }

    /// Adds `key=value` only when a value is present.
    pub fn opt_arg<V: ToString>(self, key: impl Into<String>, value: Option<V>) -> Self {
        match value {
            Some(v) => self.arg(key, v),
            None => self,
        }
    }

    pub fn flag(mut self, name: impl Into<String>) -> Self {
        self.params.push(Param::Flag(name.into()));
        self
    }

    pub fn value(mut self, value: impl ToString) -> Self {
        self.params.push(Param::Value(value.to_string()));
        self
    }

    pub fn group(mut self, records: Vec<Vec<Param>>) -> Self {
        if !records.is_empty() {
            self.params.push(Param::Group(records));
        }
        self
    }

    pub fn param(mut self, param: Param) -> Self {
        self.params.push(param);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    /// Serializes the command without the line terminator.
    pub fn encode(&self) -> String {
        let mut out = self.name.clone();
        for param in &self.params {
            out.push(TOKEN_SEPARATOR);
            param.write_to(&mut out);
        }
        out
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}
