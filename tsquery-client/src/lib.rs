//! # tsquery-client
//!
//! Async client for the TeamSpeak 3 ServerQuery interface.
//!
//! This crate provides:
//! - A lock-step command pipeline with flood control
//! - Single-assignment result handles usable from async and blocking code
//! - Typed server notifications with listeners and broadcast subscriptions
//! - Keepalive and pluggable reconnect strategies
//! - A thin high-level API and YAML/env configuration

pub mod client;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod event;
pub mod handle;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod queue;
pub mod reconnect;
pub mod views;

mod keepalive;
mod reader;
mod session;
mod writer;

pub use client::{Client, EventRegistration, TextTarget};
pub use config::{ClientConfig, ConfigError};
pub use connection::{Connection, ConnectionConfig, ConnectionState, FloodRate};
pub use dispatcher::{EventDispatcher, ListenerId};
pub use error::ClientError;
pub use event::{Event, EventKind};
pub use handle::{await_all, await_any, ResultHandle};
pub use reconnect::{Backoff, ConstantBackoff, ExponentialBackoff, LinearBackoff, ReconnectStrategy};
pub use views::{ChannelEntry, ClientEntry, VersionInfo, WhoAmI};

pub use tsquery_protocol::{Command, Record};
