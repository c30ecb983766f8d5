//! High-level client API.

use crate::connection::{Connection, ConnectionConfig, ConnectionState};
use crate::error::ClientError;
use crate::handle::ResultHandle;
use crate::views::{collect_views, ChannelEntry, ClientEntry, VersionInfo, WhoAmI};
use std::fmt;
use tsquery_protocol::{Command, ProtocolError, Record};

/// Notification group for `servernotifyregister`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventRegistration {
    /// Clients joining and leaving the virtual server, server edits.
    Server,
    /// Channel and client movement below a channel (0 = all channels).
    Channel(u32),
    TextServer,
    TextChannel,
    TextPrivate,
    TokenUsed,
}

impl EventRegistration {
    /// Every group, with channel events for all channels.
    pub const ALL: [EventRegistration; 6] = [
        EventRegistration::Server,
        EventRegistration::Channel(0),
        EventRegistration::TextServer,
        EventRegistration::TextChannel,
        EventRegistration::TextPrivate,
        EventRegistration::TokenUsed,
    ];

    fn command(&self) -> Command {
        let cmd = Command::new("servernotifyregister");
        match self {
            EventRegistration::Server => cmd.arg("event", "server"),
            EventRegistration::Channel(id) => cmd.arg("event", "channel").arg("id", id),
            EventRegistration::TextServer => cmd.arg("event", "textserver"),
            EventRegistration::TextChannel => cmd.arg("event", "textchannel"),
            EventRegistration::TextPrivate => cmd.arg("event", "textprivate"),
            EventRegistration::TokenUsed => cmd.arg("event", "tokenused"),
        }
    }
}

/// Recipient kind of a text message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextTarget {
    Client = 1,
    Channel = 2,
    Server = 3,
}

impl fmt::Display for TextTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", *self as u8)
    }
}

/// High-level client over a [`Connection`].
#[derive(Debug, Clone)]
pub struct Client {
    conn: Connection,
}

impl Client {
    /// Creates a new client with the given configuration.
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            conn: Connection::new(config),
        }
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }

    /// Connects to the server.
    pub async fn connect(&self) -> Result<(), ClientError> {
        self.conn.connect().await
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        self.conn.state()
    }

    /// Closes the connection without sending `quit`.
    pub fn disconnect(&self) {
        self.conn.disconnect()
    }

    /// Returns the underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    // =========================================================================
    // Helper methods
    // =========================================================================

    async fn execute(&self, command: Command) -> Result<(), ClientError> {
        self.conn.request(&command).await.map(|_| ())
    }

    async fn first<T>(&self, command: Command) -> Result<T, ClientError>
    where
        T: for<'a> TryFrom<&'a Record, Error = ProtocolError>,
    {
        let records = self.conn.request(&command).await?;
        let record = records.first().ok_or(ProtocolError::MissingField("record"))?;
        Ok(T::try_from(record)?)
    }

    /// Sends a raw query line, e.g. `serverinfo` or `clientinfo clid=5`.
    pub async fn raw(&self, line: &str) -> Result<Vec<Record>, ClientError> {
        self.conn.request(&Command::raw(line)?).await
    }

    /// Queues a command without waiting for it.
    pub fn submit(&self, command: &Command) -> Result<ResultHandle<Vec<Record>>, ClientError> {
        self.conn.submit(command)
    }

    // =========================================================================
    // Session
    // =========================================================================

    pub async fn login(&self, username: &str, password: &str) -> Result<(), ClientError> {
        self.execute(
            Command::new("login")
                .arg("client_login_name", username)
                .arg("client_login_password", password),
        )
        .await
    }

    pub async fn logout(&self) -> Result<(), ClientError> {
        self.execute(Command::new("logout")).await
    }

    /// Selects a virtual server by id.
    pub async fn use_server(&self, server_id: u32) -> Result<(), ClientError> {
        self.execute(Command::new("use").arg("sid", server_id)).await
    }

    /// Selects a virtual server by its voice port.
    pub async fn use_port(&self, port: u16) -> Result<(), ClientError> {
        self.execute(Command::new("use").arg("port", port)).await
    }

    pub async fn set_nickname(&self, nickname: &str) -> Result<(), ClientError> {
        self.execute(Command::new("clientupdate").arg("client_nickname", nickname))
            .await
    }

    /// Sends `quit` and closes the connection.
    pub async fn quit(&self) -> Result<(), ClientError> {
        self.conn.expect_close();
        let result = self.execute(Command::new("quit")).await;
        self.conn.disconnect();
        match result {
            // The server may close before the trailer is read.
            Err(ClientError::ConnectionClosed) => Ok(()),
            other => other,
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn version(&self) -> Result<VersionInfo, ClientError> {
        self.first(Command::new("version")).await
    }

    pub async fn whoami(&self) -> Result<WhoAmI, ClientError> {
        self.first(Command::new("whoami")).await
    }

    pub async fn client_list(&self) -> Result<Vec<ClientEntry>, ClientError> {
        let records = self.conn.request(&Command::new("clientlist")).await?;
        Ok(collect_views(&records)?)
    }

    pub async fn channel_list(&self) -> Result<Vec<ChannelEntry>, ClientError> {
        let records = self.conn.request(&Command::new("channellist")).await?;
        Ok(collect_views(&records)?)
    }

    // =========================================================================
    // Events and messages
    // =========================================================================

    /// Registers for a notification group. Registrations do not survive a
    /// reconnect.
    pub async fn register_events(
        &self,
        registration: EventRegistration,
    ) -> Result<(), ClientError> {
        self.execute(registration.command()).await
    }

    pub async fn register_all_events(&self) -> Result<(), ClientError> {
        for registration in EventRegistration::ALL {
            self.register_events(registration).await?;
        }
        Ok(())
    }

    pub async fn send_text_message(
        &self,
        target_mode: TextTarget,
        target: u32,
        message: &str,
    ) -> Result<(), ClientError> {
        self.execute(
            Command::new("sendtextmessage")
                .arg("targetmode", target_mode)
                .arg("target", target)
                .arg("msg", message),
        )
        .await
    }
}
