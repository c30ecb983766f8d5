//! Command execution.

use clap::Subcommand;
use colored::Colorize;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tsquery_client::config::ClientConfig;
use tsquery_client::{Client, ClientError, Event, Record, TextTarget};

/// One-shot query commands.
#[derive(Subcommand)]
pub enum Query {
    /// Send a raw query command, e.g. `exec serverinfo`
    Exec {
        /// Command line, joined with spaces
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        line: Vec<String>,
    },

    /// Show the server version
    Version,

    /// Show the current query session
    Whoami,

    /// List connected clients
    Clients,

    /// List channels
    Channels,

    /// Send a text message to the selected virtual server
    Say {
        /// Message text
        message: String,
    },
}

/// Session state restored after every (re)connect.
#[derive(Debug, Clone, Default)]
pub struct SessionSetup {
    pub login: Option<(String, String)>,
    pub server_id: Option<u32>,
    pub nickname: Option<String>,
    pub register_events: bool,
}

impl SessionSetup {
    pub fn from_config(config: &ClientConfig, register_events: bool) -> Self {
        Self {
            login: config
                .login
                .as_ref()
                .map(|l| (l.username.clone(), l.password.clone())),
            server_id: config.server_id,
            nickname: config.nickname.clone(),
            register_events,
        }
    }

    /// Installs the connect hook on `client`.
    pub fn install(self, client: &Client) {
        client.connection().set_on_connect(move |conn| {
            let setup = self.clone();
            async move { setup.apply(&Client::from_connection(conn)).await }
        });
    }

    async fn apply(&self, client: &Client) -> Result<(), ClientError> {
        if let Some((user, password)) = &self.login {
            tracing::debug!("logging in as {}", user);
            client.login(user, password).await?;
        }
        if let Some(sid) = self.server_id {
            tracing::debug!("selecting virtual server {}", sid);
            client.use_server(sid).await?;
        }
        if let Some(nickname) = &self.nickname {
            client.set_nickname(nickname).await?;
        }
        if self.register_events {
            client.register_all_events().await?;
        }
        Ok(())
    }
}

/// Executes a command and returns the formatted output.
pub async fn execute(
    client: &Client,
    query: Query,
    json: bool,
) -> Result<String, Box<dyn std::error::Error>> {
    match query {
        Query::Exec { line } => {
            let records = client.raw(&line.join(" ")).await?;
            Ok(format_records(&records, json))
        }

        Query::Version => {
            let version = client.version().await?;
            if json {
                return to_json(&version);
            }
            Ok(format!(
                "{} {} (build {}) on {}",
                "TeamSpeak".bold(),
                version.version.cyan(),
                version.build,
                version.platform
            ))
        }

        Query::Whoami => {
            let whoami = client.whoami().await?;
            if json {
                return to_json(&whoami);
            }
            Ok(format!(
                "client {} ({}) on virtual server {} [{}]",
                whoami.client_id.to_string().cyan(),
                whoami.nickname.as_deref().unwrap_or("-"),
                whoami.server_id,
                whoami.server_status
            ))
        }

        Query::Clients => {
            let clients = client.client_list().await?;
            if json {
                return to_json(&clients);
            }
            let mut out = format!("{}", format!("{} client(s)", clients.len()).bold());
            for c in &clients {
                let kind = if c.is_query() {
                    " (query)".dimmed().to_string()
                } else {
                    String::new()
                };
                out.push_str(&format!(
                    "\n  {:>5}  {}{}  channel {}",
                    c.id,
                    c.nickname.cyan(),
                    kind,
                    c.channel_id
                ));
            }
            Ok(out)
        }

        Query::Channels => {
            let channels = client.channel_list().await?;
            if json {
                return to_json(&channels);
            }
            let mut out = format!("{}", format!("{} channel(s)", channels.len()).bold());
            for ch in &channels {
                out.push_str(&format!(
                    "\n  {:>5}  {}  ({} client(s))",
                    ch.id,
                    ch.name.cyan(),
                    ch.total_clients
                ));
            }
            Ok(out)
        }

        Query::Say { message } => {
            let whoami = client.whoami().await?;
            client
                .send_text_message(TextTarget::Server, whoami.server_id, &message)
                .await?;
            Ok("Sent".green().to_string())
        }
    }
}

/// Prints notifications until Ctrl+C or the connection closes.
pub async fn listen(client: &Client, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let mut events = client.connection().subscribe_events();
    eprintln!("{}", "Listening for events, press Ctrl+C to stop...".dimmed());

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => println!("{}", format_event(&event, json)),
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!("event subscriber lagged, {} events skipped", n);
                    eprintln!("{}: lagged {} events", "Warning".yellow(), n);
                }
                Err(RecvError::Closed) => {
                    eprintln!("{}", "Connection closed".red());
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\n{}", "Stopping...".dimmed());
                break;
            }
        }
    }
    Ok(())
}

pub fn format_event(event: &Event, json: bool) -> String {
    if json {
        return serde_json::to_string(event).unwrap_or_else(|e| e.to_string());
    }
    let fields: Vec<String> = event
        .record
        .iter()
        .map(|(key, value)| format!("{}={}", key.cyan(), value))
        .collect();
    format!(
        "{} {} {}",
        event.received_at.format("%H:%M:%S").to_string().dimmed(),
        event.kind.wire_name().yellow(),
        fields.join(" ")
    )
}

pub fn format_records(records: &[Record], json: bool) -> String {
    if json {
        return serde_json::to_string_pretty(records).unwrap_or_else(|e| e.to_string());
    }
    if records.is_empty() {
        return "ok".green().to_string();
    }
    records
        .iter()
        .map(|record| {
            record
                .iter()
                .map(|(key, value)| format!("{}={}", key.cyan(), value))
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn to_json<T: Serialize>(value: &T) -> Result<String, Box<dyn std::error::Error>> {
    Ok(serde_json::to_string_pretty(value)?)
}
