//! tsquery - Command-line client for the TeamSpeak 3 ServerQuery interface
//!
//! Provides one-shot commands, an event listener and a REPL.

mod commands;
mod repl;

use clap::{Parser, Subcommand};
use colored::Colorize;
use commands::{Query, SessionSetup};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use tsquery_client::config::{ClientConfig, FloodSetting, LoginConfig};
use tsquery_client::Client;

#[derive(Parser)]
#[command(name = "tsquery")]
#[command(about = "Command-line client for the TeamSpeak 3 ServerQuery interface")]
#[command(version)]
struct Cli {
    /// Server host
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// ServerQuery port
    #[arg(short, long)]
    port: Option<u16>,

    /// YAML config file
    #[arg(short, long, env = "TSQUERY_CONFIG")]
    config: Option<PathBuf>,

    /// Query login name
    #[arg(short, long)]
    user: Option<String>,

    /// Query password
    #[arg(long, hide_env_values = true, env = "TSQUERY_PASSWORD")]
    password: Option<String>,

    /// Virtual server to select after login
    #[arg(short, long)]
    server_id: Option<u32>,

    /// Nickname to use once a virtual server is selected
    #[arg(short, long)]
    nickname: Option<String>,

    /// Disable flood control (only for whitelisted addresses)
    #[arg(long)]
    unlimited: bool,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start interactive REPL
    Repl,

    /// Print server notifications until interrupted
    Listen,

    #[command(flatten)]
    Query(Query),
}

impl Cli {
    /// Resolves the effective configuration: file, then environment, then
    /// command-line flags.
    fn resolve_config(&self) -> Result<ClientConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => ClientConfig::from_file(path)?,
            None => ClientConfig::default(),
        };
        config.apply_env_overrides();

        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if self.unlimited {
            config.server.flood_rate = FloodSetting::Unlimited;
        }
        if let Some(user) = &self.user {
            let login = config.login.get_or_insert_with(LoginConfig::default);
            login.username = user.clone();
        }
        if let Some(password) = &self.password {
            if let Some(login) = config.login.as_mut() {
                login.password = password.clone();
            }
        }
        if self.server_id.is_some() {
            config.server_id = self.server_id;
        }
        if self.nickname.is_some() {
            config.nickname = self.nickname.clone();
        }

        config.validate()?;
        tracing::debug!(
            "resolved config: {} (login: {}, flood rate: {:?}, reconnect: {:?})",
            config.to_connection_config().address(),
            config.login.is_some(),
            config.server.flood_rate,
            config.reconnect.strategy
        );
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match cli.resolve_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(2);
        }
    };

    let address = config.to_connection_config().address();
    let client = Client::new(config.to_connection_config());
    let listen = matches!(cli.command, Some(Commands::Listen));
    SessionSetup::from_config(&config, listen).install(&client);

    if let Err(e) = client.connect().await {
        eprintln!("{} to {}: {}", "Connection failed".red(), address, e);
        std::process::exit(1);
    }

    match cli.command {
        Some(Commands::Repl) | None => {
            repl::run(&client, &address, cli.json).await?;
        }
        Some(Commands::Listen) => {
            commands::listen(&client, cli.json).await?;
        }
        Some(Commands::Query(query)) => match commands::execute(&client, query, cli.json).await {
            Ok(output) => println!("{}", output),
            Err(e) => {
                eprintln!("{}: {}", "Error".red(), e);
                let _ = client.quit().await;
                std::process::exit(1);
            }
        },
    }

    if let Err(e) = client.quit().await {
        tracing::debug!("quit failed: {}", e);
    }
    Ok(())
}
