//! Interactive REPL.

use crate::commands::format_records;
use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{Config, Editor};
use tsquery_client::Client;

const HELP_TEXT: &str = r#"
Any other line is sent to the server as a raw query command, e.g.
  serverinfo
  clientlist -uid -away
  use sid=1
  sendtextmessage targetmode=3 target=1 msg=hello\sworld

REPL commands:
  .help                         Show this help
  .json                         Toggle JSON output
  .status                       Show connection state
  .pending                      Show commands waiting for a reply
  .quit, .exit                  Exit the REPL
"#;

enum Outcome {
    Print(String),
    Exit,
}

pub async fn run(
    client: &Client,
    address: &str,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", "tsquery".bold().cyan());
    println!("Connected to {}", address);

    let config = Config::builder()
        .history_ignore_space(true)
        .auto_add_history(true)
        .build();
    let mut rl: Editor<(), DefaultHistory> = Editor::with_config(config)?;

    let history_path = std::env::var("HOME")
        .map(|h| std::path::PathBuf::from(h).join(".tsquery_history"))
        .unwrap_or_else(|_| ".tsquery_history".into());
    let _ = rl.load_history(&history_path);

    println!("Type '.help' for available commands.\n");

    let mut json = json;
    loop {
        let prompt = format!("{} ", "tsquery>".cyan());
        match rl.readline(&prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                match execute_line(client, line, &mut json).await {
                    Ok(Outcome::Print(output)) => println!("{}\n", output),
                    Ok(Outcome::Exit) => break,
                    Err(e) => println!("{}: {}\n", "Error".red(), e),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("^D");
                break;
            }
            Err(err) => {
                println!("{}: {:?}", "Error".red(), err);
                break;
            }
        }
    }

    let _ = rl.save_history(&history_path);
    println!("{}", "Disconnected.".dimmed());

    Ok(())
}

async fn execute_line(
    client: &Client,
    line: &str,
    json: &mut bool,
) -> Result<Outcome, Box<dyn std::error::Error>> {
    match line {
        ".help" | ".h" | "?" => Ok(Outcome::Print(HELP_TEXT.to_string())),

        ".quit" | ".exit" | ".q" | "quit" | "exit" => Ok(Outcome::Exit),

        ".json" => {
            *json = !*json;
            let mode = if *json { "on" } else { "off" };
            Ok(Outcome::Print(format!("JSON output {}", mode.cyan())))
        }

        ".status" => {
            let conn = client.connection();
            Ok(Outcome::Print(format!(
                "state: {}  pending: {}  unknown events: {}",
                conn.state().to_string().cyan(),
                conn.pending_count(),
                conn.unknown_event_count()
            )))
        }

        ".pending" => {
            let pending = client.connection().pending_commands();
            if pending.is_empty() {
                return Ok(Outcome::Print("none".dimmed().to_string()));
            }
            Ok(Outcome::Print(pending.join("\n")))
        }

        _ => {
            let records = client.raw(line).await?;
            Ok(Outcome::Print(format_records(&records, *json)))
        }
    }
}
