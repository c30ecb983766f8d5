//! Scripted mock query server for tests.
//!
//! Accepts one connection at a time, sends the banner and answers each
//! command by name from a script. Commands without a scripted reply get
//! `error id=0 msg=ok`. Every received line is recorded with its arrival
//! time so tests can check ordering and pacing.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

/// Successful trailer sent when nothing else is scripted.
pub const OK: &str = "error id=0 msg=ok";

const WELCOME: &str = r#"Welcome to the TeamSpeak 3 ServerQuery interface, type "help" for a list of commands and "help <command>" for information on a specific command."#;

/// Canned replies keyed by command name.
///
/// One-shot replies queued with [`MockScript::once`] take priority over the
/// standing reply set with [`MockScript::on`]. An empty reply means the
/// command is never answered.
#[derive(Debug, Clone)]
pub struct MockScript {
    banner: Vec<String>,
    standing: HashMap<String, Vec<String>>,
    queued: HashMap<String, VecDeque<Vec<String>>>,
}

impl Default for MockScript {
    fn default() -> Self {
        Self {
            banner: vec!["TS3".to_string(), WELCOME.to_string()],
            standing: HashMap::new(),
            queued: HashMap::new(),
        }
    }
}

impl MockScript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_banner<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.banner = lines.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the reply sent every time `command` arrives.
    pub fn on<I, S>(mut self, command: &str, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.standing
            .insert(command.to_string(), lines.into_iter().map(Into::into).collect());
        self
    }

    /// Queues a reply used once, before any standing reply.
    pub fn once<I, S>(mut self, command: &str, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.queued
            .entry(command.to_string())
            .or_default()
            .push_back(lines.into_iter().map(Into::into).collect());
        self
    }

    /// Never answers `command`.
    pub fn silent(self, command: &str) -> Self {
        self.on(command, Vec::<String>::new())
    }

    fn reply_for(&mut self, command: &str) -> Vec<String> {
        if let Some(reply) = self.queued.get_mut(command).and_then(VecDeque::pop_front) {
            return reply;
        }
        self.standing
            .get(command)
            .cloned()
            .unwrap_or_else(|| vec![OK.to_string()])
    }
}

/// A line received by the mock server.
#[derive(Debug, Clone)]
pub struct Received {
    pub line: String,
    pub at: Instant,
    /// Zero-based index of the connection it arrived on.
    pub connection: usize,
}

enum Control {
    Push(String),
    Drop,
}

struct State {
    script: Mutex<MockScript>,
    received: Mutex<Vec<Received>>,
    received_notify: Notify,
    accepted: AtomicUsize,
}

/// Running mock server bound to a loopback port.
pub struct MockServer {
    addr: SocketAddr,
    state: Arc<State>,
    control: mpsc::UnboundedSender<Control>,
    task: JoinHandle<()>,
}

impl MockServer {
    pub async fn start(script: MockScript) -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(State {
            script: Mutex::new(script),
            received: Mutex::new(Vec::new()),
            received_notify: Notify::new(),
            accepted: AtomicUsize::new(0),
        });
        let (control, control_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(accept_loop(listener, state.clone(), control_rx));
        Ok(Self {
            addr,
            state,
            control,
            task,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Replaces the script for subsequent commands.
    pub fn set_script(&self, script: MockScript) {
        *self.state.script.lock() = script;
    }

    /// Writes an unsolicited line (e.g. a notification) to the client.
    pub fn push_line(&self, line: impl Into<String>) {
        let _ = self.control.send(Control::Push(line.into()));
    }

    /// Closes the current connection from the server side.
    pub fn drop_connection(&self) {
        let _ = self.control.send(Control::Drop);
    }

    pub fn received(&self) -> Vec<Received> {
        self.state.received.lock().clone()
    }

    pub fn received_lines(&self) -> Vec<String> {
        self.state
            .received
            .lock()
            .iter()
            .map(|r| r.line.clone())
            .collect()
    }

    /// Number of connections accepted so far.
    pub fn accepted(&self) -> usize {
        self.state.accepted.load(Ordering::SeqCst)
    }

    /// Waits until at least `count` lines have been received.
    pub async fn wait_received(&self, count: usize) -> Vec<Received> {
        loop {
            let notified = self.state.received_notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let received = self.received();
            if received.len() >= count {
                return received;
            }
            notified.await;
        }
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn accept_loop(
    listener: TcpListener,
    state: Arc<State>,
    mut control: mpsc::UnboundedReceiver<Control>,
) {
    loop {
        let stream = match listener.accept().await {
            Ok((stream, _)) => stream,
            Err(e) => {
                tracing::debug!("mock accept failed: {}", e);
                return;
            }
        };
        let index = state.accepted.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = serve(stream, &state, index, &mut control).await {
            tracing::debug!("mock connection {} ended: {}", index, e);
        }
    }
}

async fn write_line(writer: &mut OwnedWriteHalf, line: &str) -> io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n\r").await
}

async fn serve(
    stream: TcpStream,
    state: &State,
    index: usize,
    control: &mut mpsc::UnboundedReceiver<Control>,
) -> io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let banner = state.script.lock().banner.clone();
    for line in &banner {
        write_line(&mut writer, line).await?;
    }

    let mut lines = BufReader::new(reader).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { return Ok(()) };
                let line = line.trim_end_matches('\r').to_string();
                let command = line.split(' ').next().unwrap_or_default().to_string();
                state.received.lock().push(Received {
                    line,
                    at: Instant::now(),
                    connection: index,
                });
                state.received_notify.notify_waiters();

                let reply = state.script.lock().reply_for(&command);
                for line in &reply {
                    write_line(&mut writer, line).await?;
                }
                if command == "quit" {
                    return Ok(());
                }
            }
            ctl = control.recv() => match ctl {
                Some(Control::Push(line)) => write_line(&mut writer, &line).await?,
                Some(Control::Drop) | None => return Ok(()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_banner_and_default_reply() {
        let server = MockServer::start(MockScript::new().on("version", [
            "version=3.13.7 build=1655727713 platform=Linux",
            OK,
        ]))
        .await
        .unwrap();

        let stream = TcpStream::connect(server.addr()).await.unwrap();
        let (r, mut w) = stream.into_split();
        let mut reader = BufReader::new(r);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        assert_eq!(line, "TS3\n");

        w.write_all(b"version\nwhoami\n").await.unwrap();
        let received = server.wait_received(2).await;
        assert_eq!(received[0].line, "version");
        assert_eq!(received[1].line, "whoami");
        assert_eq!(server.accepted(), 1);
    }
}
