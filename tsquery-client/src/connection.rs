//! Connection management.

use crate::dispatcher::{run_dispatch, EventDispatcher, ListenerId};
use crate::error::ClientError;
use crate::event::{Event, EventKind};
use crate::handle::{run_guarded, ResultHandle};
use crate::keepalive::run_keepalive;
use crate::reader::run_reader;
use crate::reconnect::{Backoff, ReconnectStrategy};
use crate::session::Session;
use crate::writer::run_writer;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tsquery_protocol::{validate_banner, Command, Record, BANNER_LINES, DEFAULT_PORT};

/// Minimum spacing between commands accepted by a default server
/// configuration.
pub const DEFAULT_FLOOD_INTERVAL: Duration = Duration::from_millis(350);

/// Default capacity of the event broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Send rate applied by the writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FloodRate {
    /// One command per 350 ms, safe for servers that do not whitelist
    /// the client address.
    #[default]
    Default,
    /// No spacing. Only for whitelisted clients.
    Unlimited,
    Custom(Duration),
}

impl FloodRate {
    pub fn interval(&self) -> Duration {
        match self {
            FloodRate::Default => DEFAULT_FLOOD_INTERVAL,
            FloodRate::Unlimited => Duration::ZERO,
            FloodRate::Custom(interval) => *interval,
        }
    }
}

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Default wait for [`Connection::request`].
    pub request_timeout: Duration,
    pub flood_rate: FloodRate,
    /// Period of the keepalive query. `None` disables it.
    pub keepalive_interval: Option<Duration>,
    /// Time allowed for the server banner after connect.
    pub banner_timeout: Duration,
    pub event_channel_capacity: usize,
    pub reconnect: ReconnectStrategy,
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            flood_rate: FloodRate::Default,
            keepalive_interval: Some(Duration::from_secs(60)),
            banner_timeout: Duration::from_secs(10),
            event_channel_capacity: EVENT_CHANNEL_CAPACITY,
            reconnect: ReconnectStrategy::default(),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_flood_rate(mut self, rate: FloodRate) -> Self {
        self.flood_rate = rate;
        self
    }

    pub fn with_keepalive_interval(mut self, interval: Option<Duration>) -> Self {
        self.keepalive_interval = interval;
        self
    }

    pub fn with_banner_timeout(mut self, timeout: Duration) -> Self {
        self.banner_timeout = timeout;
        self
    }

    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    pub fn with_reconnect(mut self, strategy: ReconnectStrategy) -> Self {
        self.reconnect = strategy;
        self
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::new("127.0.0.1", DEFAULT_PORT)
    }
}

/// Lifecycle state of a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Permanently closed after a drop under
    /// [`ReconnectStrategy::Disconnect`].
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

type ConnectHook =
    Arc<dyn Fn(Connection) -> BoxFuture<'static, Result<(), ClientError>> + Send + Sync>;
type DisconnectHook = Arc<dyn Fn(&ClientError) + Send + Sync>;

struct Inner {
    config: ConnectionConfig,
    state: watch::Sender<ConnectionState>,
    session: RwLock<Option<Arc<Session>>>,
    dispatcher: Arc<EventDispatcher>,
    on_connect: RwLock<Option<ConnectHook>>,
    on_disconnect: RwLock<Option<DisconnectHook>>,
    /// Bumped by every explicit disconnect; stale connect attempts and
    /// reconnect loops compare against it and give up.
    generation: AtomicU64,
    connect_lock: tokio::sync::Mutex<()>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().take() {
            session.mark_closed_by_user();
            session.teardown(ClientError::ConnectionClosed);
        }
    }
}

/// A query connection.
///
/// Commands are queued and sent one at a time; each waits for the previous
/// command's error trailer before it goes out. Cloning yields another handle
/// to the same connection.
///
/// When the socket drops, every queued or in-flight command fails with
/// [`ClientError::ConnectionClosed`]. Nothing is replayed after a
/// reconnect; the connect hook is the place to restore server-side session
/// state such as login and the selected virtual server.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("address", &self.inner.config.address())
            .field("state", &self.state())
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl Connection {
    /// Creates a new connection (not yet connected).
    pub fn new(config: ConnectionConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let dispatcher = Arc::new(EventDispatcher::new(config.event_channel_capacity));
        Self {
            inner: Arc::new(Inner {
                config,
                state,
                session: RwLock::new(None),
                dispatcher,
                on_connect: RwLock::new(None),
                on_disconnect: RwLock::new(None),
                generation: AtomicU64::new(0),
                connect_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Creates a connection and connects it.
    pub async fn open(config: ConnectionConfig) -> Result<Self, ClientError> {
        let conn = Self::new(config);
        conn.connect().await?;
        Ok(conn)
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    /// Sets the hook run after every successful (re)connect, before the
    /// connection reports [`ConnectionState::Connected`].
    ///
    /// Commands submitted from the hook are sent normally. If the hook
    /// fails, the new socket is closed and the connect attempt fails with
    /// the hook's error.
    pub fn set_on_connect<F, Fut>(&self, hook: F)
    where
        F: Fn(Connection) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ClientError>> + Send + 'static,
    {
        let hook: ConnectHook =
            Arc::new(move |conn: Connection| -> BoxFuture<'static, Result<(), ClientError>> {
                Box::pin(hook(conn))
            });
        *self.inner.on_connect.write() = Some(hook);
    }

    /// Sets the hook invoked when the connection drops unexpectedly.
    pub fn set_on_disconnect<F>(&self, hook: F)
    where
        F: Fn(&ClientError) + Send + Sync + 'static,
    {
        *self.inner.on_disconnect.write() = Some(Arc::new(hook));
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Watches state transitions.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.inner.state.send_replace(state);
        if previous != state {
            tracing::debug!(
                "connection {}: {} -> {}",
                self.inner.config.address(),
                previous,
                state
            );
        }
    }

    /// Connects to the server.
    ///
    /// No-op if already connected. Fails with [`ClientError::Closed`] once
    /// the connection has been closed for good.
    pub async fn connect(&self) -> Result<(), ClientError> {
        let _guard = self.inner.connect_lock.lock().await;
        match self.state() {
            ConnectionState::Closed => return Err(ClientError::Closed),
            ConnectionState::Connected => return Ok(()),
            _ => {}
        }
        let generation = self.inner.generation.load(Ordering::SeqCst);
        self.connect_locked(generation).await
    }

    async fn connect_locked(&self, generation: u64) -> Result<(), ClientError> {
        self.set_state(ConnectionState::Connecting);
        match self.try_connect(generation).await {
            Ok(()) => {
                tracing::info!("connected to {}", self.inner.config.address());
                Ok(())
            }
            Err(e) => {
                if self.state() == ConnectionState::Connecting {
                    self.set_state(ConnectionState::Disconnected);
                }
                Err(e)
            }
        }
    }

    async fn try_connect(&self, generation: u64) -> Result<(), ClientError> {
        let (reader, writer) = establish(&self.inner.config).await?;
        let session = self.start_session(reader, writer, generation)?;

        let hook = self.inner.on_connect.read().clone();
        if let Some(hook) = hook {
            if let Err(e) = hook(self.clone()).await {
                tracing::warn!("connect hook failed: {}", e);
                self.discard_session(&session);
                return Err(e);
            }
        }

        if self.inner.generation.load(Ordering::SeqCst) != generation {
            self.discard_session(&session);
            return Err(ClientError::Cancelled);
        }

        // Held across the transition so a concurrent loss report is applied
        // after it, never overwritten by it.
        let current = self.inner.session.read();
        let live = !session.is_torn_down()
            && current.as_ref().is_some_and(|s| Arc::ptr_eq(s, &session));
        if !live {
            tracing::warn!("connection lost while running the connect hook");
            return Err(ClientError::ConnectionClosed);
        }
        self.set_state(ConnectionState::Connected);
        Ok(())
    }

    /// Installs a session over a fresh socket and spawns its tasks.
    fn start_session(
        &self,
        reader: BufReader<OwnedReadHalf>,
        writer: OwnedWriteHalf,
        generation: u64,
    ) -> Result<Arc<Session>, ClientError> {
        let (session, lost_rx) = Session::new();
        {
            let mut current = self.inner.session.write();
            // A disconnect raced with this attempt.
            if self.inner.generation.load(Ordering::SeqCst) != generation {
                return Err(ClientError::Cancelled);
            }
            if let Some(old) = current.replace(session.clone()) {
                old.mark_closed_by_user();
                old.teardown(ClientError::ConnectionClosed);
            }
        }

        let config = &self.inner.config;
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_dispatch(self.inner.dispatcher.clone(), event_rx));
        tokio::spawn(run_reader(reader, session.clone(), event_tx));
        tokio::spawn(run_writer(writer, session.clone(), config.flood_rate.interval()));
        if let Some(period) = config.keepalive_interval {
            tokio::spawn(run_keepalive(session.clone(), period));
        }

        let weak = Arc::downgrade(&self.inner);
        let watched = session.clone();
        tokio::spawn(async move {
            // Err means the session was torn down without a loss report.
            let Ok(err) = lost_rx.await else { return };
            if let Some(inner) = weak.upgrade() {
                Connection { inner }.handle_lost(watched, err);
            }
        });

        tracing::debug!(session = session.id(), "session started");
        Ok(session)
    }

    fn discard_session(&self, session: &Arc<Session>) {
        session.mark_closed_by_user();
        {
            let mut current = self.inner.session.write();
            if current.as_ref().is_some_and(|s| Arc::ptr_eq(s, session)) {
                *current = None;
            }
        }
        session.teardown(ClientError::ConnectionClosed);
    }

    fn handle_lost(&self, session: Arc<Session>, err: ClientError) {
        if session.is_closed_by_user() {
            return;
        }
        {
            let mut current = self.inner.session.write();
            match current.as_ref() {
                Some(s) if Arc::ptr_eq(s, &session) => *current = None,
                _ => return,
            }
        }

        let failed = session.teardown(ClientError::ConnectionClosed);
        tracing::warn!(
            "connection to {} lost: {} ({} pending command(s) failed)",
            self.inner.config.address(),
            err,
            failed
        );
        self.set_state(ConnectionState::Disconnected);

        let hook = self.inner.on_disconnect.read().clone();
        if let Some(hook) = hook {
            run_guarded("disconnect hook", || hook(&err));
        }

        match self.inner.config.reconnect.clone() {
            ReconnectStrategy::UserControlled => {}
            ReconnectStrategy::Disconnect => {
                tracing::info!("reconnect strategy is disconnect, closing");
                self.set_state(ConnectionState::Closed);
            }
            ReconnectStrategy::Retry(backoff) => {
                let generation = self.inner.generation.load(Ordering::SeqCst);
                let weak = Arc::downgrade(&self.inner);
                tokio::spawn(retry_loop(weak, backoff, generation));
            }
        }
    }

    /// Closes the connection.
    ///
    /// Pending commands fail with [`ClientError::ConnectionClosed`]. Any
    /// reconnect loop in progress stops. The connection can be connected
    /// again afterwards.
    pub fn disconnect(&self) {
        let session = {
            let mut current = self.inner.session.write();
            self.inner.generation.fetch_add(1, Ordering::SeqCst);
            current.take()
        };

        if let Some(session) = session {
            session.mark_closed_by_user();
            let failed = session.teardown(ClientError::ConnectionClosed);
            tracing::info!(
                "disconnected from {} ({} pending command(s) failed)",
                self.inner.config.address(),
                failed
            );
        }
        if self.state() != ConnectionState::Closed {
            self.set_state(ConnectionState::Disconnected);
        }
    }

    /// Marks the current socket as closing on request, so the server
    /// hanging up is not handled as a connection loss.
    pub(crate) fn expect_close(&self) {
        if let Some(session) = self.inner.session.read().as_ref() {
            session.mark_closed_by_user();
        }
    }

    /// Queues a command.
    ///
    /// The returned handle resolves with the response records once the
    /// error trailer arrives.
    pub fn submit(&self, command: &Command) -> Result<ResultHandle<Vec<Record>>, ClientError> {
        if self.state() == ConnectionState::Closed {
            return Err(ClientError::Closed);
        }
        let session = self
            .inner
            .session
            .read()
            .clone()
            .ok_or(ClientError::NotConnected)?;
        session.submit(command)
    }

    /// Sends a command and waits for its records, up to the configured
    /// request timeout.
    ///
    /// A timeout does not withdraw the command; it stays queued and later
    /// commands wait behind it.
    pub async fn request(&self, command: &Command) -> Result<Vec<Record>, ClientError> {
        self.request_with_timeout(command, self.inner.config.request_timeout)
            .await
    }

    pub async fn request_with_timeout(
        &self,
        command: &Command,
        timeout: Duration,
    ) -> Result<Vec<Record>, ClientError> {
        self.submit(command)?.get_timeout(timeout).await
    }

    /// Blocking form of [`request_with_timeout`](Self::request_with_timeout)
    /// for threads outside the runtime.
    pub fn submit_and_block(
        &self,
        command: &Command,
        timeout: Duration,
    ) -> Result<Vec<Record>, ClientError> {
        self.submit(command)?.get_blocking_timeout(timeout)
    }

    /// Registers a listener for one event kind.
    pub fn register_listener<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.inner.dispatcher.register(kind, listener)
    }

    /// Registers a listener for every event kind.
    pub fn register_any_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.inner.dispatcher.register_any(listener)
    }

    pub fn unregister_listener(&self, id: ListenerId) -> bool {
        self.inner.dispatcher.unregister(id)
    }

    /// Subscribes to every event received on this connection.
    pub fn subscribe_events(&self) -> broadcast::Receiver<Event> {
        self.inner.dispatcher.subscribe()
    }

    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.inner.dispatcher
    }

    /// Number of commands queued or awaiting an answer.
    pub fn pending_count(&self) -> usize {
        self.inner
            .session
            .read()
            .as_ref()
            .map_or(0, |s| s.queue.len())
    }

    /// Names of pending commands, oldest first.
    pub fn pending_commands(&self) -> Vec<String> {
        self.inner
            .session
            .read()
            .as_ref()
            .map(|s| {
                s.queue
                    .snapshot()
                    .iter()
                    .map(|e| e.name().to_string())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn unknown_event_count(&self) -> u64 {
        self.inner.dispatcher.unknown_event_count()
    }
}

async fn retry_loop(weak: Weak<Inner>, backoff: Arc<dyn Backoff>, generation: u64) {
    let mut attempt: u32 = 0;
    loop {
        let delay = backoff.delay(attempt);
        tracing::info!(attempt, "reconnecting in {:?} ({})", delay, backoff.name());
        tokio::time::sleep(delay).await;

        let Some(inner) = weak.upgrade() else { return };
        let conn = Connection { inner };
        {
            let _guard = conn.inner.connect_lock.lock().await;
            if conn.inner.generation.load(Ordering::SeqCst) != generation {
                tracing::debug!("reconnect cancelled");
                return;
            }
            match conn.state() {
                ConnectionState::Connected => return,
                ConnectionState::Closed => return,
                _ => {}
            }
            match conn.connect_locked(generation).await {
                Ok(()) => {
                    tracing::info!(attempt, "reconnected to {}", conn.inner.config.address());
                    return;
                }
                Err(ClientError::Cancelled) => return,
                Err(e) => tracing::warn!(attempt, "reconnect failed: {}", e),
            }
        }
        attempt = attempt.saturating_add(1);
    }
}

/// Opens the socket and consumes the banner.
async fn establish(
    config: &ConnectionConfig,
) -> Result<(BufReader<OwnedReadHalf>, OwnedWriteHalf), ClientError> {
    tracing::debug!("connecting to {}...", config.address());

    let stream = tokio::time::timeout(
        config.connect_timeout,
        TcpStream::connect((config.host.as_str(), config.port)),
    )
    .await
    .map_err(|_| {
        tracing::debug!("connect timeout");
        ClientError::Timeout
    })?
    .map_err(|e| {
        tracing::debug!("connect failed: {}", e);
        ClientError::Io(e)
    })?;

    stream.set_nodelay(true).ok();
    let (read_half, write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    tokio::time::timeout(config.banner_timeout, read_banner(&mut reader))
        .await
        .map_err(|_| {
            tracing::debug!("banner timeout");
            ClientError::Timeout
        })??;

    Ok((reader, write_half))
}

/// Reads the banner. Only the first line is checked.
async fn read_banner<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<(), ClientError> {
    let mut line = String::new();
    for i in 0..BANNER_LINES {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Err(ClientError::ConnectionClosed);
        }
        if i == 0 {
            validate_banner(&line)?;
        } else {
            tracing::debug!("banner: {}", line.trim());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockScript, MockServer, OK};
    use std::sync::atomic::AtomicUsize;

    fn config(server: &MockServer) -> ConnectionConfig {
        ConnectionConfig::new("127.0.0.1", server.port())
            .with_flood_rate(FloodRate::Unlimited)
            .with_keepalive_interval(None)
            .with_request_timeout(Duration::from_secs(5))
    }

    async fn wait_state(conn: &Connection, state: ConnectionState) {
        let mut rx = conn.state_changes();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == state))
            .await
            .expect("state change timed out")
            .unwrap();
    }

    #[tokio::test]
    async fn test_connect_and_request() {
        let server = MockServer::start(MockScript::new().on(
            "clientlist",
            ["clid=1 client_nickname=Alice|clid=2 client_nickname=Bob", OK],
        ))
        .await
        .unwrap();

        let conn = Connection::open(config(&server)).await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Connected);

        let records = conn.request(&Command::new("clientlist")).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get("client_nickname"), Some("Alice"));
        assert_eq!(records[1].get("client_nickname"), Some("Bob"));
        assert_eq!(records[1].get_u32("clid"), Some(2));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_submit_and_block_from_plain_thread() {
        let server = MockServer::start(MockScript::new().on("whoami", ["client_id=7", OK]))
            .await
            .unwrap();
        let conn = Connection::open(config(&server)).await.unwrap();

        let blocking = conn.clone();
        let records = tokio::task::spawn_blocking(move || {
            blocking.submit_and_block(&Command::new("whoami"), Duration::from_secs(5))
        })
        .await
        .unwrap()
        .unwrap();
        assert_eq!(records[0].get_u32("client_id"), Some(7));
    }

    #[tokio::test]
    async fn test_invalid_banner_rejected() {
        let server = MockServer::start(MockScript::new().with_banner(["SSH-2.0", "hello"]))
            .await
            .unwrap();
        let conn = Connection::new(config(&server));
        let err = conn.connect().await.unwrap_err();
        assert!(matches!(err, ClientError::Protocol(_)));
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_server_error_resolves_failure() {
        let server = MockServer::start(
            MockScript::new().on("login", ["error id=520 msg=invalid\\sloginname\\sor\\spassword"]),
        )
        .await
        .unwrap();
        let conn = Connection::open(config(&server)).await.unwrap();

        let err = conn
            .request(&Command::new("login").value("serveradmin").value("wrong"))
            .await
            .unwrap_err();
        match err {
            ClientError::ServerError { id, message, .. } => {
                assert_eq!(id, 520);
                assert_eq!(message, "invalid loginname or password");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            server.received_lines(),
            vec!["login serveradmin wrong".to_string()]
        );
    }

    #[tokio::test]
    async fn test_responses_correlate_in_order_with_events_between() {
        let server = MockServer::start(
            MockScript::new()
                .on("first", ["n=1", "notifytextmessage targetmode=3 msg=hi", OK])
                .on("second", ["notifyclientleftview clid=4", "n=2|n=3", OK])
                .on("third", ["error id=1281 msg=database\\sempty\\sresult\\sset"]),
        )
        .await
        .unwrap();
        let conn = Connection::open(config(&server)).await.unwrap();
        let mut events = conn.subscribe_events();

        let h1 = conn.submit(&Command::new("first")).unwrap();
        let h2 = conn.submit(&Command::new("second")).unwrap();
        let h3 = conn.submit(&Command::new("third")).unwrap();

        let r1 = h1.get().await.unwrap();
        assert_eq!(r1.len(), 1);
        assert_eq!(r1[0].get("n"), Some("1"));
        let r2 = h2.get().await.unwrap();
        assert_eq!(r2.len(), 2);
        assert_eq!(r2[1].get("n"), Some("3"));
        assert!(matches!(
            h3.get().await,
            Err(ClientError::ServerError { id: 1281, .. })
        ));

        assert_eq!(events.recv().await.unwrap().kind, EventKind::TextMessage);
        assert_eq!(events.recv().await.unwrap().kind, EventKind::ClientLeftView);
        assert_eq!(server.received_lines(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_flood_rate_spaces_commands() {
        let server = MockServer::start(MockScript::new()).await.unwrap();
        let conn = Connection::open(config(&server).with_flood_rate(FloodRate::Default))
            .await
            .unwrap();

        let handles: Vec<_> = (0..3)
            .map(|i| conn.submit(&Command::new(format!("cmd{}", i))).unwrap())
            .collect();
        crate::handle::await_all(&handles).await.unwrap();

        let received = server.received();
        assert_eq!(received.len(), 3);
        for pair in received.windows(2) {
            // Allow for timer granularity on the receiving side.
            let gap = pair[1].at.duration_since(pair[0].at);
            assert!(gap >= Duration::from_millis(340), "gap {:?}", gap);
        }
    }

    #[tokio::test]
    async fn test_drop_fails_all_pending() {
        let server = MockServer::start(MockScript::new().silent("hang")).await.unwrap();
        let conn = Connection::open(
            config(&server).with_reconnect(ReconnectStrategy::UserControlled),
        )
        .await
            .unwrap();

        let handles: Vec<_> = ["hang", "b", "c"]
            .iter()
            .map(|name| conn.submit(&Command::new(*name)).unwrap())
            .collect();
        server.wait_received(1).await;
        assert_eq!(conn.pending_count(), 3);
        assert_eq!(conn.pending_commands(), vec!["hang", "b", "c"]);

        server.drop_connection();
        for handle in &handles {
            assert!(matches!(
                handle.get().await,
                Err(ClientError::ConnectionClosed)
            ));
        }
        wait_state(&conn, ConnectionState::Disconnected).await;
        assert_eq!(conn.pending_count(), 0);
        assert!(matches!(
            conn.submit(&Command::new("late")),
            Err(ClientError::NotConnected)
        ));

        // User-controlled: reconnecting is up to the caller.
        conn.connect().await.unwrap();
        assert!(conn.request(&Command::new("version")).await.is_ok());
    }

    #[tokio::test]
    async fn test_disconnect_strategy_closes_for_good() {
        let server = MockServer::start(MockScript::new()).await.unwrap();
        let conn = Connection::open(config(&server)).await.unwrap();
        let lost = Arc::new(AtomicUsize::new(0));
        let l = lost.clone();
        conn.set_on_disconnect(move |_| {
            l.fetch_add(1, Ordering::SeqCst);
        });

        server.drop_connection();
        wait_state(&conn, ConnectionState::Closed).await;
        assert_eq!(lost.load(Ordering::SeqCst), 1);
        assert!(matches!(
            conn.submit(&Command::new("version")),
            Err(ClientError::Closed)
        ));
        assert!(matches!(conn.connect().await, Err(ClientError::Closed)));
    }

    #[tokio::test]
    async fn test_reconnect_runs_connect_hook_again() {
        let server = MockServer::start(MockScript::new()).await.unwrap();
        let conn = Connection::new(
            config(&server).with_reconnect(ReconnectStrategy::constant(Duration::from_millis(50))),
        );
        let connects = Arc::new(AtomicUsize::new(0));
        let c = connects.clone();
        conn.set_on_connect(move |conn| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                conn.request(&Command::new("use").arg("sid", 1)).await?;
                Ok(())
            }
        });

        conn.connect().await.unwrap();
        assert_eq!(connects.load(Ordering::SeqCst), 1);

        server.drop_connection();
        server.wait_received(2).await;
        wait_state(&conn, ConnectionState::Connected).await;

        assert_eq!(connects.load(Ordering::SeqCst), 2);
        assert_eq!(server.accepted(), 2);
        let received = server.received();
        assert_eq!(received[1].line, "use sid=1");
        assert_eq!(received[1].connection, 1);

        conn.disconnect();
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_loss_during_connect_hook_is_retried() {
        let server = MockServer::start(MockScript::new()).await.unwrap();
        let conn = Connection::new(
            config(&server).with_reconnect(ReconnectStrategy::constant(Duration::from_millis(20))),
        );
        let runs = Arc::new(AtomicUsize::new(0));
        let r = runs.clone();
        conn.set_on_connect(move |_conn| {
            let first = r.fetch_add(1, Ordering::SeqCst) == 0;
            async move {
                if first {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                }
                Ok(())
            }
        });

        let connecting = {
            let conn = conn.clone();
            tokio::spawn(async move { conn.connect().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        server.drop_connection();

        let result = connecting.await.unwrap();
        assert!(matches!(result, Err(ClientError::ConnectionClosed)));

        wait_state(&conn, ConnectionState::Connected).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(server.accepted(), 2);
        conn.request(&Command::new("whoami")).await.unwrap();

        conn.disconnect();
    }

    #[tokio::test]
    async fn test_loss_during_connect_hook_closes_under_disconnect_strategy() {
        let server = MockServer::start(MockScript::new()).await.unwrap();
        let conn = Connection::new(config(&server));
        conn.set_on_connect(|_conn| async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        });

        let connecting = {
            let conn = conn.clone();
            tokio::spawn(async move { conn.connect().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        server.drop_connection();

        assert!(connecting.await.unwrap().is_err());
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(matches!(
            conn.submit(&Command::new("whoami")),
            Err(ClientError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_failing_connect_hook_fails_connect() {
        let server = MockServer::start(MockScript::new().on("login", ["error id=520 msg=denied"]))
            .await
            .unwrap();
        let conn = Connection::new(config(&server));
        conn.set_on_connect(|conn| async move {
            conn.request(&Command::new("login").value("a").value("b"))
                .await
                .map(|_| ())
        });

        let err = conn.connect().await.unwrap_err();
        assert!(matches!(err, ClientError::ServerError { id: 520, .. }));
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert_eq!(conn.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_event_does_not_break_reader() {
        let server = MockServer::start(MockScript::new()).await.unwrap();
        let conn = Connection::open(config(&server)).await.unwrap();
        let mut events = conn.subscribe_events();

        server.push_line("notifybrandnew x=1");
        server.push_line("notifytextmessage targetmode=1 msg=ping invokerid=3");
        let event = events.recv().await.unwrap();
        assert_eq!(event.message(), Some("ping"));
        assert_eq!(conn.unknown_event_count(), 1);

        assert!(conn.request(&Command::new("whoami")).await.is_ok());
    }

    #[tokio::test]
    async fn test_user_disconnect_fails_pending_without_reconnect() {
        let server = MockServer::start(MockScript::new().silent("hang")).await.unwrap();
        let conn = Connection::open(
            config(&server).with_reconnect(ReconnectStrategy::constant(Duration::from_millis(10))),
        )
        .await
        .unwrap();

        let handle = conn.submit(&Command::new("hang")).unwrap();
        server.wait_received(1).await;
        conn.disconnect();

        assert!(matches!(
            handle.get().await,
            Err(ClientError::ConnectionClosed)
        ));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert_eq!(server.accepted(), 1);
    }

    #[tokio::test]
    async fn test_read_banner_discards_welcome() {
        let input: &[u8] = b"TS3\n\rWelcome\n\rerror id=0 msg=ok\n\r";
        let mut reader = tokio::io::BufReader::new(input);
        read_banner(&mut reader).await.unwrap();
        let mut rest = String::new();
        reader.read_line(&mut rest).await.unwrap();
        assert_eq!(rest.trim(), "error id=0 msg=ok");
    }
}
