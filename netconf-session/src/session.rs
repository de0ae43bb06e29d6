//! Session engine: owns the transport, runs the receive loop and funnels every outgoing message
//! through a single writer task.
//!
//! ```text
//!  callers ── send_rpc ──> Registry.register ──> writer task ──> transport
//!                                                                    │
//!  callers <── PendingRequest <── Registry.deliver_* <── Framer <── receive loop
//! ```
use crate::capability::{negotiate, BaseVersion, Capabilities};
use crate::dispatch::{Inbound, PendingRequest, Registry};
use crate::error::{NetconfError, NetconfResult};
use crate::framer::{Framer, Framing, DEFAULT_MAX_MESSAGE_SIZE};
use crate::message::{rpc_envelope, Greeting, Hello};
use crate::transport::Transport;
use crate::{NETCONF_BASE_10_CAP, NETCONF_BASE_11_CAP};
use core::time::Duration;
use log::{debug, error, trace, warn};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    capabilities: Vec<String>,
    hello_timeout: Duration,
    close_timeout: Duration,
    request_timeout: Option<Duration>,
    read_buffer_size: usize,
    max_message_size: usize,
    queue_depth: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            capabilities: vec![
                NETCONF_BASE_10_CAP.to_string(),
                NETCONF_BASE_11_CAP.to_string(),
            ],
            hello_timeout: Duration::from_secs(30),
            close_timeout: Duration::from_secs(10),
            request_timeout: None,
            read_buffer_size: 8 * 1024,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            queue_depth: 64,
        }
    }
}

impl SessionConfig {
    /// Capabilities announced in our `<hello>`, full URIs or abbreviations like `:candidate`.
    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_hello_timeout(mut self, hello_timeout: Duration) -> Self {
        self.hello_timeout = hello_timeout;
        self
    }

    pub fn with_close_timeout(mut self, close_timeout: Duration) -> Self {
        self.close_timeout = close_timeout;
        self
    }

    /// Default deadline for [Session::rpc]. Without one it waits until the session closes.
    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = Some(request_timeout);
        self
    }

    pub fn with_read_buffer_size(mut self, read_buffer_size: usize) -> Self {
        self.read_buffer_size = read_buffer_size.max(1);
        self
    }

    /// Inbound messages larger than this close the session with a framing error.
    pub fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.max_message_size = max_message_size;
        self
    }

    pub fn with_queue_depth(mut self, queue_depth: usize) -> Self {
        self.queue_depth = queue_depth.max(1);
        self
    }
}

/// Lifecycle of a session. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum SessionState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl SessionState {
    fn from_u8(value: u8) -> SessionState {
        match value {
            0 => SessionState::Connecting,
            1 => SessionState::Open,
            2 => SessionState::Closing,
            _ => SessionState::Closed,
        }
    }
}

struct StateCell(AtomicU8);

impl StateCell {
    fn new() -> StateCell {
        StateCell(AtomicU8::new(SessionState::Connecting as u8))
    }

    fn get(&self) -> SessionState {
        SessionState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Moves to `state` unless already past it. Returns the previous state.
    fn advance(&self, state: SessionState) -> SessionState {
        SessionState::from_u8(self.0.fetch_max(state as u8, Ordering::AcqRel))
    }
}

struct Shared {
    state: StateCell,
    registry: Registry,
}

impl Shared {
    /// Closes the session for good and fails whatever is still pending.
    fn teardown(&self, err: NetconfError) {
        if self.state.advance(SessionState::Closed) == SessionState::Closed {
            return;
        }
        let failed = self.registry.deliver_error(&err);
        debug!("Session closed ({}), {} pending requests failed", err, failed);
    }
}

enum Outgoing {
    Message(Vec<u8>),
    Shutdown,
}

/// An established NETCONF session.
///
/// Requests may be issued concurrently through a shared reference; replies are matched
/// to their requests by message-id only, never by arrival order.
pub struct Session {
    shared: Arc<Shared>,
    outgoing: mpsc::Sender<Outgoing>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
    config: SessionConfig,

    session_id: Option<u64>,
    base: BaseVersion,
    local_capabilities: Capabilities,
    peer_capabilities: Capabilities,
}

impl Session {
    /// Exchanges greetings over `transport` and returns the open session.
    pub async fn connect<T>(transport: T, config: SessionConfig) -> NetconfResult<Session>
    where
        T: Transport,
    {
        let local_capabilities = Capabilities::parse(&config.capabilities)?;
        let hello = Hello::new(&local_capabilities).to_xml()?;

        let shared = Arc::new(Shared {
            state: StateCell::new(),
            registry: Registry::new(),
        });
        let (read_half, write_half) = tokio::io::split(transport);
        let (outgoing, queue) = mpsc::channel(config.queue_depth);
        let (greeting_tx, greeting_rx) = oneshot::channel();

        let writer = tokio::spawn(write_loop(write_half, queue, shared.clone()));
        let reader = tokio::spawn(
            ReceiveLoop {
                reader: read_half,
                framer: Framer::new().with_max_message_size(config.max_message_size),
                shared: shared.clone(),
                local_capabilities: local_capabilities.clone(),
                greeting: Some(greeting_tx),
                read_buffer_size: config.read_buffer_size,
            }
            .run(),
        );

        debug!("Hello:\n{}", hello);
        let exchange = async {
            outgoing
                .send(Outgoing::Message(Framing::EndOfMessage.encode(&hello)))
                .await
                .map_err(|_| NetconfError::closed("writer stopped before hello was sent"))?;
            match timeout(config.hello_timeout, greeting_rx).await {
                Ok(Ok(negotiated)) => negotiated,
                Ok(Err(_)) => Err(NetconfError::CapabilityExchange(
                    "receive loop ended before peer greeting".to_string(),
                )),
                Err(_) => Err(NetconfError::CapabilityExchange(format!(
                    "no greeting from peer within {:?}",
                    config.hello_timeout
                ))),
            }
        };
        let (greeting, base) = match exchange.await {
            Ok(negotiated) => negotiated,
            Err(err) => {
                reader.abort();
                shared.teardown(NetconfError::closed("capability exchange failed"));
                return Err(err);
            }
        };

        if shared.state.advance(SessionState::Open) != SessionState::Connecting {
            return Err(NetconfError::NotConnected);
        }
        debug!(
            "Started Netconf session with session-id: {:?}, base {}",
            greeting.session_id, base
        );
        Ok(Session {
            shared,
            outgoing,
            reader,
            writer,
            config,
            session_id: greeting.session_id,
            base,
            local_capabilities,
            peer_capabilities: greeting.capabilities,
        })
    }

    pub fn session_id(&self) -> Option<u64> {
        self.session_id
    }

    pub fn state(&self) -> SessionState {
        self.shared.state.get()
    }

    pub fn base_version(&self) -> BaseVersion {
        self.base
    }

    pub fn framing(&self) -> Framing {
        self.base.framing()
    }

    pub fn local_capabilities(&self) -> &Capabilities {
        &self.local_capabilities
    }

    pub fn peer_capabilities(&self) -> &Capabilities {
        &self.peer_capabilities
    }

    /// Whether the peer announced `capability`, given as full URI or abbreviation.
    pub fn has_capability(&self, capability: &str) -> bool {
        self.peer_capabilities.contains(capability)
    }

    /// Number of requests still waiting for a reply.
    pub fn pending_requests(&self) -> usize {
        self.shared.registry.len()
    }

    pub fn next_message_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// Queues a complete message for the writer without expecting a reply.
    pub async fn send(&self, message: &str) -> NetconfResult<()> {
        if self.state() != SessionState::Open {
            return Err(NetconfError::NotConnected);
        }
        debug!("RPC:\n{}", message);
        self.outgoing
            .send(Outgoing::Message(self.framing().encode(message)))
            .await
            .map_err(|_| NetconfError::NotConnected)
    }

    /// Sends a fully formed `<rpc>` whose `message-id` attribute is `message_id`.
    pub async fn send_rpc(&self, message_id: &str, rpc: &str) -> NetconfResult<PendingRequest> {
        if self.state() != SessionState::Open {
            return Err(NetconfError::NotConnected);
        }
        let pending = self.shared.registry.register(message_id)?;
        if let Err(err) = self.send(rpc).await {
            self.shared.registry.cancel(message_id);
            return Err(err);
        }
        Ok(pending)
    }

    /// Wraps `operation` into an `<rpc>`, sends it and waits for the reply.
    pub async fn rpc(&self, operation: &str) -> NetconfResult<String> {
        let message_id = Session::next_message_id();
        let pending = self
            .send_rpc(&message_id, &rpc_envelope(&message_id, operation))
            .await?;
        let reply = match self.config.request_timeout {
            Some(request_timeout) => pending.wait_timeout(request_timeout).await,
            None => pending.wait().await,
        }?;
        debug!("Reply:\n{}", reply);
        Ok(reply)
    }

    /// Stream of `<notification>` messages. Ends when the session closes.
    pub fn subscribe_notifications(&self) -> NetconfResult<mpsc::UnboundedReceiver<String>> {
        self.shared.registry.subscribe_notifications()
    }

    /// Sends `<close-session>`, waits for its reply and closes the transport.
    pub async fn close_session(self) -> NetconfResult<()> {
        let message_id = Session::next_message_id();
        let pending = self
            .send_rpc(&message_id, &rpc_envelope(&message_id, "<close-session/>"))
            .await?;
        // the peer drops the transport right after replying
        self.shared.state.advance(SessionState::Closing);
        match pending.wait_timeout(self.config.close_timeout).await {
            Ok(reply) => trace!("Reply:\n{}", reply),
            Err(err) => warn!("No reply to close-session: {}", err),
        }
        self.close().await
    }

    /// Flushes queued messages, closes our side of the transport and waits for the peer to
    /// close its side. Whatever is not flushed within the close timeout is dropped.
    pub async fn close(mut self) -> NetconfResult<()> {
        if self.shared.state.advance(SessionState::Closing) == SessionState::Closed {
            return Ok(());
        }
        let flushed = timeout(self.config.close_timeout, async {
            let _ = self.outgoing.send(Outgoing::Shutdown).await;
            (&mut self.writer).await
        })
        .await;
        if flushed.is_err() {
            warn!("Timed out flushing outgoing messages, dropping them");
            self.writer.abort();
        }
        if timeout(self.config.close_timeout, &mut self.reader)
            .await
            .is_err()
        {
            warn!("Peer did not close the transport, dropping it");
            self.reader.abort();
        }
        self.shared.teardown(NetconfError::closed("session closed"));
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.shared.state.advance(SessionState::Closing) < SessionState::Closing {
            debug!("Session dropped while open");
        }
        self.reader.abort();
        self.writer.abort();
        self.shared.teardown(NetconfError::closed("session dropped"));
    }
}

async fn write_loop<W>(mut writer: W, mut queue: mpsc::Receiver<Outgoing>, shared: Arc<Shared>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(outgoing) = queue.recv().await {
        let bytes = match outgoing {
            Outgoing::Message(bytes) => bytes,
            Outgoing::Shutdown => break,
        };
        let written = async {
            writer.write_all(&bytes).await?;
            writer.flush().await
        };
        if let Err(err) = written.await {
            error!("Write to transport failed: {}", err);
            shared.teardown(NetconfError::Io(err));
            return;
        }
        trace!("Wrote {} bytes", bytes.len());
    }
    if let Err(err) = writer.shutdown().await {
        debug!("Transport shutdown failed: {}", err);
    }
}

type Negotiated = (Greeting, BaseVersion);

struct ReceiveLoop<R> {
    reader: R,
    framer: Framer,
    shared: Arc<Shared>,
    local_capabilities: Capabilities,
    greeting: Option<oneshot::Sender<NetconfResult<Negotiated>>>,
    read_buffer_size: usize,
}

impl<R> ReceiveLoop<R>
where
    R: AsyncRead + Unpin,
{
    async fn run(mut self) {
        let err = match self.receive().await {
            Ok(()) => NetconfError::closed("session closed"),
            Err(err) => {
                error!("Receive loop failed: {}", err);
                err
            }
        };
        if let Some(greeting) = self.greeting.take() {
            let _ = greeting.send(Err(NetconfError::CapabilityExchange(format!(
                "transport failed before peer greeting: {}",
                err
            ))));
        }
        self.shared.teardown(err);
    }

    /// Returns `Ok` when the peer closes a session that is already closing.
    async fn receive(&mut self) -> NetconfResult<()> {
        let mut buffer = vec![0u8; self.read_buffer_size];
        loop {
            let read = self.reader.read(&mut buffer).await?;
            if read == 0 {
                return if self.shared.state.get() >= SessionState::Closing {
                    debug!("Peer closed the transport");
                    Ok(())
                } else {
                    Err(NetconfError::UnexpectedEof)
                };
            }
            trace!("Read {} bytes", read);
            self.framer.extend(&buffer[..read]);
            while let Some(message) = self.framer.next_message()? {
                self.route(message)?;
            }
        }
    }

    /// Only a failed capability exchange ends the loop here. Bad replies are logged and
    /// dropped.
    fn route(&mut self, message: String) -> NetconfResult<()> {
        trace!("Received:\n{}", message);
        match Inbound::classify(&message) {
            Ok(Inbound::Hello) => return self.on_greeting(&message),
            Ok(Inbound::RpcReply { message_id }) => {
                let delivered = self
                    .shared
                    .registry
                    .deliver_reply(message_id.as_deref(), message);
                if let Err(err) = delivered {
                    warn!("Discarding reply: {}", err);
                }
            }
            Ok(Inbound::Notification) => {
                self.shared.registry.deliver_notification(message);
            }
            Ok(Inbound::Other(name)) => warn!("Discarding unexpected <{}> message", name),
            Err(err) => warn!("Discarding unparsable message: {}", err),
        }
        Ok(())
    }

    fn on_greeting(&mut self, message: &str) -> NetconfResult<()> {
        let Some(greeting_tx) = self.greeting.take() else {
            warn!("Ignoring <hello> on an established session");
            return Ok(());
        };
        let negotiated = Greeting::parse(message).and_then(|greeting| {
            let base = negotiate(&self.local_capabilities, &greeting.capabilities)?;
            Ok((greeting, base))
        });
        match negotiated {
            Ok((greeting, base)) => {
                if base == BaseVersion::V1_1 {
                    self.framer.upgrade();
                }
                let _ = greeting_tx.send(Ok((greeting, base)));
                Ok(())
            }
            Err(err) => {
                let reason = err.to_string();
                let _ = greeting_tx.send(Err(err));
                Err(NetconfError::closed(reason))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::pin::Pin;
    use core::task::{Context, Poll};
    use pretty_assertions::assert_eq;
    use std::io;
    use std::sync::atomic::AtomicBool;
    use tokio::io::{duplex, DuplexStream, ReadBuf};

    const BASE_10_ONLY: &str = r#"<hello xmlns="urn:ietf:params:xml:ns:netconf:base:1.0"><capabilities><capability>urn:ietf:params:netconf:base:1.0</capability></capabilities><session-id>5</session-id></hello>"#;
    const BASE_11: &str = r#"<hello xmlns="urn:ietf:params:xml:ns:netconf:base:1.0"><capabilities><capability>urn:ietf:params:netconf:base:1.0</capability><capability>urn:ietf:params:netconf:base:1.1</capability></capabilities><session-id>6</session-id></hello>"#;

    /// Far end of the transport, speaking raw framed bytes.
    struct Peer {
        stream: DuplexStream,
        framer: Framer,
    }

    impl Peer {
        async fn recv(&mut self) -> String {
            let mut buffer = [0u8; 1024];
            loop {
                if let Some(message) = self.framer.next_message().unwrap() {
                    return message;
                }
                let read = self.stream.read(&mut buffer).await.unwrap();
                assert!(read > 0, "client closed the transport");
                self.framer.extend(&buffer[..read]);
            }
        }

        async fn send_raw(&mut self, bytes: &[u8]) {
            self.stream.write_all(bytes).await.unwrap();
        }

        async fn send(&mut self, message: &str) {
            let bytes = self.framer.framing().encode(message);
            self.send_raw(&bytes).await;
        }
    }

    async fn open(peer_hello: &'static str) -> (Session, Peer) {
        open_with(peer_hello, SessionConfig::default()).await
    }

    async fn open_with(peer_hello: &'static str, config: SessionConfig) -> (Session, Peer) {
        let (client, server) = duplex(64 * 1024);
        let mut peer = Peer {
            stream: server,
            framer: Framer::new(),
        };
        let connect = tokio::spawn(Session::connect(client, config));
        let client_hello = peer.recv().await;
        assert!(client_hello.starts_with("<hello"));
        peer.send(peer_hello).await;
        if client_hello.contains(NETCONF_BASE_11_CAP) && peer_hello.contains(NETCONF_BASE_11_CAP)
        {
            peer.framer.upgrade();
        }
        let session = connect.await.unwrap().unwrap();
        (session, peer)
    }

    fn reply_to(rpc: &str) -> String {
        let root = crate::document::parse_root_tag_and_attributes(rpc).unwrap();
        format!(
            r#"<rpc-reply message-id="{}" xmlns="urn:ietf:params:xml:ns:netconf:base:1.0"><ok/></rpc-reply>"#,
            root.attribute("message-id").unwrap()
        )
    }

    #[tokio::test]
    async fn test_connect_base_10() {
        let (session, _peer) = open(BASE_10_ONLY).await;
        assert_eq!(session.state(), SessionState::Open);
        assert_eq!(session.session_id(), Some(5));
        assert_eq!(session.base_version(), BaseVersion::V1_0);
        assert_eq!(session.framing(), Framing::EndOfMessage);
    }

    #[tokio::test]
    async fn test_connect_upgrades_to_chunked() {
        let (session, mut peer) = open(BASE_11).await;
        assert_eq!(session.base_version(), BaseVersion::V1_1);

        let request = tokio::spawn(async move {
            let reply = session.rpc("<get/>").await;
            (session, reply)
        });
        let rpc = peer.recv().await;
        assert!(rpc.ends_with("<get/></rpc>"));
        peer.send(&reply_to(&rpc)).await;

        let (_session, reply) = request.await.unwrap();
        assert_eq!(reply.unwrap(), reply_to(&rpc));
    }

    #[tokio::test]
    async fn test_out_of_order_replies() {
        let (session, mut peer) = open(BASE_11).await;
        let first = session.send_rpc("a", r#"<rpc message-id="a"><get/></rpc>"#).await.unwrap();
        let second = session.send_rpc("b", r#"<rpc message-id="b"><get/></rpc>"#).await.unwrap();
        assert_eq!(session.pending_requests(), 2);

        let rpc_a = peer.recv().await;
        let rpc_b = peer.recv().await;
        peer.send(&reply_to(&rpc_b)).await;
        peer.send(&reply_to(&rpc_a)).await;

        assert_eq!(second.await.unwrap(), reply_to(&rpc_b));
        assert_eq!(first.await.unwrap(), reply_to(&rpc_a));
        assert_eq!(session.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_bad_reply_does_not_end_session() {
        let (session, mut peer) = open(BASE_10_ONLY).await;
        let pending = session.send_rpc("1", r#"<rpc message-id="1"><get/></rpc>"#).await.unwrap();
        let rpc = peer.recv().await;

        peer.send(r#"<rpc-reply message-id="unknown"><ok/></rpc-reply>"#).await;
        peer.send("<rpc-reply><ok/></rpc-reply>").await;
        peer.send("certainly not xml").await;
        peer.send(&reply_to(&rpc)).await;

        assert_eq!(pending.await.unwrap(), reply_to(&rpc));
        assert_eq!(session.state(), SessionState::Open);
    }

    #[tokio::test]
    async fn test_unexpected_eof_fails_pending() {
        let (session, mut peer) = open(BASE_10_ONLY).await;
        let pending = session.send_rpc("1", r#"<rpc message-id="1"><get/></rpc>"#).await.unwrap();
        // read the rpc first so the writer is idle when the peer goes away
        peer.recv().await;
        drop(peer);

        assert!(matches!(
            pending.await,
            Err(NetconfError::TransportClosed { reason }) if reason == "transport closed unexpectedly"
        ));
        assert_eq!(session.state(), SessionState::Closed);
        assert!(matches!(
            session.send_rpc("2", "<rpc/>").await,
            Err(NetconfError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_framing_error_closes_session() {
        let (session, mut peer) = open(BASE_11).await;
        let pending = session.send_rpc("1", r#"<rpc message-id="1"><get/></rpc>"#).await.unwrap();
        peer.send_raw(b"garbage\n#3\nabc\n##\n").await;

        assert!(matches!(
            pending.await,
            Err(NetconfError::TransportClosed { .. })
        ));
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_oversized_message_closes_session() {
        let config = SessionConfig::default().with_max_message_size(1024);
        let (session, mut peer) = open_with(BASE_11, config).await;
        let pending = session.send_rpc("1", r#"<rpc message-id="1"><get/></rpc>"#).await.unwrap();
        peer.recv().await;
        peer.send_raw(b"\n#4294967295\n<rpc-reply").await;

        assert!(matches!(
            pending.await,
            Err(NetconfError::TransportClosed { reason }) if reason.contains("larger than 1024")
        ));
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_notifications_are_not_replies() {
        let (session, mut peer) = open(BASE_10_ONLY).await;
        let mut notifications = session.subscribe_notifications().unwrap();
        let pending = session.send_rpc("1", r#"<rpc message-id="1"><get/></rpc>"#).await.unwrap();
        let rpc = peer.recv().await;

        let notification = r#"<notification xmlns="urn:ietf:params:xml:ns:netconf:notification:1.0"><eventTime>2024-05-01T10:00:00Z</eventTime></notification>"#;
        peer.send(notification).await;
        peer.send(&reply_to(&rpc)).await;

        assert_eq!(notifications.recv().await.unwrap(), notification);
        assert_eq!(pending.await.unwrap(), reply_to(&rpc));
    }

    #[tokio::test]
    async fn test_invalid_greeting() {
        let (client, server) = duplex(4096);
        let mut peer = Peer {
            stream: server,
            framer: Framer::new(),
        };
        let connect = tokio::spawn(Session::connect(client, SessionConfig::default()));
        peer.recv().await;
        peer.send("<hello><session-id>1</session-id></hello>").await;
        assert!(matches!(
            connect.await.unwrap(),
            Err(NetconfError::CapabilityExchange(_))
        ));
    }

    #[tokio::test]
    async fn test_greeting_timeout() {
        let (client, _server) = duplex(4096);
        let config = SessionConfig::default().with_hello_timeout(Duration::from_millis(50));
        assert!(matches!(
            Session::connect(client, config).await,
            Err(NetconfError::CapabilityExchange(_))
        ));
    }

    #[tokio::test]
    async fn test_eof_before_greeting() {
        let (client, server) = duplex(4096);
        drop(server);
        assert!(matches!(
            Session::connect(client, SessionConfig::default()).await,
            Err(NetconfError::CapabilityExchange(_))
        ));
    }

    #[tokio::test]
    async fn test_close_session() {
        let (session, mut peer) = open(BASE_11).await;
        let server = tokio::spawn(async move {
            let rpc = peer.recv().await;
            assert!(rpc.contains("<close-session/>"));
            peer.send(&reply_to(&rpc)).await;
            drop(peer);
        });
        session.close_session().await.unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_close_fails_pending_requests() {
        let config = SessionConfig::default().with_close_timeout(Duration::from_millis(100));
        let (session, mut peer) = open_with(BASE_10_ONLY, config).await;
        let pending = session.send_rpc("1", r#"<rpc message-id="1"><get/></rpc>"#).await.unwrap();
        let server = tokio::spawn(async move {
            peer.recv().await;
            let mut buffer = [0u8; 64];
            while peer.stream.read(&mut buffer).await.unwrap() > 0 {}
        });

        session.close().await.unwrap();
        server.await.unwrap();
        assert!(matches!(
            pending.await,
            Err(NetconfError::TransportClosed { reason }) if reason == "session closed"
        ));
    }

    /// Duplex stream that remembers whether it was shut down.
    struct TrackedStream {
        inner: DuplexStream,
        shut_down: Arc<AtomicBool>,
    }

    impl AsyncRead for TrackedStream {
        fn poll_read(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Pin::new(&mut self.inner).poll_read(cx, buf)
        }
    }

    impl AsyncWrite for TrackedStream {
        fn poll_write(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Pin::new(&mut self.inner).poll_write(cx, buf)
        }

        fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Pin::new(&mut self.inner).poll_flush(cx)
        }

        fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            self.shut_down.store(true, Ordering::SeqCst);
            Pin::new(&mut self.inner).poll_shutdown(cx)
        }
    }

    #[tokio::test]
    async fn test_close_shuts_down_transport() {
        let (client, server) = duplex(4096);
        let shut_down = Arc::new(AtomicBool::new(false));
        let transport = TrackedStream {
            inner: client,
            shut_down: shut_down.clone(),
        };
        let mut peer = Peer {
            stream: server,
            framer: Framer::new(),
        };
        let connect = tokio::spawn(Session::connect(transport, SessionConfig::default()));
        peer.recv().await;
        peer.send(BASE_10_ONLY).await;
        let session = connect.await.unwrap().unwrap();

        let server = tokio::spawn(async move {
            let mut buffer = [0u8; 64];
            while peer.stream.read(&mut buffer).await.unwrap() > 0 {}
        });
        session.close().await.unwrap();
        server.await.unwrap();
        assert!(shut_down.load(Ordering::SeqCst));
    }

    fn oversized_rpc() -> String {
        format!(
            r#"<rpc message-id="big"><get>{}</get></rpc>"#,
            "x".repeat(256 * 1024)
        )
    }

    #[tokio::test]
    async fn test_close_releases_blocked_writer() {
        let config = SessionConfig::default().with_close_timeout(Duration::from_millis(100));
        let (session, mut peer) = open_with(BASE_10_ONLY, config).await;
        // the peer never reads, so the writer stalls once the pipe is full
        session.send(&oversized_rpc()).await.unwrap();

        session.close().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(peer.stream.write_all(b"<rpc-reply/>").await.is_err());
    }

    #[tokio::test]
    async fn test_drop_releases_blocked_writer() {
        let (session, mut peer) = open(BASE_10_ONLY).await;
        session.send(&oversized_rpc()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        drop(session);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(peer.stream.write_all(b"<rpc-reply/>").await.is_err());
    }

    #[test]
    fn test_state_is_monotonic() {
        let state = StateCell::new();
        assert_eq!(state.advance(SessionState::Open), SessionState::Connecting);
        assert_eq!(state.advance(SessionState::Closed), SessionState::Open);
        assert_eq!(state.advance(SessionState::Open), SessionState::Closed);
        assert_eq!(state.get(), SessionState::Closed);
    }
}
