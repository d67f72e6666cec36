//! Connection lifecycle and traffic.
//!
//! A [`Connection`] is one duplex, binary-framed link to a remote server.
//! It owns the dialed stream (split into halves), a capacity-one send
//! permit serializing writes, and the receive coordinator that shares the
//! read side among concurrent reply waiters. The lifecycle is:
//!
//! ```text
//! Initial ──► Connecting ──► Initializing ──► Open ──┬──► Failed ──► Disposed
//!                                                     └──► Disposed
//! ```
//!
//! Writes are serialized because a frame must reach the wire intact.
//! Reads have no dedicated task: the first caller waiting for a reply
//! takes the reader role and reads for everyone (see
//! [`crate::coordinator`]).

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::{Duration, Instant, SystemTime};

use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio_util::sync::CancellationToken;

use crate::coordinator::{ReceiveCoordinator, ReceiveInstruction, RoleGuard};
use crate::error::{Error, Result};
use crate::events::{ConnectionEvent, EventSink};
use crate::initializer::{ConnectionDescription, ConnectionInitializer, IdentityInitializer};
use crate::message::{EncoderSettings, RequestMessage};
use crate::protocol::{
    decode_length, validate_length, BufferWriter, ByteBuffer, ChunkPool, DEFAULT_MAX_FRAME_SIZE,
    RESPONSE_TO_OFFSET,
};
use crate::transport::{BoxedStream, Endpoint, StreamFactory, TcpStreamFactory};

static NEXT_LOCAL_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies a connection in errors, events, and logs.
///
/// The local part is assigned process-wide at construction; the server
/// part is adopted once from the handshake description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId {
    local: u64,
    server: Option<i64>,
}

impl ConnectionId {
    /// Create an id with the given local value and no server part.
    pub fn new(local: u64) -> Self {
        Self {
            local,
            server: None,
        }
    }

    fn next() -> Self {
        Self::new(NEXT_LOCAL_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// The locally assigned value.
    #[inline]
    pub fn local(&self) -> u64 {
        self.local
    }

    /// The server-assigned value, if the handshake provided one.
    #[inline]
    pub fn server(&self) -> Option<i64> {
        self.server
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.server {
            Some(server) => write!(f, "conn{}:{}", self.local, server),
            None => write!(f, "conn{}", self.local),
        }
    }
}

/// Lifecycle state of a connection.
///
/// Ordered: a state greater than [`Open`](ConnectionState::Open) means
/// the connection is no longer usable.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionState {
    /// Constructed, not yet dialed.
    Initial = 0,
    /// Dialing the stream.
    Connecting = 1,
    /// Stream up, handshake in progress. Send/receive are reserved for
    /// the initializer.
    Initializing = 2,
    /// Ready for traffic.
    Open = 3,
    /// A transport error ended the connection. Terminal.
    Failed = 4,
    /// Closed. Terminal.
    Disposed = 5,
}

fn state_from(raw: u8) -> ConnectionState {
    match raw {
        0 => ConnectionState::Initial,
        1 => ConnectionState::Connecting,
        2 => ConnectionState::Initializing,
        3 => ConnectionState::Open,
        4 => ConnectionState::Failed,
        5 => ConnectionState::Disposed,
        _ => unreachable!("invalid connection state"),
    }
}

/// Settings governing a connection's lifetime and framing.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// Maximum age before the connection counts as expired. `None`
    /// disables the bound.
    pub max_life_time: Option<Duration>,
    /// Maximum idle time before the connection counts as expired.
    /// `None` disables the bound.
    pub max_idle_time: Option<Duration>,
    /// Largest frame accepted on or produced for the wire.
    pub max_frame_size: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            max_life_time: None,
            max_idle_time: None,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

/// Builder for configuring and creating a [`Connection`].
pub struct ConnectionBuilder {
    endpoint: Endpoint,
    settings: ConnectionSettings,
    stream_factory: Arc<dyn StreamFactory>,
    initializer: Arc<dyn ConnectionInitializer>,
    event_sink: Option<Arc<dyn EventSink>>,
    pool: Option<ChunkPool>,
}

impl ConnectionBuilder {
    /// Start a builder for the given endpoint. Defaults: TCP dialing, no
    /// handshake, no event sink, a fresh chunk pool.
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            settings: ConnectionSettings::default(),
            stream_factory: Arc::new(TcpStreamFactory::new()),
            initializer: Arc::new(IdentityInitializer),
            event_sink: None,
            pool: None,
        }
    }

    /// Set the connection settings.
    pub fn settings(mut self, settings: ConnectionSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Replace the stream factory.
    pub fn stream_factory(mut self, factory: Arc<dyn StreamFactory>) -> Self {
        self.stream_factory = factory;
        self
    }

    /// Replace the connection initializer.
    pub fn initializer(mut self, initializer: Arc<dyn ConnectionInitializer>) -> Self {
        self.initializer = initializer;
        self
    }

    /// Attach a telemetry sink.
    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = Some(sink);
        self
    }

    /// Share a chunk pool with other connections.
    pub fn chunk_pool(mut self, pool: ChunkPool) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Build the connection in the initial state.
    pub fn build(self) -> Connection {
        Connection {
            id: ConnectionId::next(),
            server_id: OnceLock::new(),
            endpoint: self.endpoint,
            settings: self.settings,
            state: AtomicU8::new(ConnectionState::Initial as u8),
            created_at: Instant::now(),
            created_at_wall: SystemTime::now(),
            opened_at: OnceLock::new(),
            last_used_nanos: AtomicU64::new(0),
            pool: self.pool.unwrap_or_default(),
            coordinator: ReceiveCoordinator::new(),
            read_half: tokio::sync::Mutex::new(None),
            write_half: tokio::sync::Mutex::new(None),
            open_lock: tokio::sync::Mutex::new(()),
            background: CancellationToken::new(),
            stream_factory: self.stream_factory,
            initializer: self.initializer,
            event_sink: self.event_sink,
            description: Mutex::new(None),
        }
    }
}

enum FrameError {
    Io(std::io::Error),
    Protocol(Error),
}

/// One duplex framed connection to a remote server.
pub struct Connection {
    id: ConnectionId,
    server_id: OnceLock<i64>,
    endpoint: Endpoint,
    settings: ConnectionSettings,
    state: AtomicU8,
    created_at: Instant,
    created_at_wall: SystemTime,
    opened_at: OnceLock<Instant>,
    last_used_nanos: AtomicU64,
    pool: ChunkPool,
    coordinator: ReceiveCoordinator,
    read_half: tokio::sync::Mutex<Option<ReadHalf<BoxedStream>>>,
    // Capacity-one send permit: whoever holds this lock owns the wire.
    write_half: tokio::sync::Mutex<Option<WriteHalf<BoxedStream>>>,
    open_lock: tokio::sync::Mutex<()>,
    background: CancellationToken,
    stream_factory: Arc<dyn StreamFactory>,
    initializer: Arc<dyn ConnectionInitializer>,
    event_sink: Option<Arc<dyn EventSink>>,
    description: Mutex<Option<ConnectionDescription>>,
}

impl Connection {
    /// Start building a connection to `endpoint`.
    pub fn builder(endpoint: Endpoint) -> ConnectionBuilder {
        ConnectionBuilder::new(endpoint)
    }

    /// The connection's id, including the server part once known.
    pub fn id(&self) -> ConnectionId {
        ConnectionId {
            local: self.id.local,
            server: self.server_id.get().copied(),
        }
    }

    /// The remote endpoint.
    #[inline]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// The settings the connection was built with.
    #[inline]
    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        state_from(self.state.load(Ordering::Acquire))
    }

    /// The handshake description, once open.
    pub fn description(&self) -> Option<ConnectionDescription> {
        self.lock_description().clone()
    }

    /// When the handshake completed, if it has.
    pub fn opened_at(&self) -> Option<SystemTime> {
        self.opened_at
            .get()
            .map(|instant| self.created_at_wall + instant.duration_since(self.created_at))
    }

    /// When the connection last touched the wire.
    pub fn last_used_at(&self) -> SystemTime {
        self.created_at_wall + Duration::from_nanos(self.last_used_nanos.load(Ordering::Acquire))
    }

    /// The receive coordinator, for diagnostics.
    pub fn coordinator(&self) -> &ReceiveCoordinator {
        &self.coordinator
    }

    /// Check whether the connection outlived its settings or left the
    /// open state.
    pub fn is_expired(&self) -> bool {
        if self.state() > ConnectionState::Open {
            return true;
        }

        let now = Instant::now();

        if let (Some(max_life), Some(opened_at)) =
            (self.settings.max_life_time, self.opened_at.get())
        {
            if now.duration_since(*opened_at) > max_life {
                return true;
            }
        }

        if let Some(max_idle) = self.settings.max_idle_time {
            let last_used = self.created_at
                + Duration::from_nanos(self.last_used_nanos.load(Ordering::Acquire));
            if now.duration_since(last_used) > max_idle {
                return true;
            }
        }

        false
    }

    /// Dial the stream and run the handshake.
    ///
    /// Idempotent: concurrent calls serialize on the open lock, the
    /// handshake runs once, and every caller observes its outcome. Once
    /// open, further calls return `Ok` immediately.
    ///
    /// # Errors
    ///
    /// Any dialing or handshake failure marks the connection failed,
    /// emits the opening-failed event, and propagates.
    pub async fn open(&self, cancel: &CancellationToken) -> Result<()> {
        let _open_lock = self.open_lock.lock().await;

        match self.state() {
            ConnectionState::Initial => {}
            ConnectionState::Open => return Ok(()),
            ConnectionState::Failed => return Err(Error::ConnectionClosed),
            ConnectionState::Disposed => return Err(Error::Disposed),
            ConnectionState::Connecting | ConnectionState::Initializing => {
                // Not reachable while the open lock is held.
                return Err(Error::Internal("open observed a half-open connection"));
            }
        }

        tracing::debug!(connection_id = %self.id(), endpoint = %self.endpoint, "opening connection");
        self.emit(ConnectionEvent::Opening {
            connection_id: self.id(),
            endpoint: self.endpoint.clone(),
        });
        let started = Instant::now();

        match self.open_inner(cancel).await {
            Ok(()) => {
                tracing::debug!(connection_id = %self.id(), "connection open");
                self.emit(ConnectionEvent::Opened {
                    connection_id: self.id(),
                    endpoint: self.endpoint.clone(),
                    duration: started.elapsed(),
                });
                Ok(())
            }
            Err(error) => {
                // Leave a concurrent close's terminal state alone.
                let _ = self
                    .compare_and_set_state(ConnectionState::Connecting, ConnectionState::Failed)
                    || self.compare_and_set_state(
                        ConnectionState::Initializing,
                        ConnectionState::Failed,
                    );
                tracing::warn!(connection_id = %self.id(), error = %error, "opening connection failed");
                self.emit(ConnectionEvent::OpeningFailed {
                    connection_id: self.id(),
                    endpoint: self.endpoint.clone(),
                    error: error.to_string(),
                });
                Err(error)
            }
        }
    }

    async fn open_inner(&self, cancel: &CancellationToken) -> Result<()> {
        if !self.compare_and_set_state(ConnectionState::Initial, ConnectionState::Connecting) {
            return Err(Error::Disposed);
        }

        let stream = self
            .stream_factory
            .open(&self.endpoint, cancel)
            .await
            .map_err(|source| Error::Transport {
                action: "opening a connection to the server",
                connection_id: self.id(),
                source,
            })?;

        let (read_half, write_half) = tokio::io::split(stream);
        *self.read_half.lock().await = Some(read_half);
        *self.write_half.lock().await = Some(write_half);

        if !self.compare_and_set_state(ConnectionState::Connecting, ConnectionState::Initializing) {
            return Err(Error::Disposed);
        }

        let description = self.initializer.initialize(self, cancel).await?;
        if let Some(server_id) = description.server_connection_id {
            let _ = self.server_id.set(server_id);
        }
        *self.lock_description() = Some(description);

        let _ = self.opened_at.set(Instant::now());
        self.touch();

        if !self.compare_and_set_state(ConnectionState::Initializing, ConnectionState::Open) {
            return Err(Error::Disposed);
        }
        Ok(())
    }

    /// Encode `messages` into one output buffer and write it to the wire.
    ///
    /// Messages whose gate predicate returns false are skipped; the rest
    /// are marked sent after encoding. `cancel` is honored between
    /// messages while encoding. Once the write starts it runs to
    /// completion (or connection failure) under the background token;
    /// interrupting a frame mid-write would corrupt the stream.
    ///
    /// # Errors
    ///
    /// A write failure marks the connection failed and surfaces as a
    /// wrapped transport error.
    pub async fn send<M: RequestMessage>(
        &self,
        messages: &mut [M],
        settings: &EncoderSettings,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.ensure_io_allowed()?;

        let mut buffer = ByteBuffer::empty(&self.pool);
        let mut request_ids = Vec::with_capacity(messages.len());
        {
            let mut writer = BufferWriter::new(&mut buffer);
            for message in messages.iter_mut() {
                // Encoding can be expensive; honor the caller here, not
                // mid-message.
                if cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                if !message.should_be_sent() {
                    continue;
                }
                message.encode(&mut writer, settings)?;
                message.mark_sent();
                request_ids.push(message.request_id());
            }
        }

        if request_ids.is_empty() {
            return Ok(());
        }
        buffer.freeze();

        self.emit(ConnectionEvent::SendingMessages {
            connection_id: self.id(),
            request_ids: request_ids.clone(),
        });
        let started = Instant::now();
        let bytes = buffer.len();

        match self.write_buffer(&buffer).await {
            Ok(()) => {
                self.touch();
                self.emit(ConnectionEvent::SentMessages {
                    connection_id: self.id(),
                    request_ids,
                    bytes,
                    duration: started.elapsed(),
                });
                Ok(())
            }
            Err(error) => {
                self.emit(ConnectionEvent::SendingMessagesFailed {
                    connection_id: self.id(),
                    request_ids,
                    error: error.to_string(),
                });
                Err(error)
            }
        }
    }

    /// Wait for the reply whose response-to field equals `response_to`
    /// and decode it.
    ///
    /// The receive coordinator decides whether this caller reads the
    /// stream itself or waits for another caller to deliver the frame.
    /// `cancel` is honored while waiting and checked again before
    /// decoding.
    pub async fn receive<R, F>(
        &self,
        response_to: i32,
        decoder: F,
        settings: &EncoderSettings,
        cancel: &CancellationToken,
    ) -> Result<R>
    where
        F: FnOnce(ByteBuffer, &EncoderSettings) -> Result<R>,
    {
        self.ensure_io_allowed()?;

        self.emit(ConnectionEvent::ReceivingMessage {
            connection_id: self.id(),
            response_to,
        });
        let started = Instant::now();

        match self.receive_reply(response_to, decoder, settings, cancel).await {
            Ok((reply, bytes)) => {
                self.emit(ConnectionEvent::ReceivedMessage {
                    connection_id: self.id(),
                    response_to,
                    bytes,
                    duration: started.elapsed(),
                });
                Ok(reply)
            }
            Err(error) => {
                self.emit(ConnectionEvent::ReceivingMessageFailed {
                    connection_id: self.id(),
                    response_to,
                    error: error.to_string(),
                });
                Err(error)
            }
        }
    }

    async fn receive_reply<R, F>(
        &self,
        response_to: i32,
        decoder: F,
        settings: &EncoderSettings,
        cancel: &CancellationToken,
    ) -> Result<(R, usize)>
    where
        F: FnOnce(ByteBuffer, &EncoderSettings) -> Result<R>,
    {
        let buffer = self.receive_buffer(response_to, cancel).await?;

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let bytes = buffer.len();
        let reply = decoder(buffer, settings)?;
        Ok((reply, bytes))
    }

    async fn receive_buffer(
        &self,
        response_to: i32,
        cancel: &CancellationToken,
    ) -> Result<ByteBuffer> {
        match self.coordinator.get_instructions(response_to, cancel).await? {
            ReceiveInstruction::ReturnBuffer(buffer) => Ok(buffer),
            ReceiveInstruction::AssumeReceiverRole => {
                // However this loop exits, the guard hands the role on.
                let _role = RoleGuard::new(&self.coordinator);
                loop {
                    if cancel.is_cancelled() {
                        return Err(Error::Cancelled);
                    }
                    let buffer = self.read_frame().await?;
                    let received_id = buffer.read_i32_le(RESPONSE_TO_OFFSET);
                    if received_id == response_to {
                        return Ok(buffer);
                    }
                    self.coordinator.dispatch(received_id, buffer);
                }
            }
        }
    }

    async fn read_frame(&self) -> Result<ByteBuffer> {
        let mut guard = self.read_half.lock().await;
        let reader = guard.as_mut().ok_or(Error::ConnectionClosed)?;

        let outcome = tokio::select! {
            biased;
            outcome = read_one_frame(reader, &self.pool, self.settings.max_frame_size) => outcome,
            () = self.background.cancelled() => return Err(Error::ConnectionClosed),
        };

        match outcome {
            Ok(buffer) => {
                self.touch();
                Ok(buffer)
            }
            Err(FrameError::Io(source)) => {
                Err(self.fail("receiving a message from the server", source))
            }
            Err(FrameError::Protocol(error)) => {
                self.fail_without_wrapping(&error);
                Err(error)
            }
        }
    }

    async fn write_buffer(&self, buffer: &ByteBuffer) -> Result<()> {
        let mut permit = self.write_half.lock().await;
        let writer = permit.as_mut().ok_or(Error::ConnectionClosed)?;

        let io = async {
            let mut offset = 0;
            while offset < buffer.len() {
                let segment = buffer.segment_at(offset);
                writer.write_all(segment).await?;
                offset += segment.len();
            }
            writer.flush().await
        };

        tokio::select! {
            biased;
            result = io => {
                result.map_err(|source| self.fail("sending a message to the server", source))
            }
            () = self.background.cancelled() => Err(Error::ConnectionClosed),
        }
    }

    /// Close the connection.
    ///
    /// Idempotent; the first call wins from any state. Cancels the
    /// background token, fails all coordinator waiters, and shuts the
    /// stream down, swallowing I/O errors.
    pub async fn close(&self) {
        let prior = self
            .state
            .swap(ConnectionState::Disposed as u8, Ordering::AcqRel);
        if prior == ConnectionState::Disposed as u8 {
            return;
        }

        tracing::debug!(connection_id = %self.id(), "closing connection");
        self.emit(ConnectionEvent::Closing {
            connection_id: self.id(),
        });
        let started = Instant::now();

        self.background.cancel();
        self.coordinator.dispose();

        {
            let mut permit = self.write_half.lock().await;
            if let Some(writer) = permit.as_mut() {
                let _ = writer.shutdown().await;
            }
            *permit = None;
        }
        *self.read_half.lock().await = None;

        self.emit(ConnectionEvent::Closed {
            connection_id: self.id(),
            duration: started.elapsed(),
        });
    }

    /// Record a write or raw-read failure: transition open → failed
    /// exactly once, emit the failed event, and wrap the cause.
    fn fail(&self, action: &'static str, source: std::io::Error) -> Error {
        let error = Error::Transport {
            action,
            connection_id: self.id(),
            source,
        };
        self.fail_without_wrapping(&error);
        error
    }

    fn fail_without_wrapping(&self, error: &Error) {
        if self.compare_and_set_state(ConnectionState::Open, ConnectionState::Failed) {
            tracing::warn!(connection_id = %self.id(), error = %error, "connection failed");
            self.emit(ConnectionEvent::Failed {
                connection_id: self.id(),
                error: error.to_string(),
            });
        }
    }

    fn ensure_io_allowed(&self) -> Result<()> {
        match self.state() {
            ConnectionState::Initializing | ConnectionState::Open => Ok(()),
            state @ (ConnectionState::Initial | ConnectionState::Connecting) => {
                Err(Error::InvalidState { state })
            }
            ConnectionState::Failed => Err(Error::ConnectionClosed),
            ConnectionState::Disposed => Err(Error::Disposed),
        }
    }

    fn compare_and_set_state(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn touch(&self) {
        self.last_used_nanos
            .store(self.created_at.elapsed().as_nanos() as u64, Ordering::Release);
    }

    fn emit(&self, event: ConnectionEvent) {
        if let Some(sink) = &self.event_sink {
            sink.on_event(&event);
        }
    }

    fn lock_description(&self) -> std::sync::MutexGuard<'_, Option<ConnectionDescription>> {
        self.description
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        let prior = self
            .state
            .swap(ConnectionState::Disposed as u8, Ordering::AcqRel);
        if prior != ConnectionState::Disposed as u8 {
            self.background.cancel();
            self.coordinator.dispose();
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id())
            .field("endpoint", &self.endpoint)
            .field("state", &self.state())
            .finish()
    }
}

async fn read_one_frame<R>(
    reader: &mut R,
    pool: &ChunkPool,
    max_frame_size: usize,
) -> std::result::Result<ByteBuffer, FrameError>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut prefix = [0u8; 4];
    reader.read_exact(&mut prefix).await.map_err(FrameError::Io)?;

    let length =
        validate_length(decode_length(prefix), max_frame_size).map_err(FrameError::Protocol)?;

    let mut buffer = ByteBuffer::with_len(pool, length);
    buffer.write_at(0, &prefix);

    let mut offset = prefix.len();
    while offset < length {
        let segment = buffer.segment_at_mut(offset);
        let count = reader.read(segment).await.map_err(FrameError::Io)?;
        if count == 0 {
            return Err(FrameError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "stream closed mid-frame",
            )));
        }
        offset += count;
    }

    buffer.freeze();
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_connection(settings: ConnectionSettings) -> Connection {
        Connection::builder(Endpoint::new("localhost", 27017))
            .settings(settings)
            .build()
    }

    #[test]
    fn test_connection_id_display() {
        let id = ConnectionId::new(12);
        assert_eq!(id.to_string(), "conn12");

        let id = ConnectionId {
            local: 12,
            server: Some(345),
        };
        assert_eq!(id.to_string(), "conn12:345");
    }

    #[test]
    fn test_local_ids_are_unique() {
        let a = ConnectionId::next();
        let b = ConnectionId::next();
        assert_ne!(a.local(), b.local());
    }

    #[test]
    fn test_state_ordering() {
        assert!(ConnectionState::Failed > ConnectionState::Open);
        assert!(ConnectionState::Disposed > ConnectionState::Failed);
        assert!(ConnectionState::Initializing < ConnectionState::Open);
    }

    #[test]
    fn test_new_connection_is_initial() {
        let connection = test_connection(ConnectionSettings::default());
        assert_eq!(connection.state(), ConnectionState::Initial);
        assert!(connection.opened_at().is_none());
        assert!(connection.description().is_none());
    }

    #[test]
    fn test_io_rejected_before_open() {
        let connection = test_connection(ConnectionSettings::default());
        let result = connection.ensure_io_allowed();
        assert!(matches!(
            result,
            Err(Error::InvalidState {
                state: ConnectionState::Initial
            })
        ));
    }

    #[test]
    fn test_io_rejected_after_failure_and_disposal() {
        let connection = test_connection(ConnectionSettings::default());

        connection.state.store(
            ConnectionState::Failed as u8,
            std::sync::atomic::Ordering::Release,
        );
        assert!(matches!(
            connection.ensure_io_allowed(),
            Err(Error::ConnectionClosed)
        ));

        connection.state.store(
            ConnectionState::Disposed as u8,
            std::sync::atomic::Ordering::Release,
        );
        assert!(matches!(connection.ensure_io_allowed(), Err(Error::Disposed)));
    }

    #[test]
    fn test_unopened_connection_not_expired_without_bounds() {
        let connection = test_connection(ConnectionSettings::default());
        assert!(!connection.is_expired());
    }

    #[test]
    fn test_terminal_state_means_expired() {
        let connection = test_connection(ConnectionSettings::default());
        connection.state.store(
            ConnectionState::Failed as u8,
            std::sync::atomic::Ordering::Release,
        );
        assert!(connection.is_expired());
    }

    #[tokio::test]
    async fn test_idle_expiry_and_touch_reset() {
        let connection = test_connection(ConnectionSettings {
            max_idle_time: Some(Duration::from_millis(50)),
            ..ConnectionSettings::default()
        });

        assert!(!connection.is_expired());
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(connection.is_expired());

        connection.touch();
        assert!(!connection.is_expired());
    }

    #[test]
    fn test_fail_emits_failed_event_once() {
        use std::sync::atomic::AtomicUsize;

        struct Counter(AtomicUsize);
        impl EventSink for Counter {
            fn on_event(&self, event: &ConnectionEvent) {
                if matches!(event, ConnectionEvent::Failed { .. }) {
                    self.0.fetch_add(1, Ordering::SeqCst);
                }
            }
        }

        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let connection = Connection::builder(Endpoint::new("localhost", 27017))
            .event_sink(counter.clone())
            .build();
        connection
            .state
            .store(ConnectionState::Open as u8, Ordering::Release);

        let first = connection.fail(
            "sending a message to the server",
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "broken"),
        );
        let second = connection.fail(
            "sending a message to the server",
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "broken again"),
        );

        assert!(matches!(first, Error::Transport { .. }));
        assert!(matches!(second, Error::Transport { .. }));
        assert_eq!(connection.state(), ConnectionState::Failed);
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }
}
