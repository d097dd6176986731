use std::{
    collections::BTreeMap,
    io,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering},
        Arc, Mutex as StdMutex, Weak,
    },
    time::Duration,
};

use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    sync::Mutex,
};
use tokio_util::sync::CancellationToken;

use super::{
    codec::{PointerWidth, WireReader, WireWriter, FRAME_HEADER_LEN},
    error::{Result, WireError},
    kinds::{InboundKind, OutboundKind},
    message::{IsolateId, Message, PRIMORDIAL_ISOLATE},
    outbound::Command,
    poison::RecoverLock,
    pool::MessagePool,
};

const READ_CHUNK: usize = 16 * 1024;

/// Receives every inbound message, in [`ListenerIndex`] order.
pub trait MessageListener: Send + Sync {
    /// Called once when the transport starts receiving.
    fn bound(&self) {}

    fn message_arrived(&self, msg: &Message);

    fn message_sent(&self, _msg: &Message) {}

    /// Called exactly once when the receive loop ends, whatever the cause.
    fn disconnected(&self);
}

/// Dispatch order. The counter is always last so that anyone waiting on a
/// count observes state that every other listener has already updated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ListenerIndex {
    Session,
    Custom(u8),
    Counter,
}

/// Socket-level knobs the heartbeat needs. Streams that are not sockets
/// (for example in-memory pipes) simply do not provide one.
pub trait SocketControl: Send + Sync {
    fn send_buffer_size(&self) -> io::Result<u32>;
    fn set_send_buffer_size(&self, size: u32) -> io::Result<()>;
}

#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// How long a read may sit idle before the heartbeat probe runs.
    /// `None` disables the heartbeat.
    pub idle_timeout: Option<Duration>,
    /// Upper bound on the heartbeat probe write.
    pub heartbeat_ceiling: Duration,
    /// Frames announcing a longer payload end the connection.
    pub max_message_len: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            idle_timeout: None,
            heartbeat_ceiling: Duration::from_secs(10),
            max_message_len: 64 * 1024 * 1024,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportState {
    Idle,
    /// `bind` ran; the receive loop has not been polled yet.
    Bound,
    Receiving,
    Unbound,
}

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

struct WriterHalf {
    sink: Box<dyn AsyncWrite + Send + Unpin>,
    active_isolate: IsolateId,
}

struct Inner {
    writer: Mutex<WriterHalf>,
    reader: StdMutex<Option<BoxedReader>>,
    listeners: StdMutex<BTreeMap<ListenerIndex, Arc<dyn MessageListener>>>,
    state: StdMutex<TransportState>,
    cause: StdMutex<Option<Arc<WireError>>>,
    pointer_size: AtomicU8,
    received: AtomicU64,
    sent: AtomicU64,
    disconnect_reported: AtomicBool,
    shutdown: CancellationToken,
    control: Option<Arc<dyn SocketControl>>,
    pool: MessagePool,
    config: TransportConfig,
}

/// Owns one connection to a player: a single writer section, a receive loop
/// that frames and dispatches inbound messages, and the idle heartbeat.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<Inner>,
}

/// Non-owning handle, for listeners that need to send replies without
/// keeping the transport alive.
#[derive(Clone)]
pub struct WeakTransport {
    inner: Weak<Inner>,
}

impl WeakTransport {
    pub fn upgrade(&self) -> Option<Transport> {
        self.inner.upgrade().map(|inner| Transport { inner })
    }
}

impl Transport {
    pub fn new<S>(stream: S, config: TransportConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        Self::with_socket_control(stream, None, config)
    }

    pub fn with_socket_control<S>(
        stream: S,
        control: Option<Arc<dyn SocketControl>>,
        config: TransportConfig,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let inner = Arc::new(Inner {
            writer: Mutex::new(WriterHalf {
                sink: Box::new(writer),
                active_isolate: PRIMORDIAL_ISOLATE,
            }),
            reader: StdMutex::new(Some(Box::new(reader))),
            listeners: StdMutex::new(BTreeMap::new()),
            state: StdMutex::new(TransportState::Idle),
            cause: StdMutex::new(None),
            pointer_size: AtomicU8::new(4),
            received: AtomicU64::new(0),
            sent: AtomicU64::new(0),
            disconnect_reported: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            control,
            pool: MessagePool::default(),
            config,
        });
        Self { inner }
    }

    pub fn downgrade(&self) -> WeakTransport {
        WeakTransport {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn add_listener(&self, index: ListenerIndex, listener: Arc<dyn MessageListener>) {
        self.inner.listeners.lock_or_recover("Transport.add_listener").insert(index, listener);
    }

    pub fn remove_listener(&self, index: ListenerIndex) -> Option<Arc<dyn MessageListener>> {
        self.inner.listeners.lock_or_recover("Transport.remove_listener").remove(&index)
    }

    /// Starts the receive loop. Must be called from within a tokio runtime.
    pub fn bind(&self) -> Result<()> {
        let reader = {
            let mut state = self.inner.state.lock_or_recover("Transport.bind");
            if *state != TransportState::Idle {
                return Err(WireError::AlreadyBound);
            }
            let Some(reader) = self.inner.reader.lock_or_recover("Transport.bind.reader").take() else {
                return Err(WireError::AlreadyBound);
            };
            *state = TransportState::Bound;
            reader
        };

        self.inner.received.store(0, Ordering::Relaxed);
        self.inner.sent.store(0, Ordering::Relaxed);
        for listener in self.inner.listeners_snapshot() {
            listener.bound();
        }

        tokio::spawn(read_loop(reader, self.inner.clone()));
        Ok(())
    }

    /// Stops the receive loop. Listeners see `disconnected()` once it exits.
    pub fn unbind(&self) {
        let was_idle = {
            let state = self.inner.state.lock_or_recover("Transport.unbind");
            *state == TransportState::Idle
        };
        self.inner.shutdown.cancel();
        if was_idle {
            self.inner.finish(None);
        }
    }

    /// Unbinds and shuts down the write side of the stream.
    pub async fn close(&self) {
        self.unbind();
        let mut writer = self.inner.writer.lock().await;
        let _ = writer.sink.shutdown().await;
    }

    pub fn state(&self) -> TransportState {
        *self.inner.state.lock_or_recover("Transport.state")
    }

    pub fn is_connected(&self) -> bool {
        !self.inner.shutdown.is_cancelled() && self.state() != TransportState::Unbound
    }

    /// A token that is cancelled once the connection is gone, either through
    /// [`Transport::unbind`] or because the receive loop ended.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    /// Why the receive loop ended, if it ended with an error.
    pub fn disconnect_cause(&self) -> Option<Arc<WireError>> {
        self.inner.cause.lock_or_recover("Transport.disconnect_cause").clone()
    }

    pub fn pointer_width(&self) -> PointerWidth {
        self.inner.pointer_width()
    }

    pub fn messages_received(&self) -> u64 {
        self.inner.received.load(Ordering::Relaxed)
    }

    pub fn messages_sent(&self) -> u64 {
        self.inner.sent.load(Ordering::Relaxed)
    }

    /// Writes one frame. When `msg` targets a different isolate than the
    /// previous write, a `SetActiveIsolate` frame goes out first, inside the
    /// same writer section.
    pub async fn send(&self, msg: &Message) -> Result<()> {
        if !self.is_connected() {
            return Err(WireError::NotConnected);
        }
        let Some(kind) = msg.outbound_kind() else {
            return Err(WireError::MalformedMessage(
                "inbound message passed to send".to_string(),
            ));
        };

        let switch = {
            let mut writer = self.inner.writer.lock().await;
            let switch = if msg.isolate() != writer.active_isolate {
                let mut w = WireWriter::growable(msg.pointer_width());
                Command::SetActiveIsolate(msg.isolate()).encode(&mut w)?;
                let switch = Message::outbound(
                    OutboundKind::SetActiveIsolate,
                    msg.isolate(),
                    msg.pointer_width(),
                    w.into_vec(),
                );
                write_frame(&mut writer.sink, OutboundKind::SetActiveIsolate, switch.payload())
                    .await?;
                writer.active_isolate = msg.isolate();
                Some(switch)
            } else {
                None
            };
            write_frame(&mut writer.sink, kind, msg.payload()).await?;
            switch
        };

        if let Some(switch) = switch {
            self.inner.note_sent(&switch);
        }
        self.inner.note_sent(msg);
        tracing::trace!(
            target: "swfdbg.wire",
            kind = %kind,
            len = msg.payload().len(),
            isolate = msg.isolate(),
            "frame sent"
        );
        Ok(())
    }

    /// Encodes `command` into a pooled buffer and sends it.
    pub async fn send_command(&self, isolate: IsolateId, command: &Command) -> Result<()> {
        let width = self.pointer_width();
        let mut w = WireWriter::from_buf(
            self.inner.pool.take(64),
            Some(self.inner.config.max_message_len),
            width,
        );
        command.encode(&mut w)?;
        let msg = Message::outbound(command.kind(), isolate, width, w.into_vec());
        let result = self.send(&msg).await;
        self.inner.pool.give(msg.into_payload());
        result
    }
}

impl Inner {
    fn pointer_width(&self) -> PointerWidth {
        PointerWidth::from_size(self.pointer_size.load(Ordering::Acquire)).unwrap_or_default()
    }

    fn listeners_snapshot(&self) -> Vec<Arc<dyn MessageListener>> {
        self.listeners.lock_or_recover("Transport.listeners")
            .values()
            .cloned()
            .collect()
    }

    fn note_sent(&self, msg: &Message) {
        self.sent.fetch_add(1, Ordering::Relaxed);
        for listener in self.listeners_snapshot() {
            listener.message_sent(msg);
        }
    }

    fn dispatch(&self, command: u32, payload: Vec<u8>, isolate: &mut IsolateId) {
        let kind = InboundKind::from_u32(command);
        match kind {
            InboundKind::Isolate => {
                match WireReader::new(&payload, self.pointer_width()).read_u32() {
                    Ok(id) => *isolate = id,
                    Err(err) => tracing::warn!(
                        target: "swfdbg.wire",
                        error = %err,
                        "ignoring isolate switch without an id"
                    ),
                }
            }
            InboundKind::Version => {
                if let Some(&size) = payload.get(4) {
                    match PointerWidth::from_size(size) {
                        Some(width) => {
                            self.pointer_size.store(width.size() as u8, Ordering::Release)
                        }
                        None => tracing::warn!(
                            target: "swfdbg.wire",
                            size,
                            "ignoring unsupported pointer size"
                        ),
                    }
                }
            }
            _ => {}
        }

        let msg = Message::inbound(kind, *isolate, self.pointer_width(), payload);
        self.received.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(
            target: "swfdbg.wire",
            kind = %kind,
            len = msg.payload().len(),
            isolate = msg.isolate(),
            "frame received"
        );

        for listener in self.listeners_snapshot() {
            if catch_unwind(AssertUnwindSafe(|| listener.message_arrived(&msg))).is_err() {
                tracing::error!(
                    target: "swfdbg.wire",
                    kind = %kind,
                    "listener panicked while handling message"
                );
            }
        }
        self.pool.give(msg.into_payload());
    }

    fn finish(&self, cause: Option<WireError>) {
        *self.state.lock_or_recover("Transport.finish") = TransportState::Unbound;
        self.shutdown.cancel();

        if let Some(err) = cause {
            tracing::debug!(target: "swfdbg.wire", error = %err, "receive loop ended");
            let mut slot = self.cause.lock_or_recover("Transport.finish.cause");
            if slot.is_none() {
                *slot = Some(Arc::new(err));
            }
        }

        if self.disconnect_reported.swap(true, Ordering::AcqRel) {
            return;
        }
        for listener in self.listeners_snapshot() {
            listener.disconnected();
        }
    }
}

async fn write_frame(
    sink: &mut (dyn AsyncWrite + Send + Unpin),
    kind: OutboundKind,
    payload: &[u8],
) -> Result<()> {
    let mut header = [0u8; FRAME_HEADER_LEN];
    header[..4].copy_from_slice(&(payload.len() as u32).to_le_bytes());
    header[4..].copy_from_slice(&kind.as_u32().to_le_bytes());
    sink.write_all(&header).await?;
    sink.write_all(payload).await?;
    sink.flush().await?;
    Ok(())
}

enum ReadOutcome {
    Data(usize),
    Idle,
    Failed(io::Error),
}

async fn read_some(
    reader: &mut BoxedReader,
    chunk: &mut [u8],
    idle: Option<Duration>,
) -> ReadOutcome {
    // `read` is cancel-safe, so an idle timeout never loses bytes.
    let read = match idle {
        Some(idle) => match tokio::time::timeout(idle, reader.read(chunk)).await {
            Ok(read) => read,
            Err(_) => return ReadOutcome::Idle,
        },
        None => reader.read(chunk).await,
    };
    match read {
        Ok(n) => ReadOutcome::Data(n),
        Err(err) => ReadOutcome::Failed(err),
    }
}

/// Splits one complete frame off the front of `pending`, if there is one.
fn next_frame(pending: &mut Vec<u8>, inner: &Inner) -> Result<Option<(u32, Vec<u8>)>> {
    if pending.len() < FRAME_HEADER_LEN {
        return Ok(None);
    }
    let len = u32::from_le_bytes([pending[0], pending[1], pending[2], pending[3]]) as usize;
    if len > inner.config.max_message_len {
        return Err(WireError::MalformedMessage(format!(
            "frame length {len} exceeds limit {}",
            inner.config.max_message_len
        )));
    }
    let end = FRAME_HEADER_LEN + len;
    if pending.len() < end {
        return Ok(None);
    }
    let command = u32::from_le_bytes([pending[4], pending[5], pending[6], pending[7]]);
    let mut payload = inner.pool.take(len);
    payload.extend_from_slice(&pending[FRAME_HEADER_LEN..end]);
    pending.drain(..end);
    Ok(Some((command, payload)))
}

async fn read_loop(mut reader: BoxedReader, inner: Arc<Inner>) {
    let mut pending = Vec::with_capacity(READ_CHUNK);
    let mut chunk = vec![0u8; READ_CHUNK];
    let mut isolate = PRIMORDIAL_ISOLATE;
    {
        let mut state = inner.state.lock_or_recover("Transport.read_loop");
        if *state == TransportState::Bound {
            *state = TransportState::Receiving;
        }
    }

    let cause = loop {
        match next_frame(&mut pending, &inner) {
            Ok(Some((command, payload))) => {
                inner.dispatch(command, payload, &mut isolate);
                continue;
            }
            Ok(None) => {}
            Err(err) => break Some(err),
        }

        let read = tokio::select! {
            _ = inner.shutdown.cancelled() => break None,
            read = read_some(&mut reader, &mut chunk, inner.config.idle_timeout) => read,
        };

        match read {
            ReadOutcome::Data(0) => {
                break Some(WireError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "player closed the connection",
                )))
            }
            ReadOutcome::Data(n) => pending.extend_from_slice(&chunk[..n]),
            ReadOutcome::Failed(err) => break Some(err.into()),
            ReadOutcome::Idle => {
                let probe = tokio::select! {
                    _ = inner.shutdown.cancelled() => break None,
                    probe = heartbeat(&inner) => probe,
                };
                if let Err(err) = probe {
                    break Some(err);
                }
            }
        }
    };

    inner.finish(cause);
}

/// Probes a silent connection by writing a harmless squelch frame with the
/// send buffer shrunk to one byte, so the write cannot complete unless the
/// peer is actually draining the socket.
async fn heartbeat(inner: &Inner) -> Result<()> {
    tracing::debug!(target: "swfdbg.wire", "read idle; probing connection");

    let restore = inner.control.as_ref().and_then(|control| {
        let size = control.send_buffer_size().ok()?;
        if let Err(err) = control.set_send_buffer_size(1) {
            tracing::debug!(target: "swfdbg.wire", error = %err, "could not shrink send buffer");
        }
        Some((control, size))
    });

    let probe = async {
        let mut w = WireWriter::growable(inner.pointer_width());
        Command::SetSquelch(true).encode(&mut w)?;
        let payload = w.into_vec();
        let mut writer = inner.writer.lock().await;
        write_frame(&mut writer.sink, OutboundKind::SetSquelch, &payload).await
    };
    let outcome = tokio::time::timeout(inner.config.heartbeat_ceiling, probe).await;

    if let Some((control, size)) = restore {
        if let Err(err) = control.set_send_buffer_size(size) {
            tracing::debug!(target: "swfdbg.wire", error = %err, "could not restore send buffer");
        }
    }

    match outcome {
        Ok(Ok(())) => {
            inner.sent.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
        Ok(Err(err)) => {
            tracing::warn!(target: "swfdbg.wire", error = %err, "heartbeat probe failed");
            Err(err)
        }
        Err(_) => {
            tracing::warn!(
                target: "swfdbg.wire",
                ceiling_ms = inner.config.heartbeat_ceiling.as_millis() as u64,
                "heartbeat probe did not complete; treating connection as broken"
            );
            Err(WireError::BrokenPipe)
        }
    }
}
