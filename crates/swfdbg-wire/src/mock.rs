use std::{
    collections::HashMap,
    sync::{Arc, Mutex as StdMutex},
};

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf},
    sync::{Mutex, Notify},
};
use tokio_util::sync::CancellationToken;

use super::{
    codec::{PointerWidth, WireReader, WireWriter, FRAME_HEADER_LEN},
    error::Result,
    kinds::{InboundKind, OutboundKind},
    message::{IsolateId, PRIMORDIAL_ISOLATE},
    poison::RecoverLock,
};

/// A frame the mock player sends, addressed to an isolate.
#[derive(Clone, Debug)]
pub struct PlayerFrame {
    pub kind: InboundKind,
    pub isolate: IsolateId,
    pub payload: Vec<u8>,
}

impl PlayerFrame {
    pub fn new(kind: InboundKind, payload: Vec<u8>) -> Self {
        Self {
            kind,
            isolate: PRIMORDIAL_ISOLATE,
            payload,
        }
    }

    /// Builds the payload with a writer at `width`.
    pub fn build(
        kind: InboundKind,
        width: PointerWidth,
        build: impl FnOnce(&mut WireWriter) -> Result<()>,
    ) -> Result<Self> {
        let mut w = WireWriter::growable(width);
        build(&mut w)?;
        Ok(Self::new(kind, w.into_vec()))
    }

    pub fn for_isolate(mut self, isolate: IsolateId) -> Self {
        self.isolate = isolate;
        self
    }
}

/// A command the debugger sent, with the isolate that was active for it.
#[derive(Clone, Debug)]
pub struct ReceivedCommand {
    pub kind: OutboundKind,
    pub isolate: IsolateId,
    pub payload: Vec<u8>,
    pub width: PointerWidth,
}

impl ReceivedCommand {
    pub fn reader(&self) -> WireReader<'_> {
        WireReader::new(&self.payload, self.width)
    }
}

/// Produces the reply frames for one received command.
pub type Responder = Arc<dyn Fn(&ReceivedCommand) -> Vec<PlayerFrame> + Send + Sync>;

#[derive(Clone, Debug)]
pub struct MockPlayerConfig {
    /// Sent as the first frame after the connection opens; `None` sends
    /// nothing, which is how players older than version 7 behave.
    pub version: Option<u32>,
    /// Pointer size announced alongside `version`.
    pub pointer_size: u8,
    /// Values returned for `GetOption`, keyed by option name. Unknown
    /// options come back as an empty string.
    pub options: HashMap<String, String>,
    /// Whether `SetSquelch` is acknowledged. Turning this off simulates a
    /// player that does not speak this protocol revision.
    pub answer_squelch: bool,
    /// Stack returned for `StopDebug` as `(location, this id, signature)`.
    pub stack: Vec<(u32, i64, String)>,
    /// Isolates reported by `IsolateEnumerate`.
    pub isolates: Vec<IsolateId>,
    /// In-memory pipe capacity.
    pub buffer_size: usize,
}

impl Default for MockPlayerConfig {
    fn default() -> Self {
        Self {
            version: Some(10),
            pointer_size: 4,
            options: HashMap::new(),
            answer_squelch: true,
            stack: vec![(0x0001_0001, 0x10, "Main/run()".to_string())],
            isolates: Vec::new(),
            buffer_size: 256 * 1024,
        }
    }
}

struct State {
    writer: Mutex<PlayerWriter>,
    responders: StdMutex<HashMap<OutboundKind, Responder>>,
    received: StdMutex<Vec<ReceivedCommand>>,
    received_notify: Notify,
    config: MockPlayerConfig,
}

struct PlayerWriter {
    sink: WriteHalf<DuplexStream>,
    isolate: IsolateId,
}

/// A scripted player on the far end of an in-memory pipe.
///
/// It answers the handshake-style commands a session sends on bind, acks
/// breakpoints and run-control commands, and otherwise replies with
/// whatever was registered through [`MockPlayer::respond`].
pub struct MockPlayer {
    shutdown: CancellationToken,
    state: Arc<State>,
}

impl MockPlayer {
    pub async fn spawn() -> Result<(Self, DuplexStream)> {
        Self::spawn_with_config(MockPlayerConfig::default()).await
    }

    pub async fn spawn_with_config(config: MockPlayerConfig) -> Result<(Self, DuplexStream)> {
        let (debugger, player) = tokio::io::duplex(config.buffer_size);
        let (reader, writer) = tokio::io::split(player);
        let state = Arc::new(State {
            writer: Mutex::new(PlayerWriter {
                sink: writer,
                isolate: PRIMORDIAL_ISOLATE,
            }),
            responders: StdMutex::new(HashMap::new()),
            received: StdMutex::new(Vec::new()),
            received_notify: Notify::new(),
            config,
        });
        install_defaults(&state);

        let mock = Self {
            shutdown: CancellationToken::new(),
            state,
        };

        if let Some(version) = mock.state.config.version {
            let pointer_size = mock.state.config.pointer_size;
            let frame = PlayerFrame::build(InboundKind::Version, PointerWidth::Four, |w| {
                w.write_u32(version)?;
                w.write_u8(pointer_size)
            })?;
            mock.send(frame).await?;
        }

        tokio::spawn(run(reader, mock.state.clone(), mock.shutdown.clone()));
        Ok((mock, debugger))
    }

    pub fn pointer_width(&self) -> PointerWidth {
        pointer_width(&self.state.config)
    }

    /// Replaces the reply for `kind`.
    pub fn respond(
        &self,
        kind: OutboundKind,
        responder: impl Fn(&ReceivedCommand) -> Vec<PlayerFrame> + Send + Sync + 'static,
    ) {
        self.state.responders.lock_or_recover("MockPlayer.respond").insert(kind, Arc::new(responder));
    }

    /// Makes `kind` go unanswered.
    pub fn silence(&self, kind: OutboundKind) {
        self.respond(kind, |_| Vec::new());
    }

    /// Sends an unsolicited frame.
    pub async fn send(&self, frame: PlayerFrame) -> Result<()> {
        send_frames(&self.state, vec![frame]).await
    }

    pub fn received(&self) -> Vec<ReceivedCommand> {
        self.state.received.lock_or_recover("MockPlayer.received").clone()
    }

    pub fn received_kinds(&self) -> Vec<OutboundKind> {
        self.received().into_iter().map(|cmd| cmd.kind).collect()
    }

    /// Waits until a command of `kind` has arrived and returns the latest one.
    pub async fn wait_for(&self, kind: OutboundKind) -> ReceivedCommand {
        loop {
            let notified = self.state.received_notify.notified();
            if let Some(cmd) = self
                .received()
                .into_iter()
                .rev()
                .find(|cmd| cmd.kind == kind)
            {
                return cmd;
            }
            notified.await;
        }
    }

    /// Drops the connection from the player's side.
    pub async fn hang_up(&self) {
        self.shutdown.cancel();
        let mut writer = self.state.writer.lock().await;
        let _ = writer.sink.shutdown().await;
    }
}

impl Drop for MockPlayer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn pointer_width(config: &MockPlayerConfig) -> PointerWidth {
    match config.version {
        Some(_) => PointerWidth::from_size(config.pointer_size).unwrap_or_default(),
        None => PointerWidth::Four,
    }
}

fn reply(kind: InboundKind, width: PointerWidth, build: impl FnOnce(&mut WireWriter) -> Result<()>) -> Vec<PlayerFrame> {
    match PlayerFrame::build(kind, width, build) {
        Ok(frame) => vec![frame],
        Err(_) => Vec::new(),
    }
}

fn install_defaults(state: &Arc<State>) {
    let config = state.config.clone();
    let width = pointer_width(&config);
    let mut responders = state.responders.lock_or_recover("MockPlayer.install_defaults");

    responders.insert(
        OutboundKind::SetOption,
        Arc::new(move |cmd: &ReceivedCommand| {
            let mut r = cmd.reader();
            let (Ok(name), Ok(value)) = (r.read_string(), r.read_string()) else {
                return Vec::new();
            };
            reply(InboundKind::Option, width, |w| {
                w.write_string(&name)?;
                w.write_string(&value)
            })
        }),
    );

    let options = config.options.clone();
    responders.insert(
        OutboundKind::GetOption,
        Arc::new(move |cmd: &ReceivedCommand| {
            let Ok(name) = cmd.reader().read_string() else {
                return Vec::new();
            };
            let value = options.get(&name).cloned().unwrap_or_default();
            reply(InboundKind::Option, width, |w| {
                w.write_string(&name)?;
                w.write_string(&value)
            })
        }),
    );

    let answer_squelch = config.answer_squelch;
    responders.insert(
        OutboundKind::SetSquelch,
        Arc::new(move |cmd: &ReceivedCommand| {
            if !answer_squelch {
                return Vec::new();
            }
            let on = cmd.reader().read_u32().unwrap_or(1);
            reply(InboundKind::Squelch, width, |w| w.write_u32(on))
        }),
    );

    for kind in [
        OutboundKind::Continue,
        OutboundKind::StepInto,
        OutboundKind::StepOver,
        OutboundKind::StepOut,
        OutboundKind::StepContinue,
    ] {
        responders.insert(
            kind,
            Arc::new(move |cmd: &ReceivedCommand| {
                reply(InboundKind::Continue, width, |_| Ok(()))
                    .into_iter()
                    .map(|frame| frame.for_isolate(cmd.isolate))
                    .collect()
            }),
        );
    }

    let stack = config.stack.clone();
    responders.insert(
        OutboundKind::StopDebug,
        Arc::new(move |cmd: &ReceivedCommand| {
            let location = stack.first().map(|(loc, _, _)| *loc).unwrap_or(0);
            reply(InboundKind::BreakAtExt, width, |w| {
                w.write_u32(location)?;
                w.write_u32(stack.len() as u32)?;
                for (loc, this_id, signature) in &stack {
                    w.write_u32(*loc)?;
                    w.write_ptr(*this_id)?;
                    w.write_string(signature)?;
                }
                Ok(())
            })
            .into_iter()
            .map(|frame| frame.for_isolate(cmd.isolate))
            .collect()
        }),
    );

    for (out, ack) in [
        (OutboundKind::SetBreakpoints, InboundKind::SetBreakpoint),
        (OutboundKind::RemoveBreakpoints, InboundKind::RemoveBreakpoint),
    ] {
        responders.insert(
            out,
            Arc::new(move |cmd: &ReceivedCommand| {
                let mut r = cmd.reader();
                let Ok(count) = r.read_u32() else {
                    return Vec::new();
                };
                let ids: Vec<u32> = (0..count).filter_map(|_| r.read_u32().ok()).collect();
                reply(ack, width, |w| {
                    w.write_u32(ids.len() as u32)?;
                    for id in &ids {
                        w.write_u32(*id)?;
                    }
                    Ok(())
                })
                .into_iter()
                .map(|frame| frame.for_isolate(cmd.isolate))
                .collect()
            }),
        );
    }

    responders.insert(
        OutboundKind::GetBreakReason,
        Arc::new(move |cmd: &ReceivedCommand| {
            reply(InboundKind::BreakReason, width, |w| {
                w.write_u16(1)?;
                w.write_u16(0)?;
                w.write_u32(0)?;
                w.write_u32(0)?;
                w.write_u32(0)
            })
            .into_iter()
            .map(|frame| frame.for_isolate(cmd.isolate))
            .collect()
        }),
    );

    responders.insert(
        OutboundKind::SwfInfo,
        Arc::new(move |cmd: &ReceivedCommand| {
            reply(InboundKind::SwfInfo, width, |w| w.write_u16(0))
                .into_iter()
                .map(|frame| frame.for_isolate(cmd.isolate))
                .collect()
        }),
    );

    let isolates = config.isolates.clone();
    responders.insert(
        OutboundKind::IsolateEnumerate,
        Arc::new(move |_cmd: &ReceivedCommand| {
            reply(InboundKind::IsolateEnumerate, width, |w| {
                w.write_u32(isolates.len() as u32)?;
                for isolate in &isolates {
                    w.write_u32(*isolate)?;
                }
                Ok(())
            })
        }),
    );
}

async fn send_frames(state: &State, frames: Vec<PlayerFrame>) -> Result<()> {
    let mut writer = state.writer.lock().await;
    for frame in frames {
        if frame.isolate != writer.isolate {
            write_raw(&mut writer.sink, InboundKind::Isolate, &frame.isolate.to_le_bytes()).await?;
            writer.isolate = frame.isolate;
        }
        write_raw(&mut writer.sink, frame.kind, &frame.payload).await?;
    }
    Ok(())
}

async fn write_raw(sink: &mut WriteHalf<DuplexStream>, kind: InboundKind, payload: &[u8]) -> Result<()> {
    sink.write_all(&(payload.len() as u32).to_le_bytes()).await?;
    sink.write_all(&kind.as_u32().to_le_bytes()).await?;
    sink.write_all(payload).await?;
    sink.flush().await?;
    Ok(())
}

async fn run(mut reader: ReadHalf<DuplexStream>, state: Arc<State>, shutdown: CancellationToken) {
    let width = pointer_width(&state.config);
    let mut active_isolate = PRIMORDIAL_ISOLATE;

    loop {
        let mut header = [0u8; FRAME_HEADER_LEN];
        let read = tokio::select! {
            _ = shutdown.cancelled() => break,
            res = reader.read_exact(&mut header) => res,
        };
        if read.is_err() {
            break;
        }
        let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let kind = OutboundKind::from_u32(u32::from_le_bytes([
            header[4], header[5], header[6], header[7],
        ]));
        let mut payload = vec![0u8; len];
        let read = tokio::select! {
            _ = shutdown.cancelled() => break,
            res = reader.read_exact(&mut payload) => res,
        };
        if read.is_err() {
            break;
        }

        if kind == OutboundKind::SetActiveIsolate {
            if let Ok(isolate) = WireReader::new(&payload, width).read_u32() {
                active_isolate = isolate;
            }
        }

        let cmd = ReceivedCommand {
            kind,
            isolate: active_isolate,
            payload,
            width,
        };
        state.received.lock_or_recover("MockPlayer.run").push(cmd.clone());
        state.received_notify.notify_waiters();

        if kind == OutboundKind::Exit {
            break;
        }

        let responder = state.responders.lock_or_recover("MockPlayer.run.responders")
            .get(&kind)
            .cloned();
        if let Some(responder) = responder {
            let frames = responder(&cmd);
            if send_frames(&state, frames).await.is_err() {
                break;
            }
        }
    }

    let mut writer = state.writer.lock().await;
    let _ = writer.sink.shutdown().await;
}
