use std::sync::Arc;
use std::time::Duration;

use swfdbg::{Session, SessionConfig};
use swfdbg_wire::mock::{MockPlayer, MockPlayerConfig, PlayerFrame, ReceivedCommand};
use swfdbg_wire::{AtomTag, InboundKind, IsolateId, OutboundKind, Transport, TransportConfig, WireWriter};

pub struct Harness {
    pub player: Arc<MockPlayer>,
    pub session: Session,
}

impl Harness {
    /// Builds a reply with the player's pointer width.
    pub fn frame(
        &self,
        kind: InboundKind,
        build: impl FnOnce(&mut WireWriter) -> swfdbg_wire::Result<()>,
    ) -> PlayerFrame {
        PlayerFrame::build(kind, self.player.pointer_width(), build).unwrap()
    }

    pub async fn send(&self, kind: InboundKind, build: impl FnOnce(&mut WireWriter) -> swfdbg_wire::Result<()>) {
        self.player.send(self.frame(kind, build)).await.unwrap();
    }

    /// Halts the primordial isolate through the player's default stop reply.
    pub async fn halt(&self) {
        self.session.suspend().await.unwrap();
    }

    pub async fn load_script(&self, module: u32, name: &str, text: &str) {
        self.send(InboundKind::Script, |w| {
            w.write_u32(module)?;
            w.write_u32(0)?;
            w.write_string(name)?;
            w.write_string(text)
        })
        .await;
        let session = self.session.clone();
        eventually(move || session.module(module).is_some()).await;
    }

    /// Answers `kind` with a single frame built from the received command.
    pub fn respond_with(
        &self,
        kind: OutboundKind,
        reply: InboundKind,
        build: impl Fn(&ReceivedCommand, &mut WireWriter) -> swfdbg_wire::Result<()> + Send + Sync + 'static,
    ) {
        let width = self.player.pointer_width();
        self.player.respond(kind, move |cmd| {
            let frame = PlayerFrame::build(reply, width, |w| build(cmd, w)).unwrap();
            vec![frame.for_isolate(cmd.isolate)]
        });
    }

    pub fn count_received(&self, kind: OutboundKind) -> usize {
        self.player
            .received_kinds()
            .into_iter()
            .filter(|k| *k == kind)
            .count()
    }
}

pub async fn attach(player: MockPlayerConfig) -> Harness {
    attach_with(player, SessionConfig::default()).await
}

pub async fn attach_with(player: MockPlayerConfig, config: SessionConfig) -> Harness {
    let (player, stream) = MockPlayer::spawn_with_config(player).await.unwrap();
    let session = Session::new(Transport::new(stream, TransportConfig::default()), config);
    session.bind().await.unwrap();
    Harness {
        player: Arc::new(player),
        session,
    }
}

pub fn player_with_options(options: &[(&str, &str)]) -> MockPlayerConfig {
    MockPlayerConfig {
        options: options
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        ..MockPlayerConfig::default()
    }
}

pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..1_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition never became true");
}

/// One `parent, name, tag, flags, atom` member record holding an object.
pub fn write_object(w: &mut WireWriter, parent: i64, name: &str, flags: u32, id: i64, type_name: &str) -> swfdbg_wire::Result<()> {
    w.write_ptr(parent)?;
    w.write_string(name)?;
    w.write_u16(AtomTag::Object.as_u16())?;
    w.write_u32(flags)?;
    w.write_ptr(id)?;
    w.write_u32(0)?;
    w.write_u16(0)?;
    w.write_u16(0)?;
    w.write_string(type_name)
}

pub fn write_number(w: &mut WireWriter, parent: i64, name: &str, flags: u32, value: f64) -> swfdbg_wire::Result<()> {
    w.write_ptr(parent)?;
    w.write_string(name)?;
    w.write_u16(AtomTag::Number.as_u16())?;
    w.write_u32(flags)?;
    w.write_string(&value.to_string())
}

pub fn write_text(w: &mut WireWriter, parent: i64, name: &str, flags: u32, value: &str) -> swfdbg_wire::Result<()> {
    w.write_ptr(parent)?;
    w.write_string(name)?;
    w.write_u16(AtomTag::String.as_u16())?;
    w.write_u32(flags)?;
    w.write_string(value)
}

pub fn write_boolean(w: &mut WireWriter, parent: i64, name: &str, value: bool) -> swfdbg_wire::Result<()> {
    w.write_ptr(parent)?;
    w.write_string(name)?;
    w.write_u16(AtomTag::Boolean.as_u16())?;
    w.write_u32(0)?;
    w.write_bool(value)
}

/// A stop with an empty stack.
pub fn write_break(w: &mut WireWriter) -> swfdbg_wire::Result<()> {
    w.write_u32(0)?;
    w.write_u32(0)
}

pub fn worker_break(harness: &Harness, isolate: IsolateId) -> PlayerFrame {
    harness
        .frame(InboundKind::BreakAtExt, write_break)
        .for_isolate(isolate)
}
