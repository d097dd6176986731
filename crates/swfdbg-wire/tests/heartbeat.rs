use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pretty_assertions::assert_eq;
use swfdbg_wire::{
    InboundKind, ListenerIndex, Message, MessageListener, OutboundKind, SocketControl, Transport,
    TransportConfig, WireError,
};
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

#[derive(Default)]
struct FakeSocket {
    calls: Mutex<Vec<u32>>,
}

impl SocketControl for FakeSocket {
    fn send_buffer_size(&self) -> io::Result<u32> {
        Ok(8192)
    }

    fn set_send_buffer_size(&self, size: u32) -> io::Result<()> {
        self.calls.lock().unwrap().push(size);
        Ok(())
    }
}

#[derive(Default)]
struct Listener {
    traces: AtomicUsize,
    disconnects: AtomicUsize,
}

impl MessageListener for Listener {
    fn message_arrived(&self, msg: &Message) {
        if msg.inbound_kind() == Some(InboundKind::Trace) {
            self.traces.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn disconnected(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

fn config() -> TransportConfig {
    TransportConfig {
        idle_timeout: Some(Duration::from_millis(100)),
        heartbeat_ceiling: Duration::from_secs(10),
        ..TransportConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn answered_probe_keeps_connection_alive() {
    let (ours, mut player) = duplex(4096);
    let socket = Arc::new(FakeSocket::default());
    let transport = Transport::with_socket_control(ours, Some(socket.clone()), config());
    let listener = Arc::new(Listener::default());
    transport.add_listener(ListenerIndex::Session, listener.clone());
    transport.bind().unwrap();

    let mut probe = [0u8; 12];
    player.read_exact(&mut probe).await.unwrap();
    assert_eq!(&probe[..4], &4u32.to_le_bytes());
    assert_eq!(&probe[4..8], &OutboundKind::SetSquelch.as_u32().to_le_bytes());
    assert_eq!(&probe[8..], &1u32.to_le_bytes());

    let mut trace = 3u32.to_le_bytes().to_vec();
    trace.extend_from_slice(&InboundKind::Trace.as_u32().to_le_bytes());
    trace.extend_from_slice(b"hi\0");
    player.write_all(&trace).await.unwrap();
    tokio::time::timeout(Duration::from_secs(1), async {
        while listener.traces.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    assert!(transport.is_connected());
    assert_eq!(listener.disconnects.load(Ordering::SeqCst), 0);
    let calls = socket.calls.lock().unwrap().clone();
    assert_eq!(&calls[..2], &[1, 8192]);
}

#[tokio::test(start_paused = true)]
async fn stalled_probe_breaks_the_pipe_once() {
    // Too small for a whole probe frame, and the player never reads.
    let (ours, _player) = duplex(8);
    let transport = Transport::new(ours, config());
    let listener = Arc::new(Listener::default());
    transport.add_listener(ListenerIndex::Session, listener.clone());
    transport.bind().unwrap();

    transport.shutdown_token().cancelled().await;
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }

    assert_eq!(listener.disconnects.load(Ordering::SeqCst), 1);
    assert!(matches!(
        transport.disconnect_cause().as_deref(),
        Some(WireError::BrokenPipe)
    ));
    assert!(!transport.is_connected());
}

#[tokio::test(start_paused = true)]
async fn heartbeat_is_off_by_default() {
    let (ours, _player) = duplex(8);
    let transport = Transport::new(ours, TransportConfig::default());
    transport.bind().unwrap();

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(transport.is_connected());
    assert_eq!(transport.messages_sent(), 0);
}
