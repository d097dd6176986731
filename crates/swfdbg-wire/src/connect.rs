//! Establishing the TCP stream a [`Transport`] runs over.
//!
//! The player either dials the debugger (the debugger listens) or, for
//! players started with remote debugging enabled, waits for the debugger to
//! dial it.

use std::{
    io,
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use tokio::net::{TcpListener, TcpSocket, TcpStream};

use super::{
    error::{Result, WireError},
    transport::{SocketControl, Transport, TransportConfig},
};

pub const DEFAULT_LISTEN_PORT: u16 = 7935;
pub const DEFAULT_CONNECT_PORT: u16 = 7936;

#[derive(Debug, Clone)]
pub struct ConnectConfig {
    pub accept_timeout: Duration,
    pub connect_timeout: Duration,
    pub connect_retry_interval: Duration,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            accept_timeout: Duration::from_secs(120),
            connect_timeout: Duration::from_secs(120),
            connect_retry_interval: Duration::from_millis(250),
        }
    }
}

/// A connected stream plus the socket handle the heartbeat uses.
pub struct Connection {
    pub stream: TcpStream,
    pub peer: SocketAddr,
    pub control: Option<Arc<dyn SocketControl>>,
}

impl Connection {
    pub fn into_transport(self, config: TransportConfig) -> Transport {
        Transport::with_socket_control(self.stream, self.control, config)
    }
}

/// Send-buffer control through a duplicate handle of the connected socket.
struct TcpSocketControl {
    socket: TcpSocket,
}

impl SocketControl for TcpSocketControl {
    fn send_buffer_size(&self) -> io::Result<u32> {
        self.socket.send_buffer_size()
    }

    fn set_send_buffer_size(&self, size: u32) -> io::Result<()> {
        self.socket.set_send_buffer_size(size)
    }
}

/// Binds the debugger's listening socket on every interface.
pub async fn listen(port: u16) -> Result<TcpListener> {
    Ok(TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await?)
}

/// Waits for the player to dial in.
pub async fn accept(listener: &TcpListener, config: &ConnectConfig) -> Result<Connection> {
    let (stream, peer) = tokio::time::timeout(config.accept_timeout, listener.accept())
        .await
        .map_err(|_| {
            WireError::Io(io::Error::new(
                io::ErrorKind::TimedOut,
                "no player connected before the accept timeout",
            ))
        })??;
    tracing::debug!(target: "swfdbg.wire", %peer, "player connected");
    prepare(stream, peer)
}

/// Dials a player that is waiting for a debugger, retrying refused
/// connections until `connect_timeout` runs out.
pub async fn connect(addr: SocketAddr, config: &ConnectConfig) -> Result<Connection> {
    let deadline = tokio::time::Instant::now() + config.connect_timeout;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        let attempt = tokio::time::timeout(remaining, TcpStream::connect(addr)).await;
        match attempt {
            Ok(Ok(stream)) => {
                tracing::debug!(target: "swfdbg.wire", peer = %addr, "connected to player");
                return prepare(stream, addr);
            }
            Ok(Err(err)) if tokio::time::Instant::now() + config.connect_retry_interval < deadline => {
                tracing::trace!(target: "swfdbg.wire", error = %err, "connect failed; retrying");
                tokio::time::sleep(config.connect_retry_interval).await;
            }
            Ok(Err(err)) => return Err(err.into()),
            Err(_) => {
                return Err(WireError::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("could not reach player at {addr}"),
                )))
            }
        }
    }
}

fn prepare(stream: TcpStream, peer: SocketAddr) -> Result<Connection> {
    if let Err(err) = stream.set_nodelay(true) {
        tracing::debug!(target: "swfdbg.wire", error = %err, "could not set TCP_NODELAY");
    }
    let (stream, control) = split_control(stream)?;
    Ok(Connection {
        stream,
        peer,
        control,
    })
}

fn split_control(stream: TcpStream) -> Result<(TcpStream, Option<Arc<dyn SocketControl>>)> {
    let std_stream = stream.into_std()?;
    let control = match std_stream.try_clone() {
        Ok(dup) => Some(Arc::new(TcpSocketControl {
            socket: TcpSocket::from_std_stream(dup),
        }) as Arc<dyn SocketControl>),
        Err(err) => {
            tracing::debug!(target: "swfdbg.wire", error = %err, "heartbeat cannot resize send buffer");
            None
        }
    };
    let stream = TcpStream::from_std(std_stream)?;
    Ok((stream, control))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn accept_and_connect_meet() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let config = ConnectConfig::default();

        let (accepted, connected) = tokio::join!(accept(&listener, &config), connect(addr, &config));
        let accepted = accepted.unwrap();
        let connected = connected.unwrap();
        assert_eq!(connected.peer, addr);
        assert!(accepted.stream.nodelay().unwrap());

        let control = connected.control.expect("tcp streams expose send-buffer control");
        control.set_send_buffer_size(4096).unwrap();
        assert!(control.send_buffer_size().unwrap() > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn accept_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = ConnectConfig {
            accept_timeout: Duration::from_millis(50),
            ..ConnectConfig::default()
        };
        let err = accept(&listener, &config).await.err().unwrap();
        assert!(matches!(err, WireError::Io(e) if e.kind() == io::ErrorKind::TimedOut));
    }
}
