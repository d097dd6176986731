use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use swfdbg::{DebugEvent, Session, SessionConfig, SessionError};
use swfdbg_wire::connect;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

/// Attach to a debug-enabled player and print what it reports.
///
/// By default the client waits for the player to connect, the way a player
/// started with debugging enabled expects. `--connect` dials out instead,
/// for players that listen themselves.
#[derive(Debug, Parser)]
#[command(name = "swfdbg", version, about)]
struct Cli {
    /// Path to a TOML config file.
    ///
    /// If unset, `SWFDBG_CONFIG` is used as a fallback. When neither is
    /// provided the built-in defaults apply.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Port to accept the player on.
    #[arg(long, default_value_t = connect::DEFAULT_LISTEN_PORT, conflicts_with = "connect")]
    listen: u16,

    /// Connect to a listening player at HOST:PORT instead of accepting one.
    #[arg(long, value_name = "HOST:PORT")]
    connect: Option<String>,

    /// Resume automatically whenever the player halts.
    #[arg(long)]
    resume_on_break: bool,
}

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.clone());
    init_logging(&config);

    let session = attach(&cli, config).await?;
    tokio::select! {
        result = event_loop(&session, cli.resume_on_break) => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!(target: "swfdbg.session", "interrupted; detaching");
            session.unbind().await;
            Ok(())
        }
    }
}

fn load_config(cli_path: Option<PathBuf>) -> SessionConfig {
    let path = cli_path.or_else(|| std::env::var_os("SWFDBG_CONFIG").map(PathBuf::from));
    let Some(path) = path else {
        return SessionConfig::default();
    };

    match SessionConfig::load_from_path(&path) {
        Ok(config) => config,
        Err(err) => {
            eprintln!(
                "swfdbg: failed to load config from {}: {err}; continuing with defaults",
                path.display()
            );
            SessionConfig::default()
        }
    }
}

fn init_logging(config: &SessionConfig) {
    let filter = config.logging.env_filter();
    let layer = if config.logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .boxed()
    };
    // Another subscriber may already be installed when embedded.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init();
}

async fn attach(cli: &Cli, config: SessionConfig) -> Result<Session> {
    let connect_config = config.connect.to_connect_config();
    let connection = match &cli.connect {
        Some(target) => {
            let addr = resolve(target).await?;
            eprintln!("connecting to player at {addr}");
            connect::connect(addr, &connect_config)
                .await
                .with_context(|| format!("failed to connect to {addr}"))?
        }
        None => {
            let listener = connect::listen(cli.listen)
                .await
                .with_context(|| format!("failed to listen on port {}", cli.listen))?;
            eprintln!("waiting for player on port {}", cli.listen);
            connect::accept(&listener, &connect_config)
                .await
                .context("no player connected")?
        }
    };

    let transport = connection.into_transport(config.transport.to_transport_config());
    let session = Session::new(transport, config);
    session.bind().await.context("player rejected the session")?;
    eprintln!(
        "attached to player version {} ({}-byte pointers)",
        session.player_version(),
        session.pointer_width().size()
    );
    Ok(session)
}

async fn resolve(target: &str) -> Result<SocketAddr> {
    let target = if target.contains(':') {
        target.to_string()
    } else {
        format!("{target}:{}", connect::DEFAULT_CONNECT_PORT)
    };
    let addr = tokio::net::lookup_host(&target)
        .await
        .with_context(|| format!("cannot resolve {target}"))?
        .next()
        .ok_or_else(|| anyhow!("{target} resolved to no address"));
    addr
}

async fn event_loop(session: &Session, resume_on_break: bool) -> Result<()> {
    loop {
        match session.wait_for_event().await {
            Ok(()) => {}
            Err(SessionError::NotConnected) => {
                match session.disconnect_cause() {
                    Some(cause) => eprintln!("player disconnected: {cause}"),
                    None => eprintln!("player disconnected"),
                }
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        }

        while let Some(event) = session.next_event() {
            println!("{}", describe(&event));
            if matches!(event, DebugEvent::Break { .. }) {
                let isolate = session.isolate(event.isolate());
                for frame in isolate.frames() {
                    println!("    #{} {} ({})", frame.depth, frame.signature, frame.location.line);
                }
                if resume_on_break {
                    if let Err(err) = isolate.resume().await {
                        tracing::warn!(target: "swfdbg.session", error = %err, "resume failed");
                    }
                }
            }
        }
    }
}

fn describe(event: &DebugEvent) -> String {
    let who = match event.isolate() {
        0 => String::new(),
        id => format!("[worker {id}] "),
    };
    let what = match event {
        DebugEvent::Break { module, line, .. } => format!("break at module {module} line {line}"),
        DebugEvent::Trace { text, .. } => format!("trace: {text}"),
        DebugEvent::Fault(fault) => match &fault.thrown {
            Some(thrown) => format!("{}: {} ({})", fault.name(), fault.message, thrown.type_name()),
            None => format!("{}: {}", fault.name(), fault.message),
        },
        DebugEvent::FileListModified { .. } => "source list changed".to_string(),
        DebugEvent::SwfLoaded { index, url, .. } => format!("loaded #{index} {url}"),
        DebugEvent::SwfUnloaded { index, path, .. } => format!("unloaded #{index} {path}"),
        DebugEvent::IsolateCreated { isolate } => format!("worker {isolate} started"),
        DebugEvent::IsolateExited { isolate } => format!("worker {isolate} exited"),
        DebugEvent::ExceptionBreakpointChanged {
            class, added, result, ..
        } => {
            let verb = if *added { "set" } else { "cleared" };
            format!("exception breakpoint {verb} for {class} (result {result})")
        }
    };
    format!("{who}{what}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use swfdbg::FaultEvent;
    use swfdbg_wire::inbound::FaultKind;

    #[test]
    fn listens_on_the_default_port() {
        let cli = Cli::try_parse_from(["swfdbg"]).unwrap();
        assert_eq!(cli.listen, connect::DEFAULT_LISTEN_PORT);
        assert!(cli.connect.is_none());
        assert!(!cli.resume_on_break);
    }

    #[test]
    fn listen_and_connect_are_exclusive() {
        let err = Cli::try_parse_from(["swfdbg", "--listen", "9000", "--connect", "host:1"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn events_name_their_worker() {
        let trace = DebugEvent::Trace {
            isolate: 0,
            text: "hello".into(),
        };
        assert_eq!(describe(&trace), "trace: hello");

        let fault = DebugEvent::Fault(FaultEvent::new(3, FaultKind::ZeroDivide, "boom"));
        assert!(describe(&fault).starts_with("[worker 3] "), "{}", describe(&fault));
    }

    #[tokio::test]
    async fn bare_host_gets_the_player_port() {
        let addr = resolve("127.0.0.1").await.unwrap();
        assert_eq!(addr.port(), connect::DEFAULT_CONNECT_PORT);
    }
}
