//! Debugger-side session for the player debug protocol.
//!
//! [`Session`] wraps a bound [`swfdbg_wire::Transport`]: inbound messages are
//! folded into a per-isolate model of the halted program (frames, values,
//! breakpoints, loaded units and scripts), and the request methods send a
//! command and wait, with a bounded timeout, for the player's reply to land
//! in that model.
//!
//! ```no_run
//! # async fn demo() -> swfdbg::Result<()> {
//! use swfdbg::{Session, SessionConfig};
//! use swfdbg_wire::connect;
//!
//! let config = SessionConfig::default();
//! let listener = connect::listen(connect::DEFAULT_LISTEN_PORT).await?;
//! let connection = connect::accept(&listener, &config.connect.to_connect_config()).await?;
//! let session = Session::new(
//!     connection.into_transport(config.transport.to_transport_config()),
//!     config,
//! );
//! session.bind().await?;
//! while session.wait_for_event().await.is_ok() {
//!     while let Some(event) = session.next_event() {
//!         println!("{event:?}");
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod events;
mod isolate;
pub mod model;
mod populate;
mod session;
mod state;
pub mod value;

pub use config::{ConfigError, LoggingConfig, SessionConfig};
pub use error::{Evaluation, Result, SessionError};
pub use events::{DebugEvent, FaultEvent};
pub use isolate::IsolateSession;
pub use model::{
    FunctionInfo, Location, ProgramUnit, SourceModule, StackFrame, SuspendInfo, SuspendReason,
    Watch, WatchKind,
};
pub use session::{
    Session, CAN_BREAK_ON_ALL_EXCEPTIONS, CAN_CALL_FUNCTIONS, CAN_SET_WATCHPOINTS, CAN_TERMINATE,
    CONCURRENT_PLAYER,
};
pub use value::{Payload, Value, ValueId, Variable, VariableType, VariableValue};
