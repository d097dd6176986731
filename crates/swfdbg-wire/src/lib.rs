//! Wire-level implementation of the player debug protocol.
//!
//! Frames are `u32 length | u32 command | payload`, little-endian, over a
//! single TCP stream. This crate owns everything below the session model:
//! the field codec, the command-id tables, typed decoding of inbound frames,
//! outbound command encoding, and the [`Transport`] that runs the receive
//! loop and the idle heartbeat.

mod codec;
pub mod connect;
mod counter;
mod error;
pub mod inbound;
pub mod kinds;
mod message;
pub mod outbound;
mod poison;
mod pool;
mod transport;

pub use codec::{
    class_name_for, PointerWidth, WireReader, WireWriter, FRAME_HEADER_LEN,
};
pub use counter::MessageCounter;
pub use error::{Result, WireError};
pub use kinds::{AtomTag, InboundKind, OutboundKind};
pub use message::{IsolateId, Message, MessageKind, PRIMORDIAL_ISOLATE};
pub use pool::MessagePool;
pub use transport::{
    ListenerIndex, MessageListener, SocketControl, Transport, TransportConfig, TransportState,
    WeakTransport,
};

// The scripted player is only needed by tests and downstream integration
// suites; keep it out of normal builds.
#[cfg(any(test, feature = "test-support"))]
pub mod mock;
