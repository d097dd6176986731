use super::{
    codec::{PointerWidth, WireReader},
    kinds::{InboundKind, OutboundKind},
};

/// Worker id; `0` is the primordial isolate.
pub type IsolateId = u32;

pub const PRIMORDIAL_ISOLATE: IsolateId = 0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Inbound(InboundKind),
    Outbound(OutboundKind),
}

impl MessageKind {
    pub fn command(self) -> u32 {
        match self {
            Self::Inbound(kind) => kind.as_u32(),
            Self::Outbound(kind) => kind.as_u32(),
        }
    }
}

/// One frame's worth of payload, tagged with its command kind, the isolate
/// it belongs to and the pointer width in force when it was framed.
///
/// Payload buffers come from a [`MessagePool`](crate::MessagePool) and go
/// back to it once every listener has seen the message.
#[derive(Clone, Debug)]
pub struct Message {
    kind: MessageKind,
    isolate: IsolateId,
    width: PointerWidth,
    payload: Vec<u8>,
}

impl Message {
    pub fn inbound(
        kind: InboundKind,
        isolate: IsolateId,
        width: PointerWidth,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            kind: MessageKind::Inbound(kind),
            isolate,
            width,
            payload,
        }
    }

    pub fn outbound(
        kind: OutboundKind,
        isolate: IsolateId,
        width: PointerWidth,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            kind: MessageKind::Outbound(kind),
            isolate,
            width,
            payload,
        }
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn inbound_kind(&self) -> Option<InboundKind> {
        match self.kind {
            MessageKind::Inbound(kind) => Some(kind),
            MessageKind::Outbound(_) => None,
        }
    }

    pub fn outbound_kind(&self) -> Option<OutboundKind> {
        match self.kind {
            MessageKind::Outbound(kind) => Some(kind),
            MessageKind::Inbound(_) => None,
        }
    }

    pub fn isolate(&self) -> IsolateId {
        self.isolate
    }

    pub fn pointer_width(&self) -> PointerWidth {
        self.width
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// A fresh cursor at the start of the payload. Each listener gets its
    /// own, so one listener's reads never disturb the next.
    pub fn reader(&self) -> WireReader<'_> {
        WireReader::new(&self.payload, self.width)
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }
}
