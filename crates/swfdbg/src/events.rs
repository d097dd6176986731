//! Debug events raised by the player and the queue callers drain them from.

use std::collections::VecDeque;

use parking_lot::Mutex;
use swfdbg_wire::inbound::FaultKind;
use swfdbg_wire::IsolateId;
use tokio::sync::Notify;

use crate::value::Value;

/// A fault the player reported, either asynchronously or while running
/// code on the debugger's behalf.
#[derive(Clone, Debug, PartialEq)]
pub struct FaultEvent {
    pub isolate: IsolateId,
    pub kind: FaultKind,
    pub message: String,
    pub offset: Option<u32>,
    /// The thrown object, for exceptions that carried one.
    pub thrown: Option<Value>,
    pub will_be_caught: bool,
}

impl FaultEvent {
    pub fn new(isolate: IsolateId, kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            isolate,
            kind,
            message: message.into(),
            offset: None,
            thrown: None,
            will_be_caught: false,
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum DebugEvent {
    Break {
        isolate: IsolateId,
        module: u32,
        line: u32,
    },
    Trace {
        isolate: IsolateId,
        text: String,
    },
    Fault(FaultEvent),
    FileListModified {
        isolate: IsolateId,
    },
    SwfLoaded {
        isolate: IsolateId,
        index: u32,
        id: i64,
        path: String,
        url: String,
        host: String,
        port: u32,
        swf_size: u32,
    },
    SwfUnloaded {
        isolate: IsolateId,
        index: u32,
        id: i64,
        path: String,
    },
    IsolateCreated {
        isolate: IsolateId,
    },
    IsolateExited {
        isolate: IsolateId,
    },
    ExceptionBreakpointChanged {
        isolate: IsolateId,
        class: String,
        added: bool,
        result: u32,
    },
}

impl DebugEvent {
    pub fn isolate(&self) -> IsolateId {
        match self {
            Self::Break { isolate, .. }
            | Self::Trace { isolate, .. }
            | Self::FileListModified { isolate }
            | Self::SwfLoaded { isolate, .. }
            | Self::SwfUnloaded { isolate, .. }
            | Self::IsolateCreated { isolate }
            | Self::IsolateExited { isolate }
            | Self::ExceptionBreakpointChanged { isolate, .. } => *isolate,
            Self::Fault(fault) => fault.isolate,
        }
    }
}

/// FIFO of pending events. Pushing wakes every task parked in
/// [`EventQueue::notified`].
#[derive(Debug, Default)]
pub struct EventQueue {
    events: Mutex<VecDeque<DebugEvent>>,
    notify: Notify,
}

impl EventQueue {
    pub fn push(&self, event: DebugEvent) {
        tracing::trace!(target: "swfdbg.session", ?event, "event queued");
        self.events.lock().push_back(event);
        self.notify.notify_waiters();
    }

    pub fn extend(&self, events: impl IntoIterator<Item = DebugEvent>) {
        let mut queue = self.events.lock();
        let before = queue.len();
        queue.extend(events);
        let grew = queue.len() > before;
        drop(queue);
        if grew {
            self.notify.notify_waiters();
        }
    }

    pub fn pop(&self) -> Option<DebugEvent> {
        self.events.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Wakes waiters without queueing anything, used on disconnect.
    pub fn wake(&self) {
        self.notify.notify_waiters();
    }

    pub fn notified(&self) -> tokio::sync::futures::Notified<'_> {
        self.notify.notified()
    }
}
