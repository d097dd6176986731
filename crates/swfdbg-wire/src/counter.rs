use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::watch;

use super::{
    kinds::{InboundKind, OutboundKind},
    message::{IsolateId, Message, MessageKind},
    poison::RecoverLock,
    transport::MessageListener,
};

#[derive(Debug, Default)]
struct Counts {
    inbound: HashMap<(IsolateId, InboundKind), u64>,
    outbound: HashMap<(IsolateId, OutboundKind), u64>,
}

/// Counts messages per `(isolate, kind)` in each direction.
///
/// Registered as the last listener, so by the time a waiter sees a count
/// move every other listener has already processed the message. Waiters
/// subscribe to [`MessageCounter::subscribe`], whose value ticks on every
/// inbound message and on disconnect.
#[derive(Debug)]
pub struct MessageCounter {
    counts: Mutex<Counts>,
    generation: watch::Sender<u64>,
}

impl Default for MessageCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageCounter {
    pub fn new() -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            counts: Mutex::new(Counts::default()),
            generation,
        }
    }

    pub fn in_count(&self, isolate: IsolateId, kind: InboundKind) -> u64 {
        self.counts.lock_or_recover("MessageCounter.in_count")
            .inbound
            .get(&(isolate, kind))
            .copied()
            .unwrap_or(0)
    }

    pub fn out_count(&self, isolate: IsolateId, kind: OutboundKind) -> u64 {
        self.counts.lock_or_recover("MessageCounter.out_count")
            .outbound
            .get(&(isolate, kind))
            .copied()
            .unwrap_or(0)
    }

    /// Inbound count of `kind` summed over every isolate.
    pub fn in_total(&self, kind: InboundKind) -> u64 {
        self.counts.lock_or_recover("MessageCounter.in_total")
            .inbound
            .iter()
            .filter(|((_, k), _)| *k == kind)
            .map(|(_, n)| *n)
            .sum()
    }

    pub fn clear(&self) {
        let mut counts = self.counts.lock_or_recover("MessageCounter.clear");
        counts.inbound.clear();
        counts.outbound.clear();
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.generation.subscribe()
    }

    fn tick(&self) {
        self.generation.send_modify(|g| *g = g.wrapping_add(1));
    }
}

impl MessageListener for MessageCounter {
    fn bound(&self) {
        self.clear();
    }

    fn message_arrived(&self, msg: &Message) {
        if let MessageKind::Inbound(kind) = msg.kind() {
            *self.counts.lock_or_recover("MessageCounter.message_arrived")
                .inbound
                .entry((msg.isolate(), kind))
                .or_default() += 1;
        }
        self.tick();
    }

    fn message_sent(&self, msg: &Message) {
        if let MessageKind::Outbound(kind) = msg.kind() {
            *self.counts.lock_or_recover("MessageCounter.message_sent")
                .outbound
                .entry((msg.isolate(), kind))
                .or_default() += 1;
        }
    }

    fn disconnected(&self) {
        self.tick();
    }
}
