use std::sync::Mutex;

use super::poison::RecoverLock;

const DEFAULT_MAX_POOLED: usize = 32;
// Buffers that grew past this (swf/swd blobs) are dropped instead of pooled.
const MAX_POOLED_CAPACITY: usize = 64 * 1024;

/// Recycles payload buffers between frames.
#[derive(Debug)]
pub struct MessagePool {
    free: Mutex<Vec<Vec<u8>>>,
    max_pooled: usize,
}

impl Default for MessagePool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_POOLED)
    }
}

impl MessagePool {
    pub fn new(max_pooled: usize) -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            max_pooled,
        }
    }

    /// An empty buffer with at least `capacity` bytes reserved.
    pub fn take(&self, capacity: usize) -> Vec<u8> {
        let mut buf = self.free.lock_or_recover("MessagePool.take")
            .pop()
            .unwrap_or_default();
        buf.clear();
        buf.reserve(capacity);
        buf
    }

    pub fn give(&self, mut buf: Vec<u8>) {
        if buf.capacity() > MAX_POOLED_CAPACITY {
            return;
        }
        buf.clear();
        let mut free = self.free.lock_or_recover("MessagePool.give");
        if free.len() < self.max_pooled {
            free.push(buf);
        }
    }

    pub fn pooled(&self) -> usize {
        self.free.lock_or_recover("MessagePool.pooled").len()
    }
}
