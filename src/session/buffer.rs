//! Pre-connection audio buffering.

use std::collections::VecDeque;
use tracing::debug;

/// Default capacity: one second of 16 kHz mono s16le audio.
pub const DEFAULT_CAPACITY_BYTES: usize = 32_000;

/// Bounded FIFO of variable-length audio chunks awaiting the vendor stream.
///
/// Chunks are atomic units: eviction removes whole chunks, oldest first, and
/// never splits or pads audio. Thread safety comes from the session lock, not
/// from the buffer itself.
pub struct PreConnectBuffer {
    chunks: VecDeque<Vec<u8>>,
    buffered_bytes: usize,
    capacity_bytes: usize,
}

impl PreConnectBuffer {
    pub fn new(capacity_bytes: usize) -> Self {
        Self {
            chunks: VecDeque::new(),
            buffered_bytes: 0,
            capacity_bytes,
        }
    }

    /// Append a chunk, evicting the oldest chunks until it fits. A chunk
    /// larger than the whole capacity is still accepted once the buffer is
    /// empty; dropping fresh audio here is never allowed.
    pub fn push(&mut self, chunk: Vec<u8>) {
        if chunk.is_empty() {
            return;
        }
        while !self.chunks.is_empty() && self.buffered_bytes + chunk.len() > self.capacity_bytes {
            if let Some(dropped) = self.chunks.pop_front() {
                self.buffered_bytes -= dropped.len();
                debug!(
                    dropped_bytes = dropped.len(),
                    buffered_bytes = self.buffered_bytes,
                    "pre-connect buffer full, dropping oldest chunk"
                );
            }
        }
        self.buffered_bytes += chunk.len();
        self.chunks.push_back(chunk);
    }

    /// Remove and return every buffered chunk in arrival order. Called once,
    /// when the vendor stream signals readiness.
    pub fn drain_all(&mut self) -> Vec<Vec<u8>> {
        self.buffered_bytes = 0;
        self.chunks.drain(..).collect()
    }

    pub fn buffered_bytes(&self) -> usize {
        self.buffered_bytes
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}
