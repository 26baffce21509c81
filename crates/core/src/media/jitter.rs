//! Sequence-number reorder buffer with a bounded window.
//!
//! Packets are keyed by their 16-bit RTP sequence number and released in
//! ascending order starting from `expected_seq`. When the buffer fills the
//! window (sustained loss), `expected_seq` is forcibly reset to the
//! smallest buffered sequence and everything contiguous from there drains —
//! capping latency at the cost of skipping the gap.

use std::collections::BTreeMap;

use bytes::Bytes;

use super::rtp::peek_sequence;

/// Default reorder window, in packets.
pub const DEFAULT_JITTER_WINDOW: usize = 32;

#[derive(Debug)]
pub struct JitterBuffer {
    window: usize,
    buffer: BTreeMap<u16, Bytes>,
    expected_seq: Option<u16>,
    packets_received: u64,
    packets_reordered: u64,
}

impl JitterBuffer {
    pub fn new(window: usize) -> Self {
        JitterBuffer {
            window: window.max(1),
            buffer: BTreeMap::new(),
            expected_seq: None,
            packets_received: 0,
            packets_reordered: 0,
        }
    }

    pub fn packets_received(&self) -> u64 {
        self.packets_received
    }

    /// Arrivals whose sequence differed from the next expected one.
    pub fn packets_reordered(&self) -> u64 {
        self.packets_reordered
    }

    /// Store one packet and drain every contiguous run now available,
    /// appending released packets to `out` in ascending sequence order.
    pub fn ingest(&mut self, packet: Bytes, out: &mut Vec<Bytes>) {
        let seq = match peek_sequence(&packet) {
            Some(s) => s,
            None => return,
        };
        self.packets_received += 1;

        let expected = *self.expected_seq.get_or_insert(seq);
        if seq != expected {
            self.packets_reordered += 1;
        }

        self.buffer.insert(seq, packet);
        self.drain_contiguous(out);

        if self.buffer.len() >= self.window {
            // Forced drain: jump to the oldest buffered sequence.
            let oldest = match self.buffer.keys().next() {
                Some(&seq) => seq,
                None => return,
            };
            tracing::debug!(
                stalled_at = self.expected_seq.unwrap_or_default(),
                resume_at = oldest,
                buffered = self.buffer.len(),
                "jitter window overflow, forcing drain"
            );
            self.expected_seq = Some(oldest);
            self.drain_contiguous(out);
        }
    }

    fn drain_contiguous(&mut self, out: &mut Vec<Bytes>) {
        let mut expected = match self.expected_seq {
            Some(e) => e,
            None => return,
        };
        while let Some(packet) = self.buffer.remove(&expected) {
            out.push(packet);
            expected = expected.wrapping_add(1);
        }
        self.expected_seq = Some(expected);
    }
}
