//! Byte and frame counters shared between the workers and the caller.

use std::sync::atomic::{AtomicU64, Ordering};

/// Traffic counters for one connection.
///
/// The writer and reader tasks update these; anyone holding the `Arc`
/// (the metrics reporter, the caller) reads them. Relaxed ordering is
/// enough because each counter is independent and only ever grows.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    frames_sent: AtomicU64,
    frames_received: AtomicU64,
}

impl ConnectionStats {
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    pub fn frames_received(&self) -> u64 {
        self.frames_received.load(Ordering::Relaxed)
    }

    pub(crate) fn record_sent(&self, bytes: usize) {
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_received(&self, bytes: usize) {
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_sent_accumulates_bytes_and_frames() {
        let stats = ConnectionStats::default();
        stats.record_sent(10);
        stats.record_sent(5);
        assert_eq!(stats.bytes_sent(), 15);
        assert_eq!(stats.frames_sent(), 2);
        assert_eq!(stats.bytes_received(), 0);
    }

    #[test]
    fn test_record_received_accumulates_bytes_and_frames() {
        let stats = ConnectionStats::default();
        stats.record_received(8);
        assert_eq!(stats.bytes_received(), 8);
        assert_eq!(stats.frames_received(), 1);
    }
}
