//! Link traffic statistics
//!
//! Lock-free counters shared between the session task and `Toy` handles.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Traffic and error counters
#[derive(Debug, Default)]
pub struct LinkStats {
    /// Command frames written
    frames_tx: AtomicU64,
    /// Bytes written to the commands characteristic
    bytes_tx: AtomicU64,
    /// Notifications received on the response characteristic
    frames_rx: AtomicU64,
    bytes_rx: AtomicU64,
    /// Inbound frames that failed to decode
    malformed: AtomicU64,
    /// Sync responses with no pending entry
    unmatched: AtomicU64,
    /// Commands that expired without an answer
    timeouts: AtomicU64,
}

/// Point-in-time copy of `LinkStats`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StatsSnapshot {
    pub frames_tx: u64,
    pub bytes_tx: u64,
    pub frames_rx: u64,
    pub bytes_rx: u64,
    pub malformed: u64,
    pub unmatched: u64,
    pub timeouts: u64,
}

impl LinkStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn add_tx(&self, bytes: usize) {
        self.frames_tx.fetch_add(1, Ordering::Relaxed);
        self.bytes_tx.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_rx(&self, bytes: usize) {
        self.frames_rx.fetch_add(1, Ordering::Relaxed);
        self.bytes_rx.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_unmatched(&self) {
        self.unmatched.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_tx: self.frames_tx.load(Ordering::Relaxed),
            bytes_tx: self.bytes_tx.load(Ordering::Relaxed),
            frames_rx: self.frames_rx.load(Ordering::Relaxed),
            bytes_rx: self.bytes_rx.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            unmatched: self.unmatched.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }
}
