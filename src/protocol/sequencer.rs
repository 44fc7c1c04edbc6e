//! Sequence id allocation and response correlation
//!
//! Ids wrap modulo 256. An id is never handed out while a previous command
//! with the same id is still waiting; when every id is taken, `allocate`
//! returns `None` and the caller must wait for one to be released.

use crate::codec::{FrameKind, ResponseFrame};
use crate::constants::SEQUENCE_SPACE;
use bytes::Bytes;
use tokio::time::Instant;

/// A command waiting for its sync response
struct Pending<W> {
    waiter: W,
    name: &'static str,
    deadline: Option<Instant>,
}

/// Outcome of routing an inbound frame
pub enum Routed<W> {
    /// Sync response for a pending command; entry removed
    Matched {
        sequence: u8,
        name: &'static str,
        code: u8,
        payload: Bytes,
        waiter: W,
    },
    /// Sync response nobody is waiting for
    Unmatched { sequence: u8 },
    /// Async event or device info, bypasses the pending table
    Unsolicited(ResponseFrame),
}

/// Pending request table keyed by sequence id
pub struct CommandSequencer<W> {
    slots: Vec<Option<Pending<W>>>,
    next: u8,
    pending: usize,
}

impl<W> CommandSequencer<W> {
    pub fn new() -> Self {
        Self {
            slots: (0..SEQUENCE_SPACE).map(|_| None).collect(),
            next: 0,
            pending: 0,
        }
    }

    /// Number of ids currently awaiting a response
    pub fn pending(&self) -> usize {
        self.pending
    }

    pub fn is_pending(&self, sequence: u8) -> bool {
        self.slots[sequence as usize].is_some()
    }

    /// Next free id, continuing monotonically from the last one handed out
    ///
    /// Does not reserve the id; call `register` with it before allocating again.
    pub fn allocate(&mut self) -> Option<u8> {
        if self.pending >= SEQUENCE_SPACE {
            return None;
        }
        let mut candidate = self.next;
        loop {
            if self.slots[candidate as usize].is_none() {
                self.next = candidate.wrapping_add(1);
                return Some(candidate);
            }
            candidate = candidate.wrapping_add(1);
        }
    }

    /// Record `waiter` as awaiting the response to `sequence`
    ///
    /// Returns the waiter back if the id is already taken.
    pub fn register(
        &mut self,
        sequence: u8,
        name: &'static str,
        waiter: W,
        deadline: Option<Instant>,
    ) -> std::result::Result<(), W> {
        let slot = &mut self.slots[sequence as usize];
        if slot.is_some() {
            return Err(waiter);
        }
        *slot = Some(Pending {
            waiter,
            name,
            deadline,
        });
        self.pending += 1;
        Ok(())
    }

    /// Remove and return the waiter for `sequence`
    pub fn resolve(&mut self, sequence: u8) -> Option<W> {
        let entry = self.slots[sequence as usize].take()?;
        self.pending -= 1;
        Some(entry.waiter)
    }

    /// Classify an inbound frame, removing the matched entry if any
    pub fn route(&mut self, frame: ResponseFrame) -> Routed<W> {
        match frame.kind {
            FrameKind::SyncAck { sequence, code } => match self.slots[sequence as usize].take() {
                Some(entry) => {
                    self.pending -= 1;
                    Routed::Matched {
                        sequence,
                        name: entry.name,
                        code,
                        payload: frame.payload,
                        waiter: entry.waiter,
                    }
                }
                None => Routed::Unmatched { sequence },
            },
            FrameKind::AsyncEvent(_) | FrameKind::DeviceInfo(_) => Routed::Unsolicited(frame),
        }
    }

    /// Remove entries whose deadline is at or before `now`
    pub fn expire(&mut self, now: Instant) -> Vec<(u8, W)> {
        let mut expired = Vec::new();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            let due = matches!(slot, Some(Pending { deadline: Some(d), .. }) if *d <= now);
            if due {
                if let Some(entry) = slot.take() {
                    expired.push((index as u8, entry.waiter));
                }
            }
        }
        self.pending -= expired.len();
        expired
    }

    /// Remove every entry, in id order
    pub fn drain(&mut self) -> Vec<W> {
        self.pending = 0;
        self.slots.iter_mut().filter_map(|s| s.take()).map(|p| p.waiter).collect()
    }
}

impl<W> Default for CommandSequencer<W> {
    fn default() -> Self {
        Self::new()
    }
}
