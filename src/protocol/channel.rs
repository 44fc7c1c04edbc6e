//! Single-flight outbound command queue
//!
//! At most one command frame is being written to the transport at any
//! instant. The next frame leaves the queue only after the transport reports
//! the previous write as completed or failed. Responses may come back in any
//! order; correlation is the sequencer's job.

use super::sequencer::{CommandSequencer, Routed};
use crate::codec::{packet, Command, CommandFrame, ResponseFrame};
use bytes::Bytes;
use std::collections::VecDeque;
use tokio::time::Instant;

struct Queued<W> {
    command: Command,
    waiter: W,
    deadline: Option<Instant>,
}

/// A frame ready to be written to the commands characteristic
#[derive(Debug, Clone)]
pub struct Outbound {
    pub sequence: u8,
    pub command: Command,
    pub bytes: Bytes,
}

/// Result of a transport write acknowledgement
pub enum WriteOutcome<W> {
    /// Write succeeded; the command now waits for its response
    Sent { sequence: u8 },
    /// Write failed; the command's waiter is handed back to be failed
    Failed { sequence: u8, waiter: W },
    /// Write failed for a command whose entry is already gone
    /// (answered early, expired, or torn down)
    FailedOrphan { sequence: u8 },
    /// No write was outstanding
    Spurious,
}

/// Outbound FIFO plus the pending table
pub struct CommandChannel<W> {
    queue: VecDeque<Queued<W>>,
    sequencer: CommandSequencer<W>,
    in_flight: Option<u8>,
    closed: bool,
}

impl<W> CommandChannel<W> {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            sequencer: CommandSequencer::new(),
            in_flight: None,
            closed: false,
        }
    }

    /// Queue a command; hands the waiter back if the channel is torn down
    pub fn submit(
        &mut self,
        command: Command,
        waiter: W,
        deadline: Option<Instant>,
    ) -> std::result::Result<(), W> {
        if self.closed {
            return Err(waiter);
        }
        self.queue.push_back(Queued {
            command,
            waiter,
            deadline,
        });
        Ok(())
    }

    /// Take the next frame to write, if the write slot is free
    ///
    /// Stalls (returns `None`) while a write is outstanding or every
    /// sequence id is awaiting a response.
    pub fn pump(&mut self) -> Option<Outbound> {
        if self.closed || self.in_flight.is_some() || self.queue.is_empty() {
            return None;
        }
        let sequence = self.sequencer.allocate()?;
        let queued = self.queue.pop_front()?;

        let frame = CommandFrame {
            sequence,
            opcode: queued.command.opcode(),
            payload: queued.command.payload(),
        };
        let bytes = packet::encode_command(&frame);

        if let Err(waiter) =
            self.sequencer
                .register(sequence, queued.command.name(), queued.waiter, queued.deadline)
        {
            // allocate() only returns free ids
            self.queue.push_front(Queued {
                command: queued.command,
                waiter,
                deadline: queued.deadline,
            });
            return None;
        }

        self.in_flight = Some(sequence);
        Some(Outbound {
            sequence,
            command: queued.command,
            bytes,
        })
    }

    /// Transport finished writing the in-flight frame
    pub fn on_write_complete(&mut self, result: std::result::Result<(), String>) -> WriteOutcome<W> {
        let Some(sequence) = self.in_flight.take() else {
            return WriteOutcome::Spurious;
        };
        match result {
            Ok(()) => WriteOutcome::Sent { sequence },
            Err(_) => match self.sequencer.resolve(sequence) {
                Some(waiter) => WriteOutcome::Failed { sequence, waiter },
                None => WriteOutcome::FailedOrphan { sequence },
            },
        }
    }

    /// Correlate an inbound frame
    pub fn on_response(&mut self, frame: ResponseFrame) -> Routed<W> {
        self.sequencer.route(frame)
    }

    /// Remove pending and queued entries past their deadline
    ///
    /// Pending entries come back with their id; queued ones were never sent.
    pub fn expire(&mut self, now: Instant) -> Vec<(Option<u8>, W)> {
        let mut expired: Vec<(Option<u8>, W)> = self
            .sequencer
            .expire(now)
            .into_iter()
            .map(|(seq, w)| (Some(seq), w))
            .collect();

        let mut kept = VecDeque::with_capacity(self.queue.len());
        for queued in self.queue.drain(..) {
            match queued.deadline {
                Some(deadline) if deadline <= now => expired.push((None, queued.waiter)),
                _ => kept.push_back(queued),
            }
        }
        self.queue = kept;
        expired
    }

    /// Close the channel and return every waiter, pending first then queued
    ///
    /// Later submits are refused and `pump` never yields again.
    pub fn teardown(&mut self) -> Vec<W> {
        self.closed = true;
        self.in_flight = None;
        let mut waiters = self.sequencer.drain();
        waiters.extend(self.queue.drain(..).map(|q| q.waiter));
        waiters
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn in_flight(&self) -> Option<u8> {
        self.in_flight
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn pending(&self) -> usize {
        self.sequencer.pending()
    }
}

impl<W> Default for CommandChannel<W> {
    fn default() -> Self {
        Self::new()
    }
}
