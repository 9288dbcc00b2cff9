//! Lock-guarded bookkeeping for one transfer session.
//!
//! Every descriptor sits in exactly one of pending, in-flight, completed
//! or failed-terminal. All transitions go through the methods here, and
//! the caller holds the session mutex for each of them.

use std::collections::VecDeque;

use chunkline_protocol::TransferStatus;
use serde::Serialize;
use tokio::time::Instant;

use crate::planner::ChunkDescriptor;

/// Per-chunk position in the session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkState {
    Pending,
    InFlight,
    Completed,
    Failed,
}

/// A chunk that exhausted its retries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedChunk {
    pub descriptor: ChunkDescriptor,
    /// Last error observed for the chunk.
    pub error: String,
}

/// What a worker should do next.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Next {
    /// The chunk is now in flight and owned by the caller.
    Assigned(ChunkDescriptor),
    /// Nothing assignable yet; wait for a state change or the deadline.
    Wait(Option<Instant>),
    /// No pending or in-flight work remains.
    Drained,
}

/// Counters for a progress snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Counts {
    pub pending: u32,
    pub in_flight: u32,
    pub completed: u32,
    pub failed: u32,
    pub transferred_bytes: u64,
}

pub(crate) struct SessionState {
    descriptors: Vec<ChunkDescriptor>,
    states: Vec<ChunkState>,
    /// Pending and eligible now, in assignment order.
    ready: VecDeque<u32>,
    /// Pending but backing off until the given instant.
    delayed: Vec<(Instant, u32)>,
    in_flight: usize,
    completed: usize,
    failed: Vec<FailedChunk>,
    max_in_flight: usize,
    transferred_bytes: u64,
    pub status: TransferStatus,
}

impl SessionState {
    pub fn new(descriptors: Vec<ChunkDescriptor>, max_in_flight: usize) -> Self {
        let states = vec![ChunkState::Pending; descriptors.len()];
        let ready = descriptors.iter().map(|d| d.index).collect();
        Self {
            descriptors,
            states,
            ready,
            delayed: Vec::new(),
            in_flight: 0,
            completed: 0,
            failed: Vec::new(),
            max_in_flight,
            transferred_bytes: 0,
            status: TransferStatus::Pending,
        }
    }

    /// Moves the next eligible pending chunk to in-flight.
    pub fn take_next(&mut self, now: Instant) -> Next {
        self.promote_due(now);

        if self.in_flight >= self.max_in_flight {
            return Next::Wait(None);
        }
        if let Some(index) = self.ready.pop_front() {
            let i = index as usize;
            debug_assert_eq!(self.states[i], ChunkState::Pending);
            self.states[i] = ChunkState::InFlight;
            self.in_flight += 1;
            return Next::Assigned(self.descriptors[i]);
        }
        if let Some(earliest) = self.delayed.iter().map(|(at, _)| *at).min() {
            return Next::Wait(Some(earliest));
        }
        if self.in_flight > 0 {
            // A running attempt may still fail and come back.
            return Next::Wait(None);
        }
        Next::Drained
    }

    fn promote_due(&mut self, now: Instant) {
        if self.delayed.is_empty() {
            return;
        }
        let mut due: Vec<(Instant, u32)> = Vec::new();
        self.delayed.retain(|&(at, index)| {
            if at <= now {
                due.push((at, index));
                false
            } else {
                true
            }
        });
        due.sort_unstable();
        self.ready.extend(due.into_iter().map(|(_, index)| index));
    }

    /// In-flight → completed. Counts the successful attempt.
    pub fn complete(&mut self, index: u32) -> ChunkDescriptor {
        let i = self.leave_in_flight(index);
        self.states[i] = ChunkState::Completed;
        self.completed += 1;
        let chunk = &mut self.descriptors[i];
        chunk.attempt_count += 1;
        self.transferred_bytes += chunk.length;
        *chunk
    }

    /// Counts a failed attempt and returns the new attempt count.
    ///
    /// The chunk stays in flight until [`requeue`](Self::requeue) or
    /// [`abandon`](Self::abandon) decides where it goes.
    pub fn record_failure(&mut self, index: u32) -> u32 {
        let i = index as usize;
        debug_assert_eq!(self.states[i], ChunkState::InFlight);
        self.descriptors[i].attempt_count += 1;
        self.descriptors[i].attempt_count
    }

    /// In-flight → pending, eligible immediately or from `ready_at`.
    pub fn requeue(&mut self, index: u32, ready_at: Option<Instant>) {
        let i = self.leave_in_flight(index);
        self.states[i] = ChunkState::Pending;
        match ready_at {
            Some(at) => self.delayed.push((at, index)),
            None => self.ready.push_back(index),
        }
    }

    /// In-flight → failed-terminal.
    pub fn abandon(&mut self, index: u32, error: String) -> ChunkDescriptor {
        let i = self.leave_in_flight(index);
        self.states[i] = ChunkState::Failed;
        let descriptor = self.descriptors[i];
        self.failed.push(FailedChunk { descriptor, error });
        descriptor
    }

    /// Pending → failed-terminal for every chunk still queued. Returns how
    /// many chunks were settled this way.
    pub fn fail_pending(&mut self, error: &str) -> usize {
        let mut pending: Vec<u32> = self.ready.drain(..).collect();
        pending.extend(self.delayed.drain(..).map(|(_, index)| index));
        for &index in &pending {
            let i = index as usize;
            self.states[i] = ChunkState::Failed;
            self.failed.push(FailedChunk {
                descriptor: self.descriptors[i],
                error: error.to_string(),
            });
        }
        pending.len()
    }

    fn leave_in_flight(&mut self, index: u32) -> usize {
        let i = index as usize;
        assert_eq!(
            self.states[i],
            ChunkState::InFlight,
            "chunk {index} is not in flight"
        );
        self.in_flight -= 1;
        i
    }

    pub fn is_in_flight(&self, index: u32) -> bool {
        self.states
            .get(index as usize)
            .is_some_and(|s| *s == ChunkState::InFlight)
    }

    /// `true` when nothing is pending or in flight.
    pub fn is_drained(&self) -> bool {
        self.ready.is_empty() && self.delayed.is_empty() && self.in_flight == 0
    }

    pub fn counts(&self) -> Counts {
        Counts {
            pending: (self.ready.len() + self.delayed.len()) as u32,
            in_flight: self.in_flight as u32,
            completed: self.completed as u32,
            failed: self.failed.len() as u32,
            transferred_bytes: self.transferred_bytes,
        }
    }

    pub fn total_chunks(&self) -> u32 {
        self.descriptors.len() as u32
    }

    pub fn descriptors(&self) -> &[ChunkDescriptor] {
        &self.descriptors
    }

    pub fn chunk_states(&self) -> &[ChunkState] {
        &self.states
    }

    /// Failed-terminal chunks ordered by index.
    pub fn failed(&self) -> Vec<FailedChunk> {
        let mut failed = self.failed.clone();
        failed.sort_by_key(|f| f.descriptor.index);
        failed
    }
}
