//! In-memory assembly bookkeeping
//!
//! One [`AssemblyState`] exists per file name currently being uploaded. Every
//! mutation of a state happens while holding its map entry, so arrivals for
//! the same file are serialized while different files proceed independently.
//! No entry is ever held across an await point.
//!
//! Lifecycle per upload: `Empty -> Receiving -> Complete -> Closed`. The
//! `Complete` transition is reported exactly once; the state is dropped by
//! [`AssemblyTracker::finish`] after the merge or by
//! [`AssemblyTracker::abandon`].

use crate::metrics;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Tracker errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrackerError {
    #[error("Chunk index {index} is outside the declared total {total}")]
    IndexOutOfRange { index: u32, total: u32 },
}

/// Result of recording one chunk arrival
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// More distinct chunks are still expected
    Incomplete { received: u32, total: u32 },
    /// This arrival completed the set; the caller must merge
    NowComplete { total: u32 },
    /// The set was already complete; no merge must be triggered
    AlreadyComplete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Receiving,
    Complete,
}

#[derive(Debug)]
struct AssemblyState {
    total: u32,
    received: BTreeSet<u32>,
    phase: Phase,
    started: Instant,
    last_arrival: Instant,
}

impl AssemblyState {
    fn new(total: u32) -> Self {
        let now = Instant::now();
        Self {
            total,
            received: BTreeSet::new(),
            phase: Phase::Receiving,
            started: now,
            last_arrival: now,
        }
    }

    fn arrive(&mut self, index: u32) -> Completion {
        if self.phase == Phase::Complete {
            return Completion::AlreadyComplete;
        }

        self.received.insert(index);
        self.last_arrival = Instant::now();

        let received = self.received.len() as u32;
        if received == self.total {
            self.phase = Phase::Complete;
            Completion::NowComplete { total: self.total }
        } else {
            Completion::Incomplete {
                received,
                total: self.total,
            }
        }
    }

    fn progress(&self, file_name: &str) -> AssemblyProgress {
        AssemblyProgress {
            file_name: file_name.to_string(),
            received: self.received.len() as u32,
            total: self.total,
            complete: self.phase == Phase::Complete,
            age: self.started.elapsed(),
            idle: self.last_arrival.elapsed(),
        }
    }
}

/// Snapshot of one tracked upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyProgress {
    pub file_name: String,
    pub received: u32,
    pub total: u32,
    pub complete: bool,
    pub age: Duration,
    pub idle: Duration,
}

/// Per-file assembly tracker shared by all request handlers
#[derive(Debug, Default)]
pub struct AssemblyTracker {
    states: DashMap<String, AssemblyState>,
}

impl AssemblyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that chunk `index` of `file_name` is durably stored
    ///
    /// The first arrival fixes the upload's total. A later arrival declaring
    /// a different total keeps the first one and is only logged. Completion
    /// counts distinct indices, so resends never advance it.
    pub fn record_arrival(
        &self,
        file_name: &str,
        index: u32,
        total: u32,
    ) -> Result<Completion, TrackerError> {
        match self.states.entry(file_name.to_string()) {
            Entry::Occupied(mut occupied) => {
                let state = occupied.get_mut();
                if state.total != total {
                    tracing::warn!(
                        file_name = file_name,
                        adopted_total = state.total,
                        declared_total = total,
                        "Conflicting chunk total, keeping the first one"
                    );
                    metrics::record_total_conflict();
                }
                if index >= state.total {
                    return Err(TrackerError::IndexOutOfRange {
                        index,
                        total: state.total,
                    });
                }
                Ok(state.arrive(index))
            }
            Entry::Vacant(vacant) => {
                if index >= total {
                    return Err(TrackerError::IndexOutOfRange { index, total });
                }
                let mut state = AssemblyState::new(total);
                let completion = state.arrive(index);
                vacant.insert(state);
                Ok(completion)
            }
        }
    }

    /// Total adopted for an upload in progress
    pub fn expected_total(&self, file_name: &str) -> Option<u32> {
        self.states.get(file_name).map(|state| state.total)
    }

    /// Close a completed upload after its merge
    ///
    /// Returns `false` if the upload was not tracked or not yet complete.
    pub fn finish(&self, file_name: &str) -> bool {
        self.states
            .remove_if(file_name, |_, state| state.phase == Phase::Complete)
            .is_some()
    }

    /// Drop an upload regardless of its phase
    pub fn abandon(&self, file_name: &str) -> Option<AssemblyProgress> {
        self.states
            .remove(file_name)
            .map(|(name, state)| state.progress(&name))
    }

    /// Drop an upload still receiving chunks whose last arrival is older than `max_idle`
    ///
    /// Uploads in the `Complete` phase are being merged and are never dropped
    /// here.
    pub fn abandon_if_idle(&self, file_name: &str, max_idle: Duration) -> Option<AssemblyProgress> {
        self.states
            .remove_if(file_name, |_, state| {
                state.phase == Phase::Receiving && state.last_arrival.elapsed() >= max_idle
            })
            .map(|(name, state)| state.progress(&name))
    }

    /// Whether an upload is currently tracked
    pub fn contains(&self, file_name: &str) -> bool {
        self.states.contains_key(file_name)
    }

    /// Snapshot of one upload
    pub fn progress(&self, file_name: &str) -> Option<AssemblyProgress> {
        self.states
            .get(file_name)
            .map(|state| state.progress(file_name))
    }

    /// Names of receiving uploads idle for at least `max_idle`
    pub fn stale(&self, max_idle: Duration) -> Vec<String> {
        self.states
            .iter()
            .filter(|entry| {
                entry.phase == Phase::Receiving && entry.last_arrival.elapsed() >= max_idle
            })
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Number of tracked uploads
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
