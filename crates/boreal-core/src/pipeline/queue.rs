//! Completion tokens for in-flight integrations.

use std::collections::{HashMap, HashSet};
use std::sync::{Condvar, Mutex};

use super::IntegrationSummary;

type Key = (usize, usize);

struct State {
    pending: HashSet<Key>,
    done: HashMap<Key, IntegrationSummary>,
}

/// Tracks which (scan, integration) keys are still being reduced.
///
/// Every key checked in MUST eventually be completed, on success or
/// failure alike; a pipeline that bails without completing its keys would
/// leave the coordinator blocked in [`InFlightRegistry::take`] forever.
pub struct InFlightRegistry {
    state: Mutex<State>,
    completed: Condvar,
}

impl InFlightRegistry {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                pending: HashSet::new(),
                done: HashMap::new(),
            }),
            completed: Condvar::new(),
        }
    }

    pub fn check_in(&self, scan: usize, integration: usize) {
        self.state
            .lock()
            .unwrap()
            .pending
            .insert((scan, integration));
    }

    pub fn complete(&self, summary: IntegrationSummary) {
        let key = (summary.scan, summary.integration);
        let mut state = self.state.lock().unwrap();
        state.pending.remove(&key);
        state.done.insert(key, summary);
        self.completed.notify_all();
    }

    /// Block until the key has completed, then hand its summary out.
    /// Returns `None` for a key that was never checked in.
    pub fn take(&self, scan: usize, integration: usize) -> Option<IntegrationSummary> {
        let key = (scan, integration);
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(summary) = state.done.remove(&key) {
                return Some(summary);
            }
            if !state.pending.contains(&key) {
                return None;
            }
            state = self.completed.wait(state).unwrap();
        }
    }

    pub fn in_flight(&self) -> usize {
        self.state.lock().unwrap().pending.len()
    }
}

impl Default for InFlightRegistry {
    fn default() -> Self {
        Self::new()
    }
}
