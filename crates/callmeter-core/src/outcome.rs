//! Explicit outcome marking from inside a function body.
//!
//! For bodies that decide their own outcome (a soft failure that still
//! returns a value, or a success reported before cleanup), `OutcomeMarker`
//! writes to the same counter and duration families the wrappers use. Each
//! `(function, outcome)` pair is recorded at most once until `reset`, so a
//! body that marks failure early and success later only counts the first.
//!
//! One marker corresponds to one logical context (a request, a message);
//! create one per context or `reset` between them.

use std::collections::HashSet;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::Result;
use crate::family::{CounterVec, HistogramVec};
use crate::instrument::{
    Outcome, CALLS_TOTAL, CALLS_TOTAL_HELP, CALL_DURATION, CALL_DURATION_HELP,
    DEFAULT_DURATION_BUCKETS, FUNCTION_LABEL, OUTCOME_LABEL,
};
use crate::registry::Registry;

pub struct OutcomeMarker {
    calls: CounterVec,
    duration: HistogramVec,
    marked: Mutex<HashSet<(String, Outcome)>>,
}

impl OutcomeMarker {
    pub fn new(registry: &Registry) -> Result<Self> {
        Self::with_buckets(registry, DEFAULT_DURATION_BUCKETS)
    }

    /// Buckets must match any wrapper already registered on `registry`.
    pub fn with_buckets(registry: &Registry, buckets: &[f64]) -> Result<Self> {
        Ok(Self {
            calls: registry.counter_vec(
                CALLS_TOTAL,
                CALLS_TOTAL_HELP,
                &[FUNCTION_LABEL, OUTCOME_LABEL],
            )?,
            duration: registry.histogram_vec(
                CALL_DURATION,
                CALL_DURATION_HELP,
                &[FUNCTION_LABEL],
                buckets,
            )?,
            marked: Mutex::new(HashSet::new()),
        })
    }

    /// Returns whether this call recorded anything.
    pub fn mark_success(&self, function: &str) -> bool {
        self.mark(function, Outcome::Success)
    }

    /// Returns whether this call recorded anything.
    pub fn mark_failure(&self, function: &str) -> bool {
        self.mark(function, Outcome::Failure)
    }

    pub fn mark_latency(&self, function: &str, elapsed: Duration) {
        if let Err(e) = self.duration.observe_duration(&[function], elapsed) {
            tracing::warn!(function, error = %e, "latency mark failed");
        }
    }

    pub fn is_marked(&self, function: &str, outcome: Outcome) -> bool {
        self.marked.lock().contains(&(function.to_string(), outcome))
    }

    /// Forget what was marked, for the next logical context.
    pub fn reset(&self) {
        self.marked.lock().clear();
    }

    fn mark(&self, function: &str, outcome: Outcome) -> bool {
        let key = (function.to_string(), outcome);
        let mut marked = self.marked.lock();
        if marked.contains(&key) {
            return false;
        }
        // Remembered only once counted.
        match self.calls.inc(&[function, outcome.as_str()]) {
            Ok(()) => {
                marked.insert(key);
                true
            }
            Err(e) => {
                tracing::warn!(function, outcome = outcome.as_str(), error = %e, "outcome mark failed");
                false
            }
        }
    }
}
