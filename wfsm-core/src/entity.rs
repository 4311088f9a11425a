//! Persisted workflow entity records.

use crate::definition::State;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// `next_transition_at` value meaning "no timed transition pending".
pub const NO_PENDING_TRANSITION: i64 = 0;

/// A workflow entity as stored in the backing store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Unique entity ID.
    pub id: String,

    /// Entity type; the name of the transition table that drives it.
    pub kind: String,

    /// Current state.
    pub state: State,

    /// Business data owned by the entity (mutable from hooks).
    pub ctx: Value,

    /// When the last transition fired (Unix millis).
    pub timed_event_at: i64,

    /// Earliest pending timed transition (Unix millis), or [`NO_PENDING_TRANSITION`].
    pub next_transition_at: i64,

    /// Creation timestamp (Unix millis).
    pub created_at: i64,

    /// Last update timestamp (Unix millis).
    pub updated_at: i64,
}

impl Entity {
    /// Creates a new entity with no pending timed transition.
    pub fn new(
        id: impl Into<String>,
        kind: impl Into<String>,
        state: impl Into<State>,
        ctx: Value,
        now: i64,
    ) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            state: state.into(),
            ctx,
            timed_event_at: now,
            next_transition_at: NO_PENDING_TRANSITION,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    /// Returns true if a timed transition is scheduled.
    pub fn has_pending_transition(&self) -> bool {
        self.next_transition_at != NO_PENDING_TRANSITION
    }

    /// Returns true if the scheduled wake-up lies in `(0, now]`.
    pub fn is_due(&self, now: i64) -> bool {
        self.next_transition_at > NO_PENDING_TRANSITION && self.next_transition_at <= now
    }

    /// Offers `timed_event_at + after` as the next wake-up.
    ///
    /// The candidate is only taken if it is still in the future and earlier
    /// than any wake-up already recorded. Returns whether it was taken.
    pub fn schedule_timed_check(&mut self, after: Duration, now: i64) -> bool {
        let after_ms = i64::try_from(after.as_millis()).unwrap_or(i64::MAX);
        let candidate = self.timed_event_at.saturating_add(after_ms);
        if candidate <= now {
            return false;
        }
        if !self.has_pending_transition() || candidate < self.next_transition_at {
            self.next_transition_at = candidate;
            return true;
        }
        false
    }

    /// Drops any pending wake-up.
    pub fn clear_schedule(&mut self) {
        self.next_transition_at = NO_PENDING_TRANSITION;
    }

    /// Time elapsed since the last transition.
    pub fn elapsed_since_transition(&self, now: i64) -> Duration {
        Duration::from_millis(now.saturating_sub(self.timed_event_at).max(0) as u64)
    }

    /// Records that a transition fired at `now`.
    pub(crate) fn stamp_transition(&mut self, now: i64) {
        self.timed_event_at = now;
        self.clear_schedule();
    }

    /// Normalizes the record before it is written: a wake-up already in the
    /// past is discarded so it can never fire twice.
    pub fn prepare_for_save(&mut self, now: i64) {
        if self.has_pending_transition() && self.next_transition_at < now {
            self.clear_schedule();
        }
        self.updated_at = now;
    }
}
