//! Event processing for a single entity.
//!
//! [`EventProcessor::process`] applies one event to one entity record. The
//! caller guarantees exclusive access to the record (see
//! [`engine`](crate::engine)); the processor itself holds no per-entity state.
//!
//! Transition pipeline, in order:
//! 1. exit hooks of the current state
//! 2. actions of the selected transition
//! 3. stamp `timed_event_at = now`, clear `next_transition_at`
//! 4. setup hooks of every transition reachable from the target state
//! 5. commit: assign the target state, then save (or delete if terminal)
//! 6. entry hooks of the target state

use crate::clock::Clock;
use crate::definition::{run_hooks, HookContext, State, TransitionTable};
use crate::entity::Entity;
use crate::error::{CoreError, HookStage};
use crate::event::Event;
use crate::store::EntityStore;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Receives failures that have no caller to return to.
pub trait FailureReporter: Send + Sync {
    fn report(&self, error: &CoreError);
}

/// Reports failures through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl FailureReporter for TracingReporter {
    fn report(&self, error: &CoreError) {
        tracing::error!(code = error.error_code(), "{}", error);
    }
}

/// Handler invoked when no transition matches an event.
pub type UnmatchedHandler =
    Arc<dyn Fn(&mut UnmatchedContext<'_>) -> Result<(), CoreError> + Send + Sync>;

/// Context handed to an [`UnmatchedHandler`].
pub struct UnmatchedContext<'a> {
    pub entity: &'a mut Entity,
    pub event: &'a Event,
    /// Processing time (Unix millis).
    pub now: i64,
    table: &'a TransitionTable,
    store: &'a dyn EntityStore,
}

impl<'a> UnmatchedContext<'a> {
    pub fn table(&self) -> &TransitionTable {
        self.table
    }

    /// Clears the pending wake-up and re-arms every timed transition
    /// reachable from the current state. Returns true if a wake-up is now
    /// scheduled.
    pub fn rearm_timers(&mut self) -> bool {
        self.entity.clear_schedule();
        let state = self.entity.state.clone();
        self.table.arm_timers(&state, self.entity, self.now);
        self.entity.has_pending_transition()
    }

    /// Persists the entity as it currently stands.
    pub fn save(&mut self) -> Result<(), CoreError> {
        self.entity.prepare_for_save(self.now);
        self.store.save(self.entity)?;
        Ok(())
    }

    /// The generic unmatched-event failure for this entity and event.
    pub fn unmatched(&self) -> CoreError {
        CoreError::UnmatchedEvent {
            entity_id: self.entity.id.clone(),
            state: self.entity.state.to_string(),
            event: self.event.to_string(),
        }
    }
}

/// Default unmatched handling.
///
/// Timer events re-arm the reachable timed transitions; if that produces a
/// wake-up the entity is saved and the event is swallowed. Everything else
/// escalates to [`CoreError::UnmatchedEvent`]. An unmatched timer that could
/// not be re-armed is saved with its schedule cleared before escalating, so
/// the same wake-up is not picked up by the next scan.
pub fn default_unmatched_handler(cx: &mut UnmatchedContext<'_>) -> Result<(), CoreError> {
    if !cx.event.is_timer() {
        return Err(cx.unmatched());
    }

    if cx.rearm_timers() {
        cx.save()?;
        tracing::debug!(
            entity_id = %cx.entity.id,
            state = %cx.entity.state,
            next_transition_at = cx.entity.next_transition_at,
            "unmatched timer re-armed"
        );
        return Ok(());
    }

    cx.save()?;
    Err(cx.unmatched())
}

/// What processing an event did to the entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A transition fired and the entity was saved.
    Transitioned { from: State, to: State },
    /// A transition fired and the entity was deleted.
    Terminated { from: State, to: State },
    /// No transition matched; the unmatched handler accepted the event.
    Unmatched,
    /// A timer event measured from an older transition was dropped.
    Stale,
}

impl Outcome {
    pub fn is_terminated(&self) -> bool {
        matches!(self, Outcome::Terminated { .. })
    }
}

/// Result of [`EventProcessor::process`].
#[derive(Debug)]
pub struct Processed {
    pub outcome: Outcome,
    /// Follow-up events raised by hooks.
    pub raised: Vec<Event>,
    /// Entry hook failure. The transition was already committed when it
    /// happened, so it is reported rather than returned as an error.
    pub entry_error: Option<CoreError>,
}

impl Processed {
    fn quiet(outcome: Outcome) -> Self {
        Self {
            outcome,
            raised: Vec::new(),
            entry_error: None,
        }
    }
}

/// Applies events to entity records against one transition table.
pub struct EventProcessor {
    table: Arc<TransitionTable>,
    store: Arc<dyn EntityStore>,
    clock: Arc<dyn Clock>,
    unmatched: UnmatchedHandler,
}

impl EventProcessor {
    pub fn new(
        table: Arc<TransitionTable>,
        store: Arc<dyn EntityStore>,
        clock: Arc<dyn Clock>,
        unmatched: Option<UnmatchedHandler>,
    ) -> Self {
        Self {
            table,
            store,
            clock,
            unmatched: unmatched
                .unwrap_or_else(|| Arc::new(default_unmatched_handler) as UnmatchedHandler),
        }
    }

    pub fn table(&self) -> &Arc<TransitionTable> {
        &self.table
    }

    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Applies `event` to `entity`.
    ///
    /// On an error before commit the record is restored to its state before
    /// the event.
    pub fn process(&self, entity: &mut Entity, event: &Event) -> Result<Processed, CoreError> {
        let now = self.clock.now_millis();

        if let Event::Timer(fired) = event {
            if let Some(baseline) = fired.baseline {
                if baseline != entity.timed_event_at {
                    tracing::debug!(
                        entity_id = %entity.id,
                        baseline,
                        timed_event_at = entity.timed_event_at,
                        "dropping stale timer event"
                    );
                    return Ok(Processed::quiet(Outcome::Stale));
                }
            }
        }

        let from = entity.state.clone();
        let source = self
            .table
            .state(&from)
            .ok_or_else(|| CoreError::UnknownState {
                entity_id: entity.id.clone(),
                state: from.to_string(),
            })?;

        let transition = match self.table.select(entity, event) {
            Some(t) => t,
            None => {
                let mut cx = UnmatchedContext {
                    entity: &mut *entity,
                    event,
                    now,
                    table: &self.table,
                    store: self.store.as_ref(),
                };
                (self.unmatched)(&mut cx)?;
                return Ok(Processed::quiet(Outcome::Unmatched));
            }
        };

        let to = transition.target().clone();
        let target = self
            .table
            .state(&to)
            .ok_or_else(|| CoreError::UnknownState {
                entity_id: entity.id.clone(),
                state: to.to_string(),
            })?;

        tracing::debug!(
            entity_id = %entity.id,
            from = %from,
            to = %to,
            event = %event,
            "applying transition"
        );

        let before = entity.clone();

        let (pre_commit, mut terminate, mut raised) = restore_on_panic(entity, &before, |entity| {
            let mut cx = HookContext::new(entity, &from, &to, event, now);
            let result = run_hooks(source.exit_hooks(), &mut cx, HookStage::Exit)
                .and_then(|_| transition.run_actions(&mut cx));
            let (terminate, raised) = cx.finish();
            (result, terminate, raised)
        });
        if let Err(e) = pre_commit {
            *entity = before;
            return Err(e);
        }

        restore_on_panic(entity, &before, |entity| {
            entity.stamp_transition(now);
            self.table.arm_timers(&to, entity, now);
        });

        entity.state = to.clone();
        let deleted = target.is_terminal();
        let committed = if deleted {
            self.store.delete(entity)
        } else {
            entity.prepare_for_save(now);
            self.store.save(entity)
        };
        if let Err(e) = committed {
            *entity = before;
            return Err(e.into());
        }

        // From here on the store holds `saved`; a panicking entry hook must
        // not leave the record ahead of it.
        let saved = entity.clone();
        let (entry_result, entry_terminate, entry_raised) =
            restore_on_panic(entity, &saved, |entity| {
                let mut cx = HookContext::new(entity, &from, &to, event, now);
                let result = run_hooks(target.entry_hooks(), &mut cx, HookStage::Entry);
                let (terminate, raised) = cx.finish();
                (result, terminate, raised)
            });
        terminate |= entry_terminate;
        raised.extend(entry_raised);
        let entry_error = entry_result.err();

        let outcome = if deleted {
            Outcome::Terminated { from, to }
        } else if terminate {
            self.store.delete(entity)?;
            Outcome::Terminated { from, to }
        } else {
            if *entity != saved {
                entity.prepare_for_save(now);
                self.store.save(entity)?;
            }
            Outcome::Transitioned { from, to }
        };

        if outcome.is_terminated() {
            tracing::info!(entity_id = %entity.id, state = %entity.state, "entity terminated");
            raised.clear();
        }

        Ok(Processed {
            outcome,
            raised,
            entry_error,
        })
    }
}

/// Runs `f` on `entity`, putting `restore` back if `f` panics. The panic is
/// resumed once the record is restored.
fn restore_on_panic<T>(
    entity: &mut Entity,
    restore: &Entity,
    f: impl FnOnce(&mut Entity) -> T,
) -> T {
    match panic::catch_unwind(AssertUnwindSafe(|| f(&mut *entity))) {
        Ok(value) => value,
        Err(payload) => {
            *entity = restore.clone();
            panic::resume_unwind(payload)
        }
    }
}
