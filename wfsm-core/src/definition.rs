//! Transition table definitions.
//!
//! A table is declared once per entity type and is immutable afterwards:
//!
//! ```
//! use std::time::Duration;
//! use wfsm_core::{Transition, TransitionTable};
//!
//! let table = TransitionTable::builder("order")
//!     .initial("new")
//!     .state("new", |s| s.on("CREATE", "created"))
//!     .state("created", |s| s.on("APPROVE", "active"))
//!     .state("active", |s| s.after(Duration::from_secs(300), "expired"))
//!     .state("expired", |s| s.terminal())
//!     .state("cancelled", |s| s.terminal())
//!     .global(Transition::on("CANCEL", "cancelled"))
//!     .build()
//!     .unwrap();
//!
//! assert!(table.is_terminal(&"expired".into()));
//! ```
//!
//! Every hook list (entry, exit, action, setup) runs in reverse attachment
//! order: the most recently attached hook runs first.

use crate::entity::Entity;
use crate::error::{CoreError, HookError, HookStage};
use crate::event::Event;
use crate::guard::{self, Guard};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// A state in the machine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct State(pub String);

impl State {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for State {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for State {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&State> for State {
    fn from(s: &State) -> Self {
        s.clone()
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hook run on entry, exit, or as a transition action.
pub type TransitionHook = Arc<dyn Fn(&mut HookContext<'_>) -> Result<(), HookError> + Send + Sync>;

/// Hook run when the owning state is entered, used to arm timed transitions.
/// Receives the entity and the current time.
pub type SetupHook = Arc<dyn Fn(&mut Entity, i64) + Send + Sync>;

/// Context handed to entry, exit and action hooks.
pub struct HookContext<'a> {
    pub entity: &'a mut Entity,
    pub from: &'a State,
    pub to: &'a State,
    pub event: &'a Event,
    /// Processing time (Unix millis).
    pub now: i64,
    terminate: bool,
    raised: Vec<Event>,
}

impl<'a> HookContext<'a> {
    pub(crate) fn new(
        entity: &'a mut Entity,
        from: &'a State,
        to: &'a State,
        event: &'a Event,
        now: i64,
    ) -> Self {
        Self {
            entity,
            from,
            to,
            event,
            now,
            terminate: false,
            raised: Vec::new(),
        }
    }

    /// Requests deletion of the entity once the current event completes.
    pub fn terminate(&mut self) {
        self.terminate = true;
    }

    pub fn is_terminating(&self) -> bool {
        self.terminate
    }

    /// Queues a follow-up event for this entity. It is processed after the
    /// current event and after anything already pending.
    pub fn raise(&mut self, event: Event) {
        self.raised.push(event);
    }

    pub(crate) fn finish(self) -> (bool, Vec<Event>) {
        (self.terminate, self.raised)
    }
}

pub(crate) fn run_hooks(
    hooks: &[TransitionHook],
    cx: &mut HookContext<'_>,
    stage: HookStage,
) -> Result<(), CoreError> {
    for hook in hooks.iter().rev() {
        hook(&mut *cx).map_err(|source| CoreError::Hook {
            entity_id: cx.entity.id.clone(),
            stage,
            source,
        })?;
    }
    Ok(())
}

/// Which events a transition reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventMatcher {
    /// Named events with one of these names.
    Named(Vec<String>),
    /// Any named event.
    AnyNamed,
    /// Timer events whose elapsed time reaches `after`.
    Timer { after: Duration },
}

impl EventMatcher {
    pub fn accepts(&self, event: &Event) -> bool {
        match (self, event) {
            (EventMatcher::Named(names), Event::Named { name, .. }) => {
                names.iter().any(|n| n == name)
            }
            (EventMatcher::AnyNamed, Event::Named { .. }) => true,
            (EventMatcher::Timer { after }, Event::Timer(fired)) => fired.elapsed >= *after,
            _ => false,
        }
    }
}

/// A transition rule: matcher, guards, target and side effects.
#[derive(Clone)]
pub struct Transition {
    to: State,
    matcher: EventMatcher,
    guards: Vec<Guard>,
    actions: Vec<TransitionHook>,
    setups: Vec<SetupHook>,
}

impl Transition {
    pub fn new(matcher: EventMatcher, to: impl Into<State>) -> Self {
        Self {
            to: to.into(),
            matcher,
            guards: Vec::new(),
            actions: Vec::new(),
            setups: Vec::new(),
        }
    }

    /// Transition on a single named event.
    pub fn on(event: impl Into<String>, to: impl Into<State>) -> Self {
        Self::new(EventMatcher::Named(vec![event.into()]), to)
    }

    /// Transition on any of the given named events.
    pub fn on_any<I, S>(events: I, to: impl Into<State>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            EventMatcher::Named(events.into_iter().map(Into::into).collect()),
            to,
        )
    }

    /// Transition on every named event.
    pub fn on_every(to: impl Into<State>) -> Self {
        Self::new(EventMatcher::AnyNamed, to)
    }

    /// Timed transition: fires once `after` has elapsed in the owning state.
    ///
    /// Attaches a setup hook that offers the wake-up time to the entity each
    /// time the owning state is entered.
    pub fn after(after: Duration, to: impl Into<State>) -> Self {
        Self::new(EventMatcher::Timer { after }, to).setup(move |entity, now| {
            entity.schedule_timed_check(after, now);
        })
    }

    /// Adds a guard closure.
    pub fn guard<F>(self, check: F) -> Self
    where
        F: Fn(&Entity, &Event) -> bool + Send + Sync + 'static,
    {
        let description = format!("guard#{}", self.guards.len());
        self.guard_with(Guard::new(description, check))
    }

    pub fn guard_with(mut self, guard: Guard) -> Self {
        self.guards.push(guard);
        self
    }

    /// Adds an action run between the exit and entry hooks.
    pub fn action<F>(mut self, action: F) -> Self
    where
        F: Fn(&mut HookContext<'_>) -> Result<(), HookError> + Send + Sync + 'static,
    {
        self.actions.push(Arc::new(action));
        self
    }

    /// Adds a setup hook run whenever the owning state is entered.
    pub fn setup<F>(mut self, setup: F) -> Self
    where
        F: Fn(&mut Entity, i64) + Send + Sync + 'static,
    {
        self.setups.push(Arc::new(setup));
        self
    }

    pub fn target(&self) -> &State {
        &self.to
    }

    pub fn matcher(&self) -> &EventMatcher {
        &self.matcher
    }

    pub fn guards(&self) -> &[Guard] {
        &self.guards
    }

    /// Delay of a timed transition.
    pub fn timed_after(&self) -> Option<Duration> {
        match self.matcher {
            EventMatcher::Timer { after } => Some(after),
            _ => None,
        }
    }

    /// Matcher accepts the event and the guard list allows it.
    pub fn matches(&self, entity: &Entity, event: &Event) -> bool {
        self.matcher.accepts(event) && guard::any_allows(&self.guards, entity, event)
    }

    pub(crate) fn run_actions(&self, cx: &mut HookContext<'_>) -> Result<(), CoreError> {
        run_hooks(&self.actions, cx, HookStage::Action)
    }

    pub(crate) fn run_setups(&self, entity: &mut Entity, now: i64) {
        for setup in self.setups.iter().rev() {
            setup(entity, now);
        }
    }
}

impl fmt::Debug for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transition")
            .field("to", &self.to)
            .field("matcher", &self.matcher)
            .field("guards", &self.guards)
            .field("actions", &self.actions.len())
            .field("setups", &self.setups.len())
            .finish()
    }
}

/// A declared state with its hooks and local transitions.
#[derive(Clone)]
pub struct StateDef {
    name: State,
    terminal: bool,
    entry: Vec<TransitionHook>,
    exit: Vec<TransitionHook>,
    transitions: Vec<Transition>,
}

impl StateDef {
    fn new(name: State) -> Self {
        Self {
            name,
            terminal: false,
            entry: Vec::new(),
            exit: Vec::new(),
            transitions: Vec::new(),
        }
    }

    pub fn name(&self) -> &State {
        &self.name
    }

    /// Entering a terminal state deletes the entity.
    pub fn is_terminal(&self) -> bool {
        self.terminal
    }

    /// Transitions declared on this state (globals excluded).
    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    pub(crate) fn entry_hooks(&self) -> &[TransitionHook] {
        &self.entry
    }

    pub(crate) fn exit_hooks(&self) -> &[TransitionHook] {
        &self.exit
    }
}

impl fmt::Debug for StateDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateDef")
            .field("name", &self.name)
            .field("terminal", &self.terminal)
            .field("entry", &self.entry.len())
            .field("exit", &self.exit.len())
            .field("transitions", &self.transitions)
            .finish()
    }
}

/// Configures a single state inside [`TransitionTableBuilder::state`].
pub struct StateBuilder {
    def: StateDef,
}

impl StateBuilder {
    pub fn terminal(mut self) -> Self {
        self.def.terminal = true;
        self
    }

    pub fn entry<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut HookContext<'_>) -> Result<(), HookError> + Send + Sync + 'static,
    {
        self.def.entry.push(Arc::new(hook));
        self
    }

    pub fn exit<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut HookContext<'_>) -> Result<(), HookError> + Send + Sync + 'static,
    {
        self.def.exit.push(Arc::new(hook));
        self
    }

    pub fn transition(mut self, transition: Transition) -> Self {
        self.def.transitions.push(transition);
        self
    }

    /// Shorthand for `transition(Transition::on(event, to))`.
    pub fn on(self, event: impl Into<String>, to: impl Into<State>) -> Self {
        self.transition(Transition::on(event, to))
    }

    /// Shorthand for `transition(Transition::after(after, to))`.
    pub fn after(self, after: Duration, to: impl Into<State>) -> Self {
        self.transition(Transition::after(after, to))
    }
}

/// Builder for [`TransitionTable`]. Validation happens in [`build`](Self::build).
pub struct TransitionTableBuilder {
    name: String,
    initial: Option<State>,
    states: Vec<StateDef>,
    global: Vec<Transition>,
}

impl TransitionTableBuilder {
    /// Sets the state new entities start in before their first event.
    /// Defaults to the first declared state.
    pub fn initial(mut self, state: impl Into<State>) -> Self {
        self.initial = Some(state.into());
        self
    }

    pub fn state<F>(mut self, name: impl Into<State>, configure: F) -> Self
    where
        F: FnOnce(StateBuilder) -> StateBuilder,
    {
        let builder = configure(StateBuilder {
            def: StateDef::new(name.into()),
        });
        self.states.push(builder.def);
        self
    }

    /// Adds a transition available from every state, evaluated after the
    /// state's own transitions.
    pub fn global(mut self, transition: Transition) -> Self {
        self.global.push(transition);
        self
    }

    pub fn build(self) -> Result<TransitionTable, CoreError> {
        let invalid = |reason: String| CoreError::InvalidDefinition {
            table: self.name.clone(),
            reason,
        };

        if self.states.is_empty() {
            return Err(invalid("no states declared".to_string()));
        }

        let mut seen = HashSet::new();
        for def in &self.states {
            if !seen.insert(def.name.clone()) {
                return Err(invalid(format!("duplicate state '{}'", def.name)));
            }
        }

        let initial = match &self.initial {
            Some(state) => state.clone(),
            None => self.states[0].name.clone(),
        };
        if !seen.contains(&initial) {
            return Err(invalid(format!(
                "initial state '{}' not in states list",
                initial
            )));
        }

        for def in &self.states {
            for t in &def.transitions {
                if !seen.contains(&t.to) {
                    return Err(invalid(format!(
                        "transition from '{}' targets undeclared state '{}'",
                        def.name, t.to
                    )));
                }
            }
        }
        for t in &self.global {
            if !seen.contains(&t.to) {
                return Err(invalid(format!(
                    "global transition targets undeclared state '{}'",
                    t.to
                )));
            }
        }

        let order: Vec<State> = self.states.iter().map(|d| d.name.clone()).collect();
        let states: HashMap<State, StateDef> = self
            .states
            .into_iter()
            .map(|d| (d.name.clone(), d))
            .collect();

        tracing::debug!(
            table = %self.name,
            states = states.len(),
            global = self.global.len(),
            "transition table built"
        );

        Ok(TransitionTable {
            name: self.name,
            initial,
            states,
            order,
            global: self.global,
        })
    }
}

/// Validated, immutable transition table for one entity type.
pub struct TransitionTable {
    name: String,
    initial: State,
    states: HashMap<State, StateDef>,
    /// Declaration order of states.
    order: Vec<State>,
    global: Vec<Transition>,
}

impl TransitionTable {
    pub fn builder(name: impl Into<String>) -> TransitionTableBuilder {
        TransitionTableBuilder {
            name: name.into(),
            initial: None,
            states: Vec::new(),
            global: Vec::new(),
        }
    }

    /// Entity type name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn initial(&self) -> &State {
        &self.initial
    }

    pub fn has_state(&self, state: &State) -> bool {
        self.states.contains_key(state)
    }

    pub fn state(&self, state: &State) -> Option<&StateDef> {
        self.states.get(state)
    }

    /// Returns true if `state` is declared and terminal.
    pub fn is_terminal(&self, state: &State) -> bool {
        self.states.get(state).map(|d| d.terminal).unwrap_or(false)
    }

    /// Declared states in declaration order.
    pub fn states(&self) -> impl Iterator<Item = &State> {
        self.order.iter()
    }

    pub fn global_transitions(&self) -> &[Transition] {
        &self.global
    }

    /// Local transitions of `state` followed by the global transitions.
    pub fn transitions_from<'a>(&'a self, state: &State) -> impl Iterator<Item = &'a Transition> {
        self.states
            .get(state)
            .map(|d| d.transitions.as_slice())
            .unwrap_or(&[])
            .iter()
            .chain(self.global.iter())
    }

    /// First transition from the entity's current state matching `event`.
    pub fn select(&self, entity: &Entity, event: &Event) -> Option<&Transition> {
        self.transitions_from(&entity.state)
            .find(|t| t.matches(entity, event))
    }

    /// Runs the setup hooks of every transition reachable from `state`.
    pub fn arm_timers(&self, state: &State, entity: &mut Entity, now: i64) {
        for t in self.transitions_from(state) {
            t.run_setups(entity, now);
        }
    }
}

impl fmt::Debug for TransitionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransitionTable")
            .field("name", &self.name)
            .field("initial", &self.initial)
            .field("states", &self.order)
            .field("global", &self.global)
            .finish()
    }
}
