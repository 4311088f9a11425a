//! # wfsm-core
//!
//! State machine engine for wfsm.
//!
//! This crate provides:
//! - Transition table definition and validation
//! - Guard, action, setup, entry and exit hooks
//! - Timed transitions driven by persisted schedule columns
//! - Per-entity serialized event processing
//! - The storage seam consumed by the engine

pub mod clock;
pub mod definition;
pub mod engine;
pub mod entity;
pub mod error;
pub mod event;
pub mod guard;
pub mod processor;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use definition::{
    EventMatcher, HookContext, State, StateBuilder, StateDef, Transition, TransitionTable,
    TransitionTableBuilder,
};
pub use engine::{EntityHandle, Workflow, WorkflowBuilder};
pub use entity::{Entity, NO_PENDING_TRANSITION};
pub use error::{CoreError, HookError, HookStage};
pub use event::{Event, TimerFired};
pub use guard::Guard;
pub use processor::{
    default_unmatched_handler, EventProcessor, FailureReporter, Outcome, Processed,
    TracingReporter, UnmatchedContext, UnmatchedHandler,
};
pub use store::{EntityStore, MemoryStore, StoreError};
