//! Workflow engine - live entity handles and per-entity serialized processing.
//!
//! Each live entity owns two locks:
//! - the *mailbox* lock guards the `processing` flag and the pending queue;
//! - the *record* lock guards the entity record while one event executes.
//!
//! `submit_event` appends under the mailbox lock. If no drain is in flight the
//! caller claims the flag and drains the queue on its own thread, releasing
//! the mailbox lock between dequeue and execution so other submitters never
//! wait on hook side effects. Submissions made while a drain is running
//! (including from hooks via [`HookContext::raise`](crate::HookContext::raise))
//! are picked up by that same drain.

use crate::clock::{Clock, SystemClock};
use crate::definition::{State, TransitionTable};
use crate::entity::Entity;
use crate::error::CoreError;
use crate::event::Event;
use crate::processor::{
    EventProcessor, FailureReporter, Processed, TracingReporter, UnmatchedHandler,
};
use crate::store::EntityStore;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct Mailbox {
    processing: bool,
    pending: VecDeque<Event>,
}

/// In-memory cell for one live entity.
struct EntityCell {
    id: String,
    record: Mutex<Entity>,
    mailbox: Mutex<Mailbox>,
    deleted: AtomicBool,
}

impl EntityCell {
    fn new(record: Entity) -> Self {
        Self {
            id: record.id.clone(),
            record: Mutex::new(record),
            mailbox: Mutex::new(Mailbox::default()),
            deleted: AtomicBool::new(false),
        }
    }
}

/// Clears the `processing` flag if a hook panics mid-drain, so a later
/// submission can drain the remaining events.
struct DrainGuard<'a> {
    cell: &'a EntityCell,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.cell.mailbox.lock().processing = false;
        }
    }
}

struct WorkflowInner {
    processor: EventProcessor,
    reporter: Arc<dyn FailureReporter>,
    /// Live entities by ID.
    live: DashMap<String, Arc<EntityCell>>,
}

/// Configures a [`Workflow`].
pub struct WorkflowBuilder {
    table: Arc<TransitionTable>,
    store: Arc<dyn EntityStore>,
    clock: Arc<dyn Clock>,
    reporter: Arc<dyn FailureReporter>,
    unmatched: Option<UnmatchedHandler>,
}

impl WorkflowBuilder {
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn reporter(mut self, reporter: Arc<dyn FailureReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Replaces the default unmatched-event handling for this entity type.
    pub fn unmatched_handler(mut self, handler: UnmatchedHandler) -> Self {
        self.unmatched = Some(handler);
        self
    }

    pub fn build(self) -> Workflow {
        tracing::info!(
            kind = self.table.name(),
            states = self.table.states().count(),
            "workflow registered"
        );
        Workflow {
            inner: Arc::new(WorkflowInner {
                processor: EventProcessor::new(self.table, self.store, self.clock, self.unmatched),
                reporter: self.reporter,
                live: DashMap::new(),
            }),
        }
    }
}

/// Runtime for one entity type: the transition table, its store, and the
/// live entity handles.
#[derive(Clone)]
pub struct Workflow {
    inner: Arc<WorkflowInner>,
}

impl Workflow {
    pub fn builder(table: TransitionTable, store: Arc<dyn EntityStore>) -> WorkflowBuilder {
        WorkflowBuilder {
            table: Arc::new(table),
            store,
            clock: Arc::new(SystemClock),
            reporter: Arc::new(TracingReporter),
            unmatched: None,
        }
    }

    /// Workflow with the system clock and default handlers.
    pub fn new(table: TransitionTable, store: Arc<dyn EntityStore>) -> Self {
        Self::builder(table, store).build()
    }

    /// Entity type name.
    pub fn kind(&self) -> &str {
        self.inner.processor.table().name()
    }

    pub fn table(&self) -> &Arc<TransitionTable> {
        self.inner.processor.table()
    }

    pub fn store(&self) -> &Arc<dyn EntityStore> {
        self.inner.processor.store()
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        self.inner.processor.clock()
    }

    pub fn reporter(&self) -> &Arc<dyn FailureReporter> {
        &self.inner.reporter
    }

    /// Number of entities currently held in memory.
    pub fn live_count(&self) -> usize {
        self.inner.live.len()
    }

    /// Creates an entity with a generated ID and applies `first_event`.
    pub fn create(&self, first_event: Event) -> Result<EntityHandle, CoreError> {
        self.create_with(uuid::Uuid::new_v4().to_string(), Value::Null, first_event)
    }

    /// Creates an entity in the table's initial state and applies
    /// `first_event` to move it into its first real state.
    ///
    /// The first event is processed before this returns; failures (including
    /// an unmatched first event) are returned and nothing is kept.
    pub fn create_with(
        &self,
        id: impl Into<String>,
        ctx: Value,
        first_event: Event,
    ) -> Result<EntityHandle, CoreError> {
        let id = id.into();
        let exists = || CoreError::EntityExists {
            kind: self.kind().to_string(),
            entity_id: id.clone(),
        };

        if self.inner.live.contains_key(&id) || self.store().load(self.kind(), &id)?.is_some() {
            return Err(exists());
        }

        let now = self.clock().now_millis();
        let record = Entity::new(id.clone(), self.kind(), self.table().initial(), ctx, now);
        let cell = Arc::new(EntityCell::new(record));
        // Claimed before the cell is visible so no other submitter drains it.
        cell.mailbox.lock().processing = true;

        match self.inner.live.entry(id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => return Err(exists()),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(cell.clone());
            }
        }

        let processed = {
            let mut record = cell.record.lock();
            self.inner.processor.process(&mut record, &first_event)
        };

        let handle = EntityHandle {
            cell,
            workflow: self.clone(),
        };

        match processed {
            Ok(processed) => {
                tracing::debug!(kind = self.kind(), entity_id = %id, "entity created");
                self.settle(&handle.cell, processed);
                handle.drain();
                Ok(handle)
            }
            Err(e) => {
                self.evict(&handle.cell);
                Err(e)
            }
        }
    }

    /// Returns the live handle for `id`, loading the entity from the store if
    /// it is not in memory.
    pub fn get(&self, id: &str) -> Result<EntityHandle, CoreError> {
        if let Some(cell) = self.inner.live.get(id) {
            return Ok(self.handle(cell.value().clone()));
        }

        match self.store().load(self.kind(), id)? {
            Some(record) => self.attach(record),
            None => Err(CoreError::EntityNotFound {
                kind: self.kind().to_string(),
                entity_id: id.to_string(),
            }),
        }
    }

    /// Resolves a handle for a record obtained from a store scan. A live
    /// entity wins over the scanned copy; otherwise the entity is reloaded so
    /// a deletion since the scan is observed.
    pub fn resolve(&self, record: &Entity) -> Result<EntityHandle, CoreError> {
        self.check_kind(record)?;
        self.get(&record.id)
    }

    /// Registers `record` as a live entity. If the entity is already live the
    /// existing handle is returned and `record` is discarded.
    pub fn attach(&self, record: Entity) -> Result<EntityHandle, CoreError> {
        self.check_kind(&record)?;
        if !self.table().has_state(&record.state) {
            return Err(CoreError::UnknownState {
                entity_id: record.id,
                state: record.state.to_string(),
            });
        }

        let cell = self
            .inner
            .live
            .entry(record.id.clone())
            .or_insert_with(|| Arc::new(EntityCell::new(record)))
            .value()
            .clone();
        Ok(self.handle(cell))
    }

    /// Submits an event to the entity with the given ID.
    pub fn submit(&self, id: &str, event: Event) -> Result<(), CoreError> {
        self.get(id)?.submit_event(event);
        Ok(())
    }

    fn check_kind(&self, record: &Entity) -> Result<(), CoreError> {
        if record.kind != self.kind() {
            return Err(CoreError::KindMismatch {
                entity_id: record.id.clone(),
                expected: self.kind().to_string(),
                actual: record.kind.clone(),
            });
        }
        Ok(())
    }

    fn handle(&self, cell: Arc<EntityCell>) -> EntityHandle {
        EntityHandle {
            cell,
            workflow: self.clone(),
        }
    }

    fn evict(&self, cell: &Arc<EntityCell>) {
        cell.deleted.store(true, Ordering::SeqCst);
        self.inner
            .live
            .remove_if(&cell.id, |_, live| Arc::ptr_eq(live, cell));
    }

    /// Processes one dequeued event against a cell.
    fn apply(&self, cell: &Arc<EntityCell>, event: Event) {
        if cell.deleted.load(Ordering::SeqCst) {
            self.inner.reporter.report(&CoreError::EntityDeleted {
                kind: self.kind().to_string(),
                entity_id: cell.id.clone(),
            });
            return;
        }

        let result = {
            let mut record = cell.record.lock();
            self.inner.processor.process(&mut record, &event)
        };

        match result {
            Ok(processed) => self.settle(cell, processed),
            Err(e) => self.inner.reporter.report(&e),
        }
    }

    /// Applies the bookkeeping side of a processed event.
    fn settle(&self, cell: &Arc<EntityCell>, processed: Processed) {
        if let Some(e) = &processed.entry_error {
            self.inner.reporter.report(e);
        }
        if processed.outcome.is_terminated() {
            self.evict(cell);
            return;
        }
        if !processed.raised.is_empty() {
            cell.mailbox.lock().pending.extend(processed.raised);
        }
    }
}

/// Live view of one entity. Cloning is cheap; all clones share the same
/// locks and queue.
#[derive(Clone)]
pub struct EntityHandle {
    cell: Arc<EntityCell>,
    workflow: Workflow,
}

impl EntityHandle {
    pub fn id(&self) -> &str {
        &self.cell.id
    }

    pub fn state(&self) -> State {
        self.cell.record.lock().state.clone()
    }

    /// Clone of the current record.
    pub fn snapshot(&self) -> Entity {
        self.cell.record.lock().clone()
    }

    /// Returns true once the entity has been deleted.
    pub fn is_deleted(&self) -> bool {
        self.cell.deleted.load(Ordering::SeqCst)
    }

    /// Number of events queued but not yet processed.
    pub fn pending_events(&self) -> usize {
        self.cell.mailbox.lock().pending.len()
    }

    /// Enqueues `event` and drains the queue if no drain is in flight.
    ///
    /// Events for one entity are applied one at a time in submission order.
    /// Failures go to the workflow's [`FailureReporter`].
    pub fn submit_event(&self, event: Event) {
        {
            let mut mailbox = self.cell.mailbox.lock();
            mailbox.pending.push_back(event);
            if mailbox.processing {
                return;
            }
            mailbox.processing = true;
        }
        self.drain();
    }

    /// Drains the queue. The caller must have claimed `processing`.
    fn drain(&self) {
        let _guard = DrainGuard { cell: &self.cell };
        loop {
            let event = {
                let mut mailbox = self.cell.mailbox.lock();
                match mailbox.pending.pop_front() {
                    Some(event) => event,
                    None => {
                        mailbox.processing = false;
                        return;
                    }
                }
            };
            self.workflow.apply(&self.cell, event);
        }
    }
}

/// Drops the live cell once the last handle goes away and nothing is queued.
/// The store holds every committed change, so the next lookup reloads it.
impl Drop for EntityHandle {
    fn drop(&mut self) {
        // The map plus this handle; any other handle keeps the cell live.
        if Arc::strong_count(&self.cell) > 2 {
            return;
        }
        self.workflow.inner.live.remove_if(&self.cell.id, |_, live| {
            if !Arc::ptr_eq(live, &self.cell) || Arc::strong_count(live) > 2 {
                return false;
            }
            let mailbox = live.mailbox.lock();
            !mailbox.processing && mailbox.pending.is_empty()
        });
    }
}

impl std::fmt::Debug for EntityHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityHandle")
            .field("id", &self.cell.id)
            .field("kind", &self.workflow.kind())
            .field("deleted", &self.is_deleted())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::definition::Transition;
    use crate::error::HookError;
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingReporter {
        errors: Mutex<Vec<String>>,
    }

    impl FailureReporter for RecordingReporter {
        fn report(&self, error: &CoreError) {
            self.errors.lock().push(error.error_code().to_string());
        }
    }

    struct Fixture {
        workflow: Workflow,
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
        reporter: Arc<RecordingReporter>,
    }

    fn fixture(table: TransitionTable) -> Fixture {
        fixture_with(table, None)
    }

    fn fixture_with(table: TransitionTable, unmatched: Option<UnmatchedHandler>) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::default());
        let reporter = Arc::new(RecordingReporter::default());
        let mut builder = Workflow::builder(table, store.clone())
            .clock(clock.clone())
            .reporter(reporter.clone());
        if let Some(handler) = unmatched {
            builder = builder.unmatched_handler(handler);
        }
        Fixture {
            workflow: builder.build(),
            store,
            clock,
            reporter,
        }
    }

    fn document_table() -> TransitionTable {
        TransitionTable::builder("document")
            .initial("new")
            .state("new", |s| s.on("CREATE", "created"))
            .state("created", |s| s.on("APPROVE", "active"))
            .state("active", |s| {
                s.after(Duration::from_secs(300), "expired")
                    .on("ARCHIVE", "archived")
            })
            .state("expired", |s| s.terminal())
            .state("archived", |s| s)
            .build()
            .unwrap()
    }

    /// Appends every event's `n` payload to `ctx.log`.
    fn counting_table(active: Arc<AtomicUsize>, overlap: Arc<AtomicBool>) -> TransitionTable {
        TransitionTable::builder("counter")
            .initial("new")
            .state("new", |s| s.on("CREATE", "counting"))
            .state("counting", |s| {
                s.transition(Transition::on("TICK", "counting").action(move |cx| {
                    if active.fetch_add(1, Ordering::SeqCst) != 0 {
                        overlap.store(true, Ordering::SeqCst);
                    }
                    let n = cx
                        .event
                        .payload()
                        .cloned()
                        .unwrap_or(Value::Null);
                    if !cx.entity.ctx.is_object() {
                        cx.entity.ctx = json!({"log": []});
                    }
                    if let Some(log) = cx.entity.ctx["log"].as_array_mut() {
                        log.push(n);
                    }
                    std::thread::yield_now();
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }))
            })
            .build()
            .unwrap()
    }

    #[test]
    fn test_create_applies_first_event() {
        let f = fixture(document_table());
        let handle = f
            .workflow
            .create_with("doc-1", json!({"title": "Q3"}), Event::named("CREATE"))
            .unwrap();

        assert_eq!(handle.id(), "doc-1");
        assert_eq!(handle.state().as_str(), "created");
        let stored = f.store.load("document", "doc-1").unwrap().unwrap();
        assert_eq!(stored.state.as_str(), "created");
        assert_eq!(stored.ctx, json!({"title": "Q3"}));
        assert_eq!(f.workflow.live_count(), 1);
    }

    #[test]
    fn test_create_generates_id() {
        let f = fixture(document_table());
        let a = f.workflow.create(Event::named("CREATE")).unwrap();
        let b = f.workflow.create(Event::named("CREATE")).unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(f.store.len(), 2);
    }

    #[test]
    fn test_create_rejects_unmatched_first_event() {
        let f = fixture(document_table());
        let err = f
            .workflow
            .create_with("doc-1", Value::Null, Event::named("APPROVE"))
            .unwrap_err();
        assert!(matches!(err, CoreError::UnmatchedEvent { .. }));
        assert_eq!(f.workflow.live_count(), 0);
        assert!(f.store.is_empty());
    }

    #[test]
    fn test_create_rejects_duplicate_id() {
        let f = fixture(document_table());
        f.workflow
            .create_with("doc-1", Value::Null, Event::named("CREATE"))
            .unwrap();
        let err = f
            .workflow
            .create_with("doc-1", Value::Null, Event::named("CREATE"))
            .unwrap_err();
        assert!(matches!(err, CoreError::EntityExists { .. }));
    }

    #[test]
    fn test_submit_event_transitions() {
        let f = fixture(document_table());
        let handle = f.workflow.create(Event::named("CREATE")).unwrap();
        handle.submit_event(Event::named("APPROVE"));

        assert_eq!(handle.state().as_str(), "active");
        let snapshot = handle.snapshot();
        assert_eq!(
            snapshot.next_transition_at,
            snapshot.timed_event_at + 300_000
        );
        assert_eq!(handle.pending_events(), 0);
    }

    #[test]
    fn test_unmatched_event_reported() {
        let f = fixture(document_table());
        let handle = f.workflow.create(Event::named("CREATE")).unwrap();
        handle.submit_event(Event::named("ARCHIVE"));

        assert_eq!(*f.reporter.errors.lock(), vec!["UNMATCHED_EVENT"]);
        assert_eq!(handle.state().as_str(), "created");
    }

    #[test]
    fn test_unmatched_event_with_custom_handler_not_reported() {
        let handler: UnmatchedHandler =
            Arc::new(|_cx: &mut crate::UnmatchedContext<'_>| Ok::<(), CoreError>(()));
        let f = fixture_with(document_table(), Some(handler));
        let handle = f.workflow.create(Event::named("CREATE")).unwrap();
        handle.submit_event(Event::named("ARCHIVE"));

        assert!(f.reporter.errors.lock().is_empty());
        assert_eq!(handle.state().as_str(), "created");
    }

    #[test]
    fn test_timed_transition_round_trip() {
        let f = fixture(document_table());
        let handle = f.workflow.create(Event::named("CREATE")).unwrap();
        handle.submit_event(Event::named("APPROVE"));
        let id = handle.id().to_string();

        f.clock.advance(Duration::from_secs(300));
        let now = f.clock.now_millis();
        let due = f.store.find_due("document", now).unwrap();
        assert_eq!(due.len(), 1);

        let record = &due[0];
        let event = Event::Timer(crate::event::TimerFired::scheduled(
            record.elapsed_since_transition(now),
            record.timed_event_at,
        ));
        f.workflow.resolve(record).unwrap().submit_event(event.clone());

        assert!(handle.is_deleted());
        assert!(f.store.find_due("document", now).unwrap().is_empty());
        assert!(matches!(
            f.workflow.get(&id),
            Err(CoreError::EntityNotFound { .. })
        ));

        // Late redelivery of the same pair finds nothing to act on.
        assert!(f.workflow.resolve(record).is_err());
    }

    #[test]
    fn test_early_timer_rearms_without_firing() {
        let f = fixture(document_table());
        let handle = f.workflow.create(Event::named("CREATE")).unwrap();
        handle.submit_event(Event::named("APPROVE"));
        let armed = handle.snapshot().next_transition_at;

        f.clock.advance(Duration::from_secs(10));
        handle.submit_event(Event::timer(Duration::from_secs(10)));

        assert_eq!(handle.state().as_str(), "active");
        assert_eq!(handle.snapshot().next_transition_at, armed);
        assert!(f.reporter.errors.lock().is_empty());
    }

    #[test]
    fn test_leaving_state_drops_schedule() {
        let f = fixture(document_table());
        let handle = f.workflow.create(Event::named("CREATE")).unwrap();
        handle.submit_event(Event::named("APPROVE"));
        handle.submit_event(Event::named("ARCHIVE"));

        f.clock.advance(Duration::from_secs(600));
        assert!(f
            .store
            .find_due("document", f.clock.now_millis())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_get_loads_from_store() {
        let f = fixture(document_table());
        let record = Entity::new("doc-9", "document", "created", Value::Null, 0);
        f.store.save(&record).unwrap();

        let handle = f.workflow.get("doc-9").unwrap();
        assert_eq!(handle.state().as_str(), "created");
        handle.submit_event(Event::named("APPROVE"));
        assert_eq!(
            f.store.load("document", "doc-9").unwrap().unwrap().state.as_str(),
            "active"
        );
    }

    #[test]
    fn test_attach_prefers_live_record() {
        let f = fixture(document_table());
        let handle = f
            .workflow
            .create_with("doc-1", Value::Null, Event::named("CREATE"))
            .unwrap();
        handle.submit_event(Event::named("APPROVE"));

        let stale = Entity::new("doc-1", "document", "created", Value::Null, 0);
        let attached = f.workflow.attach(stale).unwrap();
        assert_eq!(attached.state().as_str(), "active");
    }

    #[test]
    fn test_attach_rejects_foreign_records() {
        let f = fixture(document_table());
        let foreign = Entity::new("x", "invoice", "created", Value::Null, 0);
        assert!(matches!(
            f.workflow.attach(foreign),
            Err(CoreError::KindMismatch { .. })
        ));

        let ghost = Entity::new("y", "document", "limbo", Value::Null, 0);
        assert!(matches!(
            f.workflow.attach(ghost),
            Err(CoreError::UnknownState { .. })
        ));
    }

    #[test]
    fn test_events_after_delete_are_reported() {
        let table = TransitionTable::builder("ticket")
            .initial("new")
            .state("new", |s| s.on("OPEN", "open"))
            .state("open", |s| s.on("CLOSE", "closed"))
            .state("closed", |s| s.terminal())
            .build()
            .unwrap();
        let f = fixture(table);
        let handle = f.workflow.create(Event::named("OPEN")).unwrap();
        handle.submit_event(Event::named("CLOSE"));
        assert!(handle.is_deleted());
        assert_eq!(f.workflow.live_count(), 0);

        handle.submit_event(Event::named("CLOSE"));
        assert_eq!(*f.reporter.errors.lock(), vec!["ENTITY_DELETED"]);
    }

    #[test]
    fn test_raised_events_run_after_current() {
        let table = TransitionTable::builder("job")
            .initial("new")
            .state("new", |s| s.on("START", "running"))
            .state("running", |s| {
                s.entry(|cx| {
                    cx.raise(Event::named("FINISH"));
                    Ok(())
                })
                .on("FINISH", "finished")
            })
            .state("finished", |s| s)
            .build()
            .unwrap();
        let f = fixture(table);
        let handle = f.workflow.create(Event::named("START")).unwrap();
        assert_eq!(handle.state().as_str(), "finished");
    }

    #[test]
    fn test_sequential_events_apply_in_order() {
        let active = Arc::new(AtomicUsize::new(0));
        let overlap = Arc::new(AtomicBool::new(false));
        let f = fixture(counting_table(active, overlap));
        let handle = f.workflow.create(Event::named("CREATE")).unwrap();

        for n in 0..20 {
            handle.submit_event(Event::with_payload("TICK", json!(n)));
        }

        let log = handle.snapshot().ctx["log"].clone();
        assert_eq!(log, json!((0..20).collect::<Vec<_>>()));
    }

    #[test]
    fn test_concurrent_submitters_serialize_per_entity() {
        let active = Arc::new(AtomicUsize::new(0));
        let overlap = Arc::new(AtomicBool::new(false));
        let f = fixture(counting_table(active, overlap.clone()));
        let handle = f.workflow.create(Event::named("CREATE")).unwrap();

        let threads: Vec<_> = (0..4)
            .map(|t| {
                let handle = handle.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        handle.submit_event(Event::with_payload("TICK", json!([t, i])));
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        assert!(!overlap.load(Ordering::SeqCst));
        assert_eq!(handle.pending_events(), 0);

        let snapshot = handle.snapshot();
        let log = snapshot.ctx["log"].as_array().unwrap();
        assert_eq!(log.len(), 200);

        // Each submitter's events appear in the order it submitted them.
        for t in 0..4 {
            let seq: Vec<i64> = log
                .iter()
                .filter(|entry| entry[0] == json!(t))
                .map(|entry| entry[1].as_i64().unwrap())
                .collect();
            assert_eq!(seq, (0..50).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_panicking_hook_does_not_wedge_entity() {
        let table = TransitionTable::builder("fragile")
            .initial("new")
            .state("new", |s| s.on("CREATE", "ready"))
            .state("ready", |s| {
                s.transition(Transition::on("BOOM", "ready").action(|cx| -> Result<(), HookError> {
                    cx.entity.ctx = json!({"half": "done"});
                    panic!("hook exploded")
                }))
                .on("OK", "done")
            })
            .state("done", |s| s)
            .build()
            .unwrap();
        let f = fixture(table);
        let handle = f.workflow.create(Event::named("CREATE")).unwrap();

        let boom = handle.clone();
        let result = std::thread::spawn(move || boom.submit_event(Event::named("BOOM"))).join();
        assert!(result.is_err());

        // The half-applied action is rolled back, not persisted by the next event.
        assert_eq!(handle.snapshot().ctx, Value::Null);

        handle.submit_event(Event::named("OK"));
        assert_eq!(handle.state().as_str(), "done");
        let stored = f.store.load("fragile", handle.id()).unwrap().unwrap();
        assert_eq!(stored.ctx, Value::Null);
    }

    #[test]
    fn test_idle_entities_leave_memory() {
        let f = fixture(document_table());
        for n in 0..50 {
            f.workflow
                .create_with(format!("doc-{}", n), Value::Null, Event::named("CREATE"))
                .unwrap();
        }
        assert_eq!(f.workflow.live_count(), 0);

        for n in 0..50 {
            f.workflow.submit(&format!("doc-{}", n), Event::named("APPROVE")).unwrap();
        }
        assert_eq!(f.workflow.live_count(), 0);
        assert!(f
            .store
            .all("document")
            .iter()
            .all(|e| e.state.as_str() == "active"));
    }

    #[test]
    fn test_held_handle_stays_live() {
        let f = fixture(document_table());
        let held = f
            .workflow
            .create_with("doc-1", Value::Null, Event::named("CREATE"))
            .unwrap();

        f.workflow.submit("doc-1", Event::named("APPROVE")).unwrap();
        assert_eq!(f.workflow.live_count(), 1);
        assert_eq!(held.state().as_str(), "active");

        let other = f.workflow.get("doc-1").unwrap();
        drop(held);
        assert_eq!(f.workflow.live_count(), 1);
        drop(other);
        assert_eq!(f.workflow.live_count(), 0);

        // Reloaded from the store on next use.
        assert_eq!(f.workflow.get("doc-1").unwrap().state().as_str(), "active");
    }
}
