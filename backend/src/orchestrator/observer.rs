//! Step observers
//!
//! Observers are the simulator's only export point. They run once per step,
//! after every entity has ticked and before anything commits, so they can read
//! both committed values (via `elements`) and the pending results of the
//! step (via the entities' pending accessors).

use crate::models::{ElementTable, Entity, EntityReport};
use parking_lot::Mutex;
use std::sync::Arc;

/// One completed tick, handed to observers before tock
#[derive(Debug, Clone, Copy)]
pub struct StepEvent<'a> {
    pub time: i64,
    pub duration: i64,
    pub entities: &'a [Entity],
    pub elements: &'a ElementTable,
}

impl StepEvent<'_> {
    /// Telemetry rows for every local entity
    pub fn reports(&self) -> Vec<EntityReport> {
        self.entities
            .iter()
            .map(|e| e.report(self.elements, self.time, self.duration))
            .collect()
    }
}

pub trait StepObserver: Send {
    fn on_step_completed(&mut self, event: &StepEvent<'_>);
}

impl<F> StepObserver for F
where
    F: FnMut(&StepEvent<'_>) + Send,
{
    fn on_step_completed(&mut self, event: &StepEvent<'_>) {
        self(event)
    }
}

/// Collects an [`EntityReport`] per entity per step.
///
/// Clones share the same buffer, so keep one clone to read the rows after
/// handing the other to the simulator.
#[derive(Debug, Clone, Default)]
pub struct RecordingObserver {
    rows: Arc<Mutex<Vec<EntityReport>>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> Vec<EntityReport> {
        self.rows.lock().clone()
    }

    pub fn rows_for(&self, entity: &str) -> Vec<EntityReport> {
        self.rows
            .lock()
            .iter()
            .filter(|r| r.name == entity)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.lock().is_empty()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&*self.rows.lock())
    }
}

impl StepObserver for RecordingObserver {
    fn on_step_completed(&mut self, event: &StepEvent<'_>) {
        let reports = event.reports();
        self.rows.lock().extend(reports);
    }
}
