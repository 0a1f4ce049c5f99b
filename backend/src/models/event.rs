//! Event logging for simulation replay and diagnostics.
//!
//! The simulator records one [`Event`] per notable occurrence: completed
//! steps, committed state transitions, and invariant violations found by the
//! optional flow and exchange checks. Violations are diagnostic only; the run
//! continues after logging them.
//!
//! # Example
//!
//! ```rust
//! use infra_cosim_core::models::{Event, EventLog};
//!
//! let mut log = EventLog::new();
//! log.log(Event::StepCompleted { time: 10, duration: 1 });
//!
//! assert_eq!(log.events_at_time(10).len(), 1);
//! ```

use crate::resource::Resource;
use serde::{Deserialize, Serialize};

/// Simulation event capturing a notable occurrence.
///
/// All events carry the simulation time of the step they belong to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    /// Tick, observer notification and tock finished for one step
    StepCompleted { time: i64, duration: i64 },

    /// An entity committed a change of current state
    StateChanged {
        time: i64,
        entity: String,
        from: Option<String>,
        to: Option<String>,
    },

    /// Net flow into a static location was not zero
    FlowImbalance {
        time: i64,
        location: String,
        imbalance: Resource,
    },

    /// Two elements disagree on what they exchanged
    ExchangeImbalance {
        time: i64,
        from: String,
        to: String,
        delta: Resource,
        relative_error: Resource,
    },
}

impl Event {
    /// Simulation time when the event occurred
    pub fn time(&self) -> i64 {
        match self {
            Event::StepCompleted { time, .. }
            | Event::StateChanged { time, .. }
            | Event::FlowImbalance { time, .. }
            | Event::ExchangeImbalance { time, .. } => *time,
        }
    }

    /// Event type name, used for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            Event::StepCompleted { .. } => "StepCompleted",
            Event::StateChanged { .. } => "StateChanged",
            Event::FlowImbalance { .. } => "FlowImbalance",
            Event::ExchangeImbalance { .. } => "ExchangeImbalance",
        }
    }

    pub fn is_violation(&self) -> bool {
        matches!(
            self,
            Event::FlowImbalance { .. } | Event::ExchangeImbalance { .. }
        )
    }
}

/// Ordered collection of events from one run
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Vec<Event>,
}

impl EventLog {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn log(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn events_at_time(&self, time: i64) -> Vec<&Event> {
        self.events.iter().filter(|e| e.time() == time).collect()
    }

    pub fn events_of_type(&self, event_type: &str) -> Vec<&Event> {
        self.events
            .iter()
            .filter(|e| e.event_type() == event_type)
            .collect()
    }

    pub fn violations(&self) -> Vec<&Event> {
        self.events.iter().filter(|e| e.is_violation()).collect()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}
