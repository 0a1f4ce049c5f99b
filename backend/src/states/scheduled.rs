//! Scheduled, one-shot state transition
//!
//! Models "dormant until time T, then operating". The state keeps its own
//! double-buffered clock: `tick` computes the time at the end of the step and
//! `tock` commits it. Once the end-of-step time reaches the change time while
//! this state is current, the entity is scheduled to switch to the target
//! state at the next commit.

use crate::models::entity::{EntityError, PendingChanges};
use crate::models::state::{State, StateRoster, StepContext};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTransition {
    name: String,
    target: String,
    change_time: i64,
    time: i64,
    next_time: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct Clock {
    time: i64,
    next_time: i64,
}

impl ScheduledTransition {
    /// State `name` that switches to `target` once time reaches `change_time`
    pub fn new(name: impl Into<String>, target: impl Into<String>, change_time: i64) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            change_time,
            time: 0,
            next_time: 0,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn change_time(&self) -> i64 {
        self.change_time
    }

    /// Committed clock value
    pub fn time(&self) -> i64 {
        self.time
    }
}

impl State for ScheduledTransition {
    fn name(&self) -> &str {
        &self.name
    }

    fn initialize(&mut self, roster: &StateRoster<'_>, initial_time: i64) -> Result<(), EntityError> {
        roster.require(&self.name)?;
        roster.require(&self.target)?;
        self.time = initial_time;
        self.next_time = initial_time;
        Ok(())
    }

    fn tick(
        &mut self,
        ctx: &StepContext<'_>,
        pending: &mut PendingChanges<'_>,
        duration: i64,
    ) -> Result<(), EntityError> {
        self.next_time = self.time + duration;
        if ctx.is_active() && self.next_time >= self.change_time {
            pending.set_state(&self.target)?;
        }
        Ok(())
    }

    fn tock(&mut self) {
        self.time = self.next_time;
    }

    fn snapshot(&self) -> serde_json::Value {
        serde_json::to_value(Clock {
            time: self.time,
            next_time: self.next_time,
        })
        .unwrap_or(serde_json::Value::Null)
    }

    fn restore(&mut self, value: &serde_json::Value) -> Result<(), EntityError> {
        let clock: Clock = serde_json::from_value(value.clone())
            .map_err(|e| EntityError::Snapshot(format!("{}: {}", self.name, e)))?;
        self.time = clock.time;
        self.next_time = clock.next_time;
        Ok(())
    }
}
