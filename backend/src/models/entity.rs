//! Entity model with double-buffered step semantics
//!
//! An entity keeps three copies of its mutable fields (contents, current
//! state, parent, location):
//!
//! - `initial`: the configured values, restored by `initialize`
//! - `current`: committed values, the only ones other entities can observe
//! - `next`: pending values written during `tick`, committed by `tock`
//!
//! # Critical Invariants
//!
//! - `tick` starts from a fresh copy of `current`, so ticking twice before a
//!   tock yields the same pending values
//! - `tick` reads peers only through committed records, so ticking all
//!   entities in any order and then tocking all gives identical results
//! - A nested entity (one with a parent) cannot change its own location
//! - Only installed states can become current

use crate::models::element::{ElementRecord, ElementTable, EntityId};
use crate::models::links::{LinkSpec, Links};
use crate::models::location::Location;
use crate::models::state::{State, StateRoster, StepContext};
use crate::resource::{Resource, ResourceFactory};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Contract violations raised by entities and states.
///
/// These are programming errors in model code, not environment failures,
/// and are never retried.
#[derive(Debug, Error, PartialEq)]
pub enum EntityError {
    #[error("Invalid transition for {entity}: {reason}")]
    InvalidTransition { entity: String, reason: String },

    #[error("Incompatible resource exchange between {entity} and {peer}: {detail}")]
    ExchangeMismatch {
        entity: String,
        peer: String,
        detail: String,
    },

    #[error("Entity {entity} has no state named {state}")]
    UnknownState { entity: String, state: String },

    #[error("Entity {0} is not part of the element table")]
    NotInitialized(String),

    #[error("Snapshot error: {0}")]
    Snapshot(String),
}

// ============================================================================
// Buffers
// ============================================================================

/// One copy of an entity's mutable fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityBuffer {
    pub contents: Resource,
    /// Index of the current state among the entity's installed states
    pub state: Option<usize>,
    pub parent: Option<EntityId>,
    pub location: Location,
}

/// Write access to an entity's pending buffer during `tick`
#[derive(Debug)]
pub struct PendingChanges<'a> {
    entity: &'a str,
    id: EntityId,
    next: &'a mut EntityBuffer,
    state_names: &'a [String],
    location: &'a Location,
}

impl<'a> PendingChanges<'a> {
    pub fn contents(&self) -> &Resource {
        &self.next.contents
    }

    pub fn add_contents(&mut self, resource: &Resource) {
        self.next.contents = self.next.contents.add(resource);
    }

    pub fn remove_contents(&mut self, resource: &Resource) {
        self.next.contents = self.next.contents.subtract(resource);
    }

    /// Add `stored` to and remove `retrieved` from pending contents
    pub fn store(&mut self, stored: &Resource, retrieved: &Resource) {
        self.add_contents(stored);
        self.remove_contents(retrieved);
    }

    /// Name of the state that will be current after tock
    pub fn state(&self) -> Option<&str> {
        self.next.state.map(|i| self.state_names[i].as_str())
    }

    /// Schedule a transition to an installed state
    pub fn set_state(&mut self, name: &str) -> Result<(), EntityError> {
        let index = self
            .state_names
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| EntityError::InvalidTransition {
                entity: self.entity.to_string(),
                reason: format!("state {} is not installed", name),
            })?;
        self.next.state = Some(index);
        Ok(())
    }

    pub fn set_location(&mut self, location: Location) -> Result<(), EntityError> {
        if self.next.parent.is_some() {
            return Err(EntityError::InvalidTransition {
                entity: self.entity.to_string(),
                reason: "location is delegated to the parent".to_string(),
            });
        }
        self.next.location = location;
        Ok(())
    }

    /// Schedule a new parent; a parent must be a local element sharing this
    /// entity's location. `None` makes the entity top-level again.
    pub fn set_parent(&mut self, parent: Option<&ElementRecord>) -> Result<(), EntityError> {
        match parent {
            None => {
                // keep the effective location when leaving the parent
                self.next.location = self.location.clone();
                self.next.parent = None;
                Ok(())
            }
            Some(p) if p.id == self.id => Err(self.parent_error("an entity cannot parent itself")),
            Some(p) if !p.local => Err(self.parent_error("parent must be a local entity")),
            Some(p) if &p.location != self.location => Err(self.parent_error(&format!(
                "parent {} is at {}, entity is at {}",
                p.name, p.location, self.location
            ))),
            Some(p) => {
                self.next.parent = Some(p.id);
                Ok(())
            }
        }
    }

    fn parent_error(&self, reason: &str) -> EntityError {
        EntityError::InvalidTransition {
            entity: self.entity.to_string(),
            reason: reason.to_string(),
        }
    }
}

// ============================================================================
// Reports
// ============================================================================

/// Values a state reports to other elements for the current round
#[derive(Debug, Clone, Default)]
pub(crate) struct Publication {
    pub sent: BTreeMap<String, Resource>,
    pub received: BTreeMap<String, Resource>,
    pub values: BTreeMap<String, f64>,
}

/// Per-step telemetry row for one entity.
///
/// Quantities are `None` when the current state lacks the capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityReport {
    pub time: i64,
    pub name: String,
    pub state: Option<String>,
    pub location: Location,
    pub parent: Option<String>,
    pub contents: Resource,
    pub consumed: Option<Resource>,
    pub produced: Option<Resource>,
    pub input: Option<Resource>,
    pub output: Option<Resource>,
    pub sent: Option<Resource>,
    pub received: Option<Resource>,
}

/// A committed change of current state
#[derive(Debug, Clone, PartialEq)]
pub struct StateChange {
    pub entity: String,
    pub from: Option<String>,
    pub to: Option<String>,
}

// ============================================================================
// Entity
// ============================================================================

/// A named unit owning a resource inventory and a set of behaviors
#[derive(Debug)]
pub struct Entity {
    id: EntityId,
    name: String,
    class: String,
    factory: ResourceFactory,
    states: Vec<Box<dyn State>>,
    state_names: Vec<String>,
    initial: EntityBuffer,
    current: EntityBuffer,
    next: EntityBuffer,
    links: Links,
}

impl Entity {
    /// Start building an entity of `class` at `location`
    pub fn builder(
        name: impl Into<String>,
        class: impl Into<String>,
        location: Location,
    ) -> EntityBuilder {
        EntityBuilder {
            name: name.into(),
            class: class.into(),
            location,
            factory: ResourceFactory::default(),
            contents: None,
            states: Vec::new(),
            initial_state: None,
            parent: None,
            links: Vec::new(),
        }
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub(crate) fn assign_id(&mut self, id: EntityId) {
        self.id = id;
    }

    /// Switch the numeric backend of every buffered inventory
    pub(crate) fn set_factory(&mut self, factory: ResourceFactory) {
        self.factory = factory;
        for buffer in [&mut self.initial, &mut self.current, &mut self.next] {
            buffer.contents = factory.convert(&buffer.contents);
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    pub fn factory(&self) -> ResourceFactory {
        self.factory
    }

    pub fn state_names(&self) -> &[String] {
        &self.state_names
    }

    pub fn states(&self) -> impl Iterator<Item = &dyn State> {
        self.states.iter().map(|s| s.as_ref())
    }

    /// Committed contents
    pub fn contents(&self) -> &Resource {
        &self.current.contents
    }

    /// Contents computed by the last `tick`, valid until `tock`
    pub fn pending_contents(&self) -> &Resource {
        &self.next.contents
    }

    pub fn initial_contents(&self) -> &Resource {
        &self.initial.contents
    }

    /// Committed current state name
    pub fn current_state(&self) -> Option<&str> {
        self.current.state.map(|i| self.state_names[i].as_str())
    }

    pub fn pending_state(&self) -> Option<&str> {
        self.next.state.map(|i| self.state_names[i].as_str())
    }

    pub fn parent(&self) -> Option<EntityId> {
        self.current.parent
    }

    /// Committed location of the entity itself, ignoring any parent
    pub fn own_location(&self) -> &Location {
        &self.current.location
    }

    pub fn links(&self) -> &Links {
        &self.links
    }

    pub fn links_mut(&mut self) -> &mut Links {
        &mut self.links
    }

    pub fn committed(&self) -> &EntityBuffer {
        &self.current
    }

    pub fn pending(&self) -> &EntityBuffer {
        &self.next
    }

    // ------------------------------------------------------------------------
    // Step protocol
    // ------------------------------------------------------------------------

    /// Reset current and pending buffers to the initial values and
    /// initialize every state
    pub fn initialize(&mut self, initial_time: i64) -> Result<(), EntityError> {
        self.current = self.initial.clone();
        self.next = self.initial.clone();
        self.links.clear();
        let roster = StateRoster::new(&self.name, &self.state_names);
        for state in self.states.iter_mut() {
            state.initialize(&roster, initial_time)?;
        }
        Ok(())
    }

    /// One iterate round on the current state; never touches contents
    pub fn iterate_tick(&mut self, table: &ElementTable, duration: i64) {
        let Some(index) = self.current.state else {
            return;
        };
        let Some(me) = table.get(self.id) else {
            return;
        };
        let ctx = StepContext::new(me, table, &self.links, self.factory, true);
        self.states[index].iterate_tick(&ctx, duration);
    }

    pub fn iterate_tock(&mut self) {
        if let Some(index) = self.current.state {
            self.states[index].iterate_tock();
        }
    }

    /// Compute pending values for a step of `duration`
    pub fn tick(&mut self, table: &ElementTable, duration: i64) -> Result<(), EntityError> {
        let me = table
            .get(self.id)
            .ok_or_else(|| EntityError::NotInitialized(self.name.clone()))?;
        self.next = self.current.clone();

        let current = self.current.state;
        let base = StepContext::new(me, table, &self.links, self.factory, false);
        for (index, state) in self.states.iter_mut().enumerate() {
            let ctx = base.with_active(current == Some(index));
            let mut pending = PendingChanges {
                entity: &self.name,
                id: self.id,
                next: &mut self.next,
                state_names: &self.state_names,
                location: &me.location,
            };
            state.tick(&ctx, &mut pending, duration)?;
        }
        Ok(())
    }

    /// Commit pending values. Returns the state change, if any.
    pub fn tock(&mut self) -> Option<StateChange> {
        let before = self.current.state;
        self.current = self.next.clone();
        for state in self.states.iter_mut() {
            state.tock();
        }
        (before != self.current.state).then(|| StateChange {
            entity: self.name.clone(),
            from: before.map(|i| self.state_names[i].clone()),
            to: self.current.state.map(|i| self.state_names[i].clone()),
        })
    }

    // ------------------------------------------------------------------------
    // Derived quantities
    // ------------------------------------------------------------------------

    fn with_current_state<T>(
        &self,
        table: &ElementTable,
        f: impl FnOnce(&dyn State, &StepContext<'_>) -> T,
    ) -> Option<T> {
        let index = self.current.state?;
        let me = table.get(self.id)?;
        let ctx = StepContext::new(me, table, &self.links, self.factory, true);
        Some(f(self.states[index].as_ref(), &ctx))
    }

    /// Net flow into `location` over `duration`; zero without a current state
    pub fn net_flow(&self, table: &ElementTable, location: &Location, duration: i64) -> Resource {
        self.with_current_state(table, |state, ctx| state.net_flow(ctx, location, duration))
            .unwrap_or_else(|| self.factory.zero())
    }

    /// Net exchange with `peer` over `duration`; zero unless the current
    /// state exchanges
    pub fn net_exchange(&self, table: &ElementTable, peer: &ElementRecord, duration: i64) -> Resource {
        self.with_current_state(table, |state, ctx| {
            state
                .exchanging()
                .map(|x| x.net_exchange(ctx, peer, duration))
        })
        .flatten()
        .unwrap_or_else(|| self.factory.zero())
    }

    /// Record with committed fields only (no exchanges or published values)
    pub(crate) fn base_record(&self, location: Location) -> ElementRecord {
        ElementRecord {
            parent: self.current.parent,
            state: self.current_state().map(str::to_string),
            contents: self.current.contents.clone(),
            ..ElementRecord::new(self.id, self.name.clone(), self.class.clone(), location)
        }
    }

    pub(crate) fn publication(&self, table: &ElementTable, duration: i64) -> Option<Publication> {
        self.with_current_state(table, |state, ctx| {
            let mut publication = Publication::default();
            if let Some(x) = state.exchanging() {
                for peer in x.counterparties(ctx).into_iter().filter_map(|id| ctx.peer(id)) {
                    publication
                        .sent
                        .insert(peer.name.clone(), x.sent_to(ctx, peer, duration));
                    publication
                        .received
                        .insert(peer.name.clone(), x.received_from(ctx, peer, duration));
                }
            }
            state.publish(ctx, duration, &mut publication.values);
            publication
        })
    }

    /// Telemetry row for the step starting at `time`
    pub fn report(&self, table: &ElementTable, time: i64, duration: i64) -> EntityReport {
        let location = table
            .get(self.id)
            .map(|r| r.location.clone())
            .unwrap_or_else(|| self.current.location.clone());
        let parent = self
            .current
            .parent
            .and_then(|id| table.get(id))
            .map(|p| p.name.clone());
        let mut report = EntityReport {
            time,
            name: self.name.clone(),
            state: self.current_state().map(str::to_string),
            location,
            parent,
            contents: self.current.contents.clone(),
            consumed: None,
            produced: None,
            input: None,
            output: None,
            sent: None,
            received: None,
        };
        self.with_current_state(table, |state, ctx| {
            if let Some(t) = state.transforming() {
                report.consumed = Some(t.consumed(ctx, duration));
                report.produced = Some(t.produced(ctx, duration));
            }
            if let Some(t) = state.transporting() {
                report.input = Some(t.input(ctx, duration));
                report.output = Some(t.output(ctx, duration));
            }
            if let Some(x) = state.exchanging() {
                report.sent = Some(x.sent(ctx, duration));
                report.received = Some(x.received(ctx, duration));
            }
        });
        report
    }

    // ------------------------------------------------------------------------
    // Checkpoint support
    // ------------------------------------------------------------------------

    pub(crate) fn state_snapshots(&self) -> Vec<serde_json::Value> {
        self.states.iter().map(|s| s.snapshot()).collect()
    }

    /// Overwrite committed and pending buffers and state internals
    pub(crate) fn restore(
        &mut self,
        buffer: EntityBuffer,
        state_values: &[serde_json::Value],
    ) -> Result<(), EntityError> {
        if let Some(index) = buffer.state {
            if index >= self.states.len() {
                return Err(EntityError::Snapshot(format!(
                    "{} has no state at index {}",
                    self.name, index
                )));
            }
        }
        if state_values.len() != self.states.len() {
            return Err(EntityError::Snapshot(format!(
                "{} expects {} state values, got {}",
                self.name,
                self.states.len(),
                state_values.len()
            )));
        }
        for (state, value) in self.states.iter_mut().zip(state_values) {
            state.restore(value)?;
        }
        self.current = buffer.clone();
        self.next = buffer;
        Ok(())
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`Entity`]
pub struct EntityBuilder {
    name: String,
    class: String,
    location: Location,
    factory: ResourceFactory,
    contents: Option<Resource>,
    states: Vec<Box<dyn State>>,
    initial_state: Option<String>,
    parent: Option<EntityId>,
    links: Vec<LinkSpec>,
}

impl EntityBuilder {
    /// Backend for a standalone entity; a scenario replaces it with its own
    pub fn factory(mut self, factory: ResourceFactory) -> Self {
        self.factory = factory;
        self
    }

    pub fn contents(mut self, contents: Resource) -> Self {
        self.contents = Some(contents);
        self
    }

    /// Install a state; the first installed state is the default initial state
    pub fn state(mut self, state: impl State + 'static) -> Self {
        self.states.push(Box::new(state));
        self
    }

    pub fn boxed_state(mut self, state: Box<dyn State>) -> Self {
        self.states.push(state);
        self
    }

    pub fn initial_state(mut self, name: impl Into<String>) -> Self {
        self.initial_state = Some(name.into());
        self
    }

    pub fn parent(mut self, parent: EntityId) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn requires(mut self, link: LinkSpec) -> Self {
        self.links.push(link);
        self
    }

    pub fn build(self) -> Result<Entity, EntityError> {
        let state_names: Vec<String> = self.states.iter().map(|s| s.name().to_string()).collect();
        for (i, name) in state_names.iter().enumerate() {
            if state_names[..i].contains(name) {
                return Err(EntityError::InvalidTransition {
                    entity: self.name,
                    reason: format!("state {} is installed twice", name),
                });
            }
        }
        let state = match &self.initial_state {
            Some(name) => Some(state_names.iter().position(|n| n == name).ok_or_else(|| {
                EntityError::UnknownState {
                    entity: self.name.clone(),
                    state: name.clone(),
                }
            })?),
            None if state_names.is_empty() => None,
            None => Some(0),
        };
        let initial = EntityBuffer {
            contents: self
                .contents
                .map(|c| self.factory.convert(&c))
                .unwrap_or_else(|| self.factory.zero()),
            state,
            parent: self.parent,
            location: self.location,
        };
        Ok(Entity {
            id: EntityId(0),
            name: self.name,
            class: self.class,
            factory: self.factory,
            states: self.states,
            state_names,
            current: initial.clone(),
            next: initial.clone(),
            initial,
            links: Links::new(self.links),
        })
    }
}
