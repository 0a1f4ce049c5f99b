//! Entity behavior
//!
//! A [`State`] declares what its entity does over a step of a given duration.
//! Behavior is expressed as optional capabilities rather than a type
//! hierarchy: a state that stores resources returns `Some` from
//! [`State::storing`], one that exchanges with peers returns `Some` from
//! [`State::exchanging`], and so on. Default implementations of `tick` and
//! `net_flow` dispatch on whichever capabilities are present.
//!
//! # Critical Invariants
//!
//! 1. States read other elements only through [`StepContext`] (committed records)
//! 2. Inventory changes only through store/retrieve during `tick`
//! 3. Transitions are scheduled on [`PendingChanges`] and applied at tock
//! 4. `iterate_tick`/`iterate_tock` never touch the primary contents buffer

use crate::models::element::{ElementRecord, ElementTable, EntityId};
use crate::models::entity::{EntityError, PendingChanges};
use crate::models::links::{Links, Relation};
use crate::models::location::Location;
use crate::resource::{Resource, ResourceFactory};
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// Step Context
// ============================================================================

/// Read-only view handed to a state while its entity steps
#[derive(Debug, Clone, Copy)]
pub struct StepContext<'a> {
    me: &'a ElementRecord,
    table: &'a ElementTable,
    links: &'a Links,
    factory: ResourceFactory,
    active: bool,
}

impl<'a> StepContext<'a> {
    pub(crate) fn new(
        me: &'a ElementRecord,
        table: &'a ElementTable,
        links: &'a Links,
        factory: ResourceFactory,
        active: bool,
    ) -> Self {
        Self {
            me,
            table,
            links,
            factory,
            active,
        }
    }

    /// Committed record of the entity being stepped
    pub fn me(&self) -> &'a ElementRecord {
        self.me
    }

    /// Effective location of the entity being stepped
    pub fn location(&self) -> &'a Location {
        &self.me.location
    }

    pub fn table(&self) -> &'a ElementTable {
        self.table
    }

    pub fn factory(&self) -> ResourceFactory {
        self.factory
    }

    pub fn zero(&self) -> Resource {
        self.factory.zero()
    }

    /// Whether the state being called is the entity's current state
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn peer(&self, id: EntityId) -> Option<&'a ElementRecord> {
        self.table.get(id)
    }

    pub fn links(&self) -> &'a Links {
        self.links
    }

    /// Record of the peer linked for `(relation, role)`, if resolved and visible
    pub fn linked(&self, relation: Relation, role: &str) -> Option<&'a ElementRecord> {
        self.links
            .get(relation, role)
            .and_then(|id| self.table.get(id))
    }

    pub(crate) fn with_active(self, active: bool) -> Self {
        Self { active, ..self }
    }
}

/// Names of the states installed on one entity, for validation at initialize
#[derive(Debug, Clone, Copy)]
pub struct StateRoster<'a> {
    entity: &'a str,
    names: &'a [String],
}

impl<'a> StateRoster<'a> {
    pub(crate) fn new(entity: &'a str, names: &'a [String]) -> Self {
        Self { entity, names }
    }

    pub fn entity(&self) -> &'a str {
        self.entity
    }

    pub fn contains(&self, state: &str) -> bool {
        self.names.iter().any(|n| n == state)
    }

    /// `Ok` if `state` is installed, `UnknownState` otherwise
    pub fn require(&self, state: &str) -> Result<(), EntityError> {
        if self.contains(state) {
            Ok(())
        } else {
            Err(EntityError::UnknownState {
                entity: self.entity.to_string(),
                state: state.to_string(),
            })
        }
    }
}

// ============================================================================
// Capabilities
// ============================================================================

/// Adds to and removes from the entity's own inventory
pub trait Storing {
    fn stored(&self, ctx: &StepContext<'_>, duration: i64) -> Resource;
    fn retrieved(&self, ctx: &StepContext<'_>, duration: i64) -> Resource;
}

/// Converts resources at the entity's location
pub trait Transforming {
    fn produced(&self, ctx: &StepContext<'_>, duration: i64) -> Resource;
    fn consumed(&self, ctx: &StepContext<'_>, duration: i64) -> Resource;
}

/// Moves resources from the origin to the destination of the entity's location
pub trait Transporting {
    fn input(&self, ctx: &StepContext<'_>, duration: i64) -> Resource;
    fn output(&self, ctx: &StepContext<'_>, duration: i64) -> Resource;
}

/// Exchanges resources bilaterally with linked peers
pub trait Exchanging {
    fn sent_to(&self, ctx: &StepContext<'_>, peer: &ElementRecord, duration: i64) -> Resource;

    fn received_from(&self, ctx: &StepContext<'_>, peer: &ElementRecord, duration: i64) -> Resource;

    /// Peers this state exchanges with; defaults to every linked peer
    fn counterparties(&self, ctx: &StepContext<'_>) -> Vec<EntityId> {
        ctx.links().peers()
    }

    fn sent(&self, ctx: &StepContext<'_>, duration: i64) -> Resource {
        self.counterparties(ctx)
            .into_iter()
            .filter_map(|id| ctx.peer(id))
            .fold(ctx.zero(), |acc, peer| acc.add(&self.sent_to(ctx, peer, duration)))
    }

    fn received(&self, ctx: &StepContext<'_>, duration: i64) -> Resource {
        self.counterparties(ctx)
            .into_iter()
            .filter_map(|id| ctx.peer(id))
            .fold(ctx.zero(), |acc, peer| {
                acc.add(&self.received_from(ctx, peer, duration))
            })
    }

    /// Sent to minus received from `peer`
    fn net_exchange(&self, ctx: &StepContext<'_>, peer: &ElementRecord, duration: i64) -> Resource {
        self.sent_to(ctx, peer, duration)
            .subtract(&self.received_from(ctx, peer, duration))
    }
}

/// Capability tags, for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Storing,
    Transforming,
    Transporting,
    Exchanging,
}

// ============================================================================
// State
// ============================================================================

/// Behavior installed on an entity.
///
/// Every hook has a default; a state only overrides what it needs. `tick`
/// and `tock` are called on every installed state so inactive states can keep
/// internal clocks; the default `tick` does nothing unless the state is the
/// entity's current state. The `iterate_*` hooks are only called on the
/// current state.
pub trait State: fmt::Debug + Send {
    fn name(&self) -> &str;

    /// Reset internal buffers at the start of a run
    fn initialize(&mut self, _roster: &StateRoster<'_>, _initial_time: i64) -> Result<(), EntityError> {
        Ok(())
    }

    /// Compute auxiliary values reported to other entities; must only write
    /// the state's own pending auxiliary buffers
    fn iterate_tick(&mut self, _ctx: &StepContext<'_>, _duration: i64) {}

    /// Commit auxiliary values computed by `iterate_tick`
    fn iterate_tock(&mut self) {}

    fn tick(
        &mut self,
        ctx: &StepContext<'_>,
        pending: &mut PendingChanges<'_>,
        duration: i64,
    ) -> Result<(), EntityError> {
        if !ctx.is_active() {
            return Ok(());
        }
        if let Some(exchanging) = self.exchanging() {
            validate_exchanges(exchanging, ctx, duration)?;
        }
        if let Some(storing) = self.storing() {
            pending.store(&storing.stored(ctx, duration), &storing.retrieved(ctx, duration));
        }
        Ok(())
    }

    fn tock(&mut self) {}

    fn storing(&self) -> Option<&dyn Storing> {
        None
    }

    fn transforming(&self) -> Option<&dyn Transforming> {
        None
    }

    fn transporting(&self) -> Option<&dyn Transporting> {
        None
    }

    fn exchanging(&self) -> Option<&dyn Exchanging> {
        None
    }

    fn capabilities(&self) -> Vec<Capability> {
        let mut caps = Vec::new();
        if self.storing().is_some() {
            caps.push(Capability::Storing);
        }
        if self.transforming().is_some() {
            caps.push(Capability::Transforming);
        }
        if self.transporting().is_some() {
            caps.push(Capability::Transporting);
        }
        if self.exchanging().is_some() {
            caps.push(Capability::Exchanging);
        }
        caps
    }

    /// Net resource flow into `location` caused by this state over `duration`
    ///
    /// At the entity's own location: retrieved − stored + produced − consumed
    /// + input − output. At the static location of the entity's origin node:
    /// − input, − sent + received. At the static location of its destination
    /// node: + output.
    fn net_flow(&self, ctx: &StepContext<'_>, location: &Location, duration: i64) -> Resource {
        let here = ctx.location();
        let mut flow = ctx.zero();

        if here == location {
            if let Some(s) = self.storing() {
                flow = flow
                    .add(&s.retrieved(ctx, duration))
                    .subtract(&s.stored(ctx, duration));
            }
            if let Some(t) = self.transforming() {
                flow = flow
                    .add(&t.produced(ctx, duration))
                    .subtract(&t.consumed(ctx, duration));
            }
            if let Some(t) = self.transporting() {
                flow = flow
                    .add(&t.input(ctx, duration))
                    .subtract(&t.output(ctx, duration));
            }
        }
        if location.is_static() && location.origin() == here.origin() {
            if let Some(t) = self.transporting() {
                flow = flow.subtract(&t.input(ctx, duration));
            }
            if let Some(x) = self.exchanging() {
                flow = flow
                    .subtract(&x.sent(ctx, duration))
                    .add(&x.received(ctx, duration));
            }
        }
        if location.is_static() && location.origin() == here.destination() {
            if let Some(t) = self.transporting() {
                flow = flow.add(&t.output(ctx, duration));
            }
        }
        flow
    }

    /// Extra numeric values mirrored to other federates with this entity
    fn publish(&self, _ctx: &StepContext<'_>, _duration: i64, _values: &mut BTreeMap<String, f64>) {}

    /// Opaque internal state for checkpoints
    fn snapshot(&self) -> serde_json::Value {
        serde_json::Value::Null
    }

    fn restore(&mut self, _value: &serde_json::Value) -> Result<(), EntityError> {
        Ok(())
    }
}

/// Check that every nonzero exchange runs between adjacent locations.
///
/// Sending requires this entity's destination to be the peer's origin;
/// receiving requires this entity's origin to be the peer's destination.
pub fn validate_exchanges(
    exchanging: &dyn Exchanging,
    ctx: &StepContext<'_>,
    duration: i64,
) -> Result<(), EntityError> {
    let me = ctx.me();
    for peer in exchanging
        .counterparties(ctx)
        .into_iter()
        .filter_map(|id| ctx.peer(id))
    {
        let sent = exchanging.sent_to(ctx, peer, duration);
        if !sent.is_zero() && me.location.destination() != peer.location.origin() {
            return Err(EntityError::ExchangeMismatch {
                entity: me.name.clone(),
                peer: peer.name.clone(),
                detail: format!(
                    "destination {} =/= origin {}",
                    me.location.destination(),
                    peer.location.origin()
                ),
            });
        }
        let received = exchanging.received_from(ctx, peer, duration);
        if !received.is_zero() && me.location.origin() != peer.location.destination() {
            return Err(EntityError::ExchangeMismatch {
                entity: me.name.clone(),
                peer: peer.name.clone(),
                detail: format!(
                    "origin {} =/= destination {}",
                    me.location.origin(),
                    peer.location.destination()
                ),
            });
        }
    }
    Ok(())
}
