//! Shared fixtures for integration tests
//!
//! A water plant and a town at the same node exchange water. The town
//! publishes its demand; the plant reads it during the iterate rounds and
//! sends that much; the town reads what the plant reports sending. Both keep
//! the exchanged amount in an iterate buffer, so with two or more iterate
//! rounds per step their ledgers agree.

#![allow(dead_code)]

use infra_cosim_core::models::{
    ElementRecord, Entity, EntityError, EntityId, Exchanging, LinkSpec, Location, Node,
    PendingChanges, Relation, Scenario, State, StateRoster, StepContext, Storing, Transforming,
};
use infra_cosim_core::resource::{Resource, ResourceFactory, ResourceKind};
use infra_cosim_core::states::FixedRateState;
use std::collections::BTreeMap;

pub const DEMAND_KEY: &str = "WaterDemand";

pub fn site(node: &str) -> Location {
    Location::at(Node::new(node))
}

/// Route `tracing` output through the test harness; later calls are no-ops
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

pub fn water(amount: f64) -> Resource {
    ResourceFactory::default().quantity(ResourceKind::Water, amount)
}

// ============================================================================
// Water plant
// ============================================================================

/// Pumps `rate` aquifer per unit time into water; sends the linked town
/// whatever it demands and stores the rest
#[derive(Debug, Clone)]
pub struct Pumping {
    rate: f64,
    sent: Resource,
    next_sent: Resource,
}

impl Pumping {
    pub fn new(rate: f64) -> Self {
        Self {
            rate,
            sent: Resource::zero(),
            next_sent: Resource::zero(),
        }
    }
}

impl State for Pumping {
    fn name(&self) -> &str {
        "Pumping"
    }

    fn initialize(
        &mut self,
        _roster: &StateRoster<'_>,
        _initial_time: i64,
    ) -> Result<(), EntityError> {
        self.sent = Resource::zero();
        self.next_sent = Resource::zero();
        Ok(())
    }

    fn iterate_tick(&mut self, ctx: &StepContext<'_>, duration: i64) {
        let demand = ctx
            .linked(Relation::Customer, "Social")
            .and_then(|town| town.value(DEMAND_KEY))
            .unwrap_or(0.0);
        self.next_sent = ctx
            .factory()
            .quantity(ResourceKind::Water, demand * duration as f64);
    }

    fn iterate_tock(&mut self) {
        self.sent = self.next_sent.clone();
    }

    fn storing(&self) -> Option<&dyn Storing> {
        Some(self)
    }

    fn transforming(&self) -> Option<&dyn Transforming> {
        Some(self)
    }

    fn exchanging(&self) -> Option<&dyn Exchanging> {
        Some(self)
    }

    fn snapshot(&self) -> serde_json::Value {
        serde_json::to_value(&self.sent).unwrap_or(serde_json::Value::Null)
    }

    fn restore(&mut self, value: &serde_json::Value) -> Result<(), EntityError> {
        self.sent = serde_json::from_value(value.clone())
            .map_err(|e| EntityError::Snapshot(format!("Pumping: {}", e)))?;
        self.next_sent = self.sent.clone();
        Ok(())
    }
}

impl Storing for Pumping {
    fn stored(&self, ctx: &StepContext<'_>, duration: i64) -> Resource {
        self.produced(ctx, duration).subtract(&self.sent)
    }

    fn retrieved(&self, ctx: &StepContext<'_>, duration: i64) -> Resource {
        ctx.factory()
            .quantity(ResourceKind::Aquifer, self.rate * duration as f64)
    }
}

impl Transforming for Pumping {
    fn produced(&self, ctx: &StepContext<'_>, duration: i64) -> Resource {
        ctx.factory()
            .quantity(ResourceKind::Water, self.rate * duration as f64)
    }

    fn consumed(&self, ctx: &StepContext<'_>, duration: i64) -> Resource {
        ctx.factory()
            .quantity(ResourceKind::Aquifer, self.rate * duration as f64)
    }
}

impl Exchanging for Pumping {
    fn sent_to(&self, ctx: &StepContext<'_>, peer: &ElementRecord, _duration: i64) -> Resource {
        if peer.class == "Social" {
            self.sent.clone()
        } else {
            ctx.zero()
        }
    }

    fn received_from(&self, ctx: &StepContext<'_>, _peer: &ElementRecord, _duration: i64) -> Resource {
        ctx.zero()
    }
}

// ============================================================================
// Town
// ============================================================================

/// Publishes a constant water demand and consumes whatever its supplier
/// reports sending
#[derive(Debug, Clone)]
pub struct Living {
    demand: f64,
    received: Resource,
    next_received: Resource,
}

impl Living {
    pub fn new(demand: f64) -> Self {
        Self {
            demand,
            received: Resource::zero(),
            next_received: Resource::zero(),
        }
    }
}

impl State for Living {
    fn name(&self) -> &str {
        "Living"
    }

    fn initialize(
        &mut self,
        _roster: &StateRoster<'_>,
        _initial_time: i64,
    ) -> Result<(), EntityError> {
        self.received = Resource::zero();
        self.next_received = Resource::zero();
        Ok(())
    }

    fn iterate_tick(&mut self, ctx: &StepContext<'_>, _duration: i64) {
        self.next_received = ctx
            .linked(Relation::Supplier, "Water")
            .map(|plant| plant.sent_to(&ctx.me().name))
            .unwrap_or_else(|| ctx.zero());
    }

    fn iterate_tock(&mut self) {
        self.received = self.next_received.clone();
    }

    fn transforming(&self) -> Option<&dyn Transforming> {
        Some(self)
    }

    fn exchanging(&self) -> Option<&dyn Exchanging> {
        Some(self)
    }

    fn publish(&self, _ctx: &StepContext<'_>, _duration: i64, values: &mut BTreeMap<String, f64>) {
        values.insert(DEMAND_KEY.to_string(), self.demand);
    }

    fn snapshot(&self) -> serde_json::Value {
        serde_json::to_value(&self.received).unwrap_or(serde_json::Value::Null)
    }

    fn restore(&mut self, value: &serde_json::Value) -> Result<(), EntityError> {
        self.received = serde_json::from_value(value.clone())
            .map_err(|e| EntityError::Snapshot(format!("Living: {}", e)))?;
        self.next_received = self.received.clone();
        Ok(())
    }
}

impl Transforming for Living {
    fn produced(&self, ctx: &StepContext<'_>, _duration: i64) -> Resource {
        ctx.zero()
    }

    fn consumed(&self, _ctx: &StepContext<'_>, _duration: i64) -> Resource {
        self.received.clone()
    }
}

impl Exchanging for Living {
    fn sent_to(&self, ctx: &StepContext<'_>, _peer: &ElementRecord, _duration: i64) -> Resource {
        ctx.zero()
    }

    fn received_from(&self, ctx: &StepContext<'_>, peer: &ElementRecord, _duration: i64) -> Resource {
        if peer.class == "Water" {
            self.received.clone()
        } else {
            ctx.zero()
        }
    }
}

// ============================================================================
// Dumper
// ============================================================================

/// Sends a fixed amount to every other element, wherever it is
#[derive(Debug, Clone)]
pub struct Dumping {
    amount: Resource,
}

impl Dumping {
    pub fn new(amount: Resource) -> Self {
        Self { amount }
    }
}

impl State for Dumping {
    fn name(&self) -> &str {
        "Dumping"
    }

    fn exchanging(&self) -> Option<&dyn Exchanging> {
        Some(self)
    }
}

impl Exchanging for Dumping {
    fn sent_to(&self, _ctx: &StepContext<'_>, _peer: &ElementRecord, _duration: i64) -> Resource {
        self.amount.clone()
    }

    fn received_from(&self, ctx: &StepContext<'_>, _peer: &ElementRecord, _duration: i64) -> Resource {
        ctx.zero()
    }

    fn counterparties(&self, ctx: &StepContext<'_>) -> Vec<EntityId> {
        ctx.table()
            .iter()
            .filter(|r| r.id != ctx.me().id)
            .map(|r| r.id)
            .collect()
    }
}

/// Moves the entity to `target` on its first tick
#[derive(Debug, Clone)]
pub struct Relocating {
    target: Location,
}

impl Relocating {
    pub fn new(target: Location) -> Self {
        Self { target }
    }
}

impl State for Relocating {
    fn name(&self) -> &str {
        "Relocating"
    }

    fn tick(
        &mut self,
        ctx: &StepContext<'_>,
        pending: &mut PendingChanges<'_>,
        _duration: i64,
    ) -> Result<(), EntityError> {
        if ctx.is_active() {
            pending.set_location(self.target.clone())?;
        }
        Ok(())
    }
}

// ============================================================================
// Builders
// ============================================================================

pub fn plant(name: &str, location: Location, rate: f64) -> Entity {
    let factory = ResourceFactory::default();
    Entity::builder(name, "Water", location)
        .contents(factory.from_pairs(&[(ResourceKind::Water, 100.0), (ResourceKind::Aquifer, 1000.0)]))
        .state(Pumping::new(rate))
        .requires(LinkSpec::customer("Social"))
        .build()
        .unwrap()
}

pub fn town(name: &str, location: Location, demand: f64) -> Entity {
    Entity::builder(name, "Social", location)
        .state(Living::new(demand))
        .requires(LinkSpec::supplier("Water"))
        .build()
        .unwrap()
}

pub fn tank(name: &str, location: Location, fill_rate: f64) -> Entity {
    let factory = ResourceFactory::default();
    Entity::builder(name, "Water", location)
        .contents(water(50.0))
        .state(
            FixedRateState::new("Filling")
                .with_storage(factory.quantity(ResourceKind::Water, fill_rate), factory.zero()),
        )
        .build()
        .unwrap()
}

/// Plant (rate 10) and town (demand 4) at node A
pub fn supply_scenario() -> Scenario {
    Scenario::builder("supply", 0)
        .location(site("A"))
        .entity(plant("plant", site("A"), 10.0))
        .entity(town("town", site("A"), 4.0))
        .build()
        .unwrap()
}

/// Water, electricity and petroleum facilities sharing node A, each linked to
/// the other two under a different role
pub fn utilities() -> Scenario {
    Scenario::builder("utilities", 0)
        .location(site("A"))
        .entity(
            Entity::builder("waterworks", "Water", site("A"))
                .requires(LinkSpec::supplier("Electricity"))
                .requires(LinkSpec::customer("Petrol"))
                .build()
                .unwrap(),
        )
        .entity(
            Entity::builder("substation", "Electricity", site("A"))
                .requires(LinkSpec::customer("Water"))
                .requires(LinkSpec::supplier("Petrol"))
                .build()
                .unwrap(),
        )
        .entity(
            Entity::builder("refinery", "Petrol", site("A"))
                .requires(LinkSpec::supplier("Water"))
                .requires(LinkSpec::customer("Electricity"))
                .build()
                .unwrap(),
        )
        .build()
        .unwrap()
}
