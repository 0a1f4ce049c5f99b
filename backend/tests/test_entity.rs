//! Tests for the entity step protocol
//!
//! Tick computes pending values from committed records only; tock commits
//! them. Contract violations surface as `EntityError`.

mod common;

use common::{site, tank, utilities, water, Dumping, Relocating};
use infra_cosim_core::federation::linking::resolve_all;
use infra_cosim_core::models::{
    ElementTable, Entity, EntityError, EntityId, LinkSpec, Location, LocationError, Node, Relation,
    Scenario, ScenarioError,
};
use infra_cosim_core::resource::{ResourceFactory, ResourceKind};
use infra_cosim_core::states::{FixedRateState, ScheduledTransition};
use infra_cosim_core::{SimulationError, Simulator, SimulatorConfig};

// ============================================================================
// Test Helpers
// ============================================================================

fn well() -> Entity {
    let factory = ResourceFactory::default();
    Entity::builder("well", "Water", site("A"))
        .contents(water(200.0))
        .state(FixedRateState::new("Pumping").with_storage(
            factory.quantity(ResourceKind::Water, 10.0),
            factory.quantity(ResourceKind::Aquifer, 5.0),
        ))
        .build()
        .unwrap()
}

fn table(entities: &[Entity]) -> ElementTable {
    ElementTable::assemble(entities, Vec::new(), 1)
}

fn one_step(scenario: Scenario) -> Result<(), SimulationError> {
    let mut simulator = Simulator::standalone(scenario, SimulatorConfig::default())?;
    simulator.initialize()?;
    simulator.step()?;
    Ok(())
}

// ============================================================================
// Tick / tock
// ============================================================================

#[test]
fn test_tick_then_tock_commits_storage() {
    let mut entities = vec![well()];
    entities[0].initialize(0).unwrap();

    let t = table(&entities);
    entities[0].tick(&t, 1).unwrap();

    // Committed value unchanged until tock
    assert_eq!(entities[0].contents(), &water(200.0));
    let pending = entities[0].pending_contents().clone();
    assert_eq!(pending.quantity(ResourceKind::Water), 210.0);
    assert_eq!(pending.quantity(ResourceKind::Aquifer), -5.0);

    assert!(entities[0].tock().is_none());
    assert_eq!(entities[0].contents(), &pending);
    assert_eq!(entities[0].pending_contents(), &pending);
}

#[test]
fn test_second_tick_before_tock_is_idempotent() {
    let mut entities = vec![well()];
    entities[0].initialize(0).unwrap();

    let t = table(&entities);
    entities[0].tick(&t, 1).unwrap();
    let first = entities[0].pending().clone();
    entities[0].tick(&t, 1).unwrap();

    assert_eq!(entities[0].pending(), &first);
}

#[test]
fn test_initialize_resets_to_initial_values() {
    let mut entities = vec![well()];
    entities[0].initialize(0).unwrap();
    for _ in 0..3 {
        let t = table(&entities);
        entities[0].tick(&t, 1).unwrap();
        entities[0].tock();
    }
    assert_eq!(entities[0].contents().quantity(ResourceKind::Water), 230.0);

    entities[0].initialize(0).unwrap();
    assert_eq!(entities[0].contents(), &water(200.0));
    assert_eq!(entities[0].committed(), entities[0].pending());
}

#[test]
fn test_tick_without_table_record_fails() {
    let mut e = well();
    e.initialize(0).unwrap();
    let err = e.tick(&ElementTable::default(), 1).unwrap_err();
    assert!(matches!(err, EntityError::NotInitialized(name) if name == "well"));
}

#[test]
fn test_entity_without_state_does_nothing() {
    let mut entities = vec![Entity::builder("rock", "Water", site("A"))
        .contents(water(1.0))
        .build()
        .unwrap()];
    entities[0].initialize(0).unwrap();
    assert_eq!(entities[0].current_state(), None);

    let t = table(&entities);
    entities[0].tick(&t, 1).unwrap();
    entities[0].tock();
    assert_eq!(entities[0].contents(), &water(1.0));
    assert!(entities[0].net_flow(&t, &site("A"), 1).is_zero());
}

#[test]
fn test_report_reflects_capabilities() {
    let mut entities = vec![well()];
    entities[0].initialize(0).unwrap();
    let t = table(&entities);

    let report = entities[0].report(&t, 0, 1);
    assert_eq!(report.name, "well");
    assert_eq!(report.state.as_deref(), Some("Pumping"));
    assert_eq!(report.contents, water(200.0));
    // Storage only: no transformation, transport or exchange quantities
    assert!(report.produced.is_none());
    assert!(report.input.is_none());
    assert!(report.sent.is_none());
}

// ============================================================================
// Builder validation
// ============================================================================

#[test]
fn test_duplicate_state_names_rejected() {
    let result = Entity::builder("twice", "Water", site("A"))
        .state(FixedRateState::new("Idle"))
        .state(FixedRateState::new("Idle"))
        .build();
    assert!(matches!(result, Err(EntityError::InvalidTransition { .. })));
}

#[test]
fn test_unknown_initial_state_rejected() {
    let result = Entity::builder("lost", "Water", site("A"))
        .state(FixedRateState::new("Idle"))
        .initial_state("Running")
        .build();
    assert!(matches!(result, Err(EntityError::UnknownState { .. })));
}

#[test]
fn test_scenario_rejects_node_names_with_separator() {
    let result = Scenario::builder("hyphen", 0)
        .location(site("north-east"))
        .entity(tank("tank", site("north-east"), 1.0))
        .build();
    assert!(matches!(
        result,
        Err(ScenarioError::InvalidLocation(LocationError::InvalidNode(ref name))) if name == "north-east"
    ));
}

#[test]
fn test_scheduled_transition_to_missing_state_fails_initialize() {
    let mut e = Entity::builder("timer", "Water", site("A"))
        .state(ScheduledTransition::new("Waiting", "Missing", 3))
        .build()
        .unwrap();
    let err = e.initialize(0).unwrap_err();
    assert_eq!(
        err,
        EntityError::UnknownState {
            entity: "timer".to_string(),
            state: "Missing".to_string()
        }
    );
}

// ============================================================================
// Invalid transitions and exchanges
// ============================================================================

#[test]
fn test_set_location_while_parented_fails() {
    let mut builder = Scenario::builder("carried", 0)
        .location(site("A"))
        .location(site("B"));
    let truck = builder.add_entity(tank("truck", site("A"), 0.0));
    builder.add_entity(
        Entity::builder("crate", "Water", site("A"))
            .state(Relocating::new(site("B")))
            .parent(truck)
            .build()
            .unwrap(),
    );
    let scenario = builder.build().unwrap();

    let err = one_step(scenario).unwrap_err();
    assert!(matches!(
        err,
        SimulationError::Entity(EntityError::InvalidTransition { ref entity, .. }) if entity == "crate"
    ));
}

#[test]
fn test_child_follows_parent_location() {
    let mut builder = Scenario::builder("carried", 0).location(site("A"));
    let truck = builder.add_entity(tank("truck", site("A"), 0.0));
    builder.add_entity(
        Entity::builder("crate", "Water", site("A"))
            .parent(truck)
            .build()
            .unwrap(),
    );
    let scenario = builder.build().unwrap();

    let t = ElementTable::assemble(scenario.entities(), Vec::new(), 1);
    let record = t.by_name("crate").unwrap();
    assert_eq!(record.parent, Some(EntityId(0)));
    assert_eq!(record.location, site("A"));
}

#[test]
fn test_relocation_commits_at_tock() {
    let scenario = Scenario::builder("moving", 0)
        .location(site("A"))
        .location(site("B"))
        .entity(
            Entity::builder("van", "Social", site("A"))
                .state(Relocating::new(site("B")))
                .build()
                .unwrap(),
        )
        .build()
        .unwrap();

    let mut simulator = Simulator::standalone(scenario, SimulatorConfig::default()).unwrap();
    simulator.initialize().unwrap();
    simulator.step().unwrap();

    let van = simulator.scenario().entity_by_name("van").unwrap();
    assert_eq!(van.own_location(), &site("B"));
}

#[test]
fn test_exchange_with_wrong_origin_rejected() {
    let route = Location::new(Node::new("A"), Node::new("B"));
    let scenario = Scenario::builder("mismatch", 0)
        .location(site("A"))
        .location(route.clone())
        .entity(
            Entity::builder("pipe", "Water", route)
                .state(Dumping::new(water(1.0)))
                .build()
                .unwrap(),
        )
        .entity(tank("tank", site("A"), 0.0))
        .build()
        .unwrap();

    let err = one_step(scenario).unwrap_err();
    match err {
        SimulationError::Entity(EntityError::ExchangeMismatch { entity, peer, .. }) => {
            assert_eq!(entity, "pipe");
            assert_eq!(peer, "tank");
        }
        other => panic!("expected exchange mismatch, got {other:?}"),
    }
}

#[test]
fn test_exchange_at_shared_node_accepted() {
    let scenario = Scenario::builder("ok", 0)
        .location(site("A"))
        .entity(
            Entity::builder("hose", "Water", site("A"))
                .state(Dumping::new(water(1.0)))
                .build()
                .unwrap(),
        )
        .entity(tank("tank", site("A"), 0.0))
        .build()
        .unwrap();

    assert!(one_step(scenario).is_ok());
}

// ============================================================================
// Links
// ============================================================================

#[test]
fn test_links_resolved_at_initialize() {
    let mut simulator =
        Simulator::standalone(common::supply_scenario(), SimulatorConfig::default()).unwrap();
    simulator.initialize().unwrap();

    let plant = simulator.scenario().entity_by_name("plant").unwrap();
    let town = simulator.scenario().entity_by_name("town").unwrap();
    assert!(plant.links().is_complete());
    assert_eq!(plant.links().get(Relation::Customer, "Social"), Some(town.id()));
    assert_eq!(town.links().get(Relation::Supplier, "Water"), Some(plant.id()));
}

#[test]
fn test_link_partner_must_share_location() {
    let scenario = Scenario::builder("apart", 0)
        .location(site("A"))
        .location(site("B"))
        .entity(common::plant("plant", site("A"), 10.0))
        .entity(common::town("town", site("B"), 4.0))
        .build()
        .unwrap();

    let mut simulator = Simulator::standalone(scenario, SimulatorConfig::default()).unwrap();
    simulator.initialize().unwrap();

    let plant = simulator.scenario().entity_by_name("plant").unwrap();
    assert_eq!(plant.links().missing(), vec![&LinkSpec::customer("Social")]);
}

#[test]
fn test_three_roles_resolved_at_one_location() {
    let mut simulator = Simulator::standalone(utilities(), SimulatorConfig::default()).unwrap();
    simulator.initialize().unwrap();

    let scenario = simulator.scenario();
    let id = |name: &str| scenario.entity_by_name(name).unwrap().id();
    let water = scenario.entity_by_name("waterworks").unwrap().links();
    let power = scenario.entity_by_name("substation").unwrap().links();
    let petrol = scenario.entity_by_name("refinery").unwrap().links();

    for links in [water, power, petrol] {
        assert!(links.is_complete());
        assert_eq!(links.len(), 2);
    }
    assert_eq!(water.get(Relation::Supplier, "Electricity"), Some(id("substation")));
    assert_eq!(water.get(Relation::Customer, "Petrol"), Some(id("refinery")));
    assert_eq!(power.get(Relation::Customer, "Water"), Some(id("waterworks")));
    assert_eq!(power.get(Relation::Supplier, "Petrol"), Some(id("refinery")));
    assert_eq!(petrol.get(Relation::Supplier, "Water"), Some(id("waterworks")));
    assert_eq!(petrol.get(Relation::Customer, "Electricity"), Some(id("substation")));
}

#[test]
fn test_link_resolution_is_idempotent() {
    let mut entities = utilities().into_entities();
    for entity in entities.iter_mut() {
        entity.initialize(0).unwrap();
    }
    let table = ElementTable::assemble(&entities, Vec::new(), 1);

    assert_eq!(resolve_all(&mut entities, &table), 0);
    let first: Vec<Vec<_>> = entities
        .iter()
        .map(|e| e.links().resolved().map(|(spec, id)| (spec.clone(), id)).collect())
        .collect();

    assert_eq!(resolve_all(&mut entities, &table), 0);
    for (entity, before) in entities.iter().zip(&first) {
        assert_eq!(entity.links().len(), 2);
        let after: Vec<_> = entity.links().resolved().map(|(spec, id)| (spec.clone(), id)).collect();
        assert_eq!(&after, before);
    }
}
