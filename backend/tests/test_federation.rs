//! Federation Tests
//!
//! Synchronization handshakes against a scripted service that delivers
//! callbacks in awkward orders, and complete runs of one and two federates
//! over the in-process coordination service.
//!
//! Critical invariants tested:
//! - A barrier completes only after this federate reported it achieved
//! - Every wait is bounded by the timeout and the cancel token
//! - Remote elements are discovered once, even when reflections come first
//! - Link resolution across federates is bounded and idempotent

mod common;

use common::{init_tracing, plant, site, supply_scenario, town, utilities, water, DEMAND_KEY};
use infra_cosim_core::federation::{
    CancelToken, CoordinationService, FederationConfig, FederationError, InMemoryRti, ObjectHandle,
    ObjectModel, ServiceError, ServiceEvent, SyncFailureReason,
};
use infra_cosim_core::models::{attribute, AttributeMap, AttributeValue, Relation, Scenario};
use infra_cosim_core::orchestrator::FederateOutcome;
use infra_cosim_core::resource::ResourceKind;
use infra_cosim_core::{
    FederateRunner, FederatedAmbassador, RecordingObserver, SimulationError, Simulator,
    SimulatorConfig,
};
use std::collections::{HashMap, VecDeque};
use std::thread;
use std::time::{Duration, Instant};

// ============================================================================
// Test Helpers
// ============================================================================

fn model() -> ObjectModel {
    ObjectModel::new("supply")
        .with_element_class("Water", &[])
        .with_element_class("Social", &[DEMAND_KEY])
}

fn federation_config(federate: &str) -> FederationConfig {
    FederationConfig::new("supply", federate, "Test")
        .with_wait_timeout(Duration::from_secs(10))
        .with_link_timeout(Duration::from_secs(5))
}

fn sim_config(duration: i64) -> SimulatorConfig {
    SimulatorConfig {
        duration,
        iterations: 2,
        ..Default::default()
    }
}

/// Service that answers registrations and achievements with scripted
/// callbacks, delivered one per pump
#[derive(Debug, Default)]
struct ScriptedService {
    queue: VecDeque<ServiceEvent>,
    on_register: Vec<ServiceEvent>,
    on_achieve: Vec<ServiceEvent>,
    objects: HashMap<ObjectHandle, (String, String)>,
    calls: Vec<String>,
}

impl ScriptedService {
    fn new(on_register: Vec<ServiceEvent>, on_achieve: Vec<ServiceEvent>) -> Self {
        Self {
            on_register,
            on_achieve,
            ..Default::default()
        }
    }
}

impl CoordinationService for ScriptedService {
    fn connect(&mut self) -> Result<(), ServiceError> {
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), ServiceError> {
        Ok(())
    }

    fn create_federation(&mut self, _federation: &str, _model: &ObjectModel) -> Result<(), ServiceError> {
        Ok(())
    }

    fn destroy_federation(&mut self, _federation: &str) -> Result<(), ServiceError> {
        Ok(())
    }

    fn join(
        &mut self,
        _federate_name: &str,
        _federate_type: &str,
        _federation: &str,
    ) -> Result<infra_cosim_core::federation::FederateHandle, ServiceError> {
        Ok(Default::default())
    }

    fn resign(&mut self) -> Result<(), ServiceError> {
        Ok(())
    }

    fn enable_time_constrained(&mut self) -> Result<(), ServiceError> {
        Ok(())
    }

    fn disable_time_constrained(&mut self) -> Result<(), ServiceError> {
        Ok(())
    }

    fn enable_time_regulation(&mut self, _lookahead: f64) -> Result<(), ServiceError> {
        Ok(())
    }

    fn disable_time_regulation(&mut self) -> Result<(), ServiceError> {
        Ok(())
    }

    fn register_sync_point(&mut self, label: &str) -> Result<(), ServiceError> {
        self.calls.push(format!("register {}", label));
        self.queue.extend(self.on_register.drain(..));
        Ok(())
    }

    fn sync_point_achieved(&mut self, label: &str) -> Result<(), ServiceError> {
        self.calls.push(format!("achieved {}", label));
        self.queue.extend(self.on_achieve.drain(..));
        Ok(())
    }

    fn time_advance_request(&mut self, _time: f64) -> Result<(), ServiceError> {
        Ok(())
    }

    fn publish_class(&mut self, _class: &str, _attributes: &[String]) -> Result<(), ServiceError> {
        Ok(())
    }

    fn subscribe_class(&mut self, _class: &str, _attributes: &[String]) -> Result<(), ServiceError> {
        Ok(())
    }

    fn register_object(&mut self, _class: &str, _name: &str) -> Result<ObjectHandle, ServiceError> {
        Ok(ObjectHandle::new())
    }

    fn update_attributes(&mut self, _handle: ObjectHandle, _attributes: AttributeMap) -> Result<(), ServiceError> {
        Ok(())
    }

    fn delete_object(&mut self, _handle: ObjectHandle) -> Result<(), ServiceError> {
        Ok(())
    }

    fn object_class(&self, handle: ObjectHandle) -> Result<String, ServiceError> {
        self.objects
            .get(&handle)
            .map(|(class, _)| class.clone())
            .ok_or(ServiceError::UnknownObject(handle))
    }

    fn object_name(&self, handle: ObjectHandle) -> Result<String, ServiceError> {
        self.objects
            .get(&handle)
            .map(|(_, name)| name.clone())
            .ok_or(ServiceError::UnknownObject(handle))
    }

    fn evoke_callbacks(&mut self, max_wait: Duration) -> Result<Vec<ServiceEvent>, ServiceError> {
        match self.queue.pop_front() {
            Some(event) => {
                self.calls.push(format!("deliver {:?}", event));
                Ok(vec![event])
            }
            None => {
                thread::sleep(max_wait);
                Ok(Vec::new())
            }
        }
    }
}

fn scripted(
    on_register: Vec<ServiceEvent>,
    on_achieve: Vec<ServiceEvent>,
    timeout: Duration,
) -> FederatedAmbassador<ScriptedService> {
    let config = FederationConfig::new("supply", "probe", "Test").with_wait_timeout(timeout);
    FederatedAmbassador::new(ScriptedService::new(on_register, on_achieve), config, model())
}

fn announced(label: &str) -> ServiceEvent {
    ServiceEvent::SyncPointAnnounced {
        label: label.to_string(),
    }
}

fn synchronized(label: &str) -> ServiceEvent {
    ServiceEvent::FederationSynchronized {
        label: label.to_string(),
    }
}

fn located(node: &str) -> AttributeMap {
    let mut attributes = AttributeMap::new();
    attributes.insert(
        attribute::LOCATION.to_string(),
        AttributeValue::Text(node.to_string()),
    );
    attributes
}

fn federate(rti: &InMemoryRti, name: &str, scenario: Scenario, recorder: &RecordingObserver) -> FederateRunner {
    init_tracing();
    let ambassador = FederatedAmbassador::new(rti.connection(), federation_config(name), model());
    let mut simulator = Simulator::new(scenario, sim_config(4), Box::new(ambassador)).unwrap();
    simulator.add_observer(recorder.clone());
    FederateRunner::new(name, simulator)
}

fn only(name: &str, entity: infra_cosim_core::Entity) -> Scenario {
    Scenario::builder(name, 0)
        .location(site("A"))
        .entity(entity)
        .build()
        .unwrap()
}

// ============================================================================
// Synchronization points
// ============================================================================

#[test]
fn test_announcement_before_registration_result() {
    let mut ambassador = scripted(
        vec![
            announced("join"),
            ServiceEvent::SyncPointRegistrationFailed {
                label: "join".to_string(),
                reason: SyncFailureReason::LabelNotUnique,
            },
        ],
        vec![synchronized("join")],
        Duration::from_secs(5),
    );

    ambassador.synchronize("join").unwrap();

    let tracker = ambassador.sync_points().get("join").unwrap();
    assert!(tracker.is_achieved());
    assert!(tracker.is_synchronized());

    // Achievement reported only after the announcement was seen
    let calls = &ambassador.service().calls;
    let announced_at = calls.iter().position(|c| c.contains("SyncPointAnnounced")).unwrap();
    let achieved_at = calls.iter().position(|c| c == "achieved join").unwrap();
    let synchronized_at = calls
        .iter()
        .position(|c| c.contains("FederationSynchronized"))
        .unwrap();
    assert!(announced_at < achieved_at);
    assert!(achieved_at < synchronized_at);
}

#[test]
fn test_early_synchronized_waits_for_own_achievement() {
    let mut ambassador = scripted(
        vec![
            synchronized("init"),
            ServiceEvent::SyncPointRegistered {
                label: "init".to_string(),
            },
            announced("init"),
        ],
        Vec::new(),
        Duration::from_secs(5),
    );

    ambassador.synchronize("init").unwrap();
    assert!(ambassador
        .service()
        .calls
        .iter()
        .any(|c| c == "achieved init"));
    assert!(ambassador.sync_points().is_complete("init"));
}

#[test]
fn test_registration_failure_is_fatal() {
    let mut ambassador = scripted(
        vec![ServiceEvent::SyncPointRegistrationFailed {
            label: "join".to_string(),
            reason: SyncFailureReason::Other("federation is saving".to_string()),
        }],
        Vec::new(),
        Duration::from_secs(5),
    );

    let err = ambassador.synchronize("join").unwrap_err();
    assert!(matches!(
        err,
        FederationError::SyncRegistrationFailed { ref label, .. } if label == "join"
    ));
    assert!(!ambassador.service().calls.iter().any(|c| c.starts_with("achieved")));
}

#[test]
fn test_missing_synchronization_times_out() {
    let mut ambassador = scripted(
        vec![
            ServiceEvent::SyncPointRegistered {
                label: "join".to_string(),
            },
            announced("join"),
        ],
        Vec::new(),
        Duration::from_millis(50),
    );

    let started = Instant::now();
    let err = ambassador.synchronize("join").unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(5));
    match err {
        FederationError::Timeout { waiting_for, elapsed } => {
            assert_eq!(waiting_for, "sync point join");
            assert!(elapsed >= Duration::from_millis(50));
        }
        other => panic!("expected timeout, got {other:?}"),
    }
}

#[test]
fn test_cancelled_wait_returns_promptly() {
    let cancel = CancelToken::new();
    let mut ambassador = scripted(Vec::new(), Vec::new(), Duration::from_secs(30))
        .with_cancel_token(cancel.clone());

    let canceller = {
        let cancel = cancel.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            cancel.cancel();
        })
    };

    let started = Instant::now();
    let err = ambassador.synchronize("join").unwrap_err();
    canceller.join().unwrap();

    assert!(matches!(err, FederationError::Cancelled { .. }));
    assert!(started.elapsed() < Duration::from_secs(5));
}

// ============================================================================
// Discovery
// ============================================================================

#[test]
fn test_reflection_before_discovery_is_not_lost() {
    let handle = ObjectHandle::new();
    // The service knows the object, but its discovery callback is late
    let mut service = ScriptedService::default();
    service
        .objects
        .insert(handle, ("Social".to_string(), "town".to_string()));
    let mut ambassador =
        FederatedAmbassador::new(service, FederationConfig::new("supply", "probe", "Test"), model());

    ambassador.handle_event(ServiceEvent::AttributesReflected {
        handle,
        attributes: located("A"),
    });
    assert_eq!(ambassador.directory().len(), 1);
    let remote = ambassador.directory().get(handle).unwrap();
    assert_eq!(remote.name(), "town");
    assert_eq!(remote.location(), Some(&site("A")));

    // The late discovery is a duplicate
    ambassador.handle_event(ServiceEvent::ObjectDiscovered {
        handle,
        class: "Social".to_string(),
        name: "town".to_string(),
    });
    assert_eq!(ambassador.directory().len(), 1);

    ambassador.handle_event(ServiceEvent::ObjectRemoved { handle });
    assert!(ambassador.directory().is_empty());
}

#[test]
fn test_discovery_is_idempotent_and_filtered_by_model() {
    let mut ambassador = scripted(Vec::new(), Vec::new(), Duration::from_secs(1));
    let handle = ObjectHandle::new();
    for _ in 0..3 {
        ambassador.handle_event(ServiceEvent::ObjectDiscovered {
            handle,
            class: "Water".to_string(),
            name: "plant".to_string(),
        });
    }
    ambassador.handle_event(ServiceEvent::ObjectDiscovered {
        handle: ObjectHandle::new(),
        class: "Petroleum".to_string(),
        name: "refinery".to_string(),
    });
    assert_eq!(ambassador.directory().len(), 1);

    // Unknown to both the directory and the service: dropped
    ambassador.handle_event(ServiceEvent::AttributesReflected {
        handle: ObjectHandle::new(),
        attributes: located("A"),
    });
    assert_eq!(ambassador.directory().len(), 1);

    // No location yet, so not part of the element table
    assert!(ambassador.directory().records().is_empty());
}

// ============================================================================
// Federated runs
// ============================================================================

#[test]
fn test_single_federate_matches_standalone() {
    let mut standalone = Simulator::standalone(supply_scenario(), sim_config(4)).unwrap();
    standalone.initialize().unwrap();
    standalone.run().unwrap();

    let rti = InMemoryRti::new();
    let recorder = RecordingObserver::new();
    let runner = federate(&rti, "solo", supply_scenario(), &recorder);
    let FederateOutcome { summary, simulator } = runner.run().unwrap();

    assert_eq!(summary.federate, "solo");
    assert_eq!(summary.steps, 5);
    assert_eq!(summary.final_time, 5);
    for name in ["plant", "town"] {
        assert_eq!(
            simulator.scenario().entity_by_name(name).unwrap().contents(),
            standalone.scenario().entity_by_name(name).unwrap().contents(),
        );
    }
    assert!(!rti.federation_exists("supply"));
}

#[test]
fn test_two_federates_exchange_through_mirrors() {
    let rti = InMemoryRti::expecting(2);
    let plant_rows = RecordingObserver::new();
    let town_rows = RecordingObserver::new();

    let plant_runner = federate(&rti, "waterworks", only("plant-side", plant("plant", site("A"), 10.0)), &plant_rows);
    let town_runner = federate(&rti, "city", only("town-side", town("town", site("A"), 4.0)), &town_rows);

    let plant_handle = plant_runner.spawn().unwrap();
    let town_handle = town_runner.spawn().unwrap();
    let plant_outcome = plant_handle.join().unwrap().unwrap();
    let town_outcome = town_handle.join().unwrap().unwrap();

    assert_eq!(plant_outcome.summary.steps, 5);
    assert_eq!(town_outcome.summary.steps, 5);

    // Links point at the mirrored peers
    let plant_entity = plant_outcome.simulator.scenario().entity_by_name("plant").unwrap();
    assert!(plant_entity.links().get(Relation::Customer, "Social").is_some());
    let town_entity = town_outcome.simulator.scenario().entity_by_name("town").unwrap();
    assert!(town_entity.links().get(Relation::Supplier, "Water").is_some());

    // The demand reaches the plant within the first step. The plant's ledger
    // may reach the town one step later, depending on thread timing.
    let plant_sent: Vec<_> = plant_rows.rows().into_iter().map(|r| r.sent).collect();
    assert_eq!(plant_sent, vec![Some(water(4.0)); 5]);
    let town_received: Vec<_> = town_rows.rows().into_iter().map(|r| r.received).collect();
    assert_eq!(town_received.len(), 5);
    assert!(town_received[1..].iter().all(|r| r == &Some(water(4.0))));

    // 5 steps: +10 pumped, -4 sent
    assert_eq!(plant_entity.contents().quantity(ResourceKind::Water), 130.0);
    assert!(!rti.federation_exists("supply"));
}

#[test]
fn test_missing_partner_bounded_by_link_timeout() {
    let rti = InMemoryRti::new();
    let config = FederationConfig::new("lonely", "waterworks", "Test")
        .with_wait_timeout(Duration::from_secs(10))
        .with_link_timeout(Duration::from_millis(100));
    let ambassador = FederatedAmbassador::new(rti.connection(), config, model());
    let simulator = Simulator::new(
        only("plant-only", plant("plant", site("A"), 10.0)),
        sim_config(1),
        Box::new(ambassador),
    )
    .unwrap();

    let started = Instant::now();
    let outcome = FederateRunner::new("waterworks", simulator).run().unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(outcome.summary.initialization >= Duration::from_millis(100));

    // Runs without a customer: nothing sent, everything stored
    let plant_entity = outcome.simulator.scenario().entity_by_name("plant").unwrap();
    assert_eq!(plant_entity.links().missing().len(), 1);
    assert_eq!(plant_entity.contents().quantity(ResourceKind::Water), 120.0);
}

#[test]
fn test_local_roles_resolve_within_link_timeout() {
    let rti = InMemoryRti::new();
    let link_timeout = Duration::from_secs(5);
    let config = FederationConfig::new("utilities", "works", "Test")
        .with_wait_timeout(Duration::from_secs(10))
        .with_link_timeout(link_timeout);
    let utility_model = ObjectModel::new("utilities")
        .with_element_class("Water", &[])
        .with_element_class("Electricity", &[])
        .with_element_class("Petrol", &[]);
    let ambassador = FederatedAmbassador::new(rti.connection(), config, utility_model);
    let simulator = Simulator::new(utilities(), sim_config(1), Box::new(ambassador)).unwrap();

    let outcome = FederateRunner::new("works", simulator).run().unwrap();
    assert!(outcome.summary.initialization < link_timeout);
    for entity in outcome.simulator.scenario().entities() {
        assert!(entity.links().is_complete(), "{} has missing links", entity.name());
        assert_eq!(entity.links().len(), 2);
    }
}

#[test]
fn test_cancel_before_initialize() {
    let rti = InMemoryRti::new();
    let cancel = CancelToken::new();
    cancel.cancel();
    let ambassador = FederatedAmbassador::new(rti.connection(), federation_config("quitter"), model())
        .with_cancel_token(cancel);
    let mut simulator = Simulator::new(supply_scenario(), sim_config(1), Box::new(ambassador)).unwrap();

    simulator.connect().unwrap();
    let err = simulator.initialize().unwrap_err();
    assert!(matches!(
        err,
        SimulationError::Federation(FederationError::Cancelled { .. })
    ));
    simulator.disconnect().unwrap();
    assert!(!rti.federation_exists("supply"));
}

// ============================================================================
// Configuration
// ============================================================================

#[test]
fn test_federate_config_from_json() {
    let config = FederationConfig::from_json_str(
        r#"{
            "federation_name": "grid",
            "federate_name": "city",
            "federate_type": "Social",
            "wait_timeout_ms": 2500
        }"#,
    )
    .unwrap();
    assert_eq!(config.poll_interval(), Duration::from_millis(5));
    assert_eq!(config.wait_timeout(), Some(Duration::from_millis(2500)));
    assert_eq!(config.link_timeout(), Duration::from_millis(5000));

    let err = FederationConfig::from_json_str(
        r#"{ "federation_name": "", "federate_name": "a", "federate_type": "b" }"#,
    )
    .unwrap_err();
    assert!(matches!(err, FederationError::Config(_)));
}

#[test]
fn test_object_model_from_json() {
    let model = ObjectModel::from_json_str(
        r#"{
            "name": "grid",
            "classes": {
                "Water": { "attributes": ["Name", "Location", "SentTo"] },
                "Social": { "attributes": ["Name", "Location", "WaterDemand"] }
            }
        }"#,
    )
    .unwrap();
    assert!(model.contains("Water"));
    assert!(model.declares("Social", DEMAND_KEY));
    assert!(!model.declares("Water", DEMAND_KEY));
    assert!(ObjectModel::from_json_str("[]").is_err());
}
