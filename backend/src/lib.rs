//! Infrastructure Co-Simulation Core - Rust Engine
//!
//! Discrete-time co-simulation of coupled infrastructure systems (water,
//! energy, petroleum, social) that exchange resources across locations.
//!
//! # Architecture
//!
//! - **core**: Simulation clock
//! - **resource**: Six-component resource vectors, matrices and the numeric
//!   backend factory
//! - **models**: Locations, entities, states, element records, scenarios and
//!   the event log
//! - **states**: Reusable built-in states
//! - **orchestrator**: Main step loop, observers, conservation checks,
//!   checkpoints and the federate runner
//! - **federation**: Ambassadors, the coordination service boundary and an
//!   in-process service
//!
//! # Critical Invariants
//!
//! 1. Entities only observe each other's committed values, so tick order
//!    never changes results
//! 2. Resource quantities within 1e-12 of each other are equal
//! 3. Every blocking wait on the coordination service is bounded and
//!    cancellable

// Module declarations
pub mod core;
pub mod federation;
pub mod models;
pub mod orchestrator;
pub mod resource;
pub mod states;

// Re-exports for convenience
pub use crate::core::time::SimulationClock;
pub use federation::{
    Ambassador, CoordinationService, FederatedAmbassador, FederationConfig, FederationError,
    InMemoryRti, NullAmbassador, ObjectModel,
};
pub use models::{
    ElementRecord, ElementTable, Entity, EntityError, EntityId, Event, EventLog, LinkSpec,
    Location, Node, Scenario, ScenarioError, State, StepContext,
};
pub use orchestrator::{
    FederateRunner, RecordingObserver, RunSummary, SimulationError, SimulationPhase, Simulator,
    SimulatorConfig, StepEvent, StepObserver,
};
pub use resource::{NumericBackend, Resource, ResourceError, ResourceFactory, ResourceKind, ResourceMatrix};
