//! Domain models for the co-simulation engine

pub mod element;
pub mod entity;
pub mod event;
pub mod links;
pub mod location;
pub mod scenario;
pub mod state;

// Re-exports
pub use element::{attribute, AttributeMap, AttributeValue, ElementRecord, ElementTable, EntityId};
pub use entity::{
    Entity, EntityBuffer, EntityBuilder, EntityError, EntityReport, PendingChanges, StateChange,
};
pub use event::{Event, EventLog};
pub use links::{LinkSpec, Links, Relation};
pub use location::{Location, LocationError, Node};
pub use scenario::{Scenario, ScenarioBuilder, ScenarioError};
pub use state::{
    validate_exchanges, Capability, Exchanging, State, StateRoster, StepContext, Storing,
    Transforming, Transporting,
};
