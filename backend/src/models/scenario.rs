//! Scenario: the static configuration of one simulation run
//!
//! A scenario bundles a name, an initial time, the set of locations and the
//! entities placed on them. It is assembled once with [`ScenarioBuilder`];
//! afterwards only the simulator touches the entities' runtime buffers.

use crate::models::element::EntityId;
use crate::models::entity::Entity;
use crate::models::location::{Location, LocationError};
use crate::resource::ResourceFactory;
use serde::Serialize;
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ScenarioError {
    #[error("Duplicate entity name: {0}")]
    DuplicateEntity(String),

    #[error("Entity {entity} references unknown parent {parent}")]
    UnknownParent { entity: String, parent: EntityId },

    #[error("Entity {entity} is placed at undeclared location {location}")]
    UnknownLocation { entity: String, location: String },

    #[error("Scenario {0} has no entities")]
    Empty(String),

    #[error("Invalid location: {0}")]
    InvalidLocation(#[from] LocationError),
}

/// Immutable bundle of locations and entities plus an initial time
#[derive(Debug)]
pub struct Scenario {
    name: String,
    initial_time: i64,
    factory: ResourceFactory,
    locations: Vec<Location>,
    entities: Vec<Entity>,
}

/// Structural outline used for config hashing
#[derive(Debug, Serialize)]
pub(crate) struct ScenarioOutline<'a> {
    name: &'a str,
    initial_time: i64,
    locations: Vec<String>,
    entities: Vec<EntityOutline<'a>>,
}

#[derive(Debug, Serialize)]
struct EntityOutline<'a> {
    name: &'a str,
    class: &'a str,
    location: String,
    parent: Option<EntityId>,
    states: &'a [String],
}

impl Scenario {
    pub fn builder(name: impl Into<String>, initial_time: i64) -> ScenarioBuilder {
        ScenarioBuilder {
            name: name.into(),
            initial_time,
            factory: ResourceFactory::default(),
            locations: Vec::new(),
            entities: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn initial_time(&self) -> i64 {
        self.initial_time
    }

    pub fn factory(&self) -> ResourceFactory {
        self.factory
    }

    pub fn locations(&self) -> &[Location] {
        &self.locations
    }

    pub fn static_locations(&self) -> impl Iterator<Item = &Location> {
        self.locations.iter().filter(|l| l.is_static())
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(id.0)
    }

    pub fn entity_by_name(&self, name: &str) -> Option<&Entity> {
        self.entities.iter().find(|e| e.name() == name)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub(crate) fn entities_mut(&mut self) -> &mut [Entity] {
        &mut self.entities
    }

    /// Take the entity table, dropping the rest of the scenario
    pub fn into_entities(self) -> Vec<Entity> {
        self.entities
    }

    pub(crate) fn outline(&self) -> ScenarioOutline<'_> {
        ScenarioOutline {
            name: &self.name,
            initial_time: self.initial_time,
            locations: self.locations.iter().map(|l| l.to_string()).collect(),
            entities: self
                .entities
                .iter()
                .map(|e| EntityOutline {
                    name: e.name(),
                    class: e.class(),
                    location: e.own_location().to_string(),
                    parent: e.parent(),
                    states: e.state_names(),
                })
                .collect(),
        }
    }
}

impl std::fmt::Display for Scenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Builder for [`Scenario`]
#[derive(Debug)]
pub struct ScenarioBuilder {
    name: String,
    initial_time: i64,
    factory: ResourceFactory,
    locations: Vec<Location>,
    entities: Vec<Entity>,
}

impl ScenarioBuilder {
    /// Numeric backend of the run; applied to every entity on build
    pub fn factory(mut self, factory: ResourceFactory) -> Self {
        self.factory = factory;
        self
    }

    pub fn location(mut self, location: Location) -> Self {
        if !self.locations.contains(&location) {
            self.locations.push(location);
        }
        self
    }

    pub fn locations(mut self, locations: impl IntoIterator<Item = Location>) -> Self {
        for location in locations {
            self = self.location(location);
        }
        self
    }

    /// Id the next added entity will receive
    pub fn next_id(&self) -> EntityId {
        EntityId(self.entities.len())
    }

    /// Add an entity and return its id
    pub fn add_entity(&mut self, mut entity: Entity) -> EntityId {
        let id = self.next_id();
        entity.assign_id(id);
        self.entities.push(entity);
        id
    }

    pub fn entity(mut self, entity: Entity) -> Self {
        self.add_entity(entity);
        self
    }

    pub fn build(mut self) -> Result<Scenario, ScenarioError> {
        if self.entities.is_empty() {
            return Err(ScenarioError::Empty(self.name));
        }
        for location in &self.locations {
            location.validate()?;
        }
        let mut names = HashSet::new();
        for entity in &self.entities {
            if !names.insert(entity.name()) {
                return Err(ScenarioError::DuplicateEntity(entity.name().to_string()));
            }
            if let Some(parent) = entity.parent() {
                if parent.0 >= self.entities.len() || parent == entity.id() {
                    return Err(ScenarioError::UnknownParent {
                        entity: entity.name().to_string(),
                        parent,
                    });
                }
            }
            if !self.locations.contains(entity.own_location()) {
                return Err(ScenarioError::UnknownLocation {
                    entity: entity.name().to_string(),
                    location: entity.own_location().to_string(),
                });
            }
        }
        for entity in self.entities.iter_mut() {
            entity.set_factory(self.factory);
        }
        Ok(Scenario {
            name: self.name,
            initial_time: self.initial_time,
            factory: self.factory,
            locations: self.locations,
            entities: self.entities,
        })
    }
}
