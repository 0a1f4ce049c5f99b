//! Committed views of elements
//!
//! States never see another entity directly. During a step every entity, local
//! or mirrored from another federate, is visible only as an [`ElementRecord`]
//! built from *committed* buffers, and the full set of records for a round is
//! an [`ElementTable`]. Pending values cannot leak between entities because
//! they are never copied into a record.
//!
//! The same record shape is what a federate pushes to the coordination service
//! as object attributes, so local and remote peers are read identically.

use crate::models::entity::Entity;
use crate::models::location::Location;
use crate::resource::Resource;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Index of an element in the table of a scenario run.
///
/// Local entities use their scenario position; mirrored remote elements are
/// numbered after the last local entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub usize);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Attribute names exchanged with the coordination service
pub mod attribute {
    pub const NAME: &str = "Name";
    pub const LOCATION: &str = "Location";
    pub const STATE: &str = "State";
    pub const CONTENTS: &str = "Contents";
    pub const SENT_TO: &str = "SentTo";
    pub const RECEIVED_FROM: &str = "ReceivedFrom";

    /// Pushed once after the init barrier
    pub const STATIC: [&str; 2] = [NAME, LOCATION];

    pub fn is_static(name: &str) -> bool {
        STATIC.contains(&name)
    }
}

/// In-process representation of one attribute value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum AttributeValue {
    Text(String),
    Number(f64),
    Quantity(Resource),
    /// Per-peer resource amounts keyed by peer name
    Ledger(BTreeMap<String, Resource>),
}

pub type AttributeMap = BTreeMap<String, AttributeValue>;

/// Read-only committed view of an element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementRecord {
    pub id: EntityId,
    pub name: String,
    pub class: String,
    /// Effective location (delegated to the parent for nested entities)
    pub location: Location,
    pub parent: Option<EntityId>,
    pub state: Option<String>,
    pub contents: Resource,
    /// Amount sent to each peer this step, keyed by peer name
    pub sent: BTreeMap<String, Resource>,
    /// Amount received from each peer this step, keyed by peer name
    pub received: BTreeMap<String, Resource>,
    /// Additional values published by the current state
    pub values: BTreeMap<String, f64>,
    pub local: bool,
}

impl ElementRecord {
    pub fn new(id: EntityId, name: impl Into<String>, class: impl Into<String>, location: Location) -> Self {
        Self {
            id,
            name: name.into(),
            class: class.into(),
            location,
            parent: None,
            state: None,
            contents: Resource::zero(),
            sent: BTreeMap::new(),
            received: BTreeMap::new(),
            values: BTreeMap::new(),
            local: true,
        }
    }

    pub fn sent_to(&self, peer: &str) -> Resource {
        self.sent.get(peer).cloned().unwrap_or_default()
    }

    pub fn received_from(&self, peer: &str) -> Resource {
        self.received.get(peer).cloned().unwrap_or_default()
    }

    /// What this element sends to `peer` minus what it receives from it
    pub fn net_exchange(&self, peer: &str) -> Resource {
        self.sent_to(peer).subtract(&self.received_from(peer))
    }

    pub fn total_sent(&self) -> Resource {
        self.sent.values().sum()
    }

    pub fn total_received(&self) -> Resource {
        self.received.values().sum()
    }

    pub fn value(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }

    /// Full attribute set of this record
    pub fn attributes(&self) -> AttributeMap {
        let mut map = AttributeMap::new();
        map.insert(attribute::NAME.to_string(), AttributeValue::Text(self.name.clone()));
        map.insert(
            attribute::LOCATION.to_string(),
            AttributeValue::Text(self.location.to_string()),
        );
        if let Some(state) = &self.state {
            map.insert(attribute::STATE.to_string(), AttributeValue::Text(state.clone()));
        }
        map.insert(
            attribute::CONTENTS.to_string(),
            AttributeValue::Quantity(self.contents.clone()),
        );
        map.insert(attribute::SENT_TO.to_string(), AttributeValue::Ledger(self.sent.clone()));
        map.insert(
            attribute::RECEIVED_FROM.to_string(),
            AttributeValue::Ledger(self.received.clone()),
        );
        for (key, value) in &self.values {
            map.insert(key.clone(), AttributeValue::Number(*value));
        }
        map
    }
}

/// Records of every element visible in one round, indexed by id and name
#[derive(Debug, Clone, Default)]
pub struct ElementTable {
    records: Vec<ElementRecord>,
    by_id: HashMap<EntityId, usize>,
    by_name: HashMap<String, usize>,
}

impl ElementTable {
    pub fn new(records: Vec<ElementRecord>) -> Self {
        let by_id = records.iter().enumerate().map(|(i, r)| (r.id, i)).collect();
        let by_name = records
            .iter()
            .enumerate()
            .map(|(i, r)| (r.name.clone(), i))
            .collect();
        Self {
            records,
            by_id,
            by_name,
        }
    }

    /// Build the table for a round from committed local buffers plus any
    /// mirrored remote records.
    ///
    /// Two passes: the first resolves names, classes and effective locations;
    /// the second lets each entity's current state report its exchanges and
    /// published values against that base view.
    pub fn assemble(
        entities: &[Entity],
        remotes: impl IntoIterator<Item = ElementRecord>,
        duration: i64,
    ) -> Self {
        let mut records: Vec<ElementRecord> = entities
            .iter()
            .map(|entity| entity.base_record(resolve_location(entities, entity)))
            .collect();
        records.extend(remotes.into_iter().map(|mut r| {
            r.local = false;
            r
        }));

        let base = ElementTable::new(records);
        let publications: Vec<_> = entities
            .iter()
            .map(|entity| entity.publication(&base, duration))
            .collect();

        let mut records = base.records;
        for (record, publication) in records.iter_mut().zip(publications) {
            if let Some(publication) = publication {
                record.sent = publication.sent;
                record.received = publication.received;
                record.values = publication.values;
            }
        }
        ElementTable::new(records)
    }

    pub fn get(&self, id: EntityId) -> Option<&ElementRecord> {
        self.by_id.get(&id).map(|i| &self.records[*i])
    }

    pub fn by_name(&self, name: &str) -> Option<&ElementRecord> {
        self.by_name.get(name).map(|i| &self.records[*i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &ElementRecord> {
        self.records.iter()
    }

    pub fn locals(&self) -> impl Iterator<Item = &ElementRecord> {
        self.records.iter().filter(|r| r.local)
    }

    pub fn remotes(&self) -> impl Iterator<Item = &ElementRecord> {
        self.records.iter().filter(|r| !r.local)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Net exchange reported by `from` with `to`, zero if either is unknown
    pub fn net_exchange(&self, from: EntityId, to: EntityId) -> Resource {
        match (self.get(from), self.get(to)) {
            (Some(a), Some(b)) => a.net_exchange(&b.name),
            _ => Resource::zero(),
        }
    }
}

/// Effective location of a local entity, following the parent chain.
fn resolve_location(entities: &[Entity], entity: &Entity) -> Location {
    let mut location = entity.own_location();
    let mut parent = entity.parent();
    let mut hops = 0;
    while let Some(pid) = parent {
        if hops >= entities.len() {
            break;
        }
        match entities.get(pid.0) {
            Some(p) if p.id() != entity.id() => {
                location = p.own_location();
                parent = p.parent();
            }
            _ => break,
        }
        hops += 1;
    }
    location.clone()
}
