//! Mirrors of elements owned by other federates
//!
//! Remote elements are known only through discovered object instances and
//! their reflected attributes. The directory turns them into element records
//! so states read remote peers exactly like local ones.

use crate::federation::object_model::ObjectModel;
use crate::federation::service::ObjectHandle;
use crate::models::{attribute, AttributeMap, AttributeValue, ElementRecord, EntityId, Location};
use crate::resource::Resource;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, warn};

/// Last known attribute values of one remote object instance
#[derive(Debug, Clone)]
pub struct RemoteElement {
    id: EntityId,
    handle: ObjectHandle,
    class: String,
    name: String,
    location: Option<Location>,
    state: Option<String>,
    contents: Resource,
    sent: BTreeMap<String, Resource>,
    received: BTreeMap<String, Resource>,
    values: BTreeMap<String, f64>,
}

impl RemoteElement {
    pub fn new(id: EntityId, handle: ObjectHandle, class: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id,
            handle,
            class: class.into(),
            name: name.into(),
            location: None,
            state: None,
            contents: Resource::zero(),
            sent: BTreeMap::new(),
            received: BTreeMap::new(),
            values: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn handle(&self) -> ObjectHandle {
        self.handle
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn location(&self) -> Option<&Location> {
        self.location.as_ref()
    }

    /// Merge reflected attributes; returns how many were applied
    pub fn apply(&mut self, attributes: &AttributeMap) -> usize {
        let mut applied = 0;
        for (key, value) in attributes {
            let ok = match (key.as_str(), value) {
                (attribute::NAME, AttributeValue::Text(name)) => {
                    self.name = name.clone();
                    true
                }
                (attribute::LOCATION, AttributeValue::Text(text)) => match text.parse() {
                    Ok(location) => {
                        self.location = Some(location);
                        true
                    }
                    Err(e) => {
                        warn!(element = %self.name, location = %text, error = %e, "Ignoring malformed location");
                        false
                    }
                },
                (attribute::STATE, AttributeValue::Text(state)) => {
                    self.state = Some(state.clone());
                    true
                }
                (attribute::CONTENTS, AttributeValue::Quantity(contents)) => {
                    self.contents = contents.clone();
                    true
                }
                (attribute::SENT_TO, AttributeValue::Ledger(ledger)) => {
                    self.sent = ledger.clone();
                    true
                }
                (attribute::RECEIVED_FROM, AttributeValue::Ledger(ledger)) => {
                    self.received = ledger.clone();
                    true
                }
                (_, AttributeValue::Number(value)) => {
                    self.values.insert(key.clone(), *value);
                    true
                }
                _ => {
                    debug!(element = %self.name, attribute = %key, "Ignoring attribute of unexpected type");
                    false
                }
            };
            if ok {
                applied += 1;
            }
        }
        applied
    }

    /// Committed view of the element; `None` until its location is known
    pub fn record(&self) -> Option<ElementRecord> {
        let location = self.location.clone()?;
        Some(ElementRecord {
            state: self.state.clone(),
            contents: self.contents.clone(),
            sent: self.sent.clone(),
            received: self.received.clone(),
            values: self.values.clone(),
            local: false,
            ..ElementRecord::new(self.id, self.name.clone(), self.class.clone(), location)
        })
    }
}

/// Result of handling a discovery callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discovery {
    Discovered(EntityId),
    AlreadyKnown(EntityId),
    UnknownClass,
    /// One of our own registered objects
    Own,
}

/// All remote elements known to a federate
#[derive(Debug, Clone, Default)]
pub struct ObjectDirectory {
    next_id: usize,
    remotes: BTreeMap<ObjectHandle, RemoteElement>,
    own: HashSet<ObjectHandle>,
}

impl ObjectDirectory {
    /// Directory whose remote ids start at `first_id`, one past the last
    /// local entity
    pub fn new(first_id: usize) -> Self {
        Self {
            next_id: first_id,
            remotes: BTreeMap::new(),
            own: HashSet::new(),
        }
    }

    pub fn mark_own(&mut self, handle: ObjectHandle) {
        self.own.insert(handle);
    }

    pub fn is_own(&self, handle: ObjectHandle) -> bool {
        self.own.contains(&handle)
    }

    /// Register a discovered instance once; repeated discoveries are no-ops
    pub fn discover(&mut self, handle: ObjectHandle, class: &str, name: &str, model: &ObjectModel) -> Discovery {
        if self.own.contains(&handle) {
            return Discovery::Own;
        }
        if let Some(existing) = self.remotes.get(&handle) {
            warn!(object = %handle, name = %name, "Object already discovered");
            return Discovery::AlreadyKnown(existing.id);
        }
        if !model.contains(class) {
            warn!(object = %handle, class = %class, "Discovered object of unknown class");
            return Discovery::UnknownClass;
        }
        let id = EntityId(self.next_id);
        self.next_id += 1;
        self.remotes
            .insert(handle, RemoteElement::new(id, handle, class, name));
        debug!(object = %handle, class = %class, name = %name, id = %id, "Discovered remote element");
        Discovery::Discovered(id)
    }

    /// Apply reflected attributes. Returns false for unknown handles.
    pub fn reflect(&mut self, handle: ObjectHandle, attributes: &AttributeMap) -> bool {
        match self.remotes.get_mut(&handle) {
            Some(remote) => {
                remote.apply(attributes);
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, handle: ObjectHandle) -> Option<RemoteElement> {
        self.remotes.remove(&handle)
    }

    pub fn contains(&self, handle: ObjectHandle) -> bool {
        self.remotes.contains_key(&handle)
    }

    pub fn get(&self, handle: ObjectHandle) -> Option<&RemoteElement> {
        self.remotes.get(&handle)
    }

    pub fn remotes(&self) -> impl Iterator<Item = &RemoteElement> {
        self.remotes.values()
    }

    /// Records of every remote element with a known location, in id order
    pub fn records(&self) -> Vec<ElementRecord> {
        let mut records: Vec<_> = self.remotes.values().filter_map(RemoteElement::record).collect();
        records.sort_by_key(|r| r.id);
        records
    }

    pub fn len(&self) -> usize {
        self.remotes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.remotes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ResourceKind;

    fn model() -> ObjectModel {
        ObjectModel::new("test").with_element_class("Water", &["Demand"])
    }

    #[test]
    fn test_discovery_is_idempotent() {
        let mut directory = ObjectDirectory::new(3);
        let handle = ObjectHandle::new();

        let first = directory.discover(handle, "Water", "plant", &model());
        assert_eq!(first, Discovery::Discovered(EntityId(3)));
        let second = directory.discover(handle, "Water", "plant", &model());
        assert_eq!(second, Discovery::AlreadyKnown(EntityId(3)));
        assert_eq!(directory.len(), 1);
    }

    #[test]
    fn test_unknown_class_and_own_objects_skipped() {
        let mut directory = ObjectDirectory::new(0);
        let own = ObjectHandle::new();
        directory.mark_own(own);

        assert_eq!(directory.discover(own, "Water", "me", &model()), Discovery::Own);
        assert_eq!(
            directory.discover(ObjectHandle::new(), "Energy", "grid", &model()),
            Discovery::UnknownClass
        );
        assert!(directory.is_empty());
    }

    #[test]
    fn test_record_requires_location() {
        let mut directory = ObjectDirectory::new(0);
        let handle = ObjectHandle::new();
        directory.discover(handle, "Water", "plant", &model());
        assert!(directory.records().is_empty());

        let mut attributes = AttributeMap::new();
        attributes.insert(attribute::LOCATION.to_string(), AttributeValue::Text("A".to_string()));
        attributes.insert(
            attribute::CONTENTS.to_string(),
            AttributeValue::Quantity(Resource::zero().with_quantity(ResourceKind::Water, 4.0)),
        );
        attributes.insert("Demand".to_string(), AttributeValue::Number(2.5));
        assert!(directory.reflect(handle, &attributes));

        let records = directory.records();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert!(!record.local);
        assert_eq!(record.location.to_string(), "A");
        assert_eq!(record.contents.quantity(ResourceKind::Water), 4.0);
        assert_eq!(record.value("Demand"), Some(2.5));
    }

    #[test]
    fn test_reflect_unknown_handle() {
        let mut directory = ObjectDirectory::new(0);
        assert!(!directory.reflect(ObjectHandle::new(), &AttributeMap::new()));
    }
}
