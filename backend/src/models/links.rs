//! Supplier/customer links between co-located elements

use crate::models::element::EntityId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Direction of a link as seen from the entity that declares it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Relation {
    /// The peer delivers resources to this entity
    Supplier,
    /// This entity delivers resources to the peer
    Customer,
}

/// A link an entity needs resolved before it can exchange resources
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LinkSpec {
    pub relation: Relation,
    /// Class of the peer (e.g. "elect")
    pub role: String,
}

impl LinkSpec {
    pub fn supplier(role: impl Into<String>) -> Self {
        Self {
            relation: Relation::Supplier,
            role: role.into(),
        }
    }

    pub fn customer(role: impl Into<String>) -> Self {
        Self {
            relation: Relation::Customer,
            role: role.into(),
        }
    }
}

impl fmt::Display for LinkSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let relation = match self.relation {
            Relation::Supplier => "supplier",
            Relation::Customer => "customer",
        };
        write!(f, "{} {}", self.role, relation)
    }
}

/// Required links of one entity and the peers they resolved to.
///
/// Resolving the same spec twice replaces the previous peer, so repeated
/// resolution never duplicates links.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Links {
    required: Vec<LinkSpec>,
    resolved: BTreeMap<LinkSpec, EntityId>,
}

impl Links {
    pub fn new(required: Vec<LinkSpec>) -> Self {
        let mut unique = Vec::with_capacity(required.len());
        for spec in required {
            if !unique.contains(&spec) {
                unique.push(spec);
            }
        }
        Self {
            required: unique,
            resolved: BTreeMap::new(),
        }
    }

    pub fn required(&self) -> &[LinkSpec] {
        &self.required
    }

    pub fn get(&self, relation: Relation, role: &str) -> Option<EntityId> {
        self.resolved
            .iter()
            .find(|(spec, _)| spec.relation == relation && spec.role == role)
            .map(|(_, id)| *id)
    }

    /// Record the peer for `spec`. Returns true when the link changed.
    pub fn set(&mut self, spec: LinkSpec, peer: EntityId) -> bool {
        self.resolved.insert(spec, peer) != Some(peer)
    }

    pub fn missing(&self) -> Vec<&LinkSpec> {
        self.required
            .iter()
            .filter(|spec| !self.resolved.contains_key(*spec))
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.missing().is_empty()
    }

    /// Distinct linked peers in link order
    pub fn peers(&self) -> Vec<EntityId> {
        let mut peers: Vec<EntityId> = Vec::new();
        for id in self.resolved.values() {
            if !peers.contains(id) {
                peers.push(*id);
            }
        }
        peers
    }

    pub fn resolved(&self) -> impl Iterator<Item = (&LinkSpec, EntityId)> {
        self.resolved.iter().map(|(spec, id)| (spec, *id))
    }

    pub fn len(&self) -> usize {
        self.resolved.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolved.is_empty()
    }

    /// Forget every resolved peer (required specs are kept)
    pub fn clear(&mut self) {
        self.resolved.clear();
    }
}
