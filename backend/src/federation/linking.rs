//! Co-location link resolution
//!
//! An entity's required links name a relation and a class ("my Customer of
//! class Social"). A requirement is satisfied by any other element of that
//! class at the same effective location, local or remote. Resolution only
//! fills missing links, so running it repeatedly is harmless.

use crate::models::{ElementTable, Entity};
use tracing::{debug, warn};

/// Fill the missing links of `entity` from `table`. Returns true when every
/// required link is resolved.
pub fn resolve_links(entity: &mut Entity, table: &ElementTable) -> bool {
    let Some(me) = table.get(entity.id()) else {
        return entity.links().is_complete();
    };
    let missing: Vec<_> = entity.links().missing().into_iter().cloned().collect();
    for spec in missing {
        let candidate = table
            .iter()
            .find(|r| r.id != me.id && r.class == spec.role && r.location == me.location);
        if let Some(peer) = candidate {
            debug!(entity = %entity.name(), link = %spec, peer = %peer.name, "Resolved link");
            entity.links_mut().set(spec, peer.id);
        }
    }
    entity.links().is_complete()
}

/// Resolve links for every entity; returns how many remain incomplete
pub fn resolve_all(entities: &mut [Entity], table: &ElementTable) -> usize {
    entities
        .iter_mut()
        .map(|entity| resolve_links(entity, table))
        .filter(|complete| !complete)
        .count()
}

/// Log every link requirement that is still unresolved
pub fn warn_missing(entities: &[Entity]) {
    for entity in entities {
        for spec in entity.links().missing() {
            warn!(entity = %entity.name(), link = %spec, "Missing link partner");
        }
    }
}
