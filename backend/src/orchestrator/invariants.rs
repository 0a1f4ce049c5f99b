//! Conservation checks
//!
//! Diagnostics only: violations are logged and returned, never raised as
//! errors. Both checks read committed values after the iterate rounds of a
//! step, before tick.

use crate::models::{ElementTable, Entity, Location};
use crate::resource::Resource;
use serde::Serialize;
use tracing::warn;

/// Net flow into a static location was not zero
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowViolation {
    pub time: i64,
    pub location: Location,
    pub imbalance: Resource,
}

/// Two elements disagree about what they exchanged
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExchangeViolation {
    pub time: i64,
    pub from: String,
    pub to: String,
    /// `net_exchange(from, to) + net_exchange(to, from)`
    pub delta: Resource,
    /// `delta` divided component-wise by `net_exchange(from, to)`
    pub relative_error: Resource,
}

/// Sum each local entity's net flow into every static location
pub fn check_flow(
    entities: &[Entity],
    locations: &[Location],
    table: &ElementTable,
    time: i64,
    duration: i64,
) -> Vec<FlowViolation> {
    locations
        .iter()
        .filter(|l| l.is_static())
        .filter_map(|location| {
            let imbalance: Resource = entities
                .iter()
                .map(|e| e.net_flow(table, location, duration))
                .sum();
            if imbalance.is_zero() {
                return None;
            }
            warn!(time, location = %location, imbalance = %imbalance, "Flow imbalance");
            Some(FlowViolation {
                time,
                location: location.clone(),
                imbalance,
            })
        })
        .collect()
}

/// Compare what every pair of elements (at least one local) reports
/// exchanging with each other
pub fn check_exchange(table: &ElementTable, time: i64) -> Vec<ExchangeViolation> {
    let records: Vec<_> = table.iter().collect();
    let mut violations = Vec::new();
    for (i, a) in records.iter().enumerate() {
        for b in records.iter().skip(i + 1) {
            if !a.local && !b.local {
                continue;
            }
            let forward = a.net_exchange(&b.name);
            let backward = b.net_exchange(&a.name);
            let delta = forward.add(&backward);
            if delta.is_zero() {
                continue;
            }
            let relative_error = delta.safe_divide(&forward);
            warn!(
                time,
                from = %a.name,
                to = %b.name,
                delta = %delta,
                relative_error = %relative_error,
                "Exchange imbalance"
            );
            violations.push(ExchangeViolation {
                time,
                from: a.name.clone(),
                to: b.name.clone(),
                delta,
                relative_error,
            });
        }
    }
    violations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ElementRecord, EntityId, Node};
    use crate::resource::{ResourceFactory, ResourceKind};

    fn record(id: usize, name: &str, local: bool) -> ElementRecord {
        ElementRecord {
            local,
            ..ElementRecord::new(EntityId(id), name, "Test", Location::at(Node::new("A")))
        }
    }

    #[test]
    fn test_matching_ledgers_pass() {
        let water = ResourceFactory::default().quantity(ResourceKind::Water, 3.0);
        let mut a = record(0, "a", true);
        let mut b = record(1, "b", false);
        a.sent.insert("b".to_string(), water.clone());
        b.received.insert("a".to_string(), water);

        let table = ElementTable::new(vec![a, b]);
        assert!(check_exchange(&table, 0).is_empty());
    }

    #[test]
    fn test_one_sided_send_is_reported() {
        let water = ResourceFactory::default().quantity(ResourceKind::Water, 3.0);
        let mut a = record(0, "a", true);
        a.sent.insert("b".to_string(), water.clone());
        let b = record(1, "b", true);

        let violations = check_exchange(&ElementTable::new(vec![a, b]), 7);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].time, 7);
        assert_eq!(violations[0].delta, water);
        assert_eq!(violations[0].relative_error.quantity(ResourceKind::Water), 1.0);
    }

    #[test]
    fn test_remote_pairs_are_not_checked() {
        let water = ResourceFactory::default().quantity(ResourceKind::Water, 3.0);
        let mut a = record(0, "a", false);
        a.sent.insert("b".to_string(), water);
        let b = record(1, "b", false);
        assert!(check_exchange(&ElementTable::new(vec![a, b]), 0).is_empty());
    }
}
