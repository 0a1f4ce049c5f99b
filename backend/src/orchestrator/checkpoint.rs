//! Checkpoint - Save/Load Simulator State
//!
//! Captures committed entity buffers, state internals and the clock at a step
//! boundary so a run can be resumed later.
//!
//! # Critical Invariants
//!
//! - **Step boundary**: snapshots hold committed values only; pending
//!   buffers are restored equal to committed ones
//! - **Config matching**: a snapshot can only be restored into a simulator
//!   whose config and scenario structure hash to the same value
//! - **Name matching**: entities are matched by name, in scenario order

use crate::models::{EntityBuffer, EntityId, Location, Scenario};
use crate::orchestrator::engine::{SimulationError, SimulationPhase, Simulator, SimulatorConfig};
use crate::resource::Resource;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashSet;

// ============================================================================
// Snapshot Structures
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatorSnapshot {
    pub scenario: String,

    /// Time of the next step to run
    pub current_time: i64,

    pub phase: SimulationPhase,

    /// SHA256 of the simulator config and scenario structure
    pub config_hash: String,

    pub entities: Vec<EntitySnapshot>,
}

/// Committed values of one entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub name: String,
    pub contents: Resource,
    pub state: Option<String>,
    pub parent: Option<EntityId>,
    pub location: Location,
    /// Opaque internals of every installed state, in installation order
    pub states: Vec<serde_json::Value>,
}

impl SimulatorSnapshot {
    pub fn to_json(&self) -> Result<String, SimulationError> {
        serde_json::to_string(self).map_err(|e| {
            SimulationError::Serialization(format!("Snapshot serialization failed: {}", e))
        })
    }

    pub fn from_json(json: &str) -> Result<Self, SimulationError> {
        serde_json::from_str(json).map_err(|e| {
            SimulationError::Serialization(format!("Snapshot deserialization failed: {}", e))
        })
    }
}

#[derive(Serialize)]
struct HashInput<'a> {
    config: &'a SimulatorConfig,
    scenario: crate::models::scenario::ScenarioOutline<'a>,
}

impl HashInput<'_> {
    fn digest(&self) -> Result<String, SimulationError> {
        compute_config_hash(self)
    }
}

// ============================================================================
// Hashing
// ============================================================================

/// SHA-256 of the canonical JSON form of `value`: object keys sorted at
/// every depth, no whitespace
pub fn compute_config_hash<T: Serialize>(value: &T) -> Result<String, SimulationError> {
    let mut canonical = serde_json::to_value(value).map_err(hash_input_error)?;
    sort_keys(&mut canonical);

    let mut hasher = Sha256::new();
    serde_json::to_writer(&mut hasher, &canonical).map_err(hash_input_error)?;
    Ok(format!("{:x}", hasher.finalize()))
}

fn sort_keys(value: &mut Value) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = std::mem::take(map).into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            for (_, child) in entries.iter_mut() {
                sort_keys(child);
            }
            map.extend(entries);
        }
        Value::Array(items) => items.iter_mut().for_each(sort_keys),
        _ => {}
    }
}

fn hash_input_error(e: serde_json::Error) -> SimulationError {
    SimulationError::Serialization(format!("Hash input serialization failed: {}", e))
}

// ============================================================================
// Validation
// ============================================================================

/// Check that `snapshot` fits `scenario`:
/// - same entity names in the same order, no duplicates
/// - every named state is installed on its entity
/// - one state value per installed state
/// - parents refer to entities of the scenario
pub fn validate_snapshot(snapshot: &SimulatorSnapshot, scenario: &Scenario) -> Result<(), SimulationError> {
    if snapshot.entities.len() != scenario.len() {
        return Err(SimulationError::StateValidation(format!(
            "snapshot has {} entities, scenario {} has {}",
            snapshot.entities.len(),
            scenario.name(),
            scenario.len()
        )));
    }

    let mut seen = HashSet::new();
    for (saved, entity) in snapshot.entities.iter().zip(scenario.entities()) {
        if !seen.insert(saved.name.as_str()) {
            return Err(SimulationError::StateValidation(format!(
                "duplicate entity {} in snapshot",
                saved.name
            )));
        }
        if saved.name != entity.name() {
            return Err(SimulationError::StateValidation(format!(
                "expected entity {}, snapshot has {}",
                entity.name(),
                saved.name
            )));
        }
        if let Some(state) = &saved.state {
            if !entity.state_names().contains(state) {
                return Err(SimulationError::StateValidation(format!(
                    "entity {} has no state {}",
                    saved.name, state
                )));
            }
        }
        if saved.states.len() != entity.state_names().len() {
            return Err(SimulationError::StateValidation(format!(
                "entity {} has {} states, snapshot has {}",
                saved.name,
                entity.state_names().len(),
                saved.states.len()
            )));
        }
        if let Some(parent) = saved.parent {
            if parent.0 >= scenario.len() {
                return Err(SimulationError::StateValidation(format!(
                    "entity {} has unknown parent {}",
                    saved.name, parent
                )));
            }
        }
    }
    Ok(())
}

// ============================================================================
// Simulator integration
// ============================================================================

impl Simulator {
    /// Hash of the config and scenario structure
    pub fn config_hash(&self) -> Result<String, SimulationError> {
        HashInput {
            config: self.config(),
            scenario: self.scenario().outline(),
        }
        .digest()
    }

    /// Capture committed state at the current step boundary
    pub fn snapshot(&self) -> Result<SimulatorSnapshot, SimulationError> {
        if matches!(self.phase(), SimulationPhase::Uninitialized | SimulationPhase::Failed) {
            return Err(SimulationError::InvalidPhase {
                expected: "initialized",
                actual: self.phase(),
            });
        }
        let entities = self
            .scenario()
            .entities()
            .iter()
            .map(|e| EntitySnapshot {
                name: e.name().to_string(),
                contents: e.contents().clone(),
                state: e.current_state().map(str::to_string),
                parent: e.parent(),
                location: e.own_location().clone(),
                states: e.state_snapshots(),
            })
            .collect();
        Ok(SimulatorSnapshot {
            scenario: self.scenario().name().to_string(),
            current_time: self.time(),
            phase: self.phase(),
            config_hash: self.config_hash()?,
            entities,
        })
    }

    /// Overwrite committed state from `snapshot`.
    ///
    /// The simulator must be initialized first so links and the ambassador
    /// are set up.
    pub fn restore(&mut self, snapshot: &SimulatorSnapshot) -> Result<(), SimulationError> {
        if matches!(self.phase(), SimulationPhase::Uninitialized | SimulationPhase::Failed) {
            return Err(SimulationError::InvalidPhase {
                expected: "initialized",
                actual: self.phase(),
            });
        }
        let hash = self.config_hash()?;
        if hash != snapshot.config_hash {
            return Err(SimulationError::StateValidation(format!(
                "config hash mismatch: simulator {}, snapshot {}",
                hash, snapshot.config_hash
            )));
        }
        validate_snapshot(snapshot, self.scenario())?;

        for (entity, saved) in self
            .scenario_mut()
            .entities_mut()
            .iter_mut()
            .zip(&snapshot.entities)
        {
            let state = saved
                .state
                .as_ref()
                .and_then(|name| entity.state_names().iter().position(|n| n == name));
            let buffer = EntityBuffer {
                contents: saved.contents.clone(),
                state,
                parent: saved.parent,
                location: saved.location.clone(),
            };
            entity.restore(buffer, &saved.states)?;
        }
        self.restore_clock(snapshot.current_time, snapshot.phase);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_config_hash_deterministic() {
        let config = SimulatorConfig::default();
        assert_eq!(
            compute_config_hash(&config).unwrap(),
            compute_config_hash(&config.clone()).unwrap()
        );
    }

    #[test]
    fn test_compute_config_hash_different_for_different_configs() {
        let a = SimulatorConfig::default();
        let b = SimulatorConfig {
            iterations: 4,
            ..Default::default()
        };
        assert_ne!(compute_config_hash(&a).unwrap(), compute_config_hash(&b).unwrap());
    }

    #[test]
    fn test_hash_ignores_key_order() {
        let a = serde_json::json!({ "x": 1, "y": { "b": 2, "a": 3 } });
        let b = serde_json::json!({ "y": { "a": 3, "b": 2 }, "x": 1 });
        assert_eq!(compute_config_hash(&a).unwrap(), compute_config_hash(&b).unwrap());
    }

    #[test]
    fn test_sort_keys_reaches_into_arrays() {
        let mut value = serde_json::json!([{ "b": 1, "a": [{ "z": 0, "y": 0 }] }]);
        sort_keys(&mut value);
        assert_eq!(
            serde_json::to_string(&value).unwrap(),
            r#"[{"a":[{"y":0,"z":0}],"b":1}]"#
        );
    }
}
