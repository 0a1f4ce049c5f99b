//! Orchestrator - main simulation loop
//!
//! The simulator steps a scenario through time; observers export per-step
//! telemetry; invariant checks verify conservation; checkpoints save and
//! restore a run; the federate runner drives a simulator end to end.

pub mod checkpoint;
pub mod engine;
pub mod federate;
pub mod invariants;
pub mod observer;

// Re-export main types for convenience
pub use engine::{SimulationError, SimulationPhase, Simulator, SimulatorConfig, StepReport};
pub use federate::{FederateOutcome, FederateRunner, RunSummary};
pub use invariants::{check_exchange, check_flow, ExchangeViolation, FlowViolation};
pub use observer::{RecordingObserver, StepEvent, StepObserver};

// Re-export checkpoint types
pub use checkpoint::{compute_config_hash, validate_snapshot, EntitySnapshot, SimulatorSnapshot};
