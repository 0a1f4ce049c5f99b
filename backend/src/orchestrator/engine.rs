//! Simulator - main step loop
//!
//! Drives one scenario through its step sequence.
//!
//! # Step Order
//!
//! Each step at time `t` executes:
//!
//! 1. **Coordinate**: `ambassador.advance` runs the iterate rounds (and, when
//!    federated, the time handshake with peers)
//! 2. **Verify** (optional): flow and exchange checks on committed values
//! 3. **Tick**: every entity computes pending values from committed records
//! 4. **Observe**: observers see the step after tick, before commit
//! 5. **Tock**: every entity commits; state changes are logged
//! 6. **Advance**: `t += step`
//!
//! The loop runs while `t <= initial_time + duration`, so a run performs
//! `duration / step + 1` steps.
//!
//! # Example
//!
//! ```rust
//! use infra_cosim_core::models::{Entity, Location, Node, Scenario};
//! use infra_cosim_core::orchestrator::{Simulator, SimulatorConfig};
//! use infra_cosim_core::states::FixedRateState;
//! use infra_cosim_core::resource::{ResourceFactory, ResourceKind};
//!
//! let factory = ResourceFactory::default();
//! let site = Location::at(Node::new("A"));
//! let tank = Entity::builder("tank", "Water", site.clone())
//!     .state(FixedRateState::new("Filling").with_storage(
//!         factory.quantity(ResourceKind::Water, 2.0),
//!         factory.zero(),
//!     ))
//!     .build()
//!     .unwrap();
//! let scenario = Scenario::builder("demo", 0)
//!     .location(site)
//!     .entity(tank)
//!     .build()
//!     .unwrap();
//!
//! let config = SimulatorConfig { duration: 4, ..Default::default() };
//! let mut simulator = Simulator::standalone(scenario, config).unwrap();
//! simulator.initialize().unwrap();
//! let steps = simulator.run().unwrap();
//!
//! assert_eq!(steps, 5);
//! let tank = simulator.scenario().entity_by_name("tank").unwrap();
//! assert_eq!(tank.contents().quantity(ResourceKind::Water), 10.0);
//! ```

use crate::core::time::SimulationClock;
use crate::federation::{Ambassador, FederationError, NullAmbassador};
use crate::models::{ElementTable, EntityError, Event, EventLog, Scenario, ScenarioError};
use crate::orchestrator::invariants::{check_exchange, check_flow, ExchangeViolation, FlowViolation};
use crate::orchestrator::observer::{StepEvent, StepObserver};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::{debug, info, warn};

// ============================================================================
// Configuration
// ============================================================================

/// Step loop configuration
///
/// # Fields
///
/// * `duration` - Simulated time covered after the initial time
/// * `step` - Duration of one step
/// * `iterations` - Iterate rounds per step
/// * `verify_flow` - Check flow conservation at static locations each step
/// * `verify_exchange` - Check bilateral exchange agreement each step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    pub duration: i64,
    pub step: i64,
    pub iterations: u32,
    pub verify_flow: bool,
    pub verify_exchange: bool,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            duration: 0,
            step: 1,
            iterations: 1,
            verify_flow: false,
            verify_exchange: false,
        }
    }
}

impl SimulatorConfig {
    pub fn validate(&self) -> Result<(), SimulationError> {
        if self.step <= 0 {
            return Err(SimulationError::InvalidConfig(format!(
                "step must be positive, got {}",
                self.step
            )));
        }
        if self.duration < 0 {
            return Err(SimulationError::InvalidConfig(format!(
                "duration must not be negative, got {}",
                self.duration
            )));
        }
        if self.iterations == 0 {
            return Err(SimulationError::InvalidConfig(
                "iterations must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn from_json_str(json: &str) -> Result<Self, SimulationError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| SimulationError::Serialization(format!("simulator config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }
}

// ============================================================================
// Errors and phases
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SimulationPhase {
    Uninitialized,
    Ready,
    Stepping,
    Done,
    /// A step returned an error; only `initialize` leaves this phase
    Failed,
}

impl fmt::Display for SimulationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SimulationPhase::Uninitialized => "uninitialized",
            SimulationPhase::Ready => "ready",
            SimulationPhase::Stepping => "stepping",
            SimulationPhase::Done => "done",
            SimulationPhase::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Invalid phase: expected {expected}, simulator is {actual}")]
    InvalidPhase {
        expected: &'static str,
        actual: SimulationPhase,
    },

    #[error(transparent)]
    Entity(#[from] EntityError),

    #[error(transparent)]
    Federation(#[from] FederationError),

    #[error(transparent)]
    Scenario(#[from] ScenarioError),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("State validation error: {0}")]
    StateValidation(String),
}

// ============================================================================
// Step results
// ============================================================================

/// What happened during one step
#[derive(Debug, Clone, Default)]
pub struct StepReport {
    pub time: i64,
    pub duration: i64,
    pub state_changes: usize,
    pub flow_violations: Vec<FlowViolation>,
    pub exchange_violations: Vec<ExchangeViolation>,
}

impl StepReport {
    pub fn is_clean(&self) -> bool {
        self.flow_violations.is_empty() && self.exchange_violations.is_empty()
    }
}

// ============================================================================
// Simulator
// ============================================================================

pub struct Simulator {
    scenario: Scenario,
    config: SimulatorConfig,
    ambassador: Box<dyn Ambassador>,
    observers: Vec<Box<dyn StepObserver>>,
    clock: SimulationClock,
    phase: SimulationPhase,
    events: EventLog,
}

impl Simulator {
    pub fn new(
        scenario: Scenario,
        config: SimulatorConfig,
        ambassador: Box<dyn Ambassador>,
    ) -> Result<Self, SimulationError> {
        config.validate()?;
        let clock = SimulationClock::new(scenario.initial_time(), config.step, config.duration);
        Ok(Self {
            scenario,
            config,
            ambassador,
            observers: Vec::new(),
            clock,
            phase: SimulationPhase::Uninitialized,
            events: EventLog::new(),
        })
    }

    /// Simulator that runs alone, without a coordination service
    pub fn standalone(scenario: Scenario, config: SimulatorConfig) -> Result<Self, SimulationError> {
        Self::new(scenario, config, Box::new(NullAmbassador::new()))
    }

    pub fn add_observer(&mut self, observer: impl StepObserver + 'static) {
        self.observers.push(Box::new(observer));
    }

    pub fn scenario(&self) -> &Scenario {
        &self.scenario
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    pub fn clock(&self) -> &SimulationClock {
        &self.clock
    }

    pub fn time(&self) -> i64 {
        self.clock.current_time()
    }

    pub fn phase(&self) -> SimulationPhase {
        self.phase
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// Committed records of local and known remote elements
    pub fn elements(&self) -> ElementTable {
        self.ambassador
            .elements(self.scenario.entities(), self.config.step)
    }

    pub fn connect(&mut self) -> Result<(), SimulationError> {
        self.ambassador.connect()?;
        Ok(())
    }

    pub fn disconnect(&mut self) -> Result<(), SimulationError> {
        self.ambassador.disconnect()?;
        Ok(())
    }

    /// Reset every entity to its initial values and prepare the ambassador
    pub fn initialize(&mut self) -> Result<(), SimulationError> {
        if self.phase == SimulationPhase::Stepping {
            return Err(SimulationError::InvalidPhase {
                expected: "not stepping",
                actual: self.phase,
            });
        }
        let initial_time = self.scenario.initial_time();
        self.phase = SimulationPhase::Uninitialized;
        self.clock.reset();
        self.events.clear();
        for entity in self.scenario.entities_mut() {
            entity.initialize(initial_time)?;
        }
        self.ambassador.initialize(
            self.scenario.entities_mut(),
            initial_time,
            self.config.iterations,
            self.config.step,
        )?;
        self.phase = SimulationPhase::Ready;
        info!(
            scenario = %self.scenario,
            entities = self.scenario.len(),
            start = initial_time,
            end = self.clock.end_time(),
            "Simulator initialized"
        );
        Ok(())
    }

    /// Execute one step. Returns `None` once the loop bound is reached.
    ///
    /// An error leaves the simulator `Failed` until the next `initialize`.
    pub fn step(&mut self) -> Result<Option<StepReport>, SimulationError> {
        match self.phase {
            SimulationPhase::Uninitialized | SimulationPhase::Failed => {
                return Err(SimulationError::InvalidPhase {
                    expected: "ready",
                    actual: self.phase,
                })
            }
            SimulationPhase::Done => return Ok(None),
            SimulationPhase::Ready | SimulationPhase::Stepping => {}
        }
        if !self.clock.is_running() {
            self.phase = SimulationPhase::Done;
            return Ok(None);
        }
        self.phase = SimulationPhase::Stepping;
        self.execute_step().map_err(|e| {
            warn!(time = self.clock.current_time(), error = %e, "Step failed");
            self.phase = SimulationPhase::Failed;
            e
        })
    }

    fn execute_step(&mut self) -> Result<Option<StepReport>, SimulationError> {
        let time = self.clock.current_time();
        let duration = self.clock.step();
        let mut report = StepReport {
            time,
            duration,
            ..Default::default()
        };

        // 1. Iterate rounds
        self.ambassador.advance(self.scenario.entities_mut())?;
        let table = self
            .ambassador
            .elements(self.scenario.entities(), duration);

        // 2. Verification
        if self.config.verify_flow {
            report.flow_violations = check_flow(
                self.scenario.entities(),
                self.scenario.locations(),
                &table,
                time,
                duration,
            );
            for v in &report.flow_violations {
                self.events.log(Event::FlowImbalance {
                    time,
                    location: v.location.to_string(),
                    imbalance: v.imbalance.clone(),
                });
            }
        }
        if self.config.verify_exchange {
            report.exchange_violations = check_exchange(&table, time);
            for v in &report.exchange_violations {
                self.events.log(Event::ExchangeImbalance {
                    time,
                    from: v.from.clone(),
                    to: v.to.clone(),
                    delta: v.delta.clone(),
                    relative_error: v.relative_error.clone(),
                });
            }
        }

        // 3. Tick
        for entity in self.scenario.entities_mut() {
            entity.tick(&table, duration)?;
        }

        // 4. Observers
        let event = StepEvent {
            time,
            duration,
            entities: self.scenario.entities(),
            elements: &table,
        };
        for observer in self.observers.iter_mut() {
            observer.on_step_completed(&event);
        }

        // 5. Tock
        for entity in self.scenario.entities_mut() {
            if let Some(change) = entity.tock() {
                debug!(entity = %change.entity, from = ?change.from, to = ?change.to, time, "State changed");
                self.events.log(Event::StateChanged {
                    time,
                    entity: change.entity,
                    from: change.from,
                    to: change.to,
                });
                report.state_changes += 1;
            }
        }

        // 6. Advance
        self.events.log(Event::StepCompleted { time, duration });
        self.clock.advance();
        if !self.clock.is_running() {
            self.phase = SimulationPhase::Done;
        }
        debug!(time, duration, next = self.clock.current_time(), "Step complete");
        Ok(Some(report))
    }

    /// Step until the loop bound; returns the number of steps executed
    pub fn run(&mut self) -> Result<u64, SimulationError> {
        let mut steps = 0;
        while self.step()?.is_some() {
            steps += 1;
        }
        info!(scenario = %self.scenario, steps, time = self.clock.current_time(), "Run complete");
        Ok(steps)
    }

    pub(crate) fn scenario_mut(&mut self) -> &mut Scenario {
        &mut self.scenario
    }

    pub(crate) fn restore_clock(&mut self, time: i64, phase: SimulationPhase) {
        self.clock.set_current_time(time);
        self.phase = phase;
    }
}

impl fmt::Debug for Simulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Simulator")
            .field("scenario", &self.scenario.name())
            .field("time", &self.clock.current_time())
            .field("phase", &self.phase)
            .field("entities", &self.scenario.len())
            .field("observers", &self.observers.len())
            .finish()
    }
}
