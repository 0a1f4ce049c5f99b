//! Federate runner
//!
//! Runs one simulator through connect, initialize, execute and disconnect,
//! optionally on its own OS thread. Disconnect is attempted even when an
//! earlier phase fails so the federation is not left with a dangling member.

use crate::orchestrator::engine::{SimulationError, Simulator};
use std::io;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{error, info};

/// Timings and totals of one federate run
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub federate: String,
    pub final_time: i64,
    pub steps: u64,
    pub initialization: Duration,
    pub execution: Duration,
}

/// Result of a finished run; the simulator is handed back for inspection
#[derive(Debug)]
pub struct FederateOutcome {
    pub summary: RunSummary,
    pub simulator: Simulator,
}

#[derive(Debug)]
pub struct FederateRunner {
    name: String,
    simulator: Simulator,
}

impl FederateRunner {
    pub fn new(name: impl Into<String>, simulator: Simulator) -> Self {
        Self {
            name: name.into(),
            simulator,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Connect, initialize, execute and disconnect on the current thread
    pub fn run(self) -> Result<FederateOutcome, SimulationError> {
        let FederateRunner { name, mut simulator } = self;

        let result = execute(&name, &mut simulator);
        let disconnected = simulator.disconnect();

        let (initialization, execution, steps) = result?;
        if let Err(e) = disconnected {
            error!(federate = %name, error = %e, "Disconnect failed");
            return Err(e);
        }

        let summary = RunSummary {
            federate: name,
            final_time: simulator.time(),
            steps,
            initialization,
            execution,
        };
        info!(
            federate = %summary.federate,
            steps = summary.steps,
            init_ms = summary.initialization.as_millis() as u64,
            exec_ms = summary.execution.as_millis() as u64,
            "Federate finished"
        );
        Ok(FederateOutcome { summary, simulator })
    }

    /// Run on a named OS thread
    pub fn spawn(self) -> io::Result<JoinHandle<Result<FederateOutcome, SimulationError>>> {
        thread::Builder::new()
            .name(format!("federate-{}", self.name))
            .spawn(move || self.run())
    }
}

fn execute(name: &str, simulator: &mut Simulator) -> Result<(Duration, Duration, u64), SimulationError> {
    let started = Instant::now();
    simulator.connect()?;
    simulator.initialize()?;
    let initialization = started.elapsed();
    info!(federate = %name, elapsed_ms = initialization.as_millis() as u64, "Federate initialized");

    let started = Instant::now();
    let steps = simulator.run()?;
    Ok((initialization, started.elapsed(), steps))
}
