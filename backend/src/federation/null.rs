//! Standalone ambassador: no peers, local iterate rounds only

use crate::federation::linking::{resolve_all, warn_missing};
use crate::federation::{validate_timing, Ambassador, FederationError};
use crate::models::{ElementTable, Entity};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct NullAmbassador {
    iterations: u32,
    step: i64,
}

impl NullAmbassador {
    pub fn new() -> Self {
        Self {
            iterations: 1,
            step: 1,
        }
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }
}

impl Default for NullAmbassador {
    fn default() -> Self {
        Self::new()
    }
}

impl Ambassador for NullAmbassador {
    fn connect(&mut self) -> Result<(), FederationError> {
        Ok(())
    }

    fn initialize(
        &mut self,
        entities: &mut [Entity],
        _initial_time: i64,
        iterations: u32,
        step: i64,
    ) -> Result<(), FederationError> {
        validate_timing(iterations, step)?;
        self.iterations = iterations;
        self.step = step;

        let table = self.elements(entities, step);
        if resolve_all(entities, &table) > 0 {
            warn_missing(entities);
        }
        Ok(())
    }

    fn advance(&mut self, entities: &mut [Entity]) -> Result<(), FederationError> {
        for round in 0..self.iterations {
            let table = self.elements(entities, self.step);
            for entity in entities.iter_mut() {
                entity.iterate_tick(&table, self.step);
            }
            for entity in entities.iter_mut() {
                entity.iterate_tock();
            }
            debug!(round, "Iterate round complete");
        }
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), FederationError> {
        Ok(())
    }

    fn elements(&self, entities: &[Entity], duration: i64) -> ElementTable {
        ElementTable::assemble(entities, Vec::new(), duration)
    }
}
