//! Time management for the simulation
//!
//! The simulation advances in fixed steps from an initial time. A run covers
//! every step whose start time lies in `[initial_time, initial_time + duration]`,
//! so a duration of zero still executes one step.

use serde::{Deserialize, Serialize};

/// Tracks simulation time in fixed-size steps
///
/// # Example
/// ```
/// use infra_cosim_core::SimulationClock;
///
/// let mut clock = SimulationClock::new(2014, 1, 2);
/// assert_eq!(clock.current_time(), 2014);
/// assert!(clock.is_running());
///
/// clock.advance();
/// clock.advance();
/// assert_eq!(clock.current_time(), 2016);
/// assert!(clock.is_running());
///
/// clock.advance();
/// assert!(!clock.is_running());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationClock {
    /// Time of the first step
    initial_time: i64,
    /// Start time of the next step to execute
    current_time: i64,
    /// Duration of one step
    step: i64,
    /// Span covered by the run
    duration: i64,
}

impl SimulationClock {
    /// Create a clock starting at `initial_time`
    ///
    /// # Arguments
    /// * `initial_time` - Time of the first step
    /// * `step` - Duration of one step (must be positive)
    /// * `duration` - Span of the run; the last step starts at or before
    ///   `initial_time + duration`
    pub fn new(initial_time: i64, step: i64, duration: i64) -> Self {
        assert!(step > 0, "step must be positive");
        Self {
            initial_time,
            current_time: initial_time,
            step,
            duration,
        }
    }

    /// Advance by one step
    pub fn advance(&mut self) {
        self.current_time += self.step;
    }

    pub fn current_time(&self) -> i64 {
        self.current_time
    }

    pub fn initial_time(&self) -> i64 {
        self.initial_time
    }

    pub fn step(&self) -> i64 {
        self.step
    }

    pub fn duration(&self) -> i64 {
        self.duration
    }

    /// Latest time at which a step may start
    pub fn end_time(&self) -> i64 {
        self.initial_time + self.duration
    }

    /// True while another step remains
    pub fn is_running(&self) -> bool {
        self.current_time <= self.end_time()
    }

    /// Number of steps already executed
    pub fn steps_taken(&self) -> i64 {
        (self.current_time - self.initial_time) / self.step
    }

    /// Number of steps in the whole run
    pub fn total_steps(&self) -> i64 {
        if self.duration < 0 {
            0
        } else {
            self.duration / self.step + 1
        }
    }

    /// Jump to an arbitrary time (used when restoring checkpoints)
    pub fn set_current_time(&mut self, time: i64) {
        self.current_time = time;
    }

    /// Return to the initial time
    pub fn reset(&mut self) {
        self.current_time = self.initial_time;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic(expected = "step must be positive")]
    fn test_zero_step_panics() {
        SimulationClock::new(0, 0, 10);
    }

    #[test]
    fn test_total_steps_includes_end_time() {
        assert_eq!(SimulationClock::new(0, 1, 0).total_steps(), 1);
        assert_eq!(SimulationClock::new(0, 2, 5).total_steps(), 3);
    }
}
