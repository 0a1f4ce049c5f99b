//! Reusable built-in states
//!
//! - [`FixedRateState`]: constant per-unit-time storage, transformation and
//!   transport rates
//! - [`ScheduledTransition`]: dormant until a configured time, then switches
//!   the entity to another state

pub mod fixed_rate;
pub mod scheduled;

pub use fixed_rate::FixedRateState;
pub use scheduled::ScheduledTransition;
