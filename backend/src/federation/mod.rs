//! Federation layer
//!
//! The simulator talks to the outside world through an [`Ambassador`]. A
//! standalone run uses [`NullAmbassador`], which only runs the local iterate
//! rounds. A federated run uses [`FederatedAmbassador`], which drives a
//! [`CoordinationService`]: joining the federation, the lockstep time
//! handshake, object publication and mirroring of remote elements.
//!
//! [`InMemoryRti`] implements the service in-process so several federates
//! can run on threads of one process.

pub mod config;
pub mod federated;
pub mod linking;
pub mod memory;
pub mod mirror;
pub mod null;
pub mod object_model;
pub mod service;
pub mod sync;
pub mod wait;

pub use config::FederationConfig;
pub use federated::FederatedAmbassador;
pub use memory::{InMemoryRti, RtiConnection};
pub use mirror::{Discovery, ObjectDirectory, RemoteElement};
pub use null::NullAmbassador;
pub use object_model::{ObjectClass, ObjectModel};
pub use service::{
    CoordinationService, FederateHandle, ObjectHandle, ServiceError, ServiceEvent, SyncFailureReason,
};
pub use sync::{SyncPointTracker, SyncPoints};
pub use wait::{CancelToken, Waiter};

use crate::models::{ElementTable, Entity};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FederationError {
    #[error("Coordination service error: {0}")]
    Service(#[from] ServiceError),

    #[error("Synchronization point {label} registration failed: {reason}")]
    SyncRegistrationFailed {
        label: String,
        reason: SyncFailureReason,
    },

    #[error("Timed out after {elapsed:?} waiting for {waiting_for}")]
    Timeout { waiting_for: String, elapsed: Duration },

    #[error("Wait for {waiting_for} was cancelled")]
    Cancelled { waiting_for: String },

    #[error("Invalid object model: {0}")]
    ObjectModel(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid timing: {0}")]
    InvalidTiming(String),
}

/// Bridge between the simulator loop and the world outside this process
pub trait Ambassador: Send {
    /// Establish the session with the coordination service
    fn connect(&mut self) -> Result<(), FederationError>;

    /// Prepare for a run starting at `initial_time` with `iterations`
    /// iterate rounds per step of `step`; resolves entity links
    fn initialize(
        &mut self,
        entities: &mut [Entity],
        initial_time: i64,
        iterations: u32,
        step: i64,
    ) -> Result<(), FederationError>;

    /// Run the iterate rounds of one step, exchanging values with peers
    fn advance(&mut self, entities: &mut [Entity]) -> Result<(), FederationError>;

    fn disconnect(&mut self) -> Result<(), FederationError>;

    /// Committed view of local and mirrored elements
    fn elements(&self, entities: &[Entity], duration: i64) -> ElementTable;
}

pub(crate) fn validate_timing(iterations: u32, step: i64) -> Result<(), FederationError> {
    if iterations == 0 {
        return Err(FederationError::InvalidTiming("iterations must be positive".to_string()));
    }
    if step <= 0 {
        return Err(FederationError::InvalidTiming(format!("step must be positive, got {}", step)));
    }
    Ok(())
}
