//! Coordination service boundary
//!
//! The federation client talks to an external coordination service (an RTI
//! in HLA terms) through [`CoordinationService`]. Calls are synchronous and
//! return immediately; everything the service wants to tell the federate
//! arrives as [`ServiceEvent`]s drained by
//! [`evoke_callbacks`](CoordinationService::evoke_callbacks), which waits at
//! most a bounded interval for the first event.

use crate::federation::object_model::ObjectModel;
use crate::models::AttributeMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Service-assigned identity of an object instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectHandle(pub Uuid);

impl ObjectHandle {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ObjectHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "object-{}", self.0)
    }
}

/// Service-assigned identity of a joined federate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FederateHandle(pub Uuid);

impl FederateHandle {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for FederateHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FederateHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "federate-{}", self.0)
    }
}

/// Why a synchronization point registration failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncFailureReason {
    /// Another federate already registered the label
    LabelNotUnique,
    /// The registering federate is not a member of the federation
    NotJoined,
    Other(String),
}

impl fmt::Display for SyncFailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncFailureReason::LabelNotUnique => write!(f, "label not unique"),
            SyncFailureReason::NotJoined => write!(f, "federate not joined"),
            SyncFailureReason::Other(reason) => write!(f, "{}", reason),
        }
    }
}

/// Callback delivered by the coordination service
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceEvent {
    SyncPointRegistered {
        label: String,
    },
    SyncPointRegistrationFailed {
        label: String,
        reason: SyncFailureReason,
    },
    SyncPointAnnounced {
        label: String,
    },
    FederationSynchronized {
        label: String,
    },
    TimeConstrainedEnabled {
        time: f64,
    },
    TimeRegulationEnabled {
        time: f64,
    },
    TimeAdvanceGranted {
        time: f64,
    },
    ObjectDiscovered {
        handle: ObjectHandle,
        class: String,
        name: String,
    },
    AttributesReflected {
        handle: ObjectHandle,
        attributes: AttributeMap,
    },
    ObjectRemoved {
        handle: ObjectHandle,
    },
}

/// Failures reported by the coordination service
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ServiceError {
    #[error("Not connected to the coordination service")]
    NotConnected,

    #[error("Already connected to the coordination service")]
    AlreadyConnected,

    #[error("Federation {0} already exists")]
    FederationExists(String),

    #[error("Federation {0} does not exist")]
    FederationNotFound(String),

    #[error("Federation {0} still has joined federates")]
    FederatesCurrentlyJoined(String),

    #[error("Federate already joined a federation")]
    AlreadyJoined,

    #[error("Federate is not joined to a federation")]
    NotJoined,

    #[error("Time constrained is already enabled")]
    TimeConstrainedAlreadyEnabled,

    #[error("Time constrained is not enabled")]
    TimeConstrainedNotEnabled,

    #[error("Time regulation is already enabled")]
    TimeRegulationAlreadyEnabled,

    #[error("Time regulation is not enabled")]
    TimeRegulationNotEnabled,

    #[error("Invalid lookahead {0}")]
    InvalidLookahead(f64),

    #[error("A time advance is already pending")]
    TimeAdvancePending,

    #[error("Requested time {requested} is before logical time {current}")]
    InvalidTime { requested: f64, current: f64 },

    #[error("Unknown synchronization point {0}")]
    UnknownSyncPoint(String),

    #[error("Unknown object class {0}")]
    UnknownClass(String),

    #[error("Object class {0} is not published by this federate")]
    ClassNotPublished(String),

    #[error("Unknown object instance {0}")]
    UnknownObject(ObjectHandle),

    #[error("Object instance {0} is owned by another federate")]
    NotOwner(ObjectHandle),

    #[error("Callback channel disconnected")]
    Disconnected,

    #[error("Coordination service error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Races that mean "already in the requested state": treated as success
    /// during connect, initialization and teardown.
    pub fn is_benign(&self) -> bool {
        matches!(
            self,
            ServiceError::AlreadyConnected
                | ServiceError::FederationExists(_)
                | ServiceError::AlreadyJoined
                | ServiceError::TimeConstrainedAlreadyEnabled
                | ServiceError::TimeRegulationAlreadyEnabled
                | ServiceError::TimeConstrainedNotEnabled
                | ServiceError::TimeRegulationNotEnabled
                | ServiceError::NotJoined
                | ServiceError::NotConnected
                | ServiceError::FederatesCurrentlyJoined(_)
                | ServiceError::FederationNotFound(_)
        )
    }
}

/// Operations a federate needs from the coordination service
pub trait CoordinationService: Send {
    fn connect(&mut self) -> Result<(), ServiceError>;

    fn disconnect(&mut self) -> Result<(), ServiceError>;

    fn create_federation(&mut self, federation: &str, object_model: &ObjectModel) -> Result<(), ServiceError>;

    fn destroy_federation(&mut self, federation: &str) -> Result<(), ServiceError>;

    fn join(
        &mut self,
        federate_name: &str,
        federate_type: &str,
        federation: &str,
    ) -> Result<FederateHandle, ServiceError>;

    /// Leave the federation, deleting owned object instances
    fn resign(&mut self) -> Result<(), ServiceError>;

    fn enable_time_constrained(&mut self) -> Result<(), ServiceError>;

    fn disable_time_constrained(&mut self) -> Result<(), ServiceError>;

    fn enable_time_regulation(&mut self, lookahead: f64) -> Result<(), ServiceError>;

    fn disable_time_regulation(&mut self) -> Result<(), ServiceError>;

    fn register_sync_point(&mut self, label: &str) -> Result<(), ServiceError>;

    fn sync_point_achieved(&mut self, label: &str) -> Result<(), ServiceError>;

    fn time_advance_request(&mut self, time: f64) -> Result<(), ServiceError>;

    fn publish_class(&mut self, class: &str, attributes: &[String]) -> Result<(), ServiceError>;

    fn subscribe_class(&mut self, class: &str, attributes: &[String]) -> Result<(), ServiceError>;

    fn register_object(&mut self, class: &str, name: &str) -> Result<ObjectHandle, ServiceError>;

    fn update_attributes(&mut self, handle: ObjectHandle, attributes: AttributeMap) -> Result<(), ServiceError>;

    fn delete_object(&mut self, handle: ObjectHandle) -> Result<(), ServiceError>;

    /// Class name of a known object instance
    fn object_class(&self, handle: ObjectHandle) -> Result<String, ServiceError>;

    /// Instance name of a known object instance
    fn object_name(&self, handle: ObjectHandle) -> Result<String, ServiceError>;

    /// Drain queued callbacks, waiting at most `max_wait` for the first one
    fn evoke_callbacks(&mut self, max_wait: Duration) -> Result<Vec<ServiceEvent>, ServiceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_benign_errors() {
        assert!(ServiceError::AlreadyJoined.is_benign());
        assert!(ServiceError::FederationExists("f".into()).is_benign());
        assert!(!ServiceError::Disconnected.is_benign());
        assert!(!ServiceError::InvalidTime {
            requested: 1.0,
            current: 2.0
        }
        .is_benign());
    }
}
