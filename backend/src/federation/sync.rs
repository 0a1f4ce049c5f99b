//! Synchronization point bookkeeping
//!
//! A barrier is complete only when four independent facts hold: our
//! registration attempt was answered (success or a benign failure), the
//! service announced the label, we reported it achieved, and the service
//! declared the federation synchronized. Callbacks may arrive in any order,
//! including before we register, so each fact is recorded separately.

use crate::federation::service::{ServiceEvent, SyncFailureReason};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncPointTracker {
    registration: Option<Result<(), SyncFailureReason>>,
    announced: bool,
    achieved: bool,
    synchronized: bool,
}

impl SyncPointTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_registered(&mut self) {
        self.registration = Some(Ok(()));
    }

    pub fn on_registration_failed(&mut self, reason: SyncFailureReason) {
        self.registration = Some(Err(reason));
    }

    pub fn on_announced(&mut self) {
        self.announced = true;
    }

    pub fn mark_achieved(&mut self) {
        self.achieved = true;
    }

    pub fn on_synchronized(&mut self) {
        self.synchronized = true;
    }

    pub fn registration(&self) -> Option<&Result<(), SyncFailureReason>> {
        self.registration.as_ref()
    }

    /// The registration attempt failed for a reason other than another
    /// federate having registered the label first
    pub fn registration_error(&self) -> Option<&SyncFailureReason> {
        match &self.registration {
            Some(Err(reason)) if *reason != SyncFailureReason::LabelNotUnique => Some(reason),
            _ => None,
        }
    }

    pub fn is_announced(&self) -> bool {
        self.announced
    }

    pub fn is_achieved(&self) -> bool {
        self.achieved
    }

    pub fn is_synchronized(&self) -> bool {
        self.synchronized
    }

    pub fn is_complete(&self) -> bool {
        self.registration.is_some() && self.announced && self.achieved && self.synchronized
    }
}

/// Trackers for every label seen by one federate
#[derive(Debug, Clone, Default)]
pub struct SyncPoints {
    points: BTreeMap<String, SyncPointTracker>,
}

impl SyncPoints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(&mut self, label: &str) -> &mut SyncPointTracker {
        self.points.entry(label.to_string()).or_default()
    }

    pub fn get(&self, label: &str) -> Option<&SyncPointTracker> {
        self.points.get(label)
    }

    pub fn is_complete(&self, label: &str) -> bool {
        self.get(label).map(SyncPointTracker::is_complete).unwrap_or(false)
    }

    /// Record a synchronization callback. Returns false for other events.
    pub fn apply(&mut self, event: &ServiceEvent) -> bool {
        match event {
            ServiceEvent::SyncPointRegistered { label } => self.entry(label).on_registered(),
            ServiceEvent::SyncPointRegistrationFailed { label, reason } => {
                self.entry(label).on_registration_failed(reason.clone())
            }
            ServiceEvent::SyncPointAnnounced { label } => self.entry(label).on_announced(),
            ServiceEvent::FederationSynchronized { label } => self.entry(label).on_synchronized(),
            _ => return false,
        }
        true
    }
}
