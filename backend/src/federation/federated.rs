//! Ambassador backed by a coordination service
//!
//! # Lifecycle
//!
//! 1. `connect`: connect, create the federation (tolerating a race with
//!    another federate), join.
//! 2. `initialize`: enable time constrained and time regulation with
//!    lookahead `step / iterations`, publish and subscribe every object
//!    class, barrier `join`, register local objects, barrier `init`, push
//!    static attributes, resolve links, then advance to the initial time.
//! 3. `advance`: for each iterate round, iterate every local entity, push
//!    periodic attributes and request the next logical time. Reflections
//!    from peers arrive before the grant, so the next round sees them.
//! 4. `disconnect`: disable time management, resign, destroy the
//!    federation. Races with other federates tearing down are ignored.
//!
//! All waits pump callbacks for at most one poll interval at a time and are
//! bounded by the configured timeout and cancel token.

use crate::federation::config::FederationConfig;
use crate::federation::linking::{resolve_all, warn_missing};
use crate::federation::mirror::{Discovery, ObjectDirectory};
use crate::federation::object_model::ObjectModel;
use crate::federation::service::{
    CoordinationService, ObjectHandle, ServiceError, ServiceEvent, SyncFailureReason,
};
use crate::federation::sync::SyncPoints;
use crate::federation::wait::{CancelToken, Waiter};
use crate::federation::{validate_timing, Ambassador, FederationError};
use crate::models::{attribute, AttributeMap, ElementTable, Entity, EntityId};
use std::collections::BTreeMap;
use tracing::{debug, error, info, trace, warn};

/// Barrier reached once every federate has joined and enabled time management
pub const JOIN_POINT: &str = "join";

/// Barrier reached once every federate has registered its objects
pub const INIT_POINT: &str = "init";

#[derive(Debug, Clone, Copy, Default)]
struct FederateClock {
    constrained: bool,
    regulating: bool,
    granted: bool,
    logical_time: f64,
}

pub struct FederatedAmbassador<S: CoordinationService> {
    service: S,
    config: FederationConfig,
    model: ObjectModel,
    waiter: Waiter,
    sync: SyncPoints,
    clock: FederateClock,
    directory: ObjectDirectory,
    objects: BTreeMap<EntityId, ObjectHandle>,
    iterations: u32,
    step: i64,
    lookahead: f64,
}

impl<S: CoordinationService> FederatedAmbassador<S> {
    pub fn new(service: S, config: FederationConfig, model: ObjectModel) -> Self {
        let waiter = Waiter::new(config.poll_interval(), config.wait_timeout());
        Self {
            service,
            config,
            model,
            waiter,
            sync: SyncPoints::new(),
            clock: FederateClock::default(),
            directory: ObjectDirectory::new(0),
            objects: BTreeMap::new(),
            iterations: 1,
            step: 1,
            lookahead: 1.0,
        }
    }

    /// Share a cancel token, e.g. to abort every wait from another thread
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.waiter = self.waiter.with_cancel_token(cancel);
        self
    }

    pub fn cancel_token(&self) -> &CancelToken {
        self.waiter.cancel_token()
    }

    pub fn config(&self) -> &FederationConfig {
        &self.config
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    pub fn directory(&self) -> &ObjectDirectory {
        &self.directory
    }

    pub fn sync_points(&self) -> &SyncPoints {
        &self.sync
    }

    pub fn logical_time(&self) -> f64 {
        self.clock.logical_time
    }

    pub fn lookahead(&self) -> f64 {
        self.lookahead
    }

    pub fn is_time_constrained(&self) -> bool {
        self.clock.constrained
    }

    pub fn is_time_regulating(&self) -> bool {
        self.clock.regulating
    }

    /// Object handle registered for a local entity
    pub fn object_handle(&self, id: EntityId) -> Option<ObjectHandle> {
        self.objects.get(&id).copied()
    }

    // ------------------------------------------------------------------------
    // Callback handling
    // ------------------------------------------------------------------------

    /// Deliver queued callbacks, waiting at most one poll interval
    pub fn pump(&mut self) -> Result<(), FederationError> {
        let events = self.service.evoke_callbacks(self.waiter.poll_interval())?;
        for event in events {
            self.handle_event(event);
        }
        Ok(())
    }

    pub fn handle_event(&mut self, event: ServiceEvent) {
        if let ServiceEvent::SyncPointRegistrationFailed {
            label,
            reason: SyncFailureReason::LabelNotUnique,
        } = &event
        {
            debug!(label = %label, "Sync point already registered by another federate");
        }
        if self.sync.apply(&event) {
            trace!(event = ?event, "Sync callback");
            return;
        }
        match event {
            ServiceEvent::TimeConstrainedEnabled { time } => {
                self.clock.constrained = true;
                self.clock.logical_time = time;
            }
            ServiceEvent::TimeRegulationEnabled { time } => {
                self.clock.regulating = true;
                self.clock.logical_time = time;
            }
            ServiceEvent::TimeAdvanceGranted { time } => {
                self.clock.granted = true;
                self.clock.logical_time = time;
            }
            ServiceEvent::ObjectDiscovered { handle, class, name } => {
                self.directory.discover(handle, &class, &name, &self.model);
            }
            ServiceEvent::AttributesReflected { handle, attributes } => {
                self.reflect(handle, &attributes);
            }
            ServiceEvent::ObjectRemoved { handle } => {
                if let Some(remote) = self.directory.remove(handle) {
                    info!(name = %remote.name(), object = %handle, "Remote element removed");
                }
            }
            _ => {}
        }
    }

    fn reflect(&mut self, handle: ObjectHandle, attributes: &AttributeMap) {
        if self.directory.is_own(handle) || self.directory.reflect(handle, attributes) {
            return;
        }
        // Reflection overtook discovery: ask the service what this is
        match (self.service.object_class(handle), self.service.object_name(handle)) {
            (Ok(class), Ok(name)) => match self.directory.discover(handle, &class, &name, &self.model) {
                Discovery::Discovered(_) | Discovery::AlreadyKnown(_) => {
                    self.directory.reflect(handle, attributes);
                }
                Discovery::UnknownClass | Discovery::Own => {}
            },
            (Err(e), _) | (_, Err(e)) => {
                warn!(object = %handle, error = %e, "Dropping reflection for unknown object");
            }
        }
    }

    fn wait_for(&mut self, what: &str, done: impl Fn(&Self) -> bool) -> Result<(), FederationError> {
        let started = self.waiter.start();
        loop {
            if done(self) {
                return Ok(());
            }
            self.waiter.check(started, what)?;
            self.pump()?;
        }
    }

    // ------------------------------------------------------------------------
    // Handshakes
    // ------------------------------------------------------------------------

    /// Register `label`, wait for its announcement, report it achieved and
    /// wait until the whole federation has
    pub fn synchronize(&mut self, label: &str) -> Result<(), FederationError> {
        debug!(label, "Registering sync point");
        self.service.register_sync_point(label)?;

        let what = format!("sync point {}", label);
        let started = self.waiter.start();
        loop {
            if let Some(tracker) = self.sync.get(label) {
                if let Some(reason) = tracker.registration_error() {
                    return Err(FederationError::SyncRegistrationFailed {
                        label: label.to_string(),
                        reason: reason.clone(),
                    });
                }
                if tracker.registration().is_some() && tracker.is_announced() {
                    break;
                }
            }
            self.waiter.check(started, &what)?;
            self.pump()?;
        }

        self.service.sync_point_achieved(label)?;
        self.sync.entry(label).mark_achieved();
        self.wait_for(&what, |a| a.sync.is_complete(label))?;
        info!(label, "Federation synchronized");
        Ok(())
    }

    fn enable_time_management(&mut self) -> Result<(), FederationError> {
        match self.service.enable_time_constrained() {
            Ok(()) => {}
            Err(ServiceError::TimeConstrainedAlreadyEnabled) => self.clock.constrained = true,
            Err(e) => return Err(e.into()),
        }
        self.wait_for("time constrained", |a| a.clock.constrained)?;

        match self.service.enable_time_regulation(self.lookahead) {
            Ok(()) => {}
            Err(ServiceError::TimeRegulationAlreadyEnabled) => self.clock.regulating = true,
            Err(e) => return Err(e.into()),
        }
        self.wait_for("time regulation", |a| a.clock.regulating)?;
        debug!(lookahead = self.lookahead, time = self.clock.logical_time, "Time management enabled");
        Ok(())
    }

    fn declare_interests(&mut self) -> Result<(), FederationError> {
        for (class, declaration) in self.model.classes() {
            self.service.publish_class(class, &declaration.attributes)?;
            self.service.subscribe_class(class, &declaration.attributes)?;
        }
        Ok(())
    }

    fn register_objects(&mut self, entities: &[Entity]) -> Result<(), FederationError> {
        for entity in entities {
            if !self.model.contains(entity.class()) {
                warn!(entity = %entity.name(), class = %entity.class(), "Class not in object model, not registering");
                continue;
            }
            let handle = self.service.register_object(entity.class(), entity.name())?;
            self.directory.mark_own(handle);
            self.objects.insert(entity.id(), handle);
            debug!(entity = %entity.name(), object = %handle, "Registered object");
        }
        Ok(())
    }

    /// Push static (`true`) or periodic (`false`) attributes of every
    /// registered local element, filtered to what its class declares
    fn push_attributes(&mut self, table: &ElementTable, static_only: bool) -> Result<(), FederationError> {
        for (id, handle) in &self.objects {
            let Some(record) = table.get(*id) else {
                continue;
            };
            let attributes: AttributeMap = record
                .attributes()
                .into_iter()
                .filter(|(key, _)| {
                    attribute::is_static(key) == static_only && self.model.declares(&record.class, key)
                })
                .collect();
            if !attributes.is_empty() {
                self.service.update_attributes(*handle, attributes)?;
            }
        }
        Ok(())
    }

    fn resolve_links(&mut self, entities: &mut [Entity]) -> Result<(), FederationError> {
        let started = self.waiter.start();
        let limit = self.config.link_timeout();
        loop {
            let table = self.elements(entities, self.step);
            let incomplete = resolve_all(entities, &table);
            if incomplete == 0 {
                return Ok(());
            }
            if started.elapsed() >= limit {
                warn!(incomplete, waited = ?started.elapsed(), "Link resolution timed out");
                warn_missing(entities);
                return Ok(());
            }
            if self.waiter.cancel_token().is_cancelled() {
                return Err(FederationError::Cancelled {
                    waiting_for: "link resolution".to_string(),
                });
            }
            self.pump()?;
        }
    }

    fn advance_time_to(&mut self, time: f64) -> Result<(), FederationError> {
        self.clock.granted = false;
        self.service.time_advance_request(time)?;
        self.wait_for(&format!("time advance to {}", time), |a| a.clock.granted)?;
        trace!(time = self.clock.logical_time, "Time advance granted");
        Ok(())
    }
}

impl<S: CoordinationService> Ambassador for FederatedAmbassador<S> {
    fn connect(&mut self) -> Result<(), FederationError> {
        info!(
            federation = %self.config.federation_name,
            federate = %self.config.federate_name,
            "Connecting to federation"
        );
        tolerate(self.service.connect(), "connect")?;
        tolerate(
            self.service
                .create_federation(&self.config.federation_name, &self.model),
            "create federation",
        )?;
        match self.service.join(
            &self.config.federate_name,
            &self.config.federate_type,
            &self.config.federation_name,
        ) {
            Ok(handle) => info!(federate = %handle, "Joined federation"),
            Err(e) if e.is_benign() => trace!(error = %e, "Already joined"),
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    fn initialize(
        &mut self,
        entities: &mut [Entity],
        initial_time: i64,
        iterations: u32,
        step: i64,
    ) -> Result<(), FederationError> {
        validate_timing(iterations, step)?;
        self.iterations = iterations;
        self.step = step;
        self.lookahead = step as f64 / iterations as f64;
        self.directory = ObjectDirectory::new(entities.len());
        self.objects.clear();

        self.enable_time_management()?;
        self.declare_interests()?;
        self.synchronize(JOIN_POINT)?;

        self.register_objects(entities)?;
        self.synchronize(INIT_POINT)?;

        let table = self.elements(entities, step);
        self.push_attributes(&table, true)?;
        self.resolve_links(entities)?;

        if initial_time as f64 > self.clock.logical_time {
            self.advance_time_to(initial_time as f64)?;
        }
        info!(
            federate = %self.config.federate_name,
            time = self.clock.logical_time,
            remotes = self.directory.len(),
            "Federate initialized"
        );
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

            let table = self.elements(entities, self.step);
            self.push_attributes(&table, false)?;
            let next = self.clock.logical_time + self.lookahead;
            self.advance_time_to(next)?;
            trace!(round, time = next, "Iterate round complete");
        }
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), FederationError> {
        let mut failure = None;
        settle(self.service.disable_time_constrained(), "disable time constrained", &mut failure);
        settle(self.service.disable_time_regulation(), "disable time regulation", &mut failure);
        settle(self.service.resign(), "resign", &mut failure);
        settle(
            self.service.destroy_federation(&self.config.federation_name),
            "destroy federation",
            &mut failure,
        );
        settle(self.service.disconnect(), "disconnect", &mut failure);
        self.clock = FederateClock::default();
        self.objects.clear();
        info!(federate = %self.config.federate_name, "Left federation");
        match failure {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    fn elements(&self, entities: &[Entity], duration: i64) -> ElementTable {
        ElementTable::assemble(entities, self.directory.records(), duration)
    }
}

fn tolerate(result: Result<(), ServiceError>, action: &str) -> Result<(), FederationError> {
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.is_benign() => {
            trace!(action, error = %e, "Ignoring benign service error");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Teardown step: benign errors are ignored, the first real one is kept
fn settle(result: Result<(), ServiceError>, action: &str, failure: &mut Option<ServiceError>) {
    match result {
        Ok(()) => {}
        Err(e) if e.is_benign() => trace!(action, error = %e, "Ignoring benign teardown error"),
        Err(e) => {
            error!(action, error = %e, "Teardown step failed");
            failure.get_or_insert(e);
        }
    }
}
