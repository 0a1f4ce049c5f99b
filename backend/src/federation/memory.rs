//! In-process coordination service
//!
//! [`InMemoryRti`] holds federation state behind one mutex; every federate
//! gets an [`RtiConnection`] with its own callback channel. All callbacks are
//! queued while the lock is held, so every federate observes the same global
//! order of events: an attribute update sent before a time advance request is
//! always delivered before the grant it enables.
//!
//! # Time management
//!
//! Conservative lockstep: a time-constrained federate requesting `t` is
//! granted once `t` is below every other regulating federate's bound, where
//! the bound is that federate's pending request (or current time) plus its
//! lookahead.
//!
//! # Synchronization points
//!
//! A label is registered once; later registrations fail with
//! [`SyncFailureReason::LabelNotUnique`]. The point is announced to every
//! joined federate (and to late joiners on join) and synchronizes once all
//! of them have achieved it and at least the expected number of federates
//! has joined.

use crate::federation::object_model::ObjectModel;
use crate::federation::service::{
    CoordinationService, FederateHandle, ObjectHandle, ServiceError, ServiceEvent, SyncFailureReason,
};
use crate::models::AttributeMap;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

// ============================================================================
// Shared state
// ============================================================================

#[derive(Debug)]
struct FederateEntry {
    name: String,
    sender: Sender<ServiceEvent>,
    time: f64,
    lookahead: f64,
    constrained: bool,
    regulating: bool,
    pending: Option<f64>,
    published: BTreeSet<String>,
    subscribed: BTreeSet<String>,
}

impl FederateEntry {
    fn send(&self, event: ServiceEvent) {
        // A dropped receiver means the federate is gone; resign cleans up
        let _ = self.sender.send(event);
    }

    /// Earliest time this federate may still send messages for
    fn bound(&self) -> f64 {
        self.pending.unwrap_or(self.time) + self.lookahead
    }
}

#[derive(Debug, Default)]
struct SyncPoint {
    participants: BTreeSet<FederateHandle>,
    achieved: BTreeSet<FederateHandle>,
}

#[derive(Debug)]
struct ObjectEntry {
    class: String,
    name: String,
    owner: FederateHandle,
    attributes: AttributeMap,
}

#[derive(Debug)]
struct Federation {
    model: ObjectModel,
    federates: BTreeMap<FederateHandle, FederateEntry>,
    sync_points: BTreeMap<String, SyncPoint>,
    objects: HashMap<ObjectHandle, ObjectEntry>,
}

impl Federation {
    fn new(model: ObjectModel) -> Self {
        Self {
            model,
            federates: BTreeMap::new(),
            sync_points: BTreeMap::new(),
            objects: HashMap::new(),
        }
    }

    fn federate(&self, handle: FederateHandle) -> Result<&FederateEntry, ServiceError> {
        self.federates.get(&handle).ok_or(ServiceError::NotJoined)
    }

    fn federate_mut(&mut self, handle: FederateHandle) -> Result<&mut FederateEntry, ServiceError> {
        self.federates.get_mut(&handle).ok_or(ServiceError::NotJoined)
    }

    /// Federates subscribed to `class`, excluding `except`
    fn subscribers(&self, class: &str, except: FederateHandle) -> impl Iterator<Item = &FederateEntry> {
        let class = class.to_string();
        self.federates
            .iter()
            .filter(move |(h, f)| **h != except && f.subscribed.contains(&class))
            .map(|(_, f)| f)
    }

    fn check_sync(&mut self, label: &str, expected: usize) {
        let ready = match self.sync_points.get(label) {
            Some(point) => {
                self.federates.len() >= expected
                    && !point.participants.is_empty()
                    && point.participants.is_subset(&point.achieved)
            }
            None => false,
        };
        if !ready {
            return;
        }
        if let Some(point) = self.sync_points.remove(label) {
            debug!(label, federates = point.participants.len(), "Federation synchronized");
            for handle in &point.participants {
                if let Some(federate) = self.federates.get(handle) {
                    federate.send(ServiceEvent::FederationSynchronized {
                        label: label.to_string(),
                    });
                }
            }
        }
    }

    fn check_all_sync(&mut self, expected: usize) {
        let labels: Vec<String> = self.sync_points.keys().cloned().collect();
        for label in labels {
            self.check_sync(&label, expected);
        }
    }

    /// Grant every pending request that is now safe
    fn try_grants(&mut self) {
        loop {
            let grantable = self.federates.iter().find_map(|(handle, federate)| {
                let requested = federate.pending?;
                let safe = !federate.constrained
                    || self
                        .federates
                        .iter()
                        .filter(|(other, f)| *other != handle && f.regulating)
                        .all(|(_, f)| requested < f.bound());
                safe.then_some(*handle)
            });
            let Some(handle) = grantable else {
                return;
            };
            if let Some(federate) = self.federates.get_mut(&handle) {
                if let Some(time) = federate.pending.take() {
                    federate.time = time;
                    trace!(federate = %federate.name, time, "Time advance granted");
                    federate.send(ServiceEvent::TimeAdvanceGranted { time });
                }
            }
        }
    }

    fn remove_object(&mut self, handle: ObjectHandle) {
        if let Some(object) = self.objects.remove(&handle) {
            for federate in self.subscribers(&object.class, object.owner) {
                federate.send(ServiceEvent::ObjectRemoved { handle });
            }
        }
    }
}

#[derive(Debug)]
struct RtiState {
    expected_federates: usize,
    federations: HashMap<String, Federation>,
}

// ============================================================================
// RTI
// ============================================================================

/// Shared in-process coordination service
#[derive(Debug, Clone)]
pub struct InMemoryRti {
    state: Arc<Mutex<RtiState>>,
}

impl InMemoryRti {
    pub fn new() -> Self {
        Self::expecting(1)
    }

    /// Sync points wait until at least `federates` have joined
    pub fn expecting(federates: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(RtiState {
                expected_federates: federates.max(1),
                federations: HashMap::new(),
            })),
        }
    }

    /// New client connection with its own callback queue
    pub fn connection(&self) -> RtiConnection {
        let (sender, receiver) = channel::unbounded();
        RtiConnection {
            rti: self.clone(),
            connected: false,
            membership: None,
            sender,
            receiver,
        }
    }

    pub fn federation_exists(&self, name: &str) -> bool {
        self.state.lock().federations.contains_key(name)
    }

    pub fn joined_federates(&self, federation: &str) -> usize {
        self.state
            .lock()
            .federations
            .get(federation)
            .map(|f| f.federates.len())
            .unwrap_or(0)
    }

    pub fn object_count(&self, federation: &str) -> usize {
        self.state
            .lock()
            .federations
            .get(federation)
            .map(|f| f.objects.len())
            .unwrap_or(0)
    }
}

impl Default for InMemoryRti {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
struct Membership {
    federation: String,
    handle: FederateHandle,
}

/// One federate's session with an [`InMemoryRti`]
#[derive(Debug)]
pub struct RtiConnection {
    rti: InMemoryRti,
    connected: bool,
    membership: Option<Membership>,
    sender: Sender<ServiceEvent>,
    receiver: Receiver<ServiceEvent>,
}

impl RtiConnection {
    pub fn federate_handle(&self) -> Option<FederateHandle> {
        self.membership.as_ref().map(|m| m.handle)
    }

    fn ensure_connected(&self) -> Result<(), ServiceError> {
        if self.connected {
            Ok(())
        } else {
            Err(ServiceError::NotConnected)
        }
    }

    fn membership(&self) -> Result<&Membership, ServiceError> {
        self.ensure_connected()?;
        self.membership.as_ref().ok_or(ServiceError::NotJoined)
    }

    /// Run `f` against our federation with the lock held
    fn with_federation<T>(
        &self,
        f: impl FnOnce(&mut Federation, FederateHandle, usize) -> Result<T, ServiceError>,
    ) -> Result<T, ServiceError> {
        let membership = self.membership()?;
        let mut state = self.rti.state.lock();
        let expected = state.expected_federates;
        let federation = state
            .federations
            .get_mut(&membership.federation)
            .ok_or_else(|| ServiceError::FederationNotFound(membership.federation.clone()))?;
        f(federation, membership.handle, expected)
    }
}

impl CoordinationService for RtiConnection {
    fn connect(&mut self) -> Result<(), ServiceError> {
        if self.connected {
            return Err(ServiceError::AlreadyConnected);
        }
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), ServiceError> {
        self.ensure_connected()?;
        if self.membership.is_some() {
            self.resign()?;
        }
        self.connected = false;
        Ok(())
    }

    fn create_federation(&mut self, federation: &str, object_model: &ObjectModel) -> Result<(), ServiceError> {
        self.ensure_connected()?;
        let mut state = self.rti.state.lock();
        if state.federations.contains_key(federation) {
            return Err(ServiceError::FederationExists(federation.to_string()));
        }
        state
            .federations
            .insert(federation.to_string(), Federation::new(object_model.clone()));
        debug!(federation, "Federation created");
        Ok(())
    }

    fn destroy_federation(&mut self, federation: &str) -> Result<(), ServiceError> {
        self.ensure_connected()?;
        let mut state = self.rti.state.lock();
        match state.federations.get(federation) {
            None => Err(ServiceError::FederationNotFound(federation.to_string())),
            Some(f) if !f.federates.is_empty() => {
                Err(ServiceError::FederatesCurrentlyJoined(federation.to_string()))
            }
            Some(_) => {
                state.federations.remove(federation);
                debug!(federation, "Federation destroyed");
                Ok(())
            }
        }
    }

    fn join(
        &mut self,
        federate_name: &str,
        _federate_type: &str,
        federation: &str,
    ) -> Result<FederateHandle, ServiceError> {
        self.ensure_connected()?;
        if self.membership.is_some() {
            return Err(ServiceError::AlreadyJoined);
        }
        let handle = FederateHandle::new();
        let mut state = self.rti.state.lock();
        let expected = state.expected_federates;
        let fed = state
            .federations
            .get_mut(federation)
            .ok_or_else(|| ServiceError::FederationNotFound(federation.to_string()))?;

        let entry = FederateEntry {
            name: federate_name.to_string(),
            sender: self.sender.clone(),
            time: 0.0,
            lookahead: 0.0,
            constrained: false,
            regulating: false,
            pending: None,
            published: BTreeSet::new(),
            subscribed: BTreeSet::new(),
        };
        for (label, point) in fed.sync_points.iter_mut() {
            point.participants.insert(handle);
            entry.send(ServiceEvent::SyncPointAnnounced {
                label: label.clone(),
            });
        }
        fed.federates.insert(handle, entry);
        fed.check_all_sync(expected);
        debug!(federation, federate = federate_name, "Federate joined");

        self.membership = Some(Membership {
            federation: federation.to_string(),
            handle,
        });
        Ok(handle)
    }

    fn resign(&mut self) -> Result<(), ServiceError> {
        self.with_federation(|fed, me, expected| {
            let owned: Vec<ObjectHandle> = fed
                .objects
                .iter()
                .filter(|(_, o)| o.owner == me)
                .map(|(h, _)| *h)
                .collect();
            for handle in owned {
                fed.remove_object(handle);
            }
            fed.federates.remove(&me);
            for point in fed.sync_points.values_mut() {
                point.participants.remove(&me);
                point.achieved.remove(&me);
            }
            fed.check_all_sync(expected);
            fed.try_grants();
            Ok(())
        })?;
        self.membership = None;
        Ok(())
    }

    fn enable_time_constrained(&mut self) -> Result<(), ServiceError> {
        self.with_federation(|fed, me, _| {
            let federate = fed.federate_mut(me)?;
            if federate.constrained {
                return Err(ServiceError::TimeConstrainedAlreadyEnabled);
            }
            federate.constrained = true;
            federate.send(ServiceEvent::TimeConstrainedEnabled { time: federate.time });
            Ok(())
        })
    }

    fn disable_time_constrained(&mut self) -> Result<(), ServiceError> {
        self.with_federation(|fed, me, _| {
            let federate = fed.federate_mut(me)?;
            if !federate.constrained {
                return Err(ServiceError::TimeConstrainedNotEnabled);
            }
            federate.constrained = false;
            fed.try_grants();
            Ok(())
        })
    }

    fn enable_time_regulation(&mut self, lookahead: f64) -> Result<(), ServiceError> {
        if !(lookahead > 0.0) || !lookahead.is_finite() {
            return Err(ServiceError::InvalidLookahead(lookahead));
        }
        self.with_federation(|fed, me, _| {
            let federate = fed.federate_mut(me)?;
            if federate.regulating {
                return Err(ServiceError::TimeRegulationAlreadyEnabled);
            }
            federate.regulating = true;
            federate.lookahead = lookahead;
            federate.send(ServiceEvent::TimeRegulationEnabled { time: federate.time });
            Ok(())
        })
    }

    fn disable_time_regulation(&mut self) -> Result<(), ServiceError> {
        self.with_federation(|fed, me, _| {
            let federate = fed.federate_mut(me)?;
            if !federate.regulating {
                return Err(ServiceError::TimeRegulationNotEnabled);
            }
            federate.regulating = false;
            fed.try_grants();
            Ok(())
        })
    }

    fn register_sync_point(&mut self, label: &str) -> Result<(), ServiceError> {
        self.with_federation(|fed, me, _| {
            let federate = fed.federate(me)?;
            if fed.sync_points.contains_key(label) {
                federate.send(ServiceEvent::SyncPointRegistrationFailed {
                    label: label.to_string(),
                    reason: SyncFailureReason::LabelNotUnique,
                });
                return Ok(());
            }
            federate.send(ServiceEvent::SyncPointRegistered {
                label: label.to_string(),
            });
            let point = SyncPoint {
                participants: fed.federates.keys().copied().collect(),
                achieved: BTreeSet::new(),
            };
            for federate in fed.federates.values() {
                federate.send(ServiceEvent::SyncPointAnnounced {
                    label: label.to_string(),
                });
            }
            fed.sync_points.insert(label.to_string(), point);
            debug!(label, "Sync point registered");
            Ok(())
        })
    }

    fn sync_point_achieved(&mut self, label: &str) -> Result<(), ServiceError> {
        self.with_federation(|fed, me, expected| {
            let point = fed
                .sync_points
                .get_mut(label)
                .filter(|p| p.participants.contains(&me))
                .ok_or_else(|| ServiceError::UnknownSyncPoint(label.to_string()))?;
            point.achieved.insert(me);
            fed.check_sync(label, expected);
            Ok(())
        })
    }

    fn time_advance_request(&mut self, time: f64) -> Result<(), ServiceError> {
        self.with_federation(|fed, me, _| {
            let federate = fed.federate_mut(me)?;
            if federate.pending.is_some() {
                return Err(ServiceError::TimeAdvancePending);
            }
            if time < federate.time {
                return Err(ServiceError::InvalidTime {
                    requested: time,
                    current: federate.time,
                });
            }
            federate.pending = Some(time);
            fed.try_grants();
            Ok(())
        })
    }

    fn publish_class(&mut self, class: &str, _attributes: &[String]) -> Result<(), ServiceError> {
        self.with_federation(|fed, me, _| {
            if !fed.model.contains(class) {
                return Err(ServiceError::UnknownClass(class.to_string()));
            }
            fed.federate_mut(me)?.published.insert(class.to_string());
            Ok(())
        })
    }

    fn subscribe_class(&mut self, class: &str, _attributes: &[String]) -> Result<(), ServiceError> {
        self.with_federation(|fed, me, _| {
            if !fed.model.contains(class) {
                return Err(ServiceError::UnknownClass(class.to_string()));
            }
            let federate = fed.federate_mut(me)?;
            if !federate.subscribed.insert(class.to_string()) {
                return Ok(());
            }
            // Existing instances become visible to the new subscriber
            let federate = fed.federate(me)?;
            for (handle, object) in fed.objects.iter().filter(|(_, o)| o.class == class && o.owner != me) {
                federate.send(ServiceEvent::ObjectDiscovered {
                    handle: *handle,
                    class: object.class.clone(),
                    name: object.name.clone(),
                });
                if !object.attributes.is_empty() {
                    federate.send(ServiceEvent::AttributesReflected {
                        handle: *handle,
                        attributes: object.attributes.clone(),
                    });
                }
            }
            Ok(())
        })
    }

    fn register_object(&mut self, class: &str, name: &str) -> Result<ObjectHandle, ServiceError> {
        self.with_federation(|fed, me, _| {
            if !fed.federate(me)?.published.contains(class) {
                return Err(ServiceError::ClassNotPublished(class.to_string()));
            }
            let handle = ObjectHandle::new();
            fed.objects.insert(
                handle,
                ObjectEntry {
                    class: class.to_string(),
                    name: name.to_string(),
                    owner: me,
                    attributes: AttributeMap::new(),
                },
            );
            for federate in fed.subscribers(class, me) {
                federate.send(ServiceEvent::ObjectDiscovered {
                    handle,
                    class: class.to_string(),
                    name: name.to_string(),
                });
            }
            Ok(handle)
        })
    }

    fn update_attributes(&mut self, handle: ObjectHandle, attributes: AttributeMap) -> Result<(), ServiceError> {
        self.with_federation(|fed, me, _| {
            let object = fed
                .objects
                .get_mut(&handle)
                .ok_or(ServiceError::UnknownObject(handle))?;
            if object.owner != me {
                return Err(ServiceError::NotOwner(handle));
            }
            for (key, value) in &attributes {
                object.attributes.insert(key.clone(), value.clone());
            }
            let class = object.class.clone();
            for federate in fed.subscribers(&class, me) {
                federate.send(ServiceEvent::AttributesReflected {
                    handle,
                    attributes: attributes.clone(),
                });
            }
            Ok(())
        })
    }

    fn delete_object(&mut self, handle: ObjectHandle) -> Result<(), ServiceError> {
        self.with_federation(|fed, me, _| {
            let object = fed.objects.get(&handle).ok_or(ServiceError::UnknownObject(handle))?;
            if object.owner != me {
                return Err(ServiceError::NotOwner(handle));
            }
            fed.remove_object(handle);
            Ok(())
        })
    }

    fn object_class(&self, handle: ObjectHandle) -> Result<String, ServiceError> {
        self.with_federation(|fed, _, _| {
            fed.objects
                .get(&handle)
                .map(|o| o.class.clone())
                .ok_or(ServiceError::UnknownObject(handle))
        })
    }

    fn object_name(&self, handle: ObjectHandle) -> Result<String, ServiceError> {
        self.with_federation(|fed, _, _| {
            fed.objects
                .get(&handle)
                .map(|o| o.name.clone())
                .ok_or(ServiceError::UnknownObject(handle))
        })
    }

    fn evoke_callbacks(&mut self, max_wait: Duration) -> Result<Vec<ServiceEvent>, ServiceError> {
        self.ensure_connected()?;
        let first = match self.receiver.recv_timeout(max_wait) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) => return Ok(Vec::new()),
            Err(RecvTimeoutError::Disconnected) => return Err(ServiceError::Disconnected),
        };
        let mut events = vec![first];
        events.extend(self.receiver.try_iter());
        Ok(events)
    }
}
