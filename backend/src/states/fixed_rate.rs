//! Constant-rate behavior

use crate::models::state::{State, StepContext, Storing, Transforming, Transporting};
use crate::resource::Resource;
use serde::{Deserialize, Serialize};

/// A pair of per-unit-time rates for one capability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatePair {
    pub inflow: Resource,
    pub outflow: Resource,
}

/// State whose quantities are `rate × duration`.
///
/// Capabilities are present only when configured: storage (`stored`,
/// `retrieved`), transformation (`produced`, `consumed`) and transport
/// (`input`, `output`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixedRateState {
    name: String,
    storage: Option<RatePair>,
    transformation: Option<RatePair>,
    transport: Option<RatePair>,
}

impl FixedRateState {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            storage: None,
            transformation: None,
            transport: None,
        }
    }

    /// Store `stored` and retrieve `retrieved` per unit time
    pub fn with_storage(mut self, stored: Resource, retrieved: Resource) -> Self {
        self.storage = Some(RatePair {
            inflow: stored,
            outflow: retrieved,
        });
        self
    }

    /// Produce `produced` and consume `consumed` per unit time
    pub fn with_transformation(mut self, produced: Resource, consumed: Resource) -> Self {
        self.transformation = Some(RatePair {
            inflow: produced,
            outflow: consumed,
        });
        self
    }

    /// Take in `input` at the origin and deliver `output` at the destination
    /// per unit time
    pub fn with_transport(mut self, input: Resource, output: Resource) -> Self {
        self.transport = Some(RatePair {
            inflow: input,
            outflow: output,
        });
        self
    }
}

fn over(rate: &Resource, duration: i64) -> Resource {
    rate.scale(duration as f64)
}

impl State for FixedRateState {
    fn name(&self) -> &str {
        &self.name
    }

    fn storing(&self) -> Option<&dyn Storing> {
        self.storage.as_ref().map(|_| self as &dyn Storing)
    }

    fn transforming(&self) -> Option<&dyn Transforming> {
        self.transformation.as_ref().map(|_| self as &dyn Transforming)
    }

    fn transporting(&self) -> Option<&dyn Transporting> {
        self.transport.as_ref().map(|_| self as &dyn Transporting)
    }
}

impl Storing for FixedRateState {
    fn stored(&self, ctx: &StepContext<'_>, duration: i64) -> Resource {
        self.storage
            .as_ref()
            .map_or_else(|| ctx.zero(), |r| over(&r.inflow, duration))
    }

    fn retrieved(&self, ctx: &StepContext<'_>, duration: i64) -> Resource {
        self.storage
            .as_ref()
            .map_or_else(|| ctx.zero(), |r| over(&r.outflow, duration))
    }
}

impl Transforming for FixedRateState {
    fn produced(&self, ctx: &StepContext<'_>, duration: i64) -> Resource {
        self.transformation
            .as_ref()
            .map_or_else(|| ctx.zero(), |r| over(&r.inflow, duration))
    }

    fn consumed(&self, ctx: &StepContext<'_>, duration: i64) -> Resource {
        self.transformation
            .as_ref()
            .map_or_else(|| ctx.zero(), |r| over(&r.outflow, duration))
    }
}

impl Transporting for FixedRateState {
    fn input(&self, ctx: &StepContext<'_>, duration: i64) -> Resource {
        self.transport
            .as_ref()
            .map_or_else(|| ctx.zero(), |r| over(&r.inflow, duration))
    }

    fn output(&self, ctx: &StepContext<'_>, duration: i64) -> Resource {
        self.transport
            .as_ref()
            .map_or_else(|| ctx.zero(), |r| over(&r.outflow, duration))
    }
}
