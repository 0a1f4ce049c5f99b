//! Resource construction
//!
//! The numeric backend is an explicit value carried by a [`ResourceFactory`],
//! chosen once at process start and handed to whatever needs to build
//! resources (entities, states, scenario bootstrap code).

use super::vector::decimal_from_f64;
use super::{Resource, ResourceKind};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::array;
use std::str::FromStr;
use thiserror::Error;

/// Errors raised while constructing resources from external input
#[derive(Debug, Error, PartialEq)]
pub enum ResourceError {
    #[error("Invalid quantity for {kind}: {input:?}")]
    InvalidQuantity { kind: ResourceKind, input: String },

    #[error("Expected {expected} quantities, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Unknown resource kind: {0}")]
    UnknownKind(String),
}

/// Numeric representation used for resource quantities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NumericBackend {
    /// `f64` components
    #[default]
    Float,
    /// Arbitrary-precision decimal components
    Decimal,
}

/// Builds resource vectors in a fixed numeric backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResourceFactory {
    backend: NumericBackend,
}

impl ResourceFactory {
    pub fn new(backend: NumericBackend) -> Self {
        Self { backend }
    }

    pub fn float() -> Self {
        Self::new(NumericBackend::Float)
    }

    pub fn decimal() -> Self {
        Self::new(NumericBackend::Decimal)
    }

    pub fn backend(&self) -> NumericBackend {
        self.backend
    }

    /// Zero vector in this factory's backend
    pub fn zero(&self) -> Resource {
        self.from_amounts([0.0; ResourceKind::COUNT])
    }

    /// Vector with a single nonzero component
    pub fn quantity(&self, kind: ResourceKind, amount: f64) -> Resource {
        self.from_pairs(&[(kind, amount)])
    }

    /// Vector built from `(kind, amount)` pairs; repeated kinds accumulate
    pub fn from_pairs(&self, pairs: &[(ResourceKind, f64)]) -> Resource {
        let mut amounts = [0.0; ResourceKind::COUNT];
        for (kind, amount) in pairs {
            amounts[kind.index()] += amount;
        }
        self.from_amounts(amounts)
    }

    /// Vector from all components in kind order
    pub fn from_amounts(&self, amounts: [f64; ResourceKind::COUNT]) -> Resource {
        match self.backend {
            NumericBackend::Float => Resource::from_floats(amounts),
            NumericBackend::Decimal => {
                Resource::from_decimals(array::from_fn(|i| decimal_from_f64(amounts[i])))
            }
        }
    }

    /// Vector from a slice of components in kind order
    pub fn from_slice(&self, amounts: &[f64]) -> Result<Resource, ResourceError> {
        let fixed: [f64; ResourceKind::COUNT] =
            amounts
                .try_into()
                .map_err(|_| ResourceError::DimensionMismatch {
                    expected: ResourceKind::COUNT,
                    actual: amounts.len(),
                })?;
        Ok(self.from_amounts(fixed))
    }

    /// Single-kind vector parsed from a string magnitude
    ///
    /// Decimal backends parse the literal directly, so `"0.1"` is exact.
    pub fn parse_quantity(&self, kind: ResourceKind, input: &str) -> Result<Resource, ResourceError> {
        self.parse_pairs(&[(kind, input)])
    }

    /// Vector parsed from `(kind, magnitude)` string pairs
    pub fn parse_pairs(&self, pairs: &[(ResourceKind, &str)]) -> Result<Resource, ResourceError> {
        match self.backend {
            NumericBackend::Float => {
                let mut amounts = [0.0; ResourceKind::COUNT];
                for (kind, input) in pairs {
                    amounts[kind.index()] += parse_float(*kind, input)?;
                }
                Ok(Resource::from_floats(amounts))
            }
            NumericBackend::Decimal => {
                let mut amounts = [Decimal::ZERO; ResourceKind::COUNT];
                for (kind, input) in pairs {
                    let slot = &mut amounts[kind.index()];
                    *slot = slot.saturating_add(parse_decimal(*kind, input)?);
                }
                Ok(Resource::from_decimals(amounts))
            }
        }
    }

    /// Vector parsed from all components in kind order
    pub fn parse_amounts(&self, inputs: &[&str]) -> Result<Resource, ResourceError> {
        if inputs.len() != ResourceKind::COUNT {
            return Err(ResourceError::DimensionMismatch {
                expected: ResourceKind::COUNT,
                actual: inputs.len(),
            });
        }
        let pairs: Vec<(ResourceKind, &str)> = ResourceKind::ALL
            .iter()
            .copied()
            .zip(inputs.iter().copied())
            .collect();
        self.parse_pairs(&pairs)
    }

    /// Re-express an existing vector in this factory's backend
    pub fn convert(&self, resource: &Resource) -> Resource {
        match self.backend {
            NumericBackend::Float => Resource::from_floats(resource.quantities()),
            NumericBackend::Decimal => Resource::from_decimals(resource.decimals()),
        }
    }
}

fn parse_float(kind: ResourceKind, input: &str) -> Result<f64, ResourceError> {
    input
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| ResourceError::InvalidQuantity {
            kind,
            input: input.to_string(),
        })
}

fn parse_decimal(kind: ResourceKind, input: &str) -> Result<Decimal, ResourceError> {
    let trimmed = input.trim();
    Decimal::from_str(trimmed)
        .or_else(|_| Decimal::from_scientific(trimmed))
        .map_err(|_| ResourceError::InvalidQuantity {
            kind,
            input: input.to_string(),
        })
}
