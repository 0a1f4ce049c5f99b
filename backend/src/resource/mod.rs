//! Resource algebra
//!
//! Typed resource quantities exchanged between entities. A [`Resource`] is a
//! vector with exactly one component per [`ResourceKind`]; a [`ResourceMatrix`]
//! maps one resource vector onto another using fixed per-unit ratios.
//!
//! # Critical Invariants
//!
//! 1. Dimension is always `ResourceKind::COUNT`
//! 2. Equality and zero tests use [`EPSILON`], never exact comparison
//! 3. No arithmetic operation panics for finite inputs (division by a
//!    near-zero component yields zero for that component)
//! 4. The numeric backend is chosen once through a [`ResourceFactory`]

pub mod factory;
pub mod matrix;
pub mod vector;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use factory::{NumericBackend, ResourceError, ResourceFactory};
pub use matrix::ResourceMatrix;
pub use vector::Resource;

/// Tolerance used for equality and zero tests on resource quantities.
pub const EPSILON: f64 = 1e-12;

/// Closed set of resource kinds.
///
/// The declaration order is the component order of every [`Resource`] and is
/// the order used when formatting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Electricity,
    Oil,
    Reserves,
    Water,
    Aquifer,
    People,
}

impl ResourceKind {
    /// Number of resource kinds (vector dimension)
    pub const COUNT: usize = 6;

    /// All kinds in component order
    pub const ALL: [ResourceKind; Self::COUNT] = [
        ResourceKind::Electricity,
        ResourceKind::Oil,
        ResourceKind::Reserves,
        ResourceKind::Water,
        ResourceKind::Aquifer,
        ResourceKind::People,
    ];

    /// Component index of this kind
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Electricity => "electricity",
            ResourceKind::Oil => "oil",
            ResourceKind::Reserves => "reserves",
            ResourceKind::Water => "water",
            ResourceKind::Aquifer => "aquifer",
            ResourceKind::People => "people",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = ResourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim();
        ResourceKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(needle))
            .ok_or_else(|| ResourceError::UnknownKind(s.to_string()))
    }
}
