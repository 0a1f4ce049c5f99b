//! Per-unit transformation table between resource kinds

use super::{Resource, ResourceKind};
use serde::{Deserialize, Serialize};
use std::array;
use std::fmt;

/// Square table with one [`Resource`] row per [`ResourceKind`].
///
/// `apply(input)` computes `Σ row[k] · input[k]`, so the row of `Water`
/// holds what one unit of water costs (or yields) in every other kind.
///
/// ```
/// use infra_cosim_core::resource::{ResourceFactory, ResourceKind, ResourceMatrix};
///
/// let factory = ResourceFactory::float();
/// let lift = ResourceMatrix::zero().with_row(
///     ResourceKind::Water,
///     factory.from_pairs(&[(ResourceKind::Aquifer, 1.0), (ResourceKind::Electricity, 0.9)]),
/// );
/// let consumed = lift.apply(&factory.quantity(ResourceKind::Water, 10.0));
/// assert_eq!(consumed.quantity(ResourceKind::Electricity), 9.0);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceMatrix {
    rows: [Resource; ResourceKind::COUNT],
}

impl ResourceMatrix {
    pub fn zero() -> Self {
        Self {
            rows: array::from_fn(|_| Resource::zero()),
        }
    }

    /// Matrix mapping every vector onto itself
    pub fn identity() -> Self {
        Self {
            rows: array::from_fn(|i| {
                Resource::zero().with_quantity(ResourceKind::ALL[i], 1.0)
            }),
        }
    }

    pub fn from_rows(rows: [Resource; ResourceKind::COUNT]) -> Self {
        Self { rows }
    }

    /// Copy of this matrix with the row of `kind` replaced
    pub fn with_row(mut self, kind: ResourceKind, row: Resource) -> Self {
        self.rows[kind.index()] = row;
        self
    }

    pub fn row(&self, kind: ResourceKind) -> &Resource {
        &self.rows[kind.index()]
    }

    pub fn add(&self, other: &ResourceMatrix) -> ResourceMatrix {
        self.zip_rows(other, |a, b| a.add(b))
    }

    pub fn negate(&self) -> ResourceMatrix {
        ResourceMatrix {
            rows: array::from_fn(|i| self.rows[i].negate()),
        }
    }

    pub fn subtract(&self, other: &ResourceMatrix) -> ResourceMatrix {
        self.add(&other.negate())
    }

    pub fn scale(&self, factor: f64) -> ResourceMatrix {
        ResourceMatrix {
            rows: array::from_fn(|i| self.rows[i].scale(factor)),
        }
    }

    /// Vector product `Σ row[k] · input[k]`
    pub fn apply(&self, input: &Resource) -> Resource {
        ResourceKind::ALL
            .iter()
            .map(|kind| self.rows[kind.index()].scale(input.quantity(*kind)))
            .fold(input.scale(0.0), |acc, term| acc.add(&term))
    }

    pub fn is_zero(&self) -> bool {
        self.rows.iter().all(Resource::is_zero)
    }

    fn zip_rows(
        &self,
        other: &ResourceMatrix,
        f: impl Fn(&Resource, &Resource) -> Resource,
    ) -> ResourceMatrix {
        ResourceMatrix {
            rows: array::from_fn(|i| f(&self.rows[i], &other.rows[i])),
        }
    }
}

impl PartialEq for ResourceMatrix {
    fn eq(&self, other: &Self) -> bool {
        self.subtract(other).is_zero()
    }
}

impl fmt::Display for ResourceMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rows: Vec<String> = self.rows.iter().map(|r| r.to_string()).collect();
        write!(f, "[{}]", rows.join(", "))
    }
}
