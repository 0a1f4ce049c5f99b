//! Resource vector with interchangeable numeric backends
//!
//! A [`Resource`] stores one quantity per [`ResourceKind`] either as `f64`
//! (fast) or as [`Decimal`] (no accumulated round-off). Both backends honor the
//! same contract:
//!
//! - equality and zero tests are tolerant to [`EPSILON`]
//! - division by a component within epsilon of zero yields zero
//! - no operation panics for finite inputs (decimal arithmetic saturates)
//!
//! Binary operations between a float and a decimal operand produce a decimal
//! result. [`Resource::zero`] is a float zero, which is exact under promotion.

use super::{NumericBackend, ResourceKind, EPSILON};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::array;
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};

const DIM: usize = ResourceKind::COUNT;

/// Maximum number of fractional digits rendered by `Display`.
const DISPLAY_DIGITS: u32 = 12;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "backend", content = "amounts", rename_all = "lowercase")]
enum Amounts {
    Float([f64; DIM]),
    Decimal([Decimal; DIM]),
}

/// Immutable vector of resource quantities.
///
/// # Example
/// ```
/// use infra_cosim_core::resource::{ResourceFactory, ResourceKind};
///
/// let factory = ResourceFactory::float();
/// let water = factory.quantity(ResourceKind::Water, 200.0);
/// let stored = factory.quantity(ResourceKind::Water, 10.0);
///
/// let total = water.add(&stored);
/// assert_eq!(total.quantity(ResourceKind::Water), 210.0);
/// assert!(total.subtract(&total).is_zero());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Resource {
    amounts: Amounts,
}

impl Resource {
    /// Zero vector (float backend)
    pub fn zero() -> Self {
        Self {
            amounts: Amounts::Float([0.0; DIM]),
        }
    }

    pub(crate) fn from_floats(amounts: [f64; DIM]) -> Self {
        Self {
            amounts: Amounts::Float(amounts),
        }
    }

    pub(crate) fn from_decimals(amounts: [Decimal; DIM]) -> Self {
        Self {
            amounts: Amounts::Decimal(amounts),
        }
    }

    /// Backend this vector is stored in
    pub fn backend(&self) -> NumericBackend {
        match self.amounts {
            Amounts::Float(_) => NumericBackend::Float,
            Amounts::Decimal(_) => NumericBackend::Decimal,
        }
    }

    /// Scalar quantity of one kind
    pub fn quantity(&self, kind: ResourceKind) -> f64 {
        match &self.amounts {
            Amounts::Float(a) => a[kind.index()],
            Amounts::Decimal(a) => a[kind.index()].to_f64().unwrap_or(0.0),
        }
    }

    /// All quantities in component order
    pub fn quantities(&self) -> [f64; DIM] {
        array::from_fn(|i| self.quantity(ResourceKind::ALL[i]))
    }

    /// Sum of all components
    pub fn total(&self) -> f64 {
        self.quantities().iter().sum()
    }

    /// Projection keeping only the component of `kind`
    pub fn get(&self, kind: ResourceKind) -> Resource {
        let keep = kind.index();
        self.map(
            |i, q| if i == keep { q } else { 0.0 },
            |i, q| if i == keep { q } else { Decimal::ZERO },
        )
    }

    pub fn add(&self, other: &Resource) -> Resource {
        self.zip_with(other, |a, b| a + b, |a, b| a.saturating_add(b))
    }

    pub fn negate(&self) -> Resource {
        self.map(|_, q| -q, |_, q| -q)
    }

    pub fn subtract(&self, other: &Resource) -> Resource {
        self.add(&other.negate())
    }

    /// Scalar multiplication
    pub fn scale(&self, factor: f64) -> Resource {
        let decimal_factor = decimal_from_f64(factor);
        self.map(|_, q| q * factor, |_, q| q.saturating_mul(decimal_factor))
    }

    /// Component-wise multiplication
    pub fn multiply(&self, other: &Resource) -> Resource {
        self.zip_with(other, |a, b| a * b, |a, b| a.saturating_mul(b))
    }

    /// Component-wise division, yielding zero wherever the divisor is within
    /// epsilon of zero.
    pub fn safe_divide(&self, divisor: &Resource) -> Resource {
        let eps = decimal_epsilon();
        self.zip_with(
            divisor,
            |a, b| if b.abs() > EPSILON { a / b } else { 0.0 },
            |a, b| {
                if b.abs() > eps {
                    a.checked_div(b).unwrap_or_else(|| saturated(a, b))
                } else {
                    Decimal::ZERO
                }
            },
        )
    }

    pub fn absolute(&self) -> Resource {
        self.map(|_, q| q.abs(), |_, q| q.abs())
    }

    /// Zero out negative components
    pub fn truncate_positive(&self) -> Resource {
        self.map(
            |_, q| if q < 0.0 { 0.0 } else { q },
            |_, q| if q.is_sign_negative() { Decimal::ZERO } else { q },
        )
    }

    /// Zero out positive components
    pub fn truncate_negative(&self) -> Resource {
        self.map(
            |_, q| if q > 0.0 { 0.0 } else { q },
            |_, q| if q.is_sign_positive() { Decimal::ZERO } else { q },
        )
    }

    /// Exchange the quantities of two kinds
    pub fn swap(&self, a: ResourceKind, b: ResourceKind) -> Resource {
        let mut swapped = self.clone();
        match &mut swapped.amounts {
            Amounts::Float(v) => v.swap(a.index(), b.index()),
            Amounts::Decimal(v) => v.swap(a.index(), b.index()),
        }
        swapped
    }

    /// True when every component is within epsilon of zero
    pub fn is_zero(&self) -> bool {
        match &self.amounts {
            Amounts::Float(a) => a.iter().all(|q| q.abs() <= EPSILON),
            Amounts::Decimal(a) => {
                let eps = decimal_epsilon();
                a.iter().all(|q| q.abs() <= eps)
            }
        }
    }

    /// Copy of this vector with one component replaced
    pub fn with_quantity(&self, kind: ResourceKind, quantity: f64) -> Resource {
        let slot = kind.index();
        let decimal = decimal_from_f64(quantity);
        self.map(
            |i, q| if i == slot { quantity } else { q },
            |i, q| if i == slot { decimal } else { q },
        )
    }

    pub(crate) fn decimals(&self) -> [Decimal; DIM] {
        match &self.amounts {
            Amounts::Float(a) => array::from_fn(|i| decimal_from_f64(a[i])),
            Amounts::Decimal(a) => *a,
        }
    }

    fn map(
        &self,
        float: impl Fn(usize, f64) -> f64,
        decimal: impl Fn(usize, Decimal) -> Decimal,
    ) -> Resource {
        match &self.amounts {
            Amounts::Float(a) => Resource::from_floats(array::from_fn(|i| float(i, a[i]))),
            Amounts::Decimal(a) => Resource::from_decimals(array::from_fn(|i| decimal(i, a[i]))),
        }
    }

    fn zip_with(
        &self,
        other: &Resource,
        float: impl Fn(f64, f64) -> f64,
        decimal: impl Fn(Decimal, Decimal) -> Decimal,
    ) -> Resource {
        match (&self.amounts, &other.amounts) {
            (Amounts::Float(a), Amounts::Float(b)) => {
                Resource::from_floats(array::from_fn(|i| float(a[i], b[i])))
            }
            _ => {
                let a = self.decimals();
                let b = other.decimals();
                Resource::from_decimals(array::from_fn(|i| decimal(a[i], b[i])))
            }
        }
    }
}

pub(crate) fn decimal_epsilon() -> Decimal {
    Decimal::new(1, 12)
}

/// Convert a float to a decimal, saturating values outside the decimal range.
pub(crate) fn decimal_from_f64(value: f64) -> Decimal {
    match Decimal::from_f64(value) {
        Some(d) => d,
        None if value.is_nan() => Decimal::ZERO,
        None if value > 0.0 => Decimal::MAX,
        None => Decimal::MIN,
    }
}

fn saturated(numerator: Decimal, divisor: Decimal) -> Decimal {
    if numerator.is_sign_negative() == divisor.is_sign_negative() {
        Decimal::MAX
    } else {
        Decimal::MIN
    }
}

fn format_float(q: f64) -> String {
    if !q.is_finite() {
        return q.to_string();
    }
    let text = format!("{:.*}", DISPLAY_DIGITS as usize, q);
    let trimmed = text.trim_end_matches('0').trim_end_matches('.');
    match trimmed {
        "-0" | "" => "0".to_string(),
        other => other.to_string(),
    }
}

fn format_decimal(q: Decimal) -> String {
    let rounded = q.round_dp(DISPLAY_DIGITS).normalize();
    if rounded.is_zero() {
        "0".to_string()
    } else {
        rounded.to_string()
    }
}

impl Default for Resource {
    fn default() -> Self {
        Resource::zero()
    }
}

impl PartialEq for Resource {
    fn eq(&self, other: &Self) -> bool {
        self.subtract(other).is_zero()
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = match &self.amounts {
            Amounts::Float(a) => a.iter().map(|q| format_float(*q)).collect(),
            Amounts::Decimal(a) => a.iter().map(|q| format_decimal(*q)).collect(),
        };
        write!(f, "[{}]", parts.join(", "))
    }
}

impl Add<&Resource> for &Resource {
    type Output = Resource;

    fn add(self, rhs: &Resource) -> Resource {
        Resource::add(self, rhs)
    }
}

impl Add for Resource {
    type Output = Resource;

    fn add(self, rhs: Resource) -> Resource {
        Resource::add(&self, &rhs)
    }
}

impl Sub<&Resource> for &Resource {
    type Output = Resource;

    fn sub(self, rhs: &Resource) -> Resource {
        self.subtract(rhs)
    }
}

impl Sub for Resource {
    type Output = Resource;

    fn sub(self, rhs: Resource) -> Resource {
        self.subtract(&rhs)
    }
}

impl Neg for &Resource {
    type Output = Resource;

    fn neg(self) -> Resource {
        self.negate()
    }
}

impl Neg for Resource {
    type Output = Resource;

    fn neg(self) -> Resource {
        self.negate()
    }
}

impl Mul<f64> for &Resource {
    type Output = Resource;

    fn mul(self, factor: f64) -> Resource {
        self.scale(factor)
    }
}

impl Mul<f64> for Resource {
    type Output = Resource;

    fn mul(self, factor: f64) -> Resource {
        self.scale(factor)
    }
}

impl AddAssign<&Resource> for Resource {
    fn add_assign(&mut self, rhs: &Resource) {
        *self = Resource::add(self, rhs);
    }
}

impl SubAssign<&Resource> for Resource {
    fn sub_assign(&mut self, rhs: &Resource) {
        *self = self.subtract(rhs);
    }
}

impl Sum for Resource {
    fn sum<I: Iterator<Item = Resource>>(iter: I) -> Resource {
        iter.fold(Resource::zero(), |acc, r| Resource::add(&acc, &r))
    }
}

impl<'a> Sum<&'a Resource> for Resource {
    fn sum<I: Iterator<Item = &'a Resource>>(iter: I) -> Resource {
        iter.fold(Resource::zero(), |acc, r| Resource::add(&acc, r))
    }
}
