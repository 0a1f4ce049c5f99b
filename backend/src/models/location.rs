//! Nodes and locations
//!
//! A [`Node`] is a named region. A [`Location`] is an `(origin, destination)`
//! pair of nodes; it is *static* when both ends are the same node (a facility
//! sitting in one region) and *dynamic* otherwise (a link such as a pipeline).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Separator between origin and destination in the text form of a location
const SEPARATOR: char = '-';

#[derive(Debug, Error, PartialEq)]
pub enum LocationError {
    #[error("Location text is empty")]
    Empty,

    #[error("Malformed location: {0:?}")]
    Malformed(String),

    #[error("Node name {0:?} is empty or contains the separator '-'")]
    InvalidNode(String),
}

/// Named region
///
/// Names must be non-empty and must not contain `-`, which separates the
/// two ends in the text form of a [`Location`]. Scenarios reject nodes that
/// break this rule; see [`Node::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Node(String);

impl Node {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }

    /// Check that the name survives the location text round trip
    pub fn validate(&self) -> Result<(), LocationError> {
        if self.0.trim().is_empty() || self.0.contains(SEPARATOR) || self.0 != self.0.trim() {
            return Err(LocationError::InvalidNode(self.0.clone()));
        }
        Ok(())
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Origin/destination node pair
///
/// # Example
/// ```
/// use infra_cosim_core::models::Location;
///
/// let plant: Location = "A".parse().unwrap();
/// let pipeline: Location = "A-B".parse().unwrap();
///
/// assert!(plant.is_static());
/// assert!(!pipeline.is_static());
/// assert_eq!(pipeline.to_string(), "A-B");
/// assert_eq!(pipeline.origin(), plant.origin());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Location {
    origin: Node,
    destination: Node,
}

impl Location {
    pub fn new(origin: Node, destination: Node) -> Self {
        Self {
            origin,
            destination,
        }
    }

    /// Location whose origin and destination are both `node`
    pub fn at(node: Node) -> Self {
        Self {
            origin: node.clone(),
            destination: node,
        }
    }

    pub fn origin(&self) -> &Node {
        &self.origin
    }

    pub fn destination(&self) -> &Node {
        &self.destination
    }

    pub fn is_static(&self) -> bool {
        self.origin == self.destination
    }

    pub fn validate(&self) -> Result<(), LocationError> {
        self.origin.validate()?;
        self.destination.validate()
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_static() {
            write!(f, "{}", self.origin)
        } else {
            write!(f, "{}{}{}", self.origin, SEPARATOR, self.destination)
        }
    }
}

impl FromStr for Location {
    type Err = LocationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        if text.is_empty() {
            return Err(LocationError::Empty);
        }
        let parts: Vec<&str> = text.split(SEPARATOR).map(str::trim).collect();
        match parts.as_slice() {
            [node] => Ok(Location::at(Node::new(*node))),
            [origin, destination] if !origin.is_empty() && !destination.is_empty() => Ok(
                Location::new(Node::new(*origin), Node::new(*destination)),
            ),
            _ => Err(LocationError::Malformed(s.to_string())),
        }
    }
}
