//! Object model: the classes and attributes shared through a federation
//!
//! Loaded from JSON so every federate of a federation agrees on the same
//! schema:
//!
//! ```json
//! {
//!   "name": "infrastructure",
//!   "classes": {
//!     "Water":  { "attributes": ["Name", "Location", "State", "Contents", "SentTo", "ReceivedFrom"] },
//!     "Social": { "attributes": ["Name", "Location", "Contents", "WaterDemand"] }
//!   }
//! }
//! ```

use crate::federation::FederationError;
use crate::models::attribute;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Attributes declared for one object class
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectClass {
    pub attributes: Vec<String>,
}

impl ObjectClass {
    pub fn declares(&self, attribute: &str) -> bool {
        self.attributes.iter().any(|a| a == attribute)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectModel {
    #[serde(default)]
    pub name: String,
    pub classes: BTreeMap<String, ObjectClass>,
}

impl ObjectModel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            classes: BTreeMap::new(),
        }
    }

    pub fn with_class<I, A>(mut self, class: impl Into<String>, attributes: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        self.classes.insert(
            class.into(),
            ObjectClass {
                attributes: attributes.into_iter().map(Into::into).collect(),
            },
        );
        self
    }

    /// Add a class carrying every attribute an element record produces,
    /// plus any extra published values
    pub fn with_element_class(self, class: impl Into<String>, extra: &[&str]) -> Self {
        let attributes = [
            attribute::NAME,
            attribute::LOCATION,
            attribute::STATE,
            attribute::CONTENTS,
            attribute::SENT_TO,
            attribute::RECEIVED_FROM,
        ]
        .iter()
        .chain(extra.iter())
        .map(|a| a.to_string())
        .collect::<Vec<_>>();
        self.with_class(class, attributes)
    }

    pub fn from_json_str(json: &str) -> Result<Self, FederationError> {
        serde_json::from_str(json).map_err(|e| FederationError::ObjectModel(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, FederationError> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .map_err(|e| FederationError::ObjectModel(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&json)
    }

    pub fn class(&self, name: &str) -> Option<&ObjectClass> {
        self.classes.get(name)
    }

    pub fn contains(&self, class: &str) -> bool {
        self.classes.contains_key(class)
    }

    pub fn declares(&self, class: &str, attribute: &str) -> bool {
        self.class(class).map(|c| c.declares(attribute)).unwrap_or(false)
    }

    pub fn classes(&self) -> impl Iterator<Item = (&String, &ObjectClass)> {
        self.classes.iter()
    }
}
