use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }
    };
}

id_newtype!(LocationId);
id_newtype!(ClinicId);

impl From<&ClinicId> for LocationId {
    fn from(value: &ClinicId) -> Self {
        Self(value.0.clone())
    }
}

/// One hop of a walking route: from `this` proceed to `next`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocationLink {
    pub this: LocationId,
    pub next: LocationId,
}

impl LocationLink {
    pub fn new(this: impl Into<LocationId>, next: impl Into<LocationId>) -> Self {
        Self {
            this: this.into(),
            next: next.into(),
        }
    }

    /// Same origin, different destination.
    pub fn rewired(&self, next: LocationId) -> Self {
        Self {
            this: self.this.clone(),
            next,
        }
    }
}

impl fmt::Display for LocationLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}→{}", self.this, self.next)
    }
}

pub type Route = Vec<LocationLink>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchKind {
    Insert,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationLinkPatch {
    #[serde(rename = "type")]
    pub kind: PatchKind,
    pub previous: LocationId,
    pub this: LocationId,
    pub next: LocationId,
}

impl LocationLinkPatch {
    pub fn insert(
        previous: impl Into<LocationId>,
        this: impl Into<LocationId>,
        next: impl Into<LocationId>,
    ) -> Self {
        Self {
            kind: PatchKind::Insert,
            previous: previous.into(),
            this: this.into(),
            next: next.into(),
        }
    }

    pub fn delete(
        previous: impl Into<LocationId>,
        this: impl Into<LocationId>,
        next: impl Into<LocationId>,
    ) -> Self {
        Self {
            kind: PatchKind::Delete,
            previous: previous.into(),
            this: this.into(),
            next: next.into(),
        }
    }

    pub fn link(&self) -> LocationLink {
        LocationLink {
            this: self.this.clone(),
            next: self.next.clone(),
        }
    }
}

/// Structured symptom summary produced by the triage backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conditions {
    #[serde(default)]
    pub body_parts: String,
    #[serde(default)]
    pub duration: String,
    #[serde(default)]
    pub severity: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub other_relevant_information: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    pub when: String,
    pub what: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub target: LocationId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<String>,
}

impl Command {
    pub fn new(action: impl Into<String>, target: impl Into<LocationId>) -> Self {
        Self {
            action: action.into(),
            target: target.into(),
            direction: None,
        }
    }

    pub fn with_direction(mut self, direction: impl Into<String>) -> Self {
        self.direction = Some(direction.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapNode {
    pub id: LocationId,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl MapNode {
    pub fn new(id: impl Into<LocationId>) -> Self {
        Self {
            id: id.into(),
            attributes: Map::new(),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.attributes.get("name").and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapEdge {
    #[serde(alias = "u")]
    pub source: LocationId,
    #[serde(alias = "v")]
    pub target: LocationId,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl MapEdge {
    pub fn new(source: impl Into<LocationId>, target: impl Into<LocationId>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            attributes: Map::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MapGraph {
    pub nodes: Vec<MapNode>,
    pub edges: Vec<MapEdge>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HighlightedNode {
    #[serde(flatten)]
    pub node: MapNode,
    pub highlight: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HighlightedEdge {
    #[serde(flatten)]
    pub edge: MapEdge,
    pub highlight: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HighlightedMap {
    pub nodes: Vec<HighlightedNode>,
    pub edges: Vec<HighlightedEdge>,
}
