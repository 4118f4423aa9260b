use serde::{Deserialize, Serialize};

use crate::domain::{ClinicId, Command, Conditions, LocationLink, LocationLinkPatch, Requirement};

/// Envelope returned by every triage backend endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }

    /// Collapses the envelope. A successful response without data counts as a
    /// failure, as does `success = false`; `fallback` is used when the backend
    /// did not say why.
    pub fn into_result(self, fallback: &str) -> Result<T, String> {
        match (self.success, self.data) {
            (true, Some(data)) => Ok(data),
            _ => Err(self.error.unwrap_or_else(|| fallback.to_string())),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ApiResponse<U> {
        ApiResponse {
            success: self.success,
            data: self.data.map(f),
            error: self.error,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ClinicSelectionWire {
    Structured { clinic_selection: Option<ClinicId> },
    Bare(ClinicId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ClinicSelectionWire")]
pub struct ClinicSelection {
    pub clinic_selection: Option<ClinicId>,
}

impl From<ClinicSelectionWire> for ClinicSelection {
    fn from(value: ClinicSelectionWire) -> Self {
        match value {
            ClinicSelectionWire::Structured { clinic_selection } => Self { clinic_selection },
            ClinicSelectionWire::Bare(clinic) => Self {
                clinic_selection: Some(clinic),
            },
        }
    }
}

impl ClinicSelection {
    pub fn new(clinic: impl Into<ClinicId>) -> Self {
        Self {
            clinic_selection: Some(clinic.into()),
        }
    }

    /// The selected clinic, if the backend actually named one.
    pub fn clinic(&self) -> Option<&ClinicId> {
        self.clinic_selection.as_ref().filter(|id| !id.is_empty())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RequirementListWire {
    List(Vec<Requirement>),
    Wrapped { requirements: Vec<Requirement> },
}

/// Requirement collector output; the backend sends either a bare array or an
/// object with a `requirements` field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RequirementListWire", into = "Vec<Requirement>")]
pub struct RequirementList(pub Vec<Requirement>);

impl From<RequirementListWire> for RequirementList {
    fn from(value: RequirementListWire) -> Self {
        match value {
            RequirementListWire::List(items) | RequirementListWire::Wrapped { requirements: items } => {
                Self(items)
            }
        }
    }
}

impl From<RequirementList> for Vec<Requirement> {
    fn from(value: RequirementList) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutePatchOutput {
    #[serde(default)]
    pub patches: Vec<LocationLinkPatch>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandsOutput {
    #[serde(default)]
    pub commands: Vec<Command>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectConditionsRequest {
    pub user_input: String,
    pub online_model: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectClinicRequest {
    pub conditions: Conditions,
    pub online_model: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectRequirementRequest {
    pub user_input: String,
    pub online_model: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchRouteRequest {
    pub destination_clinic_id: ClinicId,
    pub requirement_summary: Vec<Requirement>,
    pub origin_route: Vec<LocationLink>,
    pub online_model: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseCommandsRequest {
    pub origin_route: Vec<LocationLink>,
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
