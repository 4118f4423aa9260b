use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    #[default]
    Idle,
    CollectingConditions,
    SelectingClinic,
    CollectingRequirements,
    PatchingRoute,
    Completed,
    Error,
}

impl WorkflowState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::CollectingConditions => "collecting_conditions",
            Self::SelectingClinic => "selecting_clinic",
            Self::CollectingRequirements => "collecting_requirements",
            Self::PatchingRoute => "patching_route",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    /// `completed` and `error` only leave through a reset.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One backend round trip driven by the workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkflowStep {
    CollectConditions,
    SelectClinic,
    CollectRequirements,
    PatchRoute,
    ParseCommands,
    LoadMap,
}

impl WorkflowStep {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CollectConditions => "collect_conditions",
            Self::SelectClinic => "select_clinic",
            Self::CollectRequirements => "collect_requirements",
            Self::PatchRoute => "patch_route",
            Self::ParseCommands => "parse_commands",
            Self::LoadMap => "load_map",
        }
    }
}

impl fmt::Display for WorkflowStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
