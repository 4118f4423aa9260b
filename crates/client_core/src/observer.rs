use navigation::{HighlightSummary, PatchAnomaly};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::state::{WorkflowState, WorkflowStep};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputRejection {
    Busy,
    Blank,
    UnexpectedState(WorkflowState),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowEvent {
    Transition {
        from: WorkflowState,
        to: WorkflowState,
    },
    Reset,
    StepStarted {
        step: WorkflowStep,
    },
    StepSucceeded {
        step: WorkflowStep,
    },
    GatewayFailure {
        step: WorkflowStep,
        reason: String,
    },
    StepException {
        step: WorkflowStep,
        reason: String,
    },
    /// A step finished after the session was reset or restarted.
    StaleResultDropped {
        step: WorkflowStep,
    },
    DuplicateUserMessageSkipped {
        text: String,
    },
    InputRejected(InputRejection),
    PatchAnomaly(PatchAnomaly),
    RouteValidationFailed {
        errors: Vec<String>,
    },
    CommandsUnavailable {
        reason: String,
    },
    HighlightsComputed(HighlightSummary),
    MapLoaded {
        nodes: usize,
        edges: usize,
    },
    MapOverlay {
        visible: bool,
    },
}

/// Sink for workflow diagnostics, injected into each session.
pub trait WorkflowObserver: Send + Sync {
    fn record(&self, session_id: Uuid, event: &WorkflowEvent);
}

/// Forwards events to `tracing` with structured fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl WorkflowObserver for TracingObserver {
    fn record(&self, session_id: Uuid, event: &WorkflowEvent) {
        match event {
            WorkflowEvent::Transition { from, to } => {
                info!(%session_id, %from, %to, "workflow state transition");
            }
            WorkflowEvent::Reset => info!(%session_id, "workflow reset"),
            WorkflowEvent::StepStarted { step } => debug!(%session_id, %step, "workflow step started"),
            WorkflowEvent::StepSucceeded { step } => {
                debug!(%session_id, %step, "workflow step succeeded")
            }
            WorkflowEvent::GatewayFailure { step, reason } => {
                warn!(%session_id, %step, %reason, "backend rejected workflow step");
            }
            WorkflowEvent::StepException { step, reason } => {
                warn!(%session_id, %step, %reason, "workflow step raised");
            }
            WorkflowEvent::StaleResultDropped { step } => {
                info!(%session_id, %step, "dropping step result from before a reset");
            }
            WorkflowEvent::DuplicateUserMessageSkipped { text } => {
                debug!(%session_id, text = %text, "skipping duplicate user message");
            }
            WorkflowEvent::InputRejected(rejection) => {
                info!(%session_id, ?rejection, "user input rejected");
            }
            WorkflowEvent::PatchAnomaly(anomaly) => {
                warn!(%session_id, %anomaly, "route patch applied with anomaly");
            }
            WorkflowEvent::RouteValidationFailed { errors } => {
                warn!(%session_id, errors = %errors.join("; "), "patched route failed continuity check");
            }
            WorkflowEvent::CommandsUnavailable { reason } => {
                warn!(%session_id, %reason, "navigation commands unavailable; map left unhighlighted");
            }
            WorkflowEvent::HighlightsComputed(summary) => {
                info!(
                    %session_id,
                    nodes = summary.total_nodes,
                    highlighted_nodes = summary.highlighted_nodes.len(),
                    edges = summary.total_edges,
                    highlighted_edges = summary.highlighted_edges.len(),
                    "highlighted map computed"
                );
            }
            WorkflowEvent::MapLoaded { nodes, edges } => {
                info!(%session_id, nodes, edges, "hospital map loaded");
            }
            WorkflowEvent::MapOverlay { visible } => {
                debug!(%session_id, visible, "map overlay toggled");
            }
        }
    }
}
