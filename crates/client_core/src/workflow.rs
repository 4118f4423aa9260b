use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use navigation::{
    apply_patches, base_route_template, compute_highlights, format_route_for_display,
    generate_original_route, parse_map_graph, validate_route_continuity, HighlightSummary,
};
use serde::Serialize;
use shared::{
    domain::{ClinicId, Command, Conditions, HighlightedMap, LocationLink, MapGraph, Requirement},
    protocol::{ApiResponse, RoutePatchOutput},
};
use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::{
    error::WorkflowError,
    gateway::BackendGateway,
    messages::{Message, MessageLog, MessageOptions, MessageUpdate, Sender},
    observer::{InputRejection, TracingObserver, WorkflowEvent, WorkflowObserver},
    state::{WorkflowState, WorkflowStep},
};

pub const GREETING: &str =
    "你好！我是智能寻路助手，可以帮你导航到医院各个科室。请描述你的症状，以便我为你选择合适的诊室。";
const BLANK_INPUT_REPLY: &str = "请输入有效的症状描述。";
const UNKNOWN_ERROR: &str = "未知错误";

/// Everything the workflow has learned so far. Cleared on reset.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WorkflowData {
    pub conditions: Option<Conditions>,
    pub requirements: Option<Vec<Requirement>>,
    pub clinic_id: Option<ClinicId>,
    pub patches: Option<RoutePatchOutput>,
    pub original_route: Option<Vec<LocationLink>>,
    pub modified_route: Option<Vec<LocationLink>>,
    pub commands: Option<Vec<Command>>,
    pub map_data: Option<MapGraph>,
    pub highlighted_map: Option<HighlightedMap>,
}

impl WorkflowData {
    pub fn has_conditions(&self) -> bool {
        self.conditions.is_some()
    }

    pub fn has_requirements(&self) -> bool {
        self.requirements.as_ref().is_some_and(|r| !r.is_empty())
    }

    pub fn has_clinic_id(&self) -> bool {
        self.clinic_id.is_some()
    }

    pub fn has_patches(&self) -> bool {
        self.patches.as_ref().is_some_and(|p| !p.patches.is_empty())
    }

    pub fn has_original_route(&self) -> bool {
        self.original_route.as_ref().is_some_and(|r| !r.is_empty())
    }

    pub fn has_modified_route(&self) -> bool {
        self.modified_route.as_ref().is_some_and(|r| !r.is_empty())
    }

    pub fn has_commands(&self) -> bool {
        self.commands.is_some()
    }

    pub fn has_map_data(&self) -> bool {
        self.map_data.is_some()
    }

    pub fn has_highlighted_map(&self) -> bool {
        self.highlighted_map.is_some()
    }

    /// Empty until a route exists.
    pub fn formatted_original_route(&self) -> String {
        match &self.original_route {
            Some(route) if !route.is_empty() => format_route_for_display(route),
            _ => String::new(),
        }
    }

    pub fn formatted_modified_route(&self) -> String {
        match &self.modified_route {
            Some(route) if !route.is_empty() => format_route_for_display(route),
            _ => String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowSnapshot {
    pub session_id: Uuid,
    pub state: WorkflowState,
    pub previous_state: WorkflowState,
    pub error_message: Option<String>,
    pub data: WorkflowData,
    pub messages: Vec<Message>,
    pub show_map_overlay: bool,
    pub is_loading: bool,
}

#[derive(Default)]
struct WorkflowInner {
    /// Bumped by every reset; step results carry the value they started under.
    generation: u64,
    state: WorkflowState,
    previous_state: WorkflowState,
    error_message: Option<String>,
    data: WorkflowData,
    messages: MessageLog,
    show_map_overlay: bool,
}

/// Clears the busy flag when dropped, including when the owning future is
/// cancelled mid-await.
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

enum StepFailure {
    /// The backend answered but did not succeed. `shown` goes into the chat,
    /// `reason` into `error_message`.
    Rejected { shown: String, reason: String },
    Raised(String),
}

fn settle<T>(result: anyhow::Result<ApiResponse<T>>, fallback: &str) -> Result<T, StepFailure> {
    let response = result.map_err(|e| StepFailure::Raised(format!("{e:#}")))?;
    let error = response.error.filter(|e| !e.is_empty());
    match (response.success, response.data) {
        (true, Some(data)) => Ok(data),
        _ => Err(StepFailure::Rejected {
            shown: error.clone().unwrap_or_else(|| UNKNOWN_ERROR.to_string()),
            reason: error.unwrap_or_else(|| fallback.to_string()),
        }),
    }
}

/// Chat prefixes for a failed step: backend rejection, then local exception.
struct FailureText {
    rejected: &'static str,
    raised: &'static str,
}

const CONDITIONS_FAILURE: FailureText = FailureText {
    rejected: "抱歉，分析症状时出现错误：",
    raised: "处理症状时出现错误：",
};
const CLINIC_FAILURE: FailureText = FailureText {
    rejected: "抱歉，选择诊室时出现错误：",
    raised: "选择诊室时出现错误：",
};
const REQUIREMENTS_FAILURE: FailureText = FailureText {
    rejected: "抱歉，分析需求时出现错误：",
    raised: "处理需求时出现错误：",
};
const PATCH_FAILURE: FailureText = FailureText {
    rejected: "抱歉，优化路线时出现错误：",
    raised: "优化路线时出现错误：",
};

/// One conversation with the triage assistant, from symptoms to a highlighted
/// route.
///
/// State lives behind a mutex that is never held across a backend call. A
/// single input is processed at a time; overlapping calls are rejected with
/// [`WorkflowError::Busy`].
pub struct WorkflowSession {
    session_id: Uuid,
    gateway: Arc<dyn BackendGateway>,
    observer: Arc<dyn WorkflowObserver>,
    inner: Mutex<WorkflowInner>,
    busy: AtomicBool,
}

impl WorkflowSession {
    pub fn new(gateway: Arc<dyn BackendGateway>) -> Arc<Self> {
        Self::new_with_dependencies(gateway, Arc::new(TracingObserver))
    }

    pub fn new_with_dependencies(
        gateway: Arc<dyn BackendGateway>,
        observer: Arc<dyn WorkflowObserver>,
    ) -> Arc<Self> {
        Arc::new(Self {
            session_id: Uuid::new_v4(),
            gateway,
            observer,
            inner: Mutex::new(WorkflowInner::default()),
            busy: AtomicBool::new(false),
        })
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn is_loading(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub async fn current_state(&self) -> WorkflowState {
        self.inner.lock().await.state
    }

    pub async fn messages(&self) -> Vec<Message> {
        self.inner.lock().await.messages.as_slice().to_vec()
    }

    pub async fn snapshot(&self) -> WorkflowSnapshot {
        let inner = self.inner.lock().await;
        WorkflowSnapshot {
            session_id: self.session_id,
            state: inner.state,
            previous_state: inner.previous_state,
            error_message: inner.error_message.clone(),
            data: inner.data.clone(),
            messages: inner.messages.as_slice().to_vec(),
            show_map_overlay: inner.show_map_overlay,
            is_loading: self.is_loading(),
        }
    }

    /// Clears the session. A step still waiting on the backend keeps running,
    /// but its result is dropped when it returns.
    pub async fn reset_workflow(&self) {
        let mut inner = self.inner.lock().await;
        self.restart(&mut inner);
    }

    pub async fn start_workflow(&self) {
        let mut inner = self.inner.lock().await;
        self.restart(&mut inner);
        self.transition(&mut inner, WorkflowState::CollectingConditions);
        inner
            .messages
            .push(Sender::Assistant, GREETING, MessageOptions::default());
    }

    /// No-op when already in `to`; returns whether the state changed.
    pub async fn transition_to(&self, to: WorkflowState) -> bool {
        let mut inner = self.inner.lock().await;
        self.transition(&mut inner, to)
    }

    pub async fn transition_to_error(&self, reason: impl Into<String>) {
        let mut inner = self.inner.lock().await;
        self.fail(&mut inner, reason.into());
    }

    pub async fn add_message(
        &self,
        sender: Sender,
        text: impl Into<String>,
        options: MessageOptions,
    ) -> Message {
        let mut inner = self.inner.lock().await;
        inner.messages.push(sender, text, options).clone()
    }

    pub async fn add_assistant_message(
        &self,
        text: impl Into<String>,
        options: MessageOptions,
    ) -> Message {
        self.add_message(Sender::Assistant, text, options).await
    }

    pub async fn add_user_message(&self, text: impl Into<String>, options: MessageOptions) -> Message {
        self.add_message(Sender::User, text, options).await
    }

    /// Returns false when there is no message to update.
    pub async fn update_last_message(&self, update: MessageUpdate) -> bool {
        self.inner.lock().await.messages.update_last(update)
    }

    /// Feeds one line of user text into the current step.
    ///
    /// Backend failures do not surface here: they move the session into
    /// [`WorkflowState::Error`] and the returned state says so. Only an
    /// overlapping call is an `Err`.
    pub async fn process_user_input(&self, input: &str) -> Result<WorkflowState, WorkflowError> {
        let Some(_busy) = BusyGuard::acquire(&self.busy) else {
            self.emit(WorkflowEvent::InputRejected(InputRejection::Busy));
            return Err(WorkflowError::Busy);
        };

        if input.trim().is_empty() {
            self.emit(WorkflowEvent::InputRejected(InputRejection::Blank));
            let mut inner = self.inner.lock().await;
            inner
                .messages
                .push(Sender::Assistant, BLANK_INPUT_REPLY, MessageOptions::default());
            return Ok(inner.state);
        }

        let (generation, state) = {
            let mut inner = self.inner.lock().await;
            if inner.messages.ends_with_user_text(input) {
                self.emit(WorkflowEvent::DuplicateUserMessageSkipped {
                    text: input.to_string(),
                });
            } else {
                inner
                    .messages
                    .push(Sender::User, input, MessageOptions::default());
            }
            (inner.generation, inner.state)
        };

        match state {
            WorkflowState::CollectingConditions => {
                self.handle_conditions_input(generation, input).await
            }
            WorkflowState::CollectingRequirements => {
                self.handle_requirements_input(generation, input).await
            }
            other => {
                self.emit(WorkflowEvent::InputRejected(InputRejection::UnexpectedState(
                    other,
                )));
                self.add_assistant_message(
                    format!("当前状态无法处理输入。当前状态: {other}"),
                    MessageOptions::default(),
                )
                .await;
            }
        }

        Ok(self.current_state().await)
    }

    /// Fetches and validates the hospital map. The state machine is left
    /// alone; if navigation commands already exist the highlights are
    /// recomputed against the new map.
    pub async fn load_map(&self) -> Result<(), WorkflowError> {
        let Some(_busy) = BusyGuard::acquire(&self.busy) else {
            return Err(WorkflowError::Busy);
        };
        let step = WorkflowStep::LoadMap;
        self.emit(WorkflowEvent::StepStarted { step });

        let raw = match self.gateway.get_map().await {
            Ok(response) => response.into_result("Failed to load map").map_err(|reason| {
                self.emit(WorkflowEvent::GatewayFailure {
                    step,
                    reason: reason.clone(),
                });
                WorkflowError::Gateway(reason)
            })?,
            Err(e) => {
                self.emit(WorkflowEvent::StepException {
                    step,
                    reason: format!("{e:#}"),
                });
                return Err(WorkflowError::Transport(e));
            }
        };

        let graph = parse_map_graph(&raw).map_err(|e| {
            self.emit(WorkflowEvent::StepException {
                step,
                reason: e.to_string(),
            });
            WorkflowError::from(e)
        })?;

        let mut inner = self.inner.lock().await;
        self.emit(WorkflowEvent::MapLoaded {
            nodes: graph.nodes.len(),
            edges: graph.edges.len(),
        });
        if let Some(commands) = &inner.data.commands {
            let highlighted = compute_highlights(commands, &graph);
            self.emit(WorkflowEvent::HighlightsComputed(HighlightSummary::of(
                &highlighted,
            )));
            inner.data.highlighted_map = Some(highlighted);
        }
        inner.data.map_data = Some(graph);
        Ok(())
    }

    /// Shows the map overlay. Without a highlighted map this does nothing and
    /// returns false.
    pub async fn show_map(&self) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.data.highlighted_map.is_none() {
            return false;
        }
        if !inner.show_map_overlay {
            inner.show_map_overlay = true;
            self.emit(WorkflowEvent::MapOverlay { visible: true });
        }
        true
    }

    pub async fn hide_map(&self) {
        let mut inner = self.inner.lock().await;
        if inner.show_map_overlay {
            inner.show_map_overlay = false;
            self.emit(WorkflowEvent::MapOverlay { visible: false });
        }
    }

    fn emit(&self, event: WorkflowEvent) {
        self.observer.record(self.session_id, &event);
    }

    fn transition(&self, inner: &mut WorkflowInner, to: WorkflowState) -> bool {
        if inner.state == to {
            return false;
        }
        let from = inner.state;
        inner.previous_state = from;
        inner.state = to;
        inner.error_message = None;
        self.emit(WorkflowEvent::Transition { from, to });
        true
    }

    fn restart(&self, inner: &mut WorkflowInner) {
        let generation = inner.generation.wrapping_add(1);
        *inner = WorkflowInner {
            generation,
            ..WorkflowInner::default()
        };
        self.emit(WorkflowEvent::Reset);
    }

    /// Locks the session unless it was reset since `generation` was read.
    async fn lock_current(
        &self,
        generation: u64,
        step: WorkflowStep,
    ) -> Option<MutexGuard<'_, WorkflowInner>> {
        let inner = self.inner.lock().await;
        if inner.generation == generation {
            Some(inner)
        } else {
            self.emit(WorkflowEvent::StaleResultDropped { step });
            None
        }
    }

    fn fail(&self, inner: &mut WorkflowInner, reason: String) {
        self.transition(inner, WorkflowState::Error);
        inner.error_message = Some(reason);
    }

    /// Optionally moves to `state`, then appends the step's placeholder.
    /// Returns false when the session was reset in the meantime.
    async fn begin_step(
        &self,
        generation: u64,
        step: WorkflowStep,
        state: Option<WorkflowState>,
        placeholder: &str,
    ) -> bool {
        let Some(mut inner) = self.lock_current(generation, step).await else {
            return false;
        };
        if let Some(state) = state {
            self.transition(&mut inner, state);
        }
        inner
            .messages
            .push(Sender::Assistant, placeholder, MessageOptions::processing());
        self.emit(WorkflowEvent::StepStarted { step });
        true
    }

    async fn fail_step(
        &self,
        generation: u64,
        step: WorkflowStep,
        failure: StepFailure,
        text: &FailureText,
    ) {
        let Some(mut inner) = self.lock_current(generation, step).await else {
            return;
        };

        let (shown, reason) = match failure {
            StepFailure::Rejected { shown, reason } => {
                self.emit(WorkflowEvent::GatewayFailure {
                    step,
                    reason: reason.clone(),
                });
                (format!("{}{shown}", text.rejected), reason)
            }
            StepFailure::Raised(reason) => {
                self.emit(WorkflowEvent::StepException {
                    step,
                    reason: reason.clone(),
                });
                (format!("{}{reason}", text.raised), reason)
            }
        };

        inner.messages.update_last(MessageUpdate::failed(shown));
        self.fail(&mut inner, reason);
    }

    async fn handle_conditions_input(&self, generation: u64, input: &str) {
        let step = WorkflowStep::CollectConditions;
        if !self
            .begin_step(generation, step, None, "正在分析你的症状...")
            .await
        {
            return;
        }

        let conditions = match settle(
            self.gateway.collect_conditions(input).await,
            "Failed to collect conditions",
        ) {
            Ok(conditions) => conditions,
            Err(failure) => {
                return self
                    .fail_step(generation, step, failure, &CONDITIONS_FAILURE)
                    .await
            }
        };

        {
            let Some(mut inner) = self.lock_current(generation, step).await else {
                return;
            };
            let description = if conditions.description.is_empty() {
                "症状已记录"
            } else {
                conditions.description.as_str()
            };
            inner.messages.update_last(MessageUpdate::resolved(format!(
                "已分析你的症状：{description}。现在为你选择合适的诊室..."
            )));
            inner.data.conditions = Some(conditions);
        }
        self.emit(WorkflowEvent::StepSucceeded { step });

        self.select_clinic(generation).await;
    }

    async fn select_clinic(&self, generation: u64) {
        let step = WorkflowStep::SelectClinic;
        let conditions = {
            let Some(mut inner) = self.lock_current(generation, step).await else {
                return;
            };
            match inner.data.conditions.clone() {
                Some(conditions) => conditions,
                None => {
                    self.fail(
                        &mut inner,
                        "No conditions available for clinic selection".to_string(),
                    );
                    return;
                }
            }
        };

        if !self
            .begin_step(
                generation,
                step,
                Some(WorkflowState::SelectingClinic),
                "正在根据症状选择合适诊室...",
            )
            .await
        {
            return;
        }

        let selected = settle(
            self.gateway.select_clinic(&conditions).await,
            "Failed to select clinic",
        )
        .and_then(|selection| {
            let clinic = selection.clinic().cloned().ok_or_else(|| {
                StepFailure::Raised("No clinic selection in response".to_string())
            })?;
            let route = generate_original_route(clinic.as_str(), &base_route_template())
                .map_err(|e| StepFailure::Raised(e.to_string()))?;
            Ok((clinic, route))
        });
        let (clinic, route) = match selected {
            Ok(selected) => selected,
            Err(failure) => {
                return self
                    .fail_step(generation, step, failure, &CLINIC_FAILURE)
                    .await
            }
        };

        let Some(mut inner) = self.lock_current(generation, step).await else {
            return;
        };
        inner.messages.update_last(MessageUpdate::resolved(format!(
            "已为你选择 {clinic} 诊室。请告诉我你有什么个性化需求（例如：需要轮椅、需要优先就诊等），我将为你优化路线。"
        )));
        inner.data.clinic_id = Some(clinic);
        inner.data.original_route = Some(route);
        self.emit(WorkflowEvent::StepSucceeded { step });
        self.transition(&mut inner, WorkflowState::CollectingRequirements);
    }

    async fn handle_requirements_input(&self, generation: u64, input: &str) {
        let step = WorkflowStep::CollectRequirements;
        if !self
            .begin_step(generation, step, None, "正在分析你的需求...")
            .await
        {
            return;
        }

        let requirements = match settle(
            self.gateway.collect_requirement(input).await,
            "Failed to collect requirements",
        ) {
            Ok(requirements) => requirements,
            Err(failure) => {
                return self
                    .fail_step(generation, step, failure, &REQUIREMENTS_FAILURE)
                    .await
            }
        };

        {
            let Some(mut inner) = self.lock_current(generation, step).await else {
                return;
            };
            let count = match requirements.len() {
                0 => String::new(),
                n => format!(" {n} 项"),
            };
            inner.messages.update_last(MessageUpdate::resolved(format!(
                "已记录你的{count}需求。现在根据诊室和需求优化路线..."
            )));
            inner.data.requirements = Some(requirements);
        }
        self.emit(WorkflowEvent::StepSucceeded { step });

        self.patch_route(generation).await;
    }

    async fn patch_route(&self, generation: u64) {
        let step = WorkflowStep::PatchRoute;
        let (clinic, requirements, original_route) = {
            let Some(mut inner) = self.lock_current(generation, step).await else {
                return;
            };
            let data = &inner.data;
            let inputs = match (&data.clinic_id, &data.requirements, &data.original_route) {
                (Some(clinic), Some(requirements), Some(route)) => {
                    Some((clinic.clone(), requirements.clone(), route.clone()))
                }
                _ => None,
            };
            match inputs {
                Some(inputs) => inputs,
                None => {
                    self.fail(&mut inner, "Missing data for route patching".to_string());
                    return;
                }
            }
        };

        if !self
            .begin_step(
                generation,
                step,
                Some(WorkflowState::PatchingRoute),
                "正在根据你的需求优化路线...",
            )
            .await
        {
            return;
        }

        let output = match settle(
            self.gateway
                .patch_route(&clinic, &requirements, &original_route)
                .await,
            "Failed to patch route",
        ) {
            Ok(output) => output,
            Err(failure) => {
                return self
                    .fail_step(generation, step, failure, &PATCH_FAILURE)
                    .await
            }
        };

        let outcome = apply_patches(&original_route, &output.patches);
        for anomaly in &outcome.anomalies {
            self.emit(WorkflowEvent::PatchAnomaly(anomaly.clone()));
        }
        let validation = validate_route_continuity(&outcome.route);
        let formatted_route = format_route_for_display(&outcome.route);

        let mut update = if validation.valid {
            MessageUpdate::resolved(format!(
                "路线优化完成！\n\n原始路线：\n{}\n\n优化后路线：\n{formatted_route}\n\n你可以按照这个路线前往诊室。",
                format_route_for_display(&original_route)
            ))
        } else {
            self.emit(WorkflowEvent::RouteValidationFailed {
                errors: validation.errors.clone(),
            });
            MessageUpdate::failed(format!(
                "路线优化完成，但路线连续性验证失败：{}\n\n优化后路线：\n{formatted_route}",
                validation.errors.join("; ")
            ))
        };
        if !outcome.is_clean() {
            let notes = outcome
                .anomalies
                .iter()
                .map(|anomaly| format!("- {anomaly}"))
                .collect::<Vec<_>>()
                .join("\n");
            if let Some(text) = update.text.as_mut() {
                text.push_str(&format!("\n\n路线修改提示：\n{notes}"));
            }
        }

        let map = match self.lock_current(generation, step).await {
            Some(inner) => inner.data.map_data.clone(),
            None => return,
        };
        let navigation = match map {
            Some(map) => self.navigate(&outcome.route, &map).await,
            None => None,
        };

        let Some(mut inner) = self.lock_current(generation, step).await else {
            return;
        };
        inner.data.patches = Some(output);
        inner.data.modified_route = Some(outcome.route);
        if let Some((commands, highlighted)) = navigation {
            inner.data.commands = Some(commands);
            inner.data.highlighted_map = Some(highlighted);
        }
        inner.messages.update_last(update);
        self.emit(WorkflowEvent::StepSucceeded { step });
        self.transition(&mut inner, WorkflowState::Completed);
    }

    /// Turns the final route into commands and highlights them on `map`. A
    /// failure here only costs the highlighting.
    async fn navigate(
        &self,
        route: &[LocationLink],
        map: &MapGraph,
    ) -> Option<(Vec<Command>, HighlightedMap)> {
        let step = WorkflowStep::ParseCommands;
        self.emit(WorkflowEvent::StepStarted { step });

        let commands = match settle(
            self.gateway.parse_commands(route).await,
            "Failed to parse commands",
        ) {
            Ok(output) => output.commands,
            Err(StepFailure::Rejected { reason, .. } | StepFailure::Raised(reason)) => {
                self.emit(WorkflowEvent::CommandsUnavailable { reason });
                return None;
            }
        };

        let highlighted = compute_highlights(&commands, map);
        self.emit(WorkflowEvent::HighlightsComputed(HighlightSummary::of(
            &highlighted,
        )));
        Some((commands, highlighted))
    }
}

#[cfg(test)]
#[path = "tests/workflow_tests.rs"]
mod tests;
