use super::*;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use shared::{
    domain::LocationLinkPatch,
    protocol::{ClinicSelection, CommandsOutput},
};
use tokio::sync::Notify;

const CLINIC: &str = "internal_medicine_clinic";

type Scripted<T> = std::result::Result<ApiResponse<T>, String>;

fn reply<T: Clone>(scripted: &Scripted<T>) -> Result<ApiResponse<T>> {
    scripted.clone().map_err(|e| anyhow!(e))
}

struct ScriptedGateway {
    conditions: Scripted<Conditions>,
    clinic: Scripted<ClinicSelection>,
    requirements: Scripted<Vec<Requirement>>,
    patches: Scripted<RoutePatchOutput>,
    commands: Scripted<CommandsOutput>,
    map: Scripted<Value>,
    calls: std::sync::Mutex<Vec<&'static str>>,
    /// When set, `collect_conditions` parks until released.
    gate: Option<(Arc<Notify>, Arc<Notify>)>,
}

impl ScriptedGateway {
    fn happy() -> Self {
        Self {
            conditions: Ok(ApiResponse::ok(Conditions {
                body_parts: "头部".to_string(),
                duration: "两天".to_string(),
                severity: "中等".to_string(),
                description: "头痛伴随轻度发烧和头晕".to_string(),
                other_relevant_information: vec!["有轻微发烧".to_string()],
            })),
            clinic: Ok(ApiResponse::ok(ClinicSelection::new(CLINIC))),
            requirements: Ok(ApiResponse::ok(vec![
                Requirement {
                    when: "全程".to_string(),
                    what: "需要轮椅".to_string(),
                },
                Requirement {
                    when: "挂号时".to_string(),
                    what: "希望优先就诊".to_string(),
                },
            ])),
            patches: Ok(ApiResponse::ok(RoutePatchOutput {
                patches: vec![LocationLinkPatch::insert(
                    "registration_center",
                    "elevator",
                    CLINIC,
                )],
            })),
            commands: Ok(ApiResponse::ok(CommandsOutput {
                commands: ["entrance", "registration_center", "elevator", CLINIC]
                    .into_iter()
                    .map(|target| Command::new("move", target))
                    .collect(),
            })),
            map: Ok(ApiResponse::ok(hospital_map())),
            calls: std::sync::Mutex::new(Vec::new()),
            gate: None,
        }
    }

    fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().expect("calls").clone()
    }

    fn track(&self, call: &'static str) {
        self.calls.lock().expect("calls").push(call);
    }
}

#[async_trait]
impl BackendGateway for ScriptedGateway {
    async fn collect_conditions(&self, _user_input: &str) -> Result<ApiResponse<Conditions>> {
        self.track("collect_conditions");
        if let Some((entered, release)) = &self.gate {
            entered.notify_one();
            release.notified().await;
        }
        reply(&self.conditions)
    }

    async fn select_clinic(&self, _conditions: &Conditions) -> Result<ApiResponse<ClinicSelection>> {
        self.track("select_clinic");
        reply(&self.clinic)
    }

    async fn collect_requirement(&self, _user_input: &str) -> Result<ApiResponse<Vec<Requirement>>> {
        self.track("collect_requirement");
        reply(&self.requirements)
    }

    async fn patch_route(
        &self,
        clinic_id: &ClinicId,
        _requirements: &[Requirement],
        original_route: &[LocationLink],
    ) -> Result<ApiResponse<RoutePatchOutput>> {
        self.track("patch_route");
        assert_eq!(clinic_id.as_str(), CLINIC);
        assert_eq!(original_route.len(), 4);
        reply(&self.patches)
    }

    async fn parse_commands(&self, _route: &[LocationLink]) -> Result<ApiResponse<CommandsOutput>> {
        self.track("parse_commands");
        reply(&self.commands)
    }

    async fn get_map(&self) -> Result<ApiResponse<Value>> {
        self.track("get_map");
        reply(&self.map)
    }
}

#[derive(Default)]
struct RecordingObserver {
    events: std::sync::Mutex<Vec<WorkflowEvent>>,
}

impl RecordingObserver {
    fn events(&self) -> Vec<WorkflowEvent> {
        self.events.lock().expect("events").clone()
    }

    fn transitions(&self) -> Vec<(WorkflowState, WorkflowState)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                WorkflowEvent::Transition { from, to } => Some((from, to)),
                _ => None,
            })
            .collect()
    }
}

impl WorkflowObserver for RecordingObserver {
    fn record(&self, _session_id: Uuid, event: &WorkflowEvent) {
        self.events.lock().expect("events").push(event.clone());
    }
}

fn hospital_map() -> Value {
    json!({
        "nodes": [
            {"id": "entrance", "x": 0, "y": 0},
            {"id": "registration_center", "x": 1, "y": 0},
            {"id": "elevator", "x": 2, "y": 0},
            {"id": CLINIC, "x": 2, "y": 2},
            {"id": "pharmacy", "x": 3, "y": 2},
            {"id": "exit", "x": 4, "y": 2}
        ],
        "edges": [
            {"source": "entrance", "target": "registration_center"},
            {"source": "registration_center", "target": "elevator"},
            {"source": "elevator", "target": CLINIC},
            {"source": "registration_center", "target": CLINIC},
            {"source": CLINIC, "target": "pharmacy"},
            {"source": "pharmacy", "target": "exit"}
        ]
    })
}

fn session_with(
    gateway: ScriptedGateway,
) -> (Arc<WorkflowSession>, Arc<ScriptedGateway>, Arc<RecordingObserver>) {
    let gateway = Arc::new(gateway);
    let observer = Arc::new(RecordingObserver::default());
    let session = WorkflowSession::new_with_dependencies(gateway.clone(), observer.clone());
    (session, gateway, observer)
}

async fn last_text(session: &WorkflowSession) -> String {
    session
        .messages()
        .await
        .last()
        .map(|m| m.text.clone())
        .expect("at least one message")
}

#[tokio::test]
async fn start_workflow_greets_and_waits_for_symptoms() {
    let (session, _, observer) = session_with(ScriptedGateway::happy());

    session.start_workflow().await;

    let snapshot = session.snapshot().await;
    assert_eq!(snapshot.state, WorkflowState::CollectingConditions);
    assert_eq!(snapshot.previous_state, WorkflowState::Idle);
    assert_eq!(snapshot.messages.len(), 1);
    assert_eq!(snapshot.messages[0].sender, Sender::Assistant);
    assert_eq!(snapshot.messages[0].text, GREETING);
    assert_eq!(
        observer.transitions(),
        vec![(WorkflowState::Idle, WorkflowState::CollectingConditions)]
    );
}

#[tokio::test]
async fn full_conversation_reaches_completed_with_patched_route() {
    let (session, gateway, observer) = session_with(ScriptedGateway::happy());
    session.start_workflow().await;

    let state = session
        .process_user_input("我头痛已经两天了，有点发烧，感觉头晕")
        .await
        .expect("symptoms accepted");
    assert_eq!(state, WorkflowState::CollectingRequirements);
    assert_eq!(
        last_text(&session).await,
        format!("已为你选择 {CLINIC} 诊室。请告诉我你有什么个性化需求（例如：需要轮椅、需要优先就诊等），我将为你优化路线。")
    );

    let state = session
        .process_user_input("我需要轮椅，希望优先就诊")
        .await
        .expect("requirements accepted");
    assert_eq!(state, WorkflowState::Completed);
    assert!(state.is_terminal());

    let snapshot = session.snapshot().await;
    let texts: Vec<&str> = snapshot.messages.iter().map(|m| m.text.as_str()).collect();
    assert!(texts.contains(&"已分析你的症状：头痛伴随轻度发烧和头晕。现在为你选择合适的诊室..."));
    assert!(texts.contains(&"已记录你的 2 项需求。现在根据诊室和需求优化路线..."));
    assert!(snapshot.messages.iter().all(|m| !m.is_processing && !m.is_error));

    let final_text = texts.last().expect("route message");
    assert!(final_text.starts_with("路线优化完成！\n\n原始路线：\n从 entrance 出发"));
    assert!(final_text.contains("→ 前往 elevator"));
    assert!(final_text.ends_with("你可以按照这个路线前往诊室。"));
    assert!(!final_text.contains("路线修改提示"));

    assert_eq!(
        snapshot.data.modified_route,
        Some(vec![
            LocationLink::new("entrance", "registration_center"),
            LocationLink::new("registration_center", "elevator"),
            LocationLink::new("elevator", CLINIC),
            LocationLink::new(CLINIC, "pharmacy"),
            LocationLink::new("pharmacy", "exit"),
        ])
    );
    assert!(snapshot.data.has_patches());
    assert!(snapshot.data.formatted_modified_route().contains("到达终点 exit"));

    // No map loaded, so the route was never turned into commands.
    assert!(!snapshot.data.has_commands());
    assert!(!gateway.calls().contains(&"parse_commands"));

    assert_eq!(
        observer.transitions(),
        vec![
            (WorkflowState::Idle, WorkflowState::CollectingConditions),
            (
                WorkflowState::CollectingConditions,
                WorkflowState::SelectingClinic
            ),
            (
                WorkflowState::SelectingClinic,
                WorkflowState::CollectingRequirements
            ),
            (
                WorkflowState::CollectingRequirements,
                WorkflowState::PatchingRoute
            ),
            (WorkflowState::PatchingRoute, WorkflowState::Completed),
        ]
    );
}

#[tokio::test]
async fn loaded_map_is_highlighted_along_the_final_route() {
    let (session, gateway, observer) = session_with(ScriptedGateway::happy());
    session.start_workflow().await;
    session.load_map().await.expect("map loads");

    session.process_user_input("头痛").await.expect("symptoms");
    session.process_user_input("轮椅").await.expect("requirements");

    let snapshot = session.snapshot().await;
    assert_eq!(snapshot.state, WorkflowState::Completed);
    assert!(gateway.calls().contains(&"parse_commands"));
    let highlighted = snapshot.data.highlighted_map.expect("highlighted map");
    let summary = HighlightSummary::of(&highlighted);
    assert_eq!(summary.highlighted_nodes.len(), 4);
    assert!(summary
        .highlighted_edges
        .contains(&("elevator".into(), CLINIC.into())));
    assert!(!summary
        .highlighted_edges
        .contains(&("registration_center".into(), CLINIC.into())));
    assert!(observer
        .events()
        .iter()
        .any(|e| matches!(e, WorkflowEvent::HighlightsComputed(_))));

    assert!(session.show_map().await);
    assert!(session.snapshot().await.show_map_overlay);
    session.hide_map().await;
    assert!(!session.snapshot().await.show_map_overlay);
}

#[tokio::test]
async fn clinic_failure_moves_to_error_with_backend_reason() {
    let mut gateway = ScriptedGateway::happy();
    gateway.clinic = Ok(ApiResponse::failure("clinic service down"));
    let (session, _, observer) = session_with(gateway);
    session.start_workflow().await;

    let state = session.process_user_input("头痛").await.expect("processed");

    assert_eq!(state, WorkflowState::Error);
    assert_eq!(state.to_string(), "error");
    assert_eq!(
        observer.transitions(),
        vec![
            (WorkflowState::Idle, WorkflowState::CollectingConditions),
            (
                WorkflowState::CollectingConditions,
                WorkflowState::SelectingClinic
            ),
            (WorkflowState::SelectingClinic, WorkflowState::Error),
        ]
    );
    let snapshot = session.snapshot().await;
    assert_eq!(snapshot.error_message.as_deref(), Some("clinic service down"));
    assert_eq!(snapshot.previous_state, WorkflowState::SelectingClinic);
    let last = snapshot.messages.last().expect("message");
    assert_eq!(last.text, "抱歉，选择诊室时出现错误：clinic service down");
    assert!(last.is_error);
    assert!(!last.is_processing);
    assert!(observer.events().contains(&WorkflowEvent::GatewayFailure {
        step: WorkflowStep::SelectClinic,
        reason: "clinic service down".to_string(),
    }));
}

#[tokio::test]
async fn silent_backend_failure_uses_fallback_reason() {
    let mut gateway = ScriptedGateway::happy();
    gateway.conditions = Ok(ApiResponse {
        success: false,
        data: None,
        error: None,
    });
    let (session, _, _) = session_with(gateway);
    session.start_workflow().await;

    session.process_user_input("头痛").await.expect("processed");

    let snapshot = session.snapshot().await;
    assert_eq!(snapshot.state, WorkflowState::Error);
    assert_eq!(
        snapshot.error_message.as_deref(),
        Some("Failed to collect conditions")
    );
    assert_eq!(last_text(&session).await, "抱歉，分析症状时出现错误：未知错误");
}

#[tokio::test]
async fn gateway_exception_is_reported_as_processing_error() {
    let mut gateway = ScriptedGateway::happy();
    gateway.conditions = Err("connection reset".to_string());
    let (session, _, observer) = session_with(gateway);
    session.start_workflow().await;

    session.process_user_input("头痛").await.expect("processed");

    assert_eq!(session.current_state().await, WorkflowState::Error);
    assert_eq!(last_text(&session).await, "处理症状时出现错误：connection reset");
    assert!(observer.events().contains(&WorkflowEvent::StepException {
        step: WorkflowStep::CollectConditions,
        reason: "connection reset".to_string(),
    }));
}

#[tokio::test]
async fn empty_clinic_selection_is_an_exception() {
    let mut gateway = ScriptedGateway::happy();
    gateway.clinic = Ok(ApiResponse::ok(ClinicSelection {
        clinic_selection: None,
    }));
    let (session, _, _) = session_with(gateway);
    session.start_workflow().await;

    session.process_user_input("头痛").await.expect("processed");

    let snapshot = session.snapshot().await;
    assert_eq!(snapshot.state, WorkflowState::Error);
    assert_eq!(
        snapshot.error_message.as_deref(),
        Some("No clinic selection in response")
    );
    assert_eq!(
        last_text(&session).await,
        "选择诊室时出现错误：No clinic selection in response"
    );
    assert!(snapshot.data.original_route.is_none());
}

#[tokio::test]
async fn whitespace_clinic_fails_route_generation() {
    let mut gateway = ScriptedGateway::happy();
    gateway.clinic = Ok(ApiResponse::ok(ClinicSelection::new("  ")));
    let (session, _, _) = session_with(gateway);
    session.start_workflow().await;

    session.process_user_input("头痛").await.expect("processed");

    let snapshot = session.snapshot().await;
    assert_eq!(snapshot.state, WorkflowState::Error);
    assert_eq!(
        snapshot.error_message.as_deref(),
        Some("invalid argument: clinic id is required to generate the original route")
    );
    assert!(snapshot.data.clinic_id.is_none());
}

#[tokio::test]
async fn blank_input_is_answered_without_calling_backend() {
    let (session, gateway, _) = session_with(ScriptedGateway::happy());
    session.start_workflow().await;

    let state = session.process_user_input("   ").await.expect("processed");

    assert_eq!(state, WorkflowState::CollectingConditions);
    assert_eq!(last_text(&session).await, "请输入有效的症状描述。");
    assert!(gateway.calls().is_empty());
    assert_eq!(session.messages().await.len(), 2);
}

#[tokio::test]
async fn settled_voice_transcript_is_not_duplicated() {
    let (session, _, observer) = session_with(ScriptedGateway::happy());
    session.start_workflow().await;
    session
        .add_user_message("", MessageOptions::skeleton())
        .await;
    assert!(
        session
            .update_last_message(MessageUpdate {
                text: Some("头痛".to_string()),
                is_skeleton: Some(false),
                ..MessageUpdate::default()
            })
            .await
    );

    session.process_user_input("头痛").await.expect("processed");

    let user_messages = session
        .messages()
        .await
        .into_iter()
        .filter(|m| m.sender == Sender::User)
        .count();
    assert_eq!(user_messages, 1);
    assert!(observer
        .events()
        .iter()
        .any(|e| matches!(e, WorkflowEvent::DuplicateUserMessageSkipped { .. })));
}

#[tokio::test]
async fn input_after_completion_is_refused() {
    let (session, gateway, _) = session_with(ScriptedGateway::happy());
    session.start_workflow().await;
    session.process_user_input("头痛").await.expect("symptoms");
    session.process_user_input("轮椅").await.expect("requirements");
    let calls_before = gateway.calls().len();

    let state = session.process_user_input("还有别的吗").await.expect("processed");

    assert_eq!(state, WorkflowState::Completed);
    assert_eq!(
        last_text(&session).await,
        "当前状态无法处理输入。当前状态: completed"
    );
    assert_eq!(gateway.calls().len(), calls_before);
}

#[tokio::test]
async fn overlapping_input_is_rejected_while_busy() {
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let mut gateway = ScriptedGateway::happy();
    gateway.gate = Some((entered.clone(), release.clone()));
    let (session, _, observer) = session_with(gateway);
    session.start_workflow().await;

    let first = {
        let session = session.clone();
        tokio::spawn(async move { session.process_user_input("头痛").await })
    };
    entered.notified().await;

    assert!(session.is_loading());
    let err = session
        .process_user_input("又一次")
        .await
        .expect_err("second call must be rejected");
    assert!(matches!(err, WorkflowError::Busy));
    assert!(observer
        .events()
        .contains(&WorkflowEvent::InputRejected(InputRejection::Busy)));

    release.notify_one();
    let state = first.await.expect("join").expect("first call");
    assert_eq!(state, WorkflowState::CollectingRequirements);
    assert!(!session.is_loading());
    let user_texts: Vec<String> = session
        .messages()
        .await
        .into_iter()
        .filter(|m| m.sender == Sender::User)
        .map(|m| m.text)
        .collect();
    assert_eq!(user_texts, vec!["头痛".to_string()]);
}

#[tokio::test]
async fn transition_to_same_state_is_a_no_op() {
    let (session, _, observer) = session_with(ScriptedGateway::happy());
    session.transition_to_error("boom").await;
    assert_eq!(
        session.snapshot().await.error_message.as_deref(),
        Some("boom")
    );

    assert!(!session.transition_to(WorkflowState::Error).await);
    assert_eq!(observer.transitions().len(), 1);

    assert!(session.transition_to(WorkflowState::Idle).await);
    let snapshot = session.snapshot().await;
    assert_eq!(snapshot.error_message, None);
    assert_eq!(snapshot.previous_state, WorkflowState::Error);
}

#[tokio::test]
async fn show_map_without_highlights_does_nothing() {
    let (session, _, observer) = session_with(ScriptedGateway::happy());

    assert!(!session.show_map().await);
    assert!(!session.snapshot().await.show_map_overlay);
    assert!(!observer
        .events()
        .iter()
        .any(|e| matches!(e, WorkflowEvent::MapOverlay { .. })));
}

#[tokio::test]
async fn malformed_map_is_rejected_without_touching_state() {
    let mut gateway = ScriptedGateway::happy();
    gateway.map = Ok(ApiResponse::ok(json!({"nodes": []})));
    let (session, _, _) = session_with(gateway);
    session.start_workflow().await;

    let err = session.load_map().await.expect_err("map must be rejected");

    assert!(matches!(err, WorkflowError::InvalidArgument(_)));
    let snapshot = session.snapshot().await;
    assert_eq!(snapshot.state, WorkflowState::CollectingConditions);
    assert!(!snapshot.data.has_map_data());
}

#[tokio::test]
async fn map_backend_failure_is_a_gateway_error() {
    let mut gateway = ScriptedGateway::happy();
    gateway.map = Ok(ApiResponse::failure("map offline"));
    let (session, _, _) = session_with(gateway);

    let err = session.load_map().await.expect_err("failure");
    assert!(matches!(err, WorkflowError::Gateway(reason) if reason == "map offline"));
}

#[tokio::test]
async fn patch_anomalies_are_noted_in_the_route_message() {
    let mut gateway = ScriptedGateway::happy();
    gateway.patches = Ok(ApiResponse::ok(RoutePatchOutput {
        patches: vec![LocationLinkPatch::delete("entrance", "lobby", "cafe")],
    }));
    let (session, _, observer) = session_with(gateway);
    session.start_workflow().await;
    session.process_user_input("头痛").await.expect("symptoms");
    session.process_user_input("轮椅").await.expect("requirements");

    let text = last_text(&session).await;
    assert!(text.starts_with("路线优化完成！"));
    assert!(text.contains("路线修改提示：\n- 未找到需要删除的路段 lobby→cafe"));
    assert!(observer
        .events()
        .iter()
        .any(|e| matches!(e, WorkflowEvent::PatchAnomaly(_))));
    assert_eq!(session.current_state().await, WorkflowState::Completed);
}

#[tokio::test]
async fn broken_route_completes_with_error_flagged_message() {
    let mut gateway = ScriptedGateway::happy();
    gateway.patches = Ok(ApiResponse::ok(RoutePatchOutput {
        patches: vec![LocationLinkPatch::insert(
            "pharmacy",
            "registration_center",
            "exit",
        )],
    }));
    let (session, _, observer) = session_with(gateway);
    session.start_workflow().await;
    session.process_user_input("头痛").await.expect("symptoms");
    session.process_user_input("轮椅").await.expect("requirements");

    let snapshot = session.snapshot().await;
    assert_eq!(snapshot.state, WorkflowState::Completed);
    let last = snapshot.messages.last().expect("message");
    assert!(last.is_error);
    assert!(last.text.starts_with(
        "路线优化完成，但路线连续性验证失败：Duplicate location IDs found: registration_center"
    ));
    assert!(observer
        .events()
        .iter()
        .any(|e| matches!(e, WorkflowEvent::RouteValidationFailed { .. })));
}

#[tokio::test]
async fn failed_command_parse_still_completes() {
    let mut gateway = ScriptedGateway::happy();
    gateway.commands = Ok(ApiResponse::failure("parser unavailable"));
    let (session, _, observer) = session_with(gateway);
    session.start_workflow().await;
    session.load_map().await.expect("map");
    session.process_user_input("头痛").await.expect("symptoms");
    session.process_user_input("轮椅").await.expect("requirements");

    let snapshot = session.snapshot().await;
    assert_eq!(snapshot.state, WorkflowState::Completed);
    assert!(!snapshot.data.has_highlighted_map());
    assert!(snapshot.data.has_modified_route());
    assert!(observer.events().contains(&WorkflowEvent::CommandsUnavailable {
        reason: "parser unavailable".to_string(),
    }));
}

#[tokio::test]
async fn requirement_count_is_omitted_when_none_were_found() {
    let mut gateway = ScriptedGateway::happy();
    gateway.requirements = Ok(ApiResponse::ok(Vec::new()));
    let (session, _, _) = session_with(gateway);
    session.start_workflow().await;
    session.process_user_input("头痛").await.expect("symptoms");
    session.process_user_input("没有").await.expect("requirements");

    let texts: Vec<String> = session.messages().await.into_iter().map(|m| m.text).collect();
    assert!(texts.contains(&"已记录你的需求。现在根据诊室和需求优化路线...".to_string()));
    assert_eq!(session.current_state().await, WorkflowState::Completed);
}

#[tokio::test]
async fn reset_clears_conversation_and_data() {
    let (session, _, observer) = session_with(ScriptedGateway::happy());
    session.start_workflow().await;
    session.load_map().await.expect("map");
    session.process_user_input("头痛").await.expect("symptoms");
    session.process_user_input("轮椅").await.expect("requirements");
    assert!(session.show_map().await);

    session.reset_workflow().await;

    let snapshot = session.snapshot().await;
    assert_eq!(snapshot.state, WorkflowState::Idle);
    assert_eq!(snapshot.previous_state, WorkflowState::Idle);
    assert!(snapshot.messages.is_empty());
    assert_eq!(snapshot.data, WorkflowData::default());
    assert!(!snapshot.show_map_overlay);
    assert_eq!(snapshot.data.formatted_original_route(), "");
    assert!(observer.events().contains(&WorkflowEvent::Reset));
}

#[tokio::test]
async fn restart_during_pending_step_discards_its_result() {
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let mut gateway = ScriptedGateway::happy();
    gateway.gate = Some((entered.clone(), release.clone()));
    let (session, gateway, observer) = session_with(gateway);
    session.start_workflow().await;

    let first = {
        let session = session.clone();
        tokio::spawn(async move { session.process_user_input("头痛").await })
    };
    entered.notified().await;

    session.start_workflow().await;
    release.notify_one();
    let state = first.await.expect("join").expect("first call");

    assert_eq!(state, WorkflowState::CollectingConditions);
    let snapshot = session.snapshot().await;
    assert_eq!(snapshot.state, WorkflowState::CollectingConditions);
    assert_eq!(snapshot.previous_state, WorkflowState::Idle);
    assert_eq!(snapshot.data, WorkflowData::default());
    let texts: Vec<&str> = snapshot.messages.iter().map(|m| m.text.as_str()).collect();
    assert_eq!(texts, vec![GREETING]);
    assert_eq!(gateway.calls(), vec!["collect_conditions"]);
    assert!(observer.events().contains(&WorkflowEvent::StaleResultDropped {
        step: WorkflowStep::CollectConditions,
    }));

    // The restarted conversation runs normally.
    release.notify_one();
    let state = session.process_user_input("头痛").await.expect("symptoms");
    assert_eq!(state, WorkflowState::CollectingRequirements);
}

#[tokio::test]
async fn reset_during_pending_failure_leaves_session_idle() {
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let mut gateway = ScriptedGateway::happy();
    gateway.conditions = Err("connection reset".to_string());
    gateway.gate = Some((entered.clone(), release.clone()));
    let (session, _, observer) = session_with(gateway);
    session.start_workflow().await;

    let first = {
        let session = session.clone();
        tokio::spawn(async move { session.process_user_input("头痛").await })
    };
    entered.notified().await;

    session.reset_workflow().await;
    release.notify_one();
    let state = first.await.expect("join").expect("first call");

    assert_eq!(state, WorkflowState::Idle);
    let snapshot = session.snapshot().await;
    assert!(snapshot.error_message.is_none());
    assert!(snapshot.messages.is_empty());
    assert!(!observer
        .events()
        .iter()
        .any(|e| matches!(e, WorkflowEvent::StepException { .. })));
}

#[tokio::test]
async fn requirements_rejection_moves_to_error() {
    let mut gateway = ScriptedGateway::happy();
    gateway.requirements = Ok(ApiResponse::failure("req down"));
    let (session, gateway, observer) = session_with(gateway);
    session.start_workflow().await;
    session.process_user_input("头痛").await.expect("symptoms");

    let state = session.process_user_input("轮椅").await.expect("processed");

    assert_eq!(state, WorkflowState::Error);
    let snapshot = session.snapshot().await;
    assert_eq!(snapshot.previous_state, WorkflowState::CollectingRequirements);
    assert_eq!(snapshot.error_message.as_deref(), Some("req down"));
    let last = snapshot.messages.last().expect("message");
    assert_eq!(last.text, "抱歉，分析需求时出现错误：req down");
    assert!(last.is_error);
    assert!(!last.is_processing);
    assert!(snapshot.data.requirements.is_none());
    assert!(!gateway.calls().contains(&"patch_route"));
    assert!(observer.events().contains(&WorkflowEvent::GatewayFailure {
        step: WorkflowStep::CollectRequirements,
        reason: "req down".to_string(),
    }));
}

#[tokio::test]
async fn requirements_exception_moves_to_error() {
    let mut gateway = ScriptedGateway::happy();
    gateway.requirements = Err("timeout".to_string());
    let (session, _, observer) = session_with(gateway);
    session.start_workflow().await;
    session.process_user_input("头痛").await.expect("symptoms");

    session.process_user_input("轮椅").await.expect("processed");

    let snapshot = session.snapshot().await;
    assert_eq!(snapshot.state, WorkflowState::Error);
    assert_eq!(snapshot.previous_state, WorkflowState::CollectingRequirements);
    assert_eq!(snapshot.error_message.as_deref(), Some("timeout"));
    assert_eq!(last_text(&session).await, "处理需求时出现错误：timeout");
    assert!(observer.events().contains(&WorkflowEvent::StepException {
        step: WorkflowStep::CollectRequirements,
        reason: "timeout".to_string(),
    }));
}

#[tokio::test]
async fn patch_rejection_moves_to_error() {
    let mut gateway = ScriptedGateway::happy();
    gateway.patches = Ok(ApiResponse::failure("patch down"));
    let (session, _, observer) = session_with(gateway);
    session.start_workflow().await;
    session.process_user_input("头痛").await.expect("symptoms");

    let state = session.process_user_input("轮椅").await.expect("processed");

    assert_eq!(state, WorkflowState::Error);
    let snapshot = session.snapshot().await;
    assert_eq!(snapshot.previous_state, WorkflowState::PatchingRoute);
    assert_eq!(snapshot.error_message.as_deref(), Some("patch down"));
    let last = snapshot.messages.last().expect("message");
    assert_eq!(last.text, "抱歉，优化路线时出现错误：patch down");
    assert!(last.is_error);
    assert!(snapshot.data.has_requirements());
    assert!(!snapshot.data.has_modified_route());
    assert!(observer.events().contains(&WorkflowEvent::GatewayFailure {
        step: WorkflowStep::PatchRoute,
        reason: "patch down".to_string(),
    }));
}

#[tokio::test]
async fn patch_exception_moves_to_error() {
    let mut gateway = ScriptedGateway::happy();
    gateway.patches = Err("boom".to_string());
    let (session, _, observer) = session_with(gateway);
    session.start_workflow().await;
    session.process_user_input("头痛").await.expect("symptoms");

    session.process_user_input("轮椅").await.expect("processed");

    let snapshot = session.snapshot().await;
    assert_eq!(snapshot.state, WorkflowState::Error);
    assert_eq!(snapshot.previous_state, WorkflowState::PatchingRoute);
    assert_eq!(snapshot.error_message.as_deref(), Some("boom"));
    assert_eq!(last_text(&session).await, "优化路线时出现错误：boom");
    assert!(!snapshot.data.has_modified_route());
    assert!(observer.events().contains(&WorkflowEvent::StepException {
        step: WorkflowStep::PatchRoute,
        reason: "boom".to_string(),
    }));
}
