use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use client_core::BackendGateway;
use navigation::route::extract_location_ids;
use serde_json::{json, Value};
use shared::{
    domain::{ClinicId, Command, Conditions, LocationLink, LocationLinkPatch, Requirement},
    protocol::{ApiResponse, ClinicSelection, CommandsOutput, RoutePatchOutput},
};
use tracing::debug;

const DEMO_CLINIC: &str = "internal_medicine_clinic";

/// Offline stand-in for the triage backend. Every call succeeds with the same
/// canned answer after `delay`.
pub struct DemoGateway {
    delay: Duration,
}

impl DemoGateway {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    async fn pause(&self, call: &str) {
        debug!(call, "demo gateway call");
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

#[async_trait]
impl BackendGateway for DemoGateway {
    async fn collect_conditions(&self, _user_input: &str) -> Result<ApiResponse<Conditions>> {
        self.pause("collect_conditions").await;
        Ok(ApiResponse::ok(Conditions {
            body_parts: "头部".into(),
            duration: "2天".into(),
            severity: "中度".into(),
            description: "头痛伴随轻度发烧和头晕".into(),
            other_relevant_information: vec!["无药物过敏".into(), "无慢性病史".into()],
        }))
    }

    async fn select_clinic(&self, _conditions: &Conditions) -> Result<ApiResponse<ClinicSelection>> {
        self.pause("select_clinic").await;
        Ok(ApiResponse::ok(ClinicSelection::new(DEMO_CLINIC)))
    }

    async fn collect_requirement(&self, _user_input: &str) -> Result<ApiResponse<Vec<Requirement>>> {
        self.pause("collect_requirement").await;
        Ok(ApiResponse::ok(vec![
            Requirement {
                when: "在医生问诊过程中".into(),
                what: "需要医生详细解释病情和治疗方案".into(),
            },
            Requirement {
                when: "在医院移动过程中".into(),
                what: "需要避开人群密集区域".into(),
            },
        ]))
    }

    async fn patch_route(
        &self,
        clinic_id: &ClinicId,
        _requirements: &[Requirement],
        _original_route: &[LocationLink],
    ) -> Result<ApiResponse<RoutePatchOutput>> {
        self.pause("patch_route").await;
        Ok(ApiResponse::ok(RoutePatchOutput {
            patches: vec![LocationLinkPatch::insert(
                "registration_center",
                "elevator",
                clinic_id.as_str(),
            )],
        }))
    }

    /// One `move` per location along the route.
    async fn parse_commands(&self, route: &[LocationLink]) -> Result<ApiResponse<CommandsOutput>> {
        self.pause("parse_commands").await;
        Ok(ApiResponse::ok(CommandsOutput {
            commands: extract_location_ids(route)
                .into_iter()
                .map(|target| Command::new("move", target))
                .collect(),
        }))
    }

    async fn get_map(&self) -> Result<ApiResponse<Value>> {
        self.pause("get_map").await;
        Ok(ApiResponse::ok(demo_map()))
    }
}

fn demo_map() -> Value {
    json!({
        "nodes": [
            {"id": "entrance", "name": "入口", "x": 0.0, "y": 0.0, "type": "main"},
            {"id": "registration_center", "name": "挂号中心", "x": 4.0, "y": 0.0, "type": "service"},
            {"id": "elevator", "name": "电梯", "x": 8.0, "y": 0.0, "type": "nav"},
            {"id": "stairs", "name": "楼梯", "x": 8.0, "y": 2.0, "type": "nav"},
            {"id": DEMO_CLINIC, "name": "内科诊室", "x": 8.0, "y": 6.0, "type": "clinic"},
            {"id": "surgery_clinic", "name": "外科诊室", "x": 12.0, "y": 6.0, "type": "clinic"},
            {"id": "pharmacy", "name": "药房", "x": 4.0, "y": 6.0, "type": "service"},
            {"id": "exit", "name": "出口", "x": 0.0, "y": 6.0, "type": "main"}
        ],
        "edges": [
            {"u": "entrance", "v": "registration_center", "cost": 4},
            {"u": "registration_center", "v": "elevator", "cost": 4},
            {"u": "registration_center", "v": "stairs", "cost": 5},
            {"u": "elevator", "v": DEMO_CLINIC, "cost": 6},
            {"u": "stairs", "v": DEMO_CLINIC, "cost": 4},
            {"u": "stairs", "v": "surgery_clinic", "cost": 6},
            {"u": DEMO_CLINIC, "v": "pharmacy", "cost": 4},
            {"u": "surgery_clinic", "v": "pharmacy", "cost": 8},
            {"u": "pharmacy", "v": "exit", "cost": 4}
        ]
    })
}
