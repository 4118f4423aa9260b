use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Value;
use shared::{
    domain::{ClinicId, Conditions, LocationLink, Requirement},
    protocol::{ApiResponse, ClinicSelection, CommandsOutput, RoutePatchOutput},
};

/// Triage backend, one call per workflow step.
///
/// `Err` means the call itself blew up (transport, decoding); a completed call
/// that the backend rejected comes back as `Ok` with `success == false`.
#[async_trait]
pub trait BackendGateway: Send + Sync {
    async fn collect_conditions(&self, user_input: &str) -> Result<ApiResponse<Conditions>>;
    async fn select_clinic(&self, conditions: &Conditions) -> Result<ApiResponse<ClinicSelection>>;
    async fn collect_requirement(&self, user_input: &str) -> Result<ApiResponse<Vec<Requirement>>>;
    async fn patch_route(
        &self,
        clinic_id: &ClinicId,
        requirements: &[Requirement],
        original_route: &[LocationLink],
    ) -> Result<ApiResponse<RoutePatchOutput>>;
    async fn parse_commands(&self, route: &[LocationLink]) -> Result<ApiResponse<CommandsOutput>>;
    /// Raw map payload; shape is checked by the caller.
    async fn get_map(&self) -> Result<ApiResponse<Value>>;
}

pub struct MissingBackendGateway;

#[async_trait]
impl BackendGateway for MissingBackendGateway {
    async fn collect_conditions(&self, _user_input: &str) -> Result<ApiResponse<Conditions>> {
        Err(anyhow!("triage backend is unavailable"))
    }

    async fn select_clinic(
        &self,
        _conditions: &Conditions,
    ) -> Result<ApiResponse<ClinicSelection>> {
        Err(anyhow!("triage backend is unavailable"))
    }

    async fn collect_requirement(
        &self,
        _user_input: &str,
    ) -> Result<ApiResponse<Vec<Requirement>>> {
        Err(anyhow!("triage backend is unavailable"))
    }

    async fn patch_route(
        &self,
        clinic_id: &ClinicId,
        _requirements: &[Requirement],
        _original_route: &[LocationLink],
    ) -> Result<ApiResponse<RoutePatchOutput>> {
        Err(anyhow!(
            "triage backend is unavailable for route patching to {clinic_id}"
        ))
    }

    async fn parse_commands(&self, _route: &[LocationLink]) -> Result<ApiResponse<CommandsOutput>> {
        Err(anyhow!("triage backend is unavailable"))
    }

    async fn get_map(&self) -> Result<ApiResponse<Value>> {
        Err(anyhow!("map service is unavailable"))
    }
}
