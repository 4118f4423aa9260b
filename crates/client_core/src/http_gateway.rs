use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use shared::{
    domain::{ClinicId, Conditions, LocationLink, Requirement},
    protocol::{
        ApiResponse, ClinicSelection, CollectConditionsRequest, CollectRequirementRequest,
        CommandsOutput, ParseCommandsRequest, PatchRouteRequest, RequirementList,
        RoutePatchOutput, SelectClinicRequest,
    },
};
use tracing::{debug, warn};

use crate::gateway::BackendGateway;

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000/api";

/// [`BackendGateway`] over the triage backend's JSON HTTP API.
///
/// Transport failures, non-2xx statuses and unparseable bodies are folded into
/// a failed [`ApiResponse`]; only a `data` payload of the wrong shape is
/// surfaced as an `Err`.
pub struct HttpBackendGateway {
    http: Client,
    base_url: String,
    online_model: bool,
}

impl HttpBackendGateway {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build triage http client")?;
        Ok(Self::with_client(http, base_url))
    }

    pub fn with_client(http: Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            online_model: true,
        }
    }

    pub fn with_online_model(mut self, online_model: bool) -> Self {
        self.online_model = online_model;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{endpoint}", self.base_url)
    }

    async fn post<B, T>(&self, endpoint: &str, body: &B) -> Result<ApiResponse<T>>
    where
        B: Serialize + Sync,
        T: DeserializeOwned + Send,
    {
        let envelope = self
            .fetch(endpoint, self.http.post(self.url(endpoint)).json(body))
            .await
            .map(envelope_from_body)
            .unwrap_or_else(|reason| ApiResponse::failure(reason));
        decode_envelope(endpoint, envelope)
    }

    /// Body of a 2xx response, or the reason the request failed.
    async fn fetch(&self, endpoint: &str, request: RequestBuilder) -> Result<Value, String> {
        debug!(endpoint, "triage request");

        let response = request.send().await.map_err(|e| {
            warn!(endpoint, error = %e, "triage request failed");
            e.to_string()
        })?;
        let status = response.status();
        let text = response.text().await.map_err(|e| e.to_string())?;

        let body = if text.trim().is_empty() {
            Value::Object(Map::new())
        } else {
            serde_json::from_str::<Value>(&text).map_err(|e| {
                warn!(endpoint, status = status.as_u16(), "triage response is not json");
                format!("Invalid JSON response: {e}")
            })?
        };

        if !status.is_success() {
            let reason = body
                .get("error")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| {
                    format!(
                        "HTTP {}: {}",
                        status.as_u16(),
                        status.canonical_reason().unwrap_or("unknown status")
                    )
                });
            warn!(endpoint, status = status.as_u16(), %reason, "triage request rejected");
            return Err(reason);
        }

        Ok(body)
    }
}

/// Reads the `{success, data, error}` envelope. Some endpoints double-encode
/// `data` as a JSON string; that is unwrapped once when it parses.
fn envelope_from_body(body: Value) -> ApiResponse<Value> {
    let success = body.get("success").and_then(Value::as_bool).unwrap_or(false);
    let error = body.get("error").and_then(Value::as_str).map(str::to_string);
    let data = body
        .get("data")
        .filter(|data| !data.is_null())
        .cloned()
        .map(|data| match data {
            Value::String(raw) if success => {
                serde_json::from_str::<Value>(&raw).unwrap_or(Value::String(raw))
            }
            other => other,
        });

    ApiResponse {
        success,
        data,
        error,
    }
}

fn decode_envelope<T: DeserializeOwned>(
    endpoint: &str,
    envelope: ApiResponse<Value>,
) -> Result<ApiResponse<T>> {
    if !envelope.success {
        return Ok(ApiResponse {
            success: false,
            data: None,
            error: envelope.error,
        });
    }

    let data = envelope
        .data
        .map(serde_json::from_value::<T>)
        .transpose()
        .with_context(|| format!("unexpected payload from {endpoint}"))?;
    Ok(ApiResponse {
        success: true,
        data,
        error: envelope.error,
    })
}

#[async_trait]
impl BackendGateway for HttpBackendGateway {
    async fn collect_conditions(&self, user_input: &str) -> Result<ApiResponse<Conditions>> {
        self.post(
            "/triager/collect_conditions/",
            &CollectConditionsRequest {
                user_input: user_input.to_string(),
                online_model: self.online_model,
            },
        )
        .await
    }

    async fn select_clinic(&self, conditions: &Conditions) -> Result<ApiResponse<ClinicSelection>> {
        self.post(
            "/triager/select_clinic/",
            &SelectClinicRequest {
                conditions: conditions.clone(),
                online_model: self.online_model,
            },
        )
        .await
    }

    async fn collect_requirement(&self, user_input: &str) -> Result<ApiResponse<Vec<Requirement>>> {
        let response: ApiResponse<RequirementList> = self
            .post(
                "/triager/collect_requirement/",
                &CollectRequirementRequest {
                    user_input: user_input.to_string(),
                    online_model: self.online_model,
                },
            )
            .await?;
        Ok(response.map(Vec::from))
    }

    async fn patch_route(
        &self,
        clinic_id: &ClinicId,
        requirements: &[Requirement],
        original_route: &[LocationLink],
    ) -> Result<ApiResponse<RoutePatchOutput>> {
        self.post(
            "/triager/patch_route/",
            &PatchRouteRequest {
                destination_clinic_id: clinic_id.clone(),
                requirement_summary: requirements.to_vec(),
                origin_route: original_route.to_vec(),
                online_model: self.online_model,
            },
        )
        .await
    }

    async fn parse_commands(&self, route: &[LocationLink]) -> Result<ApiResponse<CommandsOutput>> {
        self.post(
            "/triager/parse_commands/",
            &ParseCommandsRequest {
                origin_route: route.to_vec(),
            },
        )
        .await
    }

    async fn get_map(&self) -> Result<ApiResponse<Value>> {
        let endpoint = "/triager/map/";
        let body = match self.fetch(endpoint, self.http.get(self.url(endpoint))).await {
            Ok(body) => body,
            Err(reason) => return Ok(ApiResponse::failure(reason)),
        };

        // The map route may answer with the bare graph instead of an envelope.
        if body.get("success").is_some() {
            Ok(envelope_from_body(body))
        } else {
            Ok(ApiResponse::ok(body))
        }
    }
}

#[cfg(test)]
#[path = "tests/http_gateway_tests.rs"]
mod tests;
