use crate::domain::models::{Plan, PlanForm};
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

const PROJECT_TAG: &str = "focusone";
const ENVELOPE_OK: u16 = 200;

#[derive(Debug, Clone, Deserialize)]
pub struct ApiEnvelope<T> {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub message: Option<String>,
    pub data: Option<T>,
}

impl<T> ApiEnvelope<T> {
    pub fn into_data(self) -> Result<Option<T>, InfraError> {
        if self.status_code != ENVELOPE_OK {
            return Err(InfraError::ApiRejected {
                status: self.status_code,
                message: self
                    .message
                    .unwrap_or_else(|| "plan api request failed".to_string()),
            });
        }
        Ok(self.data)
    }
}

#[async_trait]
pub trait PlanApiClient: Send + Sync {
    async fn list_plans(&self, access_token: &str) -> Result<Vec<Plan>, InfraError>;

    async fn create_plan(&self, access_token: &str, form: &PlanForm) -> Result<Option<Plan>, InfraError>;

    async fn update_plan(&self, access_token: &str, plan_id: &str, form: &PlanForm) -> Result<(), InfraError>;

    async fn delete_plan(&self, access_token: &str, plan_id: &str) -> Result<(), InfraError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestPlanApiClient {
    client: Client,
    base_url: Url,
    platform: String,
}

impl ReqwestPlanApiClient {
    pub fn new(base_url: &str, timeout: Duration, platform: impl Into<String>) -> Result<Self, InfraError> {
        let mut base_url = Url::parse(base_url.trim())
            .map_err(|error| InfraError::InvalidConfig(format!("invalid plan api base url: {error}")))?;
        if base_url.cannot_be_a_base() {
            return Err(InfraError::InvalidConfig(
                "plan api base url cannot be a base".to_string(),
            ));
        }
        // Keep the last path segment (e.g. `/dev-api`) when joining endpoints.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| InfraError::Network(format!("failed building http client: {error}")))?;
        Ok(Self {
            client,
            base_url,
            platform: platform.into(),
        })
    }

    pub fn endpoint(&self, segments: &[&str]) -> Result<Url, InfraError> {
        let mut url = self.base_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| InfraError::InvalidConfig("plan api base url cannot be a base".to_string()))?;
            path.pop_if_empty();
            for segment in segments {
                path.push(segment);
            }
        }
        Ok(url)
    }

    fn ensure_non_empty(value: &str, field: &str) -> Result<(), InfraError> {
        if value.trim().is_empty() {
            return Err(InfraError::InvalidPlan(format!("{field} must not be empty")));
        }
        Ok(())
    }

    fn authorized(&self, request: RequestBuilder, access_token: &str) -> RequestBuilder {
        request
            .bearer_auth(access_token)
            .header("project-tag", PROJECT_TAG)
            .header("os", &self.platform)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        action: &str,
    ) -> Result<Option<T>, InfraError> {
        let response = request
            .send()
            .await
            .map_err(|error| InfraError::Network(format!("network error while {action}: {error}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| InfraError::Network(format!("failed reading response while {action}: {error}")))?;

        decode_response(status, &body, action)
    }
}

pub fn decode_response<T: DeserializeOwned>(
    status: StatusCode,
    body: &str,
    action: &str,
) -> Result<Option<T>, InfraError> {
    if status == StatusCode::UNAUTHORIZED {
        return Err(InfraError::Unauthorized);
    }
    if !status.is_success() {
        let message = serde_json::from_str::<ApiEnvelope<serde_json::Value>>(body)
            .ok()
            .and_then(|envelope| envelope.message)
            .unwrap_or_else(|| {
                if body.trim().is_empty() {
                    format!("http {} while {action}", status.as_u16())
                } else {
                    format!("http {} while {action}; body={body}", status.as_u16())
                }
            });
        return Err(InfraError::Api {
            status: status.as_u16(),
            message,
        });
    }

    let envelope: ApiEnvelope<T> = serde_json::from_str(body).map_err(|error| InfraError::Api {
        status: status.as_u16(),
        message: format!("invalid payload while {action}: {error}; body={body}"),
    })?;
    envelope.into_data()
}

#[async_trait]
impl PlanApiClient for ReqwestPlanApiClient {
    async fn list_plans(&self, access_token: &str) -> Result<Vec<Plan>, InfraError> {
        let endpoint = self.endpoint(&["plan", "lists"])?;
        let request = self.authorized(self.client.get(endpoint), access_token);
        let plans: Option<Vec<Plan>> = self.send(request, "listing plans").await?;
        Ok(plans.unwrap_or_default())
    }

    async fn create_plan(&self, access_token: &str, form: &PlanForm) -> Result<Option<Plan>, InfraError> {
        let endpoint = self.endpoint(&["plan", "add"])?;
        let request = self.authorized(self.client.post(endpoint), access_token).json(form);
        self.send(request, "creating plan").await
    }

    async fn update_plan(&self, access_token: &str, plan_id: &str, form: &PlanForm) -> Result<(), InfraError> {
        Self::ensure_non_empty(plan_id, "plan id")?;
        let endpoint = self.endpoint(&["plan", "edit", plan_id.trim()])?;
        let request = self.authorized(self.client.put(endpoint), access_token).json(form);
        let _: Option<serde_json::Value> = self.send(request, "updating plan").await?;
        Ok(())
    }

    async fn delete_plan(&self, access_token: &str, plan_id: &str) -> Result<(), InfraError> {
        Self::ensure_non_empty(plan_id, "plan id")?;
        let endpoint = self.endpoint(&["plan", "remove", plan_id.trim()])?;
        let request = self.authorized(self.client.delete(endpoint), access_token);
        let _: Option<serde_json::Value> = self.send(request, "deleting plan").await?;
        Ok(())
    }
}
