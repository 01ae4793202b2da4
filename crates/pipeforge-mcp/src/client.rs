//! HTTP client for the Pipeforge control-plane REST API.

use serde_json::{Map, Value};

use crate::error::ToolError;

/// HTTP client that proxies requests to a Pipeforge server.
#[derive(Clone)]
pub struct PlatformClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl PlatformClient {
    pub fn new(base_url: String, api_key: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(5))
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .expect("failed to build HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api/v1/{}", self.base_url, path)
    }

    fn add_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }

    async fn check_response(&self, resp: reqwest::Response) -> Result<Value, ToolError> {
        let status = resp.status().as_u16();
        if (200..300).contains(&status) {
            return Ok(resp.json().await?);
        }

        let body: Value = resp.json().await.unwrap_or_default();
        match status {
            // For these the status itself is the signal; keep it.
            401 | 403 | 404 => Err(ToolError::Api {
                status: Some(status),
                message: detail_message(&body).unwrap_or_else(|| format!("HTTP {}", status)),
            }),
            _ => Err(decode_error_body(status, &body)),
        }
    }

    pub async fn get(&self, path: &str) -> Result<Value, ToolError> {
        self.get_query(path, &Map::new()).await
    }

    /// GET with query parameters. JSON scalar values are rendered the way
    /// the server's filter parser expects (no quotes around strings).
    pub async fn get_query(&self, path: &str, query: &Map<String, Value>) -> Result<Value, ToolError> {
        let url = self.api_url(path);
        let pairs: Vec<(String, String)> = query
            .iter()
            .map(|(k, v)| (k.clone(), query_value(v)))
            .collect();
        let resp = self
            .add_auth(self.client.get(&url).query(&pairs))
            .send()
            .await
            .map_err(ToolError::from)?;
        self.check_response(resp).await
    }

    pub async fn post(&self, path: &str, body: &Value) -> Result<Value, ToolError> {
        let url = self.api_url(path);
        let resp = self
            .add_auth(self.client.post(&url))
            .json(body)
            .send()
            .await
            .map_err(ToolError::from)?;
        self.check_response(resp).await
    }

    // ─── Listing / retrieval ─────────────────────────────────────────

    /// List a collection (`users`, `stacks`, `runs`, ...) with an
    /// already-normalized filter map.
    pub async fn list(&self, collection: &str, query: &Map<String, Value>) -> Result<Value, ToolError> {
        self.get_query(collection, query).await
    }

    /// Fetch one entity by name or ID.
    pub async fn get_entity(&self, collection: &str, name_or_id: &str) -> Result<Value, ToolError> {
        self.get(&format!("{}/{}", collection, name_or_id)).await
    }

    // ─── Operations ──────────────────────────────────────────────────

    pub async fn trigger_pipeline(
        &self,
        template_id: &str,
        run_config: &Value,
    ) -> Result<Value, ToolError> {
        self.post(&format!("run_templates/{}/runs", template_id), run_config)
            .await
    }

    pub async fn get_step_logs(&self, step_id: &str) -> Result<Value, ToolError> {
        self.get(&format!("steps/{}/logs", step_id)).await
    }

    pub async fn get_deployment_logs(&self, deployment_id: &str) -> Result<Value, ToolError> {
        self.get(&format!("deployments/{}/logs", deployment_id)).await
    }

    pub async fn server_info(&self) -> Result<Value, ToolError> {
        self.get("info").await
    }

    pub async fn current_user(&self) -> Result<Value, ToolError> {
        self.get("current-user").await
    }
}

/// Decode a non-2xx error body into the richest `ToolError` available.
///
/// The control plane reports the raising exception as
/// `{"detail": ["ExceptionType", "message", ...]}`; plain FastAPI-style
/// bodies use `{"detail": "message"}`. Anything else falls back to the
/// HTTP status.
fn decode_error_body(status: u16, body: &Value) -> ToolError {
    if let Some(detail) = body.get("detail").and_then(Value::as_array) {
        if let Some(type_name) = detail.first().and_then(Value::as_str) {
            let message = detail
                .iter()
                .skip(1)
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(" ");
            if type_name == "ImportError" || type_name == "ModuleNotFoundError" {
                return ToolError::MissingDependency(message);
            }
            let module = body
                .get("module")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            return ToolError::Upstream {
                type_name: type_name.to_string(),
                module,
                message,
                status: Some(status),
            };
        }
    }
    ToolError::Api {
        status: Some(status),
        message: detail_message(body).unwrap_or_else(|| format!("HTTP {}", status)),
    }
}

fn detail_message(body: &Value) -> Option<String> {
    match body.get("detail") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Array(items)) => {
            let parts: Vec<&str> = items.iter().filter_map(Value::as_str).collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join(" "))
            }
        }
        _ => body.get("message").and_then(Value::as_str).map(str::to_string),
    }
}

fn query_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
