//! MCP tool implementations for Pipeforge.

use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::CallToolResult;
use rmcp::{tool, tool_router};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::client::PlatformClient;
use crate::error::{redact_url, ToolError};
use crate::filters::normalize_datetime_params;
use crate::server::PipeforgeMcpServer;
use crate::wrapper::{run_tool, ToolOutput};

// ─── Tool parameter types ────────────────────────────────────────────

/// Filters shared by every listing tool. String filters accept operator
/// prefixes (`contains:`, `startswith:`, `oneof:`, ...); datetime filters
/// additionally accept bare dates, ISO-8601 timestamps, and
/// `range:start..end`, which are normalized before the request is sent.
#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct ListFilterParams {
    /// Filter by name (e.g. "training" or "contains:train")
    pub name: Option<String>,
    /// Page number, starting at 1
    pub page: Option<i64>,
    /// Page size (max 10000)
    pub size: Option<i64>,
    /// Sort key, e.g. "created" or "desc:created"
    pub sort_by: Option<String>,
    /// Filter by creation time (e.g. "gte:2026-02-01")
    pub created: Option<String>,
    /// Filter by last-update time
    pub updated: Option<String>,
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct ListRunsParams {
    /// Filter by run name
    pub name: Option<String>,
    /// Filter by pipeline name or ID
    pub pipeline: Option<String>,
    /// Filter by stack name or ID
    pub stack: Option<String>,
    /// Filter by status: "running", "completed", "failed", "cached", "initializing"
    pub status: Option<String>,
    /// Filter by run start time (e.g. "gte:2026-02-01")
    pub start_time: Option<String>,
    /// Filter by run end time
    pub end_time: Option<String>,
    /// Filter by creation time
    pub created: Option<String>,
    /// Filter by last-update time
    pub updated: Option<String>,
    /// Page number, starting at 1
    pub page: Option<i64>,
    /// Page size (max 10000)
    pub size: Option<i64>,
    /// Sort key, e.g. "desc:created"
    pub sort_by: Option<String>,
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct ListStepsParams {
    /// Restrict to steps of this pipeline run (ID)
    pub pipeline_run_id: Option<String>,
    /// Filter by step status
    pub status: Option<String>,
    /// Filter by step start time
    pub start_time: Option<String>,
    /// Filter by step end time
    pub end_time: Option<String>,
    /// Page number, starting at 1
    pub page: Option<i64>,
    /// Page size (max 10000)
    pub size: Option<i64>,
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct ListModelVersionsParams {
    /// Restrict to versions of this model (name or ID)
    pub model: Option<String>,
    /// Filter by version name or number
    pub name: Option<String>,
    /// Filter by stage: "staging", "production", "latest", "archived"
    pub stage: Option<String>,
    /// Page number, starting at 1
    pub page: Option<i64>,
    /// Page size (max 10000)
    pub size: Option<i64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GetEntityParams {
    /// Name or ID of the entity
    pub name_or_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GetStepLogsParams {
    /// ID of the step run
    pub step_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GetDeploymentLogsParams {
    /// Name or ID of the deployment
    pub deployment_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct TriggerPipelineParams {
    /// ID of the run template to trigger
    pub template_id: String,
    /// Optional run configuration (parameters, step overrides)
    pub run_config: Option<Map<String, Value>>,
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct NoParams {}

// ─── Tool implementations ────────────────────────────────────────────

#[tool_router]
impl PipeforgeMcpServer {
    #[tool(description = "List users on the Pipeforge server with pagination and name filters.")]
    async fn list_users(
        &self,
        params: Parameters<ListFilterParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(self.list_collection("list_users", "users", params.0).await)
    }

    #[tool(description = "List stacks (infrastructure configurations) with their components.")]
    async fn list_stacks(
        &self,
        params: Parameters<ListFilterParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(self.list_collection("list_stacks", "stacks", params.0).await)
    }

    #[tool(description = "List registered pipelines. Supports name and datetime filters.")]
    async fn list_pipelines(
        &self,
        params: Parameters<ListFilterParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(self
            .list_collection("list_pipelines", "pipelines", params.0)
            .await)
    }

    #[tool(description = "List artifacts produced by pipeline runs.")]
    async fn list_artifacts(
        &self,
        params: Parameters<ListFilterParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(self
            .list_collection("list_artifacts", "artifacts", params.0)
            .await)
    }

    #[tool(description = "List models in the model registry.")]
    async fn list_models(
        &self,
        params: Parameters<ListFilterParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(self.list_collection("list_models", "models", params.0).await)
    }

    #[tool(description = "List deployments (served models and pipelines).")]
    async fn list_deployments(
        &self,
        params: Parameters<ListFilterParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(self
            .list_collection("list_deployments", "deployments", params.0)
            .await)
    }

    #[tool(description = "List pipeline schedules (cron and interval triggers).")]
    async fn list_schedules(
        &self,
        params: Parameters<ListFilterParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(self
            .list_collection("list_schedules", "schedules", params.0)
            .await)
    }

    #[tool(description = "List long-running services registered with the server.")]
    async fn list_services(
        &self,
        params: Parameters<ListFilterParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(self
            .list_collection("list_services", "services", params.0)
            .await)
    }

    #[tool(
        description = "List run templates. A template is required to trigger a pipeline remotely."
    )]
    async fn list_run_templates(
        &self,
        params: Parameters<ListFilterParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(self
            .list_collection("list_run_templates", "run_templates", params.0)
            .await)
    }

    /// Pipeline runs take richer filters than the generic listing shape.
    #[tool(
        description = "List pipeline runs. Supports filtering by pipeline, stack, status, and \
                       time windows (e.g. start_time: \"gte:2026-02-01\")."
    )]
    async fn list_pipeline_runs(
        &self,
        params: Parameters<ListRunsParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let p = params.0;
        let size = p.size;
        let query = build_runs_query(&p);
        Ok(run_tool(
            &self.telemetry,
            "list_pipeline_runs",
            ToolOutput::Structured,
            size,
            self.client.list("runs", &query),
        )
        .await)
    }

    #[tool(
        description = "List step runs, optionally restricted to one pipeline run. Useful for \
                       finding failed steps and their IDs for log retrieval."
    )]
    async fn list_run_steps(
        &self,
        params: Parameters<ListStepsParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let p = params.0;
        let size = p.size;
        let query = build_steps_query(&p);
        Ok(run_tool(
            &self.telemetry,
            "list_run_steps",
            ToolOutput::Structured,
            size,
            self.client.list("steps", &query),
        )
        .await)
    }

    #[tool(description = "List versions of a model, optionally filtered by stage.")]
    async fn list_model_versions(
        &self,
        params: Parameters<ListModelVersionsParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let p = params.0;
        let size = p.size;
        let mut query = Map::new();
        insert_str(&mut query, "model", &p.model);
        insert_str(&mut query, "name", &p.name);
        insert_str(&mut query, "stage", &p.stage);
        insert_num(&mut query, "page", p.page);
        insert_num(&mut query, "size", p.size);
        Ok(run_tool(
            &self.telemetry,
            "list_model_versions",
            ToolOutput::Structured,
            size,
            self.client.list("model_versions", &query),
        )
        .await)
    }

    #[tool(description = "Get one user by name or ID.")]
    async fn get_user(
        &self,
        params: Parameters<GetEntityParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(self.get_one("get_user", "users", &params.0.name_or_id).await)
    }

    #[tool(description = "Get one stack by name or ID, with its components.")]
    async fn get_stack(
        &self,
        params: Parameters<GetEntityParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(self.get_one("get_stack", "stacks", &params.0.name_or_id).await)
    }

    #[tool(description = "Get one pipeline by name or ID.")]
    async fn get_pipeline(
        &self,
        params: Parameters<GetEntityParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(self
            .get_one("get_pipeline", "pipelines", &params.0.name_or_id)
            .await)
    }

    #[tool(description = "Get one pipeline run by name or ID, including status and step summary.")]
    async fn get_pipeline_run(
        &self,
        params: Parameters<GetEntityParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(self
            .get_one("get_pipeline_run", "runs", &params.0.name_or_id)
            .await)
    }

    #[tool(description = "Get one step run by ID, including its configuration.")]
    async fn get_run_step(
        &self,
        params: Parameters<GetEntityParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(self
            .get_one("get_run_step", "steps", &params.0.name_or_id)
            .await)
    }

    #[tool(description = "Get one model by name or ID.")]
    async fn get_model(
        &self,
        params: Parameters<GetEntityParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(self.get_one("get_model", "models", &params.0.name_or_id).await)
    }

    #[tool(description = "Get one deployment by name or ID, including endpoint and status.")]
    async fn get_deployment(
        &self,
        params: Parameters<GetEntityParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(self
            .get_one("get_deployment", "deployments", &params.0.name_or_id)
            .await)
    }

    #[tool(description = "Get one schedule by name or ID.")]
    async fn get_schedule(
        &self,
        params: Parameters<GetEntityParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(self
            .get_one("get_schedule", "schedules", &params.0.name_or_id)
            .await)
    }

    #[tool(
        description = "Get the logs of a step run. Logs are only available when the run used a \
                       cloud artifact store."
    )]
    async fn get_step_logs(
        &self,
        params: Parameters<GetStepLogsParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(run_tool(
            &self.telemetry,
            "get_step_logs",
            ToolOutput::Text,
            None,
            self.client.get_step_logs(&params.0.step_id),
        )
        .await)
    }

    #[tool(description = "Get the logs of a deployment. Availability depends on the deployer.")]
    async fn get_deployment_logs(
        &self,
        params: Parameters<GetDeploymentLogsParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(run_tool(
            &self.telemetry,
            "get_deployment_logs",
            ToolOutput::Text,
            None,
            self.client.get_deployment_logs(&params.0.deployment_id),
        )
        .await)
    }

    #[tool(description = "Get Pipeforge server information: version, deployment type, auth scheme.")]
    async fn get_server_info(
        &self,
        #[allow(unused)] params: Parameters<NoParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(run_tool(
            &self.telemetry,
            "get_server_info",
            ToolOutput::Structured,
            None,
            self.client.server_info(),
        )
        .await)
    }

    #[tool(
        description = "Trigger a pipeline via a run template. Accepts an optional run \
                       configuration with parameter overrides. Returns the new run."
    )]
    async fn trigger_pipeline(
        &self,
        params: Parameters<TriggerPipelineParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let p = params.0;
        let run_config = Value::Object(p.run_config.unwrap_or_default());
        let result = run_tool(
            &self.telemetry,
            "trigger_pipeline",
            ToolOutput::Structured,
            None,
            self.client.trigger_pipeline(&p.template_id, &run_config),
        )
        .await;
        if result.is_error == Some(false) {
            self.telemetry.track_event("Pipeline Triggered", Map::new());
        }
        Ok(result)
    }

    /// Connectivity/configuration report, tolerant of partial failures.
    #[tool(
        description = "Diagnose the connection to the Pipeforge server: reachability, \
                       authentication, server version, and active user."
    )]
    async fn diagnose_setup(
        &self,
        #[allow(unused)] params: Parameters<NoParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let client = self.client.clone();
        Ok(run_tool(
            &self.telemetry,
            "diagnose_setup",
            ToolOutput::Text,
            None,
            async move { Ok::<_, ToolError>(Value::String(diagnose_setup_impl(&client).await)) },
        )
        .await)
    }

    #[tool(description = "A small reward for the curious.")]
    async fn easter_egg(
        &self,
        #[allow(unused)] params: Parameters<NoParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        self.telemetry
            .track_event("Easter Egg Discovered", Map::new());
        Ok(run_tool(&self.telemetry, "easter_egg", ToolOutput::Text, None, async {
            Ok::<_, ToolError>(Value::String(EASTER_EGG_TEXT.to_string()))
        })
        .await)
    }
}

impl PipeforgeMcpServer {
    pub(crate) fn create_tool_router() -> rmcp::handler::server::router::tool::ToolRouter<Self> {
        Self::tool_router()
    }

    async fn list_collection(
        &self,
        tool_name: &str,
        collection: &str,
        params: ListFilterParams,
    ) -> CallToolResult {
        let size = params.size;
        let query = build_list_query(&params);
        run_tool(
            &self.telemetry,
            tool_name,
            ToolOutput::Structured,
            size,
            self.client.list(collection, &query),
        )
        .await
    }

    async fn get_one(&self, tool_name: &str, collection: &str, name_or_id: &str) -> CallToolResult {
        run_tool(
            &self.telemetry,
            tool_name,
            ToolOutput::Structured,
            None,
            self.client.get_entity(collection, name_or_id),
        )
        .await
    }
}

// ─── Implementation functions ────────────────────────────────────────

async fn diagnose_setup_impl(client: &PlatformClient) -> String {
    let (info, user) = tokio::join!(client.server_info(), client.current_user());

    let mut report = String::new();
    report.push_str("# Pipeforge Setup Diagnosis\n\n");
    report.push_str(&format!("- **Server URL**: {}\n", redact_url(client.base_url())));

    match &info {
        Ok(info) => {
            report.push_str("- **Reachable**: yes\n");
            report.push_str(&format!(
                "- **Server version**: {}\n- **Deployment type**: {}\n- **Auth scheme**: {}\n",
                info["version"].as_str().unwrap_or("unknown"),
                info["deployment_type"].as_str().unwrap_or("unknown"),
                info["auth_scheme"].as_str().unwrap_or("unknown"),
            ));
        }
        Err(e) => {
            report.push_str("- **Reachable**: no\n");
            report.push_str(&format!("- **Error**: {}\n", e));
            report.push_str(
                "\nCheck that PIPEFORGE_URL points at a running server and that the \
                 machine can reach it.\n",
            );
            return report;
        }
    }

    report.push_str("\n## Authentication\n\n");
    match &user {
        Ok(user) => {
            report.push_str(&format!(
                "- **Authenticated as**: {}\n- **Active**: {}\n",
                user["name"].as_str().unwrap_or("?"),
                user["active"].as_bool().unwrap_or(false),
            ));
        }
        Err(e) => {
            report.push_str(&format!("- **Authentication failed**: {}\n", e));
            report.push_str("\nCheck PIPEFORGE_API_KEY.\n");
        }
    }

    report
}

// ─── Helpers ─────────────────────────────────────────────────────────

fn build_list_query(params: &ListFilterParams) -> Map<String, Value> {
    let mut query = Map::new();
    insert_str(&mut query, "name", &params.name);
    insert_str(&mut query, "sort_by", &params.sort_by);
    insert_str(&mut query, "created", &params.created);
    insert_str(&mut query, "updated", &params.updated);
    insert_num(&mut query, "page", params.page);
    insert_num(&mut query, "size", params.size);
    normalize_datetime_params(&mut query);
    query
}

fn build_runs_query(params: &ListRunsParams) -> Map<String, Value> {
    let mut query = Map::new();
    insert_str(&mut query, "name", &params.name);
    insert_str(&mut query, "pipeline", &params.pipeline);
    insert_str(&mut query, "stack", &params.stack);
    insert_str(&mut query, "status", &params.status);
    insert_str(&mut query, "start_time", &params.start_time);
    insert_str(&mut query, "end_time", &params.end_time);
    insert_str(&mut query, "created", &params.created);
    insert_str(&mut query, "updated", &params.updated);
    insert_str(&mut query, "sort_by", &params.sort_by);
    insert_num(&mut query, "page", params.page);
    insert_num(&mut query, "size", params.size);
    normalize_datetime_params(&mut query);
    query
}

fn build_steps_query(params: &ListStepsParams) -> Map<String, Value> {
    let mut query = Map::new();
    insert_str(&mut query, "pipeline_run_id", &params.pipeline_run_id);
    insert_str(&mut query, "status", &params.status);
    insert_str(&mut query, "start_time", &params.start_time);
    insert_str(&mut query, "end_time", &params.end_time);
    insert_num(&mut query, "page", params.page);
    insert_num(&mut query, "size", params.size);
    normalize_datetime_params(&mut query);
    query
}

fn insert_str(query: &mut Map<String, Value>, key: &str, value: &Option<String>) {
    if let Some(value) = value {
        query.insert(key.to_string(), json!(value));
    }
}

fn insert_num(query: &mut Map<String, Value>, key: &str, value: Option<i64>) {
    if let Some(value) = value {
        query.insert(key.to_string(), json!(value));
    }
}

const EASTER_EGG_TEXT: &str = "\
You found it.

         ____
        /    \\     pipeforge
       | fork |    ----------
        \\____/     every great pipeline
        /|  |\\     starts with a single step
       / |  | \\

Thanks for looking under the hood. May your runs be green and your
artifacts cached.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_query_normalizes_datetime_filters() {
        let params = ListFilterParams {
            created: Some("gte:2026-02-01".into()),
            size: Some(20),
            ..Default::default()
        };
        let query = build_list_query(&params);
        assert_eq!(query["created"], "gte:2026-02-01 00:00:00");
        assert_eq!(query["size"], 20);
        assert!(!query.contains_key("name"));
    }

    #[test]
    fn runs_query_normalizes_time_window() {
        let params = ListRunsParams {
            start_time: Some("range:2026-02-01..2026-02-07".into()),
            end_time: Some("lte:2026-02-07".into()),
            status: Some("failed".into()),
            ..Default::default()
        };
        let query = build_runs_query(&params);
        assert_eq!(
            query["start_time"],
            "in:2026-02-01 00:00:00,2026-02-07 23:59:59"
        );
        assert_eq!(query["end_time"], "lte:2026-02-07 23:59:59");
        // Non-datetime filters pass through untouched.
        assert_eq!(query["status"], "failed");
    }

    #[test]
    fn steps_query_carries_run_scope() {
        let params = ListStepsParams {
            pipeline_run_id: Some("run-123".into()),
            ..Default::default()
        };
        let query = build_steps_query(&params);
        assert_eq!(query["pipeline_run_id"], "run-123");
    }

    #[test]
    fn easter_egg_text_is_printable() {
        assert!(EASTER_EGG_TEXT.contains("pipeforge"));
        assert!(EASTER_EGG_TEXT.is_ascii());
    }

    #[tokio::test]
    async fn easter_egg_counts_as_a_tool_call() {
        use pipeforge_telemetry::{TelemetryClient, TelemetryConfig};
        use std::sync::Arc;

        let dir = tempfile::tempdir().unwrap();
        let mut config = TelemetryConfig::disabled();
        config.enabled = true;
        config.disabled_reason = None;
        config.dev_mode = true;
        config.state_dir = Some(dir.path().to_path_buf());
        let telemetry = Arc::new(TelemetryClient::new(config));

        let client = PlatformClient::new("http://192.0.2.1:1".into(), None);
        let server = PipeforgeMcpServer::new(client, Arc::clone(&telemetry));

        let result = server.easter_egg(Parameters(NoParams {})).await.unwrap();
        assert_eq!(result.is_error, Some(false));
        assert_eq!(result.content[0].as_text().unwrap().text, EASTER_EGG_TEXT);
        assert_eq!(telemetry.session().snapshot().total_tool_calls, 1);
    }
}
