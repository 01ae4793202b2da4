//! MCP server implementation for Pipeforge.

use std::sync::Arc;

use rmcp::handler::server::tool::ToolRouter;
use rmcp::model::*;
use rmcp::service::RequestContext;
use rmcp::{tool_handler, ErrorData as McpError, RoleServer, ServerHandler};

use pipeforge_telemetry::TelemetryClient;

use crate::client::PlatformClient;
use crate::prompts;
use crate::resources;

/// The Pipeforge MCP server.
#[derive(Clone)]
pub struct PipeforgeMcpServer {
    pub(crate) client: PlatformClient,
    pub(crate) telemetry: Arc<TelemetryClient>,
    pub(crate) tool_router: ToolRouter<Self>,
}

impl PipeforgeMcpServer {
    pub fn new(client: PlatformClient, telemetry: Arc<TelemetryClient>) -> Self {
        Self {
            client,
            telemetry,
            tool_router: Self::create_tool_router(),
        }
    }
}

#[tool_handler]
impl ServerHandler for PipeforgeMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Pipeforge MCP server. Provides read access to pipelines, runs, steps, \
                 artifacts, stacks, models, deployments, schedules, and services on a \
                 Pipeforge server, plus pipeline triggering via run templates. List tools \
                 accept filter expressions like `contains:train` and datetime filters like \
                 `gte:2026-02-01` (see the filter-reference resource)."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_resources()
                .enable_prompts()
                .build(),
            server_info: Implementation {
                name: "pipeforge-mcp".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Capture the connecting client's identity for session analytics.
    /// First writer wins; a reconnect never relabels the session.
    async fn initialize(
        &self,
        request: InitializeRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> Result<InitializeResult, McpError> {
        let info = &request.client_info;
        self.telemetry
            .set_client_info_once(Some(&info.name), Some(&info.version));
        Ok(self.get_info())
    }

    // ─── Resources ───────────────────────────────────────────────────

    async fn list_resources(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListResourcesResult, McpError> {
        Ok(ListResourcesResult {
            resources: resources::list_resources(),
            next_cursor: None,
            ..Default::default()
        })
    }

    async fn read_resource(
        &self,
        request: ReadResourceRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> Result<ReadResourceResult, McpError> {
        resources::read_resource(&request.uri, &self.client)
            .await
            .map_err(|e| McpError::internal_error(e, None))
    }

    // ─── Prompts ─────────────────────────────────────────────────────

    async fn list_prompts(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListPromptsResult, McpError> {
        Ok(ListPromptsResult {
            prompts: prompts::list_prompts(),
            next_cursor: None,
            ..Default::default()
        })
    }

    async fn get_prompt(
        &self,
        request: GetPromptRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> Result<GetPromptResult, McpError> {
        let args = request.arguments.unwrap_or_default();
        prompts::get_prompt(&request.name, &args).map_err(|e| McpError::invalid_params(e, None))
    }
}
