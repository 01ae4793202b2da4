//! MCP resource implementations for Pipeforge.

use rmcp::model::{RawResource, ReadResourceResult, Resource, ResourceContents};
use serde_json::Value;

use crate::client::PlatformClient;

/// Embedded filter-syntax reference (static resource).
pub const FILTER_REFERENCE: &str = include_str!("filter_reference.md");

/// URI for the filter-syntax reference resource.
pub const FILTER_REFERENCE_URI: &str = "pipeforge://docs/filter-reference";
/// URI for the live server-status resource.
pub const SERVER_STATUS_URI: &str = "pipeforge://server/status";

fn resource(uri: &str, name: &str, description: &str, mime: &str) -> Resource {
    let mut raw = RawResource::new(uri, name);
    raw.description = Some(description.into());
    raw.mime_type = Some(mime.into());
    Resource::new(raw, None)
}

/// List all available resources.
pub fn list_resources() -> Vec<Resource> {
    vec![
        resource(
            FILTER_REFERENCE_URI,
            "Filter Syntax Reference",
            "How to write filter expressions for list tools: operators, datetime formats, ranges",
            "text/markdown",
        ),
        resource(
            SERVER_STATUS_URI,
            "Server Status",
            "Live Pipeforge server information: version, deployment type, active user",
            "application/json",
        ),
    ]
}

/// Read a resource by URI.
pub async fn read_resource(
    uri: &str,
    client: &PlatformClient,
) -> Result<ReadResourceResult, String> {
    match uri {
        FILTER_REFERENCE_URI => Ok(ReadResourceResult {
            contents: vec![ResourceContents::text(FILTER_REFERENCE, FILTER_REFERENCE_URI)],
        }),
        SERVER_STATUS_URI => read_server_status(client).await,
        _ => Err(format!("Unknown resource URI: {}", uri)),
    }
}

async fn read_server_status(client: &PlatformClient) -> Result<ReadResourceResult, String> {
    let info = client
        .server_info()
        .await
        .map_err(|e| format!("Failed to fetch server info: {}", e))?;
    let user = client.current_user().await.unwrap_or(Value::Null);

    let merged = serde_json::json!({
        "server": info,
        "current_user": user,
    });

    let text = serde_json::to_string_pretty(&merged).unwrap_or_default();
    Ok(ReadResourceResult {
        contents: vec![ResourceContents::text(text, SERVER_STATUS_URI)],
    })
}
