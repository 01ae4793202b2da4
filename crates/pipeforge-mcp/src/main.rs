//! Pipeforge MCP Server binary.
//!
//! Exposes a Pipeforge server to AI agents via the Model Context Protocol.
//! Supports stdio transport (for Claude Desktop, Cursor, etc.).

use std::sync::Arc;

use clap::Parser;
use rmcp::ServiceExt;
use serde_json::{json, Map};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pipeforge_mcp::{PipeforgeMcpServer, PlatformClient};
use pipeforge_telemetry::{TelemetryClient, TelemetryConfig};

#[derive(Parser, Debug)]
#[command(name = "pipeforge-mcp", about = "MCP server for the Pipeforge ML platform")]
struct Args {
    /// Pipeforge server URL
    #[arg(long, env = "PIPEFORGE_URL")]
    url: String,

    /// API key for server authentication
    #[arg(long, env = "PIPEFORGE_API_KEY")]
    api_key: Option<String>,

    /// Transport mode: "stdio"
    #[arg(long, default_value = "stdio", env = "PIPEFORGE_MCP_TRANSPORT")]
    transport: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logging goes to stderr (stdout reserved for MCP in stdio mode)
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pipeforge_mcp=info,pipeforge_telemetry=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    tracing::info!(
        url = %args.url,
        transport = %args.transport,
        "Starting Pipeforge MCP server"
    );

    let telemetry = Arc::new(TelemetryClient::new(TelemetryConfig::from_env()));

    // Abrupt termination flushes through the same exactly-once path as a
    // clean exit; whichever fires first wins.
    {
        let telemetry = Arc::clone(&telemetry);
        ctrlc::set_handler(move || {
            telemetry.shutdown("signal");
            std::process::exit(0);
        })?;
    }

    let mut session_properties = Map::new();
    session_properties.insert("transport".into(), json!(args.transport.clone()));
    telemetry.set_session_properties(session_properties);
    telemetry.track_server_started();

    let client = PlatformClient::new(args.url, args.api_key);
    let server = PipeforgeMcpServer::new(client, Arc::clone(&telemetry));

    match args.transport.as_str() {
        "stdio" => {
            let service = server
                .serve(rmcp::transport::stdio())
                .await
                .inspect_err(|e| {
                    tracing::error!("Failed to start MCP server: {}", e);
                })?;
            service.waiting().await?;
        }
        other => {
            telemetry.shutdown("exit");
            anyhow::bail!(
                "Unsupported transport: {}. Only 'stdio' is currently supported.",
                other
            );
        }
    }

    telemetry.shutdown("exit");
    Ok(())
}
