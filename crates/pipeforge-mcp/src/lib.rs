//! Pipeforge MCP Server
//!
//! Exposes a Pipeforge server to AI agents via the Model Context Protocol.
//! Provides tools for browsing pipelines, runs, steps, artifacts, stacks,
//! models, and deployments, retrieving logs, and triggering pipelines via
//! run templates. Datetime filter arguments are normalized before they hit
//! the API, and failures are classified into stable categories with
//! actionable messages.

pub mod client;
pub mod error;
pub mod filters;
pub mod prompts;
pub mod resources;
pub mod server;
pub mod tools;
pub mod wrapper;

pub use client::PlatformClient;
pub use server::PipeforgeMcpServer;
