//! Anonymous usage analytics for the Pipeforge MCP server.
//!
//! Everything here is best-effort and non-blocking by design: no path in
//! this crate may ever panic into a tool call, block it on network I/O, or
//! change its result. Events are enqueued onto a bounded in-memory queue
//! and delivered by a single background thread; a full queue drops events
//! rather than waiting. The shutdown coordinator drains the queue once,
//! with a bounded time budget, whichever exit path fires first.
//!
//! ```no_run
//! use pipeforge_telemetry::{TelemetryClient, TelemetryConfig, ToolCallRecord};
//!
//! let telemetry = TelemetryClient::new(TelemetryConfig::from_env());
//! telemetry.track_server_started();
//! telemetry.track_tool_call(ToolCallRecord {
//!     tool_name: "list_pipelines",
//!     success: true,
//!     duration_ms: 42,
//!     error_category: None,
//!     http_status: None,
//!     size: Some(20),
//! });
//! telemetry.shutdown("exit");
//! ```

mod config;
mod event;
mod identity;
mod sender;
mod session;

pub use config::{is_ci_environment, TelemetryConfig};
pub use event::Event;
pub use session::{Session, SessionSnapshot};

use std::sync::Mutex;

use serde_json::{json, Map, Value};

use sender::Sender;
use session::lock_or_recover;

/// Shutdown progresses strictly `Running -> ShuttingDown -> Done`; only the
/// caller that wins the first transition performs any work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShutdownState {
    Running,
    ShuttingDown,
    Done,
}

/// Outcome of one tool invocation, as recorded by the tool-call wrapper.
#[derive(Debug, Clone, Copy)]
pub struct ToolCallRecord<'a> {
    pub tool_name: &'a str,
    pub success: bool,
    pub duration_ms: u64,
    /// Stable error category when the call failed (e.g. `"UpstreamError"`).
    pub error_category: Option<&'a str>,
    pub http_status: Option<u16>,
    /// Requested page size for list tools, already clamped by the caller.
    pub size: Option<u32>,
}

/// Handle to the telemetry pipeline; construct once, share by `Arc`.
pub struct TelemetryClient {
    config: TelemetryConfig,
    user_id: String,
    session: Session,
    sender: Sender,
    shutdown_state: Mutex<ShutdownState>,
}

impl TelemetryClient {
    /// Build the client, resolve the anonymous identity, and emit the
    /// identify event when the machine traits changed since the last
    /// session. Logs one status line so users can see telemetry state.
    pub fn new(config: TelemetryConfig) -> Self {
        let user_id = if config.enabled {
            identity::resolve_user_id(&config)
        } else {
            String::new()
        };

        let client = TelemetryClient {
            sender: Sender::new(
                config.endpoint.clone(),
                config.request_timeout,
                config.queue_capacity,
            ),
            user_id,
            session: Session::new(),
            shutdown_state: Mutex::new(ShutdownState::Running),
            config,
        };

        if !client.config.enabled {
            let reason = client
                .config
                .disabled_reason
                .as_deref()
                .unwrap_or("disabled");
            tracing::info!("Analytics: disabled ({})", reason);
            return client;
        }

        if client.config.dev_mode {
            tracing::info!("Analytics: dev mode (events logged, not sent)");
        } else {
            tracing::info!("Analytics: enabled");
        }

        let traits = client.current_traits();
        if identity::should_identify(&client.config, &traits) {
            client.dispatch(vec![Event::Identify {
                user_id: client.user_id.clone(),
                traits,
                debug: client.config.debug,
            }]);
        }

        client
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn dev_mode(&self) -> bool {
        self.config.dev_mode
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Capture the MCP client's identity once per session (first-write-wins).
    pub fn set_client_info_once(&self, name: Option<&str>, version: Option<&str>) {
        self.session.set_client_info_once(name, version);
    }

    /// Attach session-scoped properties merged into every later event.
    pub fn set_session_properties(&self, properties: Map<String, Value>) {
        self.session.set_properties(properties);
    }

    /// Record a named event. Never raises, never blocks on the network.
    pub fn track_event(&self, event_name: &str, properties: Map<String, Value>) {
        if !self.config.enabled {
            return;
        }
        let event = self.build_track(event_name, properties);
        self.dispatch(vec![event]);
    }

    /// Record one tool call and update the session counters.
    pub fn track_tool_call(&self, record: ToolCallRecord<'_>) {
        if !self.config.enabled {
            return;
        }
        self.session.record_call(record.tool_name);

        let mut properties = Map::new();
        properties.insert("tool_name".into(), json!(record.tool_name));
        properties.insert("success".into(), json!(record.success));
        properties.insert("duration_ms".into(), json!(record.duration_ms));
        if let Some(category) = record.error_category {
            properties.insert("error_type".into(), json!(category));
        }
        if let Some(status) = record.http_status {
            properties.insert("http_status_code".into(), json!(status));
        }
        if let Some(size) = record.size {
            properties.insert("size".into(), json!(size));
        }
        let (client_name, client_version) = self.session.client_info();
        if let Some(name) = client_name {
            properties.insert("mcp_client_name".into(), json!(name));
        }
        if let Some(version) = client_version {
            properties.insert("mcp_client_version".into(), json!(version));
        }

        self.track_event("Tool Called", properties);
    }

    /// Record server startup with environment information.
    pub fn track_server_started(&self) {
        let mut properties = Map::new();
        for (key, value) in self.current_traits() {
            properties.insert(key, value);
        }
        self.track_event("MCP Server Started", properties);
    }

    /// Run the shutdown sequence exactly once.
    ///
    /// Returns true for the one caller that performed the shutdown; any
    /// concurrent or later call returns false immediately. The sequence:
    /// build the final summary event, stop and join the sender thread
    /// within the flush budget, drain whatever is still queued, and send
    /// drained + summary synchronously in a single request, bypassing the
    /// queue so abrupt termination still has a delivery chance.
    pub fn shutdown(&self, reason: &str) -> bool {
        {
            let mut state = lock_or_recover(&self.shutdown_state);
            if *state != ShutdownState::Running {
                return false;
            }
            *state = ShutdownState::ShuttingDown;
        }

        if self.config.enabled {
            self.flush_on_shutdown(reason);
        }

        *lock_or_recover(&self.shutdown_state) = ShutdownState::Done;
        true
    }

    fn flush_on_shutdown(&self, reason: &str) {
        let snapshot = self.session.snapshot();
        let mut properties = Map::new();
        properties.insert("uptime_seconds".into(), json!(self.session.uptime_seconds()));
        properties.insert("total_tool_calls".into(), json!(snapshot.total_tool_calls));
        properties.insert(
            "unique_tools_used".into(),
            json!(snapshot.unique_tools_used),
        );
        properties.insert("shutdown_reason".into(), json!(reason));
        let final_event = self.build_track("MCP Server Shutdown", properties);

        // Stop the worker first; the queue is only drained once the worker
        // can no longer race us for batches.
        let worker_stopped = self.sender.stop_and_join(self.config.flush_timeout);

        let mut events = self.sender.drain();
        events.push(final_event);

        if self.config.dev_mode {
            for event in &events {
                tracing::info!(event = event.name(), "analytics (dev): final flush");
            }
            return;
        }

        if !worker_stopped {
            tracing::debug!("analytics worker did not stop within budget");
        }
        sender::send_sync(&self.config.endpoint, self.config.request_timeout, &events);
    }

    /// Common event enrichment: session id, CI marker, test-run marker,
    /// and session-scoped properties.
    fn build_track(&self, event_name: &str, mut properties: Map<String, Value>) -> Event {
        properties.insert("session_id".into(), json!(self.session.id().to_string()));
        properties.insert("is_ci".into(), json!(is_ci_environment()));
        if self.config.test_run && !properties.contains_key("test_run") {
            properties.insert("test_run".into(), json!(true));
        }
        for (key, value) in self.session.properties() {
            properties.entry(key).or_insert(value);
        }

        Event::Track {
            user_id: self.user_id.clone(),
            event: event_name.to_string(),
            properties,
            debug: self.config.debug,
        }
    }

    fn current_traits(&self) -> Map<String, Value> {
        let mut traits = Map::new();
        traits.insert("server_version".into(), json!(env!("CARGO_PKG_VERSION")));
        traits.insert("os".into(), json!(std::env::consts::OS));
        traits.insert(
            "is_container".into(),
            json!(identity::is_running_in_container()),
        );
        traits
    }

    fn dispatch(&self, events: Vec<Event>) {
        if self.config.dev_mode {
            for event in &events {
                tracing::info!(event = event.name(), "analytics (dev): event");
            }
            return;
        }
        self.sender.enqueue(events);
    }
}

/// Clamp a raw page-size argument to the range worth recording (1..=10000).
/// Out-of-range and negative values are discarded, not clamped to an edge.
pub fn clamp_size(value: i64) -> Option<u32> {
    if (1..=10_000).contains(&value) {
        Some(value as u32)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn dev_client() -> (TelemetryClient, tempfile::TempDir) {
        let mut config = TelemetryConfig::disabled();
        config.enabled = true;
        config.disabled_reason = None;
        config.dev_mode = true;
        // Dev mode never touches the network or the filesystem state dir,
        // but point it at a temp dir anyway to keep tests hermetic. The
        // caller holds the guard so the dir is cleaned up.
        let dir = tempfile::tempdir().unwrap();
        config.state_dir = Some(dir.path().to_path_buf());
        (TelemetryClient::new(config), dir)
    }

    #[test]
    fn disabled_client_records_nothing() {
        let client = TelemetryClient::new(TelemetryConfig::disabled());
        client.track_event("Tool Called", Map::new());
        client.track_tool_call(ToolCallRecord {
            tool_name: "list_pipelines",
            success: true,
            duration_ms: 1,
            error_category: None,
            http_status: None,
            size: None,
        });
        assert_eq!(client.session().snapshot().total_tool_calls, 0);
        assert!(client.shutdown("exit"));
    }

    #[test]
    fn tool_calls_update_session_counters() {
        let (client, _dir) = dev_client();
        for _ in 0..3 {
            client.track_tool_call(ToolCallRecord {
                tool_name: "list_pipelines",
                success: true,
                duration_ms: 5,
                error_category: None,
                http_status: None,
                size: Some(20),
            });
        }
        client.track_tool_call(ToolCallRecord {
            tool_name: "get_stack",
            success: false,
            duration_ms: 9,
            error_category: Some("UpstreamError"),
            http_status: Some(503),
            size: None,
        });

        let snapshot = client.session().snapshot();
        assert_eq!(snapshot.total_tool_calls, 4);
        assert_eq!(snapshot.unique_tools_used, 2);
    }

    #[test]
    fn shutdown_runs_exactly_once_under_concurrency() {
        let (client, _dir) = dev_client();
        let client = Arc::new(client);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let client = Arc::clone(&client);
            handles.push(std::thread::spawn(move || client.shutdown("signal")));
        }

        let performed: usize = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ran| *ran)
            .count();
        assert_eq!(performed, 1);

        // Later calls are also no-ops.
        assert!(!client.shutdown("exit"));
    }

    #[test]
    fn clamp_size_bounds() {
        assert_eq!(clamp_size(1), Some(1));
        assert_eq!(clamp_size(10_000), Some(10_000));
        assert_eq!(clamp_size(0), None);
        assert_eq!(clamp_size(-5), None);
        assert_eq!(clamp_size(10_001), None);
    }
}
