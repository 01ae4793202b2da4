//! Environment-driven configuration for the telemetry pipeline.

use std::path::PathBuf;
use std::time::Duration;

/// Collector endpoint for batched events.
pub const ANALYTICS_ENDPOINT: &str = "https://analytics.pipeforge.io/batch";

/// Value of the `Source-Context` header on every collector request.
pub const SOURCE_CONTEXT: &str = "mcp-pipeforge";

/// Maximum number of pending batches before enqueue starts dropping.
pub const QUEUE_CAPACITY: usize = 100;

const DEFAULT_REQUEST_TIMEOUT_S: f64 = 2.0;
const DEFAULT_FLUSH_TIMEOUT_S: f64 = 1.0;

/// Standard CI environment variables, any of which marks the session as CI.
const CI_ENV_VARS: &[&str] = &[
    "CI",
    "GITHUB_ACTIONS",
    "GITLAB_CI",
    "CIRCLECI",
    "TRAVIS",
    "JENKINS_URL",
    "BUILDKITE",
    "AZURE_PIPELINES",
];

/// Telemetry configuration, resolved once at startup.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Whether any events are recorded at all.
    pub enabled: bool,
    /// Why telemetry is disabled, when it is (used for the startup status line).
    pub disabled_reason: Option<String>,
    /// Dev mode: events are logged to stderr instead of sent over the network.
    pub dev_mode: bool,
    /// Debug flag carried on every event (routes to the dev sink server-side).
    pub debug: bool,
    /// Mark emitted events as belonging to a test run.
    pub test_run: bool,
    /// Collector URL.
    pub endpoint: String,
    /// Per-request timeout for collector POSTs.
    pub request_timeout: Duration,
    /// Total wall-clock budget for the shutdown drain.
    pub flush_timeout: Duration,
    /// Queue capacity in batches.
    pub queue_capacity: usize,
    /// Explicit anonymous-ID override (must be a valid UUID to take effect).
    pub user_id_override: Option<String>,
    /// Configured Pipeforge server URL, used for the deterministic
    /// container fallback ID.
    pub server_url: Option<String>,
    /// Override for the persisted-state directory. `None` means the
    /// per-platform default config directory.
    pub state_dir: Option<PathBuf>,
}

impl TelemetryConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Self {
        let enabled_env = env_lower("PIPEFORGE_MCP_ANALYTICS_ENABLED");
        let disable_env = env_lower("PIPEFORGE_MCP_DISABLE_ANALYTICS");

        let disabled_reason = if is_truthy(&disable_env) {
            Some(format!("PIPEFORGE_MCP_DISABLE_ANALYTICS={}", disable_env))
        } else if !enabled_env.is_empty() && !is_truthy(&enabled_env) {
            Some(format!("PIPEFORGE_MCP_ANALYTICS_ENABLED={}", enabled_env))
        } else {
            None
        };

        let dev_mode = is_truthy(&env_lower("PIPEFORGE_MCP_ANALYTICS_DEV"));
        let debug = dev_mode || is_truthy(&env_lower("PIPEFORGE_MCP_ANALYTICS_DEBUG"));

        TelemetryConfig {
            enabled: disabled_reason.is_none(),
            disabled_reason,
            dev_mode,
            debug,
            test_run: is_truthy(&env_lower("PIPEFORGE_MCP_ANALYTICS_TEST_RUN")),
            endpoint: ANALYTICS_ENDPOINT.to_string(),
            request_timeout: env_secs(
                "PIPEFORGE_MCP_ANALYTICS_TIMEOUT_S",
                DEFAULT_REQUEST_TIMEOUT_S,
            ),
            flush_timeout: env_secs(
                "PIPEFORGE_MCP_ANALYTICS_FLUSH_TIMEOUT_S",
                DEFAULT_FLUSH_TIMEOUT_S,
            ),
            queue_capacity: QUEUE_CAPACITY,
            user_id_override: std::env::var("PIPEFORGE_MCP_ANALYTICS_ID")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            server_url: std::env::var("PIPEFORGE_URL")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            state_dir: None,
        }
    }

    /// A disabled configuration, convenient for tests and opt-out paths.
    pub fn disabled() -> Self {
        TelemetryConfig {
            enabled: false,
            disabled_reason: Some("disabled".into()),
            dev_mode: false,
            debug: false,
            test_run: false,
            endpoint: ANALYTICS_ENDPOINT.to_string(),
            request_timeout: Duration::from_secs_f64(DEFAULT_REQUEST_TIMEOUT_S),
            flush_timeout: Duration::from_secs_f64(DEFAULT_FLUSH_TIMEOUT_S),
            queue_capacity: QUEUE_CAPACITY,
            user_id_override: None,
            server_url: None,
            state_dir: None,
        }
    }
}

/// True when any standard CI environment variable is set and non-empty.
pub fn is_ci_environment() -> bool {
    CI_ENV_VARS
        .iter()
        .any(|var| std::env::var(var).map(|v| !v.is_empty()).unwrap_or(false))
}

fn env_lower(name: &str) -> String {
    std::env::var(name).unwrap_or_default().to_lowercase()
}

fn is_truthy(value: &str) -> bool {
    matches!(value, "true" | "1" | "yes")
}

fn env_secs(name: &str, default: f64) -> Duration {
    let secs = std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|v| v.is_finite() && *v > 0.0)
        .unwrap_or(default);
    Duration::from_secs_f64(secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthy_values() {
        assert!(is_truthy("true"));
        assert!(is_truthy("1"));
        assert!(is_truthy("yes"));
        assert!(!is_truthy("false"));
        assert!(!is_truthy(""));
        assert!(!is_truthy("on"));
    }

    #[test]
    fn disabled_config_is_disabled() {
        let config = TelemetryConfig::disabled();
        assert!(!config.enabled);
        assert!(config.disabled_reason.is_some());
    }

    #[test]
    fn default_timeouts_are_bounded() {
        let config = TelemetryConfig::disabled();
        assert!(config.request_timeout <= Duration::from_secs(10));
        assert!(config.flush_timeout <= Duration::from_secs(10));
    }
}
