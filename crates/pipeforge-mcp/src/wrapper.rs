//! Uniform instrumentation for every tool call: timing, error
//! classification, and analytics, in one place, so individual tools stay
//! thin.

use std::sync::Arc;
use std::time::Instant;

use rmcp::model::{CallToolResult, Content};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use pipeforge_telemetry::{clamp_size, TelemetryClient, ToolCallRecord};

use crate::error::{classify, ToolError};

/// How a tool presents its successful payload to the client.
pub enum ToolOutput {
    /// Pretty-printed JSON.
    Structured,
    /// The payload's string value verbatim (logs, diagnostics text).
    Text,
}

/// A response body that is itself an error envelope: a mapping whose
/// `error` key holds `tool`, `message`, and `type` string fields. Some
/// operations report failure this way under `200 OK`; surface those as
/// failures, not data. All three fields are required so that entity
/// payloads which happen to carry an `error` object (failed-run metadata,
/// say) are not misreported as tool failures.
pub fn is_error_envelope(value: &Value) -> bool {
    let Some(err) = value.get("error").and_then(Value::as_object) else {
        return false;
    };
    ["tool", "message", "type"]
        .iter()
        .all(|field| err.get(*field).is_some_and(Value::is_string))
}

/// Run one tool call end to end: await the operation, time it, classify
/// failures, record the outcome, and shape the MCP result. Analytics is
/// recorded on every path, success or failure.
pub async fn run_tool<F>(
    telemetry: &Arc<TelemetryClient>,
    tool_name: &str,
    output: ToolOutput,
    size: Option<i64>,
    op: F,
) -> CallToolResult
where
    F: std::future::Future<Output = Result<Value, ToolError>>,
{
    let started = Instant::now();
    let result = op.await;
    let duration_ms = started.elapsed().as_millis() as u64;

    match result {
        Ok(value) if is_error_envelope(&value) => {
            let envelope = &value["error"];
            let err = ToolError::Upstream {
                type_name: envelope["type"].as_str().unwrap_or("UnknownError").to_string(),
                module: String::new(),
                message: envelope["message"].as_str().unwrap_or_default().to_string(),
                status: envelope
                    .get("http_status_code")
                    .and_then(Value::as_u64)
                    .map(|s| s as u16),
            };
            fail(telemetry, tool_name, &err, output, duration_ms, size)
        }
        Ok(value) => {
            debug!(tool = tool_name, duration_ms, "tool call succeeded");
            telemetry.track_tool_call(ToolCallRecord {
                tool_name,
                success: true,
                duration_ms,
                error_category: None,
                http_status: None,
                size: size.and_then(clamp_size),
            });
            let text = match output {
                ToolOutput::Structured => {
                    serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string())
                }
                ToolOutput::Text => match value {
                    Value::String(s) => s,
                    other => other.to_string(),
                },
            };
            CallToolResult::success(vec![Content::text(text)])
        }
        Err(err) => fail(telemetry, tool_name, &err, output, duration_ms, size),
    }
}

/// Shape a failure for the client: a plain classified message for text
/// tools, or an error envelope mirroring the upstream payload contract
/// for structured tools.
fn fail(
    telemetry: &Arc<TelemetryClient>,
    tool_name: &str,
    err: &ToolError,
    output: ToolOutput,
    duration_ms: u64,
    size: Option<i64>,
) -> CallToolResult {
    let classification = classify(tool_name, err, telemetry.dev_mode());
    warn!(
        tool = tool_name,
        category = classification.category.as_str(),
        duration_ms,
        "tool call failed: {err}"
    );
    telemetry.track_tool_call(ToolCallRecord {
        tool_name,
        success: false,
        duration_ms,
        error_category: Some(classification.category.as_str()),
        http_status: err.http_status(),
        size: size.and_then(clamp_size),
    });
    let body = match output {
        ToolOutput::Text => classification.message,
        ToolOutput::Structured => {
            let mut envelope = Map::new();
            envelope.insert("tool".into(), json!(tool_name));
            envelope.insert("message".into(), json!(classification.message));
            envelope.insert("type".into(), json!(classification.category.as_str()));
            if let Some(status) = err.http_status() {
                envelope.insert("http_status_code".into(), json!(status));
            }
            if !classification.details.is_empty() {
                envelope.insert("details".into(), Value::Object(classification.details));
            }
            let wrapped = json!({ "error": envelope });
            serde_json::to_string_pretty(&wrapped).unwrap_or_else(|_| wrapped.to_string())
        }
    };
    CallToolResult::error(vec![Content::text(body)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeforge_telemetry::TelemetryConfig;
    use serde_json::json;

    fn dev_telemetry() -> (Arc<TelemetryClient>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = TelemetryConfig::disabled();
        config.enabled = true;
        config.disabled_reason = None;
        config.dev_mode = true;
        config.state_dir = Some(dir.path().to_path_buf());
        (Arc::new(TelemetryClient::new(config)), dir)
    }

    #[test]
    fn error_envelope_shape() {
        assert!(is_error_envelope(&json!({
            "error": {"tool": "list_stacks", "message": "shard offline", "type": "RuntimeError"}
        })));
        // All three string fields are required.
        assert!(!is_error_envelope(&json!({
            "error": {"message": "boom", "type": "ValueError"}
        })));
        assert!(!is_error_envelope(&json!({
            "error": {"tool": "get_stack", "message": "no type"}
        })));
        // A flat string error is data, not an envelope.
        assert!(!is_error_envelope(&json!({"error": "x", "message": "y"})));
        assert!(!is_error_envelope(&json!({"items": [], "total": 0})));
        assert!(!is_error_envelope(&json!("error")));
    }

    #[tokio::test]
    async fn success_produces_pretty_json() {
        let (telemetry, _dir) = dev_telemetry();
        let result = run_tool(&telemetry, "get_stack", ToolOutput::Structured, None, async {
            Ok(json!({"name": "default"}))
        })
        .await;
        assert_eq!(result.is_error, Some(false));
        let text = result.content[0].as_text().unwrap().text.as_str();
        assert!(text.contains("\"name\": \"default\""));
        assert_eq!(telemetry.session().snapshot().total_tool_calls, 1);
    }

    #[tokio::test]
    async fn text_output_is_verbatim() {
        let (telemetry, _dir) = dev_telemetry();
        let result = run_tool(&telemetry, "get_step_logs", ToolOutput::Text, None, async {
            Ok(json!("line one\nline two"))
        })
        .await;
        assert_eq!(result.is_error, Some(false));
        let text = result.content[0].as_text().unwrap().text.as_str();
        assert_eq!(text, "line one\nline two");
    }

    #[tokio::test]
    async fn structured_failure_is_an_error_envelope() {
        let (telemetry, _dir) = dev_telemetry();
        let result = run_tool(&telemetry, "get_stack", ToolOutput::Structured, None, async {
            Err(ToolError::Api {
                status: Some(401),
                message: "nope".into(),
            })
        })
        .await;
        assert_eq!(result.is_error, Some(true));
        let text = result.content[0].as_text().unwrap().text.as_str();
        let body: Value = serde_json::from_str(text).unwrap();
        assert!(is_error_envelope(&body));
        assert_eq!(body["error"]["tool"], "get_stack");
        assert_eq!(body["error"]["type"], "AuthenticationError");
        assert_eq!(body["error"]["http_status_code"], 401);
        assert!(body["error"]["message"]
            .as_str()
            .unwrap()
            .contains("Authentication failed"));
    }

    #[tokio::test]
    async fn text_failure_stays_plain() {
        let (telemetry, _dir) = dev_telemetry();
        let result = run_tool(&telemetry, "get_step_logs", ToolOutput::Text, None, async {
            Err(ToolError::Api {
                status: Some(404),
                message: "gone".into(),
            })
        })
        .await;
        assert_eq!(result.is_error, Some(true));
        let text = result.content[0].as_text().unwrap().text.as_str();
        assert!(text.contains("artifact store"));
        assert!(serde_json::from_str::<Value>(text).is_err());
    }

    #[tokio::test]
    async fn error_envelope_is_treated_as_failure() {
        let (telemetry, _dir) = dev_telemetry();
        let result = run_tool(&telemetry, "list_stacks", ToolOutput::Structured, None, async {
            Ok(json!({
                "error": {"tool": "list_stacks", "message": "shard offline", "type": "RuntimeError"}
            }))
        })
        .await;
        assert_eq!(result.is_error, Some(true));
        // RuntimeError is on the safe allow-list, so the message surfaces.
        let text = result.content[0].as_text().unwrap().text.as_str();
        assert!(text.contains("shard offline"));
    }

    #[tokio::test]
    async fn partial_error_object_in_data_is_not_a_failure() {
        let (telemetry, _dir) = dev_telemetry();
        // Failed-run metadata legitimately carries an error object without
        // the tool field; it must come back as data.
        let result = run_tool(&telemetry, "get_run", ToolOutput::Structured, None, async {
            Ok(json!({
                "name": "run-7",
                "error": {"message": "OOM in step train", "type": "StepFailed"}
            }))
        })
        .await;
        assert_eq!(result.is_error, Some(false));
        let text = result.content[0].as_text().unwrap().text.as_str();
        assert!(text.contains("OOM in step train"));
    }
}
