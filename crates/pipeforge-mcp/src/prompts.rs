//! MCP prompt implementations for Pipeforge.

use rmcp::model::{GetPromptResult, Prompt, PromptArgument, PromptMessage, PromptMessageRole};

/// List all available prompts.
pub fn list_prompts() -> Vec<Prompt> {
    vec![
        Prompt::new(
            "debug_failed_run",
            Some(
                "Walk through a failed pipeline run step by step and identify the root cause.",
            ),
            Some(vec![
                PromptArgument {
                    name: "run".into(),
                    title: None,
                    description: Some("Name or ID of the failed pipeline run".into()),
                    required: Some(true),
                },
                PromptArgument {
                    name: "context".into(),
                    title: None,
                    description: Some(
                        "Anything already known about the failure (optional)".into(),
                    ),
                    required: Some(false),
                },
            ]),
        ),
        Prompt::new(
            "summarize_activity",
            Some("Summarize recent pipeline activity on the Pipeforge server."),
            Some(vec![
                PromptArgument {
                    name: "days".into(),
                    title: None,
                    description: Some("How many days back to look. Default: 7".into()),
                    required: Some(false),
                },
                PromptArgument {
                    name: "pipeline".into(),
                    title: None,
                    description: Some("Restrict to one pipeline, by name or ID (optional)".into()),
                    required: Some(false),
                },
            ]),
        ),
    ]
}

/// Get a prompt by name with arguments filled in.
pub fn get_prompt(
    name: &str,
    args: &serde_json::Map<String, serde_json::Value>,
) -> Result<GetPromptResult, String> {
    match name {
        "debug_failed_run" => Ok(build_debug_failed_run(args)),
        "summarize_activity" => Ok(build_summarize_activity(args)),
        _ => Err(format!("Unknown prompt: {}", name)),
    }
}

fn get_str(args: &serde_json::Map<String, serde_json::Value>, key: &str) -> Option<String> {
    args.get(key).and_then(|v| v.as_str()).map(String::from)
}

fn build_debug_failed_run(args: &serde_json::Map<String, serde_json::Value>) -> GetPromptResult {
    let run = get_str(args, "run").unwrap_or_default();
    let context = get_str(args, "context").unwrap_or_else(|| "(none provided)".into());

    let content = format!(
        r#"You are debugging a failed pipeline run on a Pipeforge server.

**Run**: {run}
**Known context**: {context}

Follow these steps to diagnose the failure:

1. **Fetch the run** — Call `get_pipeline_run` with name_or_id="{run}" to see its status, stack, and configuration.
2. **Find the failed steps** — Call `list_run_steps` with pipeline_run_id set to the run's ID and status="failed".
3. **Read the logs** — For each failed step, call `get_step_logs` with its step_id. If logs are unavailable, note that local artifact stores do not persist logs.
4. **Check the stack** — Call `get_stack` for the run's stack to rule out infrastructure misconfiguration.
5. **Compare with history** — Call `list_pipeline_runs` filtered to the same pipeline to see whether earlier runs succeeded and what changed.

After gathering data, provide:
- **Root cause** — The most likely explanation for the failure
- **Evidence** — Specific log lines or status fields that support it
- **Fix** — Concrete steps to make the next run succeed"#
    );

    GetPromptResult {
        description: Some("Step-by-step failed-run debugging workflow".into()),
        messages: vec![PromptMessage::new_text(PromptMessageRole::User, content)],
    }
}

fn build_summarize_activity(args: &serde_json::Map<String, serde_json::Value>) -> GetPromptResult {
    let days = get_str(args, "days").unwrap_or_else(|| "7".into());
    let pipeline = get_str(args, "pipeline").unwrap_or_else(|| "(all pipelines)".into());

    let content = format!(
        r#"You are summarizing recent activity on a Pipeforge server.

**Window**: last {days} days
**Scope**: {pipeline}

Gather the data:

1. Call `list_pipeline_runs` with created="gte:<date {days} days ago>" (bare dates are fine, they are normalized automatically), sorted by `desc:created`. Add pipeline="{pipeline}" if a single pipeline is in scope.
2. Call `list_pipelines` to map run counts to pipeline names.
3. For any failed runs, call `list_run_steps` with status="failed" to name the failing steps.

Then report:
- **Volume** — Runs per pipeline, success/failure/cached breakdown
- **Failures** — Which pipelines failed, at which steps, and how often
- **Trends** — Anything notable compared with the start of the window
- **Suggested follow-ups** — Runs worth debugging with the `debug_failed_run` prompt"#
    );

    GetPromptResult {
        description: Some("Recent-activity summary workflow".into()),
        messages: vec![PromptMessage::new_text(PromptMessageRole::User, content)],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};

    #[test]
    fn all_listed_prompts_are_gettable() {
        for prompt in list_prompts() {
            let result = get_prompt(&prompt.name, &Map::new());
            assert!(result.is_ok(), "prompt {} not gettable", prompt.name);
        }
    }

    #[test]
    fn unknown_prompt_is_an_error() {
        assert!(get_prompt("nope", &Map::new()).is_err());
    }

    #[test]
    fn arguments_are_substituted() {
        let mut args = Map::new();
        args.insert("run".into(), json!("feature-eng-42"));
        let result = get_prompt("debug_failed_run", &args).unwrap();
        let text = match &result.messages[0].content {
            rmcp::model::PromptMessageContent::Text { text } => text.as_str(),
            other => panic!("unexpected content: {other:?}"),
        };
        assert!(text.contains("feature-eng-42"));
    }
}
