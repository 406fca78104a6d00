//! Process and Bash tools: run, track, and stop commands built on one
//! configured executable.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::output::{summarize_output, truncate_with_meta};
use super::spec::{
    ToolCapability, ToolContext, ToolError, ToolResult, ToolSpec, optional_bool, optional_i64,
    optional_str, optional_str_list, required_str, required_u32,
};
use crate::process::{
    CommandSpec, Deadline, ForegroundRunner, ProcessError, RunResult, parse_env,
    split_command_line,
};

const DEFAULT_BASH: &str = "bash";

/// How `command_arguments` reaches the executable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessToolKind {
    /// Split with shell-word rules and appended after the fixed args.
    #[default]
    Process,
    /// Handed unsplit to `<command> <args...> -c`.
    Bash,
}

/// `[tools.<name>]` section of the toolbelt config.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProcessToolConfig {
    #[serde(default)]
    pub kind: ProcessToolKind,
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    /// Seconds; same encoding as the per-call `timeout` argument.
    pub default_timeout: Option<i64>,
    pub description: Option<String>,
}

/// A tool wrapping one executable.
///
/// Foreground runs block until completion or deadline; background runs are
/// tracked in the context's process registry and polled with `status`.
#[derive(Debug, Clone)]
pub struct ProcessTool {
    name: String,
    description: String,
    kind: ProcessToolKind,
    program: String,
    base_args: Vec<String>,
    working_dir: PathBuf,
    default_timeout: i64,
    runner: ForegroundRunner,
}

impl ProcessTool {
    /// Build a tool from its config section.
    ///
    /// Fails without spawning anything when the executable or working
    /// directory is unusable.
    pub fn from_config(
        name: &str,
        config: &ProcessToolConfig,
        workspace: &Path,
    ) -> Result<Self, ToolError> {
        if name.trim().is_empty() {
            return Err(ToolError::not_available("Tool name must not be empty"));
        }

        let configured = config
            .command
            .as_deref()
            .map(str::trim)
            .filter(|command| !command.is_empty());
        let program = match (config.kind, configured) {
            (_, Some(command)) => command.to_string(),
            (ProcessToolKind::Bash, None) => DEFAULT_BASH.to_string(),
            (ProcessToolKind::Process, None) => {
                return Err(ToolError::not_available(format!(
                    "Tool '{name}' has no command configured"
                )));
            }
        };

        let working_dir = match &config.working_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => workspace.join(dir),
            None => workspace.to_path_buf(),
        };
        if !working_dir.is_dir() {
            return Err(ToolError::not_available(format!(
                "Tool '{name}' working directory does not exist: {}",
                working_dir.display()
            )));
        }

        let description = config.description.clone().unwrap_or_else(|| match config.kind {
            ProcessToolKind::Process => format!(
                "Run `{program}` with extra arguments, in the foreground or background. \
                 Actions: run, status, kill, list."
            ),
            ProcessToolKind::Bash => format!(
                "Run a script with `{program} -c`, in the foreground or background. \
                 Actions: run, status, kill, list."
            ),
        });

        Ok(Self {
            name: name.to_string(),
            description,
            kind: config.kind,
            program,
            base_args: config.args.clone(),
            working_dir,
            default_timeout: config.default_timeout.unwrap_or(0),
            runner: ForegroundRunner::new(),
        })
    }

    pub fn kind(&self) -> ProcessToolKind {
        self.kind
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Build the invocation for a `run` call; no process is touched here.
    fn command_spec(&self, input: &Value) -> Result<CommandSpec, ToolError> {
        let line = match input.get("command_arguments") {
            None | Some(Value::Null) => "",
            Some(Value::String(line)) => line.as_str(),
            Some(_) => {
                return Err(ToolError::invalid_input(
                    "Field 'command_arguments' must be a string",
                ));
            }
        };
        let env = parse_env(&optional_str_list(input, "env")?).map_err(process_error)?;
        let working_dir = self.resolve_working_dir(optional_str(input, "working_dir"))?;

        let spec = CommandSpec::new(&self.program, working_dir).args(self.base_args.iter().cloned());
        let spec = match self.kind {
            ProcessToolKind::Process => spec.args(split_command_line(line).map_err(process_error)?),
            ProcessToolKind::Bash => {
                if line.trim().is_empty() {
                    return Err(ToolError::missing_field("command_arguments"));
                }
                spec.arg("-c").arg(line)
            }
        };
        Ok(spec.envs(env))
    }

    fn resolve_working_dir(&self, requested: Option<&str>) -> Result<PathBuf, ToolError> {
        let Some(requested) = requested else {
            return Ok(self.working_dir.clone());
        };
        let path = Path::new(requested);
        let resolved = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.working_dir.join(path)
        };
        if !resolved.is_dir() {
            return Err(ToolError::invalid_input(format!(
                "working_dir does not exist: {}",
                resolved.display()
            )));
        }
        Ok(resolved)
    }

    async fn run(&self, input: &Value, context: &ToolContext) -> Result<ToolResult, ToolError> {
        let spec = self.command_spec(input)?;
        let background = optional_bool(input, "background", false);
        let timeout = optional_i64(input, "timeout", self.default_timeout)?;
        let command = spec.display();

        let result = if background {
            context.processes.spawn(&spec).map_err(process_error)?
        } else {
            self.runner.run(&spec, Deadline::from_seconds(timeout)).await
        };
        render_run_result(result, Some(&command))
    }
}

#[async_trait]
impl ToolSpec for ProcessTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn input_schema(&self) -> Value {
        let command_arguments = match self.kind {
            ProcessToolKind::Process => {
                "Arguments appended to the command, split like a shell would (quotes and backslash escapes respected)"
            }
            ProcessToolKind::Bash => "Script passed verbatim to the shell",
        };
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["run", "status", "kill", "list"],
                    "description": "run: start the command; status/kill: act on a background pid; list: tracked processes"
                },
                "command_arguments": {
                    "type": "string",
                    "description": command_arguments
                },
                "background": {
                    "type": "boolean",
                    "description": "Return immediately with a pid instead of waiting (default: false)"
                },
                "timeout": {
                    "type": "integer",
                    "description": "Foreground deadline in seconds; 0 uses 30, -1 waits indefinitely"
                },
                "env": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "KEY=VALUE pairs added to the inherited environment"
                },
                "working_dir": {
                    "type": "string",
                    "description": "Directory to run in, relative to the tool's working directory"
                },
                "pid": {
                    "type": "integer",
                    "description": "Process id for status and kill"
                }
            },
            "required": ["action"]
        })
    }

    fn capabilities(&self) -> Vec<ToolCapability> {
        vec![ToolCapability::ExecutesCode]
    }

    async fn execute(&self, input: Value, context: &ToolContext) -> Result<ToolResult, ToolError> {
        match required_str(&input, "action")? {
            "run" => self.run(&input, context).await,
            "status" => {
                let pid = required_u32(&input, "pid")?;
                let result = context.processes.status(pid).await.map_err(process_error)?;
                render_run_result(result, None)
            }
            "kill" => {
                let pid = required_u32(&input, "pid")?;
                let result = context.processes.kill(pid).await.map_err(process_error)?;
                render_run_result(result, None)
            }
            "list" => {
                let processes = context.processes.list().map_err(process_error)?;
                let count = processes.len();
                ToolResult::json(&json!({ "processes": processes }))
                    .map(|result| result.with_metadata(json!({ "count": count })))
                    .map_err(|e| ToolError::execution_failed(e.to_string()))
            }
            other => Err(ToolError::invalid_input(format!(
                "Unknown action '{other}' (expected run, status, kill or list)"
            ))),
        }
    }
}

fn process_error(err: ProcessError) -> ToolError {
    match &err {
        ProcessError::InvalidCommandLine(_) | ProcessError::InvalidEnv(_) => {
            ToolError::invalid_input(err.to_string())
        }
        ProcessError::Signal { source, .. } if source.kind() == io::ErrorKind::PermissionDenied => {
            ToolError::PermissionDenied {
                message: err.to_string(),
            }
        }
        _ => ToolError::execution_failed(err.to_string()),
    }
}

/// JSON content with truncated streams; lengths and summaries go to metadata.
fn render_run_result(mut result: RunResult, command: Option<&str>) -> Result<ToolResult, ToolError> {
    let (stdout, stdout_meta) = truncate_with_meta(&result.stdout);
    let (stderr, stderr_meta) = truncate_with_meta(&result.stderr);
    result.stdout = stdout;
    result.stderr = stderr;

    let stdout_summary = summarize_output(&result.stdout);
    let stderr_summary = summarize_output(&result.stderr);
    let summary = if stderr_summary.is_empty() {
        stdout_summary.clone()
    } else {
        stderr_summary.clone()
    };

    let metadata = json!({
        "status": result.status,
        "pid": result.pid,
        "exit_code": result.exit_code,
        "duration_ms": result.duration_ms,
        "command": command,
        "stdout_len": stdout_meta.original_len,
        "stderr_len": stderr_meta.original_len,
        "stdout_truncated": stdout_meta.truncated,
        "stderr_truncated": stderr_meta.truncated,
        "stdout_omitted": stdout_meta.omitted,
        "stderr_omitted": stderr_meta.omitted,
        "summary": summary,
        "stdout_summary": stdout_summary,
        "stderr_summary": stderr_summary,
    });

    let success = result.is_success();
    ToolResult::json(&result)
        .map(|tool_result| tool_result.with_success(success).with_metadata(metadata))
        .map_err(|e| ToolError::execution_failed(e.to_string()))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn tool(kind: ProcessToolKind, command: &str, args: &[&str], workspace: &Path) -> ProcessTool {
        let config = ProcessToolConfig {
            kind,
            command: Some(command.to_string()),
            args: args.iter().map(|arg| (*arg).to_string()).collect(),
            ..ProcessToolConfig::default()
        };
        ProcessTool::from_config("test_tool", &config, workspace).expect("tool config")
    }

    fn shell(workspace: &Path) -> ProcessTool {
        tool(ProcessToolKind::Bash, "sh", &[], workspace)
    }

    fn content(result: &ToolResult) -> Value {
        serde_json::from_str(&result.content).expect("json content")
    }

    #[test]
    fn construction_validates_config() {
        let tmp = tempdir().expect("tempdir");

        let missing = ProcessToolConfig::default();
        assert!(matches!(
            ProcessTool::from_config("git", &missing, tmp.path()),
            Err(ToolError::NotAvailable { .. })
        ));

        let blank = ProcessToolConfig {
            command: Some("  ".to_string()),
            ..ProcessToolConfig::default()
        };
        assert!(ProcessTool::from_config("git", &blank, tmp.path()).is_err());

        let bad_dir = ProcessToolConfig {
            command: Some("git".to_string()),
            working_dir: Some(PathBuf::from("nope")),
            ..ProcessToolConfig::default()
        };
        let err = ProcessTool::from_config("git", &bad_dir, tmp.path()).unwrap_err();
        assert!(err.to_string().contains("does not exist"));

        let bash = ProcessToolConfig {
            kind: ProcessToolKind::Bash,
            ..ProcessToolConfig::default()
        };
        let bash = ProcessTool::from_config("sh", &bash, tmp.path()).unwrap();
        assert_eq!(bash.program, "bash");
        assert_eq!(bash.kind(), ProcessToolKind::Bash);
    }

    #[tokio::test]
    async fn run_splits_arguments_after_fixed_args() {
        let tmp = tempdir().expect("tempdir");
        let printf = tool(ProcessToolKind::Process, "printf", &["[%s]"], tmp.path());
        let context = ToolContext::new(tmp.path());

        let result = printf
            .execute(
                json!({"action": "run", "command_arguments": r#"a "b c" '' d\ e"#}),
                &context,
            )
            .await
            .unwrap();

        assert!(result.success);
        let body = content(&result);
        assert_eq!(body["status"], "completed");
        assert_eq!(body["stdout"], "[a][b c][][d e]");
        assert_eq!(body["exit_code"], 0);
        assert!(body.get("pid").is_none());
    }

    #[tokio::test]
    async fn quoted_argument_reaches_the_command_whole() {
        let tmp = tempdir().expect("tempdir");
        let printf = tool(ProcessToolKind::Process, "printf", &["[%s]"], tmp.path());
        let context = ToolContext::new(tmp.path());

        let result = printf
            .execute(json!({"action": "run", "command_arguments": r#""a b" c"#}), &context)
            .await
            .unwrap();

        assert_eq!(content(&result)["stdout"], "[a b][c]");
    }

    #[tokio::test]
    async fn bash_kind_passes_script_unsplit() {
        let tmp = tempdir().expect("tempdir");
        let context = ToolContext::new(tmp.path());
        let result = shell(tmp.path())
            .execute(
                json!({"action": "run", "command_arguments": "echo $((1 + 2)) | tr 3 x"}),
                &context,
            )
            .await
            .unwrap();

        assert_eq!(content(&result)["stdout"], "x\n");
    }

    #[tokio::test]
    async fn bash_kind_requires_a_script() {
        let tmp = tempdir().expect("tempdir");
        let context = ToolContext::new(tmp.path());
        let err = shell(tmp.path())
            .execute(json!({"action": "run"}), &context)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::MissingField { .. }));
    }

    #[tokio::test]
    async fn failing_command_is_reported_not_raised() {
        let tmp = tempdir().expect("tempdir");
        let context = ToolContext::new(tmp.path());
        let result = shell(tmp.path())
            .execute(
                json!({"action": "run", "command_arguments": "echo nope >&2; exit 4"}),
                &context,
            )
            .await
            .unwrap();

        assert!(!result.success);
        let body = content(&result);
        assert_eq!(body["status"], "failed");
        assert_eq!(body["exit_code"], 4);
        let metadata = result.metadata.expect("metadata");
        assert_eq!(metadata["summary"], "nope");
    }

    #[tokio::test]
    async fn missing_executable_is_a_failed_status() {
        let tmp = tempdir().expect("tempdir");
        let context = ToolContext::new(tmp.path());
        let ghost = tool(ProcessToolKind::Process, "no-such-binary-9137", &[], tmp.path());
        let result = ghost
            .execute(json!({"action": "run"}), &context)
            .await
            .unwrap();

        let body = content(&result);
        assert_eq!(body["status"], "failed");
        assert!(body["stderr"].as_str().unwrap().contains("no-such-binary-9137"));
    }

    #[tokio::test]
    async fn foreground_timeout_returns_partial_output() {
        let tmp = tempdir().expect("tempdir");
        let context = ToolContext::new(tmp.path());
        let result = shell(tmp.path())
            .execute(
                json!({"action": "run", "command_arguments": "echo begun; exec sleep 30", "timeout": 1}),
                &context,
            )
            .await
            .unwrap();

        assert!(!result.success);
        let body = content(&result);
        assert_eq!(body["status"], "timeout");
        assert_eq!(body["stdout"], "begun\n");
    }

    #[tokio::test]
    async fn argument_errors_spawn_nothing() {
        let tmp = tempdir().expect("tempdir");
        let context = ToolContext::new(tmp.path());
        let echo = tool(ProcessToolKind::Process, "echo", &[], tmp.path());

        let unbalanced = echo
            .execute(
                json!({"action": "run", "command_arguments": "'open", "background": true}),
                &context,
            )
            .await
            .unwrap_err();
        assert!(matches!(unbalanced, ToolError::InvalidInput { .. }));

        let bad_env = echo
            .execute(
                json!({"action": "run", "env": ["NOEQUALS"], "background": true}),
                &context,
            )
            .await
            .unwrap_err();
        assert!(matches!(bad_env, ToolError::InvalidInput { .. }));

        let bad_timeout = echo
            .execute(
                json!({"action": "run", "timeout": "soon", "background": true}),
                &context,
            )
            .await
            .unwrap_err();
        assert!(matches!(bad_timeout, ToolError::InvalidInput { .. }));

        assert!(context.processes.is_empty());
    }

    #[tokio::test]
    async fn unknown_and_missing_actions_are_errors() {
        let tmp = tempdir().expect("tempdir");
        let context = ToolContext::new(tmp.path());
        let echo = tool(ProcessToolKind::Process, "echo", &[], tmp.path());

        let unknown = echo
            .execute(json!({"action": "restart"}), &context)
            .await
            .unwrap_err();
        assert!(unknown.to_string().contains("restart"));

        let missing = echo.execute(json!({}), &context).await.unwrap_err();
        assert!(matches!(missing, ToolError::MissingField { .. }));
    }

    #[tokio::test]
    async fn env_and_working_dir_overrides() {
        let tmp = tempdir().expect("tempdir");
        std::fs::create_dir(tmp.path().join("sub")).expect("mkdir");
        let context = ToolContext::new(tmp.path());
        let sh = shell(tmp.path());

        let result = sh
            .execute(
                json!({
                    "action": "run",
                    "command_arguments": "printf '%s:' \"$GREETING\"; pwd",
                    "env": ["GREETING=hi=there"],
                    "working_dir": "sub"
                }),
                &context,
            )
            .await
            .unwrap();
        let stdout = content(&result)["stdout"].as_str().unwrap().to_string();
        assert!(stdout.starts_with("hi=there:"), "stdout: {stdout}");
        assert!(stdout.trim_end().ends_with("/sub"), "stdout: {stdout}");

        let err = sh
            .execute(
                json!({"action": "run", "command_arguments": "pwd", "working_dir": "missing"}),
                &context,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn large_output_is_truncated_in_content_only() {
        let tmp = tempdir().expect("tempdir");
        let context = ToolContext::new(tmp.path());
        let result = shell(tmp.path())
            .execute(
                json!({"action": "run", "command_arguments": "yes x | head -c 40000"}),
                &context,
            )
            .await
            .unwrap();

        let metadata = result.metadata.clone().expect("metadata");
        assert_eq!(metadata["stdout_len"], 40_000);
        assert_eq!(metadata["stdout_truncated"], true);
        assert_eq!(metadata["stdout_omitted"], 10_000);
        let stdout = content(&result)["stdout"].as_str().unwrap().to_string();
        assert!(stdout.ends_with("[Output truncated at 30000 bytes. 10000 bytes omitted.]"));
    }

    #[tokio::test]
    async fn background_lifecycle_through_actions() {
        let tmp = tempdir().expect("tempdir");
        let context = ToolContext::new(tmp.path());
        let sleep = tool(ProcessToolKind::Process, "sleep", &[], tmp.path());

        let started = sleep
            .execute(
                json!({"action": "run", "command_arguments": "30", "background": true}),
                &context,
            )
            .await
            .unwrap();
        let body = content(&started);
        assert_eq!(body["status"], "running");
        let pid = body["pid"].as_u64().expect("pid");

        let status = sleep
            .execute(json!({"action": "status", "pid": pid}), &context)
            .await
            .unwrap();
        assert_eq!(content(&status)["status"], "running");

        let listed = sleep
            .execute(json!({"action": "list"}), &context)
            .await
            .unwrap();
        let listed = content(&listed);
        assert_eq!(listed["processes"][0]["pid"], pid);
        assert_eq!(listed["processes"][0]["command"], "sleep 30");

        let killed = sleep
            .execute(json!({"action": "kill", "pid": pid}), &context)
            .await
            .unwrap();
        assert!(killed.success);
        assert_eq!(content(&killed)["status"], "terminated");

        let gone = sleep
            .execute(json!({"action": "status", "pid": pid}), &context)
            .await
            .unwrap();
        assert_eq!(content(&gone)["status"], "not found");
        assert!(context.processes.is_empty());
    }

    #[tokio::test]
    async fn background_exit_is_observed_by_status() {
        let tmp = tempdir().expect("tempdir");
        let context = ToolContext::new(tmp.path());
        let sh = shell(tmp.path());

        let started = sh
            .execute(
                json!({"action": "run", "command_arguments": "echo done", "background": true}),
                &context,
            )
            .await
            .unwrap();
        let pid = content(&started)["pid"].as_u64().expect("pid");

        let mut last = Value::Null;
        for _ in 0..50 {
            let status = sh
                .execute(json!({"action": "status", "pid": pid}), &context)
                .await
                .unwrap();
            last = content(&status);
            if last["status"] != "running" {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
        assert_eq!(last["status"], "exited");
        assert_eq!(last["stdout"], "done\n");
    }
}
