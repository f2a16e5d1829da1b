//! Subprocess tools: shell commands and Python code.
//!
//! Both run with a wall-clock timeout; the child is killed when it expires.
//! A non-zero exit status is reported in the result, not as a tool error,
//! so the model can read stderr and try again.

use std::process::Stdio;
use std::time::Duration;

use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use toolbox_core::error::ToolError;
use tracing::{debug, warn};

/// Captured result of a finished process.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Characters that let one shell line run more than its first command.
const SHELL_METACHARACTERS: &[char] = &[';', '&', '|', '`', '$', '(', ')', '<', '>', '\n', '\r'];

/// Execute shell commands with an optional command allowlist.
///
/// With an allowlist, a command must be a single simple command: chaining,
/// substitution and redirection are refused before the shell sees them.
pub struct ShellRunner {
    /// If non-empty, only these commands are allowed.
    allowed_commands: Vec<String>,
    timeout: Duration,
}

impl ShellRunner {
    pub fn new(allowed_commands: Vec<String>, timeout: Duration) -> Self {
        Self {
            allowed_commands,
            timeout,
        }
    }

    fn is_command_allowed(&self, command: &str) -> bool {
        if self.allowed_commands.is_empty() {
            return true;
        }

        let base_cmd = command.split_whitespace().next().unwrap_or("").trim();
        self.allowed_commands.iter().any(|a| a == base_cmd)
    }

    /// The first shell metacharacter in `command`, if an allowlist applies.
    fn forbidden_metacharacter(&self, command: &str) -> Option<char> {
        if self.allowed_commands.is_empty() {
            return None;
        }
        command.chars().find(|c| SHELL_METACHARACTERS.contains(c))
    }

    pub async fn run(&self, command: &str) -> Result<ProcessOutput, ToolError> {
        const TOOL: &str = "execute_shell_command";

        if command.trim().is_empty() {
            return Err(ToolError::invalid(TOOL, "command is empty"));
        }
        if !self.is_command_allowed(command) {
            let base = command.split_whitespace().next().unwrap_or("");
            return Err(ToolError::failed(TOOL, format!("command '{base}' is not in the allowlist")));
        }
        if let Some(c) = self.forbidden_metacharacter(command) {
            warn!(command = %command, "Refusing shell metacharacter under allowlist");
            return Err(ToolError::failed(
                TOOL,
                format!("{c:?} is not allowed when a command allowlist is configured"),
            ));
        }

        debug!(command = %command, "Executing shell command");

        let mut cmd = if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.args(["/C", command]);
            c
        } else {
            let mut c = Command::new("sh");
            c.args(["-c", command]);
            c
        };
        run_process(TOOL, &mut cmd, None, self.timeout).await
    }
}

/// Runs Python source through the configured interpreter.
pub struct PythonRunner {
    python_bin: String,
    timeout: Duration,
}

/// Result shape of `execute_python_code`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PythonOutput {
    pub output: String,
    pub error: String,
    pub exit_code: i32,
}

impl PythonRunner {
    pub fn new(python_bin: impl Into<String>, timeout: Duration) -> Self {
        Self {
            python_bin: python_bin.into(),
            timeout,
        }
    }

    /// The code is piped on stdin so it never shows up in the process list.
    pub async fn run(&self, code: &str) -> Result<PythonOutput, ToolError> {
        let mut cmd = Command::new(&self.python_bin);
        cmd.arg("-");
        let out = run_process("execute_python_code", &mut cmd, Some(code), self.timeout).await?;
        Ok(PythonOutput {
            output: out.stdout,
            error: out.stderr,
            exit_code: out.exit_code,
        })
    }
}

async fn run_process(
    tool: &str,
    cmd: &mut Command,
    stdin: Option<&str>,
    timeout: Duration,
) -> Result<ProcessOutput, ToolError> {
    cmd.stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| ToolError::failed(tool, e))?;

    if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
        pipe.write_all(input.as_bytes())
            .await
            .map_err(|e| ToolError::failed(tool, e))?;
        // Dropping the pipe closes stdin so the interpreter starts executing.
        drop(pipe);
    }

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result.map_err(|e| ToolError::failed(tool, e))?,
        Err(_) => {
            warn!(tool = %tool, timeout_secs = timeout.as_secs(), "Process timed out");
            return Err(ToolError::Timeout {
                tool_name: tool.into(),
                timeout_secs: timeout.as_secs(),
            });
        }
    };

    let exit_code = output.status.code().unwrap_or(-1);
    if exit_code != 0 {
        debug!(tool = %tool, exit_code, "Process exited with failure");
    }

    Ok(ProcessOutput {
        stdout: String::from_utf8_lossy(&output.stdout).trim_end().to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim_end().to_string(),
        exit_code,
    })
}
