//! Shell executor — runs an argv vector with a hard timeout and reports
//! the combined output plus exit metadata.
//!
//! The tool output contract is a JSON string:
//! `{ "output": ..., "metadata": { "exit_code": ..., "duration_seconds": ... } }`

use std::path::Path;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tokio::process::Command;

use crate::sandbox;

pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, Deserialize)]
pub struct ShellRequest {
    /// Argv vector; the first element is the program.
    pub command: Vec<String>,
    #[serde(default)]
    pub workdir: Option<String>,
    /// Hard timeout in seconds.
    #[serde(default)]
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ShellOutcome {
    pub output: String,
    pub exit_code: i32,
    pub duration_seconds: f64,
    #[serde(skip)]
    pub timed_out: bool,
}

impl ShellOutcome {
    /// Render the JSON string handed back to the model.
    pub fn to_tool_output(&self) -> String {
        serde_json::json!({
            "output": self.output,
            "metadata": {
                "exit_code": self.exit_code,
                "duration_seconds": self.duration_seconds,
            }
        })
        .to_string()
    }
}

/// Run a command to completion or until the timeout expires.
///
/// Spawn failures and timeouts are reported through the outcome (non-zero
/// exit code, diagnostic appended to output) so the caller can always
/// produce a `ToolResult`.
pub async fn run_shell(req: &ShellRequest, default_workdir: &Path, scrub_env: bool) -> ShellOutcome {
    let started = Instant::now();
    let timeout_secs = req.timeout.unwrap_or(DEFAULT_TIMEOUT_SECS);

    let mut cmd = Command::new(&req.command[0]);
    cmd.args(&req.command[1..])
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .stdin(std::process::Stdio::null())
        .kill_on_drop(true);

    match &req.workdir {
        Some(dir) => cmd.current_dir(dir),
        None => cmd.current_dir(default_workdir),
    };
    if scrub_env {
        sandbox::scrub_command(&mut cmd);
    }

    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            return ShellOutcome {
                output: format!("failed to spawn {}: {e}", req.command[0]),
                exit_code: 127,
                duration_seconds: started.elapsed().as_secs_f64(),
                timed_out: false,
            };
        }
    };

    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();
    let out_task = tokio::spawn(async move {
        let mut buf = String::new();
        if let Some(ref mut pipe) = stdout {
            let _ = pipe.read_to_string(&mut buf).await;
        }
        buf
    });
    let err_task = tokio::spawn(async move {
        let mut buf = String::new();
        if let Some(ref mut pipe) = stderr {
            let _ = pipe.read_to_string(&mut buf).await;
        }
        buf
    });

    let timeout = std::time::Duration::from_secs(timeout_secs);
    let (exit_code, timed_out) = tokio::select! {
        status = child.wait() => {
            let code = status.ok().and_then(|s| s.code()).unwrap_or(-1);
            (code, false)
        }
        _ = tokio::time::sleep(timeout) => {
            let _ = child.kill().await;
            let _ = child.wait().await;
            (-1, true)
        }
    };

    let mut output = out_task.await.unwrap_or_default();
    let err_output = err_task.await.unwrap_or_default();
    if !err_output.is_empty() {
        output.push_str(&err_output);
    }
    if timed_out {
        output.push_str(&format!("\n[timed out after {timeout_secs}s]"));
    }

    ShellOutcome {
        output,
        exit_code,
        duration_seconds: started.elapsed().as_secs_f64(),
        timed_out,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(argv: &[&str]) -> ShellRequest {
        ShellRequest {
            command: argv.iter().map(|s| s.to_string()).collect(),
            workdir: None,
            timeout: None,
        }
    }

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let outcome = run_shell(&request(&["echo", "hello"]), Path::new("."), true).await;
        assert_eq!(outcome.exit_code, 0);
        assert_eq!(outcome.output.trim(), "hello");
        assert!(!outcome.timed_out);
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported() {
        let outcome = run_shell(&request(&["false"]), Path::new("."), true).await;
        assert_eq!(outcome.exit_code, 1);
    }

    #[tokio::test]
    async fn missing_program_reports_spawn_failure() {
        let outcome = run_shell(
            &request(&["definitely-not-a-real-binary-1234"]),
            Path::new("."),
            true,
        )
        .await;
        assert_eq!(outcome.exit_code, 127);
        assert!(outcome.output.contains("failed to spawn"));
    }

    #[tokio::test]
    async fn timeout_kills_the_child() {
        let mut req = request(&["sleep", "30"]);
        req.timeout = Some(1);
        let outcome = run_shell(&req, Path::new("."), true).await;
        assert!(outcome.timed_out);
        assert_eq!(outcome.exit_code, -1);
        assert!(outcome.output.contains("timed out after 1s"));
        assert!(outcome.duration_seconds < 10.0);
    }

    #[tokio::test]
    async fn workdir_is_respected() {
        let dir = tempfile::tempdir().unwrap();
        let mut req = request(&["pwd"]);
        req.workdir = Some(dir.path().to_string_lossy().into_owned());
        let outcome = run_shell(&req, Path::new("."), true).await;
        let canonical = dir.path().canonicalize().unwrap();
        assert_eq!(outcome.output.trim(), canonical.to_string_lossy());
    }

    #[test]
    fn tool_output_contract_shape() {
        let outcome = ShellOutcome {
            output: "file.txt\n".into(),
            exit_code: 0,
            duration_seconds: 0.01,
            timed_out: false,
        };
        let value: serde_json::Value = serde_json::from_str(&outcome.to_tool_output()).unwrap();
        assert_eq!(value["output"], "file.txt\n");
        assert_eq!(value["metadata"]["exit_code"], 0);
        assert!(value["metadata"]["duration_seconds"].is_number());
    }
}
