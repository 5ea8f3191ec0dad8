//! Subprocess task adapter.
//!
//! Runs an external program per invocation: the request is written to the
//! program's stdin as one JSON document (`{"kind": ..., "payload": ...}`)
//! and its stdout is parsed as the task output.

use std::io;
use std::path::Path;
use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{TaskAdapter, TaskOutput, TaskRequest};

/// Program and arguments for one task kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,

    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

/// Adapter that delegates a task to an external program
#[derive(Debug, Clone)]
pub struct CommandAdapter {
    name: String,
    spec: CommandSpec,
}

impl CommandAdapter {
    pub fn new(spec: CommandSpec) -> Self {
        Self {
            name: format!("command:{}", spec.program),
            spec,
        }
    }

    pub fn spec(&self) -> &CommandSpec {
        &self.spec
    }

    async fn execute_subprocess(&self, request: &TaskRequest) -> Result<Vec<u8>> {
        let input = serde_json::to_vec(&json!({
            "kind": request.kind,
            "payload": request.payload,
        }))
        .context("Failed to serialize task request")?;

        let mut child = Command::new(&self.spec.program)
            .args(&self.spec.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn '{}' for {}", self.spec.program, request.kind))?;

        // Feed stdin while draining stdout so a program that echoes large
        // input cannot fill its pipe and stall; dropping stdin signals EOF
        let stdin = child.stdin.take();
        let write_input = async move {
            let Some(mut stdin) = stdin else {
                return Ok::<(), io::Error>(());
            };
            match stdin.write_all(&input).await {
                // The program may exit without reading all of its input
                Err(err) if err.kind() == io::ErrorKind::BrokenPipe => Ok(()),
                result => result,
            }
        };

        // Dropping the exchange on cancellation kills the child
        let (written, output) = tokio::select! {
            _ = request.cancel.cancelled() => {
                anyhow::bail!("'{}' cancelled while running {}", self.spec.program, request.kind)
            }
            exchange = async { tokio::join!(write_input, child.wait_with_output()) } => exchange,
        };

        written.with_context(|| format!("Failed to write to '{}' stdin", self.spec.program))?;
        let output =
            output.with_context(|| format!("Failed to wait for '{}'", self.spec.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let exit_code = output.status.code().unwrap_or(-1);
            anyhow::bail!(
                "'{}' failed for {} with exit code {}: {}",
                self.spec.program,
                request.kind,
                exit_code,
                stderr.trim()
            );
        }

        Ok(output.stdout)
    }
}

#[async_trait]
impl TaskAdapter for CommandAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, request: TaskRequest) -> Result<TaskOutput> {
        request.progress.report(0, format!("running {}", self.spec.program));
        let stdout = self.execute_subprocess(&request).await?;

        let data: Value = serde_json::from_slice(&stdout)
            .with_context(|| format!("'{}' did not print a JSON document", self.spec.program))?;

        Ok(TaskOutput::new(data))
    }

    async fn health_check(&self) -> Result<()> {
        let program = Path::new(&self.spec.program);
        let found = if program.components().count() > 1 {
            program.is_file()
        } else {
            std::env::var_os("PATH")
                .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(program).is_file()))
                .unwrap_or(false)
        };

        if !found {
            anyhow::bail!("Program not found: {}", self.spec.program);
        }
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::adapters::{TaskKind, TaskProgress};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn request(payload: Value) -> TaskRequest {
        TaskRequest::new(
            TaskKind::ResumeParser,
            payload,
            TaskProgress::detached("resume_parser"),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_echoes_request_through_cat() {
        let adapter = CommandAdapter::new(CommandSpec::new("cat"));
        let output = adapter
            .invoke(request(json!({ "resume_id": "r1" })))
            .await
            .unwrap();

        assert_eq!(output.data["kind"], "resume_parser");
        assert_eq!(output.data["payload"]["resume_id"], "r1");
    }

    #[tokio::test]
    async fn test_large_payload_does_not_block() {
        let adapter = CommandAdapter::new(CommandSpec::new("cat"));
        let resume_text = "x".repeat(200_000);

        let output = tokio::time::timeout(
            Duration::from_secs(5),
            adapter.invoke(request(json!({ "resume_text": resume_text }))),
        )
        .await
        .expect("cat stalled on a large payload")
        .unwrap();

        assert_eq!(output.data["payload"]["resume_text"].as_str(), Some(resume_text.as_str()));
    }

    #[tokio::test]
    async fn test_cancel_kills_the_program() {
        let cancel = CancellationToken::new();
        let spec = CommandSpec::new("sh").with_args(["-c", "sleep 30"]);
        let adapter = CommandAdapter::new(spec);
        let invocation = adapter.invoke(TaskRequest::new(
            TaskKind::ResumeParser,
            json!({}),
            TaskProgress::detached("resume_parser"),
            cancel.clone(),
        ));

        cancel.cancel();
        let err = tokio::time::timeout(Duration::from_secs(5), invocation)
            .await
            .expect("cancelled program kept running")
            .unwrap_err();
        assert!(err.to_string().contains("cancelled"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_an_error() {
        let spec = CommandSpec::new("sh").with_args(["-c", "cat > /dev/null; echo broken >&2; exit 3"]);
        let err = CommandAdapter::new(spec)
            .invoke(request(json!({})))
            .await
            .unwrap_err();

        let message = err.to_string();
        assert!(message.contains("exit code 3"));
        assert!(message.contains("broken"));
    }

    #[tokio::test]
    async fn test_non_json_output_is_an_error() {
        let spec = CommandSpec::new("sh").with_args(["-c", "cat > /dev/null; echo not-json"]);
        assert!(CommandAdapter::new(spec).invoke(request(json!({}))).await.is_err());
    }

    #[tokio::test]
    async fn test_health_check() {
        assert!(CommandAdapter::new(CommandSpec::new("sh")).health_check().await.is_ok());
        assert!(CommandAdapter::new(CommandSpec::new("careerflow-no-such-program"))
            .health_check()
            .await
            .is_err());
    }
}
