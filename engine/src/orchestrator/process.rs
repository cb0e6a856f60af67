//! Process-based agent executor
//!
//! Runs a configured command as the agent executor: the context bundle is
//! written to its stdin as JSON, the execution outcome is read from its
//! stdout as JSON, and the process runs with the workspace as its working
//! directory. This keeps the actual agent (an LLM harness, a script, a
//! fake in tests) fully outside the engine.

use std::process::Stdio;

use async_trait::async_trait;
use sdk::errors::EngineError;
use sdk::executor::ExecutionOutcome;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::context::ContextBundle;
use crate::isolation::Workspace;

use super::AgentExecutor;

/// Spawns an external command per execution
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    command: Vec<String>,
}

impl ProcessExecutor {
    /// Create an executor from an argv-style command line
    pub fn new(command: Vec<String>) -> Result<Self, EngineError> {
        if command.is_empty() {
            return Err(EngineError::Validation(
                "orchestrator.executor_command is empty; configure the agent executor".into(),
            ));
        }
        Ok(Self { command })
    }
}

#[async_trait]
impl AgentExecutor for ProcessExecutor {
    async fn execute(
        &self,
        bundle: &ContextBundle,
        workspace: &Workspace,
    ) -> Result<ExecutionOutcome, EngineError> {
        let payload = serde_json::to_vec(bundle)
            .map_err(|e| EngineError::Executor(format!("serialize bundle: {e}")))?;

        debug!(
            unit = %bundle.unit_id,
            command = %self.command[0],
            workspace = %workspace.root().display(),
            "spawning executor process"
        );

        let mut child = Command::new(&self.command[0])
            .args(&self.command[1..])
            .current_dir(workspace.root())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| EngineError::Executor(format!("spawn {}: {e}", self.command[0])))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&payload)
                .await
                .map_err(|e| EngineError::Executor(format!("write bundle to executor: {e}")))?;
            // Close stdin so the child sees EOF.
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| EngineError::Executor(format!("executor did not finish: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Ok(ExecutionOutcome::failure(format!(
                "executor exited with {}: {}",
                output.status,
                truncate(stderr.trim(), 500)
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        match serde_json::from_str::<ExecutionOutcome>(stdout.trim()) {
            Ok(outcome) => Ok(outcome),
            Err(e) => Ok(ExecutionOutcome::failure(format!(
                "unparseable executor output ({e}): {}",
                truncate(stdout.trim(), 200)
            ))),
        }
    }
}

fn truncate(text: &str, max: usize) -> &str {
    let mut end = text.len().min(max);
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
