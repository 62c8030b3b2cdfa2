//! External model runner seam.
//!
//! The neural network itself is an external collaborator: a configured
//! command line run through the shell with the prompt appended as a
//! single-quoted argument. Without a configured command the runner
//! acknowledges execution with a fixed payload, which keeps a fleet
//! testable on machines with no model installed.

use std::time::{Duration, Instant};

use tokio::process::Command;

use crate::bandit::predictor::shell_escape_single_quotes;
use crate::error::{Result, SwarmError};

/// Payload produced when no runner command is configured.
const PLACEHOLDER_RESULT: &str = "SLM EXECUTION DONE";

/// Outcome of one prompt execution.
#[derive(Debug, Clone)]
pub struct RunOutput {
    /// Result payload returned to the requester
    pub text: String,
    /// Wall-clock execution latency
    pub latency: Duration,
}

/// Runs prompts through the configured external model command.
#[derive(Debug, Clone, Default)]
pub struct PromptRunner {
    command: Option<String>,
}

impl PromptRunner {
    pub fn new(command: Option<String>) -> Self {
        Self { command }
    }

    /// Execute a prompt and capture the result payload.
    pub async fn run(&self, prompt: &str) -> Result<RunOutput> {
        let started = Instant::now();

        let Some(command) = &self.command else {
            return Ok(RunOutput {
                text: PLACEHOLDER_RESULT.to_string(),
                latency: started.elapsed(),
            });
        };

        let line = format!("{} '{}'", command, shell_escape_single_quotes(prompt));
        let output = Command::new("sh")
            .arg("-c")
            .arg(&line)
            .output()
            .await
            .map_err(|e| SwarmError::runner_failed(e.to_string()))?;

        if !output.status.success() {
            return Err(SwarmError::runner_failed(format!(
                "runner exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(RunOutput {
            text: String::from_utf8_lossy(&output.stdout).trim_end().to_string(),
            latency: started.elapsed(),
        })
    }
}
