//! The worker's execute listener.
//!
//! Accepts direct connections from requesters on an ephemeral TCP port
//! (the endpoint embedded in every bid) and runs awarded jobs. Jobs run
//! synchronously on the accepting loop; the accelerator is marked busy
//! for the duration and surfaced as idle again in later status reports
//! and bids. Executed prompts feed their observed latency back into the
//! bid scorer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use metrics::counter;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::agent::probes;
use crate::agent::runner::PromptRunner;
use crate::bandit::{self, BidScorer, Observation};
use crate::error::{Result, SwarmError};
use crate::protocol::{base64, status, JsonFrameCodec, MessageType, WireMessage};
use crate::vision::ClassifyPipeline;

/// Shared busy/idle flags between the executor, bid handling and the
/// status heartbeat.
#[derive(Clone)]
pub struct DeviceFlags {
    pub has_accelerator: bool,
    accelerator_idle: Arc<AtomicBool>,
    executing: Arc<AtomicBool>,
}

impl DeviceFlags {
    pub fn new(has_accelerator: bool) -> Self {
        Self {
            has_accelerator,
            accelerator_idle: Arc::new(AtomicBool::new(has_accelerator)),
            executing: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn accelerator_idle(&self) -> bool {
        self.accelerator_idle.load(Ordering::Acquire)
    }

    pub fn executing(&self) -> bool {
        self.executing.load(Ordering::Acquire)
    }
}

/// Marks the device busy for one job; idle again on drop.
struct BusyGuard {
    flags: DeviceFlags,
}

impl BusyGuard {
    fn engage(flags: &DeviceFlags) -> Self {
        flags.executing.store(true, Ordering::Release);
        flags.accelerator_idle.store(false, Ordering::Release);
        Self {
            flags: flags.clone(),
        }
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.flags.executing.store(false, Ordering::Release);
        self.flags
            .accelerator_idle
            .store(self.flags.has_accelerator, Ordering::Release);
    }
}

/// Runs awarded jobs for one worker.
pub struct Executor {
    agent_id: String,
    flags: DeviceFlags,
    runner: PromptRunner,
    pipeline: Arc<ClassifyPipeline>,
    scorer: Arc<BidScorer>,
}

impl Executor {
    pub fn new(
        agent_id: String,
        flags: DeviceFlags,
        runner: PromptRunner,
        pipeline: ClassifyPipeline,
        scorer: Arc<BidScorer>,
    ) -> Self {
        Self {
            agent_id,
            flags,
            runner,
            pipeline: Arc::new(pipeline),
            scorer,
        }
    }

    /// Bind the execute listener on an ephemeral port.
    pub async fn bind() -> Result<(TcpListener, u16)> {
        let listener = TcpListener::bind(("0.0.0.0", 0)).await?;
        let port = listener.local_addr()?.port();
        tracing::info!(port, "Execute listener bound");
        Ok((listener, port))
    }

    /// Accept loop; jobs run synchronously on this task.
    pub async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    tracing::debug!(peer = %peer, "Execute connection accepted");
                    self.handle_connection(stream).await;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Execute accept failed");
                }
            }
        }
    }

    /// Serve one execute connection: one request, one reply.
    async fn handle_connection(&self, stream: TcpStream) {
        let (read_half, write_half) = stream.into_split();
        let mut reader = FramedRead::new(read_half, JsonFrameCodec::new());
        let mut writer = FramedWrite::new(write_half, JsonFrameCodec::new());

        let request = match reader.next().await {
            Some(Ok(msg)) => msg,
            _ => return,
        };

        let reply = match request.kind {
            MessageType::SlmExecute => {
                let outcome = self.run_job(&request).await;
                let mut reply = WireMessage::new(MessageType::SlmResult)
                    .with_agent(self.agent_id.clone())
                    .with_task(request.task_id.clone())
                    .with_subtask(request.subtask.clone());
                match outcome {
                    Ok(payload) => reply = reply.with_status(status::SUCCESS).with_text(payload),
                    Err(e) => {
                        e.log();
                        reply = reply
                            .with_status(e.wire_status())
                            .with_text(e.user_message().to_string());
                    }
                }
                reply
            }
            // Image pipeline family: same job surface, structured result.
            MessageType::Task => self.run_task(&request).await,
            other => {
                tracing::warn!(kind = %other, "Unexpected message on execute listener");
                WireMessage::ack(status::ERR_INVALID)
            }
        };

        if let Err(e) = writer.send(reply).await {
            tracing::warn!(error = %e, "Failed to reply on execute connection");
        }
    }

    /// Handle a `task` message, replying in the image pipeline dialect.
    pub async fn run_task(&self, request: &WireMessage) -> WireMessage {
        let reply = WireMessage::new(MessageType::TaskResult)
            .with_agent(self.agent_id.clone())
            .with_task(request.task_id.clone())
            .with_subtask(request.subtask.clone());

        match self.run_job(request).await {
            Ok(payload) => reply.with_data(serde_json::json!({
                "status": "completed",
                "output": payload,
            })),
            Err(e) => {
                e.log();
                reply.with_data(serde_json::json!({
                    "status": "error",
                    "message": e.user_message(),
                }))
            }
        }
    }

    /// Execute one job and produce its result payload.
    pub async fn run_job(&self, request: &WireMessage) -> Result<String> {
        let _busy = BusyGuard::engage(&self.flags);

        if request.subtask == "classify" || request.data.get("image_base64").is_some() {
            counter!("edgeswarm_jobs_total", "kind" => "classify").increment(1);
            let encoded = request
                .data
                .get("image_base64")
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    SwarmError::new(
                        crate::error::ErrorCode::UnexpectedMessage,
                        "Classify job without image payload",
                    )
                })?;
            let bytes = base64::decode_tolerant(encoded);

            let pipeline = self.pipeline.clone();
            tokio::task::spawn_blocking(move || pipeline.classify(&bytes))
                .await
                .map_err(|e| SwarmError::internal(e.to_string()))?
        } else {
            counter!("edgeswarm_jobs_total", "kind" => "prompt").increment(1);
            let prompt = request.text().to_string();
            tracing::info!(prompt_len = prompt.len(), "Executing prompt");

            let output = self.runner.run(&prompt).await?;
            tracing::info!(
                latency_ms = output.latency.as_millis(),
                "Prompt execution done"
            );

            // Feed the observation back into the pricing model.
            let scorer = self.scorer.clone();
            let prompt_len = prompt.len() as f64;
            let latency_secs = output.latency.as_secs_f64();
            tokio::task::spawn_blocking(move || {
                let cpu = probes::cpu_load() * 100.0;
                let ram = probes::ram_pct();
                let x = bandit::features(cpu, ram, prompt_len);
                scorer.train(
                    &x,
                    Observation {
                        latency_secs,
                        ttft_secs: None,
                        tokens_per_sec: None,
                    },
                );
            });

            Ok(output.text)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ScoringConfig, VisionConfig};

    fn test_executor(has_accelerator: bool) -> Executor {
        Executor::new(
            "test-worker".to_string(),
            DeviceFlags::new(has_accelerator),
            PromptRunner::new(None),
            ClassifyPipeline::new(VisionConfig::default()),
            Arc::new(BidScorer::from_config(&ScoringConfig::default())),
        )
    }

    #[test]
    fn test_busy_guard_toggles_flags() {
        let flags = DeviceFlags::new(true);
        assert!(flags.accelerator_idle());
        assert!(!flags.executing());

        {
            let _busy = BusyGuard::engage(&flags);
            assert!(!flags.accelerator_idle());
            assert!(flags.executing());
        }

        assert!(flags.accelerator_idle());
        assert!(!flags.executing());
    }

    #[test]
    fn test_busy_guard_without_accelerator() {
        let flags = DeviceFlags::new(false);
        assert!(!flags.accelerator_idle());
        {
            let _busy = BusyGuard::engage(&flags);
        }
        // Never reports an idle accelerator it does not have.
        assert!(!flags.accelerator_idle());
    }

    #[tokio::test]
    async fn test_prompt_job_produces_result() {
        let executor = test_executor(false);
        let request = WireMessage::new(MessageType::SlmExecute).with_text("Hi");
        let payload = executor.run_job(&request).await.unwrap();
        assert_eq!(payload, "SLM EXECUTION DONE");
    }

    #[tokio::test]
    async fn test_classify_without_payload_is_invalid() {
        let executor = test_executor(false);
        let request = WireMessage::new(MessageType::SlmExecute).with_subtask("classify");
        assert!(executor.run_job(&request).await.is_err());
    }

    #[tokio::test]
    async fn test_task_dialect_reports_errors_structurally() {
        let executor = test_executor(false);
        let request = WireMessage::new(MessageType::Task)
            .with_task("t-1")
            .with_subtask("classify");

        let reply = executor.run_task(&request).await;
        assert_eq!(reply.kind, MessageType::TaskResult);
        assert_eq!(reply.data["status"], "error");
        assert_eq!(reply.task_id, "t-1");
    }
}
