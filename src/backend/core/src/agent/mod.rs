//! The worker agent.
//!
//! Maintains one control connection to the coordinator (bounded dialback
//! with a fixed delay), registers with current capabilities and metrics,
//! posts periodic status, prices bids on request, and serves awarded
//! jobs on its execute listener. The same process doubles as a
//! requester: a stdin command loop submits prompts, receives the winner
//! announcement and dials the winner directly.
//!
//! Lifecycle: `DISCONNECTED → CONNECTING → REGISTERED → (IDLE ↔ BIDDING
//! ↔ EXECUTING) → DISCONNECTED`, where a lost control socket re-enters
//! the dialback loop.

pub mod executor;
pub mod probes;
pub mod runner;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::codec::{FramedRead, FramedWrite};
use uuid::Uuid;

use crate::bandit::BidScorer;
use crate::config::Config;
use crate::error::{ErrorCode, Result, SwarmError};
use crate::protocol::{status, JsonFrameCodec, MessageType, MetricSnapshot, WireMessage};
use crate::vision::ClassifyPipeline;

pub use executor::{DeviceFlags, Executor};
pub use runner::{PromptRunner, RunOutput};

/// Worker lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Disconnected,
    Connecting,
    Registered,
    Idle,
    Bidding,
    Executing,
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "DISCONNECTED",
            Self::Connecting => "CONNECTING",
            Self::Registered => "REGISTERED",
            Self::Idle => "IDLE",
            Self::Bidding => "BIDDING",
            Self::Executing => "EXECUTING",
        };
        f.write_str(name)
    }
}

/// Startup parameters for one agent process.
pub struct AgentOptions {
    pub agent_id: String,
    pub coordinator_ip: String,
    pub coordinator_port: u16,
    pub has_accelerator: bool,
    pub config: Config,
}

/// How a session ended.
enum SessionEnd {
    /// Control socket lost; dial back.
    Remote,
    /// Operator asked to quit.
    UserExit,
}

/// A prompt submitted locally, awaiting the coordinator's winner reply.
struct PendingJob {
    payload: JobPayload,
}

enum JobPayload {
    Prompt(String),
    Classify { encoded: String },
}

/// Derive the wire bid from the live snapshot and the scorer's
/// predicted-latency LCB (lower = faster device).
///
/// Sub-scores land in [0, 1]; the total uses the 0.3/0.2/0.3/0.2
/// weighting, so a lower predicted latency yields a higher total. A
/// device without a battery reads as mains-powered.
pub fn compose_bid(snapshot: &MetricSnapshot, latency_score: f64) -> (f64, f64, f64, f64, f64) {
    let compute = (1.0 - snapshot.cpu_load).clamp(0.0, 1.0);
    let memory = (1.0 - snapshot.ram_pct / 100.0).clamp(0.0, 1.0);
    let latency = 1.0 / (1.0 + latency_score.max(0.0));
    let power = if snapshot.battery < 0.0 {
        1.0
    } else {
        (snapshot.battery / 100.0).clamp(0.0, 1.0)
    };
    let total = 0.3 * compute + 0.2 * memory + 0.3 * latency + 0.2 * power;
    (compute, memory, latency, power, total)
}

/// One worker agent process.
pub struct Agent {
    id: String,
    coordinator_ip: String,
    coordinator_port: u16,
    cfg: crate::config::AgentConfig,
    flags: DeviceFlags,
    scorer: Arc<BidScorer>,
    executor: Arc<Executor>,
    executor_port: u16,
    state: Arc<Mutex<AgentState>>,
}

impl Agent {
    /// Bind the execute listener and assemble the agent.
    pub async fn start(opts: AgentOptions) -> Result<Self> {
        let scorer = Arc::new(BidScorer::from_config(&opts.config.scoring));
        let flags = DeviceFlags::new(opts.has_accelerator);

        let executor = Arc::new(Executor::new(
            opts.agent_id.clone(),
            flags.clone(),
            PromptRunner::new(opts.config.agent.runner_command.clone()),
            ClassifyPipeline::new(opts.config.vision.clone()),
            scorer.clone(),
        ));
        let (listener, executor_port) = Executor::bind().await?;
        tokio::spawn(executor.clone().accept_loop(listener));

        Ok(Self {
            id: opts.agent_id,
            coordinator_ip: opts.coordinator_ip,
            coordinator_port: opts.coordinator_port,
            cfg: opts.config.agent,
            flags,
            scorer,
            executor,
            executor_port,
            state: Arc::new(Mutex::new(AgentState::Disconnected)),
        })
    }

    pub fn state(&self) -> AgentState {
        *self.state.lock()
    }

    pub fn executor_port(&self) -> u16 {
        self.executor_port
    }

    fn set_state(&self, next: AgentState) {
        let mut state = self.state.lock();
        if *state != next {
            tracing::debug!(from = %state, to = %next, "State transition");
            *state = next;
        }
    }

    /// Main loop: connect, serve the session, dial back on loss.
    pub async fn run(&self) -> Result<()> {
        let stdin = BufReader::new(tokio::io::stdin());
        let mut lines = stdin.lines();

        println!(
            "Welcome {}! Type commands ('help' for list, 'exit' to quit):",
            self.id
        );

        loop {
            self.set_state(AgentState::Connecting);
            let stream = self.connect_with_retries().await?;

            match self.run_session(stream, &mut lines).await {
                Ok(SessionEnd::UserExit) => {
                    self.set_state(AgentState::Disconnected);
                    println!("Goodbye!");
                    return Ok(());
                }
                Ok(SessionEnd::Remote) => {
                    self.set_state(AgentState::Disconnected);
                    println!("\nConnection to coordinator lost, reconnecting...");
                }
                Err(e) => {
                    self.set_state(AgentState::Disconnected);
                    return Err(e);
                }
            }
        }
    }

    /// Bounded dialback with a fixed delay between attempts.
    async fn connect_with_retries(&self) -> Result<TcpStream> {
        let addr = format!("{}:{}", self.coordinator_ip, self.coordinator_port);
        let retries = self.cfg.connect_retries.max(1);

        for attempt in 1..=retries {
            match TcpStream::connect(&addr).await {
                Ok(stream) => {
                    tracing::info!(coordinator = %addr, attempt, "Connected to coordinator");
                    return Ok(stream);
                }
                Err(e) => {
                    tracing::warn!(
                        coordinator = %addr,
                        attempt,
                        retries,
                        error = %e,
                        "Connect failed"
                    );
                    if attempt < retries {
                        tokio::time::sleep(self.cfg.connect_backoff).await;
                    }
                }
            }
        }

        Err(SwarmError::new(
            ErrorCode::ConnectFailed,
            format!("Could not reach coordinator at {} after {} attempts", addr, retries),
        ))
    }

    /// Serve one registered session until the socket drops or the
    /// operator exits.
    async fn run_session(
        &self,
        stream: TcpStream,
        lines: &mut Lines<BufReader<Stdin>>,
    ) -> Result<SessionEnd> {
        let local_ip = stream.local_addr()?.ip().to_string();
        let (read_half, write_half) = stream.into_split();
        let mut reader = FramedRead::new(read_half, JsonFrameCodec::new());
        let mut writer = FramedWrite::new(write_half, JsonFrameCodec::new());

        // Register with current capabilities and metrics.
        let snapshot = tokio::task::spawn_blocking(probes::snapshot)
            .await
            .map_err(|e| SwarmError::internal(e.to_string()))?;
        let registration = WireMessage::new(MessageType::RegClient)
            .with_agent(self.id.clone())
            .with_capability(self.flags.has_accelerator, self.flags.accelerator_idle())
            .with_endpoint(local_ip.clone(), self.executor_port)
            .with_data(serde_json::json!({ "metrics": snapshot }));
        writer.send(registration).await?;

        match timeout(Duration::from_secs(5), reader.next()).await {
            Ok(Some(Ok(ack))) if ack.is_success() => {}
            Ok(Some(Ok(ack))) => {
                return Err(SwarmError::new(
                    ErrorCode::ConnectFailed,
                    format!("Registration rejected with status {}", ack.status_or_success()),
                ));
            }
            _ => {
                return Err(SwarmError::new(
                    ErrorCode::ConnectFailed,
                    "No registration acknowledgment from coordinator",
                ));
            }
        }

        self.set_state(AgentState::Registered);
        tracing::info!(
            coordinator = %format!("{}:{}", self.coordinator_ip, self.coordinator_port),
            executor_port = self.executor_port,
            "Registered with coordinator"
        );
        self.set_state(AgentState::Idle);

        // The writer task owns the write half; everything queues here.
        let (out_tx, mut out_rx) = mpsc::channel::<WireMessage>(32);
        let writer_task = tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                if writer.send(msg).await.is_err() {
                    break;
                }
            }
        });

        let heartbeat = tokio::spawn(heartbeat_loop(
            self.id.clone(),
            self.flags.clone(),
            out_tx.clone(),
            self.cfg.status_interval,
        ));

        let mut pending: Option<PendingJob> = None;
        let mut stdin_open = true;

        let end = loop {
            tokio::select! {
                frame = reader.next() => {
                    match frame {
                        Some(Ok(msg)) => {
                            self.handle_control_message(msg, &mut pending, &out_tx, &local_ip);
                        }
                        Some(Err(e)) => {
                            tracing::debug!(error = %e, "Control read failed");
                            break SessionEnd::Remote;
                        }
                        None => break SessionEnd::Remote,
                    }
                }
                line = lines.next_line(), if stdin_open => {
                    match line {
                        Ok(Some(line)) => {
                            if !self.handle_command(line.trim(), &mut pending, &out_tx, &local_ip).await {
                                break SessionEnd::UserExit;
                            }
                        }
                        _ => {
                            // Headless: stdin closed, keep serving the fleet.
                            stdin_open = false;
                        }
                    }
                }
            }
        };

        heartbeat.abort();
        drop(out_tx);
        writer_task.abort();
        Ok(end)
    }

    /// Dispatch one inbound control message.
    fn handle_control_message(
        &self,
        msg: WireMessage,
        pending: &mut Option<PendingJob>,
        out_tx: &mpsc::Sender<WireMessage>,
        local_ip: &str,
    ) {
        match msg.kind {
            MessageType::SlmBidRequest | MessageType::BidRequest => {
                self.spawn_bid_response(msg, out_tx.clone(), local_ip.to_string());
            }
            MessageType::Task => {
                // Image pipeline dispatch over the control socket.
                let executor = self.executor.clone();
                let out_tx = out_tx.clone();
                tokio::spawn(async move {
                    let reply = executor.run_task(&msg).await;
                    let _ = out_tx.send(reply).await;
                });
            }
            MessageType::Ack => match pending.take() {
                Some(job) => self.spawn_job_dispatch(msg, job),
                None => tracing::debug!("Unsolicited acknowledgment"),
            },
            other => {
                tracing::debug!(kind = %other, "Unhandled control message");
            }
        }
    }

    /// Price a bid off-thread and always reply, busy or not, so the
    /// coordinator's wait can exit early.
    fn spawn_bid_response(
        &self,
        request: WireMessage,
        out_tx: mpsc::Sender<WireMessage>,
        endpoint_ip: String,
    ) {
        let id = self.id.clone();
        let flags = self.flags.clone();
        let scorer = self.scorer.clone();
        let endpoint_port = self.executor_port;
        let state = self.state.clone();

        tokio::spawn(async move {
            let reply = if flags.executing() {
                tracing::info!("Busy executing, declining bid");
                WireMessage::new(MessageType::SlmBidResponse)
                    .with_agent(id)
                    .with_status(status::ERR_UNAVAILABLE)
            } else {
                {
                    let mut s = state.lock();
                    if *s == AgentState::Idle {
                        *s = AgentState::Bidding;
                    }
                }

                let prompt = request.text().to_string();
                let scored = tokio::task::spawn_blocking(move || {
                    let snapshot = probes::snapshot();
                    let score =
                        scorer.score_prompt(snapshot.cpu_load * 100.0, snapshot.ram_pct, &prompt);
                    (snapshot, score)
                })
                .await;

                {
                    let mut s = state.lock();
                    if *s == AgentState::Bidding {
                        *s = AgentState::Idle;
                    }
                }

                match scored {
                    Ok((snapshot, score)) => {
                        let (x, y, z, w, total) = compose_bid(&snapshot, score);
                        tracing::info!(
                            total = %format!("{:.3}", total),
                            predicted = %format!("{:.3}", score),
                            "Submitting bid"
                        );
                        WireMessage::new(MessageType::SlmBidResponse)
                            .with_agent(id)
                            .with_status(status::SUCCESS)
                            .with_capability(flags.has_accelerator, flags.accelerator_idle())
                            .with_bid(x, y, z, w, total)
                            .with_endpoint(endpoint_ip, endpoint_port)
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Bid scoring failed, declining");
                        WireMessage::new(MessageType::SlmBidResponse)
                            .with_agent(id)
                            .with_status(status::ERR_UNAVAILABLE)
                    }
                }
            };

            let _ = out_tx.send(reply).await;
        });
    }

    /// Handle one REPL command; false ends the session.
    async fn handle_command(
        &self,
        line: &str,
        pending: &mut Option<PendingJob>,
        out_tx: &mpsc::Sender<WireMessage>,
        local_ip: &str,
    ) -> bool {
        match line {
            "" => true,
            "exit" | "quit" => false,
            "help" => {
                println!("Available commands:");
                println!("  prompt <text>    - Run a prompt on the best device");
                println!("  classify <path>  - Classify an image on the best device");
                println!("  exit             - Exit agent");
                true
            }
            _ if line.starts_with("prompt ") => {
                let text = line["prompt ".len()..].trim().trim_matches('"').to_string();
                if text.is_empty() {
                    println!("Usage: prompt <text>");
                    return true;
                }
                self.submit(JobPayload::Prompt(text), pending, out_tx, local_ip)
                    .await;
                true
            }
            _ if line.starts_with("classify ") => {
                let path = line["classify ".len()..].trim().to_string();
                match tokio::fs::read(&path).await {
                    Ok(bytes) => {
                        let encoded = crate::protocol::base64::encode(&bytes);
                        self.submit(JobPayload::Classify { encoded }, pending, out_tx, local_ip)
                            .await;
                    }
                    Err(e) => println!("Cannot read {}: {}", path, e),
                }
                true
            }
            other => {
                println!("Unknown command: {}", other);
                println!("Type 'help' for list of commands");
                true
            }
        }
    }

    /// Submit a prompt request to the coordinator.
    async fn submit(
        &self,
        payload: JobPayload,
        pending: &mut Option<PendingJob>,
        out_tx: &mpsc::Sender<WireMessage>,
        local_ip: &str,
    ) {
        if pending.is_some() {
            println!("A request is already in flight, wait for its result.");
            return;
        }

        let text = match &payload {
            JobPayload::Prompt(text) => text.clone(),
            JobPayload::Classify { .. } => "image classification".to_string(),
        };
        println!("[SLM] Requesting execution for: {}", text);

        let msg = WireMessage::new(MessageType::SlmPrompt)
            .with_agent(self.id.clone())
            .with_text(text)
            .with_endpoint(local_ip.to_string(), self.executor_port);

        if out_tx.send(msg).await.is_err() {
            println!("Connection to coordinator lost.");
            return;
        }
        *pending = Some(PendingJob { payload });
    }

    /// React to the coordinator's winner announcement: dial the winner,
    /// run the job there, print the result.
    fn spawn_job_dispatch(&self, response: WireMessage, job: PendingJob) {
        let execute_timeout = self.cfg.execute_timeout;

        tokio::spawn(async move {
            if !response.is_success() {
                println!(
                    "Error: no executors available (status {})",
                    response.status_or_success()
                );
                return;
            }
            let Some((ip, port)) = response.endpoint() else {
                println!("Error: winner announcement carried no endpoint");
                return;
            };

            println!("[SLM] Selected executor: {}:{}", ip, port);
            match execute_on(&ip, port, job, execute_timeout).await {
                Ok(result) => println!("[SLM] Result: {}", result),
                Err(e) => {
                    e.log();
                    println!("[SLM] Execution failed: {}", e.user_message());
                }
            }
        });
    }
}

/// Dial the winning executor and run the job over a direct connection.
async fn execute_on(
    ip: &str,
    port: u16,
    job: PendingJob,
    execute_timeout: Duration,
) -> Result<String> {
    let stream = timeout(Duration::from_secs(5), TcpStream::connect((ip, port))).await??;
    let (read_half, write_half) = stream.into_split();
    let mut reader = FramedRead::new(read_half, JsonFrameCodec::new());
    let mut writer = FramedWrite::new(write_half, JsonFrameCodec::new());

    let request = match job.payload {
        JobPayload::Prompt(text) => WireMessage::new(MessageType::SlmExecute)
            .with_subtask("generate")
            .with_text(text),
        JobPayload::Classify { encoded } => WireMessage::new(MessageType::SlmExecute)
            .with_subtask("classify")
            .with_data(serde_json::json!({ "image_base64": encoded })),
    }
    .with_task(Uuid::new_v4().to_string());

    writer.send(request).await?;

    match timeout(execute_timeout, reader.next()).await? {
        Some(Ok(result)) if result.is_success() => Ok(result.text().to_string()),
        Some(Ok(result)) => Err(SwarmError::new(
            ErrorCode::RunnerFailed,
            format!(
                "Executor returned status {}: {}",
                result.status_or_success(),
                result.text()
            ),
        )),
        _ => Err(SwarmError::new(
            ErrorCode::ConnectionClosed,
            "Executor connection closed before replying",
        )),
    }
}

/// Post a STATUS report with fresh metrics at every interval.
async fn heartbeat_loop(
    id: String,
    flags: DeviceFlags,
    out_tx: mpsc::Sender<WireMessage>,
    interval: Duration,
) {
    let start = tokio::time::Instant::now() + interval;
    let mut ticker = tokio::time::interval_at(start, interval);

    loop {
        ticker.tick().await;
        let snapshot = match tokio::task::spawn_blocking(probes::snapshot).await {
            Ok(snapshot) => snapshot,
            Err(_) => continue,
        };
        let msg = WireMessage::new(MessageType::Status)
            .with_agent(id.clone())
            .with_capability(flags.has_accelerator, flags.accelerator_idle())
            .with_data(serde_json::json!({ "metrics": snapshot }));
        if out_tx.send(msg).await.is_err() {
            break;
        }
        tracing::trace!("Status heartbeat sent");
    }
}
