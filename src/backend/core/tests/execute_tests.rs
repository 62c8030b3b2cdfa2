//! Execute-listener tests over loopback TCP.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, FramedWrite};

use edgeswarm_core::agent::{DeviceFlags, Executor, PromptRunner};
use edgeswarm_core::bandit::BidScorer;
use edgeswarm_core::config::{ScoringConfig, VisionConfig};
use edgeswarm_core::protocol::{status, JsonFrameCodec, MessageType, WireMessage};
use edgeswarm_core::vision::ClassifyPipeline;

async fn start_executor(runner_command: Option<String>) -> u16 {
    let executor = Arc::new(Executor::new(
        "exec-test".to_string(),
        DeviceFlags::new(false),
        PromptRunner::new(runner_command),
        ClassifyPipeline::new(VisionConfig::default()),
        Arc::new(BidScorer::from_config(&ScoringConfig::default())),
    ));
    let (listener, port) = Executor::bind().await.unwrap();
    tokio::spawn(executor.accept_loop(listener));
    port
}

async fn roundtrip(port: u16, request: WireMessage) -> WireMessage {
    let stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let (read_half, write_half) = stream.into_split();
    let mut reader = FramedRead::new(read_half, JsonFrameCodec::new());
    let mut writer = FramedWrite::new(write_half, JsonFrameCodec::new());

    writer.send(request).await.unwrap();
    tokio::time::timeout(Duration::from_secs(10), reader.next())
        .await
        .expect("no reply from executor")
        .expect("connection closed")
        .expect("frame error")
}

#[tokio::test]
async fn execute_prompt_returns_result_on_same_connection() {
    let port = start_executor(None).await;

    let reply = roundtrip(
        port,
        WireMessage::new(MessageType::SlmExecute)
            .with_subtask("generate")
            .with_task("t-1")
            .with_text("Hi"),
    )
    .await;

    assert_eq!(reply.kind, MessageType::SlmResult);
    assert!(reply.is_success());
    assert_eq!(reply.text(), "SLM EXECUTION DONE");
    assert_eq!(reply.task_id, "t-1");
}

#[tokio::test]
async fn execute_runs_the_configured_runner() {
    let port = start_executor(Some("printf %s".to_string())).await;

    let reply = roundtrip(
        port,
        WireMessage::new(MessageType::SlmExecute).with_text("echoed back"),
    )
    .await;

    assert!(reply.is_success());
    assert_eq!(reply.text(), "echoed back");
}

#[tokio::test]
async fn classify_without_a_model_yields_an_error_result() {
    // A tiny but valid jpeg payload.
    let img = image::RgbImage::from_pixel(8, 8, image::Rgb([40, 80, 120]));
    let mut bytes = std::io::Cursor::new(Vec::new());
    img.write_to(&mut bytes, image::ImageFormat::Jpeg).unwrap();
    let encoded = edgeswarm_core::protocol::base64::encode(&bytes.into_inner());

    let dir = tempfile::tempdir().unwrap();
    let vision = VisionConfig {
        scratch_dir: dir.path().join("scratch").to_string_lossy().into_owned(),
        bundle_dir: dir.path().join("bundle").to_string_lossy().into_owned(),
        ..Default::default()
    };
    let executor = Arc::new(Executor::new(
        "exec-test".to_string(),
        DeviceFlags::new(false),
        PromptRunner::new(None),
        ClassifyPipeline::new(vision),
        Arc::new(BidScorer::from_config(&ScoringConfig::default())),
    ));
    let (listener, port) = Executor::bind().await.unwrap();
    tokio::spawn(executor.accept_loop(listener));

    let reply = roundtrip(
        port,
        WireMessage::new(MessageType::SlmExecute)
            .with_subtask("classify")
            .with_data(serde_json::json!({ "image_base64": encoded })),
    )
    .await;

    assert_eq!(reply.kind, MessageType::SlmResult);
    assert_eq!(reply.status_or_success(), status::ERR_UNAVAILABLE);
    assert!(!reply.text().is_empty());
}

#[tokio::test]
async fn non_execute_message_is_invalid() {
    let port = start_executor(None).await;

    let reply = roundtrip(port, WireMessage::new(MessageType::SlmPrompt).with_text("?")).await;
    assert_eq!(reply.status_or_success(), status::ERR_INVALID);
}
