//! End-to-end dispatch tests over loopback TCP.
//!
//! Scripted workers speak the raw wire protocol against a live
//! coordinator: registration, fast path, auctions with ties, timeouts,
//! declines, duplicate registrations and status-driven state.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, FramedWrite};

use edgeswarm_core::config::CoordinatorConfig;
use edgeswarm_core::coordinator::Coordinator;
use edgeswarm_core::protocol::{status, JsonFrameCodec, MessageType, WireMessage};

/// Start a coordinator on an ephemeral port with tight test deadlines.
async fn start_coordinator(bid_timeout: Duration) -> (Arc<Coordinator>, u16) {
    let config = CoordinatorConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        max_workers: 100,
        bid_timeout,
        endpoint_fetch_timeout: bid_timeout,
    };
    let coordinator = Arc::new(Coordinator::new(config));
    let listener = coordinator.bind().await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(coordinator.clone().serve(listener));
    (coordinator, port)
}

/// A scripted worker speaking the raw protocol.
struct TestWorker {
    reader: FramedRead<OwnedReadHalf, JsonFrameCodec>,
    writer: FramedWrite<OwnedWriteHalf, JsonFrameCodec>,
    id: String,
}

impl TestWorker {
    async fn connect(port: u16) -> (
        FramedRead<OwnedReadHalf, JsonFrameCodec>,
        FramedWrite<OwnedWriteHalf, JsonFrameCodec>,
    ) {
        let stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let (read_half, write_half) = stream.into_split();
        (
            FramedRead::new(read_half, JsonFrameCodec::new()),
            FramedWrite::new(write_half, JsonFrameCodec::new()),
        )
    }

    /// Register and consume the acknowledgment.
    async fn register(port: u16, id: &str, has_accel: bool, npu_free: bool) -> Self {
        let (mut reader, mut writer) = Self::connect(port).await;
        writer
            .send(
                WireMessage::new(MessageType::RegClient)
                    .with_agent(id)
                    .with_capability(has_accel, npu_free),
            )
            .await
            .unwrap();
        let ack = reader.next().await.unwrap().unwrap();
        assert!(ack.is_success(), "registration refused for {}", id);
        Self {
            reader,
            writer,
            id: id.to_string(),
        }
    }

    async fn send(&mut self, msg: WireMessage) {
        self.writer.send(msg).await.unwrap();
    }

    async fn recv(&mut self) -> WireMessage {
        tokio::time::timeout(Duration::from_secs(5), self.reader.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("connection closed")
            .expect("frame error")
    }

    async fn recv_within(&mut self, window: Duration) -> Option<WireMessage> {
        match tokio::time::timeout(window, self.reader.next()).await {
            Ok(Some(Ok(msg))) => Some(msg),
            _ => None,
        }
    }

    /// Submit a prompt with this worker's (fake) executor endpoint.
    async fn submit_prompt(&mut self, text: &str, ip: &str, port: u16) {
        let id = self.id.clone();
        self.send(
            WireMessage::new(MessageType::SlmPrompt)
                .with_agent(id)
                .with_text(text)
                .with_endpoint(ip, port),
        )
        .await;
    }

    /// Answer one inbound bid request with a successful bid.
    async fn answer_bid(&mut self, total: f64, ip: &str, port: u16) {
        let request = self.recv().await;
        assert_eq!(request.kind, MessageType::SlmBidRequest);
        let id = self.id.clone();
        self.send(
            WireMessage::new(MessageType::SlmBidResponse)
                .with_agent(id)
                .with_status(status::SUCCESS)
                .with_bid(0.5, 0.5, 0.5, 0.5, total)
                .with_endpoint(ip, port),
        )
        .await;
    }

    /// Keep answering bid requests with a fixed bid until the winner
    /// announcement (an ACK) arrives; returns that announcement.
    async fn serve_bids_until_ack(&mut self, total: f64, ip: &str, port: u16) -> WireMessage {
        loop {
            let msg = self.recv().await;
            match msg.kind {
                MessageType::SlmBidRequest => {
                    let id = self.id.clone();
                    self.send(
                        WireMessage::new(MessageType::SlmBidResponse)
                            .with_agent(id)
                            .with_status(status::SUCCESS)
                            .with_bid(0.5, 0.5, 0.5, 0.5, total)
                            .with_endpoint(ip, port),
                    )
                    .await;
                }
                MessageType::Ack => return msg,
                _ => {}
            }
        }
    }

    /// Answer one inbound bid request with a decline.
    async fn decline_bid(&mut self) {
        let request = self.recv().await;
        assert_eq!(request.kind, MessageType::SlmBidRequest);
        let id = self.id.clone();
        self.send(
            WireMessage::new(MessageType::SlmBidResponse)
                .with_agent(id)
                .with_status(status::ERR_UNAVAILABLE),
        )
        .await;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Fast path
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn fast_path_selects_requesters_own_accelerator_without_bidding() {
    let (_coordinator, port) = start_coordinator(Duration::from_millis(500)).await;

    let mut a = TestWorker::register(port, "A", true, true).await;
    let mut b = TestWorker::register(port, "B", false, false).await;

    a.submit_prompt("Hi", "10.1.2.3", 7777).await;

    let reply = a.recv().await;
    assert_eq!(reply.kind, MessageType::Ack);
    assert!(reply.is_success());
    assert_eq!(reply.endpoint(), Some(("10.1.2.3".to_string(), 7777)));

    // No bid solicitation was broadcast.
    assert!(b.recv_within(Duration::from_millis(200)).await.is_none());
}

#[tokio::test]
async fn fast_path_fetches_remote_winner_endpoint() {
    let (_coordinator, port) = start_coordinator(Duration::from_millis(500)).await;

    let mut requester = TestWorker::register(port, "req", false, false).await;
    let mut npu = TestWorker::register(port, "npu-box", true, true).await;

    requester.submit_prompt("Hi", "10.0.0.1", 1111).await;

    // The accelerator owner gets a single endpoint-fetch solicitation.
    npu.answer_bid(0.9, "10.9.9.9", 4242).await;

    let reply = requester.recv().await;
    assert!(reply.is_success());
    assert_eq!(reply.endpoint(), Some(("10.9.9.9".to_string(), 4242)));
}

#[tokio::test]
async fn fast_path_falls_back_to_registered_address_on_silence() {
    let (_coordinator, port) = start_coordinator(Duration::from_millis(200)).await;

    let mut requester = TestWorker::register(port, "req", false, false).await;
    let _npu = TestWorker::register(port, "npu-box", true, true).await;

    requester.submit_prompt("Hi", "10.0.0.1", 1111).await;

    let reply = requester.recv().await;
    assert!(reply.is_success());
    let (ip, endpoint_port) = reply.endpoint().unwrap();
    assert_eq!(ip, "127.0.0.1");
    assert_eq!(endpoint_port, 0);
}

// ─────────────────────────────────────────────────────────────────────────────
// Auction path
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn auction_tie_breaks_toward_registration_order() {
    let (_coordinator, port) = start_coordinator(Duration::from_millis(800)).await;

    let mut a = TestWorker::register(port, "A", false, false).await;
    let mut b = TestWorker::register(port, "B", false, false).await;
    let mut c = TestWorker::register(port, "C", false, false).await;

    a.submit_prompt("pick one", "10.0.0.1", 1111).await;

    a.answer_bid(0.40, "10.0.0.1", 1001).await;
    b.answer_bid(0.40, "10.0.0.2", 1002).await;
    c.answer_bid(0.35, "10.0.0.3", 1003).await;

    let reply = a.recv().await;
    assert!(reply.is_success());
    assert_eq!(reply.endpoint(), Some(("10.0.0.1".to_string(), 1001)));
    assert_eq!(reply.agent_id, "A");
}

#[tokio::test]
async fn auction_counts_remaining_bids_after_a_timeout() {
    let (_coordinator, port) = start_coordinator(Duration::from_millis(400)).await;

    let mut a = TestWorker::register(port, "A", false, false).await;
    let mut b = TestWorker::register(port, "B", false, false).await;
    let mut c = TestWorker::register(port, "C", false, false).await;

    a.submit_prompt("who's up", "10.0.0.1", 1111).await;

    a.answer_bid(0.20, "10.0.0.1", 1001).await;
    c.answer_bid(0.35, "10.0.0.3", 1003).await;
    // B receives the solicitation but never answers.
    let request = b.recv().await;
    assert_eq!(request.kind, MessageType::SlmBidRequest);

    let reply = a.recv().await;
    assert!(reply.is_success());
    assert_eq!(reply.agent_id, "C");
    assert_eq!(reply.endpoint(), Some(("10.0.0.3".to_string(), 1003)));
}

#[tokio::test]
async fn auction_with_only_declines_is_unavailable() {
    let (_coordinator, port) = start_coordinator(Duration::from_millis(400)).await;

    let mut a = TestWorker::register(port, "A", false, false).await;
    let mut b = TestWorker::register(port, "B", false, false).await;

    a.submit_prompt("anyone?", "10.0.0.1", 1111).await;

    a.decline_bid().await;
    b.decline_bid().await;

    let reply = a.recv().await;
    assert_eq!(reply.kind, MessageType::Ack);
    assert_eq!(reply.status_or_success(), status::ERR_UNAVAILABLE);
}

#[tokio::test]
async fn late_bid_is_discarded_and_auction_proceeds() {
    let (_coordinator, port) = start_coordinator(Duration::from_millis(250)).await;

    let mut a = TestWorker::register(port, "A", false, false).await;
    let mut b = TestWorker::register(port, "B", false, false).await;

    a.submit_prompt("late check", "10.0.0.1", 1111).await;

    a.answer_bid(0.30, "10.0.0.1", 1001).await;
    let request = b.recv().await;
    assert_eq!(request.kind, MessageType::SlmBidRequest);

    // B answers well after the deadline.
    tokio::time::sleep(Duration::from_millis(600)).await;
    let id = b.id.clone();
    b.send(
        WireMessage::new(MessageType::SlmBidResponse)
            .with_agent(id)
            .with_status(status::SUCCESS)
            .with_bid(0.9, 0.9, 0.9, 0.9, 0.99)
            .with_endpoint("10.0.0.2", 1002),
    )
    .await;

    let reply = a.recv().await;
    assert!(reply.is_success());
    assert_eq!(reply.agent_id, "A");
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry behavior
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn duplicate_registration_is_rejected() {
    let (coordinator, port) = start_coordinator(Duration::from_millis(400)).await;

    let _first = TestWorker::register(port, "edge-1", false, false).await;

    let (mut reader, mut writer) = TestWorker::connect(port).await;
    writer
        .send(WireMessage::new(MessageType::RegClient).with_agent("edge-1"))
        .await
        .unwrap();
    let ack = reader.next().await.unwrap().unwrap();
    assert_eq!(ack.status_or_success(), status::ERR_INVALID);

    assert_eq!(coordinator.registry().len(), 1);
}

#[tokio::test]
async fn first_frame_must_be_a_registration() {
    let (coordinator, port) = start_coordinator(Duration::from_millis(400)).await;

    let (mut reader, mut writer) = TestWorker::connect(port).await;
    writer
        .send(WireMessage::new(MessageType::SlmPrompt).with_text("hello"))
        .await
        .unwrap();

    // The coordinator closes without registering the connection.
    let next = tokio::time::timeout(Duration::from_secs(2), reader.next()).await;
    assert!(matches!(next, Ok(None)));
    assert_eq!(coordinator.registry().len(), 0);
}

#[tokio::test]
async fn disconnect_evicts_the_worker() {
    let (coordinator, port) = start_coordinator(Duration::from_millis(400)).await;

    let worker = TestWorker::register(port, "volatile", false, false).await;
    assert_eq!(coordinator.registry().len(), 1);

    drop(worker);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(coordinator.registry().len(), 0);
}

#[tokio::test]
async fn status_update_arms_the_fast_path() {
    let (_coordinator, port) = start_coordinator(Duration::from_millis(300)).await;

    // Accelerator present but busy: the first prompt runs a (failed) auction.
    let mut npu = TestWorker::register(port, "npu-box", true, false).await;
    let mut requester = TestWorker::register(port, "req", false, false).await;

    requester.submit_prompt("round one", "10.0.0.1", 1111).await;
    npu.decline_bid().await;
    requester.decline_bid().await;
    let reply = requester.recv().await;
    assert_eq!(reply.status_or_success(), status::ERR_UNAVAILABLE);

    // The accelerator frees up; a STATUS report mutates the snapshot.
    let id = npu.id.clone();
    npu.send(
        WireMessage::new(MessageType::Status)
            .with_agent(id)
            .with_capability(true, true),
    )
    .await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    requester.submit_prompt("round two", "10.0.0.1", 1111).await;
    npu.answer_bid(0.9, "10.7.7.7", 4040).await;

    let reply = requester.recv().await;
    assert!(reply.is_success());
    assert_eq!(reply.endpoint(), Some(("10.7.7.7".to_string(), 4040)));
}

// ─────────────────────────────────────────────────────────────────────────────
// Concurrency
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn concurrent_prompts_each_get_exactly_one_reply() {
    let (_coordinator, port) = start_coordinator(Duration::from_millis(600)).await;

    let mut a = TestWorker::register(port, "A", false, false).await;
    let mut b = TestWorker::register(port, "B", false, false).await;

    // Two prompts in flight at once, from both workers.
    a.submit_prompt("first", "10.0.0.1", 1111).await;
    b.submit_prompt("second", "10.0.0.2", 2222).await;

    // Each worker serves the solicitations of both auctions (the slot
    // gate serializes them per worker) until its own winner reply lands.
    let (reply_a, reply_b) = tokio::join!(
        a.serve_bids_until_ack(0.6, "10.0.0.1", 1001),
        b.serve_bids_until_ack(0.4, "10.0.0.2", 1002),
    );
    assert!(reply_a.is_success());
    assert!(reply_b.is_success());
    // A's bid is highest in both auctions.
    assert_eq!(reply_a.endpoint(), Some(("10.0.0.1".to_string(), 1001)));
    assert_eq!(reply_b.endpoint(), Some(("10.0.0.1".to_string(), 1001)));
}
