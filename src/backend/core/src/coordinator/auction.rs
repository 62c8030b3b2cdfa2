//! The auction engine.
//!
//! A prompt either short-circuits on the fast path (some worker
//! advertises an idle accelerator) or runs a sealed-bid auction: the bid
//! request fans out to every worker (requester included) and each
//! reply is awaited on the worker's slot under its own deadline. The
//! winner is the highest total; ties break toward registration order.
//! Exactly one reply goes back to the requester.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;

use crate::config::CoordinatorConfig;
use crate::coordinator::registry::{Registry, WorkerEntry};
use crate::protocol::{status, MessageType, WireMessage};

/// A validated bid collected during an auction.
#[derive(Debug, Clone)]
pub struct CollectedBid {
    pub worker_id: String,
    /// Registration-order index, the tie-break key
    pub order: usize,
    pub compute: f64,
    pub memory: f64,
    pub latency: f64,
    pub power: f64,
    pub total: f64,
    pub ip: String,
    pub port: u16,
}

/// Send one bid request and wait on the worker's slot until the deadline.
///
/// `None` covers every way a worker drops out: send failure, eviction
/// mid-wait, deadline expiry. A response arriving after the deadline is
/// discarded by the disarmed slot even though the read succeeded.
async fn solicit(
    entry: &Arc<WorkerEntry>,
    request: WireMessage,
    deadline: Duration,
) -> Option<WireMessage> {
    let guard = entry.slot.acquire().await;
    let rx = guard.arm();

    if entry.send(request).await.is_err() {
        tracing::warn!(worker = %entry.id, "Failed to send bid request, excluding from auction");
        return None;
    }

    match tokio::time::timeout(deadline, rx).await {
        Ok(Ok(response)) => Some(response),
        Ok(Err(_)) => {
            tracing::debug!(worker = %entry.id, "Worker evicted while awaiting bid");
            None
        }
        Err(_) => {
            tracing::warn!(worker = %entry.id, timeout_ms = deadline.as_millis(), "Bid wait timed out");
            None
        }
    }
}

/// Validate a raw response into a collected bid.
fn into_bid(order: usize, entry: &WorkerEntry, response: WireMessage) -> Option<CollectedBid> {
    if response.kind != MessageType::SlmBidResponse {
        tracing::warn!(
            worker = %entry.id,
            kind = %response.kind,
            "Unexpected response type during bid collection, dropping"
        );
        return None;
    }
    if !response.is_success() {
        tracing::debug!(
            worker = %entry.id,
            status = response.status_or_success(),
            "Worker declined to bid"
        );
        return None;
    }

    let (ip, port) = response.endpoint()?;
    let bid = CollectedBid {
        worker_id: entry.id.clone(),
        order,
        compute: response.bid_x?,
        memory: response.bid_y?,
        latency: response.bid_z?,
        power: response.bid_w?,
        total: response.bid_total?,
        ip,
        port,
    };

    tracing::info!(
        worker = %bid.worker_id,
        total = bid.total,
        x = bid.compute,
        y = bid.memory,
        z = bid.latency,
        w = bid.power,
        endpoint = %format!("{}:{}", bid.ip, bid.port),
        "Bid received"
    );
    Some(bid)
}

/// Highest total wins; iteration order keeps ties on the earliest
/// registered worker.
pub fn select_winner(bids: &[CollectedBid]) -> Option<&CollectedBid> {
    let mut best: Option<&CollectedBid> = None;
    for bid in bids {
        match best {
            Some(current) if bid.total <= current.total => {}
            _ => best = Some(bid),
        }
    }
    best
}

/// Run the dispatch decision for one prompt and produce the single
/// `PromptResponse` owed to the requester.
pub(crate) async fn run(
    registry: &Registry,
    config: &CoordinatorConfig,
    auction_id: u64,
    prompt: &WireMessage,
    requester: &Arc<WorkerEntry>,
) -> WireMessage {
    let prompt_text = prompt.text().to_string();
    let workers = registry.snapshot();

    tracing::info!(
        auction_id,
        requester = %requester.id,
        workers = workers.len(),
        prompt_len = prompt_text.len(),
        "Prompt received, scanning for executors"
    );

    // ─────────────────────────────────────────────────────────────────────────
    // Fast path: first idle accelerator in registration order wins outright.
    // ─────────────────────────────────────────────────────────────────────────
    for entry in &workers {
        if !(entry.has_accelerator && entry.accelerator_idle()) {
            continue;
        }

        counter!("edgeswarm_auctions_total", "outcome" => "fast_path").increment(1);
        tracing::info!(auction_id, winner = %entry.id, "Idle accelerator found, bypassing auction");

        if entry.id == requester.id {
            // The requester executes locally on its own declared endpoint.
            if let Some((ip, port)) = prompt.endpoint() {
                return WireMessage::ack(status::SUCCESS)
                    .with_agent(entry.id.clone())
                    .with_endpoint(ip, port);
            }
            return WireMessage::ack(status::SUCCESS)
                .with_agent(entry.id.clone())
                .with_endpoint(entry.addr.to_string(), 0);
        }

        // Fetch the winner's executor endpoint with a bounded wait.
        let request = WireMessage::new(MessageType::SlmBidRequest)
            .with_text(prompt_text.clone())
            .with_capability(true, true);
        let endpoint = match solicit(entry, request, config.endpoint_fetch_timeout).await {
            Some(response) if response.is_success() => response.endpoint(),
            Some(_) => {
                tracing::warn!(auction_id, worker = %entry.id, "Winner declined endpoint fetch, falling back");
                None
            }
            None => {
                tracing::warn!(auction_id, worker = %entry.id, "No endpoint response, falling back");
                None
            }
        };

        let (ip, port) = endpoint.unwrap_or_else(|| (entry.addr.to_string(), 0));
        return WireMessage::ack(status::SUCCESS)
            .with_agent(entry.id.clone())
            .with_endpoint(ip, port);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Auction path: fan out, collect, pick the best total.
    // ─────────────────────────────────────────────────────────────────────────
    let started = std::time::Instant::now();
    let solicitations = workers.iter().enumerate().map(|(order, entry)| {
        let entry = entry.clone();
        let request = WireMessage::new(MessageType::SlmBidRequest).with_text(prompt_text.clone());
        let deadline = config.bid_timeout;
        async move {
            let response = solicit(&entry, request, deadline).await?;
            into_bid(order, &entry, response)
        }
    });

    let bids: Vec<CollectedBid> = futures::future::join_all(solicitations)
        .await
        .into_iter()
        .flatten()
        .collect();

    tracing::info!(
        auction_id,
        bid_count = bids.len(),
        elapsed_ms = started.elapsed().as_millis(),
        "Bid collection complete"
    );

    let Some(winner) = select_winner(&bids) else {
        counter!("edgeswarm_auctions_total", "outcome" => "unavailable").increment(1);
        tracing::warn!(auction_id, "No valid bids received");
        return WireMessage::ack(status::ERR_UNAVAILABLE);
    };

    counter!("edgeswarm_auctions_total", "outcome" => "auction").increment(1);
    tracing::info!(
        auction_id,
        winner = %winner.worker_id,
        total = winner.total,
        endpoint = %format!("{}:{}", winner.ip, winner.port),
        "Winner selected"
    );

    WireMessage::ack(status::SUCCESS)
        .with_agent(winner.worker_id.clone())
        .with_endpoint(winner.ip.clone(), winner.port)
}
