//! The central coordinator.
//!
//! Serves a single TCP port. Each accepted connection must open with a
//! registration; from then on the connection's handler owns the inbound
//! stream, routing bid responses to the worker's slot and spawning a
//! detached task per prompt so the handler keeps draining frames while
//! auctions are in flight.
//!
//! Lock discipline: the registry lock is acquired before any slot and is
//! never held across an await.

pub mod auction;
pub mod registry;
pub mod slot;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::config::CoordinatorConfig;
use crate::error::Result;
use crate::protocol::{status, JsonFrameCodec, MessageType, WireMessage};

pub use auction::{select_winner, CollectedBid};
pub use registry::{Registry, WorkerEntry};
pub use slot::BidSlot;

/// Bookkeeping for an in-flight auction.
#[derive(Debug, Clone)]
pub struct ActiveAuction {
    pub requester: String,
    pub started_at: DateTime<Utc>,
}

/// The coordinator's shared state.
pub struct Coordinator {
    config: CoordinatorConfig,
    registry: Arc<Registry>,
    auction_seq: AtomicU64,
    active_auctions: DashMap<u64, ActiveAuction>,
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig) -> Self {
        let registry = Arc::new(Registry::new(config.max_workers));
        Self {
            config,
            registry,
            auction_seq: AtomicU64::new(1),
            active_auctions: DashMap::new(),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Number of auctions currently collecting bids.
    pub fn active_auction_count(&self) -> usize {
        self.active_auctions.len()
    }

    /// Bind the configured listen address.
    pub async fn bind(&self) -> Result<TcpListener> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        tracing::info!(address = %addr, "Coordinator listening");
        Ok(listener)
    }

    /// Accept loop; runs until the listener fails.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        loop {
            let (stream, peer) = listener.accept().await?;
            tracing::debug!(peer = %peer, "Connection accepted");
            let coordinator = self.clone();
            tokio::spawn(async move {
                coordinator.handle_connection(stream, peer.ip()).await;
            });
        }
    }

    /// Own one worker connection from registration to eviction.
    async fn handle_connection(self: Arc<Self>, stream: TcpStream, peer_ip: std::net::IpAddr) {
        let (read_half, write_half) = stream.into_split();
        let mut reader = FramedRead::new(read_half, JsonFrameCodec::new());
        let mut writer = FramedWrite::new(write_half, JsonFrameCodec::new());

        // First frame must be a registration.
        let registration = match reader.next().await {
            Some(Ok(msg)) if msg.kind == MessageType::RegClient => msg,
            Some(Ok(msg)) => {
                tracing::warn!(peer = %peer_ip, kind = %msg.kind, "First frame was not a registration, closing");
                return;
            }
            _ => {
                tracing::debug!(peer = %peer_ip, "Connection closed before registering");
                return;
            }
        };

        if registration.agent_id.is_empty() {
            tracing::warn!(peer = %peer_ip, "Registration without an agent id, closing");
            let _ = writer.send(WireMessage::ack(status::ERR_INVALID)).await;
            return;
        }

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<WireMessage>(32);
        let entry = Arc::new(registry::WorkerEntry::from_registration(
            &registration,
            peer_ip,
            outbound_tx,
        ));

        if let Err(e) = self.registry.register(entry.clone()) {
            e.log();
            let _ = writer.send(WireMessage::ack(e.wire_status())).await;
            return;
        }

        // The writer task owns the socket's write half; everything else
        // queues through the entry's channel.
        let writer_worker = entry.id.clone();
        let writer_task = tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                if let Err(e) = writer.send(msg).await {
                    tracing::debug!(worker = %writer_worker, error = %e, "Write failed, stopping writer");
                    break;
                }
            }
        });

        if entry.send(WireMessage::ack(status::SUCCESS)).await.is_err() {
            self.registry.remove(&entry.id);
            return;
        }

        // Inbound demultiplexer.
        while let Some(frame) = reader.next().await {
            let msg = match frame {
                Ok(msg) => msg,
                Err(e) => {
                    tracing::debug!(worker = %entry.id, error = %e, "Read failed, evicting");
                    break;
                }
            };

            match msg.kind {
                MessageType::SlmBidResponse | MessageType::Bid => {
                    if !entry.slot.fulfill(msg) {
                        tracing::debug!(
                            worker = %entry.id,
                            "Bid response with no armed slot, discarding"
                        );
                    }
                }
                MessageType::Status => {
                    entry.apply_status(&msg);
                }
                MessageType::SlmPrompt => {
                    // Detach so this handler keeps draining bid responses
                    // while the auction waits on other workers.
                    let coordinator = self.clone();
                    let requester = entry.clone();
                    tokio::spawn(async move {
                        coordinator.dispatch_prompt(msg, requester).await;
                    });
                }
                other => {
                    tracing::debug!(worker = %entry.id, kind = %other, "Unsupported message type");
                    let _ = entry.send(WireMessage::ack(status::ERR_INVALID)).await;
                }
            }
        }

        // Read path failure or EOF: evict and close.
        self.registry.remove(&entry.id);
        drop(entry);
        writer_task.abort();
    }

    /// Run one auction and deliver its single `PromptResponse`.
    async fn dispatch_prompt(&self, prompt: WireMessage, requester: Arc<WorkerEntry>) {
        let auction_id = self.auction_seq.fetch_add(1, Ordering::Relaxed);
        self.active_auctions.insert(
            auction_id,
            ActiveAuction {
                requester: requester.id.clone(),
                started_at: Utc::now(),
            },
        );

        let response =
            auction::run(&self.registry, &self.config, auction_id, &prompt, &requester).await;

        self.active_auctions.remove(&auction_id);

        if requester.send(response).await.is_err() {
            tracing::warn!(
                auction_id,
                requester = %requester.id,
                "Could not deliver auction outcome to requester"
            );
        }
    }
}
