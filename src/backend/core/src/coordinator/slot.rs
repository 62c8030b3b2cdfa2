//! Per-worker bid rendezvous slot.
//!
//! Pairs an outstanding bid solicitation (auction side) with the bid
//! response arriving on the worker's control connection (reader side).
//! Slot lifecycle: `idle → armed → fulfilled | timed_out → idle`.
//!
//! The armed state is a single-use channel sender; fulfillment consumes
//! it, so a response can never land outside an armed window and a late
//! response after a timeout is discarded. An async gate serializes
//! auctions that need the same worker: a second auction queues on the
//! gate instead of clobbering the armed slot.

use parking_lot::Mutex;
use tokio::sync::{oneshot, Mutex as AsyncMutex, MutexGuard};

use crate::protocol::WireMessage;

#[derive(Debug, Default)]
pub struct BidSlot {
    /// Serializes solicitations per worker across concurrent auctions.
    gate: AsyncMutex<()>,
    /// `Some` while armed; taken on fulfillment or disarm.
    armed: Mutex<Option<oneshot::Sender<WireMessage>>>,
}

impl BidSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire exclusive solicitation rights on this slot.
    pub async fn acquire(&self) -> SlotGuard<'_> {
        SlotGuard {
            slot: self,
            _gate: self.gate.lock().await,
        }
    }

    /// Deliver a bid response from the connection reader.
    ///
    /// Returns false when the slot is not armed (response discarded).
    pub fn fulfill(&self, msg: WireMessage) -> bool {
        match self.armed.lock().take() {
            Some(tx) => tx.send(msg).is_ok(),
            None => false,
        }
    }

    /// Whether a solicitation is currently outstanding.
    pub fn is_armed(&self) -> bool {
        self.armed.lock().is_some()
    }
}

/// Exclusive access to a slot for the duration of one solicitation.
pub struct SlotGuard<'a> {
    slot: &'a BidSlot,
    _gate: MutexGuard<'a, ()>,
}

impl SlotGuard<'_> {
    /// Arm the slot; the returned receiver resolves when the worker's
    /// connection reader delivers a bid response.
    pub fn arm(&self) -> oneshot::Receiver<WireMessage> {
        let (tx, rx) = oneshot::channel();
        *self.slot.armed.lock() = Some(tx);
        rx
    }

    /// Return the slot to idle after a timeout or send failure; any bid
    /// arriving afterwards is discarded by `fulfill`.
    pub fn disarm(&self) {
        self.slot.armed.lock().take();
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        // The slot never stays armed past its solicitation.
        self.disarm();
    }
}
