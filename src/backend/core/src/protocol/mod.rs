//! Wire protocol shared by the coordinator, worker agents and executors.
//!
//! A message is a self-contained JSON object; a connection carries a
//! stream of concatenated objects split by [`frame::JsonFrameCodec`].
//! Status codes follow the original HTTP-flavored convention.

pub mod base64;
pub mod frame;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use frame::JsonFrameCodec;

/// Wire status codes.
pub mod status {
    /// Request handled.
    pub const SUCCESS: u16 = 200;
    /// No executor available / resource exhausted.
    pub const ERR_UNAVAILABLE: u16 = 503;
    /// Invalid or unexpected operation.
    pub const ERR_INVALID: u16 = 405;
}

// ═══════════════════════════════════════════════════════════════════════════════
// Message Types
// ═══════════════════════════════════════════════════════════════════════════════

/// Every message type on the wire.
///
/// The SCREAMING_SNAKE family is the SLM dispatch protocol; the lowercase
/// family is spoken by the image pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    /// Worker registration, first message on every control connection
    #[serde(rename = "REG_CLIENT")]
    RegClient,
    /// Generic acknowledgment / reply carrier
    #[serde(rename = "ACK")]
    Ack,
    /// Periodic worker metric report
    #[serde(rename = "STATUS")]
    Status,
    /// Requester asks the coordinator for an executor
    #[serde(rename = "SLM_PROMPT")]
    SlmPrompt,
    /// Coordinator solicits a bid
    #[serde(rename = "SLM_BID_REQUEST")]
    SlmBidRequest,
    /// Worker prices itself
    #[serde(rename = "SLM_BID_RESPONSE")]
    SlmBidResponse,
    /// Requester dispatches a job to the winning executor
    #[serde(rename = "SLM_EXECUTE")]
    SlmExecute,
    /// Executor's reply on the same connection
    #[serde(rename = "SLM_RESULT")]
    SlmResult,

    // Image pipeline family
    #[serde(rename = "register")]
    Register,
    #[serde(rename = "task")]
    Task,
    #[serde(rename = "bid_request")]
    BidRequest,
    #[serde(rename = "bid")]
    Bid,
    #[serde(rename = "result")]
    TaskResult,
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::RegClient => "REG_CLIENT",
            Self::Ack => "ACK",
            Self::Status => "STATUS",
            Self::SlmPrompt => "SLM_PROMPT",
            Self::SlmBidRequest => "SLM_BID_REQUEST",
            Self::SlmBidResponse => "SLM_BID_RESPONSE",
            Self::SlmExecute => "SLM_EXECUTE",
            Self::SlmResult => "SLM_RESULT",
            Self::Register => "register",
            Self::Task => "task",
            Self::BidRequest => "bid_request",
            Self::Bid => "bid",
            Self::TaskResult => "result",
        };
        f.write_str(name)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Metric Snapshot
// ═══════════════════════════════════════════════════════════════════════════════

/// Last-known device resource state, embedded in registrations, STATUS
/// reports and registry entries.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    /// CPU load in [0, 1]
    pub cpu_load: f64,
    /// RAM usage percentage in [0, 100]
    pub ram_pct: f64,
    /// Battery percentage; -1 means no battery (mains powered)
    pub battery: f64,
    /// Storage usage percentage in [0, 100]
    pub storage_pct: f64,
}

impl Default for MetricSnapshot {
    fn default() -> Self {
        Self {
            cpu_load: 0.0,
            ram_pct: 0.0,
            battery: -1.0,
            storage_pct: 0.0,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Wire Message
// ═══════════════════════════════════════════════════════════════════════════════

/// A self-contained protocol message.
///
/// Optional fields are omitted from the serialized object when unset, so
/// each family only carries its own baggage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessage {
    #[serde(rename = "type")]
    pub kind: MessageType,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub agent_id: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub task_id: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub subtask: String,

    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_accel: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub npu_free: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bid_x: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bid_y: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bid_z: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bid_w: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bid_total: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_ip: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_port: Option<u16>,
}

impl WireMessage {
    /// Create an empty message of the given type.
    pub fn new(kind: MessageType) -> Self {
        Self {
            kind,
            agent_id: String::new(),
            task_id: String::new(),
            subtask: String::new(),
            data: serde_json::Value::Null,
            status: None,
            has_accel: None,
            npu_free: None,
            bid_x: None,
            bid_y: None,
            bid_z: None,
            bid_w: None,
            bid_total: None,
            target_ip: None,
            target_port: None,
        }
    }

    /// Create an acknowledgment with the given status.
    pub fn ack(status: u16) -> Self {
        Self::new(MessageType::Ack).with_status(status)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Builders
    // ─────────────────────────────────────────────────────────────────────────

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_agent(mut self, id: impl Into<String>) -> Self {
        self.agent_id = id.into();
        self
    }

    pub fn with_task(mut self, id: impl Into<String>) -> Self {
        self.task_id = id.into();
        self
    }

    pub fn with_subtask(mut self, subtask: impl Into<String>) -> Self {
        self.subtask = subtask.into();
        self
    }

    /// Set the data field to a plain string payload.
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.data = serde_json::Value::String(text.into());
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    pub fn with_endpoint(mut self, ip: impl Into<String>, port: u16) -> Self {
        self.target_ip = Some(ip.into());
        self.target_port = Some(port);
        self
    }

    pub fn with_capability(mut self, has_accel: bool, npu_free: bool) -> Self {
        self.has_accel = Some(has_accel);
        self.npu_free = Some(npu_free);
        self
    }

    pub fn with_bid(mut self, x: f64, y: f64, z: f64, w: f64, total: f64) -> Self {
        self.bid_x = Some(x);
        self.bid_y = Some(y);
        self.bid_z = Some(z);
        self.bid_w = Some(w);
        self.bid_total = Some(total);
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    /// The data field as text, empty when absent or non-string.
    pub fn text(&self) -> &str {
        self.data.as_str().unwrap_or("")
    }

    /// Status code, defaulting to SUCCESS when absent.
    pub fn status_or_success(&self) -> u16 {
        self.status.unwrap_or(status::SUCCESS)
    }

    pub fn is_success(&self) -> bool {
        self.status_or_success() == status::SUCCESS
    }

    /// The advertised (ip, port) endpoint, when both halves are present.
    pub fn endpoint(&self) -> Option<(String, u16)> {
        match (&self.target_ip, self.target_port) {
            (Some(ip), Some(port)) => Some((ip.clone(), port)),
            _ => None,
        }
    }

    /// The metrics object embedded in a registration or STATUS report.
    pub fn metrics(&self) -> Option<MetricSnapshot> {
        self.data
            .get("metrics")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_names() {
        let json = serde_json::to_string(&MessageType::SlmBidRequest).unwrap();
        assert_eq!(json, "\"SLM_BID_REQUEST\"");
        let json = serde_json::to_string(&MessageType::BidRequest).unwrap();
        assert_eq!(json, "\"bid_request\"");
    }

    #[test]
    fn test_roundtrip_bid_response() {
        let msg = WireMessage::new(MessageType::SlmBidResponse)
            .with_agent("edge-3")
            .with_status(status::SUCCESS)
            .with_bid(0.8, 0.7, 0.6, 0.9, 0.74)
            .with_endpoint("192.168.1.17", 40123);

        let json = serde_json::to_string(&msg).unwrap();
        let back: WireMessage = serde_json::from_str(&json).unwrap();

        assert_eq!(back.kind, MessageType::SlmBidResponse);
        assert_eq!(back.agent_id, "edge-3");
        assert!(back.is_success());
        assert_eq!(back.bid_total, Some(0.74));
        assert_eq!(back.endpoint(), Some(("192.168.1.17".to_string(), 40123)));
    }

    #[test]
    fn test_optional_fields_omitted() {
        let msg = WireMessage::new(MessageType::SlmPrompt).with_text("Hi");
        let json = serde_json::to_string(&msg).unwrap();

        assert!(!json.contains("bid_x"));
        assert!(!json.contains("target_ip"));
        assert!(!json.contains("task_id"));
        assert!(json.contains("SLM_PROMPT"));
        assert!(json.contains("Hi"));
    }

    #[test]
    fn test_metrics_extraction() {
        let snapshot = MetricSnapshot {
            cpu_load: 0.42,
            ram_pct: 61.0,
            battery: 88.0,
            storage_pct: 40.0,
        };
        let msg = WireMessage::new(MessageType::Status)
            .with_data(serde_json::json!({ "metrics": snapshot }));

        let parsed = msg.metrics().unwrap();
        assert_eq!(parsed, snapshot);
    }

    #[test]
    fn test_status_defaults_to_success() {
        let msg = WireMessage::new(MessageType::Ack);
        assert!(msg.is_success());
        assert_eq!(msg.status_or_success(), status::SUCCESS);
    }

    #[test]
    fn test_endpoint_requires_both_halves() {
        let mut msg = WireMessage::new(MessageType::Ack);
        msg.target_ip = Some("10.0.0.9".to_string());
        assert!(msg.endpoint().is_none());
        msg.target_port = Some(9000);
        assert!(msg.endpoint().is_some());
    }
}
