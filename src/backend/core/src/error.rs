//! Error handling for EdgeSwarm.
//!
//! This module provides:
//! - A comprehensive error type with context and chaining
//! - Machine-readable error codes grouped by failure domain
//! - Wire status mapping for protocol replies
//! - User-friendly messages vs detailed internal messages
//! - Error logging with tracing integration
//! - Metrics integration for error tracking

use std::borrow::Cow;
use std::fmt;

use metrics::counter;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};

use crate::protocol::status;

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for EdgeSwarm operations.
pub type Result<T> = std::result::Result<T, SwarmError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes.
///
/// These codes are stable and can be used for programmatic error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Transport Errors (1000-1099)
    ConnectFailed,
    BindFailed,
    SendFailed,
    RecvFailed,
    ConnectionClosed,

    // Protocol Errors (1100-1199)
    MalformedFrame,
    UnexpectedMessage,
    SlotStateMismatch,

    // Auction Errors (1200-1299)
    NoBidsReceived,
    BidTimeout,
    RegistryFull,
    DuplicateWorker,
    WorkerNotFound,

    // Model Errors (1300-1399)
    SingularMatrix,
    ModelStateCorrupt,

    // External Process Errors (1400-1499)
    PredictorFailed,
    RunnerFailed,

    // Filesystem Errors (1500-1599)
    BundleMissing,
    FileReadFailed,
    FileWriteFailed,
    PermissionDenied,

    // Serialization Errors (2200-2299)
    SerializationError,
    DeserializationError,

    // Configuration Errors (5000-5099)
    ConfigurationError,
    InvalidConfiguration,

    // Internal Errors (9000-9099)
    InternalError,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            // Transport Errors
            Self::ConnectFailed => 1000,
            Self::BindFailed => 1001,
            Self::SendFailed => 1002,
            Self::RecvFailed => 1003,
            Self::ConnectionClosed => 1004,

            // Protocol Errors
            Self::MalformedFrame => 1100,
            Self::UnexpectedMessage => 1101,
            Self::SlotStateMismatch => 1102,

            // Auction Errors
            Self::NoBidsReceived => 1200,
            Self::BidTimeout => 1201,
            Self::RegistryFull => 1202,
            Self::DuplicateWorker => 1203,
            Self::WorkerNotFound => 1204,

            // Model Errors
            Self::SingularMatrix => 1300,
            Self::ModelStateCorrupt => 1301,

            // External Process Errors
            Self::PredictorFailed => 1400,
            Self::RunnerFailed => 1401,

            // Filesystem Errors
            Self::BundleMissing => 1500,
            Self::FileReadFailed => 1501,
            Self::FileWriteFailed => 1502,
            Self::PermissionDenied => 1503,

            // Serialization Errors
            Self::SerializationError => 2200,
            Self::DeserializationError => 2201,

            // Configuration Errors
            Self::ConfigurationError => 5000,
            Self::InvalidConfiguration => 5001,

            // Internal Errors
            Self::InternalError => 9000,
        }
    }

    /// Get the wire status code sent in protocol replies for this error.
    pub const fn wire_status(&self) -> u16 {
        match self {
            // Invalid operation (405): the peer sent something we cannot accept
            Self::MalformedFrame
            | Self::UnexpectedMessage
            | Self::SlotStateMismatch
            | Self::DuplicateWorker => status::ERR_INVALID,

            // Everything else surfaces as unavailability (503)
            _ => status::ERR_UNAVAILABLE,
        }
    }

    /// Check if this error is retryable.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectFailed
                | Self::SendFailed
                | Self::RecvFailed
                | Self::ConnectionClosed
                | Self::BidTimeout
                | Self::PredictorFailed
                | Self::RunnerFailed
        )
    }

    /// Get the error category for grouping.
    pub const fn category(&self) -> &'static str {
        match self.numeric_code() {
            1000..=1099 => "transport",
            1100..=1199 => "protocol",
            1200..=1299 => "auction",
            1300..=1399 => "model",
            1400..=1499 => "external",
            1500..=1599 => "filesystem",
            2200..=2299 => "serialization",
            5000..=5099 => "configuration",
            9000..=9099 => "internal",
            _ => "unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Severity
// ═══════════════════════════════════════════════════════════════════════════════

/// Severity level for errors (affects logging).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Peer misbehavior or expected declines (logged and discarded)
    Low,
    /// Operational issues (timeouts, empty auctions, process fallbacks)
    Medium,
    /// System errors (model state, filesystem)
    High,
    /// Startup misconfiguration and internal bugs
    Critical,
}

impl ErrorSeverity {
    /// Get severity based on error code.
    pub const fn from_code(code: &ErrorCode) -> Self {
        match code {
            // Low severity - protocol noise, worker churn
            ErrorCode::MalformedFrame
            | ErrorCode::UnexpectedMessage
            | ErrorCode::SlotStateMismatch
            | ErrorCode::DuplicateWorker
            | ErrorCode::WorkerNotFound
            | ErrorCode::ConnectionClosed => Self::Low,

            // Medium severity - operational
            ErrorCode::ConnectFailed
            | ErrorCode::SendFailed
            | ErrorCode::RecvFailed
            | ErrorCode::NoBidsReceived
            | ErrorCode::BidTimeout
            | ErrorCode::RegistryFull
            | ErrorCode::SingularMatrix
            | ErrorCode::PredictorFailed
            | ErrorCode::RunnerFailed => Self::Medium,

            // High severity - system errors
            ErrorCode::BindFailed
            | ErrorCode::ModelStateCorrupt
            | ErrorCode::BundleMissing
            | ErrorCode::FileReadFailed
            | ErrorCode::FileWriteFailed
            | ErrorCode::PermissionDenied
            | ErrorCode::SerializationError
            | ErrorCode::DeserializationError => Self::High,

            // Critical severity
            ErrorCode::ConfigurationError
            | ErrorCode::InvalidConfiguration
            | ErrorCode::InternalError => Self::Critical,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The main error type for EdgeSwarm.
///
/// This error type supports:
/// - Structured error codes
/// - Error chaining with a source
/// - User-friendly vs internal messages
/// - Wire status mapping
/// - Metrics integration
#[derive(Error, Debug)]
pub struct SwarmError {
    /// Machine-readable error code
    code: ErrorCode,

    /// User-friendly error message (safe to put on the wire)
    user_message: Cow<'static, str>,

    /// Detailed internal message (for logging only)
    internal_message: Option<String>,

    /// The source error that caused this error
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for SwarmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.user_message)?;
        if let Some(ref internal) = self.internal_message {
            write!(f, " (internal: {})", internal)?;
        }
        Ok(())
    }
}

impl SwarmError {
    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a new error with code and user message.
    pub fn new(code: ErrorCode, user_message: impl Into<Cow<'static, str>>) -> Self {
        let error = Self {
            code,
            user_message: user_message.into(),
            internal_message: None,
            source: None,
        };
        error.record_metrics();
        error
    }

    /// Create an error with both user and internal messages.
    pub fn with_internal(
        code: ErrorCode,
        user_message: impl Into<Cow<'static, str>>,
        internal_message: impl Into<String>,
    ) -> Self {
        let mut error = Self::new(code, user_message);
        error.internal_message = Some(internal_message.into());
        error
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::InternalError,
            "An internal error occurred",
            message,
        )
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::ConfigurationError, message)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Builder Methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a source error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Get the user-friendly message.
    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    /// Get the internal message (if any).
    pub fn internal_message(&self) -> Option<&str> {
        self.internal_message.as_deref()
    }

    /// Get the wire status code for protocol replies.
    pub fn wire_status(&self) -> u16 {
        self.code.wire_status()
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    /// Get the error severity.
    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::from_code(&self.code)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    /// Log this error with appropriate severity.
    pub fn log(&self) {
        let code = self.code.to_string();
        let category = self.code.category();

        match self.severity() {
            ErrorSeverity::Critical => {
                error!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    source = ?self.source,
                    "CRITICAL ERROR"
                );
            }
            ErrorSeverity::High => {
                error!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    "High severity error"
                );
            }
            ErrorSeverity::Medium => {
                warn!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    "Medium severity error"
                );
            }
            ErrorSeverity::Low => {
                tracing::debug!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    "Low severity error"
                );
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Metrics
    // ─────────────────────────────────────────────────────────────────────────

    /// Record error metrics.
    fn record_metrics(&self) {
        counter!(
            "edgeswarm_errors_total",
            "code" => self.code.to_string(),
            "category" => self.code.category().to_string(),
            "retryable" => self.is_retryable().to_string(),
        )
        .increment(1);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// From Implementations for Common Error Types
// ═══════════════════════════════════════════════════════════════════════════════

impl From<std::io::Error> for SwarmError {
    fn from(error: std::io::Error) -> Self {
        use std::io::ErrorKind;

        let (code, user_msg) = match error.kind() {
            ErrorKind::NotFound => (ErrorCode::FileReadFailed, "File or resource not found"),
            ErrorKind::PermissionDenied => (ErrorCode::PermissionDenied, "Permission denied"),
            ErrorKind::TimedOut => (ErrorCode::RecvFailed, "Socket operation timed out"),
            ErrorKind::AddrInUse | ErrorKind::AddrNotAvailable => {
                (ErrorCode::BindFailed, "Failed to bind socket")
            }
            ErrorKind::ConnectionRefused => (ErrorCode::ConnectFailed, "Connection refused"),
            ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof => (ErrorCode::ConnectionClosed, "Connection closed"),
            _ => (ErrorCode::InternalError, "An I/O error occurred"),
        };

        Self::with_internal(code, user_msg, error.to_string()).with_source(error)
    }
}

impl From<serde_json::Error> for SwarmError {
    fn from(error: serde_json::Error) -> Self {
        let code = if error.is_syntax() || error.is_data() || error.is_eof() {
            ErrorCode::DeserializationError
        } else {
            ErrorCode::SerializationError
        };

        Self::with_internal(code, "Failed to process JSON data", error.to_string())
            .with_source(error)
    }
}

impl From<config::ConfigError> for SwarmError {
    fn from(error: config::ConfigError) -> Self {
        let (code, user_msg) = match &error {
            config::ConfigError::NotFound(_) => (
                ErrorCode::ConfigurationError,
                "Required configuration not found",
            ),
            config::ConfigError::PathParse(_) | config::ConfigError::FileParse { .. } => (
                ErrorCode::InvalidConfiguration,
                "Configuration file is invalid",
            ),
            _ => (
                ErrorCode::ConfigurationError,
                "Configuration error occurred",
            ),
        };

        Self::with_internal(code, user_msg, error.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for SwarmError {
    fn from(error: tokio::time::error::Elapsed) -> Self {
        Self::with_internal(ErrorCode::BidTimeout, "Deadline expired", error.to_string())
            .with_source(error)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Convenience Constructors for Domain Errors
// ═══════════════════════════════════════════════════════════════════════════════

impl SwarmError {
    // ─────────────────────────────────────────────────────────────────────────
    // Protocol Errors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a malformed frame error.
    pub fn malformed_frame(details: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::MalformedFrame,
            "Received a malformed protocol frame",
            details,
        )
    }

    /// Create an unexpected message error.
    pub fn unexpected_message(kind: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::UnexpectedMessage,
            format!("Unexpected message type: {}", kind),
        )
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Auction Errors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a no-bids error.
    pub fn no_bids(auction_id: u64) -> Self {
        Self::new(
            ErrorCode::NoBidsReceived,
            format!("Auction {} collected no valid bids", auction_id),
        )
    }

    /// Create a registry-full error.
    pub fn registry_full(capacity: usize) -> Self {
        Self::new(
            ErrorCode::RegistryFull,
            format!("Worker registry is at capacity ({})", capacity),
        )
    }

    /// Create a duplicate worker error.
    pub fn duplicate_worker(id: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::DuplicateWorker,
            format!("Worker id already registered: {}", id),
        )
    }

    /// Create a worker-not-found error.
    pub fn worker_not_found(id: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::WorkerNotFound,
            format!("Worker not found: {}", id),
        )
    }

    /// Create a send-failed error.
    pub fn send_failed(worker: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::SendFailed,
            format!("Failed to send to worker {}", worker),
        )
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Model Errors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a singular matrix error.
    pub fn singular_matrix() -> Self {
        Self::new(
            ErrorCode::SingularMatrix,
            "Covariance matrix is singular or near-singular",
        )
    }

    /// Create a model state error.
    pub fn model_state(details: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::ModelStateCorrupt,
            "Persisted model state is unreadable",
            details,
        )
    }

    // ─────────────────────────────────────────────────────────────────────────
    // External Process Errors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a runner failure error.
    pub fn runner_failed(details: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::RunnerFailed,
            "Model runner invocation failed",
            details,
        )
    }

    /// Create a bundle-missing error.
    pub fn bundle_missing(path: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::BundleMissing,
            format!("Classification bundle not found at {}", path),
        )
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
