//! Configuration management.

use std::time::Duration;

use serde::Deserialize;

use crate::telemetry::LoggingConfig;

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Coordinator configuration
    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    /// Worker agent configuration
    #[serde(default)]
    pub agent: AgentConfig,

    /// Bid scoring configuration
    #[serde(default)]
    pub scoring: ScoringConfig,

    /// Image classification pipeline configuration
    #[serde(default)]
    pub vision: VisionConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CoordinatorConfig {
    /// Listen host
    #[serde(default = "default_host")]
    pub host: String,

    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum number of registered workers
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// How long an auction waits for each worker's bid
    #[serde(with = "humantime_serde", default = "default_bid_timeout")]
    pub bid_timeout: Duration,

    /// How long the fast path waits for an endpoint fetch
    #[serde(with = "humantime_serde", default = "default_endpoint_fetch_timeout")]
    pub endpoint_fetch_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_workers: default_max_workers(),
            bid_timeout: default_bid_timeout(),
            endpoint_fetch_timeout: default_endpoint_fetch_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Interval between status heartbeats to the coordinator
    #[serde(with = "humantime_serde", default = "default_status_interval")]
    pub status_interval: Duration,

    /// Dialback attempts before giving up
    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,

    /// Fixed delay between dialback attempts
    #[serde(with = "humantime_serde", default = "default_connect_backoff")]
    pub connect_backoff: Duration,

    /// How long a requester waits for a result from the winning executor
    #[serde(with = "humantime_serde", default = "default_execute_timeout")]
    pub execute_timeout: Duration,

    /// Command invoked to run a prompt (stdout becomes the result payload).
    /// When unset, the agent acknowledges execution without running a model.
    #[serde(default)]
    pub runner_command: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            status_interval: default_status_interval(),
            connect_retries: default_connect_retries(),
            connect_backoff: default_connect_backoff(),
            execute_timeout: default_execute_timeout(),
            runner_command: None,
        }
    }
}

/// Which scoring model prices bids.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScoringMode {
    /// Single-objective latency model, persisted to disk, cold-started as identity
    Latency,
    /// Latency composed from TTFT and token speed, warm-started from compiled-in fits
    #[default]
    Composite,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScoringConfig {
    /// Scoring model variant
    #[serde(default)]
    pub mode: ScoringMode,

    /// Path of the persisted covariance matrix (latency mode)
    #[serde(default = "default_a_file")]
    pub a_file: String,

    /// Path of the persisted reward vector (latency mode)
    #[serde(default = "default_b_file")]
    pub b_file: String,

    /// Exploration parameter; unset picks the variant's default (1.0 / 0.5)
    #[serde(default)]
    pub alpha: Option<f64>,

    /// Command producing a predicted output-token count for a prompt
    #[serde(default)]
    pub predictor_command: Option<String>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            mode: ScoringMode::default(),
            a_file: default_a_file(),
            b_file: default_b_file(),
            alpha: None,
            predictor_command: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct VisionConfig {
    /// Scratch directory for received images
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: String,

    /// Bundle directory holding images/, cropped/ and the target list
    #[serde(default = "default_bundle_dir")]
    pub bundle_dir: String,

    /// Labels file, one label per line
    #[serde(default = "default_labels_file")]
    pub labels_file: String,

    /// Model input edge length
    #[serde(default = "default_input_size")]
    pub input_size: u32,

    /// Resize method: "bilinear" or "antialias"
    #[serde(default = "default_resize_type")]
    pub resize_type: String,

    /// Command running inference over the target list
    #[serde(default)]
    pub infer_command: Option<String>,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            scratch_dir: default_scratch_dir(),
            bundle_dir: default_bundle_dir(),
            labels_file: default_labels_file(),
            input_size: default_input_size(),
            resize_type: default_resize_type(),
            infer_command: None,
        }
    }
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8081 }
fn default_max_workers() -> usize { 100 }
fn default_bid_timeout() -> Duration { Duration::from_secs(3) }
fn default_endpoint_fetch_timeout() -> Duration { Duration::from_secs(2) }
fn default_status_interval() -> Duration { Duration::from_secs(30) }
fn default_connect_retries() -> u32 { 5 }
fn default_connect_backoff() -> Duration { Duration::from_secs(5) }
fn default_execute_timeout() -> Duration { Duration::from_secs(120) }
fn default_a_file() -> String { "linucb_A.txt".to_string() }
fn default_b_file() -> String { "linucb_b.txt".to_string() }
fn default_scratch_dir() -> String { "/tmp/edgeswarm/scratch".to_string() }
fn default_bundle_dir() -> String { "/tmp/edgeswarm/bundle".to_string() }
fn default_labels_file() -> String { "labels.txt".to_string() }
fn default_input_size() -> u32 { 299 }
fn default_resize_type() -> String { "bilinear".to_string() }

impl Config {
    /// Load configuration from the environment.
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("EDGESWARM").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }

    /// Load from a specific file path, with environment overrides.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("EDGESWARM").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }
}
