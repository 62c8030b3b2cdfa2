//! Ridge-regression contextual bandit for bid pricing.
//!
//! Each worker prices its own bids with a learned latency estimate over
//! the feature vector `[1, cpu/100, ram/100, prompt_len/1000]`. Scoring
//! is a lower confidence bound: `score = prediction − α·σ` with
//! `σ = √|xᵀA⁻¹x|`, so an uncertain device looks optimistically fast and
//! gets explored. Lower scores are more attractive.
//!
//! Two variants exist:
//! - [`LatencyModel`] predicts end-to-end latency directly and persists
//!   its state to plain-text files (cold start: identity / zeros).
//! - [`CompositeModel`] predicts time-to-first-token and token speed
//!   separately, combines them with a predicted output-token count, and
//!   warm-starts from compiled-in fits.

pub mod matrix;
pub mod predictor;
pub mod store;

use std::path::Path;

use parking_lot::Mutex;

use crate::config::{ScoringConfig, ScoringMode};
use crate::error::Result;

pub use matrix::{Matrix, Vector, DIM};
pub use predictor::DEFAULT_TOKENS;

/// Sentinel score when the single-objective inversion fails.
const SENTINEL_LATENCY: f64 = 1e9;

/// Sentinel score when the composite inversion fails.
const SENTINEL_COMPOSITE: f64 = 9999.0;

/// Floor applied to predicted token speed.
const MIN_SPEED: f64 = 0.1;

/// Default exploration parameter for the single-objective model.
pub const DEFAULT_ALPHA: f64 = 1.0;

/// Default exploration parameter for the composite model.
pub const DEFAULT_COMPOSITE_ALPHA: f64 = 0.5;

/// Build the feature vector from raw observations.
///
/// `cpu_pct` and `ram_pct` are 0-100; `prompt_len` is a character count.
pub fn features(cpu_pct: f64, ram_pct: f64, prompt_len: f64) -> Vector {
    [1.0, cpu_pct / 100.0, ram_pct / 100.0, prompt_len / 1000.0]
}

// ═══════════════════════════════════════════════════════════════════════════════
// Single-objective model
// ═══════════════════════════════════════════════════════════════════════════════

/// Ridge regression + LCB over a single latency objective.
#[derive(Debug, Clone, PartialEq)]
pub struct LatencyModel {
    pub a: Matrix,
    pub b: Vector,
    pub alpha: f64,
}

impl LatencyModel {
    /// Cold start: identity covariance, zero rewards.
    pub fn cold(alpha: f64) -> Self {
        Self {
            a: matrix::identity(),
            b: [0.0; DIM],
            alpha,
        }
    }

    /// Load persisted state; a missing matrix file cold-starts, a missing
    /// vector file zeroes the rewards.
    pub fn load(a_file: impl AsRef<Path>, b_file: impl AsRef<Path>, alpha: f64) -> Self {
        let a = match store::load_matrix(&a_file) {
            Ok(a) => a,
            Err(e) => {
                tracing::warn!(error = %e, "Could not load covariance matrix, cold starting");
                return Self::cold(alpha);
            }
        };
        let b = match store::load_vector(&b_file) {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(error = %e, "Could not load reward vector, zeroing");
                [0.0; DIM]
            }
        };
        Self { a, b, alpha }
    }

    /// Persist the current state.
    pub fn save(&self, a_file: impl AsRef<Path>, b_file: impl AsRef<Path>) -> Result<()> {
        store::save_matrix(a_file, &self.a)?;
        store::save_vector(b_file, &self.b)?;
        Ok(())
    }

    /// LCB score for a feature vector; lower is more attractive.
    ///
    /// A singular covariance matrix fails soft with a very bad score so
    /// the worker still bids (and loses).
    pub fn score(&self, x: &Vector) -> f64 {
        let Some(a_inv) = matrix::invert(&self.a) else {
            tracing::warn!("Covariance matrix is singular, returning sentinel score");
            return SENTINEL_LATENCY;
        };

        let theta = matrix::mat_vec(&a_inv, &self.b);
        let mean = matrix::dot(&theta, x);

        let a_inv_x = matrix::mat_vec(&a_inv, x);
        let sigma = matrix::dot(x, &a_inv_x).abs().sqrt();

        mean - self.alpha * sigma
    }

    /// Incorporate an observed latency: `A += xxᵀ`, `b += y·x`.
    pub fn train(&mut self, x: &Vector, latency: f64) {
        matrix::rank_one_update(&mut self.a, x);
        matrix::accumulate(&mut self.b, x, latency);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Composite model
// ═══════════════════════════════════════════════════════════════════════════════

// Warm-start fits: shared covariance plus per-objective reward vectors,
// gathered from instrumented prompt runs on reference devices.
const WARM_A: Matrix = [
    [2913.000000, 1424.420000, 1426.100000, 553.260000],
    [1424.420000, 948.489600, 696.370400, 273.258900],
    [1426.100000, 696.370400, 952.864800, 270.945720],
    [553.260000, 273.258900, 270.945720, 141.763110],
];
const WARM_B_TTFT: Vector = [50352.775448, 29158.869048, 24677.918716, 11773.252430];
const WARM_B_SPEED: Vector = [18712.935297, 7022.409791, 9165.157313, 3868.617305];

/// Latency composed from TTFT and token speed predictions sharing one
/// covariance matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositeModel {
    pub a: Matrix,
    pub b_ttft: Vector,
    pub b_speed: Vector,
    pub alpha: f64,
}

impl CompositeModel {
    /// Warm start from the compiled-in fits.
    pub fn warm_start(alpha: f64) -> Self {
        Self {
            a: WARM_A,
            b_ttft: WARM_B_TTFT,
            b_speed: WARM_B_SPEED,
            alpha,
        }
    }

    /// LCB score given a predicted output-token count; lower is more
    /// attractive. Fails soft on a singular matrix.
    pub fn score(&self, x: &Vector, pred_tokens: f64) -> f64 {
        let Some(a_inv) = matrix::invert(&self.a) else {
            tracing::warn!("Covariance matrix is singular, returning sentinel score");
            return SENTINEL_COMPOSITE;
        };

        let theta_ttft = matrix::mat_vec(&a_inv, &self.b_ttft);
        let theta_speed = matrix::mat_vec(&a_inv, &self.b_speed);

        let ttft = matrix::dot(&theta_ttft, x);
        let speed = matrix::dot(&theta_speed, x).max(MIN_SPEED);

        let a_inv_x = matrix::mat_vec(&a_inv, x);
        let sigma = matrix::dot(x, &a_inv_x).abs().sqrt();

        let latency = ttft + pred_tokens / speed;
        latency - self.alpha * sigma
    }

    /// Incorporate an observed (ttft, speed) pair.
    pub fn train(&mut self, x: &Vector, ttft: f64, speed: f64) {
        matrix::rank_one_update(&mut self.a, x);
        matrix::accumulate(&mut self.b_ttft, x, ttft);
        matrix::accumulate(&mut self.b_speed, x, speed);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Agent-facing scorer
// ═══════════════════════════════════════════════════════════════════════════════

enum ModelState {
    Latency {
        model: Mutex<LatencyModel>,
        a_file: String,
        b_file: String,
    },
    Composite {
        model: Mutex<CompositeModel>,
        predictor_command: Option<String>,
    },
}

/// Observed outcome of an executed job, fed back into the model.
#[derive(Debug, Clone, Copy)]
pub struct Observation {
    /// End-to-end latency in seconds
    pub latency_secs: f64,
    /// Time to first token in seconds, when the runner reports it
    pub ttft_secs: Option<f64>,
    /// Tokens per second, when the runner reports it
    pub tokens_per_sec: Option<f64>,
}

/// The worker's bid pricer.
///
/// Owns the configured model variant behind a lock so concurrent bid
/// scoring and post-execution training never interleave a half-applied
/// update. All entry points block (file and subprocess I/O); callers on
/// the async side go through `spawn_blocking`.
pub struct BidScorer {
    state: ModelState,
}

impl BidScorer {
    pub fn from_config(cfg: &ScoringConfig) -> Self {
        let state = match cfg.mode {
            ScoringMode::Latency => {
                let alpha = cfg.alpha.unwrap_or(DEFAULT_ALPHA);
                ModelState::Latency {
                    model: Mutex::new(LatencyModel::load(&cfg.a_file, &cfg.b_file, alpha)),
                    a_file: cfg.a_file.clone(),
                    b_file: cfg.b_file.clone(),
                }
            }
            ScoringMode::Composite => {
                let alpha = cfg.alpha.unwrap_or(DEFAULT_COMPOSITE_ALPHA);
                ModelState::Composite {
                    model: Mutex::new(CompositeModel::warm_start(alpha)),
                    predictor_command: cfg.predictor_command.clone(),
                }
            }
        };
        Self { state }
    }

    /// Predicted-latency LCB score for a prompt under the given load.
    pub fn score_prompt(&self, cpu_pct: f64, ram_pct: f64, prompt: &str) -> f64 {
        let x = features(cpu_pct, ram_pct, prompt.len() as f64);
        match &self.state {
            ModelState::Latency { model, .. } => model.lock().score(&x),
            ModelState::Composite {
                model,
                predictor_command,
            } => {
                let tokens = match predictor_command {
                    Some(cmd) => predictor::predict_tokens(cmd, prompt),
                    None => DEFAULT_TOKENS,
                };
                model.lock().score(&x, tokens)
            }
        }
    }

    /// Feed an executed job's outcome back into the model. The latency
    /// variant persists its updated state.
    pub fn train(&self, x: &Vector, obs: Observation) {
        match &self.state {
            ModelState::Latency {
                model,
                a_file,
                b_file,
            } => {
                let mut m = model.lock();
                m.train(x, obs.latency_secs);
                if let Err(e) = m.save(a_file, b_file) {
                    e.log();
                }
            }
            ModelState::Composite { model, .. } => {
                let ttft = obs.ttft_secs.unwrap_or(obs.latency_secs);
                let speed = obs
                    .tokens_per_sec
                    .unwrap_or(DEFAULT_TOKENS / obs.latency_secs.max(1e-3));
                model.lock().train(x, ttft, speed);
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
