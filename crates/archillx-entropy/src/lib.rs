//! Entropy engine: fuses five runtime signal groups into a weighted score,
//! smooths it with an EWMA predictor, and drives the risk state machine that
//! emits actuation hints.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use archillx_governor::GovernorMode;
use archillx_telemetry::Telemetry;

pub mod signals;

pub use signals::{RuntimeSignals, SignalSource, SignalVector};

pub const DEFAULT_EWMA_ALPHA: f64 = 0.35;
const SCORE_WINDOW: usize = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskLevel {
    #[serde(rename = "NORMAL")]
    Normal,
    #[serde(rename = "WARN")]
    Warn,
    #[serde(rename = "DEGRADED")]
    Degraded,
    #[serde(rename = "CRITICAL")]
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineState {
    #[serde(rename = "NORMAL")]
    Normal,
    #[serde(rename = "WARN")]
    Warn,
    #[serde(rename = "DEGRADED")]
    Degraded,
    #[serde(rename = "CRITICAL")]
    Critical,
    #[serde(rename = "RECOVERY")]
    Recovery,
}

impl RiskLevel {
    fn for_score(score: f64) -> Self {
        if score < 0.3 {
            RiskLevel::Normal
        } else if score < 0.5 {
            RiskLevel::Warn
        } else if score < 0.7 {
            RiskLevel::Degraded
        } else {
            RiskLevel::Critical
        }
    }

    fn as_state(self) -> EngineState {
        match self {
            RiskLevel::Normal => EngineState::Normal,
            RiskLevel::Warn => EngineState::Warn,
            RiskLevel::Degraded => EngineState::Degraded,
            RiskLevel::Critical => EngineState::Critical,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntropySnapshot {
    pub ts: String,
    pub vector: SignalVector,
    pub score: f64,
    pub ewma: f64,
    pub volatility: f64,
    pub forecast_window_s: u64,
    pub risk_level: RiskLevel,
    pub state: EngineState,
    pub triggered_action: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery_time_s: Option<f64>,
    pub governor_override: bool,
}

struct EngineInner {
    ewma: Option<f64>,
    scores: VecDeque<f64>,
    state: EngineState,
    recovery_started: Option<std::time::Instant>,
    last: Option<EntropySnapshot>,
}

pub struct EntropyEngine {
    source: Arc<dyn SignalSource>,
    weights: [f64; 5],
    alpha: f64,
    governor_mode: GovernorMode,
    telemetry: Arc<Telemetry>,
    ledger_path: PathBuf,
    inner: Mutex<EngineInner>,
}

impl EntropyEngine {
    /// Weights are configurable but seeded uniform; they are normalized so
    /// the fused score stays in [0, 1].
    pub fn new(
        source: Arc<dyn SignalSource>,
        weights: Option<[f64; 5]>,
        governor_mode: GovernorMode,
        telemetry: Arc<Telemetry>,
        evidence_dir: impl Into<PathBuf>,
    ) -> Self {
        let weights = normalize_weights(weights.unwrap_or([0.2; 5]));
        Self {
            source,
            weights,
            alpha: DEFAULT_EWMA_ALPHA,
            governor_mode,
            telemetry,
            ledger_path: evidence_dir.into().join("entropy_engine.jsonl"),
            inner: Mutex::new(EngineInner {
                ewma: None,
                scores: VecDeque::with_capacity(SCORE_WINDOW),
                state: EngineState::Normal,
                recovery_started: None,
                last: None,
            }),
        }
    }

    pub fn weights(&self) -> [f64; 5] {
        self.weights
    }

    /// Sample the signal source, fuse, advance the state machine, and
    /// (optionally) persist the snapshot to the entropy ledger.
    pub fn evaluate(&self, persist: bool) -> Result<EntropySnapshot> {
        let vector = self.source.collect_vector().clamped();
        let values = vector.as_array();
        let score = round4(
            values
                .iter()
                .zip(self.weights.iter())
                .map(|(v, w)| v * w)
                .sum(),
        );

        let mut inner = self.inner.lock().expect("entropy state lock");
        let ewma = match inner.ewma {
            Some(prev) => round4(self.alpha * score + (1.0 - self.alpha) * prev),
            None => score,
        };
        inner.ewma = Some(ewma);
        if inner.scores.len() == SCORE_WINDOW {
            inner.scores.pop_front();
        }
        inner.scores.push_back(score);
        let volatility = round4(pstdev(inner.scores.make_contiguous()));

        let risk_level = RiskLevel::for_score(score);
        let previous = inner.state;
        let mut recovery_time = None;
        let next = match previous {
            EngineState::Degraded | EngineState::Critical
                if matches!(risk_level, RiskLevel::Normal | RiskLevel::Warn) =>
            {
                inner.recovery_started = Some(std::time::Instant::now());
                EngineState::Recovery
            }
            EngineState::Recovery => {
                recovery_time = inner
                    .recovery_started
                    .take()
                    .map(|started| round4(started.elapsed().as_secs_f64()));
                risk_level.as_state()
            }
            _ => risk_level.as_state(),
        };
        inner.state = next;

        let snapshot = EntropySnapshot {
            ts: archillx_evidence::now_iso(),
            score,
            ewma,
            volatility,
            forecast_window_s: forecast_window_s(ewma),
            risk_level,
            state: next,
            triggered_action: actuator_hints(&vector, next),
            recovery_time_s: recovery_time,
            governor_override: self.governor_mode == GovernorMode::HardBlock
                && next == EngineState::Critical,
            vector,
        };
        inner.last = Some(snapshot.clone());
        drop(inner);

        if persist {
            archillx_evidence::jsonl::append_line(
                &self.ledger_path,
                &serde_json::to_value(&snapshot)?,
            )?;
            self.telemetry.gauge("entropy_score", snapshot.score);
            self.telemetry.gauge("entropy_ewma", snapshot.ewma);
            self.telemetry.gauge("entropy_volatility", snapshot.volatility);
        }
        Ok(snapshot)
    }

    /// Most recent snapshot, computing a fresh unpersisted one when none is
    /// cached yet.
    pub fn status(&self) -> Result<EntropySnapshot> {
        if let Some(last) = self.inner.lock().expect("entropy state lock").last.clone() {
            return Ok(last);
        }
        self.evaluate(false)
    }
}

fn normalize_weights(weights: [f64; 5]) -> [f64; 5] {
    let sum: f64 = weights.iter().map(|w| w.max(0.0)).sum();
    if sum <= f64::EPSILON {
        return [0.2; 5];
    }
    let mut out = [0.0; 5];
    for (slot, w) in out.iter_mut().zip(weights.iter()) {
        *slot = w.max(0.0) / sum;
    }
    out
}

fn forecast_window_s(ewma: f64) -> u64 {
    if ewma >= 0.7 {
        300
    } else if ewma >= 0.5 {
        600
    } else if ewma >= 0.3 {
        1200
    } else {
        1800
    }
}

fn actuator_hints(vector: &SignalVector, state: EngineState) -> Vec<String> {
    if state == EngineState::Normal {
        return Vec::new();
    }
    let mut hints = Vec::new();
    let mapping: [(f64, &str); 5] = [
        (vector.memory, "Memory Compaction"),
        (vector.task, "Task Rebalancing"),
        (vector.model, "Router Reset / Fallback Tighten"),
        (vector.resource, "Circuit Mode Shift"),
        (vector.decision, "Goal Re-alignment"),
    ];
    for (value, hint) in mapping {
        if value >= 0.6 {
            hints.push(hint.to_string());
        }
    }
    if hints.is_empty() && matches!(state, EngineState::Degraded | EngineState::Critical) {
        hints.push("Stability Review".to_string());
    }
    hints
}

fn round4(value: f64) -> f64 {
    (value * 1e4).round() / 1e4
}

/// Population standard deviation.
fn pstdev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance =
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}
