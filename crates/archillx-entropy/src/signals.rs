//! Signal producers for the entropy engine.
//!
//! The engine only depends on the `SignalSource` capability; the production
//! source reads the kernel and telemetry. Any failing backing query degrades
//! that signal to 0.0 rather than failing the evaluation.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use archillx_kernel::Kernel;
use archillx_telemetry::Telemetry;

const MEMORY_WINDOW: i64 = 200;
const TASK_WINDOW: i64 = 300;
const MODEL_WINDOW: i64 = 150;
const DECISION_WINDOW: i64 = 200;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SignalVector {
    pub memory: f64,
    pub task: f64,
    pub model: f64,
    pub resource: f64,
    pub decision: f64,
}

impl SignalVector {
    pub fn from_array(values: [f64; 5]) -> Self {
        Self {
            memory: values[0],
            task: values[1],
            model: values[2],
            resource: values[3],
            decision: values[4],
        }
    }

    pub fn as_array(&self) -> [f64; 5] {
        [self.memory, self.task, self.model, self.resource, self.decision]
    }

    pub fn clamped(self) -> Self {
        let clamp = |v: f64| if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 };
        Self {
            memory: clamp(self.memory),
            task: clamp(self.task),
            model: clamp(self.model),
            resource: clamp(self.resource),
            decision: clamp(self.decision),
        }
    }
}

pub trait SignalSource: Send + Sync {
    fn collect_vector(&self) -> SignalVector;
}

/// Production signal source backed by the relational store and telemetry.
pub struct RuntimeSignals {
    kernel: Kernel,
    telemetry: Arc<Telemetry>,
}

impl RuntimeSignals {
    pub fn new(kernel: Kernel, telemetry: Arc<Telemetry>) -> Self {
        Self { kernel, telemetry }
    }

    fn memory_signal(&self) -> f64 {
        match self.kernel.memory_signal_stats(MEMORY_WINDOW) {
            Ok(stats) if stats.total > 0 => {
                let total = stats.total as f64;
                0.65 * (stats.duplicates as f64 / total)
                    + 0.35 * (stats.low_importance as f64 / total)
            }
            Ok(_) => 0.0,
            Err(err) => {
                tracing::warn!(%err, "memory signal query failed");
                0.0
            }
        }
    }

    fn task_signal(&self) -> f64 {
        match self.kernel.task_signal_stats(TASK_WINDOW) {
            Ok(stats) if stats.total > 0 => {
                let total = stats.total as f64;
                let unfinished = stats.unfinished as f64 / total;
                let failed = stats.failed as f64 / total;
                // Backlog slope: growth of the newer half of the window over
                // the older half, clamped to [0, 1].
                let older = stats.older_half.max(1) as f64;
                let slope = ((stats.newer_half as f64 - stats.older_half as f64) / older)
                    .clamp(0.0, 1.0);
                0.50 * unfinished + 0.30 * failed + 0.20 * slope
            }
            Ok(_) => 0.0,
            Err(err) => {
                tracing::warn!(%err, "task signal query failed");
                0.0
            }
        }
    }

    fn model_signal(&self) -> f64 {
        let fallback = match self.kernel.audit_signal_stats(DECISION_WINDOW) {
            Ok(stats) if stats.total > 0 => {
                (stats.blocked + stats.warned) as f64 / stats.total as f64
            }
            Ok(_) => 0.0,
            Err(err) => {
                tracing::warn!(%err, "governor decision query failed");
                0.0
            }
        };
        let diversity = match self.kernel.model_signal_stats(MODEL_WINDOW) {
            Ok(stats) if stats.total > 0 => stats.distinct_models as f64 / stats.total as f64,
            Ok(_) => 0.0,
            Err(err) => {
                tracing::warn!(%err, "model diversity query failed");
                0.0
            }
        };
        0.55 * fallback + 0.45 * diversity
    }

    fn resource_signal(&self) -> f64 {
        let history = self.telemetry.history_snapshot();
        let http = &history["windows"]["last_60s"]["http"];
        let avg_latency = http["latency"]["avg_s"].as_f64().unwrap_or(0.0);
        let requests = http["requests_total"].as_f64().unwrap_or(0.0);
        let errors = http["status"]["5xx"].as_f64().unwrap_or(0.0);
        let rate_limited = http["rate_limited_total"].as_f64().unwrap_or(0.0);
        let err_ratio = if requests > 0.0 { errors / requests } else { 0.0 };
        0.45 * (avg_latency / 1.5).clamp(0.0, 1.0)
            + 0.40 * err_ratio.clamp(0.0, 1.0)
            + 0.15 * (rate_limited / 20.0).clamp(0.0, 1.0)
    }

    fn decision_signal(&self) -> f64 {
        match self.kernel.audit_signal_stats(DECISION_WINDOW) {
            Ok(stats) if stats.total > 0 => {
                let flagged = (stats.warned + stats.blocked) as f64 / stats.total as f64;
                let spread = pstdev(&stats.risk_scores) / 40.0;
                0.60 * flagged + 0.40 * spread.clamp(0.0, 1.0)
            }
            Ok(_) => 0.0,
            Err(err) => {
                tracing::warn!(%err, "decision signal query failed");
                0.0
            }
        }
    }
}

impl SignalSource for RuntimeSignals {
    fn collect_vector(&self) -> SignalVector {
        SignalVector {
            memory: self.memory_signal(),
            task: self.task_signal(),
            model: self.model_signal(),
            resource: self.resource_signal(),
            decision: self.decision_signal(),
        }
        .clamped()
    }
}

fn pstdev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance =
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runtime() -> (tempfile::TempDir, RuntimeSignals) {
        let dir = tempfile::tempdir().unwrap();
        let kernel = Kernel::open(&dir.path().join("db.sqlite")).unwrap();
        let signals = RuntimeSignals::new(kernel, Arc::new(Telemetry::new()));
        (dir, signals)
    }

    #[test]
    fn empty_backing_stores_yield_zero_vector() {
        let (_dir, signals) = runtime();
        let vector = signals.collect_vector();
        for value in vector.as_array() {
            assert_eq!(value, 0.0);
        }
    }

    #[test]
    fn memory_signal_blends_duplicates_and_low_importance() {
        let (_dir, signals) = runtime();
        signals.kernel.insert_memory("m1", None, "x", Some("h"), 0.9).unwrap();
        signals.kernel.insert_memory("m2", None, "x", Some("h"), 0.1).unwrap();

        // 1 duplicate of 2 rows, 1 low-importance of 2 rows.
        let expected = 0.65 * 0.5 + 0.35 * 0.5;
        assert!((signals.memory_signal() - expected).abs() < 1e-9);
    }

    #[test]
    fn decision_signal_tracks_flagged_ratio() {
        let (_dir, signals) = runtime();
        signals.kernel.append_audit("a", "APPROVED", 5, None, None).unwrap();
        signals.kernel.append_audit("b", "BLOCKED", 95, None, None).unwrap();

        let value = signals.decision_signal();
        // flagged ratio 0.5 weighted 0.6, plus spread pstdev([5,95])/40 = 45/40 clamped to 1.
        let expected = 0.60 * 0.5 + 0.40 * 1.0;
        assert!((value - expected).abs() < 1e-9);
    }

    #[test]
    fn clamp_handles_out_of_range_and_nan() {
        let vector = SignalVector::from_array([2.0, -1.0, f64::NAN, 0.5, 1.0]).clamped();
        assert_eq!(vector.memory, 1.0);
        assert_eq!(vector.task, 0.0);
        assert_eq!(vector.model, 0.0);
        assert_eq!(vector.resource, 0.5);
        assert_eq!(vector.decision, 1.0);
    }
}
