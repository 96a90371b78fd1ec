//! In-process telemetry: counters, gauges, timers, bounded event history.
//!
//! All state lives behind a single mutex; snapshots return deep copies so
//! readers never observe a partially updated view. Counter events and timer
//! samples are additionally kept in bounded deques (20 000 each) to answer
//! windowed queries; the oldest entry is evicted silently on overflow.

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::{json, Map, Value};

const HISTORY_CAP: usize = 20_000;
const HISTORY_WINDOWS_S: [u64; 3] = [60, 300, 3600];

fn epoch_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

fn round6(value: f64) -> f64 {
    (value * 1e6).round() / 1e6
}

#[derive(Clone, Serialize, Default, Debug, PartialEq)]
pub struct TimerStats {
    pub count: u64,
    pub sum_s: f64,
    pub avg_s: f64,
}

#[derive(Clone, Serialize)]
pub struct TelemetrySnapshot {
    pub uptime_s: u64,
    pub counters: BTreeMap<String, f64>,
    pub gauges: BTreeMap<String, f64>,
    pub timers: BTreeMap<String, TimerStats>,
}

#[derive(Default)]
struct Inner {
    counters: BTreeMap<String, f64>,
    gauges: BTreeMap<String, f64>,
    timers_sum: BTreeMap<String, f64>,
    timers_count: BTreeMap<String, u64>,
    events: VecDeque<(f64, String, f64)>,
    timers: VecDeque<(f64, String, f64)>,
    started_at: f64,
}

impl Inner {
    fn new() -> Self {
        Self {
            started_at: epoch_now(),
            ..Default::default()
        }
    }
}

pub struct Telemetry {
    inner: Mutex<Inner>,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new()
    }
}

impl Telemetry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::new()),
        }
    }

    pub fn incr(&self, name: &str) {
        self.incr_by(name, 1.0);
    }

    pub fn incr_by(&self, name: &str, value: f64) {
        self.incr_at(name, value, epoch_now());
    }

    fn incr_at(&self, name: &str, value: f64, now: f64) {
        if let Ok(mut inner) = self.inner.lock() {
            *inner.counters.entry(name.to_string()).or_default() += value;
            if inner.events.len() == HISTORY_CAP {
                inner.events.pop_front();
            }
            inner.events.push_back((now, name.to_string(), value));
        }
    }

    pub fn gauge(&self, name: &str, value: f64) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.gauges.insert(name.to_string(), value);
        }
    }

    pub fn timing(&self, name: &str, seconds: f64) {
        self.timing_at(name, seconds, epoch_now());
    }

    fn timing_at(&self, name: &str, seconds: f64, now: f64) {
        let value = seconds.max(0.0);
        if let Ok(mut inner) = self.inner.lock() {
            *inner.timers_sum.entry(name.to_string()).or_default() += value;
            *inner.timers_count.entry(name.to_string()).or_default() += 1;
            if inner.timers.len() == HISTORY_CAP {
                inner.timers.pop_front();
            }
            inner.timers.push_back((now, name.to_string(), value));
        }
    }

    pub fn counter(&self, name: &str) -> f64 {
        self.inner
            .lock()
            .map(|inner| inner.counters.get(name).copied().unwrap_or(0.0))
            .unwrap_or(0.0)
    }

    pub fn reset(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            *inner = Inner::new();
        }
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        let inner = match self.inner.lock() {
            Ok(inner) => inner,
            Err(_) => {
                return TelemetrySnapshot {
                    uptime_s: 0,
                    counters: BTreeMap::new(),
                    gauges: BTreeMap::new(),
                    timers: BTreeMap::new(),
                }
            }
        };
        let uptime = (epoch_now() - inner.started_at).max(0.0) as u64;
        let mut timers = BTreeMap::new();
        for (name, sum) in &inner.timers_sum {
            let count = inner.timers_count.get(name).copied().unwrap_or(0);
            let avg = if count > 0 { sum / count as f64 } else { 0.0 };
            timers.insert(
                name.clone(),
                TimerStats {
                    count,
                    sum_s: round6(*sum),
                    avg_s: round6(avg),
                },
            );
        }
        TelemetrySnapshot {
            uptime_s: uptime,
            counters: inner.counters.clone(),
            gauges: inner.gauges.clone(),
            timers,
        }
    }

    /// Nested view of the flat counter namespace: HTTP status buckets,
    /// governor decisions, per-skill / per-cron-job / per-sandbox rollups.
    pub fn aggregated_snapshot(&self) -> Value {
        let snap = self.snapshot();
        let counters = &snap.counters;

        let get = |name: &str| counters.get(name).copied().unwrap_or(0.0);
        let sum_prefix = |prefix: &str| -> f64 {
            counters
                .iter()
                .filter(|(k, _)| k.starts_with(prefix))
                .map(|(_, v)| *v)
                .sum()
        };
        let http_timer = snap.timers.get("http_request").cloned().unwrap_or_default();

        json!({
            "window": {"uptime_s": snap.uptime_s},
            "http": {
                "requests_total": get("http_requests_total") as i64,
                "status": {
                    "2xx": sum_prefix("http_status_2") as i64,
                    "4xx": sum_prefix("http_status_4") as i64,
                    "5xx": sum_prefix("http_status_5") as i64,
                },
                "latency": {
                    "count": http_timer.count,
                    "sum_s": http_timer.sum_s,
                    "avg_s": http_timer.avg_s,
                },
                "auth_failed_total": get("auth_failed_total") as i64,
                "rate_limited_total": get("rate_limited_total") as i64,
            },
            "governor": {
                "evaluations_total": get("governor_evaluations_total") as i64,
                "decisions": {
                    "approved": get("governor_decision_approved_total") as i64,
                    "warned": get("governor_decision_warned_total") as i64,
                    "blocked": get("governor_decision_blocked_total") as i64,
                },
                "last_risk_score": snap.gauges.get("governor_last_risk_score").copied().unwrap_or(0.0),
            },
            "skills": {
                "totals": {
                    "invoke_total": get("skill_invoke_total") as i64,
                    "success_total": get("skill_invoke_success_total") as i64,
                    "failure_total": get("skill_invoke_failure_total") as i64,
                    "validation_error_total": get("skill_validation_error_total") as i64,
                    "access_denied_total": get("skill_access_denied_total") as i64,
                    "disabled_total": get("skill_disabled_total") as i64,
                },
                "by_skill": {
                    "invoke_total": skill_name_stats(counters, "_invoke_total"),
                    "success_total": skill_name_stats(counters, "_success_total"),
                    "failure_total": skill_name_stats(counters, "_failure_total"),
                    "validation_error_total": skill_name_stats(counters, "_validation_error_total"),
                    "access_denied_total": skill_name_stats(counters, "_access_denied_total"),
                },
            },
            "cron": {
                "totals": {
                    "execute_total": get("cron_execute_total") as i64,
                    "success_total": get("cron_success_total") as i64,
                    "failure_total": get("cron_failure_total") as i64,
                    "blocked_total": get("cron_blocked_total") as i64,
                },
                "by_job": {
                    "execute_total": suffix_map(counters, "cron_job_", "_execute_total"),
                    "success_total": suffix_map(counters, "cron_job_", "_success_total"),
                    "failure_total": suffix_map(counters, "cron_job_", "_failure_total"),
                    "blocked_total": suffix_map(counters, "cron_job_", "_blocked_total"),
                },
            },
            "sandbox": {
                "events_total": get("sandbox_events_total") as i64,
                "backend": suffix_map(counters, "sandbox_backend_", "_total"),
                "decision": suffix_map(counters, "sandbox_decision_", "_total"),
            },
        })
    }

    /// Windowed sums over the bounded event/timer histories for
    /// 60 s / 300 s / 3600 s.
    pub fn history_snapshot(&self) -> Value {
        self.history_snapshot_at(epoch_now())
    }

    fn history_snapshot_at(&self, now: f64) -> Value {
        let (events, timers) = match self.inner.lock() {
            Ok(inner) => (
                inner.events.iter().cloned().collect::<Vec<_>>(),
                inner.timers.iter().cloned().collect::<Vec<_>>(),
            ),
            Err(_) => (Vec::new(), Vec::new()),
        };

        let mut windows = Map::new();
        for seconds in HISTORY_WINDOWS_S {
            let cutoff = now - seconds as f64;
            let exact = |name: &str| -> i64 {
                events
                    .iter()
                    .filter(|(ts, n, _)| *ts >= cutoff && n == name)
                    .map(|(_, _, v)| v)
                    .sum::<f64>() as i64
            };
            let prefix_sum = |prefix: &str| -> i64 {
                events
                    .iter()
                    .filter(|(ts, n, _)| *ts >= cutoff && n.starts_with(prefix))
                    .map(|(_, _, v)| v)
                    .sum::<f64>() as i64
            };
            let window_timer = |name: &str| -> Value {
                let vals: Vec<f64> = timers
                    .iter()
                    .filter(|(ts, n, _)| *ts >= cutoff && n == name)
                    .map(|(_, _, v)| *v)
                    .collect();
                let count = vals.len() as u64;
                let total: f64 = vals.iter().sum();
                let avg = if count > 0 { total / count as f64 } else { 0.0 };
                json!({"count": count, "sum_s": round6(total), "avg_s": round6(avg)})
            };
            let window_suffix_map = |prefix: &str, suffix: &str| -> Value {
                let mut out: BTreeMap<String, f64> = BTreeMap::new();
                for (ts, name, value) in &events {
                    if *ts < cutoff || !name.starts_with(prefix) || !name.ends_with(suffix) {
                        continue;
                    }
                    let item = &name[prefix.len()..name.len() - suffix.len()];
                    *out.entry(item.to_string()).or_default() += value;
                }
                Value::Object(out.into_iter().map(|(k, v)| (k, json!(v as i64))).collect())
            };

            windows.insert(
                format!("last_{}s", seconds),
                json!({
                    "http": {
                        "requests_total": exact("http_requests_total"),
                        "status": {
                            "2xx": prefix_sum("http_status_2"),
                            "4xx": prefix_sum("http_status_4"),
                            "5xx": prefix_sum("http_status_5"),
                        },
                        "latency": window_timer("http_request"),
                        "auth_failed_total": exact("auth_failed_total"),
                        "rate_limited_total": exact("rate_limited_total"),
                    },
                    "governor": {
                        "evaluations_total": exact("governor_evaluations_total"),
                        "approved_total": exact("governor_decision_approved_total"),
                        "warned_total": exact("governor_decision_warned_total"),
                        "blocked_total": exact("governor_decision_blocked_total"),
                    },
                    "skills": {
                        "invoke_total": exact("skill_invoke_total"),
                        "success_total": exact("skill_invoke_success_total"),
                        "failure_total": exact("skill_invoke_failure_total"),
                        "validation_error_total": exact("skill_validation_error_total"),
                        "access_denied_total": exact("skill_access_denied_total"),
                        "by_skill": {
                            "invoke_total": window_suffix_map("skill_", "_invoke_total"),
                            "failure_total": window_suffix_map("skill_", "_failure_total"),
                        },
                    },
                    "cron": {
                        "execute_total": exact("cron_execute_total"),
                        "success_total": exact("cron_success_total"),
                        "failure_total": exact("cron_failure_total"),
                        "blocked_total": exact("cron_blocked_total"),
                        "by_job": {
                            "execute_total": window_suffix_map("cron_job_", "_execute_total"),
                            "failure_total": window_suffix_map("cron_job_", "_failure_total"),
                        },
                    },
                    "sandbox": {
                        "events_total": exact("sandbox_events_total"),
                        "blocked_total": exact("sandbox_decision_BLOCKED_total"),
                        "approved_total": exact("sandbox_decision_APPROVED_total"),
                        "warned_total": exact("sandbox_decision_WARNED_total"),
                        "by_backend": window_suffix_map("sandbox_backend_", "_total"),
                        "by_decision": window_suffix_map("sandbox_decision_", "_total"),
                    },
                }),
            );
        }
        json!({
            "windows": Value::Object(windows),
            "retention": {"max_events": HISTORY_CAP, "max_timers": HISTORY_CAP},
        })
    }

    /// Prometheus text exposition: counters, gauges, and timer summaries
    /// with `_seconds_sum` / `_seconds_count` / `_seconds_avg` series.
    pub fn as_prometheus(&self) -> String {
        let snap = self.snapshot();
        let mut lines = Vec::new();
        lines.push("# HELP archillx_uptime_seconds Process uptime in seconds".to_string());
        lines.push("# TYPE archillx_uptime_seconds gauge".to_string());
        lines.push(format!("archillx_uptime_seconds {}", snap.uptime_s));
        for (name, value) in &snap.counters {
            let metric = sanitize_metric(name);
            lines.push(format!("# TYPE {} counter", metric));
            lines.push(format!("{} {}", metric, value));
        }
        for (name, value) in &snap.gauges {
            let metric = sanitize_metric(name);
            lines.push(format!("# TYPE {} gauge", metric));
            lines.push(format!("{} {}", metric, value));
        }
        for (name, stats) in &snap.timers {
            let metric = sanitize_metric(name);
            lines.push(format!("# TYPE {}_seconds summary", metric));
            lines.push(format!("{}_seconds_sum {}", metric, stats.sum_s));
            lines.push(format!("{}_seconds_count {}", metric, stats.count));
            lines.push(format!("{}_seconds_avg {}", metric, stats.avg_s));
        }
        let mut body = lines.join("\n");
        body.push('\n');
        body
    }
}

fn skill_name_stats(counters: &BTreeMap<String, f64>, suffix: &str) -> Value {
    let mut out: BTreeMap<String, f64> = BTreeMap::new();
    for (key, value) in counters {
        let reserved = key.starts_with("skill_invoke")
            || key.starts_with("skill_validation")
            || key.starts_with("skill_access")
            || key.starts_with("skill_disabled");
        if reserved || !key.starts_with("skill_") || !key.ends_with(suffix) {
            continue;
        }
        let name = &key["skill_".len()..key.len() - suffix.len()];
        out.insert(name.to_string(), *value);
    }
    Value::Object(out.into_iter().map(|(k, v)| (k, serde_json::json!(v))).collect())
}

fn suffix_map(counters: &BTreeMap<String, f64>, prefix: &str, suffix: &str) -> Value {
    let mut out: BTreeMap<String, f64> = BTreeMap::new();
    for (key, value) in counters {
        if !key.starts_with(prefix) || !key.ends_with(suffix) {
            continue;
        }
        let name = &key[prefix.len()..key.len() - suffix.len()];
        out.insert(name.to_string(), *value);
    }
    Value::Object(out.into_iter().map(|(k, v)| (k, serde_json::json!(v))).collect())
}

fn sanitize_metric(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    let trimmed = cleaned.trim_matches('_');
    let base = if trimmed.is_empty() { "archillx_metric" } else { trimmed };
    if base.starts_with("archillx_") {
        base.to_string()
    } else {
        format!("archillx_{}", base)
    }
}
