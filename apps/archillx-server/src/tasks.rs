//! Background workers: heartbeat writer and the auto-scheduler ticker.

use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};

use archillx_recovery::{HeartbeatWriter, HEARTBEAT_INTERVAL};

use crate::AppState;

pub(crate) struct BackgroundTasks {
    handles: Vec<(&'static str, JoinHandle<()>)>,
    heartbeat: Option<HeartbeatWriter>,
}

impl BackgroundTasks {
    pub fn start(state: &AppState) -> Self {
        let mut handles = Vec::new();

        let heartbeat = if state.settings().recovery.enabled {
            tracing::info!(
                path = %state.settings().recovery.heartbeat_path.display(),
                "starting heartbeat writer"
            );
            Some(HeartbeatWriter::spawn(
                state.settings().recovery.heartbeat_path.clone(),
                env!("CARGO_PKG_VERSION").to_string(),
                HEARTBEAT_INTERVAL,
            ))
        } else {
            None
        };

        if state.settings().enable_evolution && state.settings().scheduler.enabled {
            handles.push(("evolution.scheduler", spawn_scheduler_ticker(state.clone())));
        }

        Self { handles, heartbeat }
    }

    pub async fn shutdown(self) {
        if let Some(heartbeat) = self.heartbeat {
            heartbeat.shutdown().await;
        }
        for (name, handle) in self.handles {
            handle.abort();
            tracing::debug!(task = name, "background task stopped");
        }
    }
}

/// Minute-granular cron ticker. The scheduler itself refuses overlapping
/// cycles; the fired-minute marker prevents double fires inside one
/// matching minute.
fn spawn_scheduler_ticker(state: AppState) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(20));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut fired_minute: Option<String> = None;
        loop {
            ticker.tick().await;
            let now = chrono::Utc::now();
            let scheduler = state.scheduler();
            if !scheduler.schedule().matches(now) {
                continue;
            }
            let minute = now.format("%Y%m%d%H%M").to_string();
            if fired_minute.as_deref() == Some(minute.as_str()) {
                continue;
            }
            fired_minute = Some(minute);
            let worker = scheduler.clone();
            match tokio::task::spawn_blocking(move || worker.tick(now)).await {
                Ok(Ok(Some(cycle))) => {
                    tracing::info!(
                        cycle = %cycle["cycle_id"],
                        proposals = %cycle["proposal_count"],
                        "auto-scheduler cycle complete"
                    );
                }
                Ok(Ok(None)) => {}
                Ok(Err(err)) => tracing::error!(%err, "auto-scheduler cycle failed"),
                Err(err) => tracing::error!(%err, "auto-scheduler task panicked"),
            }
        }
    })
}
