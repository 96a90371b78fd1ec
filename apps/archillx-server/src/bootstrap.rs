//! Startup wiring: construct every component once and assemble the router.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::middleware;
use axum::Router;
use tower_http::trace::TraceLayer;

use archillx_audit::AuditStore;
use archillx_entropy::{EntropyEngine, RuntimeSignals};
use archillx_evidence::EvidenceStore;
use archillx_evolution::{
    AutoScheduler, EvolutionService, MigrationSettings, ProcessRunner, SignalCollector,
};
use archillx_governor::Governor;
use archillx_kernel::Kernel;
use archillx_telemetry::Telemetry;

use crate::config::Settings;
use crate::rate_limit::RateLimiter;
use crate::{router, telemetry_mw, AppState};

pub(crate) fn build_state(settings: Settings) -> Result<AppState> {
    let settings = Arc::new(settings);
    std::fs::create_dir_all(&settings.evidence_dir)
        .with_context(|| format!("create evidence dir {}", settings.evidence_dir.display()))?;

    let telemetry = Arc::new(Telemetry::new());
    let evidence = EvidenceStore::new(&settings.evidence_dir);
    let kernel = Kernel::open(&settings.db_path).context("open kernel store")?;
    let audit = Arc::new(AuditStore::new(
        &settings.evidence_dir,
        settings.audit_file_max_bytes,
    ));
    let governor = Arc::new(Governor::new(
        settings.governor_mode,
        settings.risk_warn_threshold,
        settings.risk_block_threshold,
        audit.clone(),
        Some(kernel.clone()),
        telemetry.clone(),
    ));
    let entropy = Arc::new(EntropyEngine::new(
        Arc::new(RuntimeSignals::new(kernel.clone(), telemetry.clone())),
        None,
        settings.governor_mode,
        telemetry.clone(),
        &settings.evidence_dir,
    ));

    let migration = MigrationSettings {
        dir: settings.migrations_dir.clone(),
        enabled: settings.enable_migration_check,
        required: settings.require_migration_head,
    };
    let collector = SignalCollector::new(
        kernel.clone(),
        telemetry.clone(),
        audit.clone(),
        evidence.clone(),
        migration,
    );
    let project_root = std::env::current_dir().unwrap_or_else(|_| ".".into());
    let evolution = Arc::new(EvolutionService::new(
        evidence.clone(),
        collector,
        telemetry.clone(),
        Arc::new(ProcessRunner::new(&project_root)),
        project_root,
    ));
    let scheduler = Arc::new(
        AutoScheduler::new(
            evolution.clone(),
            kernel.clone(),
            settings.scheduler.clone(),
        )
        .context("configure auto-scheduler")?,
    );

    Ok(AppState::new(
        settings,
        telemetry,
        evidence,
        kernel,
        audit,
        governor,
        entropy,
        evolution,
        scheduler,
        Arc::new(RateLimiter::new()),
    ))
}

pub(crate) fn build_router(state: AppState) -> Router {
    router::build()
        // Innermost: per-route rate limiting; its 429s are still counted by
        // the telemetry layer outside it.
        .layer(middleware::from_fn_with_state(
            state.clone(),
            telemetry_mw::rate_limit,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            telemetry_mw::track_http,
        ))
        .layer(middleware::from_fn(
            telemetry_mw::propagate_request_context,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
