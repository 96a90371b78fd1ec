//! Top-level runtime container: every component is constructed once at
//! startup and injected here; no package-level singletons.

use std::sync::Arc;

use archillx_audit::AuditStore;
use archillx_entropy::EntropyEngine;
use archillx_evidence::EvidenceStore;
use archillx_evolution::{AutoScheduler, EvolutionService, SignalCollector};
use archillx_governor::Governor;
use archillx_kernel::Kernel;
use archillx_telemetry::Telemetry;

use crate::config::Settings;
use crate::rate_limit::RateLimiter;

#[derive(Clone)]
pub(crate) struct AppState {
    settings: Arc<Settings>,
    telemetry: Arc<Telemetry>,
    evidence: EvidenceStore,
    kernel: Kernel,
    audit: Arc<AuditStore>,
    governor: Arc<Governor>,
    entropy: Arc<EntropyEngine>,
    evolution: Arc<EvolutionService>,
    scheduler: Arc<AutoScheduler>,
    rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: Arc<Settings>,
        telemetry: Arc<Telemetry>,
        evidence: EvidenceStore,
        kernel: Kernel,
        audit: Arc<AuditStore>,
        governor: Arc<Governor>,
        entropy: Arc<EntropyEngine>,
        evolution: Arc<EvolutionService>,
        scheduler: Arc<AutoScheduler>,
        rate_limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            settings,
            telemetry,
            evidence,
            kernel,
            audit,
            governor,
            entropy,
            evolution,
            scheduler,
            rate_limiter,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn telemetry(&self) -> Arc<Telemetry> {
        self.telemetry.clone()
    }

    pub fn evidence(&self) -> &EvidenceStore {
        &self.evidence
    }

    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    pub fn audit(&self) -> Arc<AuditStore> {
        self.audit.clone()
    }

    pub fn governor(&self) -> Arc<Governor> {
        self.governor.clone()
    }

    pub fn entropy(&self) -> Arc<EntropyEngine> {
        self.entropy.clone()
    }

    pub fn evolution(&self) -> Arc<EvolutionService> {
        self.evolution.clone()
    }

    pub fn collector(&self) -> &SignalCollector {
        self.evolution.collector()
    }

    pub fn scheduler(&self) -> Arc<AutoScheduler> {
        self.scheduler.clone()
    }

    pub fn rate_limiter(&self) -> Arc<RateLimiter> {
        self.rate_limiter.clone()
    }
}
