//! Environment-driven settings for the control plane.

use std::path::PathBuf;
use std::str::FromStr;

use archillx_evolution::{GuardMode, SchedulerSettings};
use archillx_governor::GovernorMode;

pub fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(value) => matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => default,
    }
}

pub fn env_parse<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

pub fn env_string(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

#[derive(Debug, Clone)]
pub struct RecoverySettings {
    pub enabled: bool,
    pub heartbeat_path: PathBuf,
    pub heartbeat_ttl_s: f64,
    pub ready_url: String,
    pub check_interval_s: u64,
    pub lock_backend: String,
    pub lock_key: String,
    pub lock_ttl_s: u64,
    pub redis_url: String,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub app_env: String,
    pub bind_addr: String,
    pub evidence_dir: PathBuf,
    pub db_path: PathBuf,
    pub migrations_dir: PathBuf,
    pub expose_internal_error_details: bool,
    pub enable_metrics: bool,
    pub enable_telemetry: bool,
    pub governor_mode: GovernorMode,
    pub risk_warn_threshold: i64,
    pub risk_block_threshold: i64,
    pub audit_file_max_bytes: u64,
    pub enable_migration_check: bool,
    pub require_migration_head: bool,
    pub enable_evolution: bool,
    pub scheduler: SchedulerSettings,
    pub enable_rate_limit: bool,
    pub rate_limit_per_min: usize,
    pub high_risk_rate_limit_per_min: usize,
    pub recovery: RecoverySettings,
}

impl Settings {
    pub fn from_env() -> Self {
        let evidence_dir = PathBuf::from(env_string("EVIDENCE_DIR", "evidence"));
        let governor_mode = env_string("GOVERNOR_MODE", "audit_only")
            .parse()
            .unwrap_or_else(|err| {
                tracing::warn!(%err, "falling back to audit_only governor mode");
                GovernorMode::AuditOnly
            });
        let guard_mode = if env_string("EVOLUTION_AUTO_GUARD_MODE", "quick") == "full" {
            GuardMode::Full
        } else {
            GuardMode::Quick
        };
        let scheduler = SchedulerSettings {
            enabled: env_bool("ENABLE_EVOLUTION_AUTO", false),
            cron: env_string("EVOLUTION_AUTO_CYCLE_CRON", "15 */6 * * *"),
            generate_limit: env_parse("EVOLUTION_AUTO_GENERATE_LIMIT", 3usize).max(1),
            auto_guard_low_risk: env_bool("EVOLUTION_AUTO_GUARD_LOW_RISK", true),
            guard_mode,
            auto_approve_low_risk: env_bool("EVOLUTION_AUTO_APPROVE_LOW_RISK", false),
            approve_requires_guard_pass: env_bool(
                "EVOLUTION_AUTO_APPROVE_REQUIRES_GUARD_PASS",
                true,
            ),
            auto_apply_low_risk: env_bool("EVOLUTION_AUTO_APPLY_LOW_RISK", false),
            apply_requires_guard_pass: env_bool("EVOLUTION_AUTO_APPLY_REQUIRES_GUARD_PASS", true),
            apply_requires_baseline_clear: env_bool(
                "EVOLUTION_AUTO_APPLY_REQUIRES_BASELINE_CLEAR",
                true,
            ),
            approve_actor: env_string("EVOLUTION_AUTO_APPROVE_ACTOR", "evolution-auto"),
            apply_actor: env_string("EVOLUTION_AUTO_APPLY_ACTOR", "evolution-auto"),
        };
        let recovery = RecoverySettings {
            enabled: env_bool("RECOVERY_ENABLED", false),
            heartbeat_path: PathBuf::from(env_string(
                "RECOVERY_HEARTBEAT_PATH",
                &evidence_dir.join("recovery/heartbeat.json").display().to_string(),
            )),
            heartbeat_ttl_s: env_parse("RECOVERY_HEARTBEAT_TTL_S", 30.0f64),
            ready_url: env_string("RECOVERY_READY_URL", "http://127.0.0.1:8091/v1/ready"),
            check_interval_s: env_parse("RECOVERY_CHECK_INTERVAL_S", 10u64).max(1),
            lock_backend: env_string("RECOVERY_LOCK_BACKEND", "file"),
            lock_key: env_string("RECOVERY_LOCK_KEY", "archillx:recovery"),
            lock_ttl_s: env_parse("RECOVERY_LOCK_TTL_S", 60u64),
            redis_url: env_string("REDIS_URL", "redis://127.0.0.1:6379"),
        };
        Self {
            app_env: env_string("APP_ENV", "dev"),
            bind_addr: env_string("ARCHILLX_HTTP_ADDR", "127.0.0.1:8091"),
            db_path: PathBuf::from(env_string(
                "DB_PATH",
                &evidence_dir.join("archillx.sqlite").display().to_string(),
            )),
            migrations_dir: PathBuf::from(env_string("MIGRATIONS_DIR", "migrations")),
            expose_internal_error_details: env_bool("EXPOSE_INTERNAL_ERROR_DETAILS", false),
            enable_metrics: env_bool("ENABLE_METRICS", true),
            enable_telemetry: env_bool("ENABLE_TELEMETRY", true),
            governor_mode,
            risk_warn_threshold: env_parse(
                "RISK_WARN_THRESHOLD",
                archillx_governor::DEFAULT_WARN_THRESHOLD,
            ),
            risk_block_threshold: env_parse(
                "RISK_BLOCK_THRESHOLD",
                archillx_governor::DEFAULT_BLOCK_THRESHOLD,
            ),
            audit_file_max_bytes: env_parse(
                "AUDIT_FILE_MAX_BYTES",
                archillx_audit::DEFAULT_AUDIT_FILE_MAX_BYTES,
            ),
            enable_migration_check: env_bool("ENABLE_MIGRATION_CHECK", true),
            require_migration_head: env_bool("REQUIRE_MIGRATION_HEAD", false),
            enable_evolution: env_bool("ENABLE_EVOLUTION", true),
            scheduler,
            enable_rate_limit: env_bool("ENABLE_RATE_LIMIT", false),
            rate_limit_per_min: env_parse("RATE_LIMIT_PER_MIN", 120usize).max(1),
            high_risk_rate_limit_per_min: env_parse("HIGH_RISK_RATE_LIMIT_PER_MIN", 30usize)
                .max(1),
            recovery,
            evidence_dir,
        }
    }

    pub fn is_production(&self) -> bool {
        self.app_env.eq_ignore_ascii_case("prod") || self.app_env.eq_ignore_ascii_case("production")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_parsing_accepts_common_truthy_values() {
        std::env::set_var("ARCHILLX_TEST_FLAG", "yes");
        assert!(env_bool("ARCHILLX_TEST_FLAG", false));
        std::env::set_var("ARCHILLX_TEST_FLAG", "0");
        assert!(!env_bool("ARCHILLX_TEST_FLAG", true));
        std::env::remove_var("ARCHILLX_TEST_FLAG");
        assert!(env_bool("ARCHILLX_TEST_FLAG", true));
    }

    #[test]
    fn numeric_parsing_falls_back_on_garbage() {
        std::env::set_var("ARCHILLX_TEST_NUM", "not-a-number");
        assert_eq!(env_parse("ARCHILLX_TEST_NUM", 7u64), 7);
        std::env::set_var("ARCHILLX_TEST_NUM", "42");
        assert_eq!(env_parse("ARCHILLX_TEST_NUM", 7u64), 42);
        std::env::remove_var("ARCHILLX_TEST_NUM");
    }
}
