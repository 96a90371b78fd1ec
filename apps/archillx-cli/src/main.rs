use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use archillx_kernel::{migration_state, Kernel};
use archillx_recovery::{
    FileLockBackend, HttpReadyProbe, LockBackend, ProcessRunner, RecoveryLog, RedisLockBackend,
    RepairPlan, RunOutcome, Supervisor, SupervisorConfig,
};

#[derive(Parser)]
#[command(name = "archillx-cli", version, about = "ArcHillx operations CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the recovery supervisor (monitor, fenced takeover, repair)
    Recover(RecoverArgs),
    /// Apply pending schema migrations (or report migration state)
    Migrate(MigrateArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LockBackendKind {
    File,
    Redis,
}

#[derive(Args)]
struct RecoverArgs {
    /// Run one monitoring pass and exit (0 repaired, 1 nothing to do, 2 failed)
    #[arg(long)]
    once: bool,
    /// Take over regardless of the need score
    #[arg(long)]
    force_takeover: bool,
    /// Install dependencies from the local mirror only
    #[arg(long)]
    offline: bool,
    /// Readiness probe URL
    #[arg(long)]
    ready_url: Option<String>,
    /// Heartbeat liveness file written by the primary
    #[arg(long)]
    heartbeat_path: Option<PathBuf>,
    /// Heartbeat freshness threshold in seconds
    #[arg(long)]
    heartbeat_ttl_s: Option<f64>,
    /// Seconds between monitoring passes
    #[arg(long)]
    check_interval_s: Option<u64>,
    /// Takeover lock backend
    #[arg(long, value_enum)]
    lock_backend: Option<LockBackendKind>,
    /// Lock file path (file backend) or key prefix (redis backend)
    #[arg(long)]
    lock_key: Option<String>,
    /// Redis lock TTL in seconds
    #[arg(long)]
    lock_ttl_s: Option<u64>,
    /// Redis connection URL
    #[arg(long)]
    redis_url: Option<String>,
    /// Evidence tree root
    #[arg(long)]
    evidence_dir: Option<PathBuf>,
}

#[derive(Args)]
struct MigrateArgs {
    /// SQLite database path
    #[arg(long)]
    db_path: Option<PathBuf>,
    /// Directory holding `.sql` schema revisions
    #[arg(long)]
    migrations_dir: Option<PathBuf>,
    /// Report migration state instead of applying
    #[arg(long)]
    status: bool,
}

fn env_or(name: &str, fallback: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| fallback.to_string())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let code = match cli.command {
        Commands::Recover(args) => match run_recover(args) {
            Ok(outcome) => outcome.exit_code(),
            Err(err) => {
                eprintln!("error: {err:#}");
                2
            }
        },
        Commands::Migrate(args) => match run_migrate(args) {
            Ok(()) => 0,
            Err(err) => {
                eprintln!("error: {err:#}");
                2
            }
        },
    };
    std::process::exit(code);
}

fn run_recover(args: RecoverArgs) -> Result<RunOutcome> {
    let evidence_dir = args
        .evidence_dir
        .unwrap_or_else(|| PathBuf::from(env_or("EVIDENCE_DIR", "evidence")));
    let ready_url = args
        .ready_url
        .unwrap_or_else(|| env_or("RECOVERY_READY_URL", "http://127.0.0.1:8091/v1/ready"));
    let heartbeat_path = args.heartbeat_path.unwrap_or_else(|| {
        PathBuf::from(env_or(
            "RECOVERY_HEARTBEAT_PATH",
            &evidence_dir.join("recovery/heartbeat.json").display().to_string(),
        ))
    });
    let heartbeat_ttl_s = args
        .heartbeat_ttl_s
        .or_else(|| std::env::var("RECOVERY_HEARTBEAT_TTL_S").ok().and_then(|v| v.parse().ok()))
        .unwrap_or(30.0);
    let check_interval_s = args
        .check_interval_s
        .or_else(|| std::env::var("RECOVERY_CHECK_INTERVAL_S").ok().and_then(|v| v.parse().ok()))
        .unwrap_or(10)
        .max(1);
    let backend_kind = args.lock_backend.unwrap_or_else(|| {
        if env_or("RECOVERY_LOCK_BACKEND", "file") == "redis" {
            LockBackendKind::Redis
        } else {
            LockBackendKind::File
        }
    });
    let lock_key = args
        .lock_key
        .unwrap_or_else(|| env_or("RECOVERY_LOCK_KEY", "archillx:recovery"));
    let lock_ttl_s = args
        .lock_ttl_s
        .or_else(|| std::env::var("RECOVERY_LOCK_TTL_S").ok().and_then(|v| v.parse().ok()))
        .unwrap_or(60);

    let backend: Box<dyn LockBackend> = match backend_kind {
        LockBackendKind::File => {
            let path = if lock_key.contains(':') {
                evidence_dir.join("recovery/takeover.lock")
            } else {
                PathBuf::from(&lock_key)
            };
            Box::new(FileLockBackend::new(path))
        }
        LockBackendKind::Redis => {
            let url = args
                .redis_url
                .unwrap_or_else(|| env_or("REDIS_URL", "redis://127.0.0.1:6379"));
            Box::new(RedisLockBackend::new(url, lock_key, lock_ttl_s))
        }
    };

    let owner = format!(
        "{}@{}",
        env_or("HOSTNAME", "archillx-recovery"),
        std::process::id()
    );
    let config = SupervisorConfig {
        owner,
        heartbeat_path,
        heartbeat_ttl_s,
        check_interval: Duration::from_secs(check_interval_s),
        force_takeover: args.force_takeover,
        offline: args.offline,
        once: args.once,
        repair_plan: RepairPlan::default(),
    };
    let probe = HttpReadyProbe::new(&ready_url).context("build readiness probe")?;
    let supervisor = Supervisor::new(
        config,
        Box::new(probe),
        backend,
        Arc::new(ProcessRunner::new(".")),
        RecoveryLog::new(&evidence_dir),
    );
    tracing::info!(url = %ready_url, once = args.once, "recovery supervisor starting");
    Ok(supervisor.run())
}

fn run_migrate(args: MigrateArgs) -> Result<()> {
    let evidence_dir = PathBuf::from(env_or("EVIDENCE_DIR", "evidence"));
    let db_path = args.db_path.unwrap_or_else(|| {
        PathBuf::from(env_or(
            "DB_PATH",
            &evidence_dir.join("archillx.sqlite").display().to_string(),
        ))
    });
    let migrations_dir = args
        .migrations_dir
        .unwrap_or_else(|| PathBuf::from(env_or("MIGRATIONS_DIR", "migrations")));
    let kernel = Kernel::open(&db_path).context("open kernel store")?;

    if args.status {
        let state = migration_state(&kernel, &migrations_dir, true, false);
        println!("{}", serde_json::to_string_pretty(&state)?);
        return Ok(());
    }

    if !migrations_dir.exists() {
        bail!("migrations directory {} not found", migrations_dir.display());
    }
    let applied = kernel.apply_migrations(&migrations_dir)?;
    if applied.is_empty() {
        println!("schema already at head");
    } else {
        for revision in applied {
            println!("applied {revision}");
        }
    }
    Ok(())
}
