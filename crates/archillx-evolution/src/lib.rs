//! Self-evolution pipeline: inspection → plan → proposal → guard →
//! baseline → approval, with an auto-scheduler for low-risk proposals.
//! Every stage persists a cross-linked evidence record. The pipeline never
//! crashes its host: invariant violations are typed errors, and subprocess
//! failures mark checks failed but still persist the run.

pub mod approval;
pub mod artifacts;
pub mod baseline;
pub mod cron;
pub mod dashboard;
pub mod exec;
pub mod guard;
pub mod inspector;
pub mod planner;
pub mod proposer;
pub mod risk;
pub mod scheduler;
pub mod schemas;
pub mod service;
pub mod signals;

pub use approval::{ApprovalVerb, TransitionError};
pub use cron::CronSchedule;
pub use exec::{CmdOutcome, CommandRunner, ProcessRunner};
pub use scheduler::{AutoScheduler, SchedulerSettings};
pub use schemas::*;
pub use service::{EvolutionError, EvolutionService};
pub use signals::{MigrationSettings, SignalCollector};
