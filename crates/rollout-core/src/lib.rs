//! Rollout Core - rolling-upgrade orchestrator
//!
//! Proves a validator network survives a live upgrade of both its node
//! executable and its on-chain runtime:
//! - bootstraps a fresh chain and cold-starts every node
//! - upgrades one canary node, then submits the new runtime
//! - rolls the rest of the fleet onto the new executable
//! - drains the network and compares exported state across nodes
//!
//! Node processes, keys, RPC and the upgrade tool are reached through the
//! `rollout_node` traits, so scenarios run unchanged against an in-memory
//! network in tests.
//!
//! # Example
//!
//! ```rust,ignore
//! use rollout_core::prelude::*;
//! use rollout_node::{CliSubmitter, ProcessLauncher};
//!
//! let config = HarnessConfig::new().with_workdir("/tmp/workdir");
//! let launcher = ProcessLauncher::new("/tmp/workdir", config.timing.rpc_timeout());
//! let submitter = CliSubmitter::new(config.paths.signer_tool());
//!
//! let report = UpgradeOrchestrator::new(config, launcher, submitter).run().await;
//! println!("{}", report.generate_text());
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod probe;
pub mod report;
pub mod settle;

pub use config::{ArtifactPaths, HarnessConfig, ScenarioConfig, TimingConfig};
pub use error::{ConfigError, ErrorClass, HarnessError};
pub use logging::{init_tracing, LogFormat};
pub use orchestrator::{Phase, UpgradeOrchestrator};
pub use probe::{
    FinalityProbe, FinalizationSnapshot, Observed, VersionConflict, VersionProbe, VersionReport,
};
pub use report::{PhaseRecord, RunReport, StateComparison, Verdict};
pub use settle::SettlePolicy;

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for running the scenario
    pub use crate::{
        HarnessConfig, HarnessError, Phase, RunReport, ScenarioConfig, SettlePolicy,
        TimingConfig, UpgradeOrchestrator, Verdict,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
