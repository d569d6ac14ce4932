//! Harness configuration
//!
//! One structure for everything a run needs, scoped to that run:
//! - artifact paths (workdir, binaries, runtime image, signer tool)
//! - scenario shape (node count, seeds, sudo and canary indices)
//! - node launch flags
//! - per-phase settle windows and fixed waits
//!
//! Sources, later overriding earlier: defaults, TOML file, environment,
//! command line.

use crate::error::ConfigError;
use crate::settle::SettlePolicy;
use rollout_node::{NodeFlags, NodeIndex, UpgradeArtifact};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the workdir
pub const ENV_WORKDIR: &str = "WORKDIR";
/// Environment variable naming the pre-upgrade node binary
pub const ENV_OLD_BINARY: &str = "OLD_BINARY";
/// Environment variable naming the post-upgrade node binary
pub const ENV_NEW_BINARY: &str = "NEW_BINARY";
/// Environment variable naming the post-upgrade runtime image
pub const ENV_NEW_RUNTIME: &str = "NEW_RUNTIME";
/// Environment variable naming the upgrade signer tool
pub const ENV_SIGNER_TOOL: &str = "SIGNER_TOOL";

const DEFAULT_SEEDS: [&str; 4] = ["//Alice", "//Bob", "//Charlie", "//Dave"];

/// Filesystem inputs of a run
///
/// Unset paths default to well-known names inside the workdir.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactPaths {
    /// Chain spec, databases, logs and exports are written here
    pub workdir: PathBuf,
    /// Pre-upgrade node executable
    pub old_binary: Option<PathBuf>,
    /// Post-upgrade node executable
    pub new_binary: Option<PathBuf>,
    /// Post-upgrade compiled runtime
    pub new_runtime: Option<PathBuf>,
    /// Tool that signs and submits the runtime upgrade
    pub signer_tool: Option<PathBuf>,
}

impl ArtifactPaths {
    /// Resolved pre-upgrade binary
    #[must_use]
    pub fn old_binary(&self) -> PathBuf {
        self.resolve(self.old_binary.as_deref(), "node-old")
    }

    /// Resolved post-upgrade binary
    #[must_use]
    pub fn new_binary(&self) -> PathBuf {
        self.resolve(self.new_binary.as_deref(), "node-new")
    }

    /// Resolved post-upgrade runtime
    #[must_use]
    pub fn new_runtime(&self) -> PathBuf {
        self.resolve(self.new_runtime.as_deref(), "runtime.compact.wasm")
    }

    /// Post-upgrade binary and runtime, resolved together
    #[must_use]
    pub fn upgrade_artifact(&self) -> UpgradeArtifact {
        UpgradeArtifact {
            executable: self.new_binary(),
            runtime: self.new_runtime(),
        }
    }

    /// Resolved signer tool
    #[must_use]
    pub fn signer_tool(&self) -> PathBuf {
        self.resolve(self.signer_tool.as_deref(), "signer")
    }

    fn resolve(&self, explicit: Option<&Path>, default_name: &str) -> PathBuf {
        explicit.map_or_else(|| self.workdir.join(default_name), Path::to_path_buf)
    }
}

impl Default for ArtifactPaths {
    fn default() -> Self {
        Self {
            workdir: PathBuf::from("/tmp/workdir"),
            old_binary: None,
            new_binary: None,
            new_runtime: None,
            signer_tool: None,
        }
    }
}

/// Shape of the scenario
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    /// Number of validators
    pub node_count: usize,
    /// Secret seed per validator, index order
    pub seeds: Vec<String>,
    /// Node whose account is the sudo key
    pub sudo_index: usize,
    /// Node upgraded first, in isolation
    pub canary_index: usize,
    /// Chain type label for genesis
    pub chain_type: String,
}

impl ScenarioConfig {
    /// Scenario with `n` nodes, default seeds, sudo first and canary last
    #[must_use]
    pub fn with_node_count(n: usize) -> Self {
        Self {
            node_count: n,
            seeds: default_seeds(n),
            sudo_index: 0,
            canary_index: n.saturating_sub(1),
            chain_type: "local".to_string(),
        }
    }

    /// Change the node count, keeping every other choice
    ///
    /// Seeds are regenerated only when their number no longer matches.
    pub fn resize(&mut self, n: usize) {
        self.node_count = n;
        if self.seeds.len() != n {
            self.seeds = default_seeds(n);
        }
    }

    /// Canary as a node index
    #[inline]
    #[must_use]
    pub fn canary(&self) -> NodeIndex {
        NodeIndex(self.canary_index)
    }

    /// Sudo node as a node index
    #[inline]
    #[must_use]
    pub fn sudo(&self) -> NodeIndex {
        NodeIndex(self.sudo_index)
    }
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self::with_node_count(4)
    }
}

fn default_seeds(n: usize) -> Vec<String> {
    (0..n)
        .map(|i| {
            DEFAULT_SEEDS
                .get(i)
                .map_or_else(|| format!("//Node{i}"), |s| (*s).to_string())
        })
        .collect()
}

/// Settle windows and waits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// After cold start, before the first checkpoint
    pub cold_start: SettlePolicy,
    /// After the canary restarts
    pub partial_restart: SettlePolicy,
    /// After the runtime upgrade is submitted
    pub propagation: SettlePolicy,
    /// After the remaining nodes restart
    pub rollout: SettlePolicy,
    /// Between stopping the remaining nodes and restarting them, seconds
    pub restart_gap_secs: u64,
    /// Between stopping every node and exporting state, seconds
    pub drain_secs: u64,
    /// Per-request JSON-RPC timeout, seconds
    pub rpc_timeout_secs: u64,
}

impl TimingConfig {
    /// Default windows, polled every `interval_secs`
    #[must_use]
    pub fn polling(interval_secs: u64) -> Self {
        Self::default().with_polling(interval_secs)
    }

    /// Turn every settle window into a poll bounded by its current budget
    ///
    /// A window shorter than `interval_secs` is polled once, at its end.
    #[must_use]
    pub fn with_polling(self, interval_secs: u64) -> Self {
        let poll = |p: SettlePolicy| {
            let budget = p.budget().as_secs();
            SettlePolicy::poll(budget, interval_secs.min(budget))
        };
        Self {
            cold_start: poll(self.cold_start),
            partial_restart: poll(self.partial_restart),
            propagation: poll(self.propagation),
            rollout: poll(self.rollout),
            ..self
        }
    }

    /// RPC timeout as a duration
    #[inline]
    #[must_use]
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    fn windows(&self) -> [(&'static str, SettlePolicy); 4] {
        [
            ("cold start", self.cold_start),
            ("partial restart", self.partial_restart),
            ("propagation", self.propagation),
            ("rollout", self.rollout),
        ]
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            cold_start: SettlePolicy::fixed(90),
            partial_restart: SettlePolicy::fixed(30),
            propagation: SettlePolicy::fixed(10),
            rollout: SettlePolicy::fixed(90),
            restart_gap_secs: 30,
            drain_secs: 10,
            rpc_timeout_secs: 30,
        }
    }
}

/// Complete harness configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Filesystem inputs
    pub paths: ArtifactPaths,
    /// Scenario shape
    pub scenario: ScenarioConfig,
    /// Node launch flags
    pub flags: NodeFlags,
    /// Settle windows and waits
    pub timing: TimingConfig,
}

impl HarnessConfig {
    /// Default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With a workdir
    #[inline]
    #[must_use]
    pub fn with_workdir(mut self, workdir: impl Into<PathBuf>) -> Self {
        self.paths.workdir = workdir.into();
        self
    }

    /// With a scenario
    #[inline]
    #[must_use]
    pub fn with_scenario(mut self, scenario: ScenarioConfig) -> Self {
        self.scenario = scenario;
        self
    }

    /// With timings
    #[inline]
    #[must_use]
    pub fn with_timing(mut self, timing: TimingConfig) -> Self {
        self.timing = timing;
        self
    }

    /// Parse a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Read a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Apply environment overrides through `lookup`
    ///
    /// Empty values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty()).map(PathBuf::from);
        if let Some(workdir) = get(ENV_WORKDIR) {
            self.paths.workdir = workdir;
        }
        if let Some(path) = get(ENV_OLD_BINARY) {
            self.paths.old_binary = Some(path);
        }
        if let Some(path) = get(ENV_NEW_BINARY) {
            self.paths.new_binary = Some(path);
        }
        if let Some(path) = get(ENV_NEW_RUNTIME) {
            self.paths.new_runtime = Some(path);
        }
        if let Some(path) = get(ENV_SIGNER_TOOL) {
            self.paths.signer_tool = Some(path);
        }
    }

    /// Check the scenario shape, ports and settle windows
    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.scenario;
        if s.node_count < 4 {
            return Err(ConfigError::TooFewNodes(s.node_count));
        }
        if s.seeds.len() != s.node_count {
            return Err(ConfigError::SeedCount {
                expected: s.node_count,
                found: s.seeds.len(),
            });
        }
        for (what, index) in [("sudo", s.sudo_index), ("canary", s.canary_index)] {
            if index >= s.node_count {
                return Err(ConfigError::IndexOutOfRange {
                    what,
                    index,
                    len: s.node_count,
                });
            }
        }
        if s.canary_index == s.sudo_index {
            return Err(ConfigError::CanaryIsSudo(s.canary_index));
        }
        if !self.flags.ports.is_collision_free(s.node_count) {
            return Err(ConfigError::PortCollision(s.node_count));
        }
        for (phase, policy) in self.timing.windows() {
            if let Some(reason) = policy.problem() {
                return Err(ConfigError::InvalidSettle { phase, reason });
            }
        }
        Ok(())
    }

    /// Check that every input artifact exists
    pub fn check_artifacts(&self) -> Result<(), ConfigError> {
        let artifacts = [
            ("pre-upgrade binary", self.paths.old_binary()),
            ("post-upgrade binary", self.paths.new_binary()),
            ("post-upgrade runtime", self.paths.new_runtime()),
            ("signer tool", self.paths.signer_tool()),
        ];
        for (what, path) in artifacts {
            if !path.is_file() {
                return Err(ConfigError::MissingArtifact { what, path });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_canonical_scenario() {
        let config = HarnessConfig::new();
        assert_eq!(config.scenario.node_count, 4);
        assert_eq!(config.scenario.seeds, ["//Alice", "//Bob", "//Charlie", "//Dave"]);
        assert_eq!(config.scenario.sudo_index, 0);
        assert_eq!(config.scenario.canary_index, 3);
        assert_eq!(config.timing.cold_start, SettlePolicy::fixed(90));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn paths_default_inside_workdir() {
        let config = HarnessConfig::new().with_workdir("/data/run");
        assert_eq!(config.paths.old_binary(), PathBuf::from("/data/run/node-old"));
        assert_eq!(
            config.paths.new_runtime(),
            PathBuf::from("/data/run/runtime.compact.wasm")
        );

        let mut paths = config.paths;
        paths.new_binary = Some(PathBuf::from("/opt/node-2.0"));
        let artifact = paths.upgrade_artifact();
        assert_eq!(artifact.executable, PathBuf::from("/opt/node-2.0"));
        assert_eq!(artifact.runtime, PathBuf::from("/data/run/runtime.compact.wasm"));
    }

    #[test]
    fn env_overrides_paths() {
        let env: HashMap<&str, &str> = [
            (ENV_WORKDIR, "/w"),
            (ENV_NEW_BINARY, "/bin/new"),
            (ENV_SIGNER_TOOL, ""),
        ]
        .into_iter()
        .collect();
        let mut config = HarnessConfig::new();
        config.apply_env(|k| env.get(k).map(|v| (*v).to_string()));

        assert_eq!(config.paths.workdir, PathBuf::from("/w"));
        assert_eq!(config.paths.new_binary(), PathBuf::from("/bin/new"));
        assert_eq!(config.paths.old_binary(), PathBuf::from("/w/node-old"));
        assert_eq!(config.paths.signer_tool(), PathBuf::from("/w/signer"));
    }

    #[test]
    fn toml_overrides_selected_fields() {
        let config = HarnessConfig::from_toml_str(
            r#"
            [scenario]
            node_count = 5
            seeds = ["//A", "//B", "//C", "//D", "//E"]
            canary_index = 4

            [timing.rollout]
            mode = "poll"
            timeout_secs = 120
            interval_secs = 5

            [flags]
            role = "validator"
            unit_creation_delay_ms = 300
            execution = "Wasm"
            ports = { p2p_base = 40000, rpc_base = 41000, ws_base = 42000, updated_offset = 50 }
            "#,
        )
        .unwrap();

        assert_eq!(config.scenario.node_count, 5);
        assert_eq!(config.scenario.sudo_index, 0);
        assert_eq!(config.timing.rollout, SettlePolicy::poll(120, 5));
        assert_eq!(config.timing.cold_start, SettlePolicy::fixed(90));
        assert_eq!(config.flags.unit_creation_delay_ms, 300);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_small_networks() {
        let config = HarnessConfig::new().with_scenario(ScenarioConfig::with_node_count(3));
        assert!(matches!(config.validate(), Err(ConfigError::TooFewNodes(3))));
    }

    #[test]
    fn rejects_canary_on_sudo_node() {
        let mut scenario = ScenarioConfig::default();
        scenario.canary_index = 0;
        let config = HarnessConfig::new().with_scenario(scenario);
        assert!(matches!(config.validate(), Err(ConfigError::CanaryIsSudo(0))));
    }

    #[test]
    fn rejects_out_of_range_and_seed_mismatch() {
        let mut scenario = ScenarioConfig::default();
        scenario.canary_index = 7;
        let config = HarnessConfig::new().with_scenario(scenario);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::IndexOutOfRange { what: "canary", .. })
        ));

        let mut scenario = ScenarioConfig::default();
        scenario.seeds.pop();
        let config = HarnessConfig::new().with_scenario(scenario);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::SeedCount { expected: 4, found: 3 })
        ));
    }

    #[test]
    fn rejects_bad_poll_window() {
        let mut timing = TimingConfig::default();
        timing.propagation = SettlePolicy::poll(10, 0);
        let config = HarnessConfig::new().with_timing(timing);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidSettle { phase: "propagation", .. })
        ));
    }

    #[test]
    fn polling_timing_keeps_budgets() {
        let timing = TimingConfig::polling(3);
        assert_eq!(timing.rollout, SettlePolicy::poll(90, 3));
        assert_eq!(timing.propagation, SettlePolicy::poll(10, 3));
        assert_eq!(timing.drain_secs, 10);
    }

    #[test]
    fn polling_interval_is_clamped_to_short_windows() {
        let timing = TimingConfig::polling(15);
        assert_eq!(timing.propagation, SettlePolicy::poll(10, 10));
        assert_eq!(timing.cold_start, SettlePolicy::poll(90, 15));
        assert!(HarnessConfig::new().with_timing(timing).validate().is_ok());
    }

    #[test]
    fn missing_artifacts_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let config = HarnessConfig::new().with_workdir(dir.path());
        assert!(matches!(
            config.check_artifacts(),
            Err(ConfigError::MissingArtifact { what: "pre-upgrade binary", .. })
        ));

        for name in ["node-old", "node-new", "runtime.compact.wasm", "signer"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        assert!(config.check_artifacts().is_ok());
    }

    #[test]
    fn resize_keeps_roles_and_matching_seeds() {
        let mut scenario = ScenarioConfig {
            seeds: vec!["//A".into(), "//B".into(), "//C".into(), "//D".into()],
            canary_index: 2,
            chain_type: "dev".into(),
            ..ScenarioConfig::default()
        };
        scenario.resize(4);
        assert_eq!(scenario.seeds[0], "//A");
        assert_eq!(scenario.canary_index, 2);
        assert_eq!(scenario.chain_type, "dev");

        scenario.resize(5);
        assert_eq!(scenario.node_count, 5);
        assert_eq!(scenario.seeds.len(), 5);
        assert_eq!(scenario.canary_index, 2);
        assert_eq!(scenario.chain_type, "dev");
    }

    #[test]
    fn extra_nodes_get_generated_seeds() {
        let scenario = ScenarioConfig::with_node_count(6);
        assert_eq!(scenario.seeds[4], "//Node4");
        assert_eq!(scenario.canary(), NodeIndex(5));
    }
}
