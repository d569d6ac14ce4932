//! Upgrade orchestrator
//!
//! Drives one rolling-upgrade scenario through its phases, strictly in
//! order, against any `ChainLauncher`/`UpgradeSubmitter` pair:
//! - bootstrap a fresh chain on the old executable
//! - cold start and baseline checkpoint
//! - move the canary to the new executable
//! - submit the new runtime through the canary
//! - observe activation
//! - move the rest of the fleet
//! - drain and compare exported state
//!
//! The first broken invariant stops the run; every node is stopped before
//! the failure is reported.

mod checks;
mod phase;

pub use checks::{require_agreement, require_changed, require_finalizing, require_unchanged};
pub use phase::Phase;

use crate::config::HarnessConfig;
use crate::error::HarnessError;
use crate::probe::{FinalityProbe, FinalizationSnapshot, VersionConflict, VersionProbe, VersionReport};
use crate::report::{RunReport, StateComparison};
use crate::settle::{pause, settle_until};
use futures::future::join_all;
use rollout_node::{
    BootstrapSpec, ChainLauncher, NodeError, NodeIndex, NodeSet, PortSlot, UpgradeArtifact,
    UpgradeSubmitter,
};
use tokio::time::Instant;

/// Launch label for nodes on the pre-upgrade executable
pub const INITIAL_LABEL: &str = "old";
/// Launch label for nodes on the post-upgrade executable
pub const UPGRADED_LABEL: &str = "new";

/// Runs the rolling-upgrade scenario
#[derive(Debug)]
pub struct UpgradeOrchestrator<L, S> {
    config: HarnessConfig,
    launcher: L,
    submitter: S,
}

impl<L, S> UpgradeOrchestrator<L, S>
where
    L: ChainLauncher,
    S: UpgradeSubmitter,
{
    /// Create an orchestrator for one run
    #[inline]
    pub fn new(config: HarnessConfig, launcher: L, submitter: S) -> Self {
        Self {
            config,
            launcher,
            submitter,
        }
    }

    /// Configuration of this run
    #[inline]
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Run every phase and report
    ///
    /// Never returns early with an error: the failure, if any, is stored
    /// in the report and decides its verdict.
    pub async fn run(&self) -> RunReport {
        let scenario = &self.config.scenario;
        let mut report = RunReport::new(scenario.node_count, scenario.canary(), scenario.sudo());
        tracing::info!(
            run_id = %report.run_id,
            nodes = scenario.node_count,
            canary = scenario.canary_index,
            "Starting rolling upgrade scenario"
        );

        let mut nodes = None;
        let outcome = self.drive(&mut nodes, &mut report).await;
        if let Err(err) = &outcome {
            tracing::error!("Scenario failed: {}", err);
            if let Some(nodes) = nodes.as_mut() {
                teardown(nodes).await;
            }
        }

        report.finish(outcome.err());
        tracing::info!(verdict = ?report.verdict(), "Scenario finished");
        report
    }

    async fn drive(
        &self,
        slot: &mut Option<L::Nodes>,
        report: &mut RunReport,
    ) -> Result<(), HarnessError> {
        let artifact = self.config.paths.upgrade_artifact();
        let nodes = self.bootstrap(slot, report).await?;

        let (cold, baseline) = self.cold_start(nodes, report).await?;
        report.baseline_version = Some(baseline);

        let partial = self
            .partial_replacement(nodes, &artifact, &cold, baseline, report)
            .await?;
        self.submit_upgrade(nodes, &artifact, report).await?;

        let (propagated, upgraded) = self.propagation(nodes, &partial, baseline, report).await?;
        report.upgraded_version = Some(upgraded);

        let upgraded = self
            .full_rollout(nodes, &artifact, &propagated, baseline, report)
            .await?;
        report.upgraded_version = Some(upgraded);

        self.drain_and_compare(nodes, report).await?;

        let started = Instant::now();
        require_changed(Phase::Verdict, upgraded, baseline)?;
        report.record(
            Phase::Verdict,
            format!("runtime {baseline} -> {upgraded}, exported states identical"),
            String::new(),
            started.elapsed(),
        );
        Ok(())
    }

    async fn bootstrap<'a>(
        &self,
        slot: &'a mut Option<L::Nodes>,
        report: &mut RunReport,
    ) -> Result<&'a mut L::Nodes, HarnessError> {
        let started = Instant::now();
        let scenario = &self.config.scenario;
        self.config.validate()?;

        let old_binary = self.config.paths.old_binary();
        let identities = self
            .launcher
            .generate_keys(&old_binary, &scenario.seeds)
            .await
            .map_err(|source| HarnessError::Setup {
                step: "generating keys",
                source,
            })?;
        if identities.len() != scenario.node_count {
            return Err(HarnessError::Precondition(format!(
                "key generation returned {} identities for {} seeds",
                identities.len(),
                scenario.node_count
            )));
        }

        let sudo = identities[scenario.sudo_index].account.clone();
        if identities[scenario.canary_index].account == sudo {
            return Err(HarnessError::Precondition(format!(
                "canary node {} holds the sudo account {sudo}",
                scenario.canary_index
            )));
        }

        tracing::info!("Bootstrapping the chain with {}", old_binary.display());
        let spec = BootstrapSpec {
            executable: old_binary,
            identities,
            sudo: sudo.clone(),
            chain_type: scenario.chain_type.clone(),
        };
        let mut nodes = self
            .launcher
            .bootstrap(spec)
            .await
            .map_err(|source| HarnessError::Setup {
                step: "bootstrapping the chain",
                source,
            })?;
        if nodes.len() != scenario.node_count {
            return Err(HarnessError::Precondition(format!(
                "bootstrap produced {} nodes, expected {}",
                nodes.len(),
                scenario.node_count
            )));
        }
        nodes.set_flags(self.config.flags.clone());

        report.record(
            Phase::Bootstrap,
            format!(
                "{} nodes, sudo account {sudo} on node {}",
                scenario.node_count, scenario.sudo_index
            ),
            String::new(),
            started.elapsed(),
        );
        Ok(slot.insert(nodes))
    }

    async fn cold_start(
        &self,
        nodes: &mut L::Nodes,
        report: &mut RunReport,
    ) -> Result<(FinalizationSnapshot, u32), HarnessError> {
        let started = Instant::now();
        let fail = |e: NodeError| HarnessError::node(Phase::ColdStart, e);

        tracing::info!("Starting the chain with old binary");
        for node in nodes.indices() {
            nodes
                .start(node, INITIAL_LABEL, PortSlot::Initial)
                .await
                .map_err(fail)?;
        }

        let shared: &L::Nodes = nodes;
        let (snapshot, versions, baseline) =
            settle_until(self.config.timing.cold_start, move || async move {
                let (snapshot, versions) = observe(shared).await;
                require_finalizing(Phase::ColdStart, &snapshot, None)?;
                let baseline = require_agreement(Phase::ColdStart, &versions)?;
                Ok((snapshot, versions, baseline))
            })
            .await?;

        tracing::info!("Baseline runtime version: {}", baseline);
        report.record(
            Phase::ColdStart,
            format!("all nodes finalizing, runtime version {baseline}"),
            detail(&snapshot, &versions),
            started.elapsed(),
        );
        Ok((snapshot, baseline))
    }

    async fn partial_replacement(
        &self,
        nodes: &mut L::Nodes,
        artifact: &UpgradeArtifact,
        previous: &FinalizationSnapshot,
        baseline: u32,
        report: &mut RunReport,
    ) -> Result<FinalizationSnapshot, HarnessError> {
        let started = Instant::now();
        let canary = self.config.scenario.canary();
        let fail = |e: NodeError| HarnessError::node(Phase::PartialReplacement, e);

        tracing::info!("Killing node {} and deleting its database", canary);
        nodes.stop(canary).await.map_err(fail)?;
        nodes.purge(canary).await.map_err(fail)?;

        tracing::info!("Restarting node {} with new binary", canary);
        nodes.set_executable(canary, &artifact.executable).map_err(fail)?;
        nodes
            .start(canary, UPGRADED_LABEL, PortSlot::Updated)
            .await
            .map_err(fail)?;

        let shared: &L::Nodes = nodes;
        let (snapshot, versions) =
            settle_until(self.config.timing.partial_restart, move || async move {
                let (snapshot, versions) = observe(shared).await;
                require_finalizing(Phase::PartialReplacement, &snapshot, Some(previous))?;
                require_unchanged(Phase::PartialReplacement, &versions, baseline)?;
                Ok((snapshot, versions))
            })
            .await?;

        report.record(
            Phase::PartialReplacement,
            format!("canary {canary} finalizing on new binary under runtime {baseline}"),
            detail(&snapshot, &versions),
            started.elapsed(),
        );
        Ok(snapshot)
    }

    async fn submit_upgrade(
        &self,
        nodes: &L::Nodes,
        artifact: &UpgradeArtifact,
        report: &mut RunReport,
    ) -> Result<(), HarnessError> {
        let started = Instant::now();
        let canary = self.config.scenario.canary();
        let fail = |e: NodeError| HarnessError::node(Phase::RuntimeUpgrade, e);

        let endpoint = nodes
            .endpoint(canary)
            .map_err(fail)?
            .ok_or(NodeError::NeverStarted(canary))
            .map_err(fail)?;
        let signer = nodes.identity(self.config.scenario.sudo()).map_err(fail)?;
        let runtime = &artifact.runtime;

        tracing::info!("Submitting extrinsic with new runtime through {}", endpoint);
        self.submitter.submit(&endpoint, &signer, runtime).await?;

        report.record(
            Phase::RuntimeUpgrade,
            format!("{} submitted through node {canary} ({endpoint})", runtime.display()),
            String::new(),
            started.elapsed(),
        );
        Ok(())
    }

    async fn propagation(
        &self,
        nodes: &L::Nodes,
        previous: &FinalizationSnapshot,
        baseline: u32,
        report: &mut RunReport,
    ) -> Result<(FinalizationSnapshot, u32), HarnessError> {
        let started = Instant::now();
        let canary = self.config.scenario.canary();

        let (snapshot, versions, upgraded) =
            settle_until(self.config.timing.propagation, move || async move {
                let (snapshot, versions) = observe(nodes).await;
                require_finalizing(Phase::Propagation, &snapshot, Some(previous))?;
                let upgraded = versions.runtime_of(canary).ok_or_else(|| {
                    HarnessError::VersionUnavailable {
                        phase: Phase::Propagation,
                        nodes: vec![canary],
                        observed: versions.render(),
                    }
                })?;
                require_changed(Phase::Propagation, upgraded, baseline)?;
                Ok((snapshot, versions, upgraded))
            })
            .await?;

        // Nodes may still disagree here; agreement is required again after rollout.
        if let Err(VersionConflict::Disagreement(seen)) = versions.agreed() {
            tracing::warn!("Nodes reported different runtime versions: {:?}", seen);
        }

        report.record(
            Phase::Propagation,
            format!("runtime version {baseline} -> {upgraded} on canary {canary}"),
            detail(&snapshot, &versions),
            started.elapsed(),
        );
        Ok((snapshot, upgraded))
    }

    async fn full_rollout(
        &self,
        nodes: &mut L::Nodes,
        artifact: &UpgradeArtifact,
        previous: &FinalizationSnapshot,
        baseline: u32,
        report: &mut RunReport,
    ) -> Result<u32, HarnessError> {
        let started = Instant::now();
        let canary = self.config.scenario.canary();
        let fail = |e: NodeError| HarnessError::node(Phase::FullRollout, e);
        let rest: Vec<NodeIndex> = nodes.indices().into_iter().filter(|n| *n != canary).collect();

        tracing::info!("Restarting remaining nodes {:?} with new binary", rest);
        for &node in &rest {
            nodes.stop(node).await.map_err(fail)?;
        }
        for &node in &rest {
            nodes.set_executable(node, &artifact.executable).map_err(fail)?;
        }
        pause(self.config.timing.restart_gap_secs).await;
        for &node in &rest {
            nodes
                .start(node, UPGRADED_LABEL, PortSlot::Updated)
                .await
                .map_err(fail)?;
        }

        let shared: &L::Nodes = nodes;
        let (snapshot, versions, upgraded) =
            settle_until(self.config.timing.rollout, move || async move {
                let (snapshot, versions) = observe(shared).await;
                require_finalizing(Phase::FullRollout, &snapshot, Some(previous))?;
                let agreed = require_agreement(Phase::FullRollout, &versions)?;
                let upgraded = require_changed(Phase::FullRollout, agreed, baseline)?;
                Ok((snapshot, versions, upgraded))
            })
            .await?;

        report.record(
            Phase::FullRollout,
            format!("all {} nodes finalizing on new binary, runtime {upgraded}", snapshot.entries.len()),
            detail(&snapshot, &versions),
            started.elapsed(),
        );
        Ok(upgraded)
    }

    async fn drain_and_compare(
        &self,
        nodes: &mut L::Nodes,
        report: &mut RunReport,
    ) -> Result<(), HarnessError> {
        let started = Instant::now();
        let fail = |e: NodeError| HarnessError::node(Phase::DrainAndCompare, e);

        tracing::info!("Stopping the chain");
        for node in nodes.indices() {
            nodes.stop(node).await.map_err(fail)?;
        }
        pause(self.config.timing.drain_secs).await;

        let snapshot = FinalityProbe::probe(&*nodes).await;
        require_finalizing(Phase::DrainAndCompare, &snapshot, None)?;
        let height = snapshot
            .min_height()
            .ok_or_else(|| HarnessError::FinalityUnknown {
                phase: Phase::DrainAndCompare,
                nodes: snapshot.unknown_nodes(),
                observed: snapshot.render(),
            })?;
        tracing::info!(
            "Sanity check: the highest finalized block is {}. Comparing exported states after that block",
            height
        );

        let shared: &L::Nodes = nodes;
        let exports = shared.indices().into_iter().map(move |node| async move {
            shared
                .export_state(node, height)
                .await
                .map(|digest| (node, digest))
        });
        let digests = join_all(exports)
            .await
            .into_iter()
            .collect::<Result<Vec<_>, _>>()
            .map_err(fail)?;

        let comparison = StateComparison::new(height, digests);
        report.comparison = Some(comparison.clone());
        comparison.ensure_consistent()?;

        report.record(
            Phase::DrainAndCompare,
            format!("exported states identical at #{height}"),
            format!("{}{}", snapshot.render(), comparison.render()),
            started.elapsed(),
        );
        Ok(())
    }
}

async fn observe<N: NodeSet + ?Sized>(nodes: &N) -> (FinalizationSnapshot, VersionReport) {
    let observed = futures::join!(FinalityProbe::probe(nodes), VersionProbe::probe(nodes));
    tracing::info!("Finality:\n{}Current version:\n{}", observed.0.render(), observed.1.render());
    observed
}

fn detail(snapshot: &FinalizationSnapshot, versions: &VersionReport) -> String {
    format!("{}{}", snapshot.render(), versions.render())
}

/// Stop every node, logging rather than returning failures
pub async fn teardown<N: NodeSet + ?Sized>(nodes: &mut N) {
    for node in nodes.indices() {
        if let Err(err) = nodes.stop(node).await {
            tracing::warn!(node = %node, %err, "failed to stop node during teardown");
        }
    }
}
