//! Run report and verdict
//!
//! Collects what each phase observed so the outcome can be printed as one
//! human-readable block, whichever phase stopped the run.

use crate::error::HarnessError;
use crate::orchestrator::Phase;
use chrono::{DateTime, Utc};
use rollout_node::{NodeIndex, StateDigest};
use serde::Serialize;
use std::fmt::Write as _;
use std::time::Duration;
use uuid::Uuid;

/// Outcome of a whole run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Verdict {
    /// Every invariant held, states matched and the runtime version changed
    Pass,
    /// Anything else
    Fail,
}

impl Verdict {
    /// Process exit status
    #[inline]
    #[must_use]
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Pass => 0,
            Self::Fail => 1,
        }
    }
}

/// What one completed phase observed
#[derive(Debug, Clone, Serialize)]
pub struct PhaseRecord {
    /// Phase
    pub phase: Phase,
    /// One-line outcome
    pub summary: String,
    /// Rendered probe output, may be empty
    pub detail: String,
    /// Wall time spent in the phase
    pub elapsed: Duration,
}

/// Exported state digests of every node at one height
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateComparison {
    /// Common height
    pub height: u64,
    /// Digest per node, index order
    pub digests: Vec<(NodeIndex, StateDigest)>,
}

impl StateComparison {
    /// Create a comparison
    #[must_use]
    pub fn new(height: u64, digests: Vec<(NodeIndex, StateDigest)>) -> Self {
        Self { height, digests }
    }

    /// Nodes whose digest differs from the first node's
    #[must_use]
    pub fn divergent(&self) -> Vec<NodeIndex> {
        let Some((_, reference)) = self.digests.first() else {
            return Vec::new();
        };
        self.digests
            .iter()
            .filter(|(_, digest)| digest != reference)
            .map(|(node, _)| *node)
            .collect()
    }

    /// Whether every digest is identical
    #[inline]
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        !self.digests.is_empty() && self.divergent().is_empty()
    }

    /// Fail with the rendered digests if any node diverges
    pub fn ensure_consistent(&self) -> Result<(), HarnessError> {
        let divergent = self.divergent();
        if divergent.is_empty() {
            Ok(())
        } else {
            Err(HarnessError::StateDivergence {
                height: self.height,
                divergent,
                observed: self.render(),
            })
        }
    }

    /// One line per node
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (node, digest) in &self.digests {
            let _ = writeln!(out, "  Node {node}: {digest}");
        }
        out
    }
}

/// Everything a run observed, plus its failure if any
#[derive(Debug)]
pub struct RunReport {
    /// Unique id of this run
    pub run_id: Uuid,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// When the run ended
    pub finished_at: Option<DateTime<Utc>>,
    /// Nodes in the scenario
    pub node_count: usize,
    /// Node upgraded first
    pub canary: NodeIndex,
    /// Node owning the sudo account
    pub sudo: NodeIndex,
    /// Completed phases in order
    pub phases: Vec<PhaseRecord>,
    /// Runtime version agreed after cold start
    pub baseline_version: Option<u32>,
    /// Runtime version observed after the upgrade
    pub upgraded_version: Option<u32>,
    /// Final state comparison
    pub comparison: Option<StateComparison>,
    /// Error that stopped the run
    pub failure: Option<HarnessError>,
}

impl RunReport {
    /// Empty report for a scenario
    #[must_use]
    pub fn new(node_count: usize, canary: NodeIndex, sudo: NodeIndex) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            node_count,
            canary,
            sudo,
            phases: Vec::new(),
            baseline_version: None,
            upgraded_version: None,
            comparison: None,
            failure: None,
        }
    }

    /// Record a completed phase
    pub fn record(
        &mut self,
        phase: Phase,
        summary: impl Into<String>,
        detail: impl Into<String>,
        elapsed: Duration,
    ) {
        self.phases.push(PhaseRecord {
            phase,
            summary: summary.into(),
            detail: detail.into(),
            elapsed,
        });
    }

    /// Mark the run finished
    pub fn finish(&mut self, failure: Option<HarnessError>) {
        self.failure = failure;
        self.finished_at = Some(Utc::now());
    }

    /// Last phase that completed
    #[must_use]
    pub fn last_phase(&self) -> Option<Phase> {
        self.phases.last().map(|r| r.phase)
    }

    /// Whether the runtime version strictly changed
    #[must_use]
    pub fn runtime_changed(&self) -> bool {
        matches!(
            (self.baseline_version, self.upgraded_version),
            (Some(before), Some(after)) if before != after
        )
    }

    /// Final judgement
    #[must_use]
    pub fn verdict(&self) -> Verdict {
        let states_match = self
            .comparison
            .as_ref()
            .is_some_and(StateComparison::is_consistent);
        if self.failure.is_none() && states_match && self.runtime_changed() {
            Verdict::Pass
        } else {
            Verdict::Fail
        }
    }

    /// Whether the run passed
    #[inline]
    #[must_use]
    pub fn passed(&self) -> bool {
        self.verdict() == Verdict::Pass
    }

    /// Generate text report
    #[must_use]
    pub fn generate_text(&self) -> String {
        let mut report = String::new();

        report.push_str("=== Rolling Upgrade Report ===\n\n");
        let _ = writeln!(report, "Run: {}", self.run_id);
        let _ = writeln!(report, "Started: {}", self.started_at.to_rfc3339());
        let _ = writeln!(report, "Nodes: {}", self.node_count);
        let _ = writeln!(report, "Sudo node: {}", self.sudo);
        let _ = writeln!(report, "Canary node: {}", self.canary);

        for record in &self.phases {
            let _ = writeln!(
                report,
                "\n--- Phase {}: {} ({:.1}s) ---",
                record.phase.number(),
                record.phase,
                record.elapsed.as_secs_f64()
            );
            let _ = writeln!(report, "{}", record.summary);
            report.push_str(&record.detail);
        }

        let version = |v: Option<u32>| v.map_or_else(|| "unknown".to_string(), |v| v.to_string());
        report.push_str("\n=== Runtime ===\n");
        let _ = writeln!(report, "Baseline: {}", version(self.baseline_version));
        let _ = writeln!(report, "Upgraded: {}", version(self.upgraded_version));

        if let Some(comparison) = &self.comparison {
            let _ = writeln!(report, "\n=== State at #{} ===", comparison.height);
            report.push_str(&comparison.render());
            report.push_str(if comparison.is_consistent() {
                "The same\n"
            } else {
                "DIFFERENT!\n"
            });
        }

        if let Some(failure) = &self.failure {
            report.push_str("\n=== Failure ===\n");
            if let Some(phase) = failure.phase() {
                let _ = writeln!(report, "Phase: {phase}");
            }
            let _ = writeln!(report, "ERROR: {failure}");
        }

        let _ = writeln!(
            report,
            "\n=== Result: {} ===",
            if self.passed() { "PASS" } else { "FAIL" }
        );

        report
    }
}
