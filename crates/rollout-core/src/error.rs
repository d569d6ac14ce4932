//! Error types for the rollout harness
//!
//! Follows the four failure classes of a run:
//! - setup failures (config, keys, bootstrap) abort before any chain exists
//! - RPC failures stay per node until a phase invariant escalates them
//! - invariant violations carry the offending observation for printing
//! - external tool failures are propagated as reported by the tool

use crate::orchestrator::Phase;
use rollout_node::{NodeError, NodeIndex, SubmitError};
use std::collections::BTreeSet;
use std::path::PathBuf;

/// Main harness error type
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// Configuration is unusable
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Key generation or chain bootstrap failed
    #[error("setup failed while {step}: {source}")]
    Setup {
        /// What was being set up
        step: &'static str,
        /// Underlying failure
        #[source]
        source: NodeError,
    },

    /// A scenario precondition does not hold
    #[error("precondition violated: {0}")]
    Precondition(String),

    /// Node lifecycle operation failed mid-scenario
    #[error("[{phase}] node operation failed: {source}")]
    Node {
        /// Phase in progress
        phase: Phase,
        /// Underlying failure
        #[source]
        source: NodeError,
    },

    /// Finality could not be read where the phase needs it
    #[error("[{phase}] finality unknown on nodes {nodes:?}\n{observed}")]
    FinalityUnknown {
        /// Phase in progress
        phase: Phase,
        /// Nodes that returned the unknown sentinel
        nodes: Vec<NodeIndex>,
        /// Rendered snapshot
        observed: String,
    },

    /// Finalized height is zero or did not advance
    #[error("[{phase}] finality not progressing on nodes {nodes:?}\n{observed}")]
    LivenessStalled {
        /// Phase in progress
        phase: Phase,
        /// Nodes that failed to advance
        nodes: Vec<NodeIndex>,
        /// Rendered snapshot
        observed: String,
    },

    /// Nodes report more than one runtime version where agreement is required
    #[error("[{phase}] nodes reported different runtime versions: {versions:?}\n{observed}")]
    VersionDisagreement {
        /// Phase in progress
        phase: Phase,
        /// Distinct versions seen
        versions: BTreeSet<u32>,
        /// Rendered report
        observed: String,
    },

    /// Some node whose runtime version is required did not report one
    #[error("[{phase}] runtime version unavailable from nodes {nodes:?}\n{observed}")]
    VersionUnavailable {
        /// Phase in progress
        phase: Phase,
        /// Nodes that answered with the error token
        nodes: Vec<NodeIndex>,
        /// Rendered report
        observed: String,
    },

    /// Agreed runtime version is not the expected one
    #[error("[{phase}] runtime version {found}, expected {expected}")]
    VersionMismatch {
        /// Phase in progress
        phase: Phase,
        /// Expected version
        expected: u32,
        /// Version reported
        found: u32,
    },

    /// Runtime version did not change after the upgrade
    #[error("[{phase}] runtime version reported by nodes didn't change after the update (still {baseline})")]
    VersionUnchanged {
        /// Phase in progress
        phase: Phase,
        /// Pre-upgrade version
        baseline: u32,
    },

    /// Exported states differ at the common finalized height
    #[error("state divergence at #{height}: nodes {divergent:?} differ from node 0\n{observed}")]
    StateDivergence {
        /// Common height compared
        height: u64,
        /// Nodes whose digest differs from the reference
        divergent: Vec<NodeIndex>,
        /// Rendered digests
        observed: String,
    },

    /// Upgrade submission tool failed
    #[error("upgrade submission failed: {0}")]
    Submission(#[from] SubmitError),
}

/// Failure class of a `HarnessError`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Config, keys, bootstrap, preconditions
    Setup,
    /// Node lifecycle or RPC failure escalated by a phase
    Node,
    /// Liveness, version or state invariant violated
    Invariant,
    /// External submission tool failed
    ExternalTool,
}

impl HarnessError {
    /// Classify the error
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Config(_) | Self::Setup { .. } | Self::Precondition(_) => ErrorClass::Setup,
            Self::Node { .. } | Self::FinalityUnknown { .. } => ErrorClass::Node,
            Self::LivenessStalled { .. }
            | Self::VersionDisagreement { .. }
            | Self::VersionUnavailable { .. }
            | Self::VersionMismatch { .. }
            | Self::VersionUnchanged { .. }
            | Self::StateDivergence { .. } => ErrorClass::Invariant,
            Self::Submission(_) => ErrorClass::ExternalTool,
        }
    }

    /// Whether the failure may clear up while the network converges
    ///
    /// Only these are re-observed inside a polling settle window.
    #[must_use]
    pub fn is_convergence_failure(&self) -> bool {
        matches!(
            self,
            Self::FinalityUnknown { .. }
                | Self::LivenessStalled { .. }
                | Self::VersionDisagreement { .. }
                | Self::VersionUnavailable { .. }
                | Self::VersionMismatch { .. }
                | Self::VersionUnchanged { .. }
        )
    }

    /// Phase the error was raised in, if any
    #[must_use]
    pub fn phase(&self) -> Option<Phase> {
        match self {
            Self::Config(_) | Self::Setup { .. } | Self::Precondition(_) => Some(Phase::Bootstrap),
            Self::Node { phase, .. }
            | Self::FinalityUnknown { phase, .. }
            | Self::LivenessStalled { phase, .. }
            | Self::VersionDisagreement { phase, .. }
            | Self::VersionUnavailable { phase, .. }
            | Self::VersionMismatch { phase, .. }
            | Self::VersionUnchanged { phase, .. } => Some(*phase),
            Self::StateDivergence { .. } => Some(Phase::DrainAndCompare),
            Self::Submission(_) => Some(Phase::RuntimeUpgrade),
        }
    }

    /// Wrap a node failure raised during `phase`
    #[inline]
    pub fn node(phase: Phase, source: NodeError) -> Self {
        Self::Node { phase, source }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Fewer than the four nodes the scenario needs
    #[error("scenario needs at least 4 nodes, got {0}")]
    TooFewNodes(usize),

    /// Seed list does not match node count
    #[error("expected {expected} seeds, got {found}")]
    SeedCount {
        /// Node count
        expected: usize,
        /// Seeds supplied
        found: usize,
    },

    /// Index does not name a node
    #[error("{what} index {index} out of range for {len} nodes")]
    IndexOutOfRange {
        /// Which index
        what: &'static str,
        /// Value supplied
        index: usize,
        /// Node count
        len: usize,
    },

    /// Canary would take the governance signer offline
    #[error("canary node {0} is the sudo account's node")]
    CanaryIsSudo(usize),

    /// Port ranges overlap or overflow
    #[error("port plan collides or overflows for {0} nodes")]
    PortCollision(usize),

    /// Settle policy cannot work
    #[error("invalid settle policy for {phase}: {reason}")]
    InvalidSettle {
        /// Phase name
        phase: &'static str,
        /// Problem
        reason: String,
    },

    /// Required artifact is missing
    #[error("{what} not found at {}", path.display())]
    MissingArtifact {
        /// Artifact role
        what: &'static str,
        /// Path checked
        path: PathBuf,
    },

    /// Config file could not be read
    #[error("reading {}: {source}", path.display())]
    Read {
        /// File path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML for `HarnessConfig`
    #[error("parsing config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Numeric environment/CLI value could not be parsed
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue {
        /// Variable or flag
        key: String,
        /// Raw value
        value: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classes_follow_failure_taxonomy() {
        assert_eq!(
            HarnessError::Precondition("x".into()).class(),
            ErrorClass::Setup
        );
        assert_eq!(
            HarnessError::VersionUnchanged {
                phase: Phase::Propagation,
                baseline: 1
            }
            .class(),
            ErrorClass::Invariant
        );
        assert_eq!(
            HarnessError::Submission(SubmitError::Rejected("x".into())).class(),
            ErrorClass::ExternalTool
        );
    }

    #[test]
    fn state_divergence_is_not_retried() {
        let err = HarnessError::StateDivergence {
            height: 10,
            divergent: vec![NodeIndex(2)],
            observed: String::new(),
        };
        assert!(!err.is_convergence_failure());
        assert_eq!(err.phase(), Some(Phase::DrainAndCompare));
    }

    #[test]
    fn messages_name_the_invariant() {
        let err = HarnessError::VersionDisagreement {
            phase: Phase::ColdStart,
            versions: [1, 2].into_iter().collect(),
            observed: "Node 0: ...".into(),
        };
        let text = err.to_string();
        assert!(text.contains("different runtime versions"));
        assert!(text.contains("{1, 2}"));
    }

    #[test]
    fn config_error_display() {
        assert!(ConfigError::TooFewNodes(3).to_string().contains("at least 4"));
        assert!(ConfigError::CanaryIsSudo(0).to_string().contains("sudo"));
    }
}
