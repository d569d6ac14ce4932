//! Scenario phases

use serde::{Deserialize, Serialize};
use std::fmt;

/// One step of the rolling-upgrade scenario, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Keys, chain spec and genesis
    Bootstrap,
    /// All nodes on the old executable, first liveness checkpoint
    ColdStart,
    /// Canary moved to the new executable
    PartialReplacement,
    /// New runtime submitted through the canary
    RuntimeUpgrade,
    /// Runtime activation observed
    Propagation,
    /// Remaining nodes moved to the new executable
    FullRollout,
    /// Nodes stopped and exported state compared
    DrainAndCompare,
    /// Final judgement
    Verdict,
}

impl Phase {
    /// Every phase in execution order
    pub const ALL: [Self; 8] = [
        Self::Bootstrap,
        Self::ColdStart,
        Self::PartialReplacement,
        Self::RuntimeUpgrade,
        Self::Propagation,
        Self::FullRollout,
        Self::DrainAndCompare,
        Self::Verdict,
    ];

    /// 1-based position in the scenario
    #[must_use]
    pub fn number(self) -> usize {
        self as usize + 1
    }

    /// Short human-readable name
    #[must_use]
    pub fn title(self) -> &'static str {
        match self {
            Self::Bootstrap => "bootstrap",
            Self::ColdStart => "cold start",
            Self::PartialReplacement => "partial replacement",
            Self::RuntimeUpgrade => "runtime upgrade",
            Self::Propagation => "propagation",
            Self::FullRollout => "full rollout",
            Self::DrainAndCompare => "drain and compare",
            Self::Verdict => "verdict",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.title())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_are_numbered_in_order() {
        for (i, phase) in Phase::ALL.iter().enumerate() {
            assert_eq!(phase.number(), i + 1);
        }
        assert!(Phase::ColdStart < Phase::DrainAndCompare);
        assert_eq!(Phase::PartialReplacement.to_string(), "partial replacement");
    }
}
