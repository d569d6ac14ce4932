//! Checkpoint invariants
//!
//! Pure functions over probe results. Each either passes or returns the
//! `HarnessError` naming the broken invariant with the rendered observation.

use super::Phase;
use crate::error::HarnessError;
use crate::probe::{FinalizationSnapshot, VersionConflict, VersionReport};

/// Every node's finality is known and above zero, and, given a previous
/// snapshot, strictly above its previous height
pub fn require_finalizing(
    phase: Phase,
    snapshot: &FinalizationSnapshot,
    previous: Option<&FinalizationSnapshot>,
) -> Result<(), HarnessError> {
    let unknown = snapshot.unknown_nodes();
    if !unknown.is_empty() {
        return Err(HarnessError::FinalityUnknown {
            phase,
            nodes: unknown,
            observed: snapshot.render(),
        });
    }

    let mut stalled = snapshot.nodes_without_finality();
    if let Some(previous) = previous {
        stalled.extend(snapshot.not_advanced_since(previous));
        stalled.sort_unstable();
        stalled.dedup();
    }
    if stalled.is_empty() {
        Ok(())
    } else {
        Err(HarnessError::LivenessStalled {
            phase,
            nodes: stalled,
            observed: snapshot.render(),
        })
    }
}

/// Every node reports a runtime version, and all report the same one
///
/// A node answering with the error token breaks agreement even when the
/// rest concur.
pub fn require_agreement(phase: Phase, report: &VersionReport) -> Result<u32, HarnessError> {
    let unknown = report.unknown_nodes();
    if !unknown.is_empty() {
        return Err(HarnessError::VersionUnavailable {
            phase,
            nodes: unknown,
            observed: report.render(),
        });
    }
    report.agreed().map_err(|conflict| match conflict {
        VersionConflict::Disagreement(versions) => HarnessError::VersionDisagreement {
            phase,
            versions,
            observed: report.render(),
        },
        VersionConflict::NoneReported => HarnessError::VersionUnavailable {
            phase,
            nodes: Vec::new(),
            observed: report.render(),
        },
    })
}

/// The agreed runtime version is still `baseline`
pub fn require_unchanged(
    phase: Phase,
    report: &VersionReport,
    baseline: u32,
) -> Result<u32, HarnessError> {
    let found = require_agreement(phase, report)?;
    if found == baseline {
        Ok(found)
    } else {
        Err(HarnessError::VersionMismatch {
            phase,
            expected: baseline,
            found,
        })
    }
}

/// `version` differs from `baseline`
pub fn require_changed(phase: Phase, version: u32, baseline: u32) -> Result<u32, HarnessError> {
    if version == baseline {
        Err(HarnessError::VersionUnchanged { phase, baseline })
    } else {
        Ok(version)
    }
}
