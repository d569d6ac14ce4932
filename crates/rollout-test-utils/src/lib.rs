//! Testing utilities for the rollout workspace
//!
//! Shared test helpers and fixtures: a simulated validator network that
//! implements the node traits, an artifact workdir, and canned blocks and
//! state digests.

#![allow(missing_docs)]

pub mod sim;

pub use sim::{Fault, SimConfig, SimEvent, SimLauncher, SimNetwork, SimNodeSet, SimSubmitter};

use rollout_node::{BlockRef, NodeIndex, StateDigest};
use tempfile::TempDir;

/// Artifact file names created by `artifact_dir`
pub const ARTIFACT_NAMES: [&str; 4] = ["node-old", "node-new", "runtime.compact.wasm", "signer"];

/// Temporary workdir holding empty files for every default artifact
pub fn artifact_dir() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    for name in ARTIFACT_NAMES {
        std::fs::write(dir.path().join(name), b"").unwrap();
    }
    dir
}

/// Block reference with a recognisable hash
pub fn block(height: u64) -> BlockRef {
    BlockRef::new(format!("0x{height:04x}"), height)
}

/// Digest of a canned export; `divergent` makes it node-specific
pub fn digest(node: NodeIndex, height: u64, divergent: bool) -> (NodeIndex, StateDigest) {
    let content = if divergent {
        format!("state@{height}/{node}")
    } else {
        format!("state@{height}")
    };
    (node, StateDigest::of_export(height, content.as_bytes()))
}
