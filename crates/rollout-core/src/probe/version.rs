//! Version probe
//!
//! Reads each node's software version (`system_version`) and on-chain
//! runtime spec version (`state_getRuntimeVersion`). Runtime versions that
//! could not be read are kept out of the agreement set.

use super::Observed;
use futures::future::join_all;
use rollout_node::rpc::{spec_version, system_version};
use rollout_node::{NodeIndex, NodeSet};
use serde_json::json;
use std::collections::BTreeSet;
use std::fmt::Write as _;

/// One node's version reading
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionEntry {
    /// Node read
    pub node: NodeIndex,
    /// Node executable version label
    pub software: Observed<String>,
    /// On-chain runtime spec version
    pub runtime: Observed<u32>,
}

/// Why a report has no single runtime version
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionConflict {
    /// More than one distinct runtime version was reported
    Disagreement(BTreeSet<u32>),
    /// No node reported a runtime version
    NoneReported,
}

/// Versions of every node at one point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionReport {
    /// One entry per node, index order
    pub entries: Vec<VersionEntry>,
}

impl VersionReport {
    /// Distinct runtime versions among nodes that answered
    #[must_use]
    pub fn runtime_versions(&self) -> BTreeSet<u32> {
        self.entries
            .iter()
            .filter_map(|e| e.runtime.known().copied())
            .collect()
    }

    /// The single runtime version every answering node agrees on
    ///
    /// Nodes that failed to answer are ignored; they neither confirm nor
    /// break agreement.
    pub fn agreed(&self) -> Result<u32, VersionConflict> {
        let versions = self.runtime_versions();
        let mut iter = versions.iter();
        match (iter.next(), iter.next()) {
            (None, _) => Err(VersionConflict::NoneReported),
            (Some(&only), None) => Ok(only),
            (Some(_), Some(_)) => Err(VersionConflict::Disagreement(versions)),
        }
    }

    /// Runtime version reported by `node`
    #[must_use]
    pub fn runtime_of(&self, node: NodeIndex) -> Option<u32> {
        self.entries
            .iter()
            .find(|e| e.node == node)
            .and_then(|e| e.runtime.known().copied())
    }

    /// Nodes whose runtime version could not be read
    #[must_use]
    pub fn unknown_nodes(&self) -> Vec<NodeIndex> {
        self.entries
            .iter()
            .filter(|e| e.runtime.is_unknown())
            .map(|e| e.node)
            .collect()
    }

    /// Human-readable listing, one line per node
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        for e in &self.entries {
            let _ = writeln!(
                out,
                "  Node {}: system: {}  runtime: {}",
                e.node, e.software, e.runtime
            );
        }
        out
    }
}

/// Probe reading software and runtime versions from every node
#[derive(Debug, Clone, Copy, Default)]
pub struct VersionProbe;

impl VersionProbe {
    /// Read every node concurrently
    ///
    /// Never fails; unreadable values are recorded as unknown.
    pub async fn probe<N: NodeSet + ?Sized>(nodes: &N) -> VersionReport {
        let reads = nodes.indices().into_iter().map(move |node| async move {
            let (software, runtime) = futures::join!(
                nodes.rpc(node, "system_version", json!([])),
                nodes.rpc(node, "state_getRuntimeVersion", json!([]))
            );
            let software = software.and_then(|v| system_version(&v));
            let runtime = runtime.and_then(|v| spec_version(&v));
            if let Err(err) = &runtime {
                tracing::warn!(node = %node, %err, "runtime version unavailable");
            }
            VersionEntry {
                node,
                software: Observed::from_result(software),
                runtime: Observed::from_result(runtime),
            }
        });

        VersionReport {
            entries: join_all(reads).await,
        }
    }
}
