//! Finality probe
//!
//! Reads every node's highest finalized (and imported) block. Used both to
//! assert liveness against an earlier snapshot and to pick the common
//! height for state comparison.

use super::Observed;
use futures::future::join_all;
use rollout_node::{BlockRef, NodeIndex, NodeSet};
use std::fmt::Write as _;

/// One node's finality reading
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalityEntry {
    /// Node read
    pub node: NodeIndex,
    /// Highest finalized block
    pub finalized: Observed<BlockRef>,
    /// Highest imported block
    pub imported: Observed<BlockRef>,
}

impl FinalityEntry {
    /// Finalized height if known
    #[inline]
    #[must_use]
    pub fn height(&self) -> Option<u64> {
        self.finalized.known().map(|b| b.height)
    }
}

/// Finality of every node at one point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FinalizationSnapshot {
    /// One entry per node, index order
    pub entries: Vec<FinalityEntry>,
}

impl FinalizationSnapshot {
    /// Finalized height of `node`, if read
    #[must_use]
    pub fn height(&self, node: NodeIndex) -> Option<u64> {
        self.entries
            .iter()
            .find(|e| e.node == node)
            .and_then(FinalityEntry::height)
    }

    /// Nodes whose finality could not be read
    #[must_use]
    pub fn unknown_nodes(&self) -> Vec<NodeIndex> {
        self.entries
            .iter()
            .filter(|e| e.finalized.is_unknown())
            .map(|e| e.node)
            .collect()
    }

    /// Nodes with a known finalized height of zero
    #[must_use]
    pub fn nodes_without_finality(&self) -> Vec<NodeIndex> {
        self.entries
            .iter()
            .filter(|e| e.height() == Some(0))
            .map(|e| e.node)
            .collect()
    }

    /// Nodes whose known height did not strictly exceed their height in
    /// `previous`
    ///
    /// A node unknown in `previous` counts as advanced once it is above
    /// zero.
    #[must_use]
    pub fn not_advanced_since(&self, previous: &Self) -> Vec<NodeIndex> {
        self.entries
            .iter()
            .filter_map(|e| {
                let now = e.height()?;
                let before = previous.height(e.node).unwrap_or(0);
                (now <= before).then_some(e.node)
            })
            .collect()
    }

    /// Lowest finalized height across all nodes
    ///
    /// `None` if the snapshot is empty or any node is unknown.
    #[must_use]
    pub fn min_height(&self) -> Option<u64> {
        if self.entries.is_empty() {
            return None;
        }
        self.entries
            .iter()
            .map(FinalityEntry::height)
            .collect::<Option<Vec<_>>>()?
            .into_iter()
            .min()
    }

    /// Human-readable listing, one line per node
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        for e in &self.entries {
            let imported = e.imported.known().map_or_else(|| "unknown".to_string(), |b| format!("#{}", b.height));
            let finalized = match &e.finalized {
                Observed::Known(b) => format!("#{}", b.height),
                Observed::Unknown(reason) => format!("unknown ({reason})"),
            };
            let _ = writeln!(
                out,
                "  Node {}: highest imported = {imported}, highest finalized = {finalized}",
                e.node
            );
        }
        out
    }
}

/// Probe reading finality from every node
#[derive(Debug, Clone, Copy, Default)]
pub struct FinalityProbe;

impl FinalityProbe {
    /// Read every node concurrently
    ///
    /// Never fails; unreadable nodes are recorded as unknown.
    pub async fn probe<N: NodeSet + ?Sized>(nodes: &N) -> FinalizationSnapshot {
        let reads = nodes.indices().into_iter().map(move |node| async move {
            let (finalized, imported) = futures::join!(
                nodes.highest_finalized_block(node),
                nodes.highest_imported_block(node)
            );
            if let Err(err) = &finalized {
                tracing::warn!(node = %node, %err, "finality unknown");
            }
            FinalityEntry {
                node,
                finalized: Observed::from_result(finalized),
                imported: Observed::from_result(imported),
            }
        });

        FinalizationSnapshot {
            entries: join_all(reads).await,
        }
    }
}
