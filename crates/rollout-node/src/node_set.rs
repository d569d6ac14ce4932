//! Capability traits the orchestrator drives
//!
//! The harness never talks to node processes directly; it goes through
//! these seams so the same scenario runs against real binaries
//! (`ProcessNodeSet`) or an in-memory network in tests.

use crate::error::{NodeError, RpcError, SubmitError};
use crate::types::{
    BlockRef, BootstrapSpec, Identity, NodeEndpoint, NodeFlags, NodeIndex, NodeStatus, NodeView,
    PortSlot, StateDigest,
};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Fixed-size arena of node handles addressed by `NodeIndex`
///
/// Membership never changes after bootstrap; only per-node executable and
/// process state do. Lifecycle operations are idempotent.
#[async_trait::async_trait]
pub trait NodeSet: Send + Sync {
    /// Number of nodes
    fn len(&self) -> usize;

    /// Whether the set is empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All indices in order
    fn indices(&self) -> Vec<NodeIndex> {
        (0..self.len()).map(NodeIndex).collect()
    }

    /// Identity owning a node
    fn identity(&self, node: NodeIndex) -> Result<Identity, NodeError>;

    /// Read-only view of a node handle
    fn view(&self, node: NodeIndex) -> Result<NodeView, NodeError>;

    /// Process state of a node
    fn status(&self, node: NodeIndex) -> Result<NodeStatus, NodeError> {
        self.view(node).map(|v| v.status)
    }

    /// Endpoint of the current or most recent launch
    fn endpoint(&self, node: NodeIndex) -> Result<Option<NodeEndpoint>, NodeError> {
        self.view(node).map(|v| v.endpoint)
    }

    /// Replace launch flags; affects subsequent starts only
    fn set_flags(&mut self, flags: NodeFlags);

    /// Rebind the executable a future `start` launches
    fn set_executable(&mut self, node: NodeIndex, path: &Path) -> Result<(), NodeError>;

    /// Launch a node on the ports of `slot`; no-op if already running
    async fn start(&mut self, node: NodeIndex, label: &str, slot: PortSlot) -> Result<(), NodeError>;

    /// Terminate a node; no-op if already stopped
    async fn stop(&mut self, node: NodeIndex) -> Result<(), NodeError>;

    /// Delete a node's chain database, keeping its keys
    async fn purge(&mut self, node: NodeIndex) -> Result<(), NodeError>;

    /// Raw JSON-RPC call; every failure comes back as a value
    async fn rpc(&self, node: NodeIndex, method: &str, params: Value) -> Result<Value, RpcError>;

    /// Highest finalized block
    ///
    /// For a stopped node this is the last finalized block it is known to
    /// have reached.
    async fn highest_finalized_block(&self, node: NodeIndex) -> Result<BlockRef, NodeError>;

    /// Highest imported (best) block
    async fn highest_imported_block(&self, node: NodeIndex) -> Result<BlockRef, NodeError>;

    /// Export full state truncated at `height`
    async fn export_state(&self, node: NodeIndex, height: u64) -> Result<StateDigest, NodeError>;

    /// Check an index against the set
    fn check_index(&self, node: NodeIndex) -> Result<(), NodeError> {
        if node.get() < self.len() {
            Ok(())
        } else {
            Err(NodeError::UnknownNode {
                index: node,
                len: self.len(),
            })
        }
    }
}

/// Creates participants and a fresh chain, handing back its node set
#[async_trait::async_trait]
pub trait ChainLauncher: Send + Sync {
    /// Node set produced by bootstrap
    type Nodes: NodeSet;

    /// Derive one identity per seed using `executable`'s key tooling
    async fn generate_keys(
        &self,
        executable: &Path,
        seeds: &[String],
    ) -> Result<Vec<Identity>, NodeError>;

    /// Write genesis for the given participants and return the stopped set
    async fn bootstrap(&self, spec: BootstrapSpec) -> Result<Self::Nodes, NodeError>;
}

/// Submits a runtime upgrade as the privileged account
///
/// Success means only that the submission call completed; activation is
/// observed separately through runtime version queries.
#[async_trait::async_trait]
pub trait UpgradeSubmitter: Send + Sync {
    /// Submit `runtime` through `endpoint`, signed by `signer`
    async fn submit(
        &self,
        endpoint: &NodeEndpoint,
        signer: &Identity,
        runtime: &Path,
    ) -> Result<(), SubmitError>;
}

/// Upgrade artifacts, immutable for a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeArtifact {
    /// Post-upgrade node executable
    pub executable: PathBuf,
    /// Post-upgrade compiled runtime image
    pub runtime: PathBuf,
}
