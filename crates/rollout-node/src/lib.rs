//! Rollout Node - collaborator surface of the upgrade harness
//!
//! Everything the orchestrator needs from the outside world, behind traits:
//! - `NodeSet`: a fixed arena of node handles (start/stop/purge, executable
//!   rebinding, JSON-RPC, finality queries, state export)
//! - `ChainLauncher`: key derivation and chain bootstrap
//! - `UpgradeSubmitter`: privileged runtime upgrade submission
//!
//! `ProcessNodeSet`, `ProcessLauncher` and `CliSubmitter` implement them
//! over real node binaries.
//!
//! # Example
//!
//! ```rust,ignore
//! use rollout_node::prelude::*;
//!
//! let launcher = ProcessLauncher::new("/tmp/workdir", Duration::from_secs(30));
//! let ids = launcher.generate_keys(old_bin, &seeds).await?;
//! let mut nodes = launcher.bootstrap(spec).await?;
//! nodes.start(NodeIndex(0), "old", PortSlot::Initial).await?;
//! ```

pub mod chainspec;
mod command;
pub mod error;
pub mod keys;
pub mod log_scan;
pub mod node_set;
pub mod process;
pub mod rpc;
pub mod submitter;
pub mod types;

pub use error::{NodeError, RpcError, SubmitError};
pub use node_set::{ChainLauncher, NodeSet, UpgradeArtifact, UpgradeSubmitter};
pub use process::{ProcessLauncher, ProcessNodeSet};
pub use rpc::RpcClient;
pub use submitter::CliSubmitter;
pub use types::{
    AccountId, BlockRef, BootstrapSpec, ExecutionMode, Identity, NodeEndpoint, NodeFlags,
    NodeIndex, NodePorts, NodeRole, NodeStatus, NodeView, PortPlan, PortSlot, StateDigest,
};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with node sets
    pub use crate::{
        BlockRef, ChainLauncher, Identity, NodeError, NodeIndex, NodeSet, PortSlot, RpcError,
        StateDigest, UpgradeSubmitter,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
