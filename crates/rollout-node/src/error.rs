//! Error types for the node collaborators
//!
//! Three families, matching the three external surfaces:
//! - `RpcError` for a single JSON-RPC exchange with one node
//! - `NodeError` for lifecycle, bootstrap and export operations
//! - `SubmitError` for the external upgrade-submission tool

use crate::types::NodeIndex;
use std::path::PathBuf;

/// Failure of a single JSON-RPC call
///
/// Always returned as a value; transport problems never panic past
/// `NodeSet::rpc`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RpcError {
    /// Node has no live endpoint (never started or stopped)
    #[error("node {0} is not running")]
    NotRunning(NodeIndex),

    /// Connection refused, reset or timed out
    #[error("transport error: {0}")]
    Transport(String),

    /// Endpoint answered with a non-success HTTP status
    #[error("http status {0}")]
    Status(u16),

    /// Node answered with a JSON-RPC error object
    #[error("rpc error {code}: {message}")]
    Remote {
        /// JSON-RPC error code
        code: i64,
        /// Error message reported by the node
        message: String,
    },

    /// Response did not have the expected shape
    #[error("malformed response: {0}")]
    Decode(String),
}

impl RpcError {
    /// Whether the failure happened before the node answered at all
    #[inline]
    #[must_use]
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::NotRunning(_) | Self::Transport(_))
    }
}

impl From<reqwest::Error> for RpcError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            Self::Status(status.as_u16())
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// Node lifecycle and chain setup errors
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    /// Index outside the fixed node set
    #[error("unknown node {index} (set has {len} nodes)")]
    UnknownNode {
        /// Requested index
        index: NodeIndex,
        /// Size of the set
        len: usize,
    },

    /// Filesystem or spawn failure
    #[error("{context}: {source}")]
    Io {
        /// What was being attempted
        context: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Helper command exited unsuccessfully
    #[error("`{program}` {args} exited with {status}: {stderr}")]
    CommandFailed {
        /// Program that was run
        program: PathBuf,
        /// Arguments, space separated
        args: String,
        /// Exit status as printed by the OS
        status: String,
        /// Trimmed standard error
        stderr: String,
    },

    /// Helper command produced output we could not interpret
    #[error("unexpected output from {what}: {detail}")]
    Parse {
        /// Which output was being read
        what: String,
        /// Parser complaint
        detail: String,
    },

    /// Operation needs a node that has been started at least once
    #[error("node {0} has never been started")]
    NeverStarted(NodeIndex),

    /// Operation needs the node stopped
    #[error("node {0} is running")]
    Running(NodeIndex),

    /// Port plan cannot place this node
    #[error("port plan overflows for node {0}")]
    PortOverflow(NodeIndex),

    /// Neither RPC nor logs yielded a finalized block
    #[error("no finalized block known for node {0}")]
    NoFinalizedBlock(NodeIndex),

    /// State export requested above what the node has finalized
    #[error("node {node} cannot export state at #{requested}: finalized only to #{finalized}")]
    HeightNotFinalized {
        /// Node asked
        node: NodeIndex,
        /// Height requested
        requested: u64,
        /// Node's finalized height
        finalized: u64,
    },

    /// Bootstrap inputs were inconsistent
    #[error("invalid bootstrap request: {0}")]
    InvalidBootstrap(String),

    /// RPC failure surfaced through a lifecycle call
    #[error(transparent)]
    Rpc(#[from] RpcError),
}

impl NodeError {
    /// Wrap an I/O error with context
    #[inline]
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a parse error
    #[inline]
    pub fn parse(what: impl Into<String>, detail: impl std::fmt::Display) -> Self {
        Self::Parse {
            what: what.into(),
            detail: detail.to_string(),
        }
    }
}

/// Upgrade submission tool errors
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    /// Tool could not be launched
    #[error("failed to launch {tool}: {source}")]
    Spawn {
        /// Tool path
        tool: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Tool ran and reported failure
    #[error("{tool} exited with {status}: {stderr}")]
    Exited {
        /// Tool path
        tool: PathBuf,
        /// Exit status as printed by the OS
        status: String,
        /// Trimmed standard error
        stderr: String,
    },

    /// Submission was refused before reaching the tool
    #[error("submission rejected: {0}")]
    Rejected(String),
}
