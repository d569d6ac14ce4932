//! Core types for the node collaborators
//!
//! Defines the values that cross the node-set boundary:
//! - Stable node indices and process state
//! - Port planning and endpoints
//! - Account identities
//! - Block references and state digests

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::PathBuf;

/// Stable position of a node inside its set
///
/// Indices are assigned at bootstrap and never change for the lifetime of
/// the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeIndex(pub usize);

impl NodeIndex {
    /// Raw index
    #[inline]
    #[must_use]
    pub fn get(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Process state of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeStatus {
    /// No process is attached
    Stopped,
    /// A process was launched and not yet stopped
    Running,
}

/// Which port range a node is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortSlot {
    /// Ports used for the first launch on the pre-upgrade executable
    Initial,
    /// Fresh range reserved for nodes restarted on upgraded software
    Updated,
}

/// Deterministic port assignment: `base + index`, shifted by
/// `updated_offset` for the updated slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortPlan {
    /// First p2p port
    pub p2p_base: u16,
    /// First HTTP RPC port
    pub rpc_base: u16,
    /// First websocket RPC port
    pub ws_base: u16,
    /// Distance between the initial and updated ranges
    pub updated_offset: u16,
}

impl PortPlan {
    /// Ports for a node in a slot
    ///
    /// Returns `None` if any port would overflow `u16`.
    #[must_use]
    pub fn ports_for(&self, node: NodeIndex, slot: PortSlot) -> Option<NodePorts> {
        let index = u16::try_from(node.get()).ok()?;
        let shift = match slot {
            PortSlot::Initial => 0,
            PortSlot::Updated => self.updated_offset,
        };
        let offset = index.checked_add(shift)?;
        Some(NodePorts {
            p2p: self.p2p_base.checked_add(offset)?,
            rpc: self.rpc_base.checked_add(offset)?,
            ws: self.ws_base.checked_add(offset)?,
        })
    }

    /// Check that `node_count` nodes in both slots never share a port
    #[must_use]
    pub fn is_collision_free(&self, node_count: usize) -> bool {
        let mut seen = std::collections::HashSet::new();
        for slot in [PortSlot::Initial, PortSlot::Updated] {
            for index in 0..node_count {
                let Some(ports) = self.ports_for(NodeIndex(index), slot) else {
                    return false;
                };
                for port in [ports.p2p, ports.rpc, ports.ws] {
                    if !seen.insert(port) {
                        return false;
                    }
                }
            }
        }
        true
    }
}

impl Default for PortPlan {
    fn default() -> Self {
        Self {
            p2p_base: 30334,
            rpc_base: 9933,
            ws_base: 9944,
            updated_offset: 100,
        }
    }
}

/// Concrete ports of one node launch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodePorts {
    /// Peer-to-peer listen port
    pub p2p: u16,
    /// HTTP JSON-RPC port
    pub rpc: u16,
    /// Websocket JSON-RPC port
    pub ws: u16,
}

/// Where a running node can be reached
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeEndpoint {
    /// Host name or address
    pub host: String,
    /// Bound ports
    pub ports: NodePorts,
}

impl NodeEndpoint {
    /// Endpoint on the loopback interface
    #[inline]
    #[must_use]
    pub fn local(ports: NodePorts) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            ports,
        }
    }

    /// URL for HTTP JSON-RPC
    #[must_use]
    pub fn http_url(&self) -> String {
        format!("http://{}:{}", self.host, self.ports.rpc)
    }

    /// `host:port` of the websocket RPC server
    #[must_use]
    pub fn ws_address(&self) -> String {
        format!("{}:{}", self.host, self.ports.ws)
    }
}

impl fmt::Display for NodeEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.ports.rpc)
    }
}

/// SS58-encoded account identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccountId(pub String);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A chain participant: secret seed phrase and derived account
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Secret URI, e.g. `//Alice`
    pub seed: String,
    /// Derived public account
    pub account: AccountId,
}

impl Identity {
    /// Create an identity
    #[inline]
    pub fn new(seed: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            seed: seed.into(),
            account: AccountId(account.into()),
        }
    }
}

// Seed stays out of logs.
impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("account", &self.account)
            .finish_non_exhaustive()
    }
}

/// Reference to a block: hash and height
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockRef {
    /// Block hash as printed by the node (may be abbreviated when read from logs)
    pub hash: String,
    /// Block number
    pub height: u64,
}

impl BlockRef {
    /// Create a block reference
    #[inline]
    pub fn new(hash: impl Into<String>, height: u64) -> Self {
        Self {
            hash: hash.into(),
            height,
        }
    }
}

impl fmt::Display for BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} ({})", self.height, self.hash)
    }
}

/// Digest of a node's full state export truncated at a height
///
/// Two digests compare equal iff the exports were byte-identical (up to
/// SHA-256 collision).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateDigest {
    /// Height the export was truncated at
    pub height: u64,
    /// SHA-256 of the export bytes
    pub sha256: [u8; 32],
    /// Size of the export
    pub len: usize,
}

impl StateDigest {
    /// Digest raw export bytes
    #[must_use]
    pub fn of_export(height: u64, bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self {
            height,
            sha256: hasher.finalize().into(),
            len: bytes.len(),
        }
    }

    /// Hex form of the hash
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.sha256)
    }
}

impl fmt::Display for StateDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.to_hex();
        write!(f, "#{} sha256:{} ({} bytes)", self.height, &hex[..16], self.len)
    }
}

/// Node role flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Authoring and finalizing validator
    Validator,
    /// Non-authoring full node
    Full,
}

/// Runtime execution strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionMode {
    /// Natively compiled runtime when versions match
    Native,
    /// Always the on-chain wasm runtime
    Wasm,
}

impl ExecutionMode {
    /// Value passed to `--execution`
    #[must_use]
    pub fn as_flag(self) -> &'static str {
        match self {
            Self::Native => "Native",
            Self::Wasm => "Wasm",
        }
    }
}

/// Launch flags applied uniformly to every node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeFlags {
    /// Node role
    pub role: NodeRole,
    /// Port assignment
    pub ports: PortPlan,
    /// Delay between consensus units, milliseconds
    pub unit_creation_delay_ms: u64,
    /// Runtime execution strategy
    pub execution: ExecutionMode,
    /// Extra arguments appended verbatim
    #[serde(default)]
    pub extra_args: Vec<String>,
}

impl Default for NodeFlags {
    fn default() -> Self {
        Self {
            role: NodeRole::Validator,
            ports: PortPlan::default(),
            unit_creation_delay_ms: 200,
            execution: ExecutionMode::Native,
            extra_args: Vec::new(),
        }
    }
}

/// Inputs to chain bootstrap
#[derive(Debug, Clone)]
pub struct BootstrapSpec {
    /// Pre-upgrade node executable every node starts with
    pub executable: PathBuf,
    /// All participants, one node each, in index order
    pub identities: Vec<Identity>,
    /// Privileged (sudo) account
    pub sudo: AccountId,
    /// Chain type label passed to the chain spec generator
    pub chain_type: String,
}

impl BootstrapSpec {
    /// Index of the node owned by the sudo account
    #[must_use]
    pub fn sudo_index(&self) -> Option<NodeIndex> {
        self.identities
            .iter()
            .position(|id| id.account == self.sudo)
            .map(NodeIndex)
    }
}

/// Read-only description of a node handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeView {
    /// Stable index
    pub index: NodeIndex,
    /// Owning account
    pub account: AccountId,
    /// Executable the next start launches
    pub executable: PathBuf,
    /// Process state
    pub status: NodeStatus,
    /// Endpoint of the current or last launch
    pub endpoint: Option<NodeEndpoint>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_plan_offsets_by_index_and_slot() {
        let plan = PortPlan::default();

        let initial = plan.ports_for(NodeIndex(2), PortSlot::Initial).unwrap();
        assert_eq!(initial.p2p, 30336);
        assert_eq!(initial.rpc, 9935);
        assert_eq!(initial.ws, 9946);

        let updated = plan.ports_for(NodeIndex(2), PortSlot::Updated).unwrap();
        assert_eq!(updated.rpc, 10035);
    }

    #[test]
    fn port_plan_detects_overlapping_ranges() {
        assert!(PortPlan::default().is_collision_free(4));

        let tight = PortPlan {
            updated_offset: 2,
            ..PortPlan::default()
        };
        assert!(!tight.is_collision_free(4));

        let overflow = PortPlan {
            p2p_base: u16::MAX - 1,
            ..PortPlan::default()
        };
        assert!(!overflow.is_collision_free(4));
    }

    #[test]
    fn state_digest_tracks_content() {
        let a = StateDigest::of_export(10, b"{\"top\":{}}");
        let b = StateDigest::of_export(10, b"{\"top\":{}}");
        let c = StateDigest::of_export(10, b"{\"top\":{\"k\":1}}");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.to_hex().len(), 64);
    }

    #[test]
    fn identity_debug_hides_seed() {
        let id = Identity::new("//Alice", "5Grw");
        let printed = format!("{id:?}");
        assert!(printed.contains("5Grw"));
        assert!(!printed.contains("Alice"));
    }

    #[test]
    fn bootstrap_spec_locates_sudo() {
        let spec = BootstrapSpec {
            executable: PathBuf::from("/bin/node"),
            identities: vec![Identity::new("//A", "a"), Identity::new("//B", "b")],
            sudo: AccountId("b".into()),
            chain_type: "local".into(),
        };
        assert_eq!(spec.sudo_index(), Some(NodeIndex(1)));
    }
}
