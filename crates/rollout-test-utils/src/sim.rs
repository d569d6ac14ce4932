//! In-memory simulated validator network
//!
//! One shared chain: while more than two thirds of the nodes run, a block
//! is produced and finalized every `block_time` of tokio time, so tests
//! driven with a paused clock advance the chain by sleeping. Running nodes
//! follow the chain head; stopped nodes keep the last height they saw.
//! A submitted runtime activates `activation_delay` blocks later.

use async_trait::async_trait;
use parking_lot::Mutex;
use rollout_node::{
    AccountId, BlockRef, BootstrapSpec, ChainLauncher, Identity, NodeEndpoint, NodeError,
    NodeFlags, NodeIndex, NodeSet, NodeStatus, NodeView, PortSlot, RpcError, StateDigest,
    SubmitError, UpgradeSubmitter,
};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Injected misbehaviour
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Fault {
    /// Node never follows the chain head
    StalledNode(NodeIndex),
    /// Every RPC to the node fails at the transport level
    RpcDown(NodeIndex),
    /// Only `state_getRuntimeVersion` fails on the node
    RuntimeVersionDown(NodeIndex),
    /// Node follows the chain until its first restart, then stalls
    StallAfterRestart(NodeIndex),
    /// Node keeps reporting the runtime active when it was last started
    StaleRuntime(NodeIndex),
    /// Node's exported state differs from everyone else's
    DivergentState(NodeIndex),
    /// Submissions succeed but never activate
    UpgradeIgnored,
    /// Node reports a runtime version one above the chain's
    MismatchedRuntime(NodeIndex),
    /// Chain bootstrap fails
    BootstrapFails,
}

/// Operation seen by the simulated network
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimEvent {
    KeysGenerated {
        executable: PathBuf,
        count: usize,
    },
    Bootstrapped {
        executable: PathBuf,
        sudo: AccountId,
    },
    FlagsSet,
    ExecutableSet {
        node: NodeIndex,
        executable: PathBuf,
    },
    Started {
        node: NodeIndex,
        label: String,
        slot: PortSlot,
        executable: PathBuf,
    },
    Stopped(NodeIndex),
    Purged(NodeIndex),
    Submitted {
        endpoint: NodeEndpoint,
        signer: AccountId,
        runtime: PathBuf,
    },
    Exported {
        node: NodeIndex,
        height: u64,
    },
}

/// Tunables of the simulated chain
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Time per block
    pub block_time: Duration,
    /// Runtime version at genesis
    pub genesis_runtime: u32,
    /// Version a submitted runtime activates as
    pub upgraded_runtime: u32,
    /// Blocks between submission and activation
    pub activation_delay: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            block_time: Duration::from_secs(1),
            genesis_runtime: 12,
            upgraded_runtime: 13,
            activation_delay: 3,
        }
    }
}

#[derive(Debug)]
struct SimNode {
    identity: Identity,
    executable: PathBuf,
    running: bool,
    endpoint: Option<NodeEndpoint>,
    finalized: u64,
    starts: u32,
    started_at: u64,
}

#[derive(Debug)]
struct SimState {
    config: SimConfig,
    faults: HashSet<Fault>,
    journal: Vec<SimEvent>,
    flags: NodeFlags,
    nodes: Vec<SimNode>,
    sudo: Option<AccountId>,
    height: u64,
    carry: Duration,
    last_tick: Instant,
    runtime_changes: Vec<(u64, u32)>,
}

impl SimState {
    fn has(&self, fault: &Fault) -> bool {
        self.faults.contains(fault)
    }

    fn has_quorum(&self) -> bool {
        let running = self.nodes.iter().filter(|n| n.running).count();
        !self.nodes.is_empty() && running * 3 > self.nodes.len() * 2
    }

    /// Bring the chain and every running node up to now
    fn sync(&mut self) {
        let now = Instant::now();
        if self.has_quorum() {
            let elapsed = now.duration_since(self.last_tick) + self.carry;
            let block_nanos = self.config.block_time.as_nanos().max(1);
            let blocks = elapsed.as_nanos() / block_nanos;
            self.height += u64::try_from(blocks).unwrap_or(u64::MAX);
            let spent = block_nanos * blocks;
            self.carry = Duration::from_nanos(
                u64::try_from(elapsed.as_nanos() - spent).unwrap_or_default(),
            );
        } else {
            self.carry = Duration::ZERO;
        }
        self.last_tick = now;

        let height = self.height;
        for (i, node) in self.nodes.iter_mut().enumerate() {
            let index = NodeIndex(i);
            let stalled = self.faults.contains(&Fault::StalledNode(index))
                || (node.starts > 1 && self.faults.contains(&Fault::StallAfterRestart(index)));
            if node.running && !stalled {
                node.finalized = height;
            }
        }
    }

    fn runtime_at(&self, height: u64) -> u32 {
        self.runtime_changes
            .iter()
            .rev()
            .find(|(from, _)| *from <= height)
            .map_or(self.config.genesis_runtime, |(_, v)| *v)
    }

    fn node(&self, node: NodeIndex) -> Result<&SimNode, NodeError> {
        self.nodes.get(node.get()).ok_or(NodeError::UnknownNode {
            index: node,
            len: self.nodes.len(),
        })
    }

    fn node_mut(&mut self, node: NodeIndex) -> Result<&mut SimNode, NodeError> {
        let len = self.nodes.len();
        self.nodes
            .get_mut(node.get())
            .ok_or(NodeError::UnknownNode { index: node, len })
    }
}

fn block_hash(height: u64) -> String {
    format!("0x{height:064x}")
}

fn software_label(executable: &Path) -> String {
    let name = executable
        .file_name()
        .map_or_else(|| "node".to_string(), |n| n.to_string_lossy().into_owned());
    format!("0.9.0-{name}")
}

/// Handle on one simulated network
///
/// Clones share the same chain.
#[derive(Debug, Clone)]
pub struct SimNetwork {
    state: Arc<Mutex<SimState>>,
}

impl SimNetwork {
    /// Empty network; nodes appear at bootstrap
    pub fn new(config: SimConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                config,
                faults: HashSet::new(),
                journal: Vec::new(),
                flags: NodeFlags::default(),
                nodes: Vec::new(),
                sudo: None,
                height: 0,
                carry: Duration::ZERO,
                last_tick: Instant::now(),
                runtime_changes: Vec::new(),
            })),
        }
    }

    /// Inject a fault
    pub fn inject(&self, fault: Fault) -> &Self {
        self.state.lock().faults.insert(fault);
        self
    }

    /// Launcher bound to this network
    pub fn launcher(&self) -> SimLauncher {
        SimLauncher {
            state: Arc::clone(&self.state),
        }
    }

    /// Submitter bound to this network
    pub fn submitter(&self) -> SimSubmitter {
        SimSubmitter {
            state: Arc::clone(&self.state),
        }
    }

    /// Every operation so far, in order
    pub fn journal(&self) -> Vec<SimEvent> {
        self.state.lock().journal.clone()
    }

    /// Current chain height
    pub fn height(&self) -> u64 {
        let mut state = self.state.lock();
        state.sync();
        state.height
    }

    /// Runtime version at the current head
    pub fn runtime_version(&self) -> u32 {
        let mut state = self.state.lock();
        state.sync();
        state.runtime_at(state.height)
    }
}

impl Default for SimNetwork {
    fn default() -> Self {
        Self::new(SimConfig::default())
    }
}

/// `ChainLauncher` over a `SimNetwork`
#[derive(Debug, Clone)]
pub struct SimLauncher {
    state: Arc<Mutex<SimState>>,
}

#[async_trait]
impl ChainLauncher for SimLauncher {
    type Nodes = SimNodeSet;

    async fn generate_keys(
        &self,
        executable: &Path,
        seeds: &[String],
    ) -> Result<Vec<Identity>, NodeError> {
        self.state.lock().journal.push(SimEvent::KeysGenerated {
            executable: executable.to_path_buf(),
            count: seeds.len(),
        });
        Ok(seeds
            .iter()
            .map(|seed| Identity::new(seed.clone(), format!("5Sim{}", seed.trim_start_matches('/'))))
            .collect())
    }

    async fn bootstrap(&self, spec: BootstrapSpec) -> Result<SimNodeSet, NodeError> {
        let mut state = self.state.lock();
        if state.has(&Fault::BootstrapFails) {
            return Err(NodeError::InvalidBootstrap("simulated genesis failure".into()));
        }
        if spec.sudo_index().is_none() {
            return Err(NodeError::InvalidBootstrap(format!(
                "sudo account {} is not a participant",
                spec.sudo
            )));
        }

        state.nodes = spec
            .identities
            .iter()
            .map(|identity| SimNode {
                identity: identity.clone(),
                executable: spec.executable.clone(),
                running: false,
                endpoint: None,
                finalized: 0,
                starts: 0,
                started_at: 0,
            })
            .collect();
        state.sudo = Some(spec.sudo.clone());
        state.height = 0;
        state.carry = Duration::ZERO;
        state.last_tick = Instant::now();
        state.journal.push(SimEvent::Bootstrapped {
            executable: spec.executable,
            sudo: spec.sudo,
        });
        Ok(SimNodeSet {
            state: Arc::clone(&self.state),
        })
    }
}

/// `NodeSet` over a `SimNetwork`
#[derive(Debug, Clone)]
pub struct SimNodeSet {
    state: Arc<Mutex<SimState>>,
}

#[async_trait]
impl NodeSet for SimNodeSet {
    fn len(&self) -> usize {
        self.state.lock().nodes.len()
    }

    fn identity(&self, node: NodeIndex) -> Result<Identity, NodeError> {
        Ok(self.state.lock().node(node)?.identity.clone())
    }

    fn view(&self, node: NodeIndex) -> Result<NodeView, NodeError> {
        let state = self.state.lock();
        let record = state.node(node)?;
        Ok(NodeView {
            index: node,
            account: record.identity.account.clone(),
            executable: record.executable.clone(),
            status: if record.running {
                NodeStatus::Running
            } else {
                NodeStatus::Stopped
            },
            endpoint: record.endpoint.clone(),
        })
    }

    fn set_flags(&mut self, flags: NodeFlags) {
        let mut state = self.state.lock();
        state.flags = flags;
        state.journal.push(SimEvent::FlagsSet);
    }

    fn set_executable(&mut self, node: NodeIndex, path: &Path) -> Result<(), NodeError> {
        let mut state = self.state.lock();
        state.node_mut(node)?.executable = path.to_path_buf();
        state.journal.push(SimEvent::ExecutableSet {
            node,
            executable: path.to_path_buf(),
        });
        Ok(())
    }

    async fn start(&mut self, node: NodeIndex, label: &str, slot: PortSlot) -> Result<(), NodeError> {
        let mut state = self.state.lock();
        state.sync();
        let ports = state
            .flags
            .ports
            .ports_for(node, slot)
            .ok_or(NodeError::PortOverflow(node))?;
        let height = state.height;
        let record = state.node_mut(node)?;
        if record.running {
            return Ok(());
        }
        record.running = true;
        record.starts += 1;
        record.started_at = height;
        record.endpoint = Some(NodeEndpoint::local(ports));
        let executable = record.executable.clone();
        state.sync();
        state.journal.push(SimEvent::Started {
            node,
            label: label.to_string(),
            slot,
            executable,
        });
        Ok(())
    }

    async fn stop(&mut self, node: NodeIndex) -> Result<(), NodeError> {
        let mut state = self.state.lock();
        state.sync();
        let record = state.node_mut(node)?;
        if !record.running {
            return Ok(());
        }
        record.running = false;
        state.journal.push(SimEvent::Stopped(node));
        Ok(())
    }

    async fn purge(&mut self, node: NodeIndex) -> Result<(), NodeError> {
        let mut state = self.state.lock();
        let record = state.node_mut(node)?;
        if record.running {
            return Err(NodeError::Running(node));
        }
        record.finalized = 0;
        state.journal.push(SimEvent::Purged(node));
        Ok(())
    }

    async fn rpc(&self, node: NodeIndex, method: &str, _params: Value) -> Result<Value, RpcError> {
        let mut state = self.state.lock();
        state.sync();
        let record = state.nodes.get(node.get()).ok_or(RpcError::NotRunning(node))?;
        if !record.running {
            return Err(RpcError::NotRunning(node));
        }
        if state.has(&Fault::RpcDown(node)) {
            return Err(RpcError::Transport("connection refused".into()));
        }

        let finalized = record.finalized;
        match method {
            "system_version" => Ok(json!(software_label(&record.executable))),
            "state_getRuntimeVersion" => {
                if state.has(&Fault::RuntimeVersionDown(node)) {
                    return Err(RpcError::Remote {
                        code: -32000,
                        message: "runtime unavailable".into(),
                    });
                }
                let seen = if state.has(&Fault::StaleRuntime(node)) {
                    finalized.min(record.started_at)
                } else {
                    finalized
                };
                let mut version = state.runtime_at(seen);
                if state.has(&Fault::MismatchedRuntime(node)) {
                    version += 1;
                }
                Ok(json!({ "specName": "sim", "specVersion": version }))
            }
            "chain_getFinalizedHead" => Ok(json!(block_hash(finalized))),
            _ => Err(RpcError::Remote {
                code: -32601,
                message: "Method not found".into(),
            }),
        }
    }

    async fn highest_finalized_block(&self, node: NodeIndex) -> Result<BlockRef, NodeError> {
        let mut state = self.state.lock();
        state.sync();
        let record = state.node(node)?;
        if record.running && state.has(&Fault::RpcDown(node)) {
            return Err(RpcError::Transport("connection refused".into()).into());
        }
        if record.starts == 0 {
            return Err(NodeError::NoFinalizedBlock(node));
        }
        Ok(BlockRef::new(block_hash(record.finalized), record.finalized))
    }

    async fn highest_imported_block(&self, node: NodeIndex) -> Result<BlockRef, NodeError> {
        let mut state = self.state.lock();
        state.sync();
        let record = state.node(node)?;
        if record.starts == 0 {
            return Err(NodeError::NeverStarted(node));
        }
        let imported = if record.running {
            record.finalized + 1
        } else {
            record.finalized
        };
        Ok(BlockRef::new(block_hash(imported), imported))
    }

    async fn export_state(&self, node: NodeIndex, height: u64) -> Result<StateDigest, NodeError> {
        let mut state = self.state.lock();
        let record = state.node(node)?;
        if record.running {
            return Err(NodeError::Running(node));
        }
        if record.finalized < height {
            return Err(NodeError::HeightNotFinalized {
                node,
                requested: height,
                finalized: record.finalized,
            });
        }

        let mut export = format!(
            "{{\"height\":{height},\"runtime\":{},\"head\":\"{}\"}}",
            state.runtime_at(height),
            block_hash(height)
        );
        if state.has(&Fault::DivergentState(node)) {
            let _ = write!(export, "/* node {node} */");
        }
        state.journal.push(SimEvent::Exported { node, height });
        Ok(StateDigest::of_export(height, export.as_bytes()))
    }
}

/// `UpgradeSubmitter` over a `SimNetwork`
///
/// Accepts submissions only through a running node's endpoint and only
/// when signed by the sudo account.
#[derive(Debug, Clone)]
pub struct SimSubmitter {
    state: Arc<Mutex<SimState>>,
}

#[async_trait]
impl UpgradeSubmitter for SimSubmitter {
    async fn submit(
        &self,
        endpoint: &NodeEndpoint,
        signer: &Identity,
        runtime: &Path,
    ) -> Result<(), SubmitError> {
        let mut state = self.state.lock();
        state.sync();
        let reachable = state
            .nodes
            .iter()
            .any(|n| n.running && n.endpoint.as_ref() == Some(endpoint));
        if !reachable {
            return Err(SubmitError::Rejected(format!("no node listening on {endpoint}")));
        }
        if state.sudo.as_ref() != Some(&signer.account) {
            return Err(SubmitError::Rejected(format!(
                "{} is not the sudo account",
                signer.account
            )));
        }

        state.journal.push(SimEvent::Submitted {
            endpoint: endpoint.clone(),
            signer: signer.account.clone(),
            runtime: runtime.to_path_buf(),
        });
        if !state.has(&Fault::UpgradeIgnored) {
            let at = state.height + state.config.activation_delay;
            let version = state.config.upgraded_runtime;
            state.runtime_changes.push((at, version));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollout_node::PortPlan;

    async fn four_nodes(net: &SimNetwork) -> SimNodeSet {
        let launcher = net.launcher();
        let seeds: Vec<String> = ["//A", "//B", "//C", "//D"].iter().map(|s| (*s).to_string()).collect();
        let identities = launcher.generate_keys(Path::new("old"), &seeds).await.unwrap();
        let sudo = identities[0].account.clone();
        launcher
            .bootstrap(BootstrapSpec {
                executable: PathBuf::from("/bin/node-old"),
                identities,
                sudo,
                chain_type: "local".into(),
            })
            .await
            .unwrap()
    }

    async fn start_all(nodes: &mut SimNodeSet) {
        for node in nodes.indices() {
            nodes.start(node, "old", PortSlot::Initial).await.unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn chain_advances_only_with_quorum() {
        let net = SimNetwork::default();
        let mut nodes = four_nodes(&net).await;
        start_all(&mut nodes).await;

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(net.height(), 10);

        nodes.stop(NodeIndex(0)).await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(net.height(), 15);

        nodes.stop(NodeIndex(1)).await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(net.height(), 15);
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_node_keeps_last_height() {
        let net = SimNetwork::default();
        let mut nodes = four_nodes(&net).await;
        start_all(&mut nodes).await;

        tokio::time::sleep(Duration::from_secs(4)).await;
        nodes.stop(NodeIndex(3)).await.unwrap();
        tokio::time::sleep(Duration::from_secs(4)).await;

        assert_eq!(nodes.highest_finalized_block(NodeIndex(3)).await.unwrap().height, 4);
        assert_eq!(nodes.highest_finalized_block(NodeIndex(0)).await.unwrap().height, 8);
        assert_eq!(
            nodes.rpc(NodeIndex(3), "system_version", json!([])).await,
            Err(RpcError::NotRunning(NodeIndex(3)))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn submitted_runtime_activates_later() {
        let net = SimNetwork::default();
        let mut nodes = four_nodes(&net).await;
        start_all(&mut nodes).await;
        tokio::time::sleep(Duration::from_secs(2)).await;

        let endpoint = nodes.endpoint(NodeIndex(1)).unwrap().unwrap();
        let sudo = nodes.identity(NodeIndex(0)).unwrap();
        net.submitter()
            .submit(&endpoint, &sudo, Path::new("runtime.wasm"))
            .await
            .unwrap();
        assert_eq!(net.runtime_version(), 12);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(net.runtime_version(), 13);
    }

    #[tokio::test(start_paused = true)]
    async fn submission_requires_sudo_signer() {
        let net = SimNetwork::default();
        let mut nodes = four_nodes(&net).await;
        start_all(&mut nodes).await;

        let endpoint = nodes.endpoint(NodeIndex(1)).unwrap().unwrap();
        let not_sudo = nodes.identity(NodeIndex(2)).unwrap();
        let result = net
            .submitter()
            .submit(&endpoint, &not_sudo, Path::new("runtime.wasm"))
            .await;
        assert!(matches!(result, Err(SubmitError::Rejected(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn export_requires_stopped_and_finalized() {
        let net = SimNetwork::default();
        net.inject(Fault::DivergentState(NodeIndex(2)));
        let mut nodes = four_nodes(&net).await;
        start_all(&mut nodes).await;
        tokio::time::sleep(Duration::from_secs(6)).await;

        assert!(matches!(
            nodes.export_state(NodeIndex(0), 3).await,
            Err(NodeError::Running(_))
        ));
        for node in nodes.indices() {
            nodes.stop(node).await.unwrap();
        }
        assert!(matches!(
            nodes.export_state(NodeIndex(0), 7).await,
            Err(NodeError::HeightNotFinalized { finalized: 6, .. })
        ));

        let a = nodes.export_state(NodeIndex(0), 5).await.unwrap();
        let b = nodes.export_state(NodeIndex(1), 5).await.unwrap();
        let c = nodes.export_state(NodeIndex(2), 5).await.unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_stall_leaves_first_run_alone() {
        let net = SimNetwork::default();
        net.inject(Fault::StallAfterRestart(NodeIndex(3)));
        let mut nodes = four_nodes(&net).await;
        start_all(&mut nodes).await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(nodes.highest_finalized_block(NodeIndex(3)).await.unwrap().height, 5);

        nodes.stop(NodeIndex(3)).await.unwrap();
        nodes.purge(NodeIndex(3)).await.unwrap();
        nodes.start(NodeIndex(3), "new", PortSlot::Updated).await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(nodes.highest_finalized_block(NodeIndex(3)).await.unwrap().height, 0);
        assert_eq!(net.height(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn runtime_version_faults() {
        let net = SimNetwork::default();
        net.inject(Fault::RuntimeVersionDown(NodeIndex(1)))
            .inject(Fault::StaleRuntime(NodeIndex(2)));
        let mut nodes = four_nodes(&net).await;
        start_all(&mut nodes).await;
        tokio::time::sleep(Duration::from_secs(2)).await;

        let endpoint = nodes.endpoint(NodeIndex(0)).unwrap().unwrap();
        let sudo = nodes.identity(NodeIndex(0)).unwrap();
        net.submitter()
            .submit(&endpoint, &sudo, Path::new("runtime.wasm"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(spec_version(&nodes, 0).await, Ok(Some(13)));
        assert!(matches!(spec_version(&nodes, 1).await, Err(RpcError::Remote { .. })));
        assert!(nodes.rpc(NodeIndex(1), "system_version", json!([])).await.is_ok());
        assert_eq!(spec_version(&nodes, 2).await, Ok(Some(12)));

        nodes.stop(NodeIndex(2)).await.unwrap();
        nodes.start(NodeIndex(2), "new", PortSlot::Updated).await.unwrap();
        assert_eq!(spec_version(&nodes, 2).await, Ok(Some(13)));
    }

    async fn spec_version(nodes: &SimNodeSet, node: usize) -> Result<Option<u64>, RpcError> {
        nodes
            .rpc(NodeIndex(node), "state_getRuntimeVersion", json!([]))
            .await
            .map(|v| v["specVersion"].as_u64())
    }

    #[tokio::test(start_paused = true)]
    async fn updated_slot_uses_offset_ports() {
        let net = SimNetwork::default();
        let mut nodes = four_nodes(&net).await;
        nodes.start(NodeIndex(3), "new", PortSlot::Updated).await.unwrap();

        let endpoint = nodes.endpoint(NodeIndex(3)).unwrap().unwrap();
        let expected = PortPlan::default()
            .ports_for(NodeIndex(3), PortSlot::Updated)
            .unwrap();
        assert_eq!(endpoint.ports, expected);
    }
}
