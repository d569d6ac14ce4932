//! Process-backed node set
//!
//! Each node is a child process of the harness running the configured
//! executable against the shared chain spec. Records live in a `Vec`
//! indexed by `NodeIndex`; the executable binding, ports and log file of a
//! node are owned by its record and change only through `NodeSet` calls.

use crate::chainspec::bootstrap_chain;
use crate::command::run_captured;
use crate::error::{NodeError, RpcError};
use crate::keys;
use crate::log_scan;
use crate::node_set::{ChainLauncher, NodeSet};
use crate::rpc::{self, RpcClient};
use crate::types::{
    BlockRef, BootstrapSpec, Identity, NodeEndpoint, NodeFlags, NodeIndex, NodePorts, NodeRole,
    NodeStatus, NodeView, PortSlot, StateDigest,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};

/// One node handle
#[derive(Debug)]
struct NodeRecord {
    index: NodeIndex,
    identity: Identity,
    executable: PathBuf,
    base_path: PathBuf,
    ports: Option<NodePorts>,
    log_path: Option<PathBuf>,
    child: Option<Child>,
    last_finalized: Mutex<Option<BlockRef>>,
}

impl NodeRecord {
    fn status(&self) -> NodeStatus {
        if self.child.is_some() {
            NodeStatus::Running
        } else {
            NodeStatus::Stopped
        }
    }

    fn endpoint(&self) -> Option<NodeEndpoint> {
        self.ports.map(NodeEndpoint::local)
    }

    fn remember_finalized(&self, block: &BlockRef) {
        let mut guard = self.last_finalized.lock();
        let newer = guard.as_ref().map_or(true, |known| block.height >= known.height);
        if newer {
            *guard = Some(block.clone());
        }
    }

    fn read_log(&self) -> Option<String> {
        let path = self.log_path.as_ref()?;
        match std::fs::read(path) {
            Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
            Err(err) => {
                tracing::warn!(node = %self.index, path = %path.display(), %err, "cannot read node log");
                None
            }
        }
    }
}

/// Nodes running as local child processes
#[derive(Debug)]
pub struct ProcessNodeSet {
    workdir: PathBuf,
    chainspec: PathBuf,
    flags: NodeFlags,
    rpc: Arc<RpcClient>,
    nodes: Vec<NodeRecord>,
}

impl ProcessNodeSet {
    /// Build a stopped set over an already generated chain spec
    pub fn new(
        workdir: impl Into<PathBuf>,
        chainspec: impl Into<PathBuf>,
        executable: &Path,
        identities: Vec<Identity>,
        rpc: Arc<RpcClient>,
    ) -> Self {
        let workdir = workdir.into();
        let nodes = identities
            .into_iter()
            .enumerate()
            .map(|(i, identity)| NodeRecord {
                index: NodeIndex(i),
                base_path: workdir.join(&identity.account.0),
                identity,
                executable: executable.to_path_buf(),
                ports: None,
                log_path: None,
                child: None,
                last_finalized: Mutex::new(None),
            })
            .collect();

        Self {
            workdir,
            chainspec: chainspec.into(),
            flags: NodeFlags::default(),
            rpc,
            nodes,
        }
    }

    /// Working directory holding chain spec, node databases and logs
    #[inline]
    #[must_use]
    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Current launch flags
    #[inline]
    #[must_use]
    pub fn flags(&self) -> &NodeFlags {
        &self.flags
    }

    /// Log file of the node's most recent launch
    #[must_use]
    pub fn log_path(&self, node: NodeIndex) -> Option<&Path> {
        self.nodes.get(node.get())?.log_path.as_deref()
    }

    fn record(&self, node: NodeIndex) -> Result<&NodeRecord, NodeError> {
        self.check_index(node)?;
        Ok(&self.nodes[node.get()])
    }

    fn record_mut(&mut self, node: NodeIndex) -> Result<&mut NodeRecord, NodeError> {
        self.check_index(node)?;
        Ok(&mut self.nodes[node.get()])
    }

    fn launch_args(&self, record: &NodeRecord, label: &str, ports: NodePorts) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "--chain".into(),
            self.chainspec.clone().into_os_string(),
            "--base-path".into(),
            record.base_path.clone().into_os_string(),
            "--node-key-file".into(),
            record.base_path.join("p2p_secret").into_os_string(),
            "--name".into(),
            format!("{label}{}", record.index).into(),
            "--port".into(),
            ports.p2p.to_string().into(),
            "--rpc-port".into(),
            ports.rpc.to_string().into(),
            "--ws-port".into(),
            ports.ws.to_string().into(),
            "--unit-creation-delay".into(),
            self.flags.unit_creation_delay_ms.to_string().into(),
            "--execution".into(),
            self.flags.execution.as_flag().into(),
        ];
        if self.flags.role == NodeRole::Validator {
            args.push("--validator".into());
        }
        args.extend(self.flags.extra_args.iter().map(OsString::from));
        args
    }

    async fn rpc_block(&self, node: NodeIndex, hash_method: &str) -> Result<BlockRef, RpcError> {
        let hash = rpc::block_hash(&self.rpc(node, hash_method, json!([])).await?)?;
        let header = self.rpc(node, "chain_getHeader", json!([hash.clone()])).await?;
        rpc::header_block(hash, &header)
    }
}

#[async_trait::async_trait]
impl NodeSet for ProcessNodeSet {
    fn len(&self) -> usize {
        self.nodes.len()
    }

    fn identity(&self, node: NodeIndex) -> Result<Identity, NodeError> {
        Ok(self.record(node)?.identity.clone())
    }

    fn view(&self, node: NodeIndex) -> Result<NodeView, NodeError> {
        let record = self.record(node)?;
        Ok(NodeView {
            index: record.index,
            account: record.identity.account.clone(),
            executable: record.executable.clone(),
            status: record.status(),
            endpoint: record.endpoint(),
        })
    }

    fn set_flags(&mut self, flags: NodeFlags) {
        self.flags = flags;
    }

    fn set_executable(&mut self, node: NodeIndex, path: &Path) -> Result<(), NodeError> {
        let record = self.record_mut(node)?;
        tracing::debug!(node = %node, executable = %path.display(), "executable rebound");
        record.executable = path.to_path_buf();
        Ok(())
    }

    async fn start(&mut self, node: NodeIndex, label: &str, slot: PortSlot) -> Result<(), NodeError> {
        let record = self.record(node)?;
        if record.child.is_some() {
            return Ok(());
        }

        let ports = self
            .flags
            .ports
            .ports_for(node, slot)
            .ok_or(NodeError::PortOverflow(node))?;
        let args = self.launch_args(record, label, ports);
        let executable = record.executable.clone();
        let log_path = self.workdir.join(format!("{label}{node}.log"));

        let stdout = std::fs::File::create(&log_path)
            .map_err(|e| NodeError::io(format!("creating {}", log_path.display()), e))?;
        let stderr = stdout
            .try_clone()
            .map_err(|e| NodeError::io(format!("duplicating {}", log_path.display()), e))?;

        let child = Command::new(&executable)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| NodeError::io(format!("spawning {}", executable.display()), e))?;

        tracing::info!(
            node = %node,
            label,
            executable = %executable.display(),
            rpc = ports.rpc,
            p2p = ports.p2p,
            log = %log_path.display(),
            "node started"
        );

        let record = self.record_mut(node)?;
        record.child = Some(child);
        record.ports = Some(ports);
        record.log_path = Some(log_path);
        Ok(())
    }

    async fn stop(&mut self, node: NodeIndex) -> Result<(), NodeError> {
        let record = self.record_mut(node)?;
        let Some(mut child) = record.child.take() else {
            return Ok(());
        };

        child
            .kill()
            .await
            .map_err(|e| NodeError::io(format!("killing node {node}"), e))?;

        if let Some(block) = record.read_log().as_deref().and_then(log_scan::highest_finalized) {
            record.remember_finalized(&block);
        }
        tracing::info!(node = %node, "node stopped");
        Ok(())
    }

    async fn purge(&mut self, node: NodeIndex) -> Result<(), NodeError> {
        let chainspec = self.chainspec.clone();
        let record = self.record_mut(node)?;
        if record.child.is_some() {
            return Err(NodeError::Running(node));
        }

        let base_path = record.base_path.to_string_lossy().into_owned();
        let chain = chainspec.to_string_lossy().into_owned();
        run_captured(
            &record.executable,
            ["purge-chain", "--base-path", base_path.as_str(), "--chain", chain.as_str(), "-y"],
        )
        .await?;

        *record.last_finalized.lock() = None;
        tracing::info!(node = %node, "chain database purged");
        Ok(())
    }

    async fn rpc(&self, node: NodeIndex, method: &str, params: Value) -> Result<Value, RpcError> {
        let record = self
            .nodes
            .get(node.get())
            .ok_or(RpcError::NotRunning(node))?;
        let endpoint = match (&record.child, record.endpoint()) {
            (Some(_), Some(endpoint)) => endpoint,
            _ => return Err(RpcError::NotRunning(node)),
        };
        self.rpc.call(&endpoint.http_url(), method, params).await
    }

    async fn highest_finalized_block(&self, node: NodeIndex) -> Result<BlockRef, NodeError> {
        let record = self.record(node)?;
        if record.child.is_some() {
            let block = self.rpc_block(node, "chain_getFinalizedHead").await?;
            record.remember_finalized(&block);
            return Ok(block);
        }

        if let Some(block) = record.read_log().as_deref().and_then(log_scan::highest_finalized) {
            record.remember_finalized(&block);
        }
        record
            .last_finalized
            .lock()
            .clone()
            .ok_or(NodeError::NoFinalizedBlock(node))
    }

    async fn highest_imported_block(&self, node: NodeIndex) -> Result<BlockRef, NodeError> {
        let record = self.record(node)?;
        if record.child.is_some() {
            return Ok(self.rpc_block(node, "chain_getBlockHash").await?);
        }
        record
            .read_log()
            .as_deref()
            .and_then(log_scan::highest_imported)
            .ok_or(NodeError::NeverStarted(node))
    }

    async fn export_state(&self, node: NodeIndex, height: u64) -> Result<StateDigest, NodeError> {
        let record = self.record(node)?;
        if record.child.is_some() {
            return Err(NodeError::Running(node));
        }
        if let Some(known) = record.last_finalized.lock().as_ref() {
            if known.height < height {
                return Err(NodeError::HeightNotFinalized {
                    node,
                    requested: height,
                    finalized: known.height,
                });
            }
        }

        let base_path = record.base_path.to_string_lossy().into_owned();
        let chain = self.chainspec.to_string_lossy().into_owned();
        let block = height.to_string();
        let export = run_captured(
            &record.executable,
            [
                "export-state",
                "--chain",
                chain.as_str(),
                "--base-path",
                base_path.as_str(),
                block.as_str(),
            ],
        )
        .await?;

        let path = self.workdir.join(format!("state-{node}-{height}.json"));
        tokio::fs::write(&path, &export)
            .await
            .map_err(|e| NodeError::io(format!("writing {}", path.display()), e))?;

        let digest = StateDigest::of_export(height, &export);
        tracing::info!(node = %node, %digest, path = %path.display(), "state exported");
        Ok(digest)
    }
}

/// Launcher producing `ProcessNodeSet`s under one workdir
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    workdir: PathBuf,
    rpc_timeout: Duration,
}

impl ProcessLauncher {
    /// Create a launcher
    #[inline]
    pub fn new(workdir: impl Into<PathBuf>, rpc_timeout: Duration) -> Self {
        Self {
            workdir: workdir.into(),
            rpc_timeout,
        }
    }
}

#[async_trait::async_trait]
impl ChainLauncher for ProcessLauncher {
    type Nodes = ProcessNodeSet;

    async fn generate_keys(
        &self,
        executable: &Path,
        seeds: &[String],
    ) -> Result<Vec<Identity>, NodeError> {
        keys::generate_keys(executable, seeds).await
    }

    async fn bootstrap(&self, spec: BootstrapSpec) -> Result<ProcessNodeSet, NodeError> {
        let chainspec = bootstrap_chain(&self.workdir, &spec).await?;
        let rpc = RpcClient::new(self.rpc_timeout)?;
        Ok(ProcessNodeSet::new(
            self.workdir.clone(),
            chainspec,
            &spec.executable,
            spec.identities,
            Arc::new(rpc),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node_set(dir: &Path) -> ProcessNodeSet {
        let identities = (0..4)
            .map(|i| Identity::new(format!("//{i}"), format!("acct{i}")))
            .collect();
        let rpc = RpcClient::new(Duration::from_secs(1)).unwrap();
        ProcessNodeSet::new(
            dir,
            dir.join("chainspec.json"),
            Path::new("/opt/node-old"),
            identities,
            Arc::new(rpc),
        )
    }

    #[test]
    fn records_are_indexed_and_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let set = node_set(dir.path());

        assert_eq!(set.len(), 4);
        let view = set.view(NodeIndex(2)).unwrap();
        assert_eq!(view.index, NodeIndex(2));
        assert_eq!(view.account.0, "acct2");
        assert_eq!(view.status, NodeStatus::Stopped);
        assert!(view.endpoint.is_none());
    }

    #[test]
    fn unknown_index_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let set = node_set(dir.path());
        assert!(matches!(
            set.view(NodeIndex(4)),
            Err(NodeError::UnknownNode { len: 4, .. })
        ));
    }

    #[test]
    fn executable_rebinding_is_per_node() {
        let dir = tempfile::tempdir().unwrap();
        let mut set = node_set(dir.path());
        set.set_executable(NodeIndex(3), Path::new("/opt/node-new")).unwrap();

        assert_eq!(set.view(NodeIndex(3)).unwrap().executable, Path::new("/opt/node-new"));
        assert_eq!(set.view(NodeIndex(0)).unwrap().executable, Path::new("/opt/node-old"));
    }

    #[test]
    fn launch_args_carry_flags_and_ports() {
        let dir = tempfile::tempdir().unwrap();
        let set = node_set(dir.path());
        let ports = set
            .flags()
            .ports
            .ports_for(NodeIndex(1), PortSlot::Updated)
            .unwrap();
        let args: Vec<String> = set
            .launch_args(&set.nodes[1], "new", ports)
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        let after = |flag: &str| {
            let pos = args.iter().position(|a| a == flag).unwrap();
            args[pos + 1].clone()
        };
        assert_eq!(after("--rpc-port"), "10034");
        assert_eq!(after("--name"), "new1");
        assert_eq!(after("--execution"), "Native");
        assert!(args.iter().any(|a| a == "--validator"));
    }

    #[tokio::test]
    async fn stopped_node_rpc_is_not_running_error() {
        let dir = tempfile::tempdir().unwrap();
        let set = node_set(dir.path());
        let err = set.rpc(NodeIndex(0), "system_version", json!([])).await.unwrap_err();
        assert_eq!(err, RpcError::NotRunning(NodeIndex(0)));
    }

    #[tokio::test]
    async fn stopped_node_finality_comes_from_log() {
        let dir = tempfile::tempdir().unwrap();
        let mut set = node_set(dir.path());
        let log = dir.path().join("old0.log");
        std::fs::write(
            &log,
            "Idle (3 peers), best: #14 (0xaa…bb), finalized #12 (0xcc…dd)\n",
        )
        .unwrap();
        set.nodes[0].log_path = Some(log);

        let block = set.highest_finalized_block(NodeIndex(0)).await.unwrap();
        assert_eq!(block.height, 12);
        let imported = set.highest_imported_block(NodeIndex(0)).await.unwrap();
        assert_eq!(imported.height, 14);
    }

    #[tokio::test]
    async fn never_started_node_has_no_finality() {
        let dir = tempfile::tempdir().unwrap();
        let set = node_set(dir.path());
        assert!(matches!(
            set.highest_finalized_block(NodeIndex(1)).await,
            Err(NodeError::NoFinalizedBlock(NodeIndex(1)))
        ));
    }

    #[tokio::test]
    async fn export_above_known_finality_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let set = node_set(dir.path());
        set.nodes[2].remember_finalized(&BlockRef::new("0x01", 40));

        let err = set.export_state(NodeIndex(2), 41).await.unwrap_err();
        assert!(matches!(
            err,
            NodeError::HeightNotFinalized {
                requested: 41,
                finalized: 40,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn stop_and_purge_of_stopped_node() {
        let dir = tempfile::tempdir().unwrap();
        let mut set = node_set(dir.path());
        // stop is idempotent
        set.stop(NodeIndex(0)).await.unwrap();
        // purge runs the (missing) executable and reports it
        let err = set.purge(NodeIndex(0)).await.unwrap_err();
        assert!(matches!(err, NodeError::Io { .. }));
    }
}
