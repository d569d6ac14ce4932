//! Runtime upgrade submission through an external signer tool
//!
//! Runs `<tool> --node <ws endpoint> --seed <seed> update-runtime --runtime
//! <path>`. Only the tool's exit status is interpreted.

use crate::error::SubmitError;
use crate::node_set::UpgradeSubmitter;
use crate::types::{Identity, NodeEndpoint};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

/// Submitter backed by a command-line signer tool
#[derive(Debug, Clone)]
pub struct CliSubmitter {
    tool: PathBuf,
    log_filter: String,
}

impl CliSubmitter {
    /// Create a submitter for `tool`
    #[inline]
    pub fn new(tool: impl Into<PathBuf>) -> Self {
        Self {
            tool: tool.into(),
            log_filter: "warn".to_string(),
        }
    }

    /// Override the `RUST_LOG` value passed to the tool
    #[inline]
    #[must_use]
    pub fn with_log_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = filter.into();
        self
    }

    /// Tool path
    #[inline]
    #[must_use]
    pub fn tool(&self) -> &Path {
        &self.tool
    }

    fn arguments(endpoint: &NodeEndpoint, signer: &Identity, runtime: &Path) -> Vec<OsString> {
        vec![
            "--node".into(),
            endpoint.ws_address().into(),
            "--seed".into(),
            signer.seed.clone().into(),
            "update-runtime".into(),
            "--runtime".into(),
            runtime.as_os_str().to_os_string(),
        ]
    }
}

#[async_trait::async_trait]
impl UpgradeSubmitter for CliSubmitter {
    async fn submit(
        &self,
        endpoint: &NodeEndpoint,
        signer: &Identity,
        runtime: &Path,
    ) -> Result<(), SubmitError> {
        if !runtime.is_file() {
            return Err(SubmitError::Rejected(format!(
                "runtime image {} does not exist",
                runtime.display()
            )));
        }

        tracing::info!(
            tool = %self.tool.display(),
            endpoint = %endpoint.ws_address(),
            signer = %signer.account,
            runtime = %runtime.display(),
            "submitting runtime upgrade"
        );

        let output = Command::new(&self.tool)
            .args(Self::arguments(endpoint, signer, runtime))
            .env("RUST_LOG", &self.log_filter)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|source| SubmitError::Spawn {
                tool: self.tool.clone(),
                source,
            })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(SubmitError::Exited {
                tool: self.tool.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NodePorts;

    fn endpoint() -> NodeEndpoint {
        NodeEndpoint::local(NodePorts {
            p2p: 30437,
            rpc: 10036,
            ws: 10047,
        })
    }

    #[test]
    fn arguments_target_ws_endpoint() {
        let signer = Identity::new("//Alice", "5Grw");
        let args = CliSubmitter::arguments(&endpoint(), &signer, Path::new("/tmp/rt.wasm"));
        let args: Vec<String> = args
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        assert_eq!(
            args,
            [
                "--node",
                "127.0.0.1:10047",
                "--seed",
                "//Alice",
                "update-runtime",
                "--runtime",
                "/tmp/rt.wasm"
            ]
        );
    }

    #[tokio::test]
    async fn missing_runtime_is_rejected_before_launch() {
        let submitter = CliSubmitter::new("/nonexistent/signer");
        let signer = Identity::new("//Alice", "5Grw");
        let err = submitter
            .submit(&endpoint(), &signer, Path::new("/nonexistent/runtime.wasm"))
            .await
            .unwrap_err();
        assert!(matches!(err, SubmitError::Rejected(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_tool_reports_exit() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = dir.path().join("runtime.wasm");
        std::fs::write(&runtime, b"\0asm").unwrap();

        let submitter = CliSubmitter::new("false");
        let signer = Identity::new("//Alice", "5Grw");
        let err = submitter.submit(&endpoint(), &signer, &runtime).await.unwrap_err();
        assert!(matches!(err, SubmitError::Exited { .. }));
    }
}
