//! Chain specification generation via `<binary> bootstrap-chain`

use crate::command::run_captured;
use crate::error::NodeError;
use crate::types::BootstrapSpec;
use std::path::{Path, PathBuf};

/// File name of the generated chain spec inside the workdir
pub const CHAINSPEC_FILE: &str = "chainspec.json";

/// Generate genesis for `spec` under `workdir`
///
/// The generator also writes each participant's session keys into
/// `<workdir>/<account>/`. Returns the chain spec path.
pub async fn bootstrap_chain(workdir: &Path, spec: &BootstrapSpec) -> Result<PathBuf, NodeError> {
    if spec.sudo_index().is_none() {
        return Err(NodeError::InvalidBootstrap(format!(
            "sudo account {} is not one of the participants",
            spec.sudo
        )));
    }

    tokio::fs::create_dir_all(workdir)
        .await
        .map_err(|e| NodeError::io(format!("creating {}", workdir.display()), e))?;

    let accounts = spec
        .identities
        .iter()
        .map(|id| id.account.0.as_str())
        .collect::<Vec<_>>()
        .join(",");
    let base_path = workdir.to_string_lossy().into_owned();

    let chainspec = run_captured(
        &spec.executable,
        [
            "bootstrap-chain",
            "--base-path",
            base_path.as_str(),
            "--account-ids",
            accounts.as_str(),
            "--sudo-account-id",
            spec.sudo.0.as_str(),
            "--chain-type",
            spec.chain_type.as_str(),
        ],
    )
    .await?;

    serde_json::from_slice::<serde_json::Value>(&chainspec)
        .map_err(|e| NodeError::parse("bootstrap-chain", e))?;

    let path = workdir.join(CHAINSPEC_FILE);
    tokio::fs::write(&path, &chainspec)
        .await
        .map_err(|e| NodeError::io(format!("writing {}", path.display()), e))?;

    tracing::info!(path = %path.display(), nodes = spec.identities.len(), "chain spec written");
    Ok(path)
}
