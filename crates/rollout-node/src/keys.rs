//! Participant key derivation via `<binary> key inspect`

use crate::command::run_captured;
use crate::error::NodeError;
use crate::types::Identity;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InspectOutput {
    ss58_address: String,
}

/// Derive the account of every seed, preserving order
pub async fn generate_keys(executable: &Path, seeds: &[String]) -> Result<Vec<Identity>, NodeError> {
    let mut identities = Vec::with_capacity(seeds.len());
    for seed in seeds {
        let stdout = run_captured(
            executable,
            ["key", "inspect", "--output-type", "json", seed.as_str()],
        )
        .await?;
        let account = parse_inspect(&stdout)?;
        tracing::debug!(%account, "derived account");
        identities.push(Identity::new(seed.clone(), account));
    }
    Ok(identities)
}

fn parse_inspect(stdout: &[u8]) -> Result<String, NodeError> {
    let parsed: InspectOutput =
        serde_json::from_slice(stdout).map_err(|e| NodeError::parse("key inspect", e))?;
    Ok(parsed.ss58_address)
}
