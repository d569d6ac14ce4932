//! Running short-lived helper commands of the node executable

use crate::error::NodeError;
use std::ffi::OsStr;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

/// Run `program args..` to completion and return its stdout
///
/// Non-zero exit becomes `NodeError::CommandFailed` carrying stderr.
pub(crate) async fn run_captured<I, S>(program: &Path, args: I) -> Result<Vec<u8>, NodeError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let args: Vec<_> = args.into_iter().map(|a| a.as_ref().to_os_string()).collect();
    let printable = args
        .iter()
        .map(|a| a.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ");
    tracing::debug!(program = %program.display(), args = %printable, "running helper");

    let output = Command::new(program)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| NodeError::io(format!("failed to run {}", program.display()), e))?;

    if output.status.success() {
        Ok(output.stdout)
    } else {
        Err(NodeError::CommandFailed {
            program: program.to_path_buf(),
            args: printable,
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}
