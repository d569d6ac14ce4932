//! JSON-RPC 2.0 over HTTP
//!
//! Thin transport: one POST per call, result or error object decoded into
//! `RpcError`. No retries.

use crate::error::RpcError;
use crate::types::BlockRef;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// HTTP JSON-RPC client shared by all nodes of a set
#[derive(Debug)]
pub struct RpcClient {
    http: reqwest::Client,
    next_id: AtomicU64,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<ErrorObject>,
}

#[derive(Debug, Deserialize)]
struct ErrorObject {
    code: i64,
    message: String,
}

impl RpcClient {
    /// Create a client with a per-request timeout
    pub fn new(timeout: Duration) -> Result<Self, RpcError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            next_id: AtomicU64::new(1),
        })
    }

    /// Perform one call against `url`
    pub async fn call(&self, url: &str, method: &str, params: Value) -> Result<Value, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        tracing::trace!(url, method, id, "rpc call");
        let response = self.http.post(url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(RpcError::Status(status.as_u16()));
        }
        let envelope: Envelope = response.json().await?;
        decode_envelope(envelope)
    }
}

fn decode_envelope(envelope: Envelope) -> Result<Value, RpcError> {
    if let Some(err) = envelope.error {
        return Err(RpcError::Remote {
            code: err.code,
            message: err.message,
        });
    }
    envelope
        .result
        .ok_or_else(|| RpcError::Decode("response has neither result nor error".into()))
}

/// Extract `specVersion` from a `state_getRuntimeVersion` result
pub fn spec_version(result: &Value) -> Result<u32, RpcError> {
    result
        .get("specVersion")
        .and_then(Value::as_u64)
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| RpcError::Decode(format!("no specVersion in {result}")))
}

/// Extract the version string from a `system_version` result
pub fn system_version(result: &Value) -> Result<String, RpcError> {
    result
        .as_str()
        .map(str::to_owned)
        .ok_or_else(|| RpcError::Decode(format!("system_version is not a string: {result}")))
}

/// Extract a block hash string result (`chain_getFinalizedHead`)
pub fn block_hash(result: &Value) -> Result<String, RpcError> {
    result
        .as_str()
        .map(str::to_owned)
        .ok_or_else(|| RpcError::Decode(format!("block hash is not a string: {result}")))
}

/// Combine a hash with the `number` field of a `chain_getHeader` result
pub fn header_block(hash: String, header: &Value) -> Result<BlockRef, RpcError> {
    let number = header
        .get("number")
        .and_then(Value::as_str)
        .ok_or_else(|| RpcError::Decode(format!("header without number: {header}")))?;
    let height = parse_hex_number(number)?;
    Ok(BlockRef::new(hash, height))
}

fn parse_hex_number(text: &str) -> Result<u64, RpcError> {
    let digits = text.strip_prefix("0x").unwrap_or(text);
    u64::from_str_radix(digits, 16)
        .map_err(|e| RpcError::Decode(format!("bad block number {text:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn envelope_with_error_object_is_remote_error() {
        let envelope: Envelope = serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": {"code": -32601, "message": "Method not found"}
        }))
        .unwrap();

        assert_eq!(
            decode_envelope(envelope),
            Err(RpcError::Remote {
                code: -32601,
                message: "Method not found".into()
            })
        );
    }

    #[test]
    fn envelope_without_result_is_decode_error() {
        let envelope: Envelope = serde_json::from_value(json!({"jsonrpc": "2.0", "id": 1})).unwrap();
        assert!(matches!(decode_envelope(envelope), Err(RpcError::Decode(_))));
    }

    #[test]
    fn runtime_version_fields() {
        let result = json!({"specName": "aleph-node", "specVersion": 12, "implVersion": 1});
        assert_eq!(spec_version(&result), Ok(12));
        assert!(spec_version(&json!({"specName": "x"})).is_err());
    }

    #[test]
    fn header_number_is_hex() {
        let header = json!({"number": "0x1a", "parentHash": "0x00"});
        let block = header_block("0xabc".into(), &header).unwrap();
        assert_eq!(block, BlockRef::new("0xabc", 26));
    }

    #[test]
    fn system_version_must_be_string() {
        assert_eq!(system_version(&json!("0.9.1-abc")), Ok("0.9.1-abc".to_string()));
        assert!(system_version(&json!(9)).is_err());
    }
}
