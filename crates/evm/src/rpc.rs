use std::time::Duration;

use alloy_primitives::U256;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::warn;

use purser_core::payment::ledger::LedgerError;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("rpc transport failed for {method}: {message}")]
    Transport { method: String, message: String },
    #[error("rpc returned error for {method}: {message}")]
    Node { method: String, message: String },
    #[error("{0}")]
    Decode(String),
}

impl From<RpcError> for LedgerError {
    fn from(value: RpcError) -> Self {
        match value {
            RpcError::Node { message, .. } => Self::Rejected(message),
            other => Self::NetworkUnavailable(other.to_string()),
        }
    }
}

/// JSON-RPC over HTTP with an optional fallback endpoint.
///
/// The fallback is only tried when the primary cannot be reached; an error
/// object returned by a live node is final.
#[derive(Clone, Debug)]
pub struct RpcClient {
    http: reqwest::Client,
    primary: String,
    fallback: Option<String>,
}

impl RpcClient {
    pub fn new(
        primary: impl Into<String>,
        fallback: Option<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, primary: primary.into(), fallback })
    }

    pub async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });

        match (self.post(&self.primary, method, &body).await, self.fallback.as_deref()) {
            (Err(RpcError::Transport { message, .. }), Some(fallback)) => {
                warn!(
                    event_name = "ledger.rpc.fallback",
                    method,
                    error = %message,
                    "primary rpc unreachable, trying fallback"
                );
                self.post(fallback, method, &body).await
            }
            (result, _) => result,
        }
    }

    /// `result` as a string, erroring when the node returned null or another type.
    pub async fn call_str(&self, method: &str, params: Value) -> Result<String, RpcError> {
        let value = self.call(method, params).await?;
        value
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| RpcError::Decode(format!("{method} result was missing")))
    }

    async fn post(&self, url: &str, method: &str, body: &Value) -> Result<Value, RpcError> {
        let transport = |error: reqwest::Error| RpcError::Transport {
            method: method.to_owned(),
            message: error.to_string(),
        };
        let response = self.http.post(url).json(body).send().await.map_err(transport)?;
        if !response.status().is_success() {
            return Err(RpcError::Transport {
                method: method.to_owned(),
                message: format!("http status {}", response.status()),
            });
        }
        let value: Value = response.json().await.map_err(|error| {
            RpcError::Decode(format!("failed to parse {method} response JSON: {error}"))
        })?;

        if let Some(error) = value.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_owned)
                .unwrap_or_else(|| error.to_string());
            return Err(RpcError::Node { method: method.to_owned(), message });
        }
        Ok(value.get("result").cloned().unwrap_or(Value::Null))
    }
}

pub fn parse_hex_u64(raw: &str, field: &str) -> Result<u64, RpcError> {
    let value = raw.trim();
    let without_prefix = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .ok_or_else(|| RpcError::Decode(format!("{field} must be 0x-prefixed hex")))?;
    u64::from_str_radix(without_prefix, 16)
        .map_err(|error| RpcError::Decode(format!("failed to parse {field} as hex u64: {error}")))
}

pub fn parse_hex_u256(raw: &str, field: &str) -> Result<U256, RpcError> {
    let trimmed = raw.trim().to_ascii_lowercase();
    let digits = trimmed
        .strip_prefix("0x")
        .ok_or_else(|| RpcError::Decode(format!("{field} must be 0x-prefixed hex")))?;
    if digits.is_empty() {
        return Ok(U256::ZERO);
    }
    if digits.len() > 64 {
        return Err(RpcError::Decode(format!("{field} exceeds 32 bytes")));
    }
    U256::from_str_radix(digits, 16)
        .map_err(|error| RpcError::Decode(format!("failed to parse {field} as hex: {error}")))
}
