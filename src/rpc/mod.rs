use std::time::Duration;

use alloy_primitives::{Address, Bytes, hex};
use reqwest::Client;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::trace;

use crate::config::ChainConfig;

/// Minimal EVM JSON-RPC client.
pub struct EvmRpc {
    url: String,
    client: Client,
    auth: Option<String>, // base64 encoded user:pass
}

impl EvmRpc {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, RpcError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url: url.to_string(),
            client,
            auth: None,
        })
    }

    pub fn from_chain(chain: &ChainConfig, timeout: Duration) -> Result<Self, RpcError> {
        let rpc = Self::new(&chain.rpc_url, timeout)?;
        Ok(match (&chain.rpc_user, &chain.rpc_password) {
            (Some(user), Some(pass)) => rpc.with_basic_auth(user, pass),
            _ => rpc,
        })
    }

    pub fn with_basic_auth(mut self, user: &str, pass: &str) -> Self {
        use base64::{Engine, engine::general_purpose::STANDARD};
        self.auth = Some(STANDARD.encode(format!("{user}:{pass}")));
        self
    }

    pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, RpcError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        trace!(method, "rpc call");

        let mut req = self.client.post(&self.url).json(&body);
        if let Some(auth) = &self.auth {
            req = req.header("Authorization", format!("Basic {auth}"));
        }

        let json: Value = req.send().await?.json().await?;

        match json.get("error") {
            Some(err) if !err.is_null() => Err(RpcError::Rpc(err.clone())),
            _ => Ok(json["result"].clone()),
        }
    }

    /// Deployed bytecode at `latest`; `0x` for accounts without code.
    pub async fn get_code(&self, address: Address) -> Result<Bytes, RpcError> {
        let result = self
            .call("eth_getCode", vec![json!(address), json!("latest")])
            .await?;
        decode_bytes(&result)
    }

    /// Nonce of `address`. For a contract this counts the contracts it created,
    /// not the transfers it has seen.
    pub async fn get_transaction_count(&self, address: Address) -> Result<u64, RpcError> {
        let result = self
            .call(
                "eth_getTransactionCount",
                vec![json!(address), json!("latest")],
            )
            .await?;
        decode_quantity(&result)
    }

    pub async fn eth_call(&self, to: Address, data: Bytes) -> Result<Bytes, RpcError> {
        let result = self
            .call(
                "eth_call",
                vec![json!({ "to": to, "data": data }), json!("latest")],
            )
            .await?;
        decode_bytes(&result)
    }

    pub async fn get_transaction_by_hash(&self, hash: &str) -> Result<Value, RpcError> {
        self.call("eth_getTransactionByHash", vec![json!(hash)]).await
    }

    /// Header-only block lookup by hex-encoded number.
    pub async fn get_block_by_number(&self, number: &str) -> Result<Value, RpcError> {
        self.call("eth_getBlockByNumber", vec![json!(number), json!(false)])
            .await
    }

    /// Unix timestamp (seconds) of the block that mined `tx_hash`.
    pub async fn transaction_timestamp(&self, tx_hash: &str) -> Result<u64, RpcError> {
        let tx = self.get_transaction_by_hash(tx_hash).await?;
        let number = tx["blockNumber"]
            .as_str()
            .ok_or_else(|| RpcError::Decode(format!("transaction {tx_hash} is not mined")))?;
        let block = self.get_block_by_number(number).await?;
        decode_quantity(&block["timestamp"])
    }
}

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("RPC error: {0}")]
    Rpc(Value),

    #[error("decode error: {0}")]
    Decode(String),
}

fn decode_bytes(value: &Value) -> Result<Bytes, RpcError> {
    let s = value
        .as_str()
        .ok_or_else(|| RpcError::Decode(format!("expected hex string, got {value}")))?;
    hex::decode(s)
        .map(Bytes::from)
        .map_err(|e| RpcError::Decode(format!("{s}: {e}")))
}

fn decode_quantity(value: &Value) -> Result<u64, RpcError> {
    let s = value
        .as_str()
        .ok_or_else(|| RpcError::Decode(format!("expected quantity, got {value}")))?;
    let digits = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(digits, 16).map_err(|e| RpcError::Decode(format!("{s}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantity_decoding() {
        assert_eq!(decode_quantity(&json!("0x0")).unwrap(), 0);
        assert_eq!(decode_quantity(&json!("0x1b4")).unwrap(), 436);
        assert!(decode_quantity(&json!(436)).is_err());
        assert!(decode_quantity(&json!("0xzz")).is_err());
    }

    #[test]
    fn bytes_decoding() {
        assert!(decode_bytes(&json!("0x")).unwrap().is_empty());
        assert_eq!(
            decode_bytes(&json!("0x6080")).unwrap().as_ref(),
            &[0x60, 0x80]
        );
        assert!(decode_bytes(&Value::Null).is_err());
    }

    #[test]
    fn basic_auth_header_is_encoded() {
        let rpc = EvmRpc::new("http://127.0.0.1:8545", Duration::from_secs(1))
            .unwrap()
            .with_basic_auth("user", "pass");
        assert_eq!(rpc.auth.as_deref(), Some("dXNlcjpwYXNz"));
    }

    #[test]
    fn chain_without_credentials_has_no_auth() {
        let rpc = EvmRpc::from_chain(&ChainConfig::default(), Duration::from_secs(1)).unwrap();
        assert!(rpc.auth.is_none());
        assert_eq!(rpc.url, "http://127.0.0.1:8545");
    }
}
