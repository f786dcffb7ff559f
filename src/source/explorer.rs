use std::time::Duration;

use alloy_primitives::Address;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use super::SourceError;

/// Etherscan-compatible explorer API (`module=..&action=..` style).
pub struct ExplorerClient {
    base_url: String,
    api_key: String,
    client: Client,
}

impl ExplorerClient {
    pub fn new(base_url: String, api_key: String, timeout: Duration) -> Result<Self, SourceError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SourceError::Explorer(e.to_string()))?;
        Ok(Self {
            base_url,
            api_key,
            client,
        })
    }

    async fn query(
        &self,
        module: &str,
        action: &str,
        params: &[(&str, String)],
    ) -> Result<Value, SourceError> {
        let mut query: Vec<(&str, String)> = vec![
            ("module", module.to_string()),
            ("action", action.to_string()),
            ("apikey", self.api_key.clone()),
        ];
        query.extend(params.iter().cloned());

        let json: Value = self
            .client
            .get(&self.base_url)
            .query(&query)
            .send()
            .await
            .map_err(|e| SourceError::Explorer(e.to_string()))?
            .json()
            .await
            .map_err(|e| SourceError::Explorer(e.to_string()))?;

        if json["status"].as_str() != Some("1") {
            let message = json["result"]
                .as_str()
                .or_else(|| json["message"].as_str())
                .unwrap_or("unknown error");
            return Err(SourceError::Explorer(format!("{module}.{action}: {message}")));
        }
        debug!(module, action, "explorer query ok");
        Ok(json["result"].clone())
    }

    /// Whether verified source code is published for `address`.
    pub async fn is_verified(&self, address: Address) -> Result<bool, SourceError> {
        let result = self
            .query("contract", "getsourcecode", &[("address", address.to_string())])
            .await?;
        Ok(source_code_published(&result))
    }

    pub async fn holder_count(&self, token: Address) -> Result<u64, SourceError> {
        let result = self
            .query(
                "token",
                "tokenholdercount",
                &[("contractaddress", token.to_string())],
            )
            .await?;
        parse_count(&result)
            .ok_or_else(|| SourceError::Explorer(format!("unexpected holder count {result}")))
    }

    /// Hash of the transaction that deployed `address`.
    pub async fn creation_tx(&self, address: Address) -> Result<String, SourceError> {
        let result = self
            .query(
                "contract",
                "getcontractcreation",
                &[("contractaddresses", address.to_string())],
            )
            .await?;
        result[0]["txHash"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| SourceError::Explorer("creation record has no txHash".into()))
    }
}

fn source_code_published(result: &Value) -> bool {
    result[0]["SourceCode"]
        .as_str()
        .is_some_and(|s| !s.trim().is_empty())
}

fn parse_count(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn verified_needs_source_code() {
        assert!(source_code_published(&json!([{ "SourceCode": "pragma solidity ^0.8.0;" }])));
        assert!(!source_code_published(&json!([{ "SourceCode": "" }])));
        assert!(!source_code_published(&json!([])));
        assert!(!source_code_published(&json!("Invalid API Key")));
    }

    #[test]
    fn counts_from_string_or_number() {
        assert_eq!(parse_count(&json!("1234")), Some(1234));
        assert_eq!(parse_count(&json!(42)), Some(42));
        assert_eq!(parse_count(&json!("many")), None);
        assert_eq!(parse_count(&json!(-1)), None);
    }
}
