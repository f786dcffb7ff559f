use std::str::FromStr;
use std::time::Duration;

use alloy_primitives::{Address, Bytes, hex};
use alloy_sol_types::{SolCall, sol};
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tracing::{debug, info};

use super::explorer::ExplorerClient;
use super::{SignalSource, SourceError};
use crate::config::ChainConfig;
use crate::rpc::EvmRpc;

sol! {
    interface IERC20Metadata {
        function name() external view returns (string);
        function symbol() external view returns (string);
    }

    interface IUniswapV2Factory {
        function getPair(address tokenA, address tokenB) external view returns (address pair);
    }

    interface IUniswapV2Pair {
        function getReserves() external view returns (
            uint112 reserve0,
            uint112 reserve1,
            uint32 blockTimestampLast
        );
    }
}

/// Wrapped native tokens use 18 decimals on every supported chain.
const NATIVE_DECIMALS: i32 = 18;

/// Live signals from a node, plus an explorer when a key is configured.
pub struct RpcSignalSource {
    chain: ChainConfig,
    rpc: EvmRpc,
    explorer: Option<ExplorerClient>,
}

struct TokenMetadata {
    name: Option<String>,
    symbol: Option<String>,
}

struct ExplorerFacts {
    verified: Option<bool>,
    holder_count: Option<u64>,
    creation_ms: Option<u64>,
}

impl RpcSignalSource {
    pub fn new(chain: ChainConfig, timeout: Duration) -> Result<Self, SourceError> {
        let rpc = EvmRpc::from_chain(&chain, timeout)?;
        let explorer = match chain.explorer_credentials() {
            Some((api, key)) => Some(ExplorerClient::new(api, key, timeout)?),
            None => {
                info!(chain = %chain.name, "no explorer key, verification and holders unavailable");
                None
            }
        };
        Ok(Self {
            chain,
            rpc,
            explorer,
        })
    }

    async fn call<C: SolCall>(&self, to: Address, call: C) -> Result<C::Return, SourceError> {
        let data = self.rpc.eth_call(to, Bytes::from(call.abi_encode())).await?;
        C::abi_decode_returns(&data).map_err(|e| SourceError::Abi(e.to_string()))
    }

    async fn metadata(&self, token: Address) -> TokenMetadata {
        let (name, symbol) = tokio::join!(
            self.call(token, IERC20Metadata::nameCall {}),
            self.call(token, IERC20Metadata::symbolCall {}),
        );
        TokenMetadata {
            name: name.ok(),
            symbol: symbol.ok(),
        }
    }

    /// USD value of the wrapped-native side of the token's V2 pool.
    /// `Ok(None)` when the chain has no DEX configured.
    async fn liquidity_usd(&self, token: Address) -> Result<Option<f64>, SourceError> {
        let (Some(factory), Some(wrapped)) = (&self.chain.dex_factory, &self.chain.wrapped_native)
        else {
            return Ok(None);
        };
        let factory = parse_config_address(factory)?;
        let wrapped = parse_config_address(wrapped)?;

        let pair = self
            .call(
                factory,
                IUniswapV2Factory::getPairCall {
                    tokenA: token,
                    tokenB: wrapped,
                },
            )
            .await?;
        if pair == Address::ZERO {
            debug!(%token, "no liquidity pool found");
            return Ok(Some(0.0));
        }

        let reserves = self.call(pair, IUniswapV2Pair::getReservesCall {}).await?;
        let reserve = wrapped_reserve(
            token,
            wrapped,
            reserves.reserve0.to::<u128>(),
            reserves.reserve1.to::<u128>(),
        );
        let usd = native_units(reserve) * self.chain.native_usd_price;
        debug!(%token, %pair, usd, "liquidity resolved");
        Ok(Some(usd))
    }

    async fn explorer_facts(&self, token: Address) -> Option<ExplorerFacts> {
        let explorer = self.explorer.as_ref()?;
        let (verified, holders, creation) = tokio::join!(
            explorer.is_verified(token),
            explorer.holder_count(token),
            self.creation_ms(explorer, token),
        );
        Some(ExplorerFacts {
            verified: log_miss("verification", verified),
            holder_count: log_miss("holder count", holders),
            creation_ms: log_miss("creation time", creation),
        })
    }

    async fn creation_ms(&self, explorer: &ExplorerClient, token: Address) -> Result<u64, SourceError> {
        let tx_hash = explorer.creation_tx(token).await?;
        let secs = self.rpc.transaction_timestamp(&tx_hash).await?;
        Ok(secs.saturating_mul(1000))
    }
}

#[async_trait]
impl SignalSource for RpcSignalSource {
    async fn fetch(&self, token: Address, chain_id: u64) -> Result<Value, SourceError> {
        if chain_id != self.chain.chain_id {
            return Err(SourceError::UnsupportedChain(chain_id));
        }

        let (code, tx_count, metadata, liquidity, facts) = tokio::join!(
            self.rpc.get_code(token),
            self.rpc.get_transaction_count(token),
            self.metadata(token),
            self.liquidity_usd(token),
            self.explorer_facts(token),
        );
        // bytecode must resolve; everything else is best effort
        let code = code?;

        let mut raw = Map::new();
        raw.insert("address".into(), json!(token));
        raw.insert("chainId".into(), json!(chain_id));
        raw.insert("bytecode".into(), json!(hex::encode_prefixed(&code)));
        if let Some(count) = log_miss("transaction count", tx_count.map_err(SourceError::from)) {
            raw.insert("transactionCount".into(), json!(count));
        }
        if let Some(name) = metadata.name {
            raw.insert("name".into(), json!(name));
        }
        if let Some(symbol) = metadata.symbol {
            raw.insert("symbol".into(), json!(symbol));
        }
        if let Some(usd) = log_miss("liquidity", liquidity).flatten() {
            raw.insert("liquidityUSD".into(), json!(usd));
        }
        if let Some(facts) = facts {
            if let Some(verified) = facts.verified {
                raw.insert("isVerified".into(), json!(verified));
            }
            if let Some(holders) = facts.holder_count {
                raw.insert("holderCount".into(), json!(holders));
            }
            if let Some(ms) = facts.creation_ms {
                raw.insert("creationTimestamp".into(), json!(ms));
            }
        }

        debug!(%token, chain_id, fields = raw.len(), "signals fetched");
        Ok(Value::Object(raw))
    }
}

fn parse_config_address(s: &str) -> Result<Address, SourceError> {
    Address::from_str(s).map_err(|_| SourceError::Config(format!("invalid address {s}")))
}

/// V2 pairs sort their tokens by address, so the wrapped-native reserve is
/// `reserve1` when the token sorts first.
fn wrapped_reserve(token: Address, wrapped: Address, reserve0: u128, reserve1: u128) -> u128 {
    if token < wrapped { reserve1 } else { reserve0 }
}

fn native_units(wei: u128) -> f64 {
    wei as f64 / 10f64.powi(NATIVE_DECIMALS)
}

fn log_miss<T>(what: &str, result: Result<T, SourceError>) -> Option<T> {
    match result {
        Ok(v) => Some(v),
        Err(e) => {
            debug!("{what} unavailable: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wei_to_native_units() {
        assert_eq!(native_units(0), 0.0);
        assert_eq!(native_units(1_000_000_000_000_000_000), 1.0);
        assert_eq!(native_units(33_500_000_000_000_000_000), 33.5);
    }

    #[test]
    fn metadata_calls_use_erc20_selectors() {
        assert_eq!(IERC20Metadata::nameCall::SELECTOR, [0x06, 0xfd, 0xde, 0x03]);
        assert_eq!(IERC20Metadata::symbolCall::SELECTOR, [0x95, 0xd8, 0x9b, 0x41]);
        assert_eq!(IUniswapV2Factory::getPairCall::SELECTOR, [0xe6, 0xa4, 0x39, 0x05]);
        assert_eq!(IUniswapV2Pair::getReservesCall::SELECTOR, [0x09, 0x02, 0xf1, 0xac]);
    }

    #[test]
    fn wrapped_reserve_follows_pair_token_order() {
        // WBNB on BSC
        let wbnb: Address = "0xbb4cdb9cbd36b01bd1cbaebf2de08d9173bc095c".parse().unwrap();
        let low: Address = "0x0e09fabb73bd3ade0a17ecc321fd13a19e81ce82".parse().unwrap();
        let high: Address = "0xe9e7cea3dedca5984780bafc599bd69add087d56".parse().unwrap();
        let (reserve0, reserve1) = (7_000_000, 42);

        // token is token0, WBNB is token1
        assert_eq!(wrapped_reserve(low, wbnb, reserve0, reserve1), 42);
        // WBNB is token0, token is token1
        assert_eq!(wrapped_reserve(high, wbnb, reserve0, reserve1), 7_000_000);
    }

    #[test]
    fn bad_configured_address_is_a_config_error() {
        assert!(matches!(
            parse_config_address("0xnot-an-address"),
            Err(SourceError::Config(_))
        ));
    }

    #[tokio::test]
    async fn other_chain_is_rejected() {
        let source = RpcSignalSource::new(ChainConfig::default(), Duration::from_secs(1)).unwrap();
        let err = source.fetch(Address::ZERO, 56).await.unwrap_err();
        assert!(matches!(err, SourceError::UnsupportedChain(56)));
    }
}
