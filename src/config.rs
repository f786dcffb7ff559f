use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    pub chains: Vec<ChainConfig>,
    pub source: SourceConfig,
    pub explain: ExplainConfig,
    pub database: DatabaseConfig,
}

/// One EVM network the signal source can query.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub name: String,
    pub rpc_url: String,
    pub rpc_user: Option<String>,
    pub rpc_password: Option<String>,
    /// Wrapped native token paired against on the V2 DEX.
    pub wrapped_native: Option<String>,
    pub dex_factory: Option<String>,
    pub native_usd_price: f64,
    /// Etherscan-compatible API base, e.g. `https://api.bscscan.com/api`.
    pub explorer_api: Option<String>,
    pub explorer_key_env: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SourceConfig {
    pub default_chain_id: u64,
    pub fetch_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub cache_ttl_secs: u64,
    pub max_concurrent_fetches: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ExplainConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub model: String,
    pub api_key_env: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
    pub enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chains: default_chains(),
            source: SourceConfig::default(),
            explain: ExplainConfig::default(),
            database: DatabaseConfig::default(),
        }
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            chain_id: 1337,
            name: "Localhost".into(),
            rpc_url: "http://127.0.0.1:8545".into(),
            rpc_user: None,
            rpc_password: None,
            wrapped_native: None,
            dex_factory: None,
            native_usd_price: 0.0,
            explorer_api: None,
            explorer_key_env: None,
        }
    }
}

fn default_chains() -> Vec<ChainConfig> {
    vec![
        ChainConfig {
            chain_id: 56,
            name: "BNB Smart Chain".into(),
            rpc_url: "https://bsc-dataseed.binance.org".into(),
            wrapped_native: Some("0xbb4cdb9cbd36b01bd1cbaebf2de08d9173bc095c".into()),
            dex_factory: Some("0xca143ce32fe78f1f7019d7d551a6402fc5350c73".into()),
            native_usd_price: 300.0,
            explorer_api: Some("https://api.bscscan.com/api".into()),
            explorer_key_env: Some("BSCSCAN_API_KEY".into()),
            ..ChainConfig::default()
        },
        ChainConfig {
            chain_id: 97,
            name: "BNB Smart Chain Testnet".into(),
            rpc_url: "https://data-seed-prebsc-1-s1.binance.org:8545".into(),
            wrapped_native: Some("0xae13d989dac2f0debff460ac112a837c89baa7cd".into()),
            dex_factory: Some("0x6725f303b657a9451d8ba641348b6761a6cc7a17".into()),
            native_usd_price: 300.0,
            explorer_api: Some("https://api-testnet.bscscan.com/api".into()),
            explorer_key_env: Some("BSCSCAN_API_KEY".into()),
            ..ChainConfig::default()
        },
        ChainConfig {
            chain_id: 1,
            name: "Ethereum".into(),
            rpc_url: "https://eth.llamarpc.com".into(),
            wrapped_native: Some("0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2".into()),
            dex_factory: Some("0x5c69bee701ef814a2b6a3edd4b1652cb9cc5aa6f".into()),
            native_usd_price: 3000.0,
            explorer_api: Some("https://api.etherscan.io/api".into()),
            explorer_key_env: Some("ETHERSCAN_API_KEY".into()),
            ..ChainConfig::default()
        },
        ChainConfig::default(),
    ]
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            default_chain_id: 56,
            fetch_timeout_secs: 15,
            request_timeout_secs: 10,
            cache_ttl_secs: 24 * 60 * 60,
            max_concurrent_fetches: 4,
        }
    }
}

impl Default for ExplainConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "https://api.openai.com/v1/chat/completions".into(),
            model: "gpt-4o-mini".into(),
            api_key_env: "OPENAI_API_KEY".into(),
            max_tokens: 250,
            temperature: 0.8,
            timeout_secs: 20,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "data/risklens.db".into(),
            enabled: true,
        }
    }
}

impl Config {
    /// Load config from a TOML file. Falls back to defaults if file doesn't exist.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!("Config file {} not found, using defaults", path.display());
            return Self::default();
        }
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::parse(&contents).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse {}: {e}, using defaults", path.display());
                Self::default()
            }),
            Err(e) => {
                tracing::warn!("Failed to read {}: {e}, using defaults", path.display());
                Self::default()
            }
        }
    }

    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        let config: Self = toml::from_str(contents)?;
        tracing::debug!("Config parsed with {} chains", config.chains.len());
        Ok(config)
    }

    pub fn chain(&self, chain_id: u64) -> Option<&ChainConfig> {
        self.chains.iter().find(|c| c.chain_id == chain_id)
    }
}

impl ChainConfig {
    /// Explorer base URL and key, present only when the key variable is set.
    pub fn explorer_credentials(&self) -> Option<(String, String)> {
        let api = self.explorer_api.clone()?;
        let key = std::env::var(self.explorer_key_env.as_deref()?).ok()?;
        if key.trim().is_empty() {
            return None;
        }
        Some((api, key))
    }
}
