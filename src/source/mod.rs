mod explorer;
mod rpc;

pub use rpc::RpcSignalSource;

use std::path::PathBuf;
use std::time::Duration;

use alloy_primitives::Address;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::db::SharedDatabase;
use crate::rpc::RpcError;

/// Where raw, untrusted token signals come from.
///
/// Implementations return whatever they could gather; the normalizer decides
/// what is usable.
#[async_trait]
pub trait SignalSource: Send + Sync {
    async fn fetch(&self, token: Address, chain_id: u64) -> Result<Value, SourceError>;
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("chain {0} is not configured")]
    UnsupportedChain(u64),

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error("ABI decode failed: {0}")]
    Abi(String),

    #[error("explorer error: {0}")]
    Explorer(String),

    #[error("invalid source config: {0}")]
    Config(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Signals read from a JSON file, for offline runs and fixtures.
pub struct FileSignalSource {
    path: PathBuf,
}

impl FileSignalSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SignalSource for FileSignalSource {
    async fn fetch(&self, token: Address, chain_id: u64) -> Result<Value, SourceError> {
        let path = self.path.display().to_string();
        let contents = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| SourceError::Io {
                path: path.clone(),
                source,
            })?;
        let raw = serde_json::from_str(&contents).map_err(|source| SourceError::Json { path, source })?;
        debug!(%token, chain_id, file = %self.path.display(), "signals loaded from file");
        Ok(raw)
    }
}

/// Wraps a source with the SQLite signal cache.
pub struct CachedSignalSource<S> {
    inner: S,
    db: SharedDatabase,
    ttl: Duration,
}

impl<S: SignalSource> CachedSignalSource<S> {
    pub fn new(inner: S, db: SharedDatabase, ttl: Duration) -> Self {
        Self { inner, db, ttl }
    }
}

#[async_trait]
impl<S: SignalSource> SignalSource for CachedSignalSource<S> {
    async fn fetch(&self, token: Address, chain_id: u64) -> Result<Value, SourceError> {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::MAX);
        match self.db.cached_signals(token, chain_id, ttl, now) {
            Ok(Some(raw)) => {
                debug!(%token, chain_id, "signal cache hit");
                return Ok(raw);
            }
            Ok(None) => {}
            Err(e) => warn!("signal cache lookup failed: {e}"),
        }

        let raw = self.inner.fetch(token, chain_id).await?;
        if let Err(e) = self.db.cache_signals(token, chain_id, &raw, now) {
            warn!("failed to cache signals for {token}: {e}");
        }
        Ok(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

    static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

    fn temp_path(ext: &str) -> PathBuf {
        let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        let path = std::env::temp_dir().join(format!(
            "risklens_source_test_{}_{}.{ext}",
            std::process::id(),
            id
        ));
        let _ = std::fs::remove_file(&path);
        path
    }

    struct CountingSource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SignalSource for CountingSource {
        async fn fetch(&self, _token: Address, _chain_id: u64) -> Result<Value, SourceError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!({ "holderCount": 100 + n }))
        }
    }

    struct FailingSource;

    #[async_trait]
    impl SignalSource for FailingSource {
        async fn fetch(&self, _token: Address, chain_id: u64) -> Result<Value, SourceError> {
            Err(SourceError::UnsupportedChain(chain_id))
        }
    }

    #[tokio::test]
    async fn file_source_reads_json() {
        let path = temp_path("json");
        std::fs::write(&path, r#"{ "isVerified": true, "holderCount": 12 }"#).unwrap();
        let raw = FileSignalSource::new(&path).fetch(Address::ZERO, 56).await.unwrap();
        assert_eq!(raw["holderCount"], 12);
    }

    #[tokio::test]
    async fn file_source_reports_missing_file() {
        let err = FileSignalSource::new(temp_path("json"))
            .fetch(Address::ZERO, 56)
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::Io { .. }));
    }

    #[tokio::test]
    async fn file_source_reports_bad_json() {
        let path = temp_path("json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = FileSignalSource::new(&path).fetch(Address::ZERO, 56).await.unwrap_err();
        assert!(matches!(err, SourceError::Json { .. }));
    }

    #[tokio::test]
    async fn cache_serves_second_fetch() {
        let db = SharedDatabase::open(&temp_path("db")).unwrap();
        let source = CachedSignalSource::new(
            CountingSource { calls: AtomicUsize::new(0) },
            db,
            Duration::from_secs(3600),
        );
        let first = source.fetch(Address::ZERO, 56).await.unwrap();
        let second = source.fetch(Address::ZERO, 56).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(source.inner.calls.load(Ordering::SeqCst), 1);

        // different chain is a different entry
        source.fetch(Address::ZERO, 1).await.unwrap();
        assert_eq!(source.inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn zero_ttl_always_refetches() {
        let db = SharedDatabase::open(&temp_path("db")).unwrap();
        let source = CachedSignalSource::new(
            CountingSource { calls: AtomicUsize::new(0) },
            db,
            Duration::ZERO,
        );
        source.fetch(Address::ZERO, 56).await.unwrap();
        source.fetch(Address::ZERO, 56).await.unwrap();
        assert_eq!(source.inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let db = SharedDatabase::open(&temp_path("db")).unwrap();
        let source = CachedSignalSource::new(FailingSource, db.clone(), Duration::from_secs(3600));
        assert!(source.fetch(Address::ZERO, 56).await.is_err());
        assert!(
            db.cached_signals(Address::ZERO, 56, chrono::Duration::hours(1), Utc::now())
                .unwrap()
                .is_none()
        );
    }
}
