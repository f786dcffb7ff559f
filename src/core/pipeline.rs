use std::collections::HashSet;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use alloy_primitives::Address;
use chrono::Utc;
use regex::Regex;
use serde_json::Value;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::core::{Assessment, ValidationError};
use crate::db::SharedDatabase;
use crate::explain::Explainer;
use crate::signals::{RiskEngine, parse_token_address};
use crate::source::SignalSource;

/// Everything one assessment needs, shared across pipeline tasks.
pub struct AssessContext {
    pub engine: RiskEngine,
    pub source: Arc<dyn SignalSource>,
    pub explainer: Option<Arc<dyn Explainer>>,
    pub db: Option<SharedDatabase>,
    pub fetch_timeout: Duration,
}

/// A request to assess one token for one pending action.
#[derive(Debug, Clone)]
pub struct AssessRequest {
    pub token_address: String,
    pub chain_id: u64,
    pub action_type: String,
    pub approval_amount: Option<String>,
}

impl AssessRequest {
    pub fn new(token_address: impl Into<String>, chain_id: u64) -> Self {
        Self {
            token_address: token_address.into(),
            chain_id,
            action_type: "transfer".into(),
            approval_amount: None,
        }
    }
}

/// Messages from the pipeline to its consumer.
#[derive(Debug, Clone)]
pub enum PipelineOutput {
    Assessed(Box<Assessment>),
    Rejected {
        token_address: String,
        error: ValidationError,
    },
}

/// Fetch, evaluate, explain and persist one token.
///
/// Only invalid caller input is an error. An unreachable or slow source
/// degrades to an empty signal object, which scores as maximally unknown.
pub async fn assess(ctx: &AssessContext, req: &AssessRequest) -> Result<Assessment, ValidationError> {
    let token = parse_token_address(&req.token_address)?;
    let raw = fetch_signals(ctx, token, req.chain_id).await;

    let mut assessment = ctx.engine.evaluate(
        &req.token_address,
        &raw,
        &req.action_type,
        req.approval_amount.as_deref(),
        req.chain_id,
        Utc::now(),
    )?;
    assessment.token_name = label(&raw, "name");
    assessment.token_symbol = label(&raw, "symbol");

    if let Some(explainer) = &ctx.explainer {
        assessment.explanation = Some(explainer.explain(&assessment).await);
    }

    if let Some(db) = &ctx.db {
        match db.store_assessment(&assessment) {
            Ok(id) => debug!(id, "assessment stored"),
            Err(e) => warn!("failed to store assessment for {token}: {e}"),
        }
    }

    Ok(assessment)
}

async fn fetch_signals(ctx: &AssessContext, token: Address, chain_id: u64) -> Value {
    match tokio::time::timeout(ctx.fetch_timeout, ctx.source.fetch(token, chain_id)).await {
        Ok(Ok(raw)) => raw,
        Ok(Err(e)) => {
            warn!("signal fetch failed for {token} on chain {chain_id}: {e}");
            Value::Null
        }
        Err(_) => {
            warn!(
                "signal fetch for {token} timed out after {}s",
                ctx.fetch_timeout.as_secs_f64()
            );
            Value::Null
        }
    }
}

/// A non-empty display string from the raw object. Labels never feed a rule.
fn label(raw: &Value, key: &str) -> Option<String> {
    raw.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Run the pipeline: receive requests, assess up to `max_concurrent` at a
/// time, forward results. Returns once the request channel closes and all
/// in-flight work is done.
pub async fn run_pipeline(
    mut rx: mpsc::Receiver<AssessRequest>,
    out_tx: mpsc::UnboundedSender<PipelineOutput>,
    ctx: Arc<AssessContext>,
    max_concurrent: usize,
) {
    let permits = Arc::new(Semaphore::new(max_concurrent.max(1)));
    let mut tasks = JoinSet::new();
    let mut received: u64 = 0;

    info!("Pipeline started, waiting for requests...");

    while let Some(req) = rx.recv().await {
        received += 1;
        let Ok(permit) = permits.clone().acquire_owned().await else {
            break;
        };
        let ctx = ctx.clone();
        let out_tx = out_tx.clone();
        tasks.spawn(async move {
            let _permit = permit;
            let output = match assess(&ctx, &req).await {
                Ok(a) => PipelineOutput::Assessed(Box::new(a)),
                Err(error) => {
                    warn!("rejected {}: {error}", req.token_address);
                    PipelineOutput::Rejected {
                        token_address: req.token_address,
                        error,
                    }
                }
            };
            if out_tx.send(output).is_err() {
                debug!("output channel closed");
            }
        });

        // reap finished tasks so the set does not grow with the stream
        while let Some(res) = tasks.try_join_next() {
            if let Err(e) = res {
                warn!("assessment task failed: {e}");
            }
        }
    }

    while let Some(res) = tasks.join_next().await {
        if let Err(e) = res {
            warn!("assessment task failed: {e}");
        }
    }

    info!("Pipeline shutting down after {received} requests");
}

static ADDRESS_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b0x[0-9a-fA-F]{40}\b").expect("valid address pattern"));

/// Unique `0x` + 40-hex addresses in `text`, in first-seen order.
///
/// A match must not be glued to other word characters, so longer hex strings
/// such as transaction hashes are skipped.
pub fn scan_addresses(text: &str) -> Vec<Address> {
    let mut seen = HashSet::new();
    ADDRESS_PATTERN
        .find_iter(text)
        .filter_map(|m| m.as_str().parse::<Address>().ok())
        .filter(|addr| seen.insert(*addr))
        .collect()
}
