mod config;
mod core;
mod db;
mod explain;
mod rpc;
mod signals;
mod source;

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::core::pipeline::{AssessContext, AssessRequest, PipelineOutput, assess, run_pipeline, scan_addresses};
use crate::core::{Assessment, UNLIMITED_SENTINEL};
use crate::db::{AssessmentRecord, SharedDatabase};
use crate::explain::{Explainer, ModelExplainer, TemplateExplainer};
use crate::signals::{RiskEngine, parse_token_address, score};
use crate::source::{CachedSignalSource, FileSignalSource, RpcSignalSource, SignalSource};

#[derive(Debug, Parser)]
#[command(name = "risklens", version, about = "Deterministic ERC20 token risk scoring")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, global = true, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Assess one token before interacting with it.
    Assess {
        token: String,
        #[arg(long)]
        chain: Option<u64>,
        /// approve, swap or transfer.
        #[arg(long, default_value = "transfer")]
        action: String,
        /// Requested approval amount: `unlimited`, decimal or 0x hex.
        #[arg(long)]
        amount: Option<String>,
        /// Read raw signals from a JSON file instead of the network.
        #[arg(long)]
        signals: Option<PathBuf>,
        #[arg(long)]
        json: bool,
        #[arg(long)]
        no_explain: bool,
    },
    /// Assess every token address found on stdin.
    Scan {
        #[arg(long)]
        chain: Option<u64>,
        #[arg(long, default_value = "transfer")]
        action: String,
        #[arg(long)]
        json: bool,
        #[arg(long)]
        no_explain: bool,
    },
    /// Show stored assessments.
    History {
        #[arg(long)]
        token: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout stays clean for --json
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive("risklens=info".parse()?))
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config);
    tracing::debug!("Config: {:?}", config);

    match cli.command {
        Command::Assess {
            token,
            chain,
            action,
            amount,
            signals,
            json,
            no_explain,
        } => {
            let chain_id = chain.unwrap_or(config.source.default_chain_id);
            let db = open_database(&config);
            let source: Arc<dyn SignalSource> = match signals {
                Some(path) => Arc::new(FileSignalSource::new(path)),
                None => network_source(&config, chain_id, db.clone())?,
            };
            let ctx = build_context(&config, source, db, no_explain)?;
            let req = AssessRequest {
                token_address: token,
                chain_id,
                action_type: action,
                approval_amount: amount,
            };
            let assessment = assess(&ctx, &req).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&assessment)?);
            } else {
                print_assessment(&assessment);
            }
        }
        Command::Scan {
            chain,
            action,
            json,
            no_explain,
        } => {
            let chain_id = chain.unwrap_or(config.source.default_chain_id);
            let mut input = String::new();
            std::io::stdin()
                .read_to_string(&mut input)
                .context("failed to read stdin")?;
            let addresses = scan_addresses(&input);
            tracing::info!("Found {} token addresses", addresses.len());
            if addresses.is_empty() {
                return Ok(());
            }

            let db = open_database(&config);
            let source = network_source(&config, chain_id, db.clone())?;
            let ctx = Arc::new(build_context(&config, source, db, no_explain)?);

            let (req_tx, req_rx) = mpsc::channel(addresses.len());
            let (out_tx, mut out_rx) = mpsc::unbounded_channel();
            let pipeline = tokio::spawn(run_pipeline(
                req_rx,
                out_tx,
                ctx,
                config.source.max_concurrent_fetches,
            ));

            for address in &addresses {
                let mut req = AssessRequest::new(address.to_string(), chain_id);
                req.action_type = action.clone();
                if req_tx.send(req).await.is_err() {
                    break;
                }
            }
            drop(req_tx);

            let mut assessments = Vec::new();
            while let Some(output) = out_rx.recv().await {
                match output {
                    PipelineOutput::Assessed(a) => assessments.push(*a),
                    PipelineOutput::Rejected {
                        token_address,
                        error,
                    } => eprintln!("{token_address}: {error}"),
                }
            }
            pipeline.await.context("pipeline task panicked")?;

            // riskiest first
            assessments.sort_by(|a, b| score::compare(&b.score, &a.score));
            if json {
                println!("{}", serde_json::to_string_pretty(&assessments)?);
            } else {
                for a in &assessments {
                    print_assessment(a);
                    println!();
                }
            }
        }
        Command::History { token, limit, json } => {
            let db = open_database(&config).context("history needs the database enabled")?;
            let records = match token {
                Some(t) => db.assessments_for_token(parse_token_address(&t)?, limit)?,
                None => db.recent_assessments(limit)?,
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else {
                print_history(&records, db.assessment_count()?);
            }
        }
    }

    Ok(())
}

fn open_database(config: &Config) -> Option<SharedDatabase> {
    if !config.database.enabled {
        return None;
    }
    let path = Path::new(&config.database.path);
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            tracing::warn!("Failed to create database directory: {e}");
            return None;
        }
    }
    match SharedDatabase::open(path) {
        Ok(db) => {
            tracing::debug!("Database opened at {}", config.database.path);
            let ttl = chrono::Duration::from_std(Duration::from_secs(config.source.cache_ttl_secs)).ok();
            if let Some(cutoff) = ttl.and_then(|ttl| chrono::Utc::now().checked_sub_signed(ttl)) {
                match db.prune_signal_cache(cutoff) {
                    Ok(0) => {}
                    Ok(n) => tracing::debug!("Pruned {n} stale signal cache entries"),
                    Err(e) => tracing::warn!("Failed to prune signal cache: {e}"),
                }
            }
            Some(db)
        }
        Err(e) => {
            tracing::warn!("Failed to open database {}: {e}", config.database.path);
            None
        }
    }
}

fn network_source(
    config: &Config,
    chain_id: u64,
    db: Option<SharedDatabase>,
) -> Result<Arc<dyn SignalSource>> {
    let Some(chain) = config.chain(chain_id) else {
        bail!("chain {chain_id} is not configured");
    };
    let timeout = Duration::from_secs(config.source.request_timeout_secs);
    let rpc = RpcSignalSource::new(chain.clone(), timeout)?;
    tracing::info!("Using {} via {}", chain.name, chain.rpc_url);
    Ok(match db {
        Some(db) => Arc::new(CachedSignalSource::new(
            rpc,
            db,
            Duration::from_secs(config.source.cache_ttl_secs),
        )),
        None => Arc::new(rpc),
    })
}

fn build_context(
    config: &Config,
    source: Arc<dyn SignalSource>,
    db: Option<SharedDatabase>,
    no_explain: bool,
) -> Result<AssessContext> {
    let explainer: Option<Arc<dyn Explainer>> = if no_explain {
        None
    } else if config.explain.enabled {
        match ModelExplainer::from_config(&config.explain)? {
            Some(model) => Some(Arc::new(model)),
            None => Some(Arc::new(TemplateExplainer)),
        }
    } else {
        Some(Arc::new(TemplateExplainer))
    };

    Ok(AssessContext {
        engine: RiskEngine::new(),
        source,
        explainer,
        db,
        fetch_timeout: Duration::from_secs(config.source.fetch_timeout_secs),
    })
}

fn print_assessment(a: &Assessment) {
    let score = &a.score;
    println!(
        "{} {} on chain {} ({})",
        a.level().emoji(),
        a.token_address,
        a.chain_id,
        a.action_type
    );
    match (&a.token_name, &a.token_symbol) {
        (Some(name), Some(symbol)) => println!("  Token: {name} ({symbol})"),
        (Some(label), None) | (None, Some(label)) => println!("  Token: {label}"),
        (None, None) => {}
    }
    println!(
        "  Risk: {}  {}/{} ({}%)",
        score.level,
        score.score,
        score.max_score,
        score.percentage()
    );
    if let Some(combo) = score.critical_override {
        println!("  Critical: {}", combo.description());
    }
    if a.action_type == crate::core::ActionType::Approve {
        let amount = match &a.signals.requested_approval_amount {
            Some(amount) if amount.is_unlimited() => UNLIMITED_SENTINEL.to_string(),
            Some(crate::core::ApprovalAmount::Exact(v)) => v.to_string(),
            _ => "unspecified".to_string(),
        };
        println!("  Approval amount: {amount}");
    }

    for (category, rules) in score::breakdown(&a.rules) {
        for rule in rules {
            println!(
                "  [{}] {:<26} +{}  {:?}: {}",
                rule.id, rule.name, rule.points, category, rule.description
            );
        }
    }
    for rule in a.rules.iter().filter(|r| r.error.is_some()) {
        println!(
            "  [{}] not evaluated: {}",
            rule.id,
            rule.error.as_deref().unwrap_or_default()
        );
    }

    if let Some(explanation) = &a.explanation {
        println!("  {}", explanation.summary);
        println!("  -> {}", explanation.recommendation);
    }
}

fn print_history(records: &[AssessmentRecord], total: usize) {
    if records.is_empty() {
        println!("No assessments stored.");
        return;
    }
    for r in records {
        println!(
            "{}  {:<6} {}/{}  {:<8} chain {:<5} {}",
            r.created_at, r.level, r.score, r.max_score, r.action, r.chain_id, r.token
        );
    }
    println!("{} of {total} assessments", records.len());
}
