use thiserror::Error;
use tracing::{debug, warn};

use crate::core::{ActionType, RuleCategory, RuleId, RuleResult, TokenSignals};

/// A predicate over normalized signals. Returns whether the rule triggered.
///
/// Predicates must report bad input as a [`RuleError`] and never panic:
/// `evaluate_with` isolates an `Err` to its own rule, but a panic aborts the
/// whole evaluation.
pub type Predicate = fn(&TokenSignals) -> Result<bool, RuleError>;

/// Failure inside a single predicate. Never aborts the batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleError {
    #[error("{field} out of range: {reason}")]
    OutOfRange { field: &'static str, reason: String },

    #[error("rule failed: {0}")]
    Failed(String),
}

/// One entry of the closed rule registry.
#[derive(Debug, Clone, Copy)]
pub struct RuleDescriptor {
    pub id: RuleId,
    pub name: &'static str,
    pub description: &'static str,
    pub points: u32,
    /// Participates in a critical combination.
    pub critical: bool,
    pub category: RuleCategory,
    pub predicate: Predicate,
}

/// Contracts younger than this are "new" (30 days).
pub const NEW_CONTRACT_WINDOW_MS: u64 = 30 * 24 * 60 * 60 * 1000;
/// Fewer transactions than this is "low activity".
pub const LOW_ACTIVITY_TX_COUNT: u64 = 100;
pub const FEW_HOLDERS: u64 = 50;
pub const LOW_LIQUIDITY_USD: f64 = 10_000.0;

/// The canonical rule set, in evaluation and output order.
pub const RULES: [RuleDescriptor; 6] = [
    RuleDescriptor {
        id: RuleId::R1,
        name: "Unlimited Approval",
        description: "Token requests unlimited approval amount",
        points: 2,
        critical: true,
        category: RuleCategory::Approval,
        predicate: unlimited_approval,
    },
    RuleDescriptor {
        id: RuleId::R2,
        name: "Unverified Contract",
        description: "Contract source code is not verified on the block explorer",
        points: 2,
        critical: true,
        category: RuleCategory::Contract,
        predicate: unverified_contract,
    },
    RuleDescriptor {
        id: RuleId::R3,
        name: "New Contract with Low Activity",
        description: "Contract is recently deployed with minimal transactions",
        points: 1,
        critical: false,
        category: RuleCategory::Contract,
        predicate: new_low_activity,
    },
    RuleDescriptor {
        id: RuleId::R4,
        name: "Very Few Holders",
        description: "Token has less than 50 unique holders",
        points: 1,
        critical: false,
        category: RuleCategory::Market,
        predicate: few_holders,
    },
    RuleDescriptor {
        id: RuleId::R5,
        name: "Low Liquidity",
        description: "Token has insufficient liquidity on DEX",
        points: 1,
        critical: false,
        category: RuleCategory::Market,
        predicate: low_liquidity,
    },
    RuleDescriptor {
        id: RuleId::R6,
        name: "Honeypot Bytecode Pattern",
        description: "Contract bytecode contains suspicious honeypot patterns",
        points: 2,
        critical: false,
        category: RuleCategory::Technical,
        predicate: honeypot_pattern,
    },
];

/// Sum of every registered rule's points.
pub const MAX_SCORE: u32 = total_points(&RULES);

pub const fn total_points(rules: &[RuleDescriptor]) -> u32 {
    let mut sum = 0;
    let mut i = 0;
    while i < rules.len() {
        sum += rules[i].points;
        i += 1;
    }
    sum
}

/// Evaluate the canonical registry.
pub fn evaluate_all(signals: &TokenSignals) -> Vec<RuleResult> {
    evaluate_with(&RULES, signals)
}

/// Evaluate `rules` in order. Each rule sees only `signals`, never another
/// rule's result; a failing predicate is recorded as not triggered.
pub fn evaluate_with(rules: &[RuleDescriptor], signals: &TokenSignals) -> Vec<RuleResult> {
    rules
        .iter()
        .map(|rule| {
            let (triggered, error) = match (rule.predicate)(signals) {
                Ok(triggered) => (triggered, None),
                Err(e) => {
                    warn!(rule = %rule.id, "rule evaluation failed: {e}");
                    (false, Some(e.to_string()))
                }
            };
            debug!(
                rule = %rule.id,
                "{}: {}",
                rule.name,
                if triggered { "triggered" } else { "passed" }
            );
            RuleResult {
                id: rule.id,
                name: rule.name.to_string(),
                description: rule.description.to_string(),
                points: rule.points,
                triggered,
                critical: rule.critical,
                category: rule.category,
                error,
            }
        })
        .collect()
}

// --- Predicates ---

fn unlimited_approval(s: &TokenSignals) -> Result<bool, RuleError> {
    Ok(s.action_type == ActionType::Approve
        && s.requested_approval_amount.is_some_and(|amount| amount.is_unlimited()))
}

fn unverified_contract(s: &TokenSignals) -> Result<bool, RuleError> {
    Ok(!s.is_verified)
}

fn new_low_activity(s: &TokenSignals) -> Result<bool, RuleError> {
    let observed_ms = u64::try_from(s.observed_at.timestamp_millis()).map_err(|_| {
        RuleError::OutOfRange {
            field: "observedAt",
            reason: format!("{} is before the epoch", s.observed_at),
        }
    })?;
    let age_ms = observed_ms
        .checked_sub(s.creation_timestamp)
        .ok_or_else(|| RuleError::OutOfRange {
            field: "creationTimestamp",
            reason: format!("{} is after the observation instant", s.creation_timestamp),
        })?;
    Ok(age_ms < NEW_CONTRACT_WINDOW_MS && s.transaction_count < LOW_ACTIVITY_TX_COUNT)
}

fn few_holders(s: &TokenSignals) -> Result<bool, RuleError> {
    Ok(s.holder_count < FEW_HOLDERS)
}

fn low_liquidity(s: &TokenSignals) -> Result<bool, RuleError> {
    if !s.liquidity_usd.is_finite() || s.liquidity_usd < 0.0 {
        return Err(RuleError::OutOfRange {
            field: "liquidityUSD",
            reason: format!("{} is not a non-negative amount", s.liquidity_usd),
        });
    }
    Ok(s.liquidity_usd < LOW_LIQUIDITY_USD)
}

fn honeypot_pattern(s: &TokenSignals) -> Result<bool, RuleError> {
    Ok(s.has_trading_restrictions)
}
