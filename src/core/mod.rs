pub mod normalize;
pub mod pipeline;

use std::fmt;
use std::str::FromStr;

use alloy_primitives::{Address, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Sentinel accepted in place of a numeric approval amount.
pub const UNLIMITED_SENTINEL: &str = "unlimited";

/// The pending user action a token is being assessed for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    Approve,
    Swap,
    #[default]
    Transfer,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Approve => "approve",
            ActionType::Swap => "swap",
            ActionType::Transfer => "transfer",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        [ActionType::Approve, ActionType::Swap, ActionType::Transfer]
            .into_iter()
            .find(|action| action.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ValidationError::UnknownAction(s.to_string()))
    }
}

/// Amount parameter of a pending `approve` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalAmount {
    Unlimited,
    Exact(U256),
}

impl ApprovalAmount {
    /// Parse the `"unlimited"` sentinel, a decimal integer or a `0x` hex integer.
    ///
    /// Integers too wide for 256 bits are reported as [`ApprovalAmount::Unlimited`]:
    /// no real allowance can exceed the word size, so the request is at least
    /// as dangerous as the maximum.
    pub fn parse(input: &str) -> Option<Self> {
        let s = input.trim();
        if s.eq_ignore_ascii_case(UNLIMITED_SENTINEL) {
            return Some(Self::Unlimited);
        }
        let (digits, radix) = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            Some(hex) => (hex, 16u32),
            None => (s, 10u32),
        };
        if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
            return None;
        }
        match U256::from_str_radix(digits, u64::from(radix)) {
            Ok(value) => Some(Self::Exact(value)),
            Err(_) => Some(Self::Unlimited),
        }
    }

    /// Lenient extraction from loose JSON: strings as [`parse`](Self::parse),
    /// non-negative integers as exact amounts, anything else is absent.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Self::parse(s),
            Value::Number(n) => n.as_u64().map(|v| Self::Exact(U256::from(v))),
            _ => None,
        }
    }

    /// True for the sentinel or any amount at or above 90% of `2^256 - 1`.
    pub fn is_unlimited(&self) -> bool {
        match self {
            ApprovalAmount::Unlimited => true,
            ApprovalAmount::Exact(amount) => *amount >= unlimited_threshold(),
        }
    }
}

/// Smallest amount that is at least 90% of `U256::MAX`.
///
/// `ceil(9/10 * MAX) == MAX - floor(MAX / 10)`, which stays inside 256 bits.
pub fn unlimited_threshold() -> U256 {
    U256::MAX - U256::MAX / U256::from(10u8)
}

/// Canonical, fully-defaulted view of a token's risk signals.
///
/// Produced by [`normalize::normalize`]; every field is always populated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenSignals {
    pub is_verified: bool,
    /// Contract deploy time, milliseconds since the Unix epoch.
    pub creation_timestamp: u64,
    pub transaction_count: u64,
    pub holder_count: u64,
    #[serde(rename = "liquidityUSD")]
    pub liquidity_usd: f64,
    pub bytecode: String,
    pub has_trading_restrictions: bool,
    pub action_type: ActionType,
    pub requested_approval_amount: Option<ApprovalAmount>,
    /// The instant normalization ran. Rules never read the wall clock.
    pub observed_at: DateTime<Utc>,
}

/// Identifier of a registered rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RuleId {
    R1,
    R2,
    R3,
    R4,
    R5,
    R6,
}

impl RuleId {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleId::R1 => "R1",
            RuleId::R2 => "R2",
            RuleId::R3 => "R3",
            RuleId::R4 => "R4",
            RuleId::R5 => "R5",
            RuleId::R6 => "R6",
        }
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Grouping used for the per-category risk breakdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleCategory {
    Approval,
    Contract,
    Market,
    Technical,
}

/// Outcome of one rule for one evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleResult {
    pub id: RuleId,
    pub name: String,
    pub description: String,
    pub points: u32,
    pub triggered: bool,
    pub critical: bool,
    pub category: RuleCategory,
    /// Set when the predicate failed; the rule then counts as not triggered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,    // <3
    Medium, // 3..5
    High,   // ≥5
}

impl RiskLevel {
    pub const MEDIUM_THRESHOLD: u32 = 3;
    pub const HIGH_THRESHOLD: u32 = 5;

    /// Plain threshold mapping, lower bounds inclusive.
    pub fn from_score(score: u32) -> Self {
        if score >= Self::HIGH_THRESHOLD {
            RiskLevel::High
        } else if score >= Self::MEDIUM_THRESHOLD {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            RiskLevel::Low => "✅",
            RiskLevel::Medium => "⚠️",
            RiskLevel::High => "🚨",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rule conjunctions that force [`RiskLevel::High`] whatever the numeric score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriticalCombination {
    /// R1 and R2: a contract whose source is hidden asks for unbounded spend rights.
    UnlimitedApprovalOnUnverifiedContract,
}

impl CriticalCombination {
    pub fn as_str(&self) -> &'static str {
        match self {
            CriticalCombination::UnlimitedApprovalOnUnverifiedContract => {
                "unlimited_approval_on_unverified_contract"
            }
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            CriticalCombination::UnlimitedApprovalOnUnverifiedContract => {
                "Unlimited approval requested by an unverified contract"
            }
        }
    }
}

/// Aggregated score for one evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskScore {
    pub score: u32,
    pub level: RiskLevel,
    pub max_score: u32,
    pub triggered_count: usize,
    pub total_rules: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub critical_override: Option<CriticalCombination>,
}

impl RiskScore {
    /// Score as a rounded share of the maximum, 0-100.
    pub fn percentage(&self) -> u32 {
        if self.max_score == 0 {
            return 0;
        }
        ((f64::from(self.score) / f64::from(self.max_score)) * 100.0).round() as u32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExplanationSource {
    Template,
    Model,
}

/// Prose attached to an assessment by an explainer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Explanation {
    pub summary: String,
    pub recommendation: String,
    pub source: ExplanationSource,
}

/// Full result of evaluating one token for one action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assessment {
    pub token_address: Address,
    pub chain_id: u64,
    pub action_type: ActionType,
    /// ERC20 `name()`, when the source reported one. Display only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_symbol: Option<String>,
    pub signals: TokenSignals,
    pub rules: Vec<RuleResult>,
    pub score: RiskScore,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<Explanation>,
    pub assessed_at: DateTime<Utc>,
}

impl Assessment {
    pub fn level(&self) -> RiskLevel {
        self.score.level
    }

    pub fn triggered(&self) -> impl Iterator<Item = &RuleResult> {
        self.rules.iter().filter(|r| r.triggered)
    }
}

/// Caller input rejected before any scoring happens.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("unknown action type `{0}` (expected approve, swap or transfer)")]
    UnknownAction(String),

    #[error("invalid token address `{0}`")]
    InvalidTokenAddress(String),

    #[error("invalid approval amount `{0}`")]
    InvalidApprovalAmount(String),

    #[error("raw signals must be a JSON object, got {found}")]
    UnexpectedShape { found: &'static str },
}
