pub mod rules;
pub mod score;

use std::str::FromStr;

use alloy_primitives::Address;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::info;

use crate::core::normalize::normalize;
use crate::core::{
    ActionType, ApprovalAmount, Assessment, RiskScore, RuleResult, TokenSignals, ValidationError,
};
use rules::RuleDescriptor;

/// The risk engine runs normalization, every rule, and aggregation.
///
/// Pure: the only notion of time is the `now` passed by the caller.
#[derive(Debug, Clone, Copy)]
pub struct RiskEngine {
    rules: &'static [RuleDescriptor],
}

impl Default for RiskEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RiskEngine {
    pub fn new() -> Self {
        Self {
            rules: &rules::RULES,
        }
    }

    /// Engine over a custom registry.
    pub fn with_rules(rules: &'static [RuleDescriptor]) -> Self {
        Self { rules }
    }

    /// Validate caller input, normalize `raw`, evaluate and score.
    ///
    /// `action_type` and `approval_amount` come from the caller and are
    /// strict; they take precedence over whatever the raw object carries.
    pub fn evaluate(
        &self,
        token_address: &str,
        raw: &Value,
        action_type: &str,
        approval_amount: Option<&str>,
        chain_id: u64,
        now: DateTime<Utc>,
    ) -> Result<Assessment, ValidationError> {
        let token = parse_token_address(token_address)?;
        let action = ActionType::from_str(action_type)?;
        let amount = approval_amount
            .map(|a| {
                ApprovalAmount::parse(a).ok_or_else(|| ValidationError::InvalidApprovalAmount(a.to_string()))
            })
            .transpose()?;

        match raw {
            Value::Object(_) | Value::Null => {}
            other => {
                return Err(ValidationError::UnexpectedShape {
                    found: json_kind(other),
                });
            }
        }

        let mut signals = normalize(raw, now);
        signals.action_type = action;
        if amount.is_some() {
            signals.requested_approval_amount = amount;
        }

        let (rules, score) = self.score(&signals);

        info!(
            token = %token,
            chain_id,
            action = %action,
            score = score.score,
            level = %score.level,
            "token assessed ({}/{} rules triggered)",
            score.triggered_count,
            score.total_rules
        );

        Ok(Assessment {
            token_address: token,
            chain_id,
            action_type: action,
            token_name: None,
            token_symbol: None,
            signals,
            rules,
            score,
            explanation: None,
            assessed_at: now,
        })
    }

    /// Evaluate and aggregate already-normalized signals.
    pub fn score(&self, signals: &TokenSignals) -> (Vec<RuleResult>, RiskScore) {
        let results = rules::evaluate_with(self.rules, signals);
        let score = score::aggregate(&results);
        (results, score)
    }
}

pub fn parse_token_address(input: &str) -> Result<Address, ValidationError> {
    Address::from_str(input.trim())
        .map_err(|_| ValidationError::InvalidTokenAddress(input.to_string()))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{CriticalCombination, RiskLevel, RuleCategory, RuleId};
    use rules::{RuleError, RULES};
    use serde_json::json;

    const TOKEN: &str = "0x55d398326f99059ff775485246999027b3197955";
    const DAY_MS: i64 = 24 * 60 * 60 * 1000;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-10-16T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn days_ago(days: i64) -> i64 {
        now().timestamp_millis() - days * DAY_MS
    }

    fn triggered_ids(a: &Assessment) -> Vec<RuleId> {
        a.triggered().map(|r| r.id).collect()
    }

    #[test]
    fn established_token_scores_zero() {
        let raw = json!({
            "isVerified": true,
            "creationTimestamp": days_ago(90),
            "transactionCount": 250,
            "holderCount": 150,
            "liquidityUSD": 25000,
            "actionType": "transfer",
        });
        let a = RiskEngine::new()
            .evaluate(TOKEN, &raw, "transfer", None, 56, now())
            .unwrap();
        assert!(triggered_ids(&a).is_empty());
        assert_eq!(a.score.score, 0);
        assert_eq!(a.level(), RiskLevel::Low);
        assert_eq!(a.score.max_score, 9);
    }

    #[test]
    fn unlimited_approval_on_unverified_token_is_high() {
        let raw = json!({
            "isVerified": false,
            "creationTimestamp": days_ago(20),
            "transactionCount": 45,
            "holderCount": 120,
            "liquidityUSD": 15000,
            "actionType": "approve",
            "requestedApprovalAmount": "unlimited",
        });
        let a = RiskEngine::new()
            .evaluate(TOKEN, &raw, "approve", Some("unlimited"), 56, now())
            .unwrap();
        assert_eq!(triggered_ids(&a), vec![RuleId::R1, RuleId::R2, RuleId::R3]);
        assert_eq!(a.score.score, 5);
        assert_eq!(a.level(), RiskLevel::High);
        assert_eq!(
            a.score.critical_override,
            Some(CriticalCombination::UnlimitedApprovalOnUnverifiedContract)
        );
    }

    #[test]
    fn honeypot_shaped_token_is_high() {
        let raw = json!({
            "isVerified": false,
            "creationTimestamp": days_ago(10),
            "transactionCount": 35,
            "holderCount": 25,
            "liquidityUSD": 3000,
            "hasTradingRestrictions": true,
            "actionType": "swap",
        });
        let a = RiskEngine::new()
            .evaluate(TOKEN, &raw, "swap", None, 56, now())
            .unwrap();
        assert_eq!(
            triggered_ids(&a),
            vec![RuleId::R2, RuleId::R3, RuleId::R4, RuleId::R5, RuleId::R6]
        );
        assert_eq!(a.score.score, 7);
        assert_eq!(a.level(), RiskLevel::High);
        assert_eq!(a.score.critical_override, None);
    }

    #[test]
    fn missing_signals_still_produce_an_assessment() {
        let a = RiskEngine::new()
            .evaluate(TOKEN, &Value::Null, "transfer", None, 56, now())
            .unwrap();
        // unverified, brand new, no holders, no liquidity
        assert_eq!(
            triggered_ids(&a),
            vec![RuleId::R2, RuleId::R3, RuleId::R4, RuleId::R5]
        );
        assert_eq!(a.score.score, 5);
        assert_eq!(a.level(), RiskLevel::High);
    }

    #[test]
    fn empty_object_matches_null() {
        let engine = RiskEngine::new();
        let a = engine.evaluate(TOKEN, &Value::Null, "swap", None, 1, now()).unwrap();
        let b = engine.evaluate(TOKEN, &json!({}), "swap", None, 1, now()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn evaluation_is_deterministic() {
        let raw = json!({ "holderCount": 10, "liquidityUSD": "9000", "bytecode": "0x6080" });
        let engine = RiskEngine::new();
        let a = engine.evaluate(TOKEN, &raw, "approve", Some("0xffff"), 56, now()).unwrap();
        let b = engine.evaluate(TOKEN, &raw, "approve", Some("0xffff"), 56, now()).unwrap();
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn caller_action_overrides_raw_action() {
        let raw = json!({ "actionType": "approve", "requestedApprovalAmount": "unlimited" });
        let a = RiskEngine::new().evaluate(TOKEN, &raw, "swap", None, 56, now()).unwrap();
        assert_eq!(a.action_type, ActionType::Swap);
        assert_eq!(a.signals.action_type, ActionType::Swap);
        assert!(!a.rules[0].triggered);
    }

    #[test]
    fn raw_approval_amount_used_when_caller_omits_it() {
        let raw = json!({ "isVerified": true, "requestedApprovalAmount": "unlimited" });
        let a = RiskEngine::new().evaluate(TOKEN, &raw, "approve", None, 56, now()).unwrap();
        assert!(a.rules[0].triggered);
    }

    #[test]
    fn unknown_action_is_rejected() {
        let err = RiskEngine::new()
            .evaluate(TOKEN, &Value::Null, "stake", None, 56, now())
            .unwrap_err();
        assert_eq!(err, ValidationError::UnknownAction("stake".into()));
    }

    #[test]
    fn bad_address_is_rejected() {
        let err = RiskEngine::new()
            .evaluate("0x1234", &Value::Null, "transfer", None, 56, now())
            .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidTokenAddress(_)));
    }

    #[test]
    fn bad_amount_is_rejected() {
        let err = RiskEngine::new()
            .evaluate(TOKEN, &Value::Null, "approve", Some("lots"), 56, now())
            .unwrap_err();
        assert_eq!(err, ValidationError::InvalidApprovalAmount("lots".into()));
    }

    #[test]
    fn non_object_raw_is_rejected() {
        let err = RiskEngine::new()
            .evaluate(TOKEN, &json!("oops"), "transfer", None, 56, now())
            .unwrap_err();
        assert_eq!(err, ValidationError::UnexpectedShape { found: "a string" });
    }

    fn broken_holder_rule(_: &TokenSignals) -> Result<bool, RuleError> {
        Err(RuleError::Failed("holder index unavailable".into()))
    }

    static REGISTRY_WITH_BROKEN_R4: [RuleDescriptor; 6] = {
        let mut rules = RULES;
        rules[3] = RuleDescriptor {
            id: RuleId::R4,
            name: "Very Few Holders",
            description: "Token has less than 50 unique holders",
            points: 1,
            critical: false,
            category: RuleCategory::Market,
            predicate: broken_holder_rule,
        };
        rules
    };

    #[test]
    fn failing_r4_leaves_other_rules_intact() {
        let raw = json!({
            "isVerified": false,
            "creationTimestamp": days_ago(10),
            "transactionCount": 35,
            "holderCount": 25,
            "liquidityUSD": 3000,
            "hasTradingRestrictions": true,
        });
        let healthy = RiskEngine::new().evaluate(TOKEN, &raw, "swap", None, 56, now()).unwrap();
        let broken = RiskEngine::with_rules(&REGISTRY_WITH_BROKEN_R4)
            .evaluate(TOKEN, &raw, "swap", None, 56, now())
            .unwrap();

        assert_eq!(broken.rules.len(), 6);
        let r4 = &broken.rules[3];
        assert!(!r4.triggered);
        assert_eq!(r4.error.as_deref(), Some("rule failed: holder index unavailable"));

        for i in [0, 1, 2, 4, 5] {
            assert_eq!(broken.rules[i], healthy.rules[i]);
        }
        assert_eq!(broken.score.score, healthy.score.score - 1);
        assert_eq!(broken.score.max_score, healthy.score.max_score);
    }
}
