use std::cmp::Ordering;
use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::core::{
    ActionType, CriticalCombination, RiskLevel, RiskScore, RuleCategory, RuleId, RuleResult,
};

/// Sum triggered points, apply critical overrides, map to a level.
///
/// `max_score` is the sum of every result's points, triggered or not; with one
/// result per registered rule that is the registry total. Partial input
/// reports only its own sum, so `aggregate(&[])` has a `max_score` of 0.
/// Callers scoring a subset against the full registry should read
/// [`rules::MAX_SCORE`](super::rules::MAX_SCORE) instead.
pub fn aggregate(results: &[RuleResult]) -> RiskScore {
    let score: u32 = results.iter().filter(|r| r.triggered).map(|r| r.points).sum();
    let max_score: u32 = results.iter().map(|r| r.points).sum();
    let triggered_count = results.iter().filter(|r| r.triggered).count();

    let critical_override = critical_combination(results);
    let level = match critical_override {
        Some(combo) => {
            warn!(score, "critical combination detected: {}", combo.description());
            RiskLevel::High
        }
        None => RiskLevel::from_score(score),
    };

    debug!(score, max_score, %level, "risk score aggregated");

    RiskScore {
        score,
        level,
        max_score,
        triggered_count,
        total_rules: results.len(),
        critical_override,
    }
}

/// The named exceptions to numeric thresholding.
pub fn critical_combination(results: &[RuleResult]) -> Option<CriticalCombination> {
    let fired = |id: RuleId| results.iter().any(|r| r.id == id && r.triggered);
    (fired(RuleId::R1) && fired(RuleId::R2))
        .then_some(CriticalCombination::UnlimitedApprovalOnUnverifiedContract)
}

/// Triggered rules grouped by category.
pub fn breakdown(results: &[RuleResult]) -> BTreeMap<RuleCategory, Vec<&RuleResult>> {
    let mut map: BTreeMap<RuleCategory, Vec<&RuleResult>> = BTreeMap::new();
    for result in results.iter().filter(|r| r.triggered) {
        map.entry(result.category).or_default().push(result);
    }
    map
}

/// Order two scores by level, then by raw score.
pub fn compare(a: &RiskScore, b: &RiskScore) -> Ordering {
    a.level.cmp(&b.level).then(a.score.cmp(&b.score))
}

/// Short advice for a level and pending action.
pub fn recommendation(level: RiskLevel, action: ActionType) -> &'static str {
    match (level, action) {
        (RiskLevel::Low, ActionType::Approve) => {
            "This token appears safe for approval. Proceed with confidence."
        }
        (RiskLevel::Low, ActionType::Swap) => {
            "This token appears safe for swapping. Proceed with confidence."
        }
        (RiskLevel::Low, ActionType::Transfer) => {
            "This token appears safe for transfer. Proceed with confidence."
        }
        (RiskLevel::Medium, ActionType::Approve) => {
            "Exercise caution. Approve only the exact amount you need and revoke it afterwards."
        }
        (RiskLevel::Medium, ActionType::Swap) => {
            "Exercise caution. Start with a small amount to test."
        }
        (RiskLevel::Medium, ActionType::Transfer) => {
            "Exercise caution. Verify recipient and amount carefully."
        }
        (RiskLevel::High, ActionType::Approve) => {
            "HIGH RISK! Approve only an exact amount, or avoid this token."
        }
        (RiskLevel::High, ActionType::Swap) => {
            "HIGH RISK! This token may be a scam. Avoid swapping."
        }
        (RiskLevel::High, ActionType::Transfer) => {
            "HIGH RISK! Be extremely careful. This token shows dangerous patterns."
        }
    }
}
