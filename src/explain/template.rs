use async_trait::async_trait;

use super::Explainer;
use crate::core::{Assessment, Explanation, ExplanationSource, RiskLevel, RuleId};
use crate::signals::score::recommendation;

/// At most this many warnings make it into a HIGH summary.
const MAX_HIGH_WARNINGS: usize = 2;

/// Static, rule-driven explanations. Always available.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateExplainer;

impl TemplateExplainer {
    pub fn summarize(&self, assessment: &Assessment) -> String {
        let triggered: Vec<RuleId> = assessment.triggered().map(|r| r.id).collect();
        if triggered.is_empty() {
            return "This token passed all security checks.".to_string();
        }

        match assessment.level() {
            RiskLevel::High => {
                // Trapped funds and drained allowances lead, whatever the rule order.
                let mut warnings: Vec<&str> = triggered
                    .iter()
                    .filter(|id| matches!(id, RuleId::R6 | RuleId::R1))
                    .rev()
                    .map(|id| high_warning(*id))
                    .collect();
                warnings.extend(
                    triggered
                        .iter()
                        .filter(|id| !matches!(id, RuleId::R6 | RuleId::R1))
                        .map(|id| high_warning(*id)),
                );
                warnings.truncate(MAX_HIGH_WARNINGS);
                format!("DANGER, do not proceed! {}.", warnings.join(". "))
            }
            RiskLevel::Medium => {
                let warnings: Vec<&str> = triggered.iter().map(|id| medium_warning(*id)).collect();
                format!(
                    "WARNING: {}. Only commit amounts you can afford to lose.",
                    warnings.join(". ")
                )
            }
            RiskLevel::Low => {
                let concern = assessment
                    .triggered()
                    .next()
                    .map(|r| r.name.as_str())
                    .unwrap_or("minor issue detected");
                format!(
                    "Minor concern: {concern}. Generally safe, but start with small amounts if unsure."
                )
            }
        }
    }
}

#[async_trait]
impl Explainer for TemplateExplainer {
    async fn explain(&self, assessment: &Assessment) -> Explanation {
        Explanation {
            summary: self.summarize(assessment),
            recommendation: recommendation(assessment.level(), assessment.action_type).to_string(),
            source: ExplanationSource::Template,
        }
    }
}

fn high_warning(id: RuleId) -> &'static str {
    match id {
        RuleId::R1 => "The spender could drain this token from your wallet at any time",
        RuleId::R2 => "The code is hidden, so its safety cannot be verified",
        RuleId::R3 => "Brand new token with almost no history",
        RuleId::R4 => "Almost no one owns this token, a common scam sign",
        RuleId::R5 => "Very hard to sell",
        RuleId::R6 => "HONEYPOT TRAP: you can buy but cannot sell, money trapped for good",
    }
}

fn medium_warning(id: RuleId) -> &'static str {
    match id {
        RuleId::R1 => "Unlimited spending rights requested",
        RuleId::R2 => "Source code is not verified",
        RuleId::R3 => "Brand new token with almost no history",
        RuleId::R4 => "Very few people own this",
        RuleId::R5 => "Hard to sell later",
        RuleId::R6 => "Contract code looks unusual",
    }
}
