mod model;
mod template;

pub use model::ModelExplainer;
pub use template::TemplateExplainer;

use async_trait::async_trait;
use thiserror::Error;

use crate::core::{Assessment, Explanation, RuleId};

/// Turns a scored assessment into prose for the user.
///
/// Explainers never fail outward: anything that cannot reach its backend
/// degrades to the static templates.
#[async_trait]
pub trait Explainer: Send + Sync {
    async fn explain(&self, assessment: &Assessment) -> Explanation;
}

#[derive(Debug, Error)]
pub enum ExplainError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("model API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("model response had no message content")]
    EmptyResponse,
}

/// A rule's finding phrased for someone who has never used a block explorer.
pub fn plain_language(id: RuleId) -> &'static str {
    match id {
        RuleId::R1 => "They want unlimited access to this token in your wallet",
        RuleId::R2 => "The source code is hidden, so nobody can check that it is safe",
        RuleId::R3 => "This token is brand new with almost no users",
        RuleId::R4 => "Almost nobody owns this token",
        RuleId::R5 => "Very little money backs this token, so it is hard to sell",
        RuleId::R6 => "You may be able to buy but not sell, trapping your money",
    }
}
