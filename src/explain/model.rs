use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::{ExplainError, Explainer, TemplateExplainer, plain_language};
use crate::config::ExplainConfig;
use crate::core::{Assessment, Explanation, ExplanationSource};
use crate::signals::score::recommendation;

const SYSTEM_PROMPT: &str = "You are helping everyday people understand cryptocurrency risks. \
Explain in simple, plain English what could happen to their money. No technical jargon. \
Focus on real-world consequences such as losing money, tokens being stolen, or being unable to sell. \
Keep it to 2-3 short sentences.";

/// Explanations from an OpenAI-compatible chat-completions endpoint.
///
/// Summaries are cached by risk level and triggered rule ids, so tokens with
/// the same findings share one model call. Any failure falls back to
/// [`TemplateExplainer`].
pub struct ModelExplainer {
    client: Client,
    endpoint: String,
    model: String,
    api_key: String,
    max_tokens: u32,
    temperature: f32,
    cache: Mutex<HashMap<String, String>>,
    fallback: TemplateExplainer,
}

impl ModelExplainer {
    /// Build from config. Returns `None` when the API key variable is unset.
    pub fn from_config(config: &ExplainConfig) -> Result<Option<Self>, ExplainError> {
        let api_key = match std::env::var(&config.api_key_env) {
            Ok(key) if !key.trim().is_empty() => key,
            _ => {
                info!("{} not set, explanations use templates only", config.api_key_env);
                return Ok(None);
            }
        };
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Some(Self {
            client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            cache: Mutex::new(HashMap::new()),
            fallback: TemplateExplainer,
        }))
    }

    async fn complete(&self, prompt: &str) -> Result<String, ExplainError> {
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": prompt },
            ],
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
        });

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ExplainError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let json: Value = resp.json().await?;
        json["choices"][0]["message"]["content"]
            .as_str()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .ok_or(ExplainError::EmptyResponse)
    }
}

#[async_trait]
impl Explainer for ModelExplainer {
    async fn explain(&self, assessment: &Assessment) -> Explanation {
        let key = cache_key(assessment);
        let recommendation = recommendation(assessment.level(), assessment.action_type).to_string();

        if let Some(summary) = self.cache.lock().unwrap().get(&key).cloned() {
            debug!(%key, "using cached explanation");
            return Explanation {
                summary,
                recommendation,
                source: ExplanationSource::Model,
            };
        }

        match self.complete(&build_prompt(assessment)).await {
            Ok(summary) => {
                self.cache.lock().unwrap().insert(key, summary.clone());
                Explanation {
                    summary,
                    recommendation,
                    source: ExplanationSource::Model,
                }
            }
            Err(e) => {
                warn!("model explanation failed, using template: {e}");
                self.fallback.explain(assessment).await
            }
        }
    }
}

/// `LEVEL-R1,R2` style key over the sorted triggered ids.
pub(crate) fn cache_key(assessment: &Assessment) -> String {
    let mut ids: Vec<&str> = assessment.triggered().map(|r| r.id.as_str()).collect();
    ids.sort_unstable();
    format!("{}-{}", assessment.level(), ids.join(","))
}

pub(crate) fn build_prompt(assessment: &Assessment) -> String {
    let mut prompt = format!(
        "A user is about to {} a token. Explain what could happen to their money in simple terms.\n\n",
        assessment.action_type
    );
    prompt.push_str(&format!("Risk level: {}\n", assessment.level()));

    let problems: Vec<&str> = assessment.triggered().map(|r| plain_language(r.id)).collect();
    if !problems.is_empty() {
        prompt.push_str("\nProblems found:\n");
        for problem in problems {
            prompt.push_str(&format!("- {problem}\n"));
        }
    }

    prompt.push_str(
        "\nExplain in 2-3 simple sentences what could happen if they go ahead. \
Could they lose money? Could their tokens be stolen? Will they be able to sell? \
Avoid technical words like bytecode, verification or liquidity.",
    );
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::RiskEngine;
    use chrono::{DateTime, Utc};

    const TOKEN: &str = "0x55d398326f99059ff775485246999027b3197955";

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-10-16T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn risky() -> Assessment {
        let raw = json!({ "hasTradingRestrictions": true });
        RiskEngine::new()
            .evaluate(TOKEN, &raw, "approve", Some("unlimited"), 56, now())
            .unwrap()
    }

    fn unreachable_explainer() -> ModelExplainer {
        ModelExplainer {
            client: Client::new(),
            // reserved TEST-NET-1 address, port 9: nothing answers
            endpoint: "http://192.0.2.1:9/v1/chat/completions".into(),
            model: "test".into(),
            api_key: "sk-test".into(),
            max_tokens: 50,
            temperature: 0.0,
            cache: Mutex::new(HashMap::new()),
            fallback: TemplateExplainer,
        }
    }

    #[test]
    fn cache_key_sorts_triggered_ids() {
        assert_eq!(cache_key(&risky()), "HIGH-R1,R2,R3,R4,R5,R6");
    }

    #[test]
    fn prompt_uses_plain_language() {
        let prompt = build_prompt(&risky());
        assert!(prompt.contains("about to approve a token"));
        assert!(prompt.contains("Risk level: HIGH"));
        assert!(prompt.contains("buy but not sell"));
        assert!(!prompt.contains("Honeypot Bytecode Pattern"));
    }

    #[tokio::test]
    async fn cached_summary_skips_the_network() {
        let explainer = unreachable_explainer();
        let a = risky();
        explainer
            .cache
            .lock()
            .unwrap()
            .insert(cache_key(&a), "You could lose everything.".into());
        let e = explainer.explain(&a).await;
        assert_eq!(e.source, ExplanationSource::Model);
        assert_eq!(e.summary, "You could lose everything.");
    }

    #[test]
    fn missing_key_disables_model() {
        let config = ExplainConfig {
            api_key_env: "RISKLENS_TEST_KEY_THAT_IS_NEVER_SET".into(),
            ..ExplainConfig::default()
        };
        assert!(ModelExplainer::from_config(&config).unwrap().is_none());
    }
}
