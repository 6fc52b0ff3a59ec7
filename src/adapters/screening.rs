use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::Picos;
use crate::error::AdapterError;
use crate::models::{DocumentMetadata, ScreeningDecision};

use super::{extract_json_block, LlmAdapter, ScreeningAdapter};

pub const SCREENING_SYSTEM_PROMPT: &str = "\
You are an expert systematic reviewer.
Your task is to screen research papers based on their Title and Abstract to decide if they \
should be included in a systematic review.
You will be provided with the PICO criteria (Population, Intervention, Comparison, Outcome) \
and Study Design. Compare the paper's content with these criteria.

Output Format:
Provide your response in JSON format with two keys:
1. \"decision\": String, either \"Included\" or \"Excluded\".
2. \"reason\": A brief explanation (1-2 sentences) citing specific criteria matched or missed.

Criteria for Inclusion:
- The paper MUST match the Population and Intervention.
- It should ideally match the Study Design (if specified).
- Outcomes and Comparisons are supportive but a strict mismatch does not automatically \
exclude if the main topic is highly relevant.
- If unsure or if the abstract is missing/vague, default to \"Included\" for full-text review.";

/// Title/abstract screener backed by the LLM adapter.
///
/// Replies that cannot be parsed come back as `Uncertain` rather than a
/// failure - a vague abstract is a screening outcome, not an error.
pub struct LlmScreener {
    llm: Arc<dyn LlmAdapter>,
    criteria: String,
}

impl LlmScreener {
    pub fn new(llm: Arc<dyn LlmAdapter>, picos: &Picos) -> Self {
        Self {
            llm,
            criteria: picos.criteria_block(),
        }
    }

    fn user_prompt(&self, metadata: &DocumentMetadata) -> String {
        format!(
            "PICO Criteria:\n{}\n\nPaper to Screen:\nTitle: {}\nAbstract: {}\n\n\
             Is this paper relevant? Return JSON.",
            self.criteria,
            metadata.title.as_deref().unwrap_or("No Title"),
            metadata.abstract_text.as_deref().unwrap_or("No Abstract"),
        )
    }
}

#[async_trait]
impl ScreeningAdapter for LlmScreener {
    async fn decide(
        &self,
        metadata: &DocumentMetadata,
    ) -> Result<(ScreeningDecision, String), AdapterError> {
        let reply = self
            .llm
            .infer(SCREENING_SYSTEM_PROMPT, &self.user_prompt(metadata))
            .await?;
        Ok(parse_screening_reply(&reply))
    }
}

/// Normalize the LLM reply into a decision plus reason
pub fn parse_screening_reply(reply: &str) -> (ScreeningDecision, String) {
    let Some(json) = extract_json_block(reply) else {
        return (
            ScreeningDecision::Uncertain,
            "no JSON found in screener reply".to_string(),
        );
    };
    let Ok(parsed) = serde_json::from_str::<ScreeningReply>(json) else {
        return (
            ScreeningDecision::Uncertain,
            "unparseable screener reply".to_string(),
        );
    };

    let decision = match parsed.decision.to_lowercase() {
        d if d.contains("exclud") => ScreeningDecision::Exclude,
        d if d.contains("includ") => ScreeningDecision::Include,
        _ => ScreeningDecision::Uncertain,
    };
    let reason = if parsed.reason.is_empty() {
        "no reason provided".to_string()
    } else {
        parsed.reason
    };
    (decision, reason)
}

#[derive(Debug, Deserialize)]
struct ScreeningReply {
    #[serde(default)]
    decision: String,
    #[serde(default)]
    reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_clean_reply() {
        let (decision, reason) = parse_screening_reply(
            r#"{"decision": "Excluded", "reason": "Population is adolescents, not adults."}"#,
        );
        assert_eq!(decision, ScreeningDecision::Exclude);
        assert_eq!(reason, "Population is adolescents, not adults.");
    }

    #[test]
    fn test_parse_fenced_reply() {
        let reply = "Here you go:\n```json\n{\"decision\": \"Included\", \"reason\": \"Matches PICO.\"}\n```";
        let (decision, _) = parse_screening_reply(reply);
        assert_eq!(decision, ScreeningDecision::Include);
    }

    #[test]
    fn test_unparseable_reply_is_uncertain() {
        let (decision, reason) = parse_screening_reply("I think this one is fine.");
        assert_eq!(decision, ScreeningDecision::Uncertain);
        assert!(reason.contains("no JSON"));
    }

    #[test]
    fn test_odd_decision_string_is_uncertain() {
        let (decision, _) =
            parse_screening_reply(r#"{"decision": "maybe?", "reason": "vague abstract"}"#);
        assert_eq!(decision, ScreeningDecision::Uncertain);
    }
}
