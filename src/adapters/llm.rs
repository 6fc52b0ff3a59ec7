use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::ServiceSettings;
use crate::error::AdapterError;

use super::LlmAdapter;

const SERVICE: &str = "llm";

/// Client for an OpenAI-compatible chat-completions endpoint (a local
/// llamafile server by default).
pub struct LlmClient {
    client: Client,
    base_url: String,
    model: String,
    temperature: f64,
}

impl LlmClient {
    pub fn new(services: &ServiceSettings) -> Self {
        Self {
            client: Client::new(),
            base_url: services.llm_base_url.trim_end_matches('/').to_string(),
            model: services.llm_model.clone(),
            temperature: services.llm_temperature,
        }
    }
}

#[async_trait]
impl LlmAdapter for LlmClient {
    async fn infer(&self, system: &str, user: &str) -> Result<String, AdapterError> {
        let request = ChatRequest {
            model: self.model.clone(),
            temperature: self.temperature,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user.to_string(),
                },
            ],
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| AdapterError::unavailable(SERVICE, e))?;

        match response.status().as_u16() {
            429 => return Err(AdapterError::rate_limited(SERVICE)),
            s if !(200..300).contains(&s) => {
                return Err(AdapterError::unavailable(SERVICE, format!("HTTP {s}")));
            }
            _ => {}
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| AdapterError::Parse(format!("chat response: {e}")))?;

        body.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| AdapterError::Parse("no choices in chat response".into()))
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    temperature: f64,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    content: String,
}

/// Slice out the first-brace..last-brace span of an LLM reply, which is
/// where the requested JSON object lives when the model adds prose or
/// code fences around it.
pub fn extract_json_block(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end >= start).then(|| &text[start..=end])
}
