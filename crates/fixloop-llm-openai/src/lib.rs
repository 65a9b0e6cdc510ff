use anyhow::{Context, Result, anyhow};
use fixloop_llm::{CompletionRequest, LlmClient, Role};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Clone)]
pub struct OpenAiCompatibleClient {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
}

impl OpenAiCompatibleClient {
    pub fn new(base_url: String, api_key: String) -> Self {
        Self {
            base_url,
            api_key,
            timeout: Duration::from_secs(120),
        }
    }

    /// Reads `OPENAI_API_KEY`; the base URL falls back to `OPENAI_BASE_URL` and then the public endpoint.
    pub fn from_env(base_url: Option<String>) -> Result<Self> {
        let base_url = base_url
            .or_else(|| std::env::var("OPENAI_BASE_URL").ok())
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        let api_key = std::env::var("OPENAI_API_KEY")
            .context("OPENAI_API_KEY is required for OpenAI-compatible provider")?;

        Ok(Self::new(base_url, api_key))
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    temperature: f32,
    max_tokens: u32,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

fn chat_request(req: &CompletionRequest, model: &str) -> ChatRequest {
    let mut messages = Vec::with_capacity(req.history.len() + 2);
    messages.push(Message {
        role: "system",
        content: req.system.clone(),
    });
    for turn in &req.history {
        messages.push(Message {
            role: match turn.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            },
            content: turn.content.clone(),
        });
    }
    messages.push(Message {
        role: "user",
        content: req.prompt.clone(),
    });

    ChatRequest {
        model: model.to_string(),
        temperature: req.params.temperature,
        max_tokens: req.params.max_tokens,
        messages,
    }
}

impl LlmClient for OpenAiCompatibleClient {
    fn complete(&self, req: &CompletionRequest, model: &str) -> Result<String> {
        let body = chat_request(req, model);
        let client = Client::builder()
            .timeout(self.timeout)
            .build()
            .context("failed to build HTTP client")?;
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));

        let response = client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .context("failed calling OpenAI-compatible endpoint")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_else(|_| "<unavailable>".to_string());
            return Err(anyhow!(
                "OpenAI-compatible request failed ({status}): {body}"
            ));
        }

        let parsed: ChatResponse = response
            .json()
            .context("failed to decode OpenAI-compatible response")?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("OpenAI-compatible response had no choices"))?
            .message
            .content
            .unwrap_or_default();

        Ok(content)
    }
}
