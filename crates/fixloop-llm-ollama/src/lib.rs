use anyhow::{Context, Result, anyhow};
use fixloop_llm::{CompletionRequest, LlmClient, ReachabilityProbe, Role};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Clone)]
pub struct OllamaClient {
    pub base_url: String,
    pub timeout: Duration,
    pub request_timeout: Duration,
}

impl OllamaClient {
    pub fn new(base_url: String) -> Result<Self> {
        Ok(Self {
            base_url,
            timeout: Duration::from_secs(2),
            request_timeout: Duration::from_secs(120),
        })
    }

    pub fn is_reachable(&self) -> bool {
        let client = match Client::builder().timeout(self.timeout).build() {
            Ok(c) => c,
            Err(_) => return false,
        };

        let url = format!("{}/api/tags", self.base_url.trim_end_matches('/'));
        client
            .get(url)
            .send()
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}

impl ReachabilityProbe for OllamaClient {
    fn ollama_reachable(&self) -> bool {
        self.is_reachable()
    }
}

#[derive(Debug, Serialize)]
struct GenerateBody<'a> {
    model: &'a str,
    system: &'a str,
    prompt: String,
    stream: bool,
    options: Options,
}

#[derive(Debug, Serialize)]
struct Options {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

impl LlmClient for OllamaClient {
    fn complete(&self, req: &CompletionRequest, model: &str) -> Result<String> {
        let body = generate_body(req, model);
        let client = Client::builder()
            .timeout(self.request_timeout)
            .build()
            .context("failed to build HTTP client")?;

        let url = format!("{}/api/generate", self.base_url.trim_end_matches('/'));
        let response = client
            .post(url)
            .json(&body)
            .send()
            .context("failed calling Ollama")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_else(|_| "<unavailable>".to_string());
            return Err(anyhow!("Ollama request failed ({status}): {body}"));
        }

        let parsed: GenerateResponse = response
            .json()
            .context("failed to decode Ollama response")?;

        Ok(parsed.response)
    }
}

fn generate_body<'a>(req: &'a CompletionRequest, model: &'a str) -> GenerateBody<'a> {
    GenerateBody {
        model,
        system: &req.system,
        prompt: flatten_prompt(req),
        stream: false,
        options: Options {
            temperature: req.params.temperature,
            num_predict: req.params.max_tokens,
        },
    }
}

/// `/api/generate` takes a single prompt, so earlier turns are inlined ahead of it.
fn flatten_prompt(req: &CompletionRequest) -> String {
    if req.history.is_empty() {
        return req.prompt.clone();
    }

    let mut out = String::from("Conversation so far:\n");
    for turn in &req.history {
        let speaker = match turn.role {
            Role::User => "User",
            Role::Assistant => "Assistant",
        };
        out.push_str(speaker);
        out.push_str(": ");
        out.push_str(turn.content.trim_end());
        out.push('\n');
    }
    out.push('\n');
    out.push_str(&req.prompt);
    out
}
