mod prompts;

use anyhow::Result;
use thiserror::Error;
use tracing::{debug, warn};

pub use prompts::{SYSTEM_PROMPT, build_fix_prompt, build_generate_prompt, shell_for_os};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Ollama,
    OpenAiCompatible,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderSelection {
    Auto,
    Ollama,
    OpenAiCompatible,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderDescriptor {
    pub provider: Provider,
    pub model: String,
}

/// What the generated text is expected to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Code,
    Script,
    Command,
}

impl TaskKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Script => "script",
            Self::Command => "command",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            max_tokens: 2048,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub prompt: String,
    pub history: Vec<Turn>,
    pub params: GenerationParams,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionResponse {
    pub text: String,
    pub provider: Provider,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderAttempt {
    pub provider: Provider,
    pub stage: &'static str,
    pub error: String,
    /// The provider answered, but with blank text.
    pub empty_output: bool,
}

#[derive(Debug, Error)]
#[error("LLM routing failed after {attempts:?}")]
pub struct ProviderRoutingError {
    pub attempts: Vec<ProviderAttempt>,
}

impl ProviderRoutingError {
    pub fn all_empty(&self) -> bool {
        !self.attempts.is_empty() && self.attempts.iter().all(|a| a.empty_output)
    }
}

#[derive(Debug, Error)]
#[error("LLM returned empty output")]
pub struct EmptyOutput;

/// True when the model(s) answered with nothing, as opposed to failing to answer.
pub fn is_empty_output(err: &anyhow::Error) -> bool {
    err.is::<EmptyOutput>()
        || err
            .downcast_ref::<ProviderRoutingError>()
            .is_some_and(ProviderRoutingError::all_empty)
}

pub trait LlmClient {
    fn complete(&self, req: &CompletionRequest, model: &str) -> Result<String>;
}

pub trait ReachabilityProbe {
    fn ollama_reachable(&self) -> bool;
}

pub trait CompletionService {
    fn candidate_chain(&self, selection: ProviderSelection) -> Vec<ProviderDescriptor>;
    fn complete(
        &self,
        selection: ProviderSelection,
        req: &CompletionRequest,
        model_override: Option<&str>,
    ) -> Result<CompletionResponse>;
}

/// Rejects blank model output. Fence stripping is left to the caller's extractor.
pub fn normalize_output(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(EmptyOutput.into());
    }
    Ok(trimmed.to_string())
}

pub struct ProviderRouter<O, P, R>
where
    O: LlmClient,
    P: LlmClient,
    R: ReachabilityProbe,
{
    pub ollama: O,
    pub openai: P,
    pub reachability: R,
    pub ollama_model: String,
    pub openai_model: String,
}

impl<O, P, R> ProviderRouter<O, P, R>
where
    O: LlmClient,
    P: LlmClient,
    R: ReachabilityProbe,
{
    fn call_provider(
        &self,
        provider: Provider,
        req: &CompletionRequest,
        model_override: Option<&str>,
    ) -> Result<CompletionResponse> {
        let model = match provider {
            Provider::Ollama => model_override.unwrap_or(self.ollama_model.as_str()),
            Provider::OpenAiCompatible => model_override.unwrap_or(self.openai_model.as_str()),
        };
        let output = match provider {
            Provider::Ollama => self.ollama.complete(req, model)?,
            Provider::OpenAiCompatible => self.openai.complete(req, model)?,
        };
        Ok(CompletionResponse {
            text: normalize_output(&output)?,
            provider,
            model: model.to_string(),
        })
    }
}

impl<O, P, R> CompletionService for ProviderRouter<O, P, R>
where
    O: LlmClient,
    P: LlmClient,
    R: ReachabilityProbe,
{
    fn candidate_chain(&self, selection: ProviderSelection) -> Vec<ProviderDescriptor> {
        let ollama = ProviderDescriptor {
            provider: Provider::Ollama,
            model: self.ollama_model.clone(),
        };
        let openai = ProviderDescriptor {
            provider: Provider::OpenAiCompatible,
            model: self.openai_model.clone(),
        };
        match selection {
            ProviderSelection::Ollama => vec![ollama],
            ProviderSelection::OpenAiCompatible => vec![openai],
            ProviderSelection::Auto => {
                if self.reachability.ollama_reachable() {
                    vec![ollama, openai]
                } else {
                    vec![openai]
                }
            }
        }
    }

    fn complete(
        &self,
        selection: ProviderSelection,
        req: &CompletionRequest,
        model_override: Option<&str>,
    ) -> Result<CompletionResponse> {
        let chain = self.candidate_chain(selection);
        let mut attempts = Vec::new();

        for entry in chain {
            match self.call_provider(entry.provider, req, model_override) {
                Ok(response) => return Ok(response),
                Err(err) => {
                    warn!(provider = ?entry.provider, error = %err, "provider failed");
                    attempts.push(ProviderAttempt {
                        provider: entry.provider,
                        stage: "complete",
                        error: err.to_string(),
                        empty_output: err.is::<EmptyOutput>(),
                    })
                }
            }
        }

        Err(ProviderRoutingError { attempts }.into())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerateRequest {
    pub task: String,
    pub kind: TaskKind,
    pub language: String,
    pub os: String,
    pub history: Vec<Turn>,
    pub params: GenerationParams,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixRequest {
    pub code: String,
    pub error: String,
    pub language: String,
}

/// The code-generation collaborator. Both calls return raw model text;
/// callers extract the code payload themselves.
pub trait Coder {
    fn generate(&self, req: &GenerateRequest) -> Result<String>;

    /// `Ok(None)` when the collaborator had nothing usable to offer.
    fn fix(&self, req: &FixRequest) -> Result<Option<String>>;
}

impl<C: Coder + ?Sized> Coder for &C {
    fn generate(&self, req: &GenerateRequest) -> Result<String> {
        (**self).generate(req)
    }

    fn fix(&self, req: &FixRequest) -> Result<Option<String>> {
        (**self).fix(req)
    }
}

pub struct LlmCoder<S>
where
    S: CompletionService,
{
    pub service: S,
    pub selection: ProviderSelection,
    pub model_override: Option<String>,
    pub fix_params: GenerationParams,
}

impl<S> Coder for LlmCoder<S>
where
    S: CompletionService,
{
    fn generate(&self, req: &GenerateRequest) -> Result<String> {
        let completion = CompletionRequest {
            system: SYSTEM_PROMPT.to_string(),
            prompt: build_generate_prompt(req),
            history: req.history.clone(),
            params: req.params,
        };
        let response =
            self.service
                .complete(self.selection, &completion, self.model_override.as_deref())?;
        debug!(
            provider = ?response.provider,
            model = %response.model,
            chars = response.text.len(),
            "generated response"
        );
        Ok(response.text)
    }

    fn fix(&self, req: &FixRequest) -> Result<Option<String>> {
        let completion = CompletionRequest {
            system: SYSTEM_PROMPT.to_string(),
            prompt: build_fix_prompt(req),
            history: Vec::new(),
            params: self.fix_params,
        };
        match self
            .service
            .complete(self.selection, &completion, self.model_override.as_deref())
        {
            Ok(response) => Ok(Some(response.text)),
            Err(err) if is_empty_output(&err) => Ok(None),
            Err(err) => Err(err),
        }
    }
}
