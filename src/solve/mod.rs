//! LLM solvers: send a screen capture, stream back the answer.
//!
//! Provides a common `Solver` trait with implementations for:
//! - Anthropic Messages API (conversation history kept locally)
//! - OpenAI Responses API (history chained server-side)

pub mod anthropic;
pub mod openai;
pub mod sse;

use crate::config::SolverConfig;

pub const SOLVE_PROMPT: &str = "Look at this screen capture. If there's a code problem, provide two solutions:\n\n\
1. **Naive Solution** - pseudocode, then full code, then explain how it works, time/space complexity, and edge cases.\n\
2. **Optimized Solution** - pseudocode, then full code, then explain how it works, time/space complexity, edge cases, and why it's better than the naive approach.\n\n\
If it's a continuation of a previous problem, build on your prior answer.";

const DEFAULT_MAX_TOKENS: u32 = 4096;
const DEFAULT_ANTHROPIC_MODEL: &str = "claude-sonnet-4-5";
const DEFAULT_OPENAI_MODEL: &str = "gpt-5-codex";

/// Common trait for all solvers.
#[allow(async_fn_in_trait)]
pub trait Solver: Send {
    fn model_name(&self) -> &str;

    /// Solve one capture. `on_delta` receives answer text as it streams.
    async fn solve<F: FnMut(&str) + Send>(&mut self, image: &[u8], on_delta: F) -> anyhow::Result<String>;
}

/// Enum-dispatch wrapper over all solver backends.
pub enum SolverAdapter {
    Anthropic(anthropic::AnthropicSolver),
    OpenAi(openai::OpenAiSolver),
}

impl Solver for SolverAdapter {
    fn model_name(&self) -> &str {
        match self {
            Self::Anthropic(s) => s.model_name(),
            Self::OpenAi(s) => s.model_name(),
        }
    }

    async fn solve<F: FnMut(&str) + Send>(&mut self, image: &[u8], on_delta: F) -> anyhow::Result<String> {
        match self {
            Self::Anthropic(s) => s.solve(image, on_delta).await,
            Self::OpenAi(s) => s.solve(image, on_delta).await,
        }
    }
}

/// Create a solver from config values.
///
/// `provider` is one of: "anthropic" (default), "openai". The API key falls
/// back to `ANTHROPIC_API_KEY` / `OPENAI_API_KEY`.
pub fn create_solver(config: Option<&SolverConfig>) -> anyhow::Result<SolverAdapter> {
    let default = SolverConfig::default();
    let config = config.unwrap_or(&default);
    let max_tokens = config.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS);

    match config.provider.as_deref().unwrap_or("anthropic") {
        "anthropic" => {
            let key = api_key(config, "ANTHROPIC_API_KEY")?;
            let model = config.model.as_deref().unwrap_or(DEFAULT_ANTHROPIC_MODEL);
            Ok(SolverAdapter::Anthropic(anthropic::AnthropicSolver::new(
                &key, model, max_tokens,
            )))
        }
        "openai" => {
            let key = api_key(config, "OPENAI_API_KEY")?;
            let model = config.model.as_deref().unwrap_or(DEFAULT_OPENAI_MODEL);
            Ok(SolverAdapter::OpenAi(openai::OpenAiSolver::new(&key, model, max_tokens)))
        }
        other => anyhow::bail!("Unknown solver provider: {}", other),
    }
}

fn api_key(config: &SolverConfig, env_var: &str) -> anyhow::Result<String> {
    if let Some(key) = config.api_key.as_deref().filter(|k| !k.is_empty()) {
        return Ok(key.to_string());
    }
    std::env::var(env_var)
        .ok()
        .filter(|k| !k.is_empty())
        .ok_or_else(|| anyhow::anyhow!("{} not set", env_var))
}

/// MIME type from the image's magic bytes; JPEG unless it looks like PNG.
pub fn image_media_type(image: &[u8]) -> &'static str {
    if image.starts_with(b"\x89PNG") {
        "image/png"
    } else {
        "image/jpeg"
    }
}
