//! Provider selection: turns the `[planner]` config section into a provider.

use std::sync::Arc;
use std::time::Duration;

use cortex_config::PlannerConfig;
use cortex_core::error::ProviderError;
use cortex_core::provider::Provider;
use tracing::debug;

use crate::openai_compat::OpenAiCompatProvider;

/// Build the planner's provider from configuration.
///
/// Hosted providers need an API key; local servers (ollama, vllm, llama.cpp)
/// and custom `api_url` endpoints do not.
pub fn build_from_config(config: &PlannerConfig) -> Result<Arc<dyn Provider>, ProviderError> {
    let name = config.provider.as_str();
    let base_url = match &config.api_url {
        Some(url) => url.clone(),
        None => default_base_url(name).ok_or_else(|| {
            ProviderError::NotConfigured(format!(
                "unknown provider '{name}'; set planner.api_url for custom endpoints"
            ))
        })?,
    };

    let api_key = match &config.api_key {
        Some(key) => key.clone(),
        None if is_local(name) || config.api_url.is_some() => String::new(),
        None => {
            return Err(ProviderError::NotConfigured(format!(
                "no API key for provider '{name}' (set planner.api_key or CORTEX_API_KEY)"
            )));
        }
    };

    // The HTTP deadline sits just past the planner's own bound so the
    // planner timeout is the one that fires.
    let http_timeout = Duration::from_secs(config.timeout_secs.saturating_add(5));

    debug!(provider = %name, base_url = %base_url, "Building planner provider");
    let provider = OpenAiCompatProvider::with_timeout(name, base_url, api_key, http_timeout)?;
    Ok(Arc::new(provider))
}

/// Base URL for well-known OpenAI-compatible providers.
pub fn default_base_url(provider_name: &str) -> Option<String> {
    let url = match provider_name {
        "openrouter" => "https://openrouter.ai/api/v1",
        "openai" => "https://api.openai.com/v1",
        "ollama" => "http://localhost:11434/v1",
        "deepseek" => "https://api.deepseek.com/v1",
        "groq" => "https://api.groq.com/openai/v1",
        "together" => "https://api.together.xyz/v1",
        "fireworks" => "https://api.fireworks.ai/inference/v1",
        "vllm" => "http://localhost:8000/v1",
        "llamacpp" | "llama.cpp" => "http://localhost:8080/v1",
        _ => return None,
    };
    Some(url.to_string())
}

fn is_local(provider_name: &str) -> bool {
    matches!(provider_name, "ollama" | "vllm" | "llamacpp" | "llama.cpp")
}
