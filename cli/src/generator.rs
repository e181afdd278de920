use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use forkcast_core::engine::{GenerationRequest, MealGenerator};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Connection settings for the OpenAI-compatible chat endpoint. The model
/// id travels with each request, not here.
#[derive(Debug, Clone)]
pub struct GeneratorSettings {
    pub base_url: String,
    pub api_key: Option<String>,
}

impl GeneratorSettings {
    pub fn from_env() -> Self {
        let base_url = std::env::var("FORKCAST_LLM_BASE_URL")
            .ok()
            .map(|s| s.trim().trim_end_matches('/').to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let api_key = std::env::var("FORKCAST_LLM_API_KEY")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        Self { base_url, api_key }
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    temperature: f64,
    max_tokens: u32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

/// Chat-completions client for the external meal generator.
///
/// Implements the engine's synchronous `MealGenerator` seam by blocking on
/// the captured runtime handle; callers on async worker threads must run
/// the engine on a blocking task.
pub struct OpenAiChatClient {
    client: reqwest::Client,
    rt: tokio::runtime::Handle,
    settings: GeneratorSettings,
}

impl OpenAiChatClient {
    pub fn new(settings: GeneratorSettings) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(format!("forkcast-cli/{}", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(45))
            .connect_timeout(std::time::Duration::from_secs(5))
            .build()
            .expect("Failed to build HTTP client");
        Self {
            client,
            rt: tokio::runtime::Handle::current(),
            settings,
        }
    }

    pub async fn complete_async(&self, request: &GenerationRequest) -> Result<String> {
        let url = format!("{}/chat/completions", self.settings.base_url);
        let body = ChatCompletionRequest {
            model: &request.model,
            temperature: request.temperature,
            max_tokens: request.max_output_tokens,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user,
                },
            ],
        };

        let mut req = self.client.post(&url).json(&body);
        if let Some(key) = &self.settings.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req
            .send()
            .await
            .context("Failed to reach the meal generation service")?;

        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            bail!("Meal generation service returned {status}: {detail}");
        }

        let data: ChatCompletionResponse = resp
            .json()
            .await
            .context("Failed to parse meal generation response")?;

        let content = data
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        Ok(content)
    }
}

impl MealGenerator for OpenAiChatClient {
    fn generate(&self, request: &GenerationRequest) -> Result<String> {
        self.rt.block_on(self.complete_async(request))
    }
}
