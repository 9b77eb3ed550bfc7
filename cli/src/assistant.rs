use anyhow::{Context, Result, bail};

use recipebox_core::assistant::{
    ChatCompletionRequest, ChatCompletionResponse, ChatMessage, DEFAULT_MODEL, extract_reply,
};
use recipebox_core::service::AssistantProvider;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Connection settings for an OpenAI-compatible chat endpoint, read from the environment.
#[derive(Debug, Clone)]
pub struct AssistantSettings {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
}

impl AssistantSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        Self {
            api_key: non_empty("OPENAI_API_KEY"),
            base_url: non_empty("RECIPEBOX_ASSISTANT_URL")
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model: non_empty("RECIPEBOX_ASSISTANT_MODEL")
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        }
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

pub struct OpenAiAssistant {
    client: reqwest::Client,
    settings: AssistantSettings,
    rt: tokio::runtime::Handle,
}

impl OpenAiAssistant {
    pub fn new(settings: AssistantSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(format!("recipebox/{}", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(120))
            .connect_timeout(std::time::Duration::from_secs(5))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            settings,
            rt: tokio::runtime::Handle::current(),
        })
    }

    pub async fn reply_async(&self, transcript: &[ChatMessage]) -> Result<String> {
        let Some(api_key) = self.settings.api_key.as_deref() else {
            bail!("OPENAI_API_KEY is not set");
        };

        let request = ChatCompletionRequest {
            model: &self.settings.model,
            messages: transcript,
        };
        tracing::debug!(
            model = %self.settings.model,
            turns = transcript.len(),
            "sending chat completion request"
        );

        let resp = self
            .client
            .post(self.settings.completions_url())
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .context("Failed to reach assistant API")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            tracing::warn!(%status, "assistant API returned an error");
            bail!("Assistant API returned {status}: {body}");
        }

        let data: ChatCompletionResponse = resp
            .json()
            .await
            .context("Failed to parse assistant response")?;
        extract_reply(data)
    }
}

impl AssistantProvider for OpenAiAssistant {
    fn reply(&self, transcript: &[ChatMessage]) -> Result<String> {
        self.rt.block_on(self.reply_async(transcript))
    }
}
