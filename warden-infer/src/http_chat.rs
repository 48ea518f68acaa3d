use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use warden_types::{ChatMessage, GenerationRequest, Role};

use crate::{Generation, GenerationError, Generator};

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

impl<'a> From<&'a ChatMessage> for WireMessage<'a> {
    fn from(m: &'a ChatMessage) -> Self {
        let role = match m.role {
            Role::System => "system",
            Role::User => "user",
        };
        Self {
            role,
            content: &m.content,
        }
    }
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// Calls an OpenAI-compatible `/chat/completions` endpoint.
///
/// Streaming is off so the response carries token usage.
pub struct HttpChatGenerator {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl HttpChatGenerator {
    pub fn new(base_url: String, model: String, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            api_key,
        }
    }
}

#[async_trait]
impl Generator for HttpChatGenerator {
    async fn generate(&self, req: GenerationRequest) -> Result<Generation, GenerationError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = ChatCompletionRequest {
            model: &self.model,
            messages: req.messages.iter().map(WireMessage::from).collect(),
            max_tokens: req.max_tokens,
            temperature: req.temperature,
            stream: false,
        };

        let mut builder = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let resp = builder
            .send()
            .await
            .map_err(|e| GenerationError::new(format!("HTTP error: {e}")))?;

        if !resp.status().is_success() {
            return Err(GenerationError::new(format!("HTTP status: {}", resp.status())));
        }

        let parsed: ChatCompletionResponse = resp
            .json()
            .await
            .map_err(|e| GenerationError::new(format!("bad completion body: {e}")))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| GenerationError::new("completion has no content"))?;
        let (tokens_in, tokens_out) = parsed
            .usage
            .map(|u| (u.prompt_tokens, u.completion_tokens))
            .unwrap_or((0, 0));

        tracing::debug!(
            event = "generator.response",
            model = %self.model,
            tokens_in,
            tokens_out
        );

        Ok(Generation {
            text: text.trim().to_string(),
            tokens_in,
            tokens_out,
        })
    }

    fn model(&self) -> &str {
        &self.model
    }
}
