use std::time::Duration;

use eventsource_stream::{Event, Eventsource};
use futures_util::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::dispatch::{Provider, ProviderRequest, Token, TokenStream};
use crate::error::SwitchboardError;
use crate::messages::{Message, Part};

/// Cap on how much of a non-success response body is kept for logs.
pub const MAX_ERROR_BODY_BYTES: usize = 64 * 1024;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Wire format for HTTP backends.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ApiFormat {
    /// OpenAI-compatible chat completions (OpenAI, Groq, DeepSeek).
    #[default]
    OpenAi,
    /// Anthropic Messages API (different headers, SSE event names).
    Anthropic,
}

/// Streaming chat provider reached over HTTP server-sent events.
pub struct HttpProvider {
    client: Client,
    endpoint: Endpoint,
}

#[derive(Clone)]
struct Endpoint {
    name: String,
    base_url: String,
    api_key: String,
    api_format: ApiFormat,
}

impl std::fmt::Debug for HttpProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpProvider")
            .field("name", &self.endpoint.name)
            .field("base_url", &self.endpoint.base_url)
            .field("api_format", &self.endpoint.api_format)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

/// Shared client for all HTTP providers and the prompt service.
pub fn build_client() -> Client {
    Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .pool_idle_timeout(Duration::from_secs(90))
        .pool_max_idle_per_host(4)
        .build()
        .expect("failed to build HTTP client")
}

impl HttpProvider {
    pub fn new(
        client: Client,
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        api_format: ApiFormat,
    ) -> Self {
        Self {
            client,
            endpoint: Endpoint {
                name: name.into(),
                base_url: base_url.into(),
                api_key: api_key.into(),
                api_format,
            },
        }
    }
}

impl Provider for HttpProvider {
    fn name(&self) -> &str {
        &self.endpoint.name
    }

    fn stream_generate(&self, req: ProviderRequest) -> TokenStream {
        let client = self.client.clone();
        let endpoint = self.endpoint.clone();

        Box::pin(async_stream::stream! {
            let cancel = req.cancellation_token.clone();

            let opened = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                r = endpoint.open(&client, &req) => r,
            };
            let response = match opened {
                Ok(r) => r,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };

            let mut events = response.bytes_stream().eventsource();
            loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        tracing::debug!(provider = %endpoint.name, "cancelled, dropping upstream stream");
                        break;
                    }
                    ev = events.next() => ev,
                };

                // Both formats send an explicit end marker; EOF before it is a truncation.
                let event = match next {
                    None => {
                        tracing::warn!(provider = %endpoint.name, "upstream closed before end of stream");
                        yield Err(SwitchboardError::Upstream {
                            provider: endpoint.name.clone(),
                            message: "stream ended before completion".to_string(),
                            status: None,
                        });
                        break;
                    }
                    Some(Ok(ev)) => ev,
                    Some(Err(e)) => {
                        yield Err(SwitchboardError::Upstream {
                            provider: endpoint.name.clone(),
                            message: format!("stream read failed: {e}"),
                            status: None,
                        });
                        break;
                    }
                };

                match endpoint.parse_event(&event) {
                    Ok(SseOutcome::Tokens(tokens)) => {
                        for t in tokens {
                            yield Ok(t);
                        }
                    }
                    Ok(SseOutcome::Skip) => {}
                    Ok(SseOutcome::Done) => break,
                    Err(e) => {
                        yield Err(e);
                        break;
                    }
                }
            }
        })
    }
}

enum SseOutcome {
    Tokens(Vec<Token>),
    Skip,
    Done,
}

#[derive(Deserialize)]
struct OpenAiChunk {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
    error: Option<ErrorBody>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    #[serde(default)]
    delta: OpenAiDelta,
}

#[derive(Deserialize, Default)]
struct OpenAiDelta {
    content: Option<String>,
    reasoning_content: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

#[derive(Deserialize)]
struct AnthropicEvent {
    delta: Option<AnthropicDelta>,
    error: Option<ErrorBody>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicDelta {
    TextDelta {
        text: String,
    },
    ThinkingDelta {
        thinking: String,
    },
    #[serde(other)]
    Other,
}

impl Endpoint {
    /// Send the streaming request and check the response status.
    async fn open(
        &self,
        client: &Client,
        req: &ProviderRequest,
    ) -> Result<reqwest::Response, SwitchboardError> {
        let request = match self.api_format {
            ApiFormat::OpenAi => client
                .post(&self.base_url)
                .bearer_auth(&self.api_key)
                .json(&openai_body(req)),
            ApiFormat::Anthropic => client
                .post(&self.base_url)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&anthropic_body(req)),
        };

        let response = request
            .header("Accept", "text/event-stream")
            .send()
            .await
            .map_err(|e| SwitchboardError::Upstream {
                provider: self.name.clone(),
                message: format!("request failed: {e}"),
                status: None,
            })?;

        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(SwitchboardError::RateLimited {
                provider: self.name.clone(),
            });
        }

        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(SwitchboardError::AuthFailed {
                provider: self.name.clone(),
                message: format!("{status}"),
            });
        }

        if !status.is_success() {
            let error_bytes = response.bytes().await.unwrap_or_default();
            let truncated = &error_bytes[..error_bytes.len().min(MAX_ERROR_BODY_BYTES)];
            let text = String::from_utf8_lossy(truncated);
            tracing::warn!(provider = %self.name, %status, "upstream rejected request: {text}");
            return Err(SwitchboardError::Upstream {
                provider: self.name.clone(),
                message: format!("{status}: {text}"),
                status: Some(status.as_u16()),
            });
        }

        Ok(response)
    }

    fn parse_event(&self, event: &Event) -> Result<SseOutcome, SwitchboardError> {
        match self.api_format {
            ApiFormat::OpenAi => self.parse_openai(event),
            ApiFormat::Anthropic => self.parse_anthropic(event),
        }
    }

    fn parse_openai(&self, event: &Event) -> Result<SseOutcome, SwitchboardError> {
        let data = event.data.trim();
        if data.is_empty() {
            return Ok(SseOutcome::Skip);
        }
        if data == "[DONE]" {
            return Ok(SseOutcome::Done);
        }

        let chunk: OpenAiChunk = serde_json::from_str(data)
            .map_err(|e| SwitchboardError::SchemaParse(format!("bad chunk from {}: {e}", self.name)))?;

        if let Some(err) = chunk.error {
            return Err(self.stream_error(err));
        }

        let mut tokens = Vec::new();
        for choice in chunk.choices {
            if let Some(r) = choice.delta.reasoning_content.filter(|s| !s.is_empty()) {
                tokens.push(Token::reasoning(r));
            }
            if let Some(c) = choice.delta.content.filter(|s| !s.is_empty()) {
                tokens.push(Token::answer(c));
            }
        }
        Ok(SseOutcome::Tokens(tokens))
    }

    fn parse_anthropic(&self, event: &Event) -> Result<SseOutcome, SwitchboardError> {
        match event.event.as_str() {
            "message_stop" => return Ok(SseOutcome::Done),
            "content_block_delta" | "error" => {}
            _ => return Ok(SseOutcome::Skip),
        }

        let parsed: AnthropicEvent = serde_json::from_str(&event.data)
            .map_err(|e| SwitchboardError::SchemaParse(format!("bad event from {}: {e}", self.name)))?;

        if let Some(err) = parsed.error {
            return Err(self.stream_error(err));
        }

        let token = match parsed.delta {
            Some(AnthropicDelta::TextDelta { text }) if !text.is_empty() => Token::answer(text),
            Some(AnthropicDelta::ThinkingDelta { thinking }) if !thinking.is_empty() => {
                Token::reasoning(thinking)
            }
            _ => return Ok(SseOutcome::Skip),
        };
        Ok(SseOutcome::Tokens(vec![token]))
    }

    fn stream_error(&self, err: ErrorBody) -> SwitchboardError {
        SwitchboardError::Upstream {
            provider: self.name.clone(),
            message: err
                .message
                .unwrap_or_else(|| "error event in stream".to_string()),
            status: None,
        }
    }
}

fn openai_body(req: &ProviderRequest) -> Value {
    let mut messages = Vec::with_capacity(req.messages.len() + 1);
    if !req.system.is_empty() {
        messages.push(json!({"role": "system", "content": req.system}));
    }
    for msg in &req.messages {
        messages.push(match msg {
            Message::Assistant { text } => json!({"role": "assistant", "content": text}),
            Message::User { parts } => match parts.as_slice() {
                [Part::Text(text)] => json!({"role": "user", "content": text}),
                _ => json!({
                    "role": "user",
                    "content": parts.iter().map(openai_part).collect::<Vec<_>>(),
                }),
            },
        });
    }

    json!({
        "model": req.model,
        "messages": messages,
        "temperature": req.temperature,
        "max_tokens": req.max_output_tokens,
        "stream": true,
    })
}

fn openai_part(part: &Part) -> Value {
    match part {
        Part::Text(text) => json!({"type": "text", "text": text}),
        Part::Attachment { url, .. } if part.is_image() => {
            json!({"type": "image_url", "image_url": {"url": url}})
        }
        Part::Attachment { url, name, .. } => json!({
            "type": "text",
            "text": format!("[attachment: {}]({url})", name.as_deref().unwrap_or("file")),
        }),
    }
}

fn anthropic_body(req: &ProviderRequest) -> Value {
    let messages: Vec<Value> = req
        .messages
        .iter()
        .map(|msg| match msg {
            Message::Assistant { text } => json!({"role": "assistant", "content": text}),
            Message::User { parts } => json!({
                "role": "user",
                "content": parts.iter().map(anthropic_part).collect::<Vec<_>>(),
            }),
        })
        .collect();

    let mut body = json!({
        "model": req.model,
        "messages": messages,
        "temperature": req.temperature,
        "max_tokens": req.max_output_tokens,
        "stream": true,
    });
    if !req.system.is_empty() {
        body["system"] = json!(req.system);
    }
    body
}

fn anthropic_part(part: &Part) -> Value {
    match part {
        Part::Text(text) => json!({"type": "text", "text": text}),
        Part::Attachment { url, .. } if part.is_image() => {
            json!({"type": "image", "source": {"type": "url", "url": url}})
        }
        Part::Attachment {
            url,
            media_type: Some(mt),
            ..
        } if mt == "application/pdf" => {
            json!({"type": "document", "source": {"type": "url", "url": url}})
        }
        Part::Attachment { url, name, .. } => json!({
            "type": "text",
            "text": format!("[attachment: {}]({url})", name.as_deref().unwrap_or("file")),
        }),
    }
}
