pub mod http;
pub mod reasoning;
pub mod registry;

use std::pin::Pin;

use futures_util::{Stream, StreamExt};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::SwitchboardError;
use crate::messages::Message;

/// Which output stream a token belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Answer,
    Reasoning,
}

/// One chunk of provider output, in the provider's own chunking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Token {
    pub channel: Channel,
    pub text: String,
}

impl Token {
    pub fn answer(text: impl Into<String>) -> Self {
        Self {
            channel: Channel::Answer,
            text: text.into(),
        }
    }

    pub fn reasoning(text: impl Into<String>) -> Self {
        Self {
            channel: Channel::Reasoning,
            text: text.into(),
        }
    }
}

/// Ordered token sequence. Ends with `None` on completion or yields an
/// `Err` on provider failure; nothing is yielded after an `Err`.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<Token, SwitchboardError>> + Send>>;

/// Internal request type. Every provider binding accepts this.
#[derive(Clone, Debug)]
pub struct ProviderRequest {
    /// Upstream model id (e.g. "claude-3-5-sonnet-latest"), not the catalog key.
    pub model: String,
    /// Resolved system prompt. Empty means "no system prompt".
    pub system: String,
    pub messages: Vec<Message>,
    pub temperature: f64,
    pub max_output_tokens: u32,
    /// Fired when the caller goes away. Streaming backends stop reading
    /// and drop the upstream connection.
    pub cancellation_token: CancellationToken,
}

/// The single capability the core needs from a vendor integration.
///
/// The returned stream is lazy: no network I/O happens until it is first
/// polled, and each further token is only read from upstream when the
/// consumer asks for it.
pub trait Provider: Send + Sync {
    /// Provider name for logs and error attribution (e.g. "openai").
    fn name(&self) -> &str;

    fn stream_generate(&self, req: ProviderRequest) -> TokenStream;
}

/// Drain a token stream and return the concatenated answer-channel text.
/// Reasoning tokens are discarded. The first error aborts the drain.
pub async fn collect_answer(mut stream: TokenStream) -> Result<String, SwitchboardError> {
    let mut text = String::new();
    while let Some(token) = stream.next().await {
        let token = token?;
        if token.channel == Channel::Answer {
            text.push_str(&token.text);
        }
    }
    Ok(text)
}
