use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Client;

use crate::config::PromptServiceConfig;
use crate::error::SwitchboardError;

/// Largest accepted prompt body. Bigger responses are a fetch failure.
pub const MAX_PROMPT_BYTES: usize = 64 * 1024;

/// Picks the effective system prompt for a chat request.
pub struct SystemPromptResolver {
    client: Client,
    url: Option<String>,
    timeout: Duration,
}

impl SystemPromptResolver {
    pub fn new(client: Client, config: &PromptServiceConfig) -> Self {
        Self {
            client,
            url: config.url.clone(),
            timeout: config.timeout,
        }
    }

    /// Request-supplied text wins when it is non-blank after trimming.
    /// Otherwise the prompt service is asked exactly once; any failure
    /// resolves to an empty prompt and the request carries on without one.
    pub async fn resolve(&self, requested: Option<&str>) -> String {
        if let Some(text) = requested.map(str::trim).filter(|t| !t.is_empty()) {
            return text.to_string();
        }

        match self.fetch().await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!("{e}, continuing without a system prompt");
                String::new()
            }
        }
    }

    /// Single GET against the prompt service. Only a 2xx counts as success.
    pub async fn fetch(&self) -> Result<String, SwitchboardError> {
        let Some(url) = self.url.as_deref() else {
            return Err(SwitchboardError::PromptFetch(
                "no prompt service configured".to_string(),
            ));
        };

        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| SwitchboardError::PromptFetch(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SwitchboardError::PromptFetch(format!(
                "prompt service returned {status}"
            )));
        }

        // Read incrementally so an oversized body is never held in full.
        let mut body = Vec::new();
        let mut chunks = response.bytes_stream();
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk
                .map_err(|e| SwitchboardError::PromptFetch(format!("failed to read body: {e}")))?;
            if body.len() + chunk.len() > MAX_PROMPT_BYTES {
                return Err(SwitchboardError::PromptFetch(format!(
                    "prompt exceeds {MAX_PROMPT_BYTES} bytes"
                )));
            }
            body.extend_from_slice(&chunk);
        }

        let text = String::from_utf8(body)
            .map_err(|_| SwitchboardError::PromptFetch("prompt is not valid UTF-8".to_string()))?;
        Ok(text.trim().to_string())
    }
}
