//! Reasoning/answer separation for models that interleave both in one text
//! stream, delimited by `<tag>...</tag>` markers.

use std::sync::Arc;

use futures_util::StreamExt;
use serde::Deserialize;

use crate::dispatch::{Channel, Provider, ProviderRequest, Token, TokenStream};

pub const DEFAULT_REASONING_TAG: &str = "think";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SplitterConfig {
    /// Tag name without brackets; `think` matches `<think>` / `</think>`.
    pub tag: String,
    /// Treat the stream as already inside an open marker from the first token.
    pub start_with_reasoning: bool,
}

impl Default for SplitterConfig {
    fn default() -> Self {
        Self {
            tag: DEFAULT_REASONING_TAG.to_string(),
            start_with_reasoning: false,
        }
    }
}

/// Incremental classifier over raw text chunks.
///
/// Markers may arrive split across chunk boundaries, so a trailing fragment
/// that could still become a marker is held back until the next chunk
/// settles it. Marker text is never emitted.
#[derive(Debug)]
pub struct TagSplitter {
    open: String,
    close: String,
    in_reasoning: bool,
    buffer: String,
}

impl TagSplitter {
    pub fn new(config: &SplitterConfig) -> Self {
        Self {
            open: format!("<{}>", config.tag),
            close: format!("</{}>", config.tag),
            in_reasoning: config.start_with_reasoning,
            buffer: String::new(),
        }
    }

    fn channel(&self) -> Channel {
        if self.in_reasoning {
            Channel::Reasoning
        } else {
            Channel::Answer
        }
    }

    /// Feed one chunk; returns the classified text that is now unambiguous.
    pub fn push(&mut self, text: &str) -> Vec<Token> {
        self.buffer.push_str(text);
        let mut out = Vec::new();

        loop {
            let marker = if self.in_reasoning {
                self.close.clone()
            } else {
                self.open.clone()
            };

            if let Some(idx) = self.buffer.find(&marker) {
                let before: String = self.buffer.drain(..idx).collect();
                emit(&mut out, self.channel(), before);
                self.buffer.replace_range(..marker.len(), "");
                self.in_reasoning = !self.in_reasoning;
                continue;
            }

            let keep = partial_marker_suffix(&self.buffer, &marker);
            let ready = self.buffer.len() - keep;
            let settled: String = self.buffer.drain(..ready).collect();
            emit(&mut out, self.channel(), settled);
            return out;
        }
    }

    /// End of stream. Held-back text goes to the current channel, so an
    /// unterminated open marker flushes its contents as reasoning.
    pub fn finish(&mut self) -> Vec<Token> {
        let mut out = Vec::new();
        let rest = std::mem::take(&mut self.buffer);
        emit(&mut out, self.channel(), rest);
        out
    }

    pub fn in_reasoning(&self) -> bool {
        self.in_reasoning
    }
}

fn emit(out: &mut Vec<Token>, channel: Channel, text: String) {
    if !text.is_empty() {
        out.push(Token { channel, text });
    }
}

/// Length of the longest proper prefix of `marker` that `buf` ends with.
fn partial_marker_suffix(buf: &str, marker: &str) -> usize {
    (1..marker.len())
        .rev()
        .filter(|&len| marker.is_char_boundary(len))
        .find(|&len| buf.ends_with(&marker[..len]))
        .unwrap_or(0)
}

/// Decorator that runs a provider's answer tokens through a `TagSplitter`.
///
/// Tokens the inner provider already tagged as reasoning pass through as-is.
pub struct ReasoningSplitter {
    inner: Arc<dyn Provider>,
    config: SplitterConfig,
}

impl ReasoningSplitter {
    pub fn new(inner: Arc<dyn Provider>, config: SplitterConfig) -> Self {
        Self { inner, config }
    }
}

impl Provider for ReasoningSplitter {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn stream_generate(&self, req: ProviderRequest) -> TokenStream {
        let mut upstream = self.inner.stream_generate(req);
        let mut splitter = TagSplitter::new(&self.config);

        Box::pin(async_stream::stream! {
            while let Some(item) = upstream.next().await {
                match item {
                    Ok(token) if token.channel == Channel::Reasoning => yield Ok(token),
                    Ok(token) => {
                        for t in splitter.push(&token.text) {
                            yield Ok(t);
                        }
                    }
                    Err(e) => {
                        for t in splitter.finish() {
                            yield Ok(t);
                        }
                        yield Err(e);
                        return;
                    }
                }
            }
            if splitter.in_reasoning() {
                tracing::debug!("stream ended inside an open reasoning marker, flushing");
            }
            for t in splitter.finish() {
                yield Ok(t);
            }
        })
    }
}
