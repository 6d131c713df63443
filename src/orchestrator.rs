use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc::{self, OwnedPermit};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::ChatSettings;
use crate::dispatch::registry::{Registry, Route};
use crate::dispatch::{Channel, ProviderRequest, Token};
use crate::error::SwitchboardError;
use crate::messages::{ChatRequest, normalize};
use crate::prompt::SystemPromptResolver;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Streaming,
    Done,
    Error,
}

/// One frame on the chat transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    Status {
        value: Status,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Token {
        channel: Channel,
        text: String,
    },
}

impl StreamEvent {
    pub fn status(value: Status) -> Self {
        Self::Status {
            value,
            message: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self::Status {
            value: Status::Error,
            message: Some(message),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Status {
                value: Status::Done | Status::Error,
                ..
            }
        )
    }

    /// SSE event name for this frame.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Status { .. } => "status",
            Self::Token { .. } => "token",
        }
    }
}

impl From<Token> for StreamEvent {
    fn from(token: Token) -> Self {
        Self::Token {
            channel: token.channel,
            text: token.text,
        }
    }
}

/// How a request's stream ended. Exactly one per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Done,
    Error,
    /// Client went away. No terminal frame was sent.
    Cancelled,
}

/// Receiving half of a running chat request.
pub struct ChatStream {
    /// Catalog id that actually served the request.
    pub model: String,
    events: mpsc::Receiver<StreamEvent>,
    task: JoinHandle<Disposition>,
}

impl ChatStream {
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        self.events.recv().await
    }

    pub fn into_parts(self) -> (mpsc::Receiver<StreamEvent>, JoinHandle<Disposition>) {
        (self.events, self.task)
    }
}

/// Drives one provider call per chat request and forwards its tokens.
pub struct Orchestrator {
    registry: Arc<Registry>,
    prompts: Arc<SystemPromptResolver>,
    settings: ChatSettings,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<Registry>,
        prompts: Arc<SystemPromptResolver>,
        settings: ChatSettings,
    ) -> Self {
        Self {
            registry,
            prompts,
            settings,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Resolve, normalize, pick the system prompt, then hand the provider
    /// call to its own task. An `Err` here means no stream was opened.
    ///
    /// Events flow through a channel of `channel_capacity`; a slow consumer
    /// stalls the task, which stops pulling tokens from the provider. One
    /// slot is reserved up front for the terminal frame, so `done` or
    /// `error` is delivered even when the consumer has stopped reading.
    pub async fn start(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> Result<ChatStream, SwitchboardError> {
        let route = self.registry.resolve(request.model.as_deref()).clone();
        let messages = normalize(&request.messages)?;
        let system = self.prompts.resolve(request.system.as_deref()).await;

        tracing::info!(
            model = %route.descriptor.id,
            provider = route.binding.name(),
            middleware = ?route.middleware,
            messages = messages.len(),
            "chat request"
        );

        let provider_req = ProviderRequest {
            model: route.descriptor.upstream_id.clone(),
            system,
            messages,
            temperature: self.settings.temperature,
            max_output_tokens: self.settings.max_output_tokens,
            cancellation_token: cancel,
        };

        let (tx, rx) = mpsc::channel(self.settings.channel_capacity.max(2));
        let model = route.descriptor.id.clone();
        let task = tokio::spawn(drive(route, provider_req, tx, self.settings.request_timeout));

        Ok(ChatStream {
            model,
            events: rx,
            task,
        })
    }
}

async fn drive(
    route: Route,
    req: ProviderRequest,
    tx: mpsc::Sender<StreamEvent>,
    timeout: Option<Duration>,
) -> Disposition {
    let cancel = req.cancellation_token.clone();
    let model = route.descriptor.id.clone();

    if cancel.is_cancelled() {
        tracing::debug!(%model, "cancelled before provider call");
        return Disposition::Cancelled;
    }

    // Held for the terminal frame so it never waits on the consumer.
    let Ok(terminal) = tx.clone().reserve_owned().await else {
        cancel.cancel();
        return Disposition::Cancelled;
    };

    let deadline = timeout.map(|t| Instant::now() + t);
    let mut tokens = route.binding.stream_generate(req);

    match forward(&tx, &cancel, deadline, StreamEvent::status(Status::Streaming)).await {
        Forwarded::Sent => {}
        Forwarded::Gone => return Disposition::Cancelled,
        Forwarded::Expired => {
            return finish(terminal, &cancel, Err(timed_out(timeout)), &model);
        }
    }

    let mut forwarded = 0usize;
    let disposition = loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break Disposition::Cancelled,
            _ = expired(deadline) => {
                break finish(terminal, &cancel, Err(timed_out(timeout)), &model);
            }
            item = tokens.next() => item,
        };

        match next {
            Some(Ok(token)) => match forward(&tx, &cancel, deadline, token.into()).await {
                Forwarded::Sent => forwarded += 1,
                Forwarded::Gone => break Disposition::Cancelled,
                Forwarded::Expired => {
                    break finish(terminal, &cancel, Err(timed_out(timeout)), &model);
                }
            },
            Some(Err(e)) => break finish(terminal, &cancel, Err(e), &model),
            None => break finish(terminal, &cancel, Ok(()), &model),
        }
    };

    // Dropping the token stream releases the upstream connection.
    drop(tokens);
    tracing::info!(%model, forwarded, ?disposition, "chat stream closed");
    disposition
}

/// Send the terminal frame for a finished provider call through the
/// reserved slot.
fn finish(
    terminal: OwnedPermit<StreamEvent>,
    cancel: &CancellationToken,
    outcome: Result<(), SwitchboardError>,
    model: &str,
) -> Disposition {
    if cancel.is_cancelled() {
        return Disposition::Cancelled;
    }
    let (event, disposition) = match outcome {
        Ok(()) => (StreamEvent::status(Status::Done), Disposition::Done),
        Err(e) => {
            tracing::warn!(%model, "provider failed mid-stream: {e}");
            (StreamEvent::error(e.user_message()), Disposition::Error)
        }
    };
    if terminal.send(event).is_closed() {
        // Receiver dropped: the transport closed underneath us.
        cancel.cancel();
        return Disposition::Cancelled;
    }
    disposition
}

enum Forwarded {
    Sent,
    /// Consumer gone or cancellation fired.
    Gone,
    /// The request deadline passed while waiting for capacity.
    Expired,
}

/// Send one non-terminal event, waiting for channel capacity.
async fn forward(
    tx: &mpsc::Sender<StreamEvent>,
    cancel: &CancellationToken,
    deadline: Option<Instant>,
    event: StreamEvent,
) -> Forwarded {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Forwarded::Gone,
        _ = expired(deadline) => Forwarded::Expired,
        sent = tx.send(event) => match sent {
            Ok(()) => Forwarded::Sent,
            Err(_) => {
                cancel.cancel();
                Forwarded::Gone
            }
        },
    }
}

fn timed_out(timeout: Option<Duration>) -> SwitchboardError {
    SwitchboardError::Timeout(timeout.map(|t| t.as_millis() as u64).unwrap_or_default())
}

async fn expired(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending().await,
    }
}
