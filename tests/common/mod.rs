#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use switchboard::dispatch::registry::{ModelDescriptor, ProviderKind, Registry};
use switchboard::dispatch::reasoning::SplitterConfig;
use switchboard::dispatch::{Provider, ProviderRequest, Token, TokenStream};
use switchboard::error::SwitchboardError;
use switchboard::messages::{ChatRequest, ConversationMessage};
use tokio::net::TcpListener;

/// Provider that replays a fixed script of tokens and failures.
pub struct ScriptedProvider {
    name: String,
    script: Vec<Result<Token, String>>,
    /// Keep the stream open (pending) after the script runs out.
    hang_at_end: bool,
    delay: Option<Duration>,
    calls: Arc<AtomicUsize>,
    pulled: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<ProviderRequest>>>,
}

impl ScriptedProvider {
    pub fn new(name: &str, script: Vec<Result<Token, String>>) -> Self {
        Self {
            name: name.to_string(),
            script,
            hang_at_end: false,
            delay: None,
            calls: Arc::new(AtomicUsize::new(0)),
            pulled: Arc::new(AtomicUsize::new(0)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn answers(name: &str, chunks: &[&str]) -> Self {
        Self::new(name, chunks.iter().map(|c| Ok(Token::answer(*c))).collect())
    }

    pub fn hanging(mut self) -> Self {
        self.hang_at_end = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }

    /// Number of script items handed to the consumer so far.
    pub fn pulled(&self) -> Arc<AtomicUsize> {
        self.pulled.clone()
    }

    pub fn requests(&self) -> Arc<Mutex<Vec<ProviderRequest>>> {
        self.requests.clone()
    }
}

impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn stream_generate(&self, req: ProviderRequest) -> TokenStream {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(req);

        let script = self.script.clone();
        let hang = self.hang_at_end;
        let delay = self.delay;
        let pulled = self.pulled.clone();
        let name = self.name.clone();

        Box::pin(async_stream::stream! {
            for item in script {
                if let Some(d) = delay {
                    tokio::time::sleep(d).await;
                }
                pulled.fetch_add(1, Ordering::SeqCst);
                match item {
                    Ok(token) => yield Ok(token),
                    Err(message) => {
                        yield Err(SwitchboardError::Upstream {
                            provider: name.clone(),
                            message,
                            status: None,
                        });
                        return;
                    }
                }
            }
            if hang {
                std::future::pending::<()>().await;
            }
        })
    }
}

/// Provider that produces an endless answer stream, counting every pull.
pub struct EndlessProvider {
    pub pulled: Arc<AtomicUsize>,
}

impl Provider for EndlessProvider {
    fn name(&self) -> &str {
        "endless"
    }

    fn stream_generate(&self, _req: ProviderRequest) -> TokenStream {
        let pulled = self.pulled.clone();
        Box::pin(async_stream::stream! {
            loop {
                let n = pulled.fetch_add(1, Ordering::SeqCst);
                yield Ok(Token::answer(format!("t{n}")));
            }
        })
    }
}

/// Provider whose whole reply is computed from the request.
pub struct FnProvider<F> {
    reply: F,
}

impl<F> FnProvider<F>
where
    F: Fn(&ProviderRequest) -> Result<String, String> + Send + Sync + 'static,
{
    pub fn new(reply: F) -> Self {
        Self { reply }
    }
}

impl<F> Provider for FnProvider<F>
where
    F: Fn(&ProviderRequest) -> Result<String, String> + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        "fn"
    }

    fn stream_generate(&self, req: ProviderRequest) -> TokenStream {
        let reply = (self.reply)(&req);
        Box::pin(async_stream::stream! {
            tokio::task::yield_now().await;
            match reply {
                Ok(text) => yield Ok(Token::answer(text)),
                Err(message) => yield Err(SwitchboardError::Upstream {
                    provider: "fn".to_string(),
                    message,
                    status: None,
                }),
            }
        })
    }
}

pub fn bindings(pairs: Vec<(ProviderKind, Arc<dyn Provider>)>) -> HashMap<ProviderKind, Arc<dyn Provider>> {
    pairs.into_iter().collect()
}

/// Single-provider registry: "plain" (default) and "thinker" (reasoning), both on Groq.
pub fn registry_with(provider: Arc<dyn Provider>) -> Registry {
    use switchboard::dispatch::registry::Capability;

    let descriptors = vec![
        ModelDescriptor::new("plain", "plain-upstream", ProviderKind::Groq),
        ModelDescriptor::new("thinker", "thinker-upstream", ProviderKind::Groq)
            .with_capability(Capability::Reasoning),
    ];
    Registry::new(
        descriptors,
        &bindings(vec![(ProviderKind::Groq, provider)]),
        "plain",
        &SplitterConfig::default(),
    )
    .unwrap()
}

pub fn chat_request(model: Option<&str>, texts: &[&str]) -> ChatRequest {
    ChatRequest {
        model: model.map(str::to_string),
        system: Some("be brief".to_string()),
        messages: texts
            .iter()
            .enumerate()
            .map(|(i, t)| {
                if i % 2 == 0 {
                    ConversationMessage::user(*t)
                } else {
                    ConversationMessage::assistant(*t)
                }
            })
            .collect(),
    }
}

/// Helper: bind a TCP listener on localhost and return (listener, port).
pub async fn mock_listener() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}
