use thiserror::Error;

#[derive(Debug, Error)]
pub enum SwitchboardError {
    #[error("model not found: {model}")]
    ModelNotFound {
        model: String,
        suggestions: Vec<String>,
    },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("timeout after {0}ms")]
    Timeout(u64),

    #[error("cancelled")]
    Cancelled,

    #[error("rate limited by {provider}")]
    RateLimited { provider: String },

    #[error("upstream error from {provider}: {message}")]
    Upstream {
        provider: String,
        message: String,
        status: Option<u16>,
    },

    #[error("auth failed for {provider}: {message}")]
    AuthFailed { provider: String, message: String },

    #[error("schema parse error: {0}")]
    SchemaParse(String),

    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("system prompt fetch failed: {0}")]
    PromptFetch(String),

    #[error("generation failed while {stage}: {source}")]
    Generation {
        stage: &'static str,
        #[source]
        source: Box<SwitchboardError>,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl SwitchboardError {
    /// Extract provider name from structured error variants.
    /// Returns None for variants that don't carry provider context.
    pub fn provider(&self) -> Option<&str> {
        match self {
            Self::RateLimited { provider } => Some(provider),
            Self::Upstream { provider, .. } => Some(provider),
            Self::AuthFailed { provider, .. } => Some(provider),
            Self::Generation { source, .. } => source.provider(),
            _ => None,
        }
    }

    /// Wrap a provider failure raised inside the generation loop.
    pub fn generation(stage: &'static str, source: SwitchboardError) -> Self {
        Self::Generation {
            stage,
            source: Box::new(source),
        }
    }

    /// Produce a sanitized error message safe for returning to chat clients.
    /// Does not leak internal URLs, connection details, or upstream error bodies.
    pub fn user_message(&self) -> String {
        match self {
            Self::ModelNotFound { model, suggestions } => {
                if suggestions.is_empty() {
                    format!("model not found: {model}")
                } else {
                    format!(
                        "model not found: {model}. Did you mean: {}?",
                        suggestions.join(", ")
                    )
                }
            }
            Self::InvalidRequest(msg) => format!("invalid request: {msg}"),
            Self::Timeout(ms) => format!("request timed out after {ms}ms"),
            Self::Cancelled => "request cancelled".to_string(),
            Self::RateLimited { provider } => {
                format!("rate limited by {provider}, try again shortly")
            }
            Self::Upstream { provider, status, .. } => match status {
                Some(code) => format!("upstream error from {provider} (HTTP {code})"),
                None => format!("upstream error from {provider}"),
            },
            Self::AuthFailed { provider, .. } => {
                format!("authentication failed for {provider}")
            }
            Self::SchemaParse(_) => "failed to parse provider response".to_string(),
            Self::Request(_) => "request to provider failed".to_string(),
            Self::PromptFetch(_) => "system prompt unavailable".to_string(),
            Self::Generation { stage, source } => {
                format!("generation failed while {stage}: {}", source.user_message())
            }
            Self::Config(msg) => format!("configuration error: {msg}"),
            Self::Other(msg) => msg.clone(),
        }
    }
}
